//! Byte layouts of everything the WG0X puts on the wire.
//!
//! Records are never transmuted from memory. Each layout is a table of
//! [`Field`]s (offset and size in a little-endian byte buffer) and the record
//! types encode/decode through them.

pub mod mailbox_frame;
pub mod process_data;
pub mod syncman;

use crate::error::{DriverError, Result};

/// Location of one field inside a fixed-layout record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub len: usize,
}

impl Field {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Field that starts right after `self`
    pub const fn after(self, len: usize) -> Self {
        Self::new(self.offset + self.len, len)
    }

    pub const fn end(self) -> usize {
        self.offset + self.len
    }

    pub fn slice(self, buf: &[u8]) -> &[u8] {
        &buf[self.offset..self.end()]
    }

    pub fn slice_mut(self, buf: &mut [u8]) -> &mut [u8] {
        &mut buf[self.offset..self.end()]
    }

    pub fn array<const N: usize>(self, buf: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[self.offset..self.offset + N]);
        out
    }

    pub fn u8(self, buf: &[u8]) -> u8 {
        buf[self.offset]
    }

    pub fn u16(self, buf: &[u8]) -> u16 {
        u16::from_le_bytes(self.array(buf))
    }

    pub fn i16(self, buf: &[u8]) -> i16 {
        i16::from_le_bytes(self.array(buf))
    }

    pub fn u32(self, buf: &[u8]) -> u32 {
        u32::from_le_bytes(self.array(buf))
    }

    pub fn i32(self, buf: &[u8]) -> i32 {
        i32::from_le_bytes(self.array(buf))
    }

    pub fn f32(self, buf: &[u8]) -> f32 {
        f32::from_le_bytes(self.array(buf))
    }

    pub fn f64(self, buf: &[u8]) -> f64 {
        f64::from_le_bytes(self.array(buf))
    }

    /// Nul terminated string; the whole field when no terminator is present
    pub fn string(self, buf: &[u8]) -> String {
        let raw = self.slice(buf);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn put_u8(self, buf: &mut [u8], value: u8) {
        buf[self.offset] = value;
    }

    pub fn put_u16(self, buf: &mut [u8], value: u16) {
        self.slice_mut(buf).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_i16(self, buf: &mut [u8], value: i16) {
        self.slice_mut(buf).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(self, buf: &mut [u8], value: u32) {
        self.slice_mut(buf).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_i32(self, buf: &mut [u8], value: i32) {
        self.slice_mut(buf).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_f32(self, buf: &mut [u8], value: f32) {
        self.slice_mut(buf).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_f64(self, buf: &mut [u8], value: f64) {
        self.slice_mut(buf).copy_from_slice(&value.to_le_bytes());
    }

    /// Stores `value` nul padded, truncated so at least one terminator remains
    pub fn put_string(self, buf: &mut [u8], value: &str) {
        let dst = self.slice_mut(buf);
        dst.fill(0);
        let n = value.len().min(dst.len().saturating_sub(1));
        dst[..n].copy_from_slice(&value.as_bytes()[..n]);
    }
}

/// Rejects buffers shorter than a record layout
pub fn ensure_len(buf: &[u8], size: usize, what: &str) -> Result<()> {
    if buf.len() < size {
        return Err(DriverError::InvalidParameter(format!(
            "{} needs {} bytes, got {}",
            what,
            size,
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_fields_are_contiguous() {
        let a = Field::new(0, 2);
        let b = a.after(4);
        let c = b.after(8);
        assert_eq!(b.offset, 2);
        assert_eq!(c.offset, 6);
        assert_eq!(c.end(), 14);
    }

    #[test]
    fn values_are_little_endian() {
        let mut buf = [0u8; 8];
        Field::new(1, 4).put_u32(&mut buf, 0x1122_3344);
        assert_eq!(buf, [0, 0x44, 0x33, 0x22, 0x11, 0, 0, 0]);
        assert_eq!(Field::new(1, 4).u32(&buf), 0x1122_3344);
        assert_eq!(Field::new(1, 2).i16(&buf), 0x3344);
    }

    #[test]
    fn strings_are_truncated_and_terminated() {
        let mut buf = [0xAAu8; 6];
        let f = Field::new(0, 6);
        f.put_string(&mut buf, "shoulder_pan");
        assert_eq!(&buf, b"shoul\0");
        assert_eq!(f.string(&buf), "shoul");
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(ensure_len(&[0; 3], 4, "record").is_err());
        assert!(ensure_len(&[0; 4], 4, "record").is_ok());
    }
}
