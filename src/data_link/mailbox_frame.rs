//! Mailbox command frames.
//!
//! A local-bus access is requested by writing a [`MailboxCommand`] into the
//! command mailbox: a 5 byte header followed, for writes, by the payload and a
//! trailing checksum byte. Read results come back in the status mailbox as
//! payload plus trailing checksum, without a header.

use super::Field;
use crate::checksum::{trailing_checksum, verify_checksum};
use crate::error::{DriverError, Result};

pub const MBX_SIZE: usize = 512;
pub const MBX_COMMAND_PHY_ADDR: u16 = 0x1400;
pub const MBX_COMMAND_SIZE: usize = MBX_SIZE;
pub const MBX_COMMAND_SYNCMAN_NUM: u8 = 0;
pub const MBX_STATUS_PHY_ADDR: u16 = 0x2400;
pub const MBX_STATUS_SIZE: usize = MBX_SIZE;
pub const MBX_STATUS_SYNCMAN_NUM: u8 = 1;

pub const MBX_HEADER_SIZE: usize = 5;
/// Room left after the header, holding payload and its checksum
pub const MBX_DATA_SIZE: usize = MBX_SIZE - MBX_HEADER_SIZE;
pub const MAX_WRITE_LENGTH: usize = MBX_DATA_SIZE - 1;
pub const MAX_READ_LENGTH: usize = MBX_SIZE - 2;

const ADDRESS: Field = Field::new(0, 2);
const COMMAND: Field = ADDRESS.after(2);
const CHECKSUM: Field = COMMAND.after(1);

const LENGTH_MASK: u16 = 0x0FFF;
const SEQUENCE_SHIFT: u16 = 12;
const SEQUENCE_MASK: u16 = 0x7;
const WRITE_FLAG: u16 = 0x8000;

/// Sequence numbers cycle through 1..=7, zero is never sent
pub fn next_sequence(current: u8) -> u8 {
    current % 7 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxHeader {
    pub address: u16,
    pub length: usize,
    pub sequence: u8,
    pub op: MailboxOp,
}

impl MailboxHeader {
    pub fn build(address: u16, length: usize, op: MailboxOp, sequence: u8) -> Result<Self> {
        let limit = match op {
            MailboxOp::Write => MAX_WRITE_LENGTH,
            MailboxOp::Read => MAX_READ_LENGTH,
        };
        if length == 0 || length > limit {
            return Err(DriverError::InvalidParameter(format!(
                "mailbox {:?} length {} outside 1..={}",
                op, length, limit
            )));
        }
        Ok(Self {
            address,
            length,
            sequence: sequence & SEQUENCE_MASK as u8,
            op,
        })
    }

    fn command_word(&self) -> u16 {
        let mut word = (self.length as u16 - 1) & LENGTH_MASK;
        word |= (u16::from(self.sequence) & SEQUENCE_MASK) << SEQUENCE_SHIFT;
        if self.op == MailboxOp::Write {
            word |= WRITE_FLAG;
        }
        word
    }

    pub fn encode(&self) -> [u8; MBX_HEADER_SIZE] {
        let mut buf = [0u8; MBX_HEADER_SIZE];
        ADDRESS.put_u16(&mut buf, self.address);
        COMMAND.put_u16(&mut buf, self.command_word());
        let sum = trailing_checksum(&buf[..CHECKSUM.offset]);
        CHECKSUM.put_u8(&mut buf, sum);
        buf
    }

    /// Parses a header, rejecting it when it does not checksum to zero
    pub fn decode(buf: &[u8]) -> Result<Self> {
        super::ensure_len(buf, MBX_HEADER_SIZE, "mailbox header")?;
        if !verify_checksum(&buf[..MBX_HEADER_SIZE]) {
            return Err(DriverError::ChecksumMismatch);
        }
        let word = COMMAND.u16(buf);
        Ok(Self {
            address: ADDRESS.u16(buf),
            length: usize::from(word & LENGTH_MASK) + 1,
            sequence: ((word >> SEQUENCE_SHIFT) & SEQUENCE_MASK) as u8,
            op: if word & WRITE_FLAG != 0 {
                MailboxOp::Write
            } else {
                MailboxOp::Read
            },
        })
    }
}

/// Header plus (for writes) payload and trailing checksum
#[derive(Debug, Clone)]
pub struct MailboxCommand {
    pub header: MailboxHeader,
    payload: Vec<u8>,
}

impl MailboxCommand {
    pub fn read(address: u16, length: usize, sequence: u8) -> Result<Self> {
        Ok(Self {
            header: MailboxHeader::build(address, length, MailboxOp::Read, sequence)?,
            payload: Vec::new(),
        })
    }

    pub fn write(address: u16, data: &[u8], sequence: u8) -> Result<Self> {
        Ok(Self {
            header: MailboxHeader::build(address, data.len(), MailboxOp::Write, sequence)?,
            payload: data.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MBX_HEADER_SIZE + self.payload.len() + 1);
        buf.extend_from_slice(&self.header.encode());
        if self.header.op == MailboxOp::Write {
            buf.extend_from_slice(&self.payload);
            buf.push(trailing_checksum(&self.payload));
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::compute_checksum;

    #[test]
    fn sequence_skips_zero() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(6), 7);
        assert_eq!(next_sequence(7), 1);
    }

    #[test]
    fn header_self_checks() {
        let hdr = MailboxHeader::build(0x0080, 32, MailboxOp::Read, 3).unwrap();
        let bytes = hdr.encode();
        assert_eq!(compute_checksum(&bytes), 0);
        assert_eq!(MailboxHeader::decode(&bytes).unwrap(), hdr);
    }

    #[test]
    fn command_word_packs_length_sequence_and_direction() {
        let bytes = MailboxHeader::build(0x0230, 3, MailboxOp::Write, 5)
            .unwrap()
            .encode();
        assert_eq!(&bytes[..2], &[0x30, 0x02]);
        let word = u16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(word & 0x0FFF, 2);
        assert_eq!((word >> 12) & 0x7, 5);
        assert_ne!(word & 0x8000, 0);
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let mut bytes = MailboxHeader::build(0x00A1, 3, MailboxOp::Read, 1)
            .unwrap()
            .encode();
        bytes[0] ^= 0x01;
        assert!(matches!(
            MailboxHeader::decode(&bytes),
            Err(DriverError::ChecksumMismatch)
        ));
    }

    #[test]
    fn write_command_carries_payload_checksum() {
        let payload = [1u8, 2, 3, 4, 5];
        let cmd = MailboxCommand::write(0x00C0, &payload, 2).unwrap();
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), MBX_HEADER_SIZE + payload.len() + 1);
        assert_eq!(compute_checksum(&bytes[..MBX_HEADER_SIZE]), 0);
        assert_eq!(compute_checksum(&bytes[MBX_HEADER_SIZE..]), 0);
    }

    #[test]
    fn read_command_is_header_only() {
        let cmd = MailboxCommand::read(0x0200, 20, 4).unwrap();
        assert_eq!(cmd.encode().len(), MBX_HEADER_SIZE);
    }

    #[test]
    fn length_limits() {
        assert!(MailboxCommand::write(0, &[0u8; MAX_WRITE_LENGTH], 1).is_ok());
        assert!(MailboxCommand::write(0, &[0u8; MAX_WRITE_LENGTH + 1], 1).is_err());
        assert!(MailboxCommand::read(0, MAX_READ_LENGTH, 1).is_ok());
        assert!(MailboxCommand::read(0, MAX_READ_LENGTH + 1, 1).is_err());
        assert!(MailboxCommand::read(0, 0, 1).is_err());
    }
}
