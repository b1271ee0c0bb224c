//! Sync manager register block of the EtherCAT slave controller.

use bitflags::bitflags;

use super::Field;
use crate::error::Result;
use crate::physical::{read_data, write_data, EthercatCom};
use crate::types::{AddrMode, SlaveHandler};

pub const SYNCMAN_BASE_ADDR: u16 = 0x0800;
pub const SYNCMAN_SIZE: usize = 8;

const START_ADDRESS: Field = Field::new(0, 2);
const LENGTH: Field = START_ADDRESS.after(2);
const CONTROL: Field = LENGTH.after(1);
const STATUS: Field = CONTROL.after(1);
const ACTIVATE: Field = STATUS.after(1);
const PDI_CONTROL: Field = ACTIVATE.after(1);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncManStatus: u8 {
        const INTERRUPT_WRITE = 1 << 0;
        const INTERRUPT_READ = 1 << 1;
        const MAILBOX_FULL = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncManActivate: u8 {
        const ENABLE = 1 << 0;
        const REPEAT_REQUEST = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncManPdiControl: u8 {
        const DEACTIVATE = 1 << 0;
        const REPEAT_ACK = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMan {
    pub start_address: u16,
    pub length: u16,
    pub control: u8,
    pub status: SyncManStatus,
    pub activate: SyncManActivate,
    pub pdi_control: SyncManPdiControl,
}

impl SyncMan {
    pub fn base_address(num: u8) -> u16 {
        SYNCMAN_BASE_ADDR + 8 * u16::from(num)
    }

    pub fn status_address(num: u8) -> u16 {
        Self::base_address(num) + STATUS.offset as u16
    }

    pub fn activate_address(num: u8) -> u16 {
        Self::base_address(num) + ACTIVATE.offset as u16
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        super::ensure_len(buf, SYNCMAN_SIZE, "sync manager")?;
        Ok(Self {
            start_address: START_ADDRESS.u16(buf),
            length: LENGTH.u16(buf),
            control: CONTROL.u8(buf),
            status: SyncManStatus::from_bits_retain(STATUS.u8(buf)),
            activate: SyncManActivate::from_bits_retain(ACTIVATE.u8(buf)),
            pdi_control: SyncManPdiControl::from_bits_retain(PDI_CONTROL.u8(buf)),
        })
    }

    pub fn encode(&self) -> [u8; SYNCMAN_SIZE] {
        let mut buf = [0u8; SYNCMAN_SIZE];
        START_ADDRESS.put_u16(&mut buf, self.start_address);
        LENGTH.put_u16(&mut buf, self.length);
        CONTROL.put_u8(&mut buf, self.control);
        STATUS.put_u8(&mut buf, self.status.bits());
        ACTIVATE.put_u8(&mut buf, self.activate.bits());
        PDI_CONTROL.put_u8(&mut buf, self.pdi_control.bits());
        buf
    }

    pub fn mailbox_full(&self) -> bool {
        self.status.contains(SyncManStatus::MAILBOX_FULL)
    }

    pub fn repeat_request(&self) -> bool {
        self.activate.contains(SyncManActivate::REPEAT_REQUEST)
    }

    pub fn repeat_ack(&self) -> bool {
        self.pdi_control.contains(SyncManPdiControl::REPEAT_ACK)
    }

    /// Reads the whole register block of sync manager `num`
    pub fn read(com: &mut dyn EthercatCom, slave: &SlaveHandler, num: u8) -> Result<Self> {
        let raw = read_data(
            com,
            slave.station_address,
            Self::base_address(num),
            SYNCMAN_SIZE,
            AddrMode::Fixed,
        )?;
        Self::decode(&raw)
    }

    /// Writes back only the activate register; the others belong to the master
    pub fn write_activate(
        &self,
        com: &mut dyn EthercatCom,
        slave: &SlaveHandler,
        num: u8,
    ) -> Result<()> {
        write_data(
            com,
            slave.station_address,
            Self::activate_address(num),
            &[self.activate.bits()],
            AddrMode::Fixed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_addresses() {
        assert_eq!(SyncMan::base_address(0), 0x0800);
        assert_eq!(SyncMan::status_address(0), 0x0805);
        assert_eq!(SyncMan::status_address(1), 0x080D);
        assert_eq!(SyncMan::activate_address(1), 0x080E);
    }

    #[test]
    fn flags_decode_from_register_bytes() {
        let sm = SyncMan::decode(&[0x00, 0x24, 0x00, 0x02, 0x02, 0x08, 0x03, 0x02]).unwrap();
        assert_eq!(sm.start_address, 0x2400);
        assert_eq!(sm.length, 0x200);
        assert!(sm.mailbox_full());
        assert!(sm.repeat_request());
        assert!(sm.repeat_ack());
        assert_eq!(SyncMan::decode(&sm.encode()).unwrap(), sm);
    }
}
