use std::sync::atomic::{AtomicU8, Ordering};

/// Product code of the WG005 motor controller board
pub const WG05_PRODUCT_CODE: u32 = 6805005;
/// Product code of the WG006 motor controller board
pub const WG06_PRODUCT_CODE: u32 = 6805006;
/// Product code of the WG021 I/O board
pub const WG021_PRODUCT_CODE: u32 = 6805021;

/// EtherCAT application-layer state of a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Init = 1,
    PreOp = 2,
    Boot = 3,
    SafeOp = 4,
    Op = 8,
}

impl BusState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            2 => BusState::PreOp,
            3 => BusState::Boot,
            4 => BusState::SafeOp,
            8 => BusState::Op,
            _ => BusState::Init,
        }
    }

    /// Mailbox traffic needs the sync managers to be configured
    pub fn allows_mailbox(self) -> bool {
        matches!(self, BusState::SafeOp | BusState::Op)
    }
}

/// Addressing mode used for a register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// Configured station address
    Fixed,
    /// Position on the ring
    Positional,
}

/// Handle to a slave on the ring, shared between the master and the driver.
///
/// The master owns state transitions; the driver only reads them.
#[derive(Debug)]
pub struct SlaveHandler {
    pub station_address: u16,
    pub ring_position: u16,
    pub product_code: u32,
    pub serial: u32,
    pub revision: u32,
    state: AtomicU8,
}

impl SlaveHandler {
    pub fn new(
        station_address: u16,
        ring_position: u16,
        product_code: u32,
        serial: u32,
        revision: u32,
    ) -> Self {
        Self {
            station_address,
            ring_position,
            product_code,
            serial,
            revision,
            state: AtomicU8::new(BusState::Init as u8),
        }
    }

    pub fn state(&self) -> BusState {
        BusState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: BusState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn board_revision(&self) -> BoardRevision {
        BoardRevision::from_revision(self.revision)
    }

    /// Hardware id used to key saved model state: product code followed by
    /// the zero padded serial number
    pub fn hardware_id(&self) -> String {
        format!("{}{:05}", self.product_code, self.serial)
    }
}

/// Firmware and PCB revision packed into the EtherCAT revision number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRevision {
    pub fw_major: u8,
    pub fw_minor: u8,
    pub board_major: u8,
    pub board_minor: u8,
}

impl BoardRevision {
    pub fn from_revision(revision: u32) -> Self {
        Self {
            fw_major: ((revision >> 8) & 0xff) as u8,
            fw_minor: (revision & 0xff) as u8,
            board_major: (((revision >> 24) & 0xff) as u8).wrapping_sub(1),
            board_minor: ((revision >> 16) & 0xff) as u8,
        }
    }

    /// PCB revision letter, 'A' for board major 0
    pub fn pcb_letter(&self) -> char {
        char::from(b'A'.wrapping_add(self.board_major))
    }
}

/// Configuration trait that must be implemented by all driver configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_fields_are_unpacked() {
        // PCB C.01, firmware 1.07
        let rev = BoardRevision::from_revision(0x0301_0107);
        assert_eq!(rev.fw_major, 1);
        assert_eq!(rev.fw_minor, 7);
        assert_eq!(rev.board_major, 2);
        assert_eq!(rev.board_minor, 1);
        assert_eq!(rev.pcb_letter(), 'C');
    }

    #[test]
    fn slave_state_is_shared() {
        let slave = SlaveHandler::new(0x1001, 1, WG06_PRODUCT_CODE, 42, 0);
        assert_eq!(slave.state(), BusState::Init);
        assert!(!slave.state().allows_mailbox());
        slave.set_state(BusState::SafeOp);
        assert!(slave.state().allows_mailbox());
        assert_eq!(slave.hardware_id(), "680500600042");
    }
}
