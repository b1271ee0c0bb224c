//! Physical access to the EtherCAT ring.
//!
//! The driver never builds raw Ethernet frames. It hands the bus layer a list
//! of addressed [`Telegram`]s and reads back the data and working counter of
//! each one. The working counter tells how many devices acted on a telegram:
//!
//! - `0`: nobody processed it (refused mailbox access, or frame lost)
//! - `1`: the addressed device processed it
//! - `>1`: more than one device answered a single address, the ring is broken
//!
//! Platform code implements [`EthercatCom`]; [`mock::MockSlave`] is a
//! simulated WG0X board for tests.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use crate::error::{DriverError, Result};
use crate::types::AddrMode;

/// Number of transmit attempts made by [`EthercatCom::txandrx`]
pub const TXANDRX_ATTEMPTS: usize = 5;

/// Telegram command type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Configured address physical read
    Nprd,
    /// Configured address physical write
    Npwr,
    /// Auto-increment (positional) physical read
    Aprd,
    /// Auto-increment (positional) physical write
    Apwr,
}

impl Command {
    pub fn is_read(self) -> bool {
        matches!(self, Command::Nprd | Command::Aprd)
    }
}

/// Single addressed read or write inside a bus frame
#[derive(Debug, Clone)]
pub struct Telegram {
    pub command: Command,
    /// Station address or ring position, depending on `command`
    pub adp: u16,
    /// Physical memory offset inside the slave
    pub ado: u16,
    pub data: Vec<u8>,
    pub wkc: u16,
}

impl Telegram {
    pub fn read(mode: AddrMode, adp: u16, ado: u16, length: usize) -> Self {
        Self {
            command: match mode {
                AddrMode::Fixed => Command::Nprd,
                AddrMode::Positional => Command::Aprd,
            },
            adp,
            ado,
            data: vec![0; length],
            wkc: 0,
        }
    }

    pub fn write(mode: AddrMode, adp: u16, ado: u16, data: &[u8]) -> Self {
        Self {
            command: match mode {
                AddrMode::Fixed => Command::Npwr,
                AddrMode::Positional => Command::Apwr,
            },
            adp,
            ado,
            data: data.to_vec(),
            wkc: 0,
        }
    }

    /// Prepares the telegram to be sent again after its frame was lost
    pub fn reset_wkc(&mut self) {
        self.wkc = 0;
    }
}

/// Bus access that must be implemented by platform-specific code
pub trait EthercatCom: Send {
    /// Sends all telegrams in one frame and waits for it to return.
    ///
    /// Returns false when the frame was lost. Data and working counters are
    /// only meaningful after a successful return.
    fn txandrx_once(&mut self, telegrams: &mut [Telegram]) -> bool;

    /// Like [`EthercatCom::txandrx_once`], retrying lost frames a few times
    fn txandrx(&mut self, telegrams: &mut [Telegram]) -> bool {
        for _ in 0..TXANDRX_ATTEMPTS {
            if self.txandrx_once(telegrams) {
                return true;
            }
            telegrams.iter_mut().for_each(Telegram::reset_wkc);
        }
        false
    }
}

/// Reads `length` bytes of slave memory at `address`
pub fn read_data(
    com: &mut dyn EthercatCom,
    adp: u16,
    address: u16,
    length: usize,
    mode: AddrMode,
) -> Result<Vec<u8>> {
    let mut telegrams = [Telegram::read(mode, adp, address, length)];
    if !com.txandrx(&mut telegrams) {
        return Err(DriverError::PacketLoss(format!(
            "read of 0x{:04X} not answered",
            address
        )));
    }
    let [telegram] = telegrams;
    match telegram.wkc {
        1 => Ok(telegram.data),
        0 => Err(DriverError::WorkingCounter(format!(
            "read of 0x{:04X} refused",
            address
        ))),
        n => Err(DriverError::MultipleResponders(n)),
    }
}

/// Writes `data` into slave memory at `address`
pub fn write_data(
    com: &mut dyn EthercatCom,
    adp: u16,
    address: u16,
    data: &[u8],
    mode: AddrMode,
) -> Result<()> {
    let mut telegrams = [Telegram::write(mode, adp, address, data)];
    if !com.txandrx(&mut telegrams) {
        return Err(DriverError::PacketLoss(format!(
            "write of 0x{:04X} not answered",
            address
        )));
    }
    match telegrams[0].wkc {
        1 => Ok(()),
        0 => Err(DriverError::WorkingCounter(format!(
            "write of 0x{:04X} refused",
            address
        ))),
        n => Err(DriverError::MultipleResponders(n)),
    }
}
