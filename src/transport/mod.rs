//! Mailbox access to the WG0X local bus.
//!
//! The board's local-bus registers, application RAM and SPI EEPROM buffer are
//! only reachable through the mailbox sub-protocol layered on top of
//! addressed bus telegrams. [`MailboxTransport`] is the contract the upper
//! layers program against; [`mailbox::Mailbox`] implements it.

pub mod mailbox;


use crate::error::{DriverError, Result};
use crate::physical::EthercatCom;
use crate::types::Config;

/// Reliable read/write of local-bus memory
pub trait MailboxTransport: Send + Sync {
    /// Reads `length` bytes starting at local bus `address`
    fn read_mailbox(
        &self,
        com: &mut dyn EthercatCom,
        address: u16,
        length: usize,
    ) -> Result<Vec<u8>>;

    /// Writes `data` to local bus `address` and waits for the board to take it
    fn write_mailbox(&self, com: &mut dyn EthercatCom, address: u16, data: &[u8]) -> Result<()>;
}

/// Mailbox retry and timing limits
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// Longest wait for a sync manager state change or a repeat ack
    pub timeout_ms: u32,
    /// Pause between two polls of a sync manager
    pub poll_interval_us: u64,
    /// Attempts to get the mailbox clearing frame through
    pub clear_attempts: usize,
    /// Read attempts, each of them allowed `max_dropped` lost frames
    pub read_tries: usize,
    pub max_dropped: usize,
    /// Attempts to get a mailbox write through
    pub write_attempts: usize,
    /// Bytes saved before a transfer is split into data plus last-byte telegrams
    pub telegram_overhead: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            poll_interval_us: 100,
            clear_attempts: 15,
            read_tries: 10,
            max_dropped: 10,
            write_attempts: 10,
            telegram_overhead: 50,
        }
    }
}

impl Config for MailboxConfig {
    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(DriverError::InvalidParameter(
                "mailbox timeout must be non-zero".into(),
            ));
        }
        if self.clear_attempts == 0
            || self.read_tries == 0
            || self.max_dropped == 0
            || self.write_attempts == 0
        {
            return Err(DriverError::InvalidParameter(
                "mailbox retry counts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
