use thiserror::Error;

use crate::types::BusState;

#[derive(Error, Debug)]
pub enum DriverError {
    // Bus / transport faults
    #[error("cannot use mailbox in bus state {0:?}")]
    InvalidBusState(BusState),
    #[error("too much packet loss: {0}")]
    PacketLoss(String),
    #[error("working counter error: {0}")]
    WorkingCounter(String),
    #[error("more than one device ({0}) responded to an addressed request")]
    MultipleResponders(u16),
    #[error("checksum error reading mailbox data")]
    ChecksumMismatch,
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("could not acquire {0} lock")]
    LockFailed(&'static str),
    #[error("mailbox repeat request failed: {0}")]
    RepeatRequest(String),

    // EEPROM faults
    #[error("SPI EEPROM error: {0}")]
    SpiEeprom(String),
    #[error("EEPROM error: {0}")]
    Eeprom(String),

    // Configuration faults
    #[error("CRC mismatch in {0}")]
    CrcMismatch(&'static str),
    #[error("unsupported {what} version {major}.{minor}")]
    UnsupportedVersion {
        what: &'static str,
        major: u16,
        minor: u16,
    },
    #[error("unsupported firmware revision {major}.{minor:02}")]
    UnsupportedFirmware { major: u8, minor: u8 },
    #[error("device #{0:02} is not programmed")]
    NotProgrammed(u16),
    #[error("{0} is already registered")]
    DuplicateName(String),

    // Generic errors
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("device not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, DriverError>;
