// Layered like the bus it drives
pub mod application; // Board records, EEPROM, cyclic state machine, device driver
pub mod data_link; // Mailbox frames, sync managers, process data records
pub mod physical; // EtherCAT telegram exchange
pub mod transport; // Mailbox protocol over the sync managers

// Re-exports for convenience
pub use application::device::{Wg0x, Wg0xCollector, Wg0xConfig, Wg0xMonitor};
pub use application::eeprom::EepromProgrammer;
pub use diagnostics::DeviceDiagnostics;
pub use physical::EthercatCom;
pub use transport::mailbox::Mailbox;

// Shared services
pub mod checksum;
pub mod diagnostics;
pub mod hardware_interface;
pub mod model;

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_valid() {
        assert!(!VERSION.is_empty());
    }
}
