//! Board-level services built on the mailbox transport.
//!
//! This module provides everything above raw local-bus access:
//! - Records stored on the board (actuator info, heating model parameters,
//!   safety counters, the calibration offset in application RAM)
//! - SPI EEPROM paging through the FPGA page buffer
//! - The per-cycle state machine that tracks dropped packets, timestamp
//!   jumps and safety lockouts
//! - The [`device::Wg0x`] driver tying them together
//!
//! ## Threads
//!
//! A board is driven from three places. The real-time loop owns [`Wg0x`]
//! and only calls [`Wg0x::pack_command`] and [`Wg0x::unpack_state`], which
//! never block. A mailbox thread owns a [`Wg0xCollector`] and polls the
//! board counters. A reporting thread owns a [`Wg0xMonitor`] and publishes
//! [`crate::diagnostics::DeviceDiagnostics`].
//!
//! # Examples
//!
//! ```text
//! # Bring up one board
//! let mut dev = Wg0x::new(slave, Wg0xConfig::default(), Some(heating))?;
//! dev.initialize(&mut com, Some(&mut hw), false)?;
//!
//! # Real-time loop
//! loop {
//!     let command = dev.pack_command(halt, reset);
//!     # ... exchange process data ...
//!     if let Err(fault) = dev.unpack_state(&status, &prev_status) {
//!         # board is halted until reset
//!     }
//! }
//!
//! # Mailbox thread, about once a second
//! collector.collect_diagnostics(&mut com)?;
//!
//! # Reporting thread
//! let report = monitor.publish();
//! ```

pub mod cyclic;
pub mod device;
pub mod eeprom;
pub mod records;

pub use cyclic::{CycleFault, CycleSnapshot, CyclicConfig, CyclicStateMachine};
pub use device::{AppRamStatus, CalibrationStatus, Wg0x, Wg0xCollector, Wg0xConfig, Wg0xMonitor};
pub use eeprom::{EepromConfig, EepromProgrammer};
pub use records::{ActuatorInfo, MotorHeatingModelEepromConfig, MotorHeatingModelParameters};
