//! Per-cycle interpretation of the status frame.
//!
//! Runs on the real-time thread once per bus cycle. Nothing in here blocks
//! or allocates; state shared with the reporting thread lives in
//! [`CycleFlags`] atomics.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::data_link::process_data::{Mode, Wg0xStatus};
use crate::error::{DriverError, Result};
use crate::types::Config;

/// Signed difference of two wrapping 32-bit microsecond timestamps
pub fn timestamp_diff(new: u32, old: u32) -> i32 {
    new.wrapping_sub(old) as i32
}

/// Signed difference of two wrapping 32-bit encoder counts
pub fn position_diff(new: i32, old: i32) -> i32 {
    new.wrapping_sub(old)
}

/// True when time went backwards or moved forward by more than `limit` µs
pub fn timestamp_jump(new: u32, old: u32, limit: u32) -> bool {
    new.wrapping_sub(old) > limit
}

/// Encoder velocity in ticks per second; 0 when no time has passed
pub fn encoder_velocity(new_position: i32, new_timestamp: u32, old_position: i32, old_timestamp: u32) -> f64 {
    let dt = f64::from(timestamp_diff(new_timestamp, old_timestamp)) * 1e-6;
    if dt == 0.0 {
        return 0.0;
    }
    f64::from(position_diff(new_position, old_position)) / dt
}

#[derive(Debug, Clone)]
pub struct CyclicConfig {
    /// More consecutive repeated frames than this fail the cycle
    pub max_consecutive_drops: u32,
    pub timestamp_jump_limit_us: u32,
}

impl Default for CyclicConfig {
    fn default() -> Self {
        Self {
            max_consecutive_drops: 10,
            timestamp_jump_limit_us: 10_000_000,
        }
    }
}

impl Config for CyclicConfig {
    fn validate(&self) -> Result<()> {
        if self.timestamp_jump_limit_us == 0 {
            return Err(DriverError::InvalidParameter(
                "timestamp jump limit must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Why a cycle failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CycleFault {
    #[error("too many dropped packets")]
    TooManyDroppedPackets,
    #[error("status checksum error")]
    StatusChecksum,
    #[error("safety lockout")]
    SafetyLockout,
    #[error("FPGA internal reset")]
    FpgaInternalReset,
    #[error("motor model")]
    MotorModel,
    #[error("motor overheated")]
    MotorOverheated,
}

/// Cyclic state visible to the reporting thread
#[derive(Debug, Default)]
pub struct CycleFlags {
    drops: AtomicU32,
    consecutive_drops: AtomicU32,
    max_consecutive_drops: AtomicU32,
    drop_storms: AtomicU32,
    in_lockout: AtomicBool,
    too_many_dropped_packets: AtomicBool,
    status_checksum_error: AtomicBool,
    timestamp_jump_detected: AtomicBool,
    fpga_internal_reset_detected: AtomicBool,
}

/// Point-in-time copy of [`CycleFlags`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSnapshot {
    pub drops: u32,
    pub consecutive_drops: u32,
    pub max_consecutive_drops: u32,
    /// Streaks of repeated frames that crossed the drop limit
    pub drop_storms: u32,
    pub in_lockout: bool,
    pub too_many_dropped_packets: bool,
    pub status_checksum_error: bool,
    pub timestamp_jump_detected: bool,
    pub fpga_internal_reset_detected: bool,
}

impl CycleFlags {
    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            drops: self.drops.load(Ordering::Relaxed),
            consecutive_drops: self.consecutive_drops.load(Ordering::Relaxed),
            max_consecutive_drops: self.max_consecutive_drops.load(Ordering::Relaxed),
            drop_storms: self.drop_storms.load(Ordering::Relaxed),
            in_lockout: self.in_lockout.load(Ordering::Relaxed),
            too_many_dropped_packets: self.too_many_dropped_packets.load(Ordering::Relaxed),
            status_checksum_error: self.status_checksum_error.load(Ordering::Relaxed),
            timestamp_jump_detected: self.timestamp_jump_detected.load(Ordering::Relaxed),
            fpga_internal_reset_detected: self.fpga_internal_reset_detected.load(Ordering::Acquire),
        }
    }

    pub fn fpga_internal_reset_detected(&self) -> bool {
        self.fpga_internal_reset_detected.load(Ordering::Acquire)
    }

    /// Set by the reporting path once it has correlated a timestamp jump
    /// with an operational safety disable
    pub(crate) fn set_fpga_internal_reset_detected(&self) {
        self.fpga_internal_reset_detected.store(true, Ordering::Release);
    }

    fn clear_sticky(&self) {
        self.too_many_dropped_packets.store(false, Ordering::Relaxed);
        self.status_checksum_error.store(false, Ordering::Relaxed);
        self.timestamp_jump_detected.store(false, Ordering::Relaxed);
        self.fpga_internal_reset_detected.store(false, Ordering::Release);
    }
}

/// Cross-cycle state of one board
#[derive(Debug)]
pub struct CyclicStateMachine {
    name: String,
    config: CyclicConfig,
    flags: Arc<CycleFlags>,
    seeded: bool,
    last_timestamp: u32,
    last_last_timestamp: u32,
    consecutive_drops: u32,
    sample_time: f64,
    resetting: bool,
    has_error: bool,
    halted: bool,
    lockout_entered: bool,
    max_board_temperature: u16,
    max_bridge_temperature: u16,
}

impl CyclicStateMachine {
    pub fn new(name: impl Into<String>, config: CyclicConfig) -> Self {
        Self {
            name: name.into(),
            config,
            flags: Arc::new(CycleFlags::default()),
            seeded: false,
            last_timestamp: 0,
            last_last_timestamp: 0,
            consecutive_drops: 0,
            sample_time: 0.0,
            resetting: false,
            has_error: false,
            halted: true,
            lockout_entered: false,
            max_board_temperature: 0,
            max_bridge_temperature: 0,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn flags(&self) -> Arc<CycleFlags> {
        Arc::clone(&self.flags)
    }

    pub fn set_resetting(&mut self, resetting: bool) {
        self.resetting = resetting;
    }

    pub fn resetting(&self) -> bool {
        self.resetting
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Actuator output is off: a sticky error or a board in mode OFF
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// The last cycle entered a safety lockout that was not yet reported
    pub fn lockout_entered(&self) -> bool {
        self.lockout_entered
    }

    pub fn max_board_temperature(&self) -> u16 {
        self.max_board_temperature
    }

    pub fn max_bridge_temperature(&self) -> u16 {
        self.max_bridge_temperature
    }

    /// Clears sticky errors. Counters keep their values.
    pub fn clear_error_flags(&mut self) {
        self.has_error = false;
        self.flags.clear_sticky();
    }

    /// Adds the time between two frames to the sample clock, in seconds
    pub fn accumulate_time(&mut self, this: u32, prev: u32) -> f64 {
        if self.seeded {
            self.sample_time += f64::from(timestamp_diff(this, prev)) * 1e-6;
        }
        self.sample_time
    }

    /// Seconds between two frames; 0 before the first frame was seen
    pub fn cycle_duration(&self, this: u32, prev: u32) -> f64 {
        if self.seeded {
            f64::from(timestamp_diff(this, prev)) * 1e-6
        } else {
            0.0
        }
    }

    pub fn record_checksum_error(&mut self) -> CycleFault {
        if !self.flags.status_checksum_error.swap(true, Ordering::Relaxed) {
            warn!(device = %self.name, "status checksum error");
        }
        self.has_error = true;
        self.halted = true;
        self.lockout_entered = false;
        CycleFault::StatusChecksum
    }

    fn track_drops(&mut self, timestamp: u32) {
        if timestamp == self.last_timestamp || timestamp == self.last_last_timestamp {
            self.consecutive_drops += 1;
            self.flags.drops.fetch_add(1, Ordering::Relaxed);
            self.flags
                .max_consecutive_drops
                .fetch_max(self.consecutive_drops, Ordering::Relaxed);
        } else {
            self.consecutive_drops = 0;
        }
        self.flags
            .consecutive_drops
            .store(self.consecutive_drops, Ordering::Relaxed);

        if timestamp_jump(timestamp, self.last_timestamp, self.config.timestamp_jump_limit_us)
            && !self.flags.timestamp_jump_detected.swap(true, Ordering::Relaxed)
        {
            warn!(
                device = %self.name,
                timestamp,
                last = self.last_timestamp,
                "timestamp jump"
            );
        }
    }

    /// Runs the guard sequence on a fresh status frame.
    ///
    /// `overheated` fails the cycle without stopping the other checks.
    /// `model_ok` is only consulted when every earlier guard passed.
    pub fn verify<F>(&mut self, status: &Wg0xStatus, overheated: bool, model_ok: F) -> std::result::Result<(), CycleFault>
    where
        F: FnOnce() -> bool,
    {
        let mut fault = overheated.then_some(CycleFault::MotorOverheated);

        self.max_board_temperature = self.max_board_temperature.max(status.board_temperature);
        self.max_bridge_temperature = self.max_bridge_temperature.max(status.bridge_temperature);

        if self.seeded {
            self.track_drops(status.timestamp);
        }
        self.seeded = true;
        self.last_last_timestamp = self.last_timestamp;
        self.last_timestamp = status.timestamp;

        let guard = self.check_guards(status, model_ok);
        if guard.is_some() {
            fault = guard;
        }

        let in_lockout = self.flags.in_lockout.load(Ordering::Relaxed);
        self.lockout_entered = in_lockout && !self.resetting && !self.has_error;
        if self.lockout_entered {
            warn!(device = %self.name, "safety lockout");
        }

        self.has_error |= fault.is_some();
        self.halted = self.has_error || status.mode == Mode::OFF;
        match fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn check_guards<F>(&mut self, status: &Wg0xStatus, model_ok: F) -> Option<CycleFault>
    where
        F: FnOnce() -> bool,
    {
        let limit = self.config.max_consecutive_drops;
        if self.consecutive_drops > limit {
            self.flags.too_many_dropped_packets.store(true, Ordering::Relaxed);
            if self.consecutive_drops == limit + 1 {
                self.flags.drop_storms.fetch_add(1, Ordering::Relaxed);
                warn!(device = %self.name, drops = self.consecutive_drops, "too many dropped packets");
            }
            return Some(CycleFault::TooManyDroppedPackets);
        }

        let in_lockout = status.mode.contains(Mode::SAFETY_LOCKOUT);
        let was_in_lockout = self.flags.in_lockout.swap(in_lockout, Ordering::Relaxed);
        if was_in_lockout && !in_lockout {
            info!(device = %self.name, "safety lockout cleared");
        }
        if in_lockout && !self.resetting {
            return Some(CycleFault::SafetyLockout);
        }

        if self.flags.fpga_internal_reset_detected() {
            return Some(CycleFault::FpgaInternalReset);
        }

        if !model_ok() {
            return Some(CycleFault::MotorModel);
        }
        None
    }
}
