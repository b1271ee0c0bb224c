//! Counters shared between the real-time cycle and the mailbox thread.
//!
//! Every shared region is a [`Guarded`] value. Writers that must not lose an
//! update use the blocking [`Guarded::lock`]; the real-time path only ever
//! uses [`Guarded::try_lock`] and retries on a later cycle when the lock is
//! contended. Readers copy the whole value out with [`Guarded::snapshot`] and
//! format after releasing the lock. Two guarded regions are never held at
//! the same time.

use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::error;

use crate::application::cyclic::CycleSnapshot;
use crate::application::records::{DiagnosticsInfo, SafetyDisableStatus};
use crate::error::{DriverError, Result};

/// Guarded values count their own lock failures
pub trait LockAccounting {
    fn record_lock_error(&mut self);
}

/// Outcome of a non-blocking lock attempt
pub enum Availability<'a, T> {
    Acquired(MutexGuard<'a, T>),
    /// Held by another thread, try again later
    Busy,
    /// The lock is unusable; counted as a lock error
    Failed,
}

/// A value behind a mutex with blocking and non-blocking access
#[derive(Debug)]
pub struct Guarded<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T: LockAccounting + Clone> Guarded<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    /// Blocking acquire.
    ///
    /// A poisoned lock still gets its error counter incremented before the
    /// failure is returned, then the poison is cleared for the next caller.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        match self.inner.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                self.recover(poisoned.into_inner());
                Err(DriverError::LockFailed(self.name))
            }
        }
    }

    pub fn try_lock(&self) -> Availability<'_, T> {
        match self.inner.try_lock() {
            Ok(guard) => Availability::Acquired(guard),
            Err(TryLockError::WouldBlock) => Availability::Busy,
            Err(TryLockError::Poisoned(poisoned)) => {
                self.recover(poisoned.into_inner());
                Availability::Failed
            }
        }
    }

    /// Copy of the value, taken under the blocking lock
    pub fn snapshot(&self) -> Result<T> {
        self.lock().map(|guard| guard.clone())
    }

    fn recover(&self, mut guard: MutexGuard<'_, T>) {
        error!(lock = self.name, "lock poisoned");
        guard.record_lock_error();
        drop(guard);
        self.inner.clear_poison();
    }
}

/// Error counters of the mailbox transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxDiagnostics {
    pub write_errors: u32,
    pub read_errors: u32,
    pub lock_errors: u32,
    pub retries: u32,
    pub retry_errors: u32,
}

/// Safety counters collected over the mailbox, plus the calibration offset
/// handed from the real-time thread to the mailbox thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wg0xDiagnostics {
    /// Nothing collected yet
    pub first: bool,
    /// Last collection succeeded
    pub valid: bool,
    pub safety_disable_status: SafetyDisableStatus,
    pub diagnostics_info: DiagnosticsInfo,

    pub safety_disable_total: u32,
    pub undervoltage_total: u32,
    pub over_current_total: u32,
    pub board_over_temp_total: u32,
    pub bridge_over_temp_total: u32,
    pub operate_disable_total: u32,
    pub watchdog_disable_total: u32,

    pub lock_errors: u32,
    pub checksum_errors: u32,

    /// Offset most recently set by the controller
    pub zero_offset: f64,
    /// Offset most recently written to application RAM
    pub cached_zero_offset: f64,
}

impl Default for Wg0xDiagnostics {
    fn default() -> Self {
        Self {
            first: true,
            valid: false,
            safety_disable_status: SafetyDisableStatus::default(),
            diagnostics_info: DiagnosticsInfo::default(),
            safety_disable_total: 0,
            undervoltage_total: 0,
            over_current_total: 0,
            board_over_temp_total: 0,
            bridge_over_temp_total: 0,
            operate_disable_total: 0,
            watchdog_disable_total: 0,
            lock_errors: 0,
            checksum_errors: 0,
            zero_offset: 0.0,
            cached_zero_offset: 0.0,
        }
    }
}

/// Increase of an 8-bit wrapping hardware counter between two samples
pub fn counter_delta(new: u8, old: u8) -> u32 {
    u32::from(new.wrapping_sub(old)) & 0xFF
}

impl Wg0xDiagnostics {
    /// Folds a fresh sample of the board counters into the totals
    pub fn update(&mut self, status: SafetyDisableStatus, info: DiagnosticsInfo) {
        self.first = false;
        self.safety_disable_total += counter_delta(
            status.safety_disable_count,
            self.safety_disable_status.safety_disable_count,
        );

        let new = &info.safety_disable_counters;
        let old = &self.diagnostics_info.safety_disable_counters;
        self.undervoltage_total += counter_delta(new.undervoltage_count, old.undervoltage_count);
        self.over_current_total += counter_delta(new.over_current_count, old.over_current_count);
        self.board_over_temp_total +=
            counter_delta(new.board_over_temp_count, old.board_over_temp_count);
        self.bridge_over_temp_total +=
            counter_delta(new.bridge_over_temp_count, old.bridge_over_temp_count);
        self.operate_disable_total +=
            counter_delta(new.operate_disable_count, old.operate_disable_count);
        self.watchdog_disable_total +=
            counter_delta(new.watchdog_disable_count, old.watchdog_disable_count);

        self.safety_disable_status = status;
        self.diagnostics_info = info;
    }
}

impl LockAccounting for Wg0xDiagnostics {
    fn record_lock_error(&mut self) {
        self.lock_errors += 1;
    }
}

pub type DiagnosticsStore = Guarded<Wg0xDiagnostics>;

/// Severity of a published device report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Ok,
    Warn,
    Error,
}

/// Report handed to the reporting layer
#[derive(Debug, Clone)]
pub struct DeviceDiagnostics {
    pub name: String,
    pub hardware_id: String,
    pub level: Level,
    pub summary: String,
    pub mailbox: MailboxDiagnostics,
    pub collected: Wg0xDiagnostics,
    pub cycle: CycleSnapshot,
    /// Current into the whole board, in amps
    pub supply_current: Option<f64>,
    /// Current into the H-bridge only, on boards that measure it there
    pub bridge_supply_current: Option<f64>,
    pub configured_offset_a: f64,
    pub configured_offset_b: f64,
}

impl DeviceDiagnostics {
    pub(crate) fn new(name: String, hardware_id: String) -> Self {
        Self {
            name,
            hardware_id,
            level: Level::Ok,
            summary: "OK".to_string(),
            mailbox: MailboxDiagnostics::default(),
            collected: Wg0xDiagnostics::default(),
            cycle: CycleSnapshot::default(),
            supply_current: None,
            bridge_supply_current: None,
            configured_offset_a: 0.0,
            configured_offset_b: 0.0,
        }
    }

    /// Raises the level, keeping the message of the most severe condition
    pub(crate) fn merge_summary(&mut self, level: Level, message: impl Into<String>) {
        if level > self.level {
            self.level = level;
            self.summary = message.into();
        } else if level == self.level && level != Level::Ok {
            self.summary = format!("{}; {}", self.summary, message.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, Default)]
    struct Counted {
        value: u32,
        lock_errors: u32,
    }

    impl LockAccounting for Counted {
        fn record_lock_error(&mut self) {
            self.lock_errors += 1;
        }
    }

    #[test]
    fn wrapped_counter_delta_is_positive() {
        assert_eq!(counter_delta(4, 250), 10);
        assert_eq!(counter_delta(10, 10), 0);
        assert_eq!(counter_delta(0, 255), 1);
    }

    #[test]
    fn counter_delta_recovers_every_step() {
        for old in [0u8, 1, 127, 200, 250, 255] {
            for k in 0..=255u8 {
                assert_eq!(counter_delta(old.wrapping_add(k), old), u32::from(k));
            }
        }
    }

    #[test]
    fn update_accumulates_wrapped_counters() {
        let mut dg = Wg0xDiagnostics::default();
        let mut info = DiagnosticsInfo::default();
        info.safety_disable_counters.over_current_count = 250;
        let status = SafetyDisableStatus {
            safety_disable_count: 250,
            ..Default::default()
        };
        dg.update(status, info);
        assert!(!dg.first);
        assert_eq!(dg.over_current_total, 250);

        info.safety_disable_counters.over_current_count = 4;
        let status = SafetyDisableStatus {
            safety_disable_count: 4,
            ..Default::default()
        };
        dg.update(status, info);
        assert_eq!(dg.over_current_total, 260);
        assert_eq!(dg.safety_disable_total, 260);
        assert_eq!(dg.undervoltage_total, 0);
    }

    #[test]
    fn try_lock_reports_busy_while_held() {
        let guarded = Guarded::new("test", Counted::default());
        let guard = guarded.lock().unwrap();
        assert!(matches!(guarded.try_lock(), Availability::Busy));
        drop(guard);
        match guarded.try_lock() {
            Availability::Acquired(mut g) => g.value = 7,
            _ => panic!("lock should be free"),
        }
        assert_eq!(guarded.snapshot().unwrap().value, 7);
    }

    #[test]
    fn poisoned_lock_is_counted_and_cleared() {
        let guarded = Arc::new(Guarded::new("test", Counted::default()));
        let g2 = Arc::clone(&guarded);
        let _ = thread::spawn(move || {
            let _guard = g2.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(
            guarded.lock(),
            Err(DriverError::LockFailed("test"))
        ));
        let snap = guarded.snapshot().unwrap();
        assert_eq!(snap.lock_errors, 1);
    }

    #[test]
    fn summary_keeps_most_severe_condition() {
        let mut report = DeviceDiagnostics::new("fl_caster".into(), "680500600001".into());
        report.merge_summary(Level::Warn, "timestamp jump");
        report.merge_summary(Level::Error, "safety lockout");
        report.merge_summary(Level::Warn, "not collected");
        assert_eq!(report.level, Level::Error);
        assert_eq!(report.summary, "safety lockout");
    }
}
