//! Mailbox transport of the WG0X boards.
//!
//! A local-bus read takes two mailbox exchanges: a header-only command is
//! written into the command mailbox, then the result (payload plus checksum)
//! is read out of the status mailbox once the board has posted it. Writes
//! carry their payload in the command and complete when the board empties
//! the command mailbox.
//!
//! Telegrams get lost. A lost write is simply sent again. A lost status
//! mailbox read is not: the board considers the mailbox consumed as soon as
//! it has been read, so the transport asks it to re-post the last result
//! through the sync manager repeat request handshake instead of re-issuing
//! the local-bus read.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::{MailboxConfig, MailboxTransport};
use crate::checksum::verify_checksum;
use crate::data_link::mailbox_frame::{
    next_sequence, MailboxCommand, MBX_COMMAND_PHY_ADDR, MBX_COMMAND_SIZE,
    MBX_COMMAND_SYNCMAN_NUM, MBX_STATUS_PHY_ADDR, MBX_STATUS_SIZE, MBX_STATUS_SYNCMAN_NUM,
};
use crate::data_link::syncman::{SyncMan, SyncManActivate, SyncManStatus};
use crate::diagnostics::{Guarded, LockAccounting, MailboxDiagnostics};
use crate::error::{DriverError, Result};
use crate::physical::{read_data, EthercatCom, Telegram};
use crate::types::{AddrMode, SlaveHandler};

/// Everything serialized by the mailbox lock
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MailboxState {
    sequence: u8,
    diagnostics: MailboxDiagnostics,
}

impl LockAccounting for MailboxState {
    fn record_lock_error(&mut self) {
        self.diagnostics.lock_errors += 1;
    }
}

/// Successful sync manager reads made while waiting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub good_results: u32,
}

fn last_byte(base: u16, size: usize) -> u16 {
    base + size as u16 - 1
}

/// Sends one frame up to `attempts` times; returns whether it came back and
/// how many times it was sent.
fn transmit(com: &mut dyn EthercatCom, telegrams: &mut [Telegram], attempts: usize) -> (bool, usize) {
    let mut sends = 0;
    for _ in 0..attempts {
        sends += 1;
        if com.txandrx_once(telegrams) {
            return (true, sends);
        }
        telegrams.iter_mut().for_each(Telegram::reset_wkc);
    }
    (false, sends)
}

/// Mailbox of one board
pub struct Mailbox {
    config: MailboxConfig,
    slave: Arc<SlaveHandler>,
    state: Guarded<MailboxState>,
}

impl Mailbox {
    pub fn new(slave: Arc<SlaveHandler>, config: MailboxConfig) -> Self {
        Self {
            config,
            slave,
            state: Guarded::new("mailbox", MailboxState::default()),
        }
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    /// Copy of the error counters, taken under the mailbox lock
    pub fn diagnostics(&self) -> Result<MailboxDiagnostics> {
        self.state.snapshot().map(|state| state.diagnostics)
    }

    fn station(&self) -> u16 {
        self.slave.station_address
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.timeout_ms))
    }

    fn pause(&self) {
        thread::sleep(Duration::from_micros(self.config.poll_interval_us));
    }

    fn verify_device_state(&self) -> Result<()> {
        let state = self.slave.state();
        if !state.allows_mailbox() {
            error!(
                position = self.slave.ring_position,
                ?state,
                "cannot use mailbox in current device state"
            );
            return Err(DriverError::InvalidBusState(state));
        }
        Ok(())
    }

    /// Logs the state of both mailbox sync managers
    fn diagnose_mailbox_error(&self, com: &mut dyn EthercatCom) {
        for num in [MBX_COMMAND_SYNCMAN_NUM, MBX_STATUS_SYNCMAN_NUM] {
            match SyncMan::read(com, &self.slave, num) {
                Ok(sm) => debug!(position = self.slave.ring_position, num, ?sm, "mailbox syncman"),
                Err(e) => debug!(position = self.slave.ring_position, num, %e, "syncman unreadable"),
            }
        }
    }

    /// Flushes a stale result out of the status mailbox by reading its first
    /// and last byte. The board never invalidates an old result by itself.
    pub(crate) fn clear_read_mailbox(&self, com: &mut dyn EthercatCom) -> Result<()> {
        self.verify_device_state()?;
        let station = self.station();
        let mut telegrams = [
            Telegram::read(AddrMode::Fixed, station, MBX_STATUS_PHY_ADDR, 1),
            Telegram::read(
                AddrMode::Fixed,
                station,
                last_byte(MBX_STATUS_PHY_ADDR, MBX_STATUS_SIZE),
                1,
            ),
        ];

        let (success, _) = transmit(com, &mut telegrams, self.config.clear_attempts);
        if !success {
            error!(position = self.slave.ring_position, "clearing read mailbox: too much packet loss");
            self.pause();
            return Err(DriverError::PacketLoss("clearing read mailbox".into()));
        }

        let (start, end) = (telegrams[0].wkc, telegrams[1].wkc);
        if start != end {
            return Err(DriverError::WorkingCounter(format!(
                "read mailbox working counters are inconsistent, {}, {}",
                start, end
            )));
        }
        match start {
            0 => Ok(()),
            1 => {
                warn!(position = self.slave.ring_position, "read mailbox contained garbage data");
                Ok(())
            }
            n => Err(DriverError::MultipleResponders(n)),
        }
    }

    fn wait_for_mailbox(
        &self,
        com: &mut dyn EthercatCom,
        num: u8,
        want_full: bool,
    ) -> Result<PollStats> {
        let mut stats = PollStats::default();
        let start = Instant::now();
        loop {
            let status = read_data(
                com,
                self.station(),
                SyncMan::status_address(num),
                1,
                AddrMode::Fixed,
            );
            if let Ok(raw) = status {
                stats.good_results += 1;
                let full = SyncManStatus::from_bits_retain(raw[0]).contains(SyncManStatus::MAILBOX_FULL);
                if full == want_full {
                    return Ok(stats);
                }
            }
            if start.elapsed() >= self.timeout() {
                break;
            }
            self.pause();
        }

        let waited = start.elapsed().as_millis();
        if stats.good_results == 0 {
            error!(position = self.slave.ring_position, "error reading sync manager from device");
            Err(DriverError::PacketLoss(format!(
                "no sync manager {} status read in {} ms",
                num, waited
            )))
        } else {
            error!(
                position = self.slave.ring_position,
                num, waited, "mailbox did not change state"
            );
            Err(DriverError::Timeout(format!(
                "mailbox {} not {} after {} ms",
                num,
                if want_full { "full" } else { "empty" },
                waited
            )))
        }
    }

    /// Waits until the board has posted a result into the status mailbox
    pub(crate) fn wait_for_read_mailbox_ready(&self, com: &mut dyn EthercatCom) -> Result<PollStats> {
        self.wait_for_mailbox(com, MBX_STATUS_SYNCMAN_NUM, true)
    }

    /// Waits until the board has consumed the command mailbox
    pub(crate) fn wait_for_write_mailbox_ready(&self, com: &mut dyn EthercatCom) -> Result<PollStats> {
        self.wait_for_mailbox(com, MBX_COMMAND_SYNCMAN_NUM, false)
    }

    /// Puts `data` into the command mailbox.
    ///
    /// Short transfers only write `data` plus the last mailbox byte, which is
    /// what makes the board see the mailbox as full.
    pub(crate) fn write_mailbox_internal(&self, com: &mut dyn EthercatCom, data: &[u8]) -> Result<()> {
        if data.len() > MBX_COMMAND_SIZE {
            return Err(DriverError::BufferOverflow);
        }
        self.verify_device_state()?;

        let station = self.station();
        let split_write = data.len() + self.config.telegram_overhead < MBX_COMMAND_SIZE;
        let mut telegrams = Vec::with_capacity(2);
        if split_write {
            telegrams.push(Telegram::write(AddrMode::Fixed, station, MBX_COMMAND_PHY_ADDR, data));
            telegrams.push(Telegram::write(
                AddrMode::Fixed,
                station,
                last_byte(MBX_COMMAND_PHY_ADDR, MBX_COMMAND_SIZE),
                &[0],
            ));
        } else {
            let mut full = vec![0u8; MBX_COMMAND_SIZE];
            full[..data.len()].copy_from_slice(data);
            telegrams.push(Telegram::write(AddrMode::Fixed, station, MBX_COMMAND_PHY_ADDR, &full));
        }

        let (success, sends) = transmit(com, &mut telegrams, self.config.write_attempts);
        if !success {
            error!(position = self.slave.ring_position, "mailbox write: too much packet loss");
            self.pause();
            return Err(DriverError::PacketLoss("mailbox write".into()));
        }

        if split_write && telegrams[0].wkc != telegrams[1].wkc {
            return Err(DriverError::WorkingCounter(
                "write mailbox working counters are inconsistent".into(),
            ));
        }

        match telegrams[0].wkc {
            1 => Ok(()),
            0 if sends <= 1 => {
                error!(position = self.slave.ring_position, "initial mailbox write refused");
                self.pause();
                Err(DriverError::WorkingCounter("initial mailbox write refused".into()))
            }
            0 => {
                // The first send reached the board and only its reply was lost
                warn!(position = self.slave.ring_position, sends, "repeated mailbox write refused");
                Ok(())
            }
            n => {
                error!(position = self.slave.ring_position, n, "multiple devices responded to mailbox write");
                Err(DriverError::MultipleResponders(n))
            }
        }
    }

    /// Reads `length` bytes out of the status mailbox
    pub(crate) fn read_mailbox_internal(
        &self,
        com: &mut dyn EthercatCom,
        diagnostics: &mut MailboxDiagnostics,
        length: usize,
    ) -> Result<Vec<u8>> {
        if length > MBX_STATUS_SIZE {
            return Err(DriverError::BufferOverflow);
        }
        self.verify_device_state()?;

        let station = self.station();
        let split_read = length + self.config.telegram_overhead < MBX_STATUS_SIZE;
        let read_length = if split_read { length } else { MBX_STATUS_SIZE };
        let mut telegrams = vec![Telegram::read(
            AddrMode::Fixed,
            station,
            MBX_STATUS_PHY_ADDR,
            read_length,
        )];
        if split_read {
            telegrams.push(Telegram::read(
                AddrMode::Fixed,
                station,
                last_byte(MBX_STATUS_PHY_ADDR, MBX_STATUS_SIZE),
                1,
            ));
        }

        let mut total_dropped = 0;
        for _ in 0..self.config.read_tries {
            let mut dropped = 0;
            while dropped < self.config.max_dropped {
                if com.txandrx_once(&mut telegrams) {
                    break;
                }
                dropped += 1;
                total_dropped += 1;
                telegrams.iter_mut().for_each(Telegram::reset_wkc);
            }
            if dropped >= self.config.max_dropped {
                error!(position = self.slave.ring_position, dropped, "too many dropped packets");
            }

            if split_read && telegrams[0].wkc != telegrams[1].wkc {
                return Err(DriverError::WorkingCounter(
                    "read mailbox working counters are inconsistent".into(),
                ));
            }

            match telegrams[0].wkc {
                0 if dropped == 0 => {
                    error!(
                        position = self.slave.ring_position,
                        total_dropped, "got wkc=0 with no dropped packets"
                    );
                    return Err(DriverError::WorkingCounter(
                        "status mailbox read refused without packet loss".into(),
                    ));
                }
                0 => {
                    // The board saw the read, the reply got lost on the way back
                    warn!(
                        position = self.slave.ring_position,
                        dropped, "asking for read repeat after dropped packets"
                    );
                    self.read_mailbox_repeat_request(com, diagnostics)?;
                }
                1 => {
                    let mut data = telegrams.swap_remove(0).data;
                    data.truncate(length);
                    return Ok(data);
                }
                n => {
                    error!(position = self.slave.ring_position, n, "invalid wkc for read");
                    self.diagnose_mailbox_error(com);
                    return Err(DriverError::MultipleResponders(n));
                }
            }
        }

        error!(
            position = self.slave.ring_position,
            tries = self.config.read_tries,
            total_dropped,
            "could not get response from device"
        );
        self.diagnose_mailbox_error(com);
        Err(DriverError::PacketLoss(format!(
            "no mailbox response after {} tries, {} dropped packets",
            self.config.read_tries, total_dropped
        )))
    }

    fn read_mailbox_repeat_request(
        &self,
        com: &mut dyn EthercatCom,
        diagnostics: &mut MailboxDiagnostics,
    ) -> Result<()> {
        let result = self.repeat_request_handshake(com);
        diagnostics.retries += 1;
        if result.is_err() {
            diagnostics.retry_errors += 1;
        }
        result
    }

    /// Toggles the repeat request bit of the status sync manager and waits
    /// for the board to acknowledge with a re-posted result.
    fn repeat_request_handshake(&self, com: &mut dyn EthercatCom) -> Result<()> {
        let num = MBX_STATUS_SYNCMAN_NUM;
        let mut sm = SyncMan::read(com, &self.slave, num)?;

        // Boards that handle repeat requests keep request and ack equal
        if sm.repeat_request() != sm.repeat_ack() {
            return Err(DriverError::RepeatRequest(
                "syncman repeat request and ack do not match".into(),
            ));
        }

        let request_before = sm.repeat_request();
        sm.activate.toggle(SyncManActivate::REPEAT_REQUEST);
        sm.write_activate(com, &self.slave, num)?;

        let start = Instant::now();
        loop {
            let sm = SyncMan::read(com, &self.slave, num)?;
            if sm.repeat_request() == sm.repeat_ack() {
                if !sm.mailbox_full() {
                    return Err(DriverError::RepeatRequest(
                        "got repeat response, but read mailbox is still empty".into(),
                    ));
                }
                return Ok(());
            }
            if sm.repeat_request() == request_before {
                return Err(DriverError::RepeatRequest(
                    "syncman repeat request was changed while waiting for response".into(),
                ));
            }
            if start.elapsed() >= self.timeout() {
                break;
            }
            self.pause();
        }

        Err(DriverError::RepeatRequest(format!(
            "not acknowledged after {} ms",
            start.elapsed().as_millis()
        )))
    }

    fn read_mailbox_locked(
        &self,
        com: &mut dyn EthercatCom,
        state: &mut MailboxState,
        address: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        self.verify_device_state()?;
        let sequence = next_sequence(state.sequence);
        let cmd = MailboxCommand::read(address, length, sequence)?;
        state.sequence = sequence;

        self.clear_read_mailbox(com).map_err(|e| {
            error!(position = self.slave.ring_position, %e, "clearing read mailbox");
            e
        })?;

        self.write_mailbox_internal(com, &cmd.encode()).map_err(|e| {
            error!(position = self.slave.ring_position, %e, "write of read command failed");
            e
        })?;

        self.wait_for_read_mailbox_ready(com)?;

        let mut result = self.read_mailbox_internal(com, &mut state.diagnostics, length + 1)?;
        if !verify_checksum(&result) {
            error!(
                position = self.slave.ring_position,
                address, length, "checksum error reading mailbox data"
            );
            return Err(DriverError::ChecksumMismatch);
        }
        result.truncate(length);
        Ok(result)
    }

    fn write_mailbox_locked(
        &self,
        com: &mut dyn EthercatCom,
        state: &mut MailboxState,
        address: u16,
        data: &[u8],
    ) -> Result<()> {
        self.verify_device_state()?;
        let sequence = next_sequence(state.sequence);
        let cmd = MailboxCommand::write(address, data, sequence)?;
        state.sequence = sequence;

        if let Err(e) = self.write_mailbox_internal(com, &cmd.encode()) {
            error!(position = self.slave.ring_position, %e, "mailbox write failed");
            self.diagnose_mailbox_error(com);
            return Err(e);
        }

        // The board gives no acknowledgement of the local-bus write itself,
        // an emptied command mailbox is the only sign it was executed.
        self.wait_for_write_mailbox_ready(com)?;
        Ok(())
    }
}

impl MailboxTransport for Mailbox {
    fn read_mailbox(
        &self,
        com: &mut dyn EthercatCom,
        address: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let mut state = self.state.lock()?;
        let result = self.read_mailbox_locked(com, &mut state, address, length);
        if result.is_err() {
            state.diagnostics.read_errors += 1;
        }
        result
    }

    fn write_mailbox(&self, com: &mut dyn EthercatCom, address: u16, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock()?;
        let result = self.write_mailbox_locked(com, &mut state, address, data);
        if result.is_err() {
            state.diagnostics.write_errors += 1;
        }
        result
    }
}
