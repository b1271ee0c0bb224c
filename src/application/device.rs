//! WG0X board driver.
//!
//! [`Wg0x`] belongs to the real-time thread: it packs commands and unpacks
//! status frames every cycle. Mailbox work happens on slower threads through
//! two handles sharing the same board:
//!
//! - [`Wg0xCollector`] polls safety counters and stores calibration offsets
//! - [`Wg0xMonitor`] turns everything into a [`DeviceDiagnostics`] report

use std::f64::consts::PI;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::cyclic::{encoder_velocity, CycleFault, CycleFlags, CycleSnapshot, CyclicConfig, CyclicStateMachine};
use super::eeprom::{EepromConfig, EepromProgrammer};
use super::records::{
    ActuatorInfo, ConfigInfo, DiagnosticsInfo, MotorHeatingModelEepromConfig, SafetyDisable,
    SafetyDisableStatus, UserConfigRam, CONFIG_INFO_BASE_ADDR, DIAGNOSTICS_INFO_BASE_ADDR,
    SAFETY_DISABLE_STATUS_BASE_ADDR, USER_CONFIG_RAM_BASE_ADDR,
};
use crate::checksum::verify_checksum;
use crate::data_link::process_data::{
    convert_raw_temperature, CalibrationReading, Mode, Wg0xCommand, Wg0xStatus, COMMAND_SIZE,
    PWM_MAX, STATUS_SIZE,
};
use crate::diagnostics::{
    Availability, DeviceDiagnostics, DiagnosticsStore, Level, MailboxDiagnostics, Wg0xDiagnostics,
};
use crate::error::{DriverError, Result};
use crate::hardware_interface::{Actuator, DigitalOut, HardwareInterface};
use crate::model::{MotorHeatingModel, MotorHeatingModelCommon, MotorModel, MotorTraceSample};
use crate::physical::{EthercatCom, Telegram};
use crate::transport::mailbox::Mailbox;
use crate::transport::{MailboxConfig, MailboxTransport};
use crate::types::{
    AddrMode, Config, SlaveHandler, WG021_PRODUCT_CODE, WG05_PRODUCT_CODE,
};

/// WG005B measures the H-bridge current only
const WG005B_SUPPLY_CURRENT_SCALE: f64 = (1.0 / (8152.0 * 0.851)) * 4.0;
/// Later WG005 revisions and WG021 measure current into the whole board
const WG005_SUPPLY_CURRENT_SCALE: f64 = (82.0 * 2.5) / (0.01 * 5100.0 * 32768.0);

/// Whether the firmware keeps a calibration offset in application RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppRamStatus {
    Present,
    #[default]
    Missing,
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationStatus {
    #[default]
    NoCalibration,
    /// Offset set by a controller this run
    ControllerCalibration,
    /// Offset restored from application RAM
    SavedCalibration,
}

#[derive(Debug, Clone)]
pub struct Wg0xConfig {
    pub mailbox: MailboxConfig,
    pub eeprom: EepromConfig,
    pub cyclic: CyclicConfig,
    pub app_ram: AppRamStatus,
    /// Keep the motor running when the electrical model reports a mismatch
    pub disable_motor_model_checking: bool,
    /// Refuse firmware revisions known not to work instead of warning
    pub strict_firmware_check: bool,
}

impl Default for Wg0xConfig {
    fn default() -> Self {
        Self {
            mailbox: MailboxConfig::default(),
            eeprom: EepromConfig::default(),
            cyclic: CyclicConfig::default(),
            app_ram: AppRamStatus::default(),
            disable_motor_model_checking: false,
            strict_firmware_check: true,
        }
    }
}

impl Config for Wg0xConfig {
    fn validate(&self) -> Result<()> {
        self.mailbox.validate()?;
        self.eeprom.validate()?;
        self.cyclic.validate()
    }
}

/// Board state reachable from every thread
struct Shared {
    slave: Arc<SlaveHandler>,
    mailbox: Mailbox,
    diagnostics: DiagnosticsStore,
    flags: Arc<CycleFlags>,
}

impl Shared {
    fn read_app_ram(&self, com: &mut dyn EthercatCom) -> Result<Option<f64>> {
        let raw = self
            .mailbox
            .read_mailbox(com, USER_CONFIG_RAM_BASE_ADDR, UserConfigRam::SIZE)?;
        Ok(UserConfigRam::decode(&raw)?.valid_zero_offset())
    }

    fn write_app_ram(&self, com: &mut dyn EthercatCom, zero_offset: f64) -> Result<()> {
        let cfg = UserConfigRam::new(zero_offset);
        self.mailbox
            .write_mailbox(com, USER_CONFIG_RAM_BASE_ADDR, &cfg.encode())
    }
}

/// Driver for one WG05, WG06 or WG021 board
pub struct Wg0x {
    config: Wg0xConfig,
    shared: Arc<Shared>,
    heating_common: Option<Arc<MotorHeatingModelCommon>>,
    cyclic: CyclicStateMachine,

    actuator: Actuator,
    digital_out: DigitalOut,
    publish_motor_trace: DigitalOut,

    actuator_info: ActuatorInfo,
    config_info: ConfigInfo,
    max_current: f64,
    cached_zero_offset: f64,
    calibration_status: CalibrationStatus,

    motor_model: Option<Box<dyn MotorModel>>,
    heating_model: Option<Box<dyn MotorHeatingModel>>,
    trace_sample: MotorTraceSample,
}

impl Wg0x {
    pub fn new(
        slave: Arc<SlaveHandler>,
        config: Wg0xConfig,
        heating_common: Option<Arc<MotorHeatingModelCommon>>,
    ) -> Result<Self> {
        config.validate()?;
        let cyclic = CyclicStateMachine::new(
            format!("device #{:02}", slave.ring_position),
            config.cyclic.clone(),
        );
        let shared = Arc::new(Shared {
            mailbox: Mailbox::new(Arc::clone(&slave), config.mailbox.clone()),
            slave,
            diagnostics: DiagnosticsStore::new("diagnostics", Wg0xDiagnostics::default()),
            flags: cyclic.flags(),
        });
        Ok(Self {
            config,
            shared,
            heating_common,
            cyclic,
            actuator: Actuator::default(),
            digital_out: DigitalOut::default(),
            publish_motor_trace: DigitalOut::default(),
            actuator_info: ActuatorInfo::default(),
            config_info: ConfigInfo::default(),
            max_current: 0.0,
            cached_zero_offset: 0.0,
            calibration_status: CalibrationStatus::default(),
            motor_model: None,
            heating_model: None,
            trace_sample: MotorTraceSample::default(),
        })
    }

    pub fn slave(&self) -> &Arc<SlaveHandler> {
        &self.shared.slave
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.shared.mailbox
    }

    pub fn eeprom(&self) -> EepromProgrammer<'_, Mailbox> {
        EepromProgrammer::new(&self.shared.mailbox, self.config.eeprom.clone())
    }

    pub fn name(&self) -> &str {
        &self.actuator.name
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut Actuator {
        &mut self.actuator
    }

    pub fn digital_out_mut(&mut self) -> &mut DigitalOut {
        &mut self.digital_out
    }

    /// Writing a non-zero command publishes a motor trace on the next cycle
    pub fn publish_motor_trace_mut(&mut self) -> &mut DigitalOut {
        &mut self.publish_motor_trace
    }

    pub fn actuator_info(&self) -> &ActuatorInfo {
        &self.actuator_info
    }

    pub fn config_info(&self) -> &ConfigInfo {
        &self.config_info
    }

    pub fn max_current(&self) -> f64 {
        self.max_current
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.calibration_status
    }

    pub fn trace_sample(&self) -> &MotorTraceSample {
        &self.trace_sample
    }

    pub fn cycle_state(&self) -> CycleSnapshot {
        self.shared.flags.snapshot()
    }

    pub fn has_error(&self) -> bool {
        self.cyclic.has_error()
    }

    pub fn max_board_temperature(&self) -> f64 {
        convert_raw_temperature(self.cyclic.max_board_temperature())
    }

    pub fn max_bridge_temperature(&self) -> f64 {
        convert_raw_temperature(self.cyclic.max_bridge_temperature())
    }

    fn check_firmware(&self) -> Result<()> {
        let slave = &self.shared.slave;
        let rev = slave.board_revision();
        debug!(
            position = slave.ring_position,
            product = slave.product_code,
            fw = %format_args!("{}.{:02}", rev.fw_major, rev.fw_minor),
            pcb = %format_args!("{}.{:02}", rev.pcb_letter(), rev.board_minor),
            serial = slave.serial,
            "initializing board"
        );

        let supported = if slave.product_code == WG05_PRODUCT_CODE {
            rev.fw_major == 1 && rev.fw_minor >= 7
        } else {
            !(rev.fw_major == 0 && rev.fw_minor < 4)
        };
        if supported {
            return Ok(());
        }
        if self.config.strict_firmware_check {
            error!(
                position = slave.ring_position,
                major = rev.fw_major,
                minor = rev.fw_minor,
                "unsupported firmware revision"
            );
            return Err(DriverError::UnsupportedFirmware {
                major: rev.fw_major,
                minor: rev.fw_minor,
            });
        }
        warn!(
            position = slave.ring_position,
            major = rev.fw_major,
            minor = rev.fw_minor,
            "unsupported firmware revision"
        );
        Ok(())
    }

    /// Reads board and actuator configuration and registers the board's
    /// handles with `hw`.
    ///
    /// An unprogrammed EEPROM is an error unless `allow_unprogrammed`, which
    /// programming tools set so they can talk to blank boards.
    pub fn initialize(
        &mut self,
        com: &mut dyn EthercatCom,
        hw: Option<&mut HardwareInterface>,
        allow_unprogrammed: bool,
    ) -> Result<()> {
        self.check_firmware()?;

        let position = self.shared.slave.ring_position;
        let raw = self
            .shared
            .mailbox
            .read_mailbox(com, CONFIG_INFO_BASE_ADDR, ConfigInfo::SIZE)
            .map_err(|e| {
                error!(position, %e, "unable to load configuration information");
                e
            })?;
        self.config_info = ConfigInfo::decode(&raw)?;
        debug!(position, serial = self.config_info.device_serial_number, "configuration loaded");
        let board_max_current = self.config_info.board_max_current();

        self.actuator_info = self.eeprom().read_actuator_info(com).map_err(|e| {
            error!(position, %e, "unable to read actuator info from EEPROM");
            e
        })?;

        if !self.actuator_info.verify_crc() {
            let slave = &self.shared.slave;
            if allow_unprogrammed {
                warn!(position, id = %slave.hardware_id(), "device is not programmed");
                self.max_current = board_max_current;
                return Ok(());
            }
            error!(position, id = %slave.hardware_id(), "device is not programmed, aborting");
            return Err(DriverError::NotProgrammed(position));
        }

        let (major, minor) = (self.actuator_info.major(), self.actuator_info.minor());
        if major != 0 || minor != 2 {
            if !allow_unprogrammed {
                error!(position, major, minor, "unsupported actuator info version, please reprogram");
                return Err(DriverError::UnsupportedVersion {
                    what: "actuator info",
                    major,
                    minor,
                });
            }
            warn!(position, major, minor, "unsupported actuator info version, please reprogram");
        }

        let name = self.actuator_info.name();
        debug!(position, %name, "actuator name");
        self.actuator.name = name.clone();
        self.digital_out.name = name.clone();
        self.cyclic.set_name(name.clone());

        self.initialize_motor_heating_model(com)?;

        if let Some(hw) = hw {
            if self.shared.slave.product_code != WG021_PRODUCT_CODE {
                hw.register_actuator(&name).map_err(|e| {
                    error!(position, %name, "an actuator of this name already exists");
                    e
                })?;
            }
            hw.register_digital_out(&name).map_err(|e| {
                error!(position, %name, "a digital out of this name already exists");
                e
            })?;
        }

        match self.config.app_ram {
            AppRamStatus::Present => self.restore_calibration(com),
            AppRamStatus::Missing => {
                warn!(%name, "device does not support storing calibration offsets")
            }
            AppRamStatus::NotApplicable => {}
        }

        let motor_max_current = self.actuator_info.max_current();
        if motor_max_current > board_max_current {
            warn!(
                position,
                motor = motor_max_current,
                board = board_max_current,
                "motor current limit greater than board current limit"
            );
        }
        self.max_current = board_max_current.min(motor_max_current);
        Ok(())
    }

    fn restore_calibration(&mut self, com: &mut dyn EthercatCom) {
        match self.shared.read_app_ram(com) {
            Ok(Some(zero_offset)) => {
                debug!(name = %self.actuator.name, zero_offset, "read calibration from device");
                self.actuator.state.zero_offset = zero_offset;
                self.cached_zero_offset = zero_offset;
                self.calibration_status = CalibrationStatus::SavedCalibration;
                if let Ok(mut dg) = self.shared.diagnostics.lock() {
                    dg.zero_offset = zero_offset;
                    dg.cached_zero_offset = zero_offset;
                }
            }
            Ok(None) => debug!(name = %self.actuator.name, "no calibration offset stored on device"),
            Err(e) => warn!(name = %self.actuator.name, %e, "could not read application RAM"),
        }
    }

    fn initialize_motor_heating_model(&mut self, com: &mut dyn EthercatCom) -> Result<()> {
        let config: MotorHeatingModelEepromConfig =
            self.eeprom().read_motor_heating_config(com).map_err(|e| {
                error!(name = %self.actuator.name, %e, "unable to read motor heating model parameters");
                e
            })?;

        // Boards programmed before the heating model existed carry no record
        if !config.verify_crc() {
            warn!(name = %self.actuator.name, "EEPROM does not contain motor heating model parameters");
            return Ok(());
        }
        if !config.enforce() {
            return Ok(());
        }
        let Some(common) = self.heating_common.clone() else {
            return Ok(());
        };

        let hardware_id = self.shared.slave.hardware_id();
        let mut model = common.build(&config.params(), &self.actuator.name, &hardware_id);
        if common.load_save_files {
            if let Err(e) = model.load_temperature_state() {
                warn!(name = %self.actuator.name, %e, "could not load motor temperature state");
            }
        }
        model.initialize()?;
        self.heating_model = Some(model);
        Ok(())
    }

    /// Attaches the electrical motor model and registers the digital out
    /// used to trigger a trace by hand. Needs the actuator name, so only
    /// works after [`Wg0x::initialize`] found a programmed board.
    pub fn initialize_motor_model(
        &mut self,
        hw: &mut HardwareInterface,
        model: Box<dyn MotorModel>,
    ) -> Result<()> {
        if self.actuator.name.is_empty() {
            return Err(DriverError::NotInitialized);
        }
        let name = format!("{}_publish_motor_trace", self.actuator.name);
        hw.register_digital_out(&name).map_err(|e| {
            error!(%name, "a digital out of this name already exists");
            e
        })?;
        self.publish_motor_trace = DigitalOut::new(name);
        self.motor_model = Some(model);
        Ok(())
    }

    /// Asks the motor model to publish its trace; false without a model
    pub fn publish_trace(&mut self, reason: &str, level: u8, delay: u32) -> bool {
        match self.motor_model.as_mut() {
            Some(model) => {
                model.flag_publish(reason, level, delay);
                true
            }
            None => false,
        }
    }

    pub fn clear_error_flags(&mut self) {
        self.cyclic.clear_error_flags();
        if let Some(model) = self.motor_model.as_mut() {
            model.reset();
        }
        if let Some(model) = self.heating_model.as_mut() {
            model.reset();
        }
    }

    /// Hands a changed calibration offset to the collector thread. A busy
    /// lock is retried on the next cycle.
    fn hand_off_zero_offset(&mut self) {
        let zero_offset = self.actuator.state.zero_offset;
        if zero_offset == self.cached_zero_offset {
            return;
        }
        if let Availability::Acquired(mut dg) = self.shared.diagnostics.try_lock() {
            debug!(
                name = %self.actuator.name,
                new = zero_offset,
                old = self.cached_zero_offset,
                "calibration change"
            );
            self.cached_zero_offset = zero_offset;
            dg.zero_offset = zero_offset;
            self.calibration_status = CalibrationStatus::ControllerCalibration;
        }
    }

    /// Builds this cycle's command frame
    pub fn pack_command(&mut self, halt: bool, reset: bool) -> [u8; COMMAND_SIZE] {
        if halt {
            self.actuator.command.effort = 0.0;
        }
        if reset {
            self.clear_error_flags();
        }
        self.cyclic.set_resetting(reset);

        self.hand_off_zero_offset();

        let effort = self.actuator.command.effort;
        let mut current = effort
            / self.actuator_info.encoder_reduction()
            / self.actuator_info.motor_torque_constant();
        self.actuator.state.last_commanded_effort = effort;
        self.actuator.state.last_commanded_current = current;

        if !current.is_finite() {
            current = 0.0;
        }
        current = current.min(self.max_current).max(-self.max_current);

        let mut mode = if self.actuator.command.enable && !halt && !self.cyclic.has_error() {
            Mode::ENABLE | Mode::CURRENT
        } else {
            Mode::OFF
        };
        if reset {
            mode |= Mode::SAFETY_RESET;
        }

        Wg0xCommand {
            mode,
            digital_out: self.digital_out.command,
            programmed_pwm: 0,
            programmed_current: (current / f64::from(self.config_info.nominal_current_scale)) as i16,
        }
        .encode()
    }

    fn status_checksum_fault(&mut self) -> CycleFault {
        if let Availability::Acquired(mut dg) = self.shared.diagnostics.try_lock() {
            dg.checksum_errors += 1;
        }
        let fault = self.cyclic.record_checksum_error();
        self.actuator.state.halted = true;
        fault
    }

    /// Derives actuator state from this cycle's status frame and verifies it.
    ///
    /// `prev` is the status frame of the previous cycle, all zeros before
    /// the first one.
    pub fn unpack_state(&mut self, this: &[u8], prev: &[u8]) -> std::result::Result<(), CycleFault> {
        let (Ok(status), Ok(prev_status)) = (Wg0xStatus::decode(this), Wg0xStatus::decode(prev)) else {
            return Err(self.status_checksum_fault());
        };
        if !verify_checksum(&this[..STATUS_SIZE]) {
            return Err(self.status_checksum_fault());
        }

        self.digital_out.state = status.digital_out;

        let ppr = f64::from(self.actuator_info.pulses_per_revolution());
        let to_radians = |ticks: f64| ticks / ppr * 2.0 * PI;
        let current_scale = f64::from(self.config_info.nominal_current_scale);
        let effort_scale = current_scale
            * self.actuator_info.motor_torque_constant()
            * self.actuator_info.encoder_reduction();
        let timestamp = self.cyclic.accumulate_time(status.timestamp, prev_status.timestamp);

        let state = &mut self.actuator.state;
        state.timestamp = timestamp;
        state.device_id = self.shared.slave.ring_position;

        state.encoder_count = status.encoder_count;
        state.position = to_radians(f64::from(status.encoder_count)) - state.zero_offset;
        state.encoder_velocity = encoder_velocity(
            status.encoder_count,
            status.timestamp,
            prev_status.encoder_count,
            prev_status.timestamp,
        );
        state.velocity = to_radians(state.encoder_velocity);

        let cal = status.calibration_reading;
        state.calibration_reading = cal.contains(CalibrationReading::LIMIT_SENSOR_0_STATE);
        state.calibration_rising_edge_valid = cal.contains(CalibrationReading::LIMIT_OFF_TO_ON);
        state.calibration_falling_edge_valid = cal.contains(CalibrationReading::LIMIT_ON_TO_OFF);
        state.last_calibration_rising_edge = to_radians(f64::from(status.last_calibration_rising_edge));
        state.last_calibration_falling_edge = to_radians(f64::from(status.last_calibration_falling_edge));
        state.is_enabled = status.mode.contains(Mode::ENABLE);

        state.last_executed_current = f64::from(status.programmed_current) * current_scale;
        state.last_measured_current = f64::from(status.measured_current) * current_scale;
        state.last_executed_effort = f64::from(status.programmed_current) * effort_scale;
        state.last_measured_effort = f64::from(status.measured_current) * effort_scale;

        state.num_encoder_errors = status.num_encoder_errors;
        state.motor_voltage =
            f64::from(status.motor_voltage) * f64::from(self.config_info.nominal_voltage_scale);
        state.max_effort = self.max_current
            * self.actuator_info.encoder_reduction()
            * self.actuator_info.motor_torque_constant();

        self.verify_state(&status, &prev_status)
    }

    fn sample_models(&mut self, status: &Wg0xStatus, prev: &Wg0xStatus) -> bool {
        if self.motor_model.is_none() && self.heating_model.is_none() {
            return false;
        }

        let state = &self.actuator.state;
        let sample = MotorTraceSample {
            timestamp: state.timestamp,
            enabled: state.is_enabled,
            supply_voltage: f64::from(prev.supply_voltage)
                * f64::from(self.config_info.nominal_voltage_scale),
            measured_motor_voltage: state.motor_voltage,
            programmed_pwm: f64::from(status.programmed_pwm) / f64::from(PWM_MAX),
            executed_current: f64::from(status.programmed_current)
                * f64::from(self.config_info.nominal_current_scale),
            measured_current: state.last_measured_current,
            velocity: state.velocity,
            encoder_position: state.position,
            encoder_error_count: u32::from(state.num_encoder_errors),
        };
        self.trace_sample = sample;

        if let Some(model) = self.motor_model.as_mut() {
            model.sample(&sample);
            model.check_publish();
        }

        let Some(heating) = self.heating_model.as_mut() else {
            return false;
        };
        let ambient_temperature = convert_raw_temperature(status.board_temperature);
        let duration = self.cyclic.cycle_duration(status.timestamp, prev.timestamp);
        heating.update(&sample, &self.actuator_info, ambient_temperature, duration);

        let may_halt = self
            .heating_common
            .as_ref()
            .map_or(true, |common| !common.disable_halt);
        may_halt && heating.has_overheated()
    }

    fn verify_state(&mut self, status: &Wg0xStatus, prev: &Wg0xStatus) -> std::result::Result<(), CycleFault> {
        let overheated = self.sample_models(status, prev);

        let check_model = self.actuator.state.is_enabled && !self.config.disable_motor_model_checking;
        let motor_model = &mut self.motor_model;
        let result = self.cyclic.verify(status, overheated, || match motor_model {
            Some(model) if check_model => model.verify(),
            _ => true,
        });

        if let Some(model) = self.motor_model.as_mut() {
            let lockout = self.cyclic.lockout_entered();
            if lockout || self.publish_motor_trace.command != 0 {
                let (reason, level) = if lockout {
                    ("Safety Lockout", 2)
                } else {
                    ("Publishing manually triggered", 0)
                };
                model.flag_publish(reason, level, 100);
                self.publish_motor_trace.command = 0;
            }
        }

        self.actuator.state.halted = self.cyclic.halted();
        result
    }

    /// Handle for the mailbox thread
    pub fn collector(&self) -> Wg0xCollector {
        Wg0xCollector {
            shared: Arc::clone(&self.shared),
            name: self.actuator.name.clone(),
            app_ram: self.config.app_ram,
            eeprom: self.config.eeprom.clone(),
        }
    }

    /// Handle for the reporting thread
    pub fn monitor(&self) -> Wg0xMonitor {
        let slave = &self.shared.slave;
        let product_id = self.config_info.product_id;
        Wg0xMonitor {
            shared: Arc::clone(&self.shared),
            name: format!("EtherCAT Device ({})", self.actuator.name),
            hardware_id: format!(
                "{}-{:05}-{:05}",
                product_id / 100_000,
                product_id % 100_000,
                self.config_info.device_serial_number
            ),
            product_code: slave.product_code,
            board_major: slave.board_revision().board_major,
            nominal_current_scale: f64::from(self.config_info.nominal_current_scale),
            published: Wg0xDiagnostics::default(),
            mailbox: MailboxDiagnostics::default(),
        }
    }
}

/// Mailbox side of a board, used from the non-real-time thread
pub struct Wg0xCollector {
    shared: Arc<Shared>,
    name: String,
    app_ram: AppRamStatus,
    eeprom: EepromConfig,
}

impl Wg0xCollector {
    pub fn eeprom(&self) -> EepromProgrammer<'_, Mailbox> {
        EepromProgrammer::new(&self.shared.mailbox, self.eeprom.clone())
    }

    /// Single-shot read of register 0 so absent boards cost one frame
    fn probe(&self, com: &mut dyn EthercatCom) -> Result<()> {
        let station = self.shared.slave.station_address;
        let mut telegrams = [Telegram::read(AddrMode::Fixed, station, 0x0000, 1)];
        if !com.txandrx_once(&mut telegrams) {
            return Err(DriverError::PacketLoss("presence probe not answered".into()));
        }
        if telegrams[0].wkc != 1 {
            return Err(DriverError::WorkingCounter(
                "device did not answer presence probe".into(),
            ));
        }
        Ok(())
    }

    fn sync_zero_offset(&self, com: &mut dyn EthercatCom) {
        let Ok(dg) = self.shared.diagnostics.snapshot() else {
            return;
        };
        if dg.zero_offset == dg.cached_zero_offset {
            return;
        }
        match self.shared.write_app_ram(com, dg.zero_offset) {
            Ok(()) => {
                debug!(
                    name = %self.name,
                    new = dg.zero_offset,
                    old = dg.cached_zero_offset,
                    "wrote new calibration to device"
                );
                if let Ok(mut guard) = self.shared.diagnostics.lock() {
                    guard.cached_zero_offset = dg.zero_offset;
                }
            }
            // Retried on the next collection
            Err(e) => error!(
                name = %self.name,
                new = dg.zero_offset,
                old = dg.cached_zero_offset,
                %e,
                "failed to write new calibration to device"
            ),
        }
    }

    fn collect(&self, com: &mut dyn EthercatCom) -> Result<(SafetyDisableStatus, DiagnosticsInfo)> {
        self.probe(com)?;
        let mailbox = &self.shared.mailbox;
        let status = SafetyDisableStatus::decode(&mailbox.read_mailbox(
            com,
            SAFETY_DISABLE_STATUS_BASE_ADDR,
            SafetyDisableStatus::SIZE,
        )?)?;
        let info = DiagnosticsInfo::decode(&mailbox.read_mailbox(
            com,
            DIAGNOSTICS_INFO_BASE_ADDR,
            DiagnosticsInfo::SIZE,
        )?)?;
        if self.app_ram == AppRamStatus::Present {
            self.sync_zero_offset(com);
        }
        Ok((status, info))
    }

    /// Polls the board's safety counters and folds them into the totals
    pub fn collect_diagnostics(&self, com: &mut dyn EthercatCom) -> Result<()> {
        let result = self.collect(com);

        let mut dg = match self.shared.diagnostics.lock() {
            Ok(dg) => dg,
            Err(e) => {
                // Poison is cleared once counted, so the sample can still be marked
                if let Ok(mut dg) = self.shared.diagnostics.lock() {
                    dg.valid = false;
                    dg.first = false;
                }
                return Err(e);
            }
        };
        dg.first = false;
        dg.valid = result.is_ok();
        let (status, info) = result?;
        dg.update(status, info);
        Ok(())
    }

    pub fn write_app_ram(&self, com: &mut dyn EthercatCom, zero_offset: f64) -> Result<()> {
        self.shared.write_app_ram(com, zero_offset)
    }

    /// Stored calibration offset; `None` when nothing valid is stored
    pub fn read_app_ram(&self, com: &mut dyn EthercatCom) -> Result<Option<f64>> {
        self.shared.read_app_ram(com)
    }

    pub fn program_actuator_info(&self, com: &mut dyn EthercatCom, info: &ActuatorInfo) -> Result<()> {
        self.eeprom().program_actuator_info(com, info)?;
        info!(name = %info.name(), "programmed actuator info");
        Ok(())
    }

    pub fn program_motor_heating_config(
        &self,
        com: &mut dyn EthercatCom,
        config: &MotorHeatingModelEepromConfig,
    ) -> Result<()> {
        self.eeprom().program_motor_heating_config(com, config)
    }
}

/// Reporting side of a board
pub struct Wg0xMonitor {
    shared: Arc<Shared>,
    name: String,
    hardware_id: String,
    product_code: u32,
    board_major: u8,
    nominal_current_scale: f64,
    published: Wg0xDiagnostics,
    mailbox: MailboxDiagnostics,
}

impl Wg0xMonitor {
    /// Builds a report from the latest counters.
    ///
    /// Collection counters are copied with a non-blocking lock; when the
    /// collector holds it the previous copy is reported again.
    pub fn publish(&mut self) -> DeviceDiagnostics {
        if let Ok(mailbox) = self.shared.mailbox.diagnostics() {
            self.mailbox = mailbox;
        }
        if let Availability::Acquired(dg) = self.shared.diagnostics.try_lock() {
            self.published = *dg;
        }

        let flags = &self.shared.flags;
        let p = &self.published;
        let hold = p.safety_disable_status.hold();
        let cycle = flags.snapshot();

        let mut report = DeviceDiagnostics::new(self.name.clone(), self.hardware_id.clone());
        if cycle.too_many_dropped_packets {
            report.merge_summary(Level::Error, "Too many dropped packets");
        }
        if cycle.status_checksum_error {
            report.merge_summary(Level::Error, "Checksum error on status data");
        }
        if p.first {
            report.merge_summary(Level::Warn, "Have not yet collected WG0X diagnostics");
        } else if !p.valid {
            report.merge_summary(Level::Warn, "Could not collect WG0X diagnostics");
        }

        if cycle.in_lockout {
            let causes = hold.difference(SafetyDisable::DISABLED);
            let message = if causes.is_empty() {
                "Safety Lockout".to_string()
            } else {
                format!("Safety Lockout: {}", causes.describe())
            };
            report.merge_summary(Level::Error, message);
        }

        if cycle.timestamp_jump_detected && hold.contains(SafetyDisable::OPERATIONAL) {
            flags.set_fpga_internal_reset_detected();
        }
        if flags.fpga_internal_reset_detected() {
            report.merge_summary(Level::Error, "FPGA internal reset detected");
        }
        if cycle.timestamp_jump_detected {
            report.merge_summary(Level::Warn, "Timestamp jumped");
        }

        let di = &p.diagnostics_info;
        let supply = f64::from(di.supply_current_in);
        if self.product_code == WG05_PRODUCT_CODE && self.board_major == 1 {
            report.bridge_supply_current = Some(supply * WG005B_SUPPLY_CURRENT_SCALE);
        } else if self.product_code == WG05_PRODUCT_CODE || self.product_code == WG021_PRODUCT_CODE {
            report.supply_current = Some(supply * WG005_SUPPLY_CURRENT_SCALE);
        }
        report.configured_offset_a = self.nominal_current_scale * f64::from(di.config_offset_current_a);
        report.configured_offset_b = self.nominal_current_scale * f64::from(di.config_offset_current_b);

        report.mailbox = self.mailbox;
        report.collected = *p;
        report.cycle = flags.snapshot();
        report
    }
}
