//! Configuration and diagnostics records stored on the board.
//!
//! EEPROM records ([`ActuatorInfo`], [`MotorHeatingModelEepromConfig`]) keep
//! their full page image so CRCs are always checked over the exact bytes the
//! device returned. Local-bus records are small and decode into plain structs.

use bitflags::bitflags;

use crate::checksum::crc32_prefix;
use crate::data_link::{ensure_len, Field};
use crate::error::Result;

/// Largest EEPROM page supported by the boards
pub const MAX_EEPROM_PAGE_SIZE: usize = 264;
pub const NUM_EEPROM_PAGES: u16 = 4096;

pub const ACTUATOR_INFO_PAGE: u16 = 4095;
pub const ACTUATOR_INFO_SIZE: usize = 264;
pub const MOTOR_HEATING_CONFIG_PAGE: u16 = 4093;
pub const MOTOR_HEATING_CONFIG_SIZE: usize = 256;

pub const CONFIG_INFO_BASE_ADDR: u16 = 0x0080;
pub const SAFETY_DISABLE_STATUS_BASE_ADDR: u16 = 0x00A1;
pub const USER_CONFIG_RAM_BASE_ADDR: u16 = 0x00C0;
pub const DIAGNOSTICS_INFO_BASE_ADDR: u16 = 0x0200;

mod actuator_info {
    use super::Field;

    pub const MAJOR: Field = Field::new(0, 2);
    pub const MINOR: Field = MAJOR.after(2);
    pub const ID: Field = MINOR.after(4);
    pub const NAME: Field = ID.after(64);
    pub const ROBOT_NAME: Field = NAME.after(32);
    pub const MOTOR_MAKE: Field = ROBOT_NAME.after(32);
    pub const MOTOR_MODEL: Field = MOTOR_MAKE.after(32);
    pub const MAX_CURRENT: Field = MOTOR_MODEL.after(8);
    pub const SPEED_CONSTANT: Field = MAX_CURRENT.after(8);
    pub const RESISTANCE: Field = SPEED_CONSTANT.after(8);
    pub const MOTOR_TORQUE_CONSTANT: Field = RESISTANCE.after(8);
    pub const ENCODER_REDUCTION: Field = MOTOR_TORQUE_CONSTANT.after(8);
    pub const PULSES_PER_REVOLUTION: Field = ENCODER_REDUCTION.after(4);
    /// CRC of the first 252 bytes, for EEPROMs with 256 byte pages
    pub const CRC32_256: Field = Field::new(256 - 4, 4);
    /// CRC of the first 260 bytes, for EEPROMs with 264 byte pages
    pub const CRC32_264: Field = Field::new(264 - 4, 4);
}

/// Identity and motor parameters programmed into the board EEPROM
#[derive(Clone, PartialEq, Eq)]
pub struct ActuatorInfo {
    image: [u8; ACTUATOR_INFO_SIZE],
}

impl std::fmt::Debug for ActuatorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorInfo")
            .field("version", &(self.major(), self.minor()))
            .field("id", &self.id())
            .field("name", &self.name())
            .field("motor_model", &self.motor_model())
            .finish()
    }
}

impl Default for ActuatorInfo {
    fn default() -> Self {
        Self {
            image: [0u8; ACTUATOR_INFO_SIZE],
        }
    }
}

impl ActuatorInfo {
    pub fn from_page(page: &[u8]) -> Result<Self> {
        ensure_len(page, ACTUATOR_INFO_SIZE, "actuator info")?;
        let mut image = [0u8; ACTUATOR_INFO_SIZE];
        image.copy_from_slice(&page[..ACTUATOR_INFO_SIZE]);
        Ok(Self { image })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn major(&self) -> u16 {
        actuator_info::MAJOR.u16(&self.image)
    }

    pub fn minor(&self) -> u16 {
        actuator_info::MINOR.u16(&self.image)
    }

    pub fn id(&self) -> u32 {
        actuator_info::ID.u32(&self.image)
    }

    pub fn name(&self) -> String {
        actuator_info::NAME.string(&self.image)
    }

    pub fn robot_name(&self) -> String {
        actuator_info::ROBOT_NAME.string(&self.image)
    }

    pub fn motor_make(&self) -> String {
        actuator_info::MOTOR_MAKE.string(&self.image)
    }

    pub fn motor_model(&self) -> String {
        actuator_info::MOTOR_MODEL.string(&self.image)
    }

    pub fn max_current(&self) -> f64 {
        actuator_info::MAX_CURRENT.f64(&self.image)
    }

    pub fn speed_constant(&self) -> f64 {
        actuator_info::SPEED_CONSTANT.f64(&self.image)
    }

    pub fn resistance(&self) -> f64 {
        actuator_info::RESISTANCE.f64(&self.image)
    }

    pub fn motor_torque_constant(&self) -> f64 {
        actuator_info::MOTOR_TORQUE_CONSTANT.f64(&self.image)
    }

    pub fn encoder_reduction(&self) -> f64 {
        actuator_info::ENCODER_REDUCTION.f64(&self.image)
    }

    pub fn pulses_per_revolution(&self) -> u32 {
        actuator_info::PULSES_PER_REVOLUTION.u32(&self.image)
    }

    pub fn crc32_256(&self) -> u32 {
        actuator_info::CRC32_256.u32(&self.image)
    }

    pub fn crc32_264(&self) -> u32 {
        actuator_info::CRC32_264.u32(&self.image)
    }

    pub fn set_version(&mut self, major: u16, minor: u16) {
        actuator_info::MAJOR.put_u16(&mut self.image, major);
        actuator_info::MINOR.put_u16(&mut self.image, minor);
    }

    pub fn set_id(&mut self, id: u32) {
        actuator_info::ID.put_u32(&mut self.image, id);
    }

    pub fn set_name(&mut self, name: &str) {
        actuator_info::NAME.put_string(&mut self.image, name);
    }

    pub fn set_robot_name(&mut self, name: &str) {
        actuator_info::ROBOT_NAME.put_string(&mut self.image, name);
    }

    pub fn set_motor(&mut self, make: &str, model: &str) {
        actuator_info::MOTOR_MAKE.put_string(&mut self.image, make);
        actuator_info::MOTOR_MODEL.put_string(&mut self.image, model);
    }

    pub fn set_motor_constants(
        &mut self,
        max_current: f64,
        speed_constant: f64,
        resistance: f64,
        motor_torque_constant: f64,
    ) {
        actuator_info::MAX_CURRENT.put_f64(&mut self.image, max_current);
        actuator_info::SPEED_CONSTANT.put_f64(&mut self.image, speed_constant);
        actuator_info::RESISTANCE.put_f64(&mut self.image, resistance);
        actuator_info::MOTOR_TORQUE_CONSTANT.put_f64(&mut self.image, motor_torque_constant);
    }

    pub fn set_encoder(&mut self, encoder_reduction: f64, pulses_per_revolution: u32) {
        actuator_info::ENCODER_REDUCTION.put_f64(&mut self.image, encoder_reduction);
        actuator_info::PULSES_PER_REVOLUTION.put_u32(&mut self.image, pulses_per_revolution);
    }

    /// Fills in both CRC fields from the current contents
    pub fn generate_crc(&mut self) {
        let crc256 = crc32_prefix(&self.image, actuator_info::CRC32_256.offset);
        actuator_info::CRC32_256.put_u32(&mut self.image, crc256);
        let crc264 = crc32_prefix(&self.image, actuator_info::CRC32_264.offset);
        actuator_info::CRC32_264.put_u32(&mut self.image, crc264);
    }

    /// Valid when either CRC matches.
    ///
    /// Boards with 256 byte EEPROM pages never store the second CRC, and
    /// boards programmed by older tools only carry the 264 byte one.
    pub fn verify_crc(&self) -> bool {
        let crc256 = crc32_prefix(&self.image, actuator_info::CRC32_256.offset);
        let crc264 = crc32_prefix(&self.image, actuator_info::CRC32_264.offset);
        self.crc32_264() == crc264 || self.crc32_256() == crc256
    }
}

mod heating_config {
    use super::Field;

    pub const MAJOR: Field = Field::new(0, 2);
    pub const MINOR: Field = MAJOR.after(2);
    pub const ENFORCE: Field = MINOR.after(1);
    pub const HOUSING_TO_AMBIENT_THERMAL_RESISTANCE: Field = Field::new(8, 8);
    pub const WINDING_TO_HOUSING_THERMAL_RESISTANCE: Field =
        HOUSING_TO_AMBIENT_THERMAL_RESISTANCE.after(8);
    pub const WINDING_THERMAL_TIME_CONSTANT: Field = WINDING_TO_HOUSING_THERMAL_RESISTANCE.after(8);
    pub const HOUSING_THERMAL_TIME_CONSTANT: Field = WINDING_THERMAL_TIME_CONSTANT.after(8);
    pub const MAX_WINDING_TEMPERATURE: Field = HOUSING_THERMAL_TIME_CONSTANT.after(8);
    pub const CRC32: Field = Field::new(256 - 4, 4);
}

/// Thermal parameters of the motor heating model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorHeatingModelParameters {
    /// Thermal resistance between motor housing and ambient (C/W)
    pub housing_to_ambient_thermal_resistance: f64,
    /// Thermal resistance between motor winding and housing (C/W)
    pub winding_to_housing_thermal_resistance: f64,
    /// Thermal time constant of the winding (seconds)
    pub winding_thermal_time_constant: f64,
    /// Thermal time constant of the housing (seconds)
    pub housing_thermal_time_constant: f64,
    /// Winding temperature at which the motor is halted (C)
    pub max_winding_temperature: f64,
}

/// Motor heating model record, stored on its own EEPROM page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorHeatingModelEepromConfig {
    image: [u8; MOTOR_HEATING_CONFIG_SIZE],
}

impl Default for MotorHeatingModelEepromConfig {
    fn default() -> Self {
        Self {
            image: [0u8; MOTOR_HEATING_CONFIG_SIZE],
        }
    }
}

impl MotorHeatingModelEepromConfig {
    pub const EEPROM_PAGE: u16 = MOTOR_HEATING_CONFIG_PAGE;

    pub fn new(params: MotorHeatingModelParameters, enforce: bool) -> Self {
        let mut config = Self::default();
        heating_config::MAJOR.put_u16(&mut config.image, 1);
        heating_config::MINOR.put_u16(&mut config.image, 0);
        config.set_enforce(enforce);
        config.set_params(&params);
        config.generate_crc();
        config
    }

    pub fn from_page(page: &[u8]) -> Result<Self> {
        ensure_len(page, MOTOR_HEATING_CONFIG_SIZE, "motor heating config")?;
        let mut image = [0u8; MOTOR_HEATING_CONFIG_SIZE];
        image.copy_from_slice(&page[..MOTOR_HEATING_CONFIG_SIZE]);
        Ok(Self { image })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn version(&self) -> (u16, u16) {
        (
            heating_config::MAJOR.u16(&self.image),
            heating_config::MINOR.u16(&self.image),
        )
    }

    pub fn enforce(&self) -> bool {
        heating_config::ENFORCE.u8(&self.image) != 0
    }

    pub fn set_enforce(&mut self, enforce: bool) {
        heating_config::ENFORCE.put_u8(&mut self.image, u8::from(enforce));
    }

    pub fn params(&self) -> MotorHeatingModelParameters {
        let img = &self.image;
        MotorHeatingModelParameters {
            housing_to_ambient_thermal_resistance: heating_config::HOUSING_TO_AMBIENT_THERMAL_RESISTANCE
                .f64(img),
            winding_to_housing_thermal_resistance: heating_config::WINDING_TO_HOUSING_THERMAL_RESISTANCE
                .f64(img),
            winding_thermal_time_constant: heating_config::WINDING_THERMAL_TIME_CONSTANT.f64(img),
            housing_thermal_time_constant: heating_config::HOUSING_THERMAL_TIME_CONSTANT.f64(img),
            max_winding_temperature: heating_config::MAX_WINDING_TEMPERATURE.f64(img),
        }
    }

    pub fn set_params(&mut self, params: &MotorHeatingModelParameters) {
        let img = &mut self.image;
        heating_config::HOUSING_TO_AMBIENT_THERMAL_RESISTANCE
            .put_f64(img, params.housing_to_ambient_thermal_resistance);
        heating_config::WINDING_TO_HOUSING_THERMAL_RESISTANCE
            .put_f64(img, params.winding_to_housing_thermal_resistance);
        heating_config::WINDING_THERMAL_TIME_CONSTANT
            .put_f64(img, params.winding_thermal_time_constant);
        heating_config::HOUSING_THERMAL_TIME_CONSTANT
            .put_f64(img, params.housing_thermal_time_constant);
        heating_config::MAX_WINDING_TEMPERATURE.put_f64(img, params.max_winding_temperature);
    }

    pub fn generate_crc(&mut self) {
        let crc = crc32_prefix(&self.image, heating_config::CRC32.offset);
        heating_config::CRC32.put_u32(&mut self.image, crc);
    }

    pub fn verify_crc(&self) -> bool {
        heating_config::CRC32.u32(&self.image)
            == crc32_prefix(&self.image, heating_config::CRC32.offset)
    }
}

mod config_info {
    use super::Field;

    pub const PRODUCT_ID: Field = Field::new(0, 4);
    pub const REVISION: Field = PRODUCT_ID.after(4);
    pub const DEVICE_SERIAL_NUMBER: Field = REVISION.after(4);
    pub const CURRENT_LOOP_KP: Field = DEVICE_SERIAL_NUMBER.after(1);
    pub const CURRENT_LOOP_KI: Field = CURRENT_LOOP_KP.after(1);
    pub const ABSOLUTE_CURRENT_LIMIT: Field = CURRENT_LOOP_KI.after(2);
    pub const NOMINAL_CURRENT_SCALE: Field = ABSOLUTE_CURRENT_LIMIT.after(4);
    pub const NOMINAL_VOLTAGE_SCALE: Field = NOMINAL_CURRENT_SCALE.after(4);
    pub const CONFIGURATION_STATUS: Field = NOMINAL_VOLTAGE_SCALE.after(1);
    pub const SAFETY_CONFIG: Field = CONFIGURATION_STATUS.after(1);
    pub const WATCHDOG_LIMIT: Field = SAFETY_CONFIG.after(2);
}

/// Factory configuration of the board, read from local bus
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfigInfo {
    pub product_id: u32,
    pub revision: u32,
    pub device_serial_number: u32,
    pub current_loop_kp: u8,
    pub current_loop_ki: u8,
    pub absolute_current_limit: u16,
    pub nominal_current_scale: f32,
    pub nominal_voltage_scale: f32,
    pub configuration_status: u8,
    pub safety_config: u8,
    pub watchdog_limit: u16,
}

impl ConfigInfo {
    pub const SIZE: usize = 32;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, Self::SIZE, "config info")?;
        Ok(Self {
            product_id: config_info::PRODUCT_ID.u32(buf),
            revision: config_info::REVISION.u32(buf),
            device_serial_number: config_info::DEVICE_SERIAL_NUMBER.u32(buf),
            current_loop_kp: config_info::CURRENT_LOOP_KP.u8(buf),
            current_loop_ki: config_info::CURRENT_LOOP_KI.u8(buf),
            absolute_current_limit: config_info::ABSOLUTE_CURRENT_LIMIT.u16(buf),
            nominal_current_scale: config_info::NOMINAL_CURRENT_SCALE.f32(buf),
            nominal_voltage_scale: config_info::NOMINAL_VOLTAGE_SCALE.f32(buf),
            configuration_status: config_info::CONFIGURATION_STATUS.u8(buf),
            safety_config: config_info::SAFETY_CONFIG.u8(buf),
            watchdog_limit: config_info::WATCHDOG_LIMIT.u16(buf),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        config_info::PRODUCT_ID.put_u32(&mut buf, self.product_id);
        config_info::REVISION.put_u32(&mut buf, self.revision);
        config_info::DEVICE_SERIAL_NUMBER.put_u32(&mut buf, self.device_serial_number);
        config_info::CURRENT_LOOP_KP.put_u8(&mut buf, self.current_loop_kp);
        config_info::CURRENT_LOOP_KI.put_u8(&mut buf, self.current_loop_ki);
        config_info::ABSOLUTE_CURRENT_LIMIT.put_u16(&mut buf, self.absolute_current_limit);
        config_info::NOMINAL_CURRENT_SCALE.put_f32(&mut buf, self.nominal_current_scale);
        config_info::NOMINAL_VOLTAGE_SCALE.put_f32(&mut buf, self.nominal_voltage_scale);
        config_info::CONFIGURATION_STATUS.put_u8(&mut buf, self.configuration_status);
        config_info::SAFETY_CONFIG.put_u8(&mut buf, self.safety_config);
        config_info::WATCHDOG_LIMIT.put_u16(&mut buf, self.watchdog_limit);
        buf
    }

    /// Hardware current limit of the board in amps
    pub fn board_max_current(&self) -> f64 {
        f64::from(self.absolute_current_limit) * f64::from(self.nominal_current_scale)
    }
}

/// Calibration offset kept in the board application RAM
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserConfigRam {
    pub version: u8,
    /// Unused by the firmware but covered by the CRC
    pub reserved: [u8; 7],
    pub zero_offset: f64,
    pub crc32: u32,
}

const USER_CONFIG_VERSION: Field = Field::new(0, 1);
const USER_CONFIG_RESERVED: Field = USER_CONFIG_VERSION.after(7);
const USER_CONFIG_ZERO_OFFSET: Field = USER_CONFIG_RESERVED.after(8);
const USER_CONFIG_CRC32: Field = USER_CONFIG_ZERO_OFFSET.after(4);

impl UserConfigRam {
    pub const SIZE: usize = 20;
    pub const VERSION: u8 = 1;

    pub fn new(zero_offset: f64) -> Self {
        let mut cfg = Self {
            version: Self::VERSION,
            reserved: [0; 7],
            zero_offset,
            crc32: 0,
        };
        cfg.crc32 = crc32_prefix(&cfg.encode(), USER_CONFIG_CRC32.offset);
        cfg
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, Self::SIZE, "user config ram")?;
        Ok(Self {
            version: USER_CONFIG_VERSION.u8(buf),
            reserved: USER_CONFIG_RESERVED.array(buf),
            zero_offset: USER_CONFIG_ZERO_OFFSET.f64(buf),
            crc32: USER_CONFIG_CRC32.u32(buf),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        USER_CONFIG_VERSION.put_u8(&mut buf, self.version);
        USER_CONFIG_RESERVED.slice_mut(&mut buf).copy_from_slice(&self.reserved);
        USER_CONFIG_ZERO_OFFSET.put_f64(&mut buf, self.zero_offset);
        USER_CONFIG_CRC32.put_u32(&mut buf, self.crc32);
        buf
    }

    /// Stored offset, if version and CRC check out. The CRC covers the
    /// record exactly as read, reserved bytes included.
    pub fn valid_zero_offset(&self) -> Option<f64> {
        if self.version != Self::VERSION {
            return None;
        }
        let crc = crc32_prefix(&self.encode(), USER_CONFIG_CRC32.offset);
        (crc == self.crc32).then_some(self.zero_offset)
    }
}

bitflags! {
    /// Causes reported in the safety disable status bytes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SafetyDisable: u8 {
        const DISABLED = 1 << 0;
        const UNDERVOLTAGE = 1 << 1;
        const OVER_CURRENT = 1 << 2;
        const BOARD_OVER_TEMP = 1 << 3;
        const HBRIDGE_OVER_TEMP = 1 << 4;
        const OPERATIONAL = 1 << 5;
        const WATCHDOG = 1 << 6;
    }
}

impl SafetyDisable {
    /// Comma separated cause names, "ENABLED" when no bit is set
    pub fn describe(self) -> String {
        if self.is_empty() {
            return "ENABLED".to_string();
        }
        self.iter_names()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Safety disable state latched by the board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyDisableStatus {
    pub safety_disable_status: u8,
    /// Causes captured when the board last went into lockout
    pub safety_disable_status_hold: u8,
    /// 8-bit wrapping count of safety disables
    pub safety_disable_count: u8,
}

impl SafetyDisableStatus {
    pub const SIZE: usize = 3;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, Self::SIZE, "safety disable status")?;
        Ok(Self {
            safety_disable_status: buf[0],
            safety_disable_status_hold: buf[1],
            safety_disable_count: buf[2],
        })
    }

    pub fn status(&self) -> SafetyDisable {
        SafetyDisable::from_bits_retain(self.safety_disable_status)
    }

    pub fn hold(&self) -> SafetyDisable {
        SafetyDisable::from_bits_retain(self.safety_disable_status_hold)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        [
            self.safety_disable_status,
            self.safety_disable_status_hold,
            self.safety_disable_count,
        ]
    }
}

/// Per-cause 8-bit wrapping safety disable counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyDisableCounters {
    pub undervoltage_count: u8,
    pub over_current_count: u8,
    pub board_over_temp_count: u8,
    pub bridge_over_temp_count: u8,
    pub operate_disable_count: u8,
    pub watchdog_disable_count: u8,
}

mod diagnostics_info {
    use super::Field;

    pub const CONFIG_OFFSET_CURRENT_A: Field = Field::new(0, 2);
    pub const CONFIG_OFFSET_CURRENT_B: Field = CONFIG_OFFSET_CURRENT_A.after(2);
    pub const SUPPLY_CURRENT_IN: Field = CONFIG_OFFSET_CURRENT_B.after(2);
    pub const SUPPLY_CURRENT_OUT: Field = SUPPLY_CURRENT_IN.after(2);
    pub const PDO_COMMAND_IRQ_COUNT: Field = Field::new(9, 1);
    pub const MBX_COMMAND_IRQ_COUNT: Field = PDO_COMMAND_IRQ_COUNT.after(1);
    pub const PDI_TIMEOUT_ERROR_COUNT: Field = Field::new(12, 1);
    pub const PDI_CHECKSUM_ERROR_COUNT: Field = PDI_TIMEOUT_ERROR_COUNT.after(1);
    pub const SAFETY_DISABLE_COUNTERS: Field = PDI_CHECKSUM_ERROR_COUNT.after(6);
}

/// Board diagnostics block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsInfo {
    pub config_offset_current_a: i16,
    pub config_offset_current_b: i16,
    pub supply_current_in: i16,
    pub supply_current_out: u16,
    pub pdo_command_irq_count: u8,
    pub mbx_command_irq_count: u8,
    pub pdi_timeout_error_count: u8,
    pub pdi_checksum_error_count: u8,
    pub safety_disable_counters: SafetyDisableCounters,
}

impl DiagnosticsInfo {
    pub const SIZE: usize = 20;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, Self::SIZE, "diagnostics info")?;
        let counters = diagnostics_info::SAFETY_DISABLE_COUNTERS.slice(buf);
        Ok(Self {
            config_offset_current_a: diagnostics_info::CONFIG_OFFSET_CURRENT_A.i16(buf),
            config_offset_current_b: diagnostics_info::CONFIG_OFFSET_CURRENT_B.i16(buf),
            supply_current_in: diagnostics_info::SUPPLY_CURRENT_IN.i16(buf),
            supply_current_out: diagnostics_info::SUPPLY_CURRENT_OUT.u16(buf),
            pdo_command_irq_count: diagnostics_info::PDO_COMMAND_IRQ_COUNT.u8(buf),
            mbx_command_irq_count: diagnostics_info::MBX_COMMAND_IRQ_COUNT.u8(buf),
            pdi_timeout_error_count: diagnostics_info::PDI_TIMEOUT_ERROR_COUNT.u8(buf),
            pdi_checksum_error_count: diagnostics_info::PDI_CHECKSUM_ERROR_COUNT.u8(buf),
            safety_disable_counters: SafetyDisableCounters {
                undervoltage_count: counters[0],
                over_current_count: counters[1],
                board_over_temp_count: counters[2],
                bridge_over_temp_count: counters[3],
                operate_disable_count: counters[4],
                watchdog_disable_count: counters[5],
            },
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        diagnostics_info::CONFIG_OFFSET_CURRENT_A.put_i16(&mut buf, self.config_offset_current_a);
        diagnostics_info::CONFIG_OFFSET_CURRENT_B.put_i16(&mut buf, self.config_offset_current_b);
        diagnostics_info::SUPPLY_CURRENT_IN.put_i16(&mut buf, self.supply_current_in);
        diagnostics_info::SUPPLY_CURRENT_OUT.put_u16(&mut buf, self.supply_current_out);
        diagnostics_info::PDO_COMMAND_IRQ_COUNT.put_u8(&mut buf, self.pdo_command_irq_count);
        diagnostics_info::MBX_COMMAND_IRQ_COUNT.put_u8(&mut buf, self.mbx_command_irq_count);
        diagnostics_info::PDI_TIMEOUT_ERROR_COUNT.put_u8(&mut buf, self.pdi_timeout_error_count);
        diagnostics_info::PDI_CHECKSUM_ERROR_COUNT.put_u8(&mut buf, self.pdi_checksum_error_count);
        let c = &self.safety_disable_counters;
        diagnostics_info::SAFETY_DISABLE_COUNTERS.slice_mut(&mut buf).copy_from_slice(&[
            c.undervoltage_count,
            c.over_current_count,
            c.board_over_temp_count,
            c.bridge_over_temp_count,
            c.operate_disable_count,
            c.watchdog_disable_count,
        ]);
        buf
    }
}
