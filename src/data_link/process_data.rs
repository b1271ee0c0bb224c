//! Cyclic process data of the WG0X boards.
//!
//! Each bus cycle carries one command record (master to device) followed by
//! one status record (device to master). Both end in a trailing checksum byte.

use bitflags::bitflags;

use super::Field;
use crate::checksum::trailing_checksum;
use crate::error::Result;

pub const COMMAND_SIZE: usize = 8;
pub const STATUS_SIZE: usize = 44;
/// Full scale of the programmed PWM value
pub const PWM_MAX: i16 = 0x4000;

bitflags! {
    /// Mode byte shared by command and status records. No bits set means off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mode: u8 {
        const ENABLE = 1 << 0;
        const CURRENT = 1 << 1;
        const SAFETY_RESET = 1 << 4;
        const SAFETY_LOCKOUT = 1 << 5;
        const UNDERVOLTAGE = 1 << 6;
        const RESET = 1 << 7;
    }
}

impl Mode {
    pub const OFF: Mode = Mode::empty();
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CalibrationReading: u8 {
        const LIMIT_SENSOR_0_STATE = 1 << 0;
        const LIMIT_OFF_TO_ON = 1 << 1;
        const LIMIT_ON_TO_OFF = 1 << 2;
    }
}

mod command {
    use super::Field;

    pub const MODE: Field = Field::new(0, 1);
    pub const DIGITAL_OUT: Field = MODE.after(1);
    pub const PROGRAMMED_PWM: Field = DIGITAL_OUT.after(2);
    pub const PROGRAMMED_CURRENT: Field = PROGRAMMED_PWM.after(2);
    // One pad byte before the checksum
    pub const CHECKSUM: Field = PROGRAMMED_CURRENT.after(1).after(1);

    const _: () = assert!(CHECKSUM.end() == super::COMMAND_SIZE);
}

mod status {
    use super::Field;

    pub const MODE: Field = Field::new(0, 1);
    pub const DIGITAL_OUT: Field = MODE.after(1);
    pub const PROGRAMMED_PWM: Field = DIGITAL_OUT.after(2);
    pub const PROGRAMMED_CURRENT: Field = PROGRAMMED_PWM.after(2);
    pub const MEASURED_CURRENT: Field = PROGRAMMED_CURRENT.after(2);
    pub const TIMESTAMP: Field = MEASURED_CURRENT.after(4);
    pub const ENCODER_COUNT: Field = TIMESTAMP.after(4);
    pub const ENCODER_INDEX_POS: Field = ENCODER_COUNT.after(4);
    pub const NUM_ENCODER_ERRORS: Field = ENCODER_INDEX_POS.after(2);
    pub const ENCODER_STATUS: Field = NUM_ENCODER_ERRORS.after(1);
    pub const CALIBRATION_READING: Field = ENCODER_STATUS.after(1);
    pub const LAST_RISING_EDGE: Field = CALIBRATION_READING.after(4);
    pub const LAST_FALLING_EDGE: Field = LAST_RISING_EDGE.after(4);
    pub const BOARD_TEMPERATURE: Field = LAST_FALLING_EDGE.after(2);
    pub const BRIDGE_TEMPERATURE: Field = BOARD_TEMPERATURE.after(2);
    pub const SUPPLY_VOLTAGE: Field = BRIDGE_TEMPERATURE.after(2);
    pub const MOTOR_VOLTAGE: Field = SUPPLY_VOLTAGE.after(2);
    pub const PACKET_COUNT: Field = MOTOR_VOLTAGE.after(2);
    // One pad byte before the checksum
    pub const CHECKSUM: Field = PACKET_COUNT.after(1).after(1);

    const _: () = assert!(CHECKSUM.end() == super::STATUS_SIZE);
}

/// Converts a raw board temperature reading to degrees Celsius
pub fn convert_raw_temperature(raw: u16) -> f64 {
    0.0078125 * f64::from(raw as i16)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wg0xCommand {
    pub mode: Mode,
    pub digital_out: u8,
    pub programmed_pwm: i16,
    pub programmed_current: i16,
}

impl Wg0xCommand {
    /// Encodes the record including its trailing checksum
    pub fn encode(&self) -> [u8; COMMAND_SIZE] {
        let mut buf = [0u8; COMMAND_SIZE];
        command::MODE.put_u8(&mut buf, self.mode.bits());
        command::DIGITAL_OUT.put_u8(&mut buf, self.digital_out);
        command::PROGRAMMED_PWM.put_i16(&mut buf, self.programmed_pwm);
        command::PROGRAMMED_CURRENT.put_i16(&mut buf, self.programmed_current);
        let sum = trailing_checksum(&buf[..command::CHECKSUM.offset]);
        command::CHECKSUM.put_u8(&mut buf, sum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        super::ensure_len(buf, COMMAND_SIZE, "command record")?;
        Ok(Self {
            mode: Mode::from_bits_retain(command::MODE.u8(buf)),
            digital_out: command::DIGITAL_OUT.u8(buf),
            programmed_pwm: command::PROGRAMMED_PWM.i16(buf),
            programmed_current: command::PROGRAMMED_CURRENT.i16(buf),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wg0xStatus {
    pub mode: Mode,
    pub digital_out: u8,
    pub programmed_pwm: i16,
    pub programmed_current: i16,
    pub measured_current: i16,
    /// Free running microsecond counter, wraps every ~72 minutes
    pub timestamp: u32,
    pub encoder_count: i32,
    pub encoder_index_pos: i32,
    pub num_encoder_errors: u16,
    pub encoder_status: u8,
    pub calibration_reading: CalibrationReading,
    pub last_calibration_rising_edge: i32,
    pub last_calibration_falling_edge: i32,
    pub board_temperature: u16,
    pub bridge_temperature: u16,
    pub supply_voltage: u16,
    pub motor_voltage: i16,
    pub packet_count: u16,
}

impl Wg0xStatus {
    /// Decodes the fields; the trailing checksum is checked by the caller
    pub fn decode(buf: &[u8]) -> Result<Self> {
        super::ensure_len(buf, STATUS_SIZE, "status record")?;
        Ok(Self {
            mode: Mode::from_bits_retain(status::MODE.u8(buf)),
            digital_out: status::DIGITAL_OUT.u8(buf),
            programmed_pwm: status::PROGRAMMED_PWM.i16(buf),
            programmed_current: status::PROGRAMMED_CURRENT.i16(buf),
            measured_current: status::MEASURED_CURRENT.i16(buf),
            timestamp: status::TIMESTAMP.u32(buf),
            encoder_count: status::ENCODER_COUNT.i32(buf),
            encoder_index_pos: status::ENCODER_INDEX_POS.i32(buf),
            num_encoder_errors: status::NUM_ENCODER_ERRORS.u16(buf),
            encoder_status: status::ENCODER_STATUS.u8(buf),
            calibration_reading: CalibrationReading::from_bits_retain(
                status::CALIBRATION_READING.u8(buf),
            ),
            last_calibration_rising_edge: status::LAST_RISING_EDGE.i32(buf),
            last_calibration_falling_edge: status::LAST_FALLING_EDGE.i32(buf),
            board_temperature: status::BOARD_TEMPERATURE.u16(buf),
            bridge_temperature: status::BRIDGE_TEMPERATURE.u16(buf),
            supply_voltage: status::SUPPLY_VOLTAGE.u16(buf),
            motor_voltage: status::MOTOR_VOLTAGE.i16(buf),
            packet_count: status::PACKET_COUNT.u16(buf),
        })
    }

    /// Encodes the record the way the device sends it, checksum included
    pub fn encode(&self) -> [u8; STATUS_SIZE] {
        let mut buf = [0u8; STATUS_SIZE];
        status::MODE.put_u8(&mut buf, self.mode.bits());
        status::DIGITAL_OUT.put_u8(&mut buf, self.digital_out);
        status::PROGRAMMED_PWM.put_i16(&mut buf, self.programmed_pwm);
        status::PROGRAMMED_CURRENT.put_i16(&mut buf, self.programmed_current);
        status::MEASURED_CURRENT.put_i16(&mut buf, self.measured_current);
        status::TIMESTAMP.put_u32(&mut buf, self.timestamp);
        status::ENCODER_COUNT.put_i32(&mut buf, self.encoder_count);
        status::ENCODER_INDEX_POS.put_i32(&mut buf, self.encoder_index_pos);
        status::NUM_ENCODER_ERRORS.put_u16(&mut buf, self.num_encoder_errors);
        status::ENCODER_STATUS.put_u8(&mut buf, self.encoder_status);
        status::CALIBRATION_READING.put_u8(&mut buf, self.calibration_reading.bits());
        status::LAST_RISING_EDGE.put_i32(&mut buf, self.last_calibration_rising_edge);
        status::LAST_FALLING_EDGE.put_i32(&mut buf, self.last_calibration_falling_edge);
        status::BOARD_TEMPERATURE.put_u16(&mut buf, self.board_temperature);
        status::BRIDGE_TEMPERATURE.put_u16(&mut buf, self.bridge_temperature);
        status::SUPPLY_VOLTAGE.put_u16(&mut buf, self.supply_voltage);
        status::MOTOR_VOLTAGE.put_i16(&mut buf, self.motor_voltage);
        status::PACKET_COUNT.put_u16(&mut buf, self.packet_count);
        let sum = trailing_checksum(&buf[..status::CHECKSUM.offset]);
        status::CHECKSUM.put_u8(&mut buf, sum);
        buf
    }
}
