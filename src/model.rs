//! Interfaces to the motor models fed once per cycle.
//!
//! The electrical model checks measured current and voltage against what was
//! commanded; the heating model integrates winding temperature and may halt
//! the motor when it overheats. Their internals live outside this crate.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::application::records::{ActuatorInfo, MotorHeatingModelParameters};
use crate::error::Result;

/// One cycle of motor data
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorTraceSample {
    pub timestamp: f64,
    pub enabled: bool,
    pub supply_voltage: f64,
    pub measured_motor_voltage: f64,
    /// PWM duty ratio, -1.0 to 1.0
    pub programmed_pwm: f64,
    pub executed_current: f64,
    pub measured_current: f64,
    pub velocity: f64,
    pub encoder_position: f64,
    pub encoder_error_count: u32,
}

/// Electrical motor model
pub trait MotorModel: Send {
    fn sample(&mut self, sample: &MotorTraceSample);

    /// Publishes a previously flagged trace once its delay has passed
    fn check_publish(&mut self);

    /// False when the motor no longer behaves like the model
    fn verify(&mut self) -> bool;

    fn flag_publish(&mut self, reason: &str, level: u8, delay: u32);

    fn reset(&mut self);
}

/// Winding temperature model
pub trait MotorHeatingModel: Send {
    fn initialize(&mut self) -> Result<()>;

    /// Restores the temperature saved by a previous run
    fn load_temperature_state(&mut self) -> Result<()>;

    fn update(
        &mut self,
        sample: &MotorTraceSample,
        actuator: &ActuatorInfo,
        ambient_temperature: f64,
        duration: f64,
    );

    fn has_overheated(&self) -> bool;

    fn reset(&mut self);
}

/// Builds a heating model from EEPROM parameters, actuator name, hardware id
/// and save directory
pub type HeatingModelFactory = Box<
    dyn Fn(&MotorHeatingModelParameters, &str, &str, &Path) -> Box<dyn MotorHeatingModel>
        + Send
        + Sync,
>;

/// Heating model settings shared by every board of a process
pub struct MotorHeatingModelCommon {
    /// Keep driving an overheated motor
    pub disable_halt: bool,
    pub load_save_files: bool,
    pub save_directory: PathBuf,
    factory: HeatingModelFactory,
}

impl fmt::Debug for MotorHeatingModelCommon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotorHeatingModelCommon")
            .field("disable_halt", &self.disable_halt)
            .field("load_save_files", &self.load_save_files)
            .field("save_directory", &self.save_directory)
            .finish_non_exhaustive()
    }
}

impl MotorHeatingModelCommon {
    pub fn new(save_directory: impl Into<PathBuf>, factory: HeatingModelFactory) -> Self {
        Self {
            disable_halt: false,
            load_save_files: true,
            save_directory: save_directory.into(),
            factory,
        }
    }

    pub fn build(
        &self,
        params: &MotorHeatingModelParameters,
        actuator_name: &str,
        hardware_id: &str,
    ) -> Box<dyn MotorHeatingModel> {
        (self.factory)(params, actuator_name, hardware_id, self.save_directory.as_path())
    }
}
