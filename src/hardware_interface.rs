//! Handles exposed to the controllers.

use std::collections::HashSet;

use crate::error::{DriverError, Result};

/// Actuator state derived from one status frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActuatorState {
    /// Accumulated sample time in seconds
    pub timestamp: f64,
    /// Ring position of the board
    pub device_id: u16,

    pub encoder_count: i32,
    pub position: f64,
    /// Ticks per second
    pub encoder_velocity: f64,
    /// Radians per second
    pub velocity: f64,
    pub zero_offset: f64,

    pub calibration_reading: bool,
    pub calibration_rising_edge_valid: bool,
    pub calibration_falling_edge_valid: bool,
    pub last_calibration_rising_edge: f64,
    pub last_calibration_falling_edge: f64,

    pub is_enabled: bool,
    pub halted: bool,

    pub last_commanded_current: f64,
    pub last_executed_current: f64,
    pub last_measured_current: f64,
    pub last_commanded_effort: f64,
    pub last_executed_effort: f64,
    pub last_measured_effort: f64,
    pub max_effort: f64,

    pub motor_voltage: f64,
    pub num_encoder_errors: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuatorCommand {
    pub enable: bool,
    /// Torque at the joint side of the reduction
    pub effort: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Actuator {
    pub name: String,
    pub state: ActuatorState,
    pub command: ActuatorCommand,
}

impl Actuator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DigitalOut {
    pub name: String,
    pub command: u8,
    /// Value read back from the board
    pub state: u8,
}

impl DigitalOut {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Names claimed by the boards on one ring
#[derive(Debug, Default)]
pub struct HardwareInterface {
    actuators: HashSet<String>,
    digital_outs: HashSet<String>,
}

impl HardwareInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_actuator(&mut self, name: &str) -> Result<()> {
        if !self.actuators.insert(name.to_string()) {
            return Err(DriverError::DuplicateName(format!("actuator {}", name)));
        }
        Ok(())
    }

    pub fn register_digital_out(&mut self, name: &str) -> Result<()> {
        if !self.digital_outs.insert(name.to_string()) {
            return Err(DriverError::DuplicateName(format!("digital out {}", name)));
        }
        Ok(())
    }

    pub fn has_actuator(&self, name: &str) -> bool {
        self.actuators.contains(name)
    }

    pub fn has_digital_out(&self, name: &str) -> bool {
        self.digital_outs.contains(name)
    }
}
