use std::sync::{Arc, Mutex};
use std::thread;

use wg0x::application::records::{
    ActuatorInfo, ConfigInfo, MotorHeatingModelEepromConfig, MotorHeatingModelParameters,
    CONFIG_INFO_BASE_ADDR, SAFETY_DISABLE_STATUS_BASE_ADDR, SafetyDisable, SafetyDisableStatus,
};
use wg0x::application::{AppRamStatus, CalibrationStatus, CycleFault, EepromConfig};
use wg0x::data_link::process_data::{Mode, Wg0xCommand, Wg0xStatus, STATUS_SIZE};
use wg0x::diagnostics::Level;
use wg0x::error::DriverError;
use wg0x::hardware_interface::HardwareInterface;
use wg0x::physical::mock::{Fault, MockSlave, Trigger};
use wg0x::transport::MailboxConfig;
use wg0x::types::{BusState, SlaveHandler, WG06_PRODUCT_CODE};
use wg0x::{Wg0x, Wg0xConfig};

const STATION: u16 = 0x1003;
const POSITION: u16 = 2;

fn config() -> Wg0xConfig {
    Wg0xConfig {
        mailbox: MailboxConfig {
            timeout_ms: 5,
            poll_interval_us: 10,
            ..Default::default()
        },
        eeprom: EepromConfig {
            poll_interval_us: 1,
            ..Default::default()
        },
        app_ram: AppRamStatus::Present,
        ..Default::default()
    }
}

fn blank_board() -> (Arc<SlaveHandler>, MockSlave) {
    let slave = Arc::new(SlaveHandler::new(
        STATION,
        POSITION,
        WG06_PRODUCT_CODE,
        1234,
        0x0301_0107,
    ));
    slave.set_state(BusState::SafeOp);
    let mut mock = MockSlave::new(STATION, POSITION);
    let config_info = ConfigInfo {
        product_id: 6805006,
        device_serial_number: 1234,
        absolute_current_limit: 1000,
        nominal_current_scale: 0.0078125,
        nominal_voltage_scale: 0.25,
        ..Default::default()
    };
    mock.write_local_bus(CONFIG_INFO_BASE_ADDR, &config_info.encode());
    (slave, mock)
}

fn actuator_info() -> ActuatorInfo {
    let mut info = ActuatorInfo::default();
    info.set_version(0, 2);
    info.set_name("r_wrist_flex_motor");
    info.set_robot_name("pr2");
    info.set_motor("Maxon", "310009");
    info.set_motor_constants(2.5, 141.0, 1.25, 0.0625);
    info.set_encoder(1.0, 1200);
    info.generate_crc();
    info
}

fn status(timestamp: u32, encoder_count: i32, mode: Mode) -> [u8; STATUS_SIZE] {
    Wg0xStatus {
        mode,
        timestamp,
        encoder_count,
        board_temperature: 3200,
        ..Default::default()
    }
    .encode()
}

fn programmed_board() -> (Arc<SlaveHandler>, MockSlave) {
    let (slave, mut mock) = blank_board();
    let mut dev = Wg0x::new(Arc::clone(&slave), config(), None).unwrap();
    dev.initialize(&mut mock, None, true).unwrap();
    dev.collector()
        .program_actuator_info(&mut mock, &actuator_info())
        .unwrap();
    (slave, mock)
}

#[test]
fn test_full_stack_program_then_bring_up() {
    let (slave, mut mock) = blank_board();

    let mut dev = Wg0x::new(Arc::clone(&slave), config(), None).unwrap();
    assert!(matches!(
        dev.initialize(&mut mock, None, false),
        Err(DriverError::NotProgrammed(POSITION))
    ));

    // A programming tool talks to the blank board
    let mut tool = Wg0x::new(Arc::clone(&slave), config(), None).unwrap();
    tool.initialize(&mut mock, None, true).unwrap();
    let collector = tool.collector();
    collector.program_actuator_info(&mut mock, &actuator_info()).unwrap();
    let params = MotorHeatingModelParameters {
        housing_to_ambient_thermal_resistance: 4.65,
        winding_to_housing_thermal_resistance: 1.93,
        winding_thermal_time_constant: 41.6,
        housing_thermal_time_constant: 1120.0,
        max_winding_temperature: 155.0,
    };
    collector
        .program_motor_heating_config(&mut mock, &MotorHeatingModelEepromConfig::new(params, true))
        .unwrap();

    let mut hw = HardwareInterface::new();
    let mut dev = Wg0x::new(slave, config(), None).unwrap();
    dev.initialize(&mut mock, Some(&mut hw), false).unwrap();
    assert_eq!(dev.name(), "r_wrist_flex_motor");
    assert_eq!(dev.max_current(), 2.5);
    assert!(hw.has_actuator("r_wrist_flex_motor"));
    assert_eq!(dev.actuator_info().motor_model(), "310009");
}

#[test]
fn test_full_stack_control_cycles() {
    let (slave, mut mock) = programmed_board();
    let mut dev = Wg0x::new(slave, config(), None).unwrap();
    dev.initialize(&mut mock, None, false).unwrap();
    dev.actuator_mut().command.enable = true;

    let mut prev = [0u8; STATUS_SIZE];
    for cycle in 0..50u32 {
        dev.actuator_mut().command.effort = 0.0625;
        let cmd = Wg0xCommand::decode(&dev.pack_command(false, false)).unwrap();
        assert_eq!(cmd.mode, Mode::ENABLE | Mode::CURRENT);
        // 1 A at 0.0078125 A per count
        assert_eq!(cmd.programmed_current, 128);

        let this = status(1000 * (cycle + 1), 12 * cycle as i32, Mode::ENABLE | Mode::CURRENT);
        dev.unpack_state(&this, &prev).unwrap();
        prev = this;
    }

    let state = &dev.actuator().state;
    assert!(!state.halted);
    assert_eq!(state.encoder_count, 12 * 49);
    assert!((state.timestamp - 0.049).abs() < 1e-9);
    assert_eq!(dev.cycle_state().drops, 0);
}

#[test]
fn test_full_stack_lossy_mailbox() {
    let (slave, mut mock) = programmed_board();
    let mut dev = Wg0x::new(slave, config(), None).unwrap();
    dev.initialize(&mut mock, None, false).unwrap();

    mock.inject(Trigger::MailboxResult, Fault::LoseResponse);
    dev.collector().collect_diagnostics(&mut mock).unwrap();
    assert_eq!(mock.pending_faults(), 0);

    let report = dev.monitor().publish();
    assert_eq!(report.level, Level::Ok);
    assert_eq!(report.mailbox.retries, 1);
    assert_eq!(report.mailbox.read_errors, 0);
}

#[test]
fn test_full_stack_lockout_and_recovery() {
    let (slave, mut mock) = programmed_board();
    let mut dev = Wg0x::new(slave, config(), None).unwrap();
    dev.initialize(&mut mock, None, false).unwrap();
    let hold = SafetyDisable::DISABLED | SafetyDisable::OVER_CURRENT;
    let safety = SafetyDisableStatus {
        safety_disable_status: hold.bits(),
        safety_disable_status_hold: hold.bits(),
        safety_disable_count: 1,
    };
    mock.write_local_bus(SAFETY_DISABLE_STATUS_BASE_ADDR, &safety.encode());

    let first = status(1000, 0, Mode::ENABLE | Mode::CURRENT);
    let lockout = status(2000, 0, Mode::SAFETY_LOCKOUT);
    dev.unpack_state(&first, &[0u8; STATUS_SIZE]).unwrap();
    assert_eq!(dev.unpack_state(&lockout, &first), Err(CycleFault::SafetyLockout));
    assert!(dev.actuator().state.halted);

    dev.collector().collect_diagnostics(&mut mock).unwrap();
    let mut monitor = dev.monitor();
    let report = monitor.publish();
    assert_eq!(report.level, Level::Error);
    assert_eq!(report.summary, "Safety Lockout: OVER_CURRENT");

    // Reset clears the lockout once the board leaves it
    dev.pack_command(false, true);
    let recovered = status(3000, 0, Mode::ENABLE | Mode::CURRENT);
    dev.unpack_state(&recovered, &lockout).unwrap();
    dev.pack_command(false, false);
    dev.unpack_state(&status(4000, 0, Mode::ENABLE | Mode::CURRENT), &recovered)
        .unwrap();
    assert!(!dev.has_error());
    assert!(!monitor.publish().cycle.in_lockout);
}

#[test]
fn test_full_stack_threads_share_board() {
    let (slave, mut mock) = programmed_board();
    let mut dev = Wg0x::new(slave, config(), None).unwrap();
    dev.initialize(&mut mock, None, false).unwrap();

    let mock = Arc::new(Mutex::new(mock));
    let collector = dev.collector();
    let mut monitor = dev.monitor();

    let bus = Arc::clone(&mock);
    let mailbox_thread = thread::spawn(move || {
        for _ in 0..5 {
            let mut com = bus.lock().unwrap();
            collector.collect_diagnostics(&mut *com).unwrap();
        }
    });

    let realtime_thread = thread::spawn(move || {
        let mut prev = [0u8; STATUS_SIZE];
        for cycle in 0..200u32 {
            if cycle == 100 {
                dev.actuator_mut().state.zero_offset = 0.5;
            }
            dev.pack_command(false, false);
            let this = status(1000 * (cycle + 1), 0, Mode::ENABLE);
            dev.unpack_state(&this, &prev).unwrap();
            prev = this;
        }
        dev
    });

    mailbox_thread.join().unwrap();
    let dev = realtime_thread.join().unwrap();
    assert_eq!(dev.calibration_status(), CalibrationStatus::ControllerCalibration);

    // The offset may have been handed over after the last collection
    let collector = dev.collector();
    let mut com = mock.lock().unwrap();
    collector.collect_diagnostics(&mut *com).unwrap();
    assert_eq!(collector.read_app_ram(&mut *com).unwrap(), Some(0.5));

    let report = monitor.publish();
    assert_eq!(report.level, Level::Ok);
    assert_eq!(report.collected.lock_errors, 0);
}
