use core::cell::RefCell;

use agv_core::utils::{
    config::{ImuConfig, RangingConfig},
    controllers::{
        imu::{self, AccelRange, CalibrationOffsets, MagnetometerModel, SensorHealth},
        ranging::{RangeReading, RangingError, RangingSession, RangingState},
    },
};
use critical_section as _;
use embedded_hal::i2c::ErrorKind;
use embedded_hal_mock::eh1::{
    delay::NoopDelay,
    i2c::{Mock as I2cMock, Transaction as I2cTrans},
};

/// I2C address of the time-of-flight ranging sensor.
pub const RANGE_ADDRESS: u8 = 0x29;
/// I2C address of the MPU6050.
pub const IMU_ADDRESS: u8 = 0x68;
/// I2C address of the HMC5883L.
pub const HMC_ADDRESS: u8 = 0x1E;

const STOP_VARIABLE: u8 = 0x3C;

/// Create a write transaction for the given I2C address and data payload.
pub fn write(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write(addr, data)
}
/// Create a write_read transaction for the given I2C address/payloads.
pub fn write_read(
    addr: u8,
    write: Vec<u8>,
    read: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write_read(addr, write, read)
}

/// Identity read plus stop-variable fetch.
fn ranging_init(model_id: u8) -> Vec<I2cTrans> {
    vec![
        write_read(RANGE_ADDRESS, vec![0xC0], vec![model_id]),
        write(RANGE_ADDRESS, vec![0x80, 0x01]),
        write(RANGE_ADDRESS, vec![0xFF, 0x01]),
        write(RANGE_ADDRESS, vec![0x00, 0x00]),
        write_read(RANGE_ADDRESS, vec![0x91], vec![STOP_VARIABLE]),
        write(RANGE_ADDRESS, vec![0x00, 0x01]),
        write(RANGE_ADDRESS, vec![0xFF, 0x00]),
        write(RANGE_ADDRESS, vec![0x80, 0x00]),
    ]
}

/// Single-shot start with the stored stop variable.
fn ranging_start() -> Vec<I2cTrans> {
    vec![
        write(RANGE_ADDRESS, vec![0x80, 0x01]),
        write(RANGE_ADDRESS, vec![0xFF, 0x01]),
        write(RANGE_ADDRESS, vec![0x00, 0x00]),
        write(RANGE_ADDRESS, vec![0x91, STOP_VARIABLE]),
        write(RANGE_ADDRESS, vec![0x00, 0x01]),
        write(RANGE_ADDRESS, vec![0xFF, 0x00]),
        write(RANGE_ADDRESS, vec![0x80, 0x00]),
        write(RANGE_ADDRESS, vec![0x00, 0x01]),
    ]
}

fn ranging_busy() -> I2cTrans {
    write_read(RANGE_ADDRESS, vec![0x00], vec![0x01])
}

fn ranging_ready(mm: u16) -> Vec<I2cTrans> {
    let [msb, lsb] = mm.to_be_bytes();
    vec![
        write_read(RANGE_ADDRESS, vec![0x00], vec![0x00]),
        write_read(RANGE_ADDRESS, vec![0x1E], vec![msb]),
        write_read(RANGE_ADDRESS, vec![0x1F], vec![lsb]),
        write(RANGE_ADDRESS, vec![0x0B, 0x01]),
    ]
}

#[test]
fn test_ranging_init_reads_stop_variable() {
    let expectations = ranging_init(0xEE);
    let mock = I2cMock::new(&expectations);
    let mut session = RangingSession::new(mock.clone(), &RangingConfig::default());
    session.init().unwrap();
    assert_eq!(session.state(), RangingState::Idle);
    mock.clone().done();
}

#[test]
fn test_ranging_identity_mismatch_is_reported() {
    let expectations = ranging_init(0xAB);
    let mock = I2cMock::new(&expectations);
    let mut session = RangingSession::new(mock.clone(), &RangingConfig::default());
    match session.init() {
        Err(RangingError::IdentityMismatch(0xAB)) => {}
        other => panic!("unexpected init result: {:?}", other),
    }
    mock.clone().done();
}

#[test]
fn test_ranging_full_cycle() {
    let mut expectations = ranging_init(0xEE);
    expectations.extend(ranging_start());
    expectations.push(ranging_busy());
    expectations.extend(ranging_ready(423));

    let mock = I2cMock::new(&expectations);
    let mut session = RangingSession::new(mock.clone(), &RangingConfig::default());
    session.init().unwrap();

    // Nothing happens before the first period has elapsed.
    assert_eq!(session.poll(0).unwrap(), RangingState::Idle);
    assert_eq!(session.poll(999).unwrap(), RangingState::Idle);

    assert_eq!(session.poll(1000).unwrap(), RangingState::Sampling);
    assert_eq!(session.poll(1030).unwrap(), RangingState::AwaitingResult);
    assert_eq!(session.poll(1040).unwrap(), RangingState::Idle);
    assert_eq!(session.reading(), Some(RangeReading::Millimeters(423)));
    assert_eq!(session.timeouts(), 0);

    // Next cycle is a full period after this one finished.
    assert_eq!(session.poll(2039).unwrap(), RangingState::Idle);
    mock.clone().done();
}

#[test]
fn test_ranging_timeout_returns_to_idle() {
    let mut expectations = ranging_init(0xEE);
    expectations.extend(ranging_start());
    // Busy at 1010, 1020, ..., 1110; the read at 1110 crosses the timeout.
    expectations.extend((0..11).map(|_| ranging_busy()));

    let mock = I2cMock::new(&expectations);
    let mut session = RangingSession::new(mock.clone(), &RangingConfig::default());
    session.init().unwrap();

    assert_eq!(session.poll(1000).unwrap(), RangingState::Sampling);
    for now in (1010..=1100).step_by(10) {
        assert_eq!(session.poll(now).unwrap(), RangingState::AwaitingResult);
    }
    assert_eq!(session.poll(1110).unwrap(), RangingState::Idle);
    assert_eq!(session.timeouts(), 1);
    assert_eq!(session.reading(), None);

    // Back to waiting out the period, no bus traffic.
    for now in (1120..=1150).step_by(10) {
        assert_eq!(session.poll(now).unwrap(), RangingState::Idle);
    }
    mock.clone().done();
}

#[test]
fn test_ranging_out_of_range_code() {
    let mut expectations = ranging_init(0xEE);
    expectations.extend(ranging_start());
    expectations.extend(ranging_ready(8190));

    let mock = I2cMock::new(&expectations);
    let mut session = RangingSession::new(mock.clone(), &RangingConfig::default());
    session.init().unwrap();

    session.poll(1000).unwrap();
    assert_eq!(session.poll(1001).unwrap(), RangingState::Idle);
    assert_eq!(session.reading(), Some(RangeReading::OutOfRange));
    mock.clone().done();
}

#[test]
fn test_ranging_bus_error_aborts_cycle() {
    let mut expectations = ranging_init(0xEE);
    // Cycle 1 fails on the third write of the start sequence.
    expectations.extend(ranging_start().into_iter().take(2));
    expectations.push(write(RANGE_ADDRESS, vec![0x00, 0x00]).with_error(ErrorKind::Other));
    // Cycle 2 starts one period later and fails on the status read.
    expectations.extend(ranging_start());
    expectations.push(
        write_read(RANGE_ADDRESS, vec![0x00], vec![0x00]).with_error(ErrorKind::Other),
    );
    // Cycle 3 completes normally.
    expectations.extend(ranging_start());
    expectations.extend(ranging_ready(250));

    let mock = I2cMock::new(&expectations);
    let mut session = RangingSession::new(mock.clone(), &RangingConfig::default());
    session.init().unwrap();

    assert!(matches!(session.poll(1000), Err(RangingError::Bus(_))));
    assert_eq!(session.state(), RangingState::Idle);
    assert_eq!(session.bus_errors(), 1);

    // No bus traffic until a full period after the failure.
    for now in (1010..2000).step_by(10) {
        assert_eq!(session.poll(now).unwrap(), RangingState::Idle);
    }

    assert_eq!(session.poll(2000).unwrap(), RangingState::Sampling);
    assert!(matches!(session.poll(2010), Err(RangingError::Bus(_))));
    assert_eq!(session.state(), RangingState::Idle);
    assert_eq!(session.bus_errors(), 2);
    assert_eq!(session.reading(), None);
    assert_eq!(session.poll(3009).unwrap(), RangingState::Idle);

    assert_eq!(session.poll(3010).unwrap(), RangingState::Sampling);
    assert_eq!(session.poll(3020).unwrap(), RangingState::Idle);
    assert_eq!(session.reading(), Some(RangeReading::Millimeters(250)));
    assert_eq!(session.timeouts(), 0);
    mock.clone().done();
}

fn imu_motion_init(who_am_i: u8) -> Vec<I2cTrans> {
    vec![
        write(IMU_ADDRESS, vec![0x6B, 0x00]),
        write_read(IMU_ADDRESS, vec![0x75], vec![who_am_i]),
        write(IMU_ADDRESS, vec![0x1A, 0x03]),
        write(IMU_ADDRESS, vec![0x19, 0x04]),
        write(IMU_ADDRESS, vec![0x1C, 0x00]),
        write(IMU_ADDRESS, vec![0x1B, 0x00]),
    ]
}

#[test]
fn test_init_sensors() {
    let mut expectations = imu_motion_init(0x68);
    expectations.extend([
        write_read(HMC_ADDRESS, vec![0x0A], vec![0x48]),
        write(HMC_ADDRESS, vec![0x00, 0x18]),
        write(HMC_ADDRESS, vec![0x01, 0x20]),
        write(HMC_ADDRESS, vec![0x02, 0x00]),
    ]);

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let health = imu::init_sensors(&i2c_bus, &ImuConfig::default(), &mut NoopDelay::new()).unwrap();
    assert_eq!(
        health,
        SensorHealth {
            motion: true,
            magnetic: true
        }
    );
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_init_sensors_degrades_on_identity_failure() {
    // Wrong magnetometer id: reported, left unconfigured, no further writes.
    let mut expectations = imu_motion_init(0x70);
    expectations.push(write_read(HMC_ADDRESS, vec![0x0A], vec![0x00]));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let health = imu::init_sensors(&i2c_bus, &ImuConfig::default(), &mut NoopDelay::new()).unwrap();
    assert_eq!(
        health,
        SensorHealth {
            motion: false,
            magnetic: false
        }
    );
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_init_sensors_qmc_variant() {
    let config = ImuConfig {
        magnetometer: MagnetometerModel::Qmc5883l,
        accel_range: AccelRange::G8,
        ..ImuConfig::default()
    };
    let mut expectations = imu_motion_init(0x68);
    expectations[4] = write(IMU_ADDRESS, vec![0x1C, 0x02 << 3]);
    expectations.extend([
        write_read(0x0D, vec![0x0D], vec![0xFF]),
        write(0x0D, vec![0x0B, 0x01]),
        write(0x0D, vec![0x09, 0x0D]),
    ]);

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let health = imu::init_sensors(&i2c_bus, &config, &mut NoopDelay::new()).unwrap();
    assert!(health.motion && health.magnetic);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_calibrate_averages_at_rest() {
    // accel (100, -50, 1 g + 20), temp 0, gyro (5, -3, 7)
    let mut burst = Vec::new();
    for v in [100i16, -50, 16384 + 20, 0, 5, -3, 7] {
        burst.extend_from_slice(&v.to_be_bytes());
    }
    let expectations: Vec<I2cTrans> = (0..imu::CALIBRATION_SAMPLES)
        .map(|_| write_read(IMU_ADDRESS, vec![0x3B], burst.clone()))
        .collect();

    let mut mock = I2cMock::new(&expectations);
    let offsets = imu::calibrate(&mut mock, AccelRange::G2, &mut NoopDelay::new()).unwrap();
    assert_eq!(
        offsets,
        CalibrationOffsets {
            accel: [100, -50, 20],
            gyro: [5, -3, 7],
        }
    );
    mock.done();
}
