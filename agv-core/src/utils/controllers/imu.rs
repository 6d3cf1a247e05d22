//! Inertial sampling over a shared I2C bus.
//!
//! An MPU6050 (accelerometer, gyroscope, die temperature) and a magnetometer
//! (HMC5883L or QMC5883L) hang off the same bus. Only one DMA burst can be in
//! flight, so the pipeline ping-pongs between them: every transfer-complete
//! event parses the finished burst, immediately starts the burst for the other
//! sensor, then flips the alternation flag. The bus never waits on software and
//! both sensors run at half the single-sensor rate.
//!
//! Initialization and the averaging calibration use plain blocking register
//! access through [`embedded_hal::i2c::I2c`]. They run before the superloop
//! starts and never inside it.

use core::cell::RefCell;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;
use serde::{Deserialize, Serialize};

use crate::utils::{config::ImuConfig, handoff::EventFlag};

pub const MPU6050_ADDRESS: u8 = 0x68;
pub const MPU6050_WHO_AM_I_VALUE: u8 = 0x68;
/// Accel (6) + temperature (2) + gyro (6).
pub const MOTION_BURST_LEN: usize = 14;
pub const MAGNETIC_BURST_LEN: usize = 6;

pub mod regs {
    pub const MPU6050_SMPLRT_DIV: u8 = 0x19;
    pub const MPU6050_CONFIG: u8 = 0x1A;
    pub const MPU6050_GYRO_CONFIG: u8 = 0x1B;
    pub const MPU6050_ACCEL_CONFIG: u8 = 0x1C;
    pub const MPU6050_ACCEL_XOUT_H: u8 = 0x3B;
    pub const MPU6050_PWR_MGMT_1: u8 = 0x6B;
    pub const MPU6050_WHO_AM_I: u8 = 0x75;

    pub const HMC5883L_CONFIG_A: u8 = 0x00;
    pub const HMC5883L_CONFIG_B: u8 = 0x01;
    pub const HMC5883L_MODE: u8 = 0x02;
    pub const HMC5883L_DATA_X_MSB: u8 = 0x03;
    pub const HMC5883L_ID_REG_A: u8 = 0x0A;
    /// 75 Hz output rate, normal measurement.
    pub const HMC5883L_CONFIG_A_75HZ: u8 = 0x18;
    /// ±1.3 Ga.
    pub const HMC5883L_CONFIG_B_1_3GA: u8 = 0x20;
    pub const HMC5883L_MODE_CONTINUOUS: u8 = 0x00;

    pub const QMC5883L_DATA_X_LSB: u8 = 0x00;
    pub const QMC5883L_CONTROL_1: u8 = 0x09;
    pub const QMC5883L_SET_RESET_PERIOD: u8 = 0x0B;
    pub const QMC5883L_CHIP_ID: u8 = 0x0D;
    /// Continuous mode, 200 Hz, ±2 G, 512x oversampling.
    pub const QMC5883L_CONTROL_1_VALUE: u8 = 0x01 | (0x03 << 2);
}

/// Accelerometer full-scale range (`ACCEL_CONFIG.AFS_SEL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    pub const fn fs_sel(self) -> u8 {
        self as u8
    }

    /// LSB per g.
    pub const fn sensitivity(self) -> f32 {
        match self {
            AccelRange::G2 => 16384.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G16 => 2048.0,
        }
    }

    /// Raw reading of a 1 g axis.
    pub const fn one_g(self) -> i32 {
        match self {
            AccelRange::G2 => 16384,
            AccelRange::G4 => 8192,
            AccelRange::G8 => 4096,
            AccelRange::G16 => 2048,
        }
    }

    /// Offsets measured on the robot's own board at each range.
    const fn measured_offsets(self) -> [i16; 3] {
        match self {
            AccelRange::G2 => [1391, -708, -2544],
            AccelRange::G4 => [698, -363, -1272],
            AccelRange::G8 => [348, -181, -636],
            AccelRange::G16 => [172, -90, -319],
        }
    }
}

/// Gyroscope full-scale range (`GYRO_CONFIG.FS_SEL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl GyroRange {
    pub const fn fs_sel(self) -> u8 {
        self as u8
    }

    /// LSB per deg/s.
    pub const fn sensitivity(self) -> f32 {
        match self {
            GyroRange::Dps250 => 131.0,
            GyroRange::Dps500 => 65.5,
            GyroRange::Dps1000 => 32.8,
            GyroRange::Dps2000 => 16.4,
        }
    }

    const fn measured_offsets(self) -> [i16; 3] {
        match self {
            GyroRange::Dps250 => [-414, -50, 96],
            GyroRange::Dps500 => [-207, -24, 47],
            GyroRange::Dps1000 => [-104, -12, 23],
            GyroRange::Dps2000 => [-54, -6, 11],
        }
    }
}

/// Magnetometer fitted next to the MPU6050.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MagnetometerModel {
    Hmc5883l,
    Qmc5883l,
}

impl MagnetometerModel {
    pub const fn address(self) -> u8 {
        match self {
            MagnetometerModel::Hmc5883l => 0x1E,
            MagnetometerModel::Qmc5883l => 0x0D,
        }
    }

    pub const fn data_register(self) -> u8 {
        match self {
            MagnetometerModel::Hmc5883l => regs::HMC5883L_DATA_X_MSB,
            MagnetometerModel::Qmc5883l => regs::QMC5883L_DATA_X_LSB,
        }
    }

    const fn id_register(self) -> u8 {
        match self {
            MagnetometerModel::Hmc5883l => regs::HMC5883L_ID_REG_A,
            MagnetometerModel::Qmc5883l => regs::QMC5883L_CHIP_ID,
        }
    }

    const fn expected_id(self) -> u8 {
        match self {
            MagnetometerModel::Hmc5883l => 0x48,
            MagnetometerModel::Qmc5883l => 0xFF,
        }
    }

    /// LSB per gauss at the configured range.
    pub const fn sensitivity(self) -> f32 {
        match self {
            MagnetometerModel::Hmc5883l => 1090.0,
            MagnetometerModel::Qmc5883l => 12000.0,
        }
    }

    /// Decode a 6-byte data burst into gauss.
    ///
    /// The HMC5883L stores big-endian X, Z, Y; the QMC5883L little-endian X, Y, Z.
    pub fn parse(
        self,
        raw: &[u8; MAGNETIC_BURST_LEN],
    ) -> Vector3 {
        let s = self.sensitivity();
        match self {
            MagnetometerModel::Hmc5883l => Vector3 {
                x: be_i16(raw, 0) as f32 / s,
                z: be_i16(raw, 2) as f32 / s,
                y: be_i16(raw, 4) as f32 / s,
            },
            MagnetometerModel::Qmc5883l => Vector3 {
                x: i16::from_le_bytes([raw[0], raw[1]]) as f32 / s,
                y: i16::from_le_bytes([raw[2], raw[3]]) as f32 / s,
                z: i16::from_le_bytes([raw[4], raw[5]]) as f32 / s,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Raw-count offsets subtracted before scaling. Fixed after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationOffsets {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

impl CalibrationOffsets {
    /// Empirical offsets for the configured ranges.
    pub const fn from_table(
        accel: AccelRange,
        gyro: GyroRange,
    ) -> Self {
        Self {
            accel: accel.measured_offsets(),
            gyro: gyro.measured_offsets(),
        }
    }
}

/// Latest calibrated reading of both sensors. Overwritten in place.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    /// g
    pub accel: Vector3,
    /// deg/s
    pub gyro: Vector3,
    /// gauss
    pub mag: Vector3,
    /// °C
    pub temperature: f32,
}

/// Which physical sensor owns the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSlot {
    Motion,
    Magnetic,
}

impl SensorSlot {
    pub const fn other(self) -> Self {
        match self {
            SensorSlot::Motion => SensorSlot::Magnetic,
            SensorSlot::Magnetic => SensorSlot::Motion,
        }
    }
}

/// Non-blocking register burst read, completed by the bus DMA.
///
/// Completion is signalled out of band: the transfer-complete interrupt
/// raises an [`EventFlag`].
pub trait BurstRead {
    type Error: core::fmt::Debug;

    /// Start reading `len` bytes from `register` of the device at `address`.
    fn start_read(
        &mut self,
        address: u8,
        register: u8,
        len: usize,
    ) -> Result<(), Self::Error>;

    /// Bytes of the most recently completed transfer.
    fn completed(&self) -> &[u8];
}

#[derive(Debug)]
pub enum ImuError<E: core::fmt::Debug> {
    Bus(E),
    IdentityMismatch { sensor: SensorSlot, id: u8 },
    ShortTransfer { expected: usize, got: usize },
}

/// Identity check results from [`init_sensors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorHealth {
    pub motion: bool,
    pub magnetic: bool,
}

#[inline]
fn be_i16(
    raw: &[u8],
    at: usize,
) -> i16 {
    i16::from_be_bytes([raw[at], raw[at + 1]])
}

/// Decode a 14-byte MPU6050 burst into (accel g, gyro deg/s, temperature °C).
pub fn parse_motion(
    raw: &[u8; MOTION_BURST_LEN],
    offsets: &CalibrationOffsets,
    accel_range: AccelRange,
    gyro_range: GyroRange,
) -> (Vector3, Vector3, f32) {
    let axis = |at: usize, offset: i16, sens: f32| {
        (be_i16(raw, at) as i32 - offset as i32) as f32 / sens
    };
    let a = accel_range.sensitivity();
    let g = gyro_range.sensitivity();
    let accel = Vector3 {
        x: axis(0, offsets.accel[0], a),
        y: axis(2, offsets.accel[1], a),
        z: axis(4, offsets.accel[2], a),
    };
    let temperature = be_i16(raw, 6) as f32 / 340.0 + 36.53;
    let gyro = Vector3 {
        x: axis(8, offsets.gyro[0], g),
        y: axis(10, offsets.gyro[1], g),
        z: axis(12, offsets.gyro[2], g),
    };
    (accel, gyro, temperature)
}

/// Alternating DMA sampler for the two sensors.
pub struct ImuPipeline<B> {
    bus: B,
    accel_range: AccelRange,
    gyro_range: GyroRange,
    magnetometer: MagnetometerModel,
    offsets: CalibrationOffsets,
    current: SensorSlot,
    /// Set when the burst for `current` failed to start; nothing is in flight.
    stalled: bool,
    sample: ImuSample,
    motion_samples: u32,
    magnetic_samples: u32,
}

impl<B> ImuPipeline<B>
where
    B: BurstRead,
{
    pub fn new(
        bus: B,
        config: &ImuConfig,
        offsets: CalibrationOffsets,
    ) -> Self {
        Self {
            bus,
            accel_range: config.accel_range,
            gyro_range: config.gyro_range,
            magnetometer: config.magnetometer,
            offsets,
            current: SensorSlot::Motion,
            stalled: false,
            sample: ImuSample::default(),
            motion_samples: 0,
            magnetic_samples: 0,
        }
    }

    /// Issue the first burst. Called once before the superloop starts.
    ///
    /// On failure the burst stays owed and [`ImuPipeline::poll`] retries it.
    pub fn start(&mut self) -> Result<(), ImuError<B::Error>> {
        self.issue_current()
    }

    fn issue_current(&mut self) -> Result<(), ImuError<B::Error>> {
        let (address, register, len) = match self.current {
            SensorSlot::Motion => (
                MPU6050_ADDRESS,
                regs::MPU6050_ACCEL_XOUT_H,
                MOTION_BURST_LEN,
            ),
            SensorSlot::Magnetic => (
                self.magnetometer.address(),
                self.magnetometer.data_register(),
                MAGNETIC_BURST_LEN,
            ),
        };
        let result = self
            .bus
            .start_read(address, register, len)
            .map_err(ImuError::Bus);
        self.stalled = result.is_err();
        result
    }

    /// Loop side: service a transfer-complete event if one is pending.
    ///
    /// Returns the sensor whose sample was updated. When no burst is in
    /// flight because the last start failed, the start is retried instead.
    pub fn poll(
        &mut self,
        done: &EventFlag,
    ) -> Result<Option<SensorSlot>, ImuError<B::Error>> {
        if done.take() {
            return self.on_transfer_complete().map(Some);
        }
        if self.stalled {
            self.issue_current()?;
            tracing::debug!(slot = ?self.current, "IMU burst restarted");
        }
        Ok(None)
    }

    /// Parse the finished burst, start the other sensor's burst, flip.
    ///
    /// A short or failed transfer still hands the bus to the other sensor so
    /// the alternation never stalls.
    pub fn on_transfer_complete(&mut self) -> Result<SensorSlot, ImuError<B::Error>> {
        let finished = self.current;
        let parsed = self.parse_completed(finished);
        self.current = finished.other();
        let issued = self.issue_current();
        parsed?;
        issued?;
        Ok(finished)
    }

    fn parse_completed(
        &mut self,
        slot: SensorSlot,
    ) -> Result<(), ImuError<B::Error>> {
        let raw = self.bus.completed();
        match slot {
            SensorSlot::Motion => {
                let raw: &[u8; MOTION_BURST_LEN] = raw
                    .get(..MOTION_BURST_LEN)
                    .and_then(|r| r.try_into().ok())
                    .ok_or(ImuError::ShortTransfer {
                        expected: MOTION_BURST_LEN,
                        got: raw.len(),
                    })?;
                let (accel, gyro, temperature) =
                    parse_motion(raw, &self.offsets, self.accel_range, self.gyro_range);
                self.sample.accel = accel;
                self.sample.gyro = gyro;
                self.sample.temperature = temperature;
                self.motion_samples = self.motion_samples.wrapping_add(1);
            }
            SensorSlot::Magnetic => {
                let raw: &[u8; MAGNETIC_BURST_LEN] = raw
                    .get(..MAGNETIC_BURST_LEN)
                    .and_then(|r| r.try_into().ok())
                    .ok_or(ImuError::ShortTransfer {
                        expected: MAGNETIC_BURST_LEN,
                        got: raw.len(),
                    })?;
                self.sample.mag = self.magnetometer.parse(raw);
                self.magnetic_samples = self.magnetic_samples.wrapping_add(1);
            }
        }
        Ok(())
    }

    pub fn sample(&self) -> &ImuSample {
        &self.sample
    }

    /// Sensor the in-flight burst belongs to.
    pub fn current(&self) -> SensorSlot {
        self.current
    }

    /// True while the burst for [`ImuPipeline::current`] is still owed.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// (motion, magnetic) samples parsed so far.
    pub fn sample_counts(&self) -> (u32, u32) {
        (self.motion_samples, self.magnetic_samples)
    }

    pub fn offsets(&self) -> &CalibrationOffsets {
        &self.offsets
    }
}

fn write_reg<I: I2c>(
    i2c: &mut I,
    address: u8,
    reg: u8,
    value: u8,
) -> Result<(), I::Error> {
    i2c.write(address, &[reg, value])
}

fn read_reg<I: I2c>(
    i2c: &mut I,
    address: u8,
    reg: u8,
) -> Result<u8, I::Error> {
    let mut buf = [0u8; 1];
    i2c.write_read(address, &[reg], &mut buf)?;
    Ok(buf[0])
}

/// Blocking bring-up of both sensors on the shared bus.
///
/// A sensor that fails its identity check is reported and left unconfigured;
/// the robot keeps running on whatever still works.
pub fn init_sensors<I, D>(
    bus: &RefCell<I>,
    config: &ImuConfig,
    delay: &mut D,
) -> Result<SensorHealth, ImuError<I::Error>>
where
    I: I2c,
    D: DelayNs,
{
    let mut mpu = RefCellDevice::new(bus);
    let mut mag = RefCellDevice::new(bus);

    let motion = init_motion(&mut mpu, config, delay)?;
    let magnetic = init_magnetometer(&mut mag, config.magnetometer, delay)?;
    Ok(SensorHealth { motion, magnetic })
}

fn init_motion<I, D>(
    i2c: &mut I,
    config: &ImuConfig,
    delay: &mut D,
) -> Result<bool, ImuError<I::Error>>
where
    I: I2c,
    D: DelayNs,
{
    let a = MPU6050_ADDRESS;
    write_reg(i2c, a, regs::MPU6050_PWR_MGMT_1, 0x00).map_err(ImuError::Bus)?;
    delay.delay_ms(100);

    let who = read_reg(i2c, a, regs::MPU6050_WHO_AM_I).map_err(ImuError::Bus)?;
    let ok = who == MPU6050_WHO_AM_I_VALUE;
    if ok {
        tracing::info!("MPU6050 identity OK");
    } else {
        tracing::error!("MPU6050 identity check failed: WHO_AM_I = 0x{:02X}", who);
    }

    write_reg(i2c, a, regs::MPU6050_CONFIG, config.dlpf_cfg).map_err(ImuError::Bus)?;
    write_reg(i2c, a, regs::MPU6050_SMPLRT_DIV, config.sample_rate_div).map_err(ImuError::Bus)?;
    write_reg(i2c, a, regs::MPU6050_ACCEL_CONFIG, config.accel_range.fs_sel() << 3)
        .map_err(ImuError::Bus)?;
    write_reg(i2c, a, regs::MPU6050_GYRO_CONFIG, config.gyro_range.fs_sel() << 3)
        .map_err(ImuError::Bus)?;
    Ok(ok)
}

fn init_magnetometer<I, D>(
    i2c: &mut I,
    model: MagnetometerModel,
    delay: &mut D,
) -> Result<bool, ImuError<I::Error>>
where
    I: I2c,
    D: DelayNs,
{
    let a = model.address();
    let id = read_reg(i2c, a, model.id_register()).map_err(ImuError::Bus)?;
    delay.delay_ms(10);
    if id != model.expected_id() {
        tracing::error!("{:?} identity check failed: ID = 0x{:02X}", model, id);
        return Ok(false);
    }
    tracing::info!("{:?} identity OK", model);

    let writes: &[(u8, u8)] = match model {
        MagnetometerModel::Hmc5883l => &[
            (regs::HMC5883L_CONFIG_A, regs::HMC5883L_CONFIG_A_75HZ),
            (regs::HMC5883L_CONFIG_B, regs::HMC5883L_CONFIG_B_1_3GA),
            (regs::HMC5883L_MODE, regs::HMC5883L_MODE_CONTINUOUS),
        ],
        MagnetometerModel::Qmc5883l => &[
            (regs::QMC5883L_SET_RESET_PERIOD, 0x01),
            (regs::QMC5883L_CONTROL_1, regs::QMC5883L_CONTROL_1_VALUE),
        ],
    };
    for &(reg, value) in writes {
        write_reg(i2c, a, reg, value).map_err(ImuError::Bus)?;
        delay.delay_ms(10);
    }
    Ok(true)
}

/// Samples averaged by [`calibrate`].
pub const CALIBRATION_SAMPLES: u16 = 2000;

/// Measure offsets by averaging the sensor at rest, Z axis up.
///
/// Blocks for roughly 11 s (1 s settle, then 2000 reads 5 ms apart). Run it
/// only from an explicit calibration step, never from the superloop.
pub fn calibrate<I, D>(
    i2c: &mut I,
    accel_range: AccelRange,
    delay: &mut D,
) -> Result<CalibrationOffsets, I::Error>
where
    I: I2c,
    D: DelayNs,
{
    let mut accel_sum = [0i32; 3];
    let mut gyro_sum = [0i32; 3];
    let mut buf = [0u8; MOTION_BURST_LEN];

    delay.delay_ms(1000);
    for _ in 0..CALIBRATION_SAMPLES {
        i2c.write_read(MPU6050_ADDRESS, &[regs::MPU6050_ACCEL_XOUT_H], &mut buf)?;
        for axis in 0..3 {
            accel_sum[axis] += be_i16(&buf, axis * 2) as i32;
            gyro_sum[axis] += be_i16(&buf, 8 + axis * 2) as i32;
        }
        delay.delay_ms(5);
    }

    let n = CALIBRATION_SAMPLES as i32;
    let narrow = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    let mut offsets = CalibrationOffsets {
        accel: accel_sum.map(|s| narrow(s / n)),
        gyro: gyro_sum.map(|s| narrow(s / n)),
    };
    offsets.accel[2] = narrow(accel_sum[2] / n - accel_range.one_g());
    tracing::info!(?offsets, "IMU calibration complete");
    Ok(offsets)
}
