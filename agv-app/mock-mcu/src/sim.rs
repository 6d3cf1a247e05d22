//! Simulated board peripherals for running the superloop on a host.

use std::{thread, time::Duration};

use agv_core::utils::{
    config::ImuConfig,
    controllers::{
        imu::{
            regs, BurstRead, CalibrationOffsets, MagnetometerModel, MAGNETIC_BURST_LEN,
            MOTION_BURST_LEN, MPU6050_ADDRESS,
        },
        ranging::VL53L0X_ADDRESS,
    },
    handoff::EventFlag,
    math::kinematics::Wheel,
};
use embedded_hal::{
    delay::DelayNs,
    digital,
    i2c::{self, ErrorKind, NoAcknowledgeSource, Operation},
    pwm,
};
use tracing::{debug, info, trace};

const NACK: ErrorKind = ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address);

/// MPU6050 burst of a board lying flat and still: calibration offsets plus
/// 1 g on Z, so calibrated output reads (0, 0, 1) g and zero rate.
pub fn resting_motion_burst(config: &ImuConfig) -> [u8; MOTION_BURST_LEN] {
    let offsets = CalibrationOffsets::from_table(config.accel_range, config.gyro_range);
    let one_g = config.accel_range.one_g() as i16;
    let words = [
        offsets.accel[0],
        offsets.accel[1],
        offsets.accel[2].saturating_add(one_g),
        // 25 °C
        ((25.0 - 36.53) * 340.0) as i16,
        offsets.gyro[0],
        offsets.gyro[1],
        offsets.gyro[2],
    ];
    let mut raw = [0u8; MOTION_BURST_LEN];
    for (chunk, word) in raw.chunks_exact_mut(2).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    raw
}

/// Earth field of roughly (0.2, 0.05, -0.4) gauss in the model's byte order.
pub fn magnetic_burst(model: MagnetometerModel) -> [u8; MAGNETIC_BURST_LEN] {
    let s = model.sensitivity();
    let (x, y, z) = ((0.2 * s) as i16, (0.05 * s) as i16, (-0.4 * s) as i16);
    let mut raw = [0u8; MAGNETIC_BURST_LEN];
    match model {
        MagnetometerModel::Hmc5883l => {
            raw[0..2].copy_from_slice(&x.to_be_bytes());
            raw[2..4].copy_from_slice(&z.to_be_bytes());
            raw[4..6].copy_from_slice(&y.to_be_bytes());
        }
        MagnetometerModel::Qmc5883l => {
            raw[0..2].copy_from_slice(&x.to_le_bytes());
            raw[2..4].copy_from_slice(&y.to_le_bytes());
            raw[4..6].copy_from_slice(&z.to_le_bytes());
        }
    }
    raw
}

/// VL53L0X register file answering a fixed distance.
pub struct SimRangeBus {
    range_mm: u16,
    pointer: u8,
    busy_polls: u8,
}

impl SimRangeBus {
    const STOP_VARIABLE: u8 = 0x3C;
    /// Status reads that report "busy" after each start.
    const MEASUREMENT_POLLS: u8 = 3;

    pub fn new(range_mm: u16) -> Self {
        Self {
            range_mm,
            pointer: 0,
            busy_polls: 0,
        }
    }

    fn read_register(
        &mut self,
        reg: u8,
    ) -> u8 {
        let [msb, lsb] = self.range_mm.to_be_bytes();
        match reg {
            0xC0 => 0xEE,
            0x91 => Self::STOP_VARIABLE,
            0x00 if self.busy_polls > 0 => {
                self.busy_polls -= 1;
                0x01
            }
            0x1E => msb,
            0x1F => lsb,
            _ => 0x00,
        }
    }

    fn write_register(
        &mut self,
        reg: u8,
        value: u8,
    ) {
        trace!(reg, value, "VL53L0X write");
        if reg == 0x00 && value & 0x01 != 0 {
            self.busy_polls = Self::MEASUREMENT_POLLS;
        }
    }
}

impl i2c::ErrorType for SimRangeBus {
    type Error = ErrorKind;
}

impl i2c::I2c for SimRangeBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != VL53L0X_ADDRESS {
            return Err(NACK);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let Some((&reg, values)) = bytes.split_first() {
                        self.pointer = reg;
                        for (i, &value) in values.iter().enumerate() {
                            self.write_register(reg.wrapping_add(i as u8), value);
                        }
                    }
                }
                Operation::Read(buf) => {
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = self.read_register(self.pointer.wrapping_add(i as u8));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Blocking view of the inertial bus, used for bring-up and calibration.
pub struct SimImuBus {
    config: ImuConfig,
    pointer: u8,
}

impl SimImuBus {
    pub fn new(config: ImuConfig) -> Self {
        Self { config, pointer: 0 }
    }

    fn read_into(
        &self,
        address: u8,
        buf: &mut [u8],
    ) -> Result<(), ErrorKind> {
        let model = self.config.magnetometer;
        let motion = resting_motion_burst(&self.config);
        let source: &[u8] = match (address, self.pointer) {
            (MPU6050_ADDRESS, regs::MPU6050_ACCEL_XOUT_H) => &motion,
            (MPU6050_ADDRESS, regs::MPU6050_WHO_AM_I) => &[0x68],
            (a, regs::HMC5883L_ID_REG_A)
                if a == model.address() && model == MagnetometerModel::Hmc5883l =>
            {
                &[0x48]
            }
            (a, regs::QMC5883L_CHIP_ID)
                if a == model.address() && model == MagnetometerModel::Qmc5883l =>
            {
                &[0xFF]
            }
            (MPU6050_ADDRESS, _) => &[0x00],
            (a, _) if a == model.address() => &[0x00],
            _ => return Err(NACK),
        };
        for (dst, src) in buf.iter_mut().zip(source.iter().chain(core::iter::repeat(&0))) {
            *dst = *src;
        }
        Ok(())
    }
}

impl i2c::ErrorType for SimImuBus {
    type Error = ErrorKind;
}

impl i2c::I2c for SimImuBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let Some((&reg, values)) = bytes.split_first() {
                        self.pointer = reg;
                        if !values.is_empty() {
                            debug!(address, reg, ?values, "IMU register write");
                        }
                    }
                }
                Operation::Read(buf) => self.read_into(address, buf)?,
            }
        }
        Ok(())
    }
}

/// Burst bus whose transfers complete the moment they start.
pub struct SimBurst {
    done: &'static EventFlag,
    motion: [u8; MOTION_BURST_LEN],
    magnetic: [u8; MAGNETIC_BURST_LEN],
    magnetometer: MagnetometerModel,
    last: heapless::Vec<u8, MOTION_BURST_LEN>,
}

impl SimBurst {
    pub fn new(
        done: &'static EventFlag,
        config: &ImuConfig,
    ) -> Self {
        Self {
            done,
            motion: resting_motion_burst(config),
            magnetic: magnetic_burst(config.magnetometer),
            magnetometer: config.magnetometer,
            last: heapless::Vec::new(),
        }
    }
}

impl BurstRead for SimBurst {
    type Error = ErrorKind;

    fn start_read(
        &mut self,
        address: u8,
        register: u8,
        len: usize,
    ) -> Result<(), Self::Error> {
        let source: &[u8] = if address == MPU6050_ADDRESS {
            &self.motion
        } else if address == self.magnetometer.address() {
            &self.magnetic
        } else {
            return Err(NACK);
        };
        trace!(address, register, len, "burst");
        self.last.clear();
        let _ = self.last.extend_from_slice(&source[..len.min(source.len())]);
        self.done.raise();
        Ok(())
    }

    fn completed(&self) -> &[u8] {
        &self.last
    }
}

/// H-bridge direction input.
pub struct SimPin {
    wheel: Wheel,
    name: &'static str,
    high: bool,
}

impl SimPin {
    pub fn new(
        wheel: Wheel,
        name: &'static str,
    ) -> Self {
        Self {
            wheel,
            name,
            high: false,
        }
    }

    fn set(
        &mut self,
        high: bool,
    ) {
        if self.high != high {
            trace!(wheel = ?self.wheel, pin = self.name, high, "pin");
            self.high = high;
        }
    }
}

impl digital::ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl digital::OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// PWM enable channel with the firmware's 1000-count resolution.
pub struct SimPwm {
    wheel: Wheel,
    duty: u16,
}

impl SimPwm {
    pub fn new(wheel: Wheel) -> Self {
        Self { wheel, duty: 0 }
    }
}

impl pwm::ErrorType for SimPwm {
    type Error = core::convert::Infallible;
}

impl pwm::SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        1000
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        if self.duty != duty {
            info!(wheel = ?self.wheel, duty, "pwm");
            self.duty = duty;
        }
        Ok(())
    }
}

/// Blocking delay for bring-up and calibration.
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        thread::sleep(Duration::from_nanos(ns.into()));
    }
}
