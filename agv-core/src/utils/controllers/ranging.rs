//! Non-blocking VL53L0X single-shot ranging.
//!
//! The sensor is driven through a start / poll / read cycle with a few
//! register accesses per superloop iteration, never waiting on the
//! measurement itself:
//!
//! ```text
//! Idle ──period elapsed──▶ Sampling ──busy──▶ AwaitingResult ──busy──┐
//!  ▲                          │                   │  ▲               │
//!  │                          └──────ready────────┤  └───────────────┘
//!  └────────── result read / timeout / bus error ─┘
//! ```
//!
//! The period only gates *starting* a cycle. Once a cycle is running the
//! session must be polled every iteration until it returns to `Idle`.

use embedded_hal::i2c::I2c;

use crate::utils::{config::RangingConfig, handoff::elapsed_ms};

pub const VL53L0X_ADDRESS: u8 = 0x29;

const SYSRANGE_START: u8 = 0x00;
const SYSTEM_INTERRUPT_CLEAR: u8 = 0x0B;
const RESULT_RANGE_STATUS: u8 = 0x14;
const STOP_VARIABLE: u8 = 0x91;
const IDENTIFICATION_MODEL_ID: u8 = 0xC0;
const MODEL_ID: u8 = 0xEE;

/// Readings at or above this are the sensor's "nothing in range" code.
pub const OUT_OF_RANGE_MM: u16 = 8190;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingState {
    Idle,
    /// Start sequence written, no status read yet.
    Sampling,
    /// Status read at least once and still busy.
    AwaitingResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeReading {
    Millimeters(u16),
    OutOfRange,
}

impl RangeReading {
    pub fn from_raw(raw: u16) -> Self {
        if raw >= OUT_OF_RANGE_MM {
            RangeReading::OutOfRange
        } else {
            RangeReading::Millimeters(raw)
        }
    }
}

#[derive(Debug)]
pub enum RangingError<E: core::fmt::Debug> {
    Bus(E),
    IdentityMismatch(u8),
}

/// Ranging session over a dedicated I2C bus.
pub struct RangingSession<I2C> {
    i2c: I2C,
    period_ms: u32,
    timeout_ms: u32,
    state: RangingState,
    started_at: u32,
    last_cycle_at: u32,
    stop_variable: u8,
    reading: Option<RangeReading>,
    timeouts: u32,
    bus_errors: u32,
}

impl<I2C, E> RangingSession<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    pub fn new(
        i2c: I2C,
        config: &RangingConfig,
    ) -> Self {
        Self {
            i2c,
            period_ms: config.period_ms,
            timeout_ms: config.timeout_ms,
            state: RangingState::Idle,
            started_at: 0,
            last_cycle_at: 0,
            stop_variable: 0,
            reading: None,
            timeouts: 0,
            bus_errors: 0,
        }
    }

    /// Identity check and stop-variable read. Blocking; call before the loop.
    ///
    /// An identity mismatch is returned as an error but the session stays
    /// usable; the caller decides how loudly to report it.
    pub fn init(&mut self) -> Result<(), RangingError<E>> {
        let id = self.read_reg(IDENTIFICATION_MODEL_ID)?;

        self.write_reg(0x80, 0x01)?;
        self.write_reg(0xFF, 0x01)?;
        self.write_reg(0x00, 0x00)?;
        self.stop_variable = self.read_reg(STOP_VARIABLE)?;
        self.write_reg(0x00, 0x01)?;
        self.write_reg(0xFF, 0x00)?;
        self.write_reg(0x80, 0x00)?;

        if id != MODEL_ID {
            tracing::error!("VL53L0X identity check failed: model id 0x{:02X}", id);
            return Err(RangingError::IdentityMismatch(id));
        }
        tracing::info!(stop_variable = self.stop_variable, "VL53L0X identity OK");
        Ok(())
    }

    /// Advance the state machine by one step and return the new state.
    pub fn poll(
        &mut self,
        now: u32,
    ) -> Result<RangingState, RangingError<E>> {
        let result = match self.state {
            RangingState::Idle => self.poll_idle(now),
            RangingState::Sampling | RangingState::AwaitingResult => self.poll_busy(now),
        };

        match result {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(e) => {
                self.bus_errors = self.bus_errors.wrapping_add(1);
                self.finish_cycle(now);
                Err(e)
            }
        }
    }

    fn poll_idle(
        &mut self,
        now: u32,
    ) -> Result<RangingState, RangingError<E>> {
        if elapsed_ms(now, self.last_cycle_at) < self.period_ms {
            return Ok(RangingState::Idle);
        }
        self.start_measurement()?;
        self.started_at = now;
        Ok(RangingState::Sampling)
    }

    fn poll_busy(
        &mut self,
        now: u32,
    ) -> Result<RangingState, RangingError<E>> {
        let busy = self.read_reg(SYSRANGE_START)? & 0x01 != 0;
        if !busy {
            let reading = self.read_result()?;
            tracing::debug!(?reading, "range measured");
            self.reading = Some(reading);
            self.finish_cycle(now);
            return Ok(RangingState::Idle);
        }

        if elapsed_ms(now, self.started_at) > self.timeout_ms {
            self.timeouts = self.timeouts.wrapping_add(1);
            tracing::warn!(timeouts = self.timeouts, "VL53L0X timeout");
            self.finish_cycle(now);
            return Ok(RangingState::Idle);
        }
        Ok(RangingState::AwaitingResult)
    }

    fn start_measurement(&mut self) -> Result<(), RangingError<E>> {
        self.write_reg(0x80, 0x01)?;
        self.write_reg(0xFF, 0x01)?;
        self.write_reg(0x00, 0x00)?;
        self.write_reg(STOP_VARIABLE, self.stop_variable)?;
        self.write_reg(0x00, 0x01)?;
        self.write_reg(0xFF, 0x00)?;
        self.write_reg(0x80, 0x00)?;
        self.write_reg(SYSRANGE_START, 0x01)
    }

    fn read_result(&mut self) -> Result<RangeReading, RangingError<E>> {
        let msb = self.read_reg(RESULT_RANGE_STATUS + 10)?;
        let lsb = self.read_reg(RESULT_RANGE_STATUS + 11)?;
        self.write_reg(SYSTEM_INTERRUPT_CLEAR, 0x01)?;
        Ok(RangeReading::from_raw(u16::from_be_bytes([msb, lsb])))
    }

    fn finish_cycle(
        &mut self,
        now: u32,
    ) {
        self.state = RangingState::Idle;
        self.last_cycle_at = now;
    }

    fn read_reg(
        &mut self,
        reg: u8,
    ) -> Result<u8, RangingError<E>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(VL53L0X_ADDRESS, &[reg], &mut buf)
            .map_err(RangingError::Bus)?;
        Ok(buf[0])
    }

    fn write_reg(
        &mut self,
        reg: u8,
        value: u8,
    ) -> Result<(), RangingError<E>> {
        self.i2c
            .write(VL53L0X_ADDRESS, &[reg, value])
            .map_err(RangingError::Bus)
    }

    pub fn state(&self) -> RangingState {
        self.state
    }

    /// Latest completed reading; survives later timeouts.
    pub fn reading(&self) -> Option<RangeReading> {
        self.reading
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn bus_errors(&self) -> u32 {
        self.bus_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_range_code_is_out_of_range() {
        assert_eq!(RangeReading::from_raw(8190), RangeReading::OutOfRange);
        assert_eq!(RangeReading::from_raw(8191), RangeReading::OutOfRange);
        assert_eq!(RangeReading::from_raw(8189), RangeReading::Millimeters(8189));
        assert_eq!(RangeReading::from_raw(0), RangeReading::Millimeters(0));
    }
}
