//! Tunable constants for the superloop, grouped per component.
//!
//! Every field has the value the robot was tuned with as its default, so
//! `RobotConfig::default()` is a working configuration. Hosts may override
//! any subset from JSON; missing fields keep their defaults.

use serde::{Deserialize, Serialize};

use crate::utils::controllers::imu::{AccelRange, GyroRange, MagnetometerModel};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub link: LinkConfig,
    pub ranging: RangingConfig,
    pub imu: ImuConfig,
    pub drive: DriveConfig,
    pub maneuvers: ManeuverTiming,
}

/// Outbound traffic on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Minimum spacing between greeting/heartbeat strings.
    pub heartbeat_period_ms: u32,
    /// Echo every received frame back for diagnostics.
    pub echo: bool,
    /// Minimum spacing between two echoes.
    pub echo_interval_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: 1000,
            echo: true,
            echo_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Gap between the end of one measurement cycle and the start of the next.
    pub period_ms: u32,
    /// A measurement still busy after this long is abandoned.
    pub timeout_ms: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    /// `CONFIG` register: digital low-pass filter (3 = 44 Hz, 4.9 ms delay).
    pub dlpf_cfg: u8,
    /// `SMPLRT_DIV` register: 1 kHz / (1 + div), 4 gives 200 Hz.
    pub sample_rate_div: u8,
    pub magnetometer: MagnetometerModel,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps250,
            dlpf_cfg: 0x03,
            sample_rate_div: 0x04,
            magnetometer: MagnetometerModel::Hmc5883l,
        }
    }
}

/// Duty values are in PWM compare units, `0..=max_duty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Speed for single-character commands.
    pub default_speed: u16,
    /// Speed for in-place turns inside canned maneuvers.
    pub turn_speed: u16,
    pub max_duty: u16,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            default_speed: 390,
            turn_speed: 850,
            max_duty: 1000,
        }
    }
}

/// Step durations of the canned maneuvers, tuned on the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManeuverTiming {
    pub turn_90_ms: u32,
    pub turn_180_ms: u32,
    /// Sideways leg of a lane shift, in each direction.
    pub lane_shift_ms: u32,
    /// Straight leg between leaving and rejoining the lane.
    pub lane_hold_ms: u32,
}

impl Default for ManeuverTiming {
    fn default() -> Self {
        Self {
            turn_90_ms: 900,
            turn_180_ms: 1800,
            lane_shift_ms: 1000,
            lane_hold_ms: 800,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let cfg = RobotConfig::default();
        assert_eq!(cfg.ranging.period_ms, 1000);
        assert_eq!(cfg.ranging.timeout_ms, 100);
        assert_eq!(cfg.link.echo_interval_ms, 100);
        assert_eq!(cfg.drive.default_speed, 390);
        assert!(cfg.drive.default_speed <= cfg.drive.max_duty);
        assert!(cfg.drive.turn_speed <= cfg.drive.max_duty);
    }
}
