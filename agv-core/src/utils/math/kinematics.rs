//! Drive layouts for the four-motor chassis.
//!
//! A [`DriveLayout`] maps a discrete [`MotionIntent`] onto a [`WheelCommand`]:
//! one direction and one duty per wheel. The mapping is a fixed lookup table,
//! not a continuous model, and it is the actuation contract of the robot.
//!
//! Wheel order everywhere is front-left, front-right, back-left, back-right:
//!
//! ```text
//! M1 (FL) --- M2 (FR)
//!    |           |
//! M3 (BL) --- M4 (BR)
//! ```
//!
//! The layout is a build-time choice. [`DefaultLayout`] is [`Mecanum`] unless
//! the `skid-steer` feature is enabled; `skid-steer` must be built with
//! `--no-default-features` since it excludes `mecanum`.
//!
//! # Example
//! ```rust
//! use agv_core::utils::math::kinematics::{
//!     Direction, DriveLayout, Mecanum, MotionIntent, Wheel, WheelDirection,
//! };
//! let cmd = Mecanum::wheel_command(MotionIntent::uniform(Direction::RotateLeft, 390));
//! assert_eq!(cmd.wheel(Wheel::FrontLeft).direction, WheelDirection::Backward);
//! ```

/// Discrete motion the robot can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Stop,
    Forward,
    Backward,
    /// Strafe left.
    Left,
    /// Strafe right.
    Right,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
    RotateLeft,
    RotateRight,
}

impl Direction {
    pub const ALL: [Direction; 11] = [
        Direction::Stop,
        Direction::Forward,
        Direction::Backward,
        Direction::Left,
        Direction::Right,
        Direction::ForwardLeft,
        Direction::ForwardRight,
        Direction::BackwardLeft,
        Direction::BackwardRight,
        Direction::RotateLeft,
        Direction::RotateRight,
    ];
}

/// Direction plus left/right speed magnitudes in duty units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionIntent {
    pub direction: Direction,
    pub left_speed: u16,
    pub right_speed: u16,
}

impl MotionIntent {
    pub const STOP: MotionIntent = MotionIntent::new(Direction::Stop, 0, 0);

    pub const fn new(
        direction: Direction,
        left_speed: u16,
        right_speed: u16,
    ) -> Self {
        Self {
            direction,
            left_speed,
            right_speed,
        }
    }

    /// Same speed on both sides.
    pub const fn uniform(
        direction: Direction,
        speed: u16,
    ) -> Self {
        Self::new(direction, speed, speed)
    }

    /// Copy with both speeds limited to `max`.
    pub fn clamped(
        self,
        max: u16,
    ) -> Self {
        Self {
            left_speed: self.left_speed.min(max),
            right_speed: self.right_speed.min(max),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WheelDirection {
    Forward,
    Backward,
    /// Both bridge inputs low: the motor coasts.
    #[default]
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WheelDrive {
    pub direction: WheelDirection,
    pub duty: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wheel {
    FrontLeft = 0,
    FrontRight = 1,
    BackLeft = 2,
    BackRight = 3,
}

impl Wheel {
    pub const ALL: [Wheel; 4] = [
        Wheel::FrontLeft,
        Wheel::FrontRight,
        Wheel::BackLeft,
        Wheel::BackRight,
    ];

    pub const fn is_left(self) -> bool {
        matches!(self, Wheel::FrontLeft | Wheel::BackLeft)
    }
}

/// Direction and duty for all four wheels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WheelCommand {
    pub wheels: [WheelDrive; 4],
}

impl WheelCommand {
    pub const STOPPED: WheelCommand = WheelCommand {
        wheels: [WheelDrive {
            direction: WheelDirection::Stop,
            duty: 0,
        }; 4],
    };

    /// Left wheels get `left`, right wheels get `right`.
    pub fn sided(
        directions: [WheelDirection; 4],
        left: u16,
        right: u16,
    ) -> Self {
        let mut wheels = [WheelDrive::default(); 4];
        for wheel in Wheel::ALL {
            wheels[wheel as usize] = WheelDrive {
                direction: directions[wheel as usize],
                duty: if wheel.is_left() { left } else { right },
            };
        }
        Self { wheels }
    }

    pub fn wheel(
        &self,
        wheel: Wheel,
    ) -> WheelDrive {
        self.wheels[wheel as usize]
    }
}

/// Actuation strategy selected at build time.
pub trait DriveLayout {
    const NAME: &'static str;

    /// Single-character command vocabulary. Each byte appears at most once.
    const VOCABULARY: &'static [(u8, Direction)];

    fn wheel_command(intent: MotionIntent) -> WheelCommand;

    /// Vocabulary lookup; anything unmapped is [`Direction::Stop`].
    fn lookup(byte: u8) -> Direction {
        Self::VOCABULARY
            .iter()
            .find(|(b, _)| *b == byte)
            .map(|&(_, d)| d)
            .unwrap_or(Direction::Stop)
    }
}

use WheelDirection::{Backward as B, Forward as F, Stop as S};

/// Four mecanum wheels, each on its own H-bridge.
pub struct Mecanum;

impl DriveLayout for Mecanum {
    const NAME: &'static str = "mecanum";

    const VOCABULARY: &'static [(u8, Direction)] = &[
        (b'F', Direction::Forward),
        (b'B', Direction::Backward),
        (b'A', Direction::Left),
        (b'D', Direction::Right),
        (b'L', Direction::ForwardLeft),
        (b'R', Direction::ForwardRight),
        (b'Z', Direction::BackwardLeft),
        (b'C', Direction::BackwardRight),
        (b'Q', Direction::RotateLeft),
        (b'E', Direction::RotateRight),
        (b'S', Direction::Stop),
    ];

    fn wheel_command(intent: MotionIntent) -> WheelCommand {
        let MotionIntent {
            direction,
            left_speed: l,
            right_speed: r,
        } = intent;

        // [FL, FR, BL, BR]. Forward-left shares the forward-right row.
        let dirs = match direction {
            Direction::Stop => return WheelCommand::STOPPED,
            Direction::Forward => [F, F, F, F],
            Direction::Backward => [B, B, B, B],
            Direction::ForwardLeft | Direction::ForwardRight => [F, F, F, F],
            Direction::Left => [B, F, F, B],
            Direction::Right => [F, B, B, F],
            Direction::BackwardLeft => [B, S, S, B],
            Direction::BackwardRight => [S, B, B, S],
            Direction::RotateLeft => [B, F, B, F],
            Direction::RotateRight => [F, B, F, B],
        };
        WheelCommand::sided(dirs, l, r)
    }
}

/// Two driven axles without lateral rollers.
///
/// Pivots run the inner side at a reduced duty so the robot turns about a
/// point just inside the inner track. Strafes drive the front and rear axle
/// pairs in opposite rotation sense.
pub struct SkidSteer;

impl SkidSteer {
    const INNER_DUTY_NUM: u32 = 3;
    const INNER_DUTY_DEN: u32 = 4;

    fn inner(duty: u16) -> u16 {
        (duty as u32 * Self::INNER_DUTY_NUM / Self::INNER_DUTY_DEN) as u16
    }
}

impl DriveLayout for SkidSteer {
    const NAME: &'static str = "skid-steer";

    const VOCABULARY: &'static [(u8, Direction)] = &[
        (b'F', Direction::Forward),
        (b'B', Direction::Backward),
        (b'L', Direction::RotateLeft),
        (b'R', Direction::RotateRight),
        (b'A', Direction::Left),
        (b'D', Direction::Right),
        (b'S', Direction::Stop),
    ];

    fn wheel_command(intent: MotionIntent) -> WheelCommand {
        let MotionIntent {
            direction,
            left_speed: l,
            right_speed: r,
        } = intent;

        match direction {
            Direction::Forward => WheelCommand::sided([F, F, F, F], l, r),
            Direction::Backward => WheelCommand::sided([B, B, B, B], l, r),
            Direction::RotateLeft => WheelCommand::sided([B, F, B, F], Self::inner(l), r),
            Direction::RotateRight => WheelCommand::sided([F, B, F, B], l, Self::inner(r)),
            Direction::Left => WheelCommand::sided([B, F, F, B], l, r),
            Direction::Right => WheelCommand::sided([F, B, B, F], l, r),
            // Diagonals have no skid-steer equivalent.
            _ => WheelCommand::STOPPED,
        }
    }
}

#[cfg(all(feature = "mecanum", feature = "skid-steer"))]
compile_error!("features `mecanum` and `skid-steer` are mutually exclusive");

#[cfg(not(feature = "skid-steer"))]
pub type DefaultLayout = Mecanum;
#[cfg(feature = "skid-steer")]
pub type DefaultLayout = SkidSteer;
