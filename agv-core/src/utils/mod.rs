//! Utility re-exports and helper macros for the AGV core.
//!
//! - `connection`: serial link framing and the single-slot transmitter
//! - `controllers`: ranging, IMU, command, maneuver and motor state machines,
//!   plus the superloop coordinator
//! - `math`: drive layouts mapping motion intents to wheel commands
//! - `handoff`: interrupt-to-loop flags and the millisecond clock
//! - `config`: tunable periods, timeouts, speeds and maneuver durations
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod connection;
pub mod controllers;
pub mod handoff;
pub mod math;

pub use config::RobotConfig;
pub use connection::link::{LinkFramer, SendOutcome};
pub use controllers::SystemController;
pub use handoff::{EventFlag, MonotonicClock};
pub use math::kinematics::{DefaultLayout, Direction, DriveLayout, MotionIntent};

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
