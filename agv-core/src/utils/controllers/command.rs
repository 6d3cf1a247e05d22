//! Frame-to-command decoding.
//!
//! A frame is either a named maneuver token (`L90`, `R90`, `R180`, `SL`, `SR`,
//! exact and case-sensitive), a single vocabulary character of the build's
//! drive layout, or anything else, which means stop.

use core::marker::PhantomData;

use crate::utils::{
    config::{DriveConfig, ManeuverTiming},
    controllers::maneuver::{ManeuverStep, StepQueue},
    math::kinematics::{Direction, DriveLayout, MotionIntent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    Left90,
    Right90,
    Right180,
    /// Leave the lane to the left, run straight, come back.
    ShiftLeft,
    ShiftRight,
}

impl Maneuver {
    pub const ALL: [Maneuver; 5] = [
        Maneuver::Left90,
        Maneuver::Right90,
        Maneuver::Right180,
        Maneuver::ShiftLeft,
        Maneuver::ShiftRight,
    ];

    pub const fn token(self) -> &'static [u8] {
        match self {
            Maneuver::Left90 => b"L90",
            Maneuver::Right90 => b"R90",
            Maneuver::Right180 => b"R180",
            Maneuver::ShiftLeft => b"SL",
            Maneuver::ShiftRight => b"SR",
        }
    }

    pub fn from_token(token: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.token() == token)
    }

    /// Expand into timed steps. Turns run at `turn_speed`, lane shifts at
    /// `default_speed`.
    pub fn steps(
        self,
        timing: &ManeuverTiming,
        drive: &DriveConfig,
    ) -> StepQueue {
        let turn = |direction, ms| ManeuverStep::new(direction, drive.turn_speed, ms);
        let cruise = |direction, ms| ManeuverStep::new(direction, drive.default_speed, ms);

        let mut queue = StepQueue::new();
        let mut push = |step| {
            let _ = queue.push(step);
        };
        match self {
            Maneuver::Left90 => push(turn(Direction::RotateLeft, timing.turn_90_ms)),
            Maneuver::Right90 => push(turn(Direction::RotateRight, timing.turn_90_ms)),
            Maneuver::Right180 => push(turn(Direction::RotateRight, timing.turn_180_ms)),
            Maneuver::ShiftLeft => {
                push(cruise(Direction::Left, timing.lane_shift_ms));
                push(cruise(Direction::Forward, timing.lane_hold_ms));
                push(cruise(Direction::Right, timing.lane_shift_ms));
            }
            Maneuver::ShiftRight => {
                push(cruise(Direction::Right, timing.lane_shift_ms));
                push(cruise(Direction::Forward, timing.lane_hold_ms));
                push(cruise(Direction::Left, timing.lane_shift_ms));
            }
        }
        queue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(MotionIntent),
    Maneuver(Maneuver),
}

/// Strip trailing `\r`, `\n` and NUL bytes.
pub fn trim_frame(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | 0))
        .map_or(0, |i| i + 1);
    &frame[..end]
}

pub struct CommandInterpreter<L> {
    default_speed: u16,
    _layout: PhantomData<L>,
}

impl<L: DriveLayout> CommandInterpreter<L> {
    pub fn new(default_speed: u16) -> Self {
        Self {
            default_speed,
            _layout: PhantomData,
        }
    }

    pub fn interpret(
        &self,
        frame: &[u8],
    ) -> Command {
        let body = trim_frame(frame);
        if let Some(maneuver) = Maneuver::from_token(body) {
            return Command::Maneuver(maneuver);
        }
        let direction = match body {
            [byte] => L::lookup(*byte),
            _ => Direction::Stop,
        };
        if direction == Direction::Stop {
            return Command::Move(MotionIntent::STOP);
        }
        Command::Move(MotionIntent::uniform(direction, self.default_speed))
    }

    pub fn default_speed(&self) -> u16 {
        self.default_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::kinematics::{Mecanum, SkidSteer};

    fn mecanum() -> CommandInterpreter<Mecanum> {
        CommandInterpreter::new(390)
    }

    #[test]
    fn forward_line_uses_default_speed() {
        assert_eq!(
            mecanum().interpret(b"F\n"),
            Command::Move(MotionIntent::uniform(Direction::Forward, 390))
        );
    }

    #[test]
    fn trailing_terminators_are_trimmed() {
        assert_eq!(trim_frame(b"Q\r\n\0"), b"Q");
        assert_eq!(trim_frame(b"\r\n"), b"");
        assert_eq!(trim_frame(b""), b"");
        assert_eq!(trim_frame(b"\rF"), b"\rF");
    }

    #[test]
    fn unknown_and_empty_frames_stop() {
        let interp = mecanum();
        for frame in [&b""[..], b"\r", b"X", b"FF", b"f", b"l90", b"R 90"] {
            assert_eq!(interp.interpret(frame), Command::Move(MotionIntent::STOP));
        }
    }

    #[test]
    fn maneuver_tokens_are_exact() {
        let interp = mecanum();
        assert_eq!(interp.interpret(b"L90\r\n"), Command::Maneuver(Maneuver::Left90));
        assert_eq!(interp.interpret(b"R180"), Command::Maneuver(Maneuver::Right180));
        assert_eq!(interp.interpret(b"SR\n"), Command::Maneuver(Maneuver::ShiftRight));
        assert_eq!(
            interp.interpret(b"R"),
            Command::Move(MotionIntent::uniform(Direction::ForwardRight, 390))
        );
    }

    #[test]
    fn vocabulary_follows_layout() {
        let skid = CommandInterpreter::<SkidSteer>::new(500);
        assert_eq!(
            skid.interpret(b"L"),
            Command::Move(MotionIntent::uniform(Direction::RotateLeft, 500))
        );
        assert_eq!(skid.interpret(b"Q"), Command::Move(MotionIntent::STOP));
        assert_eq!(
            mecanum().interpret(b"L"),
            Command::Move(MotionIntent::uniform(Direction::ForwardLeft, 390))
        );
    }

    #[test]
    fn lane_shift_returns_to_the_lane() {
        let timing = ManeuverTiming::default();
        let drive = DriveConfig::default();
        let steps = Maneuver::ShiftLeft.steps(&timing, &drive);
        let dirs: heapless::Vec<Direction, 3> = steps.iter().map(|s| s.direction).collect();
        assert_eq!(&dirs[..], &[Direction::Left, Direction::Forward, Direction::Right]);
        assert!(steps.iter().all(|s| s.speed == drive.default_speed));
        assert_eq!(steps[0].duration_ms, steps[2].duration_ms);
    }

    #[test]
    fn turns_run_at_turn_speed() {
        let timing = ManeuverTiming::default();
        let drive = DriveConfig::default();
        let r180 = Maneuver::Right180.steps(&timing, &drive);
        assert_eq!(
            &r180[..],
            &[ManeuverStep::new(Direction::RotateRight, 850, timing.turn_180_ms)]
        );
        let l90 = Maneuver::Left90.steps(&timing, &drive);
        assert_eq!(l90[0].direction, Direction::RotateLeft);
        assert_eq!(l90[0].duration_ms, timing.turn_90_ms);
    }
}
