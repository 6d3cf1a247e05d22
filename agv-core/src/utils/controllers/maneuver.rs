//! Timed step sequencer for canned maneuvers.
//!
//! A maneuver is a short queue of (direction, speed, duration) steps. The
//! sequencer never sleeps: the superloop calls [`ManeuverSequencer::advance`]
//! every iteration and applies whatever intent it returns. Starting a new
//! sequence or calling [`ManeuverSequencer::cancel`] drops the old one at once,
//! which is how a fresh serial command preempts a running maneuver.

use heapless::Deque;

use crate::utils::{
    handoff::elapsed_ms,
    math::kinematics::{Direction, MotionIntent},
};

/// Longest step sequence a maneuver may expand to.
pub const MAX_STEPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManeuverStep {
    pub direction: Direction,
    pub speed: u16,
    pub duration_ms: u32,
}

impl ManeuverStep {
    pub const fn new(
        direction: Direction,
        speed: u16,
        duration_ms: u32,
    ) -> Self {
        Self {
            direction,
            speed,
            duration_ms,
        }
    }

    pub const fn intent(&self) -> MotionIntent {
        MotionIntent::uniform(self.direction, self.speed)
    }
}

pub type StepQueue = heapless::Vec<ManeuverStep, MAX_STEPS>;

#[derive(Default)]
pub struct ManeuverSequencer {
    pending: Deque<ManeuverStep, MAX_STEPS>,
    active: Option<ManeuverStep>,
    step_started: u32,
}

impl ManeuverSequencer {
    pub const fn new() -> Self {
        Self {
            pending: Deque::new(),
            active: None,
            step_started: 0,
        }
    }

    /// Replace any running sequence and return the intent of its first step.
    ///
    /// An empty sequence yields `None` and leaves the sequencer idle.
    pub fn start<I>(
        &mut self,
        steps: I,
        now: u32,
    ) -> Option<MotionIntent>
    where
        I: IntoIterator<Item = ManeuverStep>,
    {
        self.cancel();
        for step in steps.into_iter().take(MAX_STEPS) {
            let _ = self.pending.push_back(step);
        }
        self.next_step(now)
    }

    /// Drop the running sequence. Returns `true` if one was running.
    pub fn cancel(&mut self) -> bool {
        self.pending.clear();
        self.active.take().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Intent to apply now, if the outputs must change.
    ///
    /// Returns the next step's intent when the active step expires, and
    /// [`MotionIntent::STOP`] once after the last one.
    pub fn advance(
        &mut self,
        now: u32,
    ) -> Option<MotionIntent> {
        let active = self.active?;
        if elapsed_ms(now, self.step_started) < active.duration_ms {
            return None;
        }
        match self.next_step(now) {
            Some(intent) => Some(intent),
            None => {
                tracing::debug!("maneuver complete");
                Some(MotionIntent::STOP)
            }
        }
    }

    fn next_step(
        &mut self,
        now: u32,
    ) -> Option<MotionIntent> {
        self.active = self.pending.pop_front();
        self.step_started = now;
        self.active.map(|step| step.intent())
    }

    /// Steps not yet started.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}
