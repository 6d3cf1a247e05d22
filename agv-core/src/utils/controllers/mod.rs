//! Module Exports
//!
//! This file exports the device state machines and the superloop coordinator
//! that polls them.
//!
//! - `command`: turns received frames into motion intents or canned maneuvers.
//! - `imu`: MPU6050 + magnetometer bring-up and the alternating burst sampler.
//! - `maneuver`: timed step sequencer for canned maneuvers.
//! - `motor`: H-bridge outputs driven through the build's drive layout.
//! - `ranging`: VL53L0X start / poll / read cycle.

pub mod command;
pub mod imu;
pub mod maneuver;
pub mod motor;
pub mod ranging;

use core::fmt::Write;

use embedded_hal::{digital::OutputPin, i2c::I2c, pwm::SetDutyCycle};
use heapless::{Deque, String};

use crate::utils::{
    config::RobotConfig,
    connection::link::{Frame, LinkFramer, SendOutcome},
    handoff::{elapsed_ms, EventFlag, MonotonicClock},
    math::kinematics::{DriveLayout, MotionIntent},
};

use command::{Command, CommandInterpreter};
use imu::{BurstRead, CalibrationOffsets, ImuPipeline, SensorHealth};
use maneuver::ManeuverSequencer;
use motor::{Motor, MotionController};
use ranging::RangingSession;

/// Sent once per heartbeat period while the link is otherwise quiet.
pub const GREETING: &[u8] = b"hello Raspberry Pi 4\r\n";

const DIAGNOSTIC_LEN: usize = 48;
const DIAGNOSTIC_DEPTH: usize = 4;

type Diagnostic = String<DIAGNOSTIC_LEN>;

/// Superloop coordinator.
///
/// Owns every device state machine and polls them in a fixed order: serial,
/// IMU, command/motor, ranging. Nothing in [`SystemController::poll`] blocks;
/// device errors are logged and the loop carries on.
pub struct SystemController<'a, L, R, B, P, D> {
    link: &'a LinkFramer,
    imu_done: &'a EventFlag,
    config: RobotConfig,
    interpreter: CommandInterpreter<L>,
    motion: MotionController<L, P, D>,
    sequencer: ManeuverSequencer,
    ranging: RangingSession<R>,
    imu: ImuPipeline<B>,
    pending_frame: Option<Frame>,
    last_heartbeat: Option<u32>,
    last_echo: Option<u32>,
    diagnostics: Deque<Diagnostic, DIAGNOSTIC_DEPTH>,
}

impl<'a, L, R, B, P, D> SystemController<'a, L, R, B, P, D>
where
    L: DriveLayout,
    R: I2c,
    B: BurstRead,
    P: OutputPin,
    D: SetDutyCycle,
{
    /// `motors` in front-left, front-right, back-left, back-right order.
    pub fn new(
        link: &'a LinkFramer,
        imu_done: &'a EventFlag,
        config: RobotConfig,
        motors: [Motor<P, D>; 4],
        ranging_bus: R,
        imu_bus: B,
        offsets: CalibrationOffsets,
    ) -> Self {
        Self {
            link,
            imu_done,
            interpreter: CommandInterpreter::new(config.drive.default_speed),
            motion: MotionController::new(motors, config.drive.max_duty),
            sequencer: ManeuverSequencer::new(),
            ranging: RangingSession::new(ranging_bus, &config.ranging),
            imu: ImuPipeline::new(imu_bus, &config.imu, offsets),
            config,
            pending_frame: None,
            last_heartbeat: None,
            last_echo: None,
            diagnostics: Deque::new(),
        }
    }

    /// One-time bring-up before the loop: ranging identity, first IMU burst,
    /// outputs released. `imu_health` comes from the blocking sensor init.
    pub fn startup(
        &mut self,
        imu_health: SensorHealth,
    ) {
        tracing::info!(layout = L::NAME, "starting superloop");

        if let Err(e) = self.ranging.init() {
            let mut msg = Diagnostic::new();
            let _ = write!(msg, "ranging init: {:?}", e);
            self.report(&msg);
        }
        if !imu_health.motion {
            self.report("MPU6050 identity check failed");
        }
        if !imu_health.magnetic {
            self.report("magnetometer identity check failed");
        }
        if let Err(e) = self.imu.start() {
            tracing::error!(?e, "IMU first burst failed, retrying from the loop");
        }
        if let Err(e) = self.motion.stop() {
            tracing::error!(?e, "failed to release outputs");
        }
    }

    /// Queue a diagnostic line for the link. Oldest lines go first when full;
    /// long lines are cut at the buffer size.
    pub fn report(
        &mut self,
        msg: &str,
    ) {
        tracing::warn!("{}", msg);
        let mut line = Diagnostic::new();
        for c in msg.chars() {
            if line.push(c).is_err() {
                break;
            }
        }
        if self.diagnostics.is_full() {
            self.diagnostics.pop_front();
        }
        let _ = self.diagnostics.push_back(line);
    }

    /// One superloop iteration.
    pub fn poll(
        &mut self,
        now: u32,
    ) {
        self.serial_task(now);
        self.imu_task();
        self.motor_task(now);
        self.ranging_task(now);
    }

    pub fn run(
        &mut self,
        clock: &MonotonicClock,
    ) -> ! {
        loop {
            self.poll(clock.now());
        }
    }

    fn serial_task(
        &mut self,
        now: u32,
    ) {
        if self.link.is_tx_idle() {
            if let Some(line) = self.diagnostics.pop_front() {
                let mut payload = Frame::new();
                let _ = payload.extend_from_slice(line.as_bytes());
                let _ = payload.extend_from_slice(b"\r\n");
                self.link.try_send(&payload);
            } else if self.heartbeat_due(now) && self.link.try_send(GREETING) == SendOutcome::Sent {
                self.last_heartbeat = Some(now);
            }
        }

        if let Some(frame) = self.link.take_frame() {
            if self.pending_frame.replace(frame).is_some() {
                tracing::debug!("unprocessed frame replaced");
            }
        }
    }

    fn heartbeat_due(
        &self,
        now: u32,
    ) -> bool {
        self.last_heartbeat
            .map_or(true, |at| elapsed_ms(now, at) >= self.config.link.heartbeat_period_ms)
    }

    fn imu_task(&mut self) {
        match self.imu.poll(self.imu_done) {
            Ok(Some(slot)) => tracing::trace!(?slot, "IMU sample"),
            Ok(None) => {}
            Err(e) => tracing::warn!(?e, "IMU transfer failed"),
        }
    }

    fn motor_task(
        &mut self,
        now: u32,
    ) {
        let Some(frame) = self.pending_frame.take() else {
            if let Some(intent) = self.sequencer.advance(now) {
                self.drive(intent);
            }
            return;
        };

        self.echo(&frame, now);
        if self.sequencer.cancel() {
            tracing::debug!("maneuver preempted");
        }

        let intent = match self.interpreter.interpret(&frame) {
            Command::Move(intent) => Some(intent),
            Command::Maneuver(maneuver) => {
                tracing::info!(?maneuver, "starting maneuver");
                let steps = maneuver.steps(&self.config.maneuvers, &self.config.drive);
                self.sequencer.start(steps, now)
            }
        };
        if let Some(intent) = intent {
            self.drive(intent);
        }
    }

    fn echo(
        &mut self,
        frame: &[u8],
        now: u32,
    ) {
        if !self.config.link.echo {
            return;
        }
        let allowed = self
            .last_echo
            .map_or(true, |at| elapsed_ms(now, at) >= self.config.link.echo_interval_ms);
        if allowed && self.link.try_send(frame) == SendOutcome::Sent {
            self.last_echo = Some(now);
        }
    }

    fn drive(
        &mut self,
        intent: MotionIntent,
    ) {
        tracing::debug!(?intent, "motion");
        if let Err(e) = self.motion.apply(intent) {
            tracing::error!(?e, "motor output failed");
        }
    }

    fn ranging_task(
        &mut self,
        now: u32,
    ) {
        if let Err(e) = self.ranging.poll(now) {
            tracing::warn!(?e, "ranging bus error");
        }
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn motion(&self) -> &MotionController<L, P, D> {
        &self.motion
    }

    pub fn ranging(&self) -> &RangingSession<R> {
        &self.ranging
    }

    pub fn imu(&self) -> &ImuPipeline<B> {
        &self.imu
    }

    pub fn sequencer(&self) -> &ManeuverSequencer {
        &self.sequencer
    }

    /// Diagnostic lines not yet sent.
    pub fn pending_diagnostics(&self) -> usize {
        self.diagnostics.len()
    }
}
