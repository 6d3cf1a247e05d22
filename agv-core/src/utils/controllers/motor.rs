//! Wheel actuation.
//!
//! Each motor sits behind an H-bridge with two direction inputs and one PWM
//! enable channel. [`MotionController`] turns a [`MotionIntent`] into a
//! [`WheelCommand`] through the build's [`DriveLayout`] and writes it out:
//! direction pins for all four motors first, then duties.
//!
//! All four motors share the pin and PWM types, so HALs with typed pins should
//! hand in their erased/dynamic pin variants.

use core::marker::PhantomData;

use embedded_hal::{
    digital::{self, OutputPin},
    pwm::{self, SetDutyCycle},
};

use crate::utils::math::kinematics::{
    Direction, DriveLayout, MotionIntent, WheelCommand, WheelDirection,
};

/// Errors from the actuator outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorError {
    Pin(digital::ErrorKind),
    Pwm(pwm::ErrorKind),
}

fn pin_err<E: digital::Error>(e: E) -> MotorError {
    MotorError::Pin(e.kind())
}

fn pwm_err<E: pwm::Error>(e: E) -> MotorError {
    MotorError::Pwm(e.kind())
}

/// One H-bridge channel.
pub struct Motor<P, D> {
    in1: P,
    in2: P,
    pwm: D,
}

impl<P, D> Motor<P, D>
where
    P: OutputPin,
    D: SetDutyCycle,
{
    pub fn new(
        in1: P,
        in2: P,
        pwm: D,
    ) -> Self {
        Self { in1, in2, pwm }
    }

    /// `Forward` = IN1 high / IN2 low, `Backward` the reverse, `Stop` both low.
    pub fn set_direction(
        &mut self,
        direction: WheelDirection,
    ) -> Result<(), MotorError> {
        match direction {
            WheelDirection::Forward => {
                self.in1.set_high().map_err(pin_err)?;
                self.in2.set_low().map_err(pin_err)
            }
            WheelDirection::Backward => {
                self.in1.set_low().map_err(pin_err)?;
                self.in2.set_high().map_err(pin_err)
            }
            WheelDirection::Stop => {
                self.in1.set_low().map_err(pin_err)?;
                self.in2.set_low().map_err(pin_err)
            }
        }
    }

    /// `duty` out of `max_duty`, rescaled to the channel's own resolution.
    pub fn set_duty(
        &mut self,
        duty: u16,
        max_duty: u16,
    ) -> Result<(), MotorError> {
        if duty == 0 {
            return self.pwm.set_duty_cycle_fully_off().map_err(pwm_err);
        }
        self.pwm
            .set_duty_cycle_fraction(duty.min(max_duty), max_duty)
            .map_err(pwm_err)
    }
}

/// Four-motor controller for layout `L`.
pub struct MotionController<L, P, D> {
    motors: [Motor<P, D>; 4],
    max_duty: u16,
    last: WheelCommand,
    _layout: PhantomData<L>,
}

impl<L, P, D> MotionController<L, P, D>
where
    L: DriveLayout,
    P: OutputPin,
    D: SetDutyCycle,
{
    /// Motors in front-left, front-right, back-left, back-right order.
    ///
    /// `max_duty` is the full-scale value of every speed passed in later.
    pub fn new(
        motors: [Motor<P, D>; 4],
        max_duty: u16,
    ) -> Self {
        Self {
            motors,
            max_duty: max_duty.max(1),
            last: WheelCommand::STOPPED,
            _layout: PhantomData,
        }
    }

    /// Drive `direction` with the given side speeds, clamped to `max_duty`.
    pub fn set_intent(
        &mut self,
        direction: Direction,
        left_speed: u16,
        right_speed: u16,
    ) -> Result<WheelCommand, MotorError> {
        if direction == Direction::Stop {
            self.stop()?;
            return Ok(self.last);
        }

        let intent = MotionIntent::new(direction, left_speed, right_speed).clamped(self.max_duty);
        let command = L::wheel_command(intent);

        for (motor, wheel) in self.motors.iter_mut().zip(command.wheels.iter()) {
            motor.set_direction(wheel.direction)?;
        }
        for (motor, wheel) in self.motors.iter_mut().zip(command.wheels.iter()) {
            motor.set_duty(wheel.duty, self.max_duty)?;
        }

        self.last = command;
        Ok(command)
    }

    pub fn apply(
        &mut self,
        intent: MotionIntent,
    ) -> Result<WheelCommand, MotorError> {
        self.set_intent(intent.direction, intent.left_speed, intent.right_speed)
    }

    /// Zero every duty, then release every direction pin. Safe to repeat.
    pub fn stop(&mut self) -> Result<(), MotorError> {
        for motor in self.motors.iter_mut() {
            motor.set_duty(0, self.max_duty)?;
        }
        for motor in self.motors.iter_mut() {
            motor.set_direction(WheelDirection::Stop)?;
        }
        self.last = WheelCommand::STOPPED;
        Ok(())
    }

    /// Last command written to the outputs.
    pub fn last_command(&self) -> WheelCommand {
        self.last
    }

    pub fn max_duty(&self) -> u16 {
        self.max_duty
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::{cell::Cell, convert::Infallible};
    use std::rc::Rc;

    use super::*;
    use crate::utils::math::kinematics::{Mecanum, SkidSteer, Wheel};

    #[derive(Clone, Default)]
    struct FakePin(Rc<Cell<bool>>);

    impl digital::ErrorType for FakePin {
        type Error = Infallible;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.set(true);
            Ok(())
        }
    }

    /// 4000-count channel so rescaling is visible.
    #[derive(Clone, Default)]
    struct FakePwm(Rc<Cell<u16>>);

    impl pwm::ErrorType for FakePwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            4000
        }

        fn set_duty_cycle(
            &mut self,
            duty: u16,
        ) -> Result<(), Infallible> {
            self.0.set(duty);
            Ok(())
        }
    }

    type Outputs = [(FakePin, FakePin, FakePwm); 4];

    fn rig<L: DriveLayout>() -> (MotionController<L, FakePin, FakePwm>, Outputs) {
        let outputs: Outputs = Default::default();
        let motors = outputs
            .clone()
            .map(|(in1, in2, pwm)| Motor::new(in1, in2, pwm));
        (MotionController::new(motors, 1000), outputs)
    }

    /// (in1, in2, duty) per wheel as seen on the hardware.
    fn snapshot(outputs: &Outputs) -> [(bool, bool, u16); 4] {
        let mut s = [(false, false, 0); 4];
        for (i, (in1, in2, pwm)) in outputs.iter().enumerate() {
            s[i] = (in1.0.get(), in2.0.get(), pwm.0.get());
        }
        s
    }

    #[test]
    fn forward_sets_pins_and_scaled_duty() {
        let (mut ctrl, outputs) = rig::<Mecanum>();
        ctrl.set_intent(Direction::Forward, 390, 390).unwrap();
        for wheel in snapshot(&outputs) {
            assert_eq!(wheel, (true, false, 1560));
        }
    }

    #[test]
    fn rotate_left_reverses_left_wheels() {
        let (mut ctrl, outputs) = rig::<Mecanum>();
        ctrl.set_intent(Direction::RotateLeft, 390, 390).unwrap();
        let s = snapshot(&outputs);
        assert_eq!(s[Wheel::FrontLeft as usize], (false, true, 1560));
        assert_eq!(s[Wheel::BackLeft as usize], (false, true, 1560));
        assert_eq!(s[Wheel::FrontRight as usize], (true, false, 1560));
        assert_eq!(s[Wheel::BackRight as usize], (true, false, 1560));
    }

    #[test]
    fn speeds_are_clamped() {
        let (mut ctrl, outputs) = rig::<Mecanum>();
        let cmd = ctrl.set_intent(Direction::Backward, 5000, 250).unwrap();
        assert_eq!(cmd.wheel(Wheel::FrontLeft).duty, 1000);
        assert_eq!(cmd.wheel(Wheel::FrontRight).duty, 250);
        let s = snapshot(&outputs);
        assert_eq!(s[0], (false, true, 4000));
        assert_eq!(s[1], (false, true, 1000));
    }

    #[test]
    fn stop_is_idempotent_from_every_direction() {
        for direction in Direction::ALL {
            let (mut ctrl, outputs) = rig::<Mecanum>();
            ctrl.set_intent(direction, 700, 700).unwrap();
            ctrl.stop().unwrap();
            let once = snapshot(&outputs);
            ctrl.stop().unwrap();
            assert_eq!(snapshot(&outputs), once);
            assert_eq!(once, [(false, false, 0); 4]);
            assert_eq!(ctrl.last_command(), WheelCommand::STOPPED);
        }
    }

    #[test]
    fn stop_intent_goes_through_stop() {
        let (mut ctrl, outputs) = rig::<SkidSteer>();
        ctrl.set_intent(Direction::Forward, 500, 500).unwrap();
        let cmd = ctrl.apply(MotionIntent::STOP).unwrap();
        assert_eq!(cmd, WheelCommand::STOPPED);
        assert_eq!(snapshot(&outputs), [(false, false, 0); 4]);
    }
}
