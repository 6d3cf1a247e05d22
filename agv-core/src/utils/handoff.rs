//! Interrupt-to-loop hand-off primitives.
//!
//! Each signal between an interrupt handler and the superloop has exactly one
//! producer (the hardware-event boundary) and one consumer (a single poll per
//! loop iteration). The interrupt side sets, the loop side reads and clears in
//! one atomic step, so an event raised between the read and the clear is never
//! lost.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Single-shot event raised by an interrupt and consumed by the loop.
pub struct EventFlag {
    raised: AtomicBool,
}

impl EventFlag {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Interrupt side. Must be the last thing the handler does.
    #[inline]
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Loop side. Returns `true` once per raise.
    #[inline]
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic millisecond counter advanced by the periodic timer interrupt.
///
/// The counter wraps after ~49 days; every comparison goes through
/// [`elapsed_ms`] so wraparound is harmless.
pub struct MonotonicClock {
    ticks: AtomicU32,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU32::new(0),
        }
    }

    /// Timer interrupt side: one call per millisecond.
    #[inline]
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Release);
    }

    /// Advance by several milliseconds at once (simulators, catch-up after a stall).
    pub fn advance(&self, ms: u32) {
        self.ticks.fetch_add(ms, Ordering::Release);
    }

    #[inline]
    pub fn now(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds from `since` to `now` using modular arithmetic.
#[inline]
pub const fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_taken_once_per_raise() {
        let flag = EventFlag::new();
        assert!(!flag.take());
        flag.raise();
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn elapsed_survives_counter_wrap() {
        let clock = MonotonicClock::new();
        clock.advance(u32::MAX - 4);
        let start = clock.now();
        clock.advance(10);
        assert_eq!(elapsed_ms(clock.now(), start), 10);
        assert!(clock.now() < start);
    }
}
