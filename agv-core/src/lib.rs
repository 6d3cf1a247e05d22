//! Cooperative superloop core for a four-wheel AGV on no-std embedded platforms.
//!
//! Every component is a non-blocking state machine polled once per loop
//! iteration by [`utils::SystemController`]. Interrupt handlers only touch the
//! hand-off cells in [`utils::handoff`] and the [`utils::connection::link`]
//! framer.
//!
//! For a runnable host build, see the `mock-mcu` binary in `agv-app/`.
#![no_std]

#[cfg(test)]
use critical_section as _;

pub mod utils;
