//! Module Exports
//!
//! This file exports the serial link used to talk to the host computer.
//!
//! # Modules
//! - `link`: line framing of received bytes and the single-slot transmitter.

/// Module for framing the serial link, receive and transmit sides.
pub mod link;
