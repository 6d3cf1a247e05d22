//! Math utilities for the AGV.
//!
//! This module provides the drive layouts that turn a motion intent into
//! per-wheel direction and duty assignments.

pub mod kinematics;
