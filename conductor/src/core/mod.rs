//! Deterministic core logic for conductor.
//!
//! This module contains pure, side-effect-free logic that can be unit-tested
//! without filesystem access. Timestamps are always passed in.

pub mod agents;
pub mod enforcement;
pub mod file_class;
pub mod maestro;
pub mod ralph;
pub mod retry;
pub mod ttl;
pub mod types;
