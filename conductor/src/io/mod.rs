//! I/O helpers for conductor commands.

pub mod archive;
pub mod audit;
pub mod config;
pub mod learning;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod store;
