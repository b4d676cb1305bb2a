//! Utility functions

pub mod log;

pub use log::{set_board_active, ConditionalStderrLayer};
