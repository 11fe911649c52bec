//! Utilities Module - shared infrastructure
//!
//! - `constants`: Centralized timeouts and limits

pub mod constants;

// Re-export public types
pub use constants::{
    ACTIVITY_CAPACITY, COMMAND_READ_WINDOW, COMMAND_TIMEOUT, JOB_START_TIMEOUT, MAX_DELAY_SECS,
    MODULE_TIMEOUT, SETTLE_POLL_INTERVAL,
};
