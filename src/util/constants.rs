//! Centralized constants for Opflow runtime configuration
//!
//! Defaults for every timeout and limit, overridable through `OpflowConfig`.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
// Execution Timeouts
// ═══════════════════════════════════════════════════════════════

/// Timeout for auxiliary/post module runs
pub const MODULE_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for an exploit module to be accepted as a job
pub const JOB_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall timeout for a command step
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a command channel is read before its output counts as settled
pub const COMMAND_READ_WINDOW: Duration = Duration::from_millis(2000);

/// Upper bound for a delay step
pub const MAX_DELAY_SECS: u64 = 86_400;

// ═══════════════════════════════════════════════════════════════
// Engine Limits
// ═══════════════════════════════════════════════════════════════

/// Activity log entries kept in memory
pub const ACTIVITY_CAPACITY: usize = 10_000;

/// Poll interval used while waiting for a run to settle
pub const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(25);
