//! Leveled logging gate.
//!
//! Relay messages carry a numeric level: 1 for connection-level events,
//! 2 for headers and errors, 3 for per-chunk data. A message is emitted when
//! the configured level is at least the message level, unless the request
//! is a diagnostic probe.

/// Target substring that marks probe traffic whose logging is suppressed.
pub const PROBE_PATH_PATTERN: &str = "/ws/target";

/// Returns true when `target` is a diagnostic probe request.
pub fn is_probe(target: &str) -> bool {
    target.contains(PROBE_PATH_PATTERN)
}

/// Per-request view of the debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugGate {
    level: u32,
    suppressed: bool,
}

impl DebugGate {
    pub fn new(level: u32, suppressed: bool) -> Self {
        Self { level, suppressed }
    }

    /// Builds the gate for a request target.
    pub fn for_target(level: u32, target: &str) -> Self {
        Self::new(level, is_probe(target))
    }

    /// Whether messages at `level` should be logged.
    pub fn enabled(&self, level: u32) -> bool {
        should_log(self.level, level, self.suppressed)
    }
}

/// `configured >= level`, forced off when `suppressed`.
pub fn should_log(configured: u32, level: u32, suppressed: bool) -> bool {
    !suppressed && configured >= level
}
