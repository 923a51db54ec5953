//! Runtime Configuration
//!
//! Configuration is per thread, like the runtime itself. It only tunes
//! diagnostics and safety limits; no setting changes which reactions rerun.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default upper bound on scheduler steps performed by a single flush.
pub const DEFAULT_MAX_FLUSH_STEPS: usize = 100_000;

/// Tunables for the thread-local reactive runtime.
///
/// # Example
///
/// ```rust,ignore
/// let config = RuntimeConfig::from_json(r#"{ "stepping": true }"#)?;
/// Runtime::configure(config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Start in stepping mode: flushes only advance through `Runtime::step`.
    pub stepping: bool,

    /// Abort a flush after this many steps. `None` disables the limit.
    pub max_flush_steps: Option<usize>,

    /// Log every graph event at `trace` level.
    pub trace_events: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stepping: false,
            max_flush_steps: Some(DEFAULT_MAX_FLUSH_STEPS),
            trace_events: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
