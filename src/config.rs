/*!
 * Lock Configuration
 *
 * Construction-time configuration for lock managers. Sourced once at
 * startup (environment or a JSON document) and passed explicitly to every
 * manager constructor; there is no ambient global tracking flag.
 */

use crate::diagnostics::WaitGraph;
use crate::errors::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Enables tracking for managers built without an explicit diagnostics mode
pub const TRACK_LOCKS_ENV: &str = "LOCKS_TRACK";
/// Enables backtrace capture for tracked locks
pub const STACK_TRACE_ENV: &str = "LOCKS_STACK_TRACE";
/// Poll interval (milliseconds) for stall detection and bounded waits
pub const POLL_INTERVAL_ENV: &str = "LOCKS_POLL_INTERVAL_MS";
/// Override for the writer preference weight
pub const WRITE_PREFERENCE_ENV: &str = "LOCKS_WRITE_PREFERENCE";

/// Default poll interval before a waiting thread reports a possible stall
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10_000);

/// Upper bound on a single bounded wait for the exclusive primitive
pub(crate) const MAX_BOUNDED_WAIT: Duration = Duration::from_millis(1_000);

/// Diagnostics mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticsMode {
    /// Passthrough, no overhead
    None,
    /// Force-release and report locks dropped without release
    LeakCleanup,
    /// Leak cleanup plus stall/deadlock reporting
    Tracking,
    /// Tracking with captured acquisition backtraces
    TrackingWithStackTrace,
}

impl DiagnosticsMode {
    /// Expand into individual diagnostic flags
    pub fn flags(self) -> LockDiagnostics {
        match self {
            DiagnosticsMode::None => LockDiagnostics::default(),
            DiagnosticsMode::LeakCleanup => LockDiagnostics {
                release_abandoned: true,
                ..Default::default()
            },
            DiagnosticsMode::Tracking => LockDiagnostics {
                release_abandoned: true,
                detect_stalled_or_deadlock: true,
                stack_trace: false,
            },
            DiagnosticsMode::TrackingWithStackTrace => LockDiagnostics {
                release_abandoned: true,
                detect_stalled_or_deadlock: true,
                stack_trace: true,
            },
        }
    }
}

/// Individual diagnostic flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDiagnostics {
    pub release_abandoned: bool,
    pub detect_stalled_or_deadlock: bool,
    pub stack_trace: bool,
}

impl LockDiagnostics {
    /// Map the legacy "track locks" boolean
    pub fn from_legacy_tracking(track_locks: bool) -> Self {
        if track_locks {
            DiagnosticsMode::TrackingWithStackTrace.flags()
        } else {
            Self::default()
        }
    }

    /// Check if any diagnostic is enabled
    #[inline]
    pub fn any(&self) -> bool {
        self.release_abandoned || self.detect_stalled_or_deadlock || self.stack_trace
    }

    /// Check if stall/deadlock detection is enabled
    #[inline]
    pub fn tracking(&self) -> bool {
        self.detect_stalled_or_deadlock
    }
}

/// Lock manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Alias prefixed to every diagnostic message
    pub alias: String,
    /// Explicit diagnostics mode; `None` defers to `track_locks`
    pub diagnostics: Option<DiagnosticsMode>,
    /// Poll interval for stall reports and bounded waits
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Writer preference weight (>= 1); `None` uses the manager default
    pub write_preference: Option<u32>,
    /// Enables tracking when `diagnostics` is unset
    pub track_locks: bool,
    /// Capture backtraces when tracking is enabled through `track_locks`
    pub stack_trace: bool,
    /// Wait graph shared by every manager built from clones of this config
    #[serde(skip)]
    pub(crate) wait_graph: Arc<WaitGraph>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            alias: String::new(),
            diagnostics: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_preference: None,
            track_locks: false,
            stack_trace: false,
            wait_graph: Arc::new(WaitGraph::default()),
        }
    }
}

impl LockConfig {
    /// Configuration with an explicit diagnostics mode
    pub fn with_diagnostics(mode: DiagnosticsMode) -> Self {
        Self {
            diagnostics: Some(mode),
            ..Default::default()
        }
    }

    /// Load configuration from the `LOCKS_*` environment variables
    pub fn from_env() -> LockResult<Self> {
        let mut config = Self::default();

        if let Some(value) = env_flag(TRACK_LOCKS_ENV) {
            config.track_locks = value;
        }
        if let Some(value) = env_flag(STACK_TRACE_ENV) {
            config.stack_trace = value;
        }
        if let Ok(value) = std::env::var(POLL_INTERVAL_ENV) {
            let millis: u64 = value.trim().parse().map_err(|_| {
                LockError::InvalidConfig(format!("{}={} is not a number", POLL_INTERVAL_ENV, value))
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }
        if let Ok(value) = std::env::var(WRITE_PREFERENCE_ENV) {
            let weight: u32 = value.trim().parse().map_err(|_| {
                LockError::InvalidConfig(format!("{}={} is not a number", WRITE_PREFERENCE_ENV, value))
            })?;
            config.write_preference = Some(weight);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> LockResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LockError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.write_preference == Some(0) {
            return Err(LockError::InvalidConfig(
                "write_preference must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(LockError::InvalidConfig(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn write_preference(mut self, weight: u32) -> Self {
        self.write_preference = Some(weight);
        self
    }

    /// Resolve the effective diagnostic flags
    pub fn resolved_diagnostics(&self) -> LockDiagnostics {
        match self.diagnostics {
            Some(mode) => mode.flags(),
            None if self.track_locks => {
                let mut flags = DiagnosticsMode::Tracking.flags();
                flags.stack_trace = self.stack_trace;
                flags
            }
            None => LockDiagnostics::default(),
        }
    }

    /// Bounded wait used when diagnostics need periodic cleanup
    #[inline]
    pub(crate) fn bounded_wait(&self) -> Duration {
        self.poll_interval.min(MAX_BOUNDED_WAIT)
    }

    #[inline]
    pub(crate) fn wait_graph(&self) -> &Arc<WaitGraph> {
        &self.wait_graph
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
