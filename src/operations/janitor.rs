//! Operation janitor — age-based removal of terminal operations.
//!
//! Long-lived chat sessions accumulate many historical generation and tool
//! operations. Recent history must stay addressable (a "regenerate" may
//! reference a just-completed id), so the sweep only removes operations
//! that are BOTH terminal and older than the caller's age threshold.
//! Running operations are never swept, regardless of age.
//!
//! The sweep executes as one atomic pass under the registry's synchronous
//! mutation model: the operation, every derived index entry, the parent's
//! child list, and any message-map entries come out together.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use super::{OperationRegistry, SharedOperationRegistry};

/// Background janitor cadence and retention window.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// How often the background loop sweeps.
    ///
    /// Default: 30 seconds
    pub interval: Duration,
    /// Terminal operations older than this are removed.
    ///
    /// Default: 60 seconds
    pub max_age: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        JanitorConfig {
            interval: Duration::from_secs(30),
            max_age: Duration::from_secs(60),
        }
    }
}

impl OperationRegistry {
    /// Remove every terminal operation whose end time is older than
    /// `now - max_age`. Returns the number of operations removed.
    pub fn cleanup_completed_operations(&mut self, max_age: Duration) -> usize {
        self.sweep_terminal_older_than(Utc::now(), max_age)
    }

    fn sweep_terminal_older_than(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let doomed: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.status.is_terminal())
            .filter(|op| op.metadata.end_time.is_some_and(|t| t < cutoff))
            .map(|op| op.id.clone())
            .collect();

        for id in &doomed {
            if let Some(op) = self.operations.remove(id) {
                self.unlink(&op);
            }
        }

        if !doomed.is_empty() {
            info!(
                count = doomed.len(),
                max_age_secs = max_age.as_secs(),
                "swept aged terminal operations"
            );
        }
        doomed.len()
    }
}

/// Background janitor task — sweeps aged terminal operations on an interval.
///
/// Call this in a `tokio::spawn` during application startup. Runs forever;
/// drop or abort the task to stop it.
pub async fn run_operation_janitor(registry: SharedOperationRegistry, config: JanitorConfig) {
    info!(
        interval_secs = config.interval.as_secs(),
        max_age_secs = config.max_age.as_secs(),
        "operation janitor started"
    );
    let mut interval = tokio::time::interval(config.interval);

    loop {
        interval.tick().await;
        let swept = registry
            .write()
            .await
            .cleanup_completed_operations(config.max_age);
        if swept > 0 {
            info!(swept, "operation janitor: removed aged terminal operations");
        }
    }
}
