use std::time::Duration;

use serde::Deserialize;

use docbatch_api::{TxnOptions, WriteConcern};

/// `[transaction]` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    /// Commit acknowledgement policy. Majority unless overridden.
    #[serde(default)]
    pub write_concern: WriteConcern,

    /// Server-side limit for a single commit attempt.
    #[serde(default)]
    pub max_commit_time_ms: Option<u64>,

    /// Deadline for the whole transaction, retries included.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunnerConfig {
    pub fn options(&self) -> TxnOptions {
        TxnOptions {
            write_concern: self.write_concern,
            max_commit_time: self.max_commit_time_ms.map(Duration::from_millis),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
