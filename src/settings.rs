//! Batch coordinator settings.

use serde::{Deserialize, Serialize};

use crate::batch::BATCH_SIZE;

/// Tuning for [`BatchWorker`](crate::worker::BatchWorker).
///
/// Can be embedded in a config file; missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Max objects per batch lookup.
    limit: usize,
    /// A new lookup starts only while fewer transfers than this are running.
    threshold: usize,
    /// Attempts per object before its failure is reported.
    retry_count: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            limit: BATCH_SIZE,
            threshold: 10,
            retry_count: 3,
        }
    }
}

impl BatchSettings {
    pub fn new() -> Self {
        BatchSettings::default()
    }

    pub fn limit(&self) -> usize {
        self.limit.max(1)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.max(1)
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }
}
