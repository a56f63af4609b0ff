//! Running wait-time statistics for a provider queue
//!
//! A sample is the time between a booking entering the queue and its service
//! actually starting. Aggregates are kept as running sums so the queue
//! document stays small no matter how many customers were served.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitTimeStats {
    /// Number of samples collected
    pub sample_count: u64,
    /// Sum of all wait times (for calculating mean)
    pub sum_seconds: f64,
    /// Sum of squared wait times (for calculating variance)
    pub sum_squared_seconds: f64,
    pub min_seconds: Option<f64>,
    pub max_seconds: Option<f64>,
    /// When the most recent sample was taken
    pub last_sample_at: Option<DateTime<Utc>>,
}

impl WaitTimeStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self {
            sample_count: 0,
            sum_seconds: 0.0,
            sum_squared_seconds: 0.0,
            min_seconds: None,
            max_seconds: None,
            last_sample_at: None,
        }
    }

    pub fn add_sample(&mut self, wait_time: Duration, observed_at: DateTime<Utc>) {
        let seconds = wait_time.as_secs_f64();

        self.sample_count += 1;
        self.sum_seconds += seconds;
        self.sum_squared_seconds += seconds * seconds;
        self.min_seconds = Some(self.min_seconds.map_or(seconds, |m| m.min(seconds)));
        self.max_seconds = Some(self.max_seconds.map_or(seconds, |m| m.max(seconds)));
        self.last_sample_at = Some(observed_at);
    }

    /// Mean wait time, `None` until the first sample arrives
    pub fn mean(&self) -> Option<Duration> {
        if self.sample_count == 0 {
            return None;
        }

        let mean_seconds = self.sum_seconds / self.sample_count as f64;
        Some(Duration::from_secs_f64(mean_seconds))
    }

    /// Population standard deviation, `None` with fewer than two samples
    pub fn standard_deviation(&self) -> Option<Duration> {
        if self.sample_count <= 1 {
            return None;
        }

        let mean_seconds = self.sum_seconds / self.sample_count as f64;
        let variance =
            (self.sum_squared_seconds / self.sample_count as f64) - (mean_seconds * mean_seconds);
        Some(Duration::from_secs_f64(variance.max(0.0).sqrt()))
    }

    pub fn min(&self) -> Option<Duration> {
        self.min_seconds.map(Duration::from_secs_f64)
    }

    pub fn max(&self) -> Option<Duration> {
        self.max_seconds.map(Duration::from_secs_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// Wait-time aggregates in seconds, as reported by snapshots and `/stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitTimeSummary {
    /// Customers who have entered service
    pub served: u64,
    pub mean_seconds: Option<f64>,
    pub std_dev_seconds: Option<f64>,
    pub min_seconds: Option<f64>,
    pub max_seconds: Option<f64>,
}

impl WaitTimeStats {
    pub fn summary(&self) -> WaitTimeSummary {
        WaitTimeSummary {
            served: self.sample_count,
            mean_seconds: self.mean().map(|d| d.as_secs_f64()),
            std_dev_seconds: self.standard_deviation().map(|d| d.as_secs_f64()),
            min_seconds: self.min().map(|d| d.as_secs_f64()),
            max_seconds: self.max().map(|d| d.as_secs_f64()),
        }
    }
}

impl Default for WaitTimeStats {
    fn default() -> Self {
        Self::new()
    }
}
