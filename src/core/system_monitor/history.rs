//! Append-only time series of samples with age-based retention.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::metrics::MetricSample;
use crate::error::{HealthError, Result};

/// Samples older than this are eligible for removal.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;
/// Retention never leaves fewer samples than this.
pub const DEFAULT_MIN_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub min_samples: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(DEFAULT_MAX_AGE_DAYS),
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

/// Single source of truth for sample history.
///
/// Readers get copy-on-read snapshots (`Vec<Arc<MetricSample>>`), so a reader
/// never holds the lock beyond the copy and never observes a torn window.
#[derive(Debug, Default)]
pub struct SampleStore {
    samples: RwLock<VecDeque<Arc<MetricSample>>>,
    retention: RetentionPolicy,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::default())
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            retention,
        }
    }

    /// Append a sample, rejecting it if it would break timestamp ordering.
    ///
    /// Retention runs on every append, relative to the appended timestamp.
    pub fn append(&self, sample: MetricSample) -> Result<Arc<MetricSample>> {
        let sample = Arc::new(sample);
        let mut samples = self.samples.write();

        if let Some(latest) = samples.back() {
            if sample.timestamp < latest.timestamp {
                return Err(HealthError::OutOfOrderSample {
                    latest: latest.timestamp.to_rfc3339(),
                    incoming: sample.timestamp.to_rfc3339(),
                });
            }
        }

        samples.push_back(Arc::clone(&sample));
        let horizon = sample.timestamp - self.retention.max_age;
        Self::trim_locked(&mut samples, horizon, self.retention.min_samples);

        Ok(sample)
    }

    /// Seed the store from persisted history. Out-of-order entries are skipped.
    pub fn hydrate<I>(&self, history: I) -> usize
    where
        I: IntoIterator<Item = MetricSample>,
    {
        let mut loaded = 0;
        for sample in history {
            if self.append(sample).is_ok() {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn latest(&self) -> Option<Arc<MetricSample>> {
        self.samples.read().back().cloned()
    }

    /// Samples with `from <= timestamp <= to`, oldest first.
    pub fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Arc<MetricSample>> {
        self.samples
            .read()
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .cloned()
            .collect()
    }

    /// The newest `n` samples, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<Arc<MetricSample>> {
        let samples = self.samples.read();
        let skip = samples.len().saturating_sub(n);
        samples.iter().skip(skip).cloned().collect()
    }

    /// Drop samples older than `older_than`.
    ///
    /// The cutoff is clamped to the retention horizon of the newest sample and
    /// the minimum sample count is always kept. Returns the number removed.
    pub fn trim(&self, older_than: DateTime<Utc>) -> usize {
        let mut samples = self.samples.write();
        let cutoff = match samples.back() {
            Some(latest) => older_than.min(latest.timestamp - self.retention.max_age),
            None => return 0,
        };
        Self::trim_locked(&mut samples, cutoff, self.retention.min_samples)
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    fn trim_locked(
        samples: &mut VecDeque<Arc<MetricSample>>,
        cutoff: DateTime<Utc>,
        min_samples: usize,
    ) -> usize {
        let mut removed = 0;
        while samples.len() > min_samples {
            match samples.front() {
                Some(oldest) if oldest.timestamp < cutoff => {
                    samples.pop_front();
                    removed += 1;
                }
                _ => break,
            }
        }
        removed
    }
}
