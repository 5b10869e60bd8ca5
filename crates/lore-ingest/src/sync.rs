//! Delta computation between a source listing and the recorded map.

use chrono::{DateTime, Duration, Utc};
use lore_config::SyncConfig;
use lore_core::{ConversionStatus, SourceItem, SyncDelta, SyncRecord};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// When failed conversions are attempted again.
///
/// An item that failed `n` times is retried once `after × n` has passed
/// since its last attempt, until it has failed `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub after: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delays too large for a `Duration` saturate to the maximum, which
    /// amounts to never retrying.
    pub fn from_config(config: &SyncConfig) -> Self {
        let after = i64::try_from(config.retry_failed_after_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            after,
            max_attempts: config.max_retry_attempts,
        }
    }

    /// Retry on every pass.
    pub fn always() -> Self {
        Self {
            after: Duration::zero(),
            max_attempts: u32::MAX,
        }
    }

    pub fn is_due(&self, record: &SyncRecord, now: DateTime<Utc>) -> bool {
        if record.status != ConversionStatus::Failed || record.attempts >= self.max_attempts {
            return false;
        }
        let Some(wait) = i32::try_from(record.attempts.max(1))
            .ok()
            .and_then(|n| self.after.checked_mul(n))
        else {
            return false;
        };
        now.signed_duration_since(record.last_attempt_at) >= wait
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Classify a listing against the recorded map.
///
/// Only the proxy is compared; nothing is fetched. When an origin is listed
/// twice the first occurrence wins.
pub fn compute_delta(
    records: &HashMap<String, SyncRecord>,
    listing: Vec<SourceItem>,
    retry: &RetryPolicy,
    now: DateTime<Utc>,
) -> SyncDelta {
    let mut delta = SyncDelta::default();
    let mut seen = HashSet::new();

    for item in listing {
        if !seen.insert(item.origin_id.clone()) {
            warn!("Duplicate origin in listing, keeping the first: {}", item.origin_id);
            continue;
        }

        match records.get(&item.origin_id) {
            None => delta.added.push(item),
            Some(record) if record.proxy != item.proxy() => delta.updated.push(item),
            Some(record) if retry.is_due(record, now) => delta.retry.push(item),
            Some(_) => delta.unchanged.push(item.origin_id),
        }
    }

    let mut removed: Vec<String> = records
        .keys()
        .filter(|origin| !seen.contains(*origin))
        .cloned()
        .collect();
    removed.sort();
    delta.removed = removed;

    delta
}
