//! Eviction planning for the durable lookup cache.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use utoipa::ToSchema;

use crate::dao::models::MediaCacheEntity;

/// Rules applied by a maintenance sweep.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Entries not served for longer than this are removed.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "max_idle_seconds")]
    pub max_idle: Option<Duration>,
    /// Access-count floor for entries older than the grace period.
    pub min_access_count: u64,
    /// Age under which an entry is never removed for being unpopular.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "grace_period_seconds")]
    pub grace_period: Duration,
    /// Size cap; the least recently accessed entries above it are removed.
    pub max_entries: Option<usize>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_idle: Some(Duration::from_secs(90 * 24 * 60 * 60)),
            min_access_count: 2,
            grace_period: Duration::from_secs(30 * 24 * 60 * 60),
            max_entries: Some(50_000),
        }
    }
}

/// Keys selected for removal, grouped by the rule that selected them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Past the idle horizon.
    pub idle: Vec<String>,
    /// Below the access floor after the grace period.
    pub unpopular: Vec<String>,
    /// Above the size cap.
    pub overflow: Vec<String>,
}

impl EvictionPlan {
    /// Every selected key.
    pub fn keys(&self) -> Vec<String> {
        self.idle
            .iter()
            .chain(&self.unpopular)
            .chain(&self.overflow)
            .cloned()
            .collect()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.unpopular.is_empty() && self.overflow.is_empty()
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct EvictionReport {
    /// Entries inspected.
    pub examined: usize,
    /// Selected by the idle horizon.
    pub idle: usize,
    /// Selected by the access floor.
    pub unpopular: usize,
    /// Selected by the size cap.
    pub overflow: usize,
    /// Entries the store actually deleted.
    pub deleted: usize,
}

fn age(now: SystemTime, at: SystemTime) -> Duration {
    now.duration_since(at).unwrap_or_default()
}

/// Decide which entries a sweep removes. Each rule only sees what the previous ones kept.
pub fn plan(entries: &[MediaCacheEntity], policy: &EvictionPolicy, now: SystemTime) -> EvictionPlan {
    let mut plan = EvictionPlan::default();
    let mut kept = Vec::with_capacity(entries.len());

    for entry in entries {
        if policy
            .max_idle
            .is_some_and(|max_idle| age(now, entry.last_accessed_at) > max_idle)
        {
            plan.idle.push(entry.track_key.clone());
        } else if age(now, entry.created_at) > policy.grace_period
            && entry.access_count < policy.min_access_count
        {
            plan.unpopular.push(entry.track_key.clone());
        } else {
            kept.push(entry);
        }
    }

    if let Some(max_entries) = policy.max_entries {
        if kept.len() > max_entries {
            kept.sort_by_key(|entry| entry.last_accessed_at);
            let excess = kept.len() - max_entries;
            plan.overflow = kept[..excess]
                .iter()
                .map(|entry| entry.track_key.clone())
                .collect();
        }
    }

    plan
}
