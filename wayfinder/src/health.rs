//! Workflow-health derivation consumed by the dashboard collaborator

use crate::config::HealthConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Status stored with the workflow by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredStatus {
    Active,
    Broken,
    NeedsReview,
    Archived,
}

/// Aggregate run statistics for one workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub id: String,
    pub status: StoredStatus,
    pub success_rate: f64,
    pub total_uses: u32,
    pub consecutive_failures: u32,
    /// Unix millis of the last update
    pub updated_at: u64,
}

/// Derived health level, worst first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Broken,
    NeedsReview,
    Healthy,
    Unknown,
}

/// Derive the health level shown on the dashboard
pub fn derive_health(stats: &WorkflowStats, config: &HealthConfig) -> HealthLevel {
    if stats.status == StoredStatus::Broken
        || stats.consecutive_failures >= config.consecutive_failures_broken
    {
        return HealthLevel::Broken;
    }
    let active = stats.status == StoredStatus::Active;
    if stats.status == StoredStatus::NeedsReview
        || (active
            && stats.total_uses >= config.min_runs_for_status
            && stats.success_rate >= config.success_rate_review
            && stats.success_rate <= config.success_rate_healthy)
    {
        return HealthLevel::NeedsReview;
    }
    if active
        && (stats.success_rate > config.success_rate_healthy
            || stats.total_uses < config.min_runs_for_status)
    {
        return HealthLevel::Healthy;
    }
    HealthLevel::Unknown
}

/// Dashboard ordering: worst health first, then most recently updated,
/// then workflow id so the sort is total and stable across runs.
pub fn compare_by_health(
    a: &WorkflowStats,
    b: &WorkflowStats,
    config: &HealthConfig,
) -> Ordering {
    derive_health(a, config)
        .cmp(&derive_health(b, config))
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.id.cmp(&b.id))
}
