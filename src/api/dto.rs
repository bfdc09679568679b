//! Data Transfer Objects
//!
//! Response types for the API endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hub::{BroadcastReport, HubStats};

/// Publish response
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Subscribers the payload was queued for
    pub delivered: usize,
    /// Subscribers disconnected because their queue was full
    pub evicted: usize,
}

impl From<BroadcastReport> for PublishResponse {
    fn from(report: BroadcastReport) -> Self {
        Self {
            delivered: report.delivered,
            evicted: report.evicted,
        }
    }
}

/// Hub statistics response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub hub: HubStats,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" while accepting subscribers, "shutting_down" afterwards
    pub status: String,
    /// Currently connected subscribers
    pub subscribers: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// When the server started
    pub started_at: DateTime<Utc>,
    /// Crate version
    pub version: String,
}
