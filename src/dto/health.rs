use serde::Serialize;
use utoipa::ToSchema;

/// Whether the jobs can currently reach their store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// A healthy store is installed.
    Ok,
    /// No store, or the store failed its last health check.
    Degraded,
}

/// Body returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Current status.
    pub status: HealthStatus,
}

impl HealthResponse {
    /// The service can run jobs.
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
        }
    }

    /// The service is up but job triggers will be refused.
    pub fn degraded() -> Self {
        Self {
            status: HealthStatus::Degraded,
        }
    }
}
