use serde::Serialize;
use std::time::{Duration, SystemTime};

use crate::handlers::SharedState;
use crate::throttle::ThrottleRate;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
    pub policy: PolicyStatus,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    pub elements: Option<u64>,
    pub error: Option<String>,
}

/// Cache and throttle settings plus their current occupancy.
#[derive(Debug, Serialize)]
pub struct PolicyStatus {
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    pub cached_responses: usize,
    pub anon_rate: ThrottleRate,
    pub user_rate: ThrottleRate,
    pub throttle_buckets: usize,
}

pub struct HealthChecker {
    state: SharedState,
}

impl HealthChecker {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let store_status = self.check_store().await;

        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.state.started_at.elapsed().as_secs(),
            dependencies: DependencyStatus {
                store: store_status,
            },
            policy: PolicyStatus {
                cache_ttl: self.state.cache.ttl(),
                cached_responses: self.state.cache.len(),
                anon_rate: self.state.throttle.anon_rate(),
                user_rate: self.state.throttle.user_rate(),
                throttle_buckets: self.state.throttle.tracked_buckets(),
            },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = std::time::Instant::now();
        let store = self.state.store.clone();

        let result = tokio::task::spawn_blocking(move || store.count(&Default::default())).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(count)) => ServiceStatus {
                status: "healthy".to_string(),
                response_time_ms,
                elements: Some(count),
                error: None,
            },
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Element store health check failed");
                ServiceStatus {
                    status: "unavailable".to_string(),
                    response_time_ms,
                    elements: None,
                    error: Some("Element store not reachable".to_string()),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Element store health check panicked");
                ServiceStatus {
                    status: "unavailable".to_string(),
                    response_time_ms,
                    elements: None,
                    error: Some("Element store check failed".to_string()),
                }
            }
        }
    }
}
