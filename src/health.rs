//! Health check module
//! Provides health status for the application and its dependencies

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// A non-critical component (the cache) is down; requests still succeed.
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Degraded still serves traffic.
    pub fn is_serving(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// One dependency the service can report on.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), String>;

    /// Whether the service is unusable while this component is down.
    fn critical(&self) -> bool {
        true
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl HealthProbe for sqlx::PgPool {
    async fn check(&self) -> Result<(), String> {
        crate::database::health_check(self)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(feature = "cache")]
#[async_trait]
impl HealthProbe for crate::cache::RedisPool {
    async fn check(&self) -> Result<(), String> {
        crate::cache::health_check(self)
            .await
            .map_err(|e| e.to_string())
    }

    fn critical(&self) -> bool {
        false
    }
}

/// Health checker for the application
#[derive(Clone, Default)]
pub struct HealthChecker {
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
    probe_timeout: Option<Duration>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(mut self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push((name.into(), probe));
        self
    }

    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = Some(probe_timeout);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let limit = self.probe_timeout.unwrap_or(Duration::from_secs(5));

        for (name, probe) in &self.probes {
            let start = Instant::now();
            let component = match timeout(limit, probe.check()).await {
                Ok(Ok(())) => {
                    let elapsed = start.elapsed().as_millis();
                    info!(component = %name, response_time_ms = elapsed, "health check ok");
                    ComponentHealth::up(Some(elapsed))
                }
                Ok(Err(e)) => {
                    error!(component = %name, error = %e, "health check failed");
                    ComponentHealth::down(Some(e))
                }
                Err(_) => {
                    error!(component = %name, "health check timed out");
                    ComponentHealth::down(Some("Timeout".to_string()))
                }
            };

            if component.status == ComponentState::Down {
                health_status.status = if probe.critical() {
                    HealthState::Unhealthy
                } else if health_status.status == HealthState::Healthy {
                    HealthState::Degraded
                } else {
                    health_status.status.clone()
                };
            }
            health_status.checks.insert(name.clone(), component);
        }

        health_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        ok: bool,
        critical: bool,
    }

    #[async_trait]
    impl HealthProbe for Fixed {
        async fn check(&self) -> Result<(), String> {
            if self.ok {
                Ok(())
            } else {
                Err("connection refused".to_string())
            }
        }

        fn critical(&self) -> bool {
            self.critical
        }
    }

    struct Hangs;

    #[async_trait]
    impl HealthProbe for Hangs {
        async fn check(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthChecker::new().check_health().await;
        assert_eq!(health_status.status, HealthState::Healthy);
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_cache_outage_only_degrades() {
        let status = HealthChecker::new()
            .with_probe("database", Arc::new(Fixed { ok: true, critical: true }))
            .with_probe("cache", Arc::new(Fixed { ok: false, critical: false }))
            .check_health()
            .await;
        assert_eq!(status.status, HealthState::Degraded);
        assert!(status.is_serving());
        assert_eq!(status.checks["cache"].status, ComponentState::Down);
        assert!(status.checks["database"].response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_database_outage_is_unhealthy() {
        let status = HealthChecker::new()
            .with_probe("cache", Arc::new(Fixed { ok: false, critical: false }))
            .with_probe("database", Arc::new(Fixed { ok: false, critical: true }))
            .check_health()
            .await;
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_slow_probe_times_out() {
        let status = HealthChecker::new()
            .with_timeout(Duration::from_millis(20))
            .with_probe("database", Arc::new(Hangs))
            .check_health()
            .await;
        assert_eq!(status.status, HealthState::Unhealthy);
        assert_eq!(status.checks["database"].details.as_deref(), Some("Timeout"));
    }
}
