//! Liveness reporting for the long-running loops of the monitor.
//!
//! Each loop registers itself with a deadline and must report healthy more often
//! than that. The process is healthy while every registered component has a
//! report that has not expired yet. A registry with no components is unhealthy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Registered, no report yet.
    Starting,
    HealthyUntil(Instant),
    Unhealthy,
    /// The last healthy report expired.
    Stalled,
}

impl ComponentStatus {
    fn at(self, now: Instant) -> Self {
        match self {
            ComponentStatus::HealthyUntil(until) if until <= now => ComponentStatus::Stalled,
            other => other,
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    registry: HealthRegistry,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        self.registry.set(&self.component, status);
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        self.set(&component, ComponentStatus::Starting);
        HealthHandle {
            component,
            deadline,
            registry: self.clone(),
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let now = Instant::now();
        let components: HashMap<String, ComponentStatus> = match self.components.read() {
            Ok(guard) => guard
                .iter()
                .map(|(name, status)| (name.clone(), status.at(now)))
                .collect(),
            Err(_) => {
                warn!(registry = self.name, "health registry lock poisoned");
                return HealthStatus::default();
            }
        };

        let healthy = !components.is_empty()
            && components
                .values()
                .all(|status| matches!(status, ComponentStatus::HealthyUntil(_)));
        if !healthy {
            info!(registry = self.name, "health check failed: {:?}", components);
        }

        HealthStatus {
            healthy,
            components,
        }
    }

    fn set(&self, component: &str, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut guard) => {
                guard.insert(component.to_owned(), status);
            }
            Err(_) => warn!(registry = self.name, component, "health registry lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn one_component() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("poller".to_string(), Duration::from_secs(30));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components["poller"], ComponentStatus::Starting);

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn stalls_after_deadline() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("poller".to_string(), Duration::from_secs(30));
        handle.report_healthy();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(registry.get_status().healthy);

        tokio::time::advance(Duration::from_secs(2)).await;
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components["poller"], ComponentStatus::Stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn every_component_must_report() {
        let registry = HealthRegistry::new("liveness");
        let poller = registry.register("poller".to_string(), Duration::from_secs(30));
        let bot = registry.register("bot".to_string(), Duration::from_secs(30));

        poller.report_healthy();
        assert!(!registry.get_status().healthy);

        bot.report_healthy();
        assert!(registry.get_status().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn into_response() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("poller".to_string(), Duration::from_secs(30));

        let response = registry.get_status().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        handle.report_healthy();
        let response = registry.get_status().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
