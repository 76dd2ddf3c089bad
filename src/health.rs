//! TCP connect probe for the control endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use labsweep_core::health::{spawn_health_check, HealthIndicator, HealthProbe};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::HealthConfig;

/// Succeeds when a TCP connection to `endpoint` opens within the timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    endpoint: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `endpoint` (`host:port`).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn target(&self) -> &str {
        &self.endpoint
    }

    async fn probe(&self) -> Result<()> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(stream) => {
                stream.with_context(|| format!("connect to {}", self.endpoint))?;
                Ok(())
            }
            Err(_) => bail!("no answer from {} within {:?}", self.endpoint, self.timeout),
        }
    }
}

/// Start the health check described by `config`, if an endpoint is configured.
pub fn start(config: &HealthConfig, indicator: HealthIndicator) -> Option<JoinHandle<()>> {
    let endpoint = config.endpoint.as_ref()?;
    let probe = TcpProbe::new(endpoint.clone(), Duration::from_millis(config.timeout_ms));
    tracing::info!(
        endpoint = %endpoint,
        interval_secs = config.interval_secs,
        "Starting health check"
    );
    Some(spawn_health_check(
        Arc::new(probe),
        indicator,
        Duration::from_secs(config.interval_secs),
    ))
}
