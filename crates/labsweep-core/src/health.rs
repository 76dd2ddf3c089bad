//! Control endpoint health check.
//!
//! A low-frequency background task probes the control endpoint and publishes the
//! result to a [`HealthIndicator`]. It only ever updates the indicator; it has no
//! access to connection state.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Reachability of the control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointStatus {
    /// No probe has completed yet
    Unknown,
    /// Last probe succeeded
    Reachable,
    /// Last probe failed
    Unreachable(String),
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointStatus::Unknown => write!(f, "unknown"),
            EndpointStatus::Reachable => write!(f, "reachable"),
            EndpointStatus::Unreachable(reason) => write!(f, "unreachable ({})", reason),
        }
    }
}

/// Snapshot published after each probe.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Current status
    pub status: EndpointStatus,
    /// When the last probe finished
    pub last_checked: Option<Instant>,
    /// Failed probes since the last success
    pub consecutive_failures: u32,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            status: EndpointStatus::Unknown,
            last_checked: None,
            consecutive_failures: 0,
        }
    }
}

/// Something that can check whether the control endpoint is alive.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// What is being probed, for logs.
    fn target(&self) -> &str;

    /// Perform one probe.
    async fn probe(&self) -> anyhow::Result<()>;
}

/// Status indicator shared between the health task and its readers.
#[derive(Debug, Clone)]
pub struct HealthIndicator {
    tx: Arc<watch::Sender<HealthSnapshot>>,
}

impl Default for HealthIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthIndicator {
    /// Create an indicator in the `Unknown` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HealthSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Latest snapshot.
    pub fn current(&self) -> HealthSnapshot {
        self.tx.borrow().clone()
    }

    /// Receive every future update.
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.tx.subscribe()
    }

    fn record(&self, outcome: anyhow::Result<()>) {
        self.tx.send_modify(|snapshot| {
            snapshot.last_checked = Some(Instant::now());
            match outcome {
                Ok(()) => {
                    snapshot.status = EndpointStatus::Reachable;
                    snapshot.consecutive_failures = 0;
                }
                Err(e) => {
                    snapshot.status = EndpointStatus::Unreachable(e.to_string());
                    snapshot.consecutive_failures += 1;
                }
            }
        });
    }
}

/// Spawn the periodic health check. Abort the returned handle to stop it.
pub fn spawn_health_check(
    probe: Arc<dyn HealthProbe>,
    indicator: HealthIndicator,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let outcome = probe.probe().await;
            match &outcome {
                Ok(()) => debug!(target_endpoint = %probe.target(), "Control endpoint reachable"),
                Err(e) => warn!(
                    target_endpoint = %probe.target(),
                    error = %e,
                    "Control endpoint unreachable"
                ),
            }
            indicator.record(outcome);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProbe {
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        fn target(&self) -> &str {
            "flaky"
        }

        async fn probe(&self) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                anyhow::bail!("connection refused")
            }
            Ok(())
        }
    }

    #[test]
    fn test_indicator_starts_unknown() {
        let indicator = HealthIndicator::new();
        let snapshot = indicator.current();
        assert_eq!(snapshot.status, EndpointStatus::Unknown);
        assert!(snapshot.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_health_check_updates_indicator() {
        let indicator = HealthIndicator::new();
        let mut rx = indicator.subscribe();
        let probe = Arc::new(FlakyProbe {
            calls: AtomicU32::new(0),
        });

        let handle = spawn_health_check(probe, indicator.clone(), Duration::from_millis(5));

        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone();
        assert!(matches!(first.status, EndpointStatus::Unreachable(_)));
        assert_eq!(first.consecutive_failures, 1);

        rx.changed().await.unwrap();
        let second = rx.borrow_and_update().clone();
        assert_eq!(second.status, EndpointStatus::Reachable);
        assert_eq!(second.consecutive_failures, 0);

        handle.abort();
    }
}
