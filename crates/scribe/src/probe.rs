//! HTTP reachability probe
//!
//! A terminal process has no platform push signal for connectivity, so the
//! CLI derives one: a cheap health call against the platform API. Any HTTP
//! response counts as reachable (even a 5xx — the network worked); only a
//! transport error reads as offline. The probe re-verifies early when the
//! pipeline publishes a connectivity-suspect hint.

use async_trait::async_trait;
use scribe_core::{ConnectivityState, PipelineEvent, ReachabilitySource};
use std::time::Duration;
use tokio::sync::broadcast;

pub struct HttpProbe {
    http: reqwest::Client,
    health_url: String,
    interval: Duration,
    initial: ConnectivityState,
    suspect: Option<broadcast::Receiver<PipelineEvent>>,
}

impl HttpProbe {
    /// Build a probe and take the synchronous-startup reading.
    pub async fn detect(
        base_url: &str,
        timeout: Duration,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let health_url = format!("{}/api/health", base_url.trim_end_matches('/'));

        let mut probe = Self {
            http,
            health_url,
            interval,
            initial: ConnectivityState::Offline,
            suspect: None,
        };
        probe.initial = probe.probe().await;
        Ok(probe)
    }

    /// Re-verify immediately whenever this event stream carries a
    /// connectivity-suspect hint.
    pub fn with_suspect_events(mut self, events: broadcast::Receiver<PipelineEvent>) -> Self {
        self.suspect = Some(events);
        self
    }

    async fn probe(&self) -> ConnectivityState {
        match self.http.get(&self.health_url).send().await {
            Ok(_) => ConnectivityState::Online,
            Err(e) => {
                tracing::debug!(error = %e, "Reachability probe failed");
                ConnectivityState::Offline
            }
        }
    }
}

#[async_trait]
impl ReachabilitySource for HttpProbe {
    fn initial_state(&self) -> ConnectivityState {
        self.initial
    }

    async fn next_signal(&mut self) -> Option<ConnectivityState> {
        let sleep = tokio::time::sleep(self.interval);
        tokio::pin!(sleep);

        let mut suspect_closed = false;
        if let Some(events) = &mut self.suspect {
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    event = events.recv() => match event {
                        Ok(PipelineEvent::ConnectivitySuspect) => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {
                            suspect_closed = true;
                            break;
                        }
                    },
                }
            }
        } else {
            sleep.await;
        }

        if suspect_closed {
            self.suspect = None;
        }

        Some(self.probe().await)
    }
}
