use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use broker_client::SceneGraph;
use chrono::Utc;
use reqwest::Client;
use shared::{
    domain::{ExchangeRateSnapshot, LastSnapshot, PollStatus, StatusReport},
    protocol::{ModuleEvent, NodePropertyRequest},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};
use url::Url;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("snapshot fetch failed: {0:#}")]
    Fetch(anyhow::Error),
    #[error("snapshot is not a valid rates table: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("scene graph update failed: {0:#}")]
    Forward(anyhow::Error),
}

/// Where snapshots come from. Returns the raw body so it can be forwarded
/// to the scene graph byte for byte.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<String>;
}

pub struct HttpSnapshotSource {
    client: Client,
    url: Url,
}

impl HttpSnapshotSource {
    pub fn new(url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?;
        Ok(response.text().await?)
    }
}

/// Scene-graph property that receives every snapshot.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub node_path: String,
    pub property_path: String,
}

#[derive(Clone)]
struct Poller {
    source: Arc<dyn SnapshotSource>,
    scene: Arc<dyn SceneGraph>,
    events: broadcast::Sender<ModuleEvent>,
    target: PollTarget,
    last: Arc<RwLock<Option<LastSnapshot>>>,
}

impl Poller {
    /// Forwards the body to the scene graph as received, then parses it for
    /// subscribers. A body the scene accepted but that is not a rates table
    /// is never broadcast or cached.
    async fn poll_once(&self) -> Result<ExchangeRateSnapshot, PollError> {
        let body = self.source.fetch().await.map_err(PollError::Fetch)?;

        self.scene
            .set_node_property(NodePropertyRequest::new(
                &self.target.node_path,
                &self.target.property_path,
                body.as_str(),
            ))
            .await
            .map_err(PollError::Forward)?;

        let snapshot = ExchangeRateSnapshot::from_json(&body)?;
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(LastSnapshot {
            snapshot: snapshot.clone(),
            fetched_at: Utc::now(),
        });

        let _ = self
            .events
            .send(ModuleEvent::ExchangeRates(snapshot.clone()));
        debug!(lines = snapshot.len(), "snapshot forwarded");
        Ok(snapshot)
    }
}

/// Owns the single recurring poll timer.
///
/// The timer is "running" exactly while a stop handle is stored; `status`
/// reads nothing else.
pub struct PollController {
    poller: Poller,
    interval: Duration,
    timer: Mutex<Option<oneshot::Sender<()>>>,
}

impl PollController {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        scene: Arc<dyn SceneGraph>,
        events: broadcast::Sender<ModuleEvent>,
        target: PollTarget,
        interval: Duration,
    ) -> Self {
        assert!(!interval.is_zero(), "poll interval must be non-zero");
        Self {
            poller: Poller {
                source,
                scene,
                events,
                target,
                last: Arc::new(RwLock::new(None)),
            },
            interval,
            timer: Mutex::new(None),
        }
    }

    /// Starts polling with an immediate first tick. No-op while running.
    pub fn start(&self) -> StatusReport {
        let mut timer = self.timer();
        if timer.is_none() {
            let (stop_tx, stop_rx) = oneshot::channel();
            *timer = Some(stop_tx);
            self.emit_status(PollStatus::Started);
            tokio::spawn(run_timer(self.poller.clone(), self.interval, stop_rx));
            info!(interval_ms = self.interval.as_millis() as u64, "polling started");
        }
        PollStatus::Started.into()
    }

    /// Cancels the pending tick. A fetch already in flight finishes and is
    /// forwarded, but nothing is scheduled after it. No-op while stopped.
    pub fn stop(&self) -> StatusReport {
        let mut timer = self.timer();
        if let Some(stop_tx) = timer.take() {
            let _ = stop_tx.send(());
            self.emit_status(PollStatus::Stopped);
            info!("polling stopped");
        }
        PollStatus::Stopped.into()
    }

    pub fn status(&self) -> StatusReport {
        let status = if self.timer().is_some() {
            PollStatus::Started
        } else {
            PollStatus::Stopped
        };
        status.into()
    }

    pub fn last_snapshot(&self) -> Option<LastSnapshot> {
        self.poller
            .last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn timer(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_status(&self, status: PollStatus) {
        let _ = self
            .poller
            .events
            .send(ModuleEvent::StatusChange(status.into()));
    }
}

async fn run_timer(poller: Poller, period: Duration, mut stop: oneshot::Receiver<()>) {
    // Ticks are laid out from the start of each poll, so a slow fetch delays
    // the next tick instead of stacking another one behind it.
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        if let Err(error) = poller.poll_once().await {
            error!(%error, "poll failed");
        }
    }

    debug!("poll timer finished");
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
