//! Headless model of the module's control panel.
//!
//! `PanelState` mirrors what the backend owns (poll status and the last
//! snapshot) and holds the operator's local edits. `PanelClient` sends the
//! panel's actions through the broker. `BackendHttp` reads the backend's
//! last snapshot to seed the table.

use anyhow::{Context, Result};
use broker_client::{BrokerClient, RemoteEvent, SceneGraph};
use serde_json::Value;
use shared::{
    domain::{
        ExchangeRateSnapshot, Icon, LineId, PollStatus, Rotator, StatusReport, Transform, Vector3,
    },
    protocol::{methods, InterpType, ModuleEvent, NodeFunctionRequest, NodePropertyRequest},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

mod http;

pub use http::BackendHttp;

pub const FOREX_NODE: &str = "Forex_0";
pub const FOREX_DATA_PROPERTY: &str = "Default//JXD/0";
pub const PLAY_IN_FUNCTION: &str = "//PLAY/0";
pub const PLAY_OUT_FUNCTION: &str = "//REVERSE/0";
pub const USER_TRACK_NODE: &str = "UserTrack_0";
pub const USER_TRANSFORM_PROPERTY: &str = "Input//UserTransform/0";
pub const CAMERA_MOVE_SECONDS: f64 = 2.0;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("icons follow the backend while auto update is on")]
    AutoUpdateActive,
    #[error("unknown line {0}")]
    UnknownLine(LineId),
    #[error("failed to encode scene value: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPreset {
    First,
    Second,
}

impl CameraPreset {
    pub fn transform(self) -> Transform {
        let unit = Vector3 {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        };
        match self {
            CameraPreset::First => Transform {
                location: Vector3 {
                    x: 700.0,
                    y: 200.0,
                    z: 200.0,
                },
                rotator: Rotator {
                    pitch: 0.0,
                    yaw: -158.0,
                    roll: 0.0,
                },
                scale_3d: unit,
            },
            CameraPreset::Second => Transform {
                location: Vector3 {
                    x: 200.0,
                    y: -900.0,
                    z: 200.0,
                },
                rotator: Rotator {
                    pitch: 0.0,
                    yaw: 116.0,
                    roll: 0.0,
                },
                scale_3d: unit,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PanelState {
    status: PollStatus,
    rates: ExchangeRateSnapshot,
}

impl PanelState {
    pub fn new(status: PollStatus, rates: ExchangeRateSnapshot) -> Self {
        Self { status, rates }
    }

    pub fn status(&self) -> PollStatus {
        self.status
    }

    pub fn auto_update(&self) -> bool {
        self.status.is_started()
    }

    pub fn rates(&self) -> &ExchangeRateSnapshot {
        &self.rates
    }

    /// Folds a backend event into the mirrored state. Snapshots replace the
    /// table, including any local edits.
    pub fn apply(&mut self, event: &ModuleEvent) {
        match event {
            ModuleEvent::StatusChange(report) => self.status = report.status,
            ModuleEvent::ExchangeRates(snapshot) => self.rates = snapshot.clone(),
        }
    }

    pub fn toggle_icon(&mut self, line: &LineId) -> Result<Icon, PanelError> {
        if self.auto_update() {
            return Err(PanelError::AutoUpdateActive);
        }
        self.rates
            .update(line, |entry| entry.icon = entry.icon.toggled())
            .map(|entry| entry.icon)
            .ok_or_else(|| PanelError::UnknownLine(line.clone()))
    }

    pub fn set_value(&mut self, line: &LineId, value: f64) -> Result<(), PanelError> {
        self.rates
            .update(line, |entry| entry.value = value)
            .map(|_| ())
            .ok_or_else(|| PanelError::UnknownLine(line.clone()))
    }

    /// The `setNodeProperty` call pushing the current table to the scene.
    pub fn update_request(&self) -> Result<NodePropertyRequest, PanelError> {
        Ok(NodePropertyRequest::new(
            FOREX_NODE,
            FOREX_DATA_PROPERTY,
            self.rates.to_json()?,
        ))
    }
}

pub fn play_in_request() -> NodeFunctionRequest {
    NodeFunctionRequest::new(FOREX_NODE, PLAY_IN_FUNCTION)
}

pub fn play_out_request() -> NodeFunctionRequest {
    NodeFunctionRequest::new(FOREX_NODE, PLAY_OUT_FUNCTION)
}

pub fn goto_request(preset: CameraPreset) -> Result<NodePropertyRequest, PanelError> {
    let value = serde_json::to_value(preset.transform())?;
    Ok(
        NodePropertyRequest::new(USER_TRACK_NODE, USER_TRANSFORM_PROPERTY, value)
            .interpolated(InterpType::EaseInOut, CAMERA_MOVE_SECONDS),
    )
}

/// Broker-side handle on the backend module's API.
pub struct PanelClient {
    broker: BrokerClient,
    backend_module: String,
}

impl PanelClient {
    pub fn new(broker: BrokerClient, backend_module: impl Into<String>) -> Self {
        Self {
            broker,
            backend_module: backend_module.into(),
        }
    }

    pub async fn start_polling(&self) -> Result<()> {
        self.invoke(methods::START_POLLING).await.map(|_| ())
    }

    pub async fn stop_polling(&self) -> Result<()> {
        self.invoke(methods::STOP_POLLING).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<PollStatus> {
        let value = self.invoke(methods::GET_STATUS).await?;
        let report: StatusReport =
            serde_json::from_value(value).context("backend returned malformed status")?;
        Ok(report.status)
    }

    pub async fn push_table(&self, state: &PanelState) -> Result<()> {
        self.broker.set_node_property(state.update_request()?).await
    }

    pub async fn play_in(&self) -> Result<()> {
        self.broker.call_node_function(play_in_request()).await
    }

    pub async fn play_out(&self) -> Result<()> {
        self.broker.call_node_function(play_out_request()).await
    }

    pub async fn goto(&self, preset: CameraPreset) -> Result<()> {
        self.broker.set_node_property(goto_request(preset)?).await
    }

    /// Subscribes to the backend's events, filtering out other modules.
    pub fn watch(&self) -> Result<BackendEvents> {
        let rx = self.broker.events();
        self.broker.subscribe(self.backend_module.clone())?;
        Ok(BackendEvents {
            rx,
            module: self.backend_module.clone(),
        })
    }

    pub async fn disconnected(&self) {
        self.broker.disconnected().await
    }

    async fn invoke(&self, method: &str) -> Result<Value> {
        debug!(module = %self.backend_module, method, "invoking backend");
        let value = self
            .broker
            .call(&self.backend_module, method, Value::Null)
            .await
            .with_context(|| format!("{method} failed"))?;
        Ok(value)
    }
}

pub struct BackendEvents {
    rx: broadcast::Receiver<RemoteEvent>,
    module: String,
}

impl BackendEvents {
    /// Next event from the backend; `None` once the event channel closes.
    pub async fn next(&mut self) -> Option<ModuleEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.module == self.module => return Some(event.event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "panel lagged behind backend events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
