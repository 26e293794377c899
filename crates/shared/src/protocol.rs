use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{ExchangeRateSnapshot, StatusReport},
    error::ApiError,
};

/// API name the broker routes scene-graph calls to.
pub const SCENE_GRAPH_API: &str = "hub.reality_world";

pub mod methods {
    pub const START_POLLING: &str = "startPolling";
    pub const STOP_POLLING: &str = "stopPolling";
    pub const GET_STATUS: &str = "getStatus";
    pub const SET_NODE_PROPERTY: &str = "setNodeProperty";
    pub const CALL_NODE_FUNCTION: &str = "callNodeFunction";
}

/// Events a module publishes to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum ModuleEvent {
    #[serde(rename = "statuschange")]
    StatusChange(StatusReport),
    #[serde(rename = "exchangerates")]
    ExchangeRates(ExchangeRateSnapshot),
}

impl ModuleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleEvent::StatusChange(_) => "statuschange",
            ModuleEvent::ExchangeRates(_) => "exchangerates",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpType {
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodePropertyRequest {
    pub node_path: String,
    pub property_path: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interp_type: Option<InterpType>,
    /// Interpolation duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl NodePropertyRequest {
    pub fn new(
        node_path: impl Into<String>,
        property_path: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            node_path: node_path.into(),
            property_path: property_path.into(),
            value: value.into(),
            interp_type: None,
            duration: None,
        }
    }

    pub fn interpolated(mut self, interp_type: InterpType, duration: f64) -> Self {
        self.interp_type = Some(interp_type);
        self.duration = Some(duration);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeFunctionRequest {
    pub node_path: String,
    pub property_path: String,
}

impl NodeFunctionRequest {
    pub fn new(node_path: impl Into<String>, property_path: impl Into<String>) -> Self {
        Self {
            node_path: node_path.into(),
            property_path: property_path.into(),
        }
    }
}

/// Frames exchanged with the broker over its WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BrokerFrame {
    Register {
        module: String,
        handlers: Vec<String>,
    },
    Subscribe {
        module: String,
    },
    Invoke {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api: Option<String>,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Result {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ApiError>,
    },
    Emit {
        module: String,
        event: ModuleEvent,
    },
    Event {
        module: String,
        event: ModuleEvent,
    },
}
