use std::sync::Arc;

use async_trait::async_trait;
use broker_client::ApiHandler;
use serde_json::Value;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::methods,
};

use crate::poller::PollController;

/// The module API registered with the broker.
pub struct ModuleApi {
    controller: Arc<PollController>,
}

impl ModuleApi {
    pub fn new(controller: Arc<PollController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl ApiHandler for ModuleApi {
    fn methods(&self) -> Vec<String> {
        [
            methods::START_POLLING,
            methods::STOP_POLLING,
            methods::GET_STATUS,
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    async fn handle(&self, method: &str, _params: Value) -> Result<Value, ApiError> {
        let report = match method {
            methods::START_POLLING => self.controller.start(),
            methods::STOP_POLLING => self.controller.stop(),
            methods::GET_STATUS => self.controller.status(),
            other => {
                return Err(ApiError::new(
                    ErrorCode::NotFound,
                    format!("unknown method {other}"),
                ))
            }
        };
        serde_json::to_value(report).map_err(internal)
    }
}

fn internal(err: impl ToString) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
