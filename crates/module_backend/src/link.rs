use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use broker_client::SceneGraph;
use shared::protocol::{NodeFunctionRequest, NodePropertyRequest};
use tokio::sync::RwLock;

/// Scene graph reached through whichever broker connection is current.
///
/// Calls made while detached fail, which the poller treats like any other
/// transient error.
#[derive(Default)]
pub struct SceneGraphLink {
    current: RwLock<Option<Arc<dyn SceneGraph>>>,
}

impl SceneGraphLink {
    pub async fn attach(&self, scene: Arc<dyn SceneGraph>) {
        *self.current.write().await = Some(scene);
    }

    pub async fn detach(&self) {
        self.current.write().await.take();
    }

    async fn current(&self) -> Result<Arc<dyn SceneGraph>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("scene graph unavailable: broker not connected"))
    }
}

#[async_trait]
impl SceneGraph for SceneGraphLink {
    async fn set_node_property(&self, request: NodePropertyRequest) -> Result<()> {
        self.current().await?.set_node_property(request).await
    }

    async fn call_node_function(&self, request: NodeFunctionRequest) -> Result<()> {
        self.current().await?.call_node_function(request).await
    }
}

#[cfg(test)]
#[path = "tests/link_tests.rs"]
mod tests;
