use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use broker_client::SceneGraph;
use shared::protocol::{ModuleEvent, NodeFunctionRequest, NodePropertyRequest};
use tokio::sync::broadcast;

use crate::poller::{PollController, PollTarget, SnapshotSource};

pub(crate) const SNAPSHOT_JSON: &str = r#"{"line1":{"value":1.08,"icon":"up"}}"#;
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(3000);

pub(crate) struct ScriptedSource {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    delay: Duration,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn always(body: &str) -> Self {
        Self::scripted(Vec::new(), body)
    }

    pub(crate) fn scripted(script: Vec<Result<&str, &str>>, fallback: &str) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|step| step.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            fallback: fallback.to_string(),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self) -> anyhow::Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let step = self.script.lock().expect("script").pop_front();
        match step {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingScene {
    properties: Mutex<Vec<NodePropertyRequest>>,
    functions: Mutex<Vec<NodeFunctionRequest>>,
    fail: bool,
}

impl RecordingScene {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn properties(&self) -> Vec<NodePropertyRequest> {
        self.properties.lock().expect("properties").clone()
    }

    pub(crate) fn functions(&self) -> Vec<NodeFunctionRequest> {
        self.functions.lock().expect("functions").clone()
    }
}

#[async_trait]
impl SceneGraph for RecordingScene {
    async fn set_node_property(&self, request: NodePropertyRequest) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("scene graph rejected {}", request.node_path));
        }
        self.properties.lock().expect("properties").push(request);
        Ok(())
    }

    async fn call_node_function(&self, request: NodeFunctionRequest) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("scene graph rejected {}", request.node_path));
        }
        self.functions.lock().expect("functions").push(request);
        Ok(())
    }
}

pub(crate) fn test_target() -> PollTarget {
    PollTarget {
        node_path: "Forex_0".into(),
        property_path: "Default//JXD/0".into(),
    }
}

pub(crate) struct Harness {
    pub(crate) controller: Arc<PollController>,
    pub(crate) source: Arc<ScriptedSource>,
    pub(crate) scene: Arc<RecordingScene>,
    pub(crate) events: broadcast::Sender<ModuleEvent>,
}

impl Harness {
    pub(crate) fn new(source: ScriptedSource) -> Self {
        Self::with_scene(source, RecordingScene::default())
    }

    pub(crate) fn with_scene(source: ScriptedSource, scene: RecordingScene) -> Self {
        let source = Arc::new(source);
        let scene = Arc::new(scene);
        let (events, _) = broadcast::channel(64);
        let controller = Arc::new(PollController::new(
            source.clone(),
            scene.clone(),
            events.clone(),
            test_target(),
            POLL_INTERVAL,
        ));
        Self {
            controller,
            source,
            scene,
            events,
        }
    }
}

pub(crate) fn drain(rx: &mut broadcast::Receiver<ModuleEvent>) -> Vec<ModuleEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = rx.try_recv() {
        drained.push(event);
    }
    drained
}
