use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        methods, BrokerFrame, ModuleEvent, NodeFunctionRequest, NodePropertyRequest,
        SCENE_GRAPH_API,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const BROKER_PATH: &str = "broker";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid broker url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to connect to broker at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[error("broker connection closed")]
    Closed,
    #[error("broker call {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("remote call failed: {0}")]
    Remote(ApiError),
    #[error("invalid broker payload: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub url: Url,
    pub module_name: String,
    pub call_timeout: Duration,
}

impl BrokerOptions {
    /// Options for the broker endpoint of a Hub listening on `host:port`.
    pub fn for_hub(
        host: &str,
        port: u16,
        module_name: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let url = Url::parse(&format!("ws://{host}:{port}/"))?.join(BROKER_PATH)?;
        Ok(Self {
            url,
            module_name: module_name.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Serves the methods a module registers with the broker.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    fn methods(&self) -> Vec<String>;
    async fn handle(&self, method: &str, params: Value) -> Result<Value, ApiError>;
}

/// Handler for clients that only consume other modules' APIs.
pub struct NoHandlers;

#[async_trait]
impl ApiHandler for NoHandlers {
    fn methods(&self) -> Vec<String> {
        Vec::new()
    }

    async fn handle(&self, method: &str, _params: Value) -> Result<Value, ApiError> {
        Err(ApiError::new(
            ErrorCode::NotFound,
            format!("no handler registered for {method}"),
        ))
    }
}

/// Remote calls into the Hub's scene graph.
#[async_trait]
pub trait SceneGraph: Send + Sync {
    async fn set_node_property(&self, request: NodePropertyRequest) -> Result<()>;
    async fn call_node_function(&self, request: NodeFunctionRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub module: String,
    pub event: ModuleEvent,
}

type PendingCalls = HashMap<u64, oneshot::Sender<Result<Value, ApiError>>>;

struct Inner {
    module_name: String,
    call_timeout: Duration,
    outgoing: mpsc::UnboundedSender<BrokerFrame>,
    pending: Mutex<PendingCalls>,
    next_id: AtomicU64,
    events: broadcast::Sender<RemoteEvent>,
    disconnected: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    /// Opens the broker socket and registers `handler`'s methods under the
    /// module name.
    pub async fn connect(
        options: BrokerOptions,
        handler: Arc<dyn ApiHandler>,
    ) -> Result<Self, BrokerError> {
        let (ws_stream, _) =
            connect_async(options.url.as_str())
                .await
                .map_err(|source| BrokerError::Connect {
                    url: options.url.to_string(),
                    source: Box::new(source),
                })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<BrokerFrame>();
        let (disconnected_tx, disconnected) = watch::channel(false);
        let (events, _) = broadcast::channel(256);

        let inner = Arc::new(Inner {
            module_name: options.module_name.clone(),
            call_timeout: options.call_timeout,
            outgoing,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            disconnected,
            tasks: Mutex::new(Vec::new()),
        });

        inner
            .outgoing
            .send(BrokerFrame::Register {
                module: options.module_name.clone(),
                handlers: handler.methods(),
            })
            .map_err(|_| BrokerError::Closed)?;

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(v) => v,
                    Err(error) => {
                        warn!(%error, "dropping unencodable broker frame");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let reader_inner = Arc::clone(&inner);
        let reader_task = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<BrokerFrame>(&text) {
                        Ok(frame) => reader_inner.dispatch(frame, &handler).await,
                        Err(error) => warn!(%error, "ignoring invalid broker frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "broker receive failed");
                        break;
                    }
                }
            }
            reader_inner.fail_pending().await;
            let _ = disconnected_tx.send(true);
        });

        inner.tasks.lock().await.extend([writer_task, reader_task]);
        info!(url = %options.url, module = %options.module_name, "connected to broker");

        Ok(Self { inner })
    }

    pub fn module_name(&self) -> &str {
        &self.inner.module_name
    }

    pub fn is_connected(&self) -> bool {
        !*self.inner.disconnected.borrow()
    }

    /// Calls `method` on `api` and waits for its result.
    pub async fn call(
        &self,
        api: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Closed);
        }
        let params = serde_json::to_value(params)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let frame = BrokerFrame::Invoke {
            id,
            api: Some(api.to_string()),
            method: method.to_string(),
            params,
        };
        if self.inner.outgoing.send(frame).is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(BrokerError::Closed);
        }

        match tokio::time::timeout(self.inner.call_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(BrokerError::Remote(error)),
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(BrokerError::Timeout {
                    method: method.to_string(),
                    timeout: self.inner.call_timeout,
                })
            }
        }
    }

    /// Publishes one of this module's events. Delivery is not acknowledged.
    pub fn emit(&self, event: ModuleEvent) -> Result<(), BrokerError> {
        self.inner
            .outgoing
            .send(BrokerFrame::Emit {
                module: self.inner.module_name.clone(),
                event,
            })
            .map_err(|_| BrokerError::Closed)
    }

    /// Asks the broker to forward events published by `module`.
    pub fn subscribe(&self, module: impl Into<String>) -> Result<(), BrokerError> {
        self.inner
            .outgoing
            .send(BrokerFrame::Subscribe {
                module: module.into(),
            })
            .map_err(|_| BrokerError::Closed)
    }

    pub fn events(&self) -> broadcast::Receiver<RemoteEvent> {
        self.inner.events.subscribe()
    }

    /// Resolves once the broker connection is gone.
    pub async fn disconnected(&self) {
        let mut rx = self.inner.disconnected.clone();
        let _ = rx.wait_for(|disconnected| *disconnected).await;
    }

    /// Tears down the connection tasks. Outstanding calls fail with `Closed`.
    pub async fn destroy(&self) {
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inner.fail_pending().await;
        debug!(module = %self.inner.module_name, "broker client destroyed");
    }
}

impl Inner {
    async fn dispatch(&self, frame: BrokerFrame, handler: &Arc<dyn ApiHandler>) {
        match frame {
            BrokerFrame::Invoke {
                id, method, params, ..
            } => {
                let handler = Arc::clone(handler);
                let outgoing = self.outgoing.clone();
                tokio::spawn(async move {
                    let (value, error) = match handler.handle(&method, params).await {
                        Ok(value) => (Some(value), None),
                        Err(error) => {
                            warn!(%method, %error, "broker invocation failed");
                            (None, Some(error))
                        }
                    };
                    let _ = outgoing.send(BrokerFrame::Result { id, value, error });
                });
            }
            BrokerFrame::Result { id, value, error } => {
                let Some(tx) = self.pending.lock().await.remove(&id) else {
                    debug!(id, "dropping result for unknown call");
                    return;
                };
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(value.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            BrokerFrame::Event { module, event } => {
                let _ = self.events.send(RemoteEvent { module, event });
            }
            other => debug!(?other, "ignoring unexpected broker frame"),
        }
    }

    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }
}

#[async_trait]
impl SceneGraph for BrokerClient {
    async fn set_node_property(&self, request: NodePropertyRequest) -> Result<()> {
        self.call(SCENE_GRAPH_API, methods::SET_NODE_PROPERTY, request)
            .await?;
        Ok(())
    }

    async fn call_node_function(&self, request: NodeFunctionRequest) -> Result<()> {
        self.call(SCENE_GRAPH_API, methods::CALL_NODE_FUNCTION, request)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
