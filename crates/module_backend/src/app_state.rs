use std::sync::Arc;

use shared::protocol::ModuleEvent;
use tokio::sync::broadcast;

use crate::poller::PollController;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) controller: Arc<PollController>,
    pub(crate) events: broadcast::Sender<ModuleEvent>,
}
