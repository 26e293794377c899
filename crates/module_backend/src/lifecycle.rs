use std::sync::Arc;

use broker_client::{BrokerClient, BrokerOptions};
use shared::protocol::ModuleEvent;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{api::ModuleApi, app_state::AppState, config::Settings, link::SceneGraphLink};

/// Keeps the module registered with the broker for the life of the process.
///
/// Every disconnect tears the session down and reconnects from scratch. A
/// connect that fails is returned as an error; the process is expected to
/// exit and be restarted by its supervisor.
pub(crate) async fn run(
    settings: &Settings,
    state: Arc<AppState>,
    link: Arc<SceneGraphLink>,
) -> anyhow::Result<()> {
    loop {
        let client = connect(settings, &state).await?;

        link.attach(Arc::new(client.clone())).await;
        let forwarder = spawn_event_forwarder(client.clone(), state.events.subscribe());
        state.controller.start();

        client.disconnected().await;
        warn!("broker disconnected; reinitializing module");

        client.destroy().await;
        forwarder.abort();
        link.detach().await;
        state.controller.stop();
    }
}

async fn connect(settings: &Settings, state: &AppState) -> anyhow::Result<BrokerClient> {
    let options = BrokerOptions::for_hub(
        &settings.hub_host,
        settings.hub_port,
        settings.module_name.clone(),
    )?;
    let handler = Arc::new(ModuleApi::new(Arc::clone(&state.controller)));

    let client = BrokerClient::connect(options, handler)
        .await
        .map_err(|error| {
            error!(%error, "unable to initialize broker; exiting");
            error
        })?;
    info!(module = %settings.module_name, "module registered with broker");
    Ok(client)
}

fn spawn_event_forwarder(
    client: BrokerClient,
    mut events: broadcast::Receiver<ModuleEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(error) = client.emit(event) {
                        debug!(%error, "stopping event forwarder");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
