use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod http;
mod lifecycle;
mod link;
mod poller;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

use app_state::AppState;
use config::load_settings;
use link::SceneGraphLink;
use poller::{HttpSnapshotSource, PollController, PollTarget};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let source = HttpSnapshotSource::new(settings.source_url()?, settings.fetch_timeout)?;
    let link = Arc::new(SceneGraphLink::default());
    let (events, _) = broadcast::channel(256);

    let controller = Arc::new(PollController::new(
        Arc::new(source),
        link.clone(),
        events.clone(),
        PollTarget {
            node_path: settings.node_path.clone(),
            property_path: settings.property_path.clone(),
        },
        settings.poll_interval,
    ));
    let state = Arc::new(AppState { controller, events });
    let app = http::build_router(Arc::clone(&state), &settings.assets_dir);

    let addr: SocketAddr = settings
        .http_bind
        .parse()
        .with_context(|| format!("invalid http bind address {}", settings.http_bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, module = %settings.module_name, "panel server listening");

    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served.context("http server failed")?;
        }
        session = lifecycle::run(&settings, state, link) => {
            session.context("broker session ended")?;
        }
    }
    Ok(())
}
