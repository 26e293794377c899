use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use broker_client::{BrokerClient, BrokerOptions, NoHandlers};
use clap::{Parser, Subcommand};
use panel_core::{BackendHttp, CameraPreset, PanelClient, PanelState};
use shared::{
    domain::{ExchangeRateSnapshot, LineId},
    protocol::ModuleEvent,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    hub_host: String,
    #[arg(long, default_value_t = 3000)]
    hub_port: u16,
    #[arg(long, default_value = "zero_density.realityhub_module_example_client")]
    module_name: String,
    #[arg(long, default_value = "zero_density.realityhub_module_example")]
    backend_module: String,
    /// Backend HTTP address, used to seed the table.
    #[arg(long, default_value = "http://127.0.0.1:5000/")]
    backend_url: Url,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints whether the backend is auto updating.
    Status,
    /// Turns auto update on.
    Start,
    /// Turns auto update off.
    Stop,
    /// Streams backend events until the broker goes away.
    Watch,
    PlayIn,
    PlayOut,
    /// Pushes an edited rates table to the scene.
    Push {
        /// JSON table in the backend's snapshot format. Defaults to the
        /// backend's last snapshot.
        table: Option<PathBuf>,
        /// Overrides a line's value, as `line=value`.
        #[arg(long = "set", value_parser = parse_value_edit)]
        values: Vec<(LineId, f64)>,
        /// Flips a line's icon. Refused while auto update is on.
        #[arg(long = "toggle")]
        toggles: Vec<String>,
    },
    /// Moves the camera to a preset.
    Goto {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        preset: u8,
    },
}

fn parse_value_edit(raw: &str) -> Result<(LineId, f64), String> {
    let (line, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected line=value, got {raw}"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid value for {line}: {error}"))?;
    Ok((LineId::new(line.trim()), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let options = BrokerOptions::for_hub(&cli.hub_host, cli.hub_port, cli.module_name.clone())?;
    let broker = BrokerClient::connect(options, Arc::new(NoHandlers))
        .await
        .context("unable to reach the hub broker")?;
    info!(module = %cli.module_name, "connected to broker");
    let panel = PanelClient::new(broker.clone(), cli.backend_module);
    let backend = BackendHttp::new(cli.backend_url);

    let outcome = run(&panel, &backend, cli.command).await;
    broker.destroy().await;
    outcome
}

async fn run(panel: &PanelClient, backend: &BackendHttp, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            println!("{}", panel.status().await?);
        }
        Command::Start => {
            panel.start_polling().await?;
            println!("auto update on");
        }
        Command::Stop => {
            panel.stop_polling().await?;
            println!("auto update off");
        }
        Command::Watch => watch(panel, backend).await?,
        Command::PlayIn => panel.play_in().await?,
        Command::PlayOut => panel.play_out().await?,
        Command::Push {
            table,
            values,
            toggles,
        } => {
            let rates = match table {
                Some(table) => {
                    let raw = tokio::fs::read_to_string(&table)
                        .await
                        .with_context(|| format!("failed to read {}", table.display()))?;
                    ExchangeRateSnapshot::from_json(&raw)
                        .with_context(|| format!("{} is not a rates table", table.display()))?
                }
                None => {
                    backend
                        .last_snapshot()
                        .await?
                        .context("backend has no snapshot yet; pass a table file")?
                        .snapshot
                }
            };
            let mut state = PanelState::new(panel.status().await?, rates);

            for (line, value) in &values {
                state.set_value(line, *value)?;
            }
            for line in toggles {
                let icon = state.toggle_icon(&LineId::new(line.clone()))?;
                println!("{line}: {icon:?}");
            }
            panel.push_table(&state).await?;
            println!("pushed {} lines", state.rates().len());
        }
        Command::Goto { preset } => {
            let preset = if preset == 1 {
                CameraPreset::First
            } else {
                CameraPreset::Second
            };
            panel.goto(preset).await?;
        }
    }
    Ok(())
}

async fn watch(panel: &PanelClient, backend: &BackendHttp) -> Result<()> {
    let mut events = panel.watch()?;
    let seed = match backend.last_snapshot().await {
        Ok(last) => last.map(|last| last.snapshot).unwrap_or_default(),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "unable to seed rates from backend");
            ExchangeRateSnapshot::default()
        }
    };
    let mut state = PanelState::new(panel.status().await?, seed);
    println!("auto update: {}", state.status());
    print_rates(&state);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                state.apply(&event);
                match event {
                    ModuleEvent::StatusChange(_) => println!("auto update: {}", state.status()),
                    ModuleEvent::ExchangeRates(_) => print_rates(&state),
                }
            }
            _ = panel.disconnected() => {
                println!("broker disconnected");
                break;
            }
        }
    }
    Ok(())
}

fn print_rates(state: &PanelState) {
    for (line, entry) in state.rates().iter() {
        println!("{line}\t{:.4}\t{:?}", entry.value, entry.icon);
    }
}
