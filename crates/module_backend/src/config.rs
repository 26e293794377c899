use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;
use url::Url;

const SETTINGS_FILE: &str = "module.toml";
const SNAPSHOT_PATH: &str = "examples/exchange-rates";

#[derive(Debug, Clone)]
pub struct Settings {
    pub module_name: String,
    pub hub_host: String,
    pub hub_port: u16,
    pub http_bind: String,
    pub assets_dir: PathBuf,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub source_url: Option<String>,
    pub node_path: String,
    pub property_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            module_name: "zero_density.realityhub_module_example".into(),
            hub_host: "127.0.0.1".into(),
            hub_port: 3000,
            http_bind: "0.0.0.0:5000".into(),
            assets_dir: PathBuf::from("client"),
            poll_interval: Duration::from_millis(3000),
            fetch_timeout: Duration::from_secs(5),
            source_url: None,
            node_path: "Forex_0".into(),
            property_path: "Default//JXD/0".into(),
        }
    }
}

impl Settings {
    /// Snapshot endpoint; defaults to the Hub's own example resource.
    pub fn source_url(&self) -> anyhow::Result<Url> {
        let raw = match &self.source_url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}:{}/{SNAPSHOT_PATH}",
                self.hub_host, self.hub_port
            ),
        };
        Url::parse(&raw).with_context(|| format!("invalid snapshot source url '{raw}'"))
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<toml::Table>(raw) else {
        tracing::warn!(file = SETTINGS_FILE, "ignoring unparsable settings file");
        return;
    };

    let integer = |key: &str| file_cfg.get(key).and_then(toml::Value::as_integer);

    if let Some(v) = text_value(&file_cfg, "module_name") {
        settings.module_name = v.to_string();
    }
    if let Some(v) = text_value(&file_cfg, "hub_host") {
        settings.hub_host = v.to_string();
    }
    if let Some(v) = integer("hub_port").and_then(|v| u16::try_from(v).ok()) {
        settings.hub_port = v;
    }
    if let Some(v) = text_value(&file_cfg, "bind_addr") {
        settings.http_bind = v.to_string();
    }
    if let Some(v) = text_value(&file_cfg, "assets_dir") {
        settings.assets_dir = PathBuf::from(v);
    }
    if let Some(v) = integer("poll_interval_ms").and_then(positive_millis) {
        settings.poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = integer("fetch_timeout_ms").and_then(positive_millis) {
        settings.fetch_timeout = Duration::from_millis(v);
    }
    if let Some(v) = text_value(&file_cfg, "source_url") {
        settings.source_url = Some(v.to_string());
    }
    if let Some(v) = text_value(&file_cfg, "node_path") {
        settings.node_path = v.to_string();
    }
    if let Some(v) = text_value(&file_cfg, "property_path") {
        settings.property_path = v.to_string();
    }
}

/// Zero and negative durations are ignored like any other invalid value.
fn positive_millis(v: i64) -> Option<u64> {
    u64::try_from(v).ok().filter(|ms| *ms > 0)
}

fn text_value<'a>(table: &'a toml::Table, key: &str) -> Option<&'a str> {
    table.get(key).and_then(toml::Value::as_str)
}

pub(crate) fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("REALITY_HUB_PORT").and_then(|v| v.parse::<u16>().ok()) {
        settings.hub_port = v;
    }
    if let Some(v) = lookup("APP__HUB_HOST") {
        settings.hub_host = v;
    }
    if let Some(v) = lookup("APP__MODULE_NAME") {
        settings.module_name = v;
    }
    if let Some(v) = lookup("APP__HTTP_BIND") {
        settings.http_bind = v;
    }
    if let Some(v) = lookup("APP__ASSETS_DIR") {
        settings.assets_dir = PathBuf::from(v);
    }
    let poll_interval_ms = lookup("APP__POLL_INTERVAL_MS").and_then(|v| v.parse::<i64>().ok());
    if let Some(v) = poll_interval_ms.and_then(positive_millis) {
        settings.poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = lookup("APP__SOURCE_URL") {
        settings.source_url = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
