use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use shared::domain::LastSnapshot;
use url::Url;

const LAST_SNAPSHOT_PATH: &str = "api/exchange-rates";

/// The backend's local HTTP mirror, used to seed a panel before the first
/// `exchangerates` event arrives.
pub struct BackendHttp {
    client: Client,
    base: Url,
}

impl BackendHttp {
    pub fn new(base: Url) -> Self {
        Self {
            client: Client::new(),
            base,
        }
    }

    /// Last table the backend fetched, or `None` if it has not polled yet.
    pub async fn last_snapshot(&self) -> Result<Option<LastSnapshot>> {
        let url = self.base.join(LAST_SNAPSHOT_PATH)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let last = response
            .error_for_status()?
            .json::<LastSnapshot>()
            .await
            .context("backend returned a malformed snapshot")?;
        Ok(Some(last))
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
