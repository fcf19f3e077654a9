//! Outbound reporting to the remote plant API. Both calls are
//! fire-and-forget: a failed POST is logged and the cycle moves on.

use anyhow::Context;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Cap per-request time so a dead API cannot wedge a measurement cycle.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RemoteApi {
    client: reqwest::Client,
    base: String,
    key: String,
}

impl RemoteApi {
    pub fn new(base: impl Into<String>, key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        let base: String = base.into();
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            key: key.into(),
        })
    }

    /// Build from `API_URL` / `API_KEY`. Either missing → reporting
    /// disabled, which the device treats as a normal standalone setup.
    pub fn from_env() -> Option<Self> {
        let base = std::env::var("API_URL").ok()?;
        let key = std::env::var("API_KEY").ok()?;
        match Self::new(base, key) {
            Ok(api) => Some(api),
            Err(e) => {
                warn!("remote api disabled: {e:#}");
                None
            }
        }
    }

    /// Report a measurement. Failures are logged, never propagated.
    pub async fn post_measurement(&self, name: &str, percent: f64, voltage: f64) {
        let body = measurement_payload(name, percent, voltage);
        if let Err(e) = self.post("/measurements", &body).await {
            warn!("measurement report failed: {e:#}");
        } else {
            debug!(percent, voltage, "measurement reported");
        }
    }

    /// Report a watering event. Failures are logged, never propagated.
    pub async fn post_pump(&self, name: &str) {
        let body = pump_payload(name);
        if let Err(e) = self.post("/pump", &body).await {
            warn!("pump report failed: {e:#}");
        } else {
            debug!("pump event reported");
        }
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<()> {
        let url = format!("{}{path}", self.base);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        anyhow::ensure!(
            response.status().is_success(),
            "remote api returned {} for {url}",
            response.status()
        );
        Ok(())
    }
}

fn measurement_payload(name: &str, percent: f64, voltage: f64) -> Value {
    json!({
        "name": name,
        "sensors": {
            "moisture": { "value": percent, "unit": "%" },
            "moisture-voltage": { "value": voltage, "unit": "V" },
        },
    })
}

fn pump_payload(name: &str) -> Value {
    json!({ "name": name })
}

// ===========================================================================
// Tests
// ===========================================================================
