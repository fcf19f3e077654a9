mod config;
mod led;
mod notify;
mod pump;
mod scheduler;
mod sensor;
mod state;
mod web;
mod ws;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(not(any(feature = "sim", feature = "hw")))]
compile_error!("enable either the `sim` or `hw` feature");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── State ───────────────────────────────────────────────────────
    let cfg = config::load(&config_path);
    info!(name = %cfg.name, mode = ?cfg.mode, "device configured");
    let shared = state::shared(cfg);

    // ── Collaborators ───────────────────────────────────────────────
    let api = notify::RemoteApi::from_env();
    if api.is_none() {
        info!("remote api reporting disabled (API_URL/API_KEY unset)");
    }

    #[cfg(feature = "hw")]
    let probe = {
        let addr: u16 = env::var("ADC_ADDR")
            .ok()
            .and_then(|s| u16::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(0x48);
        sensor::Ads1115Sensor::new(addr, 0)?
    };
    #[cfg(all(feature = "sim", not(feature = "hw")))]
    let probe = sensor::SimSensor::new();

    #[cfg(feature = "hw")]
    let pump = {
        let pin: u8 = env::var("PUMP_GPIO")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);
        // Many common relay boards are active-low. If yours is active-high, set false.
        let active_low = env::var("RELAY_ACTIVE_LOW")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        pump::GpioPump::new(pin, active_low)?
    };
    #[cfg(not(feature = "hw"))]
    let pump = pump::MockPump::new();

    let pump = Arc::new(Mutex::new(pump));

    // ── Web server ──────────────────────────────────────────────────
    let ctx = web::ServerCtx {
        shared: Arc::clone(&shared),
        pump: Arc::clone(&pump),
        api: api.clone(),
        config_path,
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(port, ctx).await {
            error!("web server error: {e:#}");
        }
    });

    // ── Scheduler ───────────────────────────────────────────────────
    scheduler::Scheduler::new(shared, probe, pump, led::LogLed, api)
        .run()
        .await;

    Ok(())
}
