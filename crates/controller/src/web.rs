//! Embedded web interface: a hand-rolled HTTP request parser and router on
//! a raw `TcpListener`. Serves the dashboard, the JSON state snapshot, the
//! config patch and manual pump endpoints, and upgrades connections with
//! an `Upgrade: websocket` header into the live moisture feed.
//!
//! Routing is an exact method+path match; `/data2` is a 404, not `/data`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::config::ConfigPatch;
use crate::notify::RemoteApi;
use crate::pump::Pump;
use crate::scheduler::{self, PumpTrigger};
use crate::state::SharedState;
use crate::ws;

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Upper bound on `POST /update` bodies; a config patch is tiny.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Upper bound on header lines per request.
const MAX_HEADERS: usize = 64;

// ---------------------------------------------------------------------------
// Server context
// ---------------------------------------------------------------------------

/// Everything a connection handler needs, cloned per connection.
pub struct ServerCtx<P: Pump> {
    pub shared: SharedState,
    pub pump: Arc<Mutex<P>>,
    pub api: Option<RemoteApi>,
    pub config_path: String,
}

impl<P: Pump> Clone for ServerCtx<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            pump: Arc::clone(&self.pump),
            api: self.api.clone(),
            config_path: self.config_path.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
}

impl Request {
    /// Header lookup by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn wants_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Parse the request line and headers, consuming up to and including the
/// blank line. Header keys are lowercased; lines without a colon are
/// skipped rather than fatal.
async fn read_request<R>(reader: &mut R) -> Result<Request, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(RequestError::Closed);
    }

    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request line".to_string()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("request line has no path".to_string()))?
        .to_string();
    parts
        .next()
        .ok_or_else(|| RequestError::Malformed("request line has no version".to_string()))?;

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break; // peer stopped mid-headers; treat what we have as complete
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(RequestError::Malformed("too many headers".to_string()));
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok(Request {
        method,
        path,
        headers,
    })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

async fn respond<W>(
    writer: &mut W,
    status: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.0 {status}\r\n");
    if let Some(ct) = content_type {
        head.push_str("Content-Type: ");
        head.push_str(ct);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

/// Handle one connection: parse, dispatch, respond, close. Generic over
/// the stream halves so tests can drive it over in-memory pipes.
async fn serve_conn<R, W, P>(
    reader: R,
    mut writer: W,
    ctx: ServerCtx<P>,
) -> Result<(), RequestError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    P: Pump,
{
    let mut reader = BufReader::new(reader);

    let request = match read_request(&mut reader).await {
        Ok(r) => r,
        Err(RequestError::Malformed(msg)) => {
            debug!("rejecting malformed request: {msg}");
            respond(&mut writer, "400 Bad Request", None, msg.as_bytes()).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    debug!(method = %request.method, path = %request.path, "request");

    // A websocket upgrade takes over the connection regardless of path.
    if request.wants_upgrade() {
        let Some(key) = request.header("sec-websocket-key").map(str::to_string) else {
            respond(
                &mut writer,
                "400 Bad Request",
                None,
                b"missing Sec-WebSocket-Key",
            )
            .await?;
            return Ok(());
        };
        if let Err(e) = ws::serve_push(&mut writer, &key, &ctx.shared).await {
            debug!("websocket stream ended: {e:#}");
        }
        return Ok(());
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") | ("GET", "/index.html") => {
            respond(&mut writer, "200 OK", Some("text/html"), INDEX_HTML.as_bytes()).await?;
        }

        ("GET", "/data") => {
            let status = ctx.shared.read().await.to_status();
            let body = serde_json::to_vec(&status).unwrap_or_else(|e| {
                error!("status serialization failed: {e}");
                b"{}".to_vec()
            });
            respond(&mut writer, "200 OK", Some("application/json"), &body).await?;
        }

        ("POST", "/update") => {
            handle_update(&mut reader, &mut writer, &request, &ctx).await?;
        }

        ("POST", "/pump") => {
            // Operator override: runs through the scheduler's actuation
            // primitive without the auto cooldown, and responds only once
            // the watering run has finished.
            scheduler::activate_pump(
                PumpTrigger::Manual,
                &ctx.shared,
                &ctx.pump,
                ctx.api.as_ref(),
            )
            .await;
            respond(&mut writer, "200 OK", None, b"Pump started").await?;
        }

        _ => {
            respond(&mut writer, "404 Not Found", None, b"Not found").await?;
        }
    }

    Ok(())
}

/// `POST /update`: read exactly `Content-Length` bytes, parse the patch,
/// apply it under the store's validation, persist best-effort.
async fn handle_update<R, W, P>(
    reader: &mut R,
    writer: &mut W,
    request: &Request,
    ctx: &ServerCtx<P>,
) -> Result<(), RequestError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    P: Pump,
{
    let length = request.content_length();
    if length == 0 || length > MAX_BODY_BYTES {
        respond(writer, "400 Bad Request", None, b"bad Content-Length").await?;
        return Ok(());
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let patch: ConfigPatch = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            respond(
                writer,
                "400 Bad Request",
                None,
                format!("bad config patch: {e}").as_bytes(),
            )
            .await?;
            return Ok(());
        }
    };

    let updated = {
        let mut st = ctx.shared.write().await;
        st.update_config(&patch)
    };

    match updated {
        Ok(new_config) => {
            // Persist outside the lock; losing this write on a crash is
            // accepted and logged, never surfaced to the client.
            if let Err(e) = config::save(&ctx.config_path, &new_config) {
                warn!("config persist failed: {e:#}");
            }
            respond(writer, "200 OK", None, b"OK").await?;
        }
        Err(e) => {
            respond(writer, "400 Bad Request", None, e.to_string().as_bytes()).await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Accept loop. Each connection runs in its own task, so a slow client, a
/// long watering run, or a live websocket feed never blocks accepting.
pub async fn serve<P>(port: u16, ctx: ServerCtx<P>) -> anyhow::Result<()>
where
    P: Pump + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;
    info!(%addr, "web interface listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    if let Err(e) = serve_conn(reader, writer, ctx).await {
                        debug!(%peer, "connection ended: {e:#}");
                    }
                });
            }
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
