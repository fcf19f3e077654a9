//! WebSocket upgrade and server→client frames, hand-rolled against the
//! RFC 6455 subset this device needs: the accept-key handshake and
//! single-frame unmasked text messages. Client→server frames are never
//! read; the moisture feed is push-only.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::state::SharedState;

/// How often the push loop sends a moisture fragment.
pub const PUSH_PERIOD: Duration = Duration::from_secs(2);

/// Fixed GUID every conforming server concatenates with the client key.
const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Payloads needing the 8-byte extended length never occur for the
    /// moisture fragment; fail the connection instead of encoding them.
    #[error("websocket frame payload too large ({0} bytes)")]
    UnsupportedSize(usize),
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`:
/// base64 of the SHA-1 over key + GUID.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The complete `101 Switching Protocols` response.
pub fn handshake_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Encode one unmasked single-frame text message: `0x81` (FIN + text),
/// then a 7-bit length or `126` + 16-bit big-endian length, then the
/// UTF-8 payload.
pub fn text_frame(payload: &str) -> Result<Vec<u8>, FrameError> {
    let bytes = payload.as_bytes();
    let len = bytes.len();

    let mut frame = Vec::with_capacity(len + 4);
    frame.push(0x81);
    if len < 126 {
        frame.push(len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        return Err(FrameError::UnsupportedSize(len));
    }
    frame.extend_from_slice(bytes);
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Push loop
// ---------------------------------------------------------------------------

/// Complete the handshake, then stream the latest recorded moisture value
/// every [`PUSH_PERIOD`] until the peer goes away. A disconnect surfaces
/// as a write error on the next frame, which ends only this connection.
/// Before the first measurement cycle the fragment carries `null`.
pub async fn serve_push<W>(
    writer: &mut W,
    client_key: &str,
    shared: &SharedState,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(handshake_response(client_key).as_bytes())
        .await?;
    writer.flush().await?;
    tracing::debug!("websocket stream established");

    loop {
        let moisture: Option<f64> = {
            let st = shared.read().await;
            st.latest_sample().map(|s| s.percent)
        };
        let message = serde_json::json!({ "moisture": moisture }).to_string();
        let frame = text_frame(&message)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        tokio::time::sleep(PUSH_PERIOD).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::{self, MoistureSample};
    use tokio::io::AsyncReadExt;

    // -- Handshake --------------------------------------------------------

    #[test]
    fn accept_key_matches_rfc_worked_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn handshake_response_is_crlf_terminated() {
        let response = handshake_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response
            .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    // -- Frame encoding ---------------------------------------------------

    #[test]
    fn short_payload_uses_seven_bit_length() {
        let frame = text_frame("hello").unwrap();
        assert_eq!(&frame[..2], &[0x81, 0x05]);
        assert_eq!(&frame[2..], b"hello");
    }

    #[test]
    fn two_hundred_bytes_uses_extended_length() {
        let payload = "x".repeat(200);
        let frame = text_frame(&payload).unwrap();
        assert_eq!(&frame[..4], &[0x81, 0x7E, 0x00, 0xC8]);
        assert_eq!(frame.len(), 4 + 200);
    }

    #[test]
    fn boundary_125_stays_seven_bit() {
        let frame = text_frame(&"y".repeat(125)).unwrap();
        assert_eq!(&frame[..2], &[0x81, 125]);
        assert_eq!(frame.len(), 2 + 125);
    }

    #[test]
    fn boundary_126_switches_to_extended() {
        let frame = text_frame(&"y".repeat(126)).unwrap();
        assert_eq!(&frame[..4], &[0x81, 126, 0x00, 0x7E]);
    }

    #[test]
    fn max_extended_length_encodes() {
        let frame = text_frame(&"z".repeat(65_535)).unwrap();
        assert_eq!(&frame[..4], &[0x81, 126, 0xFF, 0xFF]);
        assert_eq!(frame.len(), 4 + 65_535);
    }

    #[test]
    fn oversized_payload_fails_closed() {
        let err = text_frame(&"z".repeat(65_536)).unwrap_err();
        assert_eq!(err, FrameError::UnsupportedSize(65_536));
    }

    // -- Push loop --------------------------------------------------------

    #[tokio::test]
    async fn push_sends_handshake_then_latest_moisture() {
        let shared = state::shared(Config::default());
        shared.write().await.push_sample(MoistureSample {
            percent: 61.5,
            voltage: 1.27,
            ts: 1,
        });

        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = {
            let shared = std::sync::Arc::clone(&shared);
            tokio::spawn(async move {
                let _ = serve_push(&mut server, "dGhlIHNhbXBsZSBub25jZQ==", &shared).await;
            })
        };

        // Handshake comes first, byte for byte.
        let expected = handshake_response("dGhlIHNhbXBsZSBub25jZQ==");
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected.as_bytes());

        // Then the first frame with the latest sample.
        let mut header = [0u8; 2];
        client.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x81);
        let mut payload = vec![0u8; header[1] as usize];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, br#"{"moisture":61.5}"#);

        task.abort();
    }

    #[tokio::test]
    async fn push_sends_null_before_first_cycle() {
        let shared = state::shared(Config::default());
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = {
            let shared = std::sync::Arc::clone(&shared);
            tokio::spawn(async move {
                let _ = serve_push(&mut server, "dGhlIHNhbXBsZSBub25jZQ==", &shared).await;
            })
        };

        let handshake_len = handshake_response("dGhlIHNhbXBsZSBub25jZQ==").len();
        let mut buf = vec![0u8; handshake_len + 2];
        client.read_exact(&mut buf).await.unwrap();
        let payload_len = buf[handshake_len + 1] as usize;
        let mut payload = vec![0u8; payload_len];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, br#"{"moisture":null}"#);

        task.abort();
    }

    #[tokio::test]
    async fn disconnected_peer_ends_the_loop() {
        let shared = state::shared(Config::default());
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let result = serve_push(&mut server, "dGhlIHNhbXBsZSBub25jZQ==", &shared).await;
        assert!(result.is_err(), "write to a gone peer must end the loop");
    }
}
