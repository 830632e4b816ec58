//! WebSocket transport for the OpenAI Realtime API.
//!
//! [`connect`] performs the authenticated handshake and spawns a bridge task
//! that moves events between the socket and a [`DuplexChannel`]:
//!
//! - Outbound client events are serialized to JSON text frames
//! - Inbound text frames are parsed into server events; frames that fail to
//!   parse are logged and skipped
//! - Pings are answered; a close frame, socket error or shutdown ends the
//!   bridge, and a transport failure is forwarded to the session
//!
//! The bridge never reconnects.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::config::build_ws_url;
use super::messages::{ClientEvent, ServerEvent};
use crate::core::realtime::channel::{DEFAULT_CHANNEL_CAPACITY, DuplexChannel};
use crate::core::realtime::{RealtimeError, RealtimeResult};

/// Connection parameters.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Base endpoint (`wss://…/v1/realtime`)
    pub endpoint: String,
    /// Model query parameter
    pub model: String,
    /// Bearer credential
    pub api_key: String,
    /// Capacity of each direction of the channel
    pub channel_capacity: usize,
}

impl Drop for ConnectOptions {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.api_key.zeroize();
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl ConnectOptions {
    /// Options for `model` on `endpoint` with the default channel capacity.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Open a WebSocket session and return its duplex channel.
pub async fn connect(options: &ConnectOptions) -> RealtimeResult<DuplexChannel> {
    if options.api_key.is_empty() {
        return Err(RealtimeError::AuthenticationFailed(
            "API key is required".to_string(),
        ));
    }

    let url = build_ws_url(&options.endpoint, &options.model)?;
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "endpoint {} has no host",
                options.endpoint
            )));
        }
    };

    let request = http::Request::builder()
        .uri(url.as_str())
        .header("Authorization", format!("Bearer {}", options.api_key))
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host)
        .body(())
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| match e {
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                RealtimeError::AuthenticationFailed("credential rejected".to_string())
            }
            other => RealtimeError::ConnectionFailed(other.to_string()),
        })?;

    tracing::info!("Connected to realtime endpoint {}", options.endpoint);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(options.channel_capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(options.channel_capacity);
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    let bridge = tokio::spawn(async move {
        // A parsed event waiting for inbound capacity. The socket is not read
        // while one is held, but outbound traffic keeps flowing.
        let mut pending: Option<ServerEvent> = None;

        let failure = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break None;
                }

                outgoing = outbound_rx.recv() => {
                    let Some(event) = outgoing else {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break None;
                    };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to serialize {}: {}", event.event_type(), e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        break Some(RealtimeError::WebSocketError(e.to_string()));
                    }
                }

                permit = inbound_tx.reserve(), if pending.is_some() => {
                    let Ok(permit) = permit else {
                        break None;
                    };
                    if let Some(event) = pending.take() {
                        permit.send(Ok(event));
                    }
                }

                incoming = ws_stream.next(), if pending.is_none() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => pending = Some(event),
                                Err(e) => {
                                    tracing::warn!(
                                        "Failed to parse server event: {} - {}",
                                        e,
                                        describe_frame(&text)
                                    );
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                break Some(RealtimeError::WebSocketError(e.to_string()));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by server".to_string());
                            tracing::info!("WebSocket closed: {}", reason);
                            break Some(RealtimeError::ConnectionClosed(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            break Some(RealtimeError::WebSocketError(e.to_string()));
                        }
                        None => {
                            break Some(RealtimeError::ConnectionClosed("stream ended".to_string()));
                        }
                    }
                }
            }
        };

        if let Some(error) = failure {
            let _ = inbound_tx.send(Err(error)).await;
        }
        tracing::debug!("WebSocket bridge exited");
    });

    Ok(DuplexChannel::with_bridge(
        outbound_tx,
        inbound_rx,
        bridge,
        shutdown,
    ))
}

/// Longest frame prefix included in parse failure logs.
const LOGGED_FRAME_PREFIX: usize = 120;

/// Short description of an unparseable frame: its `type` when present, its
/// size and a bounded prefix. Audio frames can be hundreds of KB.
fn describe_frame(text: &str) -> String {
    let event_type = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "<untyped>".to_string());

    let end = text
        .char_indices()
        .nth(LOGGED_FRAME_PREFIX)
        .map_or(text.len(), |(i, _)| i);
    let ellipsis = if end < text.len() { "..." } else { "" };

    format!(
        "type={} len={} frame={}{}",
        event_type,
        text.len(),
        &text[..end],
        ellipsis
    )
}

// =============================================================================
// Tests
// =============================================================================
