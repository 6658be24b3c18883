//! WebSocket link to the hosted voice service.
//!
//! One background task per channel: connect, send `setup`, wait for
//! `setupComplete`, then pump outbound audio and inbound events until either
//! side closes.

use super::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};
use super::{ChannelConnector, ChannelFailure, ChannelState, LinkEnd, OpenRequest, TransportChannel};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

/// Connector for the hosted service's bidirectional streaming endpoint.
#[derive(Debug, Clone, Copy)]
pub struct LiveConnector;

impl LiveConnector {
    /// Create a connector and make sure rustls has a process-wide crypto
    /// provider for `wss://` endpoints.
    #[must_use]
    pub fn new() -> Self {
        // Err only means a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self
    }
}

impl Default for LiveConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConnector for LiveConnector {
    fn open(&self, request: OpenRequest) -> TransportChannel {
        let (channel, link) = TransportChannel::new(request.outbound_queue);
        tokio::spawn(run_link(request, link));
        channel
    }
}

/// How long a cancelled link waits for its close frame to go out.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How a connection ended without failing.
#[derive(Debug, PartialEq, Eq)]
enum Ending {
    /// The service closed normally.
    ServiceClosed,
    /// The session closed the channel.
    Cancelled,
}

async fn run_link(request: OpenRequest, mut link: LinkEnd) {
    link.opening();

    match drive(&request, &mut link).await {
        Ok(Ending::Cancelled) => debug!("link task cancelled by session"),
        Ok(Ending::ServiceClosed) => {
            info!("voice service closed the connection");
            link.finish();
        }
        Err(failure) => {
            warn!("voice channel failed: {failure}");
            link.fail(failure);
        }
    }
}

/// Run one connection until it closes, fails, or the session cancels it.
async fn drive(request: &OpenRequest, link: &mut LinkEnd) -> Result<Ending, ChannelFailure> {
    let cancel = link.cancel_token();
    let url = endpoint_url(request)?;
    info!(endpoint = %request.endpoint, model = %request.model, "connecting to voice service");

    let (ws_stream, _) = tokio::select! {
        () = cancel.cancelled() => return Ok(Ending::Cancelled),
        connected = tokio_tungstenite::connect_async(url.as_str()) => {
            connected.map_err(connect_failure)?
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let setup = serde_json::to_string(&SetupMessage::new(request))
        .map_err(|e| ChannelFailure::Protocol(format!("encode setup: {e}")))?;
    write
        .send(Message::Text(setup))
        .await
        .map_err(|e| ChannelFailure::Transport(format!("send setup: {e}")))?;

    loop {
        // Outbound audio stays queued until the service accepts the setup.
        let open = link.state() == ChannelState::Open;

        tokio::select! {
            () = cancel.cancelled() => {
                let goodbye = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "session ended".into(),
                }));
                match tokio::time::timeout(CLOSE_GRACE, write.send(goodbye)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("close frame not sent: {e}"),
                    Err(_) => debug!("close frame timed out"),
                }
                return Ok(Ending::Cancelled);
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(&text, link),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_text(text, link),
                        Err(_) => debug!("ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return close_outcome(frame).map(|()| Ending::ServiceClosed);
                    }
                    Some(Ok(_)) => {} // Ping/Pong handled by tungstenite.
                    Some(Err(e)) => {
                        return Err(ChannelFailure::Transport(format!("read error: {e}")));
                    }
                    None => {
                        return Err(ChannelFailure::Transport(
                            "connection ended without a close frame".into(),
                        ));
                    }
                }
            }
            Some(blob) = link.next_outbound(), if open => {
                let json = serde_json::to_string(&RealtimeInputMessage::new(&blob))
                    .map_err(|e| ChannelFailure::Protocol(format!("encode audio: {e}")))?;
                if let Err(e) = write.send(Message::Text(json)).await {
                    return Err(ChannelFailure::Transport(format!("send error: {e}")));
                }
            }
        }
    }
}

fn handle_text(text: &str, link: &mut LinkEnd) {
    let message = match ServerMessage::parse(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("skipping unparseable service message: {e}");
            return;
        }
    };
    if let Some(go_away) = message.go_away() {
        warn!(time_left = ?go_away.time_left, "voice service is about to disconnect");
    }
    for event in message.into_events() {
        link.deliver(event);
    }
}

fn endpoint_url(request: &OpenRequest) -> Result<url::Url, ChannelFailure> {
    let mut url = url::Url::parse(&request.endpoint).map_err(|e| ChannelFailure::Connect {
        status: None,
        detail: format!("invalid endpoint {}: {e}", request.endpoint),
    })?;
    if let Some(key) = &request.api_key {
        url.query_pairs_mut().append_pair("key", key);
    }
    Ok(url)
}

fn connect_failure(err: tungstenite::Error) -> ChannelFailure {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let detail = response
                .body()
                .as_deref()
                .map(|body| String::from_utf8_lossy(body).trim().to_owned())
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("handshake rejected")
                        .to_owned()
                });
            ChannelFailure::Connect {
                status: Some(status.as_u16()),
                detail,
            }
        }
        other => ChannelFailure::Connect {
            status: None,
            detail: other.to_string(),
        },
    }
}

fn close_outcome(frame: Option<CloseFrame<'_>>) -> Result<(), ChannelFailure> {
    let Some(frame) = frame else {
        return Ok(());
    };
    match u16::from(frame.code) {
        1000 | 1001 => Ok(()),
        code => Err(ChannelFailure::Rejected {
            code,
            reason: frame.reason.to_string(),
        }),
    }
}
