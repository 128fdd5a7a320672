//! Connection manager
//!
//! One `Connection` owns one WebSocket. A background task pumps frames in
//! both directions; the owner sees state transitions and text frames as a
//! single ordered stream of [`ConnectionEvent`]s. There is no reconnect and
//! no outbound queueing: a dropped socket surfaces as `Closed`, and sends
//! while not `Open` are refused.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::protocol::OutboundEnvelope;

/// Lifecycle of a socket, mirroring the browser `readyState` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Label shown by the view ("The WebSocket is currently Open").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninstantiated => "Uninstantiated",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the socket task reports, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Text(String),
}

/// Handle to one socket. Dropping it closes the socket.
pub struct Connection {
    state: ConnectionState,
    events: mpsc::Receiver<ConnectionEvent>,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Connection {
    /// Start connecting to `url`. Returns immediately; progress arrives
    /// through [`Connection::next_event`].
    pub fn open(url: Url, capacity: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();

        tokio::spawn(run_socket(url, event_tx, outbound_rx, cancel.clone()));

        Self {
            state: ConnectionState::Uninstantiated,
            events: event_rx,
            outbound: outbound_tx,
            cancel,
        }
    }

    /// State as of the last event returned by `next_event`.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Next state transition or text frame. `None` once the socket task has
    /// finished and every event has been consumed.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = self.events.recv().await;
        match &event {
            Some(ConnectionEvent::State(state)) => self.state = *state,
            None => self.state = ConnectionState::Closed,
            Some(ConnectionEvent::Text(_)) => {}
        }
        event
    }

    /// Send one envelope. Refused unless the socket is open.
    pub fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        if !self.state.is_open() {
            debug!(state = %self.state, "Refusing to send on a socket that is not open");
            return Err(ClientError::NotConnected);
        }
        let json = envelope
            .encode()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.outbound
            .try_send(json)
            .map_err(|_| ClientError::NotConnected)
    }

    /// Begin closing. The final `Closed` event still arrives through `next_event`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Connection whose far side is driven by the test instead of a socket.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, test_support::RemoteEnd) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let conn = Self {
            state: ConnectionState::Uninstantiated,
            events: event_rx,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        };
        let remote = test_support::RemoteEnd {
            events: event_tx,
            sent: outbound_rx,
            cancel,
        };
        (conn, remote)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Strip the token from a socket URL before it is logged.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

async fn run_socket(
    url: Url,
    events: mpsc::Sender<ConnectionEvent>,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let endpoint = redact(&url);
    let _ = events
        .send(ConnectionEvent::State(ConnectionState::Connecting))
        .await;

    let connect = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = events.send(ConnectionEvent::State(ConnectionState::Closed)).await;
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws_stream = match connect {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let err = ClientError::from_tungstenite(e);
            warn!(endpoint = %endpoint, "WebSocket connect failed: {}", err);
            let _ = events
                .send(ConnectionEvent::State(ConnectionState::Closed))
                .await;
            return;
        }
    };

    info!(endpoint = %endpoint, "WebSocket connected");
    if events
        .send(ConnectionEvent::State(ConnectionState::Open))
        .await
        .is_err()
    {
        return;
    }

    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = events.send(ConnectionEvent::State(ConnectionState::Closing)).await;
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                break;
            }

            Some(json) = outbound.recv() => {
                if let Err(e) = ws_write.send(tungstenite::Message::Text(json.into())).await {
                    warn!(endpoint = %endpoint, "WebSocket send failed: {}", e);
                    break;
                }
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if events.send(ConnectionEvent::Text(text.as_str().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        debug!(endpoint = %endpoint, "WebSocket closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(endpoint = %endpoint, "WebSocket error: {}", e);
                        break;
                    }
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(endpoint = %endpoint, "WebSocket disconnected");
    let _ = events
        .send(ConnectionEvent::State(ConnectionState::Closed))
        .await;
}
