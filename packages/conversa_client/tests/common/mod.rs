#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, handshake::server};

use conversa_client::config::FileConfig;
use conversa_client::{ChatClient, ClientConfig, Identity, SessionContext};

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Spawn a WebSocket server that runs `handler` for every connection.
/// Request URIs (path and query) are recorded in arrival order.
pub async fn spawn_ws_server<F, Fut>(handler: F) -> (SocketAddr, Arc<Mutex<Vec<String>>>)
where
    F: Fn(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uris = Arc::new(Mutex::new(Vec::new()));

    let recorded = uris.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let recorded = recorded.clone();
            let record = move |req: &server::Request,
                               resp: server::Response|
                  -> Result<server::Response, server::ErrorResponse> {
                recorded.lock().unwrap().push(req.uri().to_string());
                Ok(resp)
            };
            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, record).await else {
                continue;
            };
            tokio::spawn(handler(ws));
        }
    });

    (addr, uris)
}

/// Spawn an axum app on an ephemeral port. Dropping the sender stops it.
pub async fn spawn_http_server(app: axum::Router) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    (addr, tx)
}

/// Client rooted in a temp directory, pointed at the given servers.
/// Keep the returned guard alive for the duration of the test.
pub fn client_for(
    http: SocketAddr,
    ws: SocketAddr,
    identity: Option<Identity>,
) -> (ChatClient, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut fc = FileConfig::default();
    fc.server.http_url = format!("http://{}", http);
    fc.server.ws_url = format!("ws://{}", ws);
    let config = ClientConfig::from_file(tmp.path().to_path_buf(), &fc).unwrap();

    let session = SessionContext::with_store(config.session_path());
    if let Some(identity) = identity {
        session.set_identity(identity).unwrap();
    }
    (ChatClient::with_session(config, session), tmp)
}

/// A message as the server serializes it.
pub fn record(id: &str, from: &str, to: &str, content: &str) -> Value {
    json!({
        "id": id,
        "conversation": "alice__bob",
        "from_user": { "username": from, "name": from },
        "to_user": { "username": to, "name": to },
        "content": content,
        "timestamp": "2024-01-01T09:30:00Z",
        "read": false
    })
}

pub async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame from the client, parsed. `None` once the client is gone.
pub async fn recv_json(ws: &mut ServerSocket) -> Option<Value> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(tungstenite::Message::Text(text)) => {
                return serde_json::from_str(text.as_str()).ok();
            }
            Ok(tungstenite::Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|v| pred(v)))
        .await
        .expect("timed out waiting for state")
        .expect("sender dropped")
        .clone()
}
