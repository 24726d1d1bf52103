//! JSON-RPC over a persistent websocket, used for the primary node.
//!
//! One socket carries every request and the `newHeads` subscription.
//! Requests are matched to responses by id through a pending map. When the
//! socket drops, all pending requests fail with
//! [`UpstreamError::Disconnected`] and every head stream ends; the next call
//! reconnects lazily.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use crate::{HeadNotification, HeadStream, HeadSubscriber, RpcTransport, UpstreamError};

/// Buffered head notifications per subscription before new ones are dropped.
const HEAD_BUFFER: usize = 64;

/// Default timeout for the websocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Reply = oneshot::Sender<Result<Value, UpstreamError>>;

enum Pending {
    Call(Reply),
    /// An `eth_subscribe` in flight; on success the subscription id is bound
    /// to the head sender before any later frame is read.
    Subscribe(Reply, mpsc::Sender<HeadNotification>),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    subscriptions: Mutex<HashMap<String, mpsc::Sender<HeadNotification>>>,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<Pending> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for pending in drained {
            let reply = match pending {
                Pending::Call(reply) | Pending::Subscribe(reply, _) => reply,
            };
            let _ = reply.send(Err(UpstreamError::Disconnected));
        }
        lock(&self.subscriptions).clear();
    }

    fn dispatch(&self, text: &str) {
        let msg: JsonRpcMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "ignoring undecodable frame from node");
                return;
            }
        };

        if let Some(id) = msg.response_id() {
            let entry = lock(&self.pending).remove(&id);
            match entry {
                Some(Pending::Call(reply)) => {
                    let _ = reply.send(msg.into_result());
                }
                Some(Pending::Subscribe(reply, heads)) => {
                    let result = msg.into_result().and_then(|v| match v {
                        Value::String(sub_id) => {
                            lock(&self.subscriptions).insert(sub_id.clone(), heads);
                            Ok(Value::String(sub_id))
                        }
                        other => Err(UpstreamError::Decode(format!(
                            "subscription id is not a string: {other}"
                        ))),
                    });
                    let _ = reply.send(result);
                }
                None => debug!(id, "response for unknown or abandoned request"),
            }
            return;
        }

        if msg.method.as_deref() == Some("eth_subscription") {
            if let Some(params) = msg.params {
                self.notify(&params);
            }
        }
    }

    fn notify(&self, params: &Value) {
        let Some(sub_id) = params.get("subscription").and_then(Value::as_str) else {
            return;
        };
        let head = match parse_head(params.get("result").unwrap_or(&Value::Null)) {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "malformed head notification");
                return;
            }
        };
        let sender = lock(&self.subscriptions).get(sub_id).cloned();
        let Some(sender) = sender else {
            debug!(subscription = sub_id, "notification for unknown subscription");
            return;
        };
        match sender.try_send(head) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(head)) => {
                warn!(number = head.number, "head consumer lagging, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                lock(&self.subscriptions).remove(sub_id);
            }
        }
    }
}

fn parse_head(header: &Value) -> Result<HeadNotification, UpstreamError> {
    let number = header
        .get("number")
        .and_then(Value::as_str)
        .ok_or_else(|| UpstreamError::Decode("head without number".into()))?;
    let hash = header
        .get("hash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(HeadNotification {
        number: ethws_types::parse_quantity(number)?,
        hash,
    })
}

/// Removes an abandoned request (e.g. cancelled by a timeout) from the
/// pending map.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.id);
    }
}

struct WsConnection {
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
}

impl WsConnection {
    async fn open(url: &str, connect_timeout: Duration) -> Result<Self, UpstreamError> {
        let (stream, _) = tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(url),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(connect_timeout))?
        .map_err(|e| UpstreamError::Transport(format!("websocket connect to {url}: {e}")))?;
        info!(url, "connected to primary node");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared::default());

        let writer_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "websocket write to node failed");
                    break;
                }
            }
            writer_shared.close();
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        let reader_url = url.to_string();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_shared.dispatch(&text),
                    Ok(Message::Binary(bytes)) => {
                        if let Ok(text) = std::str::from_utf8(&bytes) {
                            reader_shared.dispatch(text);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %reader_url, error = %e, "websocket read from node failed");
                        break;
                    }
                }
            }
            info!(url = %reader_url, "primary node connection closed");
            reader_shared.close();
        });

        Ok(Self { outbound, shared })
    }

    async fn send_request(
        &self,
        id: u64,
        method: &str,
        params: Value,
        make_pending: impl FnOnce(Reply) -> Pending,
    ) -> Result<Value, UpstreamError> {
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, make_pending(tx));
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let text = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        if self.shared.is_closed() || self.outbound.send(Message::Text(text)).is_err() {
            return Err(UpstreamError::Disconnected);
        }
        rx.await.unwrap_or(Err(UpstreamError::Disconnected))
    }
}

/// Websocket JSON-RPC client with lazy (re)connection.
pub struct WsRpcClient {
    url: String,
    connect_timeout: Duration,
    connection: tokio::sync::Mutex<Option<Arc<WsConnection>>>,
    next_id: AtomicU64,
}

impl WsRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_connect_timeout(url, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            connection: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connection(&self) -> Result<Arc<WsConnection>, UpstreamError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.shared.is_closed() {
                return Ok(Arc::clone(conn));
            }
            debug!(url = %self.url, "reconnecting to primary node");
        }
        let conn = Arc::new(WsConnection::open(&self.url, self.connect_timeout).await?);
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let conn = self.connection().await?;
        conn.send_request(self.next_id(), method, params, Pending::Call)
            .await
    }
}

#[async_trait]
impl HeadSubscriber for WsRpcClient {
    async fn subscribe_new_heads(&self) -> Result<HeadStream, UpstreamError> {
        let conn = self.connection().await?;
        let (heads_tx, heads_rx) = mpsc::channel(HEAD_BUFFER);
        let sub_id = conn
            .send_request(self.next_id(), "eth_subscribe", json!(["newHeads"]), |reply| {
                Pending::Subscribe(reply, heads_tx)
            })
            .await?;
        debug!(subscription = %sub_id, "subscribed to new heads");
        Ok(heads_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A one-connection fake node: answers `eth_blockNumber`, accepts one
    /// `eth_subscribe` and pushes a head, and hangs up on `test_hangup`.
    async fn spawn_fake_node() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                let id = req["id"].clone();
                match req["method"].as_str().unwrap() {
                    "eth_blockNumber" => {
                        let resp = json!({"jsonrpc": "2.0", "id": id, "result": "0x10"});
                        ws.send(Message::Text(resp.to_string())).await.unwrap();
                    }
                    "eth_subscribe" => {
                        let resp = json!({"jsonrpc": "2.0", "id": id, "result": "0xabc"});
                        ws.send(Message::Text(resp.to_string())).await.unwrap();
                        let note = json!({
                            "jsonrpc": "2.0",
                            "method": "eth_subscription",
                            "params": {
                                "subscription": "0xabc",
                                "result": {"number": "0x11", "hash": "0xh17"}
                            }
                        });
                        ws.send(Message::Text(note.to_string())).await.unwrap();
                    }
                    "test_hangup" => break,
                    _ => {
                        let resp = json!({
                            "jsonrpc": "2.0", "id": id,
                            "error": {"code": -32601, "message": "method not found"}
                        });
                        ws.send(Message::Text(resp.to_string())).await.unwrap();
                    }
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn requests_and_heads_share_one_socket() {
        let client = WsRpcClient::new(spawn_fake_node().await);

        let number = client
            .request("eth_blockNumber", Value::Null)
            .await
            .unwrap();
        assert_eq!(number, json!("0x10"));

        let mut heads = client.subscribe_new_heads().await.unwrap();
        let head = heads.recv().await.unwrap();
        assert_eq!(head.number, 17);
        assert_eq!(head.hash, "0xh17");

        let err = client.request("foo_bar", Value::Null).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn hangup_fails_pending_requests_and_ends_head_stream() {
        let client = WsRpcClient::new(spawn_fake_node().await);
        let mut heads = client.subscribe_new_heads().await.unwrap();
        assert!(heads.recv().await.is_some());

        let err = client.request("test_hangup", Value::Null).await.unwrap_err();
        assert_eq!(err, UpstreamError::Disconnected);
        assert!(heads.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_transient() {
        let client =
            WsRpcClient::with_connect_timeout("ws://127.0.0.1:9", Duration::from_secs(2));
        let err = client.request("eth_blockNumber", Value::Null).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }

    #[test]
    fn parses_head_headers() {
        let head = parse_head(&json!({"number": "0x2a", "hash": "0xh"})).unwrap();
        assert_eq!(head.number, 42);
        assert!(parse_head(&json!({"hash": "0xh"})).is_err());
    }
}
