//! WebSocket client for the upload server.
//!
//! Implements request-response pattern with UUID correlation,
//! fragmented chunk frames with write progress, and push event dispatching.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use chunkup_protocol::constants::{
    MessageType, WS_BINARY_REQUEST_TIMEOUT, WS_FRAGMENT_SIZE, WS_MAX_MESSAGE_SIZE,
    WS_REQUEST_TIMEOUT,
};
use chunkup_protocol::envelope::Message;

use crate::inbound::{Router, reader};
use crate::outbound::{Outbound, writer};

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },
}

/// Callback type for push events from the server.
pub type EventCallback = Box<dyn Fn(MessageType, Message) + Send + Sync>;

/// Callback type for disconnect notification.
pub type DisconnectCallback = Arc<Mutex<Option<Box<dyn Fn() + Send + Sync>>>>;

/// Observes a binary upload as it is written: `(bytes flushed, frame length)`.
pub type WriteProgress = dyn Fn(u64, u64) + Send + Sync;

/// WebSocket client connected to one upload server.
pub struct WsClient {
    outbound: mpsc::Sender<Outbound>,
    router: Router,
    on_disconnect: DisconnectCallback,
    _reader: tokio::task::JoinHandle<()>,
    _writer: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Connects to the server at `url` and starts the reader and writer tasks.
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (sink, stream) = ws_stream.split();

        let (outbound, queue) = mpsc::channel::<Outbound>(256);
        let router = Router::new();
        let on_disconnect: DisconnectCallback = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let writer_task = tokio::spawn(writer(sink, queue, WS_FRAGMENT_SIZE, cancel.clone()));
        let reader_task = tokio::spawn(reader(
            stream,
            router.clone(),
            on_disconnect.clone(),
            outbound.clone(),
            cancel.clone(),
        ));

        info!(url, "connected to upload server");
        Ok(Self {
            outbound,
            router,
            on_disconnect,
            _reader: reader_task,
            _writer: writer_task,
            cancel,
        })
    }

    /// Sends a request and waits for the response.
    pub async fn send_request<T: serde::Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, WsError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let reply = self.register(&id).await;
        self.enqueue(&id, Outbound::Message(tungstenite::Message::Text(json.into())))
            .await?;
        self.await_reply(&id, reply, WS_REQUEST_TIMEOUT).await
    }

    /// Sends binary data with a JSON header and waits for the text response.
    ///
    /// Wire format: see [`encode_binary_frame`]. A UUID is injected into
    /// the header for request-response correlation. The frame is written
    /// in fragments and `on_written` is called after each one.
    pub async fn send_binary(
        &self,
        header: &serde_json::Value,
        data: &[u8],
        on_written: &(dyn Fn(u64, u64) + Send + Sync + '_),
    ) -> Result<Message, WsError> {
        let id = uuid::Uuid::new_v4().to_string();

        let mut header = header.clone();
        if let Some(obj) = header.as_object_mut() {
            obj.insert("id".into(), serde_json::Value::String(id.clone()));
        }
        let frame = encode_binary_frame(&serde_json::to_vec(&header)?, data);
        let total = frame.len() as u64;

        let reply = self.register(&id).await;
        let (sent, mut flushed) = mpsc::unbounded_channel();
        self.enqueue(&id, Outbound::Fragmented { payload: frame, sent })
            .await?;

        // Chunk uploads use the longer timeout to absorb slow links.
        let reply = self.await_reply(&id, reply, WS_BINARY_REQUEST_TIMEOUT);
        tokio::pin!(reply);
        loop {
            tokio::select! {
                biased;
                Some(n) = flushed.recv() => on_written(n, total),
                result = &mut reply => return result,
            }
        }
    }

    /// Registers a waiter for the reply to `id`.
    async fn register(&self, id: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.router.pending.lock().await.insert(id.to_string(), tx);
        rx
    }

    async fn enqueue(&self, id: &str, item: Outbound) -> Result<(), WsError> {
        if self.outbound.send(item).await.is_err() {
            self.router.pending.lock().await.remove(id);
            return Err(WsError::Closed);
        }
        Ok(())
    }

    /// Waits up to `timeout` for the reply to `id`, mapping error replies.
    async fn await_reply(
        &self,
        id: &str,
        reply: oneshot::Receiver<Message>,
        timeout: Duration,
    ) -> Result<Message, WsError> {
        let result = tokio::time::timeout(timeout, reply).await;

        // Clean up pending entry on any exit path.
        self.router.pending.lock().await.remove(id);

        match result {
            Ok(Ok(resp)) => match resp.error {
                Some(err) => Err(WsError::Server {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(resp),
            },
            Ok(Err(_)) => Err(WsError::Closed),
            Err(_) => Err(WsError::Timeout),
        }
    }

    /// Sets the callback for push events from the server.
    pub async fn set_event_callback(&self, cb: EventCallback) {
        *self.router.on_event.lock().await = Some(cb);
    }

    /// Sets the callback for disconnection.
    pub async fn set_disconnect_callback(&self, cb: Box<dyn Fn() + Send + Sync>) {
        *self.on_disconnect.lock().await = Some(cb);
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        debug!("closing connection");
        self.cancel.cancel();
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._reader.abort();
        self._writer.abort();
    }
}

/// Builds a binary chunk frame:
/// `[4 bytes big-endian header length][JSON header bytes][data]`.
pub fn encode_binary_frame(header: &[u8], data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + header.len() + data.len());
    frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
    frame.extend_from_slice(header);
    frame.extend_from_slice(data);
    frame
}
