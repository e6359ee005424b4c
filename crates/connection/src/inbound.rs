//! Inbound half of the connection: replies and push events.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunkup_protocol::constants::{MessageType, WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use chunkup_protocol::envelope::Message;

use crate::outbound::Outbound;
use crate::ws_client::{DisconnectCallback, EventCallback};

pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// Where an incoming text message went.
#[derive(Debug, PartialEq)]
pub(crate) enum Routed {
    /// Delivered to the request waiting on its id.
    Reply,
    /// Handed to the event callback.
    Event(MessageType),
    /// Malformed, oversized, or a push nobody listens to.
    Dropped,
}

/// Routes text messages to waiting requests or the event callback.
#[derive(Clone)]
pub(crate) struct Router {
    pub(crate) pending: PendingMap,
    pub(crate) on_event: Arc<Mutex<Option<EventCallback>>>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            on_event: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) async fn route(&self, text: &str) -> Routed {
        if text.len() > WS_MAX_MESSAGE_SIZE {
            warn!(bytes = text.len(), "oversized message dropped");
            return Routed::Dropped;
        }
        let msg: Message = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "unparseable message dropped");
                return Routed::Dropped;
            }
        };
        trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

        let waiter = self.pending.lock().await.remove(&msg.id);
        if let Some(tx) = waiter {
            let _ = tx.send(msg);
            return Routed::Reply;
        }

        let msg_type = msg.msg_type.clone();
        match self.on_event.lock().await.as_ref() {
            Some(cb) => {
                cb(msg_type.clone(), msg);
                Routed::Event(msg_type)
            }
            None => {
                debug!(?msg_type, "push event without listener");
                Routed::Dropped
            }
        }
    }

    /// Fails every outstanding request with a closed connection.
    async fn abandon_pending(&self) {
        let abandoned = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        if abandoned > 0 {
            debug!(abandoned, "connection lost with requests in flight");
        }
    }
}

/// Reads from the socket until it closes, errors, stays silent for
/// [`WS_PONG_WAIT`], or `cancel` fires. Then fails outstanding requests
/// and runs the disconnect callback.
pub(crate) async fn reader<S>(
    mut stream: S,
    router: Router,
    on_disconnect: DisconnectCallback,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let silence = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(silence);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            () = &mut silence => {
                warn!("no traffic from server, connection dead");
                break;
            }
            frame = stream.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket read failed");
                break;
            }
            None => {
                debug!("WebSocket stream ended");
                break;
            }
        };
        silence
            .as_mut()
            .reset(tokio::time::Instant::now() + WS_PONG_WAIT);

        match msg {
            WsMessage::Text(text) => {
                router.route(&text).await;
            }
            WsMessage::Ping(data) => {
                let _ = outbound
                    .send(Outbound::Message(WsMessage::Pong(data)))
                    .await;
            }
            WsMessage::Close(frame) => {
                debug!(?frame, "server closed the connection");
                break;
            }
            // Pongs only refresh the deadline; the server sends no binary.
            _ => {}
        }
    }

    router.abandon_pending().await;
    if let Some(cb) = on_disconnect.lock().await.as_ref() {
        cb();
    }
}
