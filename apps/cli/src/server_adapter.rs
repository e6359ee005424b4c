//! Adapter bridging `WsClient` to the uploader's `UploadServer` trait.
//!
//! Commit events arrive as push messages on the shared connection and are
//! routed to the subscriber registered for their upload identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chunkup_connection::{WsClient, WsError};
use chunkup_protocol::constants::MessageType;
use chunkup_protocol::envelope::Message;
use chunkup_protocol::messages::{
    ChunkCommittedEvent, CommitSubscriptionRequest, FinalizeRequest, FinalizeResponse,
    InitiateRequest, InitiateResponse, OperationResult, UploadChunkHeader, UploadChunkResponse,
};
use chunkup_uploader::{ServerFuture, TransferProgress, UploadError, UploadServer};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Subscribers = Arc<Mutex<HashMap<String, mpsc::Sender<ChunkCommittedEvent>>>>;

/// Implements [`UploadServer`] on top of a WebSocket connection.
pub struct WsUploadServer {
    client: WsClient,
    subscribers: Subscribers,
}

impl WsUploadServer {
    /// Connects to `url` and starts routing commit events.
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        let client = WsClient::connect(url).await?;
        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));

        let routes = subscribers.clone();
        client
            .set_event_callback(Box::new(move |msg_type, msg| {
                route_push_event(&routes, msg_type, &msg);
            }))
            .await;

        // A lost connection ends every commit stream.
        let routes = subscribers.clone();
        client
            .set_disconnect_callback(Box::new(move || {
                routes.lock().unwrap().clear();
            }))
            .await;

        Ok(Self {
            client,
            subscribers,
        })
    }

    /// Closes the underlying connection.
    pub async fn close(&self) {
        self.client.close().await;
    }

    async fn request<Req, Resp>(&self, msg_type: MessageType, req: &Req) -> Result<Resp, UploadError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let resp = self
            .client
            .send_request(msg_type, Some(req))
            .await
            .map_err(server_error)?;
        parse_reply(&resp)
    }
}

fn server_error(e: WsError) -> UploadError {
    UploadError::Server(e.to_string())
}

fn parse_reply<T: DeserializeOwned>(msg: &Message) -> Result<T, UploadError> {
    msg.parse_payload::<T>()
        .map_err(|e| UploadError::Server(format!("malformed {:?} payload: {e}", msg.msg_type)))?
        .ok_or_else(|| UploadError::Server(format!("empty {:?} payload", msg.msg_type)))
}

/// Delivers a `chunk_committed` push to its subscriber, if any.
fn route_push_event(subscribers: &Subscribers, msg_type: MessageType, msg: &Message) {
    if msg_type != MessageType::ChunkCommitted {
        debug!(?msg_type, "ignoring push event");
        return;
    }
    let event: ChunkCommittedEvent = match parse_reply(msg) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(error = %e, "dropping commit event");
            return;
        }
    };

    let subs = subscribers.lock().unwrap();
    match subs.get(&event.upload_identity) {
        Some(tx) => {
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "commit event dropped");
            }
        }
        None => debug!(upload = %event.upload_identity, "commit event without subscriber"),
    }
}

impl UploadServer for WsUploadServer {
    fn initiate<'a>(&'a self, req: &'a InitiateRequest) -> ServerFuture<'a, InitiateResponse> {
        Box::pin(self.request(MessageType::Initiate, req))
    }

    fn upload_chunk<'a>(
        &'a self,
        header: &'a UploadChunkHeader,
        data: &'a [u8],
        on_progress: &'a TransferProgress,
    ) -> ServerFuture<'a, UploadChunkResponse> {
        Box::pin(async move {
            on_progress(0.0);
            let header = serde_json::to_value(header)
                .map_err(|e| UploadError::Server(format!("encode chunk header: {e}")))?;
            // Writing the frame covers up to 99%; the receipt completes it.
            let written = |sent: u64, total: u64| {
                on_progress(99.0 * sent as f64 / total.max(1) as f64);
            };
            let resp = self
                .client
                .send_binary(&header, data, &written)
                .await
                .map_err(server_error)?;
            let receipt: UploadChunkResponse = parse_reply(&resp)?;
            on_progress(100.0);
            Ok(receipt)
        })
    }

    fn finalize<'a>(&'a self, req: &'a FinalizeRequest) -> ServerFuture<'a, FinalizeResponse> {
        Box::pin(self.request(MessageType::Finalize, req))
    }

    fn subscribe_commits<'a>(
        &'a self,
        upload_identity: &'a str,
    ) -> ServerFuture<'a, mpsc::Receiver<ChunkCommittedEvent>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(256);
            self.subscribers
                .lock()
                .unwrap()
                .insert(upload_identity.to_string(), tx);

            let req = CommitSubscriptionRequest {
                upload_identity: upload_identity.to_string(),
            };
            let result: Result<OperationResult, UploadError> =
                self.request(MessageType::SubscribeCommits, &req).await;
            match result {
                Ok(r) if r.success => Ok(rx),
                Ok(r) => {
                    self.subscribers.lock().unwrap().remove(upload_identity);
                    Err(UploadError::Server(r.message))
                }
                Err(e) => {
                    self.subscribers.lock().unwrap().remove(upload_identity);
                    Err(e)
                }
            }
        })
    }

    fn unsubscribe_commits<'a>(&'a self, upload_identity: &'a str) -> ServerFuture<'a, ()> {
        Box::pin(async move {
            self.subscribers.lock().unwrap().remove(upload_identity);
            let req = CommitSubscriptionRequest {
                upload_identity: upload_identity.to_string(),
            };
            let _: OperationResult = self.request(MessageType::UnsubscribeCommits, &req).await?;
            Ok(())
        })
    }
}
