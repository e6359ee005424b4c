//! WebSocket client for the upload server.
//!
//! Provides request/response correlation, fragmented chunk frames with
//! write progress, push event dispatch and keepalive.

mod inbound;
mod outbound;
pub mod ws_client;

pub use ws_client::{
    DisconnectCallback, EventCallback, WriteProgress, WsClient, WsError, encode_binary_frame,
};
