//! Outbound half of the connection.
//!
//! One task owns the sink. Requests, pongs and chunk uploads are queued
//! to it, and it interleaves keepalive pings between them.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use chunkup_protocol::constants::WS_PING_PERIOD;

/// Receives the running total of payload bytes flushed to the socket.
pub(crate) type SentBytes = mpsc::UnboundedSender<u64>;

/// Work item for the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A whole message: text requests and control frames.
    Message(WsMessage),
    /// A binary message written as consecutive fragments.
    ///
    /// The peer reassembles it into one binary message; the fragments
    /// only exist so that progress can be reported while it is written.
    Fragmented { payload: Vec<u8>, sent: SentBytes },
}

/// Drains `queue` into `sink` until cancelled, the queue closes or a
/// write fails, then sends a close frame.
pub(crate) async fn writer<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Outbound>,
    fragment_size: usize,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval(WS_PING_PERIOD);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.reset();

    loop {
        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => {
                trace!("sending keepalive ping");
                sink.send(WsMessage::Ping(Vec::new().into())).await
            }
            item = queue.recv() => match item {
                Some(Outbound::Message(msg)) => sink.send(msg).await,
                Some(Outbound::Fragmented { payload, sent }) => {
                    write_fragmented(&mut sink, &payload, fragment_size, &sent).await
                }
                None => break,
            },
        };
        if let Err(e) = written {
            error!(error = %e, "WebSocket write failed");
            break;
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Writes `payload` as one binary message split into frames of at most
/// `fragment_size` bytes, reporting the bytes flushed after each frame.
async fn write_fragmented<S>(
    sink: &mut S,
    payload: &[u8],
    fragment_size: usize,
    sent: &SentBytes,
) -> Result<(), tungstenite::Error>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let pieces: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(fragment_size.max(1)).collect()
    };
    let last = pieces.len() - 1;

    let mut flushed = 0u64;
    for (i, piece) in pieces.into_iter().enumerate() {
        let opcode = if i == 0 {
            OpCode::Data(Data::Binary)
        } else {
            OpCode::Data(Data::Continue)
        };
        let frame = Frame::message(piece.to_vec(), opcode, i == last);
        sink.send(WsMessage::Frame(frame)).await?;

        flushed += piece.len() as u64;
        let _ = sent.send(flushed);
    }
    Ok(())
}
