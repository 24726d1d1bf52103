//! Per-connection read and write tasks.
//!
//! Both tasks watch the connection's close signal, which fires when the
//! control loop drops the registry entry. Neither task touches the
//! registry; they only emit events.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::hub::{ConnectionId, Frame};
use crate::messages::{ClientMessage, ServerMessage};
use crate::{HubError, SubscriberHub};

/// How long a closing writer may spend on the close handshake.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

pub(crate) async fn read_task<St, E>(
    id: ConnectionId,
    hub: Arc<SubscriberHub>,
    mut stream: St,
    mut close: watch::Receiver<()>,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = loop {
        let next = tokio::select! {
            _ = close.changed() => {
                debug!(conn = id, "reader stopped by hub");
                return;
            }
            next = stream.next() => next,
        };
        match next {
            None => break "stream ended",
            Some(Err(e)) => {
                debug!(conn = id, error = %HubError::Connection(e.to_string()), "receive failed");
                break "receive error";
            }
            Some(Ok(Message::Text(text))) => handle_text(&hub, id, &text),
            Some(Ok(Message::Binary(_))) => {
                hub.reply(id, &ServerMessage::error("binary frames are not supported"));
            }
            Some(Ok(Message::Close(_))) => break "client closed",
            Some(Ok(_)) => {}
        }
    };
    hub.unregister(id, reason);
}

fn handle_text(hub: &Arc<SubscriberHub>, id: ConnectionId, text: &str) {
    let config = hub.config();
    if text.len() > config.max_frame_bytes {
        hub.reply(
            id,
            &ServerMessage::error(format!(
                "frame of {} bytes exceeds the {} byte limit",
                text.len(),
                config.max_frame_bytes
            )),
        );
        return;
    }
    match ClientMessage::decode(text, config.max_latest_blocks) {
        Ok(message) => {
            debug!(conn = id, kind = message.kind(), "command received");
            hub.dispatch(id, message);
        }
        Err(e) => {
            debug!(conn = id, error = %e, "undecodable frame");
            hub.reply(id, &ServerMessage::error(e.to_string()));
        }
    }
}

pub(crate) async fn write_task<Si>(
    id: ConnectionId,
    hub: Arc<SubscriberHub>,
    mut sink: Si,
    outbound: mpsc::Receiver<Frame>,
    close: watch::Receiver<()>,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    if let Err(e) = write_frames(&hub, &mut sink, outbound, close).await {
        debug!(conn = id, error = %e, "send failed");
        hub.unregister(id, "send error");
        return;
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
    debug!(conn = id, "writer finished");
}

/// Drain the queue into the socket until the hub closes the connection.
async fn write_frames<Si>(
    hub: &SubscriberHub,
    sink: &mut Si,
    mut outbound: mpsc::Receiver<Frame>,
    mut close: watch::Receiver<()>,
) -> Result<(), HubError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
            _ = close.changed() => return Ok(()),
        };
        // queued frames are flushed first when the socket is ready
        tokio::select! {
            biased;
            sent = sink.send(Message::Text(frame.to_string())) => {
                sent.map_err(|e| HubError::Connection(e.to_string()))?;
            }
            _ = close.changed() => return Ok(()),
        }
        hub.stats().record_frame_sent();
    }
}
