//! The subscriber hub.
//!
//! The set of live connections and the set of block subscribers are owned by
//! a single control loop ([`HubControlLoop`]). Everything else (connection
//! tasks, command handlers, the watcher) talks to it through [`HubEvent`]s on
//! one ordered channel, so mutations never interleave and a broadcast issued
//! after an unregister can never reach the removed connection.
//!
//! Each connection has a bounded outbound queue drained by its write task.
//! The control loop only ever `try_send`s into it; a full queue marks the
//! connection as a slow consumer and it is dropped on the spot.

use axum::extract::ws::Message;
use futures_util::{Sink, Stream};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use ethws_types::Block;

use crate::connection::{read_task, write_task};
use crate::dispatch::Dispatcher;
use crate::messages::{ClientMessage, ServerMessage};
use crate::{HubError, HubStats};

pub type ConnectionId = u64;

/// An encoded text frame, shared between the queues of a broadcast.
pub(crate) type Frame = Arc<str>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound frames buffered per connection before it counts as slow.
    pub queue_capacity: usize,
    /// Text frames larger than this get an error reply instead of a decode.
    pub max_frame_bytes: usize,
    /// Upper bound for `get_latest_blocks`.
    pub max_latest_blocks: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_frame_bytes: 64 * 1024,
            max_latest_blocks: 100,
        }
    }
}

pub(crate) enum HubEvent {
    Register {
        id: ConnectionId,
        outbound: mpsc::Sender<Frame>,
        close: watch::Sender<()>,
    },
    Unregister {
        id: ConnectionId,
        reason: &'static str,
    },
    Subscribe {
        id: ConnectionId,
        subscribed: bool,
    },
    Send {
        id: ConnectionId,
        frame: Frame,
    },
    Broadcast {
        frame: Frame,
    },
    Shutdown,
}

/// Handle to the hub. Cheap to share behind an `Arc`; every method only
/// enqueues an event and returns.
pub struct SubscriberHub {
    events: mpsc::UnboundedSender<HubEvent>,
    config: HubConfig,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<HubStats>,
    next_id: AtomicU64,
    /// Command handlers still running. Guarded together with `intake_closed`
    /// so no handler is spawned after `drain` has taken the set.
    tasks: Mutex<JoinSet<()>>,
    intake_closed: AtomicBool,
    closed: AtomicBool,
}

impl SubscriberHub {
    /// Create the hub and its control loop. The loop does nothing until
    /// [`HubControlLoop::run`] is spawned.
    pub fn new(config: HubConfig, dispatcher: Dispatcher) -> (Arc<Self>, HubControlLoop) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(HubStats::default());
        let hub = Arc::new(Self {
            events: events_tx,
            config,
            dispatcher: Arc::new(dispatcher),
            stats: stats.clone(),
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(JoinSet::new()),
            intake_closed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let control = HubControlLoop {
            events: events_rx,
            connections: HashMap::new(),
            subscribed: HashSet::new(),
            stats,
        };
        (hub, control)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<HubStats> {
        &self.stats
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether new connections and upstream-bound commands are refused.
    pub fn is_closed(&self) -> bool {
        self.intake_closed.load(Ordering::Acquire) || self.events.is_closed()
    }

    /// Register a connection and start its read and write tasks.
    ///
    /// `sink` and `stream` are the two halves of one socket. Returns as soon
    /// as the tasks are spawned.
    pub fn accept<Si, St, E>(self: &Arc<Self>, sink: Si, stream: St) -> Result<ConnectionId, HubError>
    where
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (close_tx, close_rx) = watch::channel(());

        self.send_event(HubEvent::Register {
            id,
            outbound: outbound_tx,
            close: close_tx,
        })?;
        self.stats.record_accept();

        tokio::spawn(write_task(id, self.clone(), sink, outbound_rx, close_rx.clone()));
        tokio::spawn(read_task(id, self.clone(), stream, close_rx));
        Ok(id)
    }

    /// Push a block to every subscribed connection.
    pub fn broadcast_block(&self, block: &Block) -> Result<(), HubError> {
        let frame = ServerMessage::encode_block_update(block);
        self.send_event(HubEvent::Broadcast { frame: frame.into() })
    }

    /// Route a decoded command from connection `id`. Replies land on the
    /// same connection's queue. Upstream-bound commands run on their own
    /// task so the read task keeps reading.
    pub fn dispatch(self: &Arc<Self>, id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::SubscribeBlocks => self.set_subscribed(id, true),
            ClientMessage::UnsubscribeBlocks => self.set_subscribed(id, false),
            ClientMessage::Ping => self.reply(id, &ServerMessage::Pong),
            command => {
                let mut tasks = self.lock_tasks();
                if self.intake_closed.load(Ordering::Acquire) {
                    drop(tasks);
                    self.reply(id, &ServerMessage::error("gateway is shutting down"));
                    return;
                }
                // reap finished handlers
                while tasks.try_join_next().is_some() {}
                let hub = self.clone();
                tasks.spawn(async move {
                    let reply = hub.dispatcher.handle(command).await;
                    hub.reply(id, &reply);
                });
            }
        }
    }

    /// Refuse new connections and upstream-bound commands. Open connections
    /// stay up and keep receiving replies and broadcasts.
    pub fn close_intake(&self) {
        let _tasks = self.lock_tasks();
        if !self.intake_closed.swap(true, Ordering::AcqRel) {
            info!("subscriber hub no longer accepting work");
        }
    }

    /// Close intake and wait up to `grace` for running command handlers.
    /// Handlers still running afterwards are aborted. Returns whether all
    /// of them finished.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.close_intake();
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        let finished = timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !finished {
            warn!(remaining = tasks.len(), "command handlers outlived the grace period, aborting");
        }
        finished
    }

    /// Stop the control loop. Every open connection is closed and further
    /// `accept` calls fail.
    pub fn shutdown(&self) {
        self.close_intake();
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("subscriber hub shutting down");
            let _ = self.events.send(HubEvent::Shutdown);
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reply(&self, id: ConnectionId, message: &ServerMessage) {
        let frame = message.encode().into();
        if self.send_event(HubEvent::Send { id, frame }).is_err() {
            debug!(conn = id, "reply dropped, hub is shut down");
        }
    }

    pub(crate) fn unregister(&self, id: ConnectionId, reason: &'static str) {
        let _ = self.send_event(HubEvent::Unregister { id, reason });
    }

    fn set_subscribed(&self, id: ConnectionId, subscribed: bool) {
        let _ = self.send_event(HubEvent::Subscribe { id, subscribed });
    }

    fn send_event(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).map_err(|_| HubError::Closed)
    }
}

struct ConnectionEntry {
    outbound: mpsc::Sender<Frame>,
    // Dropping this wakes both connection tasks.
    _close: watch::Sender<()>,
}

/// The single owner of the connection registry.
pub struct HubControlLoop {
    events: mpsc::UnboundedReceiver<HubEvent>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    subscribed: HashSet<ConnectionId>,
    stats: Arc<HubStats>,
}

impl HubControlLoop {
    pub async fn run(mut self) {
        info!("subscriber hub started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register { id, outbound, close } => {
                    self.connections.insert(
                        id,
                        ConnectionEntry {
                            outbound,
                            _close: close,
                        },
                    );
                    debug!(conn = id, clients = self.connections.len(), "connection registered");
                }
                HubEvent::Unregister { id, reason } => self.remove(id, reason),
                HubEvent::Subscribe { id, subscribed } => {
                    if self.connections.contains_key(&id) {
                        if subscribed {
                            self.subscribed.insert(id);
                        } else {
                            self.subscribed.remove(&id);
                        }
                        debug!(conn = id, subscribed, "subscription changed");
                        self.enqueue(id, ServerMessage::ack(subscribed).encode().into());
                    }
                }
                HubEvent::Send { id, frame } => {
                    self.enqueue(id, frame);
                }
                HubEvent::Broadcast { frame } => self.broadcast(frame),
                HubEvent::Shutdown => break,
            }
            self.stats
                .set_gauges(self.connections.len(), self.subscribed.len());
        }

        let open = self.connections.len();
        self.subscribed.clear();
        self.connections.clear();
        self.stats.set_gauges(0, 0);
        info!(closed = open, "subscriber hub stopped");
    }

    /// Queue `frame` for `id`. Returns whether it was queued.
    fn enqueue(&mut self, id: ConnectionId, frame: Frame) -> bool {
        let Some(entry) = self.connections.get(&id) else {
            return false;
        };
        match entry.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn = id, "outbound queue full, dropping slow consumer");
                self.stats.record_slow_drop();
                self.remove(id, "slow consumer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.remove(id, "writer gone");
                false
            }
        }
    }

    fn broadcast(&mut self, frame: Frame) {
        let targets: Vec<ConnectionId> = self.subscribed.iter().copied().collect();
        let mut delivered = 0;
        for id in targets {
            if self.enqueue(id, frame.clone()) {
                delivered += 1;
            }
        }
        self.stats.record_broadcast();
        debug!(delivered, "block broadcast");
    }

    fn remove(&mut self, id: ConnectionId, reason: &'static str) {
        self.subscribed.remove(&id);
        if self.connections.remove(&id).is_some() {
            debug!(conn = id, reason, clients = self.connections.len(), "connection unregistered");
        }
    }
}
