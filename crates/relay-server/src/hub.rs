//! The connection hub.
//!
//! One task owns both the registry of live connections and the conversation
//! table. Every mutation arrives as a [`HubEvent`] on a single bounded channel
//! and is applied in arrival order, so neither structure needs a lock. Read
//! and write pumps talk to the hub through a cloneable [`HubHandle`].
//!
//! Delivery to a connection never blocks the hub: frames are pushed with
//! `try_send`, and a connection whose outbound queue is full (or already
//! closed) is evicted on the spot.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::Utc;
use metrics::{counter, gauge};
use relay_core::envelope::{HEARTBEAT, MSG_LIST, MSG_SEND};
use relay_core::{
    Address, Command, ConnectionId, ConversationEntry, ConversationRetention, ConversationTable,
    DecodeError, Envelope, Request, SendBody,
};
use relay_settings::HubSettings;
use relay_telemetry::metrics as names;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::HubError;

/// A connection asking to join the registry.
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    pub address: Address,
    /// Producer side of the connection's outbound queue. The hub holds the
    /// only copy; dropping it is what closes the queue.
    pub outbound: mpsc::Sender<Bytes>,
}

#[derive(Debug)]
pub enum HubEvent {
    Register(Registration),
    Deregister(ConnectionId),
    Inbound { from: ConnectionId, frame: Bytes },
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Point-in-time counts, used by `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    pub connections: usize,
    pub conversations: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Departure {
    /// The connection's own pumps asked to leave.
    Deregistered,
    /// The outbound queue was full.
    Evicted,
    /// The outbound queue was already closed by the consumer.
    Gone,
}

impl Departure {
    fn as_str(self) -> &'static str {
        match self {
            Self::Deregistered => "deregistered",
            Self::Evicted => "evicted",
            Self::Gone => "gone",
        }
    }
}

#[derive(Debug)]
struct Peer {
    address: Address,
    outbound: mpsc::Sender<Bytes>,
}

/// Registry and conversation state. Driven by [`Hub::handle`], either directly
/// (tests) or from the event loop in [`Hub::run`].
#[derive(Debug)]
pub struct Hub {
    peers: HashMap<ConnectionId, Peer>,
    conversations: ConversationTable,
    retention: ConversationRetention,
}

impl Hub {
    pub fn new(retention: ConversationRetention) -> Self {
        Self {
            peers: HashMap::new(),
            conversations: ConversationTable::new(),
            retention,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn conversations(&self) -> &ConversationTable {
        &self.conversations
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections: self.peers.len(),
            conversations: self.conversations.len(),
        }
    }

    /// Apply one event. All state changes go through here.
    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(registration) => self.register(registration),
            HubEvent::Deregister(id) => {
                if !self.remove_peer(&id, Departure::Deregistered) {
                    trace!(conn_id = %id, "deregister for a connection no longer registered");
                }
            }
            HubEvent::Inbound { from, frame } => self.inbound(&from, &frame),
            HubEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Consume events until the channel closes or `shutdown` fires. On exit
    /// every remaining outbound queue is closed, which lets each write pump
    /// send its close frame.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>, shutdown: CancellationToken) {
        info!(retention = ?self.retention, "hub started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        let remaining = self.peers.len();
        self.peers.clear();
        gauge!(names::CONNECTIONS_ACTIVE).set(0.0);
        info!(remaining, "hub stopped");
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            id,
            address,
            outbound,
        } = registration;
        info!(conn_id = %id, address = %address, "connection registered");
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        self.peers.insert(id, Peer { address, outbound });
        self.record_gauges();
    }

    /// The only way out of the registry. Dropping the peer drops its sender,
    /// which closes the outbound queue; retention is applied afterwards so
    /// `DropWhenOffline` sees the registry without this connection.
    fn remove_peer(&mut self, id: &ConnectionId, cause: Departure) -> bool {
        let Some(peer) = self.peers.remove(id) else {
            return false;
        };
        let Peer { address, outbound } = peer;
        drop(outbound);

        let purged = match self.retention {
            ConversationRetention::DropOnDisconnect => {
                self.conversations.remove_for_address(&address)
            }
            ConversationRetention::DropWhenOffline if !self.is_online(&address) => {
                self.conversations.remove_for_address(&address)
            }
            ConversationRetention::DropWhenOffline | ConversationRetention::Retain => 0,
        };

        info!(
            conn_id = %id,
            address = %address,
            cause = cause.as_str(),
            purged,
            "connection removed"
        );
        counter!(names::DISCONNECTIONS_TOTAL, "cause" => cause.as_str()).increment(1);
        self.record_gauges();
        true
    }

    fn is_online(&self, address: &Address) -> bool {
        self.peers.values().any(|peer| peer.address == *address)
    }

    fn inbound(&mut self, from: &ConnectionId, frame: &[u8]) {
        // Evicted connections may still have frames in flight.
        let Some(source) = self.peers.get(from).map(|peer| peer.address.clone()) else {
            counter!(names::FRAMES_ORPHANED_TOTAL).increment(1);
            trace!(conn_id = %from, "frame from unregistered connection dropped");
            return;
        };
        counter!(names::FRAMES_INBOUND_TOTAL).increment(1);

        let request = match Request::decode(frame) {
            Ok(request) => request,
            Err(error) => {
                counter!(names::DECODE_FAILURES_TOTAL, "reason" => error.reason()).increment(1);
                match &error {
                    DecodeError::UnknownCommand(cmd) => {
                        warn!(conn_id = %from, cmd = %cmd, "unknown command dropped");
                    }
                    _ => debug!(conn_id = %from, error = %error, "undecodable frame dropped"),
                }
                return;
            }
        };

        trace!(conn_id = %from, seq = request.seq, cmd = request.command.name(), "dispatch");
        match request.command {
            Command::Send(body) => self.route_message(request.seq, &source, body),
            Command::List(_) => self.list_conversations(request.seq, from, &source),
            Command::Heartbeat => self.heartbeat(from),
        }
    }

    /// Record the message on the pair's conversation and echo the inbound
    /// envelope to every connection of both participants, sender included.
    fn route_message(&mut self, seq: i64, sender: &Address, body: SendBody) {
        let conversation = self.conversations.record_message(
            sender,
            &body.recipient,
            &body.content_type,
            &body.body,
            Utc::now(),
        );
        let conversation_id = conversation.id;
        let (first, second) = (conversation.address1.clone(), conversation.address2.clone());
        gauge!(names::CONVERSATIONS_ACTIVE).set(self.conversations.len() as f64);

        let frame = match Envelope::new(seq, MSG_SEND, &body).encode() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(error = %error, "failed to encode routed message");
                return;
            }
        };

        let targets: Vec<ConnectionId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.address == first || peer.address == second)
            .map(|(id, _)| id.clone())
            .collect();

        let mut delivered = 0usize;
        for target in &targets {
            if self.deliver(target, frame.clone(), MSG_SEND) {
                delivered += 1;
            }
        }
        debug!(
            conversation_id = %conversation_id,
            seq,
            targets = targets.len(),
            delivered,
            "message routed"
        );
    }

    fn list_conversations(&mut self, seq: i64, requester: &ConnectionId, address: &Address) {
        let entries: Vec<ConversationEntry> = self
            .conversations
            .for_address(address)
            .into_iter()
            .map(ConversationEntry::from)
            .collect();

        match Envelope::new(seq, MSG_LIST, &entries).encode() {
            Ok(frame) => {
                self.deliver(requester, frame, MSG_LIST);
            }
            Err(error) => warn!(error = %error, "failed to encode conversation list"),
        }
    }

    fn heartbeat(&mut self, requester: &ConnectionId) {
        match Envelope::heartbeat_ack().encode() {
            Ok(frame) => {
                self.deliver(requester, frame, HEARTBEAT);
            }
            Err(error) => warn!(error = %error, "failed to encode heartbeat reply"),
        }
    }

    /// Non-blocking push onto one connection's outbound queue.
    fn deliver(&mut self, target: &ConnectionId, frame: Bytes, cmd: &'static str) -> bool {
        let Some(peer) = self.peers.get(target) else {
            return false;
        };

        match peer.outbound.try_send(frame) {
            Ok(()) => {
                counter!(names::FRAMES_ROUTED_TOTAL, "cmd" => cmd).increment(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %target, address = %peer.address, "outbound queue full, evicting");
                counter!(names::BACKPRESSURE_EVICTIONS_TOTAL).increment(1);
                self.remove_peer(target, Departure::Evicted);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.remove_peer(target, Departure::Gone);
                false
            }
        }
    }

    fn record_gauges(&self) {
        gauge!(names::CONNECTIONS_ACTIVE).set(self.peers.len() as f64);
        gauge!(names::CONVERSATIONS_ACTIVE).set(self.conversations.len() as f64);
    }
}

/// Cloneable sender side of the hub's event channel.
#[derive(Clone, Debug)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub fn new(events: mpsc::Sender<HubEvent>) -> Self {
        Self { events }
    }

    pub async fn register(&self, registration: Registration) -> Result<(), HubError> {
        self.send(HubEvent::Register(registration)).await
    }

    pub async fn deregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(HubEvent::Deregister(id)).await
    }

    pub async fn inbound(&self, from: ConnectionId, frame: Bytes) -> Result<(), HubError> {
        self.send(HubEvent::Inbound { from, frame }).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Snapshot(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

/// Start a hub task. It stops when `shutdown` is cancelled or every handle
/// has been dropped.
pub fn spawn(settings: &HubSettings, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.event_queue_capacity);
    let hub = Hub::new(settings.retention);
    let task = tokio::spawn(hub.run(rx, shutdown));
    (HubHandle::new(tx), task)
}
