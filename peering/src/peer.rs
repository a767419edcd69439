//! The local view of a single remote node.
//!
//! A [`Peer`] owns two bounded queues and two background tasks. The send loop is the only consumer of the send queue,
//! which gives strict FIFO delivery per peer; it keeps one data stream open to the remote node and, when a write
//! to it fails, retries the same frame once on a freshly dialed stream. The receive loop drains messages pushed by
//! the inbound stream handler and hands them to the [`EventDispatcher`]. Closing the queues ends both tasks.

use crate::config::PeeringConfig;
use crate::dispatcher::EventDispatcher;
use crate::errors::PeeringError;
use crate::frame::write_frame;
use crate::identity::{PublicKey, TransportIdentity};
use crate::message_types::{Heartbeat, PeerMessageData, PeerMessageIn};
use crate::transport::{BoxedStream, Transport, HEARTBEAT_PROTOCOL, PEERING_PROTOCOL};
use log::*;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

/// Shared by every peer of one network provider.
#[derive(Clone)]
pub(crate) struct PeerContext {
    pub transport: Arc<dyn Transport>,
    pub dispatcher: Arc<EventDispatcher>,
    pub config: PeeringConfig,
    pub stop: watch::Receiver<bool>,
}

/// Resolves once the stop signal is raised, or once its sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[derive(Debug)]
enum Outbound {
    Message(PeerMessageData),
    Heartbeat(Heartbeat),
}

struct PeerState {
    peering_url: String,
    trusted: bool,
    num_users: usize,
    created_at: Instant,
    last_msg_sent: Option<Instant>,
    last_msg_recv: Option<Instant>,
    last_heartbeat: Option<Instant>,
}

impl PeerState {
    fn idle_since(&self) -> Instant {
        [self.last_msg_sent, self.last_msg_recv].into_iter().flatten().fold(self.created_at, Instant::max)
    }
}

struct Queues {
    send: mpsc::Sender<Outbound>,
    recv: mpsc::Sender<PeerMessageData>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MaintenanceAction {
    Nothing,
    Ping,
    Remove,
}

/// A point-in-time snapshot of a peer, for diagnostics.
#[derive(Clone, Debug, Serialize)]
pub struct PeerStatus {
    pub name: String,
    pub peering_url: String,
    pub pub_key: PublicKey,
    pub trusted: bool,
    pub alive: bool,
    pub num_users: usize,
}

pub struct Peer {
    name: String,
    pub_key: PublicKey,
    transport_id: TransportIdentity,
    state: Mutex<PeerState>,
    queues: Mutex<Option<Queues>>,
    received: Notify,
    ctx: PeerContext,
}

impl Peer {
    /// Creates a trusted peer with no users and starts its send and receive loops.
    pub(crate) fn spawn(name: String, peering_url: String, pub_key: PublicKey, ctx: PeerContext) -> Arc<Self> {
        let capacity = ctx.config.queue_capacity;
        let (send_tx, send_rx) = mpsc::channel(capacity);
        let (recv_tx, recv_rx) = mpsc::channel(capacity);
        let state = PeerState {
            peering_url,
            trusted: true,
            num_users: 0,
            created_at: Instant::now(),
            last_msg_sent: None,
            last_msg_recv: None,
            last_heartbeat: None,
        };
        let peer = Arc::new(Peer {
            name,
            transport_id: pub_key.transport_identity(),
            pub_key,
            state: Mutex::new(state),
            queues: Mutex::new(Some(Queues { send: send_tx, recv: recv_tx })),
            received: Notify::new(),
            ctx,
        });
        tokio::spawn(peer.clone().send_loop(send_rx));
        tokio::spawn(peer.clone().recv_loop(recv_rx));
        peer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pub_key(&self) -> &PublicKey {
        &self.pub_key
    }

    pub fn transport_identity(&self) -> &TransportIdentity {
        &self.transport_id
    }

    pub fn peering_url(&self) -> String {
        self.state.lock().peering_url.clone()
    }

    pub fn is_trusted(&self) -> bool {
        self.state.lock().trusted
    }

    pub fn num_users(&self) -> usize {
        self.state.lock().num_users
    }

    pub(crate) fn set_trust(&self, trusted: bool) {
        let mut state = self.state.lock();
        if state.trusted != trusted {
            info!("Peer {} is now {}", self.name, if trusted { "trusted" } else { "distrusted" });
            state.trusted = trusted;
        }
    }

    pub(crate) fn set_peering_url(&self, peering_url: &str) {
        let mut state = self.state.lock();
        if state.peering_url != peering_url {
            info!("Peer {} moved from {} to {peering_url}", self.name, state.peering_url);
            state.peering_url = peering_url.to_string();
        }
    }

    pub(crate) fn use_peer(&self) {
        self.state.lock().num_users += 1;
    }

    /// Gives back one reference obtained from the peer table.
    pub fn release(&self) {
        let mut state = self.state.lock();
        match state.num_users.checked_sub(1) {
            Some(n) => state.num_users = n,
            None => error!("Peer {} released more often than it was used", self.name),
        }
    }

    /// The peer counts as alive if we heard from it within the inactivity deadline.
    pub fn is_alive(&self) -> bool {
        let deadline = self.ctx.config.inactivity_deadline;
        let now = Instant::now();
        self.state.lock().last_msg_recv.is_some_and(|t| now.saturating_duration_since(t) < deadline)
    }

    /// Waits until the peer is alive, asking it for a heartbeat if it is not.
    pub async fn await_alive(&self, timeout: Duration) -> Result<(), PeeringError> {
        if self.is_alive() {
            return Ok(());
        }
        self.enqueue_heartbeat(Heartbeat::AckRequested);
        let wait = async {
            loop {
                let notified = self.received.notified();
                if self.is_alive() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| PeeringError::Timeout)
    }

    pub fn status(&self) -> PeerStatus {
        let alive = self.is_alive();
        let state = self.state.lock();
        PeerStatus {
            name: self.name.clone(),
            peering_url: state.peering_url.clone(),
            pub_key: self.pub_key.clone(),
            trusted: state.trusted,
            alive,
            num_users: state.num_users,
        }
    }

    /// Queues `msg` for delivery. Messages for an untrusted peer are dropped. Waits for room if the send queue is
    /// full.
    pub async fn send_msg(&self, msg: PeerMessageData) {
        if !self.is_trusted() {
            debug!("Not sending {msg:?} to untrusted peer {self}");
            return;
        }
        let Some(queue) = self.send_queue() else {
            warn!("Not sending {msg:?} to {self}: the peer is closed");
            return;
        };
        if let Err(err) = queue.send(Outbound::Message(msg)).await {
            warn!("Not sending to {self}: the send queue is closed. {err}");
        }
    }

    /// Queues a heartbeat without waiting. Returns `false` if the queue is full or closed.
    pub(crate) fn enqueue_heartbeat(&self, heartbeat: Heartbeat) -> bool {
        let Some(queue) = self.send_queue() else { return false };
        match queue.try_send(Outbound::Heartbeat(heartbeat)) {
            Ok(()) => {
                self.state.lock().last_heartbeat = Some(Instant::now());
                true
            }
            Err(err) => {
                debug!("Heartbeat to {self} not queued: {err}");
                false
            }
        }
    }

    /// Records that something arrived from the peer.
    pub(crate) fn note_received(&self) {
        self.state.lock().last_msg_recv = Some(Instant::now());
        self.received.notify_waiters();
    }

    fn note_sent(&self) {
        self.state.lock().last_msg_sent = Some(Instant::now());
    }

    /// Hands an inbound message to the receive loop. Waits for room if the receive queue is full.
    pub(crate) async fn recv_msg(&self, msg: PeerMessageData) {
        let queue = self.queues.lock().as_ref().map(|q| q.recv.clone());
        match queue {
            Some(queue) => {
                if queue.send(msg).await.is_err() {
                    debug!("Dropping message from {self}: the receive queue is closed");
                }
            }
            None => debug!("Dropping message from {self}: the peer is closed"),
        }
    }

    pub(crate) fn maintenance_action(&self, now: Instant) -> MaintenanceAction {
        let config = &self.ctx.config;
        let state = self.state.lock();
        let silent = state.last_msg_recv.is_none_or_elapsed(now, config.ping_after);
        let heartbeat_due = state.last_heartbeat.is_none_or_elapsed(now, config.ping_after);
        if state.num_users > 0 {
            if silent && heartbeat_due {
                return MaintenanceAction::Ping;
            }
            return MaintenanceAction::Nothing;
        }
        let idle = now.saturating_duration_since(state.idle_since()) >= config.inactivity_deadline;
        if !state.trusted && idle {
            return MaintenanceAction::Remove;
        }
        MaintenanceAction::Nothing
    }

    /// Closes both queues, which ends the background loops once they drain. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        self.queues.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.queues.lock().is_none()
    }

    fn send_queue(&self) -> Option<mpsc::Sender<Outbound>> {
        self.queues.lock().as_ref().map(|q| q.send.clone())
    }

    async fn send_loop(self: Arc<Self>, mut queue: mpsc::Receiver<Outbound>) {
        let mut stop = self.ctx.stop.clone();
        let mut stream: Option<BoxedStream> = None;
        loop {
            let item = tokio::select! {
                _ = stopped(&mut stop) => break,
                item = queue.recv() => item,
            };
            let Some(item) = item else { break };
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = self.transmit(item, &mut stream) => {}
            }
        }
        debug!("Send loop for {self} stopped");
    }

    async fn transmit(&self, item: Outbound, stream: &mut Option<BoxedStream>) {
        match item {
            Outbound::Message(msg) => self.transmit_message(msg, stream).await,
            Outbound::Heartbeat(heartbeat) => self.send_heartbeat(heartbeat).await,
        }
    }

    async fn transmit_message(&self, msg: PeerMessageData, stream: &mut Option<BoxedStream>) {
        if !self.is_trusted() {
            debug!("Dropping queued {msg:?}: peer {self} is no longer trusted");
            return;
        }
        let bytes = msg.to_bytes();
        // The remote may have closed the cached stream since the last send. That only shows as a failed write, so
        // the same frame gets one more try on a fresh stream.
        if let Some(s) = stream.as_mut() {
            match write_frame(s, &bytes).await {
                Ok(()) => {
                    trace!("Sent {msg:?} to {self}");
                    self.note_sent();
                    return;
                }
                Err(err) => {
                    debug!("Stream to {self} is broken ({err}). Redialing.");
                    *stream = None;
                }
            }
        }
        let mut fresh = match self.ctx.transport.dial(&self.transport_id, PEERING_PROTOCOL).await {
            Ok(s) => s,
            Err(err) => {
                warn!("Failed to send {msg:?} to {self}, cannot open stream: {err}");
                return;
            }
        };
        match write_frame(&mut fresh, &bytes).await {
            Ok(()) => {
                trace!("Sent {msg:?} to {self}");
                self.note_sent();
                *stream = Some(fresh);
            }
            Err(err) => warn!("Failed to send {msg:?} to {self}: {err}. Message dropped."),
        }
    }

    /// Sends a heartbeat on a stream of its own, bypassing the send queue.
    pub(crate) async fn send_heartbeat(&self, heartbeat: Heartbeat) {
        if !self.is_trusted() {
            debug!("Not sending heartbeat to untrusted peer {self}");
            return;
        }
        let mut stream = match self.ctx.transport.dial(&self.transport_id, HEARTBEAT_PROTOCOL).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to send heartbeat to {self}, cannot open stream: {err}");
                return;
            }
        };
        if let Err(err) = write_frame(&mut stream, &[heartbeat.to_byte()]).await {
            warn!("Failed to send heartbeat to {self}: {err}");
            return;
        }
        self.note_sent();
        if let Err(err) = stream.shutdown().await {
            trace!("Heartbeat stream to {self} did not close cleanly: {err}");
        }
    }

    async fn recv_loop(self: Arc<Self>, mut queue: mpsc::Receiver<PeerMessageData>) {
        let mut stop = self.ctx.stop.clone();
        loop {
            let msg = tokio::select! {
                _ = stopped(&mut stop) => break,
                msg = queue.recv() => msg,
            };
            let Some(msg) = msg else { break };
            let delivered = self.ctx.dispatcher.dispatch(&PeerMessageIn::new(msg, self.pub_key.clone()));
            trace!("Message from {self} delivered to {delivered} receivers");
        }
        debug!("Receive loop for {self} stopped");
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.state.lock().peering_url)
    }
}

trait Elapsed {
    fn is_none_or_elapsed(&self, now: Instant, period: Duration) -> bool;
}

impl Elapsed for Option<Instant> {
    fn is_none_or_elapsed(&self, now: Instant, period: Duration) -> bool {
        self.map_or(true, |t| now.saturating_duration_since(t) >= period)
    }
}
