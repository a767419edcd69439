//! The network provider: the public face of the peering layer.
//!
//! A [`NetworkProvider`] ties the trust registry, the peer table, the event dispatcher and the transport together.
//! It keeps the peer table in line with the registry, serves inbound streams, and hands out [`PeerSender`],
//! [`PeerGroup`] and [`PeerDomain`] handles to the layers above.

use crate::config::PeeringConfig;
use crate::dispatcher::{EventDispatcher, RecvCallback};
use crate::domain::PeerDomain;
use crate::errors::{PeeringError, TrustError};
use crate::frame::read_frame;
use crate::group::PeerGroup;
use crate::identity::{IdentityError, NodeIdentity, PublicKey, TransportIdentity};
use crate::listeners::CancelHandle;
use crate::maintenance::maintenance_loop;
use crate::message_types::{Heartbeat, PeerMessageData, PeeringId};
use crate::peer::{stopped, PeerContext, PeerStatus};
use crate::peer_table::PeerTable;
use crate::sender::{LocalPeer, PeerSender};
use crate::transport::{
    resolve_peering_url, BoxedStream, StreamHandler, Transport, HEARTBEAT_PROTOCOL, PEERING_PROTOCOL,
};
use crate::trust::{validate_trusted_peer_params, TrustListener, TrustedNetworkManager, TrustedPeer};
use log::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The name the local node is registered under in the trust registry.
pub const SELF_PEER_NAME: &str = "me";

/// Cheap to clone; all clones share the same node.
#[derive(Clone)]
pub struct NetworkProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    local: LocalPeer,
    pub_key: PublicKey,
    peering_url: String,
    config: PeeringConfig,
    trust: Arc<dyn TrustedNetworkManager>,
    dispatcher: Arc<EventDispatcher>,
    table: Arc<PeerTable>,
    stop: watch::Sender<bool>,
    trust_listener: Mutex<Option<CancelHandle>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    syncing: Mutex<()>,
}

impl NetworkProvider {
    /// Creates the provider for `identity`, listening through `transport`.
    ///
    /// The local node is added to the trust registry as [`SELF_PEER_NAME`] if it is not there yet, and every other
    /// trusted peer gets an entry in the peer table. Peers whose URL cannot be resolved are logged and skipped.
    /// Background work starts with [`NetworkProvider::start`]. Must be called from within a tokio runtime.
    pub fn new(
        identity: &NodeIdentity,
        peering_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        trust: Arc<dyn TrustedNetworkManager>,
        config: PeeringConfig,
    ) -> Result<Self, PeeringError> {
        config.validate()?;
        let peering_url = peering_url.into();
        let pub_key = identity.public_key()?;
        if transport.local_identity() != pub_key.transport_identity() {
            return Err(IdentityError::InvalidKey(format!(
                "transport identity {} does not belong to key {pub_key}",
                transport.local_identity()
            ))
            .into());
        }
        if !trust.is_trusted_peer(&pub_key) {
            trust.trust_peer(SELF_PEER_NAME, pub_key.clone(), &peering_url)?;
        }
        let dispatcher = Arc::new(EventDispatcher::new());
        let (stop, stop_rx) = watch::channel(false);
        let ctx = PeerContext {
            transport: transport.clone(),
            dispatcher: dispatcher.clone(),
            config: config.clone(),
            stop: stop_rx.clone(),
        };
        let table = Arc::new(PeerTable::new(ctx));
        let max_frame_len = config.max_frame_len;
        transport.register_protocol_handler(
            PEERING_PROTOCOL,
            stream_handler(Arc::downgrade(&table), stop_rx.clone(), move |table, from, stream, stop| {
                handle_data_stream(table, from, stream, max_frame_len, stop)
            }),
        );
        transport.register_protocol_handler(
            HEARTBEAT_PROTOCOL,
            stream_handler(Arc::downgrade(&table), stop_rx, handle_heartbeat_stream),
        );
        for tp in trust.trusted_peers()? {
            if tp.pub_key == pub_key {
                continue;
            }
            if let Err(err) = table.add_or_update(&tp) {
                warn!("Skipping trusted peer {tp}: {err}");
            }
        }
        let name = identity.name().to_string();
        let local = LocalPeer::new(name, pub_key.clone(), peering_url.clone(), dispatcher.clone());
        info!("Network provider for {pub_key} at {peering_url} created with {} peers", table.len());
        let inner = ProviderInner {
            local,
            pub_key,
            peering_url,
            config,
            trust,
            dispatcher,
            table,
            stop,
            trust_listener: Mutex::new(None),
            maintenance: Mutex::new(None),
            syncing: Mutex::new(()),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Starts the maintenance loop and subscribes to trust registry changes. Calling it again has no effect.
    pub fn start(&self) {
        let mut maintenance = self.inner.maintenance.lock();
        if maintenance.is_some() || self.is_shut_down() {
            return;
        }
        let period = self.inner.config.maintenance_period;
        let task = maintenance_loop(self.inner.table.clone(), period, self.inner.stop.subscribe());
        *maintenance = Some(tokio::spawn(task));
        let weak: Weak<ProviderInner> = Arc::downgrade(&self.inner);
        // Notifications may arrive out of commit order, so the registry is re-read rather than the snapshot applied.
        let listener: TrustListener = Arc::new(move |_: &Vec<TrustedPeer>| {
            if let Some(inner) = weak.upgrade() {
                inner.sync_with_registry();
            }
        });
        *self.inner.trust_listener.lock() = Some(self.inner.trust.trusted_peers_listener(listener));
        debug!("Network provider for {} started", self.inner.pub_key);
    }

    pub fn pub_key(&self) -> &PublicKey {
        &self.inner.pub_key
    }

    pub fn peering_url(&self) -> &str {
        &self.inner.peering_url
    }

    pub fn config(&self) -> &PeeringConfig {
        &self.inner.config
    }

    pub fn self_peer(&self) -> PeerSender {
        PeerSender::Local(self.inner.local.clone())
    }

    /// Returns a handle to the peer with `pub_key`, registering one user on it. Release it when done.
    pub fn peer_by_pub_key(&self, pub_key: &PublicKey) -> Result<PeerSender, PeeringError> {
        self.inner.peer_by_pub_key(pub_key)
    }

    pub fn attach(&self, peering_id: PeeringId, receiver: u8, callback: RecvCallback) -> CancelHandle {
        self.inner.dispatcher.attach(peering_id, receiver, callback)
    }

    /// Builds a group over `members`, in the given order. The local node must be one of them.
    pub fn peer_group(&self, peering_id: PeeringId, members: &[PublicKey]) -> Result<PeerGroup, PeeringError> {
        let nodes = self.inner.use_all(members)?;
        PeerGroup::new(peering_id, nodes, self.inner.dispatcher.clone())
    }

    /// Builds a domain over `members`. The local node is left out if listed.
    pub fn peer_domain(&self, peering_id: PeeringId, members: &[PublicKey]) -> Result<PeerDomain, PeeringError> {
        let others: Vec<PublicKey> = members.iter().filter(|pk| **pk != self.inner.pub_key).cloned().collect();
        let nodes = self.inner.use_all(&others)?;
        Ok(PeerDomain::new(peering_id, nodes, self.inner.dispatcher.clone()))
    }

    pub async fn send_msg_by_pub_key(&self, pub_key: &PublicKey, msg: PeerMessageData) -> Result<(), PeeringError> {
        let peer = self.inner.peer_by_pub_key(pub_key)?;
        peer.send_msg(msg).await;
        peer.release();
        Ok(())
    }

    /// The local node first, then every peer table entry by name.
    pub fn peer_status(&self) -> Vec<PeerStatus> {
        let mut statuses = vec![self.self_peer().status()];
        statuses.extend(self.inner.table.statuses());
        statuses
    }

    /// Trusts a peer and brings it into the peer table. Nothing is stored if the URL cannot be resolved.
    pub fn trust_peer(&self, name: &str, pub_key: PublicKey, peering_url: &str) -> Result<TrustedPeer, PeeringError> {
        if self.is_shut_down() {
            return Err(PeeringError::ShuttingDown);
        }
        resolve_peering_url(peering_url)?;
        validate_trusted_peer_params(name, peering_url)?;
        let tp = self.inner.trust.trust_peer(name, pub_key, peering_url)?;
        self.inner.sync_with_registry();
        Ok(tp)
    }

    pub fn distrust_peer(&self, pub_key: &PublicKey) -> Result<Option<TrustedPeer>, PeeringError> {
        if *pub_key == self.inner.pub_key {
            return Err(TrustError::invalid("the local node cannot be distrusted").into());
        }
        let removed = self.inner.trust.distrust_peer(pub_key)?;
        self.inner.sync_with_registry();
        Ok(removed)
    }

    pub fn trusted_peers(&self) -> Result<Vec<TrustedPeer>, PeeringError> {
        Ok(self.inner.trust.trusted_peers()?)
    }

    /// Reconciles the peer table with the full list of trusted peers.
    pub fn trust_change_applied(&self, trusted: &[TrustedPeer]) {
        let _syncing = self.inner.syncing.lock();
        self.inner.trust_change_applied(trusted);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Stops all background work and closes every peer. Safe to call any number of times.
    pub async fn shutdown(&self) {
        if !self.inner.stop.send_replace(true) {
            info!("Shutting down network provider for {}", self.inner.pub_key);
        }
        let listener = self.inner.trust_listener.lock().take();
        if let Some(listener) = listener {
            listener.cancel();
        }
        self.inner.table.close_all();
        let task = self.inner.maintenance.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("Maintenance task ended abnormally: {err}");
            }
        }
    }
}

impl ProviderInner {
    fn peer_by_pub_key(&self, pub_key: &PublicKey) -> Result<PeerSender, PeeringError> {
        if *pub_key == self.pub_key {
            return Ok(PeerSender::Local(self.local.clone()));
        }
        if *self.stop.borrow() {
            return Err(PeeringError::ShuttingDown);
        }
        self.table
            .lookup_or_use(pub_key)
            .map(PeerSender::Remote)
            .ok_or_else(|| PeeringError::PeerNotTrusted(pub_key.clone()))
    }

    /// Looks up every key, releasing what was taken so far if any lookup fails.
    fn use_all(&self, members: &[PublicKey]) -> Result<Vec<PeerSender>, PeeringError> {
        let mut nodes = Vec::with_capacity(members.len());
        for pub_key in members {
            match self.peer_by_pub_key(pub_key) {
                Ok(node) => nodes.push(node),
                Err(err) => {
                    nodes.iter().for_each(PeerSender::release);
                    return Err(err);
                }
            }
        }
        Ok(nodes)
    }

    /// Brings the peer table in line with the registry as it is now. Concurrent calls are serialized, so the last
    /// one to run always applies the latest registry state.
    fn sync_with_registry(&self) {
        let _syncing = self.syncing.lock();
        match self.trust.trusted_peers() {
            Ok(trusted) => self.trust_change_applied(&trusted),
            Err(err) => warn!("Could not read the trusted peers: {err}"),
        }
    }

    fn trust_change_applied(&self, trusted: &[TrustedPeer]) {
        if *self.stop.borrow() {
            return;
        }
        for tp in trusted.iter().filter(|tp| tp.pub_key != self.pub_key) {
            if let Err(err) = self.table.add_or_update(tp) {
                warn!("Could not apply trust change for {tp}: {err}");
            }
        }
        let keys: HashSet<&PublicKey> = trusted.iter().map(|tp| &tp.pub_key).collect();
        for peer in self.table.snapshot() {
            if !keys.contains(peer.pub_key()) {
                self.table.distrust(peer.pub_key());
            }
        }
    }
}

/// Wraps an async stream handler so each inbound stream is served on its own task.
fn stream_handler<F, Fut>(table: Weak<PeerTable>, stop: watch::Receiver<bool>, serve: F) -> StreamHandler
where
    F: Fn(Weak<PeerTable>, TransportIdentity, BoxedStream, watch::Receiver<bool>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |from: TransportIdentity, stream: BoxedStream| {
        tokio::spawn(serve(table.clone(), from, stream, stop.clone()));
    })
}

/// Reads data frames until the stream ends, fails, or the sender turns out to be unknown.
///
/// Frames from a known peer that is not trusted are read in full and dropped, so the stream stays aligned on frame
/// boundaries and traffic resumes as soon as the peer is trusted again.
async fn handle_data_stream(
    table: Weak<PeerTable>,
    from: TransportIdentity,
    mut stream: BoxedStream,
    max_frame_len: usize,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = stopped(&mut stop) => break,
            frame = read_frame(&mut stream, max_frame_len) => frame,
        };
        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                trace!("Data stream from {from} closed");
                break;
            }
            Err(err) => {
                warn!("Closing data stream from {from}: {err}");
                break;
            }
        };
        let Some(table) = table.upgrade() else { break };
        let Some(peer) = table.get(&from) else {
            warn!("Closing data stream from unknown node {from}");
            break;
        };
        if !peer.is_trusted() {
            debug!("Dropping {} byte frame from untrusted peer {peer}", payload.len());
            continue;
        }
        let msg = match PeerMessageData::from_bytes(&payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("Closing data stream from {peer}: {err}");
                break;
            }
        };
        trace!("Received {msg:?} from {peer}");
        peer.note_received();
        peer.recv_msg(msg).await;
    }
}

/// Reads one heartbeat frame and answers it if an acknowledgement was requested.
async fn handle_heartbeat_stream(
    table: Weak<PeerTable>,
    from: TransportIdentity,
    mut stream: BoxedStream,
    mut stop: watch::Receiver<bool>,
) {
    let frame = tokio::select! {
        _ = stopped(&mut stop) => return,
        frame = read_frame(&mut stream, 1) => frame,
    };
    let heartbeat = match frame.map(|payload| payload.map(|p| Heartbeat::from_payload(&p))) {
        Ok(Some(Ok(heartbeat))) => heartbeat,
        Ok(None) => return,
        Ok(Some(Err(err))) | Err(err) => {
            warn!("Invalid heartbeat from {from}: {err}");
            return;
        }
    };
    let Some(table) = table.upgrade() else { return };
    let Some(peer) = table.get(&from) else {
        debug!("Ignoring heartbeat from unknown node {from}");
        return;
    };
    if !peer.is_trusted() {
        debug!("Ignoring heartbeat from untrusted peer {peer}");
        return;
    }
    trace!("Heartbeat {heartbeat:?} from {peer}");
    peer.note_received();
    if heartbeat == Heartbeat::AckRequested {
        peer.send_heartbeat(Heartbeat::Plain).await;
    }
}
