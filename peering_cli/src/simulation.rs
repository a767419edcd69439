use crate::error::CliError;
use log::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use trusted_peering::{
    CancelHandle, MemoryNetwork, NetworkProvider, NodeIdentity, PeerMessageIn, PeerStatus, PeeringConfig, PeeringId,
    PublicKey, TrustedNetworkManager, TrustedPeerStore,
};

const RECEIVER: u8 = 0;

/// Outcome of one simulated run.
pub struct SimulationReport {
    pub expected: usize,
    pub delivered: Vec<usize>,
    pub elapsed: Duration,
    pub statuses: Vec<(String, Vec<PeerStatus>)>,
}

impl SimulationReport {
    pub fn total_delivered(&self) -> usize {
        self.delivered.iter().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.delivered.iter().all(|n| *n == self.expected)
    }
}

struct SimNode {
    name: String,
    provider: NetworkProvider,
    received: Arc<AtomicUsize>,
    _attached: CancelHandle,
}

/// Starts `nodes` mutually trusting nodes on an in-memory network. Every node broadcasts `messages` messages to the
/// whole group, itself included, and the run ends when everything has arrived or `timeout` passes.
pub async fn run_simulation(
    nodes: usize,
    messages: u32,
    timeout: Duration,
    config: PeeringConfig,
) -> Result<SimulationReport, CliError> {
    let network = MemoryNetwork::new(config.stream_buffer);
    let identities: Vec<NodeIdentity> = (0..nodes).map(|i| NodeIdentity::random_with_name(format!("sim{i}"))).collect();
    let keys = identities.iter().map(NodeIdentity::public_key).collect::<Result<Vec<PublicKey>, _>>()?;
    let urls: Vec<String> = (0..nodes).map(|i| format!("127.0.0.1:{}", 9000 + i)).collect();
    let peering_id = PeeringId::random();

    let mut sim = Vec::with_capacity(nodes);
    for (i, identity) in identities.iter().enumerate() {
        let trust = Arc::new(TrustedPeerStore::in_memory());
        for (j, other) in identities.iter().enumerate().filter(|(j, _)| *j != i) {
            trust.trust_peer(other.name(), keys[j].clone(), &urls[j])?;
        }
        let transport = network.transport(keys[i].transport_identity());
        let provider = NetworkProvider::new(identity, urls[i].clone(), transport, trust, config.clone())?;
        provider.start();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let attached = provider.attach(
            peering_id,
            RECEIVER,
            Arc::new(move |_: &PeerMessageIn| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );
        sim.push(SimNode { name: identity.name().to_string(), provider, received, _attached: attached });
    }
    info!("Simulated cluster of {nodes} nodes is up");

    let started = Instant::now();
    let mut groups = Vec::with_capacity(nodes);
    for node in &sim {
        let group = node.provider.peer_group(peering_id, &keys)?;
        for m in 0..messages {
            group.broadcast(RECEIVER, 0, &m.to_le_bytes(), true).await;
        }
        groups.push(group);
    }

    let expected = nodes * messages as usize;
    let deadline = started + timeout;
    let delivered = loop {
        let delivered: Vec<usize> = sim.iter().map(|n| n.received.load(Ordering::Relaxed)).collect();
        if delivered.iter().all(|n| *n >= expected) || Instant::now() >= deadline {
            break delivered;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    let elapsed = started.elapsed();
    let statuses = sim.iter().map(|n| (n.name.clone(), n.provider.peer_status())).collect();

    groups.iter().for_each(|g| g.release());
    for node in &sim {
        node.provider.shutdown().await;
    }
    debug!("Simulated cluster shut down");
    Ok(SimulationReport { expected, delivered, elapsed, statuses })
}
