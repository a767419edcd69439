use crate::message_types::Heartbeat;
use crate::peer::{stopped, MaintenanceAction};
use crate::peer_table::PeerTable;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Visits every peer once per `period` until stopped: pings silent peers that are in use, and removes peers that
/// are unused, untrusted and idle.
pub(crate) async fn maintenance_loop(table: Arc<PeerTable>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => run_maintenance(&table),
        }
    }
    debug!("Maintenance loop stopped");
}

pub(crate) fn run_maintenance(table: &PeerTable) {
    let now = Instant::now();
    for peer in table.snapshot() {
        match peer.maintenance_action(now) {
            MaintenanceAction::Ping => {
                trace!("Pinging silent peer {peer}");
                peer.enqueue_heartbeat(Heartbeat::AckRequested);
            }
            MaintenanceAction::Remove => {
                table.remove_if_idle(&peer);
            }
            MaintenanceAction::Nothing => {}
        }
    }
}
