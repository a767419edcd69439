use crate::listeners::{Callback, CancelHandle, Listeners};
use crate::message_types::{PeerMessageIn, PeeringId};
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type RecvCallback = Callback<PeerMessageIn>;

type RouteKey = (PeeringId, u8);

/// Routes received messages to the consumers attached to their `(peering id, receiver)` pair.
///
/// Every matching callback sees every message; nothing is consumed. Callbacks run on the task that called
/// [`EventDispatcher::dispatch`], outside the routing lock.
#[derive(Default)]
pub struct EventDispatcher {
    routes: Mutex<HashMap<RouteKey, Arc<Listeners<PeerMessageIn>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, peering_id: PeeringId, receiver: u8, callback: RecvCallback) -> CancelHandle {
        let handle = {
            let mut routes = self.routes.lock();
            // Drop routes whose callbacks have all been cancelled.
            routes.retain(|_, listeners| !listeners.is_empty());
            routes.entry((peering_id, receiver)).or_default().add(callback)
        };
        trace!("Attached receiver {receiver} for peering id {peering_id}");
        handle
    }

    /// Delivers `msg` to every matching callback and returns how many were invoked.
    pub fn dispatch(&self, msg: &PeerMessageIn) -> usize {
        let key = (msg.data.peering_id, msg.data.msg_receiver);
        let listeners = self.routes.lock().get(&key).cloned();
        let delivered = listeners.map_or(0, |listeners| listeners.notify(msg));
        if delivered == 0 {
            debug!("No receiver attached for {:?} from {}. Message dropped.", msg.data, msg.sender_pub_key);
        }
        delivered
    }

    pub fn attached_count(&self) -> usize {
        self.routes.lock().values().map(|listeners| listeners.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identity::{NodeIdentity, PublicKey};
    use crate::message_types::PeerMessageData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sender() -> PublicKey {
        NodeIdentity::random_with_name("s").public_key().unwrap()
    }

    fn counter(hits: &Arc<AtomicUsize>) -> RecvCallback {
        let hits = hits.clone();
        Arc::new(move |_: &PeerMessageIn| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn msg(id: PeeringId, receiver: u8, from: &PublicKey) -> PeerMessageIn {
        PeerMessageIn::new(PeerMessageData::new(id, receiver, 1, b"x".to_vec()), from.clone())
    }

    #[test]
    fn dispatch_is_selective() {
        let dispatcher = EventDispatcher::new();
        let (id1, id2) = (PeeringId::new([1; 32]), PeeringId::new([2; 32]));
        let from = sender();
        let hits = Arc::new(AtomicUsize::new(0));
        let _handle = dispatcher.attach(id1, 1, counter(&hits));
        assert_eq!(dispatcher.dispatch(&msg(id2, 1, &from)), 0);
        assert_eq!(dispatcher.dispatch(&msg(id1, 2, &from)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.dispatch(&msg(id1, 1, &from)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_fans_out_and_cancel_is_exact() {
        let dispatcher = EventDispatcher::new();
        let id = PeeringId::random();
        let from = sender();
        let (a, b) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let ha = dispatcher.attach(id, 7, counter(&a));
        let hb = dispatcher.attach(id, 7, counter(&b));
        assert_eq!(dispatcher.dispatch(&msg(id, 7, &from)), 2);
        ha.cancel();
        ha.cancel();
        assert_eq!(dispatcher.dispatch(&msg(id, 7, &from)), 1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        hb.cancel();
        assert_eq!(dispatcher.attached_count(), 0);
    }

    #[test]
    fn callback_may_cancel_itself_during_dispatch() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let id = PeeringId::random();
        let from = sender();
        let slot: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));
        let (slot2, hits2) = (slot.clone(), hits.clone());
        let handle = dispatcher.attach(
            id,
            0,
            Arc::new(move |_: &PeerMessageIn| {
                hits2.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot2.lock().as_ref() {
                    handle.cancel();
                }
            }),
        );
        *slot.lock() = Some(handle);
        assert_eq!(dispatcher.dispatch(&msg(id, 0, &from)), 1);
        assert_eq!(dispatcher.dispatch(&msg(id, 0, &from)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
