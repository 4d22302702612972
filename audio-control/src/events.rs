//! Outcome notification hub. Observers register a callback with an event
//! mask and an optional target filter; outcomes queue up and are delivered
//! on the update thread during `external_update`, except for requests that
//! asked for audio-thread delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::RwLock;
use tracing::trace;

use crate::request::{RequestInfo, RequestTarget, SystemEvents};

/// Token identifying one observer registration.
pub type ListenerToken = u64;

type ObserverFn = Arc<dyn Fn(&RequestInfo) + Send + Sync>;

struct Registration {
    token: ListenerToken,
    mask: SystemEvents,
    /// `None` observes every target.
    target: Option<RequestTarget>,
    callback: ObserverFn,
}

impl Registration {
    fn matches(&self, info: &RequestInfo) -> bool {
        self.mask.intersects(info.events)
            && self.target.map_or(true, |target| target == info.target)
    }
}

pub(crate) struct EventHub {
    observers: RwLock<Vec<Registration>>,
    pending: SegQueue<RequestInfo>,
    next_token: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self { observers: RwLock::new(Vec::new()), pending: SegQueue::new(), next_token: AtomicU64::new(1) }
    }

    pub fn add(
        &self,
        callback: ObserverFn,
        target: Option<RequestTarget>,
        mask: SystemEvents,
    ) -> ListenerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push(Registration { token, mask, target, callback });
        token
    }

    /// Removing an unknown token is a no-op.
    pub fn remove(&self, token: ListenerToken) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|reg| reg.token != token);
        observers.len() != before
    }

    /// Replaces the mask of an existing registration in place.
    pub fn update_mask(&self, token: ListenerToken, mask: SystemEvents) -> bool {
        let mut observers = self.observers.write();
        match observers.iter_mut().find(|reg| reg.token == token) {
            Some(reg) => {
                reg.mask = mask;
                true
            }
            None => false,
        }
    }

    /// Queues an outcome for the next flush. Callable from any thread.
    pub fn post(&self, info: RequestInfo) {
        self.pending.push(info);
    }

    /// Delivers one outcome on the calling thread, bypassing the pending
    /// queue (audio-thread callback path).
    pub fn deliver_now(&self, info: &RequestInfo) {
        self.dispatch(info);
    }

    /// Delivers everything queued up to this point on the calling thread.
    /// Outcomes posted mid-flush wait for the next one.
    pub fn flush(&self) {
        let snapshot = self.pending.len();
        for _ in 0..snapshot {
            match self.pending.pop() {
                Some(info) => self.dispatch(&info),
                None => break,
            }
        }
    }

    fn dispatch(&self, info: &RequestInfo) {
        // Callbacks may re-enter add/remove, so collect outside the lock.
        let matching: Vec<ObserverFn> = self
            .observers
            .read()
            .iter()
            .filter(|reg| reg.matches(info))
            .map(|reg| Arc::clone(&reg.callback))
            .collect();
        trace!(kind = ?info.kind, observers = matching.len(), "dispatching outcome");
        for callback in matching {
            callback(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestKind, RequestStatus};
    use parking_lot::Mutex;

    fn outcome(events: SystemEvents, target: RequestTarget) -> RequestInfo {
        RequestInfo {
            kind: RequestKind::StopAllSounds,
            target,
            status: RequestStatus::Success,
            cookie: None,
            events,
        }
    }

    fn counting_observer() -> (ObserverFn, Arc<Mutex<Vec<RequestInfo>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ObserverFn = Arc::new(move |info: &RequestInfo| sink.lock().push(info.clone()));
        (callback, seen)
    }

    #[test]
    fn mask_filters_delivery() {
        let hub = EventHub::new();
        let (callback, seen) = counting_observer();
        hub.add(callback, None, SystemEvents::TRIGGER_EXECUTED);

        hub.post(outcome(SystemEvents::TRIGGER_EXECUTED, RequestTarget::Global));
        hub.post(outcome(SystemEvents::FILE_PLAY, RequestTarget::Global));
        hub.flush();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1, "only the masked category is delivered");
        assert_eq!(seen[0].events, SystemEvents::TRIGGER_EXECUTED);
    }

    #[test]
    fn wildcard_observer_sees_everything_once() {
        let hub = EventHub::new();
        let (callback, seen) = counting_observer();
        hub.add(callback, None, SystemEvents::ALL);

        hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        hub.post(outcome(SystemEvents::DATA_OPS, RequestTarget::Global));
        hub.flush();
        hub.flush();

        assert_eq!(seen.lock().len(), 2, "flush must not re-deliver");
    }

    #[test]
    fn removed_token_stops_delivery() {
        let hub = EventHub::new();
        let (callback, seen) = counting_observer();
        let token = hub.add(callback, None, SystemEvents::ALL);

        hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        hub.flush();
        assert!(hub.remove(token));
        assert!(!hub.remove(token), "second removal is a no-op");

        hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        hub.flush();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn target_filter_narrows_delivery() {
        use crate::arena::SlotKey;
        use crate::object::ObjectId;

        let hub = EventHub::new();
        let watched = RequestTarget::Object(ObjectId(SlotKey { index: 3, generation: 0 }));
        let other = RequestTarget::Object(ObjectId(SlotKey { index: 4, generation: 0 }));
        let (callback, seen) = counting_observer();
        hub.add(callback, Some(watched), SystemEvents::ALL);

        hub.post(outcome(SystemEvents::SYSTEM_STATE, other));
        hub.post(outcome(SystemEvents::SYSTEM_STATE, watched));
        hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        hub.flush();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1, "only the filtered target is delivered");
        assert_eq!(seen[0].target, watched);
    }

    #[test]
    fn update_mask_replaces_filter() {
        let hub = EventHub::new();
        let (callback, seen) = counting_observer();
        let token = hub.add(callback, None, SystemEvents::FILE_PLAY);

        assert!(hub.update_mask(token, SystemEvents::SYSTEM_STATE));
        hub.post(outcome(SystemEvents::FILE_PLAY, RequestTarget::Global));
        hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        hub.flush();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].events, SystemEvents::SYSTEM_STATE);
        assert!(!hub.update_mask(9999, SystemEvents::ALL));
    }

    #[test]
    fn deliver_now_bypasses_pending_queue() {
        let hub = EventHub::new();
        let (callback, seen) = counting_observer();
        hub.add(callback, None, SystemEvents::ALL);

        hub.deliver_now(&outcome(SystemEvents::IMPL_SET, RequestTarget::Global));
        assert_eq!(seen.lock().len(), 1, "no flush needed");
        hub.flush();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn flush_delivers_the_whole_backlog() {
        let hub = EventHub::new();
        let (callback, seen) = counting_observer();
        hub.add(callback, None, SystemEvents::ALL);

        for _ in 0..5000 {
            hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        }
        hub.flush();

        assert_eq!(seen.lock().len(), 5000, "one flush delivers everything already queued");
    }

    #[test]
    fn outcomes_posted_mid_flush_wait_for_the_next_one() {
        let hub = Arc::new(EventHub::new());
        let delivered = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&delivered);
        let reposter = Arc::clone(&hub);
        hub.add(
            Arc::new(move |info: &RequestInfo| {
                *count.lock() += 1;
                reposter.post(info.clone());
            }),
            None,
            SystemEvents::ALL,
        );

        hub.post(outcome(SystemEvents::SYSTEM_STATE, RequestTarget::Global));
        hub.flush();
        assert_eq!(*delivered.lock(), 1, "the repost waits for the next flush");
        hub.flush();
        assert_eq!(*delivered.lock(), 2);
    }
}
