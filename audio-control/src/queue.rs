//! Bounded multi-producer request queue drained by the dispatcher thread.
//! Droppable requests are rejected once the queue is at capacity; critical
//! requests always go through.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::request::Request;

pub struct RequestQueue {
    queue: SegQueue<Request>,
    len: AtomicUsize,
    capacity: usize,
    dropped: AtomicU64,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            len: AtomicUsize::new(0),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues from any thread. A droppable request at capacity comes back
    /// as `Err` so the caller can surface the overflow outcome.
    pub fn push(&self, request: Request) -> Result<(), Request> {
        if !request.is_critical() && self.len.load(Ordering::Acquire) >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(request);
        }
        self.queue.push(request);
        self.len.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Pops exactly the requests visible when the drain started; requests
    /// enqueued during the drain wait for the next one.
    pub fn drain(&self) -> Vec<Request> {
        let snapshot = self.len.load(Ordering::Acquire);
        let mut out = Vec::with_capacity(snapshot);
        for _ in 0..snapshot {
            match self.queue.pop() {
                Some(request) => {
                    self.len.fetch_sub(1, Ordering::Release);
                    out.push(request);
                }
                None => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestData, RequestTarget, RequestUserData};
    use audio_middleware::ControlId;

    fn parameter_request(value: f32) -> Request {
        Request::new(
            RequestTarget::Global,
            RequestData::SetParameter { parameter: ControlId(1), value },
            RequestUserData::default(),
        )
    }

    fn critical_request() -> Request {
        Request::new(RequestTarget::Global, RequestData::MuteAll, RequestUserData::default())
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = RequestQueue::new(8);
        for i in 0..3 {
            queue.push(parameter_request(i as f32)).expect("push");
        }
        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        for (i, request) in drained.iter().enumerate() {
            match request.data {
                RequestData::SetParameter { value, .. } => assert_eq!(value, i as f32),
                _ => panic!("unexpected payload"),
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn droppable_rejected_at_capacity() {
        let queue = RequestQueue::new(2);
        queue.push(parameter_request(0.0)).expect("push");
        queue.push(parameter_request(1.0)).expect("push");
        assert!(queue.push(parameter_request(2.0)).is_err(), "queue full");
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn critical_bypasses_capacity() {
        let queue = RequestQueue::new(1);
        queue.push(parameter_request(0.0)).expect("push");
        queue.push(critical_request()).expect("critical must not be dropped");
        assert_eq!(queue.dropped_count(), 0);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_is_bounded_by_snapshot() {
        let queue = RequestQueue::new(8);
        queue.push(parameter_request(0.0)).expect("push");
        let first = queue.drain();
        assert_eq!(first.len(), 1);
        queue.push(parameter_request(1.0)).expect("push");
        // The late request shows up in the next drain only.
        let second = queue.drain();
        assert_eq!(second.len(), 1);
        assert!(queue.drain().is_empty());
    }
}
