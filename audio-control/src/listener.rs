//! Listener table. Listeners carry a transformation and nothing else; the
//! same slot discipline as objects applies.

use audio_middleware::{ListenerHandle, Transformation};
use parking_lot::RwLock;

use crate::arena::{Arena, SlotKey};

/// Handle to a listener. Copyable; stale after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) SlotKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerState {
    Active,
    PendingRelease,
}

pub(crate) struct ListenerRecord {
    pub state: ListenerState,
    pub transformation: Transformation,
    pub binding: Option<ListenerHandle>,
}

impl ListenerRecord {
    pub fn new() -> Self {
        Self {
            state: ListenerState::Active,
            transformation: Transformation::IDENTITY,
            binding: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ListenerState::Active
    }
}

#[derive(Default)]
pub(crate) struct ListenerTable {
    arena: RwLock<Arena<ListenerRecord>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> ListenerId {
        ListenerId(self.arena.write().insert(ListenerRecord::new()))
    }

    pub fn mark_pending_release(&self, id: ListenerId) -> bool {
        let mut arena = self.arena.write();
        match arena.get_mut(id.0) {
            Some(record) if record.is_active() => {
                record.state = ListenerState::PendingRelease;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: ListenerId) -> Option<ListenerRecord> {
        self.arena.write().remove(id.0)
    }

    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    pub fn with_record<R>(
        &self,
        id: ListenerId,
        f: impl FnOnce(&mut ListenerRecord) -> R,
    ) -> Option<R> {
        self.arena.write().get_mut(id.0).map(f)
    }

    pub fn ids(&self) -> Vec<ListenerId> {
        self.arena.read().keys().into_iter().map(ListenerId).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release() {
        let table = ListenerTable::new();
        let id = table.allocate();
        assert_eq!(table.len(), 1);
        assert!(table.mark_pending_release(id));
        assert!(table.remove(id).is_some());
        assert_eq!(table.len(), 0);
        assert!(table.with_record(id, |_| ()).is_none(), "stale handle");
    }
}
