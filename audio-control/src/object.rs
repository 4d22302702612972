//! Audio object table: positioned endpoints that own in-flight sounds.
//! Caller threads only allocate slots and flip them to pending-release;
//! every other mutation happens on the dispatcher thread.

use std::collections::{HashMap, HashSet};

use audio_middleware::{
    EnvironmentId, EventInstanceId, FileInstanceId, ObjectHandle, OcclusionType, Transformation,
};
use parking_lot::RwLock;

use crate::arena::{Arena, SlotKey};

/// Handle to an audio object. Copyable; stale after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) SlotKey);

/// Construction data for an audio object. All fields are optional; defaults
/// give an unnamed object at the origin that ignores occlusion.
#[derive(Debug, Clone, Default)]
pub struct ObjectSpec {
    pub(crate) name: Option<String>,
    pub(crate) occlusion: OcclusionType,
    pub(crate) transformation: Transformation,
    pub(crate) environments: Vec<(EnvironmentId, f32)>,
}

impl ObjectSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn occlusion(mut self, occlusion: OcclusionType) -> Self {
        self.occlusion = occlusion;
        self
    }

    pub fn transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = transformation;
        self
    }

    /// Adds an initial environment amount, applied when the object is
    /// constructed middleware-side.
    pub fn environment(mut self, environment: EnvironmentId, amount: f32) -> Self {
        self.environments.push((environment, amount));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectState {
    Active,
    PendingRelease,
}

pub(crate) struct ObjectRecord {
    pub name: String,
    pub state: ObjectState,
    pub transformation: Transformation,
    pub occlusion: OcclusionType,
    pub environments: HashMap<EnvironmentId, f32>,
    pub active_events: HashSet<EventInstanceId>,
    pub active_files: HashSet<FileInstanceId>,
    /// Middleware-side handle; present only while an implementation is
    /// installed and construction succeeded.
    pub binding: Option<ObjectHandle>,
    /// Set for objects created by `execute_trigger_ex`; released when the
    /// last in-flight instance reports back.
    pub auto_release: bool,
}

impl ObjectRecord {
    pub fn from_spec(spec: &ObjectSpec) -> Self {
        Self {
            name: spec.name.clone().unwrap_or_else(|| "audio_object".to_string()),
            state: ObjectState::Active,
            transformation: spec.transformation,
            occlusion: spec.occlusion,
            environments: spec.environments.iter().copied().collect(),
            active_events: HashSet::new(),
            active_files: HashSet::new(),
            binding: None,
            auto_release: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ObjectState::Active
    }

    /// No in-flight instances remain.
    pub fn is_idle(&self) -> bool {
        self.active_events.is_empty() && self.active_files.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct ObjectTable {
    arena: RwLock<Arena<ObjectRecord>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, spec: &ObjectSpec) -> ObjectId {
        ObjectId(self.arena.write().insert(ObjectRecord::from_spec(spec)))
    }

    /// Flips an active record to pending-release. Returns false for stale
    /// handles and records already pending.
    pub fn mark_pending_release(&self, id: ObjectId) -> bool {
        let mut arena = self.arena.write();
        match arena.get_mut(id.0) {
            Some(record) if record.is_active() => {
                record.state = ObjectState::PendingRelease;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: ObjectId) -> Option<ObjectRecord> {
        self.arena.write().remove(id.0)
    }

    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    /// Runs `f` against the record if the handle is still current.
    pub fn with_record<R>(&self, id: ObjectId, f: impl FnOnce(&mut ObjectRecord) -> R) -> Option<R> {
        self.arena.write().get_mut(id.0).map(f)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.arena.read().keys().into_iter().map(ObjectId).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_populates_record() {
        let spec = ObjectSpec::new()
            .name("footsteps")
            .occlusion(OcclusionType::Adaptive)
            .environment(EnvironmentId(9), 0.25);
        let record = ObjectRecord::from_spec(&spec);
        assert_eq!(record.name, "footsteps");
        assert_eq!(record.occlusion, OcclusionType::Adaptive);
        assert_eq!(record.environments.get(&EnvironmentId(9)), Some(&0.25));
        assert!(record.is_active());
        assert!(record.is_idle());
    }

    #[test]
    fn pending_release_blocks_second_release() {
        let table = ObjectTable::new();
        let id = table.allocate(&ObjectSpec::new());
        assert!(table.mark_pending_release(id));
        assert!(!table.mark_pending_release(id), "second release must not re-flip");
        assert!(table.remove(id).is_some());
        assert!(!table.mark_pending_release(id), "stale handle");
        assert_eq!(table.len(), 0);
    }
}
