//! Name-to-ID registry for controls and data entries. Lookups are hot and
//! lock-free over an arc-swap snapshot; writers clone the tables, mutate and
//! store (reads during a reload always see a consistent snapshot).
//!
//! IDs come from FNV-1a over the lowercased name, probed upward past the
//! sentinel and per-kind collisions, so they are stable across runs for the
//! same data set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use audio_middleware::{ControlId, DataScope, EnvironmentId, PreloadRequestId, SwitchStateId};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Descriptor attached to a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TriggerData {
    /// Maximum activity radius in world units; 0 means unattenuated.
    pub max_radius: f32,
}

/// Attributes of a registered standalone file.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FileData {
    pub duration: Duration,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("name {0:?} is already registered in a different scope")]
    ScopeMismatch(String),
    #[error("switch {0:?} is not registered")]
    UnknownSwitch(ControlId),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PreloadInfo {
    pub scope: DataScope,
    pub auto_load: bool,
}

#[derive(Debug, Clone)]
struct TriggerInfo {
    scope: DataScope,
    data: TriggerData,
}

#[derive(Debug, Clone)]
struct SwitchInfo {
    scope: DataScope,
    /// States inherit the scope of their switch.
    states: HashMap<String, SwitchStateId>,
}

#[derive(Debug, Clone, Copy)]
struct FileInfo {
    scope: DataScope,
    data: FileData,
}

#[derive(Clone, Default)]
struct Tables {
    triggers: HashMap<String, ControlId>,
    trigger_info: HashMap<ControlId, TriggerInfo>,
    parameters: HashMap<String, ControlId>,
    parameter_info: HashMap<ControlId, DataScope>,
    switches: HashMap<String, ControlId>,
    switch_info: HashMap<ControlId, SwitchInfo>,
    environments: HashMap<String, EnvironmentId>,
    environment_info: HashMap<EnvironmentId, DataScope>,
    preloads: HashMap<String, PreloadRequestId>,
    preload_info: HashMap<PreloadRequestId, PreloadInfo>,
    files: HashMap<String, FileInfo>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn hash_name(name: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET;
    for byte in name.bytes() {
        hash ^= byte.to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Walks `raw` upward until it is neither the reserved sentinel (0) nor
/// taken within its kind.
fn probe(mut raw: u32, taken: impl Fn(u32) -> bool) -> u32 {
    while raw == 0 || taken(raw) {
        raw = raw.wrapping_add(1);
    }
    raw
}

pub(crate) struct Registry {
    tables: ArcSwap<Tables>,
    write: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self { tables: ArcSwap::from_pointee(Tables::default()), write: Mutex::new(()) }
    }

    pub fn register_trigger(
        &self,
        name: &str,
        scope: DataScope,
    ) -> Result<ControlId, RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        if let Some(&id) = current.triggers.get(&k) {
            return match current.trigger_info.get(&id) {
                Some(existing) if existing.scope == scope => Ok(id),
                _ => Err(RegistryError::ScopeMismatch(name.to_string())),
            };
        }
        let mut next = (*current).clone();
        let seed = hash_name(&k);
        let raw = probe(seed, |c| next.trigger_info.contains_key(&ControlId(c)));
        if raw != seed {
            debug!(name, raw, "trigger id collision probed");
        }
        let id = ControlId(raw);
        next.triggers.insert(k, id);
        next.trigger_info.insert(id, TriggerInfo { scope, data: TriggerData::default() });
        self.tables.store(Arc::new(next));
        Ok(id)
    }

    pub fn register_parameter(
        &self,
        name: &str,
        scope: DataScope,
    ) -> Result<ControlId, RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        if let Some(&id) = current.parameters.get(&k) {
            return match current.parameter_info.get(&id) {
                Some(&existing) if existing == scope => Ok(id),
                _ => Err(RegistryError::ScopeMismatch(name.to_string())),
            };
        }
        let mut next = (*current).clone();
        let raw = probe(hash_name(&k), |c| next.parameter_info.contains_key(&ControlId(c)));
        let id = ControlId(raw);
        next.parameters.insert(k, id);
        next.parameter_info.insert(id, scope);
        self.tables.store(Arc::new(next));
        Ok(id)
    }

    pub fn register_switch(&self, name: &str, scope: DataScope) -> Result<ControlId, RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        if let Some(&id) = current.switches.get(&k) {
            return match current.switch_info.get(&id) {
                Some(existing) if existing.scope == scope => Ok(id),
                _ => Err(RegistryError::ScopeMismatch(name.to_string())),
            };
        }
        let mut next = (*current).clone();
        let raw = probe(hash_name(&k), |c| next.switch_info.contains_key(&ControlId(c)));
        let id = ControlId(raw);
        next.switches.insert(k, id);
        next.switch_info.insert(id, SwitchInfo { scope, states: HashMap::new() });
        self.tables.store(Arc::new(next));
        Ok(id)
    }

    pub fn register_switch_state(
        &self,
        switch: ControlId,
        name: &str,
    ) -> Result<SwitchStateId, RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        match current.switch_info.get(&switch) {
            None => Err(RegistryError::UnknownSwitch(switch)),
            Some(existing) => {
                if let Some(&state) = existing.states.get(&k) {
                    return Ok(state);
                }
                let taken: HashSet<u32> = existing.states.values().map(|s| s.0).collect();
                let state = SwitchStateId(probe(hash_name(&k), |c| taken.contains(&c)));
                let mut next = (*current).clone();
                if let Some(entry) = next.switch_info.get_mut(&switch) {
                    entry.states.insert(k, state);
                }
                self.tables.store(Arc::new(next));
                Ok(state)
            }
        }
    }

    pub fn register_environment(
        &self,
        name: &str,
        scope: DataScope,
    ) -> Result<EnvironmentId, RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        if let Some(&id) = current.environments.get(&k) {
            return match current.environment_info.get(&id) {
                Some(&existing) if existing == scope => Ok(id),
                _ => Err(RegistryError::ScopeMismatch(name.to_string())),
            };
        }
        let mut next = (*current).clone();
        let raw = probe(hash_name(&k), |c| next.environment_info.contains_key(&EnvironmentId(c)));
        let id = EnvironmentId(raw);
        next.environments.insert(k, id);
        next.environment_info.insert(id, scope);
        self.tables.store(Arc::new(next));
        Ok(id)
    }

    pub fn register_preload_request(
        &self,
        name: &str,
        scope: DataScope,
        auto_load: bool,
    ) -> Result<PreloadRequestId, RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        if let Some(&id) = current.preloads.get(&k) {
            return match current.preload_info.get(&id) {
                Some(existing) if existing.scope == scope => Ok(id),
                _ => Err(RegistryError::ScopeMismatch(name.to_string())),
            };
        }
        let mut next = (*current).clone();
        let raw = probe(hash_name(&k), |c| next.preload_info.contains_key(&PreloadRequestId(c)));
        let id = PreloadRequestId(raw);
        next.preloads.insert(k, id);
        next.preload_info.insert(id, PreloadInfo { scope, auto_load });
        self.tables.store(Arc::new(next));
        Ok(id)
    }

    /// Registers (or updates) the attributes of a standalone file.
    pub fn register_file_data(
        &self,
        name: &str,
        scope: DataScope,
        data: FileData,
    ) -> Result<(), RegistryError> {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let k = key(name);
        if let Some(existing) = current.files.get(&k) {
            if existing.scope != scope {
                return Err(RegistryError::ScopeMismatch(name.to_string()));
            }
        }
        let mut next = (*current).clone();
        next.files.insert(k, FileInfo { scope, data });
        self.tables.store(Arc::new(next));
        Ok(())
    }

    /// Replaces the descriptor of a registered trigger. Returns false for
    /// unknown IDs.
    pub fn set_trigger_data(&self, trigger: ControlId, data: TriggerData) -> bool {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        if !current.trigger_info.contains_key(&trigger) {
            return false;
        }
        let mut next = (*current).clone();
        if let Some(entry) = next.trigger_info.get_mut(&trigger) {
            entry.data = data;
        }
        self.tables.store(Arc::new(next));
        true
    }

    pub fn trigger_id(&self, name: &str) -> Option<ControlId> {
        self.tables.load().triggers.get(&key(name)).copied()
    }

    pub fn parameter_id(&self, name: &str) -> Option<ControlId> {
        self.tables.load().parameters.get(&key(name)).copied()
    }

    pub fn switch_id(&self, name: &str) -> Option<ControlId> {
        self.tables.load().switches.get(&key(name)).copied()
    }

    pub fn switch_state_id(&self, switch: ControlId, name: &str) -> Option<SwitchStateId> {
        self.tables.load().switch_info.get(&switch)?.states.get(&key(name)).copied()
    }

    pub fn environment_id(&self, name: &str) -> Option<EnvironmentId> {
        self.tables.load().environments.get(&key(name)).copied()
    }

    pub fn preload_request_id(&self, name: &str) -> Option<PreloadRequestId> {
        self.tables.load().preloads.get(&key(name)).copied()
    }

    pub fn trigger_data(&self, trigger: ControlId) -> Option<TriggerData> {
        self.tables.load().trigger_info.get(&trigger).map(|info| info.data)
    }

    pub fn file_data(&self, name: &str) -> Option<FileData> {
        self.tables.load().files.get(&key(name)).map(|info| info.data)
    }

    pub fn has_trigger(&self, trigger: ControlId) -> bool {
        self.tables.load().trigger_info.contains_key(&trigger)
    }

    pub fn has_parameter(&self, parameter: ControlId) -> bool {
        self.tables.load().parameter_info.contains_key(&parameter)
    }

    pub fn has_environment(&self, environment: EnvironmentId) -> bool {
        self.tables.load().environment_info.contains_key(&environment)
    }

    pub fn switch_state_valid(&self, switch: ControlId, state: SwitchStateId) -> bool {
        self.tables
            .load()
            .switch_info
            .get(&switch)
            .map_or(false, |info| info.states.values().any(|&s| s == state))
    }

    pub fn preload_info(&self, preload: PreloadRequestId) -> Option<PreloadInfo> {
        self.tables.load().preload_info.get(&preload).copied()
    }

    pub fn level_preloads(&self) -> Vec<PreloadRequestId> {
        self.tables
            .load()
            .preload_info
            .iter()
            .filter(|(_, info)| info.scope == DataScope::LevelSpecific)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn level_environments(&self) -> Vec<EnvironmentId> {
        self.tables
            .load()
            .environment_info
            .iter()
            .filter(|(_, &scope)| scope == DataScope::LevelSpecific)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Drops every entry of the given scope. Returns the number of entries
    /// removed (switch states count with their switch).
    pub fn purge(&self, scope: DataScope) -> usize {
        let _guard = self.write.lock();
        let current = self.tables.load_full();
        let mut next = (*current).clone();
        let mut removed = 0;

        let before = next.trigger_info.len();
        next.trigger_info.retain(|_, info| info.scope != scope);
        next.triggers.retain(|_, id| next.trigger_info.contains_key(id));
        removed += before - next.trigger_info.len();

        let before = next.parameter_info.len();
        next.parameter_info.retain(|_, &mut s| s != scope);
        next.parameters.retain(|_, id| next.parameter_info.contains_key(id));
        removed += before - next.parameter_info.len();

        let before = next.switch_info.len();
        next.switch_info.retain(|_, info| info.scope != scope);
        next.switches.retain(|_, id| next.switch_info.contains_key(id));
        removed += before - next.switch_info.len();

        let before = next.environment_info.len();
        next.environment_info.retain(|_, &mut s| s != scope);
        next.environments.retain(|_, id| next.environment_info.contains_key(id));
        removed += before - next.environment_info.len();

        let before = next.preload_info.len();
        next.preload_info.retain(|_, info| info.scope != scope);
        next.preloads.retain(|_, id| next.preload_info.contains_key(id));
        removed += before - next.preload_info.len();

        let before = next.files.len();
        next.files.retain(|_, info| info.scope != scope);
        removed += before - next.files.len();

        self.tables.store(Arc::new(next));
        if removed > 0 {
            info!(?scope, removed, "purged registry scope");
        }
        removed
    }
}
