//! Boundary contract between the audio control layer and a pluggable
//! middleware implementation.
//! - `AudioMiddleware` is the operation set the dispatcher drives.
//! - `ReportSink` carries completion callbacks back into the control layer.
//! - `mock` provides a call-recording implementation for tests.

use std::sync::Arc;

use thiserror::Error;

pub mod mock;

/// 3D position in the engine's plain-array convention.
pub type Vec3 = [f32; 3];
/// Rotation quaternion `[x, y, z, w]`.
pub type Quat = [f32; 4];

/// Position and orientation of an object or listener. Copied by value into
/// requests; the control layer never does math on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformation {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transformation {
    pub const IDENTITY: Transformation = Transformation {
        position: [0.0, 0.0, 0.0],
        rotation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Transformation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Lifetime class of a registered control or data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataScope {
    #[default]
    Global,
    LevelSpecific,
}

/// Sound obstruction/occlusion handling requested for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcclusionType {
    #[default]
    Ignore,
    Adaptive,
    Low,
    Medium,
    High,
}

/// Stable identifier for a trigger, parameter or switch. Raw value 0 is the
/// reserved invalid sentinel and is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub u32);

impl ControlId {
    pub const INVALID: ControlId = ControlId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Stable identifier for one state of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchStateId(pub u32);

impl SwitchStateId {
    pub const INVALID: SwitchStateId = SwitchStateId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Stable identifier for an environment (reverb/effect bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvironmentId(pub u32);

impl EnvironmentId {
    pub const INVALID: EnvironmentId = EnvironmentId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Stable identifier for a preload request (bank/data block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreloadRequestId(pub u32);

impl PreloadRequestId {
    pub const INVALID: PreloadRequestId = PreloadRequestId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// One in-flight trigger event instance. Allocated by the dispatcher when a
/// trigger executes, reported back through [`ReportSink::report_finished_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventInstanceId(pub u64);

/// One in-flight standalone file playback. Allocated by the dispatcher,
/// reported back through the file report operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileInstanceId(pub u64);

/// Middleware-side handle for a constructed audio object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

/// Middleware-side handle for a constructed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// Everything needed to start standalone-file playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayFileInfo {
    pub path: String,
    /// Resolve the path against the active language when set.
    pub localized: bool,
    /// Trigger whose properties (attenuation etc.) the playback borrows.
    pub used_trigger: Option<ControlId>,
}

impl PlayFileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            localized: false,
            used_trigger: None,
        }
    }
}

/// Failures an implementation can report for a single operation.
#[derive(Error, Debug)]
pub enum MiddlewareError {
    #[error("unknown object handle {0:?}")]
    UnknownObject(ObjectHandle),
    #[error("unknown listener handle {0:?}")]
    UnknownListener(ListenerHandle),
    #[error("control {0:?} is not available to the implementation")]
    UnknownControl(ControlId),
    #[error("implementation is not initialized")]
    NotInitialized,
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Completion callback channel handed to an implementation at install time.
///
/// Implementations call these from any thread; the control layer funnels the
/// reports through its request queue so all state mutation stays on the
/// dispatcher thread.
pub trait ReportSink: Send + Sync {
    fn report_started_file(&self, file: FileInstanceId, success: bool);
    fn report_stopped_file(&self, file: FileInstanceId);
    fn report_finished_event(&self, event: EventInstanceId, success: bool);
}

/// The operation set a middleware implementation exposes to the dispatcher.
///
/// Implementations are driven from the dispatcher thread only, which is why
/// the receivers are `&mut self`; `Send` lets the boxed implementation move
/// onto that thread. Keeping this a trait allows injecting a mock in tests.
pub trait AudioMiddleware: Send {
    /// Implementation name for diagnostics.
    fn name(&self) -> &str;

    /// Called once when the implementation is installed. `reports` stays
    /// valid until [`AudioMiddleware::shutdown`].
    fn init(&mut self, reports: Arc<dyn ReportSink>) -> Result<(), MiddlewareError>;

    /// Called when the implementation is swapped out or the system shuts
    /// down. All handles are destroyed beforehand.
    fn shutdown(&mut self);

    fn construct_object(
        &mut self,
        name: &str,
        transformation: &Transformation,
        occlusion: OcclusionType,
    ) -> Result<ObjectHandle, MiddlewareError>;

    fn destroy_object(&mut self, object: ObjectHandle) -> Result<(), MiddlewareError>;

    fn construct_listener(
        &mut self,
        transformation: &Transformation,
    ) -> Result<ListenerHandle, MiddlewareError>;

    fn destroy_listener(&mut self, listener: ListenerHandle) -> Result<(), MiddlewareError>;

    /// Start the trigger on the object. `event` identifies the instance in
    /// the later [`ReportSink::report_finished_event`] call.
    fn execute_trigger(
        &mut self,
        object: ObjectHandle,
        trigger: ControlId,
        event: EventInstanceId,
    ) -> Result<(), MiddlewareError>;

    /// Stop one trigger, or all of them when `trigger` is `None`.
    fn stop_trigger(
        &mut self,
        object: ObjectHandle,
        trigger: Option<ControlId>,
    ) -> Result<(), MiddlewareError>;

    fn set_parameter(
        &mut self,
        object: ObjectHandle,
        parameter: ControlId,
        value: f32,
    ) -> Result<(), MiddlewareError>;

    fn set_switch_state(
        &mut self,
        object: ObjectHandle,
        switch: ControlId,
        state: SwitchStateId,
    ) -> Result<(), MiddlewareError>;

    fn set_environment(
        &mut self,
        object: ObjectHandle,
        environment: EnvironmentId,
        amount: f32,
    ) -> Result<(), MiddlewareError>;

    fn set_transformation(
        &mut self,
        object: ObjectHandle,
        transformation: &Transformation,
    ) -> Result<(), MiddlewareError>;

    fn set_occlusion(
        &mut self,
        object: ObjectHandle,
        occlusion: OcclusionType,
    ) -> Result<(), MiddlewareError>;

    fn set_listener_transformation(
        &mut self,
        listener: ListenerHandle,
        transformation: &Transformation,
    ) -> Result<(), MiddlewareError>;

    /// Start standalone-file playback. `file` identifies the instance in the
    /// later file report calls.
    fn play_file(
        &mut self,
        object: ObjectHandle,
        info: &PlayFileInfo,
        file: FileInstanceId,
    ) -> Result<(), MiddlewareError>;

    fn stop_file(&mut self, object: ObjectHandle, path: &str) -> Result<(), MiddlewareError>;

    /// Prepare the data referenced by a trigger without executing it.
    fn load_trigger_data(&mut self, trigger: ControlId) -> Result<(), MiddlewareError>;

    fn unload_trigger_data(&mut self, trigger: ControlId) -> Result<(), MiddlewareError>;

    fn preload(&mut self, preload: PreloadRequestId) -> Result<(), MiddlewareError>;

    fn unload_preload(&mut self, preload: PreloadRequestId) -> Result<(), MiddlewareError>;

    fn stop_all_sounds(&mut self) -> Result<(), MiddlewareError>;

    fn on_lost_focus(&mut self) {}

    fn on_got_focus(&mut self) {}

    fn mute_all(&mut self) {}

    fn unmute_all(&mut self) {}

    fn on_language_changed(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_ids_are_invalid() {
        assert!(!ControlId::INVALID.is_valid());
        assert!(!SwitchStateId::INVALID.is_valid());
        assert!(!EnvironmentId::INVALID.is_valid());
        assert!(!PreloadRequestId::INVALID.is_valid());
        assert!(ControlId(1).is_valid());
    }

    #[test]
    fn transformation_default_is_identity() {
        let t = Transformation::default();
        assert_eq!(t.position, [0.0, 0.0, 0.0]);
        assert_eq!(t.rotation, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn play_file_info_defaults() {
        let info = PlayFileInfo::new("music/theme.wav");
        assert_eq!(info.path, "music/theme.wav");
        assert!(!info.localized);
        assert!(info.used_trigger.is_none());
    }
}
