//! Request model: the operation payloads callers enqueue, the user data
//! attached to them, and the outcome records observers receive.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Instant;

use audio_middleware::{
    AudioMiddleware, ControlId, EnvironmentId, EventInstanceId, FileInstanceId, OcclusionType,
    PlayFileInfo, PreloadRequestId, SwitchStateId, Transformation,
};

use crate::listener::ListenerId;
use crate::object::{ObjectId, ObjectSpec};

/// Event-category bitmask used to filter request listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SystemEvents(pub u32);

impl SystemEvents {
    pub const NONE: SystemEvents = SystemEvents(0);
    pub const IMPL_SET: SystemEvents = SystemEvents(1 << 0);
    pub const TRIGGER_EXECUTED: SystemEvents = SystemEvents(1 << 1);
    pub const TRIGGER_FINISHED: SystemEvents = SystemEvents(1 << 2);
    pub const FILE_PLAY: SystemEvents = SystemEvents(1 << 3);
    pub const FILE_STARTED: SystemEvents = SystemEvents(1 << 4);
    pub const FILE_STOPPED: SystemEvents = SystemEvents(1 << 5);
    /// Parameter, switch, environment, occlusion and transformation updates.
    pub const CONTROL_SET: SystemEvents = SystemEvents(1 << 6);
    /// Object and listener construction/teardown outcomes.
    pub const OBJECT_LIFECYCLE: SystemEvents = SystemEvents(1 << 7);
    /// Trigger data load/unload, preloads, reload/refresh, level and
    /// language transitions.
    pub const DATA_OPS: SystemEvents = SystemEvents(1 << 8);
    /// Focus, mute and stop-all transitions.
    pub const SYSTEM_STATE: SystemEvents = SystemEvents(1 << 9);
    pub const ALL: SystemEvents = SystemEvents(u32::MAX);

    pub fn intersects(self, other: SystemEvents) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: SystemEvents) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SystemEvents {
    type Output = SystemEvents;

    fn bitor(self, rhs: SystemEvents) -> SystemEvents {
        SystemEvents(self.0 | rhs.0)
    }
}

impl BitOrAssign for SystemEvents {
    fn bitor_assign(&mut self, rhs: SystemEvents) {
        self.0 |= rhs.0;
    }
}

/// Per-request behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestFlags(pub u32);

impl RequestFlags {
    pub const NONE: RequestFlags = RequestFlags(0);
    /// Deliver the outcome on the dispatcher thread at drain time instead of
    /// deferring it to the next `external_update`.
    pub const AUDIO_THREAD_CALLBACK: RequestFlags = RequestFlags(1 << 0);

    pub fn contains(self, other: RequestFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RequestFlags {
    type Output = RequestFlags;

    fn bitor(self, rhs: RequestFlags) -> RequestFlags {
        RequestFlags(self.0 | rhs.0)
    }
}

/// Correlation data a caller attaches to a request and gets back unchanged
/// in the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestUserData {
    pub flags: RequestFlags,
    pub cookie: Option<u64>,
}

impl RequestUserData {
    pub fn with_cookie(cookie: u64) -> Self {
        Self { flags: RequestFlags::NONE, cookie: Some(cookie) }
    }

    pub fn flags(mut self, flags: RequestFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// What a request acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestTarget {
    Global,
    Object(ObjectId),
    Listener(ListenerId),
}

/// Why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Target object/listener released or never existed.
    InvalidTarget,
    /// Referenced control ID is not registered.
    UnknownControl,
    /// The middleware implementation rejected the operation.
    MiddlewareFailure,
    /// Droppable request rejected because the queue was at capacity.
    QueueOverflow,
    /// No middleware implementation is installed.
    ImplementationMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    /// Accepted; completion arrives as a later outcome (file playback).
    Pending,
    Failure(FailureReason),
}

impl RequestStatus {
    pub fn is_success(self) -> bool {
        matches!(self, RequestStatus::Success)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, RequestStatus::Failure(_))
    }
}

/// Compact description of the operation an outcome refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    SetImpl,
    ConstructObject,
    ReleaseObject,
    ConstructListener,
    ReleaseListener,
    ExecuteTrigger { trigger: ControlId },
    ExecuteTriggerEx { trigger: ControlId },
    StopTrigger { trigger: Option<ControlId> },
    SetTransformation,
    SetParameter { parameter: ControlId },
    SetSwitchState { switch: ControlId, state: SwitchStateId },
    SetEnvironment { environment: EnvironmentId },
    SetCurrentEnvironments,
    ResetEnvironments,
    SetOcclusion { occlusion: OcclusionType },
    PlayFile { path: String },
    StopFile { path: String },
    FileStarted { file: FileInstanceId },
    FileStopped { file: FileInstanceId },
    TriggerFinished { event: EventInstanceId },
    LoadTrigger { trigger: ControlId },
    UnloadTrigger { trigger: ControlId },
    Preload { preload: PreloadRequestId },
    UnloadPreload { preload: PreloadRequestId },
    LostFocus,
    GotFocus,
    MuteAll,
    UnmuteAll,
    StopAllSounds,
    Refresh,
    ReloadControls,
    LoadLevel,
    UnloadLevel,
    LanguageChanged,
}

/// Outcome record delivered to request listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInfo {
    pub kind: RequestKind,
    pub target: RequestTarget,
    pub status: RequestStatus,
    pub cookie: Option<u64>,
    /// Category bits this outcome matches listener masks against.
    pub events: SystemEvents,
}

/// Operation payload. Consumed exactly once by the dispatcher.
pub enum RequestData {
    SetImpl { middleware: Option<Box<dyn AudioMiddleware>> },
    ConstructObject,
    ReleaseObject,
    ConstructListener,
    ReleaseListener,
    ExecuteTrigger { trigger: ControlId },
    ExecuteTriggerEx { spec: ObjectSpec, trigger: ControlId },
    StopTrigger { trigger: Option<ControlId> },
    SetTransformation { transformation: Transformation },
    SetParameter { parameter: ControlId, value: f32 },
    SetSwitchState { switch: ControlId, state: SwitchStateId },
    SetEnvironment { environment: EnvironmentId, amount: f32 },
    SetCurrentEnvironments { amounts: Vec<(EnvironmentId, f32)> },
    ResetEnvironments,
    SetOcclusion { occlusion: OcclusionType },
    PlayFile { info: PlayFileInfo },
    StopFile { path: String },
    ReportStartedFile { file: FileInstanceId, success: bool },
    ReportStoppedFile { file: FileInstanceId },
    ReportFinishedEvent { event: EventInstanceId, success: bool },
    LoadTrigger { trigger: ControlId },
    UnloadTrigger { trigger: ControlId },
    Preload { preload: PreloadRequestId, auto_load_only: bool },
    UnloadPreload { preload: PreloadRequestId },
    LostFocus,
    GotFocus,
    MuteAll,
    UnmuteAll,
    StopAllSounds,
    Refresh { level: Option<String> },
    ReloadControls { folder: String, level: Option<String> },
    LoadLevel { level: String },
    UnloadLevel,
    LanguageChanged,
}

pub struct Request {
    pub data: RequestData,
    pub target: RequestTarget,
    pub user: RequestUserData,
    pub enqueued_at: Instant,
}

// `RequestData` carries the boxed implementation on `SetImpl`, so `Debug`
// goes through the kind instead of deriving.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind())
            .field("target", &self.target)
            .field("user", &self.user)
            .finish()
    }
}

impl Request {
    pub fn new(target: RequestTarget, data: RequestData, user: RequestUserData) -> Self {
        Self { data, target, user, enqueued_at: Instant::now() }
    }

    /// Critical requests bypass the queue capacity: dropping them would lose
    /// lifecycle transitions, middleware reports or system-wide state.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.data,
            RequestData::SetImpl { .. }
                | RequestData::ConstructObject
                | RequestData::ReleaseObject
                | RequestData::ConstructListener
                | RequestData::ReleaseListener
                | RequestData::ReportStartedFile { .. }
                | RequestData::ReportStoppedFile { .. }
                | RequestData::ReportFinishedEvent { .. }
                | RequestData::LostFocus
                | RequestData::GotFocus
                | RequestData::MuteAll
                | RequestData::UnmuteAll
                | RequestData::StopAllSounds
                | RequestData::Refresh { .. }
                | RequestData::ReloadControls { .. }
                | RequestData::LoadLevel { .. }
                | RequestData::UnloadLevel
                | RequestData::LanguageChanged
        )
    }

    pub fn kind(&self) -> RequestKind {
        match &self.data {
            RequestData::SetImpl { .. } => RequestKind::SetImpl,
            RequestData::ConstructObject => RequestKind::ConstructObject,
            RequestData::ReleaseObject => RequestKind::ReleaseObject,
            RequestData::ConstructListener => RequestKind::ConstructListener,
            RequestData::ReleaseListener => RequestKind::ReleaseListener,
            RequestData::ExecuteTrigger { trigger } => {
                RequestKind::ExecuteTrigger { trigger: *trigger }
            }
            RequestData::ExecuteTriggerEx { trigger, .. } => {
                RequestKind::ExecuteTriggerEx { trigger: *trigger }
            }
            RequestData::StopTrigger { trigger } => RequestKind::StopTrigger { trigger: *trigger },
            RequestData::SetTransformation { .. } => RequestKind::SetTransformation,
            RequestData::SetParameter { parameter, .. } => {
                RequestKind::SetParameter { parameter: *parameter }
            }
            RequestData::SetSwitchState { switch, state } => {
                RequestKind::SetSwitchState { switch: *switch, state: *state }
            }
            RequestData::SetEnvironment { environment, .. } => {
                RequestKind::SetEnvironment { environment: *environment }
            }
            RequestData::SetCurrentEnvironments { .. } => RequestKind::SetCurrentEnvironments,
            RequestData::ResetEnvironments => RequestKind::ResetEnvironments,
            RequestData::SetOcclusion { occlusion } => {
                RequestKind::SetOcclusion { occlusion: *occlusion }
            }
            RequestData::PlayFile { info } => RequestKind::PlayFile { path: info.path.clone() },
            RequestData::StopFile { path } => RequestKind::StopFile { path: path.clone() },
            RequestData::ReportStartedFile { file, .. } => RequestKind::FileStarted { file: *file },
            RequestData::ReportStoppedFile { file } => RequestKind::FileStopped { file: *file },
            RequestData::ReportFinishedEvent { event, .. } => {
                RequestKind::TriggerFinished { event: *event }
            }
            RequestData::LoadTrigger { trigger } => RequestKind::LoadTrigger { trigger: *trigger },
            RequestData::UnloadTrigger { trigger } => {
                RequestKind::UnloadTrigger { trigger: *trigger }
            }
            RequestData::Preload { preload, .. } => RequestKind::Preload { preload: *preload },
            RequestData::UnloadPreload { preload } => {
                RequestKind::UnloadPreload { preload: *preload }
            }
            RequestData::LostFocus => RequestKind::LostFocus,
            RequestData::GotFocus => RequestKind::GotFocus,
            RequestData::MuteAll => RequestKind::MuteAll,
            RequestData::UnmuteAll => RequestKind::UnmuteAll,
            RequestData::StopAllSounds => RequestKind::StopAllSounds,
            RequestData::Refresh { .. } => RequestKind::Refresh,
            RequestData::ReloadControls { .. } => RequestKind::ReloadControls,
            RequestData::LoadLevel { .. } => RequestKind::LoadLevel,
            RequestData::UnloadLevel => RequestKind::UnloadLevel,
            RequestData::LanguageChanged => RequestKind::LanguageChanged,
        }
    }

    /// Category bits the outcome of this request will carry.
    pub fn events(&self) -> SystemEvents {
        match &self.data {
            RequestData::SetImpl { .. } => SystemEvents::IMPL_SET,
            RequestData::ConstructObject
            | RequestData::ReleaseObject
            | RequestData::ConstructListener
            | RequestData::ReleaseListener => SystemEvents::OBJECT_LIFECYCLE,
            RequestData::ExecuteTrigger { .. }
            | RequestData::ExecuteTriggerEx { .. }
            | RequestData::StopTrigger { .. } => SystemEvents::TRIGGER_EXECUTED,
            RequestData::SetTransformation { .. }
            | RequestData::SetParameter { .. }
            | RequestData::SetSwitchState { .. }
            | RequestData::SetEnvironment { .. }
            | RequestData::SetCurrentEnvironments { .. }
            | RequestData::ResetEnvironments
            | RequestData::SetOcclusion { .. } => SystemEvents::CONTROL_SET,
            RequestData::PlayFile { .. } | RequestData::StopFile { .. } => SystemEvents::FILE_PLAY,
            RequestData::ReportStartedFile { .. } => SystemEvents::FILE_STARTED,
            RequestData::ReportStoppedFile { .. } => SystemEvents::FILE_STOPPED,
            RequestData::ReportFinishedEvent { .. } => SystemEvents::TRIGGER_FINISHED,
            RequestData::LoadTrigger { .. }
            | RequestData::UnloadTrigger { .. }
            | RequestData::Preload { .. }
            | RequestData::UnloadPreload { .. }
            | RequestData::Refresh { .. }
            | RequestData::ReloadControls { .. }
            | RequestData::LoadLevel { .. }
            | RequestData::UnloadLevel
            | RequestData::LanguageChanged => SystemEvents::DATA_OPS,
            RequestData::LostFocus
            | RequestData::GotFocus
            | RequestData::MuteAll
            | RequestData::UnmuteAll
            | RequestData::StopAllSounds => SystemEvents::SYSTEM_STATE,
        }
    }

    /// Builds the outcome record for this request.
    pub fn info(&self, status: RequestStatus) -> RequestInfo {
        RequestInfo {
            kind: self.kind(),
            target: self.target,
            status,
            cookie: self.user.cookie,
            events: self.events(),
        }
    }
}
