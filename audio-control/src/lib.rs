//! Asynchronous audio control layer.
//!
//! Gameplay code issues named, ID-addressed commands from any thread;
//! requests queue up and execute in order on a dedicated dispatcher thread
//! against a pluggable [`AudioMiddleware`] implementation, and outcomes come
//! back through mask-filtered request listeners pumped by
//! [`AudioSystem::external_update`].
//!
//! - [`AudioSystem`] is the facade; per-object and per-listener operations
//!   hang off [`ObjectRef`]/[`ListenerRef`] proxies.
//! - Control names resolve to stable IDs through the built-in registry.
//! - The `audio-middleware` boundary crate defines the implementation trait
//!   and a recording mock for tests.

mod arena;
mod dispatch;
mod events;
mod listener;
mod object;
mod queue;
mod registry;
mod request;
mod system;

pub use events::ListenerToken;
pub use listener::ListenerId;
pub use object::{ObjectId, ObjectSpec};
pub use registry::{FileData, RegistryError, TriggerData};
pub use request::{
    FailureReason, RequestFlags, RequestInfo, RequestKind, RequestStatus, RequestTarget,
    RequestUserData, SystemEvents,
};
pub use system::{AudioSystem, ListenerRef, ObjectRef, SystemConfig, SystemError};

pub use audio_middleware::{
    AudioMiddleware, ControlId, DataScope, EnvironmentId, EventInstanceId, FileInstanceId,
    ListenerHandle, MiddlewareError, ObjectHandle, OcclusionType, PlayFileInfo, PreloadRequestId,
    Quat, ReportSink, SwitchStateId, Transformation, Vec3,
};
