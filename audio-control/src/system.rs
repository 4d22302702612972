//! Public facade. Owns the shared tables, spawns the dispatcher thread and
//! turns every mutating call into a queued request; synchronous surface is
//! limited to registry lookups, slot allocation and diagnostics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use audio_middleware::{
    AudioMiddleware, ControlId, DataScope, EnvironmentId, EventInstanceId, FileInstanceId,
    OcclusionType, PlayFileInfo, PreloadRequestId, SwitchStateId, Transformation,
};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::{ControlMsg, Dispatcher};
use crate::events::{EventHub, ListenerToken};
use crate::listener::{ListenerId, ListenerTable};
use crate::object::{ObjectId, ObjectSpec, ObjectTable};
use crate::queue::RequestQueue;
use crate::registry::{FileData, Registry, RegistryError, TriggerData};
use crate::request::{
    FailureReason, Request, RequestData, RequestInfo, RequestKind, RequestStatus, RequestTarget,
    RequestUserData, SystemEvents,
};

/// Construction options for [`AudioSystem`].
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Root folder of the audio data on disk.
    pub config_path: PathBuf,
    /// Droppable requests enqueued past this bound are rejected.
    pub request_capacity: usize,
    /// Dispatcher drain interval when no pump arrives.
    pub tick_interval: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("audio"),
            request_capacity: 1024,
            tick_interval: Duration::from_millis(2),
        }
    }
}

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Asynchronous audio control system.
///
/// Mutating operations enqueue and return immediately; their outcomes reach
/// observers registered through [`AudioSystem::add_request_listener`] on the
/// next [`AudioSystem::external_update`] pump. Sharable across threads.
pub struct AudioSystem {
    queue: Arc<RequestQueue>,
    hub: Arc<EventHub>,
    registry: Arc<Registry>,
    objects: Arc<ObjectTable>,
    listeners: Arc<ListenerTable>,
    control: Sender<ControlMsg>,
    thread: Mutex<Option<JoinHandle<()>>>,
    default_listener: ListenerId,
    config: SystemConfig,
}

impl AudioSystem {
    /// Spawns the dispatcher thread. The system starts without an
    /// implementation; operations degrade to `ImplementationMissing`
    /// outcomes until [`AudioSystem::set_impl`] installs one.
    pub fn new(config: SystemConfig) -> Result<Self, SystemError> {
        let queue = Arc::new(RequestQueue::new(config.request_capacity));
        let hub = Arc::new(EventHub::new());
        let registry = Arc::new(Registry::new());
        let objects = Arc::new(ObjectTable::new());
        let listeners = Arc::new(ListenerTable::new());
        // Bound once an implementation is installed.
        let default_listener = listeners.allocate();
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&hub),
            Arc::clone(&registry),
            Arc::clone(&objects),
            Arc::clone(&listeners),
        );
        let (control, control_rx) = unbounded();
        let tick = config.tick_interval;
        let thread = std::thread::Builder::new()
            .name("audio-dispatch".into())
            .spawn(move || dispatcher.run(control_rx, tick))?;
        Ok(Self {
            queue,
            hub,
            registry,
            objects,
            listeners,
            control,
            thread: Mutex::new(Some(thread)),
            default_listener,
            config,
        })
    }

    fn enqueue(&self, target: RequestTarget, data: RequestData, user: RequestUserData) {
        let request = Request::new(target, data, user);
        if let Err(rejected) = self.queue.push(request) {
            let info = rejected.info(RequestStatus::Failure(FailureReason::QueueOverflow));
            warn!(kind = ?info.kind, "request dropped: queue at capacity");
            self.hub.post(info);
        }
    }

    // ---- implementation ----------------------------------------------------

    /// Installs, swaps or clears the middleware implementation. Serialized
    /// through the queue: requests enqueued earlier complete against the old
    /// implementation, and live objects and listeners are rebound to the new
    /// one.
    pub fn set_impl(&self, middleware: Option<Box<dyn AudioMiddleware>>, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::SetImpl { middleware }, user);
    }

    // ---- objects and listeners ---------------------------------------------

    /// Allocates an object handle immediately; middleware-side construction
    /// is queued and always dispatches before later requests on the handle.
    pub fn create_object(&self, spec: ObjectSpec) -> ObjectId {
        let id = self.objects.allocate(&spec);
        self.enqueue(
            RequestTarget::Object(id),
            RequestData::ConstructObject,
            RequestUserData::default(),
        );
        id
    }

    /// Invalidates the handle immediately and queues the teardown. Releasing
    /// a stale or already-releasing handle posts `Failure(InvalidTarget)`.
    pub fn release_object(&self, id: ObjectId) {
        if self.objects.mark_pending_release(id) {
            self.enqueue(
                RequestTarget::Object(id),
                RequestData::ReleaseObject,
                RequestUserData::default(),
            );
        } else {
            debug!("release of stale object handle ignored");
            self.hub.post(RequestInfo {
                kind: RequestKind::ReleaseObject,
                target: RequestTarget::Object(id),
                status: RequestStatus::Failure(FailureReason::InvalidTarget),
                cookie: None,
                events: SystemEvents::OBJECT_LIFECYCLE,
            });
        }
    }

    pub fn object(&self, id: ObjectId) -> ObjectRef<'_> {
        ObjectRef { system: self, id }
    }

    pub fn create_listener(&self) -> ListenerId {
        let id = self.listeners.allocate();
        self.enqueue(
            RequestTarget::Listener(id),
            RequestData::ConstructListener,
            RequestUserData::default(),
        );
        id
    }

    /// The default listener lives as long as the system and cannot be
    /// released.
    pub fn release_listener(&self, id: ListenerId) {
        let valid = id != self.default_listener && self.listeners.mark_pending_release(id);
        if valid {
            self.enqueue(
                RequestTarget::Listener(id),
                RequestData::ReleaseListener,
                RequestUserData::default(),
            );
        } else {
            warn!("listener release rejected (default or stale handle)");
            self.hub.post(RequestInfo {
                kind: RequestKind::ReleaseListener,
                target: RequestTarget::Listener(id),
                status: RequestStatus::Failure(FailureReason::InvalidTarget),
                cookie: None,
                events: SystemEvents::OBJECT_LIFECYCLE,
            });
        }
    }

    pub fn listener(&self, id: ListenerId) -> ListenerRef<'_> {
        ListenerRef { system: self, id }
    }

    pub fn default_listener_id(&self) -> ListenerId {
        self.default_listener
    }

    // ---- global trigger and file operations --------------------------------

    /// Executes a trigger without positioning (routes to the dispatcher's
    /// internal global object).
    pub fn execute_trigger(&self, trigger: ControlId, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::ExecuteTrigger { trigger }, user);
    }

    /// Fire-and-forget: a temporary object is constructed from `spec`, the
    /// trigger executes on it, and the object is released once its last
    /// in-flight instance reports finished. The outcome carries the
    /// temporary object as its target.
    pub fn execute_trigger_ex(&self, spec: ObjectSpec, trigger: ControlId, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::ExecuteTriggerEx { spec, trigger }, user);
    }

    /// Stops one trigger, or all with `None`.
    pub fn stop_trigger(&self, trigger: Option<ControlId>, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::StopTrigger { trigger }, user);
    }

    pub fn set_parameter(&self, parameter: ControlId, value: f32, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::SetParameter { parameter, value }, user);
    }

    pub fn set_switch_state(&self, switch: ControlId, state: SwitchStateId, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::SetSwitchState { switch, state }, user);
    }

    pub fn play_file(&self, info: PlayFileInfo, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::PlayFile { info }, user);
    }

    pub fn stop_file(&self, path: &str, user: RequestUserData) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::StopFile { path: path.to_string() },
            user,
        );
    }

    // ---- data operations ---------------------------------------------------

    pub fn load_trigger(&self, trigger: ControlId, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::LoadTrigger { trigger }, user);
    }

    pub fn unload_trigger(&self, trigger: ControlId, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::UnloadTrigger { trigger }, user);
    }

    /// Loads one preload request. With `auto_load_only`, requests not marked
    /// auto-load are skipped.
    pub fn preload_single_request(
        &self,
        preload: PreloadRequestId,
        auto_load_only: bool,
        user: RequestUserData,
    ) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::Preload { preload, auto_load_only },
            user,
        );
    }

    pub fn unload_single_request(&self, preload: PreloadRequestId, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::UnloadPreload { preload }, user);
    }

    /// Stops everything, purges level-scoped data and reports the refresh.
    /// Object and listener handles stay valid.
    pub fn refresh_audio_system(&self, level: Option<&str>, user: RequestUserData) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::Refresh { level: level.map(str::to_string) },
            user,
        );
    }

    /// Purges level-scoped controls so the embedder can re-register them.
    pub fn reload_controls_data(&self, folder: &str, level: Option<&str>, user: RequestUserData) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::ReloadControls {
                folder: folder.to_string(),
                level: level.map(str::to_string),
            },
            user,
        );
    }

    // ---- level and system state hooks --------------------------------------

    pub fn on_load_level(&self, level: &str) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::LoadLevel { level: level.to_string() },
            RequestUserData::default(),
        );
    }

    /// Purges the LevelSpecific registry scope, unloads level preloads and
    /// strips level-scoped environment amounts from live objects.
    pub fn on_unload_level(&self) {
        self.enqueue(RequestTarget::Global, RequestData::UnloadLevel, RequestUserData::default());
    }

    pub fn on_language_changed(&self) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::LanguageChanged,
            RequestUserData::default(),
        );
    }

    pub fn lost_focus(&self, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::LostFocus, user);
    }

    pub fn got_focus(&self, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::GotFocus, user);
    }

    pub fn mute_all(&self, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::MuteAll, user);
    }

    pub fn unmute_all(&self, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::UnmuteAll, user);
    }

    pub fn stop_all_sounds(&self, user: RequestUserData) {
        self.enqueue(RequestTarget::Global, RequestData::StopAllSounds, user);
    }

    // ---- middleware report-backs -------------------------------------------

    /// Report-backs normally arrive through the `ReportSink` handed to the
    /// implementation; these entry points exist for embedders that drive
    /// completion externally.
    pub fn report_started_file(&self, file: FileInstanceId, success: bool) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::ReportStartedFile { file, success },
            RequestUserData::default(),
        );
    }

    pub fn report_stopped_file(&self, file: FileInstanceId) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::ReportStoppedFile { file },
            RequestUserData::default(),
        );
    }

    pub fn report_finished_event(&self, event: EventInstanceId, success: bool) {
        self.enqueue(
            RequestTarget::Global,
            RequestData::ReportFinishedEvent { event, success },
            RequestUserData::default(),
        );
    }

    // ---- observers ---------------------------------------------------------

    /// Registers an outcome observer. The callback fires for outcomes whose
    /// category intersects `mask` and whose target matches `target` (`None`
    /// observes every target), on the thread calling `external_update`
    /// unless the originating request asked for audio-thread delivery.
    pub fn add_request_listener(
        &self,
        callback: impl Fn(&RequestInfo) + Send + Sync + 'static,
        target: Option<RequestTarget>,
        mask: SystemEvents,
    ) -> ListenerToken {
        self.hub.add(Arc::new(callback), target, mask)
    }

    /// Removing an unknown token is a no-op and returns false.
    pub fn remove_request_listener(&self, token: ListenerToken) -> bool {
        self.hub.remove(token)
    }

    /// Replaces a registration's event mask in place.
    pub fn update_request_listener(&self, token: ListenerToken, mask: SystemEvents) -> bool {
        self.hub.update_mask(token, mask)
    }

    // ---- registration and lookups ------------------------------------------

    pub fn register_trigger(
        &self,
        name: &str,
        scope: DataScope,
    ) -> Result<ControlId, RegistryError> {
        self.registry.register_trigger(name, scope)
    }

    pub fn register_parameter(
        &self,
        name: &str,
        scope: DataScope,
    ) -> Result<ControlId, RegistryError> {
        self.registry.register_parameter(name, scope)
    }

    pub fn register_switch(&self, name: &str, scope: DataScope) -> Result<ControlId, RegistryError> {
        self.registry.register_switch(name, scope)
    }

    pub fn register_switch_state(
        &self,
        switch: ControlId,
        name: &str,
    ) -> Result<SwitchStateId, RegistryError> {
        self.registry.register_switch_state(switch, name)
    }

    pub fn register_environment(
        &self,
        name: &str,
        scope: DataScope,
    ) -> Result<EnvironmentId, RegistryError> {
        self.registry.register_environment(name, scope)
    }

    pub fn register_preload_request(
        &self,
        name: &str,
        scope: DataScope,
        auto_load: bool,
    ) -> Result<PreloadRequestId, RegistryError> {
        self.registry.register_preload_request(name, scope, auto_load)
    }

    pub fn register_file_data(
        &self,
        name: &str,
        scope: DataScope,
        data: FileData,
    ) -> Result<(), RegistryError> {
        self.registry.register_file_data(name, scope, data)
    }

    pub fn set_trigger_data(&self, trigger: ControlId, data: TriggerData) -> bool {
        self.registry.set_trigger_data(trigger, data)
    }

    pub fn trigger_id(&self, name: &str) -> Option<ControlId> {
        self.registry.trigger_id(name)
    }

    pub fn parameter_id(&self, name: &str) -> Option<ControlId> {
        self.registry.parameter_id(name)
    }

    pub fn switch_id(&self, name: &str) -> Option<ControlId> {
        self.registry.switch_id(name)
    }

    pub fn switch_state_id(&self, switch: ControlId, name: &str) -> Option<SwitchStateId> {
        self.registry.switch_state_id(switch, name)
    }

    pub fn environment_id(&self, name: &str) -> Option<EnvironmentId> {
        self.registry.environment_id(name)
    }

    pub fn preload_request_id(&self, name: &str) -> Option<PreloadRequestId> {
        self.registry.preload_request_id(name)
    }

    pub fn audio_trigger_data(&self, trigger: ControlId) -> Option<TriggerData> {
        self.registry.trigger_data(trigger)
    }

    pub fn audio_file_data(&self, name: &str) -> Option<FileData> {
        self.registry.file_data(name)
    }

    pub fn config_path(&self) -> &Path {
        &self.config.config_path
    }

    // ---- pump and diagnostics ----------------------------------------------

    /// Runs one dispatcher drain to completion, then delivers pending
    /// outcomes on this thread. Everything enqueued before the call is
    /// executed before it returns.
    pub fn external_update(&self) {
        let (done, done_rx) = bounded(1);
        if self.control.send(ControlMsg::Pump { done }).is_ok() {
            let _ = done_rx.recv();
        }
        self.hub.flush();
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn dropped_request_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    // ---- shutdown ----------------------------------------------------------

    /// Drains outstanding requests, tears down middleware bindings, stops
    /// the dispatcher thread and delivers the remaining notifications.
    pub fn release(self) {
        self.shutdown();
        self.hub.flush();
    }

    fn shutdown(&self) {
        if let Some(handle) = self.thread.lock().take() {
            let _ = self.control.send(ControlMsg::Quit);
            if handle.join().is_err() {
                warn!("dispatcher thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Per-object operation surface over a plain handle. Operations against a
/// released handle fail with `InvalidTarget` outcomes.
#[derive(Clone, Copy)]
pub struct ObjectRef<'a> {
    system: &'a AudioSystem,
    id: ObjectId,
}

impl ObjectRef<'_> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn execute_trigger(&self, trigger: ControlId, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::ExecuteTrigger { trigger },
            user,
        );
    }

    pub fn stop_trigger(&self, trigger: Option<ControlId>, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::StopTrigger { trigger },
            user,
        );
    }

    pub fn set_parameter(&self, parameter: ControlId, value: f32, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::SetParameter { parameter, value },
            user,
        );
    }

    pub fn set_switch_state(&self, switch: ControlId, state: SwitchStateId, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::SetSwitchState { switch, state },
            user,
        );
    }

    pub fn set_environment(&self, environment: EnvironmentId, amount: f32, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::SetEnvironment { environment, amount },
            user,
        );
    }

    /// Replaces the object's whole environment amount set; amounts absent
    /// from `amounts` are zeroed middleware-side.
    pub fn set_current_environments(
        &self,
        amounts: Vec<(EnvironmentId, f32)>,
        user: RequestUserData,
    ) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::SetCurrentEnvironments { amounts },
            user,
        );
    }

    pub fn reset_environments(&self, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::ResetEnvironments,
            user,
        );
    }

    pub fn set_transformation(&self, transformation: Transformation, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::SetTransformation { transformation },
            user,
        );
    }

    pub fn set_occlusion(&self, occlusion: OcclusionType, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::SetOcclusion { occlusion },
            user,
        );
    }

    pub fn play_file(&self, info: PlayFileInfo, user: RequestUserData) {
        self.system.enqueue(RequestTarget::Object(self.id), RequestData::PlayFile { info }, user);
    }

    pub fn stop_file(&self, path: &str, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Object(self.id),
            RequestData::StopFile { path: path.to_string() },
            user,
        );
    }

    pub fn release(self) {
        self.system.release_object(self.id);
    }
}

/// Per-listener operation surface.
#[derive(Clone, Copy)]
pub struct ListenerRef<'a> {
    system: &'a AudioSystem,
    id: ListenerId,
}

impl ListenerRef<'_> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn set_transformation(&self, transformation: Transformation, user: RequestUserData) {
        self.system.enqueue(
            RequestTarget::Listener(self.id),
            RequestData::SetTransformation { transformation },
            user,
        );
    }

    pub fn release(self) {
        self.system.release_listener(self.id);
    }
}
