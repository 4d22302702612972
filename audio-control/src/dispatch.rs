//! Dispatcher thread. Owns the middleware implementation, the global
//! object, and the in-flight instance tables; drains the request queue once
//! per pump or tick and executes every request in enqueue order.
//!
//! Nothing outside this module mutates middleware-side state. Report-backs
//! from the implementation re-enter the request queue, so they are handled
//! here like any other request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use audio_middleware::{
    AudioMiddleware, ControlId, DataScope, EnvironmentId, EventInstanceId, FileInstanceId,
    ListenerHandle, MiddlewareError, ObjectHandle, OcclusionType, ReportSink, Transformation,
};
use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::events::EventHub;
use crate::listener::{ListenerId, ListenerTable};
use crate::object::{ObjectId, ObjectSpec, ObjectTable};
use crate::queue::RequestQueue;
use crate::registry::Registry;
use crate::request::{
    FailureReason, Request, RequestData, RequestFlags, RequestInfo, RequestKind, RequestStatus,
    RequestTarget, RequestUserData, SystemEvents,
};

pub(crate) enum ControlMsg {
    /// Run one drain now and ack on `done`.
    Pump { done: Sender<()> },
    Quit,
}

/// Funnels implementation callbacks back into the request queue. Reports
/// are critical requests, so the pushes cannot be rejected.
struct QueueReportSink {
    queue: Arc<RequestQueue>,
}

impl ReportSink for QueueReportSink {
    fn report_started_file(&self, file: FileInstanceId, success: bool) {
        let _ = self.queue.push(Request::new(
            RequestTarget::Global,
            RequestData::ReportStartedFile { file, success },
            RequestUserData::default(),
        ));
    }

    fn report_stopped_file(&self, file: FileInstanceId) {
        let _ = self.queue.push(Request::new(
            RequestTarget::Global,
            RequestData::ReportStoppedFile { file },
            RequestUserData::default(),
        ));
    }

    fn report_finished_event(&self, event: EventInstanceId, success: bool) {
        let _ = self.queue.push(Request::new(
            RequestTarget::Global,
            RequestData::ReportFinishedEvent { event, success },
            RequestUserData::default(),
        ));
    }
}

struct ActiveEvent {
    target: RequestTarget,
    trigger: ControlId,
}

struct ActiveFile {
    target: RequestTarget,
    path: String,
}

fn status_from(result: Result<(), MiddlewareError>) -> RequestStatus {
    match result {
        Ok(()) => RequestStatus::Success,
        Err(err) => {
            debug!(%err, "middleware rejected operation");
            RequestStatus::Failure(FailureReason::MiddlewareFailure)
        }
    }
}

pub(crate) struct Dispatcher {
    queue: Arc<RequestQueue>,
    hub: Arc<EventHub>,
    registry: Arc<Registry>,
    objects: Arc<ObjectTable>,
    listeners: Arc<ListenerTable>,
    middleware: Option<Box<dyn AudioMiddleware>>,
    global_object: Option<ObjectHandle>,
    active_events: HashMap<EventInstanceId, ActiveEvent>,
    active_files: HashMap<FileInstanceId, ActiveFile>,
    next_event: u64,
    next_file: u64,
    muted: bool,
    current_level: Option<String>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<RequestQueue>,
        hub: Arc<EventHub>,
        registry: Arc<Registry>,
        objects: Arc<ObjectTable>,
        listeners: Arc<ListenerTable>,
    ) -> Self {
        Self {
            queue,
            hub,
            registry,
            objects,
            listeners,
            middleware: None,
            global_object: None,
            active_events: HashMap::new(),
            active_files: HashMap::new(),
            next_event: 0,
            next_file: 0,
            muted: false,
            current_level: None,
        }
    }

    pub fn run(mut self, control: Receiver<ControlMsg>, tick: Duration) {
        info!("audio dispatcher running");
        loop {
            select! {
                recv(control) -> msg => match msg {
                    Ok(ControlMsg::Pump { done }) => {
                        self.process();
                        let _ = done.send(());
                    }
                    Ok(ControlMsg::Quit) | Err(_) => break,
                },
                default(tick) => self.process(),
            }
        }
        self.teardown();
        info!("audio dispatcher stopped");
    }

    fn process(&mut self) {
        for request in self.queue.drain() {
            self.handle(request);
        }
    }

    fn handle(&mut self, request: Request) {
        let kind = request.kind();
        let events = request.events();
        let user = request.user;
        let enqueued_at = request.enqueued_at;
        if let Some((status, target)) = self.execute(request) {
            if let RequestStatus::Failure(reason) = status {
                let queued_us = enqueued_at.elapsed().as_micros() as u64;
                debug!(?kind, ?reason, queued_us, "request failed");
            }
            let info = RequestInfo { kind, target, status, cookie: user.cookie, events };
            if user.flags.contains(RequestFlags::AUDIO_THREAD_CALLBACK) {
                self.hub.deliver_now(&info);
            } else {
                self.hub.post(info);
            }
        }
    }

    /// Executes one request and returns the outcome status plus the target
    /// it refers to. `None` means no outcome applies (stale report-backs).
    fn execute(&mut self, request: Request) -> Option<(RequestStatus, RequestTarget)> {
        let target = request.target;
        match request.data {
            RequestData::SetImpl { middleware } => Some((self.set_impl(middleware), target)),
            RequestData::ConstructObject => {
                let status = match target {
                    RequestTarget::Object(id) => {
                        match self.objects.with_record(id, |record| record.is_active()) {
                            Some(true) => self.bind_object(id),
                            _ => RequestStatus::Failure(FailureReason::InvalidTarget),
                        }
                    }
                    _ => RequestStatus::Failure(FailureReason::InvalidTarget),
                };
                Some((status, target))
            }
            RequestData::ReleaseObject => {
                let status = match target {
                    RequestTarget::Object(id) => self.release_object_now(id),
                    _ => RequestStatus::Failure(FailureReason::InvalidTarget),
                };
                Some((status, target))
            }
            RequestData::ConstructListener => {
                let status = match target {
                    RequestTarget::Listener(id) => {
                        match self.listeners.with_record(id, |record| record.is_active()) {
                            Some(true) => self.bind_listener(id),
                            _ => RequestStatus::Failure(FailureReason::InvalidTarget),
                        }
                    }
                    _ => RequestStatus::Failure(FailureReason::InvalidTarget),
                };
                Some((status, target))
            }
            RequestData::ReleaseListener => {
                let status = match target {
                    RequestTarget::Listener(id) => self.release_listener_now(id),
                    _ => RequestStatus::Failure(FailureReason::InvalidTarget),
                };
                Some((status, target))
            }
            RequestData::ExecuteTrigger { trigger } => {
                Some((self.execute_trigger(target, trigger), target))
            }
            RequestData::ExecuteTriggerEx { spec, trigger } => {
                Some(self.execute_trigger_ex(spec, trigger))
            }
            RequestData::StopTrigger { trigger } => {
                let status = match trigger {
                    Some(t) if !self.registry.has_trigger(t) => {
                        RequestStatus::Failure(FailureReason::UnknownControl)
                    }
                    _ => self.with_binding(target, |mw, handle| mw.stop_trigger(handle, trigger)),
                };
                Some((status, target))
            }
            RequestData::SetTransformation { transformation } => {
                let status = match target {
                    RequestTarget::Listener(id) => {
                        self.set_listener_transformation(id, transformation)
                    }
                    _ => {
                        let status = self.with_binding(target, |mw, handle| {
                            mw.set_transformation(handle, &transformation)
                        });
                        if status.is_success() {
                            if let RequestTarget::Object(id) = target {
                                self.objects.with_record(id, |record| {
                                    record.transformation = transformation;
                                });
                            }
                        }
                        status
                    }
                };
                Some((status, target))
            }
            RequestData::SetParameter { parameter, value } => {
                let status = if !self.registry.has_parameter(parameter) {
                    RequestStatus::Failure(FailureReason::UnknownControl)
                } else {
                    self.with_binding(target, |mw, handle| {
                        mw.set_parameter(handle, parameter, value)
                    })
                };
                Some((status, target))
            }
            RequestData::SetSwitchState { switch, state } => {
                let status = if !self.registry.switch_state_valid(switch, state) {
                    RequestStatus::Failure(FailureReason::UnknownControl)
                } else {
                    self.with_binding(target, |mw, handle| {
                        mw.set_switch_state(handle, switch, state)
                    })
                };
                Some((status, target))
            }
            RequestData::SetEnvironment { environment, amount } => {
                let status = if !self.registry.has_environment(environment) {
                    RequestStatus::Failure(FailureReason::UnknownControl)
                } else {
                    let status = self.with_binding(target, |mw, handle| {
                        mw.set_environment(handle, environment, amount)
                    });
                    if status.is_success() {
                        if let RequestTarget::Object(id) = target {
                            self.objects.with_record(id, |record| {
                                record.environments.insert(environment, amount);
                            });
                        }
                    }
                    status
                };
                Some((status, target))
            }
            RequestData::SetCurrentEnvironments { amounts } => {
                Some((self.set_current_environments(target, &amounts), target))
            }
            RequestData::ResetEnvironments => {
                Some((self.reset_environments(target), target))
            }
            RequestData::SetOcclusion { occlusion } => {
                let status =
                    self.with_binding(target, |mw, handle| mw.set_occlusion(handle, occlusion));
                if status.is_success() {
                    if let RequestTarget::Object(id) = target {
                        self.objects.with_record(id, |record| record.occlusion = occlusion);
                    }
                }
                Some((status, target))
            }
            RequestData::PlayFile { info } => Some((self.play_file(target, info), target)),
            RequestData::StopFile { path } => {
                let status =
                    self.with_binding(target, |mw, handle| mw.stop_file(handle, &path));
                Some((status, target))
            }
            RequestData::ReportStartedFile { file, success } => {
                self.report_started_file(file, success)
            }
            RequestData::ReportStoppedFile { file } => self.report_stopped_file(file),
            RequestData::ReportFinishedEvent { event, success } => {
                self.report_finished_event(event, success)
            }
            RequestData::LoadTrigger { trigger } => {
                let status = if !self.registry.has_trigger(trigger) {
                    RequestStatus::Failure(FailureReason::UnknownControl)
                } else {
                    self.with_mw(|mw| mw.load_trigger_data(trigger))
                };
                Some((status, target))
            }
            RequestData::UnloadTrigger { trigger } => {
                let status = if !self.registry.has_trigger(trigger) {
                    RequestStatus::Failure(FailureReason::UnknownControl)
                } else {
                    self.with_mw(|mw| mw.unload_trigger_data(trigger))
                };
                Some((status, target))
            }
            RequestData::Preload { preload, auto_load_only } => {
                let status = match self.registry.preload_info(preload) {
                    None => RequestStatus::Failure(FailureReason::UnknownControl),
                    Some(info) if auto_load_only && !info.auto_load => {
                        debug!(?preload, "preload skipped: not marked auto-load");
                        RequestStatus::Success
                    }
                    Some(_) => self.with_mw(|mw| mw.preload(preload)),
                };
                Some((status, target))
            }
            RequestData::UnloadPreload { preload } => {
                let status = if self.registry.preload_info(preload).is_none() {
                    RequestStatus::Failure(FailureReason::UnknownControl)
                } else {
                    self.with_mw(|mw| mw.unload_preload(preload))
                };
                Some((status, target))
            }
            RequestData::LostFocus => {
                if let Some(mw) = self.middleware.as_deref_mut() {
                    mw.on_lost_focus();
                }
                Some((RequestStatus::Success, target))
            }
            RequestData::GotFocus => {
                if let Some(mw) = self.middleware.as_deref_mut() {
                    mw.on_got_focus();
                }
                Some((RequestStatus::Success, target))
            }
            RequestData::MuteAll => {
                self.muted = true;
                if let Some(mw) = self.middleware.as_deref_mut() {
                    mw.mute_all();
                }
                Some((RequestStatus::Success, target))
            }
            RequestData::UnmuteAll => {
                self.muted = false;
                if let Some(mw) = self.middleware.as_deref_mut() {
                    mw.unmute_all();
                }
                Some((RequestStatus::Success, target))
            }
            RequestData::StopAllSounds => {
                Some((self.with_mw(|mw| mw.stop_all_sounds()), target))
            }
            RequestData::Refresh { level } => {
                info!(level = level.as_deref().unwrap_or("<none>"), "refreshing audio system");
                self.stop_and_clear_level();
                self.current_level = level;
                Some((RequestStatus::Success, target))
            }
            RequestData::ReloadControls { folder, level } => {
                info!(
                    folder = folder.as_str(),
                    level = level.as_deref().unwrap_or("<none>"),
                    "reloading controls data"
                );
                self.unload_level_data();
                Some((RequestStatus::Success, target))
            }
            RequestData::LoadLevel { level } => {
                info!(level = level.as_str(), "level loaded");
                self.current_level = Some(level);
                Some((RequestStatus::Success, target))
            }
            RequestData::UnloadLevel => {
                info!(
                    level = self.current_level.as_deref().unwrap_or("<none>"),
                    "level unloading"
                );
                self.stop_and_clear_level();
                self.current_level = None;
                Some((RequestStatus::Success, target))
            }
            RequestData::LanguageChanged => {
                if let Some(mw) = self.middleware.as_deref_mut() {
                    mw.on_language_changed();
                }
                Some((RequestStatus::Success, target))
            }
        }
    }

    // ---- target resolution -------------------------------------------------

    /// Middleware-side handle an object-directed request acts on. Target
    /// validity is checked before implementation presence, so a released
    /// handle always comes back as `InvalidTarget`.
    fn object_binding(&self, target: RequestTarget) -> Result<ObjectHandle, FailureReason> {
        match target {
            RequestTarget::Global => {
                if self.middleware.is_none() {
                    Err(FailureReason::ImplementationMissing)
                } else {
                    self.global_object.ok_or(FailureReason::MiddlewareFailure)
                }
            }
            RequestTarget::Object(id) => {
                match self.objects.with_record(id, |record| (record.is_active(), record.binding)) {
                    None | Some((false, _)) => Err(FailureReason::InvalidTarget),
                    Some((true, binding)) => {
                        if self.middleware.is_none() {
                            Err(FailureReason::ImplementationMissing)
                        } else {
                            binding.ok_or(FailureReason::MiddlewareFailure)
                        }
                    }
                }
            }
            RequestTarget::Listener(_) => Err(FailureReason::InvalidTarget),
        }
    }

    fn listener_binding(&self, id: ListenerId) -> Result<ListenerHandle, FailureReason> {
        match self.listeners.with_record(id, |record| (record.is_active(), record.binding)) {
            None | Some((false, _)) => Err(FailureReason::InvalidTarget),
            Some((true, binding)) => {
                if self.middleware.is_none() {
                    Err(FailureReason::ImplementationMissing)
                } else {
                    binding.ok_or(FailureReason::MiddlewareFailure)
                }
            }
        }
    }

    fn with_binding(
        &mut self,
        target: RequestTarget,
        f: impl FnOnce(&mut dyn AudioMiddleware, ObjectHandle) -> Result<(), MiddlewareError>,
    ) -> RequestStatus {
        match self.object_binding(target) {
            Err(reason) => RequestStatus::Failure(reason),
            Ok(handle) => match self.middleware.as_deref_mut() {
                Some(mw) => status_from(f(mw, handle)),
                None => RequestStatus::Failure(FailureReason::ImplementationMissing),
            },
        }
    }

    fn with_mw(
        &mut self,
        f: impl FnOnce(&mut dyn AudioMiddleware) -> Result<(), MiddlewareError>,
    ) -> RequestStatus {
        match self.middleware.as_deref_mut() {
            Some(mw) => status_from(f(mw)),
            None => RequestStatus::Failure(FailureReason::ImplementationMissing),
        }
    }

    // ---- implementation lifecycle ------------------------------------------

    fn set_impl(&mut self, new: Option<Box<dyn AudioMiddleware>>) -> RequestStatus {
        // Everything queued before this request already ran against the old
        // implementation; nothing in flight survives the swap.
        self.drop_all_instances();
        self.unbind_all();
        self.middleware = new;
        if self.middleware.is_none() {
            info!("implementation cleared");
            return RequestStatus::Success;
        }
        match self.install_current() {
            Ok(()) => RequestStatus::Success,
            Err(reason) => RequestStatus::Failure(reason),
        }
    }

    fn install_current(&mut self) -> Result<(), FailureReason> {
        let sink: Arc<dyn ReportSink> = Arc::new(QueueReportSink { queue: Arc::clone(&self.queue) });
        let mut init_failed = false;
        if let Some(mw) = self.middleware.as_deref_mut() {
            let name = mw.name().to_string();
            if let Err(err) = mw.init(sink) {
                warn!(%err, impl_name = name.as_str(), "implementation failed to initialize");
                init_failed = true;
            } else {
                match mw.construct_object("global", &Transformation::IDENTITY, OcclusionType::Ignore)
                {
                    Ok(handle) => self.global_object = Some(handle),
                    Err(err) => warn!(%err, "global object construction failed"),
                }
                if self.muted {
                    mw.mute_all();
                }
                info!(impl_name = name.as_str(), "implementation installed");
            }
        } else {
            return Err(FailureReason::ImplementationMissing);
        }
        if init_failed {
            self.middleware = None;
            return Err(FailureReason::MiddlewareFailure);
        }
        self.rebind_all();
        Ok(())
    }

    /// Constructs middleware bindings for every live table entry and
    /// restores their transformation, occlusion and environment amounts.
    fn rebind_all(&mut self) {
        for id in self.objects.ids() {
            let active = self.objects.with_record(id, |record| record.is_active()).unwrap_or(false);
            if active {
                self.bind_object(id);
            }
        }
        for id in self.listeners.ids() {
            let active =
                self.listeners.with_record(id, |record| record.is_active()).unwrap_or(false);
            if active {
                self.bind_listener(id);
            }
        }
    }

    fn unbind_all(&mut self) {
        let mut object_handles = Vec::new();
        for id in self.objects.ids() {
            if let Some(Some(handle)) = self.objects.with_record(id, |record| record.binding.take())
            {
                object_handles.push(handle);
            }
        }
        let mut listener_handles = Vec::new();
        for id in self.listeners.ids() {
            if let Some(Some(handle)) =
                self.listeners.with_record(id, |record| record.binding.take())
            {
                listener_handles.push(handle);
            }
        }
        let global = self.global_object.take();
        if let Some(mw) = self.middleware.as_deref_mut() {
            for handle in object_handles {
                if let Err(err) = mw.destroy_object(handle) {
                    warn!(%err, "forced object release during implementation teardown");
                }
            }
            for handle in listener_handles {
                if let Err(err) = mw.destroy_listener(handle) {
                    warn!(%err, "forced listener release during implementation teardown");
                }
            }
            if let Some(handle) = global {
                if let Err(err) = mw.destroy_object(handle) {
                    warn!(%err, "global object teardown failed");
                }
            }
            mw.shutdown();
        }
    }

    // ---- objects and listeners ---------------------------------------------

    /// Constructs the middleware binding for an object and applies its
    /// stored state. Idempotent for already-bound objects.
    fn bind_object(&mut self, id: ObjectId) -> RequestStatus {
        let snapshot = self.objects.with_record(id, |record| {
            (
                record.name.clone(),
                record.transformation,
                record.occlusion,
                record.environments.clone(),
                record.binding,
            )
        });
        let (name, transformation, occlusion, environments, binding) = match snapshot {
            Some(s) => s,
            None => return RequestStatus::Failure(FailureReason::InvalidTarget),
        };
        if binding.is_some() {
            return RequestStatus::Success;
        }
        let mw = match self.middleware.as_deref_mut() {
            Some(mw) => mw,
            None => return RequestStatus::Failure(FailureReason::ImplementationMissing),
        };
        match mw.construct_object(&name, &transformation, occlusion) {
            Err(err) => {
                debug!(%err, object = name.as_str(), "object construction rejected");
                RequestStatus::Failure(FailureReason::MiddlewareFailure)
            }
            Ok(handle) => {
                for (environment, amount) in environments {
                    if let Err(err) = mw.set_environment(handle, environment, amount) {
                        debug!(%err, "initial environment amount rejected");
                    }
                }
                self.objects.with_record(id, |record| record.binding = Some(handle));
                RequestStatus::Success
            }
        }
    }

    fn bind_listener(&mut self, id: ListenerId) -> RequestStatus {
        let snapshot =
            self.listeners.with_record(id, |record| (record.transformation, record.binding));
        let (transformation, binding) = match snapshot {
            Some(s) => s,
            None => return RequestStatus::Failure(FailureReason::InvalidTarget),
        };
        if binding.is_some() {
            return RequestStatus::Success;
        }
        let mw = match self.middleware.as_deref_mut() {
            Some(mw) => mw,
            None => return RequestStatus::Failure(FailureReason::ImplementationMissing),
        };
        match mw.construct_listener(&transformation) {
            Err(err) => {
                debug!(%err, "listener construction rejected");
                RequestStatus::Failure(FailureReason::MiddlewareFailure)
            }
            Ok(handle) => {
                self.listeners.with_record(id, |record| record.binding = Some(handle));
                RequestStatus::Success
            }
        }
    }

    fn release_object_now(&mut self, id: ObjectId) -> RequestStatus {
        let record = match self.objects.remove(id) {
            Some(record) => record,
            None => return RequestStatus::Failure(FailureReason::InvalidTarget),
        };
        // Forget its in-flight instances; late reports for them are ignored.
        for event in &record.active_events {
            self.active_events.remove(event);
        }
        for file in &record.active_files {
            self.active_files.remove(file);
        }
        if let (Some(handle), Some(mw)) = (record.binding, self.middleware.as_deref_mut()) {
            if let Err(err) = mw.stop_trigger(handle, None) {
                debug!(%err, "stop-all on release rejected");
            }
            if let Err(err) = mw.destroy_object(handle) {
                warn!(%err, object = record.name.as_str(), "forced object release after middleware failure");
            }
        }
        RequestStatus::Success
    }

    fn release_listener_now(&mut self, id: ListenerId) -> RequestStatus {
        let record = match self.listeners.remove(id) {
            Some(record) => record,
            None => return RequestStatus::Failure(FailureReason::InvalidTarget),
        };
        if let (Some(handle), Some(mw)) = (record.binding, self.middleware.as_deref_mut()) {
            if let Err(err) = mw.destroy_listener(handle) {
                warn!(%err, "forced listener release after middleware failure");
            }
        }
        RequestStatus::Success
    }

    fn set_listener_transformation(
        &mut self,
        id: ListenerId,
        transformation: Transformation,
    ) -> RequestStatus {
        match self.listener_binding(id) {
            Err(reason) => RequestStatus::Failure(reason),
            Ok(handle) => {
                let status = match self.middleware.as_deref_mut() {
                    Some(mw) => status_from(mw.set_listener_transformation(handle, &transformation)),
                    None => RequestStatus::Failure(FailureReason::ImplementationMissing),
                };
                if status.is_success() {
                    self.listeners
                        .with_record(id, |record| record.transformation = transformation);
                }
                status
            }
        }
    }

    // ---- triggers and files ------------------------------------------------

    fn alloc_event(&mut self) -> EventInstanceId {
        self.next_event += 1;
        EventInstanceId(self.next_event)
    }

    fn alloc_file(&mut self) -> FileInstanceId {
        self.next_file += 1;
        FileInstanceId(self.next_file)
    }

    fn execute_trigger(&mut self, target: RequestTarget, trigger: ControlId) -> RequestStatus {
        if !self.registry.has_trigger(trigger) {
            return RequestStatus::Failure(FailureReason::UnknownControl);
        }
        let handle = match self.object_binding(target) {
            Err(reason) => return RequestStatus::Failure(reason),
            Ok(handle) => handle,
        };
        // Ids are drawn only once the target has resolved.
        let event = self.alloc_event();
        let status = match self.middleware.as_deref_mut() {
            Some(mw) => status_from(mw.execute_trigger(handle, trigger, event)),
            None => RequestStatus::Failure(FailureReason::ImplementationMissing),
        };
        if status.is_success() {
            self.active_events.insert(event, ActiveEvent { target, trigger });
            if let RequestTarget::Object(id) = target {
                self.objects.with_record(id, |record| {
                    record.active_events.insert(event);
                });
            }
        }
        status
    }

    /// Fire-and-forget: builds a temporary object, executes the trigger on
    /// it, and releases the object once its last instance reports back.
    fn execute_trigger_ex(
        &mut self,
        spec: ObjectSpec,
        trigger: ControlId,
    ) -> (RequestStatus, RequestTarget) {
        if !self.registry.has_trigger(trigger) {
            return (RequestStatus::Failure(FailureReason::UnknownControl), RequestTarget::Global);
        }
        if self.middleware.is_none() {
            return (
                RequestStatus::Failure(FailureReason::ImplementationMissing),
                RequestTarget::Global,
            );
        }
        let id = self.objects.allocate(&spec);
        let bound = self.bind_object(id);
        if !bound.is_success() {
            self.objects.remove(id);
            return (bound, RequestTarget::Global);
        }
        self.objects.with_record(id, |record| record.auto_release = true);
        let target = RequestTarget::Object(id);
        let status = self.execute_trigger(target, trigger);
        if !status.is_success() {
            // Nothing went in flight; take the temporary object down again.
            self.release_object_now(id);
            return (status, RequestTarget::Global);
        }
        (status, target)
    }

    fn play_file(
        &mut self,
        target: RequestTarget,
        info: audio_middleware::PlayFileInfo,
    ) -> RequestStatus {
        let handle = match self.object_binding(target) {
            Err(reason) => return RequestStatus::Failure(reason),
            Ok(handle) => handle,
        };
        let file = self.alloc_file();
        let path = info.path.clone();
        let status = match self.middleware.as_deref_mut() {
            Some(mw) => status_from(mw.play_file(handle, &info, file)),
            None => RequestStatus::Failure(FailureReason::ImplementationMissing),
        };
        if status.is_success() {
            self.active_files.insert(file, ActiveFile { target, path });
            if let RequestTarget::Object(id) = target {
                self.objects.with_record(id, |record| {
                    record.active_files.insert(file);
                });
            }
            // Playback completion arrives through the file reports.
            return RequestStatus::Pending;
        }
        status
    }

    // ---- environments ------------------------------------------------------

    fn set_current_environments(
        &mut self,
        target: RequestTarget,
        amounts: &[(EnvironmentId, f32)],
    ) -> RequestStatus {
        for (environment, _) in amounts {
            if !self.registry.has_environment(*environment) {
                return RequestStatus::Failure(FailureReason::UnknownControl);
            }
        }
        let handle = match self.object_binding(target) {
            Err(reason) => return RequestStatus::Failure(reason),
            Ok(handle) => handle,
        };
        // Amounts replace the current set; zero out entries not in the new one.
        let stale: Vec<EnvironmentId> = match target {
            RequestTarget::Object(id) => self
                .objects
                .with_record(id, |record| {
                    record
                        .environments
                        .keys()
                        .copied()
                        .filter(|env| !amounts.iter().any(|(a, _)| a == env))
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let mut failed = false;
        if let Some(mw) = self.middleware.as_deref_mut() {
            for environment in &stale {
                if let Err(err) = mw.set_environment(handle, *environment, 0.0) {
                    debug!(%err, "environment clear rejected");
                    failed = true;
                }
            }
            for (environment, amount) in amounts {
                if let Err(err) = mw.set_environment(handle, *environment, *amount) {
                    debug!(%err, "environment amount rejected");
                    failed = true;
                }
            }
        }
        if let RequestTarget::Object(id) = target {
            self.objects.with_record(id, |record| {
                record.environments.clear();
                record.environments.extend(amounts.iter().copied());
            });
        }
        if failed {
            RequestStatus::Failure(FailureReason::MiddlewareFailure)
        } else {
            RequestStatus::Success
        }
    }

    fn reset_environments(&mut self, target: RequestTarget) -> RequestStatus {
        let handle = match self.object_binding(target) {
            Err(reason) => return RequestStatus::Failure(reason),
            Ok(handle) => handle,
        };
        let current: Vec<EnvironmentId> = match target {
            RequestTarget::Object(id) => self
                .objects
                .with_record(id, |record| record.environments.keys().copied().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let mut failed = false;
        if let Some(mw) = self.middleware.as_deref_mut() {
            for environment in &current {
                if let Err(err) = mw.set_environment(handle, *environment, 0.0) {
                    debug!(%err, "environment reset rejected");
                    failed = true;
                }
            }
        }
        if let RequestTarget::Object(id) = target {
            self.objects.with_record(id, |record| record.environments.clear());
        }
        if failed {
            RequestStatus::Failure(FailureReason::MiddlewareFailure)
        } else {
            RequestStatus::Success
        }
    }

    // ---- report-backs ------------------------------------------------------

    fn report_started_file(
        &mut self,
        file: FileInstanceId,
        success: bool,
    ) -> Option<(RequestStatus, RequestTarget)> {
        let target = match self.active_files.get(&file) {
            Some(entry) => entry.target,
            None => {
                debug!(?file, "start report for unknown file instance");
                return None;
            }
        };
        if success {
            Some((RequestStatus::Success, target))
        } else {
            self.remove_file_instance(file);
            Some((RequestStatus::Failure(FailureReason::MiddlewareFailure), target))
        }
    }

    fn report_stopped_file(
        &mut self,
        file: FileInstanceId,
    ) -> Option<(RequestStatus, RequestTarget)> {
        match self.remove_file_instance(file) {
            Some(entry) => Some((RequestStatus::Success, entry.target)),
            None => {
                debug!(?file, "stop report for unknown file instance");
                None
            }
        }
    }

    fn report_finished_event(
        &mut self,
        event: EventInstanceId,
        success: bool,
    ) -> Option<(RequestStatus, RequestTarget)> {
        let entry = match self.active_events.remove(&event) {
            Some(entry) => entry,
            None => {
                debug!(?event, "finish report for unknown event instance");
                return None;
            }
        };
        if let RequestTarget::Object(id) = entry.target {
            self.objects.with_record(id, |record| {
                record.active_events.remove(&event);
            });
            self.maybe_auto_release(id);
        }
        let status = if success {
            RequestStatus::Success
        } else {
            debug!(?event, trigger = ?entry.trigger, "event finished with failure");
            RequestStatus::Failure(FailureReason::MiddlewareFailure)
        };
        Some((status, entry.target))
    }

    fn remove_file_instance(&mut self, file: FileInstanceId) -> Option<ActiveFile> {
        let entry = self.active_files.remove(&file)?;
        if let RequestTarget::Object(id) = entry.target {
            self.objects.with_record(id, |record| {
                record.active_files.remove(&file);
            });
            self.maybe_auto_release(id);
        }
        Some(entry)
    }

    fn maybe_auto_release(&mut self, id: ObjectId) {
        let ready = self
            .objects
            .with_record(id, |record| record.auto_release && record.is_idle())
            .unwrap_or(false);
        if ready && self.release_object_now(id).is_success() {
            self.hub.post(RequestInfo {
                kind: RequestKind::ReleaseObject,
                target: RequestTarget::Object(id),
                status: RequestStatus::Success,
                cookie: None,
                events: SystemEvents::OBJECT_LIFECYCLE,
            });
        }
    }

    // ---- level data --------------------------------------------------------

    fn stop_and_clear_level(&mut self) {
        if let Some(mw) = self.middleware.as_deref_mut() {
            if let Err(err) = mw.stop_all_sounds() {
                debug!(%err, "stop-all rejected");
            }
        }
        self.drop_all_instances();
        self.unload_level_data();
    }

    /// Unloads level preloads middleware-side, strips level-scoped
    /// environment amounts from live objects, then purges the registry
    /// scope. Object and listener identities survive.
    fn unload_level_data(&mut self) {
        let preloads = self.registry.level_preloads();
        if let Some(mw) = self.middleware.as_deref_mut() {
            for preload in &preloads {
                if let Err(err) = mw.unload_preload(*preload) {
                    debug!(%err, "level preload unload rejected");
                }
            }
        }
        let environments = self.registry.level_environments();
        if !environments.is_empty() {
            for id in self.objects.ids() {
                self.objects.with_record(id, |record| {
                    for environment in &environments {
                        record.environments.remove(environment);
                    }
                });
            }
        }
        self.registry.purge(DataScope::LevelSpecific);
    }

    /// Aborts every in-flight instance, surfacing each as a failed-finish
    /// outcome so waiting observers are not left hanging.
    fn drop_all_instances(&mut self) {
        if self.active_events.is_empty() && self.active_files.is_empty() {
            return;
        }
        debug!(
            events = self.active_events.len(),
            files = self.active_files.len(),
            "aborting in-flight instances"
        );
        let events: Vec<(EventInstanceId, ActiveEvent)> = self.active_events.drain().collect();
        let mut affected = Vec::new();
        for (event, entry) in events {
            if let RequestTarget::Object(id) = entry.target {
                self.objects.with_record(id, |record| {
                    record.active_events.remove(&event);
                });
                affected.push(id);
            }
            self.hub.post(RequestInfo {
                kind: RequestKind::TriggerFinished { event },
                target: entry.target,
                status: RequestStatus::Failure(FailureReason::MiddlewareFailure),
                cookie: None,
                events: SystemEvents::TRIGGER_FINISHED,
            });
        }
        let files: Vec<(FileInstanceId, ActiveFile)> = self.active_files.drain().collect();
        for (file, entry) in files {
            if let RequestTarget::Object(id) = entry.target {
                self.objects.with_record(id, |record| {
                    record.active_files.remove(&file);
                });
                affected.push(id);
            }
            self.hub.post(RequestInfo {
                kind: RequestKind::FileStopped { file },
                target: entry.target,
                status: RequestStatus::Failure(FailureReason::MiddlewareFailure),
                cookie: None,
                events: SystemEvents::FILE_STOPPED,
            });
        }
        for id in affected {
            self.maybe_auto_release(id);
        }
    }

    // ---- shutdown ----------------------------------------------------------

    fn teardown(&mut self) {
        // Final drain so queued teardowns and reports still complete.
        self.process();
        self.drop_all_instances();
        self.unbind_all();
        self.middleware = None;
    }
}
