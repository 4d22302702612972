//! Call-recording middleware implementation used by unit and integration
//! tests. Handles are validated so a call against a destroyed handle shows
//! up as an error instead of passing silently.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    AudioMiddleware, ControlId, EnvironmentId, EventInstanceId, FileInstanceId, ListenerHandle,
    MiddlewareError, ObjectHandle, OcclusionType, PlayFileInfo, PreloadRequestId, ReportSink,
    SwitchStateId, Transformation,
};

/// One recorded boundary call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Init,
    Shutdown,
    ConstructObject { name: String },
    DestroyObject { object: ObjectHandle },
    ConstructListener,
    DestroyListener { listener: ListenerHandle },
    ExecuteTrigger { object: ObjectHandle, trigger: ControlId, event: EventInstanceId },
    StopTrigger { object: ObjectHandle, trigger: Option<ControlId> },
    SetParameter { object: ObjectHandle, parameter: ControlId, value: f32 },
    SetSwitchState { object: ObjectHandle, switch: ControlId, state: SwitchStateId },
    SetEnvironment { object: ObjectHandle, environment: EnvironmentId, amount: f32 },
    SetTransformation { object: ObjectHandle },
    SetOcclusion { object: ObjectHandle, occlusion: OcclusionType },
    SetListenerTransformation { listener: ListenerHandle },
    PlayFile { object: ObjectHandle, path: String, file: FileInstanceId },
    StopFile { object: ObjectHandle, path: String },
    LoadTriggerData { trigger: ControlId },
    UnloadTriggerData { trigger: ControlId },
    Preload { preload: PreloadRequestId },
    UnloadPreload { preload: PreloadRequestId },
    StopAllSounds,
    LostFocus,
    GotFocus,
    MuteAll,
    UnmuteAll,
    LanguageChanged,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<MockCall>>,
    reports: Mutex<Option<Arc<dyn ReportSink>>>,
    live_objects: Mutex<HashSet<ObjectHandle>>,
    live_listeners: Mutex<HashSet<ListenerHandle>>,
    next_handle: AtomicU64,
    fail_next: AtomicBool,
}

/// Recording middleware. Cloning shares the underlying state, so tests keep
/// a clone and hand a boxed clone to `set_impl`.
#[derive(Clone, Default)]
pub struct MockMiddleware {
    state: Arc<MockState>,
}

impl MockMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded call, in invocation order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    /// Make the next fallible operation return `MiddlewareError::Rejected`.
    pub fn fail_next_operation(&self) {
        self.state.fail_next.store(true, Ordering::Relaxed);
    }

    pub fn live_object_count(&self) -> usize {
        self.state.live_objects.lock().len()
    }

    pub fn live_listener_count(&self) -> usize {
        self.state.live_listeners.lock().len()
    }

    /// Event instances handed to `execute_trigger`, in call order.
    pub fn executed_events(&self) -> Vec<EventInstanceId> {
        self.state
            .calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::ExecuteTrigger { event, .. } => Some(*event),
                _ => None,
            })
            .collect()
    }

    /// File instances handed to `play_file`, in call order.
    pub fn played_files(&self) -> Vec<FileInstanceId> {
        self.state
            .calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::PlayFile { file, .. } => Some(*file),
                _ => None,
            })
            .collect()
    }

    /// Report an event instance finished through the installed sink.
    /// Returns false when no sink is installed yet.
    pub fn report_event_finished(&self, event: EventInstanceId, success: bool) -> bool {
        match self.state.reports.lock().as_ref() {
            Some(sink) => {
                sink.report_finished_event(event, success);
                true
            }
            None => false,
        }
    }

    /// Report a file instance started through the installed sink.
    pub fn report_file_started(&self, file: FileInstanceId, success: bool) -> bool {
        match self.state.reports.lock().as_ref() {
            Some(sink) => {
                sink.report_started_file(file, success);
                true
            }
            None => false,
        }
    }

    /// Report a file instance stopped through the installed sink.
    pub fn report_file_stopped(&self, file: FileInstanceId) -> bool {
        match self.state.reports.lock().as_ref() {
            Some(sink) => {
                sink.report_stopped_file(file);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: MockCall) {
        self.state.calls.lock().push(call);
    }

    fn take_injected_failure(&self) -> Result<(), MiddlewareError> {
        if self.state.fail_next.swap(false, Ordering::Relaxed) {
            Err(MiddlewareError::Rejected("injected failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_object(&self, object: ObjectHandle) -> Result<(), MiddlewareError> {
        if self.state.live_objects.lock().contains(&object) {
            Ok(())
        } else {
            Err(MiddlewareError::UnknownObject(object))
        }
    }

    fn check_listener(&self, listener: ListenerHandle) -> Result<(), MiddlewareError> {
        if self.state.live_listeners.lock().contains(&listener) {
            Ok(())
        } else {
            Err(MiddlewareError::UnknownListener(listener))
        }
    }
}

impl AudioMiddleware for MockMiddleware {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&mut self, reports: Arc<dyn ReportSink>) -> Result<(), MiddlewareError> {
        self.record(MockCall::Init);
        *self.state.reports.lock() = Some(reports);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.record(MockCall::Shutdown);
        *self.state.reports.lock() = None;
        self.state.live_objects.lock().clear();
        self.state.live_listeners.lock().clear();
    }

    fn construct_object(
        &mut self,
        name: &str,
        _transformation: &Transformation,
        _occlusion: OcclusionType,
    ) -> Result<ObjectHandle, MiddlewareError> {
        self.record(MockCall::ConstructObject { name: name.to_string() });
        self.take_injected_failure()?;
        let handle = ObjectHandle(self.state.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.state.live_objects.lock().insert(handle);
        Ok(handle)
    }

    fn destroy_object(&mut self, object: ObjectHandle) -> Result<(), MiddlewareError> {
        self.record(MockCall::DestroyObject { object });
        self.take_injected_failure()?;
        if self.state.live_objects.lock().remove(&object) {
            Ok(())
        } else {
            Err(MiddlewareError::UnknownObject(object))
        }
    }

    fn construct_listener(
        &mut self,
        _transformation: &Transformation,
    ) -> Result<ListenerHandle, MiddlewareError> {
        self.record(MockCall::ConstructListener);
        self.take_injected_failure()?;
        let handle = ListenerHandle(self.state.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.state.live_listeners.lock().insert(handle);
        Ok(handle)
    }

    fn destroy_listener(&mut self, listener: ListenerHandle) -> Result<(), MiddlewareError> {
        self.record(MockCall::DestroyListener { listener });
        self.take_injected_failure()?;
        if self.state.live_listeners.lock().remove(&listener) {
            Ok(())
        } else {
            Err(MiddlewareError::UnknownListener(listener))
        }
    }

    fn execute_trigger(
        &mut self,
        object: ObjectHandle,
        trigger: ControlId,
        event: EventInstanceId,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::ExecuteTrigger { object, trigger, event });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn stop_trigger(
        &mut self,
        object: ObjectHandle,
        trigger: Option<ControlId>,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::StopTrigger { object, trigger });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn set_parameter(
        &mut self,
        object: ObjectHandle,
        parameter: ControlId,
        value: f32,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::SetParameter { object, parameter, value });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn set_switch_state(
        &mut self,
        object: ObjectHandle,
        switch: ControlId,
        state: SwitchStateId,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::SetSwitchState { object, switch, state });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn set_environment(
        &mut self,
        object: ObjectHandle,
        environment: EnvironmentId,
        amount: f32,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::SetEnvironment { object, environment, amount });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn set_transformation(
        &mut self,
        object: ObjectHandle,
        _transformation: &Transformation,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::SetTransformation { object });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn set_occlusion(
        &mut self,
        object: ObjectHandle,
        occlusion: OcclusionType,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::SetOcclusion { object, occlusion });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn set_listener_transformation(
        &mut self,
        listener: ListenerHandle,
        _transformation: &Transformation,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::SetListenerTransformation { listener });
        self.take_injected_failure()?;
        self.check_listener(listener)
    }

    fn play_file(
        &mut self,
        object: ObjectHandle,
        info: &PlayFileInfo,
        file: FileInstanceId,
    ) -> Result<(), MiddlewareError> {
        self.record(MockCall::PlayFile { object, path: info.path.clone(), file });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn stop_file(&mut self, object: ObjectHandle, path: &str) -> Result<(), MiddlewareError> {
        self.record(MockCall::StopFile { object, path: path.to_string() });
        self.take_injected_failure()?;
        self.check_object(object)
    }

    fn load_trigger_data(&mut self, trigger: ControlId) -> Result<(), MiddlewareError> {
        self.record(MockCall::LoadTriggerData { trigger });
        self.take_injected_failure()
    }

    fn unload_trigger_data(&mut self, trigger: ControlId) -> Result<(), MiddlewareError> {
        self.record(MockCall::UnloadTriggerData { trigger });
        self.take_injected_failure()
    }

    fn preload(&mut self, preload: PreloadRequestId) -> Result<(), MiddlewareError> {
        self.record(MockCall::Preload { preload });
        self.take_injected_failure()
    }

    fn unload_preload(&mut self, preload: PreloadRequestId) -> Result<(), MiddlewareError> {
        self.record(MockCall::UnloadPreload { preload });
        self.take_injected_failure()
    }

    fn stop_all_sounds(&mut self) -> Result<(), MiddlewareError> {
        self.record(MockCall::StopAllSounds);
        self.take_injected_failure()
    }

    fn on_lost_focus(&mut self) {
        self.record(MockCall::LostFocus);
    }

    fn on_got_focus(&mut self) {
        self.record(MockCall::GotFocus);
    }

    fn mute_all(&mut self) {
        self.record(MockCall::MuteAll);
    }

    fn unmute_all(&mut self) {
        self.record(MockCall::UnmuteAll);
    }

    fn on_language_changed(&mut self) {
        self.record(MockCall::LanguageChanged);
    }
}
