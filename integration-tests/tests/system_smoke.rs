//! End-to-end smoke: facade registration and lookup, canonical trigger and
//! file round trips, control updates, and descriptor accessors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use audio_control::{
    AudioSystem, ControlId, DataScope, EnvironmentId, FailureReason, FileData, ObjectSpec,
    OcclusionType, PlayFileInfo, RequestInfo, RequestKind, RequestStatus, RequestTarget,
    RequestUserData, SystemConfig, SystemEvents, TriggerData,
};
use audio_middleware::mock::{MockCall, MockMiddleware};

/// Draining is driven explicitly by `external_update` in these tests.
fn test_config() -> SystemConfig {
    SystemConfig { tick_interval: Duration::from_secs(3600), ..SystemConfig::default() }
}

fn system_with_mock() -> (AudioSystem, MockMiddleware) {
    let system = AudioSystem::new(test_config()).expect("spawn dispatcher");
    let mock = MockMiddleware::new();
    system.set_impl(Some(Box::new(mock.clone())), RequestUserData::default());
    system.external_update();
    (system, mock)
}

fn collect_outcomes(
    system: &AudioSystem,
    target: Option<RequestTarget>,
    mask: SystemEvents,
) -> Arc<Mutex<Vec<RequestInfo>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    system.add_request_listener(
        move |info: &RequestInfo| sink.lock().unwrap().push(info.clone()),
        target,
        mask,
    );
    seen
}

/// Contract: registering a name yields a stable non-sentinel ID; lookups are
/// case-insensitive and unknown names resolve to None.
#[test]
fn trigger_registration_and_lookup() {
    let system = AudioSystem::new(test_config()).expect("spawn dispatcher");

    let id = system.register_trigger("Play_Footstep", DataScope::Global).expect("register");
    assert_ne!(id, ControlId::INVALID);
    assert_eq!(system.trigger_id("Play_Footstep"), Some(id));
    assert_eq!(system.trigger_id("play_footstep"), Some(id), "lookup is case-insensitive");
    assert_eq!(system.trigger_id("Unknown_Trigger"), None);

    let again = system.register_trigger("Play_Footstep", DataScope::Global).expect("re-register");
    assert_eq!(again, id, "same name and scope returns the same ID");

    system.release();
}

/// Contract: create object, execute trigger, one pump; a listener masked for
/// TRIGGER_EXECUTED receives exactly one outcome carrying the object target.
#[test]
fn trigger_roundtrip_notifies_once() {
    let (system, mock) = system_with_mock();
    let trigger = system.register_trigger("Play_Footstep", DataScope::Global).expect("register");
    let object = system.create_object(ObjectSpec::new().name("footsteps"));
    let seen = collect_outcomes(&system, None, SystemEvents::TRIGGER_EXECUTED);

    system.object(object).execute_trigger(trigger, RequestUserData::default());
    system.external_update();

    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 1, "exactly one TRIGGER_EXECUTED outcome");
        assert_eq!(infos[0].kind, RequestKind::ExecuteTrigger { trigger });
        assert_eq!(infos[0].target, RequestTarget::Object(object));
        assert!(infos[0].status.is_success());
    }
    assert_eq!(mock.executed_events().len(), 1);
    system.release();
}

/// Contract: play_file reports Pending, then the middleware's started and
/// stopped reports arrive as FILE_STARTED/FILE_STOPPED outcomes in order.
#[test]
fn file_playback_reports_flow_back() {
    let (system, mock) = system_with_mock();
    let object = system.create_object(ObjectSpec::new());
    let mask = SystemEvents::FILE_PLAY | SystemEvents::FILE_STARTED | SystemEvents::FILE_STOPPED;
    let seen = collect_outcomes(&system, None, mask);

    system
        .object(object)
        .play_file(PlayFileInfo::new("music/theme.ogg"), RequestUserData::default());
    system.external_update();

    let files = mock.played_files();
    assert_eq!(files.len(), 1);
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].status, RequestStatus::Pending, "playback is in flight");
    }

    assert!(mock.report_file_started(files[0], true), "sink installed");
    assert!(mock.report_file_stopped(files[0]));
    system.external_update();

    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[1].kind, RequestKind::FileStarted { file: files[0] });
        assert!(infos[1].status.is_success());
        assert_eq!(infos[1].target, RequestTarget::Object(object));
        assert_eq!(infos[2].kind, RequestKind::FileStopped { file: files[0] });
        assert!(infos[2].status.is_success());
    }
    system.release();
}

/// Contract: stop requests carry the trigger and path through to the
/// implementation; stopping an unregistered trigger is rejected before the
/// middleware sees it.
#[test]
fn stop_requests_reach_middleware() {
    let (system, mock) = system_with_mock();
    let siren = system.register_trigger("siren", DataScope::Global).expect("register");
    let object = system.create_object(ObjectSpec::new());
    let handle = system.object(object);
    handle.execute_trigger(siren, RequestUserData::default());
    handle.play_file(PlayFileInfo::new("amb/wind.ogg"), RequestUserData::default());
    system.external_update();
    mock.clear_calls();
    let seen = collect_outcomes(
        &system,
        Some(RequestTarget::Object(object)),
        SystemEvents::TRIGGER_EXECUTED | SystemEvents::FILE_PLAY,
    );

    handle.stop_trigger(Some(siren), RequestUserData::default());
    handle.stop_file("amb/wind.ogg", RequestUserData::default());
    system.external_update();

    let calls = mock.calls();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, MockCall::StopTrigger { trigger: Some(t), .. } if *t == siren)),
        "stop names the trigger instead of stopping everything"
    );
    assert!(calls
        .iter()
        .any(|c| matches!(c, MockCall::StopFile { path, .. } if path == "amb/wind.ogg")));
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|info| info.status.is_success()));
    }

    handle.stop_trigger(Some(ControlId(0xbad)), RequestUserData::default());
    system.external_update();
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[2].status, RequestStatus::Failure(FailureReason::UnknownControl));
    }
    assert!(
        !mock.calls().iter().any(
            |c| matches!(c, MockCall::StopTrigger { trigger: Some(t), .. } if *t == ControlId(0xbad))
        ),
        "unknown trigger never reaches the implementation"
    );
    system.release();
}

/// Contract: set_current_environments replaces the object's amount set,
/// zeroing entries absent from the new batch; a batch naming an unknown
/// environment is rejected whole, with nothing applied.
#[test]
fn environment_batches_replace_and_validate() {
    let (system, mock) = system_with_mock();
    let cave = system.register_environment("cave", DataScope::Global).expect("register");
    let hall = system.register_environment("hall", DataScope::Global).expect("register");
    let object = system.create_object(ObjectSpec::new());
    system.object(object).set_environment(cave, 0.7, RequestUserData::default());
    system.external_update();
    mock.clear_calls();
    let seen =
        collect_outcomes(&system, Some(RequestTarget::Object(object)), SystemEvents::CONTROL_SET);

    system.object(object).set_current_environments(vec![(hall, 0.4)], RequestUserData::default());
    system.external_update();

    let env_calls: Vec<MockCall> = mock
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockCall::SetEnvironment { .. }))
        .collect();
    assert_eq!(env_calls.len(), 2, "one zeroing call plus one new amount");
    assert!(
        matches!(env_calls[0], MockCall::SetEnvironment { environment, amount, .. }
            if environment == cave && amount == 0.0),
        "entry absent from the batch is zeroed first"
    );
    assert!(matches!(env_calls[1], MockCall::SetEnvironment { environment, amount, .. }
        if environment == hall && amount == 0.4));
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 1);
        assert!(infos[0].status.is_success());
    }

    mock.clear_calls();
    system.object(object).set_current_environments(
        vec![(hall, 0.6), (EnvironmentId(0xbad), 0.2)],
        RequestUserData::default(),
    );
    system.external_update();
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].status, RequestStatus::Failure(FailureReason::UnknownControl));
    }
    assert!(
        !mock.calls().iter().any(|c| matches!(c, MockCall::SetEnvironment { .. })),
        "rejected batch applies nothing"
    );

    // The rejected batch left hall at 0.4; reset zeroes it and empties the set.
    system.object(object).reset_environments(RequestUserData::default());
    system.external_update();
    assert!(
        mock.calls().iter().any(|c| matches!(c, MockCall::SetEnvironment { environment: e, amount, .. }
            if *e == hall && *amount == 0.0)),
        "reset zeroes the surviving amount"
    );
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 3);
        assert!(infos[2].status.is_success());
    }
    system.release();
}

/// Contract: occlusion updates flow through and report under CONTROL_SET.
#[test]
fn occlusion_updates_flow_through() {
    let (system, mock) = system_with_mock();
    let object = system.create_object(ObjectSpec::new());
    let seen =
        collect_outcomes(&system, Some(RequestTarget::Object(object)), SystemEvents::CONTROL_SET);

    system.object(object).set_occlusion(OcclusionType::Medium, RequestUserData::default());
    system.external_update();

    assert!(mock
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::SetOcclusion { occlusion: OcclusionType::Medium, .. })));
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].kind, RequestKind::SetOcclusion { occlusion: OcclusionType::Medium });
        assert!(infos[0].status.is_success());
    }
    system.release();
}

/// Contract: switch states register under their switch and flow through to
/// the middleware.
#[test]
fn switch_states_flow_through() {
    let (system, mock) = system_with_mock();
    let switch = system.register_switch("surface", DataScope::Global).expect("register switch");
    let state = system.register_switch_state(switch, "gravel").expect("register state");
    assert_eq!(system.switch_state_id(switch, "GRAVEL"), Some(state));

    let object = system.create_object(ObjectSpec::new());
    system.object(object).set_switch_state(switch, state, RequestUserData::default());
    system.external_update();

    let calls = mock.calls();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, MockCall::SetSwitchState { switch: s, state: st, .. }
                if *s == switch && *st == state)),
        "switch update reached the implementation"
    );
    system.release();
}

#[test]
fn trigger_and_file_descriptors_roundtrip() {
    let system = AudioSystem::new(test_config()).expect("spawn dispatcher");

    let trigger = system.register_trigger("explosion", DataScope::Global).expect("register");
    assert!(system.set_trigger_data(trigger, TriggerData { max_radius: 25.0 }));
    assert_eq!(system.audio_trigger_data(trigger).map(|d| d.max_radius), Some(25.0));
    assert!(!system.set_trigger_data(ControlId(0xdead), TriggerData::default()), "unknown id");

    system
        .register_file_data(
            "voice/intro.ogg",
            DataScope::Global,
            FileData { duration: Duration::from_secs(12) },
        )
        .expect("register file data");
    assert_eq!(
        system.audio_file_data("VOICE/Intro.OGG").map(|d| d.duration),
        Some(Duration::from_secs(12))
    );
    assert_eq!(system.audio_file_data("voice/missing.ogg"), None);

    system.release();
}
