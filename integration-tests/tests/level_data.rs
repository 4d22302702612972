//! Level-scoped data lifetime: preloads, registry purges on unload and
//! refresh, and the global system-state hooks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use audio_control::{
    AudioSystem, ControlId, DataScope, FailureReason, ObjectSpec, PreloadRequestId, RequestInfo,
    RequestKind, RequestStatus, RequestUserData, SystemConfig, SystemEvents,
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

fn collect_outcomes(system: &AudioSystem, mask: SystemEvents) -> Arc<Mutex<Vec<RequestInfo>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    system.add_request_listener(
        move |info: &RequestInfo| sink.lock().unwrap().push(info.clone()),
        None,
        mask,
    );
    seen
}

/// Contract: unloading a level unloads its preloads middleware-side and
/// purges LevelSpecific registrations; Global ones survive.
#[test]
fn level_unload_purges_level_scope_only() {
    let (system, mock) = system_with_mock();
    let ui_click = system.register_trigger("ui_click", DataScope::Global).expect("register");
    system.register_trigger("boss_music", DataScope::LevelSpecific).expect("register");
    let bank = system
        .register_preload_request("boss_bank", DataScope::LevelSpecific, true)
        .expect("register preload");
    system.register_environment("lava_cavern", DataScope::LevelSpecific).expect("register");

    system.on_load_level("volcano");
    system.preload_single_request(bank, false, RequestUserData::default());
    system.external_update();
    assert!(mock.calls().iter().any(|c| matches!(c, MockCall::Preload { preload } if *preload == bank)));

    system.on_unload_level();
    system.external_update();

    assert_eq!(system.trigger_id("boss_music"), None);
    assert_eq!(system.preload_request_id("boss_bank"), None);
    assert_eq!(system.environment_id("lava_cavern"), None);
    assert_eq!(system.trigger_id("ui_click"), Some(ui_click), "global scope survives");
    assert!(
        mock.calls()
            .iter()
            .any(|c| matches!(c, MockCall::UnloadPreload { preload } if *preload == bank)),
        "level preload unloaded middleware-side"
    );
    system.release();
}

/// Contract: requests referencing a purged control fail with UnknownControl.
/// The unload is queued like everything else, so a set enqueued after it
/// dispatches against the purged registry.
#[test]
fn purged_environment_rejected_after_unload() {
    let (system, mock) = system_with_mock();
    let swamp =
        system.register_environment("swamp", DataScope::LevelSpecific).expect("register");
    let object = system.create_object(ObjectSpec::new());
    system.object(object).set_environment(swamp, 0.8, RequestUserData::default());
    system.external_update();
    mock.clear_calls();
    let seen = collect_outcomes(&system, SystemEvents::CONTROL_SET);

    system.on_unload_level();
    system.object(object).set_environment(swamp, 0.5, RequestUserData::default());
    system.external_update();

    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].status, RequestStatus::Failure(FailureReason::UnknownControl));
    }
    assert!(
        !mock.calls().iter().any(|c| matches!(c, MockCall::SetEnvironment { .. })),
        "purged environment never reaches the implementation"
    );
    system.release();
}

/// Contract: refresh stops everything, aborts in-flight instances with
/// failed-finish outcomes and reports its own completion; global
/// registrations stay usable.
#[test]
fn refresh_aborts_in_flight_and_reports() {
    let (system, mock) = system_with_mock();
    let ambient = system.register_trigger("ambient", DataScope::Global).expect("register");
    system.execute_trigger(ambient, RequestUserData::default());
    system.external_update();
    assert_eq!(mock.executed_events().len(), 1);
    let seen = collect_outcomes(&system, SystemEvents::ALL);

    system.refresh_audio_system(Some("swamp"), RequestUserData::with_cookie(3));
    system.external_update();

    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 2);
        assert!(
            matches!(infos[0].kind, RequestKind::TriggerFinished { .. }),
            "in-flight instance aborted first"
        );
        assert_eq!(infos[0].status, RequestStatus::Failure(FailureReason::MiddlewareFailure));
        assert_eq!(infos[1].kind, RequestKind::Refresh);
        assert!(infos[1].status.is_success());
        assert_eq!(infos[1].cookie, Some(3));
    }
    assert!(mock.calls().iter().any(|c| matches!(c, MockCall::StopAllSounds)));
    assert_eq!(system.trigger_id("ambient"), Some(ambient));
    system.release();
}

/// Contract: reload purges level-scoped controls so the embedder can
/// re-register from the new data.
#[test]
fn reload_controls_drops_level_registrations() {
    let (system, _mock) = system_with_mock();
    system.register_parameter("hint_volume", DataScope::LevelSpecific).expect("register");
    let master =
        system.register_parameter("master_volume", DataScope::Global).expect("register");
    let seen = collect_outcomes(&system, SystemEvents::DATA_OPS);

    system.reload_controls_data("gamehints", Some("volcano"), RequestUserData::with_cookie(11));
    system.external_update();

    assert_eq!(system.parameter_id("hint_volume"), None);
    assert_eq!(system.parameter_id("master_volume"), Some(master));
    let infos = seen.lock().unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].kind, RequestKind::ReloadControls);
    assert!(infos[0].status.is_success());
    assert_eq!(infos[0].cookie, Some(11));
}

/// Contract: trigger data loads and explicit preload unloads reach the
/// implementation in order; unregistered ids are rejected without a
/// middleware call.
#[test]
fn trigger_and_preload_data_ops_flow_through() {
    let (system, mock) = system_with_mock();
    let stinger = system.register_trigger("stinger", DataScope::Global).expect("register");
    let bank = system
        .register_preload_request("music_bank", DataScope::Global, false)
        .expect("register preload");
    let seen = collect_outcomes(&system, SystemEvents::DATA_OPS);

    system.load_trigger(stinger, RequestUserData::default());
    system.preload_single_request(bank, false, RequestUserData::default());
    system.unload_single_request(bank, RequestUserData::default());
    system.unload_trigger(stinger, RequestUserData::default());
    system.external_update();

    let relevant: Vec<MockCall> = mock
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                MockCall::LoadTriggerData { .. }
                    | MockCall::Preload { .. }
                    | MockCall::UnloadPreload { .. }
                    | MockCall::UnloadTriggerData { .. }
            )
        })
        .collect();
    assert_eq!(
        relevant,
        vec![
            MockCall::LoadTriggerData { trigger: stinger },
            MockCall::Preload { preload: bank },
            MockCall::UnloadPreload { preload: bank },
            MockCall::UnloadTriggerData { trigger: stinger },
        ]
    );
    assert!(seen.lock().unwrap().iter().all(|info| info.status.is_success()));

    mock.clear_calls();
    system.load_trigger(ControlId(0xbad), RequestUserData::with_cookie(7));
    system.unload_single_request(PreloadRequestId(0xbad), RequestUserData::with_cookie(8));
    system.external_update();
    {
        let infos = seen.lock().unwrap();
        assert_eq!(infos.len(), 6);
        assert_eq!(infos[4].status, RequestStatus::Failure(FailureReason::UnknownControl));
        assert_eq!(infos[4].cookie, Some(7));
        assert_eq!(infos[5].status, RequestStatus::Failure(FailureReason::UnknownControl));
        assert_eq!(infos[5].cookie, Some(8));
    }
    assert!(mock.calls().is_empty(), "unknown ids never reach the implementation");
    system.release();
}

/// Contract: a preload pass restricted to auto-load entries skips requests
/// not marked auto-load, reporting success without touching the middleware.
#[test]
fn auto_load_only_skips_manual_preloads() {
    let (system, mock) = system_with_mock();
    let manual = system
        .register_preload_request("manual_bank", DataScope::Global, false)
        .expect("register preload");
    let seen = collect_outcomes(&system, SystemEvents::DATA_OPS);

    system.preload_single_request(manual, true, RequestUserData::default());
    system.external_update();
    assert!(
        !mock.calls().iter().any(|c| matches!(c, MockCall::Preload { .. })),
        "manual bank skipped in an auto-load pass"
    );
    assert!(seen.lock().unwrap()[0].status.is_success(), "skip is not an error");

    system.preload_single_request(manual, false, RequestUserData::default());
    system.external_update();
    assert!(mock
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::Preload { preload } if *preload == manual)));
    system.release();
}

/// Contract: focus, mute, stop-all and language notifications reach the
/// implementation in order.
#[test]
fn system_state_hooks_reach_middleware() {
    let (system, mock) = system_with_mock();
    system.lost_focus(RequestUserData::default());
    system.got_focus(RequestUserData::default());
    system.mute_all(RequestUserData::default());
    system.unmute_all(RequestUserData::default());
    system.stop_all_sounds(RequestUserData::default());
    system.on_language_changed();
    system.external_update();

    let relevant: Vec<MockCall> = mock
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                MockCall::LostFocus
                    | MockCall::GotFocus
                    | MockCall::MuteAll
                    | MockCall::UnmuteAll
                    | MockCall::StopAllSounds
                    | MockCall::LanguageChanged
            )
        })
        .collect();
    assert_eq!(
        relevant,
        vec![
            MockCall::LostFocus,
            MockCall::GotFocus,
            MockCall::MuteAll,
            MockCall::UnmuteAll,
            MockCall::StopAllSounds,
            MockCall::LanguageChanged,
        ]
    );
    system.release();
}
