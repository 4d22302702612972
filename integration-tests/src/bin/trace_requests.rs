use std::time::Duration;

use audio_control::{
    AudioSystem, DataScope, ObjectSpec, RequestInfo, RequestUserData, SystemConfig, SystemEvents,
};
use audio_middleware::mock::MockMiddleware;

// Manual tool: runs a scripted request sequence against the recording
// middleware and prints every outcome and boundary call. Handy for eyeballing
// dispatch order without wading through test output.
fn main() {
    let config =
        SystemConfig { tick_interval: Duration::from_millis(10), ..SystemConfig::default() };
    let system = match AudioSystem::new(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start audio system: {e}");
            return;
        }
    };

    system.add_request_listener(
        |info: &RequestInfo| {
            println!(
                "outcome: {:?} target={:?} status={:?} cookie={:?}",
                info.kind, info.target, info.status, info.cookie
            );
        },
        None,
        SystemEvents::ALL,
    );

    let mock = MockMiddleware::new();
    system.set_impl(Some(Box::new(mock.clone())), RequestUserData::with_cookie(1));

    let trigger = match system.register_trigger("play_footstep", DataScope::Global) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Failed to register trigger: {e}");
            return;
        }
    };
    println!("registered play_footstep as {trigger:?}");

    let object = system.create_object(ObjectSpec::new().name("walker"));
    system.object(object).execute_trigger(trigger, RequestUserData::with_cookie(2));
    system.external_update();

    // Pretend the middleware finished everything it started.
    for event in mock.executed_events() {
        mock.report_event_finished(event, true);
    }
    system.external_update();

    system.release_object(object);
    system.external_update();

    println!("-- boundary calls --");
    for call in mock.calls() {
        println!("{call:?}");
    }

    system.release();
    println!("Done.");
}
