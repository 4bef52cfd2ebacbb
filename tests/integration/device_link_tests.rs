//! `SerialDeviceLink` against the in-memory loopback connector.
//!
//! The device side is scripted per test: answer, stay silent, push events,
//! or refuse to reconnect.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use super::mock_ports::RecordingSleeper;

use divinofax::app::ports::DeviceLink;
use divinofax::config::LinkConfig;
use divinofax::error::TransportError;
use divinofax::link::LinkState;
use divinofax::link::client::SerialDeviceLink;
use divinofax::link::loopback::{DeviceEnd, LoopbackConnector, LoopbackDevice, Reply};
use divinofax::link::protocol::{PushEvent, Request, Response, trigger_from_push};

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> LinkConfig {
    LinkConfig {
        settle_delay_ms: 0,
        command_timeout_ms: 500,
        heartbeat_interval_ms: 20,
        heartbeat_timeout_ms: 100,
        miss_threshold: 3,
        backoff_initial_ms: 1_000,
        backoff_max_ms: 8_000,
        reconnect_attempts: 3,
        ..LinkConfig::default()
    }
}

/// Open a link, answer its handshake on a helper thread, and hand the
/// device end back for the test to drive by hand.
fn open_manual() -> (SerialDeviceLink<LoopbackConnector>, LoopbackDevice, DeviceEnd) {
    let (connector, device) = LoopbackConnector::pair();
    let helper = thread::spawn(move || {
        let mut end = device.accept(WAIT).expect("host never connected");
        let handshake = end.next_command(WAIT).expect("no handshake");
        end.respond(&Response::ok(handshake.id, json!({"firmware_version": "2.0.0"})));
        (device, end)
    });
    let link = SerialDeviceLink::open(connector, fast_config());
    let (device, end) = helper.join().unwrap();
    assert_eq!(link.status().state, LinkState::Connected);
    (link, device, end)
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let started = Instant::now();
    while !cond() {
        assert!(started.elapsed() < Duration::from_secs(5), "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

// ── Correlation ───────────────────────────────────────────────

#[test]
fn out_of_order_responses_reach_their_callers() {
    let (link, _device, mut end) = open_manual();

    thread::scope(|s| {
        let rfid = s.spawn(|| link.send(Request::read_rfid(), WAIT));
        let first = end.next_command(WAIT).expect("first command");
        let status = s.spawn(|| link.send(Request::get_status(), WAIT));
        let second = end.next_command(WAIT).expect("second command");
        assert!(second.id > first.id);

        // Answer in reverse order, echoing the command name.
        for cmd in [&second, &first] {
            let name = serde_json::to_value(cmd.request.command).unwrap();
            end.respond(&Response::ok(cmd.id, name));
        }

        assert_eq!(rfid.join().unwrap().unwrap().result, json!("read_rfid"));
        assert_eq!(status.join().unwrap().unwrap().result, json!("get_status"));
    });
}

#[test]
fn uncorrelated_and_malformed_lines_are_discarded() {
    let (link, _device, end) = open_manual();
    let server = thread::spawn(move || {
        let mut end = end;
        let cmd = end.next_command(WAIT).expect("command");
        end.write_line("this is not json");
        end.write_line(r#"{"id": "nope"}"#);
        end.respond(&Response::ok(cmd.id + 1_000, json!("stray")));
        end.respond(&Response::ok(cmd.id, json!({"rfid": "042"})));
        end
    });

    let response = link.send(Request::read_rfid(), WAIT).unwrap();
    assert_eq!(response.result, json!({"rfid": "042"}));
    let _end = server.join().unwrap();
    assert_eq!(link.status().state, LinkState::Connected);
}

#[test]
fn device_error_status_is_returned_not_raised() {
    let (link, _device, end) = open_manual();
    let server = thread::spawn(move || {
        end.serve(|cmd| Reply::Error("reader offline".into()).for_command(cmd));
    });

    let response = link.send(Request::read_rfid(), WAIT).unwrap();
    assert!(!response.is_ok());
    assert_eq!(response.message.as_deref(), Some("reader offline"));
    drop(link);
    server.join().unwrap();
}

#[test]
fn timeout_is_reported_once_without_retry() {
    let (link, _device, mut end) = open_manual();

    let started = Instant::now();
    let err = link
        .send(Request::read_rfid(), Duration::from_millis(150))
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(150));

    // Exactly one command went out.
    let sent = end.next_command(Duration::from_millis(100)).expect("the command");
    assert!(end.next_command(Duration::from_millis(200)).is_none());

    // A late answer for it is dropped; the link stays usable.
    end.respond(&Response::ok(sent.id, json!(null)));
    let server = thread::spawn(move || {
        end.serve(|cmd| Reply::Ok(json!("fresh")).for_command(cmd));
    });
    let response = link.send(Request::get_status(), WAIT).unwrap();
    assert_eq!(response.result, json!("fresh"));
    drop(link);
    server.join().unwrap();
}

// ── Push events ───────────────────────────────────────────────

#[test]
fn push_events_reach_every_subscriber() {
    let (link, _device, end) = open_manual();
    let first = link.subscribe();
    let second = link.subscribe();

    end.push(&PushEvent::rfid_detected("123456789012"));

    for events in [&first, &second] {
        let event = events.recv_timeout(WAIT).expect("push event");
        let trigger = trigger_from_push(&event, 7).unwrap().expect("detection");
        assert_eq!(trigger.tag.as_str(), "123456789012");
        assert_eq!(trigger.observed_at_ms, 7);
    }
}

#[test]
fn push_interleaved_with_response_is_demultiplexed() {
    let (link, _device, end) = open_manual();
    let events = link.subscribe();
    let server = thread::spawn(move || {
        let mut end = end;
        let cmd = end.next_command(WAIT).expect("command");
        end.push(&PushEvent::rfid_detected("555"));
        end.respond(&Response::ok(cmd.id, json!("done")));
        end
    });

    let response = link.send(Request::get_status(), WAIT).unwrap();
    assert_eq!(response.result, json!("done"));
    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event.tag(), Some("555"));
    let _end = server.join().unwrap();
}

// ── Heartbeat / reconnect ─────────────────────────────────────

#[test]
fn scenario_c_missed_heartbeats_back_off_then_degrade() {
    let (connector, device) = LoopbackConnector::pair();
    let answered = Arc::new(AtomicU32::new(0));
    let answered_by_device = Arc::clone(&answered);
    // Answer the handshake, then go silent.
    let responder = device.serve_next(WAIT, move |cmd| {
        if answered_by_device.fetch_add(1, Ordering::AcqRel) == 0 {
            Reply::Ok(json!({})).for_command(cmd)
        } else {
            None
        }
    });

    let sleeper = RecordingSleeper::default();
    let link = SerialDeviceLink::with_sleeper(connector, fast_config(), Box::new(sleeper.clone()));
    assert_eq!(link.status().state, LinkState::Connected);
    device.refuse_connections(true);
    let events = link.subscribe();

    let running = AtomicBool::new(true);
    link.run_heartbeat(&running);

    assert_eq!(
        sleeper.recorded(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert_eq!(device.connect_attempts(), 4);
    assert_eq!(link.status().state, LinkState::Degraded);
    assert_eq!(
        link.send(Request::get_status(), WAIT),
        Err(TransportError::Unavailable)
    );

    let mut events = events;
    assert!(events.next().is_none(), "push stream ends when degraded");
    assert!(link.subscribe().next().is_none());
    responder.join().unwrap();
}

#[test]
fn missed_heartbeats_reconnect_to_a_fresh_session() {
    let (connector, device) = LoopbackConnector::pair();
    let answered = Arc::new(AtomicU32::new(0));
    let answered_by_device = Arc::clone(&answered);
    let silent_after_handshake = device.serve_next(WAIT, move |cmd| {
        if answered_by_device.fetch_add(1, Ordering::AcqRel) == 0 {
            Reply::Ok(json!({"firmware_version": "1.0.0"})).for_command(cmd)
        } else {
            None
        }
    });

    let sleeper = RecordingSleeper::default();
    let link = Arc::new(SerialDeviceLink::with_sleeper(
        connector,
        fast_config(),
        Box::new(sleeper.clone()),
    ));
    assert_eq!(link.status().state, LinkState::Connected);

    // The next connection gets a healthy device.
    let healthy = device.serve_next(Duration::from_secs(5), |cmd| {
        Reply::Ok(json!({"firmware_version": "1.0.1"})).for_command(cmd)
    });

    let running = Arc::new(AtomicBool::new(true));
    let heartbeat = {
        let link = Arc::clone(&link);
        let running = Arc::clone(&running);
        thread::spawn(move || link.run_heartbeat(&running))
    };

    wait_until("reconnect", || {
        device.connect_attempts() >= 2
            && link
                .status()
                .device
                .is_some_and(|d| d.firmware_version == "1.0.1")
    });
    assert_eq!(link.status().state, LinkState::Connected);
    assert_eq!(sleeper.recorded().first(), Some(&Duration::from_secs(1)));

    running.store(false, Ordering::Release);
    heartbeat.join().unwrap();
    silent_after_handshake.join().unwrap();
    drop(link);
    healthy.join().unwrap();
}

#[test]
fn unplugged_device_triggers_reconnect() {
    let (link, device, end) = open_manual();
    let link = Arc::new(link);
    drop(end);

    let healthy = device.serve_next(Duration::from_secs(5), |cmd| {
        Reply::Ok(json!({})).for_command(cmd)
    });
    let running = Arc::new(AtomicBool::new(true));
    let heartbeat = {
        let link = Arc::clone(&link);
        let running = Arc::clone(&running);
        thread::spawn(move || link.run_heartbeat(&running))
    };

    wait_until("second connection", || device.connect_attempts() >= 2);
    wait_until("connected", || link.status().state == LinkState::Connected);

    running.store(false, Ordering::Release);
    heartbeat.join().unwrap();
    drop(link);
    healthy.join().unwrap();
}
