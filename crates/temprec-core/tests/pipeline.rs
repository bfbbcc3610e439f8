//! End-to-end pipeline tests against the mock radio.
//!
//! Every test runs with paused time, so scan windows expire instantly and
//! event ordering is deterministic.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use temprec_core::radio::status;
use temprec_core::uuid::{CLIENT_CHARACTERISTIC_CONFIG, TEMPERATURE_CHARACTERISTIC, THERMO_SERVICE};
use temprec_core::{
    Client, ClientConfig, DeviceIdentity, FailureReason, GattCharacteristic, GattService,
    LinkEvent, LinkHandle, LinkState, MockRadio, Operation, PolicyGate, RadioCall, RunOutcome,
    ScanOutcome, SessionState, TelemetryEvent, TelemetryReceiver, telemetry_channel,
};

fn thermo_device() -> DeviceIdentity {
    DeviceIdentity::new("mock-esp32", "24:0A:C4:00:00:01")
}

fn client(radio: &Arc<MockRadio>, gate: Arc<PolicyGate>) -> (Client, TelemetryReceiver) {
    let (sink, rx) = telemetry_channel();
    let client = Client::new(radio.clone(), gate, sink, ClientConfig::default()).unwrap();
    (client, rx)
}

fn drain(rx: &mut TelemetryReceiver) -> Vec<TelemetryEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Event kinds without payloads, for order assertions.
fn kinds(events: &[TelemetryEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            TelemetryEvent::Scanning { .. } => "scanning",
            TelemetryEvent::DeviceFound { .. } => "device_found",
            TelemetryEvent::Connecting { .. } => "connecting",
            TelemetryEvent::DiscoveringServices => "discovering_services",
            TelemetryEvent::EnablingNotifications => "enabling_notifications",
            TelemetryEvent::Reading { .. } => "reading",
            TelemetryEvent::DecodeFailed { .. } => "decode_failed",
            TelemetryEvent::Disconnected => "disconnected",
            TelemetryEvent::Error { .. } => "error",
            _ => "other",
        })
        .collect()
}

// =============================================================================
// Scan window
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_stops_once_and_reports_once() {
    let radio = Arc::new(MockRadio::builder().build());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let started = tokio::time::Instant::now();
    let outcome = client.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, RunOutcome::Scan(ScanOutcome::TimedOut));
    assert!(started.elapsed() >= Duration::from_millis(10_000));
    assert_eq!(radio.count(RadioCall::StopScan).await, 1);
    assert_eq!(radio.count(RadioCall::Connect).await, 0);

    let events = drain(&mut rx);
    assert_eq!(kinds(&events), vec!["scanning", "error"]);
    assert_eq!(
        events[1],
        TelemetryEvent::Error {
            reason: FailureReason::ScanTimedOut
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_match_after_other_devices() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(DeviceIdentity::new("a", "11:11:11:11:11:11"), None)
            .advertise(DeviceIdentity::new("b", "22:22:22:22:22:22"), Some("esp32-thermo"))
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .advertisement_interval(Duration::from_secs(2))
            .build(),
    );
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.scan().await.unwrap().outcome().await.unwrap();
    assert_eq!(outcome.device().map(|d| d.id.as_str()), Some("mock-esp32"));
    assert_eq!(radio.count(RadioCall::StopScan).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_match_after_window_closes_is_not_reported() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .advertisement_interval(Duration::from_secs(30))
            .build(),
    );
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.scan().await.unwrap().outcome().await.unwrap();
    assert_eq!(outcome, ScanOutcome::TimedOut);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let events = drain(&mut rx);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TelemetryEvent::DeviceFound { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_scan_while_pending_is_rejected() {
    let radio = Arc::new(MockRadio::builder().build());
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let first = client.scan().await.unwrap();
    let second = client.scan().await;
    assert!(matches!(second, Err(temprec_core::Error::ScanInProgress)));

    assert_eq!(first.outcome().await.unwrap(), ScanOutcome::TimedOut);
    assert_eq!(radio.count(RadioCall::StartScan).await, 1);

    // The window is free again once resolved.
    let third = client.scan().await.unwrap();
    third.stop();
    assert_eq!(third.outcome().await.unwrap(), ScanOutcome::Stopped);
    assert!(!client.scanner().is_scanning().await);
}

#[tokio::test(start_paused = true)]
async fn test_double_stop_and_stop_without_scan_are_silent() {
    let radio = Arc::new(MockRadio::builder().build());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    client.scanner().stop_scan().await;
    assert!(radio.calls().await.is_empty());
    assert!(drain(&mut rx).is_empty());

    let handle = client.scan().await.unwrap();
    client.scanner().stop_scan().await;
    client.scanner().stop_scan().await;
    handle.stop();

    assert_eq!(handle.outcome().await.unwrap(), ScanOutcome::Stopped);
    assert_eq!(radio.count(RadioCall::StopScan).await, 1);
    assert_eq!(kinds(&drain(&mut rx)), vec!["scanning"]);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_scanning_frees_scanner_and_reports_nothing() {
    let radio = Arc::new(MockRadio::builder().build());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let close = CancellationToken::new();
    close.cancel();
    let started = tokio::time::Instant::now();
    let outcome = client.run(close).await.unwrap();
    assert_eq!(outcome, RunOutcome::Closed);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!client.scanner().is_scanning().await);
    assert_eq!(radio.count(RadioCall::StopScan).await, 1);

    // A second run starts straight away instead of hitting ScanInProgress.
    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Scan(ScanOutcome::TimedOut));
    assert_eq!(radio.count(RadioCall::StartScan).await, 2);

    // Only the second window reports a timeout, and long after the close.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let events = drain(&mut rx);
    assert_eq!(kinds(&events), vec!["scanning", "scanning", "error"]);
    assert_eq!(
        events[2],
        TelemetryEvent::Error {
            reason: FailureReason::ScanTimedOut
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_scan_start_error_maps_to_internal_code() {
    let radio = Arc::new(MockRadio::builder().scan_start_error().build());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Scan(ScanOutcome::Failed(FailureReason::ScanFailed(
            status::SCAN_FAILED_INTERNAL_ERROR
        )))
    );
    assert_eq!(radio.count(RadioCall::StopScan).await, 0);
    assert_eq!(kinds(&drain(&mut rx)), vec!["scanning", "error"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_adapter_is_reported() {
    let radio = Arc::new(MockRadio::builder().adapter_unavailable().build());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Scan(ScanOutcome::Failed(FailureReason::AdapterUnavailable))
    );
    let events = drain(&mut rx);
    assert_eq!(
        events.last().and_then(TelemetryEvent::failure),
        Some(FailureReason::AdapterUnavailable)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reported_scan_failure_skips_window() {
    let radio = Arc::new(MockRadio::builder().scan_failure(2).build());
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let started = tokio::time::Instant::now();
    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Scan(ScanOutcome::Failed(FailureReason::ScanFailed(2)))
    );
    assert!(started.elapsed() < Duration::from_millis(10_000));
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_happy_path_event_order() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let handle = client.start();
    radio.wait_for_subscription().await;
    radio.notify(b"23.5").await;
    radio.notify(b"23.6").await;
    radio.drop_link(status::SUCCESS).await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome, RunOutcome::Session(SessionState::Disconnected));

    let events = drain(&mut rx);
    assert_eq!(
        kinds(&events),
        vec![
            "scanning",
            "device_found",
            "connecting",
            "discovering_services",
            "enabling_notifications",
            "reading",
            "reading",
            "disconnected",
        ]
    );
    match &events[5] {
        TelemetryEvent::Reading { reading } => {
            assert_eq!(reading.text, "23.5");
            assert_eq!(reading.to_string(), "Temperature: 23.5 °C");
        }
        other => panic!("expected reading, got {:?}", other),
    }

    assert_eq!(
        radio.calls().await,
        vec![
            RadioCall::StartScan,
            RadioCall::StopScan,
            RadioCall::Connect,
            RadioCall::DiscoverServices,
            RadioCall::EnableNotification,
            RadioCall::WriteDescriptor,
        ]
    );

    let writes = radio.descriptor_writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].characteristic, TEMPERATURE_CHARACTERISTIC);
    assert_eq!(writes[0].descriptor, CLIENT_CHARACTERISTIC_CONFIG);
    assert_eq!(writes[0].value, vec![0x01, 0x00]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic_is_target_not_found() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .services(vec![GattService::new(THERMO_SERVICE).with_characteristic(
                GattCharacteristic::new(uuid::Uuid::from_u128(0xdead)),
            )])
            .build(),
    );
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::TargetNotFound))
    );

    let events = drain(&mut rx);
    assert!(!kinds(&events).contains(&"enabling_notifications"));
    assert_eq!(
        events.last(),
        Some(&TelemetryEvent::Error {
            reason: FailureReason::TargetNotFound
        })
    );
    assert_eq!(radio.count(RadioCall::EnableNotification).await, 0);
    assert_eq!(radio.count(RadioCall::WriteDescriptor).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_service_is_target_not_found() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .services(Vec::new())
            .build(),
    );
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::TargetNotFound))
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_cccd_fails_notification_setup() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .services(vec![GattService::new(THERMO_SERVICE).with_characteristic(
                GattCharacteristic::new(TEMPERATURE_CHARACTERISTIC),
            )])
            .build(),
    );
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::NotificationSetupFailed))
    );
    assert_eq!(radio.count(RadioCall::WriteDescriptor).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_cccd_write_fails_notification_setup() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .descriptor_write_error()
            .build(),
    );
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::NotificationSetupFailed))
    );
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_status_is_link_error() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .discovery_status(status::GATT_FAILURE)
            .build(),
    );
    let (client, _rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::LinkError(
            status::GATT_FAILURE
        )))
    );
    assert_eq!(radio.count(RadioCall::EnableNotification).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_streaming_stops_readings() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let handle = client.start();
    radio.wait_for_subscription().await;
    let link = radio.current_link().await.unwrap();
    radio.notify(b"20.0").await;
    radio.drop_link(0x08).await;
    radio
        .emit_link_event(LinkEvent::ValueChanged {
            link,
            characteristic: TEMPERATURE_CHARACTERISTIC,
            value: bytes::Bytes::from_static(b"99.9"),
        })
        .await;

    assert_eq!(
        handle.wait().await.unwrap(),
        RunOutcome::Session(SessionState::Disconnected)
    );

    let events = drain(&mut rx);
    let readings = events
        .iter()
        .filter(|e| matches!(e, TelemetryEvent::Reading { .. }))
        .count();
    assert_eq!(readings, 1);
    assert_eq!(events.last(), Some(&TelemetryEvent::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_decode_error_keeps_streaming() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let handle = client.start();
    radio.wait_for_subscription().await;
    radio.notify(&[0xc3, 0x28]).await;
    radio.notify(b"").await;
    radio.notify(b"21.25").await;

    let mut state = handle.watch_state();
    state
        .wait_for(|s| *s == SessionState::Streaming)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.state(), SessionState::Streaming);

    handle.close();
    handle.wait().await.unwrap();

    let events = drain(&mut rx);
    let kinds = kinds(&events);
    assert_eq!(kinds.iter().filter(|k| **k == "decode_failed").count(), 2);
    let decode_pos = kinds.iter().position(|k| *k == "decode_failed").unwrap();
    let reading_pos = kinds.iter().position(|k| *k == "reading").unwrap();
    assert!(reading_pos > decode_pos);
    assert_eq!(kinds.last(), Some(&"disconnected"));
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_status_is_link_error() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .connect_status(status::CONNECTION_TIMEOUT)
            .build(),
    );
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::LinkError(
            status::CONNECTION_TIMEOUT
        )))
    );
    assert_eq!(radio.count(RadioCall::DiscoverServices).await, 0);
    assert!(!kinds(&drain(&mut rx)).contains(&"discovering_services"));
}

#[tokio::test(start_paused = true)]
async fn test_events_for_stale_link_are_ignored() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let handle = client.start();
    radio.wait_for_subscription().await;
    radio
        .emit_link_event(LinkEvent::StateChanged {
            link: LinkHandle::from_raw(u64::MAX),
            status: status::SUCCESS,
            state: LinkState::Disconnected,
        })
        .await;
    radio
        .emit_link_event(LinkEvent::ValueChanged {
            link: LinkHandle::from_raw(u64::MAX),
            characteristic: TEMPERATURE_CHARACTERISTIC,
            value: bytes::Bytes::from_static(b"1.0"),
        })
        .await;
    radio.notify(b"22.0").await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.state(), SessionState::Streaming);

    handle.close();
    handle.wait().await.unwrap();
    let events = drain(&mut rx);
    let readings: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TelemetryEvent::Reading { reading } => Some(reading.text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(readings, vec!["22.0".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_radio_keeps_stage_order() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .latency(Duration::from_millis(250))
            .build(),
    );
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::default()));

    let handle = client.start();
    radio.wait_for_subscription().await;
    handle.close();
    handle.wait().await.unwrap();

    assert_eq!(
        kinds(&drain(&mut rx)),
        vec![
            "scanning",
            "device_found",
            "connecting",
            "discovering_services",
            "enabling_notifications",
            "disconnected",
        ]
    );
}

// =============================================================================
// Capability gate
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_denied_scan_never_starts_radio() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, mut rx) = client(&radio, Arc::new(PolicyGate::allow_all().deny(Operation::Scan)));

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Scan(ScanOutcome::Failed(FailureReason::PermissionDenied(
            Operation::Scan
        )))
    );
    assert!(radio.calls().await.is_empty());
    assert_eq!(kinds(&drain(&mut rx)), vec!["error"]);
}

#[tokio::test(start_paused = true)]
async fn test_denied_connect_never_connects() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, _rx) = client(
        &radio,
        Arc::new(PolicyGate::allow_all().deny(Operation::Connect)),
    );

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::PermissionDenied(
            Operation::Connect
        )))
    );
    assert_eq!(radio.count(RadioCall::Connect).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_revoked_before_link_up() {
    let radio = Arc::new(
        MockRadio::builder()
            .advertise(thermo_device(), Some("ESP32-Thermo"))
            .manual_connect()
            .build(),
    );
    let gate = Arc::new(PolicyGate::default());
    let (client, _rx) = client(&radio, gate.clone());

    let handle = client.start();
    let mut state = handle.watch_state();
    state
        .wait_for(|s| *s == SessionState::Connecting)
        .await
        .unwrap();

    gate.revoke(Operation::Connect);
    radio.complete_connect(status::SUCCESS).await;

    assert_eq!(
        handle.wait().await.unwrap(),
        RunOutcome::Session(SessionState::Error(FailureReason::PermissionDenied(
            Operation::Connect
        )))
    );
    assert_eq!(radio.count(RadioCall::DiscoverServices).await, 0);
    assert_eq!(gate.queries(Operation::Connect), 2);
}

#[tokio::test(start_paused = true)]
async fn test_denied_subscribe_never_touches_cccd() {
    let radio = Arc::new(MockRadio::thermometer());
    let (client, _rx) = client(
        &radio,
        Arc::new(PolicyGate::allow_all().deny(Operation::Subscribe)),
    );

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::PermissionDenied(
            Operation::Subscribe
        )))
    );
    assert_eq!(radio.count(RadioCall::EnableNotification).await, 0);
    assert_eq!(radio.count(RadioCall::WriteDescriptor).await, 0);
    // The link is released after the failure.
    assert_eq!(radio.count(RadioCall::Disconnect).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_revocation_while_streaming_does_not_stop_delivery() {
    let radio = Arc::new(MockRadio::thermometer());
    let gate = Arc::new(PolicyGate::default());
    let (client, mut rx) = client(&radio, gate.clone());

    let handle = client.start();
    radio.wait_for_subscription().await;
    for op in [Operation::Scan, Operation::Connect, Operation::Subscribe] {
        gate.revoke(op);
    }
    radio.notify(b"19.5").await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(handle.state(), SessionState::Streaming);
    handle.close();
    handle.wait().await.unwrap();
    assert!(kinds(&drain(&mut rx)).contains(&"reading"));
}

#[tokio::test(start_paused = true)]
async fn test_gate_closure() {
    let radio = Arc::new(MockRadio::thermometer());
    let (sink, _rx) = telemetry_channel();
    let gate = Arc::new(|op: Operation| op != Operation::Connect);
    let client = Client::new(radio.clone(), gate, sink, ClientConfig::default()).unwrap();

    let outcome = client.run(CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Session(SessionState::Error(FailureReason::PermissionDenied(
            Operation::Connect
        )))
    );
}
