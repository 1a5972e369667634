mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use robo_shell_lib::serial::SerialError;
use robo_shell_lib::{Client, ClientConfig, ClientError, Measurement, TransportState};

fn short_timeout(ms: u64) -> ClientConfig {
    ClientConfig { response_timeout_ms: ms, ..ClientConfig::default() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_round_trip_returns_measurement() {
    let rig = common::started_rig().await;
    let _responder = rig.device.spawn_responder(|request| {
        assert_eq!(request, b"{\"pretty_please\":1}\r");
        vec![r#"{"distance_mm":100,"timestamp_ms":5000}"#.to_string()]
    });

    let client = Client::new(Arc::clone(&rig.transport));
    let measurement = client.request_measurement().await.expect("measurement");
    assert_eq!(measurement, Measurement { distance_mm: 100, timestamp_ms: Some(5000) });

    let history = client.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].measurement, measurement);
    rig.transport.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_log_text_is_routed_to_sink() {
    let rig = common::started_rig().await;
    let _responder = rig.device.spawn_responder(|_| {
        vec![
            "Received request".to_string(),
            r#"I (812) sensor: echo ok {"distance_mm":42,"timestamp_ms":812}"#.to_string(),
        ]
    });

    let client = Client::new(Arc::clone(&rig.transport));
    assert_eq!(client.request_measurement().await.unwrap().distance_mm, 42);
    assert_eq!(
        rig.sink.lines(),
        vec!["Received request".to_string(), "I (812) sensor: echo ok".to_string()]
    );
    rig.transport.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_garbage_is_skipped_until_valid_reply() {
    let rig = common::started_rig().await;
    let _responder = rig.device.spawn_responder(|_| {
        vec![
            r#"{"distance_mm":"#.to_string(),
            r#"{"status":"busy"}"#.to_string(),
            r#"{"distance_mm":7,"timestamp_ms":9}"#.to_string(),
        ]
    });

    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(500));
    let measurement = client.request_measurement().await.unwrap();
    assert_eq!(measurement.distance_mm, 7);
    assert_eq!(client.history().await.len(), 1);
    rig.transport.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_garbage_does_not_extend_deadline() {
    let rig = common::started_rig().await;
    let device = Arc::clone(&rig.device);
    // Keep the queue busy with unparseable payloads for longer than the deadline.
    let noise = std::thread::spawn(move || {
        for _ in 0..40 {
            device.inject_line(r#"{"distance_mm": oops}"#);
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(200));
    let started = Instant::now();
    let err = client.request_measurement().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::ResponseTimeout(t) if t == Duration::from_millis(200)));
    assert!(elapsed >= Duration::from_millis(200), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "deadline was extended: {elapsed:?}");
    assert!(client.history().await.is_empty());

    noise.join().unwrap();
    rig.transport.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_device_times_out() {
    let rig = common::started_rig().await;
    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(100));
    assert!(matches!(
        client.request_measurement().await,
        Err(ClientError::ResponseTimeout(_))
    ));
    rig.transport.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_reply_is_not_mistaken_for_next_answer() {
    let rig = common::started_rig().await;
    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(100));
    assert!(client.request_measurement().await.is_err());

    // The late reply to the timed-out request lands before the next request.
    rig.device.inject_line(r#"{"distance_mm":1,"timestamp_ms":1}"#);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let _responder = rig
        .device
        .spawn_responder(|_| vec![r#"{"distance_mm":2,"timestamp_ms":2}"#.to_string()]);
    assert_eq!(client.request_measurement().await.unwrap().distance_mm, 2);
    rig.transport.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_fails_fast_instead_of_hanging() {
    let rig = common::started_rig().await;
    let mut state = rig.transport.subscribe_state();
    rig.device.disconnect();

    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| matches!(s, TransportState::Failed(_))))
        .await
        .expect("state change")
        .expect("watch open");

    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(5_000));
    let started = Instant::now();
    let err = client.request_measurement().await.unwrap_err();
    assert!(matches!(err, ClientError::Serial(SerialError::Disconnected)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));

    rig.transport.stop().await;
    assert_eq!(rig.transport.state(), TransportState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_payloads_drain_before_disconnect_is_reported() {
    let rig = common::started_rig().await;
    rig.device.inject_line(r#"{"distance_mm":5}"#);
    tokio::time::sleep(Duration::from_millis(80)).await;
    rig.device.disconnect();

    assert_eq!(rig.transport.receive().await.unwrap(), br#"{"distance_mm":5}"#);
    assert!(matches!(rig.transport.receive().await, Err(SerialError::Disconnected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_and_stop_are_idempotent() {
    let rig = common::rig(Default::default());
    assert_eq!(rig.transport.state(), TransportState::Stopped);
    rig.transport.stop().await;

    rig.transport.start().await.unwrap();
    // The mock link can only be opened once, so a second open would fail.
    rig.transport.start().await.unwrap();
    assert_eq!(rig.transport.state(), TransportState::Running);
    assert_eq!(rig.transport.port_name().await.as_deref(), Some("mock://esp32"));

    rig.transport.stop().await;
    rig.transport.stop().await;
    assert_eq!(rig.transport.state(), TransportState::Stopped);
    assert!(matches!(rig.transport.receive().await, Err(SerialError::NotRunning)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_unblocks_waiting_receiver() {
    let rig = common::started_rig().await;
    let transport = Arc::clone(&rig.transport);
    let waiter = tokio::spawn(async move { transport.receive().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    rig.transport.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("receiver woke up")
        .unwrap();
    assert!(matches!(result, Err(SerialError::NotRunning)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_times_out_while_another_consumer_holds_queue() {
    let rig = common::started_rig().await;
    let transport = Arc::clone(&rig.transport);
    let parked = tokio::spawn(async move { transport.receive().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(100));
    let result = tokio::time::timeout(Duration::from_secs(2), client.request_measurement())
        .await
        .expect("request must honour its own deadline");
    assert!(matches!(result, Err(ClientError::ResponseTimeout(_))));

    rig.transport.stop().await;
    let parked = tokio::time::timeout(Duration::from_secs(2), parked)
        .await
        .expect("parked receiver woke up")
        .unwrap();
    assert!(matches!(parked, Err(SerialError::NotRunning)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reply_with_trailing_text_is_discarded() {
    let rig = common::started_rig().await;
    let _responder = rig.device.spawn_responder(|_| {
        vec![
            r#"{"distance_mm":5} done"#.to_string(),
            r#"{"distance_mm":6,"timestamp_ms":2}"#.to_string(),
        ]
    });

    let client = Client::with_config(Arc::clone(&rig.transport), &short_timeout(500));
    assert_eq!(client.request_measurement().await.unwrap().distance_mm, 6);
    assert_eq!(client.history().await.len(), 1);
    rig.transport.stop().await;
}
