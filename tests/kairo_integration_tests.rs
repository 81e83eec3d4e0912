// tests/kairo_integration_tests.rs
// Full-pipeline scenarios: probe -> monitor -> policy -> network client

use kairo::{
    HealthLevel, HealthSnapshot, Kairo, KairoConfig, KairoError, MockProbe, MockTransport,
    NetReachability, NetworkRequest, OperationKind, RequestPriority, ThermalState,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn snapshot(battery: f64, thermal: ThermalState, reach: NetReachability) -> HealthSnapshot {
    HealthSnapshot::new(battery, false, thermal, reach, false, false)
}

fn healthy() -> HealthSnapshot {
    snapshot(0.95, ThermalState::Nominal, NetReachability::Satisfied)
}

fn critical() -> HealthSnapshot {
    HealthSnapshot::new(
        0.02,
        true,
        ThermalState::Critical,
        NetReachability::RequiresConnection,
        true,
        true,
    )
}

fn test_config() -> KairoConfig {
    KairoConfig {
        debounce_ms: 80,
        tick_period_ms: 5000,
        ..Default::default()
    }
}

async fn started_facade(
    probe: Arc<MockProbe>,
    transport: Arc<MockTransport>,
) -> Kairo {
    let kairo = Kairo::with_transport(test_config(), probe, transport).unwrap();
    kairo.start().await;
    // Let the pump apply the initial snapshot.
    tokio::time::sleep(Duration::from_millis(50)).await;
    kairo
}

#[tokio::test]
#[serial]
async fn test_pipeline_derives_policy_and_sizes_gate() -> anyhow::Result<()> {
    kairo::logging::init();

    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    let kairo = started_facade(probe, transport.clone()).await;

    assert_eq!(kairo.current_policy().health_level, HealthLevel::High);
    assert_eq!(kairo.network_client().semaphore_status().max, 6);

    transport.enqueue_status(200);
    let response = kairo
        .network_client()
        .request(NetworkRequest::new("https://example.com"))
        .await?;
    assert!(response.is_success());

    kairo.stop().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_degradation_shrinks_the_gate_before_admissions() {
    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    let kairo = started_facade(probe.clone(), transport).await;

    let mut policies = kairo.policy_stream();
    assert_eq!(policies.recv().await.unwrap().health_level, HealthLevel::High);

    // Critical flip: published immediately, bypassing debounce.
    probe.emit_change(critical());

    let updated = tokio::time::timeout(Duration::from_secs(1), policies.recv())
        .await
        .expect("policy update within a second")
        .unwrap();
    assert_eq!(updated.health_level, HealthLevel::Critical);
    assert_eq!(updated.max_network_concurrent, 1);

    // The semaphore was resized before the policy became observable.
    assert_eq!(kairo.network_client().semaphore_status().max, 1);

    // Ordinary requests are refused by admission now.
    let error = kairo
        .network_client()
        .request(NetworkRequest::new("https://example.com"))
        .await
        .unwrap_err();
    assert_eq!(error, KairoError::Cancelled);

    kairo.stop().await;
}

#[tokio::test]
#[serial]
async fn test_debounce_coalesces_rapid_changes() {
    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    let kairo = started_facade(probe.clone(), transport).await;

    let mut stream = kairo.health_stream();
    let first = stream.recv().await.unwrap();
    assert_eq!(first.battery_level, 0.95);

    // Three significant, non-critical changes inside one debounce window.
    probe.emit_change(snapshot(0.7, ThermalState::Nominal, NetReachability::Satisfied));
    tokio::time::sleep(Duration::from_millis(20)).await;
    probe.emit_change(snapshot(0.5, ThermalState::Fair, NetReachability::Satisfied));
    tokio::time::sleep(Duration::from_millis(20)).await;
    probe.emit_change(snapshot(0.3, ThermalState::Fair, NetReachability::Satisfied));

    // Exactly one publish lands, carrying the latest values.
    let published = tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("debounced publish")
        .unwrap();
    assert_eq!(published.battery_level, 0.3);

    let extra = tokio::time::timeout(Duration::from_millis(150), stream.recv()).await;
    assert!(extra.is_err(), "burst must collapse to a single publish");

    kairo.stop().await;
}

#[tokio::test]
#[serial]
async fn test_no_two_publishes_within_debounce_unless_critical() {
    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    let kairo = started_facade(probe.clone(), transport).await;

    let mut stream = kairo.health_stream();
    let _initial = stream.recv().await.unwrap();

    probe.emit_change(snapshot(0.6, ThermalState::Fair, NetReachability::Satisfied));
    let first = tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .unwrap()
        .unwrap();
    let first_at = Instant::now();
    assert_eq!(first.battery_level, 0.6);

    // A critical flip right after is exempt from the window.
    probe.emit_change(critical());
    let second = tokio::time::timeout(Duration::from_millis(200), stream.recv())
        .await
        .expect("critical publish must not wait out the debounce")
        .unwrap();
    assert!(second.is_critical());
    assert!(first_at.elapsed() < Duration::from_millis(200));

    kairo.stop().await;
}

#[tokio::test]
#[serial]
async fn test_should_allow_tracks_published_health() {
    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    let kairo = started_facade(probe.clone(), transport).await;

    assert!(kairo.should_allow(OperationKind::MlInference));
    assert!(kairo.should_allow(OperationKind::VideoProcessing));

    probe.emit_change(critical());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!kairo.should_allow(OperationKind::MlInference));
    assert!(!kairo.should_allow(OperationKind::BackgroundTask));
    assert!(kairo.should_allow(OperationKind::NetworkRequest {
        priority: RequestPriority::Critical
    }));

    kairo.stop().await;
}

#[tokio::test]
#[serial]
async fn test_recovery_steps_policy_back_up() {
    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    let kairo = started_facade(probe.clone(), transport).await;

    let mut policies = kairo.policy_stream();
    let _ = policies.recv().await.unwrap();

    probe.emit_change(critical());
    let degraded = tokio::time::timeout(Duration::from_secs(1), policies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(degraded.health_level, HealthLevel::Critical);

    // Recovery climbs out through Low, one published snapshot at a time.
    probe.emit_change(healthy());
    let recovering = tokio::time::timeout(Duration::from_secs(1), policies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovering.health_level, HealthLevel::Low);

    kairo.stop().await;
}

#[tokio::test]
#[serial]
async fn test_stop_tears_down_streams_and_waiters() {
    let probe = Arc::new(MockProbe::new(healthy()));
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(Some(Duration::from_millis(100)));
    let kairo = started_facade(probe, transport).await;

    let mut health = kairo.health_stream();
    let mut policies = kairo.policy_stream();
    let _ = health.recv().await.unwrap();
    let _ = policies.recv().await.unwrap();

    // Keep one request in flight across the stop.
    let client = kairo.network_client();
    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request(NetworkRequest::new("https://example.com"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    kairo.stop().await;

    // Streams end.
    assert_eq!(health.recv().await, None);
    assert_eq!(policies.recv().await, None);

    // New work is refused.
    let error = client
        .request(NetworkRequest::new("https://example.com"))
        .await
        .unwrap_err();
    assert_eq!(error, KairoError::Cancelled);

    // The in-flight request finishes (admission happened before stop).
    let _ = in_flight.await.unwrap();

    assert!(!kairo.is_running());
}

#[tokio::test]
#[serial]
async fn test_probe_failures_do_not_disturb_consumers() {
    let config = KairoConfig {
        debounce_ms: 40,
        tick_period_ms: 80,
        ..Default::default()
    };
    let probe = Arc::new(MockProbe::new(healthy()));
    let kairo =
        Kairo::with_transport(config, probe.clone(), Arc::new(MockTransport::new())).unwrap();
    kairo.start().await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    probe.fail_next_read(kairo::ProbeError::ReadFailed {
        reason: "sensor glitch".into(),
    });
    probe.fail_next_read(kairo::ProbeError::Unavailable {
        reason: "bus contention".into(),
    });

    // Failed ticks pass; health and policy stay at the last good values.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(kairo.current_health().battery_level, 0.95);
    assert_eq!(kairo.current_policy().health_level, HealthLevel::High);

    kairo.stop().await;
}
