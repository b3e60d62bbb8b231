use std::time::Duration;
use tillpoint_sync::{
    ConnectionQuality, EventBus, MonitorConfig, NetworkMonitor, ProbeEndpoint, SyncEvent,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An endpoint nothing listens on; probes fail fast with connection refused.
fn dead_endpoint() -> ProbeEndpoint {
    ProbeEndpoint::new("http://127.0.0.1:9/", Duration::from_millis(500))
}

fn config_with(endpoints: Vec<ProbeEndpoint>) -> MonitorConfig {
    MonitorConfig {
        endpoints,
        ..MonitorConfig::default()
    }
}

async fn responsive_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

// ── Quality assessment ───────────────────────────────────────────

#[tokio::test]
async fn minority_success_is_poor_regardless_of_latency() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let monitor = NetworkMonitor::new(
        config_with(vec![
            ProbeEndpoint::new(server.uri(), Duration::from_secs(5)),
            dead_endpoint(),
            dead_endpoint(),
        ]),
        EventBus::new(),
    );

    let status = monitor.force_check().await;
    // One of three endpoints answered: online, but quality is capped at poor.
    assert!(status.online);
    assert_eq!(status.quality, ConnectionQuality::Poor);
    assert!(!monitor.is_good_enough_for_sync().await);
    assert_eq!(monitor.quality_score().await, 25);
}

#[tokio::test]
async fn majority_success_is_good_enough_for_sync() {
    let server = responsive_server().await;
    let endpoint = || ProbeEndpoint::new(server.uri(), Duration::from_secs(5));
    let monitor = NetworkMonitor::new(
        config_with(vec![endpoint(), endpoint(), endpoint()]),
        EventBus::new(),
    );

    let status = monitor.force_check().await;
    assert!(status.online);
    assert!(status.quality.good_enough_for_sync());
    assert!(monitor.is_good_enough_for_sync().await);
    assert!(status.latency_ms.is_some());
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test]
async fn total_failure_goes_offline_and_counts() {
    let monitor = NetworkMonitor::new(
        config_with(vec![dead_endpoint(), dead_endpoint()]),
        EventBus::new(),
    );

    let status = monitor.force_check().await;
    assert!(!status.online);
    assert_eq!(status.quality, ConnectionQuality::Offline);
    assert_eq!(status.consecutive_failures, 1);
    assert!(!monitor.is_online().await);

    let status = monitor.force_check().await;
    assert_eq!(status.consecutive_failures, 2);
}

#[test]
fn quality_scores_map_to_fixed_values() {
    assert_eq!(ConnectionQuality::Excellent.score(), 100);
    assert_eq!(ConnectionQuality::Good.score(), 75);
    assert_eq!(ConnectionQuality::Fair.score(), 50);
    assert_eq!(ConnectionQuality::Poor.score(), 25);
    assert_eq!(ConnectionQuality::Offline.score(), 0);
}

// ── Events ───────────────────────────────────────────────────────

#[tokio::test]
async fn recovery_emits_connection_restored() {
    let server = responsive_server().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_secs(5))]),
        bus,
    );

    // Initial state is offline, so the first successful probe is a recovery.
    monitor.force_check().await;
    assert!(matches!(
        events.try_recv().unwrap(),
        SyncEvent::ConnectionRestored(_)
    ));
}

#[tokio::test]
async fn losing_connectivity_emits_connection_lost() {
    let server = responsive_server().await;
    let bus = EventBus::new();
    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_millis(500))]),
        bus.clone(),
    );
    monitor.force_check().await;
    assert!(monitor.is_online().await);

    let mut events = bus.subscribe();
    drop(server); // backend vanishes
    let status = monitor.force_check().await;
    assert!(!status.online);
    assert!(matches!(
        events.try_recv().unwrap(),
        SyncEvent::ConnectionLost(_)
    ));
}

#[tokio::test]
async fn offline_hint_marks_offline_immediately() {
    let server = responsive_server().await;
    let bus = EventBus::new();
    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_secs(5))]),
        bus.clone(),
    );
    monitor.force_check().await;

    let mut events = bus.subscribe();
    monitor.handle_offline_hint().await;
    assert!(!monitor.is_online().await);
    assert!(matches!(
        events.try_recv().unwrap(),
        SyncEvent::ConnectionLost(_)
    ));

    // The online hint probes immediately rather than waiting for a tick.
    monitor.handle_online_hint().await;
    assert!(monitor.is_online().await);
}

// ── History & metrics ────────────────────────────────────────────

#[tokio::test]
async fn performance_metrics_track_recent_probes() {
    let server = responsive_server().await;
    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_secs(5))]),
        EventBus::new(),
    );

    monitor.force_check().await;
    monitor.force_check().await;

    let metrics = monitor.performance_metrics().await;
    assert_eq!(metrics.recent_samples, 2);
    assert!((metrics.success_rate - 100.0).abs() < f64::EPSILON);
    assert!((monitor.status().await.uptime_percentage - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn uptime_reflects_failures_in_the_window() {
    let server = responsive_server().await;
    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_millis(500))]),
        EventBus::new(),
    );

    monitor.force_check().await;
    drop(server);
    monitor.force_check().await;

    let status = monitor.status().await;
    assert!((status.uptime_percentage - 50.0).abs() < f64::EPSILON);
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let server = responsive_server().await;
    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_secs(5))]),
        EventBus::new(),
    );

    monitor.start();
    monitor.start(); // no-op
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(monitor.is_online().await); // the immediate startup probe ran

    monitor.stop();
    monitor.stop(); // no-op
}

#[tokio::test]
async fn wait_for_connection_times_out_while_offline() {
    let monitor = NetworkMonitor::new(config_with(vec![dead_endpoint()]), EventBus::new());
    assert!(!monitor.wait_for_connection(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn wait_for_connection_returns_immediately_when_online() {
    let server = responsive_server().await;
    let monitor = NetworkMonitor::new(
        config_with(vec![ProbeEndpoint::new(server.uri(), Duration::from_secs(5))]),
        EventBus::new(),
    );
    monitor.force_check().await;
    assert!(monitor.wait_for_connection(Duration::from_millis(100)).await);
}
