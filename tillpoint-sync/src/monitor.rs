//! Network connectivity and quality monitoring.
//!
//! The platform's raw online flag is necessary but not sufficient — a till
//! can hold an IP address while genuinely unable to reach anything. The
//! monitor probes a small set of independent endpoints on a fixed cadence
//! and derives a quality tier the sync pipeline gates on.
//!
//! Nothing in this module is fatal: endpoint failures degrade the reported
//! status rather than erroring out.

use crate::event::{EventBus, SyncEvent};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One probe target with its own timeout.
#[derive(Debug, Clone)]
pub struct ProbeEndpoint {
    pub url: String,
    pub timeout: Duration,
}

impl ProbeEndpoint {
    /// Creates an endpoint with the given timeout.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

/// Configuration for the network monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Independent endpoints probed in parallel each cycle.
    pub endpoints: Vec<ProbeEndpoint>,
    /// How often the periodic probe runs.
    pub check_interval: Duration,
    /// Base delay for reconnection attempts after a total probe failure.
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnection backoff.
    pub reconnect_max_delay: Duration,
    /// Maximum number of probe samples kept in the rolling history.
    pub history_cap: usize,
    /// Number of trailing samples the uptime percentage is computed over.
    pub uptime_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(5);
        Self {
            endpoints: vec![
                ProbeEndpoint::new("https://httpbin.org/get", timeout),
                ProbeEndpoint::new("https://jsonplaceholder.typicode.com/posts/1", timeout),
                ProbeEndpoint::new("https://api.github.com", timeout),
            ],
            check_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(60),
            history_cap: 100,
            uptime_window: 20,
        }
    }
}

/// Link quality tier derived from probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Offline,
}

impl ConnectionQuality {
    /// Maps the tier to a 0–100 score.
    #[must_use]
    pub fn score(self) -> u8 {
        match self {
            Self::Excellent => 100,
            Self::Good => 75,
            Self::Fair => 50,
            Self::Poor => 25,
            Self::Offline => 0,
        }
    }

    /// Whether the tier is sufficient to attempt synchronization.
    #[must_use]
    pub fn good_enough_for_sync(self) -> bool {
        matches!(self, Self::Excellent | Self::Good | Self::Fair)
    }
}

/// Physical link kind, when the host platform can report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

/// Continuously refreshed snapshot of connectivity state. Process-lifetime
/// only; mutated exclusively by the monitor's probe cycle and transition
/// hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub connection_type: ConnectionType,
    pub quality: ConnectionQuality,
    pub last_check: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub uptime_percentage: f64,
    pub latency_ms: Option<u64>,
    pub bandwidth_mbps: Option<f64>,
}

impl NetworkStatus {
    fn offline_initial() -> Self {
        Self {
            online: false,
            connection_type: ConnectionType::Unknown,
            quality: ConnectionQuality::Offline,
            last_check: Utc::now(),
            consecutive_failures: 0,
            uptime_percentage: 100.0,
            latency_ms: None,
            bandwidth_mbps: None,
        }
    }
}

/// Aggregate view of recent probe performance.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMetrics {
    pub average_latency_ms: u64,
    pub success_rate: f64,
    pub uptime_percentage: f64,
    pub recent_samples: usize,
}

#[derive(Debug, Clone)]
struct ProbeSample {
    latency_ms: u64,
    success: bool,
}

/// Tracks connectivity via periodic parallel probes against independent
/// endpoints.
#[derive(Clone)]
pub struct NetworkMonitor {
    config: Arc<MonitorConfig>,
    client: Client,
    status: Arc<RwLock<NetworkStatus>>,
    history: Arc<RwLock<VecDeque<ProbeSample>>>,
    bus: EventBus,
    running: Arc<AtomicBool>,
    reconnect_pending: Arc<AtomicBool>,
    probe_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
    reconnect_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl NetworkMonitor {
    /// Creates a monitor. The status starts offline until the first probe or
    /// platform hint says otherwise.
    #[must_use]
    pub fn new(config: MonitorConfig, bus: EventBus) -> Self {
        let client = Client::builder()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config: Arc::new(config),
            client,
            status: Arc::new(RwLock::new(NetworkStatus::offline_initial())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            bus,
            running: Arc::new(AtomicBool::new(false)),
            reconnect_pending: Arc::new(AtomicBool::new(false)),
            probe_task: Arc::new(StdMutex::new(None)),
            reconnect_task: Arc::new(StdMutex::new(None)),
        }
    }

    /// Begins the periodic probe cycle plus an immediate probe. Idempotent;
    /// a no-op if already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("network monitor already running");
            return;
        }

        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            monitor.run_probe().await;
            let mut interval = tokio::time::interval(monitor.config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // first tick fires immediately; already probed
            loop {
                interval.tick().await;
                monitor.run_probe().await;
            }
        });
        *self.probe_task.lock().unwrap() = Some(handle);

        info!(
            "network monitor started (probing every {:?})",
            self.config.check_interval
        );
    }

    /// Cancels the probe interval and any pending reconnection attempt.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.probe_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect_task.lock().unwrap().take() {
            handle.abort();
        }
        self.reconnect_pending.store(false, Ordering::SeqCst);
        info!("network monitor stopped");
    }

    /// Runs one probe cycle synchronously and returns the refreshed status.
    /// Used by callers that need an up-to-date decision before acting.
    pub async fn force_check(&self) -> NetworkStatus {
        self.run_probe().await
    }

    /// Current status snapshot.
    pub async fn status(&self) -> NetworkStatus {
        self.status.read().await.clone()
    }

    /// Whether the device currently has connectivity.
    pub async fn is_online(&self) -> bool {
        self.status.read().await.online
    }

    /// Whether quality is sufficient to attempt synchronization.
    pub async fn is_good_enough_for_sync(&self) -> bool {
        let status = self.status.read().await;
        status.online && status.quality.good_enough_for_sync()
    }

    /// Maps the current quality tier to 0/25/50/75/100.
    pub async fn quality_score(&self) -> u8 {
        self.status.read().await.quality.score()
    }

    /// Platform hint that connectivity was regained. Short-circuits into an
    /// immediate probe instead of waiting for the next tick.
    pub async fn handle_online_hint(&self) {
        debug!("platform reported online; probing immediately");
        self.run_probe().await;
    }

    /// Platform hint that connectivity was lost. Marks the status offline
    /// immediately; the next probe confirms.
    pub async fn handle_offline_hint(&self) {
        let snapshot = {
            let mut status = self.status.write().await;
            status.online = false;
            status.quality = ConnectionQuality::Offline;
            status.last_check = Utc::now();
            status.clone()
        };
        info!("platform reported offline");
        self.bus.emit(SyncEvent::ConnectionLost(snapshot));
    }

    /// Aggregate view of the most recent probe samples.
    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let history = self.history.read().await;
        let recent: Vec<&ProbeSample> = history.iter().rev().take(10).collect();
        if recent.is_empty() {
            return PerformanceMetrics {
                average_latency_ms: 0,
                success_rate: 0.0,
                uptime_percentage: 100.0,
                recent_samples: 0,
            };
        }

        let successes: Vec<&&ProbeSample> = recent.iter().filter(|s| s.success).collect();
        let average_latency_ms = if successes.is_empty() {
            0
        } else {
            successes.iter().map(|s| s.latency_ms).sum::<u64>() / successes.len() as u64
        };

        PerformanceMetrics {
            average_latency_ms,
            success_rate: successes.len() as f64 / recent.len() as f64 * 100.0,
            uptime_percentage: self.status.read().await.uptime_percentage,
            recent_samples: recent.len(),
        }
    }

    /// Waits until connectivity is restored, up to `max_wait`. Returns
    /// whether the device came back online in time.
    pub async fn wait_for_connection(&self, max_wait: Duration) -> bool {
        if self.is_online().await {
            return true;
        }

        let mut events = self.bus.subscribe();
        let deadline = tokio::time::sleep(max_wait);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(SyncEvent::ConnectionRestored(_)) => return true,
                    Ok(_) => continue,
                    Err(_) => return self.is_online().await,
                },
                () = &mut deadline => return false,
            }
        }
    }

    // ── Probe cycle ──────────────────────────────────────────────

    async fn run_probe(&self) -> NetworkStatus {
        let probes = self
            .config
            .endpoints
            .iter()
            .map(|ep| self.probe_endpoint(ep));
        let results = join_all(probes).await;

        let total = results.len().max(1);
        let latencies: Vec<u64> = results.iter().filter_map(|r| *r).collect();
        let reachable = !latencies.is_empty();
        let avg_latency = if reachable {
            latencies.iter().sum::<u64>() / latencies.len() as u64
        } else {
            0
        };

        self.record_sample(avg_latency, reachable).await;
        let uptime = self.trailing_uptime().await;

        let (previous, snapshot) = {
            let mut status = self.status.write().await;
            let previous = status.clone();

            if reachable {
                status.online = true;
                status.latency_ms = Some(avg_latency);
                status.consecutive_failures = 0;
                status.quality = assess_quality(avg_latency, latencies.len(), total);
                debug!(
                    "probe ok: {}/{} endpoints, avg {}ms, quality {:?}",
                    latencies.len(),
                    total,
                    avg_latency,
                    status.quality
                );
            } else {
                status.online = false;
                status.quality = ConnectionQuality::Offline;
                status.latency_ms = None;
                status.consecutive_failures += 1;
                warn!(
                    "probe failed against all endpoints ({} consecutive)",
                    status.consecutive_failures
                );
            }

            status.last_check = Utc::now();
            status.uptime_percentage = uptime;
            (previous, status.clone())
        };

        if !previous.online && snapshot.online {
            self.bus
                .emit(SyncEvent::ConnectionRestored(snapshot.clone()));
        } else if previous.online && !snapshot.online {
            self.bus.emit(SyncEvent::ConnectionLost(snapshot.clone()));
        } else if previous.quality != snapshot.quality {
            self.bus.emit(SyncEvent::ConnectionChanged(snapshot.clone()));
        }

        if !snapshot.online {
            self.schedule_reconnect(snapshot.consecutive_failures);
        }

        snapshot
    }

    /// Probes one endpoint. Returns the latency on success; a timeout or
    /// network failure simply doesn't count toward the success set.
    async fn probe_endpoint(&self, endpoint: &ProbeEndpoint) -> Option<u64> {
        let started = Instant::now();
        match self
            .client
            .head(&endpoint.url)
            .timeout(endpoint.timeout)
            .send()
            .await
        {
            // Any HTTP response proves the link works; the status code is
            // the endpoint's business, not ours.
            Ok(_) => Some(started.elapsed().as_millis() as u64),
            Err(e) => {
                debug!("probe {} failed: {}", endpoint.url, e);
                None
            }
        }
    }

    async fn record_sample(&self, latency_ms: u64, success: bool) {
        let mut history = self.history.write().await;
        history.push_back(ProbeSample {
            latency_ms,
            success,
        });
        while history.len() > self.config.history_cap {
            history.pop_front();
        }
    }

    async fn trailing_uptime(&self) -> f64 {
        let history = self.history.read().await;
        if history.is_empty() {
            return 100.0;
        }
        let window: Vec<&ProbeSample> = history
            .iter()
            .rev()
            .take(self.config.uptime_window)
            .collect();
        let successes = window.iter().filter(|s| s.success).count();
        successes as f64 / window.len() as f64 * 100.0
    }

    /// Schedules a reconnection probe with exponential backoff instead of a
    /// fixed retry, so a degraded network isn't hammered.
    fn schedule_reconnect(&self, consecutive_failures: u32) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            return; // already scheduled
        }

        let exponent = consecutive_failures.saturating_sub(1).min(5);
        let delay = self
            .config
            .reconnect_base_delay
            .saturating_mul(1 << exponent)
            .min(self.config.reconnect_max_delay);

        debug!("scheduling reconnection attempt in {:?}", delay);

        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            monitor.reconnect_pending.store(false, Ordering::SeqCst);
            if monitor.running.load(Ordering::SeqCst) {
                monitor.run_probe().await;
            }
        });
        *self.reconnect_task.lock().unwrap() = Some(handle);
    }
}

/// Derives the quality tier from probe results. Below 50% endpoint success
/// the tier is `Poor` regardless of latency; otherwise average latency over
/// the successful endpoints decides.
fn assess_quality(avg_latency_ms: u64, successful: usize, total: usize) -> ConnectionQuality {
    let success_rate = successful as f64 / total as f64;
    if success_rate < 0.5 {
        return ConnectionQuality::Poor;
    }

    match avg_latency_ms {
        0..=100 => ConnectionQuality::Excellent,
        101..=300 => ConnectionQuality::Good,
        301..=1000 => ConnectionQuality::Fair,
        _ => ConnectionQuality::Poor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_poor_below_half_success_regardless_of_latency() {
        assert_eq!(assess_quality(50, 1, 3), ConnectionQuality::Poor);
        assert_eq!(assess_quality(10, 0, 3), ConnectionQuality::Poor);
    }

    #[test]
    fn quality_buckets_by_latency() {
        assert_eq!(assess_quality(80, 3, 3), ConnectionQuality::Excellent);
        assert_eq!(assess_quality(250, 3, 3), ConnectionQuality::Good);
        assert_eq!(assess_quality(900, 2, 3), ConnectionQuality::Fair);
        assert_eq!(assess_quality(2500, 3, 3), ConnectionQuality::Poor);
    }
}
