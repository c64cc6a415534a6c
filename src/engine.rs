use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::Interval;
use crate::error::ProbeError;
use crate::models::{
    Dashboard, MonitorState, ProviderIdentity, ProviderSnapshot, ProviderStatus, RoundSummary, TestMode,
};
use crate::notify::{ProbeEvent, UpdateChannel};
use crate::probe::Prober;
use crate::query;

pub struct Monitor {
    pub state: Arc<Mutex<MonitorState>>,
    prober: Arc<dyn Prober>,
    updates: UpdateChannel,
}

impl Monitor {
    pub fn new(providers: Vec<ProviderIdentity>, prober: Arc<dyn Prober>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState::new(providers))),
            prober,
            updates: UpdateChannel::new(),
        }
    }

    pub fn updates(&self) -> &UpdateChannel {
        &self.updates
    }

    /// Switches to running and fires the first round right away.
    ///
    /// Returns the handle of that first round, or `None` if the monitor was
    /// already running (in which case nothing changes).
    ///
    /// Each start owns a one-permit gate shared by its first round and its
    /// timer ticks: a tick is skipped while a round of the same start holds
    /// the permit. Rounds left over from an earlier start never touch it.
    pub async fn start(self: &Arc<Self>, interval: Interval, mode: TestMode) -> Option<JoinHandle<RoundSummary>> {
        let gate = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&gate).try_acquire_owned().ok();

        {
            let mut state = self.state.lock().await;
            if state.running {
                debug!("start ignored: monitor already running");
                return None;
            }
            state.running = true;
            state.mode = mode;

            if let Some(stale) = state.timer.take() {
                stale.abort();
            }
            state.timer = match interval {
                Interval::Every(period) => {
                    info!("Monitoring started: {} mode every {:.1}s", mode, period.as_secs_f64());
                    Some(self.arm_timer(period, gate))
                }
                Interval::Manual => {
                    info!("Monitoring started: {} mode, manual rounds", mode);
                    None
                }
            };
        }

        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _permit = permit;
            monitor.run_tests().await
        }))
    }

    /// Cancels the repeating timer. Probes already dispatched run to completion.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.running {
            return false;
        }
        state.running = false;
        if let Some(handle) = state.timer.take() {
            handle.abort();
        }
        info!("Monitoring stopped");
        true
    }

    pub async fn shutdown(&self) {
        self.stop().await;
        self.updates.unsubscribe();
    }

    #[cfg(test)]
    pub async fn timer_armed(&self) -> bool {
        self.state.lock().await.timer.is_some()
    }

    fn arm_timer(self: &Arc<Self>, period: Duration, gate: Arc<Semaphore>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else { break };
                let Ok(permit) = Arc::clone(&gate).try_acquire_owned() else {
                    debug!("Previous round still in flight, skipping tick");
                    continue;
                };
                tokio::spawn(async move {
                    let _permit = permit;
                    monitor.run_tests().await;
                });
            }
        })
    }

    /// Probes every provider concurrently and waits for all of them to settle.
    pub async fn run_tests(self: &Arc<Self>) -> RoundSummary {
        let started = Instant::now();
        let (targets, mode) = {
            let state = self.state.lock().await;
            let targets: Vec<ProviderIdentity> = state.providers.iter().map(|p| p.identity.clone()).collect();
            (targets, state.mode)
        };

        for identity in &targets {
            self.begin_probe(&identity.id).await;
        }

        let mut tasks = FuturesUnordered::new();
        for identity in targets.iter().cloned() {
            let monitor = Arc::clone(self);
            let id = identity.id.clone();
            let handle = tokio::spawn(async move { monitor.probe_and_record(&identity, mode).await });
            tasks.push(async move { (id, handle.await) });
        }

        let probed = tasks.len();
        let mut failures = 0;
        while let Some((id, joined)) = tasks.next().await {
            let success = match joined {
                Ok(success) => success,
                Err(e) => {
                    let err = ProbeError::TaskFailed { id: id.clone(), reason: e.to_string() };
                    error!("{}", err);
                    self.record(&id, None, false).await
                }
            };
            if !success {
                failures += 1;
            }
        }

        let round = {
            let mut state = self.state.lock().await;
            state.total_tests += 1;
            state.total_tests
        };
        let elapsed = started.elapsed();
        info!(
            "Round {} completed {} probes ({} failed) in {:.2}s",
            round,
            probed,
            failures,
            elapsed.as_secs_f64()
        );
        if let Some(fastest) = self.fastest_provider().await {
            debug!(
                "Fastest: {} at {:?} ms, average {:?} ms",
                fastest.name,
                fastest.stats.current,
                self.average_latency().await
            );
        }

        RoundSummary {
            round,
            probed,
            failures,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Probes a single provider outside of a round. Does not touch the round counter.
    pub async fn test_provider(&self, id: &str) -> Result<bool, ProbeError> {
        let (identity, mode) = {
            let state = self.state.lock().await;
            let provider = state
                .providers
                .iter()
                .find(|p| p.identity.id == id)
                .ok_or_else(|| ProbeError::UnknownProvider(id.to_string()))?;
            (provider.identity.clone(), state.mode)
        };
        self.begin_probe(&identity.id).await;
        Ok(self.probe_and_record(&identity, mode).await)
    }

    async fn begin_probe(&self, id: &str) {
        let snapshot = {
            let mut state = self.state.lock().await;
            match state.provider_mut(id) {
                Some(provider) => {
                    provider.status = ProviderStatus::Testing;
                    provider.snapshot()
                }
                None => return,
            }
        };
        self.updates.notify(ProbeEvent::Testing, &snapshot);
    }

    async fn probe_and_record(&self, identity: &ProviderIdentity, mode: TestMode) -> bool {
        let started = Instant::now();
        let reachable = self.prober.probe(identity, mode).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let latency = match checked_latency(elapsed_ms) {
            Ok(ms) => Some(ms),
            Err(e) => {
                error!("{}: {}", identity.id, e);
                None
            }
        };
        let success = reachable && latency.is_some();
        self.record(&identity.id, latency.filter(|_| success), success).await
    }

    async fn record(&self, id: &str, latency: Option<f64>, success: bool) -> bool {
        let snapshot = {
            let mut state = self.state.lock().await;
            let Some(provider) = state.provider_mut(id) else {
                error!("{}", ProbeError::UnknownProvider(id.to_string()));
                return false;
            };
            provider.stats.apply_result(latency, success);
            provider.status = if success { ProviderStatus::Online } else { ProviderStatus::Offline };
            provider.snapshot()
        };

        debug!(
            "{}: {} latency={:?} success_rate={:.1}%",
            id,
            if success { "online" } else { "offline" },
            snapshot.stats.current,
            snapshot.stats.success_rate().unwrap_or(0.0)
        );
        self.updates.notify(ProbeEvent::Complete, &snapshot);
        success
    }

    /// Resets every provider's stats and the round counter. Identities are untouched.
    pub async fn clear_stats(&self) {
        let mut state = self.state.lock().await;
        for provider in state.providers.iter_mut() {
            provider.stats.reset();
            provider.status = ProviderStatus::Idle;
        }
        state.total_tests = 0;
        info!("Statistics cleared for {} providers", state.providers.len());
    }

    pub async fn get_stats(&self) -> Vec<ProviderSnapshot> {
        self.state.lock().await.snapshots()
    }

    pub async fn fastest_provider(&self) -> Option<ProviderSnapshot> {
        let state = self.state.lock().await;
        query::fastest_provider(&state.providers).map(|p| p.snapshot())
    }

    pub async fn average_latency(&self) -> Option<f64> {
        query::average_latency(&self.state.lock().await.providers)
    }

    #[cfg(test)]
    pub async fn total_tests(&self) -> u64 {
        self.state.lock().await.total_tests
    }

    #[cfg(test)]
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn dashboard(&self) -> Dashboard {
        let state = self.state.lock().await;
        Dashboard {
            providers: state.snapshots(),
            fastest: query::fastest_provider(&state.providers).map(|p| p.identity.id.clone()),
            average_latency: query::average_latency(&state.providers),
            total_tests: state.total_tests,
            running: state.running,
            mode: state.mode,
        }
    }
}

fn checked_latency(ms: f64) -> Result<f64, ProbeError> {
    if ms.is_finite() && ms >= 0.0 {
        Ok(ms.round())
    } else {
        Err(ProbeError::InvalidLatency(ms))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ProviderStats;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    pub(crate) enum Script {
        Up(u64),
        Down(u64),
        Panic,
    }

    pub(crate) struct ScriptedProber {
        scripts: HashMap<String, Script>,
        pub(crate) in_flight: AtomicUsize,
    }

    impl ScriptedProber {
        pub(crate) fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
                in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, provider: &ProviderIdentity, _mode: TestMode) -> bool {
            let (ms, reachable) = match self.scripts.get(&provider.id).copied().unwrap_or(Script::Up(0)) {
                Script::Up(ms) => (ms, true),
                Script::Down(ms) => (ms, false),
                Script::Panic => panic!("prober exploded"),
            };
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            reachable
        }
    }

    pub(crate) fn identity(id: &str) -> ProviderIdentity {
        ProviderIdentity {
            id: id.into(),
            name: id.to_uppercase(),
            color: "#336699".into(),
            endpoint: format!("https://{id}.example.test"),
            probe_path: "/ping".into(),
        }
    }

    pub(crate) fn monitor(scripts: &[(&str, Script)]) -> Arc<Monitor> {
        monitor_with_prober(scripts).0
    }

    fn monitor_with_prober(scripts: &[(&str, Script)]) -> (Arc<Monitor>, Arc<ScriptedProber>) {
        let providers = scripts.iter().map(|(id, _)| identity(id)).collect();
        let prober = Arc::new(ScriptedProber::new(scripts));
        let monitor = Arc::new(Monitor::new(providers, Arc::clone(&prober) as Arc<dyn Prober>));
        (monitor, prober)
    }

    async fn snapshot(monitor: &Monitor, id: &str) -> ProviderSnapshot {
        monitor.get_stats().await.into_iter().find(|p| p.id == id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn round_isolates_failures_and_counts_once() {
        let monitor = monitor(&[("a", Script::Up(120)), ("b", Script::Down(10_000)), ("c", Script::Up(80))]);

        let summary = monitor.run_tests().await;

        assert_eq!(summary.round, 1);
        assert_eq!(summary.probed, 3);
        assert_eq!(summary.failures, 1);
        assert_eq!(monitor.total_tests().await, 1);

        let a = snapshot(&monitor, "a").await;
        assert_eq!(a.status, ProviderStatus::Online);
        assert_eq!(a.stats.successes, 1);
        assert!((a.stats.current.unwrap() - 120.0).abs() <= 1.0);

        let b = snapshot(&monitor, "b").await;
        assert_eq!(b.status, ProviderStatus::Offline);
        assert_eq!(b.stats.failures, 1);
        assert_eq!(b.stats.current, None);

        assert_eq!(snapshot(&monitor, "c").await.stats.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_probe_is_recorded_as_failure() {
        let monitor = monitor(&[("a", Script::Up(5)), ("boom", Script::Panic)]);

        let summary = monitor.run_tests().await;

        assert_eq!(summary.failures, 1);
        assert_eq!(monitor.total_tests().await, 1);
        let boom = snapshot(&monitor, "boom").await;
        assert_eq!(boom.status, ProviderStatus::Offline);
        assert_eq!(boom.stats.count, 1);
        assert_eq!(boom.stats.failures, 1);
        assert_eq!(snapshot(&monitor, "a").await.stats.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_bracket_each_probe() {
        let monitor = monitor(&[("a", Script::Up(30)), ("b", Script::Up(10)), ("c", Script::Down(20))]);
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        monitor.updates().subscribe(move |event, snap| {
            sink.lock().unwrap().push((event, snap.id.clone(), snap.status, snap.stats.count));
            Ok(())
        });

        monitor.run_tests().await;

        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 6);
        let dispatched: Vec<&str> = log[..3].iter().map(|(_, id, _, _)| id.as_str()).collect();
        assert_eq!(dispatched, ["a", "b", "c"]);
        assert!(log[..3].iter().all(|(e, _, s, _)| *e == ProbeEvent::Testing && *s == ProviderStatus::Testing));

        let completed: Vec<(&str, ProviderStatus, u64)> = log[3..]
            .iter()
            .map(|(e, id, s, count)| {
                assert_eq!(*e, ProbeEvent::Complete);
                (id.as_str(), *s, *count)
            })
            .collect();
        assert_eq!(
            completed,
            [("b", ProviderStatus::Online, 1), ("c", ProviderStatus::Offline, 1), ("a", ProviderStatus::Online, 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_listener_does_not_break_the_round() {
        let monitor = monitor(&[("a", Script::Up(1)), ("b", Script::Up(2))]);
        monitor.updates().subscribe(|_, _| panic!("renderer crashed"));

        let summary = monitor.run_tests().await;

        assert_eq!(summary.failures, 0);
        assert_eq!(monitor.total_tests().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_start_runs_one_round_and_arms_no_timer() {
        let monitor = monitor(&[("a", Script::Up(5))]);

        let first = monitor.start(Interval::Manual, TestMode::Ping).await.expect("first start");
        first.await.unwrap();
        assert!(!monitor.timer_armed().await);
        assert_eq!(monitor.total_tests().await, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.total_tests().await, 1);

        monitor.run_tests().await;
        monitor.run_tests().await;
        assert_eq!(monitor.total_tests().await, 3);
        assert_eq!(snapshot(&monitor, "a").await.stats.count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_no_op() {
        let monitor = monitor(&[("a", Script::Up(0))]);

        let first = monitor.start(Interval::Every(Duration::from_secs(1)), TestMode::Ping).await;
        let second = monitor.start(Interval::Every(Duration::from_secs(1)), TestMode::Full).await;
        assert!(second.is_none());
        first.unwrap().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        // immediate round + ticks at 1s, 2s, 3s
        assert_eq!(monitor.total_tests().await, 4);
        assert_eq!(monitor.dashboard().await.mode, TestMode::Ping);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_probes_finish() {
        let monitor = monitor(&[("slow", Script::Up(2_000))]);

        let round = monitor.start(Interval::Every(Duration::from_secs(10)), TestMode::Ping).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.stop().await);
        assert!(!monitor.stop().await);
        assert!(!monitor.timer_armed().await);

        round.await.unwrap();
        assert_eq!(snapshot(&monitor, "slow").await.stats.successes, 1);
        assert_eq!(monitor.total_tests().await, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.total_tests().await, 1);
        assert!(!monitor.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_skips_ticks_while_a_round_is_in_flight() {
        let monitor = monitor(&[("slow", Script::Up(2_500))]);

        monitor.start(Interval::Every(Duration::from_secs(1)), TestMode::Ping).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_900)).await;

        // rounds settle at 2.5s (immediate) and 5.5s (tick at 3s)
        assert_eq!(monitor.total_tests().await, 2);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_gate_ignores_rounds_from_the_previous_start() {
        let (monitor, prober) = monitor_with_prober(&[("a", Script::Up(2_500))]);
        let every = Interval::Every(Duration::from_millis(400));

        monitor.start(every, TestMode::Ping).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.start(every, TestMode::Ping).await.unwrap();

        // first round settled at 2.5s, the restart round runs until 2.8s
        tokio::time::sleep(Duration::from_millis(2_450)).await;
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.total_tests().await, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.total_tests().await, 2);
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 0);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_arms_exactly_one_timer() {
        let monitor = monitor(&[("a", Script::Up(0))]);
        let every = Interval::Every(Duration::from_secs(1));

        monitor.start(every, TestMode::Ping).await.unwrap();
        assert!(monitor.timer_armed().await);
        monitor.stop().await;
        assert!(!monitor.timer_armed().await);
        monitor.start(every, TestMode::Ping).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        // two immediate rounds + ticks at 1s, 2s, 3s of the second start
        assert_eq!(monitor.total_tests().await, 5);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stats_restores_initial_state() {
        let monitor = monitor(&[("a", Script::Up(10)), ("b", Script::Down(10))]);
        monitor.run_tests().await;
        monitor.run_tests().await;

        monitor.clear_stats().await;

        assert_eq!(monitor.total_tests().await, 0);
        for snap in monitor.get_stats().await {
            assert_eq!(snap.stats, ProviderStats::new());
            assert_eq!(snap.status, ProviderStatus::Idle);
        }
        assert_eq!(snapshot(&monitor, "a").await.name, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn queries_reflect_live_state() {
        let monitor = monitor(&[("a", Script::Up(200)), ("b", Script::Up(100)), ("c", Script::Down(5))]);
        assert!(monitor.fastest_provider().await.is_none());
        assert_eq!(monitor.average_latency().await, None);

        monitor.run_tests().await;

        assert_eq!(monitor.fastest_provider().await.map(|p| p.id), Some("b".to_string()));
        let avg = monitor.average_latency().await.unwrap();
        assert!((avg - 150.0).abs() <= 1.0);

        let dashboard = monitor.dashboard().await;
        assert_eq!(dashboard.fastest.as_deref(), Some("b"));
        assert_eq!(dashboard.total_tests, 1);
        assert_eq!(dashboard.providers.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_provider_test_leaves_round_counter_alone() {
        let monitor = monitor(&[("a", Script::Up(10)), ("b", Script::Up(10))]);

        assert_eq!(monitor.test_provider("a").await, Ok(true));
        assert_eq!(
            monitor.test_provider("missing").await,
            Err(ProbeError::UnknownProvider("missing".into()))
        );
        assert_eq!(monitor.total_tests().await, 0);
        assert_eq!(snapshot(&monitor, "a").await.stats.count, 1);
        assert_eq!(snapshot(&monitor, "b").await.stats.count, 0);
    }

    #[test]
    fn invalid_latency_is_rejected() {
        assert_eq!(checked_latency(12.4), Ok(12.0));
        assert_eq!(checked_latency(-1.0), Err(ProbeError::InvalidLatency(-1.0)));
        assert!(checked_latency(f64::NAN).is_err());
        assert!(checked_latency(f64::INFINITY).is_err());
    }
}
