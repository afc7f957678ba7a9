use std::time;

use chrono::Utc;
use svitlo_common::health::HealthHandle;
use svitlo_common::notifier::Notifier;
use svitlo_common::state::{ReachabilityState, StateStore};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::prober::Probe;
use crate::status::{change_message, status_line};

/// How a polling run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The configured run duration elapsed.
    Completed,
    /// Cancelled from outside.
    Stopped,
}

/// Drives the probe on a fixed cadence and broadcasts every change of the power state.
///
/// The poller owns the only [`StateStore`] of the process. Other tasks observe
/// it through the `watch` channel handed out by [`Poller::subscribe`].
pub struct Poller<P> {
    probe: P,
    interval: time::Duration,
    duration: Option<time::Duration>,
    notifier: Option<Notifier>,
    liveness: Option<HealthHandle>,
    store: StateStore,
    state_tx: watch::Sender<ReachabilityState>,
}

impl<P: Probe> Poller<P> {
    pub fn new(probe: P, interval: time::Duration) -> Self {
        let (state_tx, _) = watch::channel(ReachabilityState::default());
        Self {
            probe,
            interval,
            duration: None,
            notifier: None,
            liveness: None,
            store: StateStore::new(),
            state_tx,
        }
    }

    /// Stop with [`LoopExit::Completed`] once `duration` has passed since the run started.
    pub fn with_duration(mut self, duration: Option<time::Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ReachabilityState> {
        self.state_tx.subscribe()
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> LoopExit {
        // A bound too far out to represent is as good as none.
        let end_time = self
            .duration
            .and_then(|duration| Instant::now().checked_add(duration));
        info!(
            interval_secs = self.interval.as_secs(),
            duration_secs = self.duration.map(|d| d.as_secs()),
            "polling started"
        );

        loop {
            let cycle_start = Instant::now();
            if end_time.is_some_and(|end| cycle_start >= end) {
                info!("run duration reached, polling completed");
                return LoopExit::Completed;
            }

            let reachable = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.stopped(),
                reachable = self.probe.probe() => reachable,
            };
            self.observe(reachable).await;

            if let Some(liveness) = &self.liveness {
                liveness.report_healthy();
            }

            let elapsed = cycle_start.elapsed();
            let pause = self.interval.saturating_sub(elapsed);
            if pause.is_zero() {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "cycle overran the interval, starting the next one now"
                );
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.stopped(),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn observe(&mut self, reachable: bool) {
        let result = if reachable { "reachable" } else { "unreachable" };
        metrics::counter!("svitlo_probes_total", "result" => result).increment(1);

        let transition = self.store.record(reachable, Utc::now());
        if !transition.changed {
            info!("{}", status_line(transition.next.power));
            return;
        }

        let power = transition.next.power;
        info!(
            previous = transition.previous.power.as_label(),
            "state changed: {}",
            status_line(power)
        );
        metrics::counter!("svitlo_state_changes_total", "state" => power.as_label()).increment(1);
        metrics::gauge!("svitlo_power_state").set(power.as_gauge());
        self.state_tx.send_replace(transition.next);

        if let Some(notifier) = &self.notifier {
            let message = change_message(&transition.previous, &transition.next);
            notifier.broadcast(&message).await;
        }
    }

    fn stopped(&self) -> LoopExit {
        info!(last_state = %self.store.current().power, "polling stopped");
        LoopExit::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use svitlo_common::state::PowerState;

    struct Always(bool, Arc<AtomicUsize>);

    #[async_trait]
    impl Probe for Always {
        async fn probe(&self) -> bool {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_state_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new(Always(true, calls.clone()), time::Duration::from_secs(30));
        let mut state = poller.subscribe();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(poller.run(shutdown.clone()));

        state.changed().await.unwrap();
        assert_eq!(state.borrow().power, PowerState::On);
        assert!(state.borrow().last_update.is_some());

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), LoopExit::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new(Always(false, calls.clone()), time::Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let start = Instant::now();

        let handle = tokio::spawn(poller.run(shutdown.clone()));
        tokio::time::sleep(time::Duration::from_secs(10)).await;
        shutdown.cancel();

        assert_eq!(handle.await.unwrap(), LoopExit::Stopped);
        assert!(start.elapsed() < time::Duration::from_secs(3600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_liveness_each_cycle() {
        let registry = svitlo_common::health::HealthRegistry::new("liveness");
        let handle = registry.register("poller".to_string(), time::Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new(Always(true, calls), time::Duration::from_secs(30))
            .with_duration(Some(time::Duration::from_secs(1)))
            .with_liveness(handle);

        assert!(!registry.get_status().healthy);
        assert_eq!(poller.run(CancellationToken::new()).await, LoopExit::Completed);
        assert!(registry.get_status().healthy);
    }
}
