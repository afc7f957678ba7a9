use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use svitlo_common::notifier::{MessageSender, Notifier, SendError};
use svitlo_common::registry::SubscriberRegistry;
use svitlo_common::subscriber::SubscriberProfile;
use svitlo_monitor::poller::{LoopExit, Poller};
use svitlo_monitor::prober::Probe;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Answers from a script, then keeps repeating the last answer.
struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    cost: Duration,
    started: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedProbe {
    fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            last: Mutex::new(true),
            cost: Duration::ZERO,
            started: Default::default(),
        }
    }

    fn taking(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self) -> bool {
        self.started.lock().unwrap().push(Instant::now());
        tokio::time::sleep(self.cost).await;

        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.answers.lock().unwrap().pop_front() {
            *last = next;
        }
        *last
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        self.sent.lock().unwrap().push((chat_id, text.to_owned()));
        Ok(())
    }
}

fn notifier_with_subscriber(dir: &TempDir, sender: Arc<RecordingSender>) -> Notifier {
    let registry = Arc::new(SubscriberRegistry::new(dir.path().join("chat_ids.csv")));
    registry.add(42, SubscriberProfile::new(None, Some("Olena"), None));
    Notifier::new(registry, sender)
}

#[tokio::test(start_paused = true)]
async fn notifies_once_per_change() {
    let dir = TempDir::new().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let probe = ScriptedProbe::new(&[true, true, false, false, true]);

    let exit = Poller::new(probe, Duration::from_secs(30))
        .with_duration(Some(Duration::from_secs(5 * 30)))
        .with_notifier(notifier_with_subscriber(&dir, sender.clone()))
        .run(CancellationToken::new())
        .await;

    assert_eq!(exit, LoopExit::Completed);
    let sent = sender.sent.lock().unwrap();
    let states: Vec<bool> = sent
        .iter()
        .map(|(chat_id, text)| {
            assert_eq!(*chat_id, 42);
            text.contains("Electricity is ON")
        })
        .collect();
    assert_eq!(states, vec![true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn overrun_cycle_starts_next_immediately() {
    let probe = ScriptedProbe::new(&[true]).taking(Duration::from_secs(35));
    let started = probe.started.clone();

    Poller::new(probe, Duration::from_secs(30))
        .with_duration(Some(Duration::from_secs(60)))
        .run(CancellationToken::new())
        .await;

    let started = started.lock().unwrap();
    assert_eq!(started.len(), 2);
    assert_eq!(started[1] - started[0], Duration::from_secs(35));
}

#[tokio::test(start_paused = true)]
async fn short_cycles_keep_the_cadence() {
    let probe = ScriptedProbe::new(&[true]).taking(Duration::from_secs(5));
    let started = probe.started.clone();

    Poller::new(probe, Duration::from_secs(30))
        .with_duration(Some(Duration::from_secs(90)))
        .run(CancellationToken::new())
        .await;

    let started = started.lock().unwrap();
    assert_eq!(started.len(), 3);
    assert_eq!(started[1] - started[0], Duration::from_secs(30));
    assert_eq!(started[2] - started[1], Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn completes_after_duration_without_new_cycle() {
    let t0 = Instant::now();
    let probe = ScriptedProbe::new(&[false]);
    let started = probe.started.clone();

    let exit = Poller::new(probe, Duration::from_secs(61 * 60))
        .with_duration(Some(Duration::from_secs(3600)))
        .run(CancellationToken::new())
        .await;

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(t0.elapsed(), Duration::from_secs(61 * 60));
    assert_eq!(started.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_hour_run_probes_every_interval() {
    let t0 = Instant::now();
    let probe = ScriptedProbe::new(&[true]);
    let started = probe.started.clone();

    let exit = Poller::new(probe, Duration::from_secs(30))
        .with_duration(Some(Duration::from_secs(3600)))
        .run(CancellationToken::new())
        .await;

    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(started.lock().unwrap().len(), 120);
    assert!(t0.elapsed() <= Duration::from_secs(61 * 60));
}

#[tokio::test(start_paused = true)]
async fn cancellation_abandons_a_running_probe() {
    let sender = Arc::new(RecordingSender::default());
    let dir = TempDir::new().unwrap();
    let probe = ScriptedProbe::new(&[true]).taking(Duration::from_secs(600));
    let shutdown = CancellationToken::new();

    let poller = Poller::new(probe, Duration::from_secs(30))
        .with_notifier(notifier_with_subscriber(&dir, sender.clone()));
    let handle = tokio::spawn(poller.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    shutdown.cancel();

    assert_eq!(handle.await.unwrap(), LoopExit::Stopped);
    assert!(sender.sent.lock().unwrap().is_empty());
}
