//! End-to-end pipeline tests over the in-memory stores.
//!
//! Dispatch → queue → consumer → fan-out → providers → ledger, plus the
//! reconciliation sweep. No external services required.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::{
    BroadcastRequest, ChannelType, Contact, MessageRecord, MessageStatus, Receiver,
    RenderedBroadcast,
};
use siren_engine::dispatch::DispatchService;
use siren_engine::fanout::{FanoutEngine, FanoutSummary};
use siren_engine::ledger::MessageLedger;
use siren_engine::memory::{MemoryLedger, MemoryQueue, MemoryReceiverDirectory, MemoryTemplateStore};
use siren_engine::queue::{BroadcastPublisher, QueueConsumer};
use siren_engine::reconciler::{ReconciliationWorker, SweepOutcome, SweepStats};
use siren_engine::templates::TemplateStore;
use siren_notifier::{NotifyError, Provider, ProviderRegistry};

// ============================================================
// Shared helpers
// ============================================================

/// Provider that records every contact it is asked to reach.
struct ScriptedProvider {
    channel: ChannelType,
    fail: bool,
    sent: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(channel: ChannelType) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn failing(channel: ChannelType) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    async fn sent(&self) -> Vec<String> {
        let mut sent = self.sent.lock().await.clone();
        sent.sort();
        sent
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn channel(&self) -> ChannelType {
        self.channel
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, record: &MessageRecord) -> Result<(), NotifyError> {
        self.sent.lock().await.push(record.contact_value.clone());
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn contact(value: &str, channel_type: ChannelType, active: bool) -> Contact {
    Contact {
        value: value.to_string(),
        channel_type,
        active,
    }
}

fn receiver(name: &str, city: &str, contacts: Vec<Contact>) -> Receiver {
    Receiver {
        id: Uuid::new_v4(),
        name: name.to_string(),
        city: city.to_string(),
        contacts,
    }
}

fn springfield() -> Vec<Receiver> {
    vec![
        receiver(
            "Ann Lee",
            "Springfield",
            vec![
                contact("+15550100", ChannelType::Sms, true),
                contact("ann@example.com", ChannelType::Email, true),
            ],
        ),
        receiver(
            "Bob Ray",
            "Springfield",
            vec![
                contact("+15550101", ChannelType::Sms, true),
                contact("bob@example.com", ChannelType::Email, false),
            ],
        ),
        receiver(
            "Cy Moe",
            "Shelbyville",
            vec![contact("+15550102", ChannelType::Sms, true)],
        ),
    ]
}

fn broadcast(city: &str) -> RenderedBroadcast {
    RenderedBroadcast {
        subject: "Alert".to_string(),
        text: format!("Flood warning for {}", city),
        status: MessageStatus::Created,
        city: city.to_string(),
    }
}

fn engine(
    receivers: Vec<Receiver>,
    ledger: Arc<MemoryLedger>,
    registry: ProviderRegistry,
    workers: usize,
) -> FanoutEngine {
    FanoutEngine::new(
        Arc::new(MemoryReceiverDirectory::with_receivers(receivers)),
        ledger,
        Arc::new(registry),
        workers,
    )
}

// ============================================================
// Fan-out
// ============================================================

#[tokio::test]
async fn test_fanout_delivers_every_active_contact() {
    let sms = ScriptedProvider::new(ChannelType::Sms);
    let email = ScriptedProvider::new(ChannelType::Email);
    let registry = ProviderRegistry::new()
        .with_provider(sms.clone())
        .with_provider(email.clone());
    let ledger = Arc::new(MemoryLedger::new());

    let summary = engine(springfield(), ledger.clone(), registry, 4)
        .fan_out(broadcast("Springfield"))
        .await
        .unwrap();

    assert_eq!(
        summary,
        FanoutSummary {
            receivers: 2,
            attempted: 3,
            delivered: 3,
            pending: 0,
        }
    );
    assert_eq!(sms.sent().await, vec!["+15550100", "+15550101"]);
    assert_eq!(email.sent().await, vec!["ann@example.com"]);

    let records = ledger.records().await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.status == MessageStatus::Delivered));
    assert!(records.iter().all(|r| r.text == "Flood warning for Springfield"));
}

#[tokio::test]
async fn test_fanout_skips_receiver_without_active_contacts() {
    let r1 = receiver(
        "Ann Lee",
        "Springfield",
        vec![
            contact("+15550100", ChannelType::Sms, true),
            contact("ann@example.com", ChannelType::Email, false),
        ],
    );
    let r2 = receiver(
        "Bob Ray",
        "Springfield",
        vec![contact("+15550101", ChannelType::Sms, false)],
    );
    let (r1_id, r2_id) = (r1.id, r2.id);

    let sms = ScriptedProvider::new(ChannelType::Sms);
    let email = ScriptedProvider::new(ChannelType::Email);
    let registry = ProviderRegistry::new()
        .with_provider(sms.clone())
        .with_provider(email.clone());
    let ledger = Arc::new(MemoryLedger::new());

    let summary = engine(vec![r1, r2], ledger.clone(), registry, 4)
        .fan_out(broadcast("Springfield"))
        .await
        .unwrap();
    assert_eq!(summary.receivers, 2);
    assert_eq!(summary.attempted, 1);

    let records = ledger.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].receiver_id, r1_id);
    assert_eq!(records[0].contact_type, ChannelType::Sms);
    assert!(records.iter().all(|r| r.receiver_id != r2_id));
    assert_eq!(sms.sent().await, vec!["+15550100"]);
    assert!(email.sent().await.is_empty());
}

#[tokio::test]
async fn test_fanout_never_contacts_inactive() {
    let email = ScriptedProvider::new(ChannelType::Email);
    let registry = ProviderRegistry::new()
        .with_provider(ScriptedProvider::new(ChannelType::Sms))
        .with_provider(email.clone());
    let ledger = Arc::new(MemoryLedger::new());

    engine(springfield(), ledger.clone(), registry, 1)
        .fan_out(broadcast("Springfield"))
        .await
        .unwrap();

    assert!(!email.sent().await.contains(&"bob@example.com".to_string()));
    assert!(
        ledger
            .records()
            .await
            .iter()
            .all(|r| r.contact_value != "bob@example.com")
    );
}

#[tokio::test]
async fn test_fanout_provider_error_leaves_record_created() {
    let registry = ProviderRegistry::new()
        .with_provider(ScriptedProvider::failing(ChannelType::Sms))
        .with_provider(ScriptedProvider::new(ChannelType::Email));
    let ledger = Arc::new(MemoryLedger::new());

    let summary = engine(springfield(), ledger.clone(), registry, 2)
        .fan_out(broadcast("Springfield"))
        .await
        .unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.pending, 2);

    let pending = ledger.find_by_status(MessageStatus::Created).await.unwrap();
    let mut values: Vec<_> = pending.iter().map(|r| r.contact_value.as_str()).collect();
    values.sort();
    assert_eq!(values, vec!["+15550100", "+15550101"]);
}

#[tokio::test]
async fn test_fanout_unregistered_channel_stays_created() {
    let registry = ProviderRegistry::new().with_provider(ScriptedProvider::new(ChannelType::Sms));
    let ledger = Arc::new(MemoryLedger::new());

    let summary = engine(springfield(), ledger.clone(), registry, 2)
        .fan_out(broadcast("Springfield"))
        .await
        .unwrap();
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.pending, 1);

    let pending = ledger.find_by_status(MessageStatus::Created).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].contact_type, ChannelType::Email);
}

#[tokio::test]
async fn test_fanout_empty_city_is_noop() {
    let sms = ScriptedProvider::new(ChannelType::Sms);
    let ledger = Arc::new(MemoryLedger::new());

    let summary = engine(
        springfield(),
        ledger.clone(),
        ProviderRegistry::new().with_provider(sms.clone()),
        4,
    )
    .fan_out(broadcast("Nowhere"))
    .await
    .unwrap();

    assert_eq!(summary, FanoutSummary::default());
    assert!(ledger.records().await.is_empty());
    assert!(sms.sent().await.is_empty());
}

#[tokio::test]
async fn test_fanout_more_receivers_than_workers() {
    let receivers: Vec<Receiver> = (0..25)
        .map(|i| {
            receiver(
                &format!("R {}", i),
                "Springfield",
                vec![contact(&format!("+1555{:04}", i), ChannelType::Sms, true)],
            )
        })
        .collect();
    let sms = ScriptedProvider::new(ChannelType::Sms);
    let ledger = Arc::new(MemoryLedger::new());

    let summary = engine(
        receivers,
        ledger.clone(),
        ProviderRegistry::new().with_provider(sms.clone()),
        3,
    )
    .fan_out(broadcast("Springfield"))
    .await
    .unwrap();

    assert_eq!(summary.receivers, 25);
    assert_eq!(summary.delivered, 25);
    assert_eq!(sms.sent().await.len(), 25);
}

/// Provider that holds each send open and tracks how many overlap.
struct SlowProvider {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Provider for SlowProvider {
    fn channel(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn name(&self) -> &'static str {
        "slow"
    }

    async fn send(&self, _record: &MessageRecord) -> Result<(), NotifyError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_fanout_workers_send_concurrently_within_bound() {
    let receivers: Vec<Receiver> = (0..9)
        .map(|i| {
            receiver(
                &format!("R {}", i),
                "Springfield",
                vec![contact(&format!("+1555{:04}", i), ChannelType::Sms, true)],
            )
        })
        .collect();
    let sms = Arc::new(SlowProvider {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    let summary = engine(
        receivers,
        Arc::new(MemoryLedger::new()),
        ProviderRegistry::new().with_provider(sms.clone()),
        3,
    )
    .fan_out(broadcast("Springfield"))
    .await
    .unwrap();

    assert_eq!(summary.delivered, 9);
    assert_eq!(sms.in_flight.load(Ordering::SeqCst), 0);
    let peak = sms.peak.load(Ordering::SeqCst);
    assert!(peak > 1, "sends never overlapped (peak {})", peak);
    assert!(peak <= 3, "more sends in flight than workers (peak {})", peak);
}

// ============================================================
// Dispatch → queue → consumer → fan-out
// ============================================================

#[tokio::test]
async fn test_dispatch_through_consumer() {
    let templates = Arc::new(MemoryTemplateStore::new());
    let template = templates
        .create("Alert", "city=%s level=%s")
        .await
        .unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let dispatch = DispatchService::new(templates, queue.clone());

    let sms = ScriptedProvider::new(ChannelType::Sms);
    let ledger = Arc::new(MemoryLedger::new());
    let fanout = engine(
        springfield(),
        ledger.clone(),
        ProviderRegistry::new()
            .with_provider(sms.clone())
            .with_provider(ScriptedProvider::new(ChannelType::Email)),
        2,
    );

    dispatch
        .send(&BroadcastRequest {
            template_id: template.id,
            city: "Springfield".to_string(),
            strength: "7".to_string(),
        })
        .await
        .unwrap();
    // Malformed payloads are acknowledged and dropped.
    queue.send(b"{\"city\":".to_vec()).await.unwrap();

    let consumer = QueueConsumer::new(queue.clone(), Arc::new(fanout), 2, Duration::from_millis(20));
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    for _ in 0..200 {
        if queue.acked() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(queue.acked(), 2);
    let records = ledger.records().await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.text == "city=Springfield level=7"));
    assert!(records.iter().all(|r| r.subject == "Alert"));
    assert_eq!(sms.sent().await.len(), 2);
}

// ============================================================
// Ledger
// ============================================================

#[tokio::test]
async fn test_update_status_unknown_id_is_not_found() {
    let ledger = MemoryLedger::new();
    let err = ledger
        .update_status(Uuid::new_v4(), MessageStatus::Delivered)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_status_never_moves_backwards() {
    let ledger = MemoryLedger::new();
    let record = MessageRecord::for_contact(
        &broadcast("Springfield"),
        Uuid::new_v4(),
        &contact("+15550100", ChannelType::Sms, true),
    );
    let id = ledger.create(&record).await.unwrap();
    ledger.update_status(id, MessageStatus::Delivered).await.unwrap();

    let err = ledger
        .update_status(id, MessageStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(ledger.get(id).await.unwrap().status, MessageStatus::Delivered);
}

// ============================================================
// Reconciliation
// ============================================================

/// Ledger whose status scan is slow and counted.
struct SlowLedger {
    inner: MemoryLedger,
    delay: Duration,
    scans: AtomicUsize,
    scans_finished: AtomicUsize,
}

impl SlowLedger {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryLedger::new(),
            delay,
            scans: AtomicUsize::new(0),
            scans_finished: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MessageLedger for SlowLedger {
    async fn create(&self, record: &MessageRecord) -> Result<Uuid, AppError> {
        self.inner.create(record).await
    }

    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<(), AppError> {
        self.inner.update_status(id, status).await
    }

    async fn find_by_status(&self, status: MessageStatus) -> Result<Vec<MessageRecord>, AppError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let records = self.inner.find_by_status(status).await;
        self.scans_finished.fetch_add(1, Ordering::SeqCst);
        records
    }
}

fn stale(contact_type: ChannelType, value: &str) -> MessageRecord {
    MessageRecord {
        id: Uuid::new_v4(),
        subject: "Alert".to_string(),
        text: "Flood".to_string(),
        status: MessageStatus::Created,
        receiver_id: Uuid::new_v4(),
        contact_type,
        contact_value: value.to_string(),
        created_at: chrono::Utc::now() - chrono::Duration::minutes(5),
    }
}

#[tokio::test]
async fn test_sweep_settles_stale_records() {
    let ledger = Arc::new(MemoryLedger::new());
    let ok = stale(ChannelType::Sms, "+15550100");
    let bad = stale(ChannelType::Email, "ann@example.com");
    ledger.insert(ok.clone()).await;
    ledger.insert(bad.clone()).await;

    let registry = ProviderRegistry::new()
        .with_provider(ScriptedProvider::new(ChannelType::Sms))
        .with_provider(ScriptedProvider::failing(ChannelType::Email));
    let worker = ReconciliationWorker::new(
        ledger.clone(),
        Arc::new(registry),
        Duration::from_secs(30),
        Duration::from_secs(60),
    );

    assert_eq!(
        worker.sweep().await,
        SweepOutcome::Completed(SweepStats {
            examined: 2,
            deferred: 0,
            delivered: 1,
            failed: 1,
        })
    );
    assert_eq!(ledger.get(ok.id).await.unwrap().status, MessageStatus::Delivered);
    assert_eq!(ledger.get(bad.id).await.unwrap().status, MessageStatus::Failed);

    // Nothing left to settle.
    assert_eq!(
        worker.sweep().await,
        SweepOutcome::Completed(SweepStats::default())
    );
}

#[tokio::test]
async fn test_overlapping_sweeps_run_once() {
    let ledger = SlowLedger::new(Duration::from_millis(100));
    let worker = ReconciliationWorker::new(
        ledger.clone(),
        Arc::new(ProviderRegistry::new()),
        Duration::from_secs(30),
        Duration::from_secs(60),
    );

    let (a, b) = tokio::join!(worker.sweep(), worker.sweep());
    let outcomes = [a, b];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, SweepOutcome::Completed(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == SweepOutcome::Skipped)
            .count(),
        1
    );
    assert_eq!(ledger.scans.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let worker = Arc::new(ReconciliationWorker::new(
        Arc::new(MemoryLedger::new()),
        Arc::new(ProviderRegistry::new()),
        Duration::from_millis(10),
        Duration::from_secs(60),
    ));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(worker.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_ticks_during_slow_sweep_are_skipped() {
    let ledger = SlowLedger::new(Duration::from_millis(150));
    let worker = Arc::new(ReconciliationWorker::new(
        ledger.clone(),
        Arc::new(ProviderRegistry::new()),
        Duration::from_millis(10),
        Duration::from_secs(60),
    ));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(worker.run(shutdown.clone()));

    // Roughly ten ticks land while the first sweep is still scanning.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ledger.scans.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.scans_finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_sweep() {
    let ledger = SlowLedger::new(Duration::from_millis(400));
    let worker = Arc::new(ReconciliationWorker::new(
        ledger.clone(),
        Arc::new(ProviderRegistry::new()),
        Duration::from_millis(10),
        Duration::from_secs(60),
    ));
    let shutdown = CancellationToken::new();
    let stopped = Arc::new(AtomicBool::new(false));
    let task = {
        let stopped = stopped.clone();
        let run = worker.run(shutdown.clone());
        tokio::spawn(async move {
            run.await;
            stopped.store(true, Ordering::SeqCst);
        })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(ledger.scans.load(Ordering::SeqCst), 1);
    assert_eq!(
        ledger.scans_finished.load(Ordering::SeqCst),
        1,
        "run returned while a sweep was still scanning"
    );
}
