//! In-process implementations of the store and queue contracts.
//!
//! Used by tests and local tooling; nothing here survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

use siren_common::error::AppError;
use siren_common::types::{MessageRecord, MessageStatus, Receiver, Template};

use crate::ledger::{MessageLedger, assign_id, check_transition};
use crate::queue::{BroadcastPublisher, BroadcastQueue, Delivery};
use crate::receivers::ReceiverDirectory;
use crate::templates::TemplateStore;

#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<Uuid, Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Template, AppError> {
        self.templates
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))
    }

    async fn create(&self, subject: &str, text: &str) -> Result<Template, AppError> {
        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            text: text.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(template)
    }

    async fn update(&self, id: Uuid, subject: &str, text: &str) -> Result<Template, AppError> {
        let mut templates = self.templates.write().await;
        let template = templates
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))?;
        template.subject = subject.to_string();
        template.text = text.to_string();
        template.updated_at = Utc::now();
        Ok(template.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.templates
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))
    }
}

#[derive(Default)]
pub struct MemoryReceiverDirectory {
    receivers: RwLock<Vec<Receiver>>,
}

impl MemoryReceiverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_receivers(receivers: Vec<Receiver>) -> Self {
        Self {
            receivers: RwLock::new(receivers),
        }
    }
}

#[async_trait]
impl ReceiverDirectory for MemoryReceiverDirectory {
    async fn find_by_city(&self, city: &str) -> Result<Vec<Receiver>, AppError> {
        Ok(self
            .receivers
            .read()
            .await
            .iter()
            .filter(|r| r.city == city)
            .cloned()
            .collect())
    }

    async fn create(&self, receiver: &Receiver) -> Result<(), AppError> {
        self.receivers.write().await.push(receiver.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<Uuid, MessageRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record.
    pub async fn records(&self) -> Vec<MessageRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<MessageRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Store a record exactly as given, status and timestamp included.
    pub async fn insert(&self, record: MessageRecord) {
        self.records.write().await.insert(record.id, record);
    }
}

#[async_trait]
impl MessageLedger for MemoryLedger {
    async fn create(&self, record: &MessageRecord) -> Result<Uuid, AppError> {
        let id = assign_id(record);
        let stored = MessageRecord {
            id,
            status: MessageStatus::Created,
            ..record.clone()
        };
        self.records.write().await.insert(id, stored);
        Ok(id)
    }

    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))?;
        check_transition(id, record.status, status)?;
        record.status = status;
        Ok(())
    }

    async fn find_by_status(&self, status: MessageStatus) -> Result<Vec<MessageRecord>, AppError> {
        let mut found: Vec<MessageRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}

/// FIFO broadcast queue. Acknowledgements are counted, not replayed.
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    available: Notify,
    acked: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BroadcastPublisher for MemoryQueue {
    async fn send(&self, payload: Vec<u8>) -> Result<(), AppError> {
        self.items.lock().await.push_back(payload);
        self.available.notify_one();
        Ok(())
    }
}

#[async_trait]
impl BroadcastQueue for MemoryQueue {
    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            if let Some(payload) = self.items.lock().await.pop_front() {
                return Ok(Some(Delivery { payload }));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), AppError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
