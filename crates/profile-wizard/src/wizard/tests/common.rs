use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::wizard::collaborators::{
    Collaborators, DraftStore, Notification, NotificationKind, NotificationSink,
    ProfileSubmitter, StaticCodeTransport, StoreError, SubmitRejection, TransportError,
    VerificationTransport,
};
use crate::wizard::domain::{
    DraftEnvelope, DraftKey, EntityKind, FieldSpec, FieldValue, FormSnapshot, PageSpec,
    ProfileId, VerificationChannel,
};
use crate::wizard::engine::{EngineSettings, ProfileCompletionEngine};
use crate::wizard::scheduler::{ScheduledTask, Scheduler, TaskHandle, TokioScheduler};
use crate::wizard::schema::EntitySchema;

pub(super) const PHONE: &str = "+971501234567";

/// In-memory draft store; `put_delay` simulates a slow link.
#[derive(Default)]
pub(super) struct MemoryDraftStore {
    envelopes: Mutex<HashMap<DraftKey, DraftEnvelope>>,
    history: Mutex<Vec<DraftEnvelope>>,
    put_delay: Duration,
    failing_puts: AtomicUsize,
}

impl MemoryDraftStore {
    pub(super) fn slow(put_delay: Duration) -> Self {
        Self {
            put_delay,
            ..Self::default()
        }
    }

    pub(super) fn seeded(key: &DraftKey, envelope: DraftEnvelope) -> Self {
        let store = Self::default();
        store
            .envelopes
            .lock()
            .expect("store mutex poisoned")
            .insert(key.clone(), envelope);
        store
    }

    pub(super) fn stored(&self, key: &DraftKey) -> Option<DraftEnvelope> {
        self.envelopes
            .lock()
            .expect("store mutex poisoned")
            .get(key)
            .cloned()
    }

    pub(super) fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Every successful put, in completion order.
    pub(super) fn history(&self) -> Vec<DraftEnvelope> {
        self.history.lock().expect("store mutex poisoned").clone()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn get(&self, key: &DraftKey) -> Result<Option<DraftEnvelope>, StoreError> {
        Ok(self.stored(key))
    }

    async fn put(&self, key: &DraftKey, envelope: DraftEnvelope) -> Result<(), StoreError> {
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.history
            .lock()
            .expect("store mutex poisoned")
            .push(envelope.clone());
        self.envelopes
            .lock()
            .expect("store mutex poisoned")
            .insert(key.clone(), envelope);
        Ok(())
    }

    async fn delete(&self, key: &DraftKey) -> Result<(), StoreError> {
        self.envelopes
            .lock()
            .expect("store mutex poisoned")
            .remove(key);
        Ok(())
    }
}

pub(super) struct UnavailableStore;

#[async_trait]
impl DraftStore for UnavailableStore {
    async fn get(&self, _key: &DraftKey) -> Result<Option<DraftEnvelope>, StoreError> {
        Ok(None)
    }

    async fn put(&self, _key: &DraftKey, _envelope: DraftEnvelope) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("network offline".to_string()))
    }

    async fn delete(&self, _key: &DraftKey) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("network offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn errors(&self) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == NotificationKind::Error)
            .collect()
    }

    pub(super) fn titled(&self, title: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.title == title)
            .count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
    }
}

#[derive(Default)]
pub(super) struct CountingSubmitter {
    calls: AtomicUsize,
    reject: bool,
}

impl CountingSubmitter {
    pub(super) fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileSubmitter for CountingSubmitter {
    async fn submit(&self, _snapshot: &FormSnapshot) -> Result<ProfileId, SubmitRejection> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject {
            return Err(SubmitRejection::Rejected("license number already registered".into()));
        }
        Ok(ProfileId(format!("profile-{call}")))
    }
}

pub(super) struct OfflineTransport;

#[async_trait]
impl VerificationTransport for OfflineTransport {
    async fn send_code(
        &self,
        _channel: VerificationChannel,
        _destination: &str,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("sms gateway timeout".to_string()))
    }

    async fn check_code(
        &self,
        _channel: VerificationChannel,
        _destination: &str,
        _code: &str,
    ) -> Result<bool, TransportError> {
        Err(TransportError::Unavailable("sms gateway timeout".to_string()))
    }
}

/// Holds every code check until `release` is called; accepts `123456`.
#[derive(Default)]
pub(super) struct GatedTransport {
    checking: tokio::sync::Notify,
    released: tokio::sync::Notify,
}

impl GatedTransport {
    pub(super) async fn wait_for_check(&self) {
        self.checking.notified().await;
    }

    pub(super) fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl VerificationTransport for GatedTransport {
    async fn send_code(
        &self,
        _channel: VerificationChannel,
        _destination: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn check_code(
        &self,
        _channel: VerificationChannel,
        _destination: &str,
        code: &str,
    ) -> Result<bool, TransportError> {
        self.checking.notify_one();
        self.released.notified().await;
        Ok(code == "123456")
    }
}

/// Treats every delay as already elapsed: tasks are held and run only by `run_elapsed`,
/// and cancelling a handle has no effect on them.
#[derive(Default)]
pub(super) struct ElapsedScheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl ElapsedScheduler {
    pub(super) fn held(&self) -> usize {
        self.tasks.lock().expect("scheduler mutex poisoned").len()
    }

    pub(super) async fn run_elapsed(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("scheduler mutex poisoned"));
        for task in tasks {
            task.await;
        }
    }
}

impl Scheduler for ElapsedScheduler {
    fn schedule_after(&self, _delay: Duration, task: ScheduledTask) -> TaskHandle {
        let mut tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        tasks.push(task);
        let (cancel, _elapsed) = tokio::sync::oneshot::channel();
        TaskHandle::from_parts(tasks.len() as u64, cancel)
    }
}

/// Doubles shared by a test and the engine under test.
pub(super) struct Harness {
    pub(super) store: Arc<MemoryDraftStore>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) submitter: Arc<CountingSubmitter>,
    pub(super) transport: Arc<dyn VerificationTransport>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_store(MemoryDraftStore::default())
    }

    pub(super) fn with_store(store: MemoryDraftStore) -> Self {
        Self {
            store: Arc::new(store),
            notifier: Arc::new(RecordingNotifier::default()),
            submitter: Arc::new(CountingSubmitter::default()),
            transport: Arc::new(StaticCodeTransport::default()),
        }
    }

    pub(super) fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            transport: self.transport.clone(),
            notifier: self.notifier.clone(),
            submitter: self.submitter.clone(),
            scheduler: Arc::new(TokioScheduler::current().expect("inside runtime")),
        }
    }

    pub(super) fn engine(&self, schema: EntitySchema) -> ProfileCompletionEngine {
        ProfileCompletionEngine::new(
            Arc::new(schema),
            draft_key(),
            self.collaborators(),
            EngineSettings::default(),
        )
    }
}

pub(super) fn draft_key() -> DraftKey {
    DraftKey::for_profile(EntityKind::Sponsor, "user-17")
}

pub(super) fn snapshot_with(field: &str, value: &str) -> FormSnapshot {
    [(field, FieldValue::text(value))].into_iter().collect()
}

/// One required email field that must be verified.
pub(super) fn email_schema() -> EntitySchema {
    EntitySchema::new(
        EntityKind::Agency,
        vec![FieldSpec::required("email", "contact", 1).verified_by(VerificationChannel::Email)],
        vec![PageSpec::new("contact", "Contact", &["email"])],
    )
    .expect("schema builds")
}

/// Name page, verified phone page, terms page.
pub(super) fn sponsor_like_schema() -> EntitySchema {
    EntitySchema::new(
        EntityKind::Sponsor,
        vec![
            FieldSpec::required("fullName", "identity", 2),
            FieldSpec::required("phone", "contact", 2).verified_by(VerificationChannel::Phone),
            FieldSpec::required("termsAccepted", "consent", 1).must_be_true(),
        ],
        vec![
            PageSpec::new("identity", "Identity", &["fullName"]),
            PageSpec::new("contact", "Contact", &["phone"]),
            PageSpec::new("review", "Review", &["termsAccepted"]),
        ],
    )
    .expect("schema builds")
}

/// Fills and verifies every field of [`sponsor_like_schema`] and moves to the last page.
pub(super) async fn complete_sponsor_like(engine: &mut ProfileCompletionEngine) {
    engine
        .apply_edit("fullName", FieldValue::text("Fatima Al Nuaimi"))
        .expect("edit");
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    engine.request_code("phone").await.expect("code sent");
    engine.submit_code("phone", "123456").await.expect("verified");
    engine
        .apply_edit("termsAccepted", FieldValue::Bool(true))
        .expect("edit");
    engine.jump_to(2).expect("all earlier pages valid");
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
