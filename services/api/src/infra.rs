use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use profile_wizard::config::AppConfig;
use profile_wizard::error::AppError;
use profile_wizard::wizard::{
    Collaborators, DraftEnvelope, DraftKey, DraftStore, FileDraftStore, FormSnapshot,
    Notification, NotificationKind, NotificationSink, ProfileId, ProfileSubmitter,
    StaticCodeTransport, StoreError, SubmitRejection, TokioScheduler,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local draft store used when no draft directory is configured.
#[derive(Default, Clone)]
pub(crate) struct InMemoryDraftStore {
    drafts: Arc<Mutex<HashMap<DraftKey, DraftEnvelope>>>,
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn get(&self, key: &DraftKey) -> Result<Option<DraftEnvelope>, StoreError> {
        Ok(lock(&self.drafts).get(key).cloned())
    }

    async fn put(&self, key: &DraftKey, envelope: DraftEnvelope) -> Result<(), StoreError> {
        lock(&self.drafts).insert(key.clone(), envelope);
        Ok(())
    }

    async fn delete(&self, key: &DraftKey) -> Result<(), StoreError> {
        lock(&self.drafts).remove(key);
        Ok(())
    }
}

/// Forwards user-facing notifications to the log.
#[derive(Default, Clone)]
pub(crate) struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Info => {
                info!(title = %notification.title, message = %notification.message, "notification")
            }
            NotificationKind::Error => {
                warn!(title = %notification.title, message = %notification.message, "notification")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SubmittedProfile {
    pub(crate) id: ProfileId,
    pub(crate) snapshot: FormSnapshot,
    pub(crate) submitted_at: DateTime<Utc>,
}

/// Accepts every profile and hands out sequential ids.
#[derive(Default, Clone)]
pub(crate) struct SequentialSubmitter {
    next: Arc<AtomicU64>,
    submitted: Arc<Mutex<Vec<SubmittedProfile>>>,
}

impl SequentialSubmitter {
    pub(crate) fn submitted(&self) -> Vec<SubmittedProfile> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl ProfileSubmitter for SequentialSubmitter {
    async fn submit(&self, snapshot: &FormSnapshot) -> Result<ProfileId, SubmitRejection> {
        let sequence = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let id = ProfileId(format!("profile-{sequence:05}"));
        let submitted_at = Utc::now();
        info!(profile = %id.0, fields = snapshot.len(), %submitted_at, "profile accepted");
        lock(&self.submitted).push(SubmittedProfile {
            id: id.clone(),
            snapshot: snapshot.clone(),
            submitted_at,
        });
        Ok(id)
    }
}

/// Wires the engine collaborators for this process. Must run inside the tokio runtime.
pub(crate) fn build_collaborators(config: &AppConfig) -> Result<Collaborators, AppError> {
    let store: Arc<dyn DraftStore> = match &config.drafts.directory {
        Some(directory) => Arc::new(FileDraftStore::new(directory)),
        None => Arc::new(InMemoryDraftStore::default()),
    };
    let scheduler = TokioScheduler::current()
        .map_err(|err| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;

    Ok(Collaborators {
        store,
        transport: Arc::new(StaticCodeTransport::new(
            config.verification.demo_codes.iter().cloned(),
        )),
        notifier: Arc::new(TracingNotifier),
        submitter: Arc::new(SequentialSubmitter::default()),
        scheduler: Arc::new(scheduler),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_wizard::wizard::FieldValue;

    fn envelope(version: u64) -> DraftEnvelope {
        let mut snapshot = FormSnapshot::new();
        snapshot.set("fullName", FieldValue::text("Layla Haddad"));
        DraftEnvelope {
            snapshot,
            saved_at: Utc::now(),
            version,
        }
    }

    #[tokio::test]
    async fn in_memory_store_replaces_and_deletes() {
        let store = InMemoryDraftStore::default();
        let key = DraftKey("sponsor:ops-1".to_string());

        store.put(&key, envelope(1)).await.expect("put");
        store.put(&key, envelope(2)).await.expect("put");
        assert_eq!(
            store.get(&key).await.expect("get").map(|env| env.version),
            Some(2)
        );

        store.delete(&key).await.expect("delete");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn submitter_hands_out_sequential_ids() {
        let submitter = SequentialSubmitter::default();
        let first = submitter.submit(&FormSnapshot::new()).await.expect("accepted");
        let second = submitter.submit(&FormSnapshot::new()).await.expect("accepted");

        assert_eq!(first.0, "profile-00001");
        assert_eq!(second.0, "profile-00002");
        assert_eq!(submitter.submitted().len(), 2);
    }

    #[tokio::test]
    async fn draft_directory_selects_file_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = AppConfig::load().expect("config loads");
        config.drafts.directory = Some(dir.path().to_path_buf());
        let collaborators = build_collaborators(&config).expect("collaborators");

        let key = DraftKey("maid:ops-2".to_string());
        collaborators.store.put(&key, envelope(1)).await.expect("put");
        assert!(dir.path().join("maid_ops-2.json").exists());
    }
}
