use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::collaborators::{DraftStore, Notification, NotificationSink, StoreError};
use super::domain::{DraftEnvelope, DraftKey, FormSnapshot};
use super::scheduler::{Scheduler, TaskHandle};

/// Error surfaced by manual saves and draft lifecycle calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved { version: u64 },
    /// Another save was in flight; the snapshot will be written right after it.
    Queued,
    /// The draft was discarded before the write could start.
    Dropped,
}

#[derive(Debug)]
struct QueuedSave {
    snapshot: FormSnapshot,
    silent: bool,
    generation: u64,
}

#[derive(Debug, Default)]
struct SaveState {
    in_flight: bool,
    queued: Option<QueuedSave>,
    version: u64,
    generation: u64,
    last_saved: Option<(u64, DateTime<Utc>)>,
}

struct DraftInner {
    key: DraftKey,
    store: Arc<dyn DraftStore>,
    notifier: Arc<dyn NotificationSink>,
    state: Mutex<SaveState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl DraftInner {
    fn state(&self) -> MutexGuard<'_, SaveState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        self.state().generation
    }

    /// At most one writer at a time; later snapshots supersede earlier queued ones.
    /// `generation` is the discard generation observed when the save was requested.
    async fn save(
        &self,
        snapshot: FormSnapshot,
        silent: bool,
        generation: u64,
    ) -> Result<SaveOutcome, PersistenceError> {
        {
            let mut state = self.state();
            if state.generation != generation {
                debug!(key = %self.key.0, "draft discarded since the save was requested");
                return Ok(SaveOutcome::Dropped);
            }
            if state.in_flight {
                let silent = silent
                    && state
                        .queued
                        .as_ref()
                        .map(|queued| queued.silent)
                        .unwrap_or(true);
                state.queued = Some(QueuedSave {
                    snapshot,
                    silent,
                    generation,
                });
                debug!(key = %self.key.0, "save in flight, queued newer snapshot");
                return Ok(SaveOutcome::Queued);
            }
            state.in_flight = true;
        }

        let mut guard = InFlightGuard {
            inner: self,
            armed: true,
        };

        let first = self.write(snapshot, silent, generation).await;

        loop {
            let next = {
                let mut state = self.state();
                match state.queued.take() {
                    Some(next) => next,
                    None => {
                        state.in_flight = false;
                        guard.armed = false;
                        break;
                    }
                }
            };
            // Failures of queued writes are reported through the notifier by `write`.
            let _ = self.write(next.snapshot, next.silent, next.generation).await;
        }

        first
    }

    async fn write(
        &self,
        snapshot: FormSnapshot,
        silent: bool,
        generation: u64,
    ) -> Result<SaveOutcome, PersistenceError> {
        let _write = self.write_lock.lock().await;

        let version = {
            let mut state = self.state();
            if state.generation != generation {
                debug!(key = %self.key.0, "draft discarded, skipping stale write");
                return Ok(SaveOutcome::Dropped);
            }
            state.version += 1;
            state.version
        };

        let envelope = DraftEnvelope {
            snapshot,
            saved_at: Utc::now(),
            version,
        };
        let saved_at = envelope.saved_at;

        match self.store.put(&self.key, envelope).await {
            Ok(()) => {
                self.state().last_saved = Some((version, saved_at));
                info!(key = %self.key.0, version, silent, "draft saved");
                if !silent {
                    self.notifier
                        .notify(Notification::info("Draft saved", "Your progress has been saved."));
                }
                Ok(SaveOutcome::Saved { version })
            }
            Err(err) => {
                warn!(key = %self.key.0, version, error = %err, "draft save failed");
                if !silent {
                    self.notifier
                        .notify(Notification::error("Could not save draft", err.to_string()));
                }
                Err(err.into())
            }
        }
    }
}

/// Clears the in-flight flag if a save future is dropped mid-write.
struct InFlightGuard<'a> {
    inner: &'a DraftInner,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state().in_flight = false;
        }
    }
}

/// Debounced, serialized auto-save of one session's draft.
pub struct DraftPersistence {
    inner: Arc<DraftInner>,
    scheduler: Arc<dyn Scheduler>,
    window: Duration,
    pending: Option<TaskHandle>,
}

impl DraftPersistence {
    pub fn new(
        key: DraftKey,
        store: Arc<dyn DraftStore>,
        notifier: Arc<dyn NotificationSink>,
        scheduler: Arc<dyn Scheduler>,
        window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DraftInner {
                key,
                store,
                notifier,
                state: Mutex::new(SaveState::default()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
            scheduler,
            window,
            pending: None,
        }
    }

    pub fn key(&self) -> &DraftKey {
        &self.inner.key
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)starts the quiet window; only the last snapshot of a burst is written.
    pub fn schedule(&mut self, snapshot: FormSnapshot) {
        self.cancel_pending();
        let inner = self.inner.clone();
        let generation = inner.generation();
        let task = Box::pin(async move {
            let _ = inner.save(snapshot, true, generation).await;
        });
        self.pending = Some(self.scheduler.schedule_after(self.window, task));
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Immediate write. A manual save supersedes any scheduled auto-save.
    pub async fn save_now(
        &mut self,
        snapshot: FormSnapshot,
        silent: bool,
    ) -> Result<SaveOutcome, PersistenceError> {
        self.cancel_pending();
        let generation = self.inner.generation();
        self.inner.save(snapshot, silent, generation).await
    }

    /// Loads the stored envelope; later saves continue its version sequence.
    pub async fn load(&self) -> Result<Option<DraftEnvelope>, PersistenceError> {
        let envelope = self.inner.store.get(&self.inner.key).await?;
        if let Some(envelope) = &envelope {
            let mut state = self.inner.state();
            state.version = state.version.max(envelope.version);
            state.last_saved = Some((envelope.version, envelope.saved_at));
        }
        Ok(envelope)
    }

    /// Drops pending and queued saves, waits for an in-flight write, then deletes the draft.
    pub async fn discard(&mut self) -> Result<(), PersistenceError> {
        self.cancel_pending();
        {
            let mut state = self.inner.state();
            state.generation += 1;
            state.queued = None;
        }
        let _write = self.inner.write_lock.lock().await;
        self.inner.store.delete(&self.inner.key).await?;
        self.inner.state().last_saved = None;
        info!(key = %self.inner.key.0, "draft discarded");
        Ok(())
    }

    pub fn last_saved(&self) -> Option<(u64, DateTime<Utc>)> {
        self.inner.state().last_saved
    }

    pub fn is_saving(&self) -> bool {
        self.inner.state().in_flight
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.scheduler.cancel(handle);
        }
    }
}

impl Drop for DraftPersistence {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Stores each draft as a JSON file, replaced atomically through a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    directory: PathBuf,
}

impl FileDraftStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &DraftKey) -> PathBuf {
        let name: String = key
            .0
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{name}.json"))
    }
}

fn unavailable(err: std::io::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn get(&self, key: &DraftKey) -> Result<Option<DraftEnvelope>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| StoreError::Corrupt(err.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn put(&self, key: &DraftKey, envelope: DraftEnvelope) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(unavailable)?;
        let target = self.path_for(key);
        let temp = target.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let bytes =
            serde_json::to_vec_pretty(&envelope).map_err(|err| StoreError::Corrupt(err.to_string()))?;

        tokio::fs::write(&temp, bytes).await.map_err(unavailable)?;
        if let Err(err) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(unavailable(err));
        }
        Ok(())
    }

    async fn delete(&self, key: &DraftKey) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(unavailable(err)),
        }
    }
}
