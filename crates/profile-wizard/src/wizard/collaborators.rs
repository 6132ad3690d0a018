use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{DraftEnvelope, DraftKey, FormSnapshot, ProfileId, VerificationChannel};
use super::scheduler::Scheduler;

/// Durable key-value store for drafts. `put` must replace the envelope atomically.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn get(&self, key: &DraftKey) -> Result<Option<DraftEnvelope>, StoreError>;
    async fn put(&self, key: &DraftKey, envelope: DraftEnvelope) -> Result<(), StoreError>;
    async fn delete(&self, key: &DraftKey) -> Result<(), StoreError>;
}

/// Error enumeration for draft store failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("draft store unavailable: {0}")]
    Unavailable(String),
    #[error("stored draft is unreadable: {0}")]
    Corrupt(String),
}

/// One-time-code delivery and checking.
#[async_trait]
pub trait VerificationTransport: Send + Sync {
    async fn send_code(
        &self,
        channel: VerificationChannel,
        destination: &str,
    ) -> Result<(), TransportError>;

    /// `Ok(false)` means the code was delivered to the backend and rejected.
    async fn check_code(
        &self,
        channel: VerificationChannel,
        destination: &str,
        code: &str,
    ) -> Result<bool, TransportError>;
}

/// Verification transport failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("verification transport unavailable: {0}")]
    Unavailable(String),
    #[error("destination rejected by provider: {0}")]
    Rejected(String),
}

/// Accepts a fixed set of codes. Stand-in for a real one-time-code service.
#[derive(Debug, Clone)]
pub struct StaticCodeTransport {
    accepted: BTreeSet<String>,
}

impl StaticCodeTransport {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for StaticCodeTransport {
    fn default() -> Self {
        Self::new(["123456", "000000"])
    }
}

#[async_trait]
impl VerificationTransport for StaticCodeTransport {
    async fn send_code(
        &self,
        channel: VerificationChannel,
        destination: &str,
    ) -> Result<(), TransportError> {
        tracing::info!(channel = channel.label(), %destination, "issued demo verification code");
        Ok(())
    }

    async fn check_code(
        &self,
        _channel: VerificationChannel,
        _destination: &str,
        code: &str,
    ) -> Result<bool, TransportError> {
        Ok(self.accepted.contains(code.trim()))
    }
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Error,
}

/// Toast/alert payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn info(title: &str, message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn error(title: &str, message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

/// Fire-and-forget notification hook (toast, alert banner, log).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Final profile submission endpoint.
#[async_trait]
pub trait ProfileSubmitter: Send + Sync {
    async fn submit(&self, snapshot: &FormSnapshot) -> Result<ProfileId, SubmitRejection>;
}

/// Submit endpoint failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitRejection {
    #[error("profile rejected: {0}")]
    Rejected(String),
    #[error("profile service unavailable: {0}")]
    Unavailable(String),
}

/// Per-session collaborators, constructed by the host and passed in explicitly.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DraftStore>,
    pub transport: Arc<dyn VerificationTransport>,
    pub notifier: Arc<dyn NotificationSink>,
    pub submitter: Arc<dyn ProfileSubmitter>,
    pub scheduler: Arc<dyn Scheduler>,
}
