//! Contact verification lifecycle for a single phone or email field.
//!
//! ```text
//! Idle ──request──▶ Sending ──ok──▶ Sent ──submit──▶ Verifying ──match──▶ Verified
//!                      │             ▲  │                │
//!                      │             │  └──resend──▶ Sending
//!                      │             └────mismatch───────┘
//!                      └──error──▶ Failed ──reset──▶ Idle
//! ```
//!
//! Each transport-bound operation is split into a synchronous `begin_*` transition and a
//! `finish_*` completion, so hosts that overlap calls for different fields can drive the
//! machine directly. `request_code` and `submit_code` wrap both halves around the transport.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::collaborators::{TransportError, VerificationTransport};
use super::domain::VerificationChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Idle,
    Sending,
    Sent,
    Verifying,
    Verified,
    Failed,
}

impl VerificationState {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationState::Idle => "idle",
            VerificationState::Sending => "sending",
            VerificationState::Sent => "sent",
            VerificationState::Verifying => "verifying",
            VerificationState::Verified => "verified",
            VerificationState::Failed => "failed",
        }
    }
}

/// Per-field verification progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub state: VerificationState,
    /// Last code submitted for checking.
    pub code: String,
    pub attempts: u32,
    /// Value the code was sent to; completions for any other value are stale.
    pub destination: Option<String>,
}

impl Default for VerificationRecord {
    fn default() -> Self {
        Self {
            state: VerificationState::Idle,
            code: String::new(),
            attempts: 0,
            destination: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("a value is required before verifying")]
    EmptyInput,
    #[error("the code is incorrect (attempt {attempts})")]
    InvalidCode { attempts: u32 },
    #[error("verification transport failed: {0}")]
    TransportFailure(String),
    #[error("cannot {action} while verification is {}", .state.label())]
    IllegalTransition {
        state: VerificationState,
        action: &'static str,
    },
    #[error("too many incorrect codes ({attempts})")]
    AttemptsExhausted { attempts: u32 },
    #[error("the field changed while the request was in flight")]
    Stale,
}

impl From<TransportError> for VerificationError {
    fn from(value: TransportError) -> Self {
        VerificationError::TransportFailure(value.to_string())
    }
}

/// State machine for one verifiable field.
#[derive(Debug, Clone)]
pub struct VerificationMachine {
    field: String,
    channel: VerificationChannel,
    code_length: usize,
    max_attempts: Option<u32>,
    record: VerificationRecord,
}

impl VerificationMachine {
    pub fn new(field: &str, channel: VerificationChannel, code_length: usize) -> Self {
        Self {
            field: field.to_string(),
            channel,
            code_length,
            max_attempts: None,
            record: VerificationRecord::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn channel(&self) -> VerificationChannel {
        self.channel
    }

    pub fn state(&self) -> VerificationState {
        self.record.state
    }

    pub fn record(&self) -> &VerificationRecord {
        &self.record
    }

    pub fn is_verified(&self) -> bool {
        self.record.state == VerificationState::Verified
    }

    /// Back to `Idle` from any state, forgetting the destination and attempts.
    pub fn reset(&mut self) {
        if self.record.state != VerificationState::Idle {
            debug!(field = %self.field, from = self.record.state.label(), "verification reset");
        }
        self.record = VerificationRecord::default();
    }

    /// Marks the field verified for `destination` without a round trip (draft resume).
    pub(crate) fn restore_verified(&mut self, destination: &str) {
        self.record = VerificationRecord {
            state: VerificationState::Verified,
            code: String::new(),
            attempts: 0,
            destination: Some(destination.to_string()),
        };
    }

    /// `Idle | Sent | Failed → Sending`.
    pub fn begin_request(&mut self, destination: &str) -> Result<(), VerificationError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(VerificationError::EmptyInput);
        }
        match self.record.state {
            VerificationState::Idle | VerificationState::Sent | VerificationState::Failed => {}
            state => {
                return Err(VerificationError::IllegalTransition {
                    state,
                    action: "send a code",
                })
            }
        }
        if self.record.destination.as_deref() != Some(destination) {
            self.record.attempts = 0;
        }
        self.record.state = VerificationState::Sending;
        self.record.destination = Some(destination.to_string());
        debug!(field = %self.field, channel = self.channel.label(), "sending verification code");
        Ok(())
    }

    /// `Sending → Sent` on success, `Sending → Failed` on transport error.
    pub fn finish_request(
        &mut self,
        destination: &str,
        outcome: Result<(), TransportError>,
    ) -> Result<(), VerificationError> {
        self.ensure_current(VerificationState::Sending, destination, "finish sending")?;
        match outcome {
            Ok(()) => {
                self.record.state = VerificationState::Sent;
                info!(field = %self.field, "verification code sent");
                Ok(())
            }
            Err(err) => {
                self.record.state = VerificationState::Failed;
                warn!(field = %self.field, error = %err, "verification code delivery failed");
                Err(err.into())
            }
        }
    }

    /// `Sent → Verifying`. Returns the destination the code must be checked against.
    pub fn begin_submit(&mut self, code: &str) -> Result<String, VerificationError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(VerificationError::EmptyInput);
        }
        if self.record.state != VerificationState::Sent {
            return Err(VerificationError::IllegalTransition {
                state: self.record.state,
                action: "submit a code",
            });
        }
        if let Some(max) = self.max_attempts {
            if self.record.attempts >= max {
                return Err(VerificationError::AttemptsExhausted {
                    attempts: self.record.attempts,
                });
            }
        }
        let destination = self.record.destination.clone().unwrap_or_default();
        self.record.state = VerificationState::Verifying;
        self.record.code = code.to_string();
        Ok(destination)
    }

    /// `Verifying → Verified` on match, back to `Sent` with one more attempt on mismatch,
    /// `Failed` on transport error.
    pub fn finish_submit(
        &mut self,
        destination: &str,
        outcome: Result<bool, TransportError>,
    ) -> Result<(), VerificationError> {
        self.ensure_current(VerificationState::Verifying, destination, "finish verifying")?;
        match outcome {
            Ok(true) => {
                self.record.state = VerificationState::Verified;
                info!(field = %self.field, "contact verified");
                Ok(())
            }
            Ok(false) => {
                self.record.state = VerificationState::Sent;
                self.record.attempts += 1;
                debug!(field = %self.field, attempts = self.record.attempts, "incorrect code");
                Err(VerificationError::InvalidCode {
                    attempts: self.record.attempts,
                })
            }
            Err(err) => {
                self.record.state = VerificationState::Failed;
                warn!(field = %self.field, error = %err, "code check failed");
                Err(err.into())
            }
        }
    }

    /// Sends a code to `destination` and waits for the transport.
    pub async fn request_code(
        &mut self,
        transport: &dyn VerificationTransport,
        destination: &str,
    ) -> Result<(), VerificationError> {
        self.begin_request(destination)?;
        let destination = destination.trim();
        let outcome = transport.send_code(self.channel, destination).await;
        self.finish_request(destination, outcome)
    }

    /// Checks `code` against the transport's accepted set.
    pub async fn submit_code(
        &mut self,
        transport: &dyn VerificationTransport,
        code: &str,
    ) -> Result<(), VerificationError> {
        let destination = self.begin_submit(code)?;
        let outcome = transport
            .check_code(self.channel, &destination, code.trim())
            .await;
        self.finish_submit(&destination, outcome)
    }

    /// Auto-submit detection: a full-length, all-digit code typed while a code is pending.
    pub fn accepts_input(&self, input: &str) -> bool {
        let input = input.trim();
        self.record.state == VerificationState::Sent
            && input.chars().count() == self.code_length
            && input.chars().all(|ch| ch.is_ascii_digit())
    }

    fn ensure_current(
        &mut self,
        expected: VerificationState,
        destination: &str,
        action: &'static str,
    ) -> Result<(), VerificationError> {
        if self.record.state != expected {
            return Err(VerificationError::IllegalTransition {
                state: self.record.state,
                action,
            });
        }
        if self.record.destination.as_deref() != Some(destination.trim()) {
            self.reset();
            return Err(VerificationError::Stale);
        }
        Ok(())
    }
}
