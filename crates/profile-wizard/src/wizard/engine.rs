use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::aggregate;
use super::collaborators::{
    Collaborators, Notification, NotificationSink, ProfileSubmitter, SubmitRejection,
    TransportError, VerificationTransport,
};
use super::completion::{self, CompletionResult};
use super::domain::{
    verified_flag_name, DraftKey, EntityKind, FieldError, FieldValue, FormSnapshot, ProfileId,
    VerificationChannel,
};
use super::drafts::{DraftPersistence, PersistenceError, SaveOutcome};
use super::pages::{PageController, PageGateError};
use super::schema::EntitySchema;
use super::validation;
use super::verification::{
    VerificationError, VerificationMachine, VerificationRecord, VerificationState,
};
use crate::config::{DraftConfig, VerificationConfig};

/// Per-session tuning derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub autosave_window: Duration,
    pub code_length: usize,
    pub max_attempts: Option<u32>,
}

impl EngineSettings {
    pub fn from_config(
        schema: &EntitySchema,
        drafts: &DraftConfig,
        verification: &VerificationConfig,
    ) -> Self {
        Self {
            autosave_window: schema.autosave_window(drafts),
            code_length: verification.code_length,
            max_attempts: verification.max_attempts,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            autosave_window: Duration::from_secs(3),
            code_length: 6,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("profile has already been submitted")]
    AlreadySubmitted,
    #[error("field '{0}' is managed by verification and cannot be edited")]
    ReadOnlyField(String),
    #[error("field '{0}' does not support verification")]
    UnknownVerificationField(String),
    #[error("submit is only available on the last page (current {current}, last {terminal})")]
    NotOnTerminalPage { current: usize, terminal: usize },
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Page(#[from] PageGateError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Submit(#[from] SubmitRejection),
}

/// Result of a single field edit.
#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub field: String,
    pub error: Option<String>,
    /// A verification in progress or completed for the old value was dropped.
    pub verification_reset: bool,
    pub completion: CompletionResult,
    pub errors: Vec<FieldError>,
}

/// Code delivery started by [`ProfileCompletionEngine::begin_code_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    pub field: String,
    pub channel: VerificationChannel,
    pub destination: String,
}

/// Code check started by [`ProfileCompletionEngine::begin_code_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCheck {
    pub field: String,
    pub channel: VerificationChannel,
    pub destination: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub count: usize,
    pub is_terminal: bool,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftStatus {
    pub version: Option<u64>,
    pub saved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub saving: bool,
    pub pending: bool,
}

/// Serializable read model of a session.
#[derive(Debug, Clone, Serialize)]
pub struct EngineView {
    pub entity: EntityKind,
    pub page: PageView,
    pub snapshot: FormSnapshot,
    pub completion: CompletionResult,
    pub errors: Vec<FieldError>,
    pub verification: BTreeMap<String, VerificationRecord>,
    pub draft: DraftStatus,
    pub submitted: Option<ProfileId>,
}

/// Orchestrates one in-progress profile edit: edits, verification, paging, drafts, submit.
pub struct ProfileCompletionEngine {
    schema: Arc<EntitySchema>,
    snapshot: FormSnapshot,
    pages: PageController,
    verifications: BTreeMap<String, VerificationMachine>,
    drafts: DraftPersistence,
    transport: Arc<dyn VerificationTransport>,
    notifier: Arc<dyn NotificationSink>,
    submitter: Arc<dyn ProfileSubmitter>,
    submitted: Option<ProfileId>,
}

impl ProfileCompletionEngine {
    pub fn new(
        schema: Arc<EntitySchema>,
        key: DraftKey,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Self {
        let verifications = schema
            .verifiable_fields()
            .filter_map(|spec| {
                let channel = spec.verification?;
                let machine = VerificationMachine::new(&spec.name, channel, settings.code_length)
                    .with_max_attempts(settings.max_attempts);
                Some((spec.name.clone(), machine))
            })
            .collect();
        let drafts = DraftPersistence::new(
            key,
            collaborators.store,
            collaborators.notifier.clone(),
            collaborators.scheduler,
            settings.autosave_window,
        );

        Self {
            pages: PageController::new(&schema),
            schema,
            snapshot: FormSnapshot::new(),
            verifications,
            drafts,
            transport: collaborators.transport,
            notifier: collaborators.notifier,
            submitter: collaborators.submitter,
            submitted: None,
        }
    }

    /// Builds an engine and restores any stored draft, including verified contacts and the
    /// first page that still needs input.
    pub async fn resume(
        schema: Arc<EntitySchema>,
        key: DraftKey,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::new(schema, key, collaborators, settings);
        let Some(envelope) = engine.drafts.load().await? else {
            return Ok(engine);
        };

        engine.snapshot = envelope.snapshot;
        for (field, machine) in engine.verifications.iter_mut() {
            let flag = verified_flag_name(field);
            if !engine.snapshot.flag(&flag) {
                continue;
            }
            match engine.snapshot.get(field).and_then(FieldValue::to_scalar_text) {
                Some(value) if !value.is_empty() => machine.restore_verified(&value),
                _ => {
                    engine.snapshot.set(flag, FieldValue::Bool(false));
                }
            }
        }

        let resume_page = (0..engine.pages.page_count())
            .find(|&page| !engine.pages.is_page_valid(&engine.schema, &engine.snapshot, page))
            .unwrap_or_else(|| engine.pages.terminal());
        engine.pages.restore(resume_page);

        info!(
            key = %engine.drafts.key().0,
            version = envelope.version,
            page = engine.pages.current(),
            "resumed profile draft"
        );
        Ok(engine)
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn snapshot(&self) -> &FormSnapshot {
        &self.snapshot
    }

    pub fn current_page(&self) -> usize {
        self.pages.current()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.is_some()
    }

    pub fn transport(&self) -> Arc<dyn VerificationTransport> {
        self.transport.clone()
    }

    pub fn verification(&self, field: &str) -> Option<&VerificationRecord> {
        self.verifications.get(field).map(VerificationMachine::record)
    }

    pub fn completion(&self) -> CompletionResult {
        completion::score(self.schema.fields(), &self.snapshot)
    }

    pub fn errors(&self) -> Vec<FieldError> {
        aggregate::collect(self.schema.fields(), &self.snapshot)
    }

    /// Stores `value`, re-validates, re-scores and schedules a debounced save.
    ///
    /// Changing a verifiable field drops any verification for the previous value and clears
    /// its flag before the next read.
    pub fn apply_edit(
        &mut self,
        field: &str,
        value: FieldValue,
    ) -> Result<EditOutcome, EngineError> {
        self.ensure_open()?;
        if self.schema.flag_owner(field).is_some() {
            return Err(EngineError::ReadOnlyField(field.to_string()));
        }

        let previous = self.snapshot.set(field, value);
        let changed = previous.as_ref() != self.snapshot.get(field);

        let mut verification_reset = false;
        if changed {
            if let Some(machine) = self.verifications.get_mut(field) {
                verification_reset = machine.state() != VerificationState::Idle;
                machine.reset();
                let flag = verified_flag_name(field);
                if self.snapshot.flag(&flag) {
                    self.snapshot.set(flag, FieldValue::Bool(false));
                    verification_reset = true;
                }
            }
        }

        let error = validation::validate(&self.schema, field, self.snapshot.get(field), &self.snapshot);
        debug!(%field, changed, has_error = error.is_some(), "field edited");
        if changed {
            self.drafts.schedule(self.snapshot.clone());
        }

        Ok(EditOutcome {
            field: field.to_string(),
            error,
            verification_reset,
            completion: self.completion(),
            errors: self.errors(),
        })
    }

    /// `Idle | Sent | Failed → Sending` for `field`, using its current value as destination.
    pub fn begin_code_request(&mut self, field: &str) -> Result<CodeRequest, EngineError> {
        self.ensure_open()?;
        let destination = self.current_text(field);
        let machine = self.machine_mut(field)?;
        machine.begin_request(&destination)?;
        Ok(CodeRequest {
            field: field.to_string(),
            channel: machine.channel(),
            destination: destination.trim().to_string(),
        })
    }

    pub fn finish_code_request(
        &mut self,
        request: &CodeRequest,
        outcome: Result<(), TransportError>,
    ) -> Result<(), EngineError> {
        self.ensure_fresh(&request.field, &request.destination)?;
        let result = self
            .machine_mut(&request.field)?
            .finish_request(&request.destination, outcome);
        match &result {
            Ok(()) => self.notifier.notify(Notification::info(
                "Verification code sent",
                format!("A code was sent to {}.", request.destination),
            )),
            Err(err) => self
                .notifier
                .notify(Notification::error("Could not send code", err.to_string())),
        }
        Ok(result?)
    }

    /// Sends a verification code to the current value of `field`.
    pub async fn request_code(&mut self, field: &str) -> Result<(), EngineError> {
        let request = self.begin_code_request(field)?;
        let outcome = self
            .transport
            .send_code(request.channel, &request.destination)
            .await;
        self.finish_code_request(&request, outcome)
    }

    /// `Sent → Verifying` for `field`.
    pub fn begin_code_check(&mut self, field: &str, code: &str) -> Result<CodeCheck, EngineError> {
        self.ensure_open()?;
        let machine = self.machine_mut(field)?;
        let destination = machine.begin_submit(code)?;
        Ok(CodeCheck {
            field: field.to_string(),
            channel: machine.channel(),
            destination,
            code: code.trim().to_string(),
        })
    }

    /// Applies a code check result. A match sets the `<field>Verified` flag.
    pub fn finish_code_check(
        &mut self,
        check: &CodeCheck,
        outcome: Result<bool, TransportError>,
    ) -> Result<(), EngineError> {
        self.ensure_fresh(&check.field, &check.destination)?;
        let result = self
            .machine_mut(&check.field)?
            .finish_submit(&check.destination, outcome);
        match &result {
            Ok(()) => {
                self.snapshot
                    .set(verified_flag_name(&check.field), FieldValue::Bool(true));
                self.drafts.schedule(self.snapshot.clone());
                let label = self
                    .schema
                    .field(&check.field)
                    .map(|spec| spec.label.clone())
                    .unwrap_or_else(|| check.field.clone());
                self.notifier
                    .notify(Notification::info("Verified", format!("{label} verified.")));
            }
            Err(VerificationError::InvalidCode { .. }) => self.notifier.notify(
                Notification::error("Incorrect code", "Check the code and try again."),
            ),
            Err(err) => self
                .notifier
                .notify(Notification::error("Verification failed", err.to_string())),
        }
        Ok(result?)
    }

    /// Checks `code` for `field` against the verification transport.
    pub async fn submit_code(&mut self, field: &str, code: &str) -> Result<(), EngineError> {
        let check = self.begin_code_check(field, code)?;
        let outcome = self
            .transport
            .check_code(check.channel, &check.destination, &check.code)
            .await;
        self.finish_code_check(&check, outcome)
    }

    /// Auto-submit: checks the code as soon as a full-length numeric code is typed.
    /// Returns whether a check was performed.
    pub async fn code_input(&mut self, field: &str, input: &str) -> Result<bool, EngineError> {
        if !self.accepts_code_input(field, input)? {
            return Ok(false);
        }
        self.submit_code(field, input).await?;
        Ok(true)
    }

    /// Whether `input` is a complete code that should be checked without an explicit submit.
    pub fn accepts_code_input(&mut self, field: &str, input: &str) -> Result<bool, EngineError> {
        Ok(self.machine_mut(field)?.accepts_input(input))
    }

    /// Drops a failed or pending verification back to `Idle`.
    pub fn reset_verification(&mut self, field: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.machine_mut(field)?.reset();
        let flag = verified_flag_name(field);
        if self.snapshot.flag(&flag) {
            self.snapshot.set(flag, FieldValue::Bool(false));
            self.drafts.schedule(self.snapshot.clone());
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<usize, EngineError> {
        let result = self.pages.next(&self.schema, &self.snapshot);
        self.report_gate(result)
    }

    pub fn prev(&mut self) -> usize {
        self.pages.prev()
    }

    pub fn jump_to(&mut self, page: usize) -> Result<usize, EngineError> {
        let result = self.pages.jump_to(&self.schema, &self.snapshot, page);
        self.report_gate(result)
    }

    /// Immediate save. `silent` suppresses success and failure notifications.
    pub async fn save_now(&mut self, silent: bool) -> Result<SaveOutcome, EngineError> {
        self.ensure_open()?;
        Ok(self.drafts.save_now(self.snapshot.clone(), silent).await?)
    }

    /// Clears the form and deletes the stored draft.
    pub async fn discard(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.drafts.discard().await?;
        self.snapshot = FormSnapshot::new();
        self.pages = PageController::new(&self.schema);
        self.verifications
            .values_mut()
            .for_each(VerificationMachine::reset);
        self.notifier
            .notify(Notification::info("Draft discarded", "The form was cleared."));
        Ok(())
    }

    /// Submits the profile from the last page once every page is valid. A successful
    /// submission deletes the draft and closes the session for edits.
    pub async fn submit(&mut self) -> Result<ProfileId, EngineError> {
        self.ensure_open()?;
        if !self.pages.is_terminal() {
            return Err(EngineError::NotOnTerminalPage {
                current: self.pages.current(),
                terminal: self.pages.terminal(),
            });
        }

        for page in 0..self.pages.page_count() {
            let errors = self.pages.page_errors(&self.schema, &self.snapshot, page);
            if !errors.is_empty() {
                let page_id = self.schema.pages()[page].id.clone();
                return self.report_gate(Err(PageGateError::PageInvalid {
                    page,
                    page_id,
                    errors,
                }));
            }
        }

        let profile_id = match self.submitter.submit(&self.snapshot).await {
            Ok(profile_id) => profile_id,
            Err(err) => {
                warn!(error = %err, "profile submission failed");
                self.notifier
                    .notify(Notification::error("Submission failed", err.to_string()));
                return Err(err.into());
            }
        };

        self.submitted = Some(profile_id.clone());
        if let Err(err) = self.drafts.discard().await {
            warn!(error = %err, "submitted profile but could not delete its draft");
        }
        info!(profile = %profile_id.0, entity = self.schema.kind().label(), "profile submitted");
        self.notifier.notify(Notification::info(
            "Profile submitted",
            format!("Profile {} was created.", profile_id.0),
        ));
        Ok(profile_id)
    }

    pub fn view(&self) -> EngineView {
        let index = self.pages.current();
        let (id, title) = self
            .schema
            .pages()
            .get(index)
            .map(|page| (page.id.clone(), page.title.clone()))
            .unwrap_or_default();
        let last_saved = self.drafts.last_saved();

        EngineView {
            entity: self.schema.kind(),
            page: PageView {
                index,
                id,
                title,
                count: self.pages.page_count(),
                is_terminal: self.pages.is_terminal(),
                errors: self.pages.page_errors(&self.schema, &self.snapshot, index),
            },
            snapshot: self.snapshot.clone(),
            completion: self.completion(),
            errors: self.errors(),
            verification: self
                .verifications
                .iter()
                .map(|(field, machine)| (field.clone(), machine.record().clone()))
                .collect(),
            draft: DraftStatus {
                version: last_saved.map(|(version, _)| version),
                saved_at: last_saved.map(|(_, saved_at)| saved_at),
                saving: self.drafts.is_saving(),
                pending: self.drafts.has_pending(),
            },
            submitted: self.submitted.clone(),
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.submitted.is_some() {
            return Err(EngineError::AlreadySubmitted);
        }
        Ok(())
    }

    fn machine_mut(&mut self, field: &str) -> Result<&mut VerificationMachine, EngineError> {
        self.verifications
            .get_mut(field)
            .ok_or_else(|| EngineError::UnknownVerificationField(field.to_string()))
    }

    fn current_text(&self, field: &str) -> String {
        self.snapshot
            .get(field)
            .and_then(FieldValue::to_scalar_text)
            .unwrap_or_default()
    }

    /// A completion for a value the user has since replaced is discarded.
    fn ensure_fresh(&self, field: &str, destination: &str) -> Result<(), EngineError> {
        if self.current_text(field).trim() != destination {
            debug!(%field, "discarding verification result for a changed value");
            return Err(VerificationError::Stale.into());
        }
        Ok(())
    }

    fn report_gate<T>(&self, result: Result<T, PageGateError>) -> Result<T, EngineError> {
        result.map_err(|err| {
            if let PageGateError::PageInvalid { errors, .. } = &err {
                let message = errors
                    .iter()
                    .map(|error| error.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                self.notifier
                    .notify(Notification::error("Please complete this page", message));
            }
            err.into()
        })
    }
}
