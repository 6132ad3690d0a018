//! Multi-page profile wizard shared by the agency, maid and sponsor onboarding flows.
//!
//! Field edits flow through the [`ProfileCompletionEngine`], which re-validates, re-scores
//! and re-gates synchronously, then hands the snapshot to [`DraftPersistence`] for a
//! debounced save. Contact verification runs per field through [`VerificationMachine`] and,
//! on success, sets the engine-owned `<field>Verified` flag.

pub mod aggregate;
pub mod collaborators;
pub mod completion;
pub mod domain;
pub mod drafts;
pub mod engine;
pub mod pages;
pub mod router;
pub mod scheduler;
pub mod schema;
pub mod validation;
pub mod verification;

#[cfg(test)]
mod tests;

pub use collaborators::{
    Collaborators, DraftStore, Notification, NotificationKind, NotificationSink,
    ProfileSubmitter, StaticCodeTransport, StoreError, SubmitRejection, TransportError,
    VerificationTransport,
};
pub use completion::{score, CompletionResult, GroupCompletion};
pub use domain::{
    verified_flag_name, BlobRef, DraftEnvelope, DraftKey, EntityKind, FieldError, FieldSpec,
    FieldValue, FormSnapshot, PageSpec, ProfileId, VerificationChannel,
};
pub use drafts::{DraftPersistence, FileDraftStore, PersistenceError, SaveOutcome};
pub use engine::{
    CodeCheck, CodeRequest, EditOutcome, EngineError, EngineSettings, EngineView,
    ProfileCompletionEngine,
};
pub use pages::{PageController, PageGateError};
pub use router::{wizard_router, SessionRegistry};
pub use scheduler::{ScheduledTask, Scheduler, TaskHandle, TokioScheduler};
pub use schema::{EntitySchema, SchemaError};
pub use validation::{validate, Rule};
pub use verification::{
    VerificationError, VerificationMachine, VerificationRecord, VerificationState,
};
