use std::sync::Arc;

use chrono::Utc;

use super::common::*;
use crate::wizard::collaborators::{NotificationKind, SubmitRejection};
use crate::wizard::domain::{verified_flag_name, DraftEnvelope, FieldValue};
use crate::wizard::engine::{EngineError, EngineSettings, ProfileCompletionEngine};
use crate::wizard::pages::PageGateError;
use crate::wizard::schema::EntitySchema;
use crate::wizard::verification::{VerificationError, VerificationState};

#[tokio::test]
async fn email_must_be_verified_before_it_counts() {
    let harness = Harness::new();
    let mut engine = harness.engine(email_schema());

    assert_eq!(engine.completion().percentage, 0);

    let outcome = engine
        .apply_edit("email", FieldValue::text("a@b.com"))
        .expect("edit accepted");
    assert_eq!(outcome.completion.percentage, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].message.contains("must be verified"));

    engine.request_code("email").await.expect("code sent");
    engine
        .submit_code("email", "123456")
        .await
        .expect("code accepted");

    assert_eq!(engine.completion().percentage, 100);
    assert!(engine.snapshot().flag(&verified_flag_name("email")));
    assert!(engine.errors().is_empty());
}

#[tokio::test]
async fn editing_a_verified_contact_requires_reverification() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    engine.request_code("phone").await.expect("code sent");
    engine.submit_code("phone", "000000").await.expect("verified");
    assert_eq!(
        engine.verification("phone").map(|record| record.state),
        Some(VerificationState::Verified)
    );

    let outcome = engine
        .apply_edit("phone", FieldValue::text("+971509999999"))
        .expect("edit");

    assert!(outcome.verification_reset);
    assert_eq!(
        engine.verification("phone").map(|record| record.state),
        Some(VerificationState::Idle)
    );
    assert!(!engine.snapshot().flag(&verified_flag_name("phone")));
}

#[tokio::test]
async fn same_value_edit_keeps_verification() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    engine.request_code("phone").await.expect("code sent");
    engine.submit_code("phone", "123456").await.expect("verified");

    let outcome = engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    assert!(!outcome.verification_reset);
    assert!(engine.snapshot().flag(&verified_flag_name("phone")));
}

#[tokio::test]
async fn verified_flags_are_engine_owned() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    let err = engine
        .apply_edit("phoneVerified", FieldValue::Bool(true))
        .expect_err("flag is read-only");
    assert!(matches!(err, EngineError::ReadOnlyField(field) if field == "phoneVerified"));
    assert!(engine.snapshot().get("phoneVerified").is_none());
}

#[tokio::test]
async fn wrong_code_is_reported_and_retry_succeeds() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    engine.request_code("phone").await.expect("code sent");

    let err = engine
        .submit_code("phone", "999999")
        .await
        .expect_err("wrong code");
    assert!(matches!(
        err,
        EngineError::Verification(VerificationError::InvalidCode { attempts: 1 })
    ));
    assert_eq!(harness.notifier.titled("Incorrect code"), 1);

    engine.submit_code("phone", "123456").await.expect("verified");
    assert_eq!(
        engine.verification("phone").map(|record| record.attempts),
        Some(1)
    );
}

#[tokio::test]
async fn blank_contact_cannot_request_a_code() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    let err = engine.request_code("phone").await.expect_err("blank phone");
    assert!(matches!(
        err,
        EngineError::Verification(VerificationError::EmptyInput)
    ));
    assert!(matches!(
        engine.request_code("fullName").await,
        Err(EngineError::UnknownVerificationField(_))
    ));
}

#[tokio::test]
async fn code_input_auto_submits_full_numeric_codes() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    engine.request_code("phone").await.expect("code sent");

    assert!(!engine.code_input("phone", "1234").await.expect("partial"));
    assert!(!engine.code_input("phone", "12345a").await.expect("not digits"));
    assert!(engine.code_input("phone", "123456").await.expect("auto submit"));
    assert!(engine.snapshot().flag(&verified_flag_name("phone")));
}

#[tokio::test]
async fn completion_for_an_edited_value_is_discarded() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    let request = engine.begin_code_request("phone").expect("sending");

    engine
        .apply_edit("phone", FieldValue::text("+971508888888"))
        .expect("edit while sending");
    let err = engine
        .finish_code_request(&request, Ok(()))
        .expect_err("stale result");

    assert!(matches!(
        err,
        EngineError::Verification(VerificationError::Stale)
    ));
    assert_eq!(
        engine.verification("phone").map(|record| record.state),
        Some(VerificationState::Idle)
    );
}

#[tokio::test]
async fn transport_failure_can_be_reset_and_retried() {
    let mut harness = Harness::new();
    harness.transport = Arc::new(OfflineTransport);
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");

    let err = engine.request_code("phone").await.expect_err("offline");
    assert!(matches!(
        err,
        EngineError::Verification(VerificationError::TransportFailure(_))
    ));
    assert_eq!(
        engine.verification("phone").map(|record| record.state),
        Some(VerificationState::Failed)
    );
    assert_eq!(harness.notifier.errors().len(), 1);

    engine.reset_verification("phone").expect("reset");
    assert_eq!(
        engine.verification("phone").map(|record| record.state),
        Some(VerificationState::Idle)
    );
}

#[tokio::test]
async fn next_is_gated_and_reports_page_errors() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());

    match engine.next() {
        Err(EngineError::Page(PageGateError::PageInvalid { page, errors, .. })) => {
            assert_eq!(page, 0);
            assert_eq!(errors[0].field, "fullName");
        }
        other => panic!("expected page gate, got {other:?}"),
    }
    assert_eq!(engine.current_page(), 0);
    assert_eq!(harness.notifier.titled("Please complete this page"), 1);

    engine
        .apply_edit("fullName", FieldValue::text("Fatima"))
        .expect("edit");
    assert_eq!(engine.next().expect("page valid"), 1);

    engine
        .apply_edit("phone", FieldValue::text(PHONE))
        .expect("edit");
    assert!(engine.next().is_err(), "unverified phone blocks the page");
    assert_eq!(engine.prev(), 0);
}

#[tokio::test]
async fn submit_requires_last_page_and_runs_once() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());

    assert!(matches!(
        engine.submit().await,
        Err(EngineError::NotOnTerminalPage {
            current: 0,
            terminal: 2
        })
    ));

    complete_sponsor_like(&mut engine).await;
    engine.save_now(true).await.expect("draft saved");
    assert!(harness.store.stored(&draft_key()).is_some());

    let profile = engine.submit().await.expect("submitted");
    assert_eq!(profile.0, "profile-1");
    assert!(engine.is_submitted());
    assert!(harness.store.stored(&draft_key()).is_none());

    assert!(matches!(
        engine.submit().await,
        Err(EngineError::AlreadySubmitted)
    ));
    assert!(matches!(
        engine.apply_edit("fullName", FieldValue::text("Late edit")),
        Err(EngineError::AlreadySubmitted)
    ));
    assert_eq!(harness.submitter.calls(), 1);
    assert_eq!(harness.notifier.titled("Profile submitted"), 1);
}

#[tokio::test]
async fn submit_rechecks_every_page() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    complete_sponsor_like(&mut engine).await;

    engine
        .apply_edit("phone", FieldValue::text("+971507777777"))
        .expect("edit on last page");

    match engine.submit().await {
        Err(EngineError::Page(PageGateError::PageInvalid { page, .. })) => assert_eq!(page, 1),
        other => panic!("expected page gate, got {other:?}"),
    }
    assert_eq!(harness.submitter.calls(), 0);
}

#[tokio::test]
async fn rejected_submission_keeps_the_session_open() {
    let mut harness = Harness::new();
    harness.submitter = Arc::new(CountingSubmitter::rejecting());
    let mut engine = harness.engine(sponsor_like_schema());
    complete_sponsor_like(&mut engine).await;

    assert!(matches!(
        engine.submit().await,
        Err(EngineError::Submit(SubmitRejection::Rejected(_)))
    ));
    assert!(!engine.is_submitted());
    assert!(harness
        .notifier
        .events()
        .iter()
        .any(|event| event.kind == NotificationKind::Error && event.title == "Submission failed"));
    engine
        .apply_edit("fullName", FieldValue::text("Fatima A."))
        .expect("still editable");
}

#[tokio::test]
async fn resume_restores_values_verification_and_page() {
    let mut snapshot = snapshot_with("fullName", "Fatima");
    snapshot.set("phone", FieldValue::text(PHONE));
    snapshot.set(verified_flag_name("phone"), FieldValue::Bool(true));
    let envelope = DraftEnvelope {
        snapshot,
        saved_at: Utc::now(),
        version: 4,
    };
    let harness = Harness::with_store(MemoryDraftStore::seeded(&draft_key(), envelope));

    let mut engine = ProfileCompletionEngine::resume(
        Arc::new(sponsor_like_schema()),
        draft_key(),
        harness.collaborators(),
        EngineSettings::default(),
    )
    .await
    .expect("resumed");

    assert_eq!(engine.current_page(), 2);
    assert_eq!(
        engine.verification("phone").map(|record| record.state),
        Some(VerificationState::Verified)
    );

    match engine.save_now(true).await.expect("saved") {
        crate::wizard::drafts::SaveOutcome::Saved { version } => assert_eq!(version, 5),
        other => panic!("expected a write, got {other:?}"),
    }
}

#[tokio::test]
async fn discard_clears_form_and_draft() {
    let harness = Harness::new();
    let mut engine = harness.engine(sponsor_like_schema());
    engine
        .apply_edit("fullName", FieldValue::text("Fatima"))
        .expect("edit");
    engine.save_now(false).await.expect("saved");
    assert_eq!(harness.notifier.titled("Draft saved"), 1);

    engine.discard().await.expect("discarded");
    assert!(engine.snapshot().is_empty());
    assert_eq!(engine.current_page(), 0);
    assert!(harness.store.stored(&draft_key()).is_none());
}

#[tokio::test]
async fn phone_sent_as_a_number_can_be_verified_and_resumed() {
    let harness = Harness::new();
    let mut engine = harness.engine(EntitySchema::sponsor().expect("sponsor schema"));

    let outcome = engine
        .apply_edit("phone", FieldValue::Number(971501234567.0))
        .expect("edit accepted");
    assert_eq!(outcome.error, None);

    engine.request_code("phone").await.expect("code sent");
    assert_eq!(
        engine
            .verification("phone")
            .and_then(|record| record.destination.clone()),
        Some("971501234567".to_string())
    );
    engine.submit_code("phone", "123456").await.expect("verified");
    assert!(engine.snapshot().is_verified("phone"));
    engine.save_now(true).await.expect("saved");

    let resumed = ProfileCompletionEngine::resume(
        Arc::new(EntitySchema::sponsor().expect("sponsor schema")),
        draft_key(),
        harness.collaborators(),
        EngineSettings::default(),
    )
    .await
    .expect("resumed");
    assert_eq!(
        resumed.verification("phone").map(|record| record.state),
        Some(VerificationState::Verified)
    );
    assert!(resumed.snapshot().is_verified("phone"));
}
