use crate::infra::{InMemoryDraftStore, SequentialSubmitter, SubmittedProfile, TracingNotifier};
use clap::Args;
use profile_wizard::config::AppConfig;
use profile_wizard::error::AppError;
use profile_wizard::wizard::{
    BlobRef, Collaborators, DraftKey, EngineError, EngineSettings, EntityKind, EntitySchema,
    FieldValue, PageGateError, ProfileCompletionEngine, StaticCodeTransport, TokioScheduler,
    VerificationError,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Wizard to walk through: agency, maid or sponsor
    #[arg(long, default_value = "maid", value_parser = parse_entity)]
    pub(crate) entity: EntityKind,
    /// Owner id used for the draft key
    #[arg(long, default_value = "demo-user")]
    pub(crate) owner: String,
    /// Type a wrong verification code before the accepted one
    #[arg(long)]
    pub(crate) wrong_code_first: bool,
    /// Print the walkthrough as JSON instead of text
    #[arg(long)]
    pub(crate) json: bool,
}

fn parse_entity(value: &str) -> Result<EntityKind, String> {
    EntityKind::parse(value).ok_or_else(|| format!("unknown profile type '{value}'"))
}

#[derive(Debug, Serialize)]
struct DemoReport {
    entity: EntityKind,
    owner: String,
    steps: Vec<DemoStep>,
    profile_id: Option<String>,
    completion: u8,
}

#[derive(Debug, Serialize)]
struct DemoStep {
    page: usize,
    title: String,
    /// Fields the gate reported before the page was filled.
    blocked_by: Vec<String>,
    completion_before: u8,
    completion_after: u8,
    verified: Vec<String>,
    rejected_codes: u32,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        entity,
        owner,
        wrong_code_first,
        json,
    } = args;

    let config = AppConfig::load()?;
    let schema = Arc::new(EntitySchema::for_kind(entity)?);
    let submitter = SequentialSubmitter::default();
    let scheduler = TokioScheduler::current()
        .map_err(|err| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
    let collaborators = Collaborators {
        store: Arc::new(InMemoryDraftStore::default()),
        transport: Arc::new(StaticCodeTransport::new(
            config.verification.demo_codes.iter().cloned(),
        )),
        notifier: Arc::new(TracingNotifier),
        submitter: Arc::new(submitter.clone()),
        scheduler: Arc::new(scheduler),
    };
    let settings = EngineSettings::from_config(&schema, &config.drafts, &config.verification);
    let code_length = settings.code_length;
    let mut engine = ProfileCompletionEngine::resume(
        schema.clone(),
        DraftKey::for_profile(entity, &owner),
        collaborators,
        settings,
    )
    .await?;

    let accepted = config.verification.demo_codes.first().cloned();
    let wrong = (0..10u8)
        .map(|digit| digit.to_string().repeat(code_length))
        .find(|code| !config.verification.demo_codes.contains(code));

    let mut steps = Vec::new();
    for (index, values) in sample_pages(entity).into_iter().enumerate() {
        let page = engine.view().page;
        let completion_before = engine.completion().percentage;

        let blocked_by = if page.is_terminal {
            Vec::new()
        } else {
            match engine.next() {
                Err(EngineError::Page(PageGateError::PageInvalid { errors, .. })) => {
                    errors.into_iter().map(|error| error.field).collect()
                }
                Ok(_) => {
                    engine.prev();
                    Vec::new()
                }
                Err(err) => return Err(err.into()),
            }
        };

        for (field, value) in values {
            engine.apply_edit(field, value)?;
        }

        let mut verified = Vec::new();
        let mut rejected_codes = 0;
        let on_page: Vec<String> = schema
            .verifiable_fields()
            .filter(|spec| schema.pages()[index].contains(&spec.name))
            .filter(|spec| engine.snapshot().is_filled(&spec.name))
            .map(|spec| spec.name.clone())
            .collect();
        for field in on_page {
            let Some(code) = accepted.as_deref() else {
                break;
            };
            engine.request_code(&field).await?;
            if let (true, Some(wrong)) = (wrong_code_first, wrong.as_deref()) {
                match engine.submit_code(&field, wrong).await {
                    Err(EngineError::Verification(VerificationError::InvalidCode { .. })) => {
                        rejected_codes += 1;
                    }
                    Err(err) => return Err(err.into()),
                    Ok(()) => {}
                }
            }
            if engine.code_input(&field, code).await? {
                verified.push(field);
            }
        }

        steps.push(DemoStep {
            page: index,
            title: page.title,
            blocked_by,
            completion_before,
            completion_after: engine.completion().percentage,
            verified,
            rejected_codes,
        });

        if !page.is_terminal {
            engine.next()?;
        }
    }

    let profile_id = engine.submit().await?;
    let report = DemoReport {
        entity,
        owner,
        steps,
        profile_id: Some(profile_id.0),
        completion: engine.completion().percentage,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(payload) => println!("{payload}"),
            Err(err) => println!("Could not render report: {err}"),
        }
    } else {
        render_report(&report, submitter.submitted().last());
    }

    Ok(())
}

fn render_report(report: &DemoReport, accepted: Option<&SubmittedProfile>) {
    println!("Profile wizard demo ({} for {})", report.entity.label(), report.owner);
    for step in &report.steps {
        println!(
            "\nPage {} - {}: {}% -> {}%",
            step.page + 1,
            step.title,
            step.completion_before,
            step.completion_after
        );
        if !step.blocked_by.is_empty() {
            println!("  Next was blocked by: {}", step.blocked_by.join(", "));
        }
        if step.rejected_codes > 0 {
            println!("  Rejected codes: {}", step.rejected_codes);
        }
        for field in &step.verified {
            println!("  Verified {field}");
        }
    }
    println!("\nCompletion at submit: {}%", report.completion);
    match accepted {
        Some(profile) => println!(
            "Accepted {} with {} field(s) at {}",
            profile.id.0,
            profile.snapshot.len(),
            profile.submitted_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("No profile was accepted"),
    }
}

fn text(value: &str) -> FieldValue {
    FieldValue::text(value)
}

fn list(values: &[&str]) -> FieldValue {
    FieldValue::List(values.iter().map(|value| value.to_string()).collect())
}

/// Sample answers for every page of the chosen wizard, in page order.
fn sample_pages(entity: EntityKind) -> Vec<Vec<(&'static str, FieldValue)>> {
    match entity {
        EntityKind::Agency => vec![
            vec![
                ("agencyName", text("Gulf Star Recruitment")),
                ("licenseNumber", text("DXB-45821")),
                ("yearsInBusiness", FieldValue::Number(12.0)),
            ],
            vec![
                ("contactPerson", text("Hessa Al Mansoori")),
                ("phone", text("+971501234567")),
                ("email", text("ops@gulfstar.example")),
                ("address", text("Office 1204, Business Bay, Dubai")),
            ],
            vec![
                ("servicesOffered", list(&["Housemaids", "Nannies"])),
                ("countriesServed", list(&["Philippines", "Indonesia", "Kenya"])),
                (
                    "agencyDescription",
                    text("Licensed placement agency matching families with trained domestic staff."),
                ),
            ],
            vec![("termsAccepted", FieldValue::Bool(true))],
        ],
        EntityKind::Maid => vec![
            vec![
                ("fullName", text("Maria Santos")),
                ("birthDay", FieldValue::Number(14.0)),
                ("birthMonth", FieldValue::Number(2.0)),
                ("birthYear", FieldValue::Number(1990.0)),
                ("nationality", text("Philippines")),
            ],
            vec![("phone", text("+639171234567"))],
            vec![
                ("yearsOfExperience", FieldValue::Number(6.0)),
                ("skills", list(&["Cooking", "Childcare", "Cleaning"])),
                ("languages", list(&["English", "Tagalog"])),
            ],
            vec![
                (
                    "passportPhoto",
                    FieldValue::Blob(BlobRef {
                        blob: "uploads/demo/passport.jpg".to_string(),
                    }),
                ),
                ("bio", text("Six years caring for young families in Dubai and Riyadh.")),
            ],
            vec![("termsAccepted", FieldValue::Bool(true))],
        ],
        EntityKind::Sponsor => vec![
            vec![
                ("fullName", text("Omar Khalid")),
                ("idNumber", text("784-1985-1234567-1")),
                ("nationality", text("United Arab Emirates")),
            ],
            vec![
                ("phone", text("+971551234567")),
                ("email", text("omar.khalid@example.com")),
            ],
            vec![
                ("householdSize", FieldValue::Number(5.0)),
                ("accommodationType", text("Villa")),
                ("preferredLanguages", list(&["Arabic", "English"])),
            ],
            vec![("termsAccepted", FieldValue::Bool(true))],
        ],
    }
}
