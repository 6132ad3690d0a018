use std::collections::HashSet;
use std::time::Duration;

use super::domain::{
    verified_flag_name, EntityKind, FieldSpec, PageSpec, VerificationChannel, VERIFIED_SUFFIX,
};
use super::validation::Rule;
use crate::config::DraftConfig;

const PHONE_PATTERN: &str = r"^\+?[0-9]{9,15}$";
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Errors raised while assembling field and page tables.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema for {0} declares no pages")]
    NoPages(&'static str),
    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),
    #[error("page '{page}' references unknown field '{field}'")]
    UnknownPageField { page: String, field: String },
    #[error("field '{0}' collides with an engine-owned verification flag")]
    ReservedName(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Field and page tables for one entity type, shared read-only across sessions.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    kind: EntityKind,
    fields: Vec<FieldSpec>,
    pages: Vec<PageSpec>,
    long_form: bool,
}

impl EntitySchema {
    pub fn new(
        kind: EntityKind,
        fields: Vec<FieldSpec>,
        pages: Vec<PageSpec>,
    ) -> Result<Self, SchemaError> {
        if pages.is_empty() {
            return Err(SchemaError::NoPages(kind.label()));
        }

        let mut names = HashSet::new();
        for spec in &fields {
            if !names.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateField(spec.name.clone()));
            }
        }

        for spec in &fields {
            if let Some(base) = spec.name.strip_suffix(VERIFIED_SUFFIX) {
                let shadows = fields
                    .iter()
                    .any(|other| other.name == base && other.verification.is_some());
                if shadows {
                    return Err(SchemaError::ReservedName(spec.name.clone()));
                }
            }
        }

        for page in &pages {
            if let Some(field) = page
                .field_names
                .iter()
                .find(|field| !names.contains(field.as_str()))
            {
                return Err(SchemaError::UnknownPageField {
                    page: page.id.clone(),
                    field: field.clone(),
                });
            }
        }

        Ok(Self {
            kind,
            fields,
            pages,
            long_form: false,
        })
    }

    /// Marks the schema as a long-form draft that uses the longer auto-save window.
    pub fn long_form(mut self) -> Self {
        self.long_form = true;
        self
    }

    pub fn for_kind(kind: EntityKind) -> Result<Self, SchemaError> {
        match kind {
            EntityKind::Agency => Self::agency(),
            EntityKind::Maid => Self::maid(),
            EntityKind::Sponsor => Self::sponsor(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn pages(&self) -> &[PageSpec] {
        &self.pages
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    pub fn verifiable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|spec| spec.verification.is_some())
    }

    /// Returns the verifiable field whose flag is named `name`.
    pub fn flag_owner(&self, name: &str) -> Option<&FieldSpec> {
        let base = name.strip_suffix(VERIFIED_SUFFIX)?;
        self.field(base)
            .filter(|spec| spec.verification.is_some() && verified_flag_name(base) == name)
    }

    pub fn autosave_window(&self, drafts: &DraftConfig) -> Duration {
        if self.long_form {
            drafts.long_form_debounce
        } else {
            drafts.profile_debounce
        }
    }

    pub fn agency() -> Result<Self, SchemaError> {
        let fields = vec![
            FieldSpec::required("agencyName", "company", 10).with_rule(Rule::length(2, 120)),
            FieldSpec::required("licenseNumber", "company", 10)
                .with_rule(Rule::length(4, 40)),
            FieldSpec::required("yearsInBusiness", "company", 5)
                .with_rule(Rule::range(0.0, 100.0)),
            FieldSpec::required("contactPerson", "contact", 5).with_rule(Rule::length(2, 80)),
            FieldSpec::required("phone", "contact", 15)
                .with_rule(Rule::pattern(PHONE_PATTERN, "Enter a valid phone number")?)
                .verified_by(VerificationChannel::Phone),
            FieldSpec::required("email", "contact", 15)
                .with_rule(Rule::pattern(EMAIL_PATTERN, "Enter a valid email address")?)
                .verified_by(VerificationChannel::Email),
            FieldSpec::required("address", "contact", 5).with_rule(Rule::length(5, 200)),
            FieldSpec::required("servicesOffered", "services", 10)
                .with_rule(Rule::length(1, 20)),
            FieldSpec::required("countriesServed", "services", 10)
                .with_rule(Rule::length(1, 50)),
            FieldSpec::optional("agencyDescription", "services", 5)
                .with_rule(Rule::length(20, 2000)),
            FieldSpec::optional("logo", "branding", 0),
            FieldSpec::required("termsAccepted", "consent", 10)
                .labelled("Terms and conditions")
                .must_be_true(),
        ];
        let pages = vec![
            PageSpec::new(
                "company",
                "Agency details",
                &["agencyName", "licenseNumber", "yearsInBusiness"],
            ),
            PageSpec::new(
                "contact",
                "Contact information",
                &["contactPerson", "phone", "email", "address"],
            ),
            PageSpec::new(
                "services",
                "Services",
                &["servicesOffered", "countriesServed", "agencyDescription"],
            ),
            PageSpec::new("review", "Review and submit", &["termsAccepted"]),
        ];
        Ok(Self::new(EntityKind::Agency, fields, pages)?.long_form())
    }

    pub fn maid() -> Result<Self, SchemaError> {
        let date_of_birth = Rule::All(vec![
            Rule::range(1950.0, 2007.0),
            Rule::sibling("birthDay", Rule::range(1.0, 31.0)),
            Rule::sibling("birthMonth", Rule::range(1.0, 12.0)),
        ]);
        let fields = vec![
            FieldSpec::required("fullName", "personal", 15).with_rule(Rule::length(2, 100)),
            FieldSpec::required("birthDay", "personal", 0).with_rule(Rule::range(1.0, 31.0)),
            FieldSpec::required("birthMonth", "personal", 0).with_rule(Rule::range(1.0, 12.0)),
            FieldSpec::required("birthYear", "personal", 10)
                .labelled("Date of birth")
                .with_rule(date_of_birth),
            FieldSpec::required("nationality", "personal", 5),
            FieldSpec::required("phone", "contact", 20)
                .with_rule(Rule::pattern(PHONE_PATTERN, "Enter a valid phone number")?)
                .verified_by(VerificationChannel::Phone),
            FieldSpec::required("yearsOfExperience", "experience", 10)
                .with_rule(Rule::range(0.0, 45.0)),
            FieldSpec::required("skills", "experience", 15).with_rule(Rule::length(1, 30)),
            FieldSpec::required("languages", "experience", 10).with_rule(Rule::length(1, 10)),
            FieldSpec::required("passportPhoto", "documents", 10),
            FieldSpec::optional("bio", "documents", 5).with_rule(Rule::length(0, 1000)),
            FieldSpec::optional("previousEmployerCode", "legacy", 0),
            FieldSpec::required("termsAccepted", "consent", 5)
                .labelled("Terms and conditions")
                .must_be_true(),
        ];
        let pages = vec![
            PageSpec::new(
                "personal",
                "Personal information",
                &["fullName", "birthDay", "birthMonth", "birthYear", "nationality"],
            ),
            PageSpec::new("contact", "Contact", &["phone"]),
            PageSpec::new(
                "experience",
                "Experience",
                &["yearsOfExperience", "skills", "languages"],
            ),
            PageSpec::new("documents", "Documents", &["passportPhoto", "bio"]),
            PageSpec::new("review", "Review and submit", &["termsAccepted"]),
        ];
        Self::new(EntityKind::Maid, fields, pages)
    }

    pub fn sponsor() -> Result<Self, SchemaError> {
        let fields = vec![
            FieldSpec::required("fullName", "identity", 15).with_rule(Rule::length(2, 100)),
            FieldSpec::required("idNumber", "identity", 15).with_rule(Rule::pattern(
                r"^[A-Za-z0-9-]{5,20}$",
                "Enter a valid ID number",
            )?),
            FieldSpec::required("nationality", "identity", 5),
            FieldSpec::required("phone", "contact", 20)
                .with_rule(Rule::pattern(PHONE_PATTERN, "Enter a valid phone number")?)
                .verified_by(VerificationChannel::Phone),
            FieldSpec::optional("email", "contact", 5)
                .with_rule(Rule::pattern(EMAIL_PATTERN, "Enter a valid email address")?)
                .verified_by(VerificationChannel::Email),
            FieldSpec::required("householdSize", "household", 10)
                .with_rule(Rule::range(1.0, 30.0)),
            FieldSpec::required("accommodationType", "household", 5),
            FieldSpec::optional("preferredLanguages", "household", 5)
                .with_rule(Rule::length(0, 10)),
            FieldSpec::required("termsAccepted", "consent", 10)
                .labelled("Terms and conditions")
                .must_be_true(),
        ];
        let pages = vec![
            PageSpec::new("identity", "Identity", &["fullName", "idNumber", "nationality"]),
            PageSpec::new("contact", "Contact", &["phone", "email"]),
            PageSpec::new(
                "household",
                "Household",
                &["householdSize", "accommodationType", "preferredLanguages"],
            ),
            PageSpec::new("review", "Review and submit", &["termsAccepted"]),
        ];
        Self::new(EntityKind::Sponsor, fields, pages)
    }
}
