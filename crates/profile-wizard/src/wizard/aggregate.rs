use super::domain::{FieldError, FieldSpec, FormSnapshot};
use super::validation::validate_spec;

/// Every current error in field declaration order. Built fresh on each call.
///
/// Besides validator messages, a required verifiable field that is filled but not verified
/// reports "`<label>` must be verified".
pub fn collect(fields: &[FieldSpec], snapshot: &FormSnapshot) -> Vec<FieldError> {
    collect_where(fields, snapshot, |_| true)
}

/// Same as [`collect`] restricted to the fields `include` accepts (typically one page).
pub fn collect_where<F>(fields: &[FieldSpec], snapshot: &FormSnapshot, include: F) -> Vec<FieldError>
where
    F: Fn(&FieldSpec) -> bool,
{
    fields
        .iter()
        .filter(|spec| include(spec))
        .filter_map(|spec| field_error(spec, snapshot))
        .collect()
}

/// First error, for the "jump to error" affordance.
pub fn first(fields: &[FieldSpec], snapshot: &FormSnapshot) -> Option<FieldError> {
    fields.iter().find_map(|spec| field_error(spec, snapshot))
}

fn field_error(spec: &FieldSpec, snapshot: &FormSnapshot) -> Option<FieldError> {
    let message = validate_spec(spec, snapshot.get(&spec.name), snapshot).or_else(|| {
        let unverified = spec.required
            && spec.verification.is_some()
            && spec.is_filled(snapshot)
            && !snapshot.is_verified(&spec.name);
        unverified.then(|| format!("{} must be verified", spec.label))
    })?;

    Some(FieldError {
        field: spec.name.clone(),
        message,
    })
}
