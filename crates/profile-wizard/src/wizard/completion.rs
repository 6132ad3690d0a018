use serde::{Deserialize, Serialize};

use super::domain::{FieldSpec, FormSnapshot};

/// Completion of one field group, for the progress widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCompletion {
    pub group: String,
    pub completed_weight: u32,
    pub total_weight: u32,
    pub missing: Vec<String>,
}

/// Weighted completion derived from a snapshot. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub percentage: u8,
    pub completed_weight: u32,
    pub total_weight: u32,
    pub groups: Vec<GroupCompletion>,
}

impl CompletionResult {
    pub fn is_complete(&self) -> bool {
        self.percentage == 100
    }
}

/// Scores the required fields of `fields` against `snapshot`.
///
/// Only required fields carry weight. A field counts once its value is filled and, when it
/// needs contact verification, its `<field>Verified` flag is set. An empty or weightless
/// table scores 0, and 100 is reported only when every required field is complete.
pub fn score(fields: &[FieldSpec], snapshot: &FormSnapshot) -> CompletionResult {
    let mut groups: Vec<GroupCompletion> = Vec::new();
    let mut completed_weight: u32 = 0;
    let mut total_weight: u32 = 0;
    let mut all_required_complete = true;

    for spec in fields.iter().filter(|spec| spec.required) {
        let complete = spec.is_complete(snapshot);
        total_weight = total_weight.saturating_add(spec.weight);

        let index = match groups.iter().position(|group| group.group == spec.group) {
            Some(index) => index,
            None => {
                groups.push(GroupCompletion {
                    group: spec.group.clone(),
                    completed_weight: 0,
                    total_weight: 0,
                    missing: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        group.total_weight = group.total_weight.saturating_add(spec.weight);

        if complete {
            completed_weight = completed_weight.saturating_add(spec.weight);
            group.completed_weight = group.completed_weight.saturating_add(spec.weight);
        } else {
            all_required_complete = false;
            group.missing.push(spec.name.clone());
        }
    }

    let percentage = percentage_of(completed_weight, total_weight, all_required_complete);

    CompletionResult {
        percentage,
        completed_weight,
        total_weight,
        groups,
    }
}

fn percentage_of(completed: u32, total: u32, all_complete: bool) -> u8 {
    if total == 0 {
        return 0;
    }
    if all_complete {
        return 100;
    }
    let rounded = (100.0 * completed as f64 / total as f64).round() as u8;
    rounded.min(99)
}
