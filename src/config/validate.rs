//! Recipe validation

use super::schema::CalibrationRecipe;
use crate::quant::SlotKind;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Recipe has no targets")]
    NoTargets,

    #[error("Recipe configures no weight or activation quantization")]
    NoQuantizedSlots,

    #[error("Empty target name")]
    EmptyTarget,

    #[error("Invalid target pattern {pattern}: {reason}")]
    InvalidTargetPattern { pattern: String, reason: String },

    #[error("Invalid {slot} arguments: {reason}")]
    InvalidArgs { slot: SlotKind, reason: String },
}

impl From<ValidationError> for crate::Error {
    fn from(err: ValidationError) -> Self {
        crate::Error::Config(format!("Invalid recipe: {err}"))
    }
}

/// Validate a calibration recipe
///
/// Checks:
/// - At least one target, none empty
/// - `re:` targets compile as regular expressions
/// - Every configured slot has valid arguments
pub fn validate_recipe(recipe: &CalibrationRecipe) -> Result<(), ValidationError> {
    let scheme = &recipe.scheme;

    if scheme.targets.is_empty() {
        return Err(ValidationError::NoTargets);
    }

    for target in &scheme.targets {
        match target.strip_prefix("re:") {
            Some(pattern) => {
                regex::Regex::new(pattern).map_err(|e| ValidationError::InvalidTargetPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            }
            None if target.is_empty() => return Err(ValidationError::EmptyTarget),
            None => {}
        }
    }

    let mut configured = 0;
    for slot in [SlotKind::Input, SlotKind::Weight, SlotKind::Output] {
        if let Some(args) = scheme.args_for(slot) {
            args.validate().map_err(|e| ValidationError::InvalidArgs {
                slot,
                reason: e.to_string(),
            })?;
            configured += 1;
        }
    }
    if configured == 0 {
        return Err(ValidationError::NoQuantizedSlots);
    }

    Ok(())
}
