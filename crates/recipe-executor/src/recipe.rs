// Recipe / step schema. Grounded on the teacher's `HandlerData`
// (`handlers/handler.rs`), which carries an opaque `serde_json::Value` input
// payload per step alongside a handful of typed fields — here generalized so
// every step's `config` stays an untyped `Value` until its own constructor
// deserializes it (see `registry.rs`).
//
// The Python original's `recipe_executor/models.py`-equivalent step schema
// (via `original_source/`) additionally carries a free-form `name` on each
// step purely for logging; that is preserved as an optional field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// A single step entry in a recipe's `steps` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// The registered step type name (e.g. `"read_files"`, `"parallel"`).
    #[serde(rename = "type")]
    pub step_type: String,

    /// Optional human-readable label, surfaced in logs and error messages.
    #[serde(default)]
    pub name: Option<String>,

    /// The step's type-specific configuration. Left untyped here; each
    /// step's constructor deserializes the shape it expects.
    #[serde(default)]
    pub config: Value,
}

/// A parsed, not-yet-validated recipe: an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl Recipe {
    /// Validates the recipe's static shape: at least one step, and every
    /// step carries a non-empty `type`. Per-step `config` shape is validated
    /// lazily, when the step registry constructs the step (`ValidationError`
    /// here covers only what can be checked before any step type is known).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptySteps);
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.step_type.trim().is_empty() {
                return Err(ValidationError::MissingType { index });
            }
        }
        Ok(())
    }

    /// Parses a recipe from a raw JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parses a recipe from an already-decoded JSON value, tolerating
    /// unknown top-level fields (logged at debug level, never rejected —
    /// recipes authored against a newer schema version should still run).
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if let Some(obj) = value.as_object() {
            for key in obj.keys() {
                if key != "steps" {
                    tracing::debug!(field = %key, "ignoring unknown top-level recipe field");
                }
            }
        }
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_rejects_empty_steps() {
        let recipe = Recipe { steps: vec![] };
        assert!(matches!(recipe.validate(), Err(ValidationError::EmptySteps)));
    }

    #[test]
    fn validate_rejects_blank_type() {
        let recipe = Recipe {
            steps: vec![StepSpec {
                step_type: "  ".to_string(),
                name: None,
                config: json!({}),
            }],
        };
        assert!(matches!(
            recipe.validate(),
            Err(ValidationError::MissingType { index: 0 })
        ));
    }

    #[test]
    fn from_value_ignores_unknown_top_level_fields() {
        let recipe = Recipe::from_value(json!({
            "steps": [{"type": "read_files", "config": {}}],
            "schema_version": 2,
        }))
        .unwrap();
        assert_eq!(recipe.steps.len(), 1);
    }

    #[test]
    fn step_name_defaults_to_none() {
        let recipe = Recipe::from_json_str(r#"{"steps": [{"type": "write_files"}]}"#).unwrap();
        assert_eq!(recipe.steps[0].name, None);
    }
}
