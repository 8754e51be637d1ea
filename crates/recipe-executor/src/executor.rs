// Recipe loader + sequential step driver. Grounded on the teacher's
// `steps_runner.rs` (`StepsRunner::run_async`: drain an ordered step queue,
// evaluate per-step, abort the job on the first unhandled failure) and
// `job_runner.rs` (construct one runner per job, hold no state across runs).
// Result-service reporting, timeouts, and post-job steps are GitHub-
// Actions-specific and are not part of this spec; what's kept is the shape:
// strictly sequential, reentrant, first-failure-aborts.

use std::path::Path;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{ExecutorError, LoadError};
use crate::recipe::Recipe;

/// The four accepted recipe inputs, in spec §4.2's priority order.
pub enum RecipeSource {
    /// An already-validated [`Recipe`] — used as-is.
    Recipe(Recipe),
    /// A parsed JSON mapping, validated against the recipe schema.
    Value(Value),
    /// A string: if it names an existing file, the file's contents are
    /// read and parsed as JSON; otherwise the string itself is parsed as
    /// JSON.
    Str(String),
}

impl From<Recipe> for RecipeSource {
    fn from(recipe: Recipe) -> Self {
        RecipeSource::Recipe(recipe)
    }
}

impl From<Value> for RecipeSource {
    fn from(value: Value) -> Self {
        RecipeSource::Value(value)
    }
}

impl From<String> for RecipeSource {
    fn from(s: String) -> Self {
        RecipeSource::Str(s)
    }
}

impl From<&str> for RecipeSource {
    fn from(s: &str) -> Self {
        RecipeSource::Str(s.to_string())
    }
}

/// Loads, validates, and drives recipes. Holds no per-execution state, so a
/// single instance (or a fresh one per call — both are equivalent) is safe
/// to reuse across concurrent, independent `execute` calls with distinct
/// [`Context`]s (spec §4.2, "Reentrancy").
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Resolves `source` to a validated [`Recipe`] and drives its steps in
    /// order against `ctx`, aborting immediately on the first step failure.
    pub async fn execute(
        &self,
        source: impl Into<RecipeSource>,
        ctx: &mut Context,
    ) -> Result<(), ExecutorError> {
        let recipe = Self::resolve(source.into())?;
        recipe.validate()?;
        tracing::debug!(steps = recipe.steps.len(), "executing recipe");

        let cancel = CancellationToken::new();
        for (index, spec) in recipe.steps.iter().enumerate() {
            let span = tracing::debug_span!("step", index, step_type = %spec.step_type);
            let _guard = span.enter();
            tracing::debug!("starting step");
            let step = crate::step::construct_step(index, spec)?;
            step.execute(ctx, &cancel)
                .await
                .map_err(|source| ExecutorError::StepFailed {
                    index,
                    step_type: spec.step_type.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn resolve(source: RecipeSource) -> Result<Recipe, ExecutorError> {
        match source {
            RecipeSource::Recipe(recipe) => Ok(recipe),
            RecipeSource::Value(value) => Ok(Recipe::from_value(value).map_err(LoadError::Json)?),
            RecipeSource::Str(text) => {
                let path = Path::new(&text);
                if path.is_file() {
                    let contents =
                        std::fs::read_to_string(path).map_err(|source| LoadError::Io {
                            path: path.to_path_buf(),
                            source,
                        })?;
                    Ok(Recipe::from_json_str(&contents).map_err(LoadError::Json)?)
                } else {
                    Ok(Recipe::from_json_str(&text).map_err(LoadError::Json)?)
                }
            }
        }
    }
}
