// `execute_recipe`: sub-recipe invocation with context overrides (spec
// §4.4). Grounded on the teacher's `CompositeActionHandler` for the "run a
// referenced set of steps, then reconcile with the caller's context"
// shape — but it deliberately inverts the handler's isolation: the
// composite handler creates a *child* context and propagates only declared
// outputs back, while this step runs the sub-recipe against the *same*
// context (no clone, no output allow-list). That inversion is the spec's
// explicit design, not an oversight (see DESIGN.md).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::executor::Executor;
use crate::render::Renderer;
use crate::step::Step;

#[derive(Debug, Deserialize)]
struct ExecuteRecipeConfig {
    recipe_path: String,
    #[serde(default)]
    context_overrides: HashMap<String, String>,
}

struct ExecuteRecipeStep {
    config: ExecuteRecipeConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: ExecuteRecipeConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(ExecuteRecipeStep { config }))
}

#[async_trait]
impl Step for ExecuteRecipeStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        _cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let recipe_path = renderer.render(&self.config.recipe_path, ctx)?;

        let mut rendered_overrides = Vec::with_capacity(self.config.context_overrides.len());
        for (key, value) in &self.config.context_overrides {
            rendered_overrides.push((key.clone(), renderer.render(value, ctx)?));
        }

        if !Path::new(&recipe_path).is_file() {
            return Err(StepRuntimeError::RecipeNotFound(recipe_path));
        }

        // Overrides are applied before invoking the sub-recipe, so they
        // persist into the parent whether or not the sub-recipe succeeds
        // (spec §4.4 step 4, §8 "Override visibility").
        for (key, value) in rendered_overrides {
            ctx.set(key, Value::String(value));
        }

        tracing::info!(recipe = %recipe_path, "executing sub-recipe");
        Executor::new()
            .execute(recipe_path.clone(), ctx)
            .await
            .map_err(|err| StepRuntimeError::SubRecipe(err.into()))?;
        tracing::info!(recipe = %recipe_path, "sub-recipe completed");
        Ok(())
    }
}
