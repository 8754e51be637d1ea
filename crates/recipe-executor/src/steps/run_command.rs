// `run_command`: shell execution leaf step (spec §4.8). Grounded directly
// on `runner-sdk/src/process_invoker.rs` via `recipe_executor_common::
// run_process`, which already implements the cancellation escalation
// (SIGINT -> SIGTERM -> SIGKILL) the spec requires of leaf steps that must
// "respect cancellation at their async suspension points" when run inside
// `parallel`/`loop`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use recipe_executor_common::run_process;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::render::Renderer;
use crate::step::Step;

#[derive(Debug, Deserialize)]
struct RunCommandConfig {
    command: String,
    #[serde(default)]
    working_directory: String,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default = "default_true")]
    check: bool,
    result_key: String,
}

fn default_true() -> bool {
    true
}

struct RunCommandStep {
    config: RunCommandConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: RunCommandConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(RunCommandStep { config }))
}

#[async_trait]
impl Step for RunCommandStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let command = renderer.render(&self.config.command, ctx)?;
        let working_directory = renderer.render(&self.config.working_directory, ctx)?;
        let result_key = renderer.render(&self.config.result_key, ctx)?;

        let mut rendered_env = HashMap::with_capacity(self.config.env.len());
        for (key, value) in &self.config.env {
            rendered_env.insert(key.clone(), renderer.render(value, ctx)?);
        }

        let outcome = run_process(
            &command,
            &working_directory,
            &rendered_env,
            self.config.check,
            cancel.clone(),
        )
        .await?;

        ctx.set(
            result_key,
            json!({
                "exit_code": outcome.exit_code,
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
            }),
        );
        Ok(())
    }
}
