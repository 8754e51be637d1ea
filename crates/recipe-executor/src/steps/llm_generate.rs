// `llm_generate`: specified only by config/context-effects (spec §4.8, §1
// "LLM provider clients" are an external collaborator). Grounded on
// `LLM-Dev-Ops-orchestrator`'s `llm-orchestrator-providers` trait-seam
// pattern (`LLMProvider` trait + concrete provider structs): a small async
// trait isolates the real network call, so this crate compiles and its
// tests run fully offline against a stub implementation. Wiring a real
// provider behind `LlmClient` is left to the embedding application.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::render::Renderer;
use crate::step::Step;

/// The seam a real LLM provider plugs into. `generate` takes the rendered
/// prompt and the configured model name and returns the completion text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> anyhow::Result<String>;
}

/// Offline default: echoes a deterministic, clearly-synthetic response so
/// recipes and their tests can run without network access or credentials.
#[derive(Debug, Default)]
pub struct OfflineLlmClient;

#[async_trait]
impl LlmClient for OfflineLlmClient {
    async fn generate(&self, prompt: &str, model: &str) -> anyhow::Result<String> {
        Ok(format!("[offline:{model}] {prompt}"))
    }
}

#[derive(Debug, Deserialize)]
struct LlmGenerateConfig {
    prompt: String,
    #[serde(default = "default_model")]
    model: String,
    result_key: String,
}

fn default_model() -> String {
    "default".to_string()
}

struct LlmGenerateStep {
    config: LlmGenerateConfig,
    client: Box<dyn LlmClient>,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: LlmGenerateConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(LlmGenerateStep {
        config,
        client: Box::new(OfflineLlmClient),
    }))
}

#[async_trait]
impl Step for LlmGenerateStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        _cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let prompt = renderer.render(&self.config.prompt, ctx)?;
        let model = renderer.render(&self.config.model, ctx)?;
        let result_key = renderer.render(&self.config.result_key, ctx)?;

        let generated = self
            .client
            .generate(&prompt, &model)
            .await
            .map_err(StepRuntimeError::ExternalCall)?;

        ctx.set(result_key, Value::String(generated));
        Ok(())
    }
}
