// `mcp`: specified only by config/context-effects (spec §4.8, §1 "MCP
// client integration" is an external collaborator). Same trait-seam
// treatment as `llm_generate`: a small async trait isolates the real MCP
// round-trip so the crate stays offline-testable.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::render::Renderer;
use crate::step::Step;

/// The seam a real MCP client plugs into: invoke `tool` on `server` with
/// `arguments` and return the tool's result payload.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn call_tool(&self, server: &str, tool: &str, arguments: &Value) -> anyhow::Result<Value>;
}

/// Offline default: echoes the request back as the result so recipes and
/// their tests can run without a live MCP server.
#[derive(Debug, Default)]
pub struct OfflineMcpClient;

#[async_trait]
impl McpClient for OfflineMcpClient {
    async fn call_tool(&self, server: &str, tool: &str, arguments: &Value) -> anyhow::Result<Value> {
        Ok(json!({
            "server": server,
            "tool": tool,
            "arguments": arguments,
            "offline": true,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct McpConfig {
    server: String,
    tool: String,
    #[serde(default)]
    arguments: Value,
    result_key: String,
}

struct McpStep {
    config: McpConfig,
    client: Box<dyn McpClient>,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: McpConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(McpStep {
        config,
        client: Box::new(OfflineMcpClient),
    }))
}

#[async_trait]
impl Step for McpStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        _cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let server = renderer.render(&self.config.server, ctx)?;
        let tool = renderer.render(&self.config.tool, ctx)?;
        let result_key = renderer.render(&self.config.result_key, ctx)?;

        let result = self
            .client
            .call_tool(&server, &tool, &self.config.arguments)
            .await
            .map_err(StepRuntimeError::ExternalCall)?;

        ctx.set(result_key, result);
        Ok(())
    }
}
