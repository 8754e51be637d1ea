// `write_files`: a pure, local-filesystem leaf step (spec §4.8). Grounded
// on `original_source/recipe_executor/steps/write_files.py` for the
// directory-creation / overwrite / non-string-content-as-JSON shape,
// generalized to accept either a `files` literal or a `files_key` pointing
// at a context value (spec's broader "one file-spec or a list of them").

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::render::Renderer;
use crate::step::Step;

#[derive(Debug, Clone, Deserialize)]
struct FileSpecConfig {
    path: String,
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct WriteFilesConfig {
    #[serde(default)]
    files: Option<Vec<FileSpecConfig>>,
    #[serde(default)]
    files_key: Option<String>,
    #[serde(default)]
    root: Option<String>,
}

struct WriteFilesStep {
    config: WriteFilesConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: WriteFilesConfig = serde_json::from_value(value.clone())?;
    if config.files.is_none() && config.files_key.is_none() {
        return Err(serde::de::Error::custom(
            "write_files requires either 'files' or 'files_key'",
        ));
    }
    Ok(Box::new(WriteFilesStep { config }))
}

#[async_trait]
impl Step for WriteFilesStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        _cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let root = match &self.config.root {
            Some(r) => renderer.render(r, ctx)?,
            None => String::new(),
        };

        let entries = self.resolve_entries(ctx)?;
        for (path_template, content) in entries {
            let rel_path = renderer.render(&path_template, ctx)?;
            let full_path = if root.is_empty() {
                PathBuf::from(&rel_path)
            } else {
                Path::new(&root).join(&rel_path)
            };

            if let Some(parent) = full_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let text = match content {
                Value::String(s) => s,
                other => serde_json::to_string_pretty(&other)
                    .map_err(|e| StepRuntimeError::Other(e.to_string()))?,
            };
            tracing::debug!(path = %full_path.display(), bytes = text.len(), "writing file");
            std::fs::write(&full_path, text)?;
        }
        Ok(())
    }
}

impl WriteFilesStep {
    fn resolve_entries(&self, ctx: &Context) -> Result<Vec<(String, Value)>, StepRuntimeError> {
        if let Some(files) = &self.config.files {
            return Ok(files
                .iter()
                .map(|f| (f.path.clone(), f.content.clone()))
                .collect());
        }

        let key = self
            .config
            .files_key
            .as_ref()
            .expect("construct() guarantees files or files_key is present");
        let value = ctx
            .get(key)
            .cloned()
            .ok_or_else(|| StepRuntimeError::MissingArtifact(key.clone()))?;

        let entries = match value {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = entry
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StepRuntimeError::Other(format!(
                        "file spec at '{key}' is missing a string 'path' field"
                    ))
                })?
                .to_string();
            let content = entry.get("content").cloned().unwrap_or(Value::Null);
            result.push((path, content));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_literal_files_creating_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let step = construct(&json!({
            "files": [{"path": "nested/out.txt", "content": "hello"}],
            "root": dir.path().to_string_lossy(),
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("nested/out.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn writes_from_files_key_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::empty();
        ctx.set(
            "generated",
            json!([{"path": "a.txt", "content": "A"}, {"path": "b.txt", "content": "B"}]),
        );
        let step = construct(&json!({
            "files_key": "generated",
            "root": dir.path().to_string_lossy(),
        }))
        .unwrap();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "A"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "B"
        );
    }

    #[tokio::test]
    async fn writes_a_single_file_spec_object_from_files_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::empty();
        ctx.set("generated", json!({"path": "solo.txt", "content": "S"}));
        let step = construct(&json!({
            "files_key": "generated",
            "root": dir.path().to_string_lossy(),
        }))
        .unwrap();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("solo.txt")).unwrap(),
            "S"
        );
    }

    #[tokio::test]
    async fn non_string_content_is_serialized_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let step = construct(&json!({
            "files": [{"path": "data.json", "content": {"a": 1}}],
            "root": dir.path().to_string_lossy(),
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("data.json")).unwrap();
        assert!(written.contains("\"a\""));
    }

    #[tokio::test]
    async fn missing_files_key_artifact_fails() {
        let step = construct(&json!({"files_key": "nope"})).unwrap();
        let mut ctx = Context::empty();
        let err = step
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepRuntimeError::MissingArtifact(_)));
    }

    #[test]
    fn construction_requires_files_or_files_key() {
        assert!(construct(&json!({})).is_err());
    }
}
