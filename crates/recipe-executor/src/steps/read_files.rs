// `read_files`: a pure, local-filesystem leaf step (spec §4.8). Grounded on
// `original_source/recipe_executor/steps/read_files.py` for the merge-mode
// shape, with one deliberate fix noted in spec §9's open-question
// resolution: `merge_mode` is respected regardless of file count, so a
// single-file read under `merge_mode: "dict"` still produces `{path:
// content}` rather than a bare string (some source variants did the
// latter; the spec picks the former — see DESIGN.md).

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::render::Renderer;
use crate::step::Step;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathSpec {
    One(String),
    Many(Vec<String>),
}

impl PathSpec {
    fn entries(&self) -> Vec<String> {
        match self {
            PathSpec::One(s) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            PathSpec::Many(paths) => paths.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadFilesConfig {
    path: PathSpec,
    #[serde(alias = "content_key")]
    artifact: String,
    #[serde(default)]
    optional: bool,
    #[serde(default = "default_merge_mode")]
    merge_mode: String,
}

fn default_merge_mode() -> String {
    "concat".to_string()
}

struct ReadFilesStep {
    config: ReadFilesConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: ReadFilesConfig = serde_json::from_value(value.clone())?;
    if config.merge_mode != "concat" && config.merge_mode != "dict" {
        return Err(serde::de::Error::custom(format!(
            "merge_mode must be 'concat' or 'dict', got '{}'",
            config.merge_mode
        )));
    }
    Ok(Box::new(ReadFilesStep { config }))
}

#[async_trait]
impl Step for ReadFilesStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        _cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let artifact_key = renderer.render(&self.config.artifact, ctx)?;

        let mut rendered_paths = Vec::new();
        for raw in self.config.path.entries() {
            rendered_paths.push(renderer.render(&raw, ctx)?);
        }

        let value = if self.config.merge_mode == "dict" {
            self.read_dict(&rendered_paths)?
        } else {
            self.read_concat(&rendered_paths)?
        };

        ctx.set(artifact_key, value);
        Ok(())
    }
}

impl ReadFilesStep {
    fn read_dict(&self, paths: &[String]) -> Result<Value, StepRuntimeError> {
        let mut map = serde_json::Map::new();
        for path in paths {
            if !Path::new(path).is_file() {
                if self.config.optional {
                    tracing::warn!(path, "optional file not found, omitting from result");
                    continue;
                }
                return Err(not_found(path));
            }
            let content = std::fs::read_to_string(path)?;
            map.insert(path.clone(), Value::String(content));
        }
        Ok(Value::Object(map))
    }

    fn read_concat(&self, paths: &[String]) -> Result<Value, StepRuntimeError> {
        let mut parts = Vec::new();
        for path in paths {
            if !Path::new(path).is_file() {
                if self.config.optional {
                    tracing::warn!(path, "optional file not found, skipping");
                    continue;
                }
                return Err(not_found(path));
            }
            let content = std::fs::read_to_string(path)?;
            if paths.len() > 1 {
                parts.push(format!("{path}\n{content}"));
            } else {
                parts.push(content);
            }
        }
        let joined = if paths.len() > 1 {
            parts.join("\n\n")
        } else {
            parts.into_iter().next().unwrap_or_default()
        };
        Ok(Value::String(joined))
    }
}

fn not_found(path: &str) -> StepRuntimeError {
    StepRuntimeError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("file not found: {path}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn single_file_concat_stores_raw_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let step = construct(&json!({
            "path": path.to_string_lossy(),
            "artifact": "content",
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ctx.get("content"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn single_file_dict_mode_still_produces_a_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let step = construct(&json!({
            "path": path.to_string_lossy(),
            "artifact": "content",
            "merge_mode": "dict",
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        let stored = ctx.get("content").unwrap();
        assert_eq!(
            stored.get(path.to_string_lossy().as_ref()),
            Some(&json!("hello"))
        );
    }

    #[tokio::test]
    async fn multi_file_concat_joins_with_path_headers() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "A").unwrap();
        std::fs::write(&b, "B").unwrap();
        let step = construct(&json!({
            "path": [a.to_string_lossy(), b.to_string_lossy()],
            "artifact": "content",
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        let joined = ctx.get("content").unwrap().as_str().unwrap().to_string();
        assert!(joined.contains("A"));
        assert!(joined.contains("B"));
        assert!(joined.contains(&a.to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn required_missing_file_fails() {
        let step = construct(&json!({
            "path": "/no/such/file.txt",
            "artifact": "content",
        }))
        .unwrap();
        let mut ctx = Context::empty();
        let err = step
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepRuntimeError::Io(_)));
    }

    #[tokio::test]
    async fn optional_missing_file_is_skipped_in_concat() {
        let step = construct(&json!({
            "path": "/no/such/file.txt",
            "artifact": "content",
            "optional": true,
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ctx.get("content"), Some(&json!("")));
    }

    #[tokio::test]
    async fn optional_missing_file_is_omitted_in_dict() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, "yes").unwrap();
        let step = construct(&json!({
            "path": [present.to_string_lossy(), "/no/such/file.txt"],
            "artifact": "content",
            "merge_mode": "dict",
            "optional": true,
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        let stored = ctx.get("content").unwrap().as_object().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key(present.to_string_lossy().as_ref()));
    }

    #[tokio::test]
    async fn rejects_unknown_merge_mode_at_construction() {
        let err = construct(&json!({
            "path": "a.txt",
            "artifact": "content",
            "merge_mode": "banana",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("merge_mode"));
    }
}
