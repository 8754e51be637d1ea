// Context mapping the Python `recipe_executor/context.py` `Context` class,
// in the shape of the teacher's `steps_context.rs`: a plain owned map behind
// `#[derive(Clone)]`, not the `Arc<RwLock<..>>` sharing used by
// `execution_context.rs`'s `Variables`/`Global`. Those two are opposite
// designs on purpose — `Variables` is deliberately *shared* across every
// context in a job, while this `Context` must `clone()` into a fully
// independent copy whenever it crosses a concurrency boundary (§3, §4.1 of
// the spec).

use std::collections::HashMap;

use serde_json::Value;

/// Shared, cloneable, keyed artifact store with a separate configuration
/// scope. The central piece of mutable state threaded through every step.
#[derive(Debug, Clone, Default)]
pub struct Context {
    artifacts: HashMap<String, Value>,
    configuration: HashMap<String, Value>,
}

impl Context {
    /// Creates a new context, seeding artifacts and configuration from the
    /// given maps (e.g. the CLI's `--context key=value` flags become string
    /// artifacts here).
    pub fn new(artifacts: HashMap<String, Value>, configuration: HashMap<String, Value>) -> Self {
        Self {
            artifacts,
            configuration,
        }
    }

    /// An empty context with no artifacts and no configuration.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the artifact stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    /// Returns the artifact stored under `key`, or `default` if absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.artifacts.get(key).unwrap_or(default)
    }

    /// Sets (or overwrites) the artifact stored under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.artifacts.insert(key.into(), value);
    }

    /// Removes the artifact stored under `key`.
    ///
    /// # Errors
    /// Returns [`KeyNotFound`] if `key` is not present.
    pub fn delete(&mut self, key: &str) -> Result<(), KeyNotFound> {
        if self.artifacts.remove(key).is_some() {
            Ok(())
        } else {
            Err(KeyNotFound(key.to_string()))
        }
    }

    /// Whether an artifact is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    /// The number of artifacts currently stored.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the artifact store is empty.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// A snapshot of the current artifact keys, taken at call time.
    pub fn keys(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    /// Iterates a snapshot of the current artifacts; mutating the context
    /// afterward does not affect the returned iterator.
    pub fn iter(&self) -> impl Iterator<Item = (String, Value)> {
        self.artifacts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// A deep, independent copy of both the artifact and configuration
    /// scopes. Mutating the clone never affects `self`, and vice versa.
    pub fn clone_deep(&self) -> Self {
        self.clone()
    }

    /// A deep-cloned mapping of the artifact scope, for rendering and
    /// diagnostics.
    pub fn as_mapping(&self) -> HashMap<String, Value> {
        self.artifacts.clone()
    }

    /// The configuration scope, as a mapping.
    pub fn config_get(&self) -> &HashMap<String, Value> {
        &self.configuration
    }

    /// Resolves a dotted path (e.g. `"files.generated"`) against the
    /// artifact scope: the first segment is an artifact key, subsequent
    /// segments walk nested objects (by key) or arrays (by numeric index).
    /// Returns `None` if any segment along the way is absent or not
    /// indexable, rather than panicking.
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.artifacts.get(first)?.clone();
        for segment in segments {
            current = match current {
                Value::Object(ref map) => map.get(segment)?.clone(),
                Value::Array(ref arr) => {
                    let index: usize = segment.parse().ok()?;
                    arr.get(index)?.clone()
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replaces the configuration scope wholesale.
    pub fn config_set(&mut self, configuration: HashMap<String, Value>) {
        self.configuration = configuration;
    }
}

/// Raised by [`Context::delete`] when the key is not present.
#[derive(Debug, Clone, thiserror::Error)]
#[error("key '{0}' not found in context")]
pub struct KeyNotFound(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_set_delete_roundtrip() {
        let mut ctx = Context::empty();
        assert_eq!(ctx.get("x"), None);
        ctx.set("x", json!("1"));
        assert_eq!(ctx.get("x"), Some(&json!("1")));
        assert!(ctx.contains("x"));
        ctx.delete("x").unwrap();
        assert!(!ctx.contains("x"));
    }

    #[test]
    fn delete_missing_key_errors() {
        let mut ctx = Context::empty();
        assert!(ctx.delete("missing").is_err());
    }

    #[test]
    fn get_or_returns_default_for_absent_key() {
        let ctx = Context::empty();
        let fallback = json!("fallback");
        assert_eq!(ctx.get_or("missing", &fallback), &json!("fallback"));
    }

    #[test]
    fn clone_is_independent_of_original() {
        let mut original = Context::empty();
        original.set("a", json!(1));

        let mut cloned = original.clone_deep();
        cloned.set("a", json!(2));
        cloned.set("b", json!("new"));

        assert_eq!(original.get("a"), Some(&json!(1)));
        assert_eq!(original.get("b"), None);
        assert_eq!(cloned.get("a"), Some(&json!(2)));
        assert_eq!(cloned.get("b"), Some(&json!("new")));
    }

    #[test]
    fn clone_deep_copies_configuration_independently() {
        let mut original = Context::empty();
        let mut config = HashMap::new();
        config.insert("model".to_string(), json!("gpt-4"));
        original.config_set(config);

        let mut cloned = original.clone_deep();
        let mut new_config = HashMap::new();
        new_config.insert("model".to_string(), json!("claude"));
        cloned.config_set(new_config);

        assert_eq!(
            original.config_get().get("model"),
            Some(&json!("gpt-4"))
        );
        assert_eq!(cloned.config_get().get("model"), Some(&json!("claude")));
    }

    #[test]
    fn keys_is_a_snapshot() {
        let mut ctx = Context::empty();
        ctx.set("a", json!(1));
        ctx.set("b", json!(2));
        let mut keys = ctx.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn resolve_path_walks_nested_objects_and_arrays() {
        let mut ctx = Context::empty();
        ctx.set(
            "files",
            json!({"generated": [{"path": "a.txt"}, {"path": "b.txt"}]}),
        );
        assert_eq!(
            ctx.resolve_path("files.generated.1.path"),
            Some(json!("b.txt"))
        );
        assert_eq!(ctx.resolve_path("files.missing"), None);
        assert_eq!(ctx.resolve_path("nope"), None);
    }

    #[test]
    fn as_mapping_is_a_deep_copy() {
        let mut ctx = Context::empty();
        ctx.set("a", json!({"nested": 1}));
        let mut mapping = ctx.as_mapping();
        mapping.insert("a".to_string(), json!({"nested": 2}));
        assert_eq!(ctx.get("a"), Some(&json!({"nested": 1})));
    }
}
