// Template renderer seam. The teacher has no analogue (GitHub Actions
// expression syntax `${{ }}` is handled entirely by `expressions/mod.rs`,
// which is closer to `crate::expr`); this is grounded on the broader pack's
// workflow-engine repos, which reach for `handlebars` for exactly this kind
// of "render this string against a context" boundary (e.g.
// `llm-orchestrator-core/src/executor.rs`).
//
// Rendering is string-templating only: `{{ artifact.nested }}` substitutes
// JSON values from the context, never executes arbitrary code (unlike the
// Python original's use of f-strings/`.format()` in places, which this
// deliberately narrows).

use handlebars::Handlebars;
use serde_json::Value;

use crate::context::Context;
use crate::error::TemplateError;

/// Renders Handlebars-style `{{ }}` templates against a [`Context`]'s
/// artifacts. A thin, stateless wrapper: constructing one is cheap enough to
/// do per-call, so no shared registry is cached across steps.
pub struct Renderer {
    handlebars: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Recipe artifacts are arbitrary data, not HTML; escaping would
        // corrupt file paths and shell commands built from rendered text.
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);
        Self { handlebars }
    }

    /// Renders `text` against `ctx`'s artifacts (plus its configuration
    /// scope, exposed under the `config` key).
    pub fn render(&self, text: &str, ctx: &Context) -> Result<String, TemplateError> {
        let mut data = ctx.as_mapping();
        data.insert(
            "config".to_string(),
            Value::Object(ctx.config_get().clone().into_iter().collect()),
        );
        self.handlebars
            .render_template(text, &data)
            .map_err(|err| TemplateError(err.to_string()))
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
