// `conditional`: branching on the closed expression language in
// [`crate::expr`] (spec §4.7). Grounded on the teacher's
// `CompositeActionHandler`/`expressions::evaluate` pairing: render the
// condition the same way any other templated field is rendered, then hand
// the rendered text to a dedicated evaluator rather than the host
// language's `eval` (spec §9's REDESIGN FLAGS call this out explicitly).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::StepRuntimeError;
use crate::recipe::StepSpec;
use crate::render::Renderer;
use crate::step::{run_sequence, Step};

#[derive(Debug, Deserialize)]
struct Branch {
    #[serde(default)]
    steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
struct ConditionalConfig {
    condition: String,
    #[serde(default)]
    if_true: Option<Branch>,
    #[serde(default)]
    if_false: Option<Branch>,
}

struct ConditionalStep {
    config: ConditionalConfig,
}

pub fn construct(value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
    let config: ConditionalConfig = serde_json::from_value(value.clone())?;
    Ok(Box::new(ConditionalStep { config }))
}

#[async_trait]
impl Step for ConditionalStep {
    async fn execute(
        &self,
        ctx: &mut Context,
        cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError> {
        let renderer = Renderer::new();
        let rendered = renderer.render(&self.config.condition, ctx)?;
        let truthy = crate::expr::evaluate(&rendered, ctx)?;

        // Only the selected branch's steps are ever constructed (spec §8:
        // "the unselected branch's steps are never constructed") — the
        // other branch's `StepSpec`s are simply never passed to
        // `run_sequence`.
        let branch = if truthy {
            self.config.if_true.as_ref()
        } else {
            self.config.if_false.as_ref()
        };

        match branch {
            Some(branch) => run_sequence(&branch.steps, ctx, cancel).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{register_step_type, Step as _};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Once;

    static TRUE_BRANCH_RUNS: AtomicUsize = AtomicUsize::new(0);
    static FALSE_BRANCH_RUNS: AtomicUsize = AtomicUsize::new(0);

    struct CountStep(&'static AtomicUsize);

    #[async_trait]
    impl Step for CountStep {
        async fn execute(
            &self,
            _ctx: &mut Context,
            _cancel: &CancellationToken,
        ) -> Result<(), StepRuntimeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn construct_true_counter(_value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
        Ok(Box::new(CountStep(&TRUE_BRANCH_RUNS)))
    }

    fn construct_false_counter(_value: &Value) -> Result<Box<dyn Step>, serde_json::Error> {
        Ok(Box::new(CountStep(&FALSE_BRANCH_RUNS)))
    }

    fn register_counters() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            register_step_type("__test_true_counter", construct_true_counter);
            register_step_type("__test_false_counter", construct_false_counter);
        });
    }

    #[tokio::test]
    async fn runs_if_true_branch_when_condition_holds() {
        register_counters();
        TRUE_BRANCH_RUNS.store(0, Ordering::SeqCst);
        FALSE_BRANCH_RUNS.store(0, Ordering::SeqCst);

        let step = construct(&json!({
            "condition": "context[\"mode\"] == \"fast\"",
            "if_true": {"steps": [{"type": "__test_true_counter"}]},
            "if_false": {"steps": [{"type": "__test_false_counter"}]},
        }))
        .unwrap();

        let mut ctx = Context::empty();
        ctx.set("mode", json!("fast"));
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(TRUE_BRANCH_RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(FALSE_BRANCH_RUNS.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runs_if_false_branch_when_condition_fails() {
        register_counters();
        TRUE_BRANCH_RUNS.store(0, Ordering::SeqCst);
        FALSE_BRANCH_RUNS.store(0, Ordering::SeqCst);

        let step = construct(&json!({
            "condition": "context[\"mode\"] == \"fast\"",
            "if_true": {"steps": [{"type": "__test_true_counter"}]},
            "if_false": {"steps": [{"type": "__test_false_counter"}]},
        }))
        .unwrap();

        let mut ctx = Context::empty();
        ctx.set("mode", json!("slow"));
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(TRUE_BRANCH_RUNS.load(Ordering::SeqCst), 0);
        assert_eq!(FALSE_BRANCH_RUNS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_branch_is_a_no_op() {
        let step = construct(&json!({
            "condition": "false",
        }))
        .unwrap();
        let mut ctx = Context::empty();
        step.execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn syntax_error_surfaces_as_condition_error() {
        let step = construct(&json!({"condition": "???"})).unwrap();
        let mut ctx = Context::empty();
        let err = step
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepRuntimeError::Condition(_)));
    }
}
