// Step trait and registry. Grounded on the teacher's
// `handlers/handler.rs` (`Handler` trait + `HandlerFactory::create`),
// generalized from a fixed `match` over a handful of built-in action types
// to an open, populated-at-startup map, since recipe step types are not a
// closed set the way GitHub Action handler kinds are (spec §4.3).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{StepConfigError, StepConstructError, StepRuntimeError, UnknownStepType};
use crate::recipe::StepSpec;

/// Every step is constructed from `(logger, config)` per spec §4.3; the
/// "logger" half is realized as a `tracing::Span` the executor enters around
/// `execute`, so the constructor only takes the step's raw `config` value.
#[async_trait::async_trait]
pub trait Step: Send + Sync {
    /// Executes the step against `ctx`. `cancel` is signalled when a
    /// fail-fast sibling in an enclosing `parallel`/`loop` has already
    /// failed; steps that perform long-running I/O (`run_command`) should
    /// race their work against it at their own suspension points.
    async fn execute(
        &self,
        ctx: &mut Context,
        cancel: &CancellationToken,
    ) -> Result<(), StepRuntimeError>;
}

/// A step constructor: deserializes `config` into the step's typed
/// configuration and builds the step instance. Configuration errors surface
/// synchronously here, per spec §4.3 ("Validates its own config at
/// construction").
pub type StepConstructor = fn(&Value) -> Result<Box<dyn Step>, serde_json::Error>;

static REGISTRY: Lazy<RwLock<HashMap<String, StepConstructor>>> =
    Lazy::new(|| RwLock::new(default_registrations()));

fn default_registrations() -> HashMap<String, StepConstructor> {
    let mut map = HashMap::new();
    insert(&mut map, "execute_recipe", crate::steps::execute_recipe::construct);
    insert(&mut map, "parallel", crate::steps::parallel::construct);
    insert(&mut map, "loop", crate::steps::loop_step::construct);
    insert(&mut map, "conditional", crate::steps::conditional::construct);
    insert(&mut map, "read_files", crate::steps::read_files::construct);
    insert(&mut map, "write_files", crate::steps::write_files::construct);
    insert(&mut map, "run_command", crate::steps::run_command::construct);
    insert(&mut map, "llm_generate", crate::steps::llm_generate::construct);
    insert(&mut map, "mcp", crate::steps::mcp::construct);
    map
}

fn insert(map: &mut HashMap<String, StepConstructor>, name: &str, ctor: StepConstructor) {
    if map.insert(name.to_string(), ctor).is_some() {
        panic!("step type '{name}' registered twice");
    }
}

/// Registers an additional step type, e.g. for a host application's own
/// leaf steps, or for a test's in-process step. Double-registering the same
/// type name is a program-configuration error (spec §8, "Idempotence of
/// registration"), so this panics rather than silently overwriting.
pub fn register_step_type(name: &str, ctor: StepConstructor) {
    let mut map = REGISTRY.write();
    insert(&mut map, name, ctor);
}

/// Looks up `spec.step_type` and constructs it, without running it. Kept
/// separate from [`dispatch_step`] so the top-level executor can tell a
/// lookup/construction failure apart from an execution failure (spec §4.2
/// steps 3a/3b vs 3c).
pub fn construct_step(index: usize, spec: &StepSpec) -> Result<Box<dyn Step>, StepConstructError> {
    let ctor = {
        let reg = REGISTRY.read();
        reg.get(&spec.step_type).copied()
    };
    let ctor = ctor.ok_or_else(|| UnknownStepType {
        index,
        step_type: spec.step_type.clone(),
    })?;
    let step = ctor(&spec.config).map_err(|source| StepConfigError {
        index,
        step_type: spec.step_type.clone(),
        source,
    })?;
    Ok(step)
}

/// Looks up, constructs, and executes the step named by `spec.step_type`
/// against `ctx`. Shared by the top-level [`crate::executor::Executor`] and
/// every composite step (`conditional`, `loop`, the per-branch launch inside
/// `parallel`) that must run one or more `StepSpec`s using "the same
/// sequencing rules as a top-level recipe" (spec §4.6, §4.7).
pub async fn dispatch_step(
    index: usize,
    spec: &StepSpec,
    ctx: &mut Context,
    cancel: &CancellationToken,
) -> Result<(), StepRuntimeError> {
    let step = construct_step(index, spec)?;
    step.execute(ctx, cancel).await
}

/// Runs `steps` strictly sequentially against `ctx`, stopping at the first
/// failure: the shared sequencing rule behind a `conditional` branch and a
/// single `loop` iteration's substeps.
pub async fn run_sequence(
    steps: &[StepSpec],
    ctx: &mut Context,
    cancel: &CancellationToken,
) -> Result<(), StepRuntimeError> {
    for (index, spec) in steps.iter().enumerate() {
        dispatch_step(index, spec, ctx, cancel).await?;
    }
    Ok(())
}
