// Closed error taxonomy for the executor, in the style of the teacher's
// `runner-sdk/src/process_invoker.rs` `ProcessExitCodeError`: one
// `thiserror::Error` enum per boundary, propagated with `anyhow::Error` once
// it crosses an API the caller doesn't need to match on (main.rs, step
// trait objects returning `Box<dyn std::error::Error>`-adjacent errors).

use std::path::PathBuf;

/// Errors raised while loading a recipe from a file, string, or value.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read recipe file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("recipe is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while validating a parsed recipe's static shape, before any
/// step has executed.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("recipe has no steps")]
    EmptySteps,

    #[error("step {index} has no 'type' field")]
    MissingType { index: usize },
}

/// Raised by the step registry lookup when a recipe references a type with
/// no registered constructor.
#[derive(Debug, thiserror::Error)]
#[error("unknown step type '{step_type}' at index {index}")]
pub struct UnknownStepType {
    pub index: usize,
    pub step_type: String,
}

/// Raised while deserializing a step's `config` object into its typed
/// configuration struct.
#[derive(Debug, thiserror::Error)]
#[error("step {index} ('{step_type}') has an invalid configuration: {source}")]
pub struct StepConfigError {
    pub index: usize,
    pub step_type: String,
    #[source]
    pub source: serde_json::Error,
}

/// Raised by the conditional-expression parser/evaluator (see [`crate::expr`]).
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("condition syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("condition evaluation error: {0}")]
    Evaluation(String),
}

/// Raised by [`crate::render::Renderer`].
#[derive(Debug, thiserror::Error)]
#[error("template rendering failed: {0}")]
pub struct TemplateError(pub String);

/// Raised while determining whether a `loop` step's `items` expression is a
/// list or a mapping.
#[derive(Debug, thiserror::Error)]
pub enum LoopTypeError {
    #[error("loop 'items' value is not a JSON array or object")]
    NotACollection,

    #[error("loop 'items' artifact '{0}' was not found in context")]
    MissingArtifact(String),
}

/// The error type returned by [`crate::step::Step::execute`]. Every leaf or
/// composite step funnels its failure through one of these variants so the
/// executor can attribute it to a step index/type uniformly.
#[derive(Debug, thiserror::Error)]
pub enum StepRuntimeError {
    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    LoopType(#[from] LoopTypeError),

    #[error("missing required artifact '{0}'")]
    MissingArtifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sub-recipe execution failed: {0}")]
    SubRecipe(#[source] anyhow::Error),

    #[error("external call failed: {0}")]
    ExternalCall(#[source] anyhow::Error),

    #[error("command execution failed: {0}")]
    Command(#[from] recipe_executor_common::RunCommandError),

    #[error("unknown step type '{step_type}' at index {index}")]
    UnknownStepType { index: usize, step_type: String },

    #[error("step {index} ('{step_type}') has an invalid configuration: {source}")]
    Config {
        index: usize,
        step_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sub-recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("substep {index} failed: {source}")]
    ParallelFailed {
        index: usize,
        #[source]
        source: Box<StepRuntimeError>,
    },

    #[error("loop iteration failed for key '{key}': {source}")]
    LoopIteration {
        key: String,
        #[source]
        source: Box<StepRuntimeError>,
    },

    #[error("{0}")]
    Other(String),
}

impl From<UnknownStepType> for StepRuntimeError {
    fn from(err: UnknownStepType) -> Self {
        StepRuntimeError::UnknownStepType {
            index: err.index,
            step_type: err.step_type,
        }
    }
}

impl From<StepConfigError> for StepRuntimeError {
    fn from(err: StepConfigError) -> Self {
        StepRuntimeError::Config {
            index: err.index,
            step_type: err.step_type,
            source: err.source,
        }
    }
}

/// Raised by [`crate::step::construct_step`]: a step failed to resolve to a
/// runnable instance, before `execute` ever ran. Kept distinct from
/// [`StepRuntimeError`] so the top-level executor can tell "this step never
/// started" (3a/3b, spec §4.2) from "this step ran and failed" (3c) without
/// matching on `StepRuntimeError`'s variants.
#[derive(Debug, thiserror::Error)]
pub enum StepConstructError {
    #[error(transparent)]
    UnknownType(#[from] UnknownStepType),

    #[error(transparent)]
    Config(#[from] StepConfigError),
}

impl From<StepConstructError> for StepRuntimeError {
    fn from(err: StepConstructError) -> Self {
        match err {
            StepConstructError::UnknownType(e) => e.into(),
            StepConstructError::Config(e) => e.into(),
        }
    }
}

/// Top-level error returned by [`crate::executor::Executor::execute`],
/// wrapping a failure at a specific step index the way the Python original's
/// `executor.py` wraps with `f"Step {index} ('{step_type}') failed: {exc}"`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    UnknownStepType(#[from] UnknownStepType),

    #[error(transparent)]
    StepConfig(#[from] StepConfigError),

    #[error("step {index} ('{step_type}') failed: {source}")]
    StepFailed {
        index: usize,
        step_type: String,
        #[source]
        source: StepRuntimeError,
    },
}

impl From<StepConstructError> for ExecutorError {
    fn from(err: StepConstructError) -> Self {
        match err {
            StepConstructError::UnknownType(e) => ExecutorError::UnknownStepType(e),
            StepConstructError::Config(e) => ExecutorError::StepConfig(e),
        }
    }
}
