//! Ambient infrastructure shared by the recipe executor: tracing setup and
//! a cancellable process invoker used by the `run_command` leaf step.

pub mod logging;
pub mod process;

pub use logging::init_tracing;
pub use process::{run_process, ProcessOutcome, RunCommandError};
