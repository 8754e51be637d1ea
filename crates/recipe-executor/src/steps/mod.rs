//! Step implementations. Every module here exposes a `construct(&Value) ->
//! Result<Box<dyn Step>, serde_json::Error>` function, registered under its
//! spec-given type name in [`crate::step::default_registrations`].

pub mod conditional;
pub mod execute_recipe;
pub mod llm_generate;
pub mod loop_step;
pub mod mcp;
pub mod parallel;
pub mod read_files;
pub mod run_command;
pub mod write_files;
