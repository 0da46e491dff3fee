//! Pure domain logic for the prompt-file job engine.
//!
//! Parses prompt files, tracks the directive-driven settings registry,
//! and expands subject/style lists into backend job descriptors. Nothing
//! in this crate spawns processes; execution lives in `artgen-pipeline`.

pub mod backend;
pub mod directives;
pub mod error;
pub mod expander;
pub mod job;
pub mod naming;
pub mod settings;
pub mod types;
