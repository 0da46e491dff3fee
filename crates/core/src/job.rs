//! The unit of work handed from the expander to the runner.

use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use crate::backend::{BackendCommand, BackendKind, WorkingDir};
use crate::types::{Seed, Timestamp};

/// Where a job's output should land.
///
/// Only the prompt-file label is known at expansion time; the dated
/// directory and any collision suffix are settled by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutputTarget {
    /// Backend writes exactly the file it is given.
    File { dir_label: String, stem: String },
    /// Backend writes into a directory under names of its own choosing.
    Directory { dir_label: String },
}

impl OutputTarget {
    pub fn dir_label(&self) -> &str {
        match self {
            Self::File { dir_label, .. } | Self::Directory { dir_label } => dir_label,
        }
    }
}

/// A fully-formed generation job. Immutable once queued.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescriptor {
    pub id: Uuid,
    pub backend: BackendKind,
    pub command: BackendCommand,
    /// Prompt text as given to the backend, kept for logs.
    pub prompt: String,
    pub output: OutputTarget,
    pub seed: Seed,
    /// CUDA device index the backend was told to use.
    pub cuda_device: u32,
    pub created_at: Timestamp,
}

impl JobDescriptor {
    pub fn new(
        backend: BackendKind,
        command: BackendCommand,
        prompt: String,
        output: OutputTarget,
        seed: Seed,
        cuda_device: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            command,
            prompt,
            output,
            seed,
            cuda_device,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn working_dir(&self) -> WorkingDir {
        self.backend.working_dir()
    }

    /// Full argv for the process: interpreter, script, arguments, then the
    /// output flag pointing at `output`.
    pub fn argv(&self, interpreter: &str, output: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.command.args.len() + 4);
        argv.push(interpreter.to_string());
        argv.push(self.command.script.clone());
        argv.extend(self.command.args.iter().cloned());
        argv.push(self.backend.output_flag().to_string());
        argv.push(output.to_string_lossy().into_owned());
        argv
    }
}
