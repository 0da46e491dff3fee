//! Backend process execution.
//!
//! Backends are long-running scripts that report progress on the terminal,
//! so their stdout/stderr are passed straight through rather than captured.
//! Stdin is closed: the worker's own stdin carries control commands.
//!
//! There is no timeout and no `kill_on_drop`; a running backend is always
//! waited for to completion.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::BackendError;

/// Everything needed to start one backend process.
#[derive(Debug, Clone, Default)]
pub struct BackendInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (uses current dir if `None`).
    pub working_directory: Option<PathBuf>,
}

impl BackendInvocation {
    /// Build from a full argv (`argv[0]` is the program).
    pub fn from_argv(argv: &[String]) -> Self {
        let (program, args) = match argv.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            ..Self::default()
        }
    }
}

/// How a backend process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendExit {
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration: Duration,
}

impl BackendExit {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn the backend and wait for it to exit.
pub async fn run_command(invocation: &BackendInvocation) -> Result<BackendExit, BackendError> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    for (key, value) in &invocation.env_vars {
        cmd.env(key, value);
    }

    if let Some(dir) = &invocation.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|source| BackendError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;

    let status = child.wait().await.map_err(BackendError::Wait)?;

    Ok(BackendExit {
        exit_code: status.code().unwrap_or(-1),
        duration: start.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> BackendInvocation {
        BackendInvocation::from_argv(&["sh".to_string(), "-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let exit = run_command(&sh("exit 3")).await.unwrap();
        assert_eq!(exit.exit_code, 3);
        assert!(!exit.success());

        let exit = run_command(&sh("true")).await.unwrap();
        assert!(exit.success());
    }

    #[tokio::test]
    async fn applies_env_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = sh("printf '%s' \"$ARTGEN_TEST_VALUE\" > out.txt");
        inv.env_vars.push(("ARTGEN_TEST_VALUE".into(), "hello".into()));
        inv.working_directory = Some(dir.path().to_path_buf());

        run_command(&inv).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let inv = BackendInvocation::from_argv(&["artgen-no-such-program".to_string()]);
        assert_matches!(
            run_command(&inv).await,
            Err(BackendError::Spawn { program, .. }) if program == "artgen-no-such-program"
        );
    }

    #[test]
    fn from_argv_splits_program() {
        let inv = BackendInvocation::from_argv(&["python".into(), "vqgan.py".into(), "-s".into()]);
        assert_eq!(inv.program, "python");
        assert_eq!(inv.args, vec!["vqgan.py", "-s"]);
    }
}
