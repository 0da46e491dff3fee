//! Job runner: one job from dispatch to finalized artifacts.
//!
//! The runner settles the output location at dispatch time (dated
//! directory plus a collision-free file name), launches the backend, waits
//! for it and finalizes whatever it produced. It never fails outright:
//! every problem is logged and folded into the returned [`JobReport`].

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use artgen_core::backend::{render_command_line, WorkingDir};
use artgen_core::job::{JobDescriptor, OutputTarget};
use artgen_core::naming::{dated_dir_name, with_collision_suffix};
use serde::Serialize;
use uuid::Uuid;

use crate::device::DeviceProbe;
use crate::error::BackendError;
use crate::finalize::{self, Provenance, DEFAULT_JPEG_QUALITY};
use crate::subprocess::{self, BackendInvocation};

/// Extension backends write.
pub const INTERMEDIATE_EXTENSION: &str = "png";
/// Extension of finalized artifacts.
pub const FINAL_EXTENSION: &str = "jpg";
/// Subdirectory the Stable Diffusion scripts write their samples into.
pub const SAMPLES_DIR: &str = "samples";

/// Upper bound on collision probing; reaching it means something is wrong
/// with the output directory rather than a genuine run of duplicates.
const MAX_COLLISION_ATTEMPTS: u32 = 100_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Filesystem layout and process settings for running backends.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root under which dated output directories are created. Absolute.
    pub output_root: PathBuf,
    /// Working directory for the VQGAN and diffusion scripts.
    pub backend_root: PathBuf,
    /// Working directory for the Stable Diffusion scripts.
    pub stable_diffusion_dir: PathBuf,
    /// Interpreter program every backend script is run with.
    pub python: String,
    /// Directories prepended to the child's `PYTHONPATH`.
    pub pythonpath_dirs: Vec<PathBuf>,
    pub jpeg_quality: u8,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            backend_root: PathBuf::from("."),
            stable_diffusion_dir: PathBuf::from("stable-diffusion"),
            python: "python".to_string(),
            pythonpath_dirs: Vec::new(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl RunnerConfig {
    pub fn working_dir(&self, dir: WorkingDir) -> &Path {
        match dir {
            WorkingDir::BackendRoot => &self.backend_root,
            WorkingDir::StableDiffusion => &self.stable_diffusion_dir,
        }
    }

    /// `PYTHONPATH` for the child: configured directories first, then any
    /// value inherited from the environment.
    pub fn pythonpath(&self, inherited: Option<OsString>) -> Option<OsString> {
        let inherited_paths = inherited
            .as_deref()
            .map(|v| std::env::split_paths(v).collect::<Vec<_>>())
            .unwrap_or_default();
        let all: Vec<PathBuf> = self
            .pythonpath_dirs
            .iter()
            .cloned()
            .chain(inherited_paths)
            .collect();
        if all.is_empty() {
            return None;
        }
        match std::env::join_paths(all) {
            Ok(joined) => Some(joined),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot build PYTHONPATH, leaving it unchanged");
                inherited
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Lifecycle of a job inside the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Dispatched,
    Running,
    Finalizing,
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// At least one artifact was finalized.
    Produced,
    /// The backend ran but left nothing to finalize.
    NoOutput,
    /// The backend could not be started.
    LaunchFailed,
}

/// Result of running one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
    /// Backend exit code; `None` if it never ran.
    pub exit_code: Option<i32>,
    /// Finalized artifacts, in creation order.
    pub artifacts: Vec<PathBuf>,
    /// Errors met along the way, one line each.
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

impl JobReport {
    fn launch_failed(job_id: Uuid, error: String, elapsed: Duration) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::LaunchFailed,
            exit_code: None,
            artifacts: Vec::new(),
            errors: vec![error],
            elapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// Output location
// ---------------------------------------------------------------------------

/// Whether `stem` is taken in `dir`, by a finalized artifact or by an
/// intermediate that has not been finalized.
fn slot_taken(dir: &Path, stem: &str) -> bool {
    [FINAL_EXTENSION, INTERMEDIATE_EXTENSION]
        .iter()
        .any(|ext| dir.join(format!("{stem}.{ext}")).exists())
}

/// First free stem among `stem`, `stem-2`, `stem-3`, ...
pub fn resolve_collision(dir: &Path, stem: &str) -> String {
    (1..=MAX_COLLISION_ATTEMPTS)
        .map(|attempt| with_collision_suffix(stem, attempt))
        .find(|candidate| !slot_taken(dir, candidate))
        .unwrap_or_else(|| format!("{stem}-{}", Uuid::new_v4().simple()))
}

/// Time-based stem for a Stable Diffusion sample, e.g. `202403-0114-0503`.
pub fn sample_stem(now: chrono::DateTime<chrono::Local>) -> String {
    now.format("%Y%m-%d%H-%M%S").to_string()
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs jobs against the configured backends.
pub struct JobRunner {
    config: RunnerConfig,
    device: Arc<DeviceProbe>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, device: Arc<DeviceProbe>) -> Self {
        Self { config, device }
    }

    /// Run `job` to completion.
    pub async fn run(&self, job: &JobDescriptor) -> JobReport {
        let start = Instant::now();
        tracing::info!(
            job_id = %job.id,
            backend = %job.backend,
            seed = job.seed,
            state = %JobState::Dispatched,
            prompt = %job.prompt,
            "Job dispatched",
        );

        let dir = match self.prepare_output_dir(job.output.dir_label()) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Cannot prepare output directory");
                return JobReport::launch_failed(job.id, e.to_string(), start.elapsed());
            }
        };

        let report = match &job.output {
            OutputTarget::File { stem, .. } => self.run_file_job(job, &dir, stem, start).await,
            OutputTarget::Directory { .. } => self.run_directory_job(job, &dir, start).await,
        };

        tracing::info!(
            job_id = %job.id,
            state = %JobState::Completed,
            outcome = ?report.outcome,
            artifacts = report.artifacts.len(),
            elapsed = %finalize::format_elapsed(report.elapsed),
            "Job completed",
        );
        report
    }

    /// Create `output_root/YYYY-MM-DD-label` for today's local date.
    fn prepare_output_dir(&self, label: &str) -> Result<PathBuf, BackendError> {
        let today = chrono::Local::now().date_naive();
        let dir = self.config.output_root.join(dated_dir_name(today, label));
        std::fs::create_dir_all(&dir).map_err(|source| BackendError::OutputDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    fn invocation(&self, job: &JobDescriptor, output: &Path) -> BackendInvocation {
        let argv = job.argv(&self.config.python, output);
        let mut invocation = BackendInvocation::from_argv(&argv);
        invocation.working_directory =
            Some(self.config.working_dir(job.working_dir()).to_path_buf());
        if let Some(path) = self.config.pythonpath(std::env::var_os("PYTHONPATH")) {
            invocation
                .env_vars
                .push(("PYTHONPATH".to_string(), path.to_string_lossy().into_owned()));
        }
        invocation
    }

    /// Launch the backend and wait. `Err` carries the launch failure text.
    async fn launch(
        &self,
        job: &JobDescriptor,
        invocation: &BackendInvocation,
    ) -> Result<i32, String> {
        tracing::info!(
            job_id = %job.id,
            state = %JobState::Running,
            working_dir = ?invocation.working_directory,
            "Running backend",
        );

        match subprocess::run_command(invocation).await {
            Ok(exit) => {
                if !exit.success() {
                    tracing::warn!(
                        job_id = %job.id,
                        exit_code = exit.exit_code,
                        "Backend exited with non-zero status",
                    );
                }
                Ok(exit.exit_code)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Backend launch failed");
                Err(e.to_string())
            }
        }
    }

    async fn run_file_job(
        &self,
        job: &JobDescriptor,
        dir: &Path,
        stem: &str,
        start: Instant,
    ) -> JobReport {
        let stem = resolve_collision(dir, stem);
        let intermediate = dir.join(format!("{stem}.{INTERMEDIATE_EXTENSION}"));
        let final_path = dir.join(format!("{stem}.{FINAL_EXTENSION}"));

        let invocation = self.invocation(job, &intermediate);
        let command_line = render_command_line(&job.argv(&self.config.python, &intermediate));
        tracing::debug!(job_id = %job.id, command = %command_line, "Backend command");

        let exit_code = match self.launch(job, &invocation).await {
            Ok(code) => code,
            Err(e) => return JobReport::launch_failed(job.id, e, start.elapsed()),
        };

        let mut report = JobReport {
            job_id: job.id,
            outcome: JobOutcome::NoOutput,
            exit_code: Some(exit_code),
            artifacts: Vec::new(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        };

        if intermediate.exists() {
            tracing::info!(job_id = %job.id, state = %JobState::Finalizing, "Finalizing output");
            let provenance = self.provenance(job, command_line, start.elapsed());
            match self.finalize(intermediate, final_path.clone(), provenance).await {
                Ok(()) => report.artifacts.push(final_path),
                Err(e) => report.errors.push(e),
            }
        } else {
            tracing::warn!(
                job_id = %job.id,
                expected = %intermediate.display(),
                "No output produced",
            );
        }

        report.outcome = outcome_of(&report);
        report.elapsed = start.elapsed();
        report
    }

    async fn run_directory_job(
        &self,
        job: &JobDescriptor,
        dir: &Path,
        start: Instant,
    ) -> JobReport {
        let samples_dir = dir.join(SAMPLES_DIR);
        // Leftovers from earlier jobs belong to those jobs.
        let existing: HashSet<PathBuf> = list_samples(&samples_dir).into_iter().collect();
        if !existing.is_empty() {
            tracing::debug!(
                job_id = %job.id,
                dir = %samples_dir.display(),
                leftover = existing.len(),
                "Ignoring samples left by earlier jobs",
            );
        }

        let invocation = self.invocation(job, dir);
        let command_line = render_command_line(&job.argv(&self.config.python, dir));
        tracing::debug!(job_id = %job.id, command = %command_line, "Backend command");

        let exit_code = match self.launch(job, &invocation).await {
            Ok(code) => code,
            Err(e) => return JobReport::launch_failed(job.id, e, start.elapsed()),
        };

        let mut report = JobReport {
            job_id: job.id,
            outcome: JobOutcome::NoOutput,
            exit_code: Some(exit_code),
            artifacts: Vec::new(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        };

        let samples: Vec<PathBuf> = list_samples(&samples_dir)
            .into_iter()
            .filter(|sample| !existing.contains(sample))
            .collect();
        if samples.is_empty() {
            tracing::warn!(job_id = %job.id, dir = %samples_dir.display(), "No output produced");
        } else {
            tracing::info!(
                job_id = %job.id,
                state = %JobState::Finalizing,
                samples = samples.len(),
                "Finalizing output",
            );
        }

        // One elapsed value for every sample, measured when the backend exited.
        let provenance = self.provenance(job, command_line, start.elapsed());
        for (seq, sample) in samples.into_iter().enumerate() {
            let stem = format!("{}-{seq}", sample_stem(chrono::Local::now()));
            let stem = resolve_collision(dir, &stem);
            let final_path = dir.join(format!("{stem}.{FINAL_EXTENSION}"));
            match self.finalize(sample, final_path.clone(), provenance.clone()).await {
                Ok(()) => report.artifacts.push(final_path),
                Err(e) => report.errors.push(e),
            }
        }

        // Only succeeds once the directory is empty.
        if samples_dir.is_dir() && std::fs::remove_dir(&samples_dir).is_err() {
            tracing::debug!(
                dir = %samples_dir.display(),
                "Samples directory not empty, leaving it",
            );
        }

        report.outcome = outcome_of(&report);
        report.elapsed = start.elapsed();
        report
    }

    fn provenance(
        &self,
        job: &JobDescriptor,
        command_line: String,
        elapsed: Duration,
    ) -> Provenance {
        Provenance {
            command_line,
            device_name: self.device.name(job.cuda_device),
            elapsed,
        }
    }

    /// Finalize on the blocking pool; decode and encode are CPU-bound.
    async fn finalize(
        &self,
        intermediate: PathBuf,
        dest: PathBuf,
        provenance: Provenance,
    ) -> Result<(), String> {
        let quality = self.config.jpeg_quality;
        let result = tokio::task::spawn_blocking(move || {
            finalize::finalize(&intermediate, &dest, &provenance, quality)
                .map_err(|e| (intermediate, dest, e))
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err((intermediate, dest, e))) => {
                tracing::error!(
                    from = %intermediate.display(),
                    to = %dest.display(),
                    error = %e,
                    "Finalization failed, intermediate kept",
                );
                Err(e.to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "Finalization task failed");
                Err(format!("finalization task failed: {e}"))
            }
        }
    }
}

fn outcome_of(report: &JobReport) -> JobOutcome {
    if report.artifacts.is_empty() {
        JobOutcome::NoOutput
    } else {
        JobOutcome::Produced
    }
}

/// `*.png` files directly inside `dir`, sorted by name.
fn list_samples(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut samples: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(INTERMEDIATE_EXTENSION))
        })
        .collect();
    samples.sort();
    samples
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn first_free_slot_is_the_stem() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_collision(dir.path(), "a-cat"), "a-cat");
    }

    #[test]
    fn finalized_and_intermediate_files_both_occupy_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-cat.jpg"), b"").unwrap();
        assert_eq!(resolve_collision(dir.path(), "a-cat"), "a-cat-2");

        std::fs::write(dir.path().join("a-cat-2.png"), b"").unwrap();
        assert_eq!(resolve_collision(dir.path(), "a-cat"), "a-cat-3");
    }

    #[test]
    fn unrelated_extensions_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-cat.txt"), b"").unwrap();
        assert_eq!(resolve_collision(dir.path(), "a-cat"), "a-cat");
    }

    #[test]
    fn sample_stem_format() {
        let at = chrono::Local.with_ymd_and_hms(2024, 3, 1, 14, 5, 3).unwrap();
        assert_eq!(sample_stem(at), "202403-0114-0503");
    }

    #[test]
    fn samples_are_sorted_pngs_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["00002.png", "00001.png", "notes.txt", "00003.PNG"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = list_samples(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["00001.png", "00002.png", "00003.PNG"]);
        assert!(list_samples(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn pythonpath_prepends_configured_dirs() {
        let config = RunnerConfig {
            pythonpath_dirs: vec![PathBuf::from("/b/latent-diffusion"), PathBuf::from("/b/CLIP")],
            ..RunnerConfig::default()
        };
        let joined = config.pythonpath(Some(OsString::from("/existing"))).unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(
            parts,
            vec![
                PathBuf::from("/b/latent-diffusion"),
                PathBuf::from("/b/CLIP"),
                PathBuf::from("/existing"),
            ]
        );
        assert!(RunnerConfig::default().pythonpath(None).is_none());
    }

    #[test]
    fn working_dir_per_backend() {
        let config = RunnerConfig {
            backend_root: PathBuf::from("/b"),
            stable_diffusion_dir: PathBuf::from("/b/stable-diffusion"),
            ..RunnerConfig::default()
        };
        assert_eq!(config.working_dir(WorkingDir::BackendRoot), Path::new("/b"));
        assert_eq!(
            config.working_dir(WorkingDir::StableDiffusion),
            Path::new("/b/stable-diffusion")
        );
    }

    #[test]
    fn report_serializes_outcome() {
        let report = JobReport::launch_failed(Uuid::nil(), "boom".into(), Duration::from_secs(1));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "launch_failed");
        assert_eq!(json["errors"][0], "boom");
    }
}
