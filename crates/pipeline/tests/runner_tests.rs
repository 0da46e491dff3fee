//! Integration tests for the job runner.
//!
//! Backends are stood in for by small `sh` scripts that copy a fixture PNG
//! to wherever the output flag points, so the full path through collision
//! resolution, process launch and finalization is exercised.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use artgen_core::backend::{BackendCommand, BackendKind};
use artgen_core::job::{JobDescriptor, OutputTarget};
use artgen_pipeline::device::DeviceProbe;
use artgen_pipeline::runner::{JobOutcome, JobRunner, RunnerConfig};
use assert_matches::assert_matches;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Parse `-o`/`--outdir` from the arguments into `$out`.
const ARG_LOOP: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o|--outdir) out="$2"; shift ;;
  esac
  shift
done
"#;

struct Harness {
    _root: TempDir,
    fixture: PathBuf,
    backend_root: PathBuf,
    output_root: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let backend_root = root.path().join("backend");
        let output_root = root.path().join("output");
        std::fs::create_dir_all(backend_root.join("stable-diffusion")).unwrap();

        let fixture = root.path().join("fixture.png");
        image::RgbImage::from_pixel(4, 4, image::Rgb([10, 120, 200]))
            .save(&fixture)
            .unwrap();

        Self {
            _root: root,
            fixture,
            backend_root,
            output_root,
        }
    }

    /// Write a backend script under the working dir for `kind`.
    fn script(&self, kind: BackendKind, name: &str, body: &str) -> String {
        let dir = match kind {
            BackendKind::StableDiffusion => self.backend_root.join("stable-diffusion"),
            _ => self.backend_root.clone(),
        };
        let body = body.replace("FIXTURE", &self.fixture.to_string_lossy());
        std::fs::write(dir.join(name), format!("{ARG_LOOP}\n{body}\n")).unwrap();
        name.to_string()
    }

    fn runner(&self) -> JobRunner {
        self.runner_with_python("sh")
    }

    fn runner_with_python(&self, python: &str) -> JobRunner {
        let config = RunnerConfig {
            output_root: self.output_root.clone(),
            backend_root: self.backend_root.clone(),
            stable_diffusion_dir: self.backend_root.join("stable-diffusion"),
            python: python.to_string(),
            pythonpath_dirs: vec![self.backend_root.join("CLIP")],
            jpeg_quality: 88,
        };
        JobRunner::new(config, Arc::new(DeviceProbe::fixed("Test GPU")))
    }

    /// The single dated directory created under the output root.
    fn dated_dir(&self) -> PathBuf {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.output_root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(dirs.len(), 1, "expected one dated directory: {dirs:?}");
        dirs.remove(0)
    }
}

fn file_job(script: String, stem: &str) -> JobDescriptor {
    JobDescriptor::new(
        BackendKind::Vqgan,
        BackendCommand {
            script,
            args: vec!["-p".into(), "a cat | in oil paint".into(), "-sd".into(), "42".into()],
        },
        "a cat | in oil paint".into(),
        OutputTarget::File {
            dir_label: "animals".into(),
            stem: stem.into(),
        },
        42,
        0,
    )
}

fn directory_job(script: String) -> JobDescriptor {
    JobDescriptor::new(
        BackendKind::StableDiffusion,
        BackendCommand {
            script,
            args: vec!["--prompt".into(), "a cat, oil".into(), "--seed".into(), "7".into()],
        },
        "a cat, oil".into(),
        OutputTarget::Directory {
            dir_label: "animals".into(),
        },
        7,
        0,
    )
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// File-output backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_job_is_finalized_to_tagged_jpeg() {
    let h = Harness::new();
    let script = h.script(BackendKind::Vqgan, "vqgan.sh", r#"cp "FIXTURE" "$out""#);

    let report = h.runner().run(&file_job(script, "a-cat-in-oil-paint")).await;

    assert_eq!(report.outcome, JobOutcome::Produced);
    assert_eq!(report.exit_code, Some(0));
    assert!(report.errors.is_empty());

    let dir = h.dated_dir();
    assert!(dir.file_name().unwrap().to_string_lossy().ends_with("-animals"));
    assert_eq!(names_in(&dir), vec!["a-cat-in-oil-paint.jpg"]);
    assert_eq!(report.artifacts, vec![dir.join("a-cat-in-oil-paint.jpg")]);

    let bytes = std::fs::read(&report.artifacts[0]).unwrap();
    assert!(bytes.windows(6).any(|w| w == b"Exif\0\0"));
    // XPAuthor is UTF-16LE.
    let author: Vec<u8> = "Test GPU".encode_utf16().flat_map(u16::to_le_bytes).collect();
    assert!(bytes.windows(author.len()).any(|w| w == author.as_slice()));
    let software = b"AI Art (generated in ";
    assert!(bytes.windows(software.len()).any(|w| w == software));
}

#[tokio::test]
async fn repeated_stem_gets_numeric_suffix() {
    let h = Harness::new();
    let script = h.script(BackendKind::Vqgan, "vqgan.sh", r#"cp "FIXTURE" "$out""#);
    let runner = h.runner();

    let first = runner.run(&file_job(script.clone(), "a-cat")).await;
    let original = std::fs::read(&first.artifacts[0]).unwrap();
    let second = runner.run(&file_job(script.clone(), "a-cat")).await;
    let third = runner.run(&file_job(script, "a-cat")).await;

    let dir = h.dated_dir();
    assert_eq!(second.artifacts, vec![dir.join("a-cat-2.jpg")]);
    assert_eq!(third.artifacts, vec![dir.join("a-cat-3.jpg")]);
    assert_eq!(std::fs::read(dir.join("a-cat.jpg")).unwrap(), original);
}

#[tokio::test]
async fn missing_output_is_reported_not_fatal() {
    let h = Harness::new();
    let script = h.script(BackendKind::Vqgan, "broken.sh", "exit 1");

    let report = h.runner().run(&file_job(script, "a-cat")).await;

    assert_eq!(report.outcome, JobOutcome::NoOutput);
    assert_eq!(report.exit_code, Some(1));
    assert!(report.artifacts.is_empty());
    assert!(names_in(&h.dated_dir()).is_empty());
}

#[tokio::test]
async fn non_zero_exit_with_output_is_still_finalized() {
    let h = Harness::new();
    let script = h.script(BackendKind::Vqgan, "flaky.sh", "cp \"FIXTURE\" \"$out\"\nexit 2");

    let report = h.runner().run(&file_job(script, "a-cat")).await;

    assert_eq!(report.exit_code, Some(2));
    assert_eq!(report.outcome, JobOutcome::Produced);
}

#[tokio::test]
async fn corrupt_output_keeps_intermediate() {
    let h = Harness::new();
    let script = h.script(BackendKind::Vqgan, "garbage.sh", r#"printf 'garbage' > "$out""#);

    let report = h.runner().run(&file_job(script, "a-cat")).await;

    assert_eq!(report.outcome, JobOutcome::NoOutput);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(names_in(&h.dated_dir()), vec!["a-cat.png"]);
}

#[tokio::test]
async fn missing_interpreter_is_a_launch_failure() {
    let h = Harness::new();
    let script = h.script(BackendKind::Vqgan, "vqgan.sh", "true");

    let report = h
        .runner_with_python("artgen-no-such-interpreter")
        .run(&file_job(script, "a-cat"))
        .await;

    assert_eq!(report.outcome, JobOutcome::LaunchFailed);
    assert_eq!(report.exit_code, None);
    assert_matches!(report.errors.as_slice(), [msg] if msg.contains("artgen-no-such-interpreter"));
}

#[tokio::test]
async fn backend_sees_pythonpath() {
    let h = Harness::new();
    let script = h.script(
        BackendKind::Vqgan,
        "env.sh",
        r#"printf '%s' "$PYTHONPATH" > pythonpath.txt; cp "FIXTURE" "$out""#,
    );

    h.runner().run(&file_job(script, "a-cat")).await;

    let seen = std::fs::read_to_string(h.backend_root.join("pythonpath.txt")).unwrap();
    let first = seen.split(':').next().unwrap();
    assert_eq!(Path::new(first), h.backend_root.join("CLIP"));
}

// ---------------------------------------------------------------------------
// Directory-output backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn directory_job_finalizes_every_sample() {
    let h = Harness::new();
    let script = h.script(
        BackendKind::StableDiffusion,
        "txt2img.sh",
        r#"mkdir -p "$out/samples"
cp "FIXTURE" "$out/samples/00000.png"
cp "FIXTURE" "$out/samples/00001.png""#,
    );

    let report = h.runner().run(&directory_job(script)).await;

    assert_eq!(report.outcome, JobOutcome::Produced);
    assert_eq!(report.artifacts.len(), 2);

    let dir = h.dated_dir();
    let names = names_in(&dir);
    assert_eq!(names.len(), 2, "samples dir should be gone: {names:?}");
    assert!(names[0].ends_with("-0.jpg"));
    assert!(names[1].ends_with("-1.jpg"));
    // YYYYMM-DDHH-MMSS-n.jpg
    assert_eq!(names[0].len(), "202403-0114-0503-0.jpg".len());
}

#[tokio::test]
async fn directory_job_without_samples_reports_no_output() {
    let h = Harness::new();
    let script = h.script(BackendKind::StableDiffusion, "txt2img.sh", "true");

    let report = h.runner().run(&directory_job(script)).await;

    assert_eq!(report.outcome, JobOutcome::NoOutput);
    assert_eq!(report.exit_code, Some(0));
}

#[tokio::test]
async fn directory_job_leaves_earlier_samples_alone() {
    let h = Harness::new();
    let garbage = h.script(
        BackendKind::StableDiffusion,
        "garbage.sh",
        r#"mkdir -p "$out/samples"
printf 'garbage' > "$out/samples/00000.png""#,
    );
    let good = h.script(
        BackendKind::StableDiffusion,
        "txt2img.sh",
        r#"mkdir -p "$out/samples"
cp "FIXTURE" "$out/samples/00001.png""#,
    );
    let idle = h.script(BackendKind::StableDiffusion, "idle.sh", "true");
    let runner = h.runner();

    let first = runner.run(&directory_job(garbage)).await;
    assert_eq!(first.outcome, JobOutcome::NoOutput);
    assert_eq!(first.errors.len(), 1);

    let second = runner.run(&directory_job(good)).await;
    assert_eq!(second.outcome, JobOutcome::Produced);
    assert_eq!(second.artifacts.len(), 1);
    assert!(second.errors.is_empty(), "{:?}", second.errors);

    let third = runner.run(&directory_job(idle)).await;
    assert_eq!(third.outcome, JobOutcome::NoOutput);
    assert!(third.errors.is_empty(), "{:?}", third.errors);

    let stale = h.dated_dir().join("samples").join("00000.png");
    assert_eq!(std::fs::read(stale).unwrap(), b"garbage");
}
