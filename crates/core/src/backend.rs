//! Backend kinds and their command-line grammars.
//!
//! Each backend is an external script with its own fixed flag vocabulary.
//! The grammars here are data the backends depend on: flag names and their
//! order must not change.
//!
//! The output flag (`-o <file>` or `--outdir <dir>`) is deliberately not
//! part of [`BackendCommand`]; the runner appends it at dispatch time once
//! the dated directory and a collision-free file name are known.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::settings::{toggle_word, ClipToggle, Settings};
use crate::types::Seed;

/// Checkpoint directory for VQGAN transformer configs, relative to the
/// backend root.
pub const CHECKPOINT_DIR: &str = "checkpoints";

// ---------------------------------------------------------------------------
// Backend kind
// ---------------------------------------------------------------------------

/// The closed set of generation backends, selected by the `process` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// VQGAN+CLIP (`vqgan.py`).
    #[serde(rename = "vqgan")]
    Vqgan,
    /// CLIP-guided diffusion (`diffusion.py`).
    #[serde(rename = "diffusion")]
    Diffusion,
    /// Stable Diffusion (`scripts/txt2img.py` / `scripts/img2img.py`).
    #[serde(rename = "stablediff")]
    StableDiffusion,
}

/// How a backend is told where to put its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// The caller names the output file.
    File,
    /// The caller names a directory; the backend picks file names.
    Directory,
}

/// Directory the backend process must be started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingDir {
    BackendRoot,
    StableDiffusion,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vqgan => "vqgan",
            Self::Diffusion => "diffusion",
            Self::StableDiffusion => "stablediff",
        }
    }

    /// Parse a `process` value. Returns `None` for unknown backends.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vqgan" => Some(Self::Vqgan),
            "diffusion" => Some(Self::Diffusion),
            "stablediff" => Some(Self::StableDiffusion),
            _ => None,
        }
    }

    /// All valid `process` values.
    pub const ALL: &'static [&'static str] = &["vqgan", "diffusion", "stablediff"];

    pub fn output_mode(&self) -> OutputMode {
        match self {
            Self::Vqgan | Self::Diffusion => OutputMode::File,
            Self::StableDiffusion => OutputMode::Directory,
        }
    }

    pub fn working_dir(&self) -> WorkingDir {
        match self {
            Self::Vqgan | Self::Diffusion => WorkingDir::BackendRoot,
            Self::StableDiffusion => WorkingDir::StableDiffusion,
        }
    }

    /// The flag that precedes the output path or directory.
    pub fn output_flag(&self) -> &'static str {
        match self.output_mode() {
            OutputMode::File => "-o",
            OutputMode::Directory => "--outdir",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// One job's backend invocation, minus the interpreter and output flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendCommand {
    /// Script path handed to the interpreter, relative to the working dir.
    pub script: String,
    /// Arguments following the script, in backend order.
    pub args: Vec<String>,
}

/// The four text fragments a job's prompt is assembled from.
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub prefix: &'a str,
    pub subject: &'a str,
    pub style: &'a str,
    pub suffix: &'a str,
}

#[derive(Debug, Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn push(&mut self, value: impl ToString) -> &mut Self {
        self.0.push(value.to_string());
        self
    }

    fn flag(&mut self, flag: &str, value: impl ToString) -> &mut Self {
        self.push(flag).push(value)
    }
}

fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>, sep: &str) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Assemble the prompt text for `kind`.
///
/// VQGAN and diffusion take `prefix subject suffix | style`; Stable
/// Diffusion weights earlier words more, so the style goes ahead of the
/// suffix: `prefix subject, style, suffix`.
pub fn compose_prompt(kind: BackendKind, parts: PromptParts<'_>) -> String {
    match kind {
        BackendKind::Vqgan | BackendKind::Diffusion => {
            let body = join_non_empty([parts.prefix, parts.subject, parts.suffix], " ");
            format!("{body} | {}", parts.style.trim())
        }
        BackendKind::StableDiffusion => {
            let head = join_non_empty([parts.prefix, parts.subject], " ");
            join_non_empty([head.as_str(), parts.style, parts.suffix], ", ")
        }
    }
}

/// Build the backend invocation for one job under the current settings.
pub fn build_command(settings: &Settings, prompt: &str, seed: Seed) -> BackendCommand {
    match settings.process {
        BackendKind::Vqgan | BackendKind::Diffusion => guided_command(settings, prompt, seed),
        BackendKind::StableDiffusion => stable_diffusion_command(settings, prompt, seed),
    }
}

fn guided_command(settings: &Settings, prompt: &str, seed: Seed) -> BackendCommand {
    let kind = settings.process;
    let mut args = ArgList::default();
    args.push("-s")
        .push(settings.width)
        .push(settings.height)
        .flag("-i", settings.iterations)
        .flag("-cuts", settings.cuts)
        .flag("-p", prompt);

    if kind == BackendKind::Vqgan {
        args.flag("-lr", settings.learning_rate);
        if !settings.transformer.is_empty() {
            let base = format!("{CHECKPOINT_DIR}/{}", settings.transformer);
            args.flag("-conf", format!("{base}.yaml"))
                .flag("-ckpt", format!("{base}.ckpt"));
        }
        if !settings.clip_model.is_empty() {
            args.flag("-m", &settings.clip_model);
        }
        if !settings.optimiser.is_empty() {
            args.flag("-opt", &settings.optimiser);
        }
        args.flag("-cd", format!("cuda:{}", settings.cuda_device));
    } else {
        args.flag("-cd", settings.cuda_device);
        for toggle in ClipToggle::ALL {
            args.flag(toggle.flag(), toggle_word(settings.clip_enabled(toggle)));
        }
    }

    if !settings.input_image.is_empty() {
        args.flag("-ii", &settings.input_image);
        if kind == BackendKind::Diffusion && settings.skip_steps > -1 {
            args.flag("-ss", settings.skip_steps);
        }
    }

    args.flag("-sd", seed);

    BackendCommand {
        script: format!("{}.py", kind.as_str()),
        args: args.0,
    }
}

fn stable_diffusion_command(settings: &Settings, prompt: &str, seed: Seed) -> BackendCommand {
    let img2img = !settings.input_image.is_empty();
    let mut args = ArgList::default();

    let script = if img2img {
        "scripts/img2img.py"
    } else {
        args.flag("--W", settings.width).flag("--H", settings.height);
        "scripts/txt2img.py"
    };

    args.flag("--ddim_steps", settings.steps)
        .flag("--prompt", prompt)
        .flag("--scale", settings.scale)
        .flag("--n_samples", settings.batch_size);

    if img2img {
        args.flag("--init-img", absolute_display(&settings.input_image))
            .flag("--strength", settings.strength);
    }

    args.flag("--seed", seed)
        .push("--skip_grid")
        .flag("--n_iter", settings.samples);

    BackendCommand {
        script: script.to_string(),
        args: args.0,
    }
}

/// Stable Diffusion runs from its own checkout, so relative paths from the
/// prompt file are pinned to the current directory.
fn absolute_display(path: &str) -> String {
    std::path::absolute(Path::new(path))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Render an argv as a single shell-style line for logs and provenance.
///
/// Arguments containing whitespace or quotes are wrapped in double quotes.
pub fn render_command_line<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"');
    if !needs_quotes {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
