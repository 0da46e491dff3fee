use std::path::{Path, PathBuf};

use artgen_pipeline::finalize::DEFAULT_JPEG_QUALITY;
use artgen_pipeline::runner::RunnerConfig;

/// Invalid worker configuration. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot resolve {var}: {source}")]
    Path {
        var: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to the backend
/// checkouts.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the dated output directories. Absolute.
    pub output_root: PathBuf,
    /// Directory holding `vqgan.py` / `diffusion.py`. Absolute.
    pub backend_root: PathBuf,
    /// Stable Diffusion checkout. Absolute.
    pub stable_diffusion_dir: PathBuf,
    /// Interpreter used to run backend scripts.
    pub python: String,
    /// Directories prepended to `PYTHONPATH`. Absolute.
    pub pythonpath_dirs: Vec<PathBuf>,
    pub jpeg_quality: u8,
    /// Fixed device name for provenance; probed when `None`.
    pub device_name: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                       | Default                                     |
    /// |-------------------------------|---------------------------------------------|
    /// | `ARTGEN_OUTPUT_ROOT`          | `output`                                    |
    /// | `ARTGEN_BACKEND_ROOT`         | `.`                                         |
    /// | `ARTGEN_STABLE_DIFFUSION_DIR` | `stable-diffusion` (under the backend root) |
    /// | `ARTGEN_PYTHON`               | `python`                                    |
    /// | `ARTGEN_PYTHONPATH_DIRS`      | `latent-diffusion,taming-transformers,CLIP` |
    /// | `ARTGEN_JPEG_QUALITY`         | `88`                                        |
    /// | `ARTGEN_DEVICE_NAME`          | probed from the GPU                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// or `None` when unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str, default: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let output_root = absolute(
            "ARTGEN_OUTPUT_ROOT",
            Path::new(&get("ARTGEN_OUTPUT_ROOT", "output")),
        )?;
        let backend_root = absolute(
            "ARTGEN_BACKEND_ROOT",
            Path::new(&get("ARTGEN_BACKEND_ROOT", ".")),
        )?;
        let stable_diffusion_dir =
            backend_root.join(get("ARTGEN_STABLE_DIFFUSION_DIR", "stable-diffusion"));

        let python = get("ARTGEN_PYTHON", "python");

        let pythonpath_dirs: Vec<PathBuf> = get(
            "ARTGEN_PYTHONPATH_DIRS",
            "latent-diffusion,taming-transformers,CLIP",
        )
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| backend_root.join(s))
        .collect();

        let quality_raw = get("ARTGEN_JPEG_QUALITY", &DEFAULT_JPEG_QUALITY.to_string());
        let jpeg_quality = match quality_raw.parse::<u8>() {
            Ok(q) if (1..=100).contains(&q) => q,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "ARTGEN_JPEG_QUALITY",
                    value: quality_raw,
                    reason: "expected an integer from 1 to 100".into(),
                })
            }
        };

        let device_name = lookup("ARTGEN_DEVICE_NAME").filter(|v| !v.trim().is_empty());

        Ok(Self {
            output_root,
            backend_root,
            stable_diffusion_dir,
            python,
            pythonpath_dirs,
            jpeg_quality,
            device_name,
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            output_root: self.output_root.clone(),
            backend_root: self.backend_root.clone(),
            stable_diffusion_dir: self.stable_diffusion_dir.clone(),
            python: self.python.clone(),
            pythonpath_dirs: self.pythonpath_dirs.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

/// Backends run from other working directories, so every configured path
/// is pinned to the directory the worker was started in.
fn absolute(var: &'static str, path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::Path { var, source })
}
