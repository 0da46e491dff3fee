//! Directive-driven settings registry.
//!
//! Settings start from compiled-in defaults and are overridden by
//! `!name=value` directives encountered while expanding the subject list.
//! The registry is a plain struct handed to the expander by `&mut`; a fresh
//! one is created for every expansion pass so a reload starts from defaults.

use std::fmt;

use serde::Serialize;

use crate::backend::BackendKind;
use crate::directives::DIRECTIVE_SENTINEL;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_PROCESS: BackendKind = BackendKind::Vqgan;
pub const DEFAULT_CUDA_DEVICE: u32 = 0;
pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_ITERATIONS: u32 = 500;
pub const DEFAULT_CUTS: u32 = 32;
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
pub const DEFAULT_SKIP_STEPS: i32 = -1;
pub const DEFAULT_STEPS: u32 = 50;
pub const DEFAULT_SCALE: f64 = 7.5;
pub const DEFAULT_SAMPLES: u32 = 1;
pub const DEFAULT_BATCH_SIZE: u32 = 1;
pub const DEFAULT_STRENGTH: f64 = 0.75;

/// The VQGAN backend's built-in transformer; naming it explicitly is the
/// same as leaving the setting empty.
pub const DEFAULT_TRANSFORMER_NAME: &str = "vqgan_imagenet_f16_16384";

// ---------------------------------------------------------------------------
// Setting names
// ---------------------------------------------------------------------------

/// Every setting a directive may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingName {
    Process,
    CudaDevice,
    Width,
    Height,
    Iterations,
    LearningRate,
    Cuts,
    InputImage,
    SkipSteps,
    Transformer,
    ClipModel,
    Optimiser,
    Steps,
    Scale,
    Samples,
    BatchSize,
    Strength,
    Toggle(ClipToggle),
}

impl SettingName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::CudaDevice => "cuda_device",
            Self::Width => "width",
            Self::Height => "height",
            Self::Iterations => "iterations",
            Self::LearningRate => "learning_rate",
            Self::Cuts => "cuts",
            Self::InputImage => "input_image",
            Self::SkipSteps => "skip_steps",
            Self::Transformer => "transformer",
            Self::ClipModel => "clip_model",
            Self::Optimiser => "optimiser",
            Self::Steps => "steps",
            Self::Scale => "scale",
            Self::Samples => "samples",
            Self::BatchSize => "batch_size",
            Self::Strength => "strength",
            Self::Toggle(t) => t.setting_name(),
        }
    }

    /// Parse a (lowercased) directive name. Returns `None` for unknown names.
    pub fn from_str(s: &str) -> Option<Self> {
        let name = match s {
            "process" => Self::Process,
            "cuda_device" => Self::CudaDevice,
            "width" => Self::Width,
            "height" => Self::Height,
            "iterations" => Self::Iterations,
            "learning_rate" => Self::LearningRate,
            "cuts" => Self::Cuts,
            "input_image" => Self::InputImage,
            "skip_steps" => Self::SkipSteps,
            "transformer" => Self::Transformer,
            "clip_model" => Self::ClipModel,
            "optimiser" => Self::Optimiser,
            "steps" => Self::Steps,
            "scale" => Self::Scale,
            "samples" => Self::Samples,
            "batch_size" => Self::BatchSize,
            "strength" => Self::Strength,
            other => return ClipToggle::from_setting_name(other).map(Self::Toggle),
        };
        Some(name)
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CLIP model toggles understood by the guided-diffusion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipToggle {
    VitB32,
    VitB16,
    VitL14,
    Rn101,
    Rn50,
    Rn50x4,
    Rn50x16,
    Rn50x64,
}

impl ClipToggle {
    /// All toggles, in the order the diffusion backend expects their flags.
    pub const ALL: [ClipToggle; 8] = [
        Self::VitB32,
        Self::VitB16,
        Self::VitL14,
        Self::Rn101,
        Self::Rn50,
        Self::Rn50x4,
        Self::Rn50x16,
        Self::Rn50x64,
    ];

    /// Directive name, e.g. `d_vitb32`.
    pub fn setting_name(&self) -> &'static str {
        match self {
            Self::VitB32 => "d_vitb32",
            Self::VitB16 => "d_vitb16",
            Self::VitL14 => "d_vitl14",
            Self::Rn101 => "d_rn101",
            Self::Rn50 => "d_rn50",
            Self::Rn50x4 => "d_rn50x4",
            Self::Rn50x16 => "d_rn50x16",
            Self::Rn50x64 => "d_rn50x64",
        }
    }

    /// Backend flag, e.g. `-dvitb32`.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::VitB32 => "-dvitb32",
            Self::VitB16 => "-dvitb16",
            Self::VitL14 => "-dvitl14",
            Self::Rn101 => "-drn101",
            Self::Rn50 => "-drn50",
            Self::Rn50x4 => "-drn50x4",
            Self::Rn50x16 => "-drn50x16",
            Self::Rn50x64 => "-drn50x64",
        }
    }

    pub fn from_setting_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.setting_name() == s)
    }

    /// Whether the model is loaded unless a directive says otherwise.
    pub fn default_enabled(&self) -> bool {
        matches!(self, Self::VitB32 | Self::VitB16 | Self::Rn50)
    }

    fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A directive that could not be applied. Always recoverable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingError {
    #[error("prompt file command not recognized: {0}")]
    Unknown(String),

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("malformed directive '{0}' (expected !name=value)")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Current values of every recognised setting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub process: BackendKind,
    pub cuda_device: u32,
    pub width: u32,
    pub height: u32,
    pub iterations: u32,
    pub learning_rate: f64,
    pub cuts: u32,
    /// Init image path; empty means none.
    pub input_image: String,
    pub skip_steps: i32,
    /// Transformer checkpoint name; empty means the backend default.
    pub transformer: String,
    pub clip_model: String,
    pub optimiser: String,
    pub steps: u32,
    pub scale: f64,
    pub samples: u32,
    pub batch_size: u32,
    pub strength: f64,
    clip_toggles: [bool; 8],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            process: DEFAULT_PROCESS,
            cuda_device: DEFAULT_CUDA_DEVICE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            iterations: DEFAULT_ITERATIONS,
            learning_rate: DEFAULT_LEARNING_RATE,
            cuts: DEFAULT_CUTS,
            input_image: String::new(),
            skip_steps: DEFAULT_SKIP_STEPS,
            transformer: String::new(),
            clip_model: String::new(),
            optimiser: String::new(),
            steps: DEFAULT_STEPS,
            scale: DEFAULT_SCALE,
            samples: DEFAULT_SAMPLES,
            batch_size: DEFAULT_BATCH_SIZE,
            strength: DEFAULT_STRENGTH,
            clip_toggles: ClipToggle::ALL.map(|t| t.default_enabled()),
        }
    }
}

impl Settings {
    pub fn clip_enabled(&self, toggle: ClipToggle) -> bool {
        self.clip_toggles[toggle.index()]
    }

    pub fn set_clip(&mut self, toggle: ClipToggle, enabled: bool) {
        self.clip_toggles[toggle.index()] = enabled;
    }

    /// Apply a `!name=value` directive line.
    ///
    /// The name is trimmed and lowercased; the value is everything after the
    /// first `=`, trimmed.
    pub fn apply_directive(&mut self, line: &str) -> Result<SettingName, SettingError> {
        let body = line.strip_prefix(DIRECTIVE_SENTINEL).unwrap_or(line);
        let Some((name, value)) = body.split_once('=') else {
            return Err(SettingError::Malformed(line.to_string()));
        };
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Err(SettingError::Malformed(line.to_string()));
        }
        self.apply(&name, value.trim())
    }

    /// Apply one named override. An empty `raw` value restores the default.
    ///
    /// On error the previous value is left untouched.
    pub fn apply(&mut self, name: &str, raw: &str) -> Result<SettingName, SettingError> {
        let setting =
            SettingName::from_str(name).ok_or_else(|| SettingError::Unknown(name.to_string()))?;
        let defaults = Settings::default();
        let reset = raw.is_empty();

        match setting {
            SettingName::Process => {
                self.process = if reset {
                    defaults.process
                } else {
                    BackendKind::from_str(&raw.to_lowercase()).ok_or_else(|| {
                        let expected = BackendKind::ALL.join(", ");
                        invalid(setting, raw, format!("expected one of: {expected}"))
                    })?
                };
            }
            SettingName::CudaDevice => {
                self.cuda_device = coerce(setting, raw, defaults.cuda_device)?;
            }
            SettingName::Width => self.width = coerce(setting, raw, defaults.width)?,
            SettingName::Height => self.height = coerce(setting, raw, defaults.height)?,
            SettingName::Iterations => {
                self.iterations = coerce(setting, raw, defaults.iterations)?;
            }
            SettingName::LearningRate => {
                self.learning_rate = coerce(setting, raw, defaults.learning_rate)?;
            }
            SettingName::Cuts => self.cuts = coerce(setting, raw, defaults.cuts)?,
            SettingName::InputImage => self.input_image = raw.to_string(),
            SettingName::SkipSteps => {
                self.skip_steps = coerce(setting, raw, defaults.skip_steps)?;
            }
            SettingName::Transformer => {
                self.transformer = if raw == DEFAULT_TRANSFORMER_NAME {
                    String::new()
                } else {
                    raw.to_string()
                };
            }
            SettingName::ClipModel => self.clip_model = raw.to_string(),
            SettingName::Optimiser => self.optimiser = raw.to_string(),
            SettingName::Steps => self.steps = coerce(setting, raw, defaults.steps)?,
            SettingName::Scale => self.scale = coerce(setting, raw, defaults.scale)?,
            SettingName::Samples => self.samples = coerce(setting, raw, defaults.samples)?,
            SettingName::BatchSize => {
                self.batch_size = coerce(setting, raw, defaults.batch_size)?;
            }
            SettingName::Strength => self.strength = coerce(setting, raw, defaults.strength)?,
            SettingName::Toggle(toggle) => {
                let enabled = if reset {
                    toggle.default_enabled()
                } else {
                    parse_toggle(raw).ok_or_else(|| invalid(setting, raw, "expected yes or no"))?
                };
                self.set_clip(toggle, enabled);
            }
        }

        Ok(setting)
    }
}

fn invalid(setting: SettingName, raw: &str, reason: impl Into<String>) -> SettingError {
    SettingError::InvalidValue {
        name: setting.as_str(),
        value: raw.to_string(),
        reason: reason.into(),
    }
}

/// Parse `raw` as `T`, or return `default` when `raw` is empty.
fn coerce<T>(setting: SettingName, raw: &str, default: T) -> Result<T, SettingError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    if raw.is_empty() {
        return Ok(default);
    }
    raw.parse::<T>().map_err(|e| invalid(setting, raw, e.to_string()))
}

fn parse_toggle(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "yes" | "y" | "true" | "on" | "1" => Some(true),
        "no" | "n" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Render a toggle the way the diffusion backend reads it.
pub fn toggle_word(enabled: bool) -> &'static str {
    if enabled {
        "yes"
    } else {
        "no"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
