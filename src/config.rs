use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocess {
    #[default]
    Full,
    Crop,
}

impl Preprocess {
    pub fn as_arg(self) -> &'static str {
        match self {
            Preprocess::Full => "full",
            Preprocess::Crop => "crop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputSize {
    /// Let the animation tool pick its own resolution.
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "512")]
    S512,
    #[serde(rename = "256")]
    S256,
}

impl OutputSize {
    pub fn as_arg(self) -> Option<&'static str> {
        match self {
            OutputSize::Default => None,
            OutputSize::S512 => Some("512"),
            OutputSize::S256 => Some("256"),
        }
    }
}

/// Quality/speed flags handed to the animation tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderProfile {
    pub preprocess: Preprocess,
    pub size: OutputSize,
    pub enhance: bool,
    pub still: bool,
    pub batch_size: Option<u32>,
    pub cpu: bool,
}

impl Default for RenderProfile {
    fn default() -> Self {
        Preset::Original.profile()
    }
}

impl RenderProfile {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.still {
            args.push("--still".to_string());
        }
        args.push("--preprocess".to_string());
        args.push(self.preprocess.as_arg().to_string());
        if let Some(size) = self.size.as_arg() {
            args.push("--size".to_string());
            args.push(size.to_string());
        }
        if self.enhance {
            args.push("--enhancer".to_string());
            args.push("gfpgan".to_string());
        }
        if let Some(batch) = self.batch_size {
            args.push("--batch_size".to_string());
            args.push(batch.to_string());
        }
        if self.cpu {
            args.push("--cpu".to_string());
        }
        args
    }
}

/// Named tuning profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Original,
    High,
    Balanced,
    Fast,
    Ultra,
}

impl Preset {
    pub fn profile(self) -> RenderProfile {
        let (preprocess, size, enhance, still) = match self {
            Preset::Original => (Preprocess::Full, OutputSize::Default, true, true),
            Preset::High => (Preprocess::Full, OutputSize::Default, true, false),
            Preset::Balanced => (Preprocess::Crop, OutputSize::S512, true, true),
            Preset::Fast | Preset::Ultra => (Preprocess::Crop, OutputSize::S256, false, true),
        };
        RenderProfile {
            preprocess,
            size,
            enhance,
            still,
            batch_size: (self == Preset::Ultra).then_some(1),
            cpu: false,
        }
    }

    /// Text cap applied before synthesis, if this preset truncates.
    pub fn max_chars(self) -> Option<usize> {
        match self {
            Preset::Ultra => Some(200),
            _ => None,
        }
    }
}

/// A program plus the leading arguments that precede the per-call ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub root: PathBuf,
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    /// Working directory of the animation tool.
    pub tool_dir: PathBuf,
    /// Fallback source image, relative to `tool_dir`.
    pub default_image: PathBuf,
    pub keep: usize,
    pub workers: usize,
    pub max_chars: Option<usize>,
    pub preset: Preset,
    pub profile: RenderProfile,
    pub synth: ToolCommand,
    pub animate: ToolCommand,
    /// Exact file name the animation tool writes into the run directory.
    /// When unset the run directory is scanned for the newest `.mp4`.
    pub output_name: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

impl PipelineConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            audio_dir: root.join("app").join("audio"),
            video_dir: root.join("app").join("video"),
            tool_dir: root.join("SadTalker"),
            default_image: PathBuf::from("examples/source_image/art_3.png"),
            keep: 3,
            workers: 1,
            max_chars: None,
            preset: Preset::Original,
            profile: Preset::Original.profile(),
            synth: ToolCommand::new("python", &["app/generate_audio_gtts.py"]),
            animate: ToolCommand::new("python", &["inference.py"]),
            output_name: None,
            root,
        }
    }

    pub fn apply_preset(&mut self, preset: Preset) {
        let cpu = self.profile.cpu;
        self.preset = preset;
        self.profile = RenderProfile {
            cpu,
            ..preset.profile()
        };
        if self.max_chars.is_none() {
            self.max_chars = preset.max_chars();
        }
    }

    /// Reads a JSON config. A file naming a `preset` without its own
    /// `profile` gets that preset's flags and text cap.
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let parse_error = |source| SetupError::ConfigParse {
            path: path.to_path_buf(),
            source,
        };
        let data = fs::read_to_string(path).map_err(|source| SetupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let value: serde_json::Value = serde_json::from_str(&data).map_err(parse_error)?;
        let has_profile = value.get("profile").is_some();
        let mut config: Self = serde_json::from_value(value).map_err(parse_error)?;
        if !has_profile {
            config.apply_preset(config.preset);
        }
        Ok(config)
    }

    pub fn default_image_path(&self) -> PathBuf {
        self.tool_dir.join(&self.default_image)
    }
}
