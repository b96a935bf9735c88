use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{PipelineConfig, Preset, ToolCommand};
use crate::error::SetupError;

#[derive(Parser, Debug)]
#[clap(about = "Turn text (and optionally a photo) into a talking avatar video")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Cmd,

    /// JSON pipeline configuration; replaces the path and tool flags below.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Defaults to <root>/app/audio.
    #[clap(long, global = true)]
    pub audio_dir: Option<PathBuf>,

    /// Defaults to <root>/app/video.
    #[clap(long, global = true)]
    pub video_dir: Option<PathBuf>,

    /// Working directory of the animation tool. Defaults to <root>/SadTalker.
    #[clap(long, global = true)]
    pub tool_dir: Option<PathBuf>,

    /// Fallback source image, relative to the tool directory.
    #[clap(long, global = true, default_value = "examples/source_image/art_3.png")]
    pub default_image: PathBuf,

    /// How many recent artifacts to keep in each directory.
    #[clap(long, global = true, default_value_t = 3)]
    pub keep: usize,

    #[clap(long, global = true, value_enum, default_value_t = Preset::Original)]
    pub preset: Preset,

    #[clap(long, global = true, default_value_t = 1)]
    pub workers: usize,

    /// Truncate input text to this many characters before synthesis.
    #[clap(long, global = true)]
    pub max_chars: Option<usize>,

    /// Ask the animation tool to run on the CPU.
    #[clap(long, global = true)]
    pub cpu: bool,

    #[clap(long, global = true, default_value = "python")]
    pub synth_program: String,

    #[clap(
        long = "synth-arg",
        global = true,
        allow_hyphen_values = true,
        default_values_t = vec!["app/generate_audio_gtts.py".to_string()]
    )]
    pub synth_args: Vec<String>,

    #[clap(long, global = true, default_value = "python")]
    pub animate_program: String,

    #[clap(
        long = "animate-arg",
        global = true,
        allow_hyphen_values = true,
        default_values_t = vec!["inference.py".to_string()]
    )]
    pub animate_args: Vec<String>,

    /// Exact video file name the animation tool writes, when it honours one.
    #[clap(long, global = true)]
    pub output_name: Option<String>,

    /// Used when RUST_LOG is not set.
    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run the pipeline once and print the run record as JSON.
    Generate {
        #[clap(long)]
        text: String,

        #[clap(long)]
        image: Option<PathBuf>,
    },
    /// Run one retention pass over the audio and video directories.
    Prune,
    /// Serve the HTTP API.
    Serve {
        #[clap(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

impl Args {
    pub fn pipeline_config(&self) -> Result<PipelineConfig, SetupError> {
        if let Some(path) = &self.config {
            return PipelineConfig::load(path);
        }

        let mut config = PipelineConfig::with_root(&self.root);
        if let Some(dir) = &self.audio_dir {
            config.audio_dir = dir.clone();
        }
        if let Some(dir) = &self.video_dir {
            config.video_dir = dir.clone();
        }
        if let Some(dir) = &self.tool_dir {
            config.tool_dir = dir.clone();
        }
        config.default_image = self.default_image.clone();
        config.keep = self.keep;
        config.workers = self.workers;
        config.max_chars = self.max_chars;
        config.profile.cpu = self.cpu;
        config.apply_preset(self.preset);
        config.synth = ToolCommand {
            program: self.synth_program.clone(),
            args: self.synth_args.clone(),
        };
        config.animate = ToolCommand {
            program: self.animate_program.clone(),
            args: self.animate_args.clone(),
        };
        config.output_name = self.output_name.clone();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_project_layout() {
        let args = Args::parse_from(["talkingavatar", "generate", "--text", "Hi"]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.audio_dir, PathBuf::from("./app/audio"));
        assert_eq!(config.tool_dir, PathBuf::from("./SadTalker"));
        assert_eq!(config.keep, 3);
        assert_eq!(config.synth.args, ["app/generate_audio_gtts.py"]);
        assert!(matches!(args.command, Cmd::Generate { ref text, image: None } if text == "Hi"));
    }

    #[test]
    fn flags_override_layout_and_profile() {
        let args = Args::parse_from([
            "talkingavatar",
            "--root",
            "/srv/avatar",
            "--preset",
            "ultra",
            "--cpu",
            "--keep",
            "0",
            "--animate-arg",
            "run.py",
            "--animate-arg",
            "--verbose",
            "prune",
        ]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.video_dir, PathBuf::from("/srv/avatar/app/video"));
        assert_eq!(config.preset, Preset::Ultra);
        assert_eq!(config.max_chars, Some(200));
        assert!(config.profile.cpu);
        assert_eq!(config.keep, 0);
        assert_eq!(config.animate.args, ["run.py", "--verbose"]);
        assert!(matches!(args.command, Cmd::Prune));
    }
}
