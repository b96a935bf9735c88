use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::audio::wav_duration_seconds;
use crate::cleanup::has_extension;
use crate::config::ToolCommand;
use crate::error::{PipelineError, Step, StepError};
use crate::worker::{Invocation, WorkerPool};

/// Synthesis step: text in, audio artifact out.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    pub tool: ToolCommand,
    /// Working directory for the tool.
    pub root: PathBuf,
    pub audio_dir: PathBuf,
    pub max_chars: Option<usize>,
}

/// Cuts `text` to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl Synthesizer {
    pub fn output_path(&self, run_id: &str) -> PathBuf {
        self.audio_dir.join(format!("audio_{}.wav", run_id))
    }

    pub async fn synthesize(
        &self,
        pool: &WorkerPool,
        text: &str,
        run_id: &str,
    ) -> Result<PathBuf, PipelineError> {
        let text = match self.max_chars {
            Some(max) => {
                let cut = truncate_chars(text, max);
                if cut.len() < text.len() {
                    info!("Truncating text from {} to {} chars", text.chars().count(), max);
                }
                cut
            }
            None => text,
        };
        let out_path = self.output_path(run_id);
        info!("Generating audio for {} chars into {}", text.chars().count(), out_path.display());

        let invocation = Invocation::from_tool(&self.tool)
            .arg("--text")
            .arg(text)
            .arg("--output")
            .arg(&out_path)
            .current_dir(&self.root);

        let output = pool.run(Step::Audio, invocation).await?;
        if let Err(e) = output.check(Step::Audio) {
            discard_partial(&out_path);
            return Err(e.into());
        }

        let size = fs::metadata(&out_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            discard_partial(&out_path);
            return Err(StepError::missing_output(
                Step::Audio,
                format!(
                    "audio file not created at {}\n{}",
                    out_path.display(),
                    output.stderr
                ),
            )
            .into());
        }

        info!("Audio generated: {} ({} bytes)", out_path.display(), size);
        log_duration(&out_path);
        Ok(out_path)
    }
}

fn log_duration(path: &Path) {
    if !has_extension(path, &["wav"]) {
        return;
    }
    match wav_duration_seconds(path) {
        Ok(secs) => info!("Audio duration: {:.2} seconds", secs),
        Err(e) => warn!("Could not read WAV header of {}: {}", path.display(), e),
    }
}

fn discard_partial(path: &Path) {
    if fs::remove_file(path).is_ok() {
        debug!("Removed partial audio file {}", path.display());
    }
}
