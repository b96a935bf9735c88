use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Which external step produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Audio,
    Video,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Audio => write!(f, "audio generation"),
            Step::Video => write!(f, "video generation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepErrorKind {
    /// The tool could not be started at all.
    Spawn,
    /// The tool exited non-zero (or was killed by a signal, `code == None`).
    Invocation { code: Option<i32> },
    /// The tool exited zero but left no usable artifact behind.
    MissingOutput,
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepErrorKind::Spawn => write!(f, "tool could not be started"),
            StepErrorKind::Invocation { code: Some(code) } => {
                write!(f, "tool exited with status {}", code)
            }
            StepErrorKind::Invocation { code: None } => write!(f, "tool terminated by signal"),
            StepErrorKind::MissingOutput => write!(f, "tool produced no output file"),
        }
    }
}

/// Failure of one external step. Never retried.
#[derive(Debug, Error)]
#[error("{step} failed: {kind}{}", diagnostics_suffix(.diagnostics))]
pub struct StepError {
    pub step: Step,
    pub kind: StepErrorKind,
    /// Captured stderr of the tool, or a description of what was missing.
    pub diagnostics: String,
}

fn diagnostics_suffix(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl StepError {
    pub fn new(step: Step, kind: StepErrorKind, diagnostics: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn missing_output(step: Step, diagnostics: impl Into<String>) -> Self {
        Self::new(step, StepErrorKind::MissingOutput, diagnostics)
    }
}

/// Environment problems found before any tool is invoked.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("animation tool directory not found: {0}")]
    ToolDirMissing(PathBuf),

    #[error("could not create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("worker pool closed")]
    PoolClosed,
}
