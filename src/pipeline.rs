use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Local;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::animate::Animator;
use crate::cleanup::Cleaner;
use crate::config::{PipelineConfig, Preset};
use crate::error::{PipelineError, SetupError};
use crate::progress::{Progress, ProgressHub};
use crate::tts::Synthesizer;
use crate::worker::WorkerPool;

/// `YYYY_MM_DD_HH.MM.SS_xxxxxxxx`: local time plus 8 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let stamp = Local::now().format("%Y_%m_%d_%H.%M.%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        RunId(format!("{}_{}", stamp, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AudioInFlight,
    AudioDone,
    AudioFailed,
    VideoInFlight,
    VideoDone,
    VideoFailed,
    Completed,
    Failed,
}

/// Outcome of one run. Not persisted anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub text: String,
    pub image_path: Option<PathBuf>,
    pub source_image: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub elapsed_audio: f64,
    pub elapsed_video: f64,
    pub elapsed_total: f64,
    pub success: bool,
    pub error: Option<String>,
    pub preset: Preset,
    pub state: RunState,
}

/// Artifacts of in-flight runs, kept away from cleanup passes.
#[derive(Debug, Default)]
struct ActiveArtifacts(Mutex<HashSet<PathBuf>>);

impl ActiveArtifacts {
    fn snapshot(&self) -> Vec<PathBuf> {
        match self.0.lock() {
            Ok(set) => set.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashSet<PathBuf>) -> R) -> R {
        match self.0.lock() {
            Ok(mut set) => f(&mut set),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Unregisters a run's artifacts when the run ends, however it ends.
struct ActiveGuard<'a> {
    active: &'a ActiveArtifacts,
    paths: Vec<PathBuf>,
}

impl<'a> ActiveGuard<'a> {
    fn register(active: &'a ActiveArtifacts, paths: Vec<PathBuf>) -> Self {
        active.with(|set| set.extend(paths.iter().cloned()));
        Self { active, paths }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.with(|set| {
            for path in &self.paths {
                set.remove(path);
            }
        });
    }
}

/// Two-step text-to-video orchestrator.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    pool: WorkerPool,
    synth: Synthesizer,
    animator: Animator,
    cleaner: Cleaner,
    progress: ProgressHub,
    active: Arc<ActiveArtifacts>,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn create_dir(path: &Path) -> Result<(), SetupError> {
    fs::create_dir_all(path).map_err(|source| SetupError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

impl Pipeline {
    /// Validates the environment, creates the artifact directories and
    /// clears stale artifacts left by earlier runs.
    pub fn new(config: PipelineConfig) -> Result<Self, SetupError> {
        info!("Initializing avatar pipeline (preset {:?})", config.preset);
        let mut config = config;
        config.root = absolute(&config.root);
        config.audio_dir = absolute(&config.audio_dir);
        config.video_dir = absolute(&config.video_dir);
        config.tool_dir = absolute(&config.tool_dir);

        if !config.tool_dir.is_dir() {
            error!("Animation tool directory not found: {}", config.tool_dir.display());
            return Err(SetupError::ToolDirMissing(config.tool_dir));
        }
        create_dir(&config.audio_dir)?;
        create_dir(&config.video_dir)?;

        let pool = WorkerPool::new(config.workers);
        let synth = Synthesizer {
            tool: config.synth.clone(),
            root: config.root.clone(),
            audio_dir: config.audio_dir.clone(),
            max_chars: config.max_chars,
        };
        let animator = Animator {
            tool: config.animate.clone(),
            tool_dir: config.tool_dir.clone(),
            default_image: config.default_image_path(),
            profile: config.profile.clone(),
            output_name: config.output_name.clone(),
        };
        let cleaner = Cleaner::new(&config.audio_dir, &config.video_dir, config.keep);
        cleaner.prune_all();

        info!(
            "Pipeline ready: audio {}, video {}, {} worker(s)",
            config.audio_dir.display(),
            config.video_dir.display(),
            pool.size()
        );
        Ok(Self {
            config,
            pool,
            synth,
            animator,
            cleaner,
            progress: ProgressHub::default(),
            active: Arc::new(ActiveArtifacts::default()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Number of connected progress listeners.
    pub fn listeners(&self) -> usize {
        self.progress.listeners()
    }

    /// Directory the animation tool writes into for `run_id`.
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.config.video_dir.join(run_id.as_str())
    }

    pub async fn run_audio_step(
        &self,
        text: &str,
        run_id: &RunId,
    ) -> Result<PathBuf, PipelineError> {
        create_dir(&self.config.audio_dir)?;
        self.synth.synthesize(&self.pool, text, run_id.as_str()).await
    }

    /// Returns the discovered video and the source image actually used.
    pub async fn run_video_step(
        &self,
        audio: &Path,
        image: Option<&Path>,
        run_id: &RunId,
    ) -> Result<(PathBuf, PathBuf), PipelineError> {
        let result_dir = self.run_dir(run_id);
        create_dir(&result_dir)?;
        self.animator
            .animate(&self.pool, audio, image, &result_dir)
            .await
    }

    /// Audio step, then video step. Never returns an error: failures are
    /// folded into the record.
    pub async fn run(&self, text: &str, image: Option<&Path>) -> RunRecord {
        let run_id = RunId::generate();
        let started = Instant::now();
        let _guard = ActiveGuard::register(
            &self.active,
            vec![self.synth.output_path(run_id.as_str()), self.run_dir(&run_id)],
        );

        let mut record = RunRecord {
            run_id: run_id.to_string(),
            started_at: Local::now().to_rfc3339(),
            text: text.to_string(),
            image_path: image.map(Path::to_path_buf),
            source_image: None,
            audio_path: None,
            video_path: None,
            elapsed_audio: 0.0,
            elapsed_video: 0.0,
            elapsed_total: 0.0,
            success: false,
            error: None,
            preset: self.config.preset,
            state: RunState::Idle,
        };
        info!("Starting run {} for text: {:.50}", run_id, text);

        self.transition(&mut record, RunState::AudioInFlight);
        self.progress.send("Starting audio generation...");
        let step_started = Instant::now();
        let audio = self.run_audio_step(text, &run_id).await;
        record.elapsed_audio = step_started.elapsed().as_secs_f64();
        let audio = match audio {
            Ok(path) => {
                self.transition(&mut record, RunState::AudioDone);
                info!("Audio step took {:.2}s", record.elapsed_audio);
                record.audio_path = Some(path.clone());
                path
            }
            Err(e) => {
                self.transition(&mut record, RunState::AudioFailed);
                return self.fail(record, started, e);
            }
        };

        self.transition(&mut record, RunState::VideoInFlight);
        self.progress.send("Audio generated! Starting video generation...");
        let step_started = Instant::now();
        let video = self.run_video_step(&audio, image, &run_id).await;
        record.elapsed_video = step_started.elapsed().as_secs_f64();
        match video {
            Ok((video, source_image)) => {
                self.transition(&mut record, RunState::VideoDone);
                info!("Video step took {:.2}s", record.elapsed_video);
                record.video_path = Some(video);
                record.source_image = Some(source_image);
            }
            Err(e) => {
                self.transition(&mut record, RunState::VideoFailed);
                return self.fail(record, started, e);
            }
        }

        record.elapsed_total = started.elapsed().as_secs_f64();
        record.success = true;
        self.transition(&mut record, RunState::Completed);
        self.progress.send("Video generation complete!");
        info!("Run {} completed in {:.3}s", run_id, record.elapsed_total);

        // This run's artifacts are still registered as active, so they are
        // spared and count as one of the `keep` slots. With keep = 0 they
        // stay on disk anyway; in-flight artifacts are never counted.
        let cleaner = Cleaner {
            keep: self.cleaner.keep.saturating_sub(1),
            ..self.cleaner.clone()
        };
        cleaner.prune_all_except(&self.active.snapshot());
        record
    }

    fn transition(&self, record: &mut RunRecord, next: RunState) {
        debug!("Run {}: {:?} -> {:?}", record.run_id, record.state, next);
        record.state = next;
    }

    /// Failed runs skip the post-run cleanup so their artifacts stay around
    /// for inspection.
    fn fail(&self, mut record: RunRecord, started: Instant, err: PipelineError) -> RunRecord {
        record.elapsed_total = started.elapsed().as_secs_f64();
        record.success = false;
        record.error = Some(err.to_string());
        self.transition(&mut record, RunState::Failed);
        error!("Run {} failed after {:.3}s: {}", record.run_id, record.elapsed_total, err);
        self.progress.send(format!("Generation failed: {}", err));
        record
    }
}
