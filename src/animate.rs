use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::cleanup::{VIDEO_EXTENSION, has_extension};
use crate::config::{RenderProfile, ToolCommand};
use crate::error::{PipelineError, Step, StepError};
use crate::worker::{Invocation, WorkerPool};

/// Animation step: audio plus source image in, video out.
#[derive(Debug, Clone)]
pub struct Animator {
    pub tool: ToolCommand,
    /// The tool's own working directory.
    pub tool_dir: PathBuf,
    pub default_image: PathBuf,
    pub profile: RenderProfile,
    pub output_name: Option<String>,
}

/// Uses `image` when given and present on disk, otherwise the default.
/// A relative `image` is resolved against the caller's working directory,
/// since the tool runs from its own.
pub fn resolve_image(image: Option<&Path>, default_image: &Path) -> PathBuf {
    let image = image.map(|path| std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()));
    match image {
        Some(path) if path.exists() => {
            info!("Using custom image: {}", path.display());
            path
        }
        Some(path) => {
            info!("Image {} not found; using default image", path.display());
            default_image.to_path_buf()
        }
        None => {
            info!("Using default image");
            default_image.to_path_buf()
        }
    }
}

/// Newest `.mp4` anywhere under `dir`; equal timestamps resolve to the
/// lexically smaller path.
pub fn find_newest_video(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for item in fs::read_dir(&current)? {
            let item = item?;
            let meta = item.metadata()?;
            let path = item.path();
            if meta.is_dir() {
                pending.push(path);
                continue;
            }
            if !has_extension(&path, &[VIDEO_EXTENSION]) {
                continue;
            }
            let modified = meta.modified()?;
            let newer = match &best {
                None => true,
                Some((t, p)) => modified > *t || (modified == *t && path < *p),
            };
            if newer {
                best = Some((modified, path));
            }
        }
    }
    Ok(best.map(|(_, path)| path))
}

impl Animator {
    pub fn invocation(&self, audio: &Path, image: &Path, result_dir: &Path) -> Invocation {
        Invocation::from_tool(&self.tool)
            .arg("--driven_audio")
            .arg(audio)
            .arg("--source_image")
            .arg(image)
            .arg("--result_dir")
            .arg(result_dir)
            .args(self.profile.to_args())
            .current_dir(&self.tool_dir)
    }

    /// Runs the tool against `result_dir`, which belongs to this run alone,
    /// and returns the video it produced there.
    pub async fn animate(
        &self,
        pool: &WorkerPool,
        audio: &Path,
        image: Option<&Path>,
        result_dir: &Path,
    ) -> Result<(PathBuf, PathBuf), PipelineError> {
        let image = resolve_image(image, &self.default_image);
        let invocation = self.invocation(audio, &image, result_dir);

        let output = pool.run(Step::Video, invocation).await?;
        output.check(Step::Video)?;
        info!("Animation tool finished in {:.2}s", output.elapsed.as_secs_f64());

        let video = self.locate_output(result_dir).map_err(|reason| {
            StepError::missing_output(Step::Video, format!("{}\n{}", reason, output.stderr))
        })?;
        let size = fs::metadata(&video).map(|m| m.len()).unwrap_or(0);
        info!("Found generated video: {} ({} bytes)", video.display(), size);
        Ok((video, image))
    }

    fn locate_output(&self, result_dir: &Path) -> Result<PathBuf, String> {
        if let Some(name) = &self.output_name {
            let expected = result_dir.join(name);
            debug!("Expecting video at {}", expected.display());
            return if expected.is_file() {
                Ok(expected)
            } else {
                Err(format!("expected video not found at {}", expected.display()))
            };
        }
        match find_newest_video(result_dir) {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(format!("no video file found in {}", result_dir.display())),
            Err(e) => Err(format!("could not scan {}: {}", result_dir.display(), e)),
        }
    }
}
