//! Retention cleanup: keep the N most recently modified artifacts in a
//! directory and delete the rest.
//!
//! Cleanup never fails its caller. Every matched entry gets a
//! [`PruneOutcome`], so a removal that loses a race with another deleter
//! shows up as `Failed` in the report instead of aborting the pass.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Directory names written by the animation tool (`2025_07_31_20.11.27`)
/// and by the pipeline for its per-run directories (same stamp plus a
/// short hex suffix).
static OUTPUT_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}_\d{2}_\d{2}_\d{2}\.\d{2}\.\d{2}(?:_[0-9a-f]{8})?$")
        .expect("output dir pattern is valid")
});

pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3"];
pub const VIDEO_EXTENSION: &str = "mp4";

/// Which directory entries count as artifacts.
#[derive(Debug, Clone, Copy)]
pub enum Matcher<'a> {
    /// Regular files directly in the directory with one of these
    /// extensions (case-insensitive).
    Extensions(&'a [&'a str]),
    /// Top-level `.mp4` files plus timestamp-named output directories.
    VideoOutputs,
}

impl Matcher<'_> {
    fn matches(&self, path: &Path, is_dir: bool) -> bool {
        match self {
            Matcher::Extensions(exts) => !is_dir && has_extension(path, exts),
            Matcher::VideoOutputs => {
                if is_dir {
                    is_output_dir_name(path)
                } else {
                    has_extension(path, &[VIDEO_EXTENSION])
                }
            }
        }
    }
}

pub fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

pub fn is_output_dir_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| OUTPUT_DIR_RE.is_match(n))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PruneOutcome {
    Retained { path: PathBuf },
    Removed { path: PathBuf },
    Skipped { path: PathBuf, reason: String },
    Failed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub directory: PathBuf,
    pub outcomes: Vec<PruneOutcome>,
}

impl PruneReport {
    pub fn removed(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|o| match o {
            PruneOutcome::Removed { path } => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn retained(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|o| match o {
            PruneOutcome::Retained { path } => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|o| match o {
            PruneOutcome::Skipped { path, .. } => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            PruneOutcome::Failed { path, reason } => Some((path.as_path(), reason.as_str())),
            _ => None,
        })
    }
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    modified: SystemTime,
    is_dir: bool,
}

/// Newest first; equal timestamps fall back to lexical path order so the
/// result does not depend on directory listing order.
fn newest_first(a: &Entry, b: &Entry) -> Ordering {
    b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path))
}

/// Deletes every matching entry beyond the `retain` newest. A missing
/// directory is a no-op.
pub fn prune(dir: &Path, retain: usize, matcher: Matcher<'_>) -> PruneReport {
    prune_with(dir, retain, matcher, &[], remove_entry)
}

/// Like [`prune`], but entries listed in `protected` are neither counted
/// nor removed; they are reported as skipped.
pub fn prune_protected(
    dir: &Path,
    retain: usize,
    matcher: Matcher<'_>,
    protected: &[PathBuf],
) -> PruneReport {
    prune_with(dir, retain, matcher, protected, remove_entry)
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn prune_with<F>(
    dir: &Path,
    retain: usize,
    matcher: Matcher<'_>,
    protected: &[PathBuf],
    mut remove: F,
) -> PruneReport
where
    F: FnMut(&Path, bool) -> io::Result<()>,
{
    let mut report = PruneReport {
        directory: dir.to_path_buf(),
        outcomes: Vec::new(),
    };

    let mut entries = match collect_entries(dir, matcher) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Skipping cleanup of missing directory {}", dir.display());
            return report;
        }
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            return report;
        }
    };
    entries.sort_by(newest_first);

    let (busy, entries): (Vec<Entry>, Vec<Entry>) = entries
        .into_iter()
        .partition(|e| protected.iter().any(|p| p == &e.path));
    for entry in busy {
        debug!("Skipping {}: in use by an active run", entry.path.display());
        report.outcomes.push(PruneOutcome::Skipped {
            path: entry.path,
            reason: "in use by an active run".to_string(),
        });
    }

    for (i, entry) in entries.into_iter().enumerate() {
        if i < retain {
            report.outcomes.push(PruneOutcome::Retained { path: entry.path });
            continue;
        }
        match remove(&entry.path, entry.is_dir) {
            Ok(()) => {
                info!("Removed old artifact: {}", entry.path.display());
                report.outcomes.push(PruneOutcome::Removed { path: entry.path });
            }
            Err(e) => {
                warn!("Could not remove {}: {}", entry.path.display(), e);
                report.outcomes.push(PruneOutcome::Failed {
                    path: entry.path,
                    reason: e.to_string(),
                });
            }
        }
    }
    report
}

fn collect_entries(dir: &Path, matcher: Matcher<'_>) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        // Entries vanishing mid-listing are someone else's cleanup.
        let Ok(item) = item else { continue };
        let Ok(meta) = item.metadata() else { continue };
        let path = item.path();
        if !matcher.matches(&path, meta.is_dir()) {
            continue;
        }
        let Ok(modified) = meta.modified() else { continue };
        entries.push(Entry {
            path,
            modified,
            is_dir: meta.is_dir(),
        });
    }
    Ok(entries)
}

/// Retention policy over the audio and video directories.
#[derive(Debug, Clone)]
pub struct Cleaner {
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    pub keep: usize,
}

impl Cleaner {
    pub fn new(audio_dir: impl Into<PathBuf>, video_dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            video_dir: video_dir.into(),
            keep,
        }
    }

    pub fn prune_all(&self) -> Vec<PruneReport> {
        info!("Cleaning up old files (keeping {})", self.keep);
        let reports = vec![
            prune(&self.audio_dir, self.keep, Matcher::Extensions(AUDIO_EXTENSIONS)),
            prune(&self.video_dir, self.keep, Matcher::VideoOutputs),
        ];
        log_summary(&reports);
        reports
    }

    /// Same pass, leaving the artifacts of in-flight runs alone.
    pub fn prune_all_except(&self, active: &[PathBuf]) -> Vec<PruneReport> {
        info!("Cleaning up old files (keeping {}, {} in use)", self.keep, active.len());
        let reports = vec![
            prune_protected(
                &self.audio_dir,
                self.keep,
                Matcher::Extensions(AUDIO_EXTENSIONS),
                active,
            ),
            prune_protected(&self.video_dir, self.keep, Matcher::VideoOutputs, active),
        ];
        log_summary(&reports);
        reports
    }
}

fn log_summary(reports: &[PruneReport]) {
    let count = |f: fn(&PruneReport) -> usize| reports.iter().map(f).sum::<usize>();
    info!(
        "Cleanup completed: {} kept, {} removed, {} skipped, {} failed",
        count(|r| r.retained().count()),
        count(|r| r.removed().count()),
        count(|r| r.skipped().count()),
        count(|r| r.failures().count()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    fn set_dir_age(path: &Path, age_secs: u64) {
        File::open(path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    /// Five clips, clip_0 newest.
    fn seed_audio(dir: &Path) {
        for i in 0..5 {
            touch(&dir.join(format!("clip_{i}.wav")), 100 * (i as u64 + 1));
        }
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn keeps_the_newest_n() {
        for (keep, expected) in [(0, 0), (1, 1), (3, 3), (10, 5)] {
            let dir = tempfile::tempdir().unwrap();
            seed_audio(dir.path());

            let report = prune(dir.path(), keep, Matcher::Extensions(AUDIO_EXTENSIONS));

            let left = names(dir.path());
            assert_eq!(left.len(), expected, "keep={keep}");
            let newest: Vec<String> = (0..expected).map(|i| format!("clip_{i}.wav")).collect();
            assert_eq!(left, newest, "keep={keep}");
            assert_eq!(report.removed().count(), 5 - expected);
            assert_eq!(report.retained().count(), expected);
        }
    }

    #[test]
    fn missing_directory_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let report = prune(&dir.path().join("nope"), 0, Matcher::VideoOutputs);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn ignores_unmatched_files() {
        let dir = tempfile::tempdir().unwrap();
        seed_audio(dir.path());
        touch(&dir.path().join("notes.txt"), 1_000);
        touch(&dir.path().join("old.MP3"), 2_000);

        prune(dir.path(), 2, Matcher::Extensions(AUDIO_EXTENSIONS));

        assert_eq!(names(dir.path()), ["clip_0.wav", "clip_1.wav", "notes.txt"]);
    }

    #[test]
    fn continues_past_a_failed_removal() {
        let dir = tempfile::tempdir().unwrap();
        seed_audio(dir.path());
        let stuck = dir.path().join("clip_2.wav");

        let report = prune_with(
            dir.path(),
            1,
            Matcher::Extensions(AUDIO_EXTENSIONS),
            &[],
            |path, is_dir| {
                if path == stuck {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                } else {
                    remove_entry(path, is_dir)
                }
            },
        );

        assert_eq!(names(dir.path()), ["clip_0.wav", "clip_2.wav"]);
        assert_eq!(report.removed().count(), 3);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, stuck.as_path());
        assert!(failures[0].1.contains("locked"));
    }

    #[test]
    fn equal_timestamps_break_ties_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let when = SystemTime::now() - Duration::from_secs(60);
        for name in ["b.wav", "a.wav", "c.wav"] {
            File::create(dir.path().join(name))
                .unwrap()
                .set_modified(when)
                .unwrap();
        }

        prune(dir.path(), 2, Matcher::Extensions(AUDIO_EXTENSIONS));

        assert_eq!(names(dir.path()), ["a.wav", "b.wav"]);
    }

    #[test]
    fn video_outputs_cover_files_and_dated_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        touch(&root.join("newest.mp4"), 10);
        let run = root.join("2025_07_31_20.11.27_0a1b2c3d");
        fs::create_dir(&run).unwrap();
        touch(&run.join("inner.mp4"), 5);
        set_dir_age(&run, 20);
        let dated = root.join("2025_07_30_09.00.00");
        fs::create_dir(&dated).unwrap();
        touch(&dated.join("inner.mp4"), 5);
        set_dir_age(&dated, 30);
        touch(&root.join("oldest.mp4"), 40);
        fs::create_dir(root.join("keepme")).unwrap();

        let report = prune(root, 2, Matcher::VideoOutputs);

        assert_eq!(
            names(root),
            ["2025_07_31_20.11.27_0a1b2c3d", "keepme", "newest.mp4"]
        );
        assert_eq!(report.removed().count(), 2);
    }

    #[test]
    fn output_dir_names() {
        assert!(is_output_dir_name(Path::new("2025_07_31_20.11.27")));
        assert!(is_output_dir_name(Path::new("2026_10_16_08.00.01_deadbeef")));
        assert!(!is_output_dir_name(Path::new("2025_07_31")));
        assert!(!is_output_dir_name(Path::new("results")));
    }

    #[test]
    fn protected_entries_are_skipped_and_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        seed_audio(dir.path());
        let active = dir.path().join("clip_4.wav");

        let report = prune_protected(
            dir.path(),
            1,
            Matcher::Extensions(AUDIO_EXTENSIONS),
            std::slice::from_ref(&active),
        );

        assert_eq!(names(dir.path()), ["clip_0.wav", "clip_4.wav"]);
        assert_eq!(report.skipped().collect::<Vec<_>>(), [active.as_path()]);
        assert_eq!(report.removed().count(), 3);
    }

    #[test]
    fn cleaner_prunes_both_directories() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio");
        let video = dir.path().join("video");
        fs::create_dir_all(&audio).unwrap();
        fs::create_dir_all(&video).unwrap();
        seed_audio(&audio);
        for i in 0..3 {
            touch(&video.join(format!("v{i}.mp4")), 10 * (i as u64 + 1));
        }

        let reports = Cleaner::new(&audio, &video, 1).prune_all();

        assert_eq!(reports.len(), 2);
        assert_eq!(names(&audio), ["clip_0.wav"]);
        assert_eq!(names(&video), ["v0.mp4"]);
    }
}
