use crate::audio::{base_name, Audio, Source};
use crate::config::Settings;
use crate::parser::{CaptionSource, SubtitleFiles, SubtitleFormat};
use crate::window::{window_with_stats, WindowConfig, WindowStats};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Number of files processed concurrently. With more than one worker the
    /// report lists files in completion order.
    pub workers: usize,
    /// Stop after this many subtitle files.
    pub limit: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            limit: None,
        }
    }
}

#[derive(Debug)]
pub enum FileOutcome {
    Split {
        path: PathBuf,
        audio: Audio,
        stats: WindowStats,
    },
    Failed {
        path: PathBuf,
        error: anyhow::Error,
    },
}

impl FileOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FileOutcome::Split { path, .. } | FileOutcome::Failed { path, .. } => path,
        }
    }

    pub fn audio(&self) -> Option<&Audio> {
        match self {
            FileOutcome::Split { audio, .. } => Some(audio),
            FileOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Files that were split successfully.
    pub files_processed: usize,
    pub segments_emitted: usize,
    pub segments_discarded_short: usize,
    pub files_skipped: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} files processed, {} segments emitted, {} discarded as too short, {} files skipped",
            self.files_processed,
            self.segments_emitted,
            self.segments_discarded_short,
            self.files_skipped
        )
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        self.outcomes
            .iter()
            .fold(BatchSummary::default(), |mut summary, outcome| {
                match outcome {
                    FileOutcome::Split { stats, .. } => {
                        summary.files_processed += 1;
                        summary.segments_emitted += stats.segments;
                        summary.segments_discarded_short += stats.discarded_short;
                    }
                    FileOutcome::Failed { .. } => summary.files_skipped += 1,
                }
                summary
            })
    }

    pub fn audios(&self) -> impl Iterator<Item = &Audio> {
        self.outcomes.iter().filter_map(FileOutcome::audio)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, FileOutcome::Failed { .. }))
    }

    /// Base names produced by more than one file, such as `talk.en.vtt` and
    /// `talk.ar.vtt`. Their records share a filename and collide in a store.
    pub fn duplicate_names(&self) -> BTreeMap<&str, Vec<&Path>> {
        let mut by_name: BTreeMap<&str, Vec<&Path>> = BTreeMap::new();
        for outcome in &self.outcomes {
            if let FileOutcome::Split { path, audio, .. } = outcome {
                by_name.entry(audio.filename()).or_default().push(path);
            }
        }
        by_name.retain(|_, paths| paths.len() > 1);
        by_name
    }

    /// Puts the outcomes in a deterministic order, whatever the worker count.
    pub fn sort_by_filename(&mut self) {
        self.outcomes
            .sort_by(|a, b| a.path().file_name().cmp(&b.path().file_name()));
    }
}

/// Subtitle files directly inside `dir`, in directory listing order.
pub fn subtitle_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read subtitle directory {:?}", dir))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list subtitle directory {:?}", dir))?
            .path();
        if path.is_file() && SubtitleFormat::from_path(&path).is_some() {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Splits every subtitle file in `dir`. Per-file failures end up in the
/// report; only an unreadable directory or invalid settings fail the batch.
pub fn run(dir: &Path, settings: &Settings, options: &BatchOptions) -> Result<BatchReport> {
    let config = settings.window_config()?;
    let mut paths = subtitle_files(dir)?;
    if let Some(limit) = options.limit {
        paths.truncate(limit);
    }
    info!(
        dir = %dir.display(),
        files = paths.len(),
        workers = options.workers,
        "splitting subtitle files"
    );
    let report = run_files(&paths, &SubtitleFiles, &config, settings.source, options.workers);
    for (name, files) in report.duplicate_names() {
        warn!(
            audio = name,
            files = ?files,
            "several files share a base name; only the first will be stored"
        );
    }
    info!("{}", report.summary());
    Ok(report)
}

pub fn run_files<S: CaptionSource + Sync>(
    paths: &[PathBuf],
    captions: &S,
    config: &WindowConfig,
    source: Source,
    workers: usize,
) -> BatchReport {
    let workers = workers.clamp(1, paths.len().max(1));
    if workers == 1 {
        let outcomes = paths
            .iter()
            .map(|path| split_file(path, captions, config, source))
            .collect();
        return BatchReport { outcomes };
    }

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = paths.get(idx) else {
                    break;
                };
                if tx.send(split_file(path, captions, config, source)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);
    BatchReport {
        outcomes: rx.into_iter().collect(),
    }
}

fn split_file<S: CaptionSource>(
    path: &Path,
    captions: &S,
    config: &WindowConfig,
    source: Source,
) -> FileOutcome {
    let result = captions.parse(path).and_then(|parsed| {
        window_with_stats(&parsed, config, &base_name(path), source)
            .with_context(|| format!("Failed to split '{}'", path.display()))
    });
    match result {
        Ok((audio, stats)) => FileOutcome::Split {
            path: path.to_path_buf(),
            audio,
            stats,
        },
        Err(error) => {
            warn!(file = %path.display(), "skipping file: {:#}", error);
            FileOutcome::Failed {
                path: path.to_path_buf(),
                error,
            }
        }
    }
}
