use crate::clean::TextCleaner;
use crate::error::SplitError;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Dataset a subtitle file came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    #[default]
    Masc,
    Sada,
}

impl fmt::Display for Source {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Masc => write!(fmt, "MASC"),
            Source::Sada => write!(fmt, "SADA"),
        }
    }
}

impl FromStr for Source {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MASC" => Ok(Source::Masc),
            "SADA" => Ok(Source::Sada),
            other => Err(SplitError::InvalidConfig(format!("unknown source '{}'", other))),
        }
    }
}

/// Which windowing path finalized a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushCause {
    /// The next caption was separated by a silence longer than the threshold.
    Gap,
    /// Merging the next caption would have exceeded the maximum duration.
    /// Segments flushed this way skip the minimum-duration filter.
    Overflow,
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(with = "seconds")]
    pub start: Duration,
    #[serde(with = "seconds")]
    pub end: Duration,
    pub text: String,
    pub filename: String,
    pub source: Source,
    pub cause: FlushCause,
}

impl Segment {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// All segments cut from one subtitle file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredAudio")]
pub struct Audio {
    filename: String,
    #[serde(with = "seconds")]
    duration: Duration,
    segments: Vec<Segment>,
    source: Source,
}

/// An [`Audio`] as read back from disk. The duration is recomputed from the
/// segments on load.
#[derive(Deserialize)]
struct StoredAudio {
    filename: String,
    #[serde(with = "seconds")]
    duration: Duration,
    segments: Vec<Segment>,
    source: Source,
}

impl From<StoredAudio> for Audio {
    fn from(stored: StoredAudio) -> Self {
        let audio = Audio::from_segments(stored.filename, stored.segments, stored.source);
        let drift = if stored.duration > audio.duration {
            stored.duration - audio.duration
        } else {
            audio.duration - stored.duration
        };
        if drift > Duration::from_millis(1) {
            warn!(
                audio = audio.filename(),
                stored = stored.duration.as_secs_f64(),
                actual = audio.duration.as_secs_f64(),
                "stored duration disagrees with segments"
            );
        }
        audio
    }
}

impl Audio {
    pub fn from_segments(filename: impl Into<String>, segments: Vec<Segment>, source: Source) -> Self {
        let duration = segments.iter().map(Segment::duration).sum();
        Self {
            filename: filename.into(),
            duration,
            segments,
            source,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Sum of segment durations. Silence between segments is not counted.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Returns a copy with every segment's text passed through `cleaner`.
    /// Timing and filenames are left untouched.
    pub fn cleaned(&self, cleaner: &dyn TextCleaner) -> Audio {
        let segments = self
            .segments
            .iter()
            .map(|segment| Segment {
                text: cleaner.clean(&segment.text),
                ..segment.clone()
            })
            .collect();
        Audio::from_segments(self.filename.clone(), segments, self.source)
    }

    /// Segments whose duration falls outside `[min, max]`.
    pub fn range_violations(&self, min: Duration, max: Duration) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|segment| {
                let duration = segment.duration();
                duration < min || duration > max
            })
            .collect()
    }

    pub fn rows(&self) -> Vec<SegmentRow> {
        self.segments
            .iter()
            .map(|segment| SegmentRow {
                audio_filename: self.filename.clone(),
                segment_filename: segment.filename.clone(),
                segment_start: segment.start.as_secs_f64(),
                segment_end: segment.end.as_secs_f64(),
                segment_duration: segment.duration().as_secs_f64(),
                segment_text: segment.text.clone(),
                source: segment.source,
            })
            .collect()
    }
}

/// Flat, one-per-segment view of an [`Audio`] used for manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRow {
    pub audio_filename: String,
    pub segment_filename: String,
    pub segment_start: f64,
    pub segment_end: f64,
    pub segment_duration: f64,
    pub segment_text: String,
    pub source: Source,
}

/// Total duration of `segments` in seconds.
pub fn total_duration(segments: &[Segment]) -> f64 {
    segments
        .iter()
        .map(Segment::duration)
        .sum::<Duration>()
        .as_secs_f64()
}

/// Base name shared by a subtitle file and its audio: the file name without its
/// extension and without a trailing language tag (`talk.ar.vtt` -> `talk`).
pub fn base_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.rsplit_once('.') {
        Some((name, lang))
            if !name.is_empty()
                && (2..=3).contains(&lang.len())
                && lang.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            name.to_string()
        }
        _ => stem,
    }
}

mod seconds {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|err| D::Error::custom(format!("invalid duration {}: {}", secs, err)))
    }
}
