use crate::audio::Audio;
use crate::error::SplitError;

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use tracing::{info, warn};

/// Cuts a time range out of one source recording.
pub trait AudioSlicer {
    fn slice(&self, start: Duration, end: Duration) -> Result<Vec<u8>>;

    /// File extension of the bytes returned by [`AudioSlicer::slice`].
    fn extension(&self) -> &str;
}

enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

/// WAV slicer that keeps the decoded source in memory and re-encodes each
/// slice with the source's own format.
pub struct WavSlicer {
    spec: hound::WavSpec,
    samples: Samples,
}

impl WavSlicer {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
        let spec = reader.spec();
        check_spec(&spec).with_context(|| format!("Unusable WAV file: {}", path.display()))?;
        let samples = match spec.sample_format {
            hound::SampleFormat::Int => Samples::Int(
                reader
                    .samples::<i32>()
                    .collect::<std::result::Result<Vec<i32>, _>>()
                    .context("Failed to read WAV samples")?,
            ),
            hound::SampleFormat::Float => Samples::Float(
                reader
                    .samples::<f32>()
                    .collect::<std::result::Result<Vec<f32>, _>>()
                    .context("Failed to read WAV samples")?,
            ),
        };
        Ok(Self { spec, samples })
    }

    fn frames(&self) -> usize {
        let len = match &self.samples {
            Samples::Int(s) => s.len(),
            Samples::Float(s) => s.len(),
        };
        len / self.spec.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.spec.sample_rate as f64)
    }

    fn frame_at(&self, time: Duration) -> usize {
        let frame = (time.as_secs_f64() * self.spec.sample_rate as f64).round() as usize;
        frame.min(self.frames())
    }
}

fn check_spec(spec: &hound::WavSpec) -> Result<()> {
    ensure!(spec.channels > 0, "header declares no channels");
    ensure!(spec.sample_rate > 0, "header declares a zero sample rate");
    Ok(())
}

/// Length of the WAV file at `path`, read from its header.
pub fn wav_duration<P: AsRef<Path>>(path: P) -> Result<Duration> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    check_spec(&spec).with_context(|| format!("Unusable WAV file: {}", path.display()))?;
    Ok(Duration::from_secs_f64(
        reader.duration() as f64 / spec.sample_rate as f64,
    ))
}

impl AudioSlicer for WavSlicer {
    fn slice(&self, start: Duration, end: Duration) -> Result<Vec<u8>> {
        let first = self.frame_at(start);
        let last = self.frame_at(end);
        ensure!(
            last > first,
            "range {:.3}s-{:.3}s is empty within {:.3}s of audio",
            start.as_secs_f64(),
            end.as_secs_f64(),
            self.duration().as_secs_f64()
        );
        let channels = self.spec.channels as usize;
        let range = first * channels..last * channels;

        let mut buffer = Cursor::new(Vec::new());
        let mut writer =
            hound::WavWriter::new(&mut buffer, self.spec).context("Failed to create WAV writer")?;
        match &self.samples {
            Samples::Int(samples) => {
                for &sample in &samples[range] {
                    writer.write_sample(sample).context("Failed to write audio sample")?;
                }
            }
            Samples::Float(samples) => {
                for &sample in &samples[range] {
                    writer.write_sample(sample).context("Failed to write audio sample")?;
                }
            }
        }
        writer.finalize().context("Failed to finalize WAV data")?;
        Ok(buffer.into_inner())
    }

    fn extension(&self) -> &str {
        "wav"
    }
}

/// Largest difference between a written file and its segment that still
/// counts as a match.
pub const DURATION_TOLERANCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedSegment {
    pub segment: String,
    pub path: PathBuf,
    pub expected: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationMismatch {
    pub segment: String,
    pub path: PathBuf,
    pub expected: Duration,
    pub actual: Duration,
}

impl fmt::Display for DurationMismatch {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} has a duration of {:.3}s while the segment says {:.3}s",
            self.path.display(),
            self.actual.as_secs_f64(),
            self.expected.as_secs_f64()
        )
    }
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<ExportedSegment>,
    pub failures: Vec<SplitError>,
}

impl ExportReport {
    /// Re-reads every written file and compares its length with the segment
    /// it was cut for. Files off by more than `tolerance` are removed from
    /// `written` and returned.
    pub fn validate(&mut self, tolerance: Duration) -> Result<Vec<DurationMismatch>> {
        let mut mismatches = Vec::new();
        let mut kept = Vec::with_capacity(self.written.len());
        for exported in self.written.drain(..) {
            let actual = wav_duration(&exported.path)?;
            let drift = if actual > exported.expected {
                actual - exported.expected
            } else {
                exported.expected - actual
            };
            if drift > tolerance {
                let mismatch = DurationMismatch {
                    segment: exported.segment,
                    path: exported.path,
                    expected: exported.expected,
                    actual,
                };
                warn!("{}", mismatch);
                mismatches.push(mismatch);
            } else {
                kept.push(exported);
            }
        }
        self.written = kept;
        info!(
            valid = self.written.len(),
            mismatched = mismatches.len(),
            "validated exported segments"
        );
        Ok(mismatches)
    }
}

/// Writes one file per segment of `audio` into `out_dir`, named after the
/// segment. A failing segment is recorded and the rest are still exported.
pub fn export(audio: &Audio, slicer: &dyn AudioSlicer, out_dir: &Path) -> Result<ExportReport> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    let mut report = ExportReport::default();
    for segment in audio.segments() {
        let target = out_dir.join(format!("{}.{}", segment.filename, slicer.extension()));
        let result = slicer.slice(segment.start, segment.end).and_then(|bytes| {
            std::fs::write(&target, bytes).map_err(|err| anyhow!(err))
        });
        match result {
            Ok(()) => report.written.push(ExportedSegment {
                segment: segment.filename.clone(),
                path: target,
                expected: segment.duration(),
            }),
            Err(err) => {
                warn!(segment = %segment.filename, "export failed: {:#}", err);
                report.failures.push(SplitError::SliceExport {
                    segment: segment.filename.clone(),
                    reason: format!("{:#}", err),
                });
            }
        }
    }
    info!(
        audio = audio.filename(),
        written = report.written.len(),
        failed = report.failures.len(),
        "exported segments"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{FlushCause, Segment, Source};

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, seconds: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in 0..(sample_rate * seconds) {
            for _ in 0..channels {
                writer.write_sample((frame % 1000) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn read_back(bytes: Vec<u8>) -> (hound::WavSpec, Vec<i16>) {
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    fn segment(name: &str, start_ms: u64, end_ms: u64) -> Segment {
        Segment {
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(end_ms),
            text: String::new(),
            filename: name.to_string(),
            source: Source::Masc,
            cause: FlushCause::Gap,
        }
    }

    #[test]
    fn test_slice_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talk.wav");
        write_wav(&path, 1, 1000, 3);

        let slicer = WavSlicer::open(&path).unwrap();
        let bytes = slicer
            .slice(Duration::from_millis(500), Duration::from_millis(1500))
            .unwrap();
        let (spec, samples) = read_back(bytes);

        assert_eq!(slicer.duration(), Duration::from_secs(3));
        assert_eq!(spec.sample_rate, 1000);
        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0], 500);
    }

    #[test]
    fn test_slice_keeps_channels_interleaved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 1000, 2);

        let slicer = WavSlicer::open(&path).unwrap();
        let (spec, samples) = read_back(
            slicer
                .slice(Duration::from_millis(250), Duration::from_millis(750))
                .unwrap(),
        );

        assert_eq!(spec.channels, 2);
        assert_eq!(samples.len(), 1000);
        assert_eq!(&samples[..4], &[250, 250, 251, 251]);
    }

    #[test]
    fn test_slice_clamps_and_rejects_empty_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 1, 1000, 1);
        let slicer = WavSlicer::open(&path).unwrap();

        let (_, samples) = read_back(
            slicer
                .slice(Duration::from_millis(800), Duration::from_secs(5))
                .unwrap(),
        );
        assert_eq!(samples.len(), 200);

        assert!(slicer
            .slice(Duration::from_secs(2), Duration::from_secs(3))
            .is_err());
    }

    #[test]
    fn test_export_keeps_going_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talk.wav");
        write_wav(&path, 1, 1000, 2);
        let audio = Audio::from_segments(
            "talk",
            vec![
                segment("talk_0", 0, 1000),
                segment("talk_1", 5000, 9000),
                segment("talk_2", 1000, 2000),
            ],
            Source::Masc,
        );
        let out_dir = dir.path().join("segments");

        let slicer = WavSlicer::open(&path).unwrap();
        let report = export(&audio, &slicer, &out_dir).unwrap();

        assert_eq!(report.written.len(), 2);
        assert!(out_dir.join("talk_0.wav").is_file());
        assert!(out_dir.join("talk_2.wav").is_file());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            SplitError::SliceExport { segment, .. } if segment == "talk_1"
        ));
        // Metadata for the failed segment is still there.
        assert_eq!(audio.segments().len(), 3);
    }

    #[test]
    fn test_validate_drops_short_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talk.wav");
        write_wav(&path, 1, 1000, 4);
        let audio = Audio::from_segments(
            "talk",
            vec![
                segment("talk_0", 0, 2500),
                // Runs 3.5s past the end of the recording and gets clamped.
                segment("talk_1", 2000, 7500),
                // Clamped by only 0.5s, within tolerance.
                segment("talk_2", 3000, 4500),
            ],
            Source::Masc,
        );
        let out_dir = dir.path().join("segments");
        let slicer = WavSlicer::open(&path).unwrap();
        let mut report = export(&audio, &slicer, &out_dir).unwrap();
        assert_eq!(report.written.len(), 3);

        let mismatches = report.validate(DURATION_TOLERANCE).unwrap();

        let kept: Vec<&str> = report.written.iter().map(|w| w.segment.as_str()).collect();
        assert_eq!(kept, vec!["talk_0", "talk_2"]);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].segment, "talk_1");
        assert_eq!(mismatches[0].expected, Duration::from_millis(5500));
        assert_eq!(mismatches[0].actual, Duration::from_secs(2));
    }

    #[test]
    fn test_wav_duration_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 8000, 3);

        assert_eq!(wav_duration(&path).unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_degenerate_headers_are_rejected() {
        let spec = |channels, sample_rate| hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        assert!(check_spec(&spec(1, 16000)).is_ok());
        assert!(check_spec(&spec(0, 16000)).is_err());
        assert!(check_spec(&spec(1, 0)).is_err());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WavSlicer::open(dir.path().join("missing.wav")).is_err());
    }
}
