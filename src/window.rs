use crate::audio::{Audio, FlushCause, Segment, Source};
use crate::caption::Caption;
use crate::error::SplitError;

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do with a caption that is longer than the maximum segment duration
/// all by itself.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// The caption becomes its own accumulator and is flushed alone, so the
    /// resulting segment exceeds the maximum duration.
    #[default]
    Keep,
    /// The caption is skipped before it can join an accumulator.
    Drop,
}

impl FromStr for OversizePolicy {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(OversizePolicy::Keep),
            "drop" => Ok(OversizePolicy::Drop),
            other => Err(SplitError::InvalidConfig(format!(
                "unknown oversize policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    min_duration: Duration,
    max_duration: Duration,
    threshold: Duration,
    oversize: OversizePolicy,
    caption_floor: Option<Duration>,
}

impl WindowConfig {
    /// Builds a config from values in seconds.
    pub fn new(min_secs: f64, max_secs: f64, threshold_secs: f64) -> Result<Self, SplitError> {
        let min_duration = secs_to_duration("min_duration", min_secs)?;
        let max_duration = secs_to_duration("max_duration", max_secs)?;
        let threshold = secs_to_duration("threshold", threshold_secs)?;
        if min_duration > max_duration {
            return Err(SplitError::InvalidConfig(format!(
                "min_duration ({}) must not exceed max_duration ({})",
                min_secs, max_secs
            )));
        }
        Ok(Self {
            min_duration,
            max_duration,
            threshold,
            oversize: OversizePolicy::default(),
            caption_floor: None,
        })
    }

    pub fn with_oversize(mut self, oversize: OversizePolicy) -> Self {
        self.oversize = oversize;
        self
    }

    /// Captions shorter than `floor` are skipped as noise.
    pub fn with_caption_floor(mut self, floor: Duration) -> Self {
        self.caption_floor = Some(floor);
        self
    }

    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn oversize(&self) -> OversizePolicy {
        self.oversize
    }

    fn admits(&self, caption: &Caption) -> bool {
        let duration = caption.duration();
        if self.caption_floor.map_or(false, |floor| duration < floor) {
            return false;
        }
        !(self.oversize == OversizePolicy::Drop && duration > self.max_duration)
    }
}

pub(crate) fn secs_to_duration(name: &str, secs: f64) -> Result<Duration, SplitError> {
    Duration::try_from_secs_f64(secs).map_err(|err| {
        SplitError::InvalidConfig(format!(
            "{} must be a non-negative number of seconds, got {} ({})",
            name, secs, err
        ))
    })
}

/// Counters describing one windowing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub segments: usize,
    /// Accumulators dropped for being shorter than the minimum duration.
    pub discarded_short: usize,
    /// Captions skipped by the oversize policy or the caption floor.
    pub dropped_captions: usize,
    pub overflow_flushes: usize,
}

/// The candidate segment being grown.
struct Accumulator {
    start: Duration,
    end: Duration,
    text: String,
}

impl Accumulator {
    fn open(caption: &Caption) -> Self {
        Self {
            start: caption.start,
            end: caption.end,
            text: caption.text.clone(),
        }
    }

    fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    fn gap_to(&self, caption: &Caption) -> Duration {
        caption.start.saturating_sub(self.end)
    }

    // Includes the bridged silence, so it matches the emitted segment's duration.
    fn duration_with(&self, caption: &Caption) -> Duration {
        caption.end.max(self.end).saturating_sub(self.start)
    }

    fn merge(&mut self, caption: &Caption) {
        self.end = caption.end.max(self.end);
        if !caption.text.is_empty() {
            if !self.text.is_empty() {
                self.text.push(' ');
            }
            self.text.push_str(&caption.text);
        }
    }
}

struct Windower<'a> {
    config: &'a WindowConfig,
    base_name: &'a str,
    source: Source,
    segments: Vec<Segment>,
    stats: WindowStats,
}

impl<'a> Windower<'a> {
    fn new(config: &'a WindowConfig, base_name: &'a str, source: Source) -> Self {
        Self {
            config,
            base_name,
            source,
            segments: Vec::new(),
            stats: WindowStats::default(),
        }
    }

    fn step(&mut self, mut current: Accumulator, caption: &Caption) -> Accumulator {
        if current.gap_to(caption) > self.config.threshold {
            self.close(current, FlushCause::Gap);
            return Accumulator::open(caption);
        }
        if current.duration_with(caption) <= self.config.max_duration {
            current.merge(caption);
            return current;
        }
        self.flush(current, FlushCause::Overflow);
        Accumulator::open(caption)
    }

    /// Flushes the accumulator if it is long enough, discards it otherwise.
    fn close(&mut self, acc: Accumulator, cause: FlushCause) {
        if acc.duration() >= self.config.min_duration {
            self.flush(acc, cause);
        } else {
            debug!(
                file = self.base_name,
                start = acc.start.as_secs_f64(),
                duration = acc.duration().as_secs_f64(),
                "discarding short accumulator"
            );
            self.stats.discarded_short += 1;
        }
    }

    fn flush(&mut self, acc: Accumulator, cause: FlushCause) {
        // Ordinals are handed out at flush time so they stay dense.
        let ordinal = self.segments.len();
        if cause == FlushCause::Overflow {
            self.stats.overflow_flushes += 1;
        }
        self.segments.push(Segment {
            start: acc.start,
            end: acc.end,
            text: acc.text,
            filename: format!("{}_{}", self.base_name, ordinal),
            source: self.source,
            cause,
        });
    }

    fn finish(mut self, last: Option<Accumulator>) -> (Audio, WindowStats) {
        if let Some(acc) = last {
            self.close(acc, FlushCause::EndOfStream);
        }
        self.stats.segments = self.segments.len();
        let audio = Audio::from_segments(self.base_name, self.segments, self.source);
        (audio, self.stats)
    }
}

/// Cuts an ordered caption sequence into segments whose duration lies within
/// the configured range. See [`window_with_stats`].
pub fn window(
    captions: &[Caption],
    config: &WindowConfig,
    base_name: &str,
    source: Source,
) -> Result<Audio, SplitError> {
    window_with_stats(captions, config, base_name, source).map(|(audio, _)| audio)
}

/// Single greedy pass over `captions`:
///
/// * a silence gap longer than the threshold closes the current accumulator,
///   which is kept only if it reaches the minimum duration;
/// * otherwise the caption is merged if the result stays within the maximum
///   duration;
/// * otherwise the accumulator is flushed as is, even when it is shorter than
///   the minimum, and the caption starts a new one.
///
/// The trailing accumulator is kept only if it reaches the minimum duration.
/// Captions are trusted to be sorted by start time.
pub fn window_with_stats(
    captions: &[Caption],
    config: &WindowConfig,
    base_name: &str,
    source: Source,
) -> Result<(Audio, WindowStats), SplitError> {
    if captions.is_empty() {
        return Err(SplitError::EmptyInput);
    }

    let mut windower = Windower::new(config, base_name, source);
    let mut current: Option<Accumulator> = None;
    for caption in captions {
        if !config.admits(caption) {
            windower.stats.dropped_captions += 1;
            continue;
        }
        current = Some(match current.take() {
            None => Accumulator::open(caption),
            Some(acc) => windower.step(acc, caption),
        });
    }
    Ok(windower.finish(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: f64, max: f64, threshold: f64) -> WindowConfig {
        WindowConfig::new(min, max, threshold).unwrap()
    }

    fn durations(audio: &Audio) -> Vec<f64> {
        audio
            .segments()
            .iter()
            .map(|s| s.duration().as_secs_f64())
            .collect()
    }

    fn texts(audio: &Audio) -> Vec<&str> {
        audio.segments().iter().map(|s| s.text.as_str()).collect()
    }

    /// Six groups separated by silences longer than two seconds, with one
    /// isolated short caption that must be dropped.
    fn grouped_captions() -> Vec<Caption> {
        vec![
            Caption::from_secs(0.0, 3.0, "1"),
            Caption::from_secs(3.0, 6.0, "2"),
            Caption::from_secs(6.0, 8.0, "3"),
            Caption::from_secs(13.0, 19.0, "4"),
            Caption::from_secs(19.0, 24.0, "5"),
            Caption::from_secs(26.5, 27.5, "stray"),
            Caption::from_secs(30.0, 32.0, "6"),
            Caption::from_secs(32.0, 35.0, "7"),
            Caption::from_secs(35.0, 37.0, "8"),
            Caption::from_secs(37.0, 40.0, "9"),
            Caption::from_secs(40.0, 42.0, "10"),
            Caption::from_secs(50.0, 53.0, "11"),
            Caption::from_secs(53.0, 56.0, "12"),
            Caption::from_secs(56.0, 58.0, "13"),
            Caption::from_secs(58.0, 61.0, "14"),
            Caption::from_secs(70.0, 72.0, "15"),
            Caption::from_secs(72.0, 75.0, "16"),
            Caption::from_secs(75.0, 77.0, "17"),
            Caption::from_secs(77.0, 80.0, "18"),
            Caption::from_secs(90.0, 94.0, "19"),
            Caption::from_secs(94.0, 98.0, "20"),
        ]
    }

    #[test]
    fn test_grouped_scenario() {
        let (audio, stats) =
            window_with_stats(&grouped_captions(), &config(8.0, 12.0, 2.0), "test", Source::Masc)
                .unwrap();

        assert_eq!(durations(&audio), vec![8.0, 11.0, 12.0, 11.0, 10.0, 8.0]);
        assert_eq!(
            texts(&audio),
            vec!["1 2 3", "4 5", "6 7 8 9 10", "11 12 13 14", "15 16 17 18", "19 20"]
        );
        assert_eq!(audio.filename(), "test");
        assert_eq!(audio.duration(), Duration::from_secs(60));
        assert_eq!(stats.segments, 6);
        assert_eq!(stats.discarded_short, 1);
        assert_eq!(stats.overflow_flushes, 0);
        assert!(audio.segments().iter().all(|s| s.source == Source::Masc));
    }

    #[test]
    fn test_ordinals_are_dense() {
        let audio =
            window(&grouped_captions(), &config(8.0, 12.0, 2.0), "talk", Source::Sada).unwrap();

        let names: Vec<&str> = audio.segments().iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["talk_0", "talk_1", "talk_2", "talk_3", "talk_4", "talk_5"]
        );
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let result = window(&[], &config(1.0, 2.0, 0.5), "x", Source::Masc);
        assert!(matches!(result, Err(SplitError::EmptyInput)));
    }

    #[test]
    fn test_trailing_short_run_is_discarded() {
        let captions = vec![
            Caption::from_secs(0.0, 4.0, "a"),
            Caption::from_secs(4.0, 8.0, "b"),
            Caption::from_secs(20.0, 21.0, "c"),
            Caption::from_secs(21.0, 22.0, "d"),
        ];

        let (audio, stats) =
            window_with_stats(&captions, &config(6.0, 10.0, 2.0), "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["a b"]);
        assert_eq!(stats.discarded_short, 1);
    }

    #[test]
    fn test_single_short_caption_yields_nothing() {
        let captions = vec![Caption::from_secs(0.0, 1.0, "tiny")];

        let audio = window(&captions, &config(6.0, 10.0, 2.0), "f", Source::Masc).unwrap();

        assert!(audio.segments().is_empty());
        assert_eq!(audio.duration(), Duration::ZERO);
    }

    #[test]
    fn test_overflow_flush_skips_min_filter() {
        // "a" is only 2s long but gets flushed because "b" does not fit.
        let captions = vec![
            Caption::from_secs(0.0, 2.0, "a"),
            Caption::from_secs(2.5, 11.5, "b"),
        ];

        let (audio, stats) =
            window_with_stats(&captions, &config(6.0, 10.0, 2.0), "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["a", "b"]);
        assert_eq!(durations(&audio), vec![2.0, 9.0]);
        assert_eq!(audio.segments()[0].cause, FlushCause::Overflow);
        assert_eq!(audio.segments()[1].cause, FlushCause::EndOfStream);
        assert_eq!(stats.overflow_flushes, 1);
    }

    #[test]
    fn test_merge_accounts_for_bridged_silence() {
        // 4s + 1.5s gap + 4.5s = 10s fits; one more second does not.
        let captions = vec![
            Caption::from_secs(0.0, 4.0, "a"),
            Caption::from_secs(5.5, 10.0, "b"),
            Caption::from_secs(10.0, 11.0, "c"),
        ];

        let audio = window(&captions, &config(1.0, 10.0, 2.0), "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["a b", "c"]);
        assert_eq!(durations(&audio), vec![10.0, 1.0]);
    }

    #[test]
    fn test_gap_equal_to_threshold_is_bridged() {
        let captions = vec![
            Caption::from_secs(0.0, 3.0, "a"),
            Caption::from_secs(5.0, 8.0, "b"),
        ];

        let audio = window(&captions, &config(1.0, 10.0, 2.0), "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["a b"]);
    }

    #[test]
    fn test_oversized_caption_is_kept_alone() {
        let captions = vec![
            Caption::from_secs(0.0, 7.0, "before"),
            Caption::from_secs(7.0, 27.0, "long"),
            Caption::from_secs(27.0, 34.0, "after"),
        ];

        let audio = window(&captions, &config(6.0, 16.0, 2.0), "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["before", "long", "after"]);
        assert_eq!(durations(&audio), vec![7.0, 20.0, 7.0]);
        assert_eq!(audio.segments()[1].cause, FlushCause::Overflow);
    }

    #[test]
    fn test_oversized_caption_can_be_dropped() {
        let captions = vec![
            Caption::from_secs(0.0, 7.0, "before"),
            Caption::from_secs(7.0, 27.0, "long"),
            Caption::from_secs(27.0, 34.0, "after"),
        ];
        let config = config(6.0, 16.0, 2.0).with_oversize(OversizePolicy::Drop);

        let (audio, stats) = window_with_stats(&captions, &config, "f", Source::Masc).unwrap();

        // Dropping "long" leaves a 20s hole, so "before" closes on the gap.
        assert_eq!(texts(&audio), vec!["before", "after"]);
        assert_eq!(audio.segments()[0].cause, FlushCause::Gap);
        assert_eq!(stats.dropped_captions, 1);
        assert!(audio
            .range_violations(config.min_duration(), config.max_duration())
            .is_empty());
    }

    #[test]
    fn test_caption_floor_skips_noise() {
        let captions = vec![
            Caption::from_secs(0.0, 3.0, "a"),
            Caption::from_secs(3.0, 3.5, "uh"),
            Caption::from_secs(3.5, 7.0, "b"),
        ];
        let config = config(6.0, 16.0, 2.0).with_caption_floor(Duration::from_millis(750));

        let (audio, stats) = window_with_stats(&captions, &config, "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["a b"]);
        assert_eq!(stats.dropped_captions, 1);
    }

    #[test]
    fn test_every_caption_dropped_yields_empty_audio() {
        let captions = vec![Caption::from_secs(0.0, 30.0, "long")];
        let config = config(6.0, 16.0, 2.0).with_oversize(OversizePolicy::Drop);

        let audio = window(&captions, &config, "f", Source::Masc).unwrap();

        assert!(audio.segments().is_empty());
    }

    #[test]
    fn test_inverted_caption_does_not_panic() {
        let captions = vec![
            Caption::from_secs(0.0, 8.0, "a"),
            Caption::from_secs(9.0, 5.0, "broken"),
        ];

        let audio = window(&captions, &config(6.0, 16.0, 2.0), "f", Source::Masc).unwrap();

        assert_eq!(texts(&audio), vec!["a broken"]);
        assert_eq!(durations(&audio), vec![8.0]);
    }

    #[test]
    fn test_rerun_is_identical() {
        let captions = grouped_captions();
        let config = config(8.0, 12.0, 2.0);

        let first = window(&captions, &config, "test", Source::Masc).unwrap();
        let second = window(&captions, &config, "test", Source::Masc).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_range_invariant_on_dense_stream() {
        // 40 back-to-back captions of varying length.
        let mut captions = Vec::new();
        let mut t = 0.0;
        for i in 0..40 {
            let len = 0.5 + (i % 7) as f64;
            captions.push(Caption::from_secs(t, t + len, i.to_string()));
            t += len + if i % 9 == 8 { 3.0 } else { 0.2 };
        }
        let config = config(4.0, 9.0, 1.0);

        let audio = window(&captions, &config, "dense", Source::Masc).unwrap();

        assert!(!audio.segments().is_empty());
        for segment in audio.segments() {
            assert!(segment.duration() <= config.max_duration());
            if segment.cause != FlushCause::Overflow {
                assert!(segment.duration() >= config.min_duration());
            }
        }
        let joined: Vec<&str> = audio
            .segments()
            .iter()
            .flat_map(|s| s.text.split(' '))
            .collect();
        let mut sorted: Vec<usize> = joined.iter().map(|t| t.parse().unwrap()).collect();
        let original = sorted.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, original, "text order must follow caption order");
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            WindowConfig::new(10.0, 5.0, 1.0),
            Err(SplitError::InvalidConfig(_))
        ));
        assert!(WindowConfig::new(-1.0, 5.0, 1.0).is_err());
        assert!(WindowConfig::new(1.0, 5.0, f64::NAN).is_err());
        assert!(WindowConfig::new(5.0, 5.0, 0.0).is_ok());
    }

    #[test]
    fn test_out_of_range_seconds_are_rejected() {
        assert!(matches!(
            WindowConfig::new(1.0, 1e20, 2.0),
            Err(SplitError::InvalidConfig(_))
        ));
        assert!(matches!(
            WindowConfig::new(1.0, 16.0, f64::INFINITY),
            Err(SplitError::InvalidConfig(_))
        ));
    }
}
