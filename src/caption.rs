use std::time::Duration;

/// A single timed subtitle cue.
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl Caption {
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Convenience constructor taking times in seconds.
    pub fn from_secs(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self::new(
            Duration::from_secs_f64(start.max(0.0)),
            Duration::from_secs_f64(end.max(0.0)),
            text,
        )
    }

    // Inverted timing saturates to zero instead of panicking.
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}
