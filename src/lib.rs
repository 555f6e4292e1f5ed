//! Turns timed subtitle captions into bounded, transcribed audio segments
//! for speech model training.

pub mod audio;
pub mod batch;
pub mod caption;
pub mod clean;
pub mod config;
pub mod error;
pub mod parser;
pub mod sada;
pub mod slicer;
pub mod store;
pub mod window;

pub use audio::{total_duration, Audio, FlushCause, Segment, SegmentRow, Source};
pub use caption::Caption;
pub use error::SplitError;
pub use window::{window, window_with_stats, OversizePolicy, WindowConfig, WindowStats};
