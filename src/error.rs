use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum SplitError {
    EmptyInput,
    ParseError(String),
    UnsupportedFormat(String),
    InvalidConfig(String),
    InvalidRecord(String),
    SliceExport { segment: String, reason: String },
}

impl Error for SplitError {}

impl fmt::Display for SplitError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SplitError::EmptyInput => write!(fmt, "No captions to split"),
            SplitError::ParseError(msg) => write!(fmt, "{}", msg),
            SplitError::UnsupportedFormat(ext) => {
                write!(fmt, "Unsupported subtitle format: '{}'", ext)
            }
            SplitError::InvalidConfig(msg) => write!(fmt, "Invalid configuration: {}", msg),
            SplitError::InvalidRecord(msg) => write!(fmt, "Invalid segment record: {}", msg),
            SplitError::SliceExport { segment, reason } => {
                write!(fmt, "Failed to export segment '{}': {}", segment, reason)
            }
        }
    }
}
