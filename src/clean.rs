use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

/// Post-processing applied to segment text after windowing.
pub trait TextCleaner {
    fn clean(&self, text: &str) -> String;
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes alef variants to a bare alef and keeps only Arabic letters.
pub struct ArabicLetters {
    alef: Regex,
    non_letters: Regex,
}

impl ArabicLetters {
    pub fn new() -> Result<Self> {
        Ok(Self {
            alef: Regex::new("[\u{0622}\u{0623}\u{0625}\u{0671}]")?,
            // Hamza through yeh, minus the tatweel and the non-letter block.
            non_letters: Regex::new("[^\u{0621}-\u{063A}\u{0641}-\u{064A}\\s]+")?,
        })
    }
}

impl TextCleaner for ArabicLetters {
    fn clean(&self, text: &str) -> String {
        let text = self.alef.replace_all(text, "\u{0627}");
        let text = self.non_letters.replace_all(&text, "");
        collapse_whitespace(&text)
    }
}

/// Removes every match of a list of user supplied patterns.
pub struct PatternCleaner {
    patterns: Vec<Regex>,
}

impl PatternCleaner {
    /// Reads one pattern per line. Blank lines and `#` comments are ignored.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let patterns = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern file: '{}'", path.display()))?;
        Self::from_patterns(
            patterns
                .lines()
                .map(|p| p.trim_start())
                .filter(|p| !p.is_empty() && !p.starts_with('#')),
        )
    }

    pub fn from_patterns<'a, I: IntoIterator<Item = &'a str>>(patterns: I) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid regex: '{}'", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl TextCleaner for PatternCleaner {
    fn clean(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for regex in &self.patterns {
            if regex.is_match(&cleaned) {
                debug!("Matched \"{}\" against /{}/", cleaned, regex);
                cleaned = regex.replace_all(&cleaned, "").into_owned();
            }
        }
        collapse_whitespace(&cleaned)
    }
}
