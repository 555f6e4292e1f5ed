use crate::audio::{Audio, SegmentRow};

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    New,
    AlreadyPresent,
}

/// Destination for finished [`Audio`] records. Inserting a filename that is
/// already stored is a no-op, so a batch can be re-run safely.
pub trait AudioStore {
    fn insert(&mut self, audio: &Audio) -> Result<Inserted>;
}

#[derive(Deserialize)]
struct StoredKey {
    filename: String,
}

/// Append-only store keeping one JSON object per line.
pub struct JsonLinesStore {
    path: PathBuf,
    known: HashSet<String>,
    writer: BufWriter<File>,
}

impl JsonLinesStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut known = HashSet::new();
        if path.exists() {
            let contents = std::fs::read(&path)
                .with_context(|| format!("Failed to open store: '{}'", path.display()))?;
            let complete = complete_len(&contents);
            if complete < contents.len() {
                warn!(
                    store = %path.display(),
                    bytes = contents.len() - complete,
                    "discarding unterminated record left by an interrupted write"
                );
                OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .and_then(|file| file.set_len(complete as u64))
                    .with_context(|| format!("Failed to repair store: '{}'", path.display()))?;
            }
            let contents = std::str::from_utf8(&contents[..complete])
                .with_context(|| format!("Store is not valid UTF-8: '{}'", path.display()))?;
            for (idx, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let key: StoredKey = serde_json::from_str(line).with_context(|| {
                    format!("Corrupt record on line {} of '{}'", idx + 1, path.display())
                })?;
                known.insert(key.filename);
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open store for writing: '{}'", path.display()))?;
        Ok(Self {
            path,
            known,
            writer: BufWriter::new(file),
        })
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.known.contains(filename)
    }
}

impl AudioStore for JsonLinesStore {
    fn insert(&mut self, audio: &Audio) -> Result<Inserted> {
        if self.known.contains(audio.filename()) {
            debug!(audio = audio.filename(), "already stored, skipping");
            return Ok(Inserted::AlreadyPresent);
        }
        serde_json::to_writer(&mut self.writer, audio)
            .with_context(|| format!("Failed to serialise '{}'", audio.filename()))?;
        writeln!(self.writer)?;
        // Flush per record so an interrupted batch keeps what it wrote.
        self.writer
            .flush()
            .with_context(|| format!("Failed to write to store: '{}'", self.path.display()))?;
        self.known.insert(audio.filename().to_string());
        Ok(Inserted::New)
    }
}

/// Length of `contents` up to and including its last newline. Records are
/// always newline terminated, so anything after it is a partial append.
fn complete_len(contents: &[u8]) -> usize {
    contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |idx| idx + 1)
}

/// Writes segment rows as JSON lines to `output`.
pub fn serialise_manifest<P: AsRef<Path>>(rows: &[SegmentRow], output: P) -> Result<()> {
    let file = File::create(output).context("Failed to create manifest file!")?;
    let mut writer = BufWriter::new(file);
    write_rows(&mut writer, rows).context("Failed to write to manifest file.")?;
    writer.flush().context("Failed to write to manifest file.")?;
    Ok(())
}

pub fn write_rows<W: Write>(buf: &mut W, rows: &[SegmentRow]) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *buf, row)?;
        writeln!(buf)?;
    }
    Ok(())
}
