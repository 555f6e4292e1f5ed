use crate::audio::{SegmentRow, Source};
use crate::error::SplitError;
use crate::parser::{end_of_file, optional_bom};
use crate::window::WindowConfig;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while};
use nom::character::complete::{char, line_ending};
use nom::combinator::{cut, map, value};
use nom::error::{convert_error, VerboseError};
use nom::multi::{many0, separated_list1};
use nom::sequence::{preceded, terminated};
use nom::{Err, IResult};
use tracing::info;

/// Recording condition column of the segment table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Clean,
    Noise,
    Music,
    Car,
}

impl Environment {
    /// The value used in the table.
    pub fn label(self) -> &'static str {
        match self {
            Environment::Clean => "Clean -- نظيف",
            Environment::Noise => "Noise -- ضوضاء",
            Environment::Music => "Music -- موسيقى",
            Environment::Car => "Car -- سيارة",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Environment::Clean => "clean",
            Environment::Noise => "noise",
            Environment::Music => "music",
            Environment::Car => "car",
        }
    }

    fn matches(self, cell: &str) -> bool {
        let cell = cell.trim();
        cell == self.label() || cell.eq_ignore_ascii_case(self.name())
    }
}

impl FromStr for Environment {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Environment::Clean,
            Environment::Noise,
            Environment::Music,
            Environment::Car,
        ]
        .into_iter()
        .find(|env| env.matches(s))
        .ok_or_else(|| SplitError::InvalidConfig(format!("unknown environment '{}'", s)))
    }
}

/// Rows read from a segment table and why the rest were left out.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SadaTable {
    pub rows: Vec<SegmentRow>,
    pub read: usize,
    pub out_of_range: usize,
    pub other_environment: usize,
    pub missing_text: usize,
}

const FILE_NAME: &str = "FileName";
const START: &str = "SegmentStart";
const END: &str = "SegmentEnd";
const LENGTH: &str = "SegmentLength";
const ENVIRONMENT: &str = "Environment";
const TEXT: &str = "ProcessedText";

struct Columns {
    file_name: usize,
    start: usize,
    end: usize,
    length: usize,
    environment: usize,
    text: usize,
    width: usize,
}

impl Columns {
    fn find(header: &[String]) -> Result<Self, SplitError> {
        let position = |name: &str| {
            header
                .iter()
                .position(|column| column.trim() == name)
                .ok_or_else(|| SplitError::ParseError(format!("missing column '{}'", name)))
        };
        Ok(Self {
            file_name: position(FILE_NAME)?,
            start: position(START)?,
            end: position(END)?,
            length: position(LENGTH)?,
            environment: position(ENVIRONMENT)?,
            text: position(TEXT)?,
            width: header.len(),
        })
    }
}

fn number(record: &[String], idx: usize, column: &str, line: usize) -> Result<f64, SplitError> {
    let cell = record[idx].trim();
    cell.parse().map_err(|_| {
        SplitError::ParseError(format!("line {}: invalid {} '{}'", line, column, cell))
    })
}

/// Reads the segment table at `path`. See [`ingest`].
pub fn read_table<P: AsRef<Path>>(
    path: P,
    config: &WindowConfig,
    environment: Environment,
) -> anyhow::Result<SadaTable> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open segment table: '{}'", path.display()))?;
    let table = ingest(&data, config, environment)
        .with_context(|| format!("Failed to read segment table: '{}'", path.display()))?;
    info!(
        table = %path.display(),
        read = table.read,
        kept = table.rows.len(),
        out_of_range = table.out_of_range,
        other_environment = table.other_environment,
        missing_text = table.missing_text,
        "read segment table"
    );
    Ok(table)
}

/// Turns a pre-segmented CSV table into segment rows. Rows recorded in another
/// environment, without text or with a length outside the configured range are
/// skipped. Kept rows are numbered in order, giving `{stem}_{n}` filenames.
pub fn ingest(
    input: &str,
    config: &WindowConfig,
    environment: Environment,
) -> Result<SadaTable, SplitError> {
    let mut records = parse_csv(input)?.into_iter();
    let header = records.next().ok_or(SplitError::EmptyInput)?;
    let columns = Columns::find(&header)?;
    let min = config.min_duration().as_secs_f64();
    let max = config.max_duration().as_secs_f64();

    let mut table = SadaTable::default();
    for (idx, record) in records.enumerate() {
        // Header is line 1.
        let line = idx + 2;
        if record.len() != columns.width {
            return Err(SplitError::ParseError(format!(
                "line {}: expected {} fields, found {}",
                line,
                columns.width,
                record.len()
            )));
        }
        table.read += 1;

        if !environment.matches(&record[columns.environment]) {
            table.other_environment += 1;
            continue;
        }
        let length = number(&record, columns.length, LENGTH, line)?;
        if !(min <= length && length <= max) {
            table.out_of_range += 1;
            continue;
        }
        let text = record[columns.text].trim();
        if text.is_empty() {
            table.missing_text += 1;
            continue;
        }

        let stem = Path::new(record[columns.file_name].trim())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        table.rows.push(SegmentRow {
            segment_filename: format!("{}_{}", stem, table.rows.len()),
            audio_filename: stem,
            segment_start: number(&record, columns.start, START, line)?,
            segment_end: number(&record, columns.end, END, line)?,
            segment_duration: length,
            segment_text: text.to_string(),
            source: Source::Sada,
        });
    }
    validate_rows(&table.rows, config.min_duration(), config.max_duration())?;
    Ok(table)
}

/// Checks that every row names its files, carries text and lasts between
/// `min` and `max`.
pub fn validate_rows(rows: &[SegmentRow], min: Duration, max: Duration) -> Result<(), SplitError> {
    let (min, max) = (min.as_secs_f64(), max.as_secs_f64());
    for row in rows {
        if row.audio_filename.is_empty() || row.segment_filename.is_empty() {
            return Err(SplitError::InvalidRecord(format!(
                "segment '{}' has no file name",
                row.segment_filename
            )));
        }
        if row.segment_text.is_empty() {
            return Err(SplitError::InvalidRecord(format!(
                "segment '{}' has no text",
                row.segment_filename
            )));
        }
        if !(min <= row.segment_duration && row.segment_duration <= max) {
            return Err(SplitError::InvalidRecord(format!(
                "segment '{}' lasts {}s, outside {}s-{}s",
                row.segment_filename, row.segment_duration, min, max
            )));
        }
    }
    Ok(())
}

// CSV

pub fn parse_csv(input: &str) -> Result<Vec<Vec<String>>, SplitError> {
    match csv_file(input) {
        Ok((_, records)) => Ok(records),
        Err(Err::Error(err)) | Err(Err::Failure(err)) => {
            Err(SplitError::ParseError(convert_error(input, err)))
        }
        Err(Err::Incomplete(_)) => {
            unreachable!("Incomplete data received by non-streaming parser.")
        }
    }
}

fn csv_file(input: &str) -> IResult<&str, Vec<Vec<String>>, VerboseError<&str>> {
    let (mut input, _) = optional_bom(input)?;
    let mut records = Vec::new();
    while !input.is_empty() {
        let (rem_input, record) = csv_record(input)?;
        // Blank lines parse as a single empty field.
        if !(record.len() == 1 && record[0].trim().is_empty()) {
            records.push(record);
        }
        input = rem_input;
    }
    Ok((input, records))
}

fn csv_record(input: &str) -> IResult<&str, Vec<String>, VerboseError<&str>> {
    terminated(
        separated_list1(char(','), csv_field),
        alt((line_ending, end_of_file)),
    )(input)
}

fn csv_field(input: &str) -> IResult<&str, String, VerboseError<&str>> {
    alt((
        quoted_field,
        map(
            take_while(|c: char| c != ',' && c != '\n' && c != '\r'),
            str::to_string,
        ),
    ))(input)
}

fn quoted_field(input: &str) -> IResult<&str, String, VerboseError<&str>> {
    // Once a field opens with a quote it must close with one.
    map(
        preceded(
            char('"'),
            cut(terminated(
                many0(alt((value("\"", tag("\"\"")), is_not("\"")))),
                char('"'),
            )),
        ),
        |parts: Vec<&str>| parts.concat(),
    )(input)
}
