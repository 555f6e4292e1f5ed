use crate::caption::Caption;
use crate::error::SplitError;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use nom::bytes::complete::{tag, take_while1, take_while_m_n};
use nom::character::complete::{
    digit1, line_ending, multispace0, multispace1, not_line_ending, space0, space1,
};
use nom::combinator::{map, map_res, opt, verify};
use nom::error::{convert_error, ErrorKind, VerboseError};
use nom::multi::{many0, many_till};
use nom::sequence::{preceded, terminated};
use nom::{branch::alt, error_position, Err, IResult};

/// Anything that can turn a subtitle file into an ordered caption sequence.
pub trait CaptionSource {
    fn parse(&self, path: &Path) -> anyhow::Result<Vec<Caption>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    WebVtt,
}

impl SubtitleFormat {
    /// Picks the format from the file extension, ignoring case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "srt" => Some(SubtitleFormat::Srt),
            "vtt" => Some(SubtitleFormat::WebVtt),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "SRT",
            SubtitleFormat::WebVtt => "WebVTT",
        }
    }
}

/// Reads subtitle files from the local filesystem, dispatching on extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubtitleFiles;

impl CaptionSource for SubtitleFiles {
    fn parse(&self, path: &Path) -> anyhow::Result<Vec<Caption>> {
        let format = SubtitleFormat::from_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            SplitError::UnsupportedFormat(ext)
        })?;
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open subtitle file: '{}'", path.display()))?;
        parse_str(format, &data)
            .with_context(|| format!("Failed to parse {} file: '{}'", format.name(), path.display()))
    }
}

pub fn parse_str(format: SubtitleFormat, input: &str) -> Result<Vec<Caption>, SplitError> {
    let result = match format {
        SubtitleFormat::Srt => srt_file(input),
        SubtitleFormat::WebVtt => vtt_file(input),
    };
    match result {
        Ok((_, captions)) => Ok(captions),
        Err(Err::Error(err)) | Err(Err::Failure(err)) => {
            Err(SplitError::ParseError(convert_error(input, err)))
        }
        Err(Err::Incomplete(_)) => {
            unreachable!("Incomplete data received by non-streaming parser.")
        }
    }
}

pub(crate) fn optional_bom(input: &str) -> IResult<&str, Option<&str>, VerboseError<&str>> {
    opt(tag("\u{FEFF}"))(input)
}

pub(crate) fn end_of_file(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    if input.is_empty() {
        Ok((input, input))
    } else {
        std::result::Result::Err(Err::Error(error_position!(input, ErrorKind::Eof)))
    }
}

fn text_line(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    terminated(
        take_while1(|c: char| c != '\n' && c != '\r'),
        alt((line_ending, end_of_file)),
    )(input)
}

fn join_lines(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// SRT

fn srt_file(input: &str) -> IResult<&str, Vec<Caption>, VerboseError<&str>> {
    let (input, _) = optional_bom(input)?;
    let (input, mut captions) = all_subtitles(input)?;
    let (input, _) = end_of_file(input)?;
    captions.sort_by_key(|c| c.start);
    Ok((input, captions))
}

fn all_subtitles(input: &str) -> IResult<&str, Vec<Caption>, VerboseError<&str>> {
    let mut parsed = Vec::new();
    let mut input = input;
    loop {
        match subtitle(input) {
            Ok((rem_input, caption)) => {
                parsed.push(caption);
                let (rem_input, _) = multispace0(rem_input)?;
                input = rem_input;
            }
            Err(err) => {
                if input.is_empty() {
                    return Ok((input, parsed));
                } else {
                    return Err(err);
                }
            }
        }
    }
}

fn subtitle(input: &str) -> IResult<&str, Caption, VerboseError<&str>> {
    let (input, _) = multispace0(input)?;
    let (input, _) = terminated(seq_num, multispace1)(input)?;
    let (input, (start, end)) = terminated(srt_timing, line_ending)(input)?;
    let (input, text) = sub_text(input)?;

    Ok((input, Caption::new(start, end, join_lines(&text))))
}

fn sub_text(input: &str) -> IResult<&str, Vec<&str>, VerboseError<&str>> {
    let (input, (lines, _)) = many_till(text_line, alt((line_ending, end_of_file)))(input)?;
    Ok((input, lines))
}

fn srt_timing(input: &str) -> IResult<&str, (Duration, Duration), VerboseError<&str>> {
    let (input, start) = srt_timestamp(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("-->")(input)?;
    let (input, _) = space1(input)?;
    let (input, end) = srt_timestamp(input)?;
    let (input, _) = space0(input)?;

    Ok((input, (start, end)))
}

fn srt_timestamp(input: &str) -> IResult<&str, Duration, VerboseError<&str>> {
    let (input, hours) = hms_field(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, minutes) = hms_field(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, seconds) = hms_field(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, millis) = millis_field(input)?;

    Ok((input, clock(hours, minutes, seconds, millis)))
}

fn seq_num(input: &str) -> IResult<&str, usize, VerboseError<&str>> {
    map_res(digit1, |s: &str| s.parse())(input)
}

// WebVTT

fn vtt_file(input: &str) -> IResult<&str, Vec<Caption>, VerboseError<&str>> {
    let (input, _) = optional_bom(input)?;
    let (input, _) = tag("WEBVTT")(input)?;
    let (input, _) = not_line_ending(input)?;
    let (input, _) = alt((line_ending, end_of_file))(input)?;
    // Header metadata runs until the first blank line.
    let (input, _) = many0(text_line)(input)?;
    let (input, mut captions) = vtt_blocks(input)?;
    let (input, _) = end_of_file(input)?;
    captions.sort_by_key(|c| c.start);
    Ok((input, captions))
}

fn vtt_blocks(input: &str) -> IResult<&str, Vec<Caption>, VerboseError<&str>> {
    let mut parsed = Vec::new();
    let mut input = input;
    loop {
        let (rem_input, _) = multispace0(input)?;
        if rem_input.is_empty() {
            return Ok((rem_input, parsed));
        }
        let (rem_input, block) = vtt_block(rem_input)?;
        if let Some(caption) = block {
            parsed.push(caption);
        }
        input = rem_input;
    }
}

fn vtt_block(input: &str) -> IResult<&str, Option<Caption>, VerboseError<&str>> {
    alt((map(metadata_block, |_| None), map(cue, Some)))(input)
}

fn metadata_block(input: &str) -> IResult<&str, Vec<&str>, VerboseError<&str>> {
    let (input, _) = alt((tag("NOTE"), tag("STYLE"), tag("REGION")))(input)?;
    let (input, _) = not_line_ending(input)?;
    let (input, _) = alt((line_ending, end_of_file))(input)?;
    many0(text_line)(input)
}

fn cue(input: &str) -> IResult<&str, Caption, VerboseError<&str>> {
    let (input, _) = opt(cue_identifier)(input)?;
    let (input, (start, end)) = terminated(vtt_timing, alt((line_ending, end_of_file)))(input)?;
    let (input, text) = many0(text_line)(input)?;

    Ok((input, Caption::new(start, end, join_lines(&text))))
}

fn cue_identifier(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    verify(
        terminated(take_while1(|c: char| c != '\n' && c != '\r'), line_ending),
        |line: &str| !line.contains("-->"),
    )(input)
}

fn vtt_timing(input: &str) -> IResult<&str, (Duration, Duration), VerboseError<&str>> {
    let (input, start) = vtt_timestamp(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("-->")(input)?;
    let (input, _) = space1(input)?;
    let (input, end) = vtt_timestamp(input)?;
    // Cue settings (position, align, ...) carry no timing information.
    let (input, _) = not_line_ending(input)?;

    Ok((input, (start, end)))
}

fn vtt_timestamp(input: &str) -> IResult<&str, Duration, VerboseError<&str>> {
    let (input, first) = hms_field(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, second) = hms_field(input)?;
    let (input, third) = opt(preceded(tag(":"), hms_field))(input)?;
    let (input, _) = tag(".")(input)?;
    let (input, millis) = millis_field(input)?;

    let (hours, minutes, seconds) = match third {
        Some(seconds) => (first, second, seconds),
        None => (0, first, second),
    };
    Ok((input, clock(hours, minutes, seconds, millis)))
}

// Shared timestamp fields

fn clock(hours: u64, minutes: u64, seconds: u64, millis: u64) -> Duration {
    Duration::from_millis(millis + seconds * 1000 + minutes * 60 * 1000 + hours * 60 * 60 * 1000)
}

fn millis_field(input: &str) -> IResult<&str, u64, VerboseError<&str>> {
    const MILLIS_MIN: usize = 0;
    const MILLIS_MAX: usize = 3;
    map_res(
        take_while_m_n(MILLIS_MIN, MILLIS_MAX, |c: char| c.is_ascii_digit()),
        |s: &str| {
            if s.len() < MILLIS_MAX {
                // A value like `,2` is not valid, but shows up in the wild.
                // Right-pad it so it reads as `,200`.
                format!("{:0<3}", s).parse()
            } else {
                s.parse()
            }
        },
    )(input)
}

fn hms_field(input: &str) -> IResult<&str, u64, VerboseError<&str>> {
    const HMS_MIN: usize = 0;
    const HMS_MAX: usize = 2;
    map_res(
        take_while_m_n(HMS_MIN, HMS_MAX, |c: char| c.is_ascii_digit()),
        |s: &str| {
            if s.len() < HMS_MAX {
                // Left-pad here: 1:13:45 means 01:13:45, not 10:13:45.
                format!("{:0>2}", s).parse()
            } else {
                s.parse()
            }
        },
    )(input)
}
