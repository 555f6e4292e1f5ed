use subsplit::audio::{base_name, Audio, SegmentRow, Source};
use subsplit::batch::{self, BatchOptions};
use subsplit::clean::{ArabicLetters, PatternCleaner, TextCleaner};
use subsplit::config::Settings;
use subsplit::parser::{CaptionSource, SubtitleFiles};
use subsplit::sada::{self, Environment};
use subsplit::slicer::{self, WavSlicer};
use subsplit::store::{self, AudioStore, Inserted, JsonLinesStore};
use subsplit::window::{window_with_stats, OversizePolicy};

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();
    match run() {
        Ok(()) => (),
        Err(err) => {
            eprintln!("An error occurred: {}", err);
            for cause in err.chain().skip(1) {
                eprintln!("    {}", cause);
            }
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[derive(Parser)]
#[command(name = "subsplit")]
#[command(about = "Cut subtitle captions into bounded audio segments for speech training")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a single subtitle file and print the result as JSON.
    Split {
        #[arg(value_name = "FILE")]
        input: PathBuf,
        #[arg(
            short,
            long,
            value_name = "FILE",
            help = "The file to write to. If not supplied, the JSON will be written to standard output.",
            default_value = "-"
        )]
        output: String,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        clean: CleanArgs,
    },
    /// Split every subtitle file in a directory.
    Batch {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, default_value_t = 1, help = "Number of files processed concurrently.")]
        workers: usize,
        #[arg(long, help = "Stop after this many subtitle files.")]
        limit: Option<usize>,
        #[arg(long, value_name = "FILE", help = "Append audio records to this JSON lines store.")]
        store: Option<PathBuf>,
        #[arg(long, value_name = "FILE", help = "Write one JSON line per segment to this file.")]
        manifest: Option<PathBuf>,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        clean: CleanArgs,
    },
    /// Split a subtitle file and cut the matching WAV recording into segments.
    Export {
        #[arg(value_name = "SUBTITLE")]
        subtitle: PathBuf,
        #[arg(value_name = "WAV")]
        audio: PathBuf,
        #[arg(value_name = "OUT_DIR")]
        out_dir: PathBuf,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Turn a pre-segmented SADA CSV table into segment rows.
    Sada {
        #[arg(value_name = "CSV")]
        table: PathBuf,
        #[arg(
            short,
            long,
            value_name = "FILE",
            help = "The file to write to. If not supplied, the rows will be written to standard output.",
            default_value = "-"
        )]
        output: String,
        #[arg(
            long,
            default_value = "clean",
            help = "Recording environment to keep (clean, noise, music or car)."
        )]
        environment: Environment,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        clean: CleanArgs,
    },
}

#[derive(Args)]
struct WindowArgs {
    #[arg(long, value_name = "FILE", help = "JSON file with splitting settings.")]
    settings: Option<PathBuf>,
    #[arg(long, value_name = "SECONDS", help = "Minimum segment duration.")]
    min: Option<f64>,
    #[arg(long, value_name = "SECONDS", help = "Maximum segment duration.")]
    max: Option<f64>,
    #[arg(long, value_name = "SECONDS", help = "Longest silence bridged inside a segment.")]
    threshold: Option<f64>,
    #[arg(long, help = "Dataset tag stored on every segment (MASC or SADA).")]
    source: Option<Source>,
    #[arg(long, help = "What to do with captions longer than the maximum (keep or drop).")]
    oversize: Option<OversizePolicy>,
}

impl WindowArgs {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.settings.as_deref())?;
        if let Some(min) = self.min {
            settings.min_duration = min;
        }
        if let Some(max) = self.max {
            settings.max_duration = max;
        }
        if let Some(threshold) = self.threshold {
            settings.threshold = threshold;
        }
        if let Some(source) = self.source {
            settings.source = source;
        }
        if let Some(oversize) = self.oversize {
            settings.oversize = oversize;
        }
        // Fail early on a bad combination, before touching any files.
        settings.window_config()?;
        Ok(settings)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CleanMode {
    None,
    Arabic,
}

#[derive(Args)]
struct CleanArgs {
    #[arg(long, value_enum, default_value_t = CleanMode::None, help = "Text cleaning applied to segment text.")]
    clean: CleanMode,
    #[arg(
        long,
        value_name = "FILE",
        help = "Remove matches of the regular expressions in this file from segment text."
    )]
    drop_patterns: Option<PathBuf>,
}

impl CleanArgs {
    fn cleaners(&self) -> Result<Vec<Box<dyn TextCleaner>>> {
        let mut cleaners: Vec<Box<dyn TextCleaner>> = Vec::new();
        if let Some(path) = &self.drop_patterns {
            cleaners.push(Box::new(PatternCleaner::from_file(path)?));
        }
        if self.clean == CleanMode::Arabic {
            cleaners.push(Box::new(ArabicLetters::new()?));
        }
        Ok(cleaners)
    }
}

fn apply_cleaners(audio: Audio, cleaners: &[Box<dyn TextCleaner>]) -> Audio {
    cleaners
        .iter()
        .fold(audio, |audio, cleaner| audio.cleaned(cleaner.as_ref()))
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Split {
            input,
            output,
            window,
            clean,
        } => split(&input, &output, &window, &clean),
        Command::Batch {
            dir,
            workers,
            limit,
            store,
            manifest,
            window,
            clean,
        } => {
            if workers == 0 {
                bail!("--workers must be at least 1");
            }
            let options = BatchOptions { workers, limit };
            run_batch(&dir, &options, store, manifest, &window, &clean)
        }
        Command::Export {
            subtitle,
            audio,
            out_dir,
            window,
        } => export(&subtitle, &audio, &out_dir, &window),
        Command::Sada {
            table,
            output,
            environment,
            window,
            clean,
        } => ingest_sada(&table, &output, environment, &window, &clean),
    }
}

fn split_one(input: &Path, settings: &Settings) -> Result<Audio> {
    let captions = SubtitleFiles.parse(input)?;
    let (audio, stats) = window_with_stats(
        &captions,
        &settings.window_config()?,
        &base_name(input),
        settings.source,
    )
    .with_context(|| format!("Failed to split '{}'", input.display()))?;
    info!(
        file = %input.display(),
        segments = stats.segments,
        discarded = stats.discarded_short,
        dropped_captions = stats.dropped_captions,
        "split subtitle file"
    );
    Ok(audio)
}

fn split(input: &Path, output: &str, window: &WindowArgs, clean: &CleanArgs) -> Result<()> {
    let settings = window.settings()?;
    let audio = apply_cleaners(split_one(input, &settings)?, &clean.cleaners()?);

    if output == "-" {
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &audio)?;
        println!();
    } else {
        let file = std::fs::File::create(output)
            .with_context(|| format!("Failed to create output file: '{}'", output))?;
        serde_json::to_writer_pretty(file, &audio)?;
    }
    Ok(())
}

fn run_batch(
    dir: &Path,
    options: &BatchOptions,
    store_path: Option<PathBuf>,
    manifest: Option<PathBuf>,
    window: &WindowArgs,
    clean: &CleanArgs,
) -> Result<()> {
    let settings = window.settings()?;
    let cleaners = clean.cleaners()?;

    let mut report = batch::run(dir, &settings, options)?;
    report.sort_by_filename();
    let audios: Vec<Audio> = report
        .audios()
        .map(|audio| apply_cleaners(audio.clone(), &cleaners))
        .collect();

    if let Some(path) = store_path {
        let mut store = JsonLinesStore::open(&path)?;
        let mut inserted = 0;
        for audio in audios.iter().filter(|audio| !audio.segments().is_empty()) {
            if store.insert(audio)? == Inserted::New {
                inserted += 1;
            }
        }
        info!(store = %path.display(), inserted, total = store.len(), "stored audio records");
    }

    if let Some(path) = manifest {
        let rows: Vec<_> = audios.iter().flat_map(Audio::rows).collect();
        store::serialise_manifest(&rows, &path)
            .with_context(|| format!("Failed to write manifest: '{}'", path.display()))?;
    }

    for failure in report.failures() {
        eprintln!("Skipped: {}", failure.path().display());
    }
    println!("{}", report.summary());
    Ok(())
}

fn export(subtitle: &Path, wav: &Path, out_dir: &Path, window: &WindowArgs) -> Result<()> {
    let settings = window.settings()?;
    let audio = split_one(subtitle, &settings)?;
    let slicer = WavSlicer::open(wav)?;

    let mut report = slicer::export(&audio, &slicer, out_dir)?;
    for failure in &report.failures {
        eprintln!("{}", failure);
    }
    let mismatches = report.validate(slicer::DURATION_TOLERANCE)?;
    for mismatch in &mismatches {
        eprintln!("Dropped: {}", mismatch);
    }
    println!(
        "Exported {} of {} segments to {} ({} dropped after validation)",
        report.written.len(),
        audio.segments().len(),
        out_dir.display(),
        mismatches.len()
    );
    Ok(())
}

fn ingest_sada(
    table: &Path,
    output: &str,
    environment: Environment,
    window: &WindowArgs,
    clean: &CleanArgs,
) -> Result<()> {
    let settings = window.settings()?;
    let cleaners = clean.cleaners()?;
    let rows: Vec<SegmentRow> = sada::read_table(table, &settings.window_config()?, environment)?
        .rows
        .into_iter()
        .map(|mut row| {
            row.segment_text = cleaners
                .iter()
                .fold(row.segment_text, |text, cleaner| cleaner.clean(&text));
            row
        })
        .collect();

    if output == "-" {
        store::write_rows(&mut io::stdout().lock(), &rows)?;
    } else {
        store::serialise_manifest(&rows, output)
            .with_context(|| format!("Failed to write rows: '{}'", output))?;
    }
    Ok(())
}
