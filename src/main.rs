use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use songbook_extract::config::{load_config, Config};
use songbook_extract::db;
use songbook_extract::models::{RunStats, SongRecord};
use songbook_extract::output::{write_json, write_seed_csv_file, write_song_csv_file};
use songbook_extract::pipeline::{load_metadata_or_empty, Pipeline};
use songbook_extract::progress::{format_duration, init_logging, set_log_only};
use songbook_extract::safety::validate_outputs;

const EXTRACT_JSON: &str = "all_songs.json";
const EXTRACT_CSV: &str = "songs_export.csv";
const EXTRACT_SEED_CSV: &str = "songs_seed.csv";
const RECONCILE_JSON: &str = "songs_with_lyrics.json";
const RECONCILE_CSV: &str = "songs_with_lyrics.csv";

#[derive(Parser, Debug)]
#[command(name = "songbook-extract")]
#[command(about = "Extract songs from page-marked songbook OCR text and reconcile them with a curated song table")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Worker threads for per-book processing (0 = all cores)
    #[arg(long, global = true, default_value = "0")]
    workers: usize,

    /// Hide progress bars; report progress in the log instead
    #[arg(long, global = true)]
    log_only: bool,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect songs directly in the book texts
    Extract(ExtractArgs),

    /// Attach page text to the songs of a curated metadata table
    Reconcile(ReconcileArgs),
}

#[derive(Parser, Debug, Clone)]
struct CommonArgs {
    /// TOML file with the book table and input conventions
    #[arg(long)]
    config: PathBuf,

    /// Directory holding one text file per book
    #[arg(long)]
    input_dir: PathBuf,

    /// Directory for JSON/CSV outputs (created if missing)
    #[arg(long)]
    output_dir: PathBuf,

    /// Also export a SQLite database in the app schema
    #[arg(long)]
    db: Option<PathBuf>,

    /// Write run statistics as JSON
    #[arg(long)]
    stats: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ExtractArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct ReconcileArgs {
    /// Curated metadata table (CSV)
    #[arg(long)]
    metadata: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    set_log_only(cli.log_only);

    if cli.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    match cli.cmd {
        Command::Extract(args) => cmd_extract(args),
        Command::Reconcile(args) => cmd_reconcile(args),
    }
}

/// Load the config; the one condition that stops a run before any book is read.
fn open_pipeline(path: &Path) -> Result<Pipeline> {
    let config = load_config(path).map_err(|e| {
        tracing::error!("{:#}", e);
        e
    })?;
    tracing::info!("Loaded config with {} books", config.books.len());
    Pipeline::new(config)
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))
}

/// Refuse outputs that would overwrite an input.
fn check_outputs(
    common: &CommonArgs,
    outputs: &[PathBuf],
    pipeline: &Pipeline,
    metadata: Option<&Path>,
) -> Result<()> {
    let book_files = pipeline.existing_book_files(&common.input_dir);
    let mut protected: Vec<&Path> = book_files.iter().map(PathBuf::as_path).collect();
    protected.extend(metadata);

    let mut all: Vec<&Path> = outputs.iter().map(PathBuf::as_path).collect();
    all.extend(common.db.as_deref());
    all.extend(common.stats.as_deref());

    validate_outputs(&all, &protected, &common.input_dir, &pipeline.config().input.extension)
}

fn finish_stats(stats: &mut RunStats, start: Instant, path: Option<&Path>) -> Result<()> {
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    stats.log_phase("final");
    if let Some(path) = path {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats: {}", path.display()))?;
    }
    Ok(())
}

fn export_db(path: Option<&Path>, records: &[SongRecord], config: &Config) -> Result<()> {
    if let Some(path) = path {
        let summary = db::export(path, records, config)?;
        tracing::info!(
            "Exported {} songs ({} with lyrics) in {} books to {}",
            summary.songs,
            summary.lyrics,
            summary.books,
            path.display()
        );
    }
    Ok(())
}

fn cmd_extract(args: ExtractArgs) -> Result<()> {
    let common = args.common;
    let start = Instant::now();

    let pipeline = open_pipeline(&common.config)?;
    let json_path = common.output_dir.join(EXTRACT_JSON);
    let csv_path = common.output_dir.join(EXTRACT_CSV);
    let seed_path = common.output_dir.join(EXTRACT_SEED_CSV);
    check_outputs(
        &common,
        &[json_path.clone(), csv_path.clone(), seed_path.clone()],
        &pipeline,
        None,
    )?;
    prepare_output_dir(&common.output_dir)?;

    let mut extraction = pipeline.extract(&common.input_dir);

    write_json(&json_path, &extraction.records)?;
    write_song_csv_file(&csv_path, &extraction.records)?;
    write_seed_csv_file(&seed_path, &extraction.records, &pipeline.config().metadata)?;
    export_db(common.db.as_deref(), &extraction.records, pipeline.config())?;
    finish_stats(&mut extraction.stats, start, common.stats.as_deref())?;

    let stats = &extraction.stats;
    println!("\n{:=<60}", "");
    println!("Extraction complete!");
    println!("  Books processed: {}", stats.books_processed);
    println!("  Books skipped: {}", stats.books_skipped);
    println!(
        "  Songs found: {} (direct: {}, table of contents: {})",
        stats.songs_found(),
        stats.direct_matches,
        stats.toc_matches
    );
    println!("  JSON: {}", json_path.display());
    println!("  CSV: {}", csv_path.display());
    println!("  Seed table: {}", seed_path.display());
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}

fn cmd_reconcile(args: ReconcileArgs) -> Result<()> {
    let common = args.common;
    let start = Instant::now();

    let pipeline = open_pipeline(&common.config)?;
    let json_path = common.output_dir.join(RECONCILE_JSON);
    let csv_path = common.output_dir.join(RECONCILE_CSV);
    check_outputs(
        &common,
        &[json_path.clone(), csv_path.clone()],
        &pipeline,
        Some(args.metadata.as_path()),
    )?;
    prepare_output_dir(&common.output_dir)?;

    let metadata = load_metadata_or_empty(&args.metadata, pipeline.config());
    let mut reconciliation = pipeline.reconcile(&common.input_dir, &metadata);
    let catalog = &reconciliation.catalog;

    write_json(&json_path, catalog.records())?;
    let with_lyrics = write_song_csv_file(&csv_path, catalog.with_lyrics())?;
    export_db(common.db.as_deref(), catalog.records(), pipeline.config())?;
    finish_stats(&mut reconciliation.stats, start, common.stats.as_deref())?;

    let stats = &reconciliation.stats;
    println!("\n{:=<60}", "");
    println!("Reconciliation complete!");
    println!("  Books processed: {}", stats.books_processed);
    println!("  Books skipped: {}", stats.books_skipped);
    println!("  Songs in metadata: {}", stats.total_songs);
    println!("  Songs updated: {}", stats.songs_updated);
    println!("  Songs with lyrics: {}", with_lyrics);
    println!("  JSON: {}", json_path.display());
    println!("  CSV: {}", csv_path.display());
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
