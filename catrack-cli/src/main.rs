//! catrack CLI - Command-line interface for slice reconstruction.
//!
//! Reconstructs JSON events, generates synthetic events and benchmarks the
//! execution modes.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use catrack_algorithms::{summarize, LockstepBackend, Tracker};
use catrack_core::{
    EventInput, EventStatistics, ExecutionMode, Hit, SliceGeometry, SliceInput, SliceOutput,
    TrackerConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] catrack_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),
}

/// Execution mode selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Single thread, inline scheduler
    Sequential,
    /// Rayon workers
    Parallel,
}

impl Mode {
    fn execution(self, workers: usize) -> ExecutionMode {
        match self {
            Self::Sequential => ExecutionMode::Sequential,
            Self::Parallel => ExecutionMode::Parallel { workers },
        }
    }
}

/// Accelerator backend selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// CPU pipeline only
    None,
    /// Host-side lockstep emulation with CPU fallback
    Lockstep,
}

/// Cellular-automaton track reconstruction.
#[derive(Parser)]
#[command(name = "catrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct tracks from a JSON event
    Reconstruct {
        /// Input event (JSON)
        input: PathBuf,

        /// Output file (JSON); stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tracker configuration (JSON); defaults if omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Execution mode (overrides the configuration file)
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,

        /// Worker threads in parallel mode (0 = all cores)
        #[arg(short, long, default_value = "0")]
        workers: usize,

        /// Accelerator backend
        #[arg(short, long, value_enum, default_value = "none")]
        backend: Backend,

        /// Lanes per block of the lockstep backend
        #[arg(long, default_value = "32")]
        lanes: usize,
    },

    /// Show information about a JSON event
    Info {
        /// Input event (JSON)
        input: PathBuf,
    },

    /// Generate a synthetic event
    Generate {
        /// Output file (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Number of slices
        #[arg(long, default_value = "4")]
        slices: u32,

        /// Rows per slice
        #[arg(long, default_value = "64")]
        rows: u16,

        /// Straight tracks per slice
        #[arg(long, default_value = "200")]
        tracks: usize,

        /// Noise hits per slice
        #[arg(long, default_value = "500")]
        noise: usize,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Benchmark execution modes on a JSON event
    Benchmark {
        /// Input event (JSON)
        input: PathBuf,

        /// Number of iterations
        #[arg(short, long, default_value = "3")]
        iterations: usize,

        /// Row-block size
        #[arg(long, default_value = "16")]
        row_block_size: usize,
    },
}

/// One slice of the JSON report.
#[derive(Serialize)]
#[serde(untagged)]
enum SliceReport<'a> {
    Reconstructed(&'a SliceOutput),
    Failed { slice: u32, error: String },
}

/// JSON report of a reconstructed event.
#[derive(Serialize)]
struct EventReport<'a> {
    slices: Vec<SliceReport<'a>>,
    statistics: EventStatistics,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Synthetic slice: straight tracks with small jitter plus uniform noise.
fn generate_slice(rng: &mut StdRng, slice: u32, rows: u16, tracks: usize, noise: usize) -> SliceInput {
    let geometry = SliceGeometry::uniform(usize::from(rows), 80.0, 1.0);
    let mut hits = Vec::with_capacity(tracks * usize::from(rows) + noise);
    let mut id = 0u32;

    for _ in 0..tracks {
        let first = rng.gen_range(0..rows.saturating_sub(3).max(1));
        let last = rng.gen_range(first + 2..rows);
        let (y0, z0) = (rng.gen_range(-40.0f32..40.0), rng.gen_range(-40.0f32..40.0));
        let (ty, tz) = (rng.gen_range(-0.4f32..0.4), rng.gen_range(-0.4f32..0.4));
        for row in first..=last {
            let dx = geometry.x(usize::from(row)) - geometry.x(0);
            let y = y0 + ty * dx + rng.gen_range(-0.03f32..0.03);
            let z = z0 + tz * dx + rng.gen_range(-0.03f32..0.03);
            hits.push(Hit::new(id, row, y, z));
            id += 1;
        }
    }
    for _ in 0..noise {
        let row = rng.gen_range(0..rows);
        let (y, z) = (rng.gen_range(-60.0f32..60.0), rng.gen_range(-60.0f32..60.0));
        hits.push(Hit::new(id, row, y, z));
        id += 1;
    }
    SliceInput::new(slice, geometry, hits)
}

/// Timed runs of one execution mode.
struct BenchmarkRun {
    times_ms: Vec<f64>,
    tracks: usize,
    failed_slices: usize,
}

fn benchmark_mode(tracker: &Tracker, slices: &[SliceInput], iterations: usize) -> BenchmarkRun {
    // Warmup
    let warmup = summarize(&tracker.reconstruct_event(slices));
    let mut run = BenchmarkRun {
        times_ms: Vec::with_capacity(iterations),
        tracks: warmup.tracks,
        failed_slices: 0,
    };
    for _ in 0..iterations {
        let start = Instant::now();
        let results = tracker.reconstruct_event(slices);
        run.times_ms.push(start.elapsed().as_secs_f64() * 1000.0);
        run.failed_slices += summarize(&results).failed_slices;
    }
    run
}

fn print_statistics(stats: &EventStatistics) {
    eprintln!(
        "Slices: {} ({} failed, {} fallbacks)",
        stats.slices, stats.failed_slices, stats.fallbacks
    );
    eprintln!("Hits: {}", stats.hits);
    eprintln!("Start hits: {}", stats.start_hits);
    eprintln!("Tracklets: {}", stats.tracklets);
    eprintln!("Tracks: {}", stats.tracks);
    let t = &stats.timings;
    eprintln!(
        "Stage times: grid {:.2?}, neighbours {:.2?}, cleaner {:.2?}, start hits {:.2?}, construction {:.2?}, selection {:.2?}",
        t.grid, t.neighbours, t.cleaner, t.start_hits, t.construction, t.selection
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Reconstruct {
            input,
            output,
            config,
            mode,
            workers,
            backend,
            lanes,
        } => {
            let mut tracker_config = match &config {
                Some(path) => TrackerConfig::from_file(path)?,
                None => TrackerConfig::default(),
            };
            if let Some(mode) = mode {
                tracker_config = tracker_config.with_execution(mode.execution(workers));
            }

            let event = EventInput::from_file(&input)?;
            log::info!(
                "Reconstructing {} slice(s), {} hits from {}",
                event.slices.len(),
                event.total_hits(),
                input.display()
            );

            let mut tracker = Tracker::new(tracker_config)?;
            if let Backend::Lockstep = backend {
                if lanes == 0 {
                    return Err(CliError::Argument("--lanes must be non-zero".into()));
                }
                tracker = tracker.with_backend(Box::new(LockstepBackend::new(lanes)));
            }

            let start = Instant::now();
            let results = tracker.reconstruct_event(&event.slices);
            let elapsed = start.elapsed();

            let statistics = summarize(&results);
            let slices = results
                .iter()
                .zip(&event.slices)
                .map(|(result, slice)| match result {
                    Ok(output) => SliceReport::Reconstructed(output),
                    Err(err) => {
                        log::error!("slice {}: {}", slice.slice, err);
                        SliceReport::Failed {
                            slice: slice.slice,
                            error: err.to_string(),
                        }
                    }
                })
                .collect();
            let report = EventReport {
                slices,
                statistics: statistics.clone(),
            };

            match &output {
                Some(path) => {
                    let mut writer = create_output(path)?;
                    serde_json::to_writer_pretty(&mut writer, &report)?;
                    writer.flush()?;
                    log::info!("Wrote tracks to {}", path.display());
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    serde_json::to_writer_pretty(&mut lock, &report)?;
                    writeln!(lock)?;
                }
            }

            eprintln!("Reconstructed in {:.2}s", elapsed.as_secs_f64());
            if cli.verbose {
                print_statistics(&statistics);
            }
        }

        Commands::Info { input } => {
            let event = EventInput::from_file(&input)?;
            println!("File: {}", input.display());
            println!("Slices: {}", event.slices.len());
            println!("Hits: {}", event.total_hits());

            for slice in &event.slices {
                let rows = slice.geometry.n_rows();
                let mut per_row = vec![0usize; rows];
                for hit in &slice.hits {
                    if let Some(count) = per_row.get_mut(usize::from(hit.row)) {
                        *count += 1;
                    }
                }
                let busiest = per_row.iter().copied().max().unwrap_or(0);
                println!(
                    "  slice {:>4}: {:>4} rows, {:>7} hits, busiest row {} hits",
                    slice.slice,
                    rows,
                    slice.len(),
                    busiest
                );
            }
        }

        Commands::Generate {
            output,
            slices,
            rows,
            tracks,
            noise,
            seed,
        } => {
            if rows < 4 {
                return Err(CliError::Argument("--rows must be at least 4".into()));
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let event = EventInput {
                slices: (0..slices)
                    .map(|s| generate_slice(&mut rng, s, rows, tracks, noise))
                    .collect(),
            };
            let mut writer = create_output(&output)?;
            serde_json::to_writer(&mut writer, &event)?;
            writer.flush()?;
            println!(
                "Generated {} slice(s), {} hits -> {}",
                event.slices.len(),
                event.total_hits(),
                output.display()
            );
        }

        Commands::Benchmark {
            input,
            iterations,
            row_block_size,
        } => {
            let event = EventInput::from_file(&input)?;
            println!(
                "Benchmarking with {} slices, {} hits, {} iterations ({} cores)",
                event.slices.len(),
                event.total_hits(),
                iterations,
                rayon::current_num_threads()
            );

            let modes = [
                ("sequential", ExecutionMode::Sequential),
                ("parallel-1", ExecutionMode::Parallel { workers: 1 }),
                ("parallel-4", ExecutionMode::Parallel { workers: 4 }),
                ("parallel", ExecutionMode::Parallel { workers: 0 }),
            ];

            println!(
                "{:<12} | {:<15} | {:<15} | {:<15} | {:<8} | {:<8}",
                "Mode", "Mean Time (ms)", "Min Time (ms)", "Max Time (ms)", "Tracks", "Failed"
            );
            println!("{:-<87}", "");

            for (name, execution) in modes {
                let config = TrackerConfig::default()
                    .with_execution(execution)
                    .with_row_block_size(row_block_size);
                let tracker = Tracker::new(config)?;
                let run = benchmark_mode(&tracker, &event.slices, iterations);

                let times = &run.times_ms;
                let min_time = times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
                let max_time = times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
                let mean_time = times.iter().sum::<f64>() / times.len().max(1) as f64;

                println!(
                    "{:<12} | {:<15.2} | {:<15.2} | {:<15.2} | {:<8} | {:<8}",
                    name, mean_time, min_time, max_time, run.tracks, run.failed_slices
                );
                if run.failed_slices > 0 {
                    log::warn!(
                        "{}: {} slice runs failed during timing",
                        name,
                        run.failed_slices
                    );
                }
            }
        }
    }

    Ok(())
}
