//! Driver binary: run the tuner over real files with the built-in reference
//! engine and report what it converged on.
//!
//! Each input file is cut into chunks; every chunk goes through the
//! `next_cparams` → compress → `update` cycle.  With `--trace` (or the
//! `BLOCKTUNE_TRACE` environment variable) the per-chunk table shows the
//! walk live.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use walkdir::WalkDir;

use blocktune::config::parse_perf_mode;
use blocktune::{
    Behaviour, Btune, CompressContext, DecompressContext, Engine, PerfMode, RepeatMode, SimEngine,
    TunerConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "blocktune",
    version,
    about = "Adaptive compression-parameter tuning over files"
)]
struct Args {
    /// Files or directories to tune over (directories are walked recursively).
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Chunk size in KiB.
    #[arg(long, default_value_t = 512)]
    chunk_kb: usize,

    /// Element size of the data in bytes.
    #[arg(long, default_value_t = 8)]
    typesize: i32,

    /// Ratio-vs-time tradeoff in [0, 1]; higher prefers ratio.
    #[arg(long)]
    tradeoff: Option<f64>,

    /// Performance mode: COMP, DECOMP or BALANCED.
    #[arg(long)]
    perf_mode: Option<String>,

    /// Assumed transport bandwidth in KB/s.
    #[arg(long)]
    bandwidth: Option<u32>,

    /// Waiting chunks between readapts.
    #[arg(long, default_value_t = 0)]
    waits: u32,

    /// Soft readapts before each hard.
    #[arg(long, default_value_t = 5)]
    softs: u32,

    /// Hard readapts before the tuner stops or repeats.
    #[arg(long, default_value_t = 1)]
    hards: u32,

    /// Repeat mode: REPEAT_ALL, REPEAT_SOFT or STOP.
    #[arg(long, default_value = "REPEAT_ALL")]
    repeat: String,

    /// Worker threads (default: all cores).
    #[arg(long)]
    threads: Option<i32>,

    /// Print the per-chunk trace table.
    #[arg(long)]
    trace: bool,
}

/// Expand files and directories into a flat file list.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry.with_context(|| format!("walking {}", path.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    if files.is_empty() {
        bail!("no input files found");
    }
    Ok(files)
}

fn parse_repeat_mode(s: &str) -> Result<RepeatMode> {
    match s {
        "REPEAT_ALL" => Ok(RepeatMode::All),
        "REPEAT_SOFT" => Ok(RepeatMode::Soft),
        "STOP" => Ok(RepeatMode::Stop),
        other => bail!("unknown repeat mode {:?} (expected REPEAT_ALL, REPEAT_SOFT or STOP)", other),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.trace {
        // The trace switch is read once, before the first tuner call.
        std::env::set_var("BLOCKTUNE_TRACE", "1");
    }

    let perf_mode = match args.perf_mode.as_deref() {
        Some(name) => match parse_perf_mode(name) {
            Some(mode) => mode,
            None => bail!("unknown performance mode {:?} (expected COMP, DECOMP or BALANCED)", name),
        },
        None => PerfMode::Auto,
    };

    let defaults = TunerConfig::default();
    let config = TunerConfig {
        tradeoff: args.tradeoff.unwrap_or(defaults.tradeoff),
        perf_mode,
        bandwidth: args.bandwidth.unwrap_or(defaults.bandwidth),
        behaviour: Behaviour {
            nwaits_before_readapt: args.waits,
            nsofts_before_hard: args.softs,
            nhards_before_stop: args.hards,
            repeat_mode: parse_repeat_mode(&args.repeat)?,
        },
        cparams_hint: false,
        inference_count: 0,
    };

    let chunk_size = args.chunk_kb.max(1) * 1024;
    let nthreads = args.threads.unwrap_or_else(|| num_cpus::get() as i32).max(1);

    let files = collect_files(&args.paths)?;
    let engine: Arc<dyn Engine> = Arc::new(SimEngine::new());

    let mut cctx = CompressContext::new(args.typesize.max(1), nthreads);
    let dctx = DecompressContext::new(nthreads);
    let mut tuner = Btune::init(Some(config), &mut cctx, Some(dctx), Arc::clone(&engine));

    let mut total_in: u64 = 0;
    let mut total_out: u64 = 0;
    let mut total_chunks: u64 = 0;
    let start = Instant::now();

    for path in &files {
        let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if data.is_empty() {
            eprintln!("blocktune: skipping empty file {}", path.display());
            continue;
        }

        let mut file_in: u64 = 0;
        let mut file_out: u64 = 0;
        for chunk in data.chunks(chunk_size) {
            cctx.src = Some(chunk.to_vec());
            cctx.sourcesize = chunk.len() as i32;

            tuner.next_blocksize(&mut cctx);
            tuner.next_cparams(&mut cctx);

            let t0 = Instant::now();
            let cbytes = engine
                .compress(&mut cctx)
                .with_context(|| format!("compressing chunk of {}", path.display()))?;
            let ctime = t0.elapsed().as_secs_f64();

            tuner.update(&mut cctx, ctime);
            cctx.nchunks += 1;

            file_in += chunk.len() as u64;
            file_out += cbytes as u64;
            total_chunks += 1;
        }
        total_in += file_in;
        total_out += file_out;
        println!(
            "{:>40}: {} -> {} ({:.2}x), {} chunks",
            path.display(),
            file_in,
            file_out,
            file_in as f64 / file_out.max(1) as f64,
            data.len().div_ceil(chunk_size),
        );
    }

    let elapsed = start.elapsed().as_secs_f64();
    let best = tuner.best();
    println!(
        "tuned {} chunks in {:.2}s: {} -> {} ({:.2}x overall)",
        total_chunks,
        elapsed,
        total_in,
        total_out,
        total_in as f64 / total_out.max(1) as f64,
    );
    println!(
        "best: codec {} filter {} split {:?} clevel {} blocksize {} shufflesize {} threads {}/{} (state {})",
        best.compcode.name(),
        best.filter.name(),
        best.splitmode,
        best.clevel,
        best.blocksize,
        best.shufflesize,
        best.nthreads_comp,
        best.nthreads_decomp,
        tuner.state_name(),
    );

    tuner.free();
    Ok(())
}
