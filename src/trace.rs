//! Env-gated tracing for the tuner.
//!
//! When `BLOCKTUNE_TRACE` (or the legacy `BTUNE_TRACE` spelling) is set, the
//! tuner prints a banner at init and a one-line-per-chunk table while the
//! initial search is running.  Table rows go to stdout; warnings always go to
//! stderr regardless of the trace switch.

use std::env;
use std::sync::OnceLock;

/// Returns `true` when per-chunk tracing is enabled.
///
/// The environment is consulted once per process; later changes to the
/// variable have no effect.
pub fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        env::var_os("BLOCKTUNE_TRACE").is_some() || env::var_os("BTUNE_TRACE").is_some()
    })
}

/// Print a diagnostic warning to stderr.
///
/// Configuration problems are reported here and then patched with a default;
/// they are never fatal (see the crate-level error-handling notes).
#[macro_export]
macro_rules! tune_warn {
    ($($arg:tt)*) => {
        eprintln!("blocktune: warning: {}", format_args!($($arg)*))
    };
}

/// Format a value the way the trace table wants it: three significant-ish
/// digits, switching to scientific notation outside [1e-3, 1e4).
pub(crate) fn sig3(v: f64) -> String {
    let a = v.abs();
    if v != 0.0 && (a < 1e-3 || a >= 1e4) {
        format!("{:.2e}", v)
    } else {
        format!("{:.3}", v)
    }
}

/// Print the per-chunk table header (once, before the first row).
pub(crate) fn table_header() {
    println!(
        "|    Codec   | Filter | Split | C.Level | Blocksize | Shufflesize | C.Threads | D.Threads \
         |   Score   |  C.Ratio   |      State      | Readapt | Winner"
    );
}

/// Print one row of the per-chunk table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn table_row(
    codec_name: &str,
    filter_id: u8,
    split: u8,
    clevel: i32,
    blocksize_kb: i32,
    shufflesize: i32,
    nthreads_comp: i32,
    nthreads_decomp: i32,
    score: f64,
    cratio: f64,
    state_name: &str,
    readapt_name: &str,
    winner: char,
) {
    println!(
        "| {:>10} | {:>6} | {:>5} | {:>7} | {:>9} | {:>11} | {:>9} | {:>9} | {:>9} | {:>9}x | {:>15} | {:>7} | {}",
        codec_name,
        filter_id,
        split,
        clevel,
        blocksize_kb,
        shufflesize,
        nthreads_comp,
        nthreads_decomp,
        sig3(score),
        sig3(cratio),
        state_name,
        readapt_name,
        winner,
    );
}
