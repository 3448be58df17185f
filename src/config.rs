//! Tuner configuration: defaults, environment overrides, and validation.
//!
//! A [`TunerConfig`] is immutable once the tuner has been initialized.  Out of
//! range values are never fatal: they are reported through the diagnostic
//! sink and replaced with the documented default, so a misconfigured host
//! still compresses.

use std::env;

use crate::tune_warn;

// ── Bandwidth units (KB/s) ────────────────────────────────────────────────────

pub const KB: u32 = 1024;

/// 1 MB/s expressed in KB/s.
pub const MBPS: u32 = KB;
/// 1 GB/s expressed in KB/s.
pub const GBPS: u32 = KB * KB;
/// 1 TB/s expressed in KB/s.
pub const TBPS: u32 = KB * KB * KB;

/// Default transport bandwidth assumed by the score model: 10 GB/s, roughly
/// the memory bandwidth of one core.
pub const GBPS10: u32 = 10 * GBPS;

// ── Tradeoff bands ────────────────────────────────────────────────────────────

/// Upper edge of the speed-leaning tradeoff band.
pub const BAND_LOW: f64 = 1.0 / 3.0;
/// Upper edge of the balanced tradeoff band; above it the tuner chases ratio.
pub const BAND_HIGH: f64 = 2.0 / 3.0;

// ── Compile-time phase toggles ────────────────────────────────────────────────

/// Whether the SHUFFLE_SIZE phase is explored.
pub const ENABLE_SHUFFLE_SIZE: bool = cfg!(feature = "tune-shufflesize");
/// Whether the MEMCPY (clevel 0) probe phase is explored.
pub const ENABLE_MEMCPY: bool = cfg!(feature = "tune-memcpy");
/// Whether the THREADS phase is explored.
pub const ENABLE_THREADS: bool = true;

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Which measured times enter the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfMode {
    /// Compression time + transfer time.
    Comp,
    /// Transfer time + decompression time.
    Decomp,
    /// All three terms.
    Balanced,
    /// Resolved at init: environment override, else [`PerfMode::Comp`].
    Auto,
}

impl PerfMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PerfMode::Comp => "COMP",
            PerfMode::Decomp => "DECOMP",
            PerfMode::Balanced => "BALANCED",
            PerfMode::Auto => "AUTO",
        }
    }
}

/// What the tuner does after the configured hard readapts have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    /// Keep cycling waits, softs and hards.
    All,
    /// Keep refining with softs only.
    Soft,
    /// Freeze on the current best.
    Stop,
}

impl RepeatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::All => "REPEAT_ALL",
            RepeatMode::Soft => "REPEAT_SOFT",
            RepeatMode::Stop => "STOP",
        }
    }
}

// ── Behaviour ─────────────────────────────────────────────────────────────────

/// Readaptation schedule: how many waiting chunks sit between readapts, how
/// many softs run before a hard, and how many hards run before the tuner
/// stops or repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behaviour {
    pub nwaits_before_readapt: u32,
    pub nsofts_before_hard: u32,
    pub nhards_before_stop: u32,
    pub repeat_mode: RepeatMode,
}

impl Default for Behaviour {
    fn default() -> Self {
        Behaviour {
            nwaits_before_readapt: 0,
            nsofts_before_hard: 5,
            nhards_before_stop: 1,
            repeat_mode: RepeatMode::All,
        }
    }
}

// ── TunerConfig ───────────────────────────────────────────────────────────────

/// Host-supplied tuner configuration.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    /// Ratio-vs-time preference in [0, 1]; higher prefers ratio.
    pub tradeoff: f64,
    /// Which timings the score model weighs.
    pub perf_mode: PerfMode,
    /// Assumed transport bandwidth in KB/s (strictly positive).
    pub bandwidth: u32,
    /// Readaptation schedule.
    pub behaviour: Behaviour,
    /// When true, the initial best is seeded from the host's current
    /// compression parameters instead of the built-in default seed.
    pub cparams_hint: bool,
    /// How many chunks are seeded from the inference hook before the search
    /// lists take over; negative means every chunk, 0 disables seeding.
    pub inference_count: i32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        TunerConfig {
            tradeoff: 0.5,
            perf_mode: PerfMode::Auto,
            bandwidth: GBPS10,
            behaviour: Behaviour::default(),
            cparams_hint: false,
            inference_count: 0,
        }
    }
}

// ── Environment overrides and validation ──────────────────────────────────────

/// Look up `BLOCKTUNE_<name>`, falling back to the legacy `BTUNE_<name>`.
fn env_var(name: &str) -> Option<String> {
    env::var(format!("BLOCKTUNE_{name}"))
        .or_else(|_| env::var(format!("BTUNE_{name}")))
        .ok()
}

/// Parse a performance-mode name as accepted in the environment.
pub fn parse_perf_mode(s: &str) -> Option<PerfMode> {
    match s {
        "COMP" => Some(PerfMode::Comp),
        "DECOMP" => Some(PerfMode::Decomp),
        "BALANCED" => Some(PerfMode::Balanced),
        _ => None,
    }
}

/// Normalize a host-supplied configuration: resolve [`PerfMode::Auto`], apply
/// environment overrides, and patch out-of-range values with defaults.
pub(crate) fn resolve(config: Option<TunerConfig>) -> TunerConfig {
    let mut cfg = config.unwrap_or_default();

    if cfg.perf_mode == PerfMode::Auto {
        cfg.perf_mode = match env_var("PERF_MODE") {
            Some(value) => parse_perf_mode(&value).unwrap_or_else(|| {
                tune_warn!("unsupported {} performance mode, default to COMP", value);
                PerfMode::Comp
            }),
            None => PerfMode::Comp,
        };
    }

    if let Some(value) = env_var("TRADEOFF") {
        match value.parse::<f64>() {
            Ok(t) => cfg.tradeoff = t,
            Err(_) => tune_warn!("unparseable tradeoff {:?} in environment, ignored", value),
        }
    }
    if !(0.0..=1.0).contains(&cfg.tradeoff) {
        let default = TunerConfig::default().tradeoff;
        tune_warn!(
            "unsupported {} compression tradeoff, it must be between 0.0 and 1.0, default to {}",
            cfg.tradeoff,
            default
        );
        cfg.tradeoff = default;
    }

    if cfg.bandwidth == 0 {
        let default = TunerConfig::default().bandwidth;
        tune_warn!("bandwidth must be positive, default to {} KB/s", default);
        cfg.bandwidth = default;
    }

    cfg
}

/// Render a bandwidth in the largest unit that keeps the number small.
pub fn bandwidth_to_str(bandwidth: u32) -> String {
    if bandwidth < MBPS {
        format!("{} KB/s", bandwidth)
    } else if bandwidth < GBPS {
        format!("{} MB/s", bandwidth / KB)
    } else if bandwidth < TBPS {
        format!("{} GB/s", bandwidth / KB / KB)
    } else {
        format!("{} TB/s", bandwidth / KB / KB / KB)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
