//! blocktune — adaptive compression-parameter tuning for block engines.
//!
//! The tuner plugs into a block-oriented compression engine and, chunk by
//! chunk, proposes a candidate configuration (codec, filter, split policy,
//! level, block/shuffle size, worker counts), observes the resulting timings
//! and compression ratio, and steers later choices toward the configured
//! objective: compression time, decompression time, or a balance of both,
//! weighed against ratio by a `tradeoff` in [0, 1].
//!
//! The host owns the engine and its contexts; the tuner owns its walk.  The
//! contract per chunk is `next_cparams` (tuner mutates the context's
//! parameters), host compresses, then `update` (tuner scores what happened).

pub mod config;
pub mod context;
pub mod cparams;
pub mod engine;
pub mod inference;
pub mod probe;
pub mod score;
pub mod threadpool;
pub mod trace;
pub mod tune;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level re-exports for the common entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// The per-context tuner; one per compression context.
pub use tune::Btune;
/// Names of the five entry points for hosts that dispatch by name.
pub use tune::{TunerInfo, TUNER_INFO};
/// Tuning phase and readapt kind, exposed for hosts that introspect.
pub use tune::{Readapt, State};

/// Tuner configuration and its enums.
pub use config::{Behaviour, PerfMode, RepeatMode, TunerConfig};

/// Candidate records and parameter enums.
pub use cparams::{Codec, Cparams, Filter, SplitMode};

/// Host-facing context surfaces and the engine seam.
pub use context::{
    CodecDescriptor, CompressContext, DecompressContext, Engine, EngineError, Instrumentation,
    MAX_FILTER_SLOTS, MAX_OVERHEAD,
};

/// Entropy probe: direct estimation plus the pseudo-codec registration.
pub use probe::{
    arange_speed, estimate_cratio, register_entropy_codec, zeros_speed, ENTROPY_PROBE_ID,
};

/// Score model, for hosts that want to pre-screen candidates themselves.
pub use score::{has_improved, score_function};

/// Inference seed hook.
pub use inference::{ChunkFeatures, Inference, Prediction};

/// Built-in reference engine used by the driver binary and the tests.
pub use engine::SimEngine;

// ─────────────────────────────────────────────────────────────────────────────
// Version
// ─────────────────────────────────────────────────────────────────────────────

pub const VERSION_MAJOR: i32 = 1;
pub const VERSION_MINOR: i32 = 1;
pub const VERSION_RELEASE: i32 = 0;
pub const VERSION_STRING: &str = "1.1.0";

/// Returns the library version string.
pub fn version_string() -> &'static str {
    VERSION_STRING
}
