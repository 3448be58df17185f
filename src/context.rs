//! Host-facing surfaces: compression/decompression contexts, the [`Engine`]
//! trait the tuner drives measurements through, and the codec registration
//! record used to expose pseudo-codecs (like the entropy probe) to the host.
//!
//! The contexts model exactly the slots of the host's compression state the
//! tuner is allowed to touch.  The host owns the contexts; the tuner mutates
//! them from `next_cparams` and reads measurements back in `update`.  Between
//! those two calls the host must not reshape them (see the crate-level
//! ordering contract).

use std::fmt;

use crate::cparams::{Codec, Filter, SplitMode};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Number of slots in the filter pipeline.
pub const MAX_FILTER_SLOTS: usize = 6;

/// Fixed per-chunk container overhead in bytes.  A chunk that compresses to
/// no more than this plus one element is a special-value chunk and carries no
/// usable score signal.
pub const MAX_OVERHEAD: i32 = 32;

// ── Compression context ───────────────────────────────────────────────────────

/// The compression-side state the tuner reads and writes.
#[derive(Debug, Clone)]
pub struct CompressContext {
    pub compcode: Codec,
    /// Filter pipeline, applied left to right; the tuner writes the active
    /// filter into the last slot.
    pub filters: [Filter; MAX_FILTER_SLOTS],
    pub filters_meta: [u8; MAX_FILTER_SLOTS],
    pub splitmode: SplitMode,
    pub clevel: i32,
    /// Block size in bytes; 0 lets the engine pick.
    pub blocksize: i32,
    /// Shuffle granularity in bytes.  Seeded from `itemsize`, then managed by
    /// the tuner.
    pub typesize: i32,
    /// Element size of the data feeding this context; fixed at creation.
    pub itemsize: i32,
    /// Worker threads the engine is currently using.
    pub nthreads: i32,
    /// Worker-thread count staged by the tuner; the host applies it before
    /// the next compression.
    pub new_nthreads: i32,
    /// Size in bytes of the chunk last submitted for compression.
    pub sourcesize: i32,
    /// Compressed size in bytes produced by the last compression.
    pub destsize: i32,
    /// Chunks compressed through this context so far.
    pub nchunks: i64,
    /// When set, the engine records per-pass speeds (see [`Instrumentation`]).
    pub instr_enabled: bool,
    /// The chunk pending compression, when the host exposes it.
    pub src: Option<Vec<u8>>,
    /// The compressed chunk produced by the engine, when retained.  `None`
    /// means timed decompression is impossible for this chunk.
    pub dest: Option<Vec<u8>>,
}

impl CompressContext {
    pub fn new(itemsize: i32, nthreads: i32) -> Self {
        CompressContext {
            compcode: Codec::Lz4,
            filters: [Filter::NoFilter; MAX_FILTER_SLOTS],
            filters_meta: [0; MAX_FILTER_SLOTS],
            splitmode: SplitMode::Auto,
            clevel: 9,
            blocksize: 0,
            typesize: itemsize,
            itemsize,
            nthreads,
            new_nthreads: nthreads,
            sourcesize: 0,
            destsize: 0,
            nchunks: 0,
            instr_enabled: false,
            src: None,
            dest: None,
        }
    }
}

// ── Decompression context ─────────────────────────────────────────────────────

/// The decompression-side state the tuner steers.
#[derive(Debug, Clone)]
pub struct DecompressContext {
    pub nthreads: i32,
    pub new_nthreads: i32,
}

impl DecompressContext {
    pub fn new(nthreads: i32) -> Self {
        DecompressContext {
            nthreads,
            new_nthreads: nthreads,
        }
    }
}

// ── Instrumentation ───────────────────────────────────────────────────────────

/// Per-pass speeds recorded by an instrumented round-trip, in MB/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instrumentation {
    pub cspeed: f32,
    pub filter_speed: f32,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors surfaced by an [`Engine`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The output buffer cannot hold the result.
    OutputTooSmall,
    /// The compressed input is malformed.
    CorruptInput,
    /// The payload checksum did not match on decompression.
    ChecksumMismatch,
    /// The context references a codec this engine does not provide.
    UnsupportedCodec(u8),
    /// A decode was requested from a codec that has no decoder.
    NoDecoder,
    /// The context exposes no source chunk.
    NoSource,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::OutputTooSmall => write!(f, "output buffer too small"),
            EngineError::CorruptInput => write!(f, "corrupt compressed input"),
            EngineError::ChecksumMismatch => write!(f, "payload checksum mismatch"),
            EngineError::UnsupportedCodec(id) => write!(f, "unsupported codec id {}", id),
            EngineError::NoDecoder => write!(f, "codec has no decoder"),
            EngineError::NoSource => write!(f, "context exposes no source chunk"),
        }
    }
}

impl std::error::Error for EngineError {}

// ── Codec registration record ─────────────────────────────────────────────────

/// Encoder entry point for a registered codec.  Returns the number of
/// compressed bytes; an estimator-style codec may return a size without
/// writing `dst` at all.
pub type EncoderFn = fn(src: &[u8], dst: &mut [u8], meta: u8) -> Result<usize, EngineError>;

/// Decoder entry point for a registered codec.
pub type DecoderFn = fn(src: &[u8], dst: &mut [u8], meta: u8) -> Result<usize, EngineError>;

/// Registration record for a user codec, conveyed to the engine by id.
#[derive(Debug, Clone, Copy)]
pub struct CodecDescriptor {
    pub compcode: u8,
    pub version: u8,
    pub complib: u8,
    pub compname: &'static str,
    pub encoder: Option<EncoderFn>,
    pub decoder: Option<DecoderFn>,
}

// ── Engine trait ──────────────────────────────────────────────────────────────

/// The block-compression engine the tuner collaborates with.
///
/// The engine owns its worker threads; the tuner only steers them through the
/// `nthreads` knobs on the contexts.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the engine was built with this codec.
    fn supports(&self, codec: Codec) -> bool {
        let _ = codec;
        true
    }

    /// Make a user codec (by id) available to this engine.
    fn register_codec(&self, desc: CodecDescriptor) {
        let _ = desc;
    }

    /// Look up a previously registered user codec.
    fn registered_codec(&self, compcode: u8) -> Option<CodecDescriptor> {
        let _ = compcode;
        None
    }

    /// Compress `ctx.src` according to the context parameters, filling
    /// `ctx.dest` and `ctx.destsize`.  Returns the compressed size.
    fn compress(&self, ctx: &mut CompressContext) -> Result<usize, EngineError>;

    /// Decompress `src` into `dst`, returning the decompressed size.
    fn decompress(
        &self,
        dctx: &mut DecompressContext,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, EngineError>;

    /// Instrumented round-trip over `src`: compress and decompress once,
    /// recording per-pass speeds.
    fn measure(
        &self,
        cctx: &mut CompressContext,
        dctx: &mut DecompressContext,
        src: &[u8],
    ) -> Result<Instrumentation, EngineError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
