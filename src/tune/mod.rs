//! The tuner itself: owned state, phase bookkeeping, and the five entry
//! points the host binds (`init`, `next_blocksize`, `next_cparams`, `update`,
//! `free`).
//!
//! One [`Btune`] lives per compression context.  The host calls
//! `next_cparams` and `update` in strict alternation from a single thread;
//! the tuner matches candidates to measurements by that ordering and needs no
//! locking of its own.  Everything the walk touches — the champion record,
//! the candidate under evaluation, the search lists — is owned here and
//! handed to the host only through accessors.

pub mod generator;
pub mod transitions;

use std::sync::Arc;

use crate::config::{self, bandwidth_to_str, PerfMode, RepeatMode, TunerConfig, BAND_HIGH, BAND_LOW};
use crate::context::{CompressContext, DecompressContext, Engine, MAX_FILTER_SLOTS};
use crate::cparams::{Codec, Cparams, Filter, SplitMode};
use crate::inference::{Inference, Prediction};
use crate::probe::register_entropy_codec;
use crate::trace;

// ── Walk constants ────────────────────────────────────────────────────────────

pub const MIN_BITSHUFFLE: i32 = 1;
pub const MIN_SHUFFLE: i32 = 2;
pub const MAX_SHUFFLE: i32 = 16;
pub const MIN_THREADS: i32 = 1;
pub const SOFT_STEP_SIZE: i32 = 1;
pub const HARD_STEP_SIZE: i32 = 2;
/// Sentinel large enough that the THREADS phase can never step this often;
/// marks the second thread dimension in BALANCED mode.
pub const MAX_STATE_THREADS: i32 = 50;

/// Capacity of the codec search list; overflow is a programming bug.
const MAX_CODECS: usize = 8;
/// Capacity of the filter search list.
const MAX_FILTERS: usize = 8;

/// Samples per candidate before a decision.  Deliberately one; the mean over
/// the window is an identity and must stay that way.
pub(crate) const REPEATS_PER_CPARAMS: usize = 1;

// ── Phases ────────────────────────────────────────────────────────────────────

/// Tuning phase.  `Stop` is absorbing: no candidate changes, updates ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    CodecFilter,
    ShuffleSize,
    Threads,
    Clevel,
    Memcpy,
    Waiting,
    Stop,
}

/// Which kind of readapt the walk is currently inside (or coming from).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readapt {
    Hard,
    Soft,
    Wait,
}

impl Readapt {
    pub fn as_str(self) -> &'static str {
        match self {
            Readapt::Hard => "HARD",
            Readapt::Soft => "SOFT",
            Readapt::Wait => "WAIT",
        }
    }
}

// ── Entry-point record ────────────────────────────────────────────────────────

/// Names of the five entry points, for hosts that dispatch by name.
#[derive(Debug, Clone, Copy)]
pub struct TunerInfo {
    pub init: &'static str,
    pub next_blocksize: &'static str,
    pub next_cparams: &'static str,
    pub update: &'static str,
    pub free: &'static str,
}

pub const TUNER_INFO: TunerInfo = TunerInfo {
    init: "init",
    next_blocksize: "next_blocksize",
    next_cparams: "next_cparams",
    update: "update",
    free: "free",
};

// ── The tuner ─────────────────────────────────────────────────────────────────

/// Per-context tuner state.
pub struct Btune {
    pub(crate) config: TunerConfig,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) dctx: Option<DecompressContext>,

    // Search lists, fixed after init unless an inference collapses them.
    pub(crate) codecs: Vec<Codec>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) splitmode: SplitMode,
    pub(crate) clevels: Vec<i32>,
    pub(crate) clevel_index: i32,

    pub(crate) state: State,
    pub(crate) readapt_from: Readapt,
    pub(crate) aux_index: i32,
    pub(crate) rep_index: usize,
    pub(crate) steps_count: u64,
    pub(crate) nsofts: u32,
    pub(crate) nhards: u32,
    pub(crate) nwaitings: u32,
    pub(crate) is_repeating: bool,
    pub(crate) max_threads: i32,
    pub(crate) nthreads_decomp: i32,
    pub(crate) threads_for_comp: bool,
    pub(crate) step_size: i32,

    pub(crate) best: Cparams,
    pub(crate) aux: Cparams,
    pub(crate) current_scores: [f64; REPEATS_PER_CPARAMS],
    pub(crate) current_cratios: [f64; REPEATS_PER_CPARAMS],

    pub(crate) inference: Option<Box<dyn Inference>>,
    pub(crate) inference_count: i32,
    pub(crate) inference_ended: bool,
    pub(crate) predictions: Vec<Prediction>,
    /// Cached all-zeros round-trip speed; negative until first populated.
    pub(crate) zeros_speed: f32,
}

impl Btune {
    /// Build the tuner for a compression context, validating the
    /// configuration and seeding the initial champion.
    ///
    /// Registers the entropy-probe pseudo-codec with the engine so the host
    /// (and the inference feature extraction) can reach it by id.
    pub fn init(
        user_config: Option<TunerConfig>,
        cctx: &mut CompressContext,
        dctx: Option<DecompressContext>,
        engine: Arc<dyn Engine>,
    ) -> Btune {
        register_entropy_codec(engine.as_ref());

        let cfg = config::resolve(user_config);

        if trace::enabled() {
            println!("{}", "-=".repeat(40));
            println!(
                "Blocktune version: {}\nPerformance Mode: {}, Compression tradeoff: {}, Bandwidth: {}\n\
                 Behaviour: Waits - {}, Softs - {}, Hards - {}, Repeat Mode - {}",
                crate::VERSION_STRING,
                cfg.perf_mode.as_str(),
                cfg.tradeoff,
                bandwidth_to_str(cfg.bandwidth),
                cfg.behaviour.nwaits_before_readapt,
                cfg.behaviour.nsofts_before_hard,
                cfg.behaviour.nhards_before_stop,
                cfg.behaviour.repeat_mode.as_str(),
            );
        }

        let inference_count = cfg.inference_count;
        let mut tuner = Btune {
            config: cfg,
            engine,
            dctx,
            codecs: Vec::new(),
            filters: Vec::new(),
            splitmode: SplitMode::Auto,
            clevels: Vec::new(),
            clevel_index: 0,
            state: State::CodecFilter,
            readapt_from: Readapt::Hard,
            aux_index: 0,
            rep_index: 0,
            steps_count: 0,
            nsofts: 0,
            nhards: 0,
            nwaitings: 0,
            is_repeating: false,
            max_threads: cctx.nthreads,
            nthreads_decomp: cctx.nthreads,
            threads_for_comp: true,
            step_size: HARD_STEP_SIZE,
            best: Cparams::default(),
            aux: Cparams::default(),
            current_scores: [0.0; REPEATS_PER_CPARAMS],
            current_cratios: [0.0; REPEATS_PER_CPARAMS],
            inference: None,
            inference_count,
            inference_ended: false,
            predictions: Vec::new(),
            zeros_speed: -1.0,
        };

        tuner.init_codecs();
        tuner.add_filter(Filter::NoFilter);
        tuner.add_filter(Filter::Shuffle);
        tuner.add_filter(Filter::BitShuffle);
        tuner.init_clevels(1, 9, 9);

        tuner.best.compcode = tuner.codecs[0];
        tuner.aux.compcode = tuner.codecs[0];
        if tuner.config.tradeoff >= BAND_HIGH {
            tuner.best.clevel = 8;
            tuner.aux.clevel = 8;
        }
        tuner.best.shufflesize = cctx.typesize;
        tuner.aux.shufflesize = cctx.typesize;
        tuner.best.nthreads_comp = cctx.nthreads;
        tuner.aux.nthreads_comp = cctx.nthreads;
        if let Some(d) = tuner.dctx.as_ref() {
            tuner.max_threads = cctx.nthreads.max(d.nthreads);
            tuner.nthreads_decomp = d.nthreads;
        }
        tuner.best.nthreads_decomp = tuner.nthreads_decomp;
        tuner.aux.nthreads_decomp = tuner.nthreads_decomp;

        tuner.threads_for_comp = tuner.config.perf_mode != PerfMode::Decomp;

        if tuner.config.cparams_hint {
            let hint = tuner.extract_cparams(cctx);
            tuner.apply_hint(hint);
            tuner.add_codec(cctx.compcode);
            let behaviour = tuner.config.behaviour;
            if behaviour.nhards_before_stop > 0 {
                if behaviour.nsofts_before_hard > 0 {
                    tuner.init_soft();
                } else if behaviour.nwaits_before_readapt > 0 {
                    tuner.state = State::Waiting;
                    tuner.readapt_from = Readapt::Wait;
                } else {
                    tuner.init_hard();
                }
            } else {
                tuner.init_without_hards();
            }
        } else {
            tuner.init_hard();
            // The built-in seed is unmeasured, so one extra hard pays for the
            // initial exploration.
            tuner.config.behaviour.nhards_before_stop += 1;
        }

        tuner.step_size = if tuner.config.behaviour.nhards_before_stop == 1 {
            SOFT_STEP_SIZE
        } else {
            HARD_STEP_SIZE
        };

        tuner
    }

    /// Install an inference model; its seeding budget comes from the
    /// configuration's `inference_count`.
    pub fn set_inference(&mut self, model: Box<dyn Inference>) {
        self.inference = Some(model);
    }

    /// Must exist because hosts may call it unconditionally; block sizing is
    /// steered through the candidate records instead.
    pub fn next_blocksize(&mut self, _ctx: &mut CompressContext) {}

    /// Release tuner-owned resources, including the inference model.  The
    /// tuner is left stopped, so stray calls afterwards are no-ops; hosts
    /// that simply drop the tuner get the same effect.
    pub fn free(&mut self) {
        self.inference = None;
        self.predictions.clear();
        self.codecs.clear();
        self.filters.clear();
        self.clevels.clear();
        self.state = State::Stop;
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> State {
        self.state
    }

    pub fn readapt_from(&self) -> Readapt {
        self.readapt_from
    }

    pub fn best(&self) -> &Cparams {
        &self.best
    }

    pub fn aux(&self) -> &Cparams {
        &self.aux
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn clevels(&self) -> &[i32] {
        &self.clevels
    }

    pub fn nsofts(&self) -> u32 {
        self.nsofts
    }

    pub fn nhards(&self) -> u32 {
        self.nhards
    }

    pub fn nwaitings(&self) -> u32 {
        self.nwaitings
    }

    pub fn steps_count(&self) -> u64 {
        self.steps_count
    }

    pub fn is_repeating(&self) -> bool {
        self.is_repeating
    }

    pub fn threads_for_comp(&self) -> bool {
        self.threads_for_comp
    }

    pub fn aux_index(&self) -> i32 {
        self.aux_index
    }

    pub fn max_threads(&self) -> i32 {
        self.max_threads
    }

    pub fn nthreads_decomp(&self) -> i32 {
        self.nthreads_decomp
    }

    pub fn dctx(&self) -> Option<&DecompressContext> {
        self.dctx.as_ref()
    }

    /// Phase name for the trace table; THREADS reveals which dimension the
    /// walk is moving.
    pub fn state_name(&self) -> &'static str {
        match self.state {
            State::CodecFilter => "CODEC_FILTER",
            State::ShuffleSize => "SHUFFLE_SIZE",
            State::Threads => {
                if self.threads_for_comp {
                    "THREADS_COMP"
                } else {
                    "THREADS_DECOMP"
                }
            }
            State::Clevel => "CLEVEL",
            State::Memcpy => "MEMCPY",
            State::Waiting => "WAITING",
            State::Stop => "STOP",
        }
    }

    // ── Search lists ─────────────────────────────────────────────────────────

    pub(crate) fn add_codec(&mut self, codec: Codec) {
        if self.codecs.contains(&codec) {
            return;
        }
        assert!(self.codecs.len() < MAX_CODECS, "codec search list overflow");
        self.codecs.push(codec);
    }

    pub(crate) fn add_filter(&mut self, filter: Filter) {
        if self.filters.contains(&filter) {
            return;
        }
        assert!(self.filters.len() < MAX_FILTERS, "filter search list overflow");
        self.filters.push(filter);
    }

    /// Build the codec list from the tradeoff band and performance mode.
    fn init_codecs(&mut self) {
        if self.config.tradeoff >= BAND_HIGH {
            // High-ratio territory: only the dense codecs compete.
            if self.engine.supports(Codec::Zstd) {
                self.add_codec(Codec::Zstd);
            }
            if self.engine.supports(Codec::Zlib) {
                self.add_codec(Codec::Zlib);
            }
        } else {
            self.add_codec(Codec::Lz4);
            if self.config.tradeoff >= BAND_LOW {
                self.add_codec(Codec::BloscLz);
            }
            if self.config.perf_mode == PerfMode::Decomp {
                self.add_codec(Codec::Lz4Hc);
            }
        }
        // The engine may have been built without both dense codecs.
        if self.codecs.is_empty() {
            self.add_codec(Codec::Lz4);
        }
    }

    /// Set the clevels window `[min..=max]` and position the walk at `start`,
    /// forcing both records onto it.
    pub(crate) fn init_clevels(&mut self, min: i32, max: i32, start: i32) {
        assert!(min >= 0 && max <= 9, "clevel window out of range");
        assert!(start >= min && start <= max, "clevel start outside window");

        self.best.clevel = start;
        self.aux.clevel = start;

        self.clevels.clear();
        for (i, clevel) in (min..=max).enumerate() {
            self.clevels.push(clevel);
            if clevel == start {
                self.clevel_index = i as i32;
            }
        }
    }

    /// Collapse the search to one inference prediction.
    pub(crate) fn apply_prediction(&mut self, p: Prediction) {
        self.codecs = vec![p.codec];
        self.filters = vec![p.filter];
        self.splitmode = p.splitmode;
        if self.config.perf_mode == PerfMode::Decomp {
            self.init_clevels(p.clevel, p.clevel, p.clevel);
        } else {
            let min = if p.clevel > 1 { p.clevel - 1 } else { p.clevel };
            let max = if p.clevel < 9 { p.clevel + 1 } else { p.clevel };
            self.init_clevels(min, max, p.clevel);
        }
    }

    // ── Edge tests ───────────────────────────────────────────────────────────

    pub(crate) fn has_ended_clevel(&self) -> bool {
        let nclevels = self.clevels.len() as i32;
        if self.best.increasing_clevel {
            self.clevel_index + self.step_size >= nclevels
        } else {
            self.clevel_index - self.step_size < 0
        }
    }

    pub(crate) fn has_ended_shuffle(best: &Cparams) -> bool {
        let min_shuffle = if best.filter == Filter::Shuffle {
            MIN_SHUFFLE
        } else {
            MIN_BITSHUFFLE
        };
        (best.increasing_shuffle && best.shufflesize == MAX_SHUFFLE)
            || (!best.increasing_shuffle && best.shufflesize == min_shuffle)
    }

    pub(crate) fn has_ended_threads(&self) -> bool {
        let nthreads = if self.threads_for_comp {
            self.best.nthreads_comp
        } else {
            self.best.nthreads_decomp
        };
        (self.best.increasing_nthreads && nthreads == self.max_threads)
            || (!self.best.increasing_nthreads && nthreads == MIN_THREADS)
    }

    // ── Readapt entry points ─────────────────────────────────────────────────

    /// Local refinement: walk clevels in single steps.
    pub(crate) fn init_soft(&mut self) {
        if self.has_ended_clevel() {
            self.best.increasing_clevel = !self.best.increasing_clevel;
        }
        self.state = State::Clevel;
        self.step_size = SOFT_STEP_SIZE;
        self.readapt_from = Readapt::Soft;
    }

    /// Full re-exploration from the codec/filter grid in double steps.
    pub(crate) fn init_hard(&mut self) {
        self.state = State::CodecFilter;
        self.step_size = HARD_STEP_SIZE;
        self.readapt_from = Readapt::Hard;
        self.threads_for_comp = self.config.perf_mode != PerfMode::Decomp;
        if Btune::has_ended_shuffle(&self.best) {
            self.best.increasing_shuffle = !self.best.increasing_shuffle;
        }
    }

    /// Entry scheduling when the configuration allows no hard readapts.
    pub(crate) fn init_without_hards(&mut self) {
        let behaviour = self.config.behaviour;
        let minimum_hards: u32 = if self.config.cparams_hint { 0 } else { 1 };
        match behaviour.repeat_mode {
            RepeatMode::All if behaviour.nhards_before_stop > minimum_hards => {
                self.init_hard();
            }
            RepeatMode::All | RepeatMode::Soft if behaviour.nsofts_before_hard > 0 => {
                self.init_soft();
            }
            RepeatMode::Stop if minimum_hards == 0 && behaviour.nsofts_before_hard > 0 => {
                self.init_soft();
            }
            _ => {
                self.state = State::Stop;
                self.readapt_from = Readapt::Wait;
            }
        }
        self.is_repeating = true;
    }

    // ── Context plumbing ─────────────────────────────────────────────────────

    /// Read the host's current parameters into a candidate record (used for
    /// the `cparams_hint` seed).
    fn extract_cparams(&self, ctx: &CompressContext) -> Cparams {
        let mut cp = Cparams::default();
        cp.compcode = ctx.compcode;
        cp.filter = ctx.filters[MAX_FILTER_SLOTS - 1];
        cp.clevel = ctx.clevel;
        cp.splitmode = ctx.splitmode;
        cp.blocksize = ctx.blocksize;
        cp.shufflesize = ctx.typesize;
        cp.nthreads_comp = ctx.nthreads;
        cp.nthreads_decomp = match self.dctx.as_ref() {
            Some(d) => d.nthreads,
            None => self.nthreads_decomp,
        };
        cp
    }

    fn apply_hint(&mut self, hint: Cparams) {
        self.best = hint;
        self.aux = hint;
    }

    /// Write the candidate into the host context: filter pipeline, clamped
    /// clevel, staged thread counts.
    pub(crate) fn apply_aux(&mut self, ctx: &mut CompressContext) {
        let tradeoff = self.config.tradeoff;
        let cp = &mut self.aux;

        // Dense codecs get diminishing returns past these levels.
        let dense = matches!(cp.compcode, Codec::Zstd | Codec::Zlib);
        if (BAND_LOW..=BAND_HIGH).contains(&tradeoff) && dense && cp.clevel >= 3 {
            cp.clevel = 3;
        }
        if tradeoff >= BAND_HIGH && cp.clevel >= 6 {
            cp.clevel = 6;
        }

        ctx.compcode = cp.compcode;
        ctx.filters = [Filter::NoFilter; MAX_FILTER_SLOTS];
        ctx.filters_meta = [0; MAX_FILTER_SLOTS];
        ctx.filters[MAX_FILTER_SLOTS - 1] = cp.filter;
        if cp.filter == Filter::ByteDelta {
            // BYTEDELTA only makes sense on shuffled lanes; both slots carry
            // the element size.
            ctx.filters[MAX_FILTER_SLOTS - 2] = Filter::Shuffle;
            let meta = ctx.itemsize.clamp(0, 255) as u8;
            ctx.filters_meta[MAX_FILTER_SLOTS - 2] = meta;
            ctx.filters_meta[MAX_FILTER_SLOTS - 1] = meta;
        }

        ctx.splitmode = cp.splitmode;
        ctx.clevel = cp.clevel;
        if cp.blocksize != 0 {
            ctx.blocksize = cp.blocksize;
        }
        ctx.typesize = cp.shufflesize;
        ctx.new_nthreads = cp.nthreads_comp;
        match self.dctx.as_mut() {
            Some(d) => d.new_nthreads = cp.nthreads_decomp,
            None => self.nthreads_decomp = cp.nthreads_decomp,
        }
    }
}
