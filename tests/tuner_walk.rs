//! Integration tests for the tuning walk: seed scenarios, invariants over
//! whole runs, and determinism of the candidate sequence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blocktune::{
    Behaviour, Btune, ChunkFeatures, Codec, CompressContext, DecompressContext, Engine,
    EngineError, Filter, Inference, Instrumentation, PerfMode, Prediction, Readapt, RepeatMode,
    SplitMode, State, TunerConfig,
};

// ─────────────────────────────────────────────────────────────────────────────
// Stub engine: no work, all codecs present.
// ─────────────────────────────────────────────────────────────────────────────

struct StubEngine;

impl Engine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn compress(&self, ctx: &mut CompressContext) -> Result<usize, EngineError> {
        let len = ctx.src.as_ref().map(Vec::len).unwrap_or(0);
        ctx.sourcesize = len as i32;
        ctx.destsize = len as i32;
        Ok(len)
    }

    fn decompress(
        &self,
        _dctx: &mut DecompressContext,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, EngineError> {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }

    fn measure(
        &self,
        _cctx: &mut CompressContext,
        _dctx: &mut DecompressContext,
        _src: &[u8],
    ) -> Result<Instrumentation, EngineError> {
        Ok(Instrumentation {
            cspeed: 1000.0,
            filter_speed: 1000.0,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn behaviour(waits: u32, softs: u32, hards: u32, repeat: RepeatMode) -> Behaviour {
    Behaviour {
        nwaits_before_readapt: waits,
        nsofts_before_hard: softs,
        nhards_before_stop: hards,
        repeat_mode: repeat,
    }
}

fn make_tuner(config: TunerConfig, nthreads: i32) -> (Btune, CompressContext) {
    let mut cctx = CompressContext::new(8, nthreads);
    let tuner = Btune::init(Some(config), &mut cctx, None, Arc::new(StubEngine));
    (tuner, cctx)
}

/// One chunk: emit a candidate, pretend the host measured it, fold it back.
fn step(tuner: &mut Btune, ctx: &mut CompressContext, ctime: f64, destsize: i32) {
    tuner.next_cparams(ctx);
    ctx.sourcesize = 1 << 20;
    ctx.destsize = destsize;
    ctx.nchunks += 1;
    tuner.update(ctx, ctime);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    codec: Codec,
    filter: Filter,
    split: SplitMode,
    clevel: i32,
    typesize: i32,
    nthreads: i32,
}

fn snapshot(ctx: &CompressContext) -> Snapshot {
    Snapshot {
        codec: ctx.compcode,
        filter: ctx.filters[ctx.filters.len() - 1],
        split: ctx.splitmode,
        clevel: ctx.clevel,
        typesize: ctx.typesize,
        nthreads: ctx.new_nthreads,
    }
}

/// The context-level invariants that must hold after every tuner call.
fn check_invariants(tuner: &Btune, ctx: &CompressContext, max_threads: i32) {
    let best = tuner.best();
    assert!((1..=9).contains(&ctx.clevel), "ctx clevel {} out of range", ctx.clevel);
    assert!((1..=9).contains(&best.clevel), "best clevel {} out of range", best.clevel);
    assert!(
        best.shufflesize > 0
            && best.shufflesize <= 16
            && (best.shufflesize & (best.shufflesize - 1)) == 0,
        "shufflesize {} must be a power of two in [1, 16]",
        best.shufflesize
    );
    assert!(best.nthreads_comp >= 1 && best.nthreads_comp <= max_threads);
    assert!(best.nthreads_decomp >= 1 && best.nthreads_decomp <= max_threads);
}

// ─────────────────────────────────────────────────────────────────────────────
// Seed scenario: high-ratio mode, no hint
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hcr_mode_searches_dense_codecs_only() {
    let config = TunerConfig {
        tradeoff: 1.0,
        perf_mode: PerfMode::Comp,
        behaviour: behaviour(0, 0, 1, RepeatMode::Stop),
        ..TunerConfig::default()
    };
    let (mut tuner, mut ctx) = make_tuner(config, 1);

    assert!(tuner
        .codecs()
        .iter()
        .all(|c| matches!(c, Codec::Zstd | Codec::Zlib)));

    tuner.next_cparams(&mut ctx);
    assert_eq!(ctx.compcode, tuner.codecs()[0]);
    assert!(ctx.clevel <= 8, "first dense candidate must not start at 9");
}

#[test]
fn mid_band_includes_lz4_and_blosclz() {
    let config = TunerConfig {
        tradeoff: 0.5,
        perf_mode: PerfMode::Comp,
        ..TunerConfig::default()
    };
    let (tuner, _ctx) = make_tuner(config, 1);
    assert_eq!(tuner.codecs(), &[Codec::Lz4, Codec::BloscLz]);
}

#[test]
fn decomp_mode_adds_lz4hc() {
    let config = TunerConfig {
        tradeoff: 0.2,
        perf_mode: PerfMode::Decomp,
        ..TunerConfig::default()
    };
    let (tuner, _ctx) = make_tuner(config, 1);
    assert!(tuner.codecs().contains(&Codec::Lz4Hc));
    assert_eq!(tuner.codecs()[0], Codec::Lz4);
}

// ─────────────────────────────────────────────────────────────────────────────
// Seed scenario: default balanced schedule
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balanced_visits_codec_filter_then_clevel_then_waits() {
    let config = TunerConfig {
        tradeoff: 0.5,
        perf_mode: PerfMode::Balanced,
        behaviour: behaviour(0, 5, 1, RepeatMode::All),
        ..TunerConfig::default()
    };
    // One thread so the THREADS phase cannot move and is skipped.
    let (mut tuner, mut ctx) = make_tuner(config, 1);

    let mut states = Vec::new();
    for _ in 0..200 {
        step(&mut tuner, &mut ctx, 0.01, 400_000);
        if states.last() != Some(&tuner.state()) {
            states.push(tuner.state());
        }
        // The second hard must not begin until five softs have run.
        if tuner.readapt_from() == Readapt::Hard && tuner.nhards() == 1 {
            assert!(tuner.nsofts() >= 5, "hard attempted after {} softs", tuner.nsofts());
            break;
        }
    }

    let codec_filter = states.iter().position(|s| *s == State::CodecFilter);
    let clevel = states.iter().position(|s| *s == State::Clevel);
    assert!(codec_filter.is_some() && clevel.is_some());
    assert!(codec_filter < clevel, "CODEC_FILTER must precede CLEVEL: {:?}", states);
    assert!(!states.contains(&State::Threads), "THREADS must be skipped at one thread");
}

// ─────────────────────────────────────────────────────────────────────────────
// Invariants over a whole run
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn invariants_hold_across_modes() {
    for (tradeoff, perf_mode) in [
        (0.1, PerfMode::Comp),
        (0.5, PerfMode::Balanced),
        (0.9, PerfMode::Comp),
    ] {
        let config = TunerConfig {
            tradeoff,
            perf_mode,
            behaviour: behaviour(1, 2, 2, RepeatMode::All),
            ..TunerConfig::default()
        };
        let (mut tuner, mut ctx) = make_tuner(config, 4);

        // Vary the synthetic measurements to push the walk around.
        for i in 0..300u32 {
            let ctime = 0.002 + 0.0005 * f64::from(i % 7);
            let destsize = 300_000 + 20_000 * (i as i32 % 5);
            tuner.next_cparams(&mut ctx);
            check_invariants(&tuner, &ctx, 4);
            ctx.sourcesize = 1 << 20;
            ctx.destsize = destsize;
            ctx.nchunks += 1;
            tuner.update(&mut ctx, ctime);
            check_invariants(&tuner, &ctx, 4);
        }
    }
}

#[test]
fn best_score_is_monotone_at_constant_ratio() {
    // With the compressed size pinned, acceptance requires a strictly better
    // score, so the champion's score can only go down.
    let config = TunerConfig {
        tradeoff: 0.5,
        perf_mode: PerfMode::Comp,
        behaviour: behaviour(0, 3, 2, RepeatMode::All),
        ..TunerConfig::default()
    };
    let (mut tuner, mut ctx) = make_tuner(config, 2);

    let mut last_best = tuner.best().score;
    for i in 0..200u32 {
        let ctime = 0.01 + 0.003 * f64::from(i % 11);
        step(&mut tuner, &mut ctx, ctime, 400_000);
        let score = tuner.best().score;
        assert!(
            score <= last_best + 1e-12,
            "best score went up: {} -> {}",
            last_best,
            score
        );
        last_best = score;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn same_measurements_same_candidates() {
    let run = || {
        let config = TunerConfig {
            tradeoff: 0.3,
            perf_mode: PerfMode::Comp,
            behaviour: behaviour(0, 2, 2, RepeatMode::All),
            ..TunerConfig::default()
        };
        let (mut tuner, mut ctx) = make_tuner(config, 4);
        let mut seen = Vec::new();
        for i in 0..150u32 {
            tuner.next_cparams(&mut ctx);
            seen.push(snapshot(&ctx));
            ctx.sourcesize = 1 << 20;
            ctx.destsize = 250_000 + 10_000 * (i as i32 % 3);
            ctx.nchunks += 1;
            tuner.update(&mut ctx, 0.004 + 0.001 * f64::from(i % 5));
        }
        seen
    };
    assert_eq!(run(), run());
}

// ─────────────────────────────────────────────────────────────────────────────
// Hint seeding
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cparams_hint_seeds_best_from_context() {
    let config = TunerConfig {
        tradeoff: 0.2,
        perf_mode: PerfMode::Comp,
        behaviour: behaviour(0, 2, 1, RepeatMode::All),
        cparams_hint: true,
        ..TunerConfig::default()
    };
    let mut cctx = CompressContext::new(4, 2);
    cctx.compcode = Codec::Lz4Hc;
    cctx.clevel = 6;
    cctx.filters[blocktune::MAX_FILTER_SLOTS - 1] = Filter::BitShuffle;
    let tuner = Btune::init(Some(config), &mut cctx, None, Arc::new(StubEngine));

    assert_eq!(tuner.best().compcode, Codec::Lz4Hc);
    assert_eq!(tuner.best().clevel, 6);
    assert_eq!(tuner.best().filter, Filter::BitShuffle);
    // The hinted codec joins the search list.
    assert!(tuner.codecs().contains(&Codec::Lz4Hc));
    // With softs configured, a hint starts with a soft readapt.
    assert_eq!(tuner.readapt_from(), Readapt::Soft);
    assert_eq!(tuner.state(), State::Clevel);
}

// ─────────────────────────────────────────────────────────────────────────────
// Inference seeding
// ─────────────────────────────────────────────────────────────────────────────

/// Model stub that always proposes the same configuration and counts calls.
struct FixedModel {
    calls: Arc<AtomicUsize>,
    prediction: Prediction,
}

impl Inference for FixedModel {
    fn predict(&mut self, features: &ChunkFeatures) -> Option<Prediction> {
        assert!(features.cratio > 0.0);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.prediction)
    }
}

#[test]
fn inference_collapses_the_search_lists() {
    let config = TunerConfig {
        tradeoff: 0.5,
        perf_mode: PerfMode::Comp,
        inference_count: 2,
        ..TunerConfig::default()
    };
    let (mut tuner, mut ctx) = make_tuner(config, 2);

    let calls = Arc::new(AtomicUsize::new(0));
    tuner.set_inference(Box::new(FixedModel {
        calls: Arc::clone(&calls),
        prediction: Prediction {
            codec: Codec::Zstd,
            filter: Filter::Shuffle,
            clevel: 5,
            splitmode: SplitMode::Never,
        },
    }));

    // The model only sees chunks the host exposes.
    ctx.src = Some(vec![0u8; 64 * 1024]);
    ctx.sourcesize = 64 * 1024;

    tuner.next_cparams(&mut ctx);
    assert_eq!(tuner.codecs(), &[Codec::Zstd]);
    assert_eq!(tuner.filters(), &[Filter::Shuffle]);
    // In COMP mode the level window opens one step around the prediction.
    assert_eq!(tuner.clevels(), &[4, 5, 6]);
    assert_eq!(ctx.splitmode, SplitMode::Never);

    ctx.destsize = 20_000;
    ctx.nchunks += 1;
    tuner.update(&mut ctx, 0.01);

    // Second seeded chunk spends the budget; the third falls back to the
    // most-predicted configuration without calling the model again.
    for _ in 0..2 {
        ctx.src = Some(vec![0u8; 64 * 1024]);
        tuner.next_cparams(&mut ctx);
        ctx.destsize = 20_000;
        ctx.nchunks += 1;
        tuner.update(&mut ctx, 0.01);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(tuner.codecs(), &[Codec::Zstd]);
}

#[test]
fn bytedelta_gets_a_shuffle_companion() {
    // Hint BYTEDELTA in and start with a soft readapt: the CLEVEL phase keeps
    // the champion's filter, so the emitted pipeline shows the coupling.
    let config = TunerConfig {
        tradeoff: 0.2,
        perf_mode: PerfMode::Comp,
        behaviour: behaviour(0, 1, 1, RepeatMode::All),
        cparams_hint: true,
        ..TunerConfig::default()
    };
    let mut cctx = CompressContext::new(4, 1);
    cctx.filters[blocktune::MAX_FILTER_SLOTS - 1] = Filter::ByteDelta;
    let mut tuner = Btune::init(Some(config), &mut cctx, None, Arc::new(StubEngine));
    assert_eq!(tuner.state(), State::Clevel);

    tuner.next_cparams(&mut cctx);
    let last = blocktune::MAX_FILTER_SLOTS - 1;
    assert_eq!(cctx.filters[last], Filter::ByteDelta);
    assert_eq!(cctx.filters[last - 1], Filter::Shuffle);
    assert_eq!(cctx.filters_meta[last - 1], 4, "shuffle slot must carry the element size");
    assert_eq!(cctx.filters_meta[last], 4, "bytedelta slot must carry the element size");
}
