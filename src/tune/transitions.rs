//! Measurement intake and phase advancement.
//!
//! `update` scores the candidate that `next_cparams` emitted, decides whether
//! it dethrones the champion, and advances the walk: a phase ends when its
//! direction hits an edge or when the probe-and-retry heuristic gives up, and
//! the WAITING pseudo-phase runs the soft/hard/wait scheduling table.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{PerfMode, RepeatMode, ENABLE_MEMCPY, ENABLE_SHUFFLE_SIZE, ENABLE_THREADS};
use crate::context::{CompressContext, DecompressContext, MAX_OVERHEAD};
use crate::cparams::{Filter, SplitMode};
use crate::score::{has_improved, mean, score_function};
use crate::trace;

use super::{
    Btune, Readapt, State, MAX_STATE_THREADS, REPEATS_PER_CPARAMS, SOFT_STEP_SIZE,
};

/// `n` is a positive multiple of `m` (false when `m` is zero).
#[inline]
fn is_multiple(n: u32, m: u32) -> bool {
    m != 0 && n % m == 0
}

impl Btune {
    /// Fold one measured chunk into the walk.
    ///
    /// `ctime` is the host-measured compression time in seconds; the
    /// compressed size is read from the context.  When the performance mode
    /// wants decompression timing and the compressed chunk is retained, a
    /// timed decompression runs here with the tuner's decompression thread
    /// count.
    pub fn update(&mut self, ctx: &mut CompressContext, ctime: f64) {
        if self.state == State::Stop {
            return;
        }

        self.steps_count += 1;
        let cbytes = ctx.destsize.max(0) as usize;
        let behaviour = self.config.behaviour;

        // Waiting chunks between readapt boundaries are not worth a timed
        // decompression.
        let waiting_idle = self.state == State::Waiting
            && (behaviour.nwaits_before_readapt == 0
                || !is_multiple(self.nwaitings, behaviour.nwaits_before_readapt));
        let wants_dtime =
            matches!(self.config.perf_mode, PerfMode::Decomp | PerfMode::Balanced);

        let mut dtime = 0.0;
        if !waiting_idle && wants_dtime {
            if let Some(dest) = ctx.dest.take() {
                let mut scratch = vec![0u8; ctx.sourcesize.max(0) as usize];
                let engine = Arc::clone(&self.engine);
                let start = Instant::now();
                let _ = match self.dctx.as_mut() {
                    Some(dctx) => engine.decompress(dctx, &dest, &mut scratch),
                    None => {
                        let mut dctx = DecompressContext::new(self.nthreads_decomp);
                        engine.decompress(&mut dctx, &dest, &mut scratch)
                    }
                };
                dtime = start.elapsed().as_secs_f64();
                ctx.dest = Some(dest);
            }
        }

        let score = score_function(
            self.config.perf_mode,
            self.config.bandwidth,
            ctime,
            cbytes,
            dtime,
        );
        debug_assert!(score > 0.0, "score must be positive");
        let cratio = f64::from(ctx.sourcesize) / cbytes.max(1) as f64;

        self.aux.score = score;
        self.aux.cratio = cratio;
        self.aux.ctime = ctime;
        self.aux.dtime = dtime;
        self.current_scores[self.rep_index] = score;
        self.current_cratios[self.rep_index] = cratio;
        self.rep_index += 1;
        if self.rep_index < REPEATS_PER_CPARAMS {
            return;
        }

        let score = mean(&self.current_scores);
        let cratio = mean(&self.current_cratios);
        let cratio_coef = cratio / self.best.cratio;
        let score_coef = self.best.score / score;

        // THREADS moves a single dimension; judge it on that dimension's raw
        // time instead of the score blend.
        let mut improved = if self.state == State::Threads {
            if self.threads_for_comp {
                ctime < self.best.ctime
            } else {
                dtime < self.best.dtime
            }
        } else {
            has_improved(self.config.tradeoff, score_coef, cratio_coef)
        };

        let mut winner = '-';
        // Special-value chunks compress to the container overhead plus one
        // element; their score carries no signal.
        if cbytes as i32 <= MAX_OVERHEAD + ctx.typesize {
            improved = false;
            winner = 'S';
        }
        if improved {
            winner = 'W';
        }

        if !self.is_repeating && trace::enabled() {
            let split = u8::from(self.aux.splitmode == SplitMode::Always);
            trace::table_row(
                self.aux.compcode.name(),
                self.aux.filter.id(),
                split,
                self.aux.clevel,
                self.aux.blocksize / 1024,
                self.aux.shufflesize,
                self.aux.nthreads_comp,
                self.aux.nthreads_decomp,
                score,
                cratio,
                self.state_name(),
                self.readapt_from.as_str(),
                winner,
            );
        }

        if improved {
            self.best = self.aux;
        }
        self.rep_index = 0;
        self.advance(improved);
    }

    /// Flip the entered phase's direction flag when the champion already sits
    /// on that dimension's edge.
    fn flip_on_entry(&mut self) {
        match self.state {
            State::ShuffleSize => {
                if Btune::has_ended_shuffle(&self.best) {
                    self.best.increasing_shuffle = !self.best.increasing_shuffle;
                }
            }
            State::Threads => {
                if self.has_ended_threads() {
                    self.best.increasing_nthreads = !self.best.increasing_nthreads;
                }
            }
            State::Clevel => {
                if self.has_ended_clevel() {
                    self.best.increasing_clevel = !self.best.increasing_clevel;
                }
            }
            _ => {}
        }
    }

    /// Pick the phase that follows CODEC_FILTER or SHUFFLE_SIZE, skipping
    /// phases that are compiled out or cannot move.
    fn enter_threads_or_clevel(&mut self) {
        self.aux_index = 0;
        self.state = if ENABLE_THREADS { State::Threads } else { State::Clevel };
        if self.state == State::Threads && self.max_threads == 1 {
            self.state = State::Clevel;
        }
        self.flip_on_entry();
    }

    /// Phase advancement after one scored candidate.
    pub(crate) fn advance(&mut self, improved: bool) {
        let first_time = self.aux_index == 1;
        match self.state {
            State::CodecFilter => {
                let mut aux_index_max = self.codecs.len() * self.filters.len();
                if self.splitmode == SplitMode::Auto {
                    aux_index_max *= 2;
                }

                if self.aux_index as usize >= aux_index_max {
                    if ENABLE_SHUFFLE_SIZE {
                        let shufflesize = self.best.shufflesize;
                        let is_power_2 = (shufflesize & (shufflesize - 1)) == 0;
                        if self.best.filter != Filter::NoFilter && is_power_2 {
                            self.aux_index = 0;
                            self.state = State::ShuffleSize;
                            self.flip_on_entry();
                        } else {
                            self.enter_threads_or_clevel();
                        }
                    } else {
                        self.enter_threads_or_clevel();
                    }
                }
            }

            State::ShuffleSize => {
                if !improved && first_time {
                    self.best.increasing_shuffle = !self.best.increasing_shuffle;
                }
                if Btune::has_ended_shuffle(&self.best) || (!improved && !first_time) {
                    self.enter_threads_or_clevel();
                }
            }

            State::Threads => {
                let first_time = self.aux_index % MAX_STATE_THREADS == 1;
                if !improved && first_time {
                    self.best.increasing_nthreads = !self.best.increasing_nthreads;
                }
                if self.has_ended_threads() || (!improved && !first_time) {
                    if self.config.perf_mode == PerfMode::Balanced {
                        // Switch to the other thread dimension once; the
                        // offset marks the second leg.
                        if self.aux_index < MAX_STATE_THREADS {
                            self.threads_for_comp = !self.threads_for_comp;
                            self.aux_index = MAX_STATE_THREADS;
                            if self.has_ended_threads() {
                                self.best.increasing_nthreads =
                                    !self.best.increasing_nthreads;
                            }
                        }
                    } else {
                        self.aux_index = MAX_STATE_THREADS + 1;
                    }
                    if self.aux_index > MAX_STATE_THREADS {
                        self.aux_index = 0;
                        self.state = State::Clevel;
                        self.flip_on_entry();
                    }
                }
            }

            State::Clevel => {
                if !improved && first_time {
                    self.best.increasing_clevel = !self.best.increasing_clevel;
                }
                if self.has_ended_clevel() || (!improved && !first_time) {
                    self.aux_index = 0;
                    self.state = if ENABLE_MEMCPY { State::Memcpy } else { State::Waiting };
                }
            }

            State::Memcpy => {
                self.aux_index = 0;
                self.state = State::Waiting;
            }

            State::Waiting | State::Stop => {}
        }

        if self.state == State::Waiting {
            self.process_waiting_state();
        }
    }

    /// The soft/hard/wait scheduling table, run every time the walk lands on
    /// WAITING.
    fn process_waiting_state(&mut self) {
        let behaviour = self.config.behaviour;
        let minimum_hards: u32 = if self.config.cparams_hint { 0 } else { 1 };

        match self.readapt_from {
            Readapt::Hard => {
                self.nhards += 1;
                if behaviour.nhards_before_stop == minimum_hards
                    || is_multiple(self.nhards, behaviour.nhards_before_stop)
                {
                    // The configured hards are spent; what happens next is
                    // the repeat mode's call.
                    self.is_repeating = true;
                    if behaviour.nsofts_before_hard > 0
                        && behaviour.repeat_mode != RepeatMode::Stop
                    {
                        self.init_soft();
                    } else if behaviour.repeat_mode != RepeatMode::All {
                        self.state = State::Stop;
                    } else if behaviour.nwaits_before_readapt > 0 {
                        self.state = State::Waiting;
                        self.readapt_from = Readapt::Wait;
                    } else if behaviour.nhards_before_stop > minimum_hards {
                        self.init_hard();
                    } else {
                        self.state = State::Stop;
                    }
                } else if behaviour.nsofts_before_hard > 0 {
                    self.init_soft();
                } else if behaviour.nwaits_before_readapt > 0 {
                    self.state = State::Waiting;
                    self.readapt_from = Readapt::Wait;
                } else {
                    self.init_hard();
                }
            }

            Readapt::Soft => {
                self.nsofts += 1;
                self.readapt_from = Readapt::Wait;
                if behaviour.nwaits_before_readapt == 0 {
                    let last_soft = behaviour.nsofts_before_hard == 0
                        || is_multiple(self.nsofts, behaviour.nsofts_before_hard);
                    if last_soft
                        && !(self.is_repeating && behaviour.repeat_mode != RepeatMode::All)
                        && behaviour.nhards_before_stop > minimum_hards
                    {
                        self.init_hard();
                    } else if minimum_hards == 0
                        && behaviour.nhards_before_stop == 0
                        && is_multiple(self.nsofts, behaviour.nsofts_before_hard)
                        && behaviour.repeat_mode == RepeatMode::Stop
                    {
                        // Hint-seeded, soft-only schedule that asked to stop.
                        self.is_repeating = true;
                        self.state = State::Stop;
                    } else {
                        self.init_soft();
                    }
                }
            }

            Readapt::Wait => {
                let wait_done = behaviour.nwaits_before_readapt == 0
                    || (self.nwaitings != 0
                        && is_multiple(self.nwaitings, behaviour.nwaits_before_readapt));
                if wait_done {
                    let last_soft = behaviour.nsofts_before_hard == 0
                        || (self.nsofts != 0
                            && is_multiple(self.nsofts, behaviour.nsofts_before_hard));
                    if last_soft
                        && !(self.is_repeating && behaviour.repeat_mode != RepeatMode::All)
                        && behaviour.nhards_before_stop > minimum_hards
                    {
                        self.init_hard();
                    } else if behaviour.nsofts_before_hard > 0
                        && !(self.is_repeating && behaviour.repeat_mode == RepeatMode::Stop)
                    {
                        self.init_soft();
                    }
                }
            }
        }

        // The last hard of a schedule refines instead of leaping.
        if self.readapt_from == Readapt::Hard
            && behaviour.nhards_before_stop > 0
            && self.nhards == behaviour.nhards_before_stop - 1
        {
            self.step_size = SOFT_STEP_SIZE;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
