//! Candidate generation: `next_cparams` copies the champion into the
//! candidate slot and mutates it along the dimension the current phase owns.

use crate::context::{CompressContext, DecompressContext};
use crate::cparams::{Codec, Filter, SplitMode};
use crate::config::PerfMode;
use crate::inference::{most_predicted, ChunkFeatures, Prediction};
use crate::probe::{estimate_cratio, round_trip_speed, zeros_speed, PROBE_IPSHIFT, PROBE_MINLEN};
use crate::trace;

use super::{Btune, State, MAX_SHUFFLE, MIN_BITSHUFFLE, MIN_SHUFFLE, MIN_THREADS};

impl Btune {
    /// Produce the next candidate in the host context.
    ///
    /// Under `Stop` nothing moves; under `Waiting` the champion is re-emitted
    /// unchanged while the wait counter advances.
    pub fn next_cparams(&mut self, ctx: &mut CompressContext) {
        self.seed_from_inference(ctx);

        if trace::enabled() && ctx.nchunks == 0 && self.state != State::Stop {
            trace::table_header();
        }

        self.aux = self.best;

        match self.state {
            // Cycle codec × filter × split combinations.
            State::CodecFilter => {
                let n_filters_splits = self.filters.len() * 2;
                let index = self.aux_index as usize;
                self.aux.compcode = self.codecs[index / n_filters_splits];
                self.aux.filter = self.filters[(index % n_filters_splits) / 2];

                self.aux.splitmode = if self.splitmode == SplitMode::Auto {
                    if index % 2 == 0 {
                        SplitMode::Always
                    } else {
                        SplitMode::Never
                    }
                } else {
                    self.splitmode
                };

                // First visit to a dense codec starts mid-range; level 9
                // first would dominate the whole pass's time budget.
                let perf_mode = self.config.perf_mode;
                if matches!(perf_mode, PerfMode::Comp | PerfMode::Balanced)
                    && matches!(self.aux.compcode, Codec::Zstd | Codec::Zlib)
                    && self.nhards == 0
                {
                    self.aux.clevel = 3;
                }
                if self.inference_ended {
                    self.aux_index += 1;
                }
            }

            State::ShuffleSize => {
                self.aux_index += 1;
                if self.aux.increasing_shuffle {
                    if self.aux.shufflesize < MAX_SHUFFLE {
                        self.aux.shufflesize <<= 1;
                    }
                } else {
                    let min_shuffle = if self.aux.filter == Filter::Shuffle {
                        MIN_SHUFFLE
                    } else {
                        MIN_BITSHUFFLE
                    };
                    if self.aux.shufflesize > min_shuffle {
                        self.aux.shufflesize >>= 1;
                    }
                }
            }

            State::Threads => {
                self.aux_index += 1;
                let nthreads = if self.threads_for_comp {
                    &mut self.aux.nthreads_comp
                } else {
                    &mut self.aux.nthreads_decomp
                };
                if self.aux.increasing_nthreads {
                    if *nthreads < self.max_threads {
                        *nthreads += 1;
                    }
                } else if *nthreads > MIN_THREADS {
                    *nthreads -= 1;
                }
            }

            State::Clevel => {
                self.aux_index += 1;
                if !self.has_ended_clevel() {
                    if self.aux.increasing_clevel {
                        self.clevel_index += self.step_size;
                    } else {
                        self.clevel_index -= self.step_size;
                    }
                }
                self.aux.clevel = self.clevels[self.clevel_index as usize];
                // zstd level 9 buys almost nothing over 8 and costs plenty.
                if self.aux.clevel == 9 && self.aux.compcode == Codec::Zstd {
                    self.aux.clevel = 8;
                }
            }

            State::Memcpy => {
                self.aux_index += 1;
                self.aux.clevel = 0;
            }

            State::Waiting => {
                self.nwaitings += 1;
            }

            State::Stop => return,
        }

        self.apply_aux(ctx);
        if ctx.blocksize > ctx.sourcesize {
            ctx.blocksize = ctx.sourcesize;
        }
    }

    /// Drive the inference hook: spend the seeding budget chunk by chunk,
    /// then fall back once to the most-predicted configuration.
    fn seed_from_inference(&mut self, ctx: &mut CompressContext) {
        let seeded = if self.inference_count != 0 {
            if self.inference_count > 0 {
                self.inference_count -= 1;
            }
            self.run_inference(ctx)
        } else if !self.inference_ended {
            self.inference_ended = true;
            most_predicted(&self.predictions)
        } else {
            None
        };

        if let Some(p) = seeded {
            self.apply_prediction(p);
        }
    }

    /// Ask the model for a prediction on the pending chunk, if both the
    /// model and the chunk are available.
    fn run_inference(&mut self, ctx: &mut CompressContext) -> Option<Prediction> {
        self.inference.as_ref()?;
        let (cratio, chunk_len) = {
            let src = ctx.src.as_ref()?;
            (estimate_cratio(src, PROBE_MINLEN, PROBE_IPSHIFT), src.len())
        };

        if self.zeros_speed < 0.0 {
            let mut tmp_cctx = CompressContext::new(ctx.itemsize, ctx.nthreads);
            let mut tmp_dctx = DecompressContext::new(self.nthreads_decomp);
            self.zeros_speed = zeros_speed(
                self.engine.as_ref(),
                &mut tmp_cctx,
                &mut tmp_dctx,
                chunk_len,
            )
            .unwrap_or(-1.0);
        }

        let speed = {
            let src = ctx.src.as_ref()?;
            let mut tmp_cctx = CompressContext::new(ctx.itemsize, ctx.nthreads);
            let mut tmp_dctx = DecompressContext::new(self.nthreads_decomp);
            round_trip_speed(self.engine.as_ref(), &mut tmp_cctx, &mut tmp_dctx, src).ok()?
        };

        let features = ChunkFeatures {
            cratio,
            speed: speed / self.zeros_speed.max(1e-6),
        };
        let prediction = self.inference.as_mut()?.predict(&features);
        if let Some(p) = prediction {
            self.predictions.push(p);
        }
        prediction
    }
}
