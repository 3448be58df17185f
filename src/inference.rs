//! Seed hook for an external inference model.
//!
//! The tuner can ask an opaque model for a starting configuration on the
//! first few chunks instead of walking the full codec/filter grid.  The model
//! sees a couple of cheap chunk features (the entropy-probe ratio and a
//! speed normalized against the all-zeros round-trip) and answers with a
//! configuration, or `None` when it has no opinion.  Once the seeding budget
//! is spent, the most frequently predicted configuration is applied one last
//! time and the regular search takes over.

use std::collections::HashMap;

use crate::cparams::{Codec, Filter, SplitMode};

/// Cheap per-chunk features handed to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkFeatures {
    /// Entropy-probe compression-ratio estimate.
    pub cratio: f32,
    /// Effective round-trip speed of the chunk, in MB/s.
    pub speed: f32,
}

/// A configuration proposed by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prediction {
    pub codec: Codec,
    pub filter: Filter,
    pub clevel: i32,
    pub splitmode: SplitMode,
}

/// An inference model the host may install on the tuner.
pub trait Inference: Send {
    /// Propose a configuration for a chunk, or `None` to let the search
    /// lists decide.
    fn predict(&mut self, features: &ChunkFeatures) -> Option<Prediction>;
}

/// The configuration predicted most often so far; ties go to the earliest.
pub(crate) fn most_predicted(history: &[Prediction]) -> Option<Prediction> {
    let mut counts: HashMap<Prediction, usize> = HashMap::new();
    for p in history {
        *counts.entry(*p).or_insert(0) += 1;
    }
    let mut winner: Option<(Prediction, usize)> = None;
    for p in history {
        let count = counts[p];
        match winner {
            Some((_, best)) if best >= count => {}
            _ => winner = Some((*p, count)),
        }
    }
    winner.map(|(p, _)| p)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(codec: Codec, clevel: i32) -> Prediction {
        Prediction {
            codec,
            filter: Filter::Shuffle,
            clevel,
            splitmode: SplitMode::Always,
        }
    }

    #[test]
    fn empty_history_has_no_winner() {
        assert_eq!(most_predicted(&[]), None);
    }

    #[test]
    fn majority_wins() {
        let history = [
            pred(Codec::Lz4, 5),
            pred(Codec::Zstd, 3),
            pred(Codec::Zstd, 3),
        ];
        assert_eq!(most_predicted(&history), Some(pred(Codec::Zstd, 3)));
    }

    #[test]
    fn tie_goes_to_the_earliest() {
        let history = [
            pred(Codec::Lz4, 5),
            pred(Codec::Zstd, 3),
            pred(Codec::Zstd, 3),
            pred(Codec::Lz4, 5),
        ];
        assert_eq!(most_predicted(&history), Some(pred(Codec::Lz4, 5)));
    }
}
