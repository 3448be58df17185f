//! Compression-parameter records and the enums they range over.
//!
//! [`Cparams`] is the unit the tuner reasons about: one full candidate
//! configuration plus the direction flags that steer the walk and the metrics
//! measured for it.  The tuner keeps two of these alive — the current best
//! and the candidate under evaluation — and copies one onto the other as
//! decisions land.

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Block codecs the tuner can search over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Codec {
    BloscLz = 0,
    Lz4 = 1,
    Lz4Hc = 2,
    Zlib = 3,
    Zstd = 4,
}

impl Codec {
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Codec> {
        match id {
            0 => Some(Codec::BloscLz),
            1 => Some(Codec::Lz4),
            2 => Some(Codec::Lz4Hc),
            3 => Some(Codec::Zlib),
            4 => Some(Codec::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::BloscLz => "blosclz",
            Codec::Lz4 => "lz4",
            Codec::Lz4Hc => "lz4hc",
            Codec::Zlib => "zlib",
            Codec::Zstd => "zstd",
        }
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Pre-compression filters.  BYTEDELTA only works on shuffled data, so the
/// tuner always pairs it with a SHUFFLE in the preceding pipeline slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Filter {
    NoFilter = 0,
    Shuffle = 1,
    BitShuffle = 2,
    ByteDelta = 3,
}

impl Filter {
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::NoFilter => "nofilter",
            Filter::Shuffle => "shuffle",
            Filter::BitShuffle => "bitshuffle",
            Filter::ByteDelta => "bytedelta",
        }
    }
}

// ── Split mode ────────────────────────────────────────────────────────────────

/// Whether blocks are split into one stream per byte-plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SplitMode {
    Always = 1,
    Never = 2,
    /// Let the tuner alternate between the two while it searches.
    Auto = 3,
}

// ── Candidate record ──────────────────────────────────────────────────────────

/// One candidate configuration together with its walk state and measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cparams {
    pub compcode: Codec,
    pub filter: Filter,
    pub splitmode: SplitMode,
    pub clevel: i32,
    /// Block size in bytes; 0 lets the engine pick.
    pub blocksize: i32,
    /// Shuffle granularity in bytes; always a power of two within the legal
    /// range for the active filter.
    pub shufflesize: i32,
    pub nthreads_comp: i32,
    pub nthreads_decomp: i32,

    // Direction flags for the dimensions the walk moves along.
    pub increasing_clevel: bool,
    pub increasing_shuffle: bool,
    pub increasing_nthreads: bool,

    // Metrics measured for this candidate (lower score is better).
    pub score: f64,
    pub cratio: f64,
    pub ctime: f64,
    pub dtime: f64,
}

impl Default for Cparams {
    fn default() -> Self {
        Cparams {
            compcode: Codec::Lz4,
            filter: Filter::Shuffle,
            splitmode: SplitMode::Always,
            clevel: 9,
            blocksize: 0,
            shufflesize: 0,
            nthreads_comp: 0,
            nthreads_decomp: 0,
            increasing_clevel: false,
            increasing_shuffle: true,
            increasing_nthreads: true,
            // Sentinel metrics: any real measurement beats them.
            score: 100.0,
            cratio: 1.0,
            ctime: 100.0,
            dtime: 100.0,
        }
    }
}

impl Cparams {
    /// Structural equality over the tunable parameters, ignoring direction
    /// flags and measurements.
    pub fn same_parameters(&self, other: &Cparams) -> bool {
        self.compcode == other.compcode
            && self.filter == other.filter
            && self.splitmode == other.splitmode
            && self.clevel == other.clevel
            && self.blocksize == other.blocksize
            && self.shufflesize == other.shufflesize
            && self.nthreads_comp == other.nthreads_comp
            && self.nthreads_decomp == other.nthreads_decomp
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_id_roundtrip() {
        for codec in [Codec::BloscLz, Codec::Lz4, Codec::Lz4Hc, Codec::Zlib, Codec::Zstd] {
            assert_eq!(Codec::from_id(codec.id()), Some(codec));
        }
        assert_eq!(Codec::from_id(244), None);
    }

    #[test]
    fn default_candidate_seed() {
        let cp = Cparams::default();
        assert_eq!(cp.compcode, Codec::Lz4);
        assert_eq!(cp.filter, Filter::Shuffle);
        assert_eq!(cp.splitmode, SplitMode::Always);
        assert_eq!(cp.clevel, 9);
        assert!(!cp.increasing_clevel);
        assert!(cp.increasing_shuffle);
    }

    #[test]
    fn same_parameters_ignores_metrics() {
        let a = Cparams::default();
        let mut b = Cparams::default();
        b.score = 0.5;
        b.increasing_clevel = true;
        assert!(a.same_parameters(&b));
        b.clevel = 3;
        assert!(!a.same_parameters(&b));
    }
}
