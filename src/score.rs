//! Score model: collapse (ctime, cbytes, dtime) into one scalar and decide
//! whether a candidate beats the current best under the configured tradeoff.

use crate::config::{PerfMode, BAND_HIGH, BAND_LOW, KB};
use crate::tune_warn;

/// Scalar score for one measured chunk; lower is better.
///
/// The transfer term is `cbytes` expressed in KB divided by the configured
/// bandwidth in KB/s, i.e. the seconds the compressed chunk would spend on
/// the wire.
pub fn score_function(
    perf_mode: PerfMode,
    bandwidth: u32,
    ctime: f64,
    cbytes: usize,
    dtime: f64,
) -> f64 {
    let transfer = (cbytes as f64 / f64::from(KB)) / f64::from(bandwidth);
    match perf_mode {
        PerfMode::Comp => ctime + transfer,
        PerfMode::Decomp => transfer + dtime,
        PerfMode::Balanced => ctime + transfer + dtime,
        PerfMode::Auto => {
            tune_warn!("unresolved AUTO performance mode in score, treating as COMP");
            ctime + transfer
        }
    }
}

/// Arithmetic mean of the sample window.
///
/// The window currently holds a single sample per candidate; this stays an
/// identity on purpose and must not grow the window silently.
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Decide improvement from the two quotients:
/// `score_coef = best.score / candidate.score` (higher = candidate faster),
/// `cratio_coef = candidate.cratio / best.cratio` (higher = candidate smaller).
///
/// Each tradeoff band accepts a different menu of (ratio, speed) exchanges;
/// the high band accepts nothing but a better ratio.
pub fn has_improved(tradeoff: f64, score_coef: f64, cratio_coef: f64) -> bool {
    let (s, c) = (score_coef, cratio_coef);
    if tradeoff <= BAND_LOW {
        return (c > 1.0 && s > 1.0)
            || (c > 0.5 && s > 2.0)
            || (c > 0.67 && s > 1.3)
            || (c > 2.0 && s > 0.7);
    }
    if tradeoff <= BAND_HIGH {
        return (c > 1.0 && s > 1.0) || (c > 1.1 && s > 0.8) || (c > 1.3 && s > 0.5);
    }
    if tradeoff <= 1.0 {
        return c > 1.0;
    }
    tune_warn!("unknown tradeoff {}, it must be between 0.0 and 1.0", tradeoff);
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GBPS10;

    #[test]
    fn score_comp_ignores_dtime() {
        let a = score_function(PerfMode::Comp, GBPS10, 0.5, 1024 * 1024, 9.0);
        let b = score_function(PerfMode::Comp, GBPS10, 0.5, 1024 * 1024, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn score_decomp_ignores_ctime() {
        let a = score_function(PerfMode::Decomp, GBPS10, 9.0, 1024 * 1024, 0.5);
        let b = score_function(PerfMode::Decomp, GBPS10, 0.0, 1024 * 1024, 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn score_balanced_sums_all_terms() {
        let transfer = (1024.0 * 1024.0 / 1024.0) / f64::from(GBPS10);
        let got = score_function(PerfMode::Balanced, GBPS10, 0.25, 1024 * 1024, 0.75);
        assert!((got - (1.0 + transfer)).abs() < 1e-12);
    }

    #[test]
    fn score_scales_with_bandwidth() {
        let slow = score_function(PerfMode::Comp, 1024, 0.0, 1024 * 1024, 0.0);
        let fast = score_function(PerfMode::Comp, 1024 * 1024, 0.0, 1024 * 1024, 0.0);
        assert!(slow > fast);
        assert_eq!(slow, 1.0); // 1 MB over 1 MB/s
    }

    #[test]
    fn mean_of_one_sample_is_identity() {
        assert_eq!(mean(&[0.123]), 0.123);
    }

    // Low band: a large speed win buys a small ratio loss, and vice versa.
    #[test]
    fn low_band_accepts_speed_for_ratio() {
        assert!(has_improved(0.2, 2.5, 0.8));
        assert!(has_improved(0.2, 1.2, 1.05));
        assert!(!has_improved(0.2, 0.6, 1.5));
    }

    #[test]
    fn low_band_accepts_huge_ratio_for_mild_slowdown() {
        assert!(has_improved(0.1, 0.71, 2.1));
        assert!(!has_improved(0.1, 0.69, 2.1));
    }

    #[test]
    fn mid_band_menu() {
        assert!(has_improved(0.5, 1.01, 1.01));
        assert!(has_improved(0.5, 0.81, 1.11));
        assert!(has_improved(0.5, 0.51, 1.31));
        assert!(!has_improved(0.5, 0.81, 1.05));
        assert!(!has_improved(0.5, 2.0, 0.99));
    }

    #[test]
    fn high_band_only_ratio_counts() {
        assert!(has_improved(0.9, 0.1, 1.001));
        assert!(!has_improved(0.9, 10.0, 1.0));
        assert!(!has_improved(0.9, 10.0, 0.99));
    }

    #[test]
    fn band_edges_are_inclusive() {
        // Exactly 1/3 still uses the low menu; exactly 2/3 the mid menu.
        assert!(has_improved(1.0 / 3.0, 2.5, 0.8));
        assert!(has_improved(2.0 / 3.0, 0.81, 1.11));
        // A tiny ratio win with a terrible score is only enough above 2/3.
        assert!(!has_improved(2.0 / 3.0, 0.1, 1.05));
        assert!(has_improved(2.0 / 3.0 + 1e-9, 0.1, 1.05));
    }
}
