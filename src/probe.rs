//! Entropy probe: a dry-run LZ scanner that estimates how well a buffer
//! would compress, without emitting a single encoded byte.
//!
//! The scanner walks the buffer once with a small direct-mapped hash table,
//! classifying every position as a literal, a match, or a run (a match at
//! distance zero, i.e. a broadcast of the previous byte), and accumulates the
//! number of output bytes a blosclz-style encoder would have produced.  The
//! estimate is exposed to the host two ways: as [`estimate_cratio`] for
//! direct calls, and as an encoder-only pseudo-codec (id 244) registered
//! through the normal codec surface.
//!
//! Only the first `min(len, 2^14)` bytes are scanned; beyond that the sample
//! is considered representative.

use crate::context::{
    CodecDescriptor, CompressContext, DecompressContext, Engine, EngineError, Instrumentation,
};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Codec id the probe registers under.
pub const ENTROPY_PROBE_ID: u8 = 244;

/// Literal run length that forces an extra control byte.
const MAX_COPY: u32 = 32;

/// Matches at or beyond this distance cost the near-match encoding.
const MAX_DISTANCE: usize = 8191;

/// Matches at or beyond this distance are not representable; emit literals.
const MAX_FARDISTANCE: usize = 65535 + MAX_DISTANCE - 1;

/// log2 of the hash-table size.  Can be tuned between 12 and 15.
const HASH_LOG: u32 = 14;
const HASH_SIZE: usize = 1 << HASH_LOG;

/// Default minimum match length accepted by the scan.
pub const PROBE_MINLEN: i32 = 3;
/// Default back-off applied after match extension.
pub const PROBE_IPSHIFT: i32 = 3;

// ── Scan helpers ──────────────────────────────────────────────────────────────

#[inline]
fn hash(seq: u32) -> usize {
    (seq.wrapping_mul(2_654_435_761) >> (32 - HASH_LOG)) as usize
}

#[inline]
fn read_u32(b: &[u8], i: usize) -> u32 {
    u32::from_le_bytes(b[i..i + 4].try_into().unwrap())
}

#[inline]
fn read_u64(b: &[u8], i: usize) -> u64 {
    u64::from_ne_bytes(b[i..i + 8].try_into().unwrap())
}

/// Extend a run (broadcast of the byte before `ip`) up to `ip_bound`.
/// Returns the first position that breaks the run.
fn get_run(b: &[u8], mut ip: usize, ip_bound: usize, mut r: usize) -> usize {
    let x = b[ip - 1];
    let pattern = u64::from_ne_bytes([x; 8]);
    while ip < ip_bound.saturating_sub(8) {
        if read_u64(b, r) != pattern {
            // The mismatch sits within the next eight bytes.
            while b[r] == x {
                r += 1;
                ip += 1;
            }
            return ip;
        }
        ip += 8;
        r += 8;
    }
    while ip < ip_bound && b[r] == x {
        r += 1;
        ip += 1;
    }
    ip
}

/// Extend a regular match against the reference position `r` up to
/// `ip_bound`.  Returns one past the first differing byte.
fn get_match(b: &[u8], mut ip: usize, ip_bound: usize, mut r: usize) -> usize {
    while ip < ip_bound.saturating_sub(8) {
        if read_u64(b, r) != read_u64(b, ip) {
            loop {
                let eq = b[r] == b[ip];
                r += 1;
                ip += 1;
                if !eq {
                    return ip;
                }
            }
        }
        ip += 8;
        r += 8;
    }
    while ip < ip_bound {
        let eq = b[r] == b[ip];
        r += 1;
        ip += 1;
        if !eq {
            break;
        }
    }
    ip
}

#[inline]
fn get_run_or_match(b: &[u8], ip: usize, ip_bound: usize, r: usize, run: bool) -> usize {
    if run {
        get_run(b, ip, ip_bound, r)
    } else {
        get_match(b, ip, ip_bound, r)
    }
}

// ── The dry-run scan ──────────────────────────────────────────────────────────

/// Estimate the compression ratio of `src` (scanned bytes over estimated
/// output bytes).  Always positive for non-empty input.
///
/// `minlen` is the shortest match worth encoding; `ipshift` the back-off
/// applied after extension.  (3, 3) are solid defaults; (4, 4), (3, 4) and
/// (4, 3) are worth trying on unusual data.
pub fn estimate_cratio(src: &[u8], minlen: i32, ipshift: i32) -> f32 {
    let limit = src.len().min(HASH_SIZE);
    let mut oc: i64 = 5;
    let mut copy: u32 = 4;

    // Too short for the scan loop; only the startup cost is meaningful.
    if limit <= 12 {
        return limit as f32 / oc as f32;
    }

    let ip_bound = limit - 1;
    let ip_limit = limit - 12;
    let mut htab = [0u32; HASH_SIZE];
    let mut ip = 0usize;

    while ip < ip_limit {
        let anchor = ip;

        let seq = read_u32(src, ip);
        let hval = hash(seq);
        let r = htab[hval] as usize;
        let distance = anchor - r;
        htab[hval] = anchor as u32;

        // emit one literal and flush the copy counter every MAX_COPY of them
        macro_rules! literal {
            () => {{
                oc += 1;
                ip = anchor + 1;
                copy += 1;
                if copy == MAX_COPY {
                    copy = 0;
                    oc += 1;
                }
                continue;
            }};
        }

        if distance == 0 || distance >= MAX_FARDISTANCE {
            literal!();
        }

        // A match needs its first four bytes to agree.
        if read_u32(src, r) != read_u32(src, ip) {
            literal!();
        }
        let r = r + 4;

        ip = anchor + 4;
        let distance = distance - 1;

        ip = get_run_or_match(src, ip, ip_bound, r, distance == 0);

        ip = ip.saturating_sub(ipshift.max(0) as usize);
        let len = ip as i64 - anchor as i64;
        if len < minlen as i64 {
            literal!();
        }

        // A match directly after another match needs no literal-length byte.
        if copy == 0 {
            oc -= 1;
        }
        copy = 0;

        let long_len = if len >= 7 { (len - 7) / 255 + 1 } else { 0 };
        let match_cost = if distance < MAX_DISTANCE { 2 } else { 4 };
        oc += match_cost + long_len;

        // Re-seed the hash at the match boundary, then step past it assuming
        // one literal.
        if ip + 4 <= limit {
            htab[hash(read_u32(src, ip))] = ip as u32;
        }
        ip += 2;
        oc += 1;
    }

    ip as f32 / oc as f32
}

// ── Pseudo-codec surface ──────────────────────────────────────────────────────

/// Encoder entry point for the probe codec: reports the estimated compressed
/// size without touching `dst`.
pub fn entropy_encoder(src: &[u8], _dst: &mut [u8], _meta: u8) -> Result<usize, EngineError> {
    let cratio = estimate_cratio(src, PROBE_MINLEN, PROBE_IPSHIFT);
    if cratio <= 0.0 {
        return Ok(src.len());
    }
    let cbytes = (src.len() as f32 / cratio) as usize;
    Ok(cbytes.min(src.len()))
}

/// Registration record for the probe.  Encoder only: asking this codec to
/// decode is an error by construction.
pub fn descriptor() -> CodecDescriptor {
    CodecDescriptor {
        compcode: ENTROPY_PROBE_ID,
        version: 1,
        complib: 1,
        compname: "entropy_probe",
        encoder: Some(entropy_encoder),
        decoder: None,
    }
}

/// Register the probe with an engine under id [`ENTROPY_PROBE_ID`].
pub fn register_entropy_codec(engine: &dyn Engine) {
    engine.register_codec(descriptor());
}

// ── Synthetic-speed helpers ───────────────────────────────────────────────────

/// Combine codec and filter pass speeds into one effective speed.
fn effective_speed(instr: Instrumentation) -> f32 {
    let ctime = 1.0 / instr.cspeed;
    let ftime = 1.0 / instr.filter_speed;
    1.0 / (ctime + ftime)
}

/// Effective speed of an instrumented round-trip over a caller-supplied
/// chunk, in the engine's speed units.
pub fn round_trip_speed(
    engine: &dyn Engine,
    cctx: &mut CompressContext,
    dctx: &mut DecompressContext,
    chunk: &[u8],
) -> Result<f32, EngineError> {
    let saved = cctx.instr_enabled;
    cctx.instr_enabled = true;
    let instr = engine.measure(cctx, dctx, chunk);
    cctx.instr_enabled = saved;

    Ok(effective_speed(instr?))
}

/// Effective speed of an instrumented round-trip over an arange chunk: the
/// first `chunksize / 8` 8-byte slots hold 0, 1, 2, …; the tail is zeroed.
pub fn arange_speed(
    engine: &dyn Engine,
    cctx: &mut CompressContext,
    dctx: &mut DecompressContext,
    chunksize: usize,
) -> Result<f32, EngineError> {
    let mut chunk = vec![0u8; chunksize];
    let niters = chunksize / 8;
    for i in 0..niters {
        chunk[i * 8..i * 8 + 8].copy_from_slice(&(i as u64).to_le_bytes());
    }
    round_trip_speed(engine, cctx, dctx, &chunk)
}

/// Effective speed of an instrumented round-trip over an all-zeros chunk.
/// The tuner caches this per context; it normalizes chunk-feature speeds.
pub fn zeros_speed(
    engine: &dyn Engine,
    cctx: &mut CompressContext,
    dctx: &mut DecompressContext,
    chunksize: usize,
) -> Result<f32, EngineError> {
    let chunk = vec![0u8; chunksize];
    round_trip_speed(engine, cctx, dctx, &chunk)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
