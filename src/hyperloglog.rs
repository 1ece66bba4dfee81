//! ## HyperLogLog estimator
//! Approximate distinct count over `M = 2^P` registers, one byte each.
//!
//! [Original HyperLogLog paper](http://algo.inria.fr/flajolet/Publications/FlFuGaMe07.pdf)
//!
//! Every address is hashed with `wyhash` over its 4 big-endian bytes. The low `P` bits
//! of the hash pick the register, the remaining `64 - P` bits give the rank: position
//! of their lowest set bit, counted from 1. Registers keep the maximum rank seen and
//! are updated with an atomic `fetch_max`, so fill workers can share them.
//!
//! Expected error is `1.04 / sqrt(M)`:
//! - P = 10: 3.25%
//! - P = 12: 1.63%
//! - P = 15: 0.57%
//! - P = 18: 0.20%

use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};

use wyhash::wyhash;

use crate::address::Address;
use crate::error::{config_err, Result};
use crate::reducer::{split_range, ParallelReducer};

pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 18;
/// 32768 registers, about 0.57% standard error.
pub const DEFAULT_PRECISION: u8 = 15;

/// Size of the hash space, used by the large range correction.
const HASH_SPACE: f64 = 18_446_744_073_709_551_616.0;

pub struct HyperLogLog {
    precision: u8,
    seed: u64,
    registers: Box<[AtomicU8]>,
}

/// Partial register statistics of one sub-range.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RegisterStats {
    /// Sum of `2^-register`.
    pub harmonic_sum: f64,
    /// Number of registers still at zero.
    pub zeros: u64,
}

impl RegisterStats {
    pub fn merge(&mut self, rhs: &RegisterStats) {
        self.harmonic_sum += rhs.harmonic_sum;
        self.zeros += rhs.zeros;
    }
}

impl HyperLogLog {
    /// Create an empty estimator with `2^precision` registers and the given hash seed.
    pub fn new(precision: u8, seed: u64) -> Result<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(config_err!(
                "precision must be in [{MIN_PRECISION}, {MAX_PRECISION}], got {precision}"
            ));
        }
        let m = 1usize << precision;
        Ok(Self {
            precision,
            seed,
            registers: (0..m).map(|_| AtomicU8::new(0)).collect(),
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of registers `m = 2^precision`.
    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }

    /// Hash used for every address of a run.
    #[inline]
    pub fn hash(&self, address: Address) -> u64 {
        wyhash(&address.to_be_bytes(), self.seed)
    }

    /// Record `address`. Returns `true` when its register grew.
    #[inline]
    pub fn add(&self, address: Address) -> bool {
        self.add_hash(self.hash(address))
    }

    /// Record a pre-computed hash. Returns `true` when its register grew.
    #[inline]
    pub fn add_hash(&self, hash: u64) -> bool {
        let idx = (hash & (self.registers.len() as u64 - 1)) as usize;
        let rank = rho(hash >> self.precision, 64 - u32::from(self.precision));
        self.registers[idx].fetch_max(rank, Ordering::Relaxed) < rank
    }

    /// Register-wise maximum with `other`.
    pub fn merge(&self, other: &HyperLogLog) -> Result<()> {
        if self.precision != other.precision || self.seed != other.seed {
            return Err(config_err!(
                "cannot merge estimator (precision={}, seed={}) into (precision={}, seed={})",
                other.precision,
                other.seed,
                self.precision,
                self.seed
            ));
        }
        for (lhs, rhs) in self.registers.iter().zip(other.registers.iter()) {
            lhs.fetch_max(rhs.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy of the current register values.
    pub fn registers(&self) -> Vec<u8> {
        self.registers
            .iter()
            .map(|r| r.load(Ordering::Relaxed))
            .collect()
    }

    /// Harmonic sum and zero count of the registers in `range`.
    pub fn register_stats(&self, range: Range<u64>) -> RegisterStats {
        let registers = &self.registers[range.start as usize..range.end as usize];
        let mut stats = RegisterStats::default();
        for register in registers {
            let r = register.load(Ordering::Relaxed);
            stats.harmonic_sum += 1.0 / (1u64 << r) as f64;
            stats.zeros += u64::from(r == 0);
        }
        stats
    }

    /// Estimate the cardinality, reducing the registers across the workers of `reducer`.
    pub fn estimate(&self, reducer: &ParallelReducer) -> Result<f64> {
        let ranges = split_range(self.registers.len() as u64, reducer.workers());
        let partials = reducer.map(&ranges, |range| Ok(self.register_stats(range.clone())))?;

        let mut stats = RegisterStats::default();
        for partial in &partials {
            stats.merge(partial);
        }
        Ok(self.estimate_from(stats))
    }

    /// Bias corrected estimate from whole-array register statistics.
    pub fn estimate_from(&self, stats: RegisterStats) -> f64 {
        let m = self.registers.len() as f64;
        // Nothing observed: every register is zero and linear counting would give
        // `m * ln(1)`, skip the arithmetic altogether.
        if stats.zeros == self.registers.len() as u64 {
            return 0.0;
        }

        let mut estimate = alpha(self.registers.len()) * m * m / stats.harmonic_sum;

        if estimate <= 2.5 * m && stats.zeros > 0 {
            estimate = m * (m / stats.zeros as f64).ln();
        }

        if estimate > HASH_SPACE / 30.0 {
            estimate = -HASH_SPACE * (-estimate / HASH_SPACE).ln_1p();
        }

        estimate
    }

    /// Relative standard error `1.04 / sqrt(m)`.
    pub fn relative_error(&self) -> f64 {
        error_for_precision(self.precision)
    }
}

impl std::fmt::Debug for HyperLogLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperLogLog")
            .field("precision", &self.precision)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Rank of `x` within a `width`-bit field: 1-based position of its lowest set bit,
/// or `width` when no bit is set.
#[inline]
pub fn rho(x: u64, width: u32) -> u8 {
    (x.trailing_zeros() + 1).min(width) as u8
}

/// Parameter for bias correction. The constants for m = 16, 32 and 64 are the exact
/// values from the HyperLogLog paper, where `0.7213 / (1 + 1.079 / m)` is too coarse.
#[inline]
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (m as f64)),
    }
}

/// Expected relative standard error for a given precision.
pub fn error_for_precision(precision: u8) -> f64 {
    let m = (1u64 << precision) as f64;
    1.04 / m.sqrt()
}

/// Smallest precision whose expected error does not exceed `target_error`, clamped to
/// the supported range.
pub fn precision_for_error(target_error: f64) -> u8 {
    let m = (1.04 / target_error).powi(2);
    let p = m.log2().ceil();
    if p.is_nan() {
        return MAX_PRECISION;
    }
    (p.clamp(f64::from(MIN_PRECISION), f64::from(MAX_PRECISION))) as u8
}
