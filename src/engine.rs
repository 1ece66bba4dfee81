use std::fmt;

use enum_dispatch::enum_dispatch;
use tracing::debug;

use crate::address::ADDRESS_SPACE;
use crate::bitset::MemoryBitset;
use crate::chunk::Chunk;
use crate::config::{Config, MalformedPolicy, Strategy};
use crate::disk::DiskBitset;
use crate::error::Result;
use crate::hyperloglog::HyperLogLog;
use crate::input::{InputFile, ScanStats};
use crate::reducer::{split_range, ParallelReducer};

/// Storage strategies supported by [`crate::counter::DistinctCounter`]
#[derive(Debug)]
#[enum_dispatch]
pub enum Engine {
    MemoryBitset(MemoryBitset),
    DiskBitset(DiskBitset),
    HyperLogLog(HyperLogLog),
}

/// Engine trait which must be implemented by all storage strategies.
///
/// `fill` is called once per chunk, concurrently from several workers sharing the
/// engine. Once every fill returned, either `commit` runs and is followed by
/// `finalize`, or a fill failed and `discard` runs instead.
#[enum_dispatch(Engine)]
pub trait CardinalityEngine {
    fn fill(&self, input: &InputFile, chunk: Chunk, policy: MalformedPolicy) -> Result<FillStats>;
    /// Publish what the fill phase recorded.
    fn commit(&self) -> Result<()> {
        Ok(())
    }
    /// Throw away what a failed fill phase recorded.
    fn discard(&self) -> Result<()> {
        Ok(())
    }
    fn finalize(&self, reducer: &ParallelReducer) -> Result<Cardinality>;
    fn is_exact(&self) -> bool;
}

/// Outcome of filling one chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FillStats {
    pub lines: u64,
    pub malformed: u64,
    /// Bits or registers that changed because of this chunk.
    pub newly_observed: u64,
}

impl FillStats {
    fn from_scan(scan: ScanStats, newly_observed: u64) -> Self {
        Self {
            lines: scan.lines,
            malformed: scan.malformed,
            newly_observed,
        }
    }

    pub fn merge(&mut self, rhs: &FillStats) {
        self.lines += rhs.lines;
        self.malformed += rhs.malformed;
        self.newly_observed += rhs.newly_observed;
    }
}

/// Result of a counting run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with_serde", serde(rename_all = "snake_case"))]
pub enum Cardinality {
    Exact(u64),
    Estimate(f64),
}

impl Cardinality {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Cardinality::Exact(n) => n as f64,
            Cardinality::Estimate(e) => e,
        }
    }

    /// Count rounded to the nearest integer.
    pub fn rounded(&self) -> u64 {
        match *self {
            Cardinality::Exact(n) => n,
            Cardinality::Estimate(e) => e.round().max(0.0) as u64,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Exact(n) => write!(f, "{n}"),
            Cardinality::Estimate(e) => write!(f, "~{e:.0}"),
        }
    }
}

impl Engine {
    /// Build the engine selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = match &config.strategy {
            Strategy::Bitset => Engine::MemoryBitset(MemoryBitset::new()),
            Strategy::DiskBitset { path, reset } => {
                Engine::DiskBitset(DiskBitset::open(path, *reset)?)
            }
            Strategy::HyperLogLog => {
                Engine::HyperLogLog(HyperLogLog::new(config.precision, config.hash_seed)?)
            }
        };
        Ok(engine)
    }
}

impl CardinalityEngine for MemoryBitset {
    fn fill(&self, input: &InputFile, chunk: Chunk, policy: MalformedPolicy) -> Result<FillStats> {
        let mut newly = 0;
        let scan = input.scan(chunk, policy, |address| {
            newly += u64::from(self.insert(address));
            Ok(())
        })?;
        Ok(FillStats::from_scan(scan, newly))
    }

    fn finalize(&self, reducer: &ParallelReducer) -> Result<Cardinality> {
        let ranges = split_range(ADDRESS_SPACE, reducer.workers());
        let partials = reducer.map(&ranges, |range| Ok(self.count_range(range.clone())))?;
        debug!(?partials, "bitset partial counts");
        Ok(Cardinality::Exact(partials.iter().sum()))
    }

    fn is_exact(&self) -> bool {
        true
    }
}

impl CardinalityEngine for DiskBitset {
    fn fill(&self, input: &InputFile, chunk: Chunk, policy: MalformedPolicy) -> Result<FillStats> {
        let mut writer = self.writer()?;
        let scan = input.scan(chunk, policy, |address| writer.insert(address))?;
        let newly = writer.finish()?;
        Ok(FillStats::from_scan(scan, newly))
    }

    fn commit(&self) -> Result<()> {
        DiskBitset::commit(self)
    }

    fn discard(&self) -> Result<()> {
        DiskBitset::discard(self)
    }

    fn finalize(&self, reducer: &ParallelReducer) -> Result<Cardinality> {
        let ranges = split_range(ADDRESS_SPACE, reducer.workers());
        let partials = reducer.map(&ranges, |range| self.count_range(range.clone()))?;
        debug!(?partials, "bitmap partial counts");
        Ok(Cardinality::Exact(partials.iter().sum()))
    }

    fn is_exact(&self) -> bool {
        true
    }
}

impl CardinalityEngine for HyperLogLog {
    fn fill(&self, input: &InputFile, chunk: Chunk, policy: MalformedPolicy) -> Result<FillStats> {
        let mut newly = 0;
        let scan = input.scan(chunk, policy, |address| {
            newly += u64::from(self.add(address));
            Ok(())
        })?;
        Ok(FillStats::from_scan(scan, newly))
    }

    fn finalize(&self, reducer: &ParallelReducer) -> Result<Cardinality> {
        Ok(Cardinality::Estimate(self.estimate(reducer)?))
    }

    fn is_exact(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Cardinality::Exact(2) => (2.0, 2, "2".to_string()))]
    #[test_case(Cardinality::Estimate(1.00002) => (1.00002, 1, "~1".to_string()))]
    #[test_case(Cardinality::Estimate(1234.6) => (1234.6, 1235, "~1235".to_string()))]
    fn test_cardinality(c: Cardinality) -> (f64, u64, String) {
        (c.as_f64(), c.rounded(), c.to_string())
    }

    #[test]
    fn test_from_config() {
        let engine = Engine::from_config(&Config::default()).unwrap();
        assert!(matches!(engine, Engine::MemoryBitset(_)));
        assert!(engine.is_exact());

        let config = Config::default()
            .with_strategy(Strategy::HyperLogLog)
            .with_precision(11);
        let engine = Engine::from_config(&config).unwrap();
        assert!(!engine.is_exact());
        match engine {
            Engine::HyperLogLog(hll) => assert_eq!(hll.precision(), 11),
            other => panic!("unexpected engine {other:?}"),
        }

        let config = Config::default()
            .with_strategy(Strategy::HyperLogLog)
            .with_precision(30);
        assert!(Engine::from_config(&config).is_err());
    }
}
