//! Run configuration.

use std::path::PathBuf;

use crate::error::{config_err, Result};
use crate::hyperloglog::{DEFAULT_PRECISION, MAX_PRECISION, MIN_PRECISION};

/// Storage used to deduplicate addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with_serde", serde(rename_all = "snake_case", tag = "kind"))]
pub enum Strategy {
    /// Exact count over an in-memory 2^32 bitset.
    Bitset,
    /// Exact count over a 2^29 byte bitmap file, kept between runs. The file is only
    /// replaced once every fill succeeded, a failed run leaves it unchanged.
    DiskBitset {
        path: PathBuf,
        /// Recreate the bitmap instead of resuming from its current content.
        #[cfg_attr(feature = "with_serde", serde(default))]
        reset: bool,
    },
    /// Approximate count with HyperLogLog registers.
    HyperLogLog,
}

/// What to do with a line that is not a valid dotted quad.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with_serde", serde(rename_all = "snake_case"))]
pub enum MalformedPolicy {
    /// Abort the run on the first malformed line.
    #[default]
    Fail,
    /// Skip the line and report it in the run's malformed count.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with_serde", serde(default))]
pub struct Config {
    /// Number of workers for every fan-out phase.
    pub workers: usize,
    pub strategy: Strategy,
    /// HyperLogLog bucket index width `b`, giving `2^b` registers.
    pub precision: u8,
    /// Seed of the address hash used by HyperLogLog.
    pub hash_seed: u64,
    pub malformed: MalformedPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            strategy: Strategy::Bitset,
            precision: DEFAULT_PRECISION,
            hash_seed: 0,
            malformed: MalformedPolicy::default(),
        }
    }
}

impl Config {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    pub fn with_malformed(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(config_err!("workers must be at least 1"));
        }
        if matches!(self.strategy, Strategy::HyperLogLog)
            && !(MIN_PRECISION..=MAX_PRECISION).contains(&self.precision)
        {
            return Err(config_err!(
                "precision must be in [{MIN_PRECISION}, {MAX_PRECISION}], got {}",
                self.precision
            ));
        }
        Ok(())
    }
}

/// Half of the available cores, at least one.
pub fn default_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.workers >= 1);
        assert_eq!(config.precision, 15);
        assert_eq!(config.malformed, MalformedPolicy::Fail);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().with_workers(0).validate().is_err());

        let hll = Config::default().with_strategy(Strategy::HyperLogLog);
        assert!(hll.clone().with_precision(3).validate().is_err());
        assert!(hll.clone().with_precision(19).validate().is_err());
        hll.with_precision(4).validate().unwrap();

        // Precision is only meaningful for HyperLogLog.
        Config::default().with_precision(0).validate().unwrap();
    }

    #[cfg(feature = "with_serde")]
    #[test]
    fn test_serde() {
        let config: Config = serde_json::from_str(
            r#"{"workers": 3, "strategy": {"kind": "disk_bitset", "path": "/tmp/bitmap.bin"}, "malformed": "skip"}"#,
        )
        .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(
            config.strategy,
            Strategy::DiskBitset {
                path: PathBuf::from("/tmp/bitmap.bin"),
                reset: false
            }
        );
        assert_eq!(config.malformed, MalformedPolicy::Skip);
        assert_eq!(config.precision, DEFAULT_PRECISION);

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<Config>(&json).unwrap(), config);
    }
}
