//! `ipv4-cardinality` counts the distinct IPv4 addresses in line-oriented logs that are far
//! too large to deduplicate with a hash set of strings.
//!
//! Two families of strategies are available:
//! - exact: a dense bitset with one bit per possible address, kept in memory or in a
//!   2^29 byte bitmap file that survives between runs,
//! - approximate: HyperLogLog with `2^P` registers and `1.04 / sqrt(2^P)` expected error.
//!
//! The input is split into line-aligned chunks that are filled in parallel by a fixed
//! pool of workers sharing the engine, then the engine is reduced to a single count.
//!
//! ```no_run
//! use ipv4_cardinality::{count_distinct, Config, Strategy};
//!
//! let config = Config::default().with_strategy(Strategy::HyperLogLog).with_workers(8);
//! let report = count_distinct("ip_addresses.txt", config)?;
//! println!("distinct addresses: {}", report.cardinality);
//! # Ok::<(), ipv4_cardinality::Error>(())
//! ```
pub mod address;
pub mod bitset;
pub mod chunk;
pub mod config;
pub mod counter;
pub mod disk;
pub mod engine;
pub mod error;
pub mod hyperloglog;
pub mod input;
pub mod reducer;

pub use config::{Config, MalformedPolicy, Strategy};
pub use counter::{count_distinct, DistinctCounter, Report};
pub use engine::Cardinality;
pub use error::{Error, Phase, Result};
