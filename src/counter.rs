//! Counting run: plan chunks, fill the engine in parallel, then reduce it to a count.

use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::chunk::Chunk;
use crate::config::Config;
use crate::engine::{Cardinality, CardinalityEngine, Engine, FillStats};
use crate::error::{Phase, Result};
use crate::input::InputFile;
use crate::reducer::ParallelReducer;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    pub cardinality: Cardinality,
    /// Lines read, malformed ones included.
    pub lines: u64,
    /// Lines skipped under [`crate::config::MalformedPolicy::Skip`].
    pub malformed: u64,
    /// Bits (exact) or registers (approximate) that this run changed. For a resumed
    /// bitmap this is the number of addresses not seen by earlier runs.
    pub newly_observed: u64,
    /// Number of chunks the input was split into.
    pub chunks: usize,
}

#[derive(Debug)]
pub struct DistinctCounter {
    config: Config,
    reducer: ParallelReducer,
}

impl DistinctCounter {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let reducer = ParallelReducer::new(config.workers)?;
        Ok(Self { config, reducer })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Count distinct addresses in the log at `path` with the configured strategy.
    ///
    /// A failure is tagged with the phase that raised it and no partial count is returned.
    /// A failed fill phase leaves a disk bitmap as it was before the run.
    pub fn count(&self, path: impl AsRef<Path>) -> Result<Report> {
        let started = Instant::now();
        let (input, chunks) = self.plan(path.as_ref()).map_err(|e| e.in_phase(Phase::Plan))?;
        let engine = Engine::from_config(&self.config).map_err(|e| e.in_phase(Phase::Plan))?;

        let fill = match self.fill(&engine, &input, &chunks) {
            Ok(fill) => fill,
            Err(err) => {
                if let Err(discard_err) = engine.discard() {
                    warn!(error = %discard_err, "failed to discard partial fill");
                }
                return Err(err.in_phase(Phase::Fill));
            }
        };
        engine.commit().map_err(|e| e.in_phase(Phase::Fill))?;
        info!(
            lines = fill.lines,
            malformed = fill.malformed,
            newly_observed = fill.newly_observed,
            elapsed = ?started.elapsed(),
            "fill phase done"
        );

        let reduce_phase = if engine.is_exact() {
            Phase::Count
        } else {
            Phase::Estimate
        };
        let cardinality = engine
            .finalize(&self.reducer)
            .map_err(|e| e.in_phase(reduce_phase))?;
        info!(%cardinality, phase = %reduce_phase, elapsed = ?started.elapsed(), "run done");

        Ok(Report {
            cardinality,
            lines: fill.lines,
            malformed: fill.malformed,
            newly_observed: fill.newly_observed,
            chunks: chunks.len(),
        })
    }

    fn plan(&self, path: &Path) -> Result<(InputFile, Vec<Chunk>)> {
        let input = InputFile::open(path)?;
        let chunks = input.plan(self.config.workers)?;
        info!(
            path = %input.path().display(),
            bytes = input.size(),
            chunks = chunks.len(),
            strategy = ?self.config.strategy,
            "planned input"
        );
        Ok((input, chunks))
    }

    fn fill(&self, engine: &Engine, input: &InputFile, chunks: &[Chunk]) -> Result<FillStats> {
        let policy = self.config.malformed;
        let partials = self
            .reducer
            .map(chunks, |&chunk| engine.fill(input, chunk, policy))?;

        let mut total = FillStats::default();
        for partial in &partials {
            total.merge(partial);
        }
        Ok(total)
    }
}

/// Count distinct addresses in `path` with a one-off counter.
pub fn count_distinct(path: impl AsRef<Path>, config: Config) -> Result<Report> {
    DistinctCounter::new(config)?.count(path)
}
