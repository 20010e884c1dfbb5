// Bounded-memory key deduplication with spill-to-disk merging

/// Counters from one insertion phase and its last `get` / `walk`.
#[derive(Clone, Debug, Default)]
pub struct UniqueStats {
    pub runs_flushed: u64,
    pub merge_passes: u64,
    pub distinct_output: u64,
    pub filtered_out: u64,
    pub io_stats: Option<IoStats>,
}

impl std::fmt::Display for UniqueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "UniqueStats:")?;
        writeln!(f, "  Runs flushed: {}", self.runs_flushed)?;
        writeln!(f, "  Merge passes: {}", self.merge_passes)?;
        writeln!(f, "  Distinct keys out: {}", self.distinct_output)?;
        writeln!(f, "  Filtered by threshold: {}", self.filtered_out)?;
        match &self.io_stats {
            Some(io) => {
                writeln!(f, "  Spill I/O: {}", io)?;
                if io.write_bytes > 0 {
                    writeln!(
                        f,
                        "  Read amplification factor: {:.2}x",
                        io.read_bytes as f64 / io.write_bytes as f64
                    )?;
                }
            }
            None => writeln!(f, "  Spill I/O: none (resident in memory)")?,
        }
        Ok(())
    }
}

pub mod config;
pub mod cost;
pub mod descriptor;
pub mod diskio;
pub mod error;
pub mod merge;
pub mod record;
pub mod run;
pub mod tree;
pub mod unique;

// Export the main types
pub use config::UniqueConfig;
pub use cost::{UseCost, cost_calc_buffer_size, search_cost, use_cost};
pub use descriptor::{Descriptor, KeyComparator};
pub use diskio::io_stats::{IoStats, IoStatsTracker};
pub use error::{Result, UniqueError};
pub use record::{AggregateArg, ElementCount, FieldDef, FieldKind, RecordSink, SourceRecord};
pub use unique::{ExpansionState, Unique, UniqueImpl};
