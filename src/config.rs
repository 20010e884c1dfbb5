use std::path::PathBuf;

use crate::cost::{MERGEBUFF, MERGEBUFF2};

/// Tuning knobs for one `UniqueImpl`.
#[derive(Debug, Clone)]
pub struct UniqueConfig {
    /// Bytes of tree memory one generation may use before it is spilled.
    pub max_in_memory_size: usize,
    /// Keys seen fewer times than this are dropped from the output. 0 keeps
    /// every distinct key.
    pub min_dupl_count: u64,
    /// Store occurrence counters in spilled runs even without a threshold.
    /// A threshold always turns them on; `Some(false)` cannot override it.
    pub with_counters: Option<bool>,
    pub merge_fanin: usize,
    pub merge_pass_width: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Where the spill file is created; the system temp dir when unset.
    pub tmp_dir: Option<PathBuf>,
}

impl Default for UniqueConfig {
    fn default() -> Self {
        Self {
            max_in_memory_size: 16 * 1024 * 1024,
            min_dupl_count: 0,
            with_counters: None,
            merge_fanin: MERGEBUFF2,
            merge_pass_width: MERGEBUFF,
            read_buffer_size: 64 * 1024,
            write_buffer_size: 64 * 1024,
            tmp_dir: None,
        }
    }
}

impl UniqueConfig {
    pub fn with_max_in_memory_size(mut self, bytes: usize) -> Self {
        self.max_in_memory_size = bytes;
        self
    }

    pub fn with_min_dupl_count(mut self, count: u64) -> Self {
        self.min_dupl_count = count;
        self
    }

    pub fn with_counters(mut self, enabled: bool) -> Self {
        self.with_counters = Some(enabled);
        self
    }

    pub fn with_merge_fanin(mut self, fanin: usize) -> Self {
        self.merge_fanin = fanin;
        self
    }

    pub fn with_merge_pass_width(mut self, width: usize) -> Self {
        self.merge_pass_width = width;
        self
    }

    pub fn with_read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    /// Whether spilled runs carry counters under this configuration.
    pub fn counters_enabled(&self) -> bool {
        self.min_dupl_count > 0 || self.with_counters == Some(true)
    }
}
