//! The deduplication engine.
//!
//! Keys go into an in-memory tree until the memory budget is used up, then
//! the tree is written to the spill file as one sorted run and a new
//! generation starts. `get` and `walk` merge every run with whatever is
//! still in memory and hand out each distinct key once.

use std::ops::ControlFlow;

use tracing::{debug, info, trace};

use crate::UniqueStats;
use crate::config::UniqueConfig;
use crate::cost::max_elements_in_tree;
use crate::descriptor::{Descriptor, KeyComparator};
use crate::diskio::file::SpillFile;
use crate::error::{Result, UniqueError};
use crate::merge::{MergePlan, MergeSource, MergeStream, reduce_runs};
use crate::record::{ElementCount, RecordSink, SourceRecord};
use crate::run::{Run, RunFormat, RunReader, RunWriter};
use crate::tree::{InsertOutcome, KeyTree, TREE_ELEMENT_SIZE};
pub use crate::tree::ExpansionState;

/// What callers drive: feed keys, then read the distinct ones back.
pub trait Unique {
    fn add(&mut self, key: &[u8]) -> Result<()>;

    /// Stops new distinct keys from being stored. Known keys keep counting.
    /// There is no way back.
    fn close_for_expansion(&mut self);

    fn reset(&mut self) -> Result<()>;

    /// Writes every distinct key that passes the duplicate threshold to
    /// `sink`, in key order.
    fn get(&mut self, sink: &mut dyn RecordSink) -> Result<()>;

    /// Calls `action` once per distinct key that passes the duplicate
    /// threshold, in key order, while the merge is still running.
    fn walk(&mut self, action: &mut dyn FnMut(&[u8], ElementCount) -> ControlFlow<()>)
    -> Result<()>;

    fn element_count(&self) -> u64;

    /// True until the first run is spilled.
    fn is_resident_in_memory(&self) -> bool;

    fn memory_budget(&self) -> usize;
}

// Everything `add` touches besides the descriptor, kept apart so a key
// borrowed from the descriptor's scratch buffer can be inserted in place.
struct KeyStore {
    tree: KeyTree,
    state: ExpansionState,
    memory_used: usize,
    max_in_memory_size: usize,
    format: RunFormat,
    runs: Vec<Run>,
    flushed_elements: u64,
    spill: Option<SpillFile>,
    config: UniqueConfig,
    runs_flushed: u64,
}

impl KeyStore {
    fn is_full(&self, rec_size: usize) -> bool {
        // A generation always takes at least one key
        if self.tree.is_empty() {
            return false;
        }
        rec_size > self.max_in_memory_size.saturating_sub(self.memory_used)
    }

    fn add(&mut self, key: &[u8], descriptor: &Descriptor, comparator: &KeyComparator) -> Result<()> {
        let rec_size = key.len() + TREE_ELEMENT_SIZE;
        if self.state == ExpansionState::Open && self.is_full(rec_size) {
            self.flush()?;
        }
        let cmp = |a: &[u8], b: &[u8]| comparator.compare(descriptor, a, b);
        let outcome = self.tree.insert(key, self.state, &cmp)?;
        if outcome == InsertOutcome::Inserted {
            self.memory_used += rec_size;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.tree.is_empty() {
            return Ok(());
        }
        let file = open_spill(&mut self.spill, &self.config)?;
        let mut writer = RunWriter::start(file, self.format);
        for (key, count) in self.tree.iter() {
            writer.append(key, count)?;
        }
        let run = writer.finish();
        debug!(
            "Flushed run {}: {} keys, {} bytes at offset {}",
            self.runs.len(),
            run.total_entries(),
            run.total_bytes(),
            run.start_offset()
        );

        self.runs.push(run);
        self.runs_flushed += 1;
        self.flushed_elements += self.tree.elements_in_tree() as u64;
        self.tree.clear();
        self.memory_used = 0;
        Ok(())
    }
}

// The spill file is created on the first flush.
fn open_spill<'a>(spill: &'a mut Option<SpillFile>, config: &UniqueConfig) -> Result<&'a mut SpillFile> {
    let file = match spill.take() {
        Some(file) => file,
        None => SpillFile::create_in(config.tmp_dir.as_deref(), config.write_buffer_size)?,
    };
    Ok(spill.insert(file))
}

pub struct UniqueImpl {
    descriptor: Descriptor,
    comparator: KeyComparator,
    store: KeyStore,
    min_dupl_count: u64,
    with_counters: bool,
    size: usize,
    full_size: usize,
    max_elements: usize,
    filtered_out_elems: u64,
    stats: UniqueStats,
}

impl UniqueImpl {
    pub fn new(
        comparator: KeyComparator,
        key_size: usize,
        max_in_memory_size: usize,
        min_dupl_count: u64,
        descriptor: Descriptor,
    ) -> Self {
        let config = UniqueConfig::default()
            .with_max_in_memory_size(max_in_memory_size)
            .with_min_dupl_count(min_dupl_count);
        Self::with_config(comparator, key_size, descriptor, config)
    }

    pub fn with_config(
        comparator: KeyComparator,
        key_size: usize,
        descriptor: Descriptor,
        config: UniqueConfig,
    ) -> Self {
        let with_counters = config.counters_enabled();
        let format = RunFormat { with_counters };
        let full_size = key_size + format.counter_size();
        Self {
            descriptor,
            comparator,
            min_dupl_count: config.min_dupl_count,
            with_counters,
            size: key_size,
            full_size,
            max_elements: max_elements_in_tree(key_size, config.max_in_memory_size),
            filtered_out_elems: 0,
            stats: UniqueStats::default(),
            store: KeyStore {
                tree: KeyTree::new(),
                state: ExpansionState::Open,
                memory_used: 0,
                max_in_memory_size: config.max_in_memory_size,
                format,
                runs: Vec::new(),
                flushed_elements: 0,
                spill: None,
                config,
                runs_flushed: 0,
            },
        }
    }

    /// Packs `record` with the descriptor and adds the result. Returns
    /// `false` when the record was skipped because of a NULL.
    pub fn add_packed_record<R>(&mut self, record: &R, exclude_nulls: bool) -> Result<bool>
    where
        R: SourceRecord + ?Sized,
    {
        if self.descriptor.make_packed_record(record, exclude_nulls)? == 0 {
            return Ok(false);
        }
        let Some(key) = self.descriptor.packed_record() else {
            return Ok(false);
        };
        self.store.add(key, &self.descriptor, &self.comparator)?;
        Ok(true)
    }

    /// Writes the current generation to the spill file as a new run.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    pub fn expansion_state(&self) -> ExpansionState {
        self.store.state
    }

    pub fn elements_in_tree(&self) -> usize {
        self.store.tree.elements_in_tree()
    }

    pub fn memory_used(&self) -> usize {
        self.store.memory_used
    }

    /// Keys dropped by the duplicate threshold during the last `get` or `walk`.
    pub fn filtered_out_elems(&self) -> u64 {
        self.filtered_out_elems
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Key size plus the stored counter, if any.
    pub fn full_size(&self) -> usize {
        self.full_size
    }

    pub fn is_count_stored(&self) -> bool {
        self.with_counters
    }

    pub fn is_variable_sized(&self) -> bool {
        self.descriptor.is_variable_sized()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut Descriptor {
        &mut self.descriptor
    }

    pub fn run_count(&self) -> usize {
        self.store.runs.len()
    }

    pub fn stats(&self) -> UniqueStats {
        let mut stats = self.stats.clone();
        stats.runs_flushed = self.store.runs_flushed;
        stats.io_stats = self.store.spill.as_ref().map(SpillFile::io_stats);
        stats
    }

    // Merges all runs and the in-memory tail, applies the threshold, and
    // feeds survivors to `emit` until it breaks.
    fn merge_into<F>(&mut self, mut emit: F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8], ElementCount) -> Result<ControlFlow<()>>,
    {
        let store = &mut self.store;
        let plan = MergePlan {
            fanin: store.config.merge_fanin,
            pass_width: store.config.merge_pass_width,
            read_buffer_size: store.config.read_buffer_size,
        };

        let mut passes = 0;
        let mut reader = None;
        if let Some(file) = store.spill.as_mut() {
            if !store.runs.is_empty() {
                passes = reduce_runs(
                    file,
                    &mut store.runs,
                    &self.descriptor,
                    &self.comparator,
                    store.format,
                    plan,
                )?;
                reader = Some(file.reader()?);
            }
        }

        let mut sources = Vec::with_capacity(store.runs.len() + 1);
        if let Some(reader) = &reader {
            for run in &store.runs {
                sources.push(MergeSource::Run(RunReader::new(
                    reader,
                    &self.descriptor,
                    store.format,
                    *run,
                    plan.read_buffer_size,
                )));
            }
        }
        if !store.tree.is_empty() {
            sources.push(MergeSource::Memory(store.tree.iter()));
        }
        let source_count = sources.len();

        let mut stream = MergeStream::new(sources, &self.comparator, &self.descriptor)?;
        let mut distinct = 0u64;
        let mut filtered = 0u64;
        let mut flow = ControlFlow::Continue(());
        while let Some(entry) = stream.next_distinct()? {
            if entry.count < self.min_dupl_count {
                filtered += 1;
                continue;
            }
            distinct += 1;
            flow = emit(&entry.key, entry.count)?;
            if flow.is_break() {
                break;
            }
        }

        self.filtered_out_elems = filtered;
        self.stats.merge_passes += passes as u64;
        self.stats.distinct_output = distinct;
        self.stats.filtered_out = filtered;
        info!(
            "Merged {} sources: {} distinct keys out, {} filtered",
            source_count, distinct, filtered
        );
        Ok(flow)
    }
}

impl Unique for UniqueImpl {
    fn add(&mut self, key: &[u8]) -> Result<()> {
        let key_len = self.descriptor.get_length_of_key(key);
        if key.len() < key_len {
            return Err(UniqueError::KeyLength {
                expected: key_len,
                actual: key.len(),
            });
        }
        self.store
            .add(&key[..key_len], &self.descriptor, &self.comparator)
    }

    fn close_for_expansion(&mut self) {
        trace!(
            "Closing for expansion with {} keys in memory",
            self.store.tree.elements_in_tree()
        );
        self.store.state = ExpansionState::Closed;
    }

    fn reset(&mut self) -> Result<()> {
        trace!("Resetting after {} runs", self.store.runs.len());
        let store = &mut self.store;
        store.tree.clear();
        store.memory_used = 0;
        store.runs.clear();
        store.flushed_elements = 0;
        store.runs_flushed = 0;
        if let Some(file) = store.spill.as_mut() {
            file.rewind()?;
        }
        self.filtered_out_elems = 0;
        self.stats = UniqueStats::default();
        Ok(())
    }

    fn get(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        self.merge_into(|key, count| {
            sink.write_record(key, count).map_err(UniqueError::Sink)?;
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(())
    }

    fn walk(
        &mut self,
        action: &mut dyn FnMut(&[u8], ElementCount) -> ControlFlow<()>,
    ) -> Result<()> {
        match self.merge_into(|key, count| Ok(action(key, count)))? {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => Err(UniqueError::WalkAborted),
        }
    }

    /// Distinct keys in memory while resident; once spilled, the sum of all
    /// generation sizes, which counts a key once per generation it was in.
    fn element_count(&self) -> u64 {
        let in_tree = self.store.tree.elements_in_tree() as u64;
        if self.is_resident_in_memory() {
            in_tree
        } else {
            self.store.flushed_elements + in_tree
        }
    }

    fn is_resident_in_memory(&self) -> bool {
        self.store.runs.is_empty()
    }

    fn memory_budget(&self) -> usize {
        self.store.max_in_memory_size
    }
}
