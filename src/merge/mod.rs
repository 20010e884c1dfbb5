//! K-way merge over spilled runs and the in-memory tail.
//!
//! `MergeStream` yields each distinct key once, with the counts of all its
//! copies summed. `reduce_runs` folds the run list down to a mergeable width
//! before the final pass.

pub mod tree_of_losers;

use std::borrow::Cow;
use std::cmp::Ordering;
use std::ops::Range;

use tracing::info;

use crate::descriptor::{Descriptor, KeyComparator};
use crate::diskio::file::SpillFile;
use crate::error::Result;
use crate::record::ElementCount;
use crate::run::{Run, RunFormat, RunReader, RunWriter};
use crate::tree::TreeIter;
use tree_of_losers::LoserTree;

/// One key with the number of times it has been seen so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEntry<'a> {
    pub key: Cow<'a, [u8]>,
    pub count: ElementCount,
}

/// An already sorted stream of distinct keys.
pub enum MergeSource<'a> {
    Run(RunReader<'a>),
    Memory(TreeIter<'a>),
}

impl<'a> MergeSource<'a> {
    fn next_entry(&mut self) -> Result<Option<MergeEntry<'a>>> {
        match self {
            MergeSource::Run(reader) => Ok(reader.next_record()?.map(|(key, count)| MergeEntry {
                key: Cow::Owned(key),
                count,
            })),
            MergeSource::Memory(iter) => Ok(iter.next().map(|(key, count)| MergeEntry {
                key: Cow::Borrowed(key),
                count,
            })),
        }
    }
}

#[derive(Clone, Copy)]
struct EntryOrder<'a> {
    comparator: &'a KeyComparator,
    descriptor: &'a Descriptor,
}

impl EntryOrder<'_> {
    fn compare(&self, a: &MergeEntry<'_>, b: &MergeEntry<'_>) -> Ordering {
        self.comparator.compare(self.descriptor, &a.key, &b.key)
    }
}

pub struct MergeStream<'a> {
    sources: Vec<MergeSource<'a>>,
    tree: LoserTree<MergeEntry<'a>>,
    order: EntryOrder<'a>,
}

impl<'a> MergeStream<'a> {
    pub fn new(
        mut sources: Vec<MergeSource<'a>>,
        comparator: &'a KeyComparator,
        descriptor: &'a Descriptor,
    ) -> Result<Self> {
        let order = EntryOrder {
            comparator,
            descriptor,
        };
        let mut firsts = Vec::with_capacity(sources.len());
        for source in sources.iter_mut() {
            firsts.push(source.next_entry()?);
        }
        let tree = LoserTree::new(firsts, &|a: &MergeEntry<'a>, b: &MergeEntry<'a>| {
            order.compare(a, b)
        });
        Ok(Self {
            sources,
            tree,
            order,
        })
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Next distinct key in ascending order. Copies of it in other sources
    /// are consumed and their counts added; the first copy's bytes are kept.
    pub fn next_distinct(&mut self) -> Result<Option<MergeEntry<'a>>> {
        let Some(mut current) = self.pop()? else {
            return Ok(None);
        };
        loop {
            let same = match self.tree.peek() {
                Some((top, _)) => self.order.compare(top, &current) == Ordering::Equal,
                None => false,
            };
            if !same {
                break;
            }
            if let Some(copy) = self.pop()? {
                current.count += copy.count;
            }
        }
        Ok(Some(current))
    }

    fn pop(&mut self) -> Result<Option<MergeEntry<'a>>> {
        let Some((_, source)) = self.tree.peek() else {
            return Ok(None);
        };
        let next = self.sources[source].next_entry()?;
        let order = self.order;
        Ok(self
            .tree
            .replace_top(next, &|a: &MergeEntry<'a>, b: &MergeEntry<'a>| {
                order.compare(a, b)
            }))
    }
}

/// Shape of the intermediate merge passes.
#[derive(Clone, Copy, Debug)]
pub struct MergePlan {
    /// Most runs the final merge may open at once.
    pub fanin: usize,
    /// Runs folded into one by each intermediate merge.
    pub pass_width: usize,
    pub read_buffer_size: usize,
}

/// How one intermediate pass splits `runs` runs: groups of `width` while at
/// least one and a half groups remain, then one group with the rest.
pub fn pass_groups(runs: usize, width: usize) -> Vec<Range<usize>> {
    let width = width.max(2);
    let mut groups = Vec::with_capacity(runs / width + 1);
    let mut start = 0;
    while start + width * 3 / 2 < runs {
        groups.push(start..start + width);
        start += width;
    }
    if start < runs {
        groups.push(start..runs);
    }
    groups
}

/// Merges groups of `plan.pass_width` runs into single runs, appended to the
/// same spill file, until at most `plan.fanin` runs remain. Counts are summed
/// and nothing is filtered. Returns the number of passes made.
pub fn reduce_runs(
    file: &mut SpillFile,
    runs: &mut Vec<Run>,
    descriptor: &Descriptor,
    comparator: &KeyComparator,
    format: RunFormat,
    plan: MergePlan,
) -> Result<usize> {
    let fanin = plan.fanin.max(2);
    let pass_width = plan.pass_width.max(2);
    let mut passes = 0;

    while runs.len() > fanin {
        let reader = file.reader()?;
        let groups = pass_groups(runs.len(), pass_width);
        let mut merged = Vec::with_capacity(groups.len());
        for range in groups {
            let group = &runs[range];
            if let [single] = group {
                merged.push(*single);
                continue;
            }
            let sources = group
                .iter()
                .map(|run| {
                    MergeSource::Run(RunReader::new(
                        &reader,
                        descriptor,
                        format,
                        *run,
                        plan.read_buffer_size,
                    ))
                })
                .collect();
            let mut stream = MergeStream::new(sources, comparator, descriptor)?;
            let mut writer = RunWriter::start(file, format);
            while let Some(entry) = stream.next_distinct()? {
                writer.append(&entry.key, entry.count)?;
            }
            merged.push(writer.finish());
        }
        passes += 1;
        info!(
            "Merge pass {}: reduced {} runs to {}",
            passes,
            runs.len(),
            merged.len()
        );
        *runs = merged;
    }
    file.flush()?;
    Ok(passes)
}
