//! Cost estimates a planner can consult before building a `UniqueImpl`.
//!
//! Units are those of the surrounding optimizer: one sequential block
//! transfer costs about one unit, one key comparison costs
//! `1 / compare_factor`.

use std::f64::consts::{E, LN_2, PI};

use crate::merge::pass_groups;
use crate::record::ElementCount;
use crate::tree::TREE_ELEMENT_SIZE;

/// Block size the disk terms are measured in.
pub const IO_SIZE: usize = 4096;
/// Cost of writing one block sequentially.
pub const DISK_SEEK_BASE_COST: f64 = 0.9;
/// Runs merged into one by an intermediate merge pass.
pub const MERGEBUFF: usize = 7;
/// Intermediate passes run while at least this many runs are left.
pub const MERGEBUFF2: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UseCost {
    pub cost: f64,
    /// Every key fits into one generation, so nothing would be spilled.
    pub in_memory: bool,
}

impl std::fmt::Display for UseCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Estimated cost: {:.2}, In memory: {}",
            self.cost,
            if self.in_memory { "yes" } else { "no" }
        )
    }
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Distinct keys one memory generation can hold. Never less than one.
pub fn max_elements_in_tree(key_size: usize, max_in_memory_size: usize) -> usize {
    (max_in_memory_size / align8(TREE_ELEMENT_SIZE + key_size)).max(1)
}

/// Cost of one lookup in a tree of `tree_elements` keys.
pub fn search_cost(tree_elements: u64, compare_factor: f64) -> f64 {
    (tree_elements as f64).ln() / (compare_factor * LN_2)
}

/// Bytes of scratch `use_cost` needs for `n_keys` keys: one `u32` per
/// generation.
pub fn cost_calc_buffer_size(n_keys: usize, key_size: usize, max_in_memory_size: usize) -> usize {
    let max_elements = max_elements_in_tree(key_size, max_in_memory_size);
    std::mem::size_of::<u32>() * (1 + n_keys / max_elements)
}

// Stirling's approximation of log2(n!)
fn log2_n_fact(x: f64) -> f64 {
    ((2.0 * PI * x).ln() / 2.0 + x * (x / E).ln()) / LN_2
}

// One k-way merge of `elements` keys spread over `n_buffers` runs: read and
// write every key once, plus log2(k) comparisons per key.
fn merge_buffers_cost(elements: u64, n_buffers: usize, elem_size: usize, compare_factor: f64) -> f64 {
    2.0 * (elements as f64 * elem_size as f64) / IO_SIZE as f64
        + elements as f64 * (n_buffers as f64).ln() / (compare_factor * LN_2)
}

// Replays the pass structure of the run reduction over per-run key counts
// held in `buffer` and sums the cost of every merge, the final one included.
fn merge_many_buffs_cost(buffer: &mut [u32], elem_size: usize, compare_factor: f64) -> f64 {
    let mut runs = buffer.len();
    let mut total = 0.0;

    while runs > MERGEBUFF2 {
        let groups = pass_groups(runs, MERGEBUFF);
        for (out, range) in groups.iter().enumerate() {
            let elements: u64 = buffer[range.clone()].iter().map(|&n| n as u64).sum();
            total += merge_buffers_cost(elements, range.len(), elem_size, compare_factor);
            buffer[out] = elements.min(u32::MAX as u64) as u32;
        }
        runs = groups.len();
    }

    let elements: u64 = buffer[..runs].iter().map(|&n| n as u64).sum();
    total + merge_buffers_cost(elements, runs, elem_size, compare_factor)
}

/// Estimated cost of deduplicating `n_keys` keys of `key_size` bytes with
/// `max_in_memory_size` bytes of tree memory.
///
/// Covers building every generation's tree, writing the full generations
/// out, the intermediate and final merges, and reading the result back.
/// `intersect` widens merged records by the occurrence counter. `buffer` is
/// resized to one slot per generation; `cost_calc_buffer_size` gives its
/// byte size up front.
pub fn use_cost(
    buffer: &mut Vec<u32>,
    n_keys: usize,
    key_size: usize,
    max_in_memory_size: usize,
    compare_factor: f64,
    intersect: bool,
) -> UseCost {
    let max_elements = max_elements_in_tree(key_size, max_in_memory_size);
    let n_full_trees = n_keys / max_elements;
    let last_tree_elems = n_keys % max_elements;

    let mut cost = 2.0 * log2_n_fact(last_tree_elems as f64 + 1.0);
    if n_full_trees > 0 {
        cost += n_full_trees as f64 * log2_n_fact(max_elements as f64 + 1.0);
    }
    cost /= compare_factor;

    if n_full_trees == 0 {
        return UseCost {
            cost,
            in_memory: true,
        };
    }

    // Sequential writes of every generation
    let blocks = |elements: usize| (key_size as f64 * elements as f64 / IO_SIZE as f64).ceil();
    cost += DISK_SEEK_BASE_COST * n_full_trees as f64 * blocks(max_elements);
    cost += DISK_SEEK_BASE_COST * blocks(last_tree_elems);

    let elem_size = if intersect {
        key_size + std::mem::size_of::<ElementCount>()
    } else {
        key_size
    };
    buffer.clear();
    buffer.resize(n_full_trees, max_elements.min(u32::MAX as usize) as u32);
    buffer.push(last_tree_elems as u32);
    cost += merge_many_buffs_cost(buffer, elem_size, compare_factor);

    // Reading the merged result back, assuming no duplicates
    cost += (elem_size as f64 * n_keys as f64 / IO_SIZE as f64).ceil();

    UseCost {
        cost,
        in_memory: false,
    }
}
