#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use tempfile::TempDir;
use unique_es::{
    Descriptor, ElementCount, KeyComparator, Unique, UniqueConfig, UniqueImpl, tree::TREE_ELEMENT_SIZE,
};

pub mod unique_behavior;

pub fn test_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("unique_test_runs")
        .tempdir()
        .expect("Failed to create test directory")
}

/// Memory one distinct fixed key of `key_size` bytes costs.
pub fn rec_size(key_size: usize) -> usize {
    key_size + TREE_ELEMENT_SIZE
}

pub fn u64_key(k: u64) -> [u8; 8] {
    k.to_be_bytes()
}

pub fn decode_u64(key: &[u8]) -> u64 {
    u64::from_be_bytes(key.try_into().expect("8-byte key"))
}

/// Fixed 8-byte keys in byte order, spilling into `dir`.
pub fn u64_unique(dir: &TempDir, budget: usize, min_dupl_count: u64) -> UniqueImpl {
    let config = UniqueConfig::default()
        .with_max_in_memory_size(budget)
        .with_min_dupl_count(min_dupl_count)
        .with_read_buffer_size(64)
        .with_write_buffer_size(128)
        .with_tmp_dir(dir.path());
    UniqueImpl::with_config(KeyComparator::Bytes, 8, Descriptor::fixed(8), config)
}

pub fn get_all<U: Unique>(unique: &mut U) -> Vec<(Vec<u8>, ElementCount)> {
    let mut out: Vec<(Vec<u8>, ElementCount)> = Vec::new();
    unique.get(&mut out).unwrap();
    out
}

pub fn walk_all<U: Unique>(unique: &mut U) -> Vec<(Vec<u8>, ElementCount)> {
    let mut out = Vec::new();
    unique
        .walk(&mut |key, count| {
            out.push((key.to_vec(), count));
            ControlFlow::Continue(())
        })
        .unwrap();
    out
}

/// Expected output: keys seen at least `threshold` times, with their counts.
pub fn reference(keys: &[u64], threshold: u64) -> Vec<(u64, ElementCount)> {
    let mut counts = BTreeMap::new();
    for &k in keys {
        *counts.entry(k).or_insert(0u64) += 1;
    }
    counts.into_iter().filter(|&(_, c)| c >= threshold).collect()
}

pub fn decoded(out: &[(Vec<u8>, ElementCount)]) -> Vec<(u64, ElementCount)> {
    out.iter().map(|(k, c)| (decode_u64(k), *c)).collect()
}
