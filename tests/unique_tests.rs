mod common;

use std::io;
use std::ops::ControlFlow;

use common::unique_behavior;
use common::{decode_u64, decoded, get_all, rec_size, test_dir, u64_key, u64_unique, walk_all};
use unique_es::{
    Descriptor, ElementCount, KeyComparator, RecordSink, Unique, UniqueConfig, UniqueError,
    UniqueImpl,
};

#[test]
fn test_example_with_small_budget() {
    unique_behavior::example_sequence(|min_dupl| {
        UniqueImpl::new(KeyComparator::Bytes, 8, 64, min_dupl, Descriptor::fixed(8))
    });
}

#[test]
fn test_example_resident() {
    let dir = test_dir();
    unique_behavior::example_sequence(|min_dupl| u64_unique(&dir, 1 << 20, min_dupl));
}

#[test]
fn test_empty_input() {
    let dir = test_dir();
    unique_behavior::empty_input(|min_dupl| u64_unique(&dir, 1024, min_dupl));
}

#[test]
fn test_budget_below_one_key_admits_one_per_generation() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, 1, 0);
    for k in 0u64..5 {
        unique.add(&u64_key(k)).unwrap();
        assert_eq!(unique.elements_in_tree(), 1);
    }
    assert_eq!(unique.run_count(), 4);
    assert_eq!(unique.element_count(), 5);

    let keys: Vec<u64> = get_all(&mut unique).iter().map(|(k, _)| decode_u64(k)).collect();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_repeated_key_keeps_memory_used() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, 1 << 20, 0);
    unique.add(&u64_key(42)).unwrap();
    let used = unique.memory_used();
    assert_eq!(used, rec_size(8));
    for _ in 0..10 {
        unique.add(&u64_key(42)).unwrap();
        assert_eq!(unique.memory_used(), used);
    }
}

#[test]
fn test_flush_count_matches_runs() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, rec_size(8) * 10, 0);
    let mut resets = 0;
    let mut last_used = 0;
    for k in 0u64..95 {
        unique.add(&u64_key(k)).unwrap();
        if unique.memory_used() < last_used {
            resets += 1;
        }
        last_used = unique.memory_used();
    }
    assert_eq!(resets, 9);
    assert_eq!(unique.run_count(), 9);
    assert_eq!(unique.stats().runs_flushed, 9);
    assert!(!unique.is_resident_in_memory());
    assert_eq!(get_all(&mut unique).len(), 95);
}

#[test]
fn test_budget_does_not_change_result() {
    let dir = test_dir();
    let per_key = rec_size(8);
    unique_behavior::budget_does_not_change_result(
        |budget| u64_unique(&dir, budget, 0),
        &[1, per_key * 3, per_key * 40, 1 << 20],
    );
}

#[test]
fn test_shuffled_union_against_reference() {
    let dir = test_dir();
    unique_behavior::shuffled_against_reference(
        |min_dupl| u64_unique(&dir, rec_size(8) * 64, min_dupl),
        7,
        0,
    );
}

#[test]
fn test_shuffled_intersection_against_reference() {
    let dir = test_dir();
    for threshold in [2, 4, 7] {
        unique_behavior::shuffled_against_reference(
            |min_dupl| u64_unique(&dir, rec_size(8) * 64, min_dupl),
            threshold * 31,
            threshold,
        );
    }
}

#[test]
fn test_walk_matches_get_with_counts() {
    let dir = test_dir();
    let config = UniqueConfig::default()
        .with_max_in_memory_size(rec_size(8) * 5)
        .with_counters(true)
        .with_tmp_dir(dir.path());
    let mut unique = UniqueImpl::with_config(KeyComparator::Bytes, 8, Descriptor::fixed(8), config);
    let input: Vec<u64> = (0..200u64).map(|i| i % 17).collect();
    for &k in &input {
        unique.add(&u64_key(k)).unwrap();
    }
    assert!(!unique.is_resident_in_memory());

    let got = get_all(&mut unique);
    let walked = walk_all(&mut unique);
    assert_eq!(got, walked);
    assert_eq!(decoded(&got), common::reference(&input, 0));
}

#[test]
fn test_resident_counts_are_exact_without_counters() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, 1 << 20, 0);
    assert!(!unique.is_count_stored());
    for k in [3u64, 3, 1, 3] {
        unique.add(&u64_key(k)).unwrap();
    }
    assert_eq!(decoded(&walk_all(&mut unique)), vec![(1, 1), (3, 3)]);
}

#[test]
fn test_threshold_tallies_filtered_keys() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, rec_size(8) * 2, 3);
    for k in [1u64, 2, 3, 1, 2, 1, 4, 4, 4, 4] {
        unique.add(&u64_key(k)).unwrap();
    }
    assert_eq!(decoded(&get_all(&mut unique)), vec![(1, 3), (4, 4)]);
    assert_eq!(unique.filtered_out_elems(), 2);
    assert_eq!(unique.stats().filtered_out, 2);
    assert_eq!(unique.stats().distinct_output, 2);
}

#[test]
fn test_walk_stops_when_asked() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, rec_size(8) * 4, 0);
    for k in 0u64..20 {
        unique.add(&u64_key(k)).unwrap();
    }
    let mut seen = Vec::new();
    let result = unique.walk(&mut |key, _count| {
        seen.push(decode_u64(key));
        if seen.len() == 3 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    assert!(matches!(result, Err(UniqueError::WalkAborted)));
    assert_eq!(seen, vec![0, 1, 2]);

    // A stopped walk leaves the data intact
    assert_eq!(walk_all(&mut unique).len(), 20);
}

struct FailingSink {
    accepted: usize,
}

impl RecordSink for FailingSink {
    fn write_record(&mut self, _key: &[u8], _count: ElementCount) -> io::Result<()> {
        if self.accepted == 2 {
            return Err(io::Error::other("sink full"));
        }
        self.accepted += 1;
        Ok(())
    }
}

#[test]
fn test_sink_failure_is_reported() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, 1 << 20, 0);
    for k in 0u64..5 {
        unique.add(&u64_key(k)).unwrap();
    }
    let mut sink = FailingSink { accepted: 0 };
    assert!(matches!(unique.get(&mut sink), Err(UniqueError::Sink(_))));
    assert_eq!(sink.accepted, 2);
}

#[test]
fn test_spill_failure_fails_add() {
    let dir = test_dir();
    let config = UniqueConfig::default()
        .with_max_in_memory_size(1)
        .with_tmp_dir(dir.path().join("missing"));
    let mut unique = UniqueImpl::with_config(KeyComparator::Bytes, 8, Descriptor::fixed(8), config);
    unique.add(&u64_key(1)).unwrap();

    // The second key needs a flush, which cannot create the spill file
    let result = unique.add(&u64_key(2));
    assert!(
        matches!(&result, Err(UniqueError::Io(e)) if e.kind() == io::ErrorKind::NotFound),
        "unexpected result: {:?}",
        result
    );
    assert_eq!(unique.run_count(), 0);
    assert_eq!(unique.elements_in_tree(), 1);
    assert!(unique.is_resident_in_memory());
}

#[test]
fn test_threshold_keeps_counters_when_disabled() {
    let dir = test_dir();
    let config = UniqueConfig::default()
        .with_max_in_memory_size(rec_size(8) * 2)
        .with_min_dupl_count(2)
        .with_counters(false)
        .with_tmp_dir(dir.path());
    let mut unique = UniqueImpl::with_config(KeyComparator::Bytes, 8, Descriptor::fixed(8), config);
    assert!(unique.is_count_stored());

    // Key 1 is seen three times before the first spill
    for k in [1u64, 1, 1, 2, 3, 4, 5] {
        unique.add(&u64_key(k)).unwrap();
    }
    assert!(!unique.is_resident_in_memory());
    assert_eq!(decoded(&get_all(&mut unique)), vec![(1, 3)]);
    assert_eq!(unique.filtered_out_elems(), 4);
}

#[test]
fn test_close_for_expansion_after_spill() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, rec_size(8) * 2, 1);
    for k in [1u64, 2, 3, 4] {
        unique.add(&u64_key(k)).unwrap();
    }
    // 1 and 2 were spilled, 3 and 4 are in memory
    assert_eq!(unique.run_count(), 1);

    unique.close_for_expansion();
    for k in [3u64, 3, 4, 9, 10, 11] {
        unique.add(&u64_key(k)).unwrap();
    }
    assert_eq!(unique.run_count(), 1);
    assert_eq!(unique.elements_in_tree(), 2);
    assert_eq!(
        decoded(&get_all(&mut unique)),
        vec![(1, 1), (2, 1), (3, 3), (4, 2)]
    );
}

#[test]
fn test_reset_discards_everything() {
    let dir = test_dir();
    let mut unique = u64_unique(&dir, rec_size(8) * 3, 0);
    for k in 0u64..20 {
        unique.add(&u64_key(k)).unwrap();
    }
    assert!(!unique.is_resident_in_memory());

    assert!(unique.stats().io_stats.unwrap().write_bytes > 0);

    unique.reset().unwrap();
    assert!(unique.is_resident_in_memory());
    assert_eq!(unique.element_count(), 0);
    assert_eq!(unique.memory_used(), 0);
    let stats = unique.stats();
    assert_eq!(stats.runs_flushed, 0);
    assert_eq!(stats.io_stats, Some(unique_es::IoStats::default()));
    assert!(get_all(&mut unique).is_empty());

    for k in 100u64..110 {
        unique.add(&u64_key(k)).unwrap();
    }
    let keys: Vec<u64> = get_all(&mut unique).iter().map(|(k, _)| decode_u64(k)).collect();
    assert_eq!(keys, (100..110).collect::<Vec<_>>());
}

#[test]
fn test_many_runs_need_intermediate_merges() {
    let dir = test_dir();
    let config = UniqueConfig::default()
        .with_max_in_memory_size(rec_size(8) * 2)
        .with_counters(true)
        .with_read_buffer_size(32)
        .with_tmp_dir(dir.path());
    let mut unique = UniqueImpl::with_config(KeyComparator::Bytes, 8, Descriptor::fixed(8), config);

    // Descending input so every run overlaps every other one in key range
    let input: Vec<u64> = (0..300u64).rev().map(|i| i % 101).collect();
    for &k in &input {
        unique.add(&u64_key(k)).unwrap();
    }
    assert!(unique.run_count() > 15);

    let got = decoded(&get_all(&mut unique));
    assert_eq!(got, common::reference(&input, 0));
    assert!(unique.stats().merge_passes >= 1);
    assert!(unique.run_count() <= 15);

    // Runs were reduced in place; a second read gives the same answer
    assert_eq!(decoded(&walk_all(&mut unique)), got);
}

#[test]
fn test_custom_comparator_orders_output() {
    let dir = test_dir();
    let config = UniqueConfig::default()
        .with_max_in_memory_size(rec_size(8) * 3)
        .with_tmp_dir(dir.path());
    let reverse = KeyComparator::custom(|a: &[u8], b: &[u8]| b.cmp(a));
    let mut unique = UniqueImpl::with_config(reverse, 8, Descriptor::fixed(8), config);
    for k in [5u64, 1, 9, 3, 7, 1, 9] {
        unique.add(&u64_key(k)).unwrap();
    }
    let keys: Vec<u64> = get_all(&mut unique).iter().map(|(k, _)| decode_u64(k)).collect();
    assert_eq!(keys, vec![9, 7, 5, 3, 1]);
}

#[test]
fn test_accessors() {
    let unique = UniqueImpl::new(KeyComparator::Bytes, 8, 4096, 2, Descriptor::fixed(8));
    assert_eq!(unique.memory_budget(), 4096);
    assert_eq!(unique.size(), 8);
    assert_eq!(unique.full_size(), 16);
    assert!(unique.is_count_stored());
    assert!(!unique.is_variable_sized());
    assert_eq!(unique.max_elements(), 4096 / ((rec_size(8) + 7) & !7));
}
