#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use unique_es::Unique;

use super::{decoded, get_all, reference, u64_key, walk_all};

pub fn example_sequence<U, F>(factory: F)
where
    U: Unique,
    F: Fn(u64) -> U,
{
    let input = [1u64, 2, 1, 3, 2, 2];

    let mut union = factory(0);
    for k in input {
        union.add(&u64_key(k)).unwrap();
    }
    let keys: Vec<u64> = decoded(&get_all(&mut union)).iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![1, 2, 3]);

    let mut intersect = factory(2);
    for k in input {
        intersect.add(&u64_key(k)).unwrap();
    }
    assert_eq!(decoded(&get_all(&mut intersect)), vec![(1, 2), (2, 3)]);
}

pub fn empty_input<U, F>(factory: F)
where
    U: Unique,
    F: Fn(u64) -> U,
{
    let mut unique = factory(0);
    assert_eq!(unique.element_count(), 0);
    assert!(unique.is_resident_in_memory());
    assert!(get_all(&mut unique).is_empty());
    assert!(walk_all(&mut unique).is_empty());
}

/// Output must match a counting reference over a shuffled input with many
/// repeats, for both delivery modes.
pub fn shuffled_against_reference<U, F>(factory: F, seed: u64, threshold: u64)
where
    U: Unique,
    F: Fn(u64) -> U,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let mut input: Vec<u64> = (0..3_000).map(|_| rng.random_range(0..800)).collect();
    input.shuffle(&mut rng);

    let mut unique = factory(threshold);
    for &k in &input {
        unique.add(&u64_key(k)).unwrap();
    }

    let expected = reference(&input, threshold);
    let got = decoded(&get_all(&mut unique));
    if threshold > 0 {
        assert_eq!(got, expected);
    } else {
        let keys: Vec<u64> = got.iter().map(|(k, _)| *k).collect();
        let expected_keys: Vec<u64> = expected.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, expected_keys);
    }

    let walked = decoded(&walk_all(&mut unique));
    assert_eq!(walked, got);
}

/// Same input under different budgets must give the same output.
pub fn budget_does_not_change_result<U, F>(factory: F, budgets: &[usize])
where
    U: Unique,
    F: Fn(usize) -> U,
{
    let input: Vec<u64> = (0..1_000u64).map(|i| (i * 7919) % 250).collect();
    let mut outputs = Vec::new();
    for &budget in budgets {
        let mut unique = factory(budget);
        for &k in &input {
            unique.add(&u64_key(k)).unwrap();
        }
        let keys: Vec<u64> = decoded(&get_all(&mut unique)).into_iter().map(|(k, _)| k).collect();
        outputs.push(keys);
    }
    for output in &outputs[1..] {
        assert_eq!(output, &outputs[0]);
    }
    assert_eq!(outputs[0].len(), 250);
}
