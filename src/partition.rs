//! Partition planning: expanding a partial user-supplied grouping of
//! container names into a complete, validated partitioning of the
//! running set, plus a randomized planner.
//!
//! Everything in here is pure - no I/O, no side effects. The
//! orchestrator owns applying a plan to the network engine.

use std::collections::BTreeSet;

use rand::Rng;

use crate::container::ContainerView;
use crate::error::{Error, Result};

/// Expand and validate user-supplied partitions against the running set.
///
/// Containers not named in any partition are collected into one
/// implicit leftover partition. Neutral containers get one extra
/// partition of their own unless the leftover already covers them.
/// Holy containers may never be named in a partition.
///
/// Explicit partitions are returned first, in input order, followed by
/// the implicit leftover and neutral partitions. Overlap between
/// explicit partitions is not rejected, and a neutral container named
/// explicitly can end up in two partitions at once; both behaviors are
/// kept as-is.
pub fn expand_partitions(
    containers: &[ContainerView],
    partitions: &[Vec<String>],
) -> Result<Vec<BTreeSet<String>>> {
    let all_names: BTreeSet<String> = containers
        .iter()
        .filter(|c| !c.holy)
        .map(|c| c.name.clone())
        .collect();
    let holy_names: BTreeSet<String> = containers
        .iter()
        .filter(|c| c.holy)
        .map(|c| c.name.clone())
        .collect();
    let neutral_names: BTreeSet<String> = containers
        .iter()
        .filter(|c| c.neutral)
        .map(|c| c.name.clone())
        .collect();

    let mut expanded: Vec<BTreeSet<String>> = partitions
        .iter()
        .map(|p| p.iter().cloned().collect())
        .collect();

    let mut unknown = BTreeSet::new();
    let mut holy = BTreeSet::new();
    let mut union = BTreeSet::new();

    for partition in &expanded {
        for name in partition {
            if !all_names.contains(name) && !holy_names.contains(name) {
                unknown.insert(name.clone());
            } else if !all_names.contains(name) {
                holy.insert(name.clone());
            }
            union.insert(name.clone());
        }
    }

    if !unknown.is_empty() {
        return Err(Error::UnknownContainers(unknown.into_iter().collect()));
    }

    if !holy.is_empty() {
        return Err(Error::HolyContainers(holy.into_iter().collect()));
    }

    // put any leftover containers in an implicit partition
    let leftover: BTreeSet<String> = all_names.difference(&union).cloned().collect();
    if !leftover.is_empty() {
        expanded.push(leftover.clone());
    }

    // neutral containers get an implicit partition of their own unless
    // the leftover already accounts for them
    if !neutral_names.is_subset(&leftover) {
        expanded.push(neutral_names);
    }

    Ok(expanded)
}

/// Plan a random partitioning of `names`.
///
/// Draws a partition count k uniformly from 1..=n. An empty input or
/// k == 1 yields an empty plan: "one partition" means no partitioning
/// at all, and the caller performs a full rejoin instead. Otherwise
/// each partition is seeded with one name drawn without replacement
/// (so none is empty) and the remaining names are assigned to uniform
/// partition indices.
///
/// The seeding step biases the distribution over possible k-partitions;
/// that is accepted, not a correctness requirement.
pub fn random_partition<R: Rng>(mut names: Vec<String>, rng: &mut R) -> Vec<Vec<String>> {
    if names.is_empty() {
        return Vec::new();
    }

    let num_partitions = rng.gen_range(1..=names.len());
    if num_partitions <= 1 {
        return Vec::new();
    }

    fn pick<R: Rng>(pool: &mut Vec<String>, rng: &mut R) -> String {
        let idx = rng.gen_range(0..pool.len());
        pool.remove(idx)
    }

    // pick at least one container for each partition
    let mut partitions: Vec<Vec<String>> = (0..num_partitions)
        .map(|_| vec![pick(&mut names, rng)])
        .collect();

    // distribute the rest among the partitions
    while !names.is_empty() {
        let target = rng.gen_range(0..num_partitions);
        let name = pick(&mut names, rng);
        partitions[target].push(name);
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerStatus;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn view(name: &str) -> ContainerView {
        ContainerView::new(name, format!("id-{name}"), ContainerStatus::Up)
    }

    fn holy_view(name: &str) -> ContainerView {
        view(name).holy(true)
    }

    fn neutral_view(name: &str) -> ContainerView {
        view(name).neutral(true)
    }

    fn parts(groups: &[&[&str]]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_explicit_partitions_yields_single_leftover() {
        let containers = vec![view("a"), view("b"), view("c")];
        let result = expand_partitions(&containers, &[]).unwrap();
        assert_eq!(result, vec![set(&["a", "b", "c"])]);
    }

    #[test]
    fn test_leftover_partition_appended_after_explicit() {
        let containers = vec![view("a"), view("b"), view("c"), view("d")];
        let result = expand_partitions(&containers, &parts(&[&["a", "b"]])).unwrap();
        assert_eq!(result, vec![set(&["a", "b"]), set(&["c", "d"])]);
    }

    #[test]
    fn test_explicit_order_preserved() {
        let containers = vec![view("a"), view("b"), view("c")];
        let result = expand_partitions(&containers, &parts(&[&["c"], &["a"]])).unwrap();
        assert_eq!(result, vec![set(&["c"]), set(&["a"]), set(&["b"])]);
    }

    #[test]
    fn test_unknown_containers_aggregated() {
        let containers = vec![view("a"), view("b")];
        let err =
            expand_partitions(&containers, &parts(&[&["a", "x"], &["b", "y"]])).unwrap_err();
        match err {
            Error::UnknownContainers(names) => {
                assert_eq!(names, vec!["x".to_string(), "y".to_string()])
            }
            other => panic!("expected UnknownContainers, got {other:?}"),
        }
    }

    #[test]
    fn test_holy_containers_aggregated() {
        let containers = vec![view("a"), holy_view("h1"), holy_view("h2")];
        let err =
            expand_partitions(&containers, &parts(&[&["a", "h1"], &["h2"]])).unwrap_err();
        match err {
            Error::HolyContainers(names) => {
                assert_eq!(names, vec!["h1".to_string(), "h2".to_string()])
            }
            other => panic!("expected HolyContainers, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_takes_precedence_over_holy() {
        // both validation failures present; the unknown aggregate wins
        let containers = vec![view("a"), holy_view("h")];
        let err = expand_partitions(&containers, &parts(&[&["h", "x"]])).unwrap_err();
        match err {
            Error::UnknownContainers(names) => assert_eq!(names, vec!["x".to_string()]),
            other => panic!("expected UnknownContainers, got {other:?}"),
        }
    }

    #[test]
    fn test_holy_never_lands_in_leftover() {
        let containers = vec![view("a"), view("b"), holy_view("h")];
        let result = expand_partitions(&containers, &parts(&[&["a"]])).unwrap();
        assert_eq!(result, vec![set(&["a"]), set(&["b"])]);
    }

    #[test]
    fn test_neutral_covered_by_leftover_not_duplicated() {
        // spec'd worked example: a(holy), b, c, d(neutral), P = [{b}]
        let containers = vec![holy_view("a"), view("b"), view("c"), neutral_view("d")];
        let result = expand_partitions(&containers, &parts(&[&["b"]])).unwrap();
        assert_eq!(result, vec![set(&["b"]), set(&["c", "d"])]);
    }

    #[test]
    fn test_neutral_gets_own_partition_when_assigned_elsewhere() {
        let containers = vec![view("a"), view("b"), neutral_view("n")];
        let result = expand_partitions(&containers, &parts(&[&["a", "n"]])).unwrap();
        assert_eq!(result, vec![set(&["a", "n"]), set(&["b"]), set(&["n"])]);
    }

    #[test]
    fn neutral_set_appended_even_when_named_explicitly() {
        // A neutral container named in an explicit partition appears
        // twice in the result. Documented behavior, not deduplicated.
        let containers = vec![view("a"), neutral_view("n")];
        let result = expand_partitions(&containers, &parts(&[&["n"], &["a"]])).unwrap();
        assert_eq!(result, vec![set(&["n"]), set(&["a"]), set(&["n"])]);
        let occurrences = result.iter().filter(|p| p.contains("n")).count();
        assert_eq!(occurrences, 2);
    }

    #[test]
    fn overlapping_explicit_partitions_are_kept() {
        // no disjointness enforcement across explicit partitions
        let containers = vec![view("a"), view("b"), view("c")];
        let result = expand_partitions(&containers, &parts(&[&["a", "b"], &["b", "c"]])).unwrap();
        assert_eq!(result, vec![set(&["a", "b"]), set(&["b", "c"])]);
    }

    #[test]
    fn test_union_covers_all_non_holy() {
        let containers = vec![view("a"), view("b"), view("c"), holy_view("h")];
        let result = expand_partitions(&containers, &parts(&[&["b"]])).unwrap();
        let covered: BTreeSet<String> = result.iter().flatten().cloned().collect();
        assert_eq!(covered, set(&["a", "b", "c"]));
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_random_partition_empty_input() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(random_partition(Vec::new(), &mut rng).is_empty());
    }

    #[test]
    fn test_random_partition_singleton_is_rejoin() {
        // n = 1 forces k = 1, which is "no partitioning at all"
        let mut rng = StdRng::seed_from_u64(7);
        assert!(random_partition(names(&["only"]), &mut rng).is_empty());
    }

    #[test]
    fn test_random_partition_covers_exactly_once() {
        let pool = names(&["a", "b", "c", "d", "e", "f"]);
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let partitions = random_partition(pool.clone(), &mut rng);
            if partitions.is_empty() {
                // drew k == 1; rejoin case
                continue;
            }
            assert!(partitions.len() >= 2 && partitions.len() <= pool.len());
            assert!(partitions.iter().all(|p| !p.is_empty()));
            let mut covered: Vec<String> = partitions.iter().flatten().cloned().collect();
            covered.sort();
            assert_eq!(covered, pool, "seed {seed} lost or duplicated a name");
        }
    }

    #[test]
    fn test_random_partition_deterministic_for_seed() {
        let pool = names(&["a", "b", "c", "d", "e"]);
        let first = random_partition(pool.clone(), &mut StdRng::seed_from_u64(42));
        let second = random_partition(pool, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }
}
