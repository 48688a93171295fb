use rand::rngs::StdRng;
use rand::SeedableRng;
use symsearch::engines::generation::migration::{migrate, migration_count};
use symsearch::engines::generation::{Node, PopMember, Population};

fn population(size: usize) -> Population {
    Population::new(
        (0..size)
            .map(|i| PopMember::new(Node::Constant(i as f64), 1.0, 1.0, true))
            .collect(),
    )
}

fn donors() -> Vec<PopMember> {
    (0..3)
        .map(|i| PopMember::new(Node::unary(0, Node::Feature(i)), 0.5, 0.5, true))
        .collect()
}

fn changed_slots(before: &Population, after: &Population) -> Vec<usize> {
    before
        .members
        .iter()
        .zip(&after.members)
        .enumerate()
        .filter(|(_, (a, b))| a.tree != b.tree)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn test_replaces_exact_rounded_count() {
    let mut rng = StdRng::seed_from_u64(5);
    for (frac, size) in [(0.1, 100), (0.25, 10), (0.035, 33), (0.03, 33), (0.00036, 33), (1.0, 7)] {
        let before = population(size);
        let mut after = before.clone();
        let replaced = migrate(&donors(), &mut after, frac, true, &mut rng);
        let expected = migration_count(frac, size);
        assert_eq!(replaced, expected);
        assert_eq!(changed_slots(&before, &after).len(), expected);
        assert_eq!(after.len(), size);
    }
}

#[test]
fn test_replacements_come_from_donors_and_donors_unchanged() {
    let mut rng = StdRng::seed_from_u64(8);
    let pool = donors();
    let snapshot = pool.clone();
    let before = population(50);
    let mut after = before.clone();
    migrate(&pool, &mut after, 0.4, true, &mut rng);

    assert_eq!(pool, snapshot);
    for slot in changed_slots(&before, &after) {
        assert!(pool.iter().any(|d| d.tree == after.members[slot].tree));
        assert!(pool.iter().all(|d| d.birth != after.members[slot].birth));
    }
}

#[test]
fn test_slot_choice_spreads_over_population() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut hits = vec![0usize; 20];
    for _ in 0..400 {
        let before = population(20);
        let mut after = before.clone();
        migrate(&donors(), &mut after, 0.25, true, &mut rng);
        for slot in changed_slots(&before, &after) {
            hits[slot] += 1;
        }
    }
    // 400 rounds x 5 slots over 20 positions: about 100 hits each.
    assert!(hits.iter().all(|h| *h > 50 && *h < 150), "{:?}", hits);
}

#[test]
fn test_empty_pool_is_noop() {
    let mut rng = StdRng::seed_from_u64(1);
    let before = population(10);
    let mut after = before.clone();
    assert_eq!(migrate(&[], &mut after, 0.5, true, &mut rng), 0);
    assert_eq!(before, after);
}
