use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use symsearch::engines::generation::{HallOfFame, Node, PopMember};

/// A tree with exactly `size` nodes: a chain of unary nodes over `x0`.
fn tree_of_size(size: usize) -> Node {
    let mut tree = Node::Feature(0);
    for _ in 1..size {
        tree = Node::unary(0, tree);
    }
    tree
}

fn member(size: usize, score: f64, loss: f64) -> PopMember {
    PopMember::new(tree_of_size(size), score, loss, true)
}

#[test]
fn test_slots_hold_best_score_ever_offered() {
    let maxsize = 8;
    let mut hof = HallOfFame::new(maxsize);
    let mut best: HashMap<usize, f64> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..500 {
        let size = rng.gen_range(1..=maxsize + 2);
        let score = rng.gen_range(0.0..10.0);
        hof.update(&member(size, score, score));
        if size <= maxsize {
            let entry = best.entry(size).or_insert(f64::INFINITY);
            *entry = entry.min(score);
        }

        for (size, lowest) in &best {
            let stored = hof.get(*size).expect("offered size must be populated");
            assert_eq!(stored.complexity, *size);
            assert!(stored.score <= *lowest);
        }
    }
    assert!(hof.get(maxsize + 1).is_none());
}

#[test]
fn test_equal_score_does_not_replace() {
    let mut hof = HallOfFame::new(5);
    let first = member(3, 1.0, 1.0);
    assert!(hof.update(&first));
    assert!(!hof.update(&member(3, 1.0, 0.5)));
    assert_eq!(hof.get(3).unwrap().loss, 1.0);
    assert!(hof.update(&member(3, 0.9, 0.5)));
}

#[test]
fn test_dominating_strictly_decreasing() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..50 {
        let mut hof = HallOfFame::new(12);
        for _ in 0..30 {
            let size = rng.gen_range(1..=12);
            let loss = rng.gen_range(0.0..5.0);
            hof.update(&member(size, loss, loss));
        }
        let front = hof.dominating();
        assert!(!front.is_empty());
        for pair in front.windows(2) {
            assert!(pair[0].complexity < pair[1].complexity);
            assert!(pair[1].loss < pair[0].loss);
        }
    }
}

#[test]
fn test_dominating_skips_dominated_sizes() {
    let mut hof = HallOfFame::new(6);
    hof.update(&member(1, 3.0, 3.0));
    hof.update(&member(2, 3.0, 3.0));
    hof.update(&member(3, 1.0, 1.0));
    hof.update(&member(5, 2.0, 2.0));
    hof.update(&member(6, f64::INFINITY, f64::INFINITY));

    let sizes: Vec<usize> = hof.dominating().iter().map(|m| m.complexity).collect();
    assert_eq!(sizes, vec![1, 3]);
}

#[test]
fn test_merge_takes_better_members() {
    let mut a = HallOfFame::new(4);
    a.update(&member(2, 2.0, 2.0));
    let mut b = HallOfFame::new(4);
    b.update(&member(2, 1.0, 1.0));
    b.update(&member(4, 5.0, 5.0));
    a.merge(&b);
    assert_eq!(a.get(2).unwrap().score, 1.0);
    assert_eq!(a.len(), 2);
}
