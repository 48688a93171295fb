use crate::config::{Options, PopulationConfig};
use crate::engines::generation::ast::Node;
use crate::engines::generation::member::PopMember;
use crate::engines::generation::statistics::RunningSearchStatistics;
use crate::functions::registry::OperatorSet;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::StandardNormal;

const MAX_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    MutateConstant,
    MutateOperator,
    MutateFeature,
    AddNode,
    InsertNode,
    DeleteNode,
    Randomize,
    DoNothing,
}

const MUTATION_KINDS: [MutationKind; 8] = [
    MutationKind::MutateConstant,
    MutationKind::MutateOperator,
    MutationKind::MutateFeature,
    MutationKind::AddNode,
    MutationKind::InsertNode,
    MutationKind::DeleteNode,
    MutationKind::Randomize,
    MutationKind::DoNothing,
];

pub fn random_leaf<R: Rng + ?Sized>(nfeatures: usize, rng: &mut R) -> Node {
    if rng.gen_bool(0.5) {
        Node::Constant(rng.sample(StandardNormal))
    } else {
        Node::Feature(rng.gen_range(0..nfeatures))
    }
}

fn random_operator_node<R: Rng + ?Sized>(operators: &OperatorSet, first: Node, nfeatures: usize, rng: &mut R) -> Node {
    let total = operators.n_unary() + operators.n_binary();
    if rng.gen_range(0..total) < operators.n_unary() {
        Node::unary(rng.gen_range(0..operators.n_unary()), first)
    } else {
        let other = random_leaf(nfeatures, rng);
        let op = rng.gen_range(0..operators.n_binary());
        if rng.gen_bool(0.5) {
            Node::binary(op, first, other)
        } else {
            Node::binary(op, other, first)
        }
    }
}

/// Preorder indices of nodes matching `pred`.
fn indices_where<F: Fn(&Node) -> bool>(tree: &Node, pred: F) -> Vec<usize> {
    let mut out = Vec::new();
    let mut index = 0;
    visit(tree, &mut index, &pred, &mut out);
    out
}

fn visit<F: Fn(&Node) -> bool>(node: &Node, index: &mut usize, pred: &F, out: &mut Vec<usize>) {
    if pred(node) {
        out.push(*index);
    }
    *index += 1;
    match node {
        Node::Constant(_) | Node::Feature(_) => {}
        Node::Unary { child, .. } => visit(child, index, pred, out),
        Node::Binary { left, right, .. } => {
            visit(left, index, pred, out);
            visit(right, index, pred, out);
        }
    }
}

fn random_index_where<F: Fn(&Node) -> bool, R: Rng + ?Sized>(tree: &Node, pred: F, rng: &mut R) -> Option<usize> {
    indices_where(tree, pred).choose(rng).copied()
}

/// Replace a random leaf with an operator node over fresh leaves.
pub fn append_random_op<R: Rng + ?Sized>(tree: &mut Node, operators: &OperatorSet, nfeatures: usize, rng: &mut R) {
    if let Some(index) = random_index_where(tree, Node::is_leaf, rng) {
        if let Some(slot) = tree.node_at_mut(index) {
            let leaf = random_leaf(nfeatures, rng);
            *slot = random_operator_node(operators, leaf, nfeatures, rng);
        }
    }
}

/// Wrap a random subtree in a new operator node.
pub fn insert_random_op<R: Rng + ?Sized>(tree: &mut Node, operators: &OperatorSet, nfeatures: usize, rng: &mut R) {
    let index = rng.gen_range(0..tree.count());
    if let Some(slot) = tree.node_at_mut(index) {
        let subtree = std::mem::replace(slot, Node::Constant(0.0));
        *slot = random_operator_node(operators, subtree, nfeatures, rng);
    }
}

/// Remove a random node, promoting one of its children. Leaves are
/// replaced by a fresh leaf.
pub fn delete_random_op<R: Rng + ?Sized>(tree: &mut Node, nfeatures: usize, rng: &mut R) {
    let index = rng.gen_range(0..tree.count());
    if let Some(slot) = tree.node_at_mut(index) {
        let node = std::mem::replace(slot, Node::Constant(0.0));
        *slot = match node {
            Node::Constant(_) | Node::Feature(_) => random_leaf(nfeatures, rng),
            Node::Unary { child, .. } => *child,
            Node::Binary { left, right, .. } => {
                if rng.gen_bool(0.5) {
                    *left
                } else {
                    *right
                }
            }
        };
    }
}

pub fn gen_random_tree<R: Rng + ?Sized>(nlength: usize, operators: &OperatorSet, nfeatures: usize, rng: &mut R) -> Node {
    let mut tree = random_leaf(nfeatures, rng);
    for _ in 0..nlength {
        append_random_op(&mut tree, operators, nfeatures, rng);
    }
    tree
}

/// Random tree with about `node_count` nodes.
pub fn gen_random_tree_fixed_size<R: Rng + ?Sized>(
    node_count: usize,
    operators: &OperatorSet,
    nfeatures: usize,
    rng: &mut R,
) -> Node {
    let mut tree = random_leaf(nfeatures, rng);
    while tree.count() < node_count {
        append_random_op(&mut tree, operators, nfeatures, rng);
    }
    tree
}

/// Multiply or divide a random constant by a temperature dependent factor.
pub fn mutate_constant<R: Rng + ?Sized>(tree: &mut Node, temperature: f64, config: &PopulationConfig, rng: &mut R) {
    let mut constants = tree.constants_mut();
    if constants.is_empty() {
        return;
    }
    let pick = rng.gen_range(0..constants.len());
    let value = &mut constants[pick];

    let bottom = 0.1;
    let max_change = config.perturbation_factor * temperature + 1.0 + bottom;
    let factor = max_change.powf(rng.gen::<f64>());
    if rng.gen_bool(0.5) {
        **value *= factor;
    } else {
        **value /= factor;
    }
    if rng.gen::<f64>() < config.probability_negate_constant {
        **value = -**value;
    }
}

pub fn mutate_operator<R: Rng + ?Sized>(tree: &mut Node, operators: &OperatorSet, rng: &mut R) {
    let Some(index) = random_index_where(tree, |n| !n.is_leaf(), rng) else {
        return;
    };
    match tree.node_at_mut(index) {
        Some(Node::Unary { op, .. }) => *op = rng.gen_range(0..operators.n_unary()),
        Some(Node::Binary { op, .. }) => *op = rng.gen_range(0..operators.n_binary()),
        _ => {}
    }
}

pub fn mutate_feature<R: Rng + ?Sized>(tree: &mut Node, nfeatures: usize, rng: &mut R) {
    let Some(index) = random_index_where(tree, |n| matches!(n, Node::Feature(_)), rng) else {
        return;
    };
    if let Some(Node::Feature(feature)) = tree.node_at_mut(index) {
        *feature = rng.gen_range(0..nfeatures);
    }
}

/// Swap random subtrees between two trees.
pub fn crossover_trees<R: Rng + ?Sized>(a: &Node, b: &Node, rng: &mut R) -> (Node, Node) {
    let mut child_a = a.clone();
    let mut child_b = b.clone();
    let index_a = rng.gen_range(0..a.count());
    let index_b = rng.gen_range(0..b.count());
    if let (Some(slot_a), Some(slot_b)) = (child_a.node_at_mut(index_a), child_b.node_at_mut(index_b)) {
        std::mem::swap(slot_a, slot_b);
    }
    (child_a, child_b)
}

fn satisfies_constraints(tree: &Node, cur_maxsize: usize, config: &PopulationConfig) -> bool {
    tree.count() <= cur_maxsize && tree.depth() <= config.maxdepth
}

/// Apply one weighted mutation. Kinds that cannot apply to this tree
/// are given zero weight.
pub fn mutate_tree<R: Rng + ?Sized>(
    tree: &Node,
    temperature: f64,
    cur_maxsize: usize,
    nfeatures: usize,
    options: &Options,
    rng: &mut R,
) -> (Node, MutationKind) {
    let config = options.population();
    let mut weights = config.mutation_weights.as_array();
    if tree.count_constants() == 0 {
        weights[0] = 0.0;
    }
    if tree.is_leaf() {
        weights[1] = 0.0;
    }
    if indices_where(tree, |n| matches!(n, Node::Feature(_))).is_empty() {
        weights[2] = 0.0;
    }
    if tree.count() >= cur_maxsize {
        weights[3] = 0.0;
        weights[4] = 0.0;
    }

    let kind = match WeightedIndex::new(weights) {
        Ok(dist) => MUTATION_KINDS[dist.sample(rng)],
        Err(_) => MutationKind::DoNothing,
    };

    let operators = &options.operators;
    let mut new_tree = tree.clone();
    match kind {
        MutationKind::MutateConstant => mutate_constant(&mut new_tree, temperature, config, rng),
        MutationKind::MutateOperator => mutate_operator(&mut new_tree, operators, rng),
        MutationKind::MutateFeature => mutate_feature(&mut new_tree, nfeatures, rng),
        MutationKind::AddNode => append_random_op(&mut new_tree, operators, nfeatures, rng),
        MutationKind::InsertNode => insert_random_op(&mut new_tree, operators, nfeatures, rng),
        MutationKind::DeleteNode => delete_random_op(&mut new_tree, nfeatures, rng),
        MutationKind::Randomize => {
            let size = rng.gen_range(1..=cur_maxsize);
            new_tree = gen_random_tree_fixed_size(size, operators, nfeatures, rng);
        }
        MutationKind::DoNothing => {}
    }
    (new_tree, kind)
}

/// Mutate until the constraints hold, up to a fixed number of attempts.
pub fn mutate_within_constraints<R: Rng + ?Sized>(
    tree: &Node,
    temperature: f64,
    cur_maxsize: usize,
    nfeatures: usize,
    options: &Options,
    rng: &mut R,
) -> Option<(Node, MutationKind)> {
    for _ in 0..MAX_ATTEMPTS {
        let (candidate, kind) = mutate_tree(tree, temperature, cur_maxsize, nfeatures, options, rng);
        if satisfies_constraints(&candidate, cur_maxsize, options.population()) {
            return Some((candidate, kind));
        }
    }
    None
}

pub fn crossover_within_constraints<R: Rng + ?Sized>(
    a: &Node,
    b: &Node,
    cur_maxsize: usize,
    options: &Options,
    rng: &mut R,
) -> Option<(Node, Node)> {
    for _ in 0..MAX_ATTEMPTS {
        let (child_a, child_b) = crossover_trees(a, b, rng);
        if satisfies_constraints(&child_a, cur_maxsize, options.population())
            && satisfies_constraints(&child_b, cur_maxsize, options.population())
        {
            return Some((child_a, child_b));
        }
    }
    None
}

/// Tournament selection with adaptive parsimony: members whose size has
/// been explored often are penalised.
pub fn best_of_sample<'a, R: Rng + ?Sized>(
    members: &'a [PopMember],
    statistics: &RunningSearchStatistics,
    options: &Options,
    rng: &mut R,
) -> &'a PopMember {
    let config = options.population();
    let n = config.tournament_selection_n.min(members.len()).max(1);
    let sample: Vec<&PopMember> = members.choose_multiple(rng, n).collect();

    let scores: Vec<f64> = sample
        .iter()
        .map(|member| {
            if config.use_frequency_in_tournament {
                let frequency = statistics.normalized_frequency(member.complexity).unwrap_or(0.0);
                member.score * (config.adaptive_parsimony_scaling * frequency).exp()
            } else {
                member.score
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..sample.len()).collect();
    order.sort_by(|a, b| scores[*a].partial_cmp(&scores[*b]).unwrap_or(std::cmp::Ordering::Equal));

    let p = config.tournament_selection_p;
    let rank = if p >= 1.0 {
        0
    } else {
        let weights: Vec<f64> = (0..order.len()).map(|k| p * (1.0 - p).powi(k as i32)).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            Err(_) => 0,
        }
    };
    sample[order[rank]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use rand::rngs::StdRng;

    fn options() -> Options {
        let mut config = SearchConfig::default();
        config.population.unary_operators = vec!["cos".to_string()];
        Options::new(config).unwrap()
    }

    #[test]
    fn test_random_tree_grows() {
        let options = options();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = gen_random_tree_fixed_size(9, &options.operators, 2, &mut rng);
        assert!(tree.count() >= 9);
    }

    #[test]
    fn test_mutations_respect_maxsize() {
        let options = options();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = gen_random_tree(3, &options.operators, 2, &mut rng);
        for _ in 0..200 {
            if let Some((candidate, _)) = mutate_within_constraints(&tree, 1.0, 7, 2, &options, &mut rng) {
                assert!(candidate.count() <= 7);
            }
        }
    }

    #[test]
    fn test_delete_shrinks_operator_node() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut tree = Node::unary(0, Node::unary(0, Node::Feature(0)));
        while tree.count() == 3 {
            delete_random_op(&mut tree, 1, &mut rng);
        }
        assert!(tree.count() <= 2);
    }

    #[test]
    fn test_crossover_preserves_total_size() {
        let options = options();
        let mut rng = StdRng::seed_from_u64(3);
        let a = gen_random_tree(4, &options.operators, 2, &mut rng);
        let b = gen_random_tree(2, &options.operators, 2, &mut rng);
        let (c, d) = crossover_trees(&a, &b, &mut rng);
        assert_eq!(c.count() + d.count(), a.count() + b.count());
    }
}
