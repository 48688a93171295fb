use crate::config::Options;
use crate::data::dataset::Dataset;
use crate::engines::evaluation::dimensional::violates_dimensional_constraints;
use crate::engines::evaluation::loss::{compute_loss, loss_to_score};
use crate::engines::generation::ast::Node;
use crate::error::Result;
use crate::functions::registry::OperatorSet;

/// Evaluate a tree over every row. Returns `None` as soon as any
/// intermediate value is non-finite.
pub fn eval_tree(tree: &Node, dataset: &Dataset, operators: &OperatorSet) -> Option<Vec<f64>> {
    match tree {
        Node::Constant(value) => {
            if value.is_finite() {
                Some(vec![*value; dataset.n_rows()])
            } else {
                None
            }
        }
        Node::Feature(index) => Some(dataset.feature(*index).to_vec()),
        Node::Unary { op, child } => {
            let mut values = eval_tree(child, dataset, operators)?;
            let op = operators.unary(*op);
            for v in values.iter_mut() {
                *v = op.apply(&[*v]);
                if !v.is_finite() {
                    return None;
                }
            }
            Some(values)
        }
        Node::Binary { op, left, right } => {
            let mut values = eval_tree(left, dataset, operators)?;
            let rhs = eval_tree(right, dataset, operators)?;
            let op = operators.binary(*op);
            for (v, r) in values.iter_mut().zip(rhs) {
                *v = op.apply(&[*v, r]);
                if !v.is_finite() {
                    return None;
                }
            }
            Some(values)
        }
    }
}

/// Loss of a tree, including the dimensional penalty when the dataset
/// declares units. Trees that do not evaluate get an infinite loss.
pub fn eval_loss(tree: &Node, dataset: &Dataset, options: &Options) -> Result<f64> {
    let prediction = match eval_tree(tree, dataset, &options.operators) {
        Some(prediction) => prediction,
        None => return Ok(f64::INFINITY),
    };
    let mut loss = compute_loss(&prediction, dataset.targets(), dataset.weights(), dataset.loss());

    let penalty = options.population().dimensional_constraint_penalty;
    if penalty > 0.0 && violates_dimensional_constraints(tree, dataset, &options.operators)? {
        loss += penalty;
    }
    Ok(loss)
}

/// Returns `(score, loss)`.
pub fn score_tree(tree: &Node, dataset: &Dataset, options: &Options) -> Result<(f64, f64)> {
    let loss = eval_loss(tree, dataset, options)?;
    let score = loss_to_score(loss, dataset.baseline_loss(), tree.count(), options.population().parsimony);
    Ok((score, loss))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::data::units::Unit;

    fn options() -> Options {
        Options::new(SearchConfig::default()).unwrap()
    }

    #[test]
    fn test_eval_binary_tree() {
        let ds = Dataset::from_columns(vec![vec![1.0, 2.0, 3.0]], vec![2.0, 4.0, 6.0]).unwrap();
        let options = options();
        // x1 * 2.0, `*` is index 2 of the default binary operators
        let tree = Node::binary(2, Node::Feature(0), Node::Constant(2.0));
        assert_eq!(eval_tree(&tree, &ds, &options.operators), Some(vec![2.0, 4.0, 6.0]));
        let (score, loss) = score_tree(&tree, &ds, &options).unwrap();
        assert_eq!(loss, 0.0);
        assert!((score - 3.0 * options.population().parsimony).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_gives_infinite_loss() {
        let ds = Dataset::from_columns(vec![vec![0.0, 1.0]], vec![1.0, 1.0]).unwrap();
        let options = options();
        // 1.0 / x1
        let tree = Node::binary(3, Node::Constant(1.0), Node::Feature(0));
        assert!(eval_tree(&tree, &ds, &options.operators).is_none());
        assert_eq!(eval_loss(&tree, &ds, &options).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_penalty_applied_to_violating_tree() {
        let ds = Dataset::from_columns(vec![vec![1.0, 2.0], vec![1.0, 2.0]], vec![2.0, 4.0])
            .unwrap()
            .with_units(
                Some(vec![Unit::parse("m").unwrap(), Unit::parse("s").unwrap()]),
                None,
            )
            .unwrap();
        let options = options();
        // x1 + x2 adds meters to seconds
        let tree = Node::binary(0, Node::Feature(0), Node::Feature(1));
        let loss = eval_loss(&tree, &ds, &options).unwrap();
        assert!((loss - 1000.0).abs() < 1e-9);
    }
}
