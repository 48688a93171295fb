use std::sync::Arc;
use symsearch::config::{Options, SearchConfig};
use symsearch::data::{Dataset, Unit};
use symsearch::engines::evaluation::{eval_loss, violates_dimensional_constraints};
use symsearch::engines::generation::Node;
use symsearch::functions::{CustomOperator, OperatorRegistry};

fn options(unary: &[&str], binary: &[&str]) -> Options {
    let mut config = SearchConfig::default();
    config.population.unary_operators = unary.iter().map(|s| s.to_string()).collect();
    config.population.binary_operators = binary.iter().map(|s| s.to_string()).collect();
    Options::new(config).unwrap()
}

fn dataset(units: &[&str], target: Option<&str>) -> Dataset {
    let columns: Vec<Vec<f64>> = (0..units.len()).map(|j| vec![1.0 + j as f64, 2.0, 3.0]).collect();
    let feature_units = units.iter().map(|u| Unit::parse(u).unwrap()).collect();
    Dataset::from_columns(columns, vec![1.0, 4.0, 9.0])
        .unwrap()
        .with_units(Some(feature_units), target.map(|t| Unit::parse(t).unwrap()))
        .unwrap()
}

#[test]
fn test_free_constant_plus_square_of_meters() {
    // `+` is 0 and `*` is 1.
    let options = options(&[], &["+", "*"]);
    let data = dataset(&["m"], None);
    let tree = Node::binary(
        0,
        Node::Constant(2.0),
        Node::binary(1, Node::Feature(0), Node::Feature(0)),
    );
    assert!(!violates_dimensional_constraints(&tree, &data, &options.operators).unwrap());
}

#[test]
fn test_unit_matched_arithmetic_is_consistent() {
    let options = options(&[], &["+", "-", "*", "/"]);
    let data = dataset(&["m", "m", "s"], Some("m/s"));
    // (x0 + x1) / x2
    let tree = Node::binary(
        3,
        Node::binary(0, Node::Feature(0), Node::Feature(1)),
        Node::Feature(2),
    );
    assert!(!violates_dimensional_constraints(&tree, &data, &options.operators).unwrap());
}

#[test]
fn test_meters_plus_seconds_violates() {
    let options = options(&[], &["+", "-", "*", "/"]);
    let data = dataset(&["m", "s"], None);
    let tree = Node::binary(0, Node::Feature(0), Node::Feature(1));
    assert!(violates_dimensional_constraints(&tree, &data, &options.operators).unwrap());

    // Buried inside a product the violation still surfaces.
    let nested = Node::binary(2, Node::Constant(3.0), Node::binary(1, Node::Feature(1), Node::Feature(0)));
    assert!(violates_dimensional_constraints(&nested, &data, &options.operators).unwrap());
}

#[test]
fn test_power_with_plain_and_dimensioned_exponents() {
    // `^` is 4.
    let options = options(&[], &["+", "-", "*", "/", "^"]);
    let data = dataset(&["m", "s"], None);
    let square = Node::binary(4, Node::Feature(0), Node::Constant(2.0));
    assert!(!violates_dimensional_constraints(&square, &data, &options.operators).unwrap());

    let dimensioned = Node::binary(4, Node::Feature(0), Node::Feature(1));
    assert!(violates_dimensional_constraints(&dimensioned, &data, &options.operators).unwrap());
}

#[test]
fn test_target_units_are_checked() {
    let options = options(&[], &["+", "*"]);
    let data = dataset(&["m"], Some("m^2"));
    let square = Node::binary(1, Node::Feature(0), Node::Feature(0));
    assert!(!violates_dimensional_constraints(&square, &data, &options.operators).unwrap());
    assert!(violates_dimensional_constraints(&Node::Feature(0), &data, &options.operators).unwrap());
}

#[test]
fn test_datasets_without_units_never_violate() {
    let options = options(&[], &["+", "*"]);
    let data = Dataset::from_columns(vec![vec![1.0, 2.0], vec![3.0, 4.0]], vec![1.0, 2.0]).unwrap();
    let tree = Node::binary(0, Node::Feature(0), Node::Feature(1));
    assert!(!violates_dimensional_constraints(&tree, &data, &options.operators).unwrap());
}

#[test]
fn test_operator_without_unit_rule_falls_back_to_numeric() {
    let mut registry = OperatorRegistry::new();
    registry.register(Arc::new(CustomOperator::new("softplus", 1, |args| (1.0 + args[0].exp()).ln())));
    let mut config = SearchConfig::default();
    config.population.unary_operators = vec!["softplus".to_string()];
    config.population.binary_operators = vec!["*".to_string()];
    let options = Options::with_registry(config, &registry).unwrap();
    let data = dataset(&["m", "1"], None);

    let on_constant = Node::unary(0, Node::Constant(1.5));
    assert!(!violates_dimensional_constraints(&on_constant, &data, &options.operators).unwrap());

    let on_dimensionless = Node::unary(0, Node::Feature(1));
    assert!(!violates_dimensional_constraints(&on_dimensionless, &data, &options.operators).unwrap());

    let on_meters = Node::unary(0, Node::Feature(0));
    assert!(violates_dimensional_constraints(&on_meters, &data, &options.operators).unwrap());
}

#[test]
fn test_violation_adds_penalty_to_loss() {
    let mut config = SearchConfig::default();
    config.population.dimensional_constraint_penalty = 500.0;
    let options = Options::new(config).unwrap();
    let data = dataset(&["m", "s"], None);
    let bad = Node::binary(0, Node::Feature(0), Node::Feature(1));
    let good = Node::binary(2, Node::Feature(0), Node::Feature(1));
    let bad_loss = eval_loss(&bad, &data, &options).unwrap();
    let good_loss = eval_loss(&good, &data, &options).unwrap();
    assert!(bad_loss >= 500.0);
    assert!(good_loss < bad_loss);
}
