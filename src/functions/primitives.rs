use crate::data::units::Quantity;
use crate::engines::evaluation::dimensional::WildcardQuantity;
use crate::functions::traits::{DispatchError, Operator};
use num_rational::Rational32;
use std::fmt;
use std::sync::Arc;

type UnitResult = Result<WildcardQuantity, DispatchError>;

fn infix(symbol: &str, args: &[String]) -> String {
    format!("({} {} {})", args[0], symbol, args[1])
}

// --- Arithmetic ---
pub struct Add;

impl Operator for Add {
    fn alias(&self) -> &str { "+" }
    fn arity(&self) -> usize { 2 }
    fn apply(&self, args: &[f64]) -> f64 { args[0] + args[1] }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { Ok(args[0] + args[1]) }
    fn render(&self, args: &[String]) -> String { infix("+", args) }
}

pub struct Sub;

impl Operator for Sub {
    fn alias(&self) -> &str { "-" }
    fn arity(&self) -> usize { 2 }
    fn apply(&self, args: &[f64]) -> f64 { args[0] - args[1] }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { Ok(args[0] - args[1]) }
    fn render(&self, args: &[String]) -> String { infix("-", args) }
}

pub struct Mul;

impl Operator for Mul {
    fn alias(&self) -> &str { "*" }
    fn arity(&self) -> usize { 2 }
    fn apply(&self, args: &[f64]) -> f64 { args[0] * args[1] }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { Ok(args[0] * args[1]) }
    fn render(&self, args: &[String]) -> String { infix("*", args) }
}

pub struct Div;

impl Operator for Div {
    fn alias(&self) -> &str { "/" }
    fn arity(&self) -> usize { 2 }
    fn apply(&self, args: &[f64]) -> f64 { args[0] / args[1] }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { Ok(args[0] / args[1]) }
    fn render(&self, args: &[String]) -> String { infix("/", args) }
}

/// Real power. Negative bases yield NaN, which the evaluator rejects.
pub struct Pow;

impl Operator for Pow {
    fn alias(&self) -> &str { "^" }
    fn arity(&self) -> usize { 2 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].powf(args[1]) }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { Ok(args[0].powq(args[1])) }
    fn render(&self, args: &[String]) -> String { infix("^", args) }
}

// --- Unary, unit preserving ---
pub struct Neg;

impl Operator for Neg {
    fn alias(&self) -> &str { "neg" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { -args[0] }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { Ok(-args[0]) }
    fn render(&self, args: &[String]) -> String { format!("-({})", args[0]) }
}

pub struct Abs;

impl Operator for Abs {
    fn alias(&self) -> &str { "abs" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].abs() }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult {
        let x = args[0];
        Ok(WildcardQuantity::new(
            Quantity::new(x.value().abs(), x.dimensions()),
            x.wildcard,
            x.violates,
        ))
    }
}

// --- Unary, unit scaling ---
fn scale_exponents(x: WildcardQuantity, power: Rational32, value: f64) -> WildcardQuantity {
    WildcardQuantity::new(Quantity::new(value, x.dimensions().powr(power)), x.wildcard, x.violates)
}

pub struct Sqrt;

impl Operator for Sqrt {
    fn alias(&self) -> &str { "sqrt" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].sqrt() }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult {
        Ok(scale_exponents(args[0], Rational32::new(1, 2), args[0].value().sqrt()))
    }
}

pub struct Square;

impl Operator for Square {
    fn alias(&self) -> &str { "square" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0] * args[0] }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult {
        Ok(scale_exponents(args[0], Rational32::from_integer(2), args[0].value().powi(2)))
    }
}

pub struct Cube;

impl Operator for Cube {
    fn alias(&self) -> &str { "cube" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].powi(3) }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult {
        Ok(scale_exponents(args[0], Rational32::from_integer(3), args[0].value().powi(3)))
    }
}

// --- Unary, dimensionless only ---
pub struct Exp;

impl Operator for Exp {
    fn alias(&self) -> &str { "exp" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].exp() }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { args[0].map_dimensionless(f64::exp) }
}

/// Natural log. Non-positive inputs yield NaN or -inf.
pub struct Log;

impl Operator for Log {
    fn alias(&self) -> &str { "log" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].ln() }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { args[0].map_dimensionless(f64::ln) }
}

pub struct Sin;

impl Operator for Sin {
    fn alias(&self) -> &str { "sin" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].sin() }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { args[0].map_dimensionless(f64::sin) }
}

pub struct Cos;

impl Operator for Cos {
    fn alias(&self) -> &str { "cos" }
    fn arity(&self) -> usize { 1 }
    fn apply(&self, args: &[f64]) -> f64 { args[0].cos() }
    fn apply_units(&self, args: &[WildcardQuantity]) -> UnitResult { args[0].map_dimensionless(f64::cos) }
}

/// User supplied numeric function with no unit rule.
///
/// During dimensional analysis it only accepts free constants and
/// dimensionless operands.
#[derive(Clone)]
pub struct CustomOperator {
    alias: String,
    arity: usize,
    function: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl CustomOperator {
    pub fn new<F>(alias: impl Into<String>, arity: usize, function: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            alias: alias.into(),
            arity,
            function: Arc::new(function),
        }
    }
}

impl fmt::Debug for CustomOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperator")
            .field("alias", &self.alias)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Operator for CustomOperator {
    fn alias(&self) -> &str { &self.alias }
    fn arity(&self) -> usize { self.arity }
    fn apply(&self, args: &[f64]) -> f64 { (self.function)(args) }
}

/// Every builtin operator, unary first.
pub fn builtins() -> Vec<Arc<dyn Operator>> {
    vec![
        Arc::new(Neg),
        Arc::new(Abs),
        Arc::new(Sqrt),
        Arc::new(Square),
        Arc::new(Cube),
        Arc::new(Exp),
        Arc::new(Log),
        Arc::new(Sin),
        Arc::new(Cos),
        Arc::new(Add),
        Arc::new(Sub),
        Arc::new(Mul),
        Arc::new(Div),
        Arc::new(Pow),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::units::Dimensions;

    fn meters(v: f64) -> WildcardQuantity {
        WildcardQuantity::fixed(Quantity::new(v, Dimensions::base(0, 1)))
    }

    #[test]
    fn test_sqrt_halves_exponents() {
        let area = WildcardQuantity::fixed(Quantity::new(4.0, Dimensions::base(0, 2)));
        let side = Sqrt.apply_units(&[area]).unwrap();
        assert_eq!(side.value(), 2.0);
        assert_eq!(side.dimensions(), Dimensions::base(0, 1));
    }

    #[test]
    fn test_exp_rejects_length() {
        assert!(matches!(Exp.apply_units(&[meters(1.0)]), Err(DispatchError::Dimension(_))));
    }

    #[test]
    fn test_custom_operator_has_no_unit_rule() {
        let op = CustomOperator::new("half", 1, |args| args[0] / 2.0);
        assert_eq!(op.apply(&[3.0]), 1.5);
        assert_eq!(op.apply_units(&[meters(1.0)]), Err(DispatchError::NoMethod));
    }

    #[test]
    fn test_infix_rendering() {
        assert_eq!(Add.render(&["x1".into(), "2.0".into()]), "(x1 + 2.0)");
        assert_eq!(Sin.render(&["x1".into()]), "sin(x1)");
    }
}
