//! Dimensional consistency checking.
//!
//! A tree is folded bottom-up into a [`WildcardQuantity`]: the SI quantity at
//! that node, whether it is still a free constant (able to adopt whatever unit
//! its context demands), and whether a violation has been seen. Once a node
//! violates, every combinator passes the violation through unchanged.
//!
//! Operators are not required to know about units. Each operator's capability
//! is probed once when the [`OperatorSet`] is built and kept in a
//! [`CapabilityTable`]; operators without a unit rule are applied to stripped
//! magnitudes when their operands are free or dimensionless, and otherwise
//! produce a violation.

use crate::data::dataset::Dataset;
use crate::data::units::{Dimensions, Quantity};
use crate::engines::generation::ast::Node;
use crate::error::{Result, SearchError};
use crate::functions::registry::OperatorSet;
use crate::functions::traits::{DispatchError, Operator};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WildcardQuantity {
    pub quantity: Quantity,
    pub wildcard: bool,
    pub violates: bool,
}

impl WildcardQuantity {
    pub fn new(quantity: Quantity, wildcard: bool, violates: bool) -> Self {
        Self {
            quantity,
            wildcard,
            violates,
        }
    }

    /// A free numeric constant.
    pub fn constant(value: f64) -> Self {
        Self::new(Quantity::dimensionless(value), true, false)
    }

    /// A quantity with fixed units.
    pub fn fixed(quantity: Quantity) -> Self {
        Self::new(quantity, false, false)
    }

    pub fn violation() -> Self {
        Self::new(Quantity::dimensionless(1.0), false, true)
    }

    pub fn value(&self) -> f64 {
        self.quantity.value
    }

    pub fn dimensions(&self) -> Dimensions {
        self.quantity.dimensions
    }

    pub fn is_finite(&self) -> bool {
        self.quantity.value.is_finite()
    }

    /// Power rule: the exponent must be dimensionless or still free.
    pub fn powq(self, exponent: WildcardQuantity) -> Self {
        if self.violates {
            return self;
        }
        if exponent.violates {
            return exponent;
        }
        if !exponent.dimensions().is_dimensionless() && !exponent.wildcard {
            return Self::violation();
        }
        let p = exponent.value();
        let value = self.value().powf(p);
        match self.dimensions().powf(p) {
            Some(dimensions) => Self::new(Quantity::new(value, dimensions), self.wildcard, false),
            None if self.wildcard => Self::new(Quantity::dimensionless(value), true, false),
            None => Self::violation(),
        }
    }

    /// Apply a function defined only on pure numbers. Free operands lose
    /// their units; fixed operands must already be dimensionless.
    pub fn map_dimensionless<F: Fn(f64) -> f64>(self, f: F) -> std::result::Result<Self, DispatchError> {
        if self.violates {
            return Ok(self);
        }
        if !self.wildcard && !self.dimensions().is_dimensionless() {
            return Err(DispatchError::Dimension(format!(
                "expected a dimensionless argument, got {}",
                self.dimensions()
            )));
        }
        Ok(Self::new(Quantity::dimensionless(f(self.value())), self.wildcard, false))
    }

    fn additive(self, rhs: Self, sign: f64) -> Self {
        if self.violates {
            return self;
        }
        if rhs.violates {
            return rhs;
        }
        let value = self.value() + sign * rhs.value();
        if self.dimensions() == rhs.dimensions() {
            Self::new(Quantity::new(value, self.dimensions()), self.wildcard && rhs.wildcard, false)
        } else if self.wildcard && rhs.wildcard {
            Self::new(Quantity::dimensionless(value), true, false)
        } else if self.wildcard {
            Self::new(Quantity::new(value, rhs.dimensions()), false, false)
        } else if rhs.wildcard {
            Self::new(Quantity::new(value, self.dimensions()), false, false)
        } else {
            Self::violation()
        }
    }
}

impl Add for WildcardQuantity {
    type Output = WildcardQuantity;

    fn add(self, rhs: Self) -> Self {
        self.additive(rhs, 1.0)
    }
}

impl Sub for WildcardQuantity {
    type Output = WildcardQuantity;

    fn sub(self, rhs: Self) -> Self {
        self.additive(rhs, -1.0)
    }
}

impl Mul for WildcardQuantity {
    type Output = WildcardQuantity;

    fn mul(self, rhs: Self) -> Self {
        if self.violates {
            return self;
        }
        if rhs.violates {
            return rhs;
        }
        Self::new(
            Quantity::new(self.value() * rhs.value(), self.dimensions() * rhs.dimensions()),
            self.wildcard || rhs.wildcard,
            false,
        )
    }
}

impl Div for WildcardQuantity {
    type Output = WildcardQuantity;

    fn div(self, rhs: Self) -> Self {
        if self.violates {
            return self;
        }
        if rhs.violates {
            return rhs;
        }
        Self::new(
            Quantity::new(self.value() / rhs.value(), self.dimensions() / rhs.dimensions()),
            self.wildcard || rhs.wildcard,
            false,
        )
    }
}

impl Neg for WildcardQuantity {
    type Output = WildcardQuantity;

    fn neg(self) -> Self {
        Self::new(Quantity::new(-self.value(), self.dimensions()), self.wildcard, self.violates)
    }
}

/// A thread-safe latch that runs its action at most once.
pub struct WarnOnce {
    fired: Mutex<bool>,
}

impl WarnOnce {
    pub const fn new() -> Self {
        Self {
            fired: Mutex::new(false),
        }
    }

    /// Run `emit` if this latch has never fired. Returns whether it ran.
    pub fn call<F: FnOnce()>(&self, emit: F) -> bool {
        let mut fired = match self.fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *fired {
            return false;
        }
        *fired = true;
        emit();
        true
    }

    pub fn has_fired(&self) -> bool {
        match self.fired.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Default for WarnOnce {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide latch for the numeric fallback warning.
pub static UNIT_FALLBACK_WARNING: WarnOnce = WarnOnce::new();

/// How an operator is dispatched during unit checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Has a unit rule; called with wrapped quantities.
    Units,
    /// Only evaluates raw numbers.
    NumericOnly,
}

/// Determine an operator's capability by calling its unit rule once on
/// dimensionless probes. Only "no applicable method" counts as missing.
pub fn probe_capability(op: &dyn Operator, latch: &WarnOnce) -> Result<Capability> {
    let probes = vec![WildcardQuantity::fixed(Quantity::dimensionless(1.0)); op.arity()];
    match op.apply_units(&probes) {
        Ok(_) | Err(DispatchError::Dimension(_)) => Ok(Capability::Units),
        Err(DispatchError::NoMethod) => {
            latch.call(|| {
                log::warn!(
                    "Operator `{}` has no unit-aware rule; it will only be applied to free constants \
                     and dimensionless values during dimensional analysis. \
                     Further operators like this will not be reported.",
                    op.alias()
                )
            });
            Ok(Capability::NumericOnly)
        }
        Err(DispatchError::Failed(msg)) => Err(SearchError::Operator(format!(
            "Operator `{}` failed its capability probe: {}",
            op.alias(),
            msg
        ))),
    }
}

/// Capabilities for every operator in a set, indexed like the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    unary: Vec<Capability>,
    binary: Vec<Capability>,
}

impl CapabilityTable {
    pub fn build(unary: &[&dyn Operator], binary: &[&dyn Operator], latch: &WarnOnce) -> Result<Self> {
        Ok(Self {
            unary: unary.iter().map(|op| probe_capability(*op, latch)).collect::<Result<_>>()?,
            binary: binary.iter().map(|op| probe_capability(*op, latch)).collect::<Result<_>>()?,
        })
    }

    pub fn unary(&self, index: usize) -> Capability {
        self.unary.get(index).copied().unwrap_or(Capability::NumericOnly)
    }

    pub fn binary(&self, index: usize) -> Capability {
        self.binary.get(index).copied().unwrap_or(Capability::NumericOnly)
    }
}

fn dispatch(op: &dyn Operator, capability: Capability, args: &[WildcardQuantity]) -> Result<WildcardQuantity> {
    if capability == Capability::Units {
        match op.apply_units(args) {
            Ok(result) => return Ok(result),
            Err(DispatchError::Dimension(_)) => return Ok(WildcardQuantity::violation()),
            Err(DispatchError::NoMethod) => {}
            Err(DispatchError::Failed(msg)) => {
                return Err(SearchError::Operator(format!("Operator `{}` failed: {}", op.alias(), msg)))
            }
        }
    }

    let numeric = args
        .iter()
        .all(|a| a.wildcard || a.dimensions().is_dimensionless());
    if !numeric {
        return Ok(WildcardQuantity::violation());
    }
    let raw: Vec<f64> = args.iter().map(|a| a.value()).collect();
    Ok(WildcardQuantity::fixed(Quantity::dimensionless(op.apply(&raw))))
}

/// Fold a tree into a single wrapped quantity. `inputs` holds one wrapped
/// value per feature.
pub fn eval_units(node: &Node, inputs: &[WildcardQuantity], operators: &OperatorSet) -> Result<WildcardQuantity> {
    match node {
        Node::Constant(value) => Ok(WildcardQuantity::constant(*value)),
        Node::Feature(index) => inputs
            .get(*index)
            .copied()
            .ok_or_else(|| SearchError::Dataset(format!("Feature index {} out of range", index))),
        Node::Unary { op, child } => {
            let arg = eval_units(child, inputs, operators)?;
            if arg.violates || !arg.is_finite() {
                return Ok(WildcardQuantity::violation());
            }
            dispatch(operators.unary(*op), operators.capabilities().unary(*op), &[arg])
        }
        Node::Binary { op, left, right } => {
            let l = eval_units(left, inputs, operators)?;
            let r = eval_units(right, inputs, operators)?;
            if l.violates {
                return Ok(l);
            }
            if r.violates {
                return Ok(r);
            }
            dispatch(operators.binary(*op), operators.capabilities().binary(*op), &[l, r])
        }
    }
}

/// Wrapped inputs for the first sample of a dataset.
pub fn sample_inputs(dataset: &Dataset) -> Vec<WildcardQuantity> {
    dataset
        .row(0)
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let unit = dataset
                .feature_units()
                .and_then(|units| units.get(i).copied())
                .unwrap_or_default();
            WildcardQuantity::fixed(unit.quantity(*x))
        })
        .collect()
}

/// Whether `tree` is physically inconsistent with the dataset's declared
/// units. Datasets without units never violate.
pub fn violates_dimensional_constraints(tree: &Node, dataset: &Dataset, operators: &OperatorSet) -> Result<bool> {
    if !dataset.has_units() {
        return Ok(false);
    }
    let result = eval_units(tree, &sample_inputs(dataset), operators)?;
    if result.violates {
        return Ok(true);
    }
    match dataset.target_units() {
        Some(target) if !result.wildcard => Ok(result.dimensions() != target.dimensions),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meters(v: f64) -> WildcardQuantity {
        WildcardQuantity::fixed(Quantity::new(v, Dimensions::base(0, 1)))
    }

    fn seconds(v: f64) -> WildcardQuantity {
        WildcardQuantity::fixed(Quantity::new(v, Dimensions::base(2, 1)))
    }

    #[test]
    fn test_free_constant_adopts_other_side() {
        let sum = WildcardQuantity::constant(2.0) + meters(3.0);
        assert!(!sum.violates);
        assert!(!sum.wildcard);
        assert_eq!(sum.dimensions(), Dimensions::base(0, 1));
        assert_eq!(sum.value(), 5.0);
    }

    #[test]
    fn test_mismatched_fixed_units_violate() {
        assert!((meters(1.0) + seconds(1.0)).violates);
        assert!((meters(1.0) - seconds(1.0)).violates);
    }

    #[test]
    fn test_two_free_constants_stay_free() {
        let a = WildcardQuantity::constant(1.0) * meters(1.0);
        let b = WildcardQuantity::constant(2.0) * seconds(1.0);
        let sum = a + b;
        assert!(!sum.violates);
        assert!(sum.wildcard);
        assert!(sum.dimensions().is_dimensionless());
    }

    #[test]
    fn test_matching_sum_keeps_free_only_if_both_free() {
        let free = WildcardQuantity::constant(1.0);
        assert!((free + free).wildcard);
        assert!(!(meters(1.0) + meters(2.0)).wildcard);
    }

    #[test]
    fn test_violation_propagates_through_everything() {
        let bad = WildcardQuantity::violation();
        assert!((bad * meters(1.0)).violates);
        assert!((meters(1.0) / bad).violates);
        assert!((bad + WildcardQuantity::constant(1.0)).violates);
        assert!(bad.powq(WildcardQuantity::constant(2.0)).violates);
        assert!((-bad).violates);
    }

    #[test]
    fn test_power_rules() {
        let squared = meters(3.0).powq(WildcardQuantity::constant(2.0));
        assert!(!squared.violates);
        assert_eq!(squared.dimensions(), Dimensions::base(0, 2));
        assert_eq!(squared.value(), 9.0);

        assert!(meters(3.0).powq(seconds(2.0)).violates);

        let free_exponent = WildcardQuantity::constant(2.0) * seconds(1.0);
        assert!(!meters(3.0).powq(free_exponent).violates);
    }

    #[test]
    fn test_warn_once_fires_once() {
        let latch = WarnOnce::new();
        let mut count = 0;
        assert!(latch.call(|| count += 1));
        assert!(!latch.call(|| count += 1));
        assert_eq!(count, 1);
        assert!(latch.has_fired());
    }

    #[test]
    fn test_map_dimensionless_rejects_fixed_units() {
        assert!(meters(1.0).map_dimensionless(f64::exp).is_err());
        let free = WildcardQuantity::constant(0.0).map_dimensionless(f64::exp).unwrap();
        assert_eq!(free.value(), 1.0);
        assert!(free.wildcard);
    }
}
