//! Physical dimensions and units.
//!
//! Dimensions carry rational exponents over the seven SI base dimensions so
//! that operations like `sqrt` stay exact. A [`Unit`] pairs dimensions with a
//! scale relative to the SI base, and [`Quantity`] is a value expressed in SI.

use crate::error::{Result, SearchError};
use num_rational::Rational32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Div, Mul};

/// SI base symbols, in exponent order.
pub const BASE_SYMBOLS: [&str; 7] = ["m", "kg", "s", "A", "K", "cd", "mol"];

const MAX_EXPONENT_DENOMINATOR: i32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    exponents: [Rational32; 7],
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl Dimensions {
    pub fn dimensionless() -> Self {
        Self {
            exponents: [Rational32::from_integer(0); 7],
        }
    }

    /// Dimensions with a single integer exponent on one base dimension.
    pub fn base(index: usize, exponent: i32) -> Self {
        let mut dims = Self::dimensionless();
        if index < dims.exponents.len() {
            dims.exponents[index] = Rational32::from_integer(exponent);
        }
        dims
    }

    pub fn from_exponents(exponents: [i32; 7]) -> Self {
        let mut dims = Self::dimensionless();
        for (slot, e) in dims.exponents.iter_mut().zip(exponents) {
            *slot = Rational32::from_integer(e);
        }
        dims
    }

    pub fn exponents(&self) -> &[Rational32; 7] {
        &self.exponents
    }

    pub fn is_dimensionless(&self) -> bool {
        self.exponents.iter().all(|e| *e.numer() == 0)
    }

    /// Raise to a rational power.
    pub fn powr(&self, power: Rational32) -> Self {
        let mut out = *self;
        for e in out.exponents.iter_mut() {
            *e *= power;
        }
        out
    }

    /// Raise to a floating point power, if it is close enough to a small
    /// rational. Dimensionless inputs accept any power.
    pub fn powf(&self, power: f64) -> Option<Self> {
        if self.is_dimensionless() {
            return Some(*self);
        }
        rational_from_f64(power).map(|p| self.powr(p))
    }

    pub fn inv(&self) -> Self {
        self.powr(Rational32::from_integer(-1))
    }
}

impl Mul for Dimensions {
    type Output = Dimensions;

    fn mul(self, rhs: Dimensions) -> Dimensions {
        let mut out = self;
        for (e, r) in out.exponents.iter_mut().zip(rhs.exponents) {
            *e += r;
        }
        out
    }
}

impl Div for Dimensions {
    type Output = Dimensions;

    fn div(self, rhs: Dimensions) -> Dimensions {
        self * rhs.inv()
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "1");
        }
        let mut parts = Vec::new();
        for (symbol, e) in BASE_SYMBOLS.iter().zip(self.exponents.iter()) {
            if *e.numer() == 0 {
                continue;
            }
            if e.is_integer() {
                if *e.numer() == 1 {
                    parts.push(symbol.to_string());
                } else {
                    parts.push(format!("{}^{}", symbol, e.numer()));
                }
            } else {
                parts.push(format!("{}^({}/{})", symbol, e.numer(), e.denom()));
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Closest rational with a small denominator, or None if `value` is not
/// representable within tolerance.
pub fn rational_from_f64(value: f64) -> Option<Rational32> {
    if !value.is_finite() {
        return None;
    }
    for denom in 1..=MAX_EXPONENT_DENOMINATOR {
        let numer = (value * denom as f64).round();
        if numer.abs() > i32::MAX as f64 {
            return None;
        }
        if (numer / denom as f64 - value).abs() < 1e-9 {
            return Some(Rational32::new(numer as i32, denom));
        }
    }
    None
}

/// A value in SI base units together with its dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub dimensions: Dimensions,
}

impl Quantity {
    pub fn new(value: f64, dimensions: Dimensions) -> Self {
        Self { value, dimensions }
    }

    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, Dimensions::dimensionless())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dimensions.is_dimensionless() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.dimensions)
        }
    }
}

/// A declared unit: scale to SI plus dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub scale: f64,
    pub dimensions: Dimensions,
}

impl Default for Unit {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl Unit {
    pub fn new(scale: f64, dimensions: Dimensions) -> Self {
        Self { scale, dimensions }
    }

    pub fn dimensionless() -> Self {
        Self::new(1.0, Dimensions::dimensionless())
    }

    /// Express `value` (given in this unit) as an SI quantity.
    pub fn quantity(&self, value: f64) -> Quantity {
        Quantity::new(value * self.scale, self.dimensions)
    }

    fn powr(&self, power: Rational32) -> Self {
        let p = *power.numer() as f64 / *power.denom() as f64;
        Self::new(self.scale.powf(p), self.dimensions.powr(power))
    }

    /// Parse expressions such as `m`, `kg*m/s^2`, `m s^-1`, `m^(1/2)` or `1`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() || text == "1" {
            return Ok(Self::dimensionless());
        }

        let mut unit = Self::dimensionless();
        let mut divide_next = false;
        let mut term = String::new();
        let mut depth = 0usize;

        let flush = |term: &mut String, divide: bool, unit: &mut Unit| -> Result<()> {
            if term.is_empty() {
                return Ok(());
            }
            let parsed = parse_term(term)?;
            let factor = if divide {
                parsed.powr(Rational32::from_integer(-1))
            } else {
                parsed
            };
            unit.scale *= factor.scale;
            unit.dimensions = unit.dimensions * factor.dimensions;
            term.clear();
            Ok(())
        };

        for c in text.chars() {
            match c {
                '(' => {
                    depth += 1;
                    term.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    term.push(c);
                }
                '/' if depth == 0 => {
                    flush(&mut term, divide_next, &mut unit)?;
                    divide_next = true;
                }
                '*' | ' ' if depth == 0 => {
                    let had_term = !term.is_empty();
                    flush(&mut term, divide_next, &mut unit)?;
                    if had_term {
                        divide_next = false;
                    }
                }
                _ => term.push(c),
            }
        }
        flush(&mut term, divide_next, &mut unit)?;
        Ok(unit)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 1.0 {
            write!(f, "{}", self.dimensions)
        } else {
            write!(f, "{} {}", self.scale, self.dimensions)
        }
    }
}

fn parse_term(term: &str) -> Result<Unit> {
    let (symbol, exponent) = match term.split_once('^') {
        Some((symbol, exponent)) => (symbol, Some(exponent)),
        None => (term, None),
    };
    let base = lookup_symbol(symbol)
        .ok_or_else(|| SearchError::Unit(format!("Unknown unit symbol: {}", symbol)))?;
    match exponent {
        None => Ok(base),
        Some(e) => Ok(base.powr(parse_exponent(e)?)),
    }
}

fn parse_exponent(text: &str) -> Result<Rational32> {
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
    let invalid = || SearchError::Unit(format!("Invalid exponent: {}", text));
    match inner.split_once('/') {
        Some((n, d)) => {
            let n: i32 = n.trim().parse().map_err(|_| invalid())?;
            let d: i32 = d.trim().parse().map_err(|_| invalid())?;
            if d == 0 {
                return Err(invalid());
            }
            Ok(Rational32::new(n, d))
        }
        None => inner
            .parse::<i32>()
            .map(Rational32::from_integer)
            .map_err(|_| invalid()),
    }
}

fn lookup_symbol(symbol: &str) -> Option<Unit> {
    let d = Dimensions::from_exponents;
    let unit = match symbol {
        "1" => Unit::dimensionless(),
        "m" => Unit::new(1.0, d([1, 0, 0, 0, 0, 0, 0])),
        "km" => Unit::new(1e3, d([1, 0, 0, 0, 0, 0, 0])),
        "cm" => Unit::new(1e-2, d([1, 0, 0, 0, 0, 0, 0])),
        "mm" => Unit::new(1e-3, d([1, 0, 0, 0, 0, 0, 0])),
        "kg" => Unit::new(1.0, d([0, 1, 0, 0, 0, 0, 0])),
        "g" => Unit::new(1e-3, d([0, 1, 0, 0, 0, 0, 0])),
        "s" => Unit::new(1.0, d([0, 0, 1, 0, 0, 0, 0])),
        "ms" => Unit::new(1e-3, d([0, 0, 1, 0, 0, 0, 0])),
        "min" => Unit::new(60.0, d([0, 0, 1, 0, 0, 0, 0])),
        "h" => Unit::new(3600.0, d([0, 0, 1, 0, 0, 0, 0])),
        "A" => Unit::new(1.0, d([0, 0, 0, 1, 0, 0, 0])),
        "K" => Unit::new(1.0, d([0, 0, 0, 0, 1, 0, 0])),
        "cd" => Unit::new(1.0, d([0, 0, 0, 0, 0, 1, 0])),
        "mol" => Unit::new(1.0, d([0, 0, 0, 0, 0, 0, 1])),
        "Hz" => Unit::new(1.0, d([0, 0, -1, 0, 0, 0, 0])),
        "N" => Unit::new(1.0, d([1, 1, -2, 0, 0, 0, 0])),
        "J" => Unit::new(1.0, d([2, 1, -2, 0, 0, 0, 0])),
        "W" => Unit::new(1.0, d([2, 1, -3, 0, 0, 0, 0])),
        "Pa" => Unit::new(1.0, d([-1, 1, -2, 0, 0, 0, 0])),
        "C" => Unit::new(1.0, d([0, 0, 1, 1, 0, 0, 0])),
        "V" => Unit::new(1.0, d([2, 1, -3, -1, 0, 0, 0])),
        "Ohm" => Unit::new(1.0, d([2, 1, -3, -2, 0, 0, 0])),
        _ => return None,
    };
    Some(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_newton_expression() {
        let unit = Unit::parse("kg*m/s^2").unwrap();
        assert_eq!(unit.dimensions, lookup_symbol("N").unwrap().dimensions);
        assert_eq!(unit.scale, 1.0);
    }

    #[test]
    fn test_parse_space_separated_and_prefix() {
        let unit = Unit::parse("km h^-1").unwrap();
        assert_eq!(unit.dimensions, Dimensions::from_exponents([1, 0, -1, 0, 0, 0, 0]));
        assert!((unit.scale - 1000.0 / 3600.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_rational_exponent() {
        let unit = Unit::parse("m^(1/2)").unwrap();
        assert_eq!(unit.dimensions.powr(Rational32::from_integer(2)), Dimensions::base(0, 1));
        assert_eq!(unit.dimensions.to_string(), "m^(1/2)");
    }

    #[test]
    fn test_unknown_symbol_is_error() {
        assert!(matches!(Unit::parse("furlong"), Err(SearchError::Unit(_))));
    }

    #[test]
    fn test_powf_requires_small_rational() {
        let m = Dimensions::base(0, 1);
        assert_eq!(m.powf(2.0), Some(Dimensions::base(0, 2)));
        assert_eq!(m.powf(0.5), Some(m.powr(Rational32::new(1, 2))));
        assert_eq!(m.powf(0.123456789), None);
        assert_eq!(Dimensions::dimensionless().powf(0.123456789), Some(Dimensions::dimensionless()));
    }
}
