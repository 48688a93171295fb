use crate::engines::evaluation::dimensional::{CapabilityTable, WarnOnce, UNIT_FALLBACK_WARNING};
use crate::error::{Result, SearchError};
use crate::functions::primitives;
use crate::functions::traits::Operator;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Operators known by alias. Builtins are registered on construction.
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            operators: HashMap::new(),
        };
        for op in primitives::builtins() {
            registry.operators.insert(op.alias().to_string(), op);
        }
        registry
    }

    /// Add or replace an operator.
    pub fn register(&mut self, op: Arc<dyn Operator>) {
        self.operators.insert(op.alias().to_string(), op);
    }

    pub fn get(&self, alias: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(alias).cloned()
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.operators.keys().cloned().collect();
        aliases.sort();
        aliases
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The operators a search may place in trees. Tree nodes refer to
/// operators by their index in this set.
#[derive(Clone)]
pub struct OperatorSet {
    unary: Vec<Arc<dyn Operator>>,
    binary: Vec<Arc<dyn Operator>>,
    capabilities: CapabilityTable,
}

impl OperatorSet {
    pub fn new(unary: Vec<Arc<dyn Operator>>, binary: Vec<Arc<dyn Operator>>) -> Result<Self> {
        Self::with_latch(unary, binary, &UNIT_FALLBACK_WARNING)
    }

    /// Build with a specific warning latch for operators that lack unit rules.
    pub fn with_latch(
        unary: Vec<Arc<dyn Operator>>,
        binary: Vec<Arc<dyn Operator>>,
        latch: &WarnOnce,
    ) -> Result<Self> {
        if unary.is_empty() && binary.is_empty() {
            return Err(SearchError::Operator("At least one operator is required".to_string()));
        }
        Self::check_arity(&unary, 1)?;
        Self::check_arity(&binary, 2)?;

        let unary_refs: Vec<&dyn Operator> = unary.iter().map(|op| op.as_ref()).collect();
        let binary_refs: Vec<&dyn Operator> = binary.iter().map(|op| op.as_ref()).collect();
        let capabilities = CapabilityTable::build(&unary_refs, &binary_refs, latch)?;

        Ok(Self {
            unary,
            binary,
            capabilities,
        })
    }

    /// Resolve aliases against a registry.
    pub fn from_names(unary: &[String], binary: &[String], registry: &OperatorRegistry) -> Result<Self> {
        let resolve = |names: &[String]| -> Result<Vec<Arc<dyn Operator>>> {
            names
                .iter()
                .map(|name| {
                    registry.get(name).ok_or_else(|| {
                        SearchError::Operator(format!(
                            "Unknown operator '{}'. Available: {}",
                            name,
                            registry.aliases().join(", ")
                        ))
                    })
                })
                .collect()
        };
        Self::new(resolve(unary)?, resolve(binary)?)
    }

    fn check_arity(ops: &[Arc<dyn Operator>], arity: usize) -> Result<()> {
        let mut seen = Vec::new();
        for op in ops {
            if op.arity() != arity {
                return Err(SearchError::Operator(format!(
                    "Operator '{}' has arity {}, expected {}",
                    op.alias(),
                    op.arity(),
                    arity
                )));
            }
            if seen.contains(&op.alias()) {
                return Err(SearchError::Operator(format!("Operator '{}' listed twice", op.alias())));
            }
            seen.push(op.alias());
        }
        Ok(())
    }

    pub fn unary(&self, index: usize) -> &dyn Operator {
        self.unary[index].as_ref()
    }

    pub fn binary(&self, index: usize) -> &dyn Operator {
        self.binary[index].as_ref()
    }

    pub fn n_unary(&self) -> usize {
        self.unary.len()
    }

    pub fn n_binary(&self) -> usize {
        self.binary.len()
    }

    pub fn unary_names(&self) -> Vec<String> {
        self.unary.iter().map(|op| op.alias().to_string()).collect()
    }

    pub fn binary_names(&self) -> Vec<String> {
        self.binary.iter().map(|op| op.alias().to_string()).collect()
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }
}

impl fmt::Debug for OperatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorSet")
            .field("unary", &self.unary_names())
            .field("binary", &self.binary_names())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::evaluation::dimensional::Capability;
    use crate::functions::primitives::CustomOperator;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = OperatorRegistry::new();
        let ops = OperatorSet::from_names(&names(&["sin", "exp"]), &names(&["+", "*"]), &registry).unwrap();
        assert_eq!(ops.n_unary(), 2);
        assert_eq!(ops.binary_names(), names(&["+", "*"]));
        assert_eq!(ops.capabilities().unary(0), Capability::Units);
    }

    #[test]
    fn test_unknown_alias_is_error() {
        let registry = OperatorRegistry::new();
        let result = OperatorSet::from_names(&[], &names(&["%"]), &registry);
        assert!(matches!(result, Err(SearchError::Operator(_))));
    }

    #[test]
    fn test_arity_mismatch_is_error() {
        let registry = OperatorRegistry::new();
        let result = OperatorSet::from_names(&names(&["+"]), &[], &registry);
        assert!(matches!(result, Err(SearchError::Operator(_))));
    }

    #[test]
    fn test_custom_operator_probed_once_as_numeric() {
        let latch = WarnOnce::new();
        let custom: Arc<dyn Operator> = Arc::new(CustomOperator::new("half", 1, |a| a[0] / 2.0));
        let other: Arc<dyn Operator> = Arc::new(CustomOperator::new("twice", 1, |a| a[0] * 2.0));
        let ops = OperatorSet::with_latch(vec![custom, other], vec![Arc::new(primitives::Add)], &latch).unwrap();
        assert_eq!(ops.capabilities().unary(0), Capability::NumericOnly);
        assert_eq!(ops.capabilities().unary(1), Capability::NumericOnly);
        assert_eq!(ops.capabilities().binary(0), Capability::Units);
        assert!(latch.has_fired());
    }
}
