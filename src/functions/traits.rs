use crate::engines::evaluation::dimensional::WildcardQuantity;
use thiserror::Error;

/// Outcome of asking an operator to evaluate a value kind it may not support.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The operator has no implementation for the given value kind.
    #[error("no applicable method")]
    NoMethod,
    /// The operator is implemented but rejects the operand dimensions.
    #[error("dimension error: {0}")]
    Dimension(String),
    /// Any other failure. Never swallowed by callers.
    #[error("{0}")]
    Failed(String),
}

/// An operator usable in expression trees.
///
/// `apply` is the hot path used during search. `apply_units` is the
/// unit-aware rule used by the dimensional checker; operators that do not
/// override it are evaluated numerically on free constants only.
pub trait Operator: Send + Sync {
    /// Name used in configuration and rendering
    fn alias(&self) -> &str;

    fn arity(&self) -> usize;

    fn apply(&self, args: &[f64]) -> f64;

    fn apply_units(&self, _args: &[WildcardQuantity]) -> Result<WildcardQuantity, DispatchError> {
        Err(DispatchError::NoMethod)
    }

    fn render(&self, args: &[String]) -> String {
        format!("{}({})", self.alias(), args.join(", "))
    }
}
