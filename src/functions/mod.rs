pub mod primitives;
pub mod registry;
pub mod traits;

pub use primitives::CustomOperator;
pub use registry::{OperatorRegistry, OperatorSet};
pub use traits::{DispatchError, Operator};
