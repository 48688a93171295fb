pub mod dimensional;
pub mod expression;
pub mod loss;

pub use dimensional::{
    violates_dimensional_constraints, Capability, CapabilityTable, WarnOnce, WildcardQuantity,
};
pub use expression::{eval_loss, eval_tree, score_tree};
pub use loss::LossKind;
