//! Constraints of optimization problems.
//!
//! This module provides:
//! - Leaf constraints (affine, conic, quadratic, log-sum-exp) in `constraint`
//! - Meta constraints that expand into leaves and auxiliary variables in `meta`
//! - The expansions themselves in `builders`, and network flows in `flow`

mod builders;
pub mod constraint;
pub mod flow;
pub mod meta;

pub use builders::rational_approximation;
pub use constraint::{
    abs, exp_cone_slack, norm, Constraint, ConstraintExt, ConstraintId, ConstraintKind, DualValue,
    Leaf, LeafKind, Norm, Relation,
};
pub use flow::{FlowGraph, FlowSpec, Terminals};
pub use meta::{
    AuxVar, ConstraintHandle, Expansion, MetaConstraint, MetaId, MetaKind, VarIdAllocator,
};
