//! Expression types and creation utilities.
//!
//! This module provides the algebraic building blocks of a problem:
//! - `Shape` - Two-dimensional shape of an expression
//! - `Variable`, `VariableBuilder`, `VarId` - Decision variables and their storage
//! - `AffExpr` - Affine (possibly complex) matrix expressions
//! - `QuadExpr` - Scalar quadratic expressions
//! - `LseExpr` - Log-sum-exp expressions

pub mod affine;
pub mod logsumexp;
pub mod quadratic;
pub mod shape;
pub mod variable;

// Re-export main types
pub use affine::{AffExpr, IntoAffine, LinearPart, ValueSource};
pub use logsumexp::{lse, LseExpr};
pub use quadratic::QuadExpr;
pub use shape::Shape;
pub use variable::{
    pack, storage_factor, svec, svec_inverse, unpack, Bound, VarId, VarKind, Variable,
    VariableBuilder,
};
