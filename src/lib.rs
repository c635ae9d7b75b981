//! # cvxmodel
//!
//! A modeling layer for convex optimization problems.
//!
//! cvxmodel lets you state a problem algebraically, with variables, affine
//! and quadratic expressions, conic constraints and an objective, then
//! exports it to a solver and maps the primal and dual solution back onto
//! the variables and constraints.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cvxmodel::prelude::*;
//!
//! let mut p = Problem::new();
//! let x = p.add_variable(VariableBuilder::vector("x", 5).lower(0.0))?;
//! p.add_constraint(x.sum().leq(10.0)?)?;
//! p.maximize(x.sum())?;
//!
//! let solution = p.solve()?;
//! println!("{}: {}", solution.status, solution.value.unwrap());
//! ```
//!
//! ## Constraints
//!
//! - Affine equalities and inequalities
//! - Second-order cones `‖x‖ ≤ t` and rotated cones `‖x‖² ≤ u·v`
//! - Exponential cones, linear matrix inequalities
//! - Convex quadratic and log-sum-exp (geometric programming) constraints
//! - Meta constraints that expand into auxiliary variables and cones:
//!   absolute value, geometric mean, p-norms, root-determinant,
//!   log-sum-exp, Kullback-Leibler divergence and network flows
//!
//! ## Architecture
//!
//! - **Arena storage**: a `Problem` owns its variables and constraints and
//!   hands out integer handles
//! - **Reformulations**: quadratics cast as cones, complex problems cast
//!   as real ones, and Lagrangian dualization
//! - **Canonical form** `h - G x ∈ K`, split by cone family
//! - **Solver dispatch** through a registry of back ends rated by support
//!   level; the Clarabel adapter ships with the crate

pub mod canon;
pub mod constraints;
pub mod error;
pub mod expr;
pub mod problem;
pub mod solver;
pub mod sparse;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use cvxmodel::prelude::*;
/// ```
pub mod prelude {
    // Expressions
    pub use crate::expr::{
        lse, AffExpr, Bound, IntoAffine, LseExpr, QuadExpr, Shape, VarId, VarKind, Variable,
        VariableBuilder,
    };

    // Constraints
    pub use crate::constraints::{
        abs, norm, Constraint, ConstraintExt, ConstraintHandle, DualValue, FlowGraph, FlowSpec,
        MetaId, Relation,
    };

    // Problem
    pub use crate::problem::{ConstraintIndex, Objective, ObjectiveExpr, Problem, Sense};

    // Solver
    pub use crate::solver::{Options, Solution, SolveStatus, SolverRegistry};

    // Errors
    pub use crate::error::{CvxError, Result};
}

// Re-export main types at crate root
pub use error::{CvxError, Result};
pub use problem::{Problem, Sense};
pub use solver::{Options, Solution, SolveStatus};
