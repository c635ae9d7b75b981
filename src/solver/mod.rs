//! Solver interface for cvxmodel.
//!
//! This module provides:
//! - The [`Solver`] descriptor and [`SolverInstance`] contracts every back end implements
//! - Solver selection through a [`SolverRegistry`]
//! - Typed, validated solver [`Options`]
//! - Matrix stuffing and the Clarabel adapter

pub mod clarabel;
pub mod options;
pub mod registry;
pub mod stuffing;

use std::collections::HashMap;
use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::constraints::{ConstraintKind, DualValue};
use crate::error::{CvxError, Result};
use crate::expr::VarId;
use crate::problem::{ObjectiveExpr, Problem};

pub use self::clarabel::ClarabelSolver;
pub use options::{LpMethod, OptionKey, Options};
pub use registry::{InstanceCache, InstanceState, SolverRegistry, PREFERENCE_ORDER};
pub use stuffing::{stuff_problem, ConeDims, StuffedProblem};

/// How well a solver handles a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SupportLevel {
    None,
    Limited,
    Experimental,
    /// Supported after a reformulation (e.g. quadratics cast to cones).
    Secondary,
    Native,
}

impl SupportLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportLevel::None => "none",
            SupportLevel::Limited => "limited",
            SupportLevel::Experimental => "experimental",
            SupportLevel::Secondary => "secondary",
            SupportLevel::Native => "native",
        }
    }
}

/// Objective expression families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    Affine,
    Quadratic,
    LogSumExp,
}

/// Solution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolveStatus {
    /// Optimal solution found.
    Optimal,
    /// Solved to reduced accuracy.
    Suboptimal,
    /// Problem is infeasible.
    PrimalInfeasible,
    /// Problem is unbounded.
    DualInfeasible,
    /// Maximum iterations reached.
    IterationLimit,
    /// Time limit reached.
    TimeLimit,
    /// Numerical difficulties.
    NumericalError,
    /// Unknown status.
    Unknown,
}

impl SolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Suboptimal => "suboptimal",
            SolveStatus::PrimalInfeasible => "primal infeasible",
            SolveStatus::DualInfeasible => "dual infeasible",
            SolveStatus::IterationLimit => "iteration limit",
            SolveStatus::TimeLimit => "time limit",
            SolveStatus::NumericalError => "numerical error",
            SolveStatus::Unknown => "unknown",
        }
    }

    /// Whether primal values are meaningful.
    pub fn is_solved(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Suboptimal)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Objective value reported by a solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectiveValue {
    Value(f64),
    Unbounded,
    Infeasible,
    Unknown,
}

impl ObjectiveValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            ObjectiveValue::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Solver-side information about a solve.
#[derive(Debug, Clone)]
pub struct SolveMeta {
    pub status: SolveStatus,
    pub solver: String,
    /// Solve time in seconds.
    pub solve_time: f64,
    pub iterations: u32,
}

/// Results as returned by a solver instance, before they are written back.
#[derive(Debug, Clone)]
pub struct RawSolution {
    /// Stored-entry values per variable; `None` where the solver has none.
    pub primals: HashMap<VarId, Option<DVector<f64>>>,
    /// Duals by constraint position.
    pub duals: Vec<Option<DualValue>>,
    pub objective: ObjectiveValue,
    pub meta: SolveMeta,
}

/// A solver back end.
pub trait Solver {
    /// Short lowercase name, also used for preference ordering.
    fn name(&self) -> &'static str;

    /// `Ok` if the back end can be used in this build.
    fn test_availability(&self) -> Result<()>;

    fn supports_integer(&self) -> bool;

    fn supported_objectives(&self) -> &[ExpressionKind];

    fn supported_constraints(&self) -> &[ConstraintKind];

    /// Whether SOC and quadratic constraints may appear together.
    fn allows_mixing_quad_and_soc(&self) -> bool {
        false
    }

    /// Support level for a problem. Quadratics the solver lacks are cast to
    /// cones when it handles SOC, which makes the level secondary.
    fn support_level(&self, problem: &Problem) -> SupportLevel {
        if !problem.is_continuous() && !self.supports_integer() {
            return SupportLevel::None;
        }
        let objectives = self.supported_objectives();
        let constraints = self.supported_constraints();
        let cones = constraints.contains(&ConstraintKind::Soc)
            || constraints.contains(&ConstraintKind::Rsoc);
        let mut level = SupportLevel::Native;

        let objective = match &problem.objective().expr {
            None | Some(ObjectiveExpr::Affine(_)) => ExpressionKind::Affine,
            Some(ObjectiveExpr::Quadratic(_)) => ExpressionKind::Quadratic,
            Some(ObjectiveExpr::LogSumExp(_)) => ExpressionKind::LogSumExp,
        };
        if !objectives.contains(&objective) {
            if objective == ExpressionKind::Quadratic && cones {
                level = SupportLevel::Secondary;
            } else {
                return SupportLevel::None;
            }
        }

        for kind in problem.constraint_kinds() {
            if constraints.contains(&kind) {
                continue;
            }
            if kind == ConstraintKind::Quad && cones {
                level = level.min(SupportLevel::Secondary);
            } else {
                return SupportLevel::None;
            }
        }

        if problem.has_quad_constraints()
            && problem.has_cone_constraints()
            && !self.allows_mixing_quad_and_soc()
            && cones
        {
            level = level.min(SupportLevel::Secondary);
        }
        level
    }

    /// Options this solver understands.
    fn recognized_options(&self) -> &[OptionKey];

    fn create_instance(&self) -> Box<dyn SolverInstance>;
}

/// A solver holding an imported problem.
pub trait SolverInstance {
    /// Forget the imported problem.
    fn reset_problem(&mut self);

    fn import_problem(&mut self, problem: &Problem) -> Result<()>;

    /// Bring the imported problem up to date; a [`CvxError::ProblemUpdate`]
    /// asks the caller to reset and import again.
    fn update_problem(&mut self, problem: &Problem) -> Result<()>;

    fn solve(&mut self, problem: &Problem) -> Result<RawSolution>;
}

/// Solution of a problem.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Solution status.
    pub status: SolveStatus,
    /// Objective value (if solved).
    pub value: Option<f64>,
    /// Variable values by name (if solved).
    pub primal: HashMap<String, DMatrix<f64>>,
    /// Duals by constraint position.
    pub duals: Vec<Option<DualValue>>,
    /// Name of the solver used.
    pub solver: String,
    /// Solve time in seconds.
    pub solve_time: f64,
    /// Number of iterations.
    pub iterations: u32,
}

impl Solution {
    /// Get the value of a variable.
    pub fn get_value(&self, name: &str) -> Option<&DMatrix<f64>> {
        self.primal.get(name)
    }

    /// Get the scalar value of a variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not in the solution or is not scalar.
    pub fn value(&self, name: &str) -> Result<f64> {
        let m = self
            .get_value(name)
            .ok_or_else(|| CvxError::UnknownVariable(name.to_string()))?;
        if m.len() != 1 {
            return Err(CvxError::mismatch(
                "a scalar",
                format!("({}, {})", m.nrows(), m.ncols()),
            ));
        }
        Ok(m[(0, 0)])
    }

    /// Dual of the constraint at position `idx`.
    pub fn constraint_dual(&self, idx: usize) -> Option<&DualValue> {
        self.duals.get(idx).and_then(|d| d.as_ref())
    }

    /// Check if the solution has dual values available.
    pub fn has_duals(&self) -> bool {
        self.duals.iter().any(|d| d.is_some())
    }
}

impl std::ops::Index<&str> for Solution {
    type Output = DMatrix<f64>;

    /// Get the value of a variable by name.
    ///
    /// # Panics
    ///
    /// Panics if the variable is not in the solution.
    fn index(&self, name: &str) -> &DMatrix<f64> {
        match self.get_value(name) {
            Some(m) => m,
            None => panic!("Variable {} not in solution", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_level_order() {
        assert!(SupportLevel::Native > SupportLevel::Secondary);
        assert!(SupportLevel::Secondary > SupportLevel::Experimental);
        assert!(SupportLevel::Limited > SupportLevel::None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SolveStatus::Optimal.as_str(), "optimal");
        assert_eq!(SolveStatus::PrimalInfeasible.to_string(), "primal infeasible");
        assert!(SolveStatus::Suboptimal.is_solved());
        assert!(!SolveStatus::TimeLimit.is_solved());
    }

    #[test]
    fn test_solution_access() {
        let mut primal = HashMap::new();
        primal.insert("x".to_string(), DMatrix::from_element(1, 1, 2.5));
        primal.insert("y".to_string(), DMatrix::from_element(2, 1, 1.0));
        let sol = Solution {
            status: SolveStatus::Optimal,
            value: Some(1.0),
            primal,
            duals: vec![None, Some(DualValue::Real(DMatrix::from_element(1, 1, 3.0)))],
            solver: "clarabel".to_string(),
            solve_time: 0.0,
            iterations: 3,
        };
        assert!((sol.value("x").unwrap() - 2.5).abs() < 1e-12);
        assert!(sol.value("y").is_err());
        assert_eq!(sol["y"].nrows(), 2);
        assert!(sol.has_duals());
        assert_eq!(sol.constraint_dual(1).and_then(|d| d.scalar()), Some(3.0));
    }
}
