//! Problem definition and bookkeeping.
//!
//! The `Problem` struct owns everything a problem consists of:
//! - Variables in an arena keyed by [`VarId`], with contiguous column ranges
//! - Leaf constraints in insertion order, and the meta constraints that
//!   generated some of them
//! - An objective, running counters per constraint family, and the grouping
//!   of constraints added together
//!
//! Build a problem incrementally:
//! ```ignore
//! let mut p = Problem::new();
//! let x = p.add_variable(VariableBuilder::vector("x", 2).lower(0.0))?;
//! p.add_constraint(x.sum().leq(10.0)?)?;
//! p.set_objective(Sense::Maximize, x.sum())?;
//! let solution = p.solve()?;
//! ```

mod constraints;
pub mod naming;
mod reformulate;
mod solve;
mod variables;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use nalgebra::DVector;

use crate::constraints::{ConstraintKind, Leaf, LeafKind, MetaConstraint, MetaId};
use crate::error::{CvxError, Result};
use crate::expr::{AffExpr, LseExpr, QuadExpr, Shape, ValueSource, VarId, VarKind, Variable};
use crate::solver::{InstanceCache, Options};

pub use naming::{detect_range, parameterized_string, IndexRange};

/// Direction of the objective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sense {
    /// Feasibility problem without an objective.
    Find,
    Minimize,
    Maximize,
}

impl Sense {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sense::Find => "find",
            Sense::Minimize => "minimize",
            Sense::Maximize => "maximize",
        }
    }
}

/// Expression of an objective.
#[derive(Debug, Clone)]
pub enum ObjectiveExpr {
    Affine(AffExpr),
    Quadratic(QuadExpr),
    LogSumExp(LseExpr),
}

impl ObjectiveExpr {
    pub fn string(&self) -> String {
        match self {
            ObjectiveExpr::Affine(a) => a.string().to_string(),
            ObjectiveExpr::Quadratic(q) => q.to_string(),
            ObjectiveExpr::LogSumExp(l) => l.to_string(),
        }
    }

    fn remap(&self, map: &HashMap<VarId, VarId>) -> ObjectiveExpr {
        match self {
            ObjectiveExpr::Affine(a) => ObjectiveExpr::Affine(a.remap(map)),
            ObjectiveExpr::Quadratic(q) => ObjectiveExpr::Quadratic(q.remap(map)),
            ObjectiveExpr::LogSumExp(l) => ObjectiveExpr::LogSumExp(l.remap(map)),
        }
    }
}

impl From<AffExpr> for ObjectiveExpr {
    fn from(a: AffExpr) -> Self {
        ObjectiveExpr::Affine(a)
    }
}

impl From<QuadExpr> for ObjectiveExpr {
    fn from(q: QuadExpr) -> Self {
        ObjectiveExpr::Quadratic(q)
    }
}

impl From<LseExpr> for ObjectiveExpr {
    fn from(l: LseExpr) -> Self {
        ObjectiveExpr::LogSumExp(l)
    }
}

/// Objective of a problem.
#[derive(Debug, Clone)]
pub struct Objective {
    pub sense: Sense,
    pub expr: Option<ObjectiveExpr>,
}

impl Default for Objective {
    fn default() -> Self {
        Objective {
            sense: Sense::Find,
            expr: None,
        }
    }
}

/// Running counts per constraint family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Scalar rows of affine constraints.
    pub affine: usize,
    /// SOC and RSOC constraints.
    pub cone: usize,
    pub cone_vars: usize,
    pub quad: usize,
    /// Nonzero quadratic coefficients, objective included.
    pub quad_nnz: usize,
    pub sdp: usize,
    pub sdp_vars: usize,
    pub lse: usize,
    /// Exponentials in log-sum-exp constraints and objective.
    pub lse_vars: usize,
    pub exp: usize,
    pub meta: usize,
}

/// `c += sign·v`. Removing more than was added is a bookkeeping bug.
fn shift(c: &mut usize, sign: isize, v: usize) {
    let next = *c as isize + sign * v as isize;
    debug_assert!(next >= 0, "counter went negative: {} {:+} x {}", c, sign, v);
    *c = next.max(0) as usize;
}

impl Counters {
    /// Add (`sign = 1`) or remove (`sign = -1`) a leaf's contribution.
    fn apply(&mut self, kind: &LeafKind, sign: isize) {
        let add = |c: &mut usize, v: usize| shift(c, sign, v);
        match kind {
            LeafKind::Affine { lhs, .. } => add(&mut self.affine, lhs.size()),
            LeafKind::Soc { .. } => {
                add(&mut self.cone, 1);
                add(&mut self.cone_vars, kind.size().size());
            }
            LeafKind::Rsoc { .. } => {
                add(&mut self.cone, 1);
                add(&mut self.cone_vars, kind.size().size());
            }
            LeafKind::ExpCone { .. } => add(&mut self.exp, 1),
            LeafKind::Lmi { lhs, .. } => {
                let n = lhs.shape().rows;
                add(&mut self.sdp, 1);
                add(&mut self.sdp_vars, n * (n + 1) / 2);
            }
            LeafKind::Quad { le0 } => {
                add(&mut self.quad, 1);
                add(&mut self.quad_nnz, le0.nnz());
            }
            LeafKind::Lse { le0 } => {
                add(&mut self.lse, 1);
                add(&mut self.lse_vars, le0.len());
            }
        }
    }

    fn apply_objective(&mut self, expr: &ObjectiveExpr, sign: isize) {
        let add = |c: &mut usize, v: usize| shift(c, sign, v);
        match expr {
            ObjectiveExpr::Affine(_) => {}
            ObjectiveExpr::Quadratic(q) => add(&mut self.quad_nnz, q.nnz()),
            ObjectiveExpr::LogSumExp(l) => add(&mut self.lse_vars, l.len()),
        }
    }
}

/// Position of a constraint in the numbering: a leaf position, or the
/// members of a group (constraints added together, or a meta constraint's
/// auxiliary constraints).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Numbering {
    Leaf(usize),
    Group(Vec<Numbering>),
}

impl Numbering {
    /// Leaf positions in order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<usize>) {
        match self {
            Numbering::Leaf(p) => out.push(*p),
            Numbering::Group(members) => members.iter().for_each(|m| m.collect(out)),
        }
    }

    /// Drop removed positions and shift the others down. Returns `None` if
    /// nothing is left.
    fn renumber(&self, removed: &[usize]) -> Option<Numbering> {
        match self {
            Numbering::Leaf(p) => {
                if removed.binary_search(p).is_ok() {
                    None
                } else {
                    let below = removed.partition_point(|r| r < p);
                    Some(Numbering::Leaf(p - below))
                }
            }
            Numbering::Group(members) => {
                let kept: Vec<Numbering> =
                    members.iter().filter_map(|m| m.renumber(removed)).collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Numbering::Group(kept))
                }
            }
        }
    }
}

/// Address of constraints for lookup and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintIndex {
    /// Position in the flat list of leaf constraints.
    Flat(usize),
    /// An entry of the top-level numbering, with all its members.
    Group(usize),
    /// Member of a top-level numbering entry.
    Member(usize, usize),
}

impl From<usize> for ConstraintIndex {
    fn from(i: usize) -> Self {
        ConstraintIndex::Flat(i)
    }
}

impl From<(usize,)> for ConstraintIndex {
    fn from(i: (usize,)) -> Self {
        ConstraintIndex::Group(i.0)
    }
}

impl From<(usize, usize)> for ConstraintIndex {
    fn from(i: (usize, usize)) -> Self {
        ConstraintIndex::Member(i.0, i.1)
    }
}

/// Constraints added in one call to `add_list_of_constraints`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintGroup {
    /// Position of the last leaf of the group.
    pub last: usize,
    /// Condensed display string.
    pub string: String,
    pub key: Option<String>,
}

/// Real and imaginary parts of a complex variable.
#[derive(Debug, Clone)]
pub(crate) struct ComplexVar {
    pub re: VarId,
    pub im: VarId,
    pub kind: VarKind,
    pub shape: Shape,
}

/// An optimization problem.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    variables: BTreeMap<VarId, Variable>,
    /// Insertion order, which is also column order.
    var_order: Vec<VarId>,
    var_names: HashMap<String, VarId>,
    complex_vars: BTreeMap<String, ComplexVar>,
    next_var_id: usize,
    number_of_vars: usize,
    constraints: Vec<Leaf>,
    next_constraint_id: usize,
    metas: BTreeMap<MetaId, MetaConstraint>,
    next_meta_id: usize,
    meta_ordinal: usize,
    objective: Objective,
    counters: Counters,
    /// First leaf position of a group → group.
    groups: BTreeMap<usize, ConstraintGroup>,
    numbering: Vec<Numbering>,
    complex: bool,
    options: Options,
    instances: InstanceCache,
}

impl Problem {
    /// Create an empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty problem with the given options.
    pub fn with_options(options: Options) -> Self {
        Problem {
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Options for modification. Solver instances are kept.
    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Scalar columns used by the problem's variables.
    pub fn number_of_vars(&self) -> usize {
        self.number_of_vars
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Counters recomputed from scratch over the constraints and objective.
    pub fn recount(&self) -> Counters {
        let mut c = Counters::default();
        for leaf in &self.constraints {
            c.apply(&leaf.kind, 1);
        }
        if let Some(expr) = &self.objective.expr {
            c.apply_objective(expr, 1);
        }
        c.meta = self.metas.len();
        c
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    /// Set the objective. Affine objectives must be scalar.
    pub fn set_objective(&mut self, sense: Sense, expr: impl Into<ObjectiveExpr>) -> Result<()> {
        let expr = expr.into();
        if let ObjectiveExpr::Affine(a) = &expr {
            if !a.is_scalar() {
                return Err(CvxError::mismatch("a scalar objective", a.shape()));
            }
        }
        if sense == Sense::Find {
            return self.set_find();
        }
        if let Some(old) = self.objective.expr.take() {
            self.counters.apply_objective(&old, -1);
        }
        self.counters.apply_objective(&expr, 1);
        if let ObjectiveExpr::Affine(a) = &expr {
            self.complex |= !a.is_real();
        }
        tracing::debug!(
            component = "problem",
            operation = "set_objective",
            status = "success",
            sense = sense.as_str(),
            "Set objective {}",
            expr.string()
        );
        self.objective = Objective {
            sense,
            expr: Some(expr),
        };
        Ok(())
    }

    pub fn minimize(&mut self, expr: impl Into<ObjectiveExpr>) -> Result<()> {
        self.set_objective(Sense::Minimize, expr)
    }

    pub fn maximize(&mut self, expr: impl Into<ObjectiveExpr>) -> Result<()> {
        self.set_objective(Sense::Maximize, expr)
    }

    /// Turn the problem into a feasibility problem.
    pub fn set_find(&mut self) -> Result<()> {
        if let Some(old) = self.objective.expr.take() {
            self.counters.apply_objective(&old, -1);
        }
        self.objective = Objective::default();
        Ok(())
    }

    /// Leaf constraints in order.
    pub fn constraints(&self) -> &[Leaf] {
        &self.constraints
    }

    pub fn count_cons(&self) -> usize {
        self.constraints.len()
    }

    pub fn numbering(&self) -> &[Numbering] {
        &self.numbering
    }

    pub fn groups(&self) -> &BTreeMap<usize, ConstraintGroup> {
        &self.groups
    }

    pub fn meta(&self, id: MetaId) -> Option<&MetaConstraint> {
        self.metas.get(&id)
    }

    pub fn metas(&self) -> impl Iterator<Item = &MetaConstraint> {
        self.metas.values()
    }

    /// Constraint families present among the leaves.
    pub fn constraint_kinds(&self) -> Vec<ConstraintKind> {
        let mut kinds: Vec<ConstraintKind> =
            self.constraints.iter().map(|c| c.kind.kind()).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn has_quad_constraints(&self) -> bool {
        self.counters.quad > 0
    }

    /// Whether SOC or RSOC constraints are present.
    pub fn has_cone_constraints(&self) -> bool {
        self.counters.cone > 0
    }

    pub fn has_quad_objective(&self) -> bool {
        matches!(self.objective.expr, Some(ObjectiveExpr::Quadratic(_)))
    }

    /// Whether the problem has complex data or variables.
    pub fn is_complex(&self) -> bool {
        self.complex || !self.complex_vars.is_empty()
    }

    /// Short description such as `LP`, `Mixed-Integer SOCP` or `Complex SDP`.
    pub fn problem_type(&self) -> String {
        let c = &self.counters;
        let quad_obj = self.has_quad_objective();
        let lse_obj = matches!(self.objective.expr, Some(ObjectiveExpr::LogSumExp(_)));
        let (lse, exp, cone, sdp, quad) = (
            c.lse > 0 || lse_obj,
            c.exp > 0,
            c.cone > 0,
            c.sdp > 0,
            c.quad > 0,
        );

        let base = if self.constraints.is_empty() && !quad_obj && !lse_obj {
            "Unconstrained Problem"
        } else if self.objective.sense == Sense::Find {
            "CSP"
        } else if lse && !(exp || cone || sdp || quad || quad_obj) {
            "GP"
        } else if lse || exp {
            "ECP"
        } else if sdp {
            if quad || quad_obj {
                "Conic Program"
            } else {
                "SDP"
            }
        } else if cone {
            if quad || quad_obj {
                "Conic Program"
            } else {
                "SOCP"
            }
        } else if quad {
            if quad_obj {
                "QCQP"
            } else {
                "QCP"
            }
        } else if quad_obj {
            "QP"
        } else {
            "LP"
        };

        let mut prefix = String::new();
        if self.is_complex() {
            prefix.push_str("Complex ");
        }
        let integral = self.variables().filter(|v| v.kind.is_integral()).count();
        if integral > 0 {
            if integral == self.var_order.len() {
                prefix.push_str("Integer ");
            } else {
                prefix.push_str("Mixed-Integer ");
            }
        }
        format!("{}{}", prefix, base)
    }
}

impl ValueSource for Problem {
    fn value_of(&self, id: VarId) -> Option<&DVector<f64>> {
        self.variables.get(&id).and_then(|v| v.value.as_ref())
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(21);
        writeln!(f, "{}", rule)?;
        writeln!(f, "optimization problem  ({}):", self.problem_type())?;
        writeln!(
            f,
            "{} variables, {} affine constraints",
            self.number_of_vars, self.counters.affine
        )?;
        if self.counters.cone > 0 {
            writeln!(f, "{} vars in {} SO cones", self.counters.cone_vars, self.counters.cone)?;
        }
        if self.counters.sdp > 0 {
            writeln!(f, "{} vars in {} SD cones", self.counters.sdp_vars, self.counters.sdp)?;
        }
        if self.counters.exp > 0 {
            writeln!(f, "{} exponential cones", self.counters.exp)?;
        }
        if self.counters.quad > 0 {
            writeln!(f, "{} nnz in {} quad constraints", self.counters.quad_nnz, self.counters.quad)?;
        }
        if self.counters.lse > 0 {
            writeln!(f, "{} vars in {} LSE constraints", self.counters.lse_vars, self.counters.lse)?;
        }
        writeln!(f)?;

        for line in naming::variable_summary(self) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;

        match &self.objective.expr {
            Some(expr) => writeln!(f, "\t{} {}", self.objective.sense.as_str(), expr.string())?,
            None => writeln!(f, "\tfind vars")?,
        }
        if !self.constraints.is_empty() {
            writeln!(f, "such that")?;
        }
        let mut pos = 0;
        while pos < self.constraints.len() {
            if let Some(g) = self.groups.get(&pos) {
                writeln!(f, "  {}", g.string)?;
                pos = g.last + 1;
                continue;
            }
            let leaf = &self.constraints[pos];
            let shown = match leaf.origin {
                Some(m) => {
                    let top = self.top_meta(m);
                    let leaves = self.meta_leaves(top);
                    let string = self.metas.get(&top).map(|m| m.string.clone());
                    match (leaves.last(), string) {
                        (Some(last), Some(s)) if *last >= pos => {
                            writeln!(f, "  {}", s)?;
                            pos = *last + 1;
                            true
                        }
                        _ => false,
                    }
                }
                None => false,
            };
            if !shown {
                match &leaf.name {
                    Some(n) => writeln!(f, "  ({}) {}", n, leaf.kind)?,
                    None => writeln!(f, "  {}", leaf.kind)?,
                }
                pos += 1;
            }
        }
        write!(f, "{}", rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Constraint, ConstraintExt};
    use crate::expr::VariableBuilder;

    #[test]
    fn test_numbering_renumber() {
        let n = Numbering::Group(vec![
            Numbering::Leaf(0),
            Numbering::Leaf(1),
            Numbering::Leaf(2),
        ]);
        assert_eq!(
            n.renumber(&[1]),
            Some(Numbering::Group(vec![Numbering::Leaf(0), Numbering::Leaf(1)]))
        );
        assert_eq!(Numbering::Leaf(4).renumber(&[1, 2]), Some(Numbering::Leaf(2)));
        assert_eq!(Numbering::Group(vec![Numbering::Leaf(3)]).renumber(&[3]), None);
    }

    #[test]
    fn test_problem_type() {
        let mut p = Problem::new();
        assert_eq!(p.problem_type(), "Unconstrained Problem");
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        let t = p.add_variable(VariableBuilder::scalar("t")).unwrap();
        p.add_constraint(x.sum().leq(1.0).unwrap()).unwrap();
        p.set_objective(Sense::Minimize, t.clone()).unwrap();
        assert_eq!(p.problem_type(), "LP");
        p.add_constraint(Constraint::soc(&x, &t).unwrap()).unwrap();
        assert_eq!(p.problem_type(), "SOCP");
        let n = p.add_variable(VariableBuilder::scalar("n").integer()).unwrap();
        p.add_constraint(n.geq(0.0).unwrap()).unwrap();
        assert_eq!(p.problem_type(), "Mixed-Integer SOCP");
    }

    #[test]
    fn test_objective_counters() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 3)).unwrap();
        let q = QuadExpr::from_affine(x.sum()).unwrap().plus(
            &QuadExpr::bilinear(&x, &crate::sparse::csc_identity(3), &x).unwrap(),
        );
        p.set_objective(Sense::Minimize, q.unwrap()).unwrap();
        assert_eq!(p.counters().quad_nnz, 3);
        assert_eq!(p.counters(), &p.recount());
        assert_eq!(p.problem_type(), "QP");
        p.set_objective(Sense::Minimize, x.sum()).unwrap();
        assert_eq!(p.counters().quad_nnz, 0);
        assert_eq!(p.counters(), &p.recount());
    }

    fn affine_leaf() -> LeafKind {
        let shape = Shape::vector(2);
        let x = AffExpr::from_variable(
            VarId(0),
            "x",
            shape,
            crate::expr::storage_factor(VarKind::Continuous, shape),
        );
        match x.leq(1.0).unwrap() {
            Constraint::Leaf(k) => k,
            Constraint::Meta(_) => panic!("Expected leaf"),
        }
    }

    #[test]
    fn test_counters_add_and_remove_balance() {
        let kind = affine_leaf();
        let mut c = Counters::default();
        c.apply(&kind, 1);
        assert_eq!(c.affine, 2);
        c.apply(&kind, -1);
        assert_eq!(c, Counters::default());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "counter went negative")]
    fn test_counters_reject_unbalanced_removal() {
        Counters::default().apply(&affine_leaf(), -1);
    }
}
