//! Canonical conic form `h - G x ∈ K` of a problem.
//!
//! Every leaf constraint is written as a slack `s = h - G x` that must lie in
//! a cone, split into families:
//! - equalities (zero cone), affine inequalities (nonnegative orthant),
//! - second-order cone blocks (`(ub; ne)`, rotated cones transformed),
//! - exponential cone blocks in `(x, y, z)` order, `x ≥ y·exp(z/y)`,
//! - semidefinite blocks as full column-major `n²` vectors.
//!
//! Variable bounds are appended as the last inequality rows. Log-sum-exp
//! constraints and objectives introduce auxiliary columns after the problem's
//! own `number_of_vars` columns.

use std::collections::HashMap;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use crate::constraints::{ConstraintId, DualValue, LeafKind, Relation};
use crate::error::{CvxError, Result};
use crate::expr::{AffExpr, QuadExpr, Shape, VarId, VarKind};
use crate::problem::{ObjectiveExpr, Problem, Sense};
use crate::sparse::{csc_from_iter, csc_mul_vec, csc_transpose};

/// Slack rows `h - G x` of one cone family or block.
#[derive(Debug, Clone)]
pub struct ConeBlock {
    pub g: CscMatrix<f64>,
    pub h: DVector<f64>,
}

impl ConeBlock {
    pub fn len(&self) -> usize {
        self.h.len()
    }

    pub fn is_empty(&self) -> bool {
        self.h.is_empty()
    }

    /// Slack at a point.
    pub fn slack(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.h - csc_mul_vec(&self.g, x)
    }
}

struct BlockBuilder {
    ncols: usize,
    triplets: Vec<(usize, usize, f64)>,
    h: Vec<f64>,
}

impl BlockBuilder {
    fn new(ncols: usize) -> Self {
        BlockBuilder {
            ncols,
            triplets: Vec::new(),
            h: Vec::new(),
        }
    }

    fn rows(&self) -> usize {
        self.h.len()
    }

    /// Append rows whose slack is `sign·(F x + c)`.
    fn push(&mut self, f: &CscMatrix<f64>, c: &DVector<f64>, sign: f64) -> Range<usize> {
        let start = self.rows();
        for (r, col, v) in f.triplet_iter() {
            self.triplets.push((start + r, col, -sign * v));
        }
        self.h.extend(c.iter().map(|v| sign * v));
        start..self.rows()
    }

    /// Append one row given directly by its `G` entries and `h`.
    fn push_row(&mut self, g: impl IntoIterator<Item = (usize, f64)>, h: f64) -> usize {
        let row = self.rows();
        self.triplets.extend(g.into_iter().map(|(c, v)| (row, c, v)));
        self.h.push(h);
        row
    }

    fn build(self) -> ConeBlock {
        ConeBlock {
            g: csc_from_iter(self.h.len(), self.ncols, self.triplets),
            h: DVector::from_vec(self.h),
        }
    }
}

/// Where the rows of one constraint landed.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSpan {
    Eq(Range<usize>),
    Ineq(Range<usize>),
    Soc(usize),
    Rsoc(usize),
    Exp(usize),
    Psd(usize),
    /// Realized through auxiliary exponential cones; no dual is reported.
    Lse,
}

/// Rows of one constraint, by position in the problem.
#[derive(Debug, Clone)]
pub struct ConstraintRows {
    pub id: ConstraintId,
    pub span: RowSpan,
    pub shape: Shape,
}

/// Raw dual vectors per cone family, as a solver returns them.
#[derive(Debug, Clone, Default)]
pub struct FamilyDuals {
    pub eq: DVector<f64>,
    pub ineq: DVector<f64>,
    pub soc: Vec<DVector<f64>>,
    pub exp: Vec<DVector<f64>>,
    /// Full symmetric matrices.
    pub psd: Vec<DMatrix<f64>>,
}

/// A problem in conic form.
#[derive(Debug, Clone)]
pub struct CanonicalForm {
    /// Columns of the problem's own variables.
    pub nvars: usize,
    /// Auxiliary columns after `nvars`.
    pub naux: usize,
    pub sense: Sense,
    /// Linear objective coefficients as written (not negated for `Maximize`).
    pub c: DVector<f64>,
    pub c0: f64,
    /// Upper triangle of `Q + Qᵀ` for a quadratic objective `xᵀQx`, so that
    /// the objective reads `½ xᵀ P x + cᵀ x + c0`.
    pub p: Option<CscMatrix<f64>>,
    pub eq: ConeBlock,
    pub ineq: ConeBlock,
    pub soc: Vec<ConeBlock>,
    pub exp: Vec<ConeBlock>,
    pub psd: Vec<(usize, ConeBlock)>,
    /// Trailing inequality rows coming from variable bounds.
    pub bound_rows: usize,
    /// Columns restricted to integers.
    pub integers: Vec<usize>,
    pub rows: Vec<ConstraintRows>,
}

impl CanonicalForm {
    /// Total number of columns.
    pub fn ncols(&self) -> usize {
        self.nvars + self.naux
    }

    /// Export a real, quadratic-constraint-free problem.
    pub fn from_problem(problem: &Problem) -> Result<CanonicalForm> {
        let nvars = problem.number_of_vars();
        let lse_obj = match &problem.objective().expr {
            Some(ObjectiveExpr::LogSumExp(l)) => match problem.objective().sense {
                Sense::Maximize => {
                    return Err(CvxError::NonConvex(
                        "maximizing a log-sum-exp".to_string(),
                    ))
                }
                _ => Some(l),
            },
            _ => None,
        };
        let naux: usize = problem
            .constraints()
            .iter()
            .map(|c| match &c.kind {
                LeafKind::Lse { le0 } => le0.len(),
                _ => 0,
            })
            .sum::<usize>()
            + lse_obj.map_or(0, |l| l.len() + 1);
        let ncols = nvars + naux;
        let start_of = |id: VarId| problem.variable(id).map(|v| v.start);

        let mut eq = BlockBuilder::new(ncols);
        let mut ineq = BlockBuilder::new(ncols);
        let mut soc = Vec::new();
        let mut exp = Vec::new();
        let mut psd = Vec::new();
        let mut rows = Vec::with_capacity(problem.constraints().len());
        let mut next_aux = nvars;

        for leaf in problem.constraints() {
            let shape = leaf.kind.size();
            let span = match &leaf.kind {
                LeafKind::Affine { lhs, rel, rhs } => {
                    if !lhs.is_real() || !rhs.is_real() {
                        return Err(CvxError::ComplexValued(leaf.kind.to_string()));
                    }
                    let (f, c) = lhs.minus(rhs)?.linear_rows(&start_of, ncols)?;
                    match rel {
                        Relation::Eq => RowSpan::Eq(eq.push(&f, &c, 1.0)),
                        Relation::Le => RowSpan::Ineq(ineq.push(&f, &c, -1.0)),
                        Relation::Ge => RowSpan::Ineq(ineq.push(&f, &c, 1.0)),
                    }
                }
                LeafKind::Soc { ne, ub } => {
                    real(ne, leaf)?;
                    let stacked = AffExpr::vstack(&[ub.clone(), ne.vectorize()])?;
                    soc.push(single_block(&stacked, &start_of, ncols)?);
                    RowSpan::Soc(soc.len() - 1)
                }
                LeafKind::Rsoc { ne, ub1, ub2 } => {
                    real(ne, leaf)?;
                    let stacked = AffExpr::vstack(&[
                        ub1.plus(ub2)?,
                        ne.vectorize().scale(2.0),
                        ub2.minus(ub1)?,
                    ])?;
                    soc.push(single_block(&stacked, &start_of, ncols)?);
                    RowSpan::Rsoc(soc.len() - 1)
                }
                LeafKind::ExpCone { x, y, z } => {
                    let stacked = AffExpr::vstack(&[x.clone(), y.clone(), z.clone()])?;
                    exp.push(single_block(&stacked, &start_of, ncols)?);
                    RowSpan::Exp(exp.len() - 1)
                }
                LeafKind::Lmi { lhs, rel, rhs } => {
                    if !lhs.is_real() || !rhs.is_real() {
                        return Err(CvxError::ComplexValued(leaf.kind.to_string()));
                    }
                    let m = match rel {
                        Relation::Le => rhs.minus(lhs)?,
                        _ => lhs.minus(rhs)?,
                    };
                    psd.push((m.shape().rows, single_block(&m.vectorize(), &start_of, ncols)?));
                    RowSpan::Psd(psd.len() - 1)
                }
                LeafKind::Quad { .. } => {
                    return Err(CvxError::QuadAsSocp(leaf.kind.to_string()));
                }
                LeafKind::Lse { le0 } => {
                    let (f, c) = le0.exponents.vectorize().linear_rows(&start_of, ncols)?;
                    let aux: Vec<usize> = (next_aux..next_aux + le0.len()).collect();
                    next_aux += le0.len();
                    push_lse(&mut ineq, &mut exp, &f, &c, &aux, None, ncols);
                    RowSpan::Lse
                }
            };
            rows.push(ConstraintRows {
                id: leaf.id,
                span,
                shape,
            });
        }

        let mut c = DVector::zeros(ncols);
        let mut c0 = 0.0;
        let mut p = None;
        match &problem.objective().expr {
            None => {}
            Some(ObjectiveExpr::Affine(a)) => {
                let (row, k) = scalar_objective(a, &start_of, ncols)?;
                c = row;
                c0 = k;
            }
            Some(ObjectiveExpr::Quadratic(q)) => {
                let (row, k) = scalar_objective(&q.aff, &start_of, ncols)?;
                c = row;
                c0 = k;
                p = Some(quadratic_matrix(q, &start_of, ncols)?);
            }
            Some(ObjectiveExpr::LogSumExp(l)) => {
                let (f, k) = l.exponents.vectorize().linear_rows(&start_of, ncols)?;
                let aux: Vec<usize> = (next_aux..next_aux + l.len()).collect();
                let s = next_aux + l.len();
                push_lse(&mut ineq, &mut exp, &f, &k, &aux, Some(s), ncols);
                c[s] = 1.0;
            }
        }

        let mut bound_rows = 0;
        let mut integers = Vec::new();
        for var in problem.variables() {
            if matches!(
                var.kind,
                VarKind::Integer | VarKind::Binary | VarKind::SemiInteger
            ) {
                integers.extend(var.start..var.end);
            }
            if let Some(lower) = &var.lower {
                for (k, l) in lower.iter().enumerate() {
                    if l.is_finite() {
                        ineq.push_row([(var.start + k, -1.0)], -l);
                        bound_rows += 1;
                    }
                }
            }
            if let Some(upper) = &var.upper {
                for (k, u) in upper.iter().enumerate() {
                    if u.is_finite() {
                        ineq.push_row([(var.start + k, 1.0)], *u);
                        bound_rows += 1;
                    }
                }
            }
        }

        tracing::debug!(
            component = "canon",
            operation = "from_problem",
            status = "success",
            columns = ncols,
            eq_rows = eq.rows(),
            ineq_rows = ineq.rows(),
            soc_blocks = soc.len(),
            exp_blocks = exp.len(),
            psd_blocks = psd.len(),
            "Exported conic form"
        );

        Ok(CanonicalForm {
            nvars,
            naux,
            sense: problem.objective().sense,
            c,
            c0,
            p,
            eq: eq.build(),
            ineq: ineq.build(),
            soc,
            exp,
            psd,
            bound_rows,
            integers,
            rows,
        })
    }

    /// Objective value at `x`, as written.
    pub fn objective_value(&self, x: &DVector<f64>) -> f64 {
        let mut v = self.c.dot(x) + self.c0;
        if let Some(p) = &self.p {
            // P holds the upper triangle of a symmetric matrix.
            for (r, c, val) in p.triplet_iter() {
                let w = if r == c { 0.5 } else { 1.0 };
                v += w * val * x[r] * x[c];
            }
        }
        v
    }

    /// Values of the problem's variables from a full column vector.
    pub fn primal_values(&self, problem: &Problem, x: &DVector<f64>) -> HashMap<VarId, DVector<f64>> {
        problem
            .variables()
            .filter(|v| v.end <= x.len())
            .map(|v| (v.id, x.rows(v.start, v.dof()).into_owned()))
            .collect()
    }

    /// Constraint duals, by constraint position.
    pub fn constraint_duals(&self, d: &FamilyDuals) -> Vec<Option<DualValue>> {
        self.rows
            .iter()
            .map(|rows| {
                let column = |v: &DVector<f64>| {
                    DualValue::Real(DMatrix::from_column_slice(v.len(), 1, v.as_slice()))
                };
                match &rows.span {
                    RowSpan::Eq(r) => reshape(&d.eq, r, rows.shape),
                    RowSpan::Ineq(r) => reshape(&d.ineq, r, rows.shape),
                    RowSpan::Soc(k) => d.soc.get(*k).map(column),
                    RowSpan::Rsoc(k) => d.soc.get(*k).map(|y| column(&rsoc_dual(y))),
                    RowSpan::Exp(k) => d.exp.get(*k).map(column),
                    RowSpan::Psd(k) => d.psd.get(*k).map(|m| DualValue::Real(m.clone())),
                    RowSpan::Lse => None,
                }
            })
            .collect()
    }
}

fn real(ne: &AffExpr, leaf: &crate::constraints::Leaf) -> Result<()> {
    if ne.is_real() {
        Ok(())
    } else {
        Err(CvxError::ComplexValued(leaf.kind.to_string()))
    }
}

fn single_block(
    e: &AffExpr,
    start_of: &dyn Fn(VarId) -> Option<usize>,
    ncols: usize,
) -> Result<ConeBlock> {
    let (f, c) = e.linear_rows(start_of, ncols)?;
    let mut b = BlockBuilder::new(ncols);
    b.push(&f, &c, 1.0);
    Ok(b.build())
}

fn scalar_objective(
    a: &AffExpr,
    start_of: &dyn Fn(VarId) -> Option<usize>,
    ncols: usize,
) -> Result<(DVector<f64>, f64)> {
    if !a.is_scalar() {
        return Err(CvxError::mismatch("a scalar objective", a.shape()));
    }
    if !a.is_real() {
        return Err(CvxError::ComplexValued(format!("objective {}", a.string())));
    }
    let (f, c) = a.linear_rows(start_of, ncols)?;
    let mut row = DVector::zeros(ncols);
    for (_, col, v) in f.triplet_iter() {
        row[col] += v;
    }
    Ok((row, c[0]))
}

/// Upper triangle of `Q + Qᵀ` in global columns.
pub(crate) fn quadratic_matrix(
    q: &QuadExpr,
    start_of: &dyn Fn(VarId) -> Option<usize>,
    ncols: usize,
) -> Result<CscMatrix<f64>> {
    let mut triplets = Vec::new();
    for ((a, b), m) in &q.quad {
        let sa = start_of(*a).ok_or_else(|| CvxError::UnknownVariable(a.to_string()))?;
        let sb = start_of(*b).ok_or_else(|| CvxError::UnknownVariable(b.to_string()))?;
        for (r, c, v) in m.triplet_iter() {
            let (i, j) = (sa + r, sb + c);
            if i == j {
                triplets.push((i, i, 2.0 * v));
            } else {
                triplets.push((i.min(j), i.max(j), *v));
            }
        }
    }
    Ok(csc_from_iter(ncols, ncols, triplets))
}

/// `Σ uᵢ ≤ 1` and `(uᵢ, 1, aᵢ - s)` in the exponential cone, with `s` absent
/// for a constraint `lse(a) ≤ 0`.
fn push_lse(
    ineq: &mut BlockBuilder,
    exp: &mut Vec<ConeBlock>,
    f: &CscMatrix<f64>,
    c: &DVector<f64>,
    aux: &[usize],
    s: Option<usize>,
    ncols: usize,
) {
    ineq.push_row(aux.iter().map(|&u| (u, 1.0)), 1.0);
    let mut f_rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); f.nrows()];
    for (col, r, v) in csc_transpose(f).triplet_iter() {
        f_rows[r].push((col, *v));
    }
    for (i, &u) in aux.iter().enumerate() {
        let mut b = BlockBuilder::new(ncols);
        b.push_row([(u, -1.0)], 0.0);
        b.push_row(std::iter::empty(), 1.0);
        let z = f_rows[i]
            .iter()
            .map(|(col, v)| (*col, -v))
            .chain(s.map(|s| (s, 1.0)));
        b.push_row(z, c[i]);
        exp.push(b.build());
    }
}

fn reshape(v: &DVector<f64>, r: &Range<usize>, shape: Shape) -> Option<DualValue> {
    if r.end > v.len() {
        return None;
    }
    Some(DualValue::Real(DMatrix::from_column_slice(
        shape.rows,
        shape.cols,
        &v.as_slice()[r.clone()],
    )))
}

/// Dual of `‖ne‖² ≤ ub1·ub2` from the dual `(y0; yz; yl)` of its cone
/// `(ub1 + ub2; 2 ne; ub2 - ub1)`, ordered `(ub1; ub2; ne)`.
fn rsoc_dual(y: &DVector<f64>) -> DVector<f64> {
    let m = y.len().saturating_sub(2);
    if y.len() < 2 {
        return y.clone();
    }
    let (y0, yl) = (y[0], y[y.len() - 1]);
    let mut out = DVector::zeros(m + 2);
    out[0] = y0 - yl;
    out[1] = y0 + yl;
    for k in 0..m {
        out[2 + k] = 2.0 * y[1 + k];
    }
    out
}
