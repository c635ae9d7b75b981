//! Leaf constraint types.
//!
//! Every leaf constraint is one of a closed set of families:
//! - Affine: `lhs ≤ / ≥ / = rhs`
//! - SOC: `‖ne‖ ≤ ub` (second-order cone)
//! - RSOC: `‖ne‖² ≤ ub1·ub2` (rotated second-order cone)
//! - ExpCone: `x ≥ y·exp(z/y), y > 0` (exponential cone)
//! - LMI: `lhs ≽ / ≼ rhs` (linear matrix inequality)
//! - Quad: `q ≤ 0` for a quadratic `q`
//! - LSE: `log Σ exp(a) ≤ 0` (geometric programming)
//!
//! Meta constraints ([`MetaKind`]) expand into these at insertion time.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use nalgebra::{Complex, DMatrix, SymmetricEigen};
use nalgebra_sparse::CscMatrix;

use super::meta::{MetaId, MetaKind};
use crate::error::{CvxError, Result};
use crate::expr::{AffExpr, IntoAffine, LseExpr, QuadExpr, Shape, ValueSource, VarId};

/// Comparison relation of affine constraints and LMIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Le => "≤",
            Relation::Ge => "≥",
            Relation::Eq => "=",
        }
    }

    fn as_matrix_str(&self) -> &'static str {
        match self {
            Relation::Le => "≼",
            Relation::Ge => "≽",
            Relation::Eq => "=",
        }
    }
}

/// Constraint families, used by solvers to declare what they support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    Affine,
    Soc,
    Rsoc,
    ExpCone,
    Lmi,
    Quad,
    Lse,
}

/// Stable identity of a leaf constraint within a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub usize);

/// The mathematical content of a leaf constraint.
#[derive(Debug, Clone)]
pub enum LeafKind {
    Affine {
        lhs: AffExpr,
        rel: Relation,
        rhs: AffExpr,
    },
    Soc {
        ne: AffExpr,
        ub: AffExpr,
    },
    Rsoc {
        ne: AffExpr,
        ub1: AffExpr,
        ub2: AffExpr,
    },
    ExpCone {
        x: AffExpr,
        y: AffExpr,
        z: AffExpr,
    },
    Lmi {
        lhs: AffExpr,
        rel: Relation,
        rhs: AffExpr,
    },
    Quad {
        le0: QuadExpr,
    },
    Lse {
        le0: LseExpr,
    },
}

/// Dual value attached to a constraint after solving.
#[derive(Debug, Clone, PartialEq)]
pub enum DualValue {
    Real(DMatrix<f64>),
    Complex(DMatrix<Complex<f64>>),
}

impl DualValue {
    /// Real matrix, if the dual is real.
    pub fn as_real(&self) -> Option<&DMatrix<f64>> {
        match self {
            DualValue::Real(m) => Some(m),
            DualValue::Complex(_) => None,
        }
    }

    /// First entry as a real scalar.
    pub fn scalar(&self) -> Option<f64> {
        self.as_real().and_then(|m| m.get(0).copied())
    }
}

/// A leaf constraint stored in a problem.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub id: ConstraintId,
    pub kind: LeafKind,
    pub name: Option<String>,
    pub origin: Option<MetaId>,
    pub dual: Option<DualValue>,
}

/// A constraint to be added to a problem.
#[derive(Debug, Clone)]
pub enum Constraint {
    Leaf(LeafKind),
    Meta(MetaKind),
}

impl Constraint {
    /// Affine constraint `lhs rel rhs`; scalars broadcast.
    pub fn affine(lhs: impl IntoAffine, rel: Relation, rhs: impl IntoAffine) -> Result<Self> {
        let lhs = lhs.into_affine();
        let rhs = rhs.into_affine();
        let (lhs, rhs) = if lhs.shape() == rhs.shape() {
            (lhs, rhs)
        } else if rhs.is_scalar() {
            let r = rhs.broadcast_to(lhs.shape())?;
            (lhs, r)
        } else if lhs.is_scalar() {
            (lhs.broadcast_to(rhs.shape())?, rhs)
        } else {
            return Err(CvxError::mismatch(lhs.shape(), rhs.shape()));
        };
        Ok(Constraint::Leaf(LeafKind::Affine { lhs, rel, rhs }))
    }

    /// Second-order cone `‖ne‖ ≤ ub`.
    pub fn soc(ne: impl IntoAffine, ub: impl IntoAffine) -> Result<Self> {
        let ne = ne.into_affine();
        let ub = scalar_real(ub.into_affine(), "SOC upper bound")?;
        Ok(Constraint::Leaf(LeafKind::Soc { ne, ub }))
    }

    /// Rotated second-order cone `‖ne‖² ≤ ub1·ub2`.
    pub fn rsoc(ne: impl IntoAffine, ub1: impl IntoAffine, ub2: impl IntoAffine) -> Result<Self> {
        let ne = ne.into_affine();
        let ub1 = scalar_real(ub1.into_affine(), "RSOC bound")?;
        let ub2 = scalar_real(ub2.into_affine(), "RSOC bound")?;
        Ok(Constraint::Leaf(LeafKind::Rsoc { ne, ub1, ub2 }))
    }

    /// Exponential cone `x ≥ y·exp(z/y), y > 0`.
    pub fn exp_cone(x: impl IntoAffine, y: impl IntoAffine, z: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Leaf(LeafKind::ExpCone {
            x: scalar_real(x.into_affine(), "exponential cone entry")?,
            y: scalar_real(y.into_affine(), "exponential cone entry")?,
            z: scalar_real(z.into_affine(), "exponential cone entry")?,
        }))
    }

    /// Linear matrix inequality. A scalar side `t` stands for `t·I`.
    pub fn lmi(lhs: impl IntoAffine, rel: Relation, rhs: impl IntoAffine) -> Result<Self> {
        if rel == Relation::Eq {
            return Err(CvxError::InvalidProblem(
                "an LMI needs ≼ or ≽".to_string(),
            ));
        }
        let mut lhs = lhs.into_affine();
        let mut rhs = rhs.into_affine();
        if lhs.is_scalar() && !rhs.is_scalar() {
            lhs = lhs.lmul(&DMatrix::identity(rhs.shape().rows, rhs.shape().rows))?;
        } else if rhs.is_scalar() && !lhs.is_scalar() {
            rhs = rhs.lmul(&DMatrix::identity(lhs.shape().rows, lhs.shape().rows))?;
        }
        if lhs.shape() != rhs.shape() {
            return Err(CvxError::mismatch(lhs.shape(), rhs.shape()));
        }
        if !lhs.shape().is_square() {
            return Err(CvxError::mismatch("a square shape", lhs.shape()));
        }
        Ok(Constraint::Leaf(LeafKind::Lmi { lhs, rel, rhs }))
    }

    /// Quadratic constraint `q ≤ 0`.
    pub fn quad(le0: QuadExpr) -> Self {
        Constraint::Leaf(LeafKind::Quad { le0 })
    }

    /// Geometric-program constraint `log Σ exp(a) ≤ 0`.
    pub fn lse(le0: LseExpr) -> Self {
        Constraint::Leaf(LeafKind::Lse { le0 })
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Constraint::Meta(_))
    }

    /// Display string of the constraint.
    pub fn string(&self) -> String {
        match self {
            Constraint::Leaf(k) => k.to_string(),
            Constraint::Meta(m) => m.to_string(),
        }
    }
}

fn scalar_real(e: AffExpr, what: &str) -> Result<AffExpr> {
    if !e.is_scalar() {
        return Err(CvxError::mismatch(format!("a scalar {}", what), e.shape()));
    }
    if !e.is_real() {
        return Err(CvxError::ComplexValued(format!("{} {}", what, e.string())));
    }
    Ok(e)
}

impl LeafKind {
    pub fn kind(&self) -> ConstraintKind {
        match self {
            LeafKind::Affine { .. } => ConstraintKind::Affine,
            LeafKind::Soc { .. } => ConstraintKind::Soc,
            LeafKind::Rsoc { .. } => ConstraintKind::Rsoc,
            LeafKind::ExpCone { .. } => ConstraintKind::ExpCone,
            LeafKind::Lmi { .. } => ConstraintKind::Lmi,
            LeafKind::Quad { .. } => ConstraintKind::Quad,
            LeafKind::Lse { .. } => ConstraintKind::Lse,
        }
    }

    /// Size of the constraint: the shape of the compared expressions, or
    /// the cone dimension as a column.
    pub fn size(&self) -> Shape {
        match self {
            LeafKind::Affine { lhs, .. } | LeafKind::Lmi { lhs, .. } => lhs.shape(),
            LeafKind::Soc { ne, .. } => Shape::vector(cone_len(ne) + 1),
            LeafKind::Rsoc { ne, .. } => Shape::vector(cone_len(ne) + 2),
            LeafKind::ExpCone { .. } => Shape::vector(3),
            LeafKind::Quad { .. } | LeafKind::Lse { .. } => Shape::scalar(),
        }
    }

    /// Affine expressions appearing in the constraint.
    pub fn expressions(&self) -> Vec<&AffExpr> {
        match self {
            LeafKind::Affine { lhs, rhs, .. } | LeafKind::Lmi { lhs, rhs, .. } => vec![lhs, rhs],
            LeafKind::Soc { ne, ub } => vec![ne, ub],
            LeafKind::Rsoc { ne, ub1, ub2 } => vec![ne, ub1, ub2],
            LeafKind::ExpCone { x, y, z } => vec![x, y, z],
            LeafKind::Quad { le0 } => vec![&le0.aff],
            LeafKind::Lse { le0 } => vec![&le0.exponents],
        }
    }

    fn expressions_mut(&mut self) -> Vec<&mut AffExpr> {
        match self {
            LeafKind::Affine { lhs, rhs, .. } | LeafKind::Lmi { lhs, rhs, .. } => vec![lhs, rhs],
            LeafKind::Soc { ne, ub } => vec![ne, ub],
            LeafKind::Rsoc { ne, ub1, ub2 } => vec![ne, ub1, ub2],
            LeafKind::ExpCone { x, y, z } => vec![x, y, z],
            LeafKind::Quad { le0 } => vec![&mut le0.aff],
            LeafKind::Lse { le0 } => vec![&mut le0.exponents],
        }
    }

    /// Variables referenced by the constraint.
    pub fn variables(&self) -> BTreeSet<VarId> {
        match self {
            LeafKind::Quad { le0 } => le0.variables(),
            _ => self
                .expressions()
                .into_iter()
                .flat_map(|e| e.variables())
                .collect(),
        }
    }

    /// Whether any expression has an imaginary part.
    pub fn is_complex(&self) -> bool {
        self.expressions().iter().any(|e| !e.is_real())
    }

    /// Drop identically-zero imaginary parts; returns whether the constraint
    /// is still complex afterwards.
    pub fn prune_imaginary(&mut self) -> bool {
        let mut complex = false;
        for e in self.expressions_mut() {
            e.prune_imaginary();
            complex |= !e.is_real();
        }
        complex
    }

    /// Same constraint over renamed variables.
    pub fn remap(&self, map: &HashMap<VarId, VarId>) -> LeafKind {
        match self {
            LeafKind::Affine { lhs, rel, rhs } => LeafKind::Affine {
                lhs: lhs.remap(map),
                rel: *rel,
                rhs: rhs.remap(map),
            },
            LeafKind::Soc { ne, ub } => LeafKind::Soc {
                ne: ne.remap(map),
                ub: ub.remap(map),
            },
            LeafKind::Rsoc { ne, ub1, ub2 } => LeafKind::Rsoc {
                ne: ne.remap(map),
                ub1: ub1.remap(map),
                ub2: ub2.remap(map),
            },
            LeafKind::ExpCone { x, y, z } => LeafKind::ExpCone {
                x: x.remap(map),
                y: y.remap(map),
                z: z.remap(map),
            },
            LeafKind::Lmi { lhs, rel, rhs } => LeafKind::Lmi {
                lhs: lhs.remap(map),
                rel: *rel,
                rhs: rhs.remap(map),
            },
            LeafKind::Quad { le0 } => LeafKind::Quad {
                le0: le0.remap(map),
            },
            LeafKind::Lse { le0 } => LeafKind::Lse {
                le0: le0.remap(map),
            },
        }
    }

    /// The smaller and greater side of an affine constraint or LMI.
    /// Equalities keep their order.
    pub fn smaller_greater(&self) -> Option<(&AffExpr, &AffExpr)> {
        match self {
            LeafKind::Affine { lhs, rel, rhs } | LeafKind::Lmi { lhs, rel, rhs } => match rel {
                Relation::Ge => Some((rhs, lhs)),
                _ => Some((lhs, rhs)),
            },
            _ => None,
        }
    }

    pub fn smaller(&self) -> Option<&AffExpr> {
        self.smaller_greater().map(|(s, _)| s)
    }

    pub fn greater(&self) -> Option<&AffExpr> {
        self.smaller_greater().map(|(_, g)| g)
    }

    /// `smaller - greater`, to be compared against zero.
    pub fn le0(&self) -> Option<Result<AffExpr>> {
        self.smaller_greater().map(|(s, g)| s.minus(g))
    }

    /// `greater - smaller`, to be compared against zero.
    pub fn ge0(&self) -> Option<Result<AffExpr>> {
        self.smaller_greater().map(|(s, g)| g.minus(s))
    }

    /// Split `lhs - rhs` of an affine constraint into its linear part and
    /// the bound `-constant`, so the constraint reads `linear rel bound`.
    pub fn bounded_linear_form(&self) -> Result<(AffExpr, AffExpr)> {
        match self {
            LeafKind::Affine { lhs, rhs, .. } => {
                let diff = lhs.minus(rhs)?;
                let constant = diff.constant_vector();
                let bound = AffExpr::constant(&DMatrix::from_column_slice(
                    diff.shape().rows,
                    diff.shape().cols,
                    (-constant.clone()).as_slice(),
                ));
                let linear = diff.minus(AffExpr::constant(&DMatrix::from_column_slice(
                    diff.shape().rows,
                    diff.shape().cols,
                    constant.as_slice(),
                )))?;
                Ok((linear.with_string(lhs.string().to_string()), bound))
            }
            _ => Err(CvxError::InvalidProblem(
                "bounded linear form of a non-affine constraint".to_string(),
            )),
        }
    }

    /// Sparse rows `(J, V, c)` of an affine constraint: row `k` reads
    /// `Σ V[i]·x[J[i]] rel c`. Rows are column-major over the shape.
    pub fn sparse_ab_rows(
        &self,
        start_of: &dyn Fn(VarId) -> Option<usize>,
        ncols: usize,
    ) -> Result<Vec<(Vec<usize>, Vec<f64>, f64)>> {
        let (linear, bound) = self.bounded_linear_form()?;
        let (a, _) = linear.linear_rows(start_of, ncols)?;
        let b = bound.constant_vector();
        let mut rows: Vec<(Vec<usize>, Vec<f64>, f64)> =
            (0..a.nrows()).map(|k| (Vec::new(), Vec::new(), b[k])).collect();
        let t = crate::sparse::csc_transpose(&a);
        for (c, r, v) in t.triplet_iter() {
            rows[r].0.push(c);
            rows[r].1.push(*v);
        }
        Ok(rows)
    }

    /// If this is `X ≽ 0` for a bare variable `X`, the variable and its
    /// coefficient matrix.
    pub fn semidef_candidate(&self) -> Option<(VarId, CscMatrix<f64>)> {
        let LeafKind::Lmi { .. } = self else {
            return None;
        };
        let ge0 = self.ge0()?.ok()?;
        if ge0.re().factors.len() != 1 || !ge0.is_real() {
            return None;
        }
        if let Some(c) = &ge0.re().constant {
            if c.iter().any(|v| *v != 0.0) {
                return None;
            }
        }
        ge0.re()
            .factors
            .iter()
            .next()
            .map(|(id, m)| (*id, m.clone()))
    }

    /// Signed distance to satisfaction from current values; positive means
    /// strictly feasible. LMIs return the difference matrix.
    pub fn slack(&self, values: &dyn ValueSource) -> Result<DMatrix<f64>> {
        let scalar = |v: f64| DMatrix::from_element(1, 1, v);
        match self {
            LeafKind::Affine { lhs, rel, rhs } => {
                let (l, r) = complex_pair(lhs, rhs, values)?;
                let diff = l - r;
                Ok(match rel {
                    Relation::Le => diff.map(|c| -c.re),
                    Relation::Ge => diff.map(|c| c.re),
                    Relation::Eq => diff.map(|c| -c.norm()),
                })
            }
            LeafKind::Soc { ne, ub } => {
                let n = ne.eval_complex(values)?;
                let norm = n.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
                Ok(scalar(ub.eval(values)?[(0, 0)] - norm))
            }
            LeafKind::Rsoc { ne, ub1, ub2 } => {
                let n = ne.eval_complex(values)?;
                let sq = n.iter().map(|c| c.norm_sqr()).sum::<f64>();
                let u = ub1.eval(values)?[(0, 0)] * ub2.eval(values)?[(0, 0)];
                Ok(scalar(u - sq))
            }
            LeafKind::ExpCone { x, y, z } => {
                let (xv, yv, zv) = (
                    x.eval(values)?[(0, 0)],
                    y.eval(values)?[(0, 0)],
                    z.eval(values)?[(0, 0)],
                );
                Ok(scalar(exp_cone_slack(xv, yv, zv)))
            }
            LeafKind::Lmi { lhs, rel, rhs } => {
                let (l, r) = complex_pair(lhs, rhs, values)?;
                let diff = match rel {
                    Relation::Le => r - l,
                    _ => l - r,
                };
                Ok(diff.map(|c| c.re))
            }
            LeafKind::Quad { le0 } => Ok(scalar(-le0.eval(values)?)),
            LeafKind::Lse { le0 } => Ok(scalar(-le0.eval(values)?)),
        }
    }

    /// Smallest slack entry; for LMIs the smallest eigenvalue of the
    /// (Hermitian) difference.
    pub fn min_slack(&self, values: &dyn ValueSource) -> Result<f64> {
        match self {
            LeafKind::Lmi { lhs, rel, rhs } => {
                let (l, r) = complex_pair(lhs, rhs, values)?;
                let diff = match rel {
                    Relation::Le => r - l,
                    _ => l - r,
                };
                Ok(min_hermitian_eigenvalue(&diff))
            }
            _ => Ok(self
                .slack(values)?
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min)),
        }
    }
}

fn complex_pair(
    lhs: &AffExpr,
    rhs: &AffExpr,
    values: &dyn ValueSource,
) -> Result<(DMatrix<Complex<f64>>, DMatrix<Complex<f64>>)> {
    Ok((lhs.eval_complex(values)?, rhs.eval_complex(values)?))
}

/// Slack of `x ≥ y·exp(z/y)`. The domain `y > 0` is folded into the sign:
/// points with `y < 0` always get a negative slack, and `y = 0` is only
/// feasible on the closure `z ≤ 0, x ≥ 0`.
pub fn exp_cone_slack(x: f64, y: f64, z: f64) -> f64 {
    if y > 0.0 {
        x - y * (z / y).exp()
    } else if y == 0.0 && z <= 0.0 {
        x
    } else {
        y.min(0.0) - z.max(0.0) - f64::EPSILON
    }
}

/// Smallest eigenvalue of the Hermitian part of a complex matrix, through
/// the real embedding `[[Re, -Im], [Im, Re]]`.
pub fn min_hermitian_eigenvalue(m: &DMatrix<Complex<f64>>) -> f64 {
    let n = m.nrows();
    if n == 0 {
        return 0.0;
    }
    let h = (m + m.adjoint()) * Complex::new(0.5, 0.0);
    let mut real = DMatrix::zeros(2 * n, 2 * n);
    for i in 0..n {
        for j in 0..n {
            let c = h[(i, j)];
            real[(i, j)] = c.re;
            real[(i + n, j + n)] = c.re;
            real[(i, j + n)] = -c.im;
            real[(i + n, j)] = c.im;
        }
    }
    SymmetricEigen::new(real)
        .eigenvalues
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min)
}

fn cone_len(ne: &AffExpr) -> usize {
    if ne.is_real() {
        ne.size()
    } else {
        2 * ne.size()
    }
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafKind::Affine { lhs, rel, rhs } => {
                write!(f, "{} {} {}", lhs.string(), rel.as_str(), rhs.string())
            }
            LeafKind::Soc { ne, ub } => write!(f, "‖{}‖ ≤ {}", ne.string(), ub.string()),
            LeafKind::Rsoc { ne, ub1, ub2 } => {
                write!(f, "‖{}‖² ≤ {}·{}", ne.string(), ub1.string(), ub2.string())
            }
            LeafKind::ExpCone { x, y, z } => write!(
                f,
                "{} ≥ {}·exp({}/{})",
                x.string(),
                y.string(),
                z.string(),
                y.string()
            ),
            LeafKind::Lmi { lhs, rel, rhs } => {
                write!(f, "{} {} {}", lhs.string(), rel.as_matrix_str(), rhs.string())
            }
            LeafKind::Quad { le0 } => write!(f, "{} ≤ 0", le0.string()),
            LeafKind::Lse { le0 } => write!(f, "{} ≤ 0", le0),
        }
    }
}

/// Extension trait for creating constraints from affine expressions.
pub trait ConstraintExt {
    /// Create equality constraint: self == rhs.
    fn equals(&self, rhs: impl IntoAffine) -> Result<Constraint>;

    /// Create inequality constraint: self <= rhs.
    fn leq(&self, rhs: impl IntoAffine) -> Result<Constraint>;

    /// Create inequality constraint: self >= rhs.
    fn geq(&self, rhs: impl IntoAffine) -> Result<Constraint>;

    /// Create LMI: self ≽ rhs.
    fn succeq(&self, rhs: impl IntoAffine) -> Result<Constraint>;

    /// Create LMI: self ≼ rhs.
    fn preceq(&self, rhs: impl IntoAffine) -> Result<Constraint>;
}

impl ConstraintExt for AffExpr {
    fn equals(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        Constraint::affine(self, Relation::Eq, rhs)
    }

    fn leq(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        Constraint::affine(self, Relation::Le, rhs)
    }

    fn geq(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        Constraint::affine(self, Relation::Ge, rhs)
    }

    fn succeq(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        Constraint::lmi(self, Relation::Ge, rhs)
    }

    fn preceq(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        Constraint::lmi(self, Relation::Le, rhs)
    }
}

impl QuadExpr {
    /// Quadratic constraint `self ≤ rhs`.
    pub fn leq(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        let rhs = rhs.into_affine();
        let string = format!("{} - {}", self.string(), rhs.string());
        Ok(Constraint::quad(self.difference(rhs)?.with_string(string)))
    }

    /// Quadratic constraint `self ≥ rhs`, i.e. `rhs - self ≤ 0`.
    pub fn geq(&self, rhs: impl IntoAffine) -> Result<Constraint> {
        let rhs = rhs.into_affine();
        let string = format!("{} - ({})", rhs.string(), self.string());
        Ok(Constraint::quad(
            self.scale(-1.0).plus_affine(rhs)?.with_string(string),
        ))
    }
}

impl LseExpr {
    /// Geometric-program constraint `log Σ exp(a) ≤ b`.
    pub fn leq(&self, b: impl IntoAffine) -> Result<Constraint> {
        Ok(Constraint::lse(self.shifted(b)?))
    }
}

/// Norm of an expression, to be bounded from above.
///
/// The bound of a real scalar becomes an absolute value meta constraint,
/// anything else a second-order cone.
#[derive(Debug, Clone)]
pub struct Norm(AffExpr);

/// Euclidean (Frobenius) norm of `x`.
pub fn norm(x: &AffExpr) -> Norm {
    Norm(x.clone())
}

/// Absolute value (modulus) of a scalar, Euclidean norm otherwise.
pub fn abs(x: &AffExpr) -> Norm {
    Norm(x.clone())
}

impl Norm {
    pub fn inner(&self) -> &AffExpr {
        &self.0
    }

    /// `‖x‖ ≤ ub`.
    pub fn leq(&self, ub: impl IntoAffine) -> Result<Constraint> {
        let ub = ub.into_affine();
        if self.0.is_scalar() {
            Ok(Constraint::Meta(MetaKind::absolute_value(&self.0, &ub)?))
        } else {
            Constraint::soc(self.0.vectorize().with_string(self.0.string().to_string()), ub)
        }
    }

    /// `‖x‖² ≤ ub1·ub2`.
    pub fn squared_leq(&self, ub1: impl IntoAffine, ub2: impl IntoAffine) -> Result<Constraint> {
        Constraint::rsoc(
            self.0.vectorize().with_string(self.0.string().to_string()),
            ub1,
            ub2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{storage_factor, VarKind};
    use nalgebra::DVector;

    fn var(id: usize, name: &str, shape: Shape) -> AffExpr {
        AffExpr::from_variable(VarId(id), name, shape, storage_factor(VarKind::Continuous, shape))
    }

    fn leaf(c: Constraint) -> LeafKind {
        match c {
            Constraint::Leaf(k) => k,
            Constraint::Meta(_) => panic!("Expected leaf"),
        }
    }

    #[test]
    fn test_affine_broadcast_and_mismatch() {
        let x = var(0, "x", Shape::vector(3));
        let c = leaf(x.leq(1.0).unwrap());
        assert_eq!(c.size(), Shape::vector(3));
        assert_eq!(c.kind(), ConstraintKind::Affine);

        let y = var(1, "y", Shape::vector(2));
        assert!(matches!(
            x.leq(&y),
            Err(CvxError::DimensionMismatch { .. })
        ));

        let t = var(2, "t", Shape::scalar());
        let ge = leaf(t.geq(2.0).unwrap());
        assert!(ge.smaller().unwrap().is_constant());
        assert_eq!(ge.greater().unwrap().string(), "t");
    }

    #[test]
    fn test_bounded_linear_form_rows() {
        let x = var(0, "x", Shape::vector(2));
        // x + 1 <= 3  ->  x <= 2
        let c = leaf(x.plus(1.0).unwrap().leq(3.0).unwrap());
        let rows = c.sparse_ab_rows(&|_| Some(4), 6).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, vec![4]);
        assert_eq!(rows[1].0, vec![5]);
        assert!((rows[0].2 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_slacks() {
        let x = var(0, "x", Shape::vector(2));
        let t = var(1, "t", Shape::scalar());
        let mut vals = HashMap::new();
        vals.insert(VarId(0), DVector::from_vec(vec![3.0, 4.0]));
        vals.insert(VarId(1), DVector::from_vec(vec![6.0]));

        let soc = leaf(norm(&x).leq(&t).unwrap());
        assert!((soc.slack(&vals).unwrap()[(0, 0)] - 1.0).abs() < 1e-12);
        assert_eq!(soc.size(), Shape::vector(3));

        let rsoc = leaf(norm(&x).squared_leq(&t, 5.0).unwrap());
        assert!((rsoc.slack(&vals).unwrap()[(0, 0)] - 5.0).abs() < 1e-12);
        assert_eq!(rsoc.size(), Shape::vector(4));

        let eq = leaf(x.equals(3.0).unwrap());
        let s = eq.slack(&vals).unwrap();
        assert_eq!(s[(0, 0)], 0.0);
        assert_eq!(s[(1, 0)], -1.0);
    }

    #[test]
    fn test_exp_cone_slack_domain() {
        assert!((exp_cone_slack(2.0, 1.0, 0.0) - 1.0).abs() < 1e-12);
        assert_eq!(exp_cone_slack(1.0, 0.0, -1.0), 1.0);
        assert!(exp_cone_slack(5.0, -1.0, 0.0) < 0.0);
        assert!(exp_cone_slack(5.0, 0.0, 1.0) < 0.0);
    }

    #[test]
    fn test_scalar_norm_is_meta() {
        let x = var(0, "x", Shape::scalar());
        let t = var(1, "t", Shape::scalar());
        assert!(abs(&x).leq(&t).unwrap().is_meta());
    }

    #[test]
    fn test_lmi_semidef_candidate() {
        let shape = Shape::matrix(2, 2);
        let x = AffExpr::from_variable(VarId(3), "X", shape, storage_factor(VarKind::Symmetric, shape));
        let c = leaf(x.succeq(0.0).unwrap());
        let (id, _) = c.semidef_candidate().unwrap();
        assert_eq!(id, VarId(3));
        let shifted = leaf(x.succeq(1.0).unwrap());
        assert!(shifted.semidef_candidate().is_none());
    }

    #[test]
    fn test_min_eigenvalue() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]).map(|v| Complex::new(v, 0.0));
        assert!((min_hermitian_eigenvalue(&m) - 1.0).abs() < 1e-9);
    }
}
