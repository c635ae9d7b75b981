//! Meta constraints.
//!
//! A meta constraint is a relation realized by auxiliary variables and leaf
//! constraints. Expansion is a pure function of the inputs: it reserves
//! variable handles from a [`VarIdAllocator`] and returns an [`Expansion`]
//! that the owning problem splices in.

use std::collections::HashMap;
use std::fmt;

use nalgebra::DMatrix;

use super::builders;
use super::constraint::{Constraint, ConstraintId, DualValue, Relation};
use super::flow::FlowSpec;
use crate::error::{CvxError, Result};
use crate::expr::{
    storage_factor, AffExpr, IntoAffine, Shape, ValueSource, VarId, VarKind, VariableBuilder,
};

/// Stable identity of a meta constraint within a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaId(pub usize);

/// Handle returned when adding a constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintHandle {
    Leaf(ConstraintId),
    Meta(MetaId),
}

/// The abstract relations realized by expansion.
#[derive(Debug, Clone)]
pub enum MetaKind {
    /// `|x| ≤ t` for a scalar `x`.
    AbsoluteValue { x: AffExpr, t: AffExpr },
    /// `t ≤ (∏ xᵢ)^(1/m)`.
    GeoMean { x: AffExpr, t: AffExpr },
    /// `‖x‖_p ≤ t` for `p ≥ 1`, `‖x‖_p ≥ t` for `p < 1`.
    PNorm {
        x: AffExpr,
        p: f64,
        rel: Relation,
        t: AffExpr,
    },
    /// `t ≤ det(X)^(1/n)`.
    DetRootN { x: AffExpr, t: AffExpr },
    /// `log Σ exp(xᵢ) ≤ b` through exponential cones.
    LogSumExp { x: AffExpr, b: AffExpr },
    /// `Σ xᵢ log(xᵢ/yᵢ) ≤ t`; `y` defaults to ones (negative entropy).
    KullbackLeibler {
        x: AffExpr,
        y: Option<AffExpr>,
        t: AffExpr,
    },
    /// Network flow over a directed graph.
    Flow(FlowSpec),
}

fn scalar(e: AffExpr, what: &str) -> Result<AffExpr> {
    if !e.is_scalar() {
        return Err(CvxError::mismatch(format!("a scalar {}", what), e.shape()));
    }
    if !e.is_real() {
        return Err(CvxError::ComplexValued(format!("{} {}", what, e.string())));
    }
    Ok(e)
}

fn real(e: &AffExpr, what: &str) -> Result<()> {
    if e.is_real() {
        Ok(())
    } else {
        Err(CvxError::ComplexValued(format!("{} {}", what, e.string())))
    }
}

impl MetaKind {
    /// `|x| ≤ t`.
    pub fn absolute_value(x: &AffExpr, t: impl IntoAffine) -> Result<Self> {
        if !x.is_scalar() {
            return Err(CvxError::mismatch("a scalar", x.shape()));
        }
        Ok(MetaKind::AbsoluteValue {
            x: x.clone(),
            t: scalar(t.into_affine(), "bound")?,
        })
    }

    /// `t ≤ geomean(x)`.
    pub fn geomean(x: &AffExpr, t: impl IntoAffine) -> Result<Self> {
        real(x, "geometric mean of")?;
        if x.size() == 0 {
            return Err(CvxError::InvalidProblem("geometric mean of nothing".to_string()));
        }
        Ok(MetaKind::GeoMean {
            x: x.clone(),
            t: scalar(t.into_affine(), "bound")?,
        })
    }

    /// `‖x‖_p rel t`.
    pub fn pnorm(x: &AffExpr, p: f64, rel: Relation, t: impl IntoAffine) -> Result<Self> {
        real(x, "p-norm of")?;
        if p == 0.0 || p.is_nan() {
            return Err(CvxError::InvalidProblem(format!("p-norm with p = {}", p)));
        }
        let convex = p >= 1.0 && rel == Relation::Le;
        let concave = p < 1.0 && rel == Relation::Ge;
        if !(convex || concave) {
            return Err(CvxError::NonConvex(format!(
                "‖·‖_{} {} t",
                p,
                rel.as_str()
            )));
        }
        Ok(MetaKind::PNorm {
            x: x.clone(),
            p,
            rel,
            t: scalar(t.into_affine(), "bound")?,
        })
    }

    /// `t ≤ det(X)^(1/n)`.
    pub fn detrootn(x: &AffExpr, t: impl IntoAffine) -> Result<Self> {
        real(x, "determinant of")?;
        if !x.shape().is_square() {
            return Err(CvxError::mismatch("a square shape", x.shape()));
        }
        Ok(MetaKind::DetRootN {
            x: x.clone(),
            t: scalar(t.into_affine(), "bound")?,
        })
    }

    /// `log Σ exp(xᵢ) ≤ b`.
    pub fn log_sum_exp(x: &AffExpr, b: impl IntoAffine) -> Result<Self> {
        real(x, "log-sum-exp of")?;
        Ok(MetaKind::LogSumExp {
            x: x.clone(),
            b: scalar(b.into_affine(), "bound")?,
        })
    }

    /// `Σ xᵢ log(xᵢ/yᵢ) ≤ t`.
    pub fn kullback_leibler(x: &AffExpr, y: Option<&AffExpr>, t: impl IntoAffine) -> Result<Self> {
        real(x, "divergence of")?;
        if let Some(y) = y {
            real(y, "divergence of")?;
            if y.shape() != x.shape() {
                return Err(CvxError::mismatch(x.shape(), y.shape()));
            }
        }
        Ok(MetaKind::KullbackLeibler {
            x: x.clone(),
            y: y.cloned(),
            t: scalar(t.into_affine(), "bound")?,
        })
    }

    /// Short tag used in auxiliary names.
    pub fn tag(&self) -> &'static str {
        match self {
            MetaKind::AbsoluteValue { .. } => "abs",
            MetaKind::GeoMean { .. } => "geo",
            MetaKind::PNorm { .. } => "nrm",
            MetaKind::DetRootN { .. } => "dtr",
            MetaKind::LogSumExp { .. } => "lse",
            MetaKind::KullbackLeibler { .. } => "kul",
            MetaKind::Flow(_) => "flo",
        }
    }

    /// Expand into auxiliary variables and constraints.
    pub fn expand(&self, alloc: &mut VarIdAllocator) -> Result<Expansion> {
        let mut out = Expansion::new(self.to_string());
        match self {
            MetaKind::AbsoluteValue { x, t } => builders::absolute_value(&mut out, x, t)?,
            MetaKind::GeoMean { x, t } => builders::geomean(&mut out, alloc, x, t)?,
            MetaKind::PNorm { x, p, rel, t } => builders::pnorm(&mut out, alloc, x, *p, *rel, t)?,
            MetaKind::DetRootN { x, t } => builders::detrootn(&mut out, alloc, x, t)?,
            MetaKind::LogSumExp { x, b } => builders::log_sum_exp(&mut out, alloc, x, b)?,
            MetaKind::KullbackLeibler { x, y, t } => {
                builders::kullback_leibler(&mut out, alloc, x, y.as_ref(), t)?
            }
            MetaKind::Flow(spec) => spec.expand(&mut out, alloc)?,
        }
        Ok(out)
    }

    pub fn remap(&self, map: &HashMap<VarId, VarId>) -> MetaKind {
        match self {
            MetaKind::AbsoluteValue { x, t } => MetaKind::AbsoluteValue {
                x: x.remap(map),
                t: t.remap(map),
            },
            MetaKind::GeoMean { x, t } => MetaKind::GeoMean {
                x: x.remap(map),
                t: t.remap(map),
            },
            MetaKind::PNorm { x, p, rel, t } => MetaKind::PNorm {
                x: x.remap(map),
                p: *p,
                rel: *rel,
                t: t.remap(map),
            },
            MetaKind::DetRootN { x, t } => MetaKind::DetRootN {
                x: x.remap(map),
                t: t.remap(map),
            },
            MetaKind::LogSumExp { x, b } => MetaKind::LogSumExp {
                x: x.remap(map),
                b: b.remap(map),
            },
            MetaKind::KullbackLeibler { x, y, t } => MetaKind::KullbackLeibler {
                x: x.remap(map),
                y: y.as_ref().map(|y| y.remap(map)),
                t: t.remap(map),
            },
            MetaKind::Flow(spec) => MetaKind::Flow(spec.remap(map)),
        }
    }

    /// Signed distance to satisfaction from current values, where it has a
    /// closed form. Flow constraints return `None`.
    pub fn slack(&self, values: &dyn ValueSource) -> Result<Option<f64>> {
        let s = |e: &AffExpr| -> Result<f64> { Ok(e.eval(values)?[(0, 0)]) };
        let slack = match self {
            MetaKind::AbsoluteValue { x, t } => {
                let v = x.eval_complex(values)?[(0, 0)];
                s(t)? - v.norm()
            }
            MetaKind::GeoMean { x, t } => {
                let v = x.eval(values)?;
                let m = v.len() as f64;
                v.iter().map(|a| a.max(0.0).powf(1.0 / m)).product::<f64>() - s(t)?
            }
            MetaKind::PNorm { x, p, rel, t } => {
                let v = x.eval(values)?;
                let n = if p.is_infinite() {
                    v.iter().map(|a| a.abs()).fold(0.0, f64::max)
                } else {
                    v.iter().map(|a| a.abs().powf(*p)).sum::<f64>().powf(1.0 / p)
                };
                match rel {
                    Relation::Ge => n - s(t)?,
                    _ => s(t)? - n,
                }
            }
            MetaKind::DetRootN { x, t } => {
                let v = x.eval(values)?;
                let n = v.nrows() as f64;
                v.determinant().max(0.0).powf(1.0 / n) - s(t)?
            }
            MetaKind::LogSumExp { x, b } => {
                let v = x.eval(values)?;
                s(b)? - crate::expr::logsumexp::log_sum_exp(v.as_slice())
            }
            MetaKind::KullbackLeibler { x, y, t } => {
                let xv = x.eval(values)?;
                let yv = match y {
                    Some(y) => y.eval(values)?,
                    None => DMatrix::from_element(xv.nrows(), xv.ncols(), 1.0),
                };
                let div: f64 = xv
                    .iter()
                    .zip(yv.iter())
                    .map(|(a, b)| if *a == 0.0 { 0.0 } else { a * (a / b).ln() })
                    .sum();
                s(t)? - div
            }
            MetaKind::Flow(_) => return Ok(None),
        };
        Ok(Some(slack))
    }
}

impl fmt::Display for MetaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaKind::AbsoluteValue { x, t } => write!(f, "|{}| ≤ {}", x.string(), t.string()),
            MetaKind::GeoMean { x, t } => write!(f, "{} ≤ geomean({})", t.string(), x.string()),
            MetaKind::PNorm { x, p, rel, t } => {
                let p = if p.is_infinite() {
                    "∞".to_string()
                } else {
                    format!("{}", p)
                };
                write!(f, "‖{}‖_{} {} {}", x.string(), p, rel.as_str(), t.string())
            }
            MetaKind::DetRootN { x, t } => {
                write!(f, "{} ≤ det({})^(1/{})", t.string(), x.string(), x.shape().rows)
            }
            MetaKind::LogSumExp { x, b } => write!(f, "log∑exp({}) ≤ {}", x.string(), b.string()),
            MetaKind::KullbackLeibler { x, y, t } => match y {
                Some(y) => write!(f, "KL({}, {}) ≤ {}", x.string(), y.string(), t.string()),
                None => write!(f, "∑ {0}·log({0}) ≤ {1}", x.string(), t.string()),
            },
            MetaKind::Flow(spec) => write!(f, "{}", spec),
        }
    }
}

/// Hands out variable handles for auxiliary variables.
#[derive(Debug, Clone)]
pub struct VarIdAllocator {
    next: usize,
}

impl VarIdAllocator {
    pub fn new(next: usize) -> Self {
        VarIdAllocator { next }
    }

    pub fn fresh(&mut self) -> VarId {
        let id = VarId(self.next);
        self.next += 1;
        id
    }

    /// First handle not yet given out.
    pub fn peek(&self) -> usize {
        self.next
    }
}

/// An auxiliary variable requested by an expansion, with its reserved handle.
#[derive(Debug, Clone)]
pub struct AuxVar {
    pub id: VarId,
    pub builder: VariableBuilder,
}

/// Result of expanding a meta constraint.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub aux_vars: Vec<AuxVar>,
    pub aux_cons: Vec<Constraint>,
    pub string: String,
}

impl Expansion {
    pub fn new(string: String) -> Self {
        Expansion {
            aux_vars: Vec::new(),
            aux_cons: Vec::new(),
            string,
        }
    }

    /// Reserve an auxiliary variable and return its expression.
    pub fn add_var(&mut self, alloc: &mut VarIdAllocator, builder: VariableBuilder) -> AffExpr {
        let id = alloc.fresh();
        let shape: Shape = builder.shape();
        let kind = if builder.kind.is_complex() {
            VarKind::Continuous
        } else {
            builder.kind
        };
        let e = AffExpr::from_variable(id, builder.name(), shape, storage_factor(kind, shape));
        self.aux_vars.push(AuxVar { id, builder });
        e
    }

    pub fn push(&mut self, c: Constraint) {
        self.aux_cons.push(c);
    }
}

/// A meta constraint stored in a problem after splicing.
#[derive(Debug, Clone)]
pub struct MetaConstraint {
    pub id: MetaId,
    pub kind: MetaKind,
    /// Running meta ordinal used in auxiliary names.
    pub ordinal: usize,
    /// Prefixed auxiliary variable names and handles.
    pub aux_vars: Vec<(String, VarId)>,
    /// Auxiliary constraints in insertion order (leaves and nested metas).
    pub aux_cons: Vec<ConstraintHandle>,
    pub parent: Option<MetaId>,
    pub string: String,
    pub name: Option<String>,
}

impl MetaConstraint {
    /// Prefix of auxiliary names: `_` + tag + ordinal + `_`.
    pub fn prefix(&self) -> String {
        aux_prefix(self.kind.tag(), self.ordinal)
    }

    /// Dual value reconstructed from the auxiliary constraints' duals.
    /// Only the absolute value has one: `dual[1] - dual[0]` over the doubled
    /// affine constraint, or the cone dual of the complex case.
    pub fn dual(&self, leaf_dual: &dyn Fn(ConstraintId) -> Option<DualValue>) -> Option<DualValue> {
        let MetaKind::AbsoluteValue { x, .. } = &self.kind else {
            return None;
        };
        let ConstraintHandle::Leaf(id) = *self.aux_cons.first()? else {
            return None;
        };
        let d = leaf_dual(id)?;
        if !x.is_real() {
            return Some(d);
        }
        let m = d.as_real()?;
        let n = m.len() / 2;
        let out = DMatrix::from_fn(n, 1, |i, _| m[n + i] - m[i]);
        Some(DualValue::Real(out))
    }
}

pub(crate) fn aux_prefix(tag: &str, ordinal: usize) -> String {
    format!("_{}{}_", tag, ordinal)
}

impl Constraint {
    /// `|x| ≤ t` for a scalar `x`.
    pub fn absolute_value(x: &AffExpr, t: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Meta(MetaKind::absolute_value(x, t)?))
    }

    /// `t ≤ geomean(x)`.
    pub fn geomean(x: &AffExpr, t: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Meta(MetaKind::geomean(x, t)?))
    }

    /// `‖x‖_p ≤ t` (`p ≥ 1`) or `‖x‖_p ≥ t` (`p < 1`).
    pub fn pnorm(x: &AffExpr, p: f64, rel: Relation, t: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Meta(MetaKind::pnorm(x, p, rel, t)?))
    }

    /// `t ≤ det(X)^(1/n)`.
    pub fn detrootn(x: &AffExpr, t: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Meta(MetaKind::detrootn(x, t)?))
    }

    /// `log Σ exp(xᵢ) ≤ b` through exponential cones.
    pub fn log_sum_exp(x: &AffExpr, b: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Meta(MetaKind::log_sum_exp(x, b)?))
    }

    /// `Σ xᵢ log(xᵢ/yᵢ) ≤ t`.
    pub fn kullback_leibler(x: &AffExpr, y: Option<&AffExpr>, t: impl IntoAffine) -> Result<Self> {
        Ok(Constraint::Meta(MetaKind::kullback_leibler(x, y, t)?))
    }

    /// Network flow constraint.
    pub fn flow(spec: FlowSpec) -> Self {
        Constraint::Meta(MetaKind::Flow(spec))
    }
}
