//! Problem reformulations: copies, the SOCP cast of quadratics, the real
//! cast of complex problems, and the Lagrangian dual.

use std::collections::HashMap;

use nalgebra::{Cholesky, Complex, DMatrix, DVector, SymmetricEigen};
use nalgebra_sparse::CscMatrix;

use super::naming::fresh_name;
use super::{ComplexVar, Objective, ObjectiveExpr, Problem, Sense};
use crate::canon::{CanonicalForm, ConeBlock, FamilyDuals};
use crate::constraints::{
    Constraint, ConstraintExt, ConstraintHandle, ConstraintId, DualValue, Leaf, LeafKind,
    MetaConstraint, MetaId, Relation,
};
use crate::error::{CvxError, Result};
use crate::expr::{storage_factor, AffExpr, QuadExpr, Shape, VarId, VarKind, VariableBuilder};
use crate::sparse::{csc_from_iter, csc_mul, csc_select_rows, csc_transpose, dense_to_csc};

/// Eigenvalues below this make a quadratic form nonconvex.
const PSD_TOLERANCE: f64 = 1e-7;

/// Name of the auxiliary variable carrying a cast quadratic objective.
pub(crate) const OBJECTIVE_AUX: &str = "_obj_";

/// How the dual of a real-cast leaf maps back onto the complex original.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RealDual {
    Same,
    /// `(Re; Im)` equality of the given shape.
    EqSplit(Shape),
    /// Cone `(bounds; Re ne; Im ne)` with the given number of bound entries.
    ConeSplit(usize),
    /// `[[Re, -Im], [Im, Re]] ≽ 0` of the given side.
    LmiBlock(usize),
}

impl RealDual {
    pub(crate) fn map(&self, dual: DualValue) -> DualValue {
        let DualValue::Real(m) = &dual else {
            return dual;
        };
        match *self {
            RealDual::Same => dual,
            RealDual::EqSplit(shape) => {
                let n = shape.size();
                if m.len() != 2 * n {
                    return dual;
                }
                DualValue::Complex(DMatrix::from_fn(shape.rows, shape.cols, |i, j| {
                    let k = j * shape.rows + i;
                    Complex::new(m[k], m[n + k])
                }))
            }
            RealDual::ConeSplit(head) => {
                let n = m.len().saturating_sub(head) / 2;
                if m.len() != head + 2 * n {
                    return dual;
                }
                DualValue::Complex(DMatrix::from_fn(head + n, 1, |i, _| {
                    if i < head {
                        Complex::new(m[i], 0.0)
                    } else {
                        let k = i - head;
                        Complex::new(m[head + k], m[head + n + k])
                    }
                }))
            }
            RealDual::LmiBlock(n) => {
                if m.nrows() != 2 * n || m.ncols() != 2 * n {
                    return dual;
                }
                DualValue::Complex(DMatrix::from_fn(n, n, |i, j| {
                    Complex::new(
                        m[(i, j)] + m[(n + i, n + j)],
                        m[(n + i, j)] - m[(i, n + j)],
                    )
                }))
            }
        }
    }
}

/// Everything needed to map a solution of the dual problem back.
#[derive(Debug, Clone)]
pub(crate) struct DualMap {
    pub form: CanonicalForm,
    pub mue: Option<VarId>,
    pub mul: Option<VarId>,
    /// `(lbda, zs)` per second-order cone block.
    pub soc: Vec<(VarId, Option<VarId>)>,
    pub psd: Vec<VarId>,
    /// Position of the equality linking the dual variables; its dual is the
    /// primal solution.
    pub link: usize,
}

impl DualMap {
    /// Primal solution from the linking equality's dual.
    pub fn primal(&self, link_dual: &DualValue) -> Option<DVector<f64>> {
        let m = link_dual.as_real()?;
        (m.len() == self.form.ncols()).then(|| DVector::from_column_slice(m.as_slice()))
    }

    /// Duals of the primal constraints from the values of the dual variables.
    pub fn constraint_duals(&self, dual: &Problem) -> Option<Vec<Option<DualValue>>> {
        let value = |id: VarId| dual.variable(id).and_then(|v| v.value.clone());
        let eq = match self.mue {
            Some(id) => value(id)?,
            None => DVector::zeros(0),
        };
        let ineq = match self.mul {
            Some(id) => value(id)?,
            None => DVector::zeros(0),
        };
        let mut soc = Vec::with_capacity(self.soc.len());
        for (lbda, zs) in &self.soc {
            let head = value(*lbda)?;
            let tail = match zs {
                Some(z) => value(*z)?,
                None => DVector::zeros(0),
            };
            let v: Vec<f64> = head.iter().chain(tail.iter()).copied().collect();
            soc.push(DVector::from_vec(v));
        }
        let mut psd = Vec::with_capacity(self.psd.len());
        for id in &self.psd {
            psd.push(dual.variable(*id)?.value_matrix()?);
        }
        Some(self.form.constraint_duals(&FamilyDuals {
            eq,
            ineq,
            soc,
            exp: Vec::new(),
            psd,
        }))
    }
}

impl Problem {
    /// An independent copy with compacted handles: variables, constraints
    /// and meta constraints are renumbered in order, and no solver instance
    /// is carried over.
    pub fn copy(&self) -> Problem {
        let var_map: HashMap<VarId, VarId> = self
            .var_order
            .iter()
            .enumerate()
            .map(|(k, id)| (*id, VarId(k)))
            .collect();
        let meta_map: HashMap<MetaId, MetaId> = self
            .metas
            .keys()
            .enumerate()
            .map(|(k, id)| (*id, MetaId(k)))
            .collect();
        let con_map: HashMap<ConstraintId, ConstraintId> = self
            .constraints
            .iter()
            .enumerate()
            .map(|(k, c)| (c.id, ConstraintId(k)))
            .collect();
        let var = |id: &VarId| *var_map.get(id).unwrap_or(id);
        let meta = |id: &MetaId| *meta_map.get(id).unwrap_or(id);

        let variables = self
            .variables()
            .map(|v| {
                let mut v = v.clone();
                v.id = var(&v.id);
                v.origin = v.origin.as_ref().map(meta);
                (v.id, v)
            })
            .collect();
        let constraints = self
            .constraints
            .iter()
            .map(|c| Leaf {
                id: *con_map.get(&c.id).unwrap_or(&c.id),
                kind: c.kind.remap(&var_map),
                name: c.name.clone(),
                origin: c.origin.as_ref().map(meta),
                dual: c.dual.clone(),
            })
            .collect();
        let metas = self
            .metas
            .values()
            .map(|m| {
                let id = meta(&m.id);
                let copy = MetaConstraint {
                    id,
                    kind: m.kind.remap(&var_map),
                    ordinal: m.ordinal,
                    aux_vars: m.aux_vars.iter().map(|(n, v)| (n.clone(), var(v))).collect(),
                    aux_cons: m
                        .aux_cons
                        .iter()
                        .map(|h| match h {
                            ConstraintHandle::Leaf(c) => {
                                ConstraintHandle::Leaf(*con_map.get(c).unwrap_or(c))
                            }
                            ConstraintHandle::Meta(x) => ConstraintHandle::Meta(meta(x)),
                        })
                        .collect(),
                    parent: m.parent.as_ref().map(meta),
                    string: m.string.clone(),
                    name: m.name.clone(),
                };
                (id, copy)
            })
            .collect();

        Problem {
            variables,
            var_order: (0..self.var_order.len()).map(VarId).collect(),
            var_names: self
                .var_names
                .iter()
                .map(|(n, id)| (n.clone(), var(id)))
                .collect(),
            complex_vars: self
                .complex_vars
                .iter()
                .map(|(n, cv)| {
                    (
                        n.clone(),
                        ComplexVar {
                            re: var(&cv.re),
                            im: var(&cv.im),
                            kind: cv.kind,
                            shape: cv.shape,
                        },
                    )
                })
                .collect(),
            next_var_id: self.var_order.len(),
            number_of_vars: self.number_of_vars,
            constraints,
            next_constraint_id: self.constraints.len(),
            metas,
            next_meta_id: self.metas.len(),
            meta_ordinal: self.meta_ordinal,
            objective: Objective {
                sense: self.objective.sense,
                expr: self.objective.expr.as_ref().map(|e| e.remap(&var_map)),
            },
            counters: self.counters,
            groups: self.groups.clone(),
            numbering: self.numbering.clone(),
            complex: self.complex,
            options: self.options.clone(),
            instances: Default::default(),
        }
    }

    /// Replace quadratic constraints and a quadratic objective by rotated
    /// second-order cones.
    pub fn convert_quad_to_socp(&mut self) -> Result<()> {
        for pos in 0..self.constraints.len() {
            let LeafKind::Quad { le0 } = &self.constraints[pos].kind else {
                continue;
            };
            let rewritten = match self.quad2norm(le0)? {
                None => LeafKind::Affine {
                    lhs: le0.aff.clone(),
                    rel: Relation::Le,
                    rhs: AffExpr::scalar(0.0),
                },
                Some(ne) => LeafKind::Rsoc {
                    ne,
                    ub1: -&le0.aff,
                    ub2: AffExpr::scalar(1.0),
                },
            };
            self.counters.apply(&self.constraints[pos].kind, -1);
            self.counters.apply(&rewritten, 1);
            self.constraints[pos].kind = rewritten;
        }

        if let Some(ObjectiveExpr::Quadratic(q)) = self.objective.expr.clone() {
            let sense = self.objective.sense;
            if q.is_affine() {
                self.set_objective(sense, q.aff.clone())?;
            } else {
                let (norm_of, bound_sign) = match sense {
                    Sense::Maximize => (q.scale(-1.0), -1.0),
                    _ => (q.clone(), 1.0),
                };
                let ne = self.quad2norm(&norm_of)?.ok_or_else(|| {
                    CvxError::NumericalError("empty quadratic objective".to_string())
                })?;
                let name = fresh_name(OBJECTIVE_AUX, |n| {
                    self.var_names.contains_key(n) || self.complex_vars.contains_key(n)
                });
                let obj = self.add_variable(VariableBuilder::scalar(name))?;
                // min: ‖Vx‖² ≤ obj - aff; max: ‖Vx‖² ≤ aff - obj
                let ub = obj.minus(&q.aff)?.scale(bound_sign);
                self.add_constraint(Constraint::rsoc(ne, ub, 1.0)?)?;
                self.set_objective(sense, obj)?;
            }
        }
        self.instances.reset_all();
        tracing::debug!(
            component = "problem",
            operation = "convert_quad_to_socp",
            status = "success",
            cones = self.counters.cone,
            "Cast quadratics as cones"
        );
        Ok(())
    }

    /// A copy with quadratics cast as second-order cones.
    pub fn as_socp(&self) -> Result<Problem> {
        let mut p = self.copy();
        p.convert_quad_to_socp()?;
        Ok(p)
    }

    /// `V` with `VᵀV = Q` for the quadratic part of `q`, as the expression
    /// `V x`. `None` when the quadratic part vanishes.
    pub(crate) fn quad2norm(&self, q: &QuadExpr) -> Result<Option<AffExpr>> {
        // Local dense indexing over the variables of the quadratic part.
        let mut offsets: Vec<(VarId, usize, usize)> = Vec::new();
        let mut n = 0;
        for (a, b) in q.quad.keys() {
            for id in [a, b] {
                if !offsets.iter().any(|(v, _, _)| v == id) {
                    let dof = self
                        .variable(*id)
                        .map(|v| v.dof())
                        .ok_or_else(|| CvxError::UnknownVariable(id.to_string()))?;
                    offsets.push((*id, n, dof));
                    n += dof;
                }
            }
        }
        let offset_of = |id: &VarId| offsets.iter().find(|(v, _, _)| v == id).map(|o| o.1);

        let mut full = DMatrix::<f64>::zeros(n, n);
        for ((a, b), m) in &q.quad {
            let (Some(oa), Some(ob)) = (offset_of(a), offset_of(b)) else {
                continue;
            };
            for (r, c, v) in m.triplet_iter() {
                full[(oa + r, ob + c)] += 0.5 * v;
                full[(ob + c, oa + r)] += 0.5 * v;
            }
        }

        let support: Vec<usize> = (0..n)
            .filter(|&i| full.row(i).iter().any(|v| *v != 0.0))
            .collect();
        if support.is_empty() {
            return Ok(None);
        }
        let k = support.len();
        let reduced = DMatrix::from_fn(k, k, |i, j| full[(support[i], support[j])]);

        let v = match Cholesky::new(reduced.clone()) {
            Some(chol) => chol.l().transpose(),
            None => {
                let eig = SymmetricEigen::new(reduced);
                let min = eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
                if min < -PSD_TOLERANCE {
                    return Err(CvxError::NonConvex(format!(
                        "quadratic form of {} has eigenvalue {:.3e}",
                        q.string(),
                        min
                    )));
                }
                let keep: Vec<usize> = (0..k)
                    .filter(|&i| eig.eigenvalues[i] > PSD_TOLERANCE)
                    .collect();
                if keep.is_empty() {
                    return Ok(None);
                }
                DMatrix::from_fn(keep.len(), k, |r, c| {
                    eig.eigenvalues[keep[r]].sqrt() * eig.eigenvectors[(c, keep[r])]
                })
            }
        };

        let rows = v.nrows();
        let mut ne: Option<AffExpr> = None;
        for (id, offset, dof) in &offsets {
            let mut triplets = Vec::new();
            for (local, global) in support.iter().enumerate() {
                if *global >= *offset && *global < offset + dof {
                    for r in 0..rows {
                        let val = v[(r, local)];
                        if val != 0.0 {
                            triplets.push((r, global - offset, val));
                        }
                    }
                }
            }
            if triplets.is_empty() {
                continue;
            }
            let name = self.variable(*id).map_or(String::new(), |v| v.name.clone());
            let part = AffExpr::from_variable(
                *id,
                &name,
                Shape::vector(rows),
                csc_from_iter(rows, *dof, triplets),
            );
            ne = Some(match ne {
                Some(e) => e.plus(part)?,
                None => part,
            });
        }
        Ok(ne.map(|e| e.with_string(format!("V·x of {}", q.string()))))
    }

    /// A real problem equivalent to a complex one.
    ///
    /// # Errors
    ///
    /// `ComplexInequality` for inequalities between complex sides,
    /// `ComplexValued` for complex exponential cones or objectives.
    pub fn as_real(&self) -> Result<Problem> {
        self.real_cast().map(|(p, _)| p)
    }

    pub(crate) fn real_cast(&self) -> Result<(Problem, Vec<RealDual>)> {
        let mut p = self.clone();
        let mut maps = Vec::with_capacity(p.constraints.len());
        for leaf in p.constraints.iter_mut() {
            let (kind, map) = real_leaf(&leaf.kind)?;
            leaf.kind = kind;
            maps.push(map);
        }
        if let Some(ObjectiveExpr::Affine(a)) = &mut p.objective.expr {
            a.prune_imaginary();
            if !a.is_real() {
                return Err(CvxError::ComplexValued(format!("objective {}", a.string())));
            }
        }
        p.counters = p.recount();
        p.complex_vars.clear();
        p.complex = false;
        p.instances = Default::default();
        tracing::debug!(
            component = "problem",
            operation = "as_real",
            status = "success",
            constraints = p.constraints.len(),
            "Cast complex problem as real"
        );
        Ok((p, maps))
    }

    /// The Lagrangian dual of a continuous conic problem.
    ///
    /// # Errors
    ///
    /// `Dualization` for integer variables, log-sum-exp or exponential cone
    /// constraints and quadratic objectives; `QuadAsSocp` for quadratic
    /// constraints; `ComplexValued` for complex data.
    pub fn as_dual(&self) -> Result<Problem> {
        self.dualize().map(|(p, _)| p)
    }

    pub(crate) fn dualize(&self) -> Result<(Problem, DualMap)> {
        if !self.is_continuous() {
            return Err(CvxError::Dualization(
                "problems with integer variables have no conic dual".to_string(),
            ));
        }
        if self.counters.lse > 0 || matches!(self.objective.expr, Some(ObjectiveExpr::LogSumExp(_)))
        {
            return Err(CvxError::Dualization("a GP cannot be dualized".to_string()));
        }
        if self.counters.quad > 0 {
            return Err(CvxError::QuadAsSocp(
                "dualization needs quadratic constraints cast as cones".to_string(),
            ));
        }
        if self.is_complex() {
            return Err(CvxError::ComplexValued(
                "dualization needs a real problem".to_string(),
            ));
        }
        if self.counters.exp > 0 {
            return Err(CvxError::Dualization(
                "exponential cones are not dualized".to_string(),
            ));
        }
        if self.has_quad_objective() {
            return Err(CvxError::Dualization(
                "quadratic objectives must be cast as cones first".to_string(),
            ));
        }

        let form = CanonicalForm::from_problem(self)?;
        let ncols = form.ncols();
        let maximize = form.sense == Sense::Maximize;
        let mut dual = Problem::with_options(self.options.clone());

        // c + Gᵀλ = 0 for minimization, -c + Gᵀλ = 0 for maximization.
        let c_sign = if maximize { -1.0 } else { 1.0 };
        let mut link = AffExpr::constant(&DMatrix::from_column_slice(
            ncols,
            1,
            (&form.c * c_sign).as_slice(),
        ));
        // hᵀλ, subtracted from c0 for minimization and added for maximization.
        let mut price = AffExpr::scalar(0.0);

        let add_block = |dual: &mut Problem,
                             link: &mut AffExpr,
                             price: &mut AffExpr,
                             builder: VariableBuilder,
                             block: &ConeBlock,
                             rows: &[usize],
                             storage: Option<CscMatrix<f64>>|
         -> Result<VarId> {
            let name = builder.name.clone();
            dual.add_variable(builder)?;
            let id = dual
                .variable_by_name(&name)
                .map(|v| v.id)
                .ok_or_else(|| CvxError::UnknownVariable(name.clone()))?;
            let g = csc_transpose(&csc_select_rows(&block.g, rows));
            let h = dense_to_csc(&DMatrix::from_row_slice(
                1,
                rows.len(),
                &rows.iter().map(|r| block.h[*r]).collect::<Vec<_>>(),
            ));
            let (g, h) = match &storage {
                Some(s) => (csc_mul(&g, s), csc_mul(&h, s)),
                None => (g, h),
            };
            *link = link.plus(AffExpr::from_variable(id, &name, Shape::vector(ncols), g))?;
            *price = price.plus(AffExpr::from_variable(id, &name, Shape::scalar(), h))?;
            Ok(id)
        };

        let all = |b: &ConeBlock| (0..b.len()).collect::<Vec<_>>();
        let mue = if form.eq.is_empty() {
            None
        } else {
            let b = VariableBuilder::vector("mue", form.eq.len());
            Some(add_block(&mut dual, &mut link, &mut price, b, &form.eq, &all(&form.eq), None)?)
        };
        let mul = if form.ineq.is_empty() {
            None
        } else {
            let b = VariableBuilder::vector("mul", form.ineq.len()).lower(0.0);
            Some(add_block(&mut dual, &mut link, &mut price, b, &form.ineq, &all(&form.ineq), None)?)
        };
        let mut soc = Vec::with_capacity(form.soc.len());
        for (i, block) in form.soc.iter().enumerate() {
            let b = VariableBuilder::scalar(format!("lbda[{}]", i));
            let lbda = add_block(&mut dual, &mut link, &mut price, b, block, &[0], None)?;
            let zs = if block.len() > 1 {
                let b = VariableBuilder::vector(format!("zs[{}]", i), block.len() - 1);
                let rows: Vec<usize> = (1..block.len()).collect();
                Some(add_block(&mut dual, &mut link, &mut price, b, block, &rows, None)?)
            } else {
                None
            };
            soc.push((lbda, zs));
        }
        let mut psd = Vec::with_capacity(form.psd.len());
        for (j, (side, block)) in form.psd.iter().enumerate() {
            let b = VariableBuilder::matrix(format!("X[{}]", j), *side, *side).symmetric();
            let storage = storage_factor(VarKind::Symmetric, Shape::matrix(*side, *side));
            let x = add_block(&mut dual, &mut link, &mut price, b, block, &all(block), Some(storage))?;
            psd.push(x);
        }

        let link = link.with_string("c + Gᵀλ");
        dual.add_constraint(link.equals(0.0)?)?;
        for (lbda, zs) in &soc {
            let l = dual_var(&dual, *lbda)?;
            match zs {
                Some(z) => dual.add_constraint(Constraint::soc(dual_var(&dual, *z)?, l)?)?,
                None => dual.add_constraint(l.geq(0.0)?)?,
            };
        }
        for x in &psd {
            dual.add_constraint(dual_var(&dual, *x)?.succeq(0.0)?)?;
        }

        let c0 = AffExpr::scalar(form.c0);
        if maximize {
            dual.minimize(c0.plus(&price)?)?;
        } else {
            dual.maximize(c0.minus(&price)?)?;
        }

        let opts = &mut dual.options;
        std::mem::swap(&mut opts.noprimals, &mut opts.noduals);
        opts.solve_via_dual = Some(false);

        tracing::debug!(
            component = "problem",
            operation = "as_dual",
            status = "success",
            primal_columns = ncols,
            dual_columns = dual.number_of_vars,
            "Built dual problem"
        );
        Ok((
            dual,
            DualMap {
                form,
                mue,
                mul,
                soc,
                psd,
                link: 0,
            },
        ))
    }
}

fn dual_var(p: &Problem, id: VarId) -> Result<AffExpr> {
    p.variable(id)
        .map(|v| v.expr())
        .ok_or_else(|| CvxError::UnknownVariable(id.to_string()))
}

/// `(Re e; Im e)` as a column.
fn stacked(e: &AffExpr) -> Result<AffExpr> {
    AffExpr::vstack(&[e.real_part().vectorize(), e.imag_part().vectorize()])
}

fn real_leaf(kind: &LeafKind) -> Result<(LeafKind, RealDual)> {
    let mut kind = kind.clone();
    if !kind.prune_imaginary() {
        return Ok((kind, RealDual::Same));
    }
    match &kind {
        LeafKind::Affine { lhs, rel, rhs } => {
            if *rel != Relation::Eq {
                return Err(CvxError::ComplexInequality(kind.to_string()));
            }
            let diff = lhs.minus(rhs)?;
            let s = stacked(&diff)?;
            let zeros = AffExpr::zeros(s.shape());
            Ok((
                LeafKind::Affine {
                    lhs: s.with_string(diff.string().to_string()),
                    rel: Relation::Eq,
                    rhs: zeros,
                },
                RealDual::EqSplit(diff.shape()),
            ))
        }
        LeafKind::Soc { ne, ub } => Ok((
            LeafKind::Soc {
                ne: stacked(ne)?.with_string(ne.string().to_string()),
                ub: ub.clone(),
            },
            RealDual::ConeSplit(1),
        )),
        LeafKind::Rsoc { ne, ub1, ub2 } => Ok((
            LeafKind::Rsoc {
                ne: stacked(ne)?.with_string(ne.string().to_string()),
                ub1: ub1.clone(),
                ub2: ub2.clone(),
            },
            RealDual::ConeSplit(2),
        )),
        LeafKind::Lmi { lhs, rel, rhs } => {
            let d = match rel {
                Relation::Le => rhs.minus(lhs)?,
                _ => lhs.minus(rhs)?,
            };
            let (re, im) = (d.real_part(), d.imag_part());
            let block = AffExpr::block(&[vec![re.clone(), -&im], vec![im, re]])?;
            let n = d.shape().rows;
            Ok((
                LeafKind::Lmi {
                    lhs: block.with_string(d.string().to_string()),
                    rel: Relation::Ge,
                    rhs: AffExpr::zeros(Shape::matrix(2 * n, 2 * n)),
                },
                RealDual::LmiBlock(n),
            ))
        }
        _ => Err(CvxError::ComplexValued(kind.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintExt;

    #[test]
    fn test_quad2norm_reconstructs_form() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        let q = x
            .quad_form(&DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]))
            .unwrap();
        let ne = p.quad2norm(&q).unwrap().unwrap();

        let mut values = HashMap::new();
        values.insert(VarId(0), DVector::from_vec(vec![1.0, -3.0]));
        let v = ne.eval(&values).unwrap();
        let sq: f64 = v.iter().map(|a| a * a).sum();
        assert!((sq - q.eval(&values).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_quad2norm_nonconvex() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        let q = x
            .quad_form(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]))
            .unwrap();
        assert!(matches!(p.quad2norm(&q), Err(CvxError::NonConvex(_))));
    }

    #[test]
    fn test_socp_cast_idempotent() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        p.add_constraint(x.sqnorm().unwrap().leq(1.0).unwrap()).unwrap();
        p.minimize(x.sqnorm().unwrap().plus_affine(x.sum()).unwrap()).unwrap();

        let once = p.as_socp().unwrap();
        assert_eq!(once.counters().quad, 0);
        assert_eq!(once.counters().cone, 2);
        assert!(once.variable_by_name(OBJECTIVE_AUX).is_some());
        assert_eq!(once.counters(), &once.recount());

        let twice = once.as_socp().unwrap();
        assert_eq!(twice.counters(), once.counters());
        assert_eq!(twice.number_of_vars(), once.number_of_vars());
    }

    #[test]
    fn test_objective_aux_name_avoids_user_names() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        p.add_variable(VariableBuilder::scalar(OBJECTIVE_AUX)).unwrap();
        p.minimize(x.sqnorm().unwrap()).unwrap();

        let cast = p.as_socp().unwrap();
        let aux = format!("{}1", OBJECTIVE_AUX);
        assert!(cast.variable_by_name(&aux).is_some());
        assert_eq!(cast.number_of_vars(), p.number_of_vars() + 1);
        assert!(!cast.has_quad_objective());
    }

    #[test]
    fn test_real_cast_rejects_complex_inequality() {
        let mut p = Problem::new();
        let z = p.add_variable(VariableBuilder::vector("z", 2).complex()).unwrap();
        p.add_constraint(z.sum().leq(1.0).unwrap()).unwrap();
        assert!(matches!(p.as_real(), Err(CvxError::ComplexInequality(_))));
    }

    #[test]
    fn test_real_cast_equality() {
        let mut p = Problem::new();
        let z = p.add_variable(VariableBuilder::vector("z", 2).complex()).unwrap();
        let c = AffExpr::complex_constant(&DMatrix::from_element(2, 1, Complex::new(1.0, 2.0)));
        p.add_constraint(z.equals(c).unwrap()).unwrap();
        let (real, maps) = p.real_cast().unwrap();
        assert!(!real.is_complex());
        assert_eq!(real.counters().affine, 4);
        assert_eq!(maps, vec![RealDual::EqSplit(Shape::vector(2))]);

        let d = DualValue::Real(DMatrix::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]));
        let DualValue::Complex(m) = maps[0].map(d) else {
            panic!("expected a complex dual");
        };
        assert_eq!(m[(1, 0)], Complex::new(2.0, 4.0));
    }

    #[test]
    fn test_lmi_block_dual() {
        let z = DMatrix::from_fn(4, 4, |i, j| (i * 4 + j) as f64);
        let DualValue::Complex(m) = RealDual::LmiBlock(2).map(DualValue::Real(z.clone())) else {
            panic!("expected a complex dual");
        };
        assert_eq!(m[(0, 1)].re, z[(0, 1)] + z[(2, 3)]);
        assert_eq!(m[(0, 1)].im, z[(2, 1)] - z[(0, 3)]);
    }

    #[test]
    fn test_dual_structure() {
        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        p.add_constraint(x.sum().equals(1.0).unwrap()).unwrap();
        p.add_constraint(x.geq(0.0).unwrap()).unwrap();
        p.minimize(x.element(0).unwrap()).unwrap();

        let (dual, map) = p.dualize().unwrap();
        assert_eq!(map.link, 0);
        assert!(map.mue.is_some() && map.mul.is_some());
        assert_eq!(dual.objective().sense, Sense::Maximize);
        assert_eq!(dual.get_constraint(0).unwrap()[0].kind.size(), Shape::vector(2));
        assert_eq!(dual.options().solve_via_dual, Some(false));
    }

    #[test]
    fn test_dual_rejections() {
        let mut p = Problem::new();
        let n = p.add_variable(VariableBuilder::scalar("n").integer()).unwrap();
        p.minimize(n).unwrap();
        assert!(matches!(p.as_dual(), Err(CvxError::Dualization(_))));

        let mut p = Problem::new();
        let x = p.add_variable(VariableBuilder::vector("x", 2)).unwrap();
        p.add_constraint(x.sqnorm().unwrap().leq(1.0).unwrap()).unwrap();
        assert!(matches!(p.as_dual(), Err(CvxError::QuadAsSocp(_))));
    }

    #[test]
    fn test_copy_compacts_handles() {
        let mut p = Problem::new();
        p.add_variable(VariableBuilder::scalar("a")).unwrap();
        let b = p.add_variable(VariableBuilder::vector("b", 2)).unwrap();
        p.add_constraint(b.sum().leq(1.0).unwrap()).unwrap();
        p.remove_variable("a").unwrap();

        let q = p.copy();
        let bv = q.variable_by_name("b").unwrap();
        assert_eq!(bv.id, VarId(0));
        assert_eq!((bv.start, bv.end), (0, 2));
        assert!(q.constraints()[0].kind.variables().contains(&VarId(0)));
        assert_eq!(q.counters(), p.counters());
    }
}
