//! Quadratic expressions.
//!
//! A [`QuadExpr`] is `Σ xᵢᵀ Qᵢⱼ xⱼ + aff` where each `Qᵢⱼ` is a sparse matrix
//! over the stored entries of variables `i` and `j`, and `aff` is a real
//! scalar affine expression.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;

use super::affine::{AffExpr, IntoAffine, ValueSource};
use super::shape::Shape;
use super::variable::VarId;
use crate::error::{CvxError, Result};
use crate::sparse::{
    csc_add, csc_from_iter, csc_mul, csc_mul_vec, csc_nnz, csc_scale, csc_transpose,
    csc_tr_mul_vec, dense_to_csc,
};

/// A scalar quadratic expression.
#[derive(Debug, Clone)]
pub struct QuadExpr {
    /// Maps (var_i, var_j) -> coefficient for the x_i' Q_ij x_j term.
    pub quad: BTreeMap<(VarId, VarId), CscMatrix<f64>>,
    /// Affine part, a real scalar.
    pub aff: AffExpr,
    string: String,
}

impl QuadExpr {
    /// The bilinear form `vec(a)ᵀ M vec(b)` of two real affine expressions.
    pub fn bilinear(a: &AffExpr, m: &CscMatrix<f64>, b: &AffExpr) -> Result<QuadExpr> {
        if !a.is_real() || !b.is_real() {
            return Err(CvxError::ComplexValued(
                "quadratic forms need real operands".to_string(),
            ));
        }
        if m.nrows() != a.size() || m.ncols() != b.size() {
            return Err(CvxError::mismatch(
                format!("{}×{}", a.size(), b.size()),
                format!("{}×{}", m.nrows(), m.ncols()),
            ));
        }

        let mut quad = BTreeMap::new();
        for (ia, fa) in &a.re().factors {
            let fat_m = csc_mul(&csc_transpose(fa), m);
            for (ib, fb) in &b.re().factors {
                let q = csc_mul(&fat_m, fb);
                quad.entry((*ia, *ib))
                    .and_modify(|c| *c = csc_add(c, &q))
                    .or_insert(q);
            }
        }

        // Linear terms: cₐᵀ M F_b and F_aᵀ M c_b, plus the constant cₐᵀ M c_b.
        let ca = a.constant_vector();
        let cb = b.constant_vector();
        let mut aff = AffExpr::scalar(ca.dot(&csc_mul_vec(m, &cb)));
        let row_a = csc_tr_mul_vec(m, &ca);
        for (ib, fb) in &b.re().factors {
            let coef = csc_tr_mul_vec(fb, &row_a);
            aff = aff.plus(row_factor(*ib, &coef))?;
        }
        let col_b = csc_mul_vec(m, &cb);
        for (ia, fa) in &a.re().factors {
            let coef = csc_tr_mul_vec(fa, &col_b);
            aff = aff.plus(row_factor(*ia, &coef))?;
        }

        Ok(QuadExpr {
            quad,
            aff,
            string: String::new(),
        })
    }

    /// A quadratic expression without quadratic terms.
    pub fn from_affine(aff: AffExpr) -> Result<QuadExpr> {
        if !aff.is_scalar() || !aff.is_real() {
            return Err(CvxError::mismatch("a real scalar", aff.shape()));
        }
        let string = aff.string().to_string();
        Ok(QuadExpr {
            quad: BTreeMap::new(),
            aff,
            string,
        })
    }

    pub fn string(&self) -> &str {
        &self.string
    }

    pub fn with_string(mut self, s: impl Into<String>) -> Self {
        self.string = s.into();
        self
    }

    /// Check if this is purely affine (no quadratic terms).
    pub fn is_affine(&self) -> bool {
        self.quad.values().all(|q| csc_nnz(q) == 0)
    }

    /// Number of non-zero quadratic coefficients.
    pub fn nnz(&self) -> usize {
        self.quad.values().map(csc_nnz).sum()
    }

    /// Add two quadratic expressions.
    pub fn plus(&self, other: &QuadExpr) -> Result<QuadExpr> {
        let mut quad = self.quad.clone();
        for (key, coeff) in &other.quad {
            quad.entry(*key)
                .and_modify(|c| *c = csc_add(c, coeff))
                .or_insert_with(|| coeff.clone());
        }
        Ok(QuadExpr {
            quad,
            aff: self.aff.plus(&other.aff)?,
            string: format!("{} + {}", self.string, other.string),
        })
    }

    /// Add an affine scalar.
    pub fn plus_affine(&self, other: impl IntoAffine) -> Result<QuadExpr> {
        let other = other.into_affine();
        let string = format!("{} + {}", self.string, other.string());
        Ok(QuadExpr {
            quad: self.quad.clone(),
            aff: self.aff.plus(other)?,
            string,
        })
    }

    /// Subtract an affine scalar.
    pub fn minus_affine(&self, other: impl IntoAffine) -> Result<QuadExpr> {
        let other = other.into_affine();
        let string = format!("{} - {}", self.string, other.string());
        Ok(self.plus_affine(-other)?.with_string(string))
    }

    /// Scale by a scalar.
    pub fn scale(&self, scalar: f64) -> QuadExpr {
        let quad = self
            .quad
            .iter()
            .map(|(k, v)| (*k, csc_scale(v, scalar)))
            .collect();
        QuadExpr {
            quad,
            aff: self.aff.scale(scalar),
            string: format!("{}·({})", scalar, self.string),
        }
    }

    /// Get all variable IDs in this expression.
    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut vars = self.aff.variables();
        for (v1, v2) in self.quad.keys() {
            vars.insert(*v1);
            vars.insert(*v2);
        }
        vars
    }

    pub fn remap(&self, map: &HashMap<VarId, VarId>) -> QuadExpr {
        let m = |id: &VarId| *map.get(id).unwrap_or(id);
        QuadExpr {
            quad: self
                .quad
                .iter()
                .map(|((a, b), q)| ((m(a), m(b)), q.clone()))
                .collect(),
            aff: self.aff.remap(map),
            string: self.string.clone(),
        }
    }

    /// Numeric value.
    pub fn eval(&self, values: &dyn ValueSource) -> Result<f64> {
        let mut total = self.aff.eval(values)?[(0, 0)];
        for ((a, b), q) in &self.quad {
            let missing = |id: &VarId| {
                CvxError::InvalidProblem(format!("variable {} has no value", id))
            };
            let va = values.value_of(*a).ok_or_else(|| missing(a))?;
            let vb = values.value_of(*b).ok_or_else(|| missing(b))?;
            total += va.dot(&csc_mul_vec(q, vb));
        }
        Ok(total)
    }

    /// `self ≤ rhs` as a quadratic constraint expression `self - rhs`.
    pub(crate) fn difference(&self, rhs: impl IntoAffine) -> Result<QuadExpr> {
        self.minus_affine(rhs)
    }
}

fn row_factor(id: VarId, coef: &nalgebra::DVector<f64>) -> AffExpr {
    let m = csc_from_iter(
        1,
        coef.len(),
        coef.iter().enumerate().map(|(k, v)| (0, k, *v)),
    );
    AffExpr::from_variable(id, "", Shape::scalar(), m)
}

impl fmt::Display for QuadExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string)
    }
}

impl AffExpr {
    /// Squared Euclidean norm `‖self‖²` of a real expression.
    pub fn sqnorm(&self) -> Result<QuadExpr> {
        let id = crate::sparse::csc_identity(self.size());
        Ok(QuadExpr::bilinear(self, &id, self)?
            .with_string(format!("‖{}‖²", self.string())))
    }

    /// Product of two real scalar expressions.
    pub fn times(&self, other: &AffExpr) -> Result<QuadExpr> {
        if !self.is_scalar() || !other.is_scalar() {
            return Err(CvxError::mismatch("scalars", format!("{} and {}", self.shape(), other.shape())));
        }
        let one = crate::sparse::csc_identity(1);
        let string = format!("{}·{}", self.string(), other.string());
        Ok(QuadExpr::bilinear(self, &one, other)?.with_string(string))
    }

    /// Quadratic form `vec(self)ᵀ Q vec(self)`.
    pub fn quad_form(&self, q: &DMatrix<f64>) -> Result<QuadExpr> {
        let string = format!("{}ᵀ·[{}×{}]·{}", self.string(), q.nrows(), q.ncols(), self.string());
        Ok(QuadExpr::bilinear(self, &dense_to_csc(q), self)?.with_string(string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::variable::{storage_factor, VarKind};
    use nalgebra::DVector;

    fn var(id: usize, shape: Shape) -> AffExpr {
        AffExpr::from_variable(VarId(id), "x", shape, storage_factor(VarKind::Continuous, shape))
    }

    #[test]
    fn test_sqnorm_value() {
        let x = var(0, Shape::vector(2));
        let q = x.minus(1.0).unwrap().sqnorm().unwrap();
        let mut vals = HashMap::new();
        vals.insert(VarId(0), DVector::from_vec(vec![3.0, -1.0]));
        // (3-1)² + (-1-1)² = 8
        assert!((q.eval(&vals).unwrap() - 8.0).abs() < 1e-12);
        assert_eq!(q.nnz(), 2);
    }

    #[test]
    fn test_scalar_product() {
        let x = var(0, Shape::scalar());
        let y = var(1, Shape::scalar());
        let q = x.plus(2.0).unwrap().times(&y).unwrap();
        let mut vals = HashMap::new();
        vals.insert(VarId(0), DVector::from_vec(vec![1.0]));
        vals.insert(VarId(1), DVector::from_vec(vec![4.0]));
        assert!((q.eval(&vals).unwrap() - 12.0).abs() < 1e-12);
        assert_eq!(q.variables().len(), 2);
    }

    #[test]
    fn test_quad_form_and_affine() {
        let x = var(0, Shape::vector(2));
        let q = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
        let e = x.quad_form(&q).unwrap().plus_affine(x.sum()).unwrap();
        let mut vals = HashMap::new();
        vals.insert(VarId(0), DVector::from_vec(vec![1.0, 2.0]));
        assert!((e.eval(&vals).unwrap() - 9.0).abs() < 1e-12);
        assert!(!e.is_affine());
        assert!(QuadExpr::from_affine(x.sum()).unwrap().is_affine());
    }
}
