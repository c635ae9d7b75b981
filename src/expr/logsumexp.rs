//! Log-sum-exp expressions, the building block of geometric programs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::affine::{AffExpr, IntoAffine, ValueSource};
use super::variable::VarId;
use crate::error::{CvxError, Result};

/// `log Σᵢ exp(aᵢ)` over the entries of a real affine expression.
#[derive(Debug, Clone)]
pub struct LseExpr {
    pub exponents: AffExpr,
}

/// Log-sum-exp of the entries of `a`.
pub fn lse(a: &AffExpr) -> Result<LseExpr> {
    LseExpr::new(a.clone())
}

impl LseExpr {
    pub fn new(exponents: AffExpr) -> Result<Self> {
        if !exponents.is_real() {
            return Err(CvxError::ComplexValued(format!(
                "log-sum-exp of {}",
                exponents.string()
            )));
        }
        Ok(LseExpr { exponents })
    }

    /// Number of exponentials summed.
    pub fn len(&self) -> usize {
        self.exponents.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn variables(&self) -> BTreeSet<VarId> {
        self.exponents.variables()
    }

    pub fn remap(&self, map: &HashMap<VarId, VarId>) -> LseExpr {
        LseExpr {
            exponents: self.exponents.remap(map),
        }
    }

    /// `self - b` as the log-sum-exp of the shifted exponents.
    pub fn shifted(&self, b: impl IntoAffine) -> Result<LseExpr> {
        let b = b.into_affine();
        if !b.is_scalar() {
            return Err(CvxError::mismatch("a scalar", b.shape()));
        }
        let string = format!("{} - {}", self, b.string());
        LseExpr::new(self.exponents.minus(b)?.with_string(string))
    }

    /// Numeric value, computed stably.
    pub fn eval(&self, values: &dyn ValueSource) -> Result<f64> {
        let a = self.exponents.eval(values)?;
        Ok(log_sum_exp(a.as_slice()))
    }
}

/// Stable `log Σ exp(aᵢ)`.
pub fn log_sum_exp(a: &[f64]) -> f64 {
    let max = a.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + a.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

impl fmt::Display for LseExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log∑exp({})", self.exponents.string())
    }
}
