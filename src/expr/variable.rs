//! Decision variables, their kinds, and vectorized storage.
//!
//! A variable owns a contiguous range `[start, end)` of scalar columns. Most
//! kinds store every entry; symmetric matrices store the scaled upper triangle
//! (svec) and antisymmetric matrices the strict upper triangle. The fixed
//! factor returned by [`storage_factor`] maps the stored degrees of freedom
//! back onto the full column-major matrix.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use super::affine::AffExpr;
use super::shape::Shape;
use crate::constraints::MetaId;
use crate::error::{CvxError, Result};
use crate::sparse::{csc_from_iter, csc_identity};

/// Stable handle of a variable within a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Domain of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarKind {
    Continuous,
    Integer,
    Binary,
    Symmetric,
    Antisymmetric,
    Complex,
    Hermitian,
    SemiContinuous,
    SemiInteger,
}

impl VarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarKind::Continuous => "continuous",
            VarKind::Integer => "integer",
            VarKind::Binary => "binary",
            VarKind::Symmetric => "symmetric",
            VarKind::Antisymmetric => "antisym",
            VarKind::Complex => "complex",
            VarKind::Hermitian => "hermitian",
            VarKind::SemiContinuous => "semicont",
            VarKind::SemiInteger => "semiint",
        }
    }

    /// Kinds that restrict values to integers.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            VarKind::Integer | VarKind::Binary | VarKind::SemiInteger
        )
    }

    /// Kinds realized as a pair of real variables.
    pub fn is_complex(&self) -> bool {
        matches!(self, VarKind::Complex | VarKind::Hermitian)
    }

    /// Kinds that need a square shape.
    pub fn is_square(&self) -> bool {
        matches!(
            self,
            VarKind::Symmetric | VarKind::Antisymmetric | VarKind::Hermitian
        )
    }

    /// Number of stored scalar columns for a variable of this kind and shape.
    pub fn dof(&self, shape: Shape) -> usize {
        match self {
            VarKind::Symmetric => shape.rows * (shape.rows + 1) / 2,
            VarKind::Antisymmetric => shape.rows * shape.rows.saturating_sub(1) / 2,
            _ => shape.size(),
        }
    }
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bound given to the builder: the same value for every entry, or one per entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Bound {
    Scalar(f64),
    Matrix(DMatrix<f64>),
}

impl From<f64> for Bound {
    fn from(v: f64) -> Self {
        Bound::Scalar(v)
    }
}

impl From<DMatrix<f64>> for Bound {
    fn from(m: DMatrix<f64>) -> Self {
        Bound::Matrix(m)
    }
}

/// Builder for adding variables to a problem.
///
/// ```ignore
/// let x = problem.add_variable(VariableBuilder::vector("x", 2).lower(0.0))?;
/// ```
#[derive(Clone, Debug)]
pub struct VariableBuilder {
    pub(crate) name: String,
    pub(crate) shape: Shape,
    pub(crate) kind: VarKind,
    pub(crate) lower: Option<Bound>,
    pub(crate) upper: Option<Bound>,
}

impl VariableBuilder {
    /// Create a new variable builder with the given name and shape.
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            kind: VarKind::Continuous,
            lower: None,
            upper: None,
        }
    }

    /// Create a scalar variable builder.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, Shape::scalar())
    }

    /// Create a vector variable builder.
    pub fn vector(name: impl Into<String>, n: usize) -> Self {
        Self::new(name, Shape::vector(n))
    }

    /// Create a matrix variable builder.
    pub fn matrix(name: impl Into<String>, m: usize, n: usize) -> Self {
        Self::new(name, Shape::matrix(m, n))
    }

    pub fn kind(mut self, kind: VarKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn integer(self) -> Self {
        self.kind(VarKind::Integer)
    }

    pub fn binary(self) -> Self {
        self.kind(VarKind::Binary)
    }

    pub fn symmetric(self) -> Self {
        self.kind(VarKind::Symmetric)
    }

    pub fn antisymmetric(self) -> Self {
        self.kind(VarKind::Antisymmetric)
    }

    pub fn complex(self) -> Self {
        self.kind(VarKind::Complex)
    }

    pub fn hermitian(self) -> Self {
        self.kind(VarKind::Hermitian)
    }

    /// Lower bound on every entry, or entrywise with a matrix.
    pub fn lower(mut self, bound: impl Into<Bound>) -> Self {
        self.lower = Some(bound.into());
        self
    }

    /// Upper bound on every entry, or entrywise with a matrix.
    pub fn upper(mut self, bound: impl Into<Bound>) -> Self {
        self.upper = Some(bound.into());
        self
    }

    /// Constrain the variable to be non-negative (x >= 0).
    pub fn nonneg(self) -> Self {
        self.lower(0.0)
    }

    /// Constrain the variable to be non-positive (x <= 0).
    pub fn nonpos(self) -> Self {
        self.upper(0.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub(crate) fn has_bounds(&self) -> bool {
        self.lower.is_some() || self.upper.is_some()
    }
}

/// A real variable stored in a problem's arena.
#[derive(Clone, Debug)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub shape: Shape,
    pub kind: VarKind,
    /// Per stored entry; infinite entries are unbounded.
    pub lower: Option<DVector<f64>>,
    pub upper: Option<DVector<f64>>,
    pub start: usize,
    pub end: usize,
    pub origin: Option<MetaId>,
    /// Set when a bare `X ⪰ 0` constraint is placed on this variable.
    pub semidef: bool,
    /// Value of the stored entries, set after solving or by the caller.
    pub value: Option<DVector<f64>>,
}

impl Variable {
    /// Scalar degrees of freedom, i.e. `end - start`.
    pub fn dof(&self) -> usize {
        self.end - self.start
    }

    /// Full-matrix expression of this variable.
    pub fn expr(&self) -> AffExpr {
        AffExpr::from_variable(
            self.id,
            &self.name,
            self.shape,
            storage_factor(self.kind, self.shape),
        )
    }

    /// Value as a full matrix.
    pub fn value_matrix(&self) -> Option<DMatrix<f64>> {
        self.value
            .as_ref()
            .map(|v| unpack(self.kind, self.shape, v))
    }

    /// Set the value from a full matrix.
    pub fn set_value_matrix(&mut self, m: &DMatrix<f64>) -> Result<()> {
        if (m.nrows(), m.ncols()) != (self.shape.rows, self.shape.cols) {
            return Err(CvxError::mismatch(
                self.shape,
                Shape::matrix(m.nrows(), m.ncols()),
            ));
        }
        self.value = Some(pack(self.kind, self.shape, m));
        Ok(())
    }

    pub fn has_bounds(&self) -> bool {
        self.lower.is_some() || self.upper.is_some()
    }

    /// Stored-entry bounds from the builder's entrywise bounds.
    pub(crate) fn bound_vector(
        kind: VarKind,
        shape: Shape,
        bound: &Bound,
    ) -> Result<DVector<f64>> {
        let full = match bound {
            Bound::Scalar(b) => DMatrix::from_element(shape.rows, shape.cols, *b),
            Bound::Matrix(m) => {
                if (m.nrows(), m.ncols()) != (shape.rows, shape.cols) {
                    return Err(CvxError::mismatch(
                        shape,
                        Shape::matrix(m.nrows(), m.ncols()),
                    ));
                }
                m.clone()
            }
        };
        Ok(pack(kind, shape, &full))
    }
}

/// Index of the upper-triangular entry `(i, j)`, `i <= j`, in svec order.
pub fn svec_index(i: usize, j: usize) -> usize {
    j * (j + 1) / 2 + i
}

/// Index of the strictly upper-triangular entry `(i, j)`, `i < j`.
pub fn antisym_index(i: usize, j: usize) -> usize {
    j * (j - 1) / 2 + i
}

/// Fixed `(size × dof)` factor reconstructing the full matrix of a variable.
pub fn storage_factor(kind: VarKind, shape: Shape) -> CscMatrix<f64> {
    let n = shape.rows;
    match kind {
        VarKind::Symmetric => {
            let s = std::f64::consts::FRAC_1_SQRT_2;
            let mut triplets = Vec::new();
            for j in 0..n {
                for i in 0..n {
                    let (a, b) = if i <= j { (i, j) } else { (j, i) };
                    let coef = if i == j { 1.0 } else { s };
                    triplets.push((shape.flat(i, j), svec_index(a, b), coef));
                }
            }
            csc_from_iter(shape.size(), kind.dof(shape), triplets)
        }
        VarKind::Antisymmetric => {
            let mut triplets = Vec::new();
            for j in 0..n {
                for i in 0..j {
                    let k = antisym_index(i, j);
                    triplets.push((shape.flat(i, j), k, 1.0));
                    triplets.push((shape.flat(j, i), k, -1.0));
                }
            }
            csc_from_iter(shape.size(), kind.dof(shape), triplets)
        }
        _ => csc_identity(shape.size()),
    }
}

/// Scaled upper-triangular vectorization of a symmetric matrix.
pub fn svec(m: &DMatrix<f64>) -> DVector<f64> {
    let n = m.nrows();
    let mut v = DVector::zeros(n * (n + 1) / 2);
    for j in 0..n {
        for i in 0..=j {
            v[svec_index(i, j)] = if i == j {
                m[(i, i)]
            } else {
                std::f64::consts::SQRT_2 * 0.5 * (m[(i, j)] + m[(j, i)])
            };
        }
    }
    v
}

/// Inverse of [`svec`].
pub fn svec_inverse(v: &DVector<f64>, n: usize) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(n, n);
    for j in 0..n {
        for i in 0..=j {
            let x = v[svec_index(i, j)];
            if i == j {
                m[(i, i)] = x;
            } else {
                m[(i, j)] = x * std::f64::consts::FRAC_1_SQRT_2;
                m[(j, i)] = m[(i, j)];
            }
        }
    }
    m
}

/// Stored entries of a full matrix.
pub fn pack(kind: VarKind, shape: Shape, m: &DMatrix<f64>) -> DVector<f64> {
    match kind {
        VarKind::Symmetric => svec(m),
        VarKind::Antisymmetric => {
            let n = shape.rows;
            let mut v = DVector::zeros(kind.dof(shape));
            for j in 0..n {
                for i in 0..j {
                    v[antisym_index(i, j)] = m[(i, j)];
                }
            }
            v
        }
        _ => DVector::from_column_slice(m.as_slice()),
    }
}

/// Full matrix of stored entries.
pub fn unpack(kind: VarKind, shape: Shape, v: &DVector<f64>) -> DMatrix<f64> {
    match kind {
        VarKind::Symmetric => svec_inverse(v, shape.rows),
        VarKind::Antisymmetric => {
            let n = shape.rows;
            let mut m = DMatrix::zeros(n, n);
            for j in 0..n {
                for i in 0..j {
                    m[(i, j)] = v[antisym_index(i, j)];
                    m[(j, i)] = -v[antisym_index(i, j)];
                }
            }
            m
        }
        _ => DMatrix::from_column_slice(shape.rows, shape.cols, v.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::csc_to_dense;

    #[test]
    fn test_variable_builder() {
        let b = VariableBuilder::vector("x", 5).nonneg().integer();
        assert_eq!(b.shape(), Shape::vector(5));
        assert_eq!(b.name(), "x");
        assert_eq!(b.kind, VarKind::Integer);
        assert_eq!(b.lower, Some(Bound::Scalar(0.0)));
        assert!(b.upper.is_none());
    }

    #[test]
    fn test_dof_counts() {
        assert_eq!(VarKind::Symmetric.dof(Shape::matrix(3, 3)), 6);
        assert_eq!(VarKind::Antisymmetric.dof(Shape::matrix(3, 3)), 3);
        assert_eq!(VarKind::Continuous.dof(Shape::matrix(3, 2)), 6);
    }

    #[test]
    fn test_svec_roundtrip_matches_factor() {
        let m = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 2.0, 4.0, 5.0, 3.0, 5.0, 6.0]);
        let v = svec(&m);
        assert_eq!(svec_inverse(&v, 3), m);

        let f = csc_to_dense(&storage_factor(VarKind::Symmetric, Shape::matrix(3, 3)));
        let full = f * &v;
        for k in 0..9 {
            assert!((full[k] - m.as_slice()[k]).abs() < 1e-12);
        }
        // inner products are preserved
        assert!((v.dot(&v) - m.dot(&m)).abs() < 1e-12);
    }

    #[test]
    fn test_antisym_storage() {
        let shape = Shape::matrix(3, 3);
        let v = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let m = unpack(VarKind::Antisymmetric, shape, &v);
        assert_eq!(m.transpose(), -&m);
        assert_eq!(pack(VarKind::Antisymmetric, shape, &m), v);
        let f = csc_to_dense(&storage_factor(VarKind::Antisymmetric, shape));
        assert_eq!(DMatrix::from_column_slice(3, 3, (f * &v).as_slice()), m);
    }

    #[test]
    fn test_symmetric_bounds_scaled() {
        let v = Variable::bound_vector(VarKind::Symmetric, Shape::matrix(2, 2), &Bound::Scalar(1.0))
            .unwrap();
        assert_eq!(v[0], 1.0);
        assert!((v[1] - std::f64::consts::SQRT_2).abs() < 1e-12);
        assert_eq!(v[2], 1.0);
    }
}
