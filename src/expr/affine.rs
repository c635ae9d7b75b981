//! Affine expressions.
//!
//! An [`AffExpr`] is a map from variables to sparse coefficient matrices plus
//! an optional constant. Rows of every coefficient matrix enumerate the
//! flattened (column-major) entries of the expression; columns enumerate the
//! stored entries of the variable. Complex expressions carry a second linear
//! part for the imaginary component; both parts range over real variables.
//!
//! Structural operations (transpose, indexing, stacking, sums, products with
//! constant matrices) are all expressed as a left multiplication of both
//! parts by a sparse row transform.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::{Mul, Neg};

use nalgebra::{Complex, DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use super::shape::Shape;
use super::variable::VarId;
use crate::error::{CvxError, Result};
use crate::sparse::{
    csc_add, csc_from_iter, csc_identity, csc_is_zero, csc_kron, csc_mul, csc_mul_vec,
    csc_scale, dense_to_csc,
};

/// Source of variable values for evaluating expressions.
pub trait ValueSource {
    /// Stored-entry value of a variable, if it has one.
    fn value_of(&self, id: VarId) -> Option<&DVector<f64>>;
}

impl ValueSource for HashMap<VarId, DVector<f64>> {
    fn value_of(&self, id: VarId) -> Option<&DVector<f64>> {
        self.get(&id)
    }
}

/// Real linear map over variables plus a constant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearPart {
    pub factors: BTreeMap<VarId, CscMatrix<f64>>,
    pub constant: Option<DVector<f64>>,
}

impl LinearPart {
    fn constant(c: DVector<f64>) -> Self {
        LinearPart {
            factors: BTreeMap::new(),
            constant: Some(c),
        }
    }

    /// True if no factor and no constant is non-zero.
    pub fn is_zero(&self) -> bool {
        self.factors.values().all(csc_is_zero)
            && self
                .constant
                .as_ref()
                .map_or(true, |c| c.iter().all(|v| *v == 0.0))
    }

    fn plus(&self, other: &LinearPart) -> LinearPart {
        let mut factors = self.factors.clone();
        for (id, m) in &other.factors {
            let sum = match factors.get(id) {
                Some(existing) => csc_add(existing, m),
                None => m.clone(),
            };
            factors.insert(*id, sum);
        }
        let constant = match (&self.constant, &other.constant) {
            (Some(a), Some(b)) => Some(a + b),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        LinearPart { factors, constant }
    }

    fn scale(&self, a: f64) -> LinearPart {
        LinearPart {
            factors: self
                .factors
                .iter()
                .map(|(id, m)| (*id, csc_scale(m, a)))
                .collect(),
            constant: self.constant.as_ref().map(|c| c * a),
        }
    }

    /// Apply the row transform `t` to every factor and the constant.
    fn left(&self, t: &CscMatrix<f64>) -> LinearPart {
        LinearPart {
            factors: self
                .factors
                .iter()
                .map(|(id, m)| (*id, csc_mul(t, m)))
                .collect(),
            constant: self.constant.as_ref().map(|c| csc_mul_vec(t, c)),
        }
    }

    fn remap(&self, map: &HashMap<VarId, VarId>) -> LinearPart {
        LinearPart {
            factors: self
                .factors
                .iter()
                .map(|(id, m)| (*map.get(id).unwrap_or(id), m.clone()))
                .collect(),
            constant: self.constant.clone(),
        }
    }

    fn prune(&mut self) {
        self.factors.retain(|_, m| !csc_is_zero(m));
    }

    fn eval(&self, size: usize, values: &dyn ValueSource) -> Result<DVector<f64>> {
        let mut out = self
            .constant
            .clone()
            .unwrap_or_else(|| DVector::zeros(size));
        for (id, m) in &self.factors {
            let v = values.value_of(*id).ok_or_else(|| {
                CvxError::InvalidProblem(format!("variable {} has no value", id))
            })?;
            if v.len() != m.ncols() {
                return Err(CvxError::mismatch(m.ncols(), v.len()));
            }
            out += csc_mul_vec(m, v);
        }
        Ok(out)
    }
}

/// Affine (possibly complex) matrix expression.
#[derive(Clone, Debug)]
pub struct AffExpr {
    shape: Shape,
    re: LinearPart,
    im: Option<LinearPart>,
    string: String,
}

/// Conversion into an affine expression, used by arithmetic and comparisons.
pub trait IntoAffine {
    fn into_affine(self) -> AffExpr;
}

impl IntoAffine for AffExpr {
    fn into_affine(self) -> AffExpr {
        self
    }
}

impl IntoAffine for &AffExpr {
    fn into_affine(self) -> AffExpr {
        self.clone()
    }
}

impl IntoAffine for f64 {
    fn into_affine(self) -> AffExpr {
        AffExpr::scalar(self)
    }
}

impl IntoAffine for DMatrix<f64> {
    fn into_affine(self) -> AffExpr {
        AffExpr::constant(&self)
    }
}

impl IntoAffine for &DMatrix<f64> {
    fn into_affine(self) -> AffExpr {
        AffExpr::constant(self)
    }
}

impl IntoAffine for DVector<f64> {
    fn into_affine(self) -> AffExpr {
        AffExpr::constant(&DMatrix::from_column_slice(self.len(), 1, self.as_slice()))
    }
}

fn fmt_num(v: f64) -> String {
    format!("{}", v)
}

fn wrap(s: &str) -> String {
    if s.contains(' ') {
        format!("({})", s)
    } else {
        s.to_string()
    }
}

impl AffExpr {
    /// Expression of a variable with the given storage factor.
    pub fn from_variable(id: VarId, name: &str, shape: Shape, factor: CscMatrix<f64>) -> Self {
        let mut factors = BTreeMap::new();
        factors.insert(id, factor);
        AffExpr {
            shape,
            re: LinearPart {
                factors,
                constant: None,
            },
            im: None,
            string: name.to_string(),
        }
    }

    /// Constant matrix expression.
    pub fn constant(m: &DMatrix<f64>) -> Self {
        let string = if m.len() == 1 {
            fmt_num(m[(0, 0)])
        } else {
            format!("[{}×{}]", m.nrows(), m.ncols())
        };
        AffExpr {
            shape: Shape::matrix(m.nrows(), m.ncols()),
            re: LinearPart::constant(DVector::from_column_slice(m.as_slice())),
            im: None,
            string,
        }
    }

    /// Complex constant matrix expression.
    pub fn complex_constant(m: &DMatrix<Complex<f64>>) -> Self {
        let re = m.map(|c| c.re);
        let im = m.map(|c| c.im);
        let mut e = AffExpr::constant(&re);
        e.im = Some(LinearPart::constant(DVector::from_column_slice(im.as_slice())));
        e.prune_imaginary();
        if m.len() == 1 {
            e.string = format!("{}", m[(0, 0)]);
        }
        e
    }

    pub fn scalar(v: f64) -> Self {
        AffExpr::constant(&DMatrix::from_element(1, 1, v))
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let mut e = AffExpr::constant(&DMatrix::zeros(shape.rows, shape.cols));
        e.string = "0".to_string();
        e
    }

    pub fn ones(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let mut e = AffExpr::constant(&DMatrix::from_element(shape.rows, shape.cols, 1.0));
        e.string = "|1|".to_string();
        e
    }

    /// Identity matrix expression.
    pub fn identity(n: usize) -> Self {
        let mut e = AffExpr::constant(&DMatrix::identity(n, n));
        e.string = "I".to_string();
        e
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn size(&self) -> usize {
        self.shape.size()
    }

    pub fn string(&self) -> &str {
        &self.string
    }

    /// Rename the expression's display string.
    pub fn with_string(mut self, s: impl Into<String>) -> Self {
        self.string = s.into();
        self
    }

    pub fn re(&self) -> &LinearPart {
        &self.re
    }

    pub fn im(&self) -> Option<&LinearPart> {
        self.im.as_ref()
    }

    pub fn is_real(&self) -> bool {
        self.im.is_none()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }

    pub fn is_constant(&self) -> bool {
        self.re.factors.is_empty()
            && self.im.as_ref().map_or(true, |im| im.factors.is_empty())
    }

    /// Variables with a factor in either part.
    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut ids: BTreeSet<VarId> = self.re.factors.keys().copied().collect();
        if let Some(im) = &self.im {
            ids.extend(im.factors.keys().copied());
        }
        ids
    }

    pub fn factor(&self, id: VarId) -> Option<&CscMatrix<f64>> {
        self.re.factors.get(&id)
    }

    /// Real constant term, zero if absent.
    pub fn constant_vector(&self) -> DVector<f64> {
        self.re
            .constant
            .clone()
            .unwrap_or_else(|| DVector::zeros(self.size()))
    }

    /// Drop an imaginary part that is identically zero. Returns true if dropped.
    pub fn prune_imaginary(&mut self) -> bool {
        let zero = match &mut self.im {
            Some(im) => {
                im.prune();
                im.is_zero()
            }
            None => false,
        };
        if zero {
            self.im = None;
        }
        zero
    }

    /// Real part as a real expression.
    pub fn real_part(&self) -> AffExpr {
        AffExpr {
            shape: self.shape,
            re: self.re.clone(),
            im: None,
            string: format!("Re({})", self.string),
        }
    }

    /// Imaginary part as a real expression.
    pub fn imag_part(&self) -> AffExpr {
        AffExpr {
            shape: self.shape,
            re: self.im.clone().unwrap_or_default(),
            im: None,
            string: format!("Im({})", self.string),
        }
    }

    /// Broadcast a scalar to `shape`; other shapes must already match.
    pub fn broadcast_to(&self, shape: Shape) -> Result<AffExpr> {
        if self.shape == shape {
            return Ok(self.clone());
        }
        if !self.is_scalar() {
            return Err(CvxError::mismatch(shape, self.shape));
        }
        let t = csc_from_iter(shape.size(), 1, (0..shape.size()).map(|k| (k, 0, 1.0)));
        Ok(self.transform(&t, shape, self.string.clone()))
    }

    fn transform(&self, t: &CscMatrix<f64>, shape: Shape, string: String) -> AffExpr {
        AffExpr {
            shape,
            re: self.re.left(t),
            im: self.im.as_ref().map(|im| im.left(t)),
            string,
        }
    }

    fn common_shape(&self, other: &AffExpr) -> Result<Shape> {
        if self.shape == other.shape || other.is_scalar() {
            Ok(self.shape)
        } else if self.is_scalar() {
            Ok(other.shape)
        } else {
            Err(CvxError::mismatch(self.shape, other.shape))
        }
    }

    /// `self + other`, broadcasting scalars.
    pub fn plus(&self, other: impl IntoAffine) -> Result<AffExpr> {
        let other = other.into_affine();
        let shape = self.common_shape(&other)?;
        let a = self.broadcast_to(shape)?;
        let b = other.broadcast_to(shape)?;
        let im = match (&a.im, &b.im) {
            (Some(x), Some(y)) => Some(x.plus(y)),
            (Some(x), None) => Some(x.clone()),
            (None, Some(y)) => Some(y.clone()),
            (None, None) => None,
        };
        let string = if b.string.starts_with('-') {
            format!("{} - {}", a.string, &b.string[1..])
        } else {
            format!("{} + {}", a.string, b.string)
        };
        Ok(AffExpr {
            shape,
            re: a.re.plus(&b.re),
            im,
            string,
        })
    }

    /// `self - other`, broadcasting scalars.
    pub fn minus(&self, other: impl IntoAffine) -> Result<AffExpr> {
        let other = other.into_affine();
        let string = format!("{} - {}", self.string, wrap(&other.string));
        Ok(self.plus(other.neg_expr())?.with_string(string))
    }

    fn neg_expr(&self) -> AffExpr {
        AffExpr {
            shape: self.shape,
            re: self.re.scale(-1.0),
            im: self.im.as_ref().map(|im| im.scale(-1.0)),
            string: format!("-{}", wrap(&self.string)),
        }
    }

    /// Multiply by a real scalar.
    pub fn scale(&self, a: f64) -> AffExpr {
        AffExpr {
            shape: self.shape,
            re: self.re.scale(a),
            im: self.im.as_ref().map(|im| im.scale(a)),
            string: format!("{}·{}", fmt_num(a), wrap(&self.string)),
        }
    }

    /// Multiply by a complex scalar.
    pub fn scale_complex(&self, a: Complex<f64>) -> AffExpr {
        let zero = LinearPart::default();
        let im = self.im.as_ref().unwrap_or(&zero);
        let re = self.re.scale(a.re).plus(&im.scale(-a.im));
        let new_im = im.scale(a.re).plus(&self.re.scale(a.im));
        let mut e = AffExpr {
            shape: self.shape,
            re,
            im: Some(new_im),
            string: format!("({})·{}", a, wrap(&self.string)),
        };
        e.prune_imaginary();
        e
    }

    /// Left product `A·self` with a constant matrix. A scalar expression
    /// times a matrix scales the whole matrix.
    pub fn lmul(&self, a: &DMatrix<f64>) -> Result<AffExpr> {
        let string = format!("{}·{}", matrix_label(a), wrap(&self.string));
        if self.is_scalar() && a.ncols() != 1 {
            let t = dense_to_csc(&DMatrix::from_column_slice(a.len(), 1, a.as_slice()));
            return Ok(self.transform(&t, Shape::matrix(a.nrows(), a.ncols()), string));
        }
        if a.ncols() != self.shape.rows {
            return Err(CvxError::mismatch(
                format!("{} rows", a.ncols()),
                self.shape,
            ));
        }
        let t = csc_kron(&csc_identity(self.shape.cols), &dense_to_csc(a));
        Ok(self.transform(&t, Shape::matrix(a.nrows(), self.shape.cols), string))
    }

    /// Right product `self·B` with a constant matrix.
    pub fn rmul(&self, b: &DMatrix<f64>) -> Result<AffExpr> {
        let string = format!("{}·{}", wrap(&self.string), matrix_label(b));
        if b.nrows() != self.shape.cols {
            return Err(CvxError::mismatch(
                format!("{} columns", b.nrows()),
                self.shape,
            ));
        }
        let t = csc_kron(&dense_to_csc(&b.transpose()), &csc_identity(self.shape.rows));
        Ok(self.transform(&t, Shape::matrix(self.shape.rows, b.ncols()), string))
    }

    /// Scalar inner product `⟨A, self⟩ = Σ Aᵢⱼ selfᵢⱼ`.
    pub fn inner(&self, a: &DMatrix<f64>) -> Result<AffExpr> {
        if (a.nrows(), a.ncols()) != (self.shape.rows, self.shape.cols) {
            return Err(CvxError::mismatch(
                self.shape,
                Shape::matrix(a.nrows(), a.ncols()),
            ));
        }
        let t = csc_from_iter(
            1,
            self.size(),
            a.iter().enumerate().map(|(k, v)| (0, k, *v)),
        );
        let string = format!("⟨{}, {}⟩", matrix_label(a), self.string);
        Ok(self.transform(&t, Shape::scalar(), string))
    }

    /// Sum of all entries.
    pub fn sum(&self) -> AffExpr {
        let t = csc_from_iter(1, self.size(), (0..self.size()).map(|k| (0, k, 1.0)));
        let string = format!("∑({})", self.string);
        self.transform(&t, Shape::scalar(), string)
    }

    /// Trace of a square expression.
    pub fn trace(&self) -> Result<AffExpr> {
        if !self.shape.is_square() {
            return Err(CvxError::mismatch("a square shape", self.shape));
        }
        let n = self.shape.rows;
        let t = csc_from_iter(1, self.size(), (0..n).map(|k| (0, self.shape.flat(k, k), 1.0)));
        let string = format!("tr({})", self.string);
        Ok(self.transform(&t, Shape::scalar(), string))
    }

    /// Transpose (no conjugation).
    pub fn transpose(&self) -> AffExpr {
        let s = self.shape;
        let ts = s.transpose();
        let t = csc_from_iter(
            s.size(),
            s.size(),
            (0..s.size()).map(|k| {
                let (i, j) = s.unflat(k);
                (ts.flat(j, i), k, 1.0)
            }),
        );
        let string = format!("{}ᵀ", wrap(&self.string));
        self.transform(&t, ts, string)
    }

    /// Complex conjugate.
    pub fn conj(&self) -> AffExpr {
        AffExpr {
            shape: self.shape,
            re: self.re.clone(),
            im: self.im.as_ref().map(|im| im.scale(-1.0)),
            string: format!("conj({})", self.string),
        }
    }

    /// Conjugate transpose.
    pub fn htranspose(&self) -> AffExpr {
        let string = format!("{}ᴴ", wrap(&self.string));
        self.conj().transpose().with_string(string)
    }

    /// Select flat (column-major) entries as a column vector.
    pub fn select(&self, indices: &[usize]) -> Result<AffExpr> {
        if let Some(bad) = indices.iter().find(|k| **k >= self.size()) {
            return Err(CvxError::InvalidIndex(format!(
                "entry {} of an expression of shape {}",
                bad, self.shape
            )));
        }
        let t = csc_from_iter(
            indices.len(),
            self.size(),
            indices.iter().enumerate().map(|(r, k)| (r, *k, 1.0)),
        );
        let string = if indices.len() == 1 {
            format!("{}[{}]", wrap(&self.string), indices[0])
        } else {
            format!("{}[{} entries]", wrap(&self.string), indices.len())
        };
        Ok(self.transform(&t, Shape::vector(indices.len()), string))
    }

    /// Flat (column-major) entry `k` as a scalar.
    pub fn element(&self, k: usize) -> Result<AffExpr> {
        self.select(&[k])
    }

    /// Entry `(i, j)` as a scalar.
    pub fn entry(&self, i: usize, j: usize) -> Result<AffExpr> {
        if i >= self.shape.rows || j >= self.shape.cols {
            return Err(CvxError::InvalidIndex(format!(
                "({}, {}) of an expression of shape {}",
                i, j, self.shape
            )));
        }
        Ok(self
            .select(&[self.shape.flat(i, j)])?
            .with_string(format!("{}[{},{}]", wrap(&self.string), i, j)))
    }

    /// Entries `start..end` as a column vector.
    pub fn slice(&self, start: usize, end: usize) -> Result<AffExpr> {
        let idx: Vec<usize> = (start..end).collect();
        let string = format!("{}[{}:{}]", wrap(&self.string), start, end);
        Ok(self.select(&idx)?.with_string(string))
    }

    /// Reshape, keeping the column-major entry order.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<AffExpr> {
        let shape = shape.into();
        if shape.size() != self.size() {
            return Err(CvxError::mismatch(self.shape, shape));
        }
        let mut e = self.clone();
        e.shape = shape;
        Ok(e)
    }

    /// Column vector of all entries.
    pub fn vectorize(&self) -> AffExpr {
        let mut e = self.clone();
        e.shape = Shape::vector(self.size());
        e.string = format!("vec({})", self.string);
        e
    }

    fn stack(parts: &[AffExpr], shape: Shape, place: &dyn Fn(usize, usize, usize) -> usize, string: String) -> AffExpr {
        let mut re = LinearPart::default();
        let mut im: Option<LinearPart> = None;
        for (p, e) in parts.iter().enumerate() {
            let t = csc_from_iter(
                shape.size(),
                e.size(),
                (0..e.size()).map(|k| {
                    let (i, j) = e.shape.unflat(k);
                    (place(p, i, j), k, 1.0)
                }),
            );
            re = re.plus(&e.re.left(&t));
            if let Some(eim) = &e.im {
                let moved = eim.left(&t);
                im = Some(match im {
                    Some(acc) => acc.plus(&moved),
                    None => moved,
                });
            }
        }
        if re.constant.is_none() && re.factors.is_empty() {
            re.constant = Some(DVector::zeros(shape.size()));
        }
        AffExpr {
            shape,
            re,
            im,
            string,
        }
    }

    /// Vertical concatenation `[a; b; ...]`.
    pub fn vstack(parts: &[AffExpr]) -> Result<AffExpr> {
        let first = parts
            .first()
            .ok_or_else(|| CvxError::InvalidProblem("nothing to stack".to_string()))?;
        let cols = first.shape.cols;
        let mut offsets = Vec::with_capacity(parts.len());
        let mut rows = 0;
        for p in parts {
            if p.shape.cols != cols {
                return Err(CvxError::mismatch(
                    format!("{} columns", cols),
                    p.shape,
                ));
            }
            offsets.push(rows);
            rows += p.shape.rows;
        }
        let shape = Shape::matrix(rows, cols);
        let string = format!(
            "[{}]",
            parts.iter().map(|p| p.string.as_str()).collect::<Vec<_>>().join("; ")
        );
        Ok(Self::stack(
            parts,
            shape,
            &|p, i, j| shape.flat(offsets[p] + i, j),
            string,
        ))
    }

    /// Horizontal concatenation `[a, b, ...]`.
    pub fn hstack(parts: &[AffExpr]) -> Result<AffExpr> {
        let first = parts
            .first()
            .ok_or_else(|| CvxError::InvalidProblem("nothing to stack".to_string()))?;
        let rows = first.shape.rows;
        let mut offsets = Vec::with_capacity(parts.len());
        let mut cols = 0;
        for p in parts {
            if p.shape.rows != rows {
                return Err(CvxError::mismatch(format!("{} rows", rows), p.shape));
            }
            offsets.push(cols);
            cols += p.shape.cols;
        }
        let shape = Shape::matrix(rows, cols);
        let string = format!(
            "[{}]",
            parts.iter().map(|p| p.string.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self::stack(
            parts,
            shape,
            &|p, i, j| shape.flat(i, offsets[p] + j),
            string,
        ))
    }

    /// Block matrix from rows of blocks.
    pub fn block(rows: &[Vec<AffExpr>]) -> Result<AffExpr> {
        let stacked: Vec<AffExpr> = rows
            .iter()
            .map(|r| AffExpr::hstack(r))
            .collect::<Result<_>>()?;
        AffExpr::vstack(&stacked)
    }

    /// Diagonal matrix from a vector expression.
    pub fn diag(&self) -> Result<AffExpr> {
        if !self.shape.is_vector() {
            return Err(CvxError::mismatch("a vector", self.shape));
        }
        let n = self.size();
        let shape = Shape::matrix(n, n);
        let t = csc_from_iter(n * n, n, (0..n).map(|k| (shape.flat(k, k), k, 1.0)));
        let string = format!("Diag({})", self.string);
        Ok(self.transform(&t, shape, string))
    }

    /// Diagonal of a square expression as a column vector.
    pub fn diag_vect(&self) -> Result<AffExpr> {
        if !self.shape.is_square() {
            return Err(CvxError::mismatch("a square shape", self.shape));
        }
        let n = self.shape.rows;
        let t = csc_from_iter(n, self.size(), (0..n).map(|k| (k, self.shape.flat(k, k), 1.0)));
        let string = format!("diag({})", self.string);
        Ok(self.transform(&t, Shape::vector(n), string))
    }

    /// Lower-triangular `n × n` matrix filled column by column from a vector
    /// of length `n(n+1)/2`.
    pub fn lower_triangular(&self, n: usize) -> Result<AffExpr> {
        if self.size() != n * (n + 1) / 2 {
            return Err(CvxError::mismatch(n * (n + 1) / 2, self.size()));
        }
        let shape = Shape::matrix(n, n);
        let mut triplets = Vec::with_capacity(self.size());
        let mut k = 0;
        for j in 0..n {
            for i in j..n {
                triplets.push((shape.flat(i, j), k, 1.0));
                k += 1;
            }
        }
        let t = csc_from_iter(n * n, self.size(), triplets);
        let string = format!("lowtri({})", self.string);
        Ok(self.transform(&t, shape, string))
    }

    /// Replace variable handles.
    pub fn remap(&self, map: &HashMap<VarId, VarId>) -> AffExpr {
        AffExpr {
            shape: self.shape,
            re: self.re.remap(map),
            im: self.im.as_ref().map(|im| im.remap(map)),
            string: self.string.clone(),
        }
    }

    /// Numeric value of a real expression.
    pub fn eval(&self, values: &dyn ValueSource) -> Result<DMatrix<f64>> {
        if !self.is_real() {
            return Err(CvxError::ComplexValued(format!(
                "{} has an imaginary part",
                self.string
            )));
        }
        let v = self.re.eval(self.size(), values)?;
        Ok(DMatrix::from_column_slice(
            self.shape.rows,
            self.shape.cols,
            v.as_slice(),
        ))
    }

    /// Numeric value, complex.
    pub fn eval_complex(&self, values: &dyn ValueSource) -> Result<DMatrix<Complex<f64>>> {
        let re = self.re.eval(self.size(), values)?;
        let im = match &self.im {
            Some(im) => im.eval(self.size(), values)?,
            None => DVector::zeros(self.size()),
        };
        Ok(DMatrix::from_fn(self.shape.rows, self.shape.cols, |i, j| {
            let k = self.shape.flat(i, j);
            Complex::new(re[k], im[k])
        }))
    }

    /// Global linear form `(A, c)` with `vec(self) = A·x + c`, where `x`
    /// stacks all scalar columns of the problem. Rows are column-major.
    pub fn linear_rows(
        &self,
        start_of: &dyn Fn(VarId) -> Option<usize>,
        ncols: usize,
    ) -> Result<(CscMatrix<f64>, DVector<f64>)> {
        if !self.is_real() {
            return Err(CvxError::ComplexValued(format!(
                "{} has an imaginary part",
                self.string
            )));
        }
        let mut triplets = Vec::new();
        for (id, m) in &self.re.factors {
            let start = start_of(*id).ok_or_else(|| CvxError::UnknownVariable(id.to_string()))?;
            for (r, c, v) in m.triplet_iter() {
                triplets.push((r, start + c, *v));
            }
        }
        Ok((
            csc_from_iter(self.size(), ncols, triplets),
            self.constant_vector(),
        ))
    }
}

fn matrix_label(m: &DMatrix<f64>) -> String {
    if m.len() == 1 {
        fmt_num(m[(0, 0)])
    } else {
        format!("[{}×{}]", m.nrows(), m.ncols())
    }
}

impl fmt::Display for AffExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string)
    }
}

impl Neg for &AffExpr {
    type Output = AffExpr;

    fn neg(self) -> AffExpr {
        self.neg_expr()
    }
}

impl Neg for AffExpr {
    type Output = AffExpr;

    fn neg(self) -> AffExpr {
        self.neg_expr()
    }
}

impl Mul<f64> for &AffExpr {
    type Output = AffExpr;

    fn mul(self, a: f64) -> AffExpr {
        self.scale(a)
    }
}

impl Mul<&AffExpr> for f64 {
    type Output = AffExpr;

    fn mul(self, e: &AffExpr) -> AffExpr {
        e.scale(self)
    }
}
