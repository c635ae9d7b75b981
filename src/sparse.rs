//! Sparse matrix utilities.
//!
//! Helper functions for working with nalgebra-sparse matrices. Coefficient
//! matrices of expressions are always stored in CSC form; these helpers build,
//! combine and restructure them through triplet lists.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Create a CSC matrix from triplets (row, col, value).
///
/// Duplicates are summed together.
pub fn csc_from_triplets(
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
) -> CscMatrix<f64> {
    if rows.is_empty() {
        return CscMatrix::zeros(nrows, ncols);
    }

    let mut coo = CooMatrix::new(nrows, ncols);
    for ((row, col), val) in rows.into_iter().zip(cols).zip(vals) {
        if row < nrows && col < ncols && val != 0.0 {
            coo.push(row, col, val);
        }
    }

    CscMatrix::from(&coo)
}

/// Create a CSC matrix from an iterator of `(row, col, value)` triplets.
pub fn csc_from_iter(
    nrows: usize,
    ncols: usize,
    triplets: impl IntoIterator<Item = (usize, usize, f64)>,
) -> CscMatrix<f64> {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for (r, c, v) in triplets {
        rows.push(r);
        cols.push(c);
        vals.push(v);
    }
    csc_from_triplets(nrows, ncols, rows, cols, vals)
}

/// Create a CSC identity matrix.
pub fn csc_identity(n: usize) -> CscMatrix<f64> {
    CscMatrix::identity(n)
}

/// Convert a dense matrix to CSC format.
pub fn dense_to_csc(dense: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();

    for j in 0..dense.ncols() {
        for i in 0..dense.nrows() {
            let v = dense[(i, j)];
            if v.abs() > 1e-15 {
                rows.push(i);
                cols.push(j);
                vals.push(v);
            }
        }
    }

    csc_from_triplets(dense.nrows(), dense.ncols(), rows, cols, vals)
}

/// Convert CSC to dense matrix.
pub fn csc_to_dense(sparse: &CscMatrix<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(sparse.nrows(), sparse.ncols());
    for (row, col, val) in sparse.triplet_iter() {
        dense[(row, col)] += *val;
    }
    dense
}

/// Stack CSC matrices vertically. All blocks must have `ncols` columns.
pub fn csc_vstack(blocks: &[&CscMatrix<f64>], ncols: usize) -> CscMatrix<f64> {
    let mut offset = 0;
    let mut triplets = Vec::new();
    for b in blocks {
        for (r, c, v) in b.triplet_iter() {
            triplets.push((r + offset, c, *v));
        }
        offset += b.nrows();
    }
    csc_from_iter(offset, ncols, triplets)
}

/// Stack CSC matrices horizontally. All blocks must have `nrows` rows.
pub fn csc_hstack(blocks: &[&CscMatrix<f64>], nrows: usize) -> CscMatrix<f64> {
    let mut offset = 0;
    let mut triplets = Vec::new();
    for b in blocks {
        for (r, c, v) in b.triplet_iter() {
            triplets.push((r, c + offset, *v));
        }
        offset += b.ncols();
    }
    csc_from_iter(nrows, offset, triplets)
}

/// Add two CSC matrices of equal dimensions.
pub fn csc_add(a: &CscMatrix<f64>, b: &CscMatrix<f64>) -> CscMatrix<f64> {
    let triplets = a
        .triplet_iter()
        .chain(b.triplet_iter())
        .map(|(r, c, v)| (r, c, *v));
    csc_from_iter(a.nrows(), a.ncols(), triplets)
}

/// Scale a CSC matrix.
pub fn csc_scale(a: &CscMatrix<f64>, scalar: f64) -> CscMatrix<f64> {
    let values: Vec<f64> = a.values().iter().map(|v| v * scalar).collect();
    let col_offsets: Vec<usize> = a.col_offsets().to_vec();
    let row_indices: Vec<usize> = a.row_indices().to_vec();
    CscMatrix::try_from_csc_data(a.nrows(), a.ncols(), col_offsets, row_indices, values)
        .unwrap_or_else(|_| CscMatrix::zeros(a.nrows(), a.ncols()))
}

/// Sparse product `a * b`.
pub fn csc_mul(a: &CscMatrix<f64>, b: &CscMatrix<f64>) -> CscMatrix<f64> {
    // Accumulate column by column of b through the columns of a.
    let mut triplets = Vec::new();
    for j in 0..b.ncols() {
        let col = b.col(j);
        for (&k, &bkj) in col.row_indices().iter().zip(col.values()) {
            let acol = a.col(k);
            for (&i, &aik) in acol.row_indices().iter().zip(acol.values()) {
                triplets.push((i, j, aik * bkj));
            }
        }
    }
    csc_from_iter(a.nrows(), b.ncols(), triplets)
}

/// Transpose of a CSC matrix.
pub fn csc_transpose(a: &CscMatrix<f64>) -> CscMatrix<f64> {
    csc_from_iter(
        a.ncols(),
        a.nrows(),
        a.triplet_iter().map(|(r, c, v)| (c, r, *v)),
    )
}

/// Keep the listed rows of `a`, in the listed order.
pub fn csc_select_rows(a: &CscMatrix<f64>, rows: &[usize]) -> CscMatrix<f64> {
    let mut position = vec![Vec::new(); a.nrows()];
    for (new, &old) in rows.iter().enumerate() {
        if old < a.nrows() {
            position[old].push(new);
        }
    }
    let mut triplets = Vec::new();
    for (r, c, v) in a.triplet_iter() {
        for &new in &position[r] {
            triplets.push((new, c, *v));
        }
    }
    csc_from_iter(rows.len(), a.ncols(), triplets)
}

/// Place the rows of `a` at the given target rows of an `nrows` tall matrix.
pub fn csc_scatter_rows(a: &CscMatrix<f64>, targets: &[usize], nrows: usize) -> CscMatrix<f64> {
    csc_from_iter(
        nrows,
        a.ncols(),
        a.triplet_iter().map(|(r, c, v)| (targets[r], c, *v)),
    )
}

/// Kronecker product `a ⊗ b`.
pub fn csc_kron(a: &CscMatrix<f64>, b: &CscMatrix<f64>) -> CscMatrix<f64> {
    let mut triplets = Vec::new();
    for (ra, ca, va) in a.triplet_iter() {
        for (rb, cb, vb) in b.triplet_iter() {
            triplets.push((ra * b.nrows() + rb, ca * b.ncols() + cb, va * vb));
        }
    }
    csc_from_iter(a.nrows() * b.nrows(), a.ncols() * b.ncols(), triplets)
}

/// Sparse matrix times dense vector.
pub fn csc_mul_vec(a: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.nrows());
    for (r, c, v) in a.triplet_iter() {
        y[r] += v * x[c];
    }
    y
}

/// Transposed sparse matrix times dense vector, `aᵀ x`.
pub fn csc_tr_mul_vec(a: &CscMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.ncols());
    for (r, c, v) in a.triplet_iter() {
        y[c] += v * x[r];
    }
    y
}

/// Number of explicitly stored non-zero values.
pub fn csc_nnz(a: &CscMatrix<f64>) -> usize {
    a.values().iter().filter(|v| **v != 0.0).count()
}

/// Whether every stored value is zero.
pub fn csc_is_zero(a: &CscMatrix<f64>) -> bool {
    csc_nnz(a) == 0
}
