//! Matrix stuffing: converts a canonical form to solver format.
//!
//! This module builds the matrices (P, q, A, b) and cone specifications
//! required by Clarabel from a [`CanonicalForm`], and splits the solver's
//! stacked dual vector back into cone families.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use crate::canon::{CanonicalForm, ConeBlock, FamilyDuals};
use crate::expr::svec_inverse;
use crate::problem::Sense;
use crate::sparse::{csc_from_iter, csc_scale, csc_transpose};

/// Cone dimensions for Clarabel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConeDims {
    /// Number of zero cone (equality) constraints.
    pub zero: usize,
    /// Number of nonnegative cone constraints.
    pub nonneg: usize,
    /// Second-order cone dimensions (each entry is the cone dimension).
    pub soc: Vec<usize>,
    /// Number of exponential cones (each is 3D).
    pub exp: usize,
    /// Side lengths of the semidefinite cones.
    pub psd: Vec<usize>,
}

impl ConeDims {
    /// Total number of constraint rows.
    pub fn total(&self) -> usize {
        self.zero
            + self.nonneg
            + self.soc.iter().sum::<usize>()
            + self.exp * 3
            + self.psd.iter().map(|n| n * (n + 1) / 2).sum::<usize>()
    }
}

/// Stuffed problem ready for Clarabel.
#[derive(Debug, Clone)]
pub struct StuffedProblem {
    /// Quadratic cost matrix P (n x n, upper triangle).
    pub p: CscMatrix<f64>,
    /// Linear cost vector q (n).
    pub q: Vec<f64>,
    /// Constraint matrix A (m x n).
    pub a: CscMatrix<f64>,
    /// Constraint vector b (m).
    pub b: Vec<f64>,
    /// Cone dimensions.
    pub cone_dims: ConeDims,
    /// Constant offset in objective.
    pub objective_offset: f64,
}

struct RowWriter {
    triplets: Vec<(usize, usize, f64)>,
    b: Vec<f64>,
}

impl RowWriter {
    fn row(&mut self, entries: &[(usize, f64)], h: f64) {
        let r = self.b.len();
        self.triplets
            .extend(entries.iter().map(|&(c, v)| (r, c, v)));
        self.b.push(h);
    }

    fn block(&mut self, block: &ConeBlock) {
        let rows = block_rows(block);
        for (entries, h) in rows.iter().zip(block.h.iter()) {
            self.row(entries, *h);
        }
    }
}

/// Sparse rows of a block's `G`.
fn block_rows(block: &ConeBlock) -> Vec<Vec<(usize, f64)>> {
    let mut rows = vec![Vec::new(); block.len()];
    for (col, r, v) in csc_transpose(&block.g).triplet_iter() {
        rows[r].push((col, *v));
    }
    rows
}

/// Build the stuffed problem from a canonical form.
///
/// Clarabel solves `min ½xᵀPx + qᵀx` subject to `b - Ax ∈ K`, which is the
/// canonical form with `A = G`, `b = h`. Maximization negates the cost.
/// Exponential cone rows are reordered to Clarabel's `(z, y, x)` convention
/// and semidefinite blocks are packed into the √2-scaled upper triangle.
pub fn stuff_problem(form: &CanonicalForm) -> StuffedProblem {
    let n = form.ncols();
    let sign = if form.sense == Sense::Maximize { -1.0 } else { 1.0 };
    let q: Vec<f64> = form.c.iter().map(|v| sign * v).collect();
    let p = match &form.p {
        Some(p) => csc_scale(p, sign),
        None => CscMatrix::zeros(n, n),
    };

    let mut w = RowWriter {
        triplets: Vec::new(),
        b: Vec::new(),
    };
    w.block(&form.eq);
    w.block(&form.ineq);
    for block in &form.soc {
        w.block(block);
    }
    for block in &form.exp {
        let rows = block_rows(block);
        for k in [2, 1, 0] {
            w.row(&rows[k], block.h[k]);
        }
    }
    let s = std::f64::consts::FRAC_1_SQRT_2;
    for (side, block) in &form.psd {
        let rows = block_rows(block);
        for j in 0..*side {
            for i in 0..=j {
                let upper = j * side + i;
                if i == j {
                    w.row(&rows[upper], block.h[upper]);
                } else {
                    // √2 · (Mᵢⱼ + Mⱼᵢ) / 2
                    let lower = i * side + j;
                    let entries: Vec<(usize, f64)> = rows[upper]
                        .iter()
                        .chain(rows[lower].iter())
                        .map(|&(c, v)| (c, s * v))
                        .collect();
                    w.row(&entries, s * (block.h[upper] + block.h[lower]));
                }
            }
        }
    }

    let cone_dims = ConeDims {
        zero: form.eq.len(),
        nonneg: form.ineq.len(),
        soc: form.soc.iter().map(|b| b.len()).collect(),
        exp: form.exp.len(),
        psd: form.psd.iter().map(|(side, _)| *side).collect(),
    };
    let m = w.b.len();

    StuffedProblem {
        p,
        q,
        a: csc_from_iter(m, n, w.triplets),
        b: w.b,
        cone_dims,
        objective_offset: form.c0,
    }
}

impl StuffedProblem {
    /// Split a stacked dual vector into cone families, undoing the
    /// exponential reordering and the triangle packing.
    pub fn unstuff_duals(&self, z: &[f64]) -> FamilyDuals {
        let dims = &self.cone_dims;
        let mut offset = 0;
        let mut take = |len: usize| {
            let end = (offset + len).min(z.len());
            let v = DVector::from_column_slice(&z[offset.min(end)..end]);
            offset += len;
            v
        };
        let eq = take(dims.zero);
        let ineq = take(dims.nonneg);
        let soc = dims.soc.iter().map(|&d| take(d)).collect();
        let exp = (0..dims.exp)
            .map(|_| {
                let v = take(3);
                if v.len() == 3 {
                    DVector::from_vec(vec![v[2], v[1], v[0]])
                } else {
                    v
                }
            })
            .collect();
        let psd = dims
            .psd
            .iter()
            .map(|&side| svec_inverse(&take(side * (side + 1) / 2), side))
            .collect();
        FamilyDuals {
            eq,
            ineq,
            soc,
            exp,
            psd,
        }
    }
}
