//! Zero fill-in incomplete Cholesky factorization, `A ≈ L Lᵗ`.
//!
//! `L` keeps the sparsity pattern of the lower triangle of `A`. When a pivot
//! breaks down the factorization is restarted on `A + α·diag(A)`, doubling
//! `α` until every pivot is positive.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::{FemError, Result};

/// Pivots smaller than this fraction of the shifted diagonal are rejected
const PIVOT_TOLERANCE: f64 = 1e-14;

/// First relative diagonal shift tried after a breakdown
const INITIAL_SHIFT: f64 = 1e-3;

const MAX_SHIFT_ATTEMPTS: usize = 40;

#[derive(Debug, Clone)]
pub struct IncompleteCholesky {
    /// Strictly lower entries of each row of `L`, sorted by column
    rows: Vec<Vec<(usize, f64)>>,
    diagonal: Vec<f64>,
    shift: f64,
}

/// Lower triangle of one matrix row
struct LowerRow {
    entries: Vec<(usize, f64)>,
    diagonal: f64,
}

/// Dot product of two sorted sparse rows
fn sparse_dot(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Splits `matrix` into sorted lower rows, refusing rows whose diagonal is
/// not positive since no shift can repair them
fn lower_triangle(matrix: &CsrMatrix<f64>) -> Result<Vec<LowerRow>> {
    (0..matrix.nrows())
        .map(|i| {
            let row = matrix.row(i);
            let mut entries: Vec<(usize, f64)> = Vec::new();
            let mut diagonal = 0.0;
            for (&j, &value) in row.col_indices().iter().zip(row.values()) {
                if j < i {
                    entries.push((j, value));
                } else if j == i {
                    diagonal += value;
                }
            }
            if !diagonal.is_finite() || diagonal <= 0.0 {
                return Err(FemError::FactorizationFailed {
                    row: i,
                    pivot: diagonal,
                });
            }
            entries.sort_by_key(|entry| entry.0);
            Ok(LowerRow { entries, diagonal })
        })
        .collect()
}

/// One IC(0) sweep on the diagonal scaled by `1 + shift`.
///
/// Returns the row and pivot of the first breakdown on failure.
fn factorize(
    lower: &[LowerRow],
    shift: f64,
) -> std::result::Result<(Vec<Vec<(usize, f64)>>, Vec<f64>), (usize, f64)> {
    let mut rows: Vec<Vec<(usize, f64)>> = Vec::with_capacity(lower.len());
    let mut diagonal = vec![0.0; lower.len()];

    for (i, row) in lower.iter().enumerate() {
        let mut entries = row.entries.clone();
        for idx in 0..entries.len() {
            let (k, a_ik) = entries[idx];
            let dot = sparse_dot(&entries[..idx], &rows[k]);
            entries[idx].1 = (a_ik - dot) / diagonal[k];
        }

        let a_ii = row.diagonal * (1.0 + shift);
        let pivot = a_ii - entries.iter().map(|(_, l)| l * l).sum::<f64>();
        if !pivot.is_finite() || pivot <= PIVOT_TOLERANCE * a_ii {
            return Err((i, pivot));
        }

        diagonal[i] = pivot.sqrt();
        rows.push(entries);
    }

    Ok((rows, diagonal))
}

impl IncompleteCholesky {
    /// Factorizes a symmetric matrix
    ///
    /// # Returns
    /// The factor, or [`FemError::FactorizationFailed`] when a diagonal entry
    /// is not positive, which happens for singular systems with unused dofs
    pub fn new(matrix: &CsrMatrix<f64>) -> Result<IncompleteCholesky> {
        let lower = lower_triangle(matrix)?;

        let mut shift = 0.0;
        let mut attempts = 0;
        loop {
            match factorize(&lower, shift) {
                Ok((rows, diagonal)) => {
                    if shift > 0.0 {
                        println!(
                            "warning [solver]: incomplete Cholesky needed a diagonal shift of {shift:e}"
                        );
                    }
                    return Ok(IncompleteCholesky {
                        rows,
                        diagonal,
                        shift,
                    });
                }
                Err((row, pivot)) => {
                    if attempts == MAX_SHIFT_ATTEMPTS {
                        return Err(FemError::FactorizationFailed { row, pivot });
                    }
                    attempts += 1;
                    shift = if shift == 0.0 {
                        INITIAL_SHIFT
                    } else {
                        2.0 * shift
                    };
                }
            }
        }
    }

    pub fn size(&self) -> usize {
        self.diagonal.len()
    }

    /// Relative diagonal shift the factor was computed with
    pub fn shift(&self) -> f64 {
        self.shift
    }

    /// Solves `L y = b`
    pub fn solve_lower(&self, b: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(b.len());
        for i in 0..self.diagonal.len() {
            let sum: f64 = self.rows[i].iter().map(|&(j, l)| l * y[j]).sum();
            y[i] = (b[i] - sum) / self.diagonal[i];
        }
        y
    }

    /// Solves `Lᵗ x = y`
    pub fn solve_upper(&self, y: &DVector<f64>) -> DVector<f64> {
        let mut x = y.clone();
        for i in (0..self.diagonal.len()).rev() {
            x[i] /= self.diagonal[i];
            for &(j, l) in &self.rows[i] {
                x[j] -= l * x[i];
            }
        }
        x
    }

    /// Applies the preconditioner `(L Lᵗ)⁻¹ r`
    pub fn apply(&self, r: &DVector<f64>) -> DVector<f64> {
        self.solve_upper(&self.solve_lower(r))
    }
}
