//! Dense linear algebra for small `d x d` ridge systems.
//!
//! Matrices are row-major `Vec<f64>`. Everything here is sized by the context
//! dimension, so plain loops are fine; there is no blocking or SIMD.
//!
//! Two ways of applying `(A + t I)^{-1}` are provided:
//! - [`conjugate_gradient_solve`]: iterative, no factorization kept around.
//! - [`SymmetricEigen::solve_shifted`]: uses a cached eigendecomposition
//!   (cyclic Jacobi), cheap to reuse across many contexts.

use crate::error::{Error, Result};

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Build from row-major data; `data.len()` must equal `rows * cols`.
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::DimensionMismatch {
                what: "matrix data",
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a list of equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            if r.len() != cols {
                return Err(Error::DimensionMismatch {
                    what: "matrix row",
                    expected: cols,
                    got: r.len(),
                });
            }
            data.extend_from_slice(r);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.data[i * self.cols + j] = v;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.get(i, j)).collect()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn transpose(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        out
    }

    pub fn scale(&mut self, s: f64) {
        for v in &mut self.data {
            *v *= s;
        }
    }

    /// `self <- self + s * I` (square matrices only; extra rows/cols are ignored).
    pub fn add_diagonal(&mut self, s: f64) {
        let n = self.rows.min(self.cols);
        for i in 0..n {
            self.data[i * self.cols + i] += s;
        }
    }

    /// `self <- self + w * x x^T`.
    pub fn add_outer(&mut self, x: &[f64], w: f64) {
        debug_assert!(self.is_square() && x.len() == self.rows);
        let n = self.rows;
        for i in 0..n {
            let wi = w * x[i];
            if wi == 0.0 {
                continue;
            }
            let row = &mut self.data[i * n..(i + 1) * n];
            for (r, xj) in row.iter_mut().zip(x) {
                *r += wi * xj;
            }
        }
    }

    /// `self <- a * self + b * other`, elementwise.
    pub fn blend(&mut self, a: f64, other: &Matrix, b: f64) -> Result<()> {
        if other.rows != self.rows || other.cols != self.cols {
            return Err(Error::DimensionMismatch {
                what: "matrix blend",
                expected: self.data.len(),
                got: other.data.len(),
            });
        }
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x = a * *x + b * y;
        }
        Ok(())
    }

    pub fn mat_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.rows];
        for (i, o) in out.iter_mut().enumerate() {
            *o = dot(self.row(i), x);
        }
        out
    }

    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(Error::DimensionMismatch {
                what: "matmul inner dimension",
                expected: self.cols,
                got: other.rows,
            });
        }
        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let aik = self.data[i * self.cols + k];
                if aik == 0.0 {
                    continue;
                }
                let orow = other.row(k);
                let dst = &mut out.data[i * other.cols..(i + 1) * other.cols];
                for (d, o) in dst.iter_mut().zip(orow) {
                    *d += aik * o;
                }
            }
        }
        Ok(out)
    }

    /// Largest absolute elementwise difference (`inf` on shape mismatch).
    pub fn max_abs_diff(&self, other: &Matrix) -> f64 {
        if self.rows != other.rows || self.cols != other.cols {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        if !self.is_square() {
            return false;
        }
        for i in 0..self.rows {
            for j in (i + 1)..self.cols {
                if (self.get(i, j) - self.get(j, i)).abs() > tol {
                    return false;
                }
            }
        }
        true
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut s = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        s += x * y;
    }
    s
}

/// Below this curvature `p^T A p` the CG direction is treated as degenerate.
const CG_CURVATURE_EPS: f64 = 1e-300;

/// Solve `A X = B` column by column with conjugate gradients.
///
/// `a` must be symmetric positive semi-definite (`n x n`); `rhs` is `n x m`.
/// Returns `X` (`n x m`). Each column runs at most `2n` iterations and stops
/// when the residual norm drops below `1e-10 * (1 + |b|)`.
///
/// A singular `a` does not fail: if a search direction has no curvature the
/// iteration stops and the current iterate is returned (for `A = 0` that is
/// the zero vector).
pub fn conjugate_gradient_solve(a: &Matrix, rhs: &Matrix) -> Result<Matrix> {
    if !a.is_square() {
        return Err(Error::DimensionMismatch {
            what: "solve matrix columns",
            expected: a.rows,
            got: a.cols,
        });
    }
    let n = a.rows;
    if rhs.rows != n {
        return Err(Error::DimensionMismatch {
            what: "solve right-hand side rows",
            expected: n,
            got: rhs.rows,
        });
    }

    let mut out = Matrix::zeros(n, rhs.cols);
    for col in 0..rhs.cols {
        let b = rhs.column(col);
        let x = cg_single(a, &b);
        for (i, xi) in x.into_iter().enumerate() {
            out.set(i, col, xi);
        }
    }
    Ok(out)
}

fn cg_single(a: &Matrix, b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut p = r.clone();
    let mut rs_old = dot(&r, &r);
    let tol = 1e-10 * (1.0 + rs_old.sqrt());

    for _ in 0..(2 * n).max(1) {
        if rs_old.sqrt() <= tol {
            break;
        }
        let ap = a.mat_vec(&p);
        let p_ap = dot(&p, &ap);
        if !(p_ap.is_finite() && p_ap > CG_CURVATURE_EPS) {
            tracing::warn!(
                curvature = p_ap,
                residual = rs_old.sqrt(),
                "conjugate gradient hit a degenerate direction; returning current iterate"
            );
            break;
        }
        let alpha = rs_old / p_ap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rs_new = dot(&r, &r);
        let beta = rs_new / rs_old;
        for i in 0..n {
            p[i] = r[i] + beta * p[i];
        }
        rs_old = rs_new;
    }
    x
}

/// Eigendecomposition of a symmetric matrix: `A = V diag(values) V^T`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SymmetricEigen {
    /// Eigenvalues in ascending order.
    pub values: Vec<f64>,
    /// Orthonormal eigenvectors stored as columns, aligned with `values`.
    pub vectors: Matrix,
}

const JACOBI_MAX_SWEEPS: usize = 64;

impl SymmetricEigen {
    /// Decompose `a` with cyclic Jacobi rotations.
    ///
    /// Only the symmetric part of `a` is meaningful; callers keep covariance
    /// matrices symmetric so that is the whole matrix.
    pub fn new(a: &Matrix) -> Result<Self> {
        if !a.is_square() {
            return Err(Error::DimensionMismatch {
                what: "eigendecomposition columns",
                expected: a.rows,
                got: a.cols,
            });
        }
        let n = a.rows;
        let mut m = a.clone();
        let mut v = Matrix::identity(n);

        let frob2: f64 = m.data.iter().map(|x| x * x).sum();
        let stop = f64::EPSILON * f64::EPSILON * frob2.max(f64::MIN_POSITIVE);

        for _ in 0..JACOBI_MAX_SWEEPS {
            let mut off = 0.0;
            for p in 0..n {
                for q in (p + 1)..n {
                    off += m.get(p, q) * m.get(p, q);
                }
            }
            if off <= stop {
                break;
            }
            for p in 0..n {
                for q in (p + 1)..n {
                    rotate(&mut m, &mut v, p, q);
                }
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| m.get(i, i).total_cmp(&m.get(j, j)));
        let values: Vec<f64> = order.iter().map(|&i| m.get(i, i)).collect();
        let mut vectors = Matrix::zeros(n, n);
        for (dst, &src) in order.iter().enumerate() {
            for k in 0..n {
                vectors.set(k, dst, v.get(k, src));
            }
        }
        Ok(Self { values, vectors })
    }

    /// Eigenpairs of the identity, used for freshly initialized arms.
    pub fn identity(n: usize) -> Self {
        Self {
            values: vec![1.0; n],
            vectors: Matrix::identity(n),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// `V diag(values) V^T`.
    pub fn reconstruct(&self) -> Matrix {
        let n = self.dim();
        let mut out = Matrix::zeros(n, n);
        for (k, lambda) in self.values.iter().enumerate() {
            let col = self.vectors.column(k);
            out.add_outer(&col, *lambda);
        }
        out
    }

    /// Compute `(A + shift I)^{-1} rhs` as `V diag(1/(lambda+shift)) V^T rhs`.
    ///
    /// Directions with `lambda + shift <= 0` contribute nothing (pseudo-inverse).
    pub fn solve_shifted(&self, shift: f64, rhs: &Matrix) -> Result<Matrix> {
        let n = self.dim();
        if rhs.rows != n {
            return Err(Error::DimensionMismatch {
                what: "solve right-hand side rows",
                expected: n,
                got: rhs.rows,
            });
        }
        // q = V^T rhs, scaled row-wise by the inverse eigenvalues.
        let mut q = self.vectors.transpose().matmul(rhs)?;
        for (k, lambda) in self.values.iter().enumerate() {
            let denom = lambda + shift;
            let inv = if denom > 0.0 && denom.is_finite() {
                1.0 / denom
            } else {
                0.0
            };
            for j in 0..q.cols {
                let v = q.get(k, j);
                q.set(k, j, v * inv);
            }
        }
        self.vectors.matmul(&q)
    }
}

fn rotate(m: &mut Matrix, v: &mut Matrix, p: usize, q: usize) {
    let apq = m.get(p, q);
    if apq == 0.0 {
        return;
    }
    let n = m.rows;
    let theta = (m.get(q, q) - m.get(p, p)) / (2.0 * apq);
    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
    let c = 1.0 / (t * t + 1.0).sqrt();
    let s = t * c;

    for k in 0..n {
        let mkp = m.get(k, p);
        let mkq = m.get(k, q);
        m.set(k, p, c * mkp - s * mkq);
        m.set(k, q, s * mkp + c * mkq);
    }
    for k in 0..n {
        let mpk = m.get(p, k);
        let mqk = m.get(q, k);
        m.set(p, k, c * mpk - s * mqk);
        m.set(q, k, s * mpk + c * mqk);
    }
    for k in 0..n {
        let vkp = v.get(k, p);
        let vkq = v.get(k, q);
        v.set(k, p, c * vkp - s * vkq);
        v.set(k, q, s * vkp + c * vkq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spd(n: usize, seed: u64) -> Matrix {
        // Deterministic pseudo-random SPD: I + sum of a few outer products.
        let mut m = Matrix::identity(n);
        let mut s = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        for _ in 0..n {
            let x: Vec<f64> = (0..n)
                .map(|_| {
                    s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    ((s >> 33) as f64 / (1u64 << 31) as f64) - 0.5
                })
                .collect();
            m.add_outer(&x, 1.0);
        }
        m
    }

    #[test]
    fn cg_solves_identity() {
        let a = Matrix::identity(3);
        let b = Matrix::from_rows(&[vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]).unwrap();
        let x = conjugate_gradient_solve(&a, &b).unwrap();
        assert!(x.max_abs_diff(&b) < 1e-12);
    }

    #[test]
    fn cg_matches_known_system() {
        // [[4,1],[1,3]] x = [1,2]  =>  x = [1/11, 7/11]
        let a = Matrix::from_rows(&[vec![4.0, 1.0], vec![1.0, 3.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![1.0], vec![2.0]]).unwrap();
        let x = conjugate_gradient_solve(&a, &b).unwrap();
        assert!((x.get(0, 0) - 1.0 / 11.0).abs() < 1e-10);
        assert!((x.get(1, 0) - 7.0 / 11.0).abs() < 1e-10);
    }

    #[test]
    fn cg_on_zero_matrix_returns_finite_zero() {
        let a = Matrix::zeros(3, 3);
        let b = Matrix::from_rows(&[vec![1.0], vec![-1.0], vec![2.0]]).unwrap();
        let x = conjugate_gradient_solve(&a, &b).unwrap();
        assert!(x.is_finite());
        assert_eq!(x, Matrix::zeros(3, 1));
    }

    #[test]
    fn cg_rejects_wrong_rhs_rows() {
        let a = Matrix::identity(3);
        let b = Matrix::zeros(2, 1);
        assert!(matches!(
            conjugate_gradient_solve(&a, &b),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn eigen_of_diagonal_is_sorted() {
        let a = Matrix::from_rows(&[
            vec![3.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 2.0],
        ])
        .unwrap();
        let e = SymmetricEigen::new(&a).unwrap();
        assert_eq!(e.values, vec![1.0, 2.0, 3.0]);
        assert!(e.reconstruct().max_abs_diff(&a) < 1e-12);
    }

    #[test]
    fn eigen_two_by_two() {
        // [[2,1],[1,2]] has eigenvalues 1 and 3.
        let a = Matrix::from_rows(&[vec![2.0, 1.0], vec![1.0, 2.0]]).unwrap();
        let e = SymmetricEigen::new(&a).unwrap();
        assert!((e.values[0] - 1.0).abs() < 1e-12);
        assert!((e.values[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn shifted_solve_matches_cg() {
        let a = spd(6, 7);
        let rows: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64, 1.0 - i as f64]).collect();
        let rhs = Matrix::from_rows(&rows).unwrap();
        let e = SymmetricEigen::new(&a).unwrap();
        let x_eig = e.solve_shifted(0.5, &rhs).unwrap();
        let mut shifted = a.clone();
        shifted.add_diagonal(0.5);
        let x_cg = conjugate_gradient_solve(&shifted, &rhs).unwrap();
        assert!(x_eig.max_abs_diff(&x_cg) < 1e-8);
    }

    proptest! {
        #[test]
        fn eigen_reconstructs_and_is_orthonormal(n in 1usize..8, seed in any::<u64>()) {
            let a = spd(n, seed);
            let e = SymmetricEigen::new(&a).unwrap();
            prop_assert!(e.reconstruct().max_abs_diff(&a) < 1e-8);
            let vtv = e.vectors.transpose().matmul(&e.vectors).unwrap();
            prop_assert!(vtv.max_abs_diff(&Matrix::identity(n)) < 1e-9);
            for w in e.values.windows(2) {
                prop_assert!(w[0] <= w[1]);
            }
        }

        #[test]
        fn cg_residual_is_small_for_spd(n in 1usize..8, seed in any::<u64>()) {
            let a = spd(n, seed);
            let b: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
            let rhs = Matrix::from_row_major(n, 1, b.clone()).unwrap();
            let x = conjugate_gradient_solve(&a, &rhs).unwrap();
            let ax = a.mat_vec(&x.column(0));
            for (l, r) in ax.iter().zip(&b) {
                prop_assert!((l - r).abs() < 1e-6);
            }
        }
    }
}
