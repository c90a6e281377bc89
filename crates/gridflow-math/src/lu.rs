//! Block-sparse LU factorisation with prefactorisation reuse.
//!
//! The solver works on a fixed block-CSR pattern that already contains every
//! fill-in position (the Y-bus structure computes those; see
//! [`crate::y_bus`]). Elimination runs in natural order, since the
//! zero-fill-in reordering is already encoded in the bus numbering by the
//! topology decomposer. Pivoting never crosses block boundaries: each
//! diagonal block is inverted densely with partial pivoting inside the
//! block.
//!
//! A factorisation can be cached ([`BlockSparseLuSolver::prefactorize`]) and
//! reused across right-hand sides until the owning parameters change, at
//! which point the caller must call
//! [`BlockSparseLuSolver::invalidate_prefactorization`].

use std::sync::Arc;

use num_traits::{One, Zero};

use gridflow_core::{Idx, PowerGridError, Result};

/// Pivot blocks with squared magnitude below this are treated as singular.
const PIVOT_THRESHOLD: f64 = 1e-30;

/// Scalar element of a block matrix: `f64` or `Complex64`.
pub trait LuScalar:
    Copy
    + std::fmt::Debug
    + Default
    + Send
    + Sync
    + Zero
    + One
    + std::ops::Sub<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::Neg<Output = Self>
    + std::ops::AddAssign
    + std::ops::SubAssign
{
    /// Squared magnitude, used for pivot selection.
    fn norm_sqr(&self) -> f64;
}

impl LuScalar for f64 {
    fn norm_sqr(&self) -> f64 {
        self * self
    }
}

impl LuScalar for num_complex::Complex64 {
    fn norm_sqr(&self) -> f64 {
        num_complex::Complex64::norm_sqr(self)
    }
}

/// Sparsity pattern handed to the solver, fill-in included.
///
/// `data_mapping[e]` gives, for LU entry `e`, the index of the corresponding
/// entry in the caller's value array, or `-1` for a pure fill-in position.
#[derive(Debug, Clone)]
pub struct LuPattern {
    pub size: Idx,
    pub row_indptr: Arc<Vec<Idx>>,
    pub col_indices: Arc<Vec<Idx>>,
    pub diag: Arc<Vec<Idx>>,
    pub data_mapping: Arc<Vec<Idx>>,
}

impl LuPattern {
    pub fn nnz_lu(&self) -> Idx {
        *self.row_indptr.last().unwrap_or(&0)
    }
}

/// LU factor-and-solve over a block-CSR matrix.
///
/// The state machine is `Unfactored ⇄ Factored`: `prefactorize` moves to
/// `Factored`, `invalidate_prefactorization` back, and
/// `solve(..., use_prefactor = false)` refactors transiently without
/// caching.
pub struct BlockSparseLuSolver<T: LuScalar> {
    pattern: LuPattern,
    block_size: usize,
    /// Factor storage, `nnz_lu · block_size²`. Strict-lower entries hold L
    /// (unit diagonal implied), the diagonal holds the inverted pivot
    /// blocks, the upper entries hold U.
    lu_data: Vec<T>,
    factored: bool,
    // dense scratch for one augmented block inversion
    aug: Vec<T>,
    prod: Vec<T>,
}

impl<T: LuScalar> BlockSparseLuSolver<T> {
    pub fn new(pattern: LuPattern, block_size: usize) -> Self {
        let nnz_lu = pattern.nnz_lu() as usize;
        let bb = block_size * block_size;
        Self {
            pattern,
            block_size,
            lu_data: vec![T::zero(); nnz_lu * bb],
            factored: false,
            aug: vec![T::zero(); block_size * 2 * block_size],
            prod: vec![T::zero(); bb],
        }
    }

    pub fn size(&self) -> Idx {
        self.pattern.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Factor the matrix and cache the result for later solves.
    pub fn prefactorize(&mut self, values: &[T]) -> Result<()> {
        self.factorize(values)?;
        self.factored = true;
        Ok(())
    }

    /// Discard any cached factorisation.
    ///
    /// Must be called whenever the owning parameters change.
    pub fn invalidate_prefactorization(&mut self) {
        self.factored = false;
    }

    /// Solve `A x = b`.
    ///
    /// With `use_prefactor` the cached factors are used, factoring lazily on
    /// first use; without it the matrix is refactored from `values` and the
    /// factors are not retained.
    pub fn solve(&mut self, values: &[T], b: &[T], x: &mut [T], use_prefactor: bool) -> Result<()> {
        if use_prefactor {
            if !self.factored {
                self.prefactorize(values)?;
            }
        } else {
            self.factorize(values)?;
            self.factored = false;
        }
        self.substitute(b, x);
        Ok(())
    }

    /// Scatter `values` into the LU pattern and run block Doolittle
    /// elimination in natural order.
    fn factorize(&mut self, values: &[T]) -> Result<()> {
        let bs = self.block_size;
        let bb = bs * bs;
        let row_indptr = Arc::clone(&self.pattern.row_indptr);
        let col_indices = Arc::clone(&self.pattern.col_indices);
        let diag = Arc::clone(&self.pattern.diag);
        let mapping = Arc::clone(&self.pattern.data_mapping);
        let n = self.pattern.size as usize;

        // scatter, fill-in positions start at zero
        for (entry, &src) in mapping.iter().enumerate() {
            let dst = &mut self.lu_data[entry * bb..(entry + 1) * bb];
            if src >= 0 {
                dst.copy_from_slice(&values[src as usize * bb..(src as usize + 1) * bb]);
            } else {
                dst.fill(T::zero());
            }
        }

        for i in 0..n {
            let row_begin = row_indptr[i] as usize;
            let row_end = row_indptr[i + 1] as usize;
            for idx_ik in row_begin..row_end {
                let k = col_indices[idx_ik] as usize;
                if k >= i {
                    break;
                }
                // L_ik = A_ik * D_k^-1 (pivot block k is already inverted)
                let diag_k = diag[k] as usize;
                block_mul(
                    &mut self.prod,
                    &self.lu_data[idx_ik * bb..(idx_ik + 1) * bb],
                    &self.lu_data[diag_k * bb..(diag_k + 1) * bb],
                    bs,
                );
                self.lu_data[idx_ik * bb..(idx_ik + 1) * bb].copy_from_slice(&self.prod);

                // A_ij -= L_ik * U_kj for all j > k in row k; the merge scan
                // relies on the fill-in guarantee of the pattern
                let mut idx_ij = idx_ik + 1;
                for idx_kj in (diag_k + 1)..row_indptr[k + 1] as usize {
                    let j = col_indices[idx_kj];
                    while idx_ij < row_end && col_indices[idx_ij] < j {
                        idx_ij += 1;
                    }
                    debug_assert!(idx_ij < row_end && col_indices[idx_ij] == j);
                    if idx_ij >= row_end || col_indices[idx_ij] != j {
                        continue;
                    }
                    block_mul(
                        &mut self.prod,
                        &self.lu_data[idx_ik * bb..(idx_ik + 1) * bb],
                        &self.lu_data[idx_kj * bb..(idx_kj + 1) * bb],
                        bs,
                    );
                    let dst = &mut self.lu_data[idx_ij * bb..(idx_ij + 1) * bb];
                    for (d, p) in dst.iter_mut().zip(&self.prod) {
                        *d -= *p;
                    }
                }
            }
            // invert the pivot block in place
            let diag_i = diag[i] as usize;
            if !invert_block(
                &mut self.lu_data[diag_i * bb..(diag_i + 1) * bb],
                bs,
                &mut self.aug,
            ) {
                return Err(PowerGridError::SingularMatrix);
            }
        }
        Ok(())
    }

    /// Forward and backward substitution with the current factors.
    fn substitute(&self, b: &[T], x: &mut [T]) {
        let bs = self.block_size;
        let bb = bs * bs;
        let n = self.pattern.size as usize;
        let row_indptr = &*self.pattern.row_indptr;
        let col_indices = &*self.pattern.col_indices;
        let diag = &*self.pattern.diag;

        x.copy_from_slice(b);

        // forward: y_i = b_i - sum_{k<i} L_ik y_k
        for i in 0..n {
            for idx_ik in row_indptr[i] as usize..row_indptr[i + 1] as usize {
                let k = col_indices[idx_ik] as usize;
                if k >= i {
                    break;
                }
                block_vec_mul_sub_split(x, i, k, &self.lu_data[idx_ik * bb..(idx_ik + 1) * bb], bs);
            }
        }

        // backward: x_i = D_i^-1 (y_i - sum_{j>i} U_ij x_j)
        let mut pivot_result = vec![T::zero(); bs];
        for i in (0..n).rev() {
            let diag_i = diag[i] as usize;
            for idx_ij in (diag_i + 1)..row_indptr[i + 1] as usize {
                let j = col_indices[idx_ij] as usize;
                block_vec_mul_sub_split(x, i, j, &self.lu_data[idx_ij * bb..(idx_ij + 1) * bb], bs);
            }
            let inv = &self.lu_data[diag_i * bb..(diag_i + 1) * bb];
            for (r, res) in pivot_result.iter_mut().enumerate() {
                *res = T::zero();
                for c in 0..bs {
                    *res += inv[r * bs + c] * x[i * bs + c];
                }
            }
            x[i * bs..(i + 1) * bs].copy_from_slice(&pivot_result);
        }
    }
}

/// `out = a · b` for dense row-major blocks.
fn block_mul<T: LuScalar>(out: &mut [T], a: &[T], b: &[T], n: usize) {
    for r in 0..n {
        for c in 0..n {
            let mut acc = T::zero();
            for k in 0..n {
                acc += a[r * n + k] * b[k * n + c];
            }
            out[r * n + c] = acc;
        }
    }
}

/// `x_block[i] -= m · x_block[k]` where source and destination are disjoint
/// blocks of the same vector.
fn block_vec_mul_sub_split<T: LuScalar>(x: &mut [T], dst: usize, src: usize, m: &[T], n: usize) {
    debug_assert_ne!(dst, src);
    for r in 0..n {
        let mut acc = T::zero();
        for c in 0..n {
            acc += m[r * n + c] * x[src * n + c];
        }
        x[dst * n + r] -= acc;
    }
}

/// Invert a dense block in place via Gauss-Jordan with partial pivoting.
///
/// Returns false on a (numerically) zero pivot.
fn invert_block<T: LuScalar>(block: &mut [T], n: usize, aug: &mut [T]) -> bool {
    let w = 2 * n;
    // augmented [block | I]
    for r in 0..n {
        for c in 0..n {
            aug[r * w + c] = block[r * n + c];
            aug[r * w + n + c] = if r == c { T::one() } else { T::zero() };
        }
    }
    for col in 0..n {
        // partial pivot within the block
        let mut pivot_row = col;
        let mut pivot_mag = aug[col * w + col].norm_sqr();
        for r in (col + 1)..n {
            let mag = aug[r * w + col].norm_sqr();
            if mag > pivot_mag {
                pivot_mag = mag;
                pivot_row = r;
            }
        }
        if pivot_mag < PIVOT_THRESHOLD {
            return false;
        }
        if pivot_row != col {
            for c in 0..w {
                aug.swap(col * w + c, pivot_row * w + c);
            }
        }
        // normalise the pivot row
        let pivot = aug[col * w + col];
        for c in 0..w {
            aug[col * w + c] = aug[col * w + c] / pivot;
        }
        // eliminate the column everywhere else
        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = aug[r * w + col];
            if factor.norm_sqr() == 0.0 {
                continue;
            }
            for c in 0..w {
                let sub = factor * aug[col * w + c];
                aug[r * w + c] -= sub;
            }
        }
    }
    for r in 0..n {
        for c in 0..n {
            block[r * n + c] = aug[r * w + n + c];
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn identity_pattern(n: Idx, entries: &[(Idx, Idx)]) -> LuPattern {
        // build CSR from sorted (row, col) entries, data mapping = identity
        let mut row_indptr = vec![0; n as usize + 1];
        let mut col_indices = Vec::new();
        let mut diag = vec![0; n as usize];
        for (e, &(r, c)) in entries.iter().enumerate() {
            row_indptr[r as usize + 1] += 1;
            col_indices.push(c);
            if r == c {
                diag[r as usize] = e as Idx;
            }
        }
        for i in 0..n as usize {
            row_indptr[i + 1] += row_indptr[i];
        }
        let mapping: Vec<Idx> = (0..entries.len() as Idx).collect();
        LuPattern {
            size: n,
            row_indptr: Arc::new(row_indptr),
            col_indices: Arc::new(col_indices),
            diag: Arc::new(diag),
            data_mapping: Arc::new(mapping),
        }
    }

    #[test]
    fn dense_3x3_real_solve() {
        // dense pattern, block size 1
        let entries: Vec<(Idx, Idx)> = (0..3)
            .flat_map(|r| (0..3).map(move |c| (r, c)))
            .collect();
        let pattern = identity_pattern(3, &entries);
        let mut solver = BlockSparseLuSolver::<f64>::new(pattern, 1);
        let a = [4.0, 1.0, 0.0, 1.0, 4.0, 1.0, 0.0, 1.0, 4.0];
        let b = [1.0, 2.0, 1.0];
        let mut x = [0.0; 3];
        solver.solve(&a, &b, &mut x, false).unwrap();
        // residual check
        for r in 0..3 {
            let mut acc = 0.0;
            for c in 0..3 {
                acc += a[r * 3 + c] * x[c];
            }
            assert!((acc - b[r]).abs() < 1e-12);
        }
    }

    #[test]
    fn complex_block_solve_with_prefactor() {
        // two 2x2 complex blocks on the diagonal plus off-diagonal coupling
        let entries: Vec<(Idx, Idx)> = vec![(0, 0), (0, 1), (1, 0), (1, 1)];
        let pattern = identity_pattern(2, &entries);
        let mut solver = BlockSparseLuSolver::<Complex64>::new(pattern, 2);

        let j = Complex64::new(0.0, 1.0);
        let one = Complex64::new(1.0, 0.0);
        let mut a = vec![Complex64::new(0.0, 0.0); 4 * 4];
        // diagonal blocks dominant, off-diagonal small coupling
        for blk in [0usize, 3] {
            a[blk * 4] = one * 5.0 + j;
            a[blk * 4 + 1] = one * 0.5;
            a[blk * 4 + 2] = one * 0.25;
            a[blk * 4 + 3] = one * 4.0 - j;
        }
        for blk in [1usize, 2] {
            a[blk * 4] = one * 0.1;
            a[blk * 4 + 3] = j * 0.1;
        }
        let b = vec![one, j, one * 2.0, -j];
        let mut x = vec![Complex64::new(0.0, 0.0); 4];

        solver.prefactorize(&a).unwrap();
        solver.solve(&a, &b, &mut x, true).unwrap();

        // verify residual against the block matrix
        let block = |e: usize, r: usize, c: usize| a[e * 4 + r * 2 + c];
        for br in 0..2 {
            for r in 0..2 {
                let mut acc = Complex64::new(0.0, 0.0);
                for bc in 0..2 {
                    let e = br * 2 + bc;
                    for c in 0..2 {
                        acc += block(e, r, c) * x[bc * 2 + c];
                    }
                }
                assert!((acc - b[br * 2 + r]).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let entries: Vec<(Idx, Idx)> = vec![(0, 0), (1, 1)];
        let pattern = identity_pattern(2, &entries);
        let mut solver = BlockSparseLuSolver::<f64>::new(pattern, 1);
        let a = [1.0, 0.0];
        let b = [1.0, 1.0];
        let mut x = [0.0; 2];
        let err = solver.solve(&a, &b, &mut x, false).unwrap_err();
        assert!(matches!(err, PowerGridError::SingularMatrix));
    }

    #[test]
    fn prefactor_survives_value_changes_until_invalidated() {
        let entries: Vec<(Idx, Idx)> = vec![(0, 0)];
        let pattern = identity_pattern(1, &entries);
        let mut solver = BlockSparseLuSolver::<f64>::new(pattern, 1);
        let mut x = [0.0];

        solver.prefactorize(&[2.0]).unwrap();
        solver.solve(&[2.0], &[4.0], &mut x, true).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);

        // stale values are intentionally ignored while factored
        solver.solve(&[8.0], &[4.0], &mut x, true).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);

        solver.invalidate_prefactorization();
        solver.solve(&[8.0], &[4.0], &mut x, true).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fill_in_positions_start_from_zero() {
        // pattern has a fill-in at (2, 1): data_mapping entry is -1
        let mut pattern = identity_pattern(3, &[(0, 0), (0, 1), (1, 0), (1, 1), (1, 2), (2, 1), (2, 2)]);
        {
            let mapping = Arc::get_mut(&mut pattern.data_mapping).unwrap();
            // caller's array has 6 entries; (2, 1) is pure fill-in
            *mapping = vec![0, 1, 2, 3, 4, -1, 5];
        }
        let mut solver = BlockSparseLuSolver::<f64>::new(pattern, 1);
        // A = [[2, 1, 0], [1, 2, 1], [0, 1(fill), 2]] without the fill entry
        let values = [2.0, 1.0, 1.0, 2.0, 1.0, 2.0];
        let b = [1.0, 0.0, 1.0];
        let mut x = [0.0; 3];
        solver.solve(&values, &b, &mut x, false).unwrap();
        // matrix is [[2,1,0],[1,2,1],[0,0,2]] since fill-in starts at zero
        assert!((2.0 * x[0] + x[1] - 1.0).abs() < 1e-12);
        assert!((x[0] + 2.0 * x[1] + x[2]).abs() < 1e-12);
        assert!((2.0 * x[2] - 1.0).abs() < 1e-12);
    }
}
