//! Rank-revealing null-space bases.

use nalgebra::{DMatrix, SVD};

/// Orthonormal basis of the null space of `matrix`, as columns.
///
/// Rank is decided by a relative singular-value cutoff. A (near-)zero matrix
/// has full null space; a full-column-rank matrix returns zero columns. The
/// decomposition is an SVD rather than Gram-Schmidt: the constraint matrices
/// this sees are routinely ill-conditioned near singular postures.
#[must_use]
pub fn nullspace_basis(matrix: &DMatrix<f64>, tolerance: f64) -> DMatrix<f64> {
    let n = matrix.ncols();
    if n == 0 {
        return DMatrix::zeros(0, 0);
    }
    if matrix.nrows() == 0 {
        return DMatrix::identity(n, n);
    }

    // pad with zero rows so the thin SVD carries the full right basis
    let padded = if matrix.nrows() < n {
        let mut padded = DMatrix::zeros(n, n);
        padded
            .view_mut((0, 0), (matrix.nrows(), n))
            .copy_from(matrix);
        padded
    } else {
        matrix.clone()
    };

    let svd = SVD::new(padded, false, true);
    let singular_values = &svd.singular_values;
    let v_t = svd.v_t.as_ref().expect("SVD was computed with v requested");

    let largest = singular_values.max();
    let threshold = tolerance * largest;
    let rank = singular_values.iter().filter(|sigma| **sigma > threshold).count();

    let mut basis = DMatrix::zeros(n, n - rank);
    for (column, row) in (rank..n).enumerate() {
        basis.set_column(column, &v_t.row(row).transpose());
    }
    basis
}
