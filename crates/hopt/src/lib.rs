//! # hopt
//!
//! Hierarchical optimization: a lexicographic cascade of equality and
//! inequality constrained least-squares problems. Each priority level is
//! optimized inside the optimum set of every level above it, tracked as an
//! affine set `x = x̄ + Z ξ` with `Z` a null-space basis of the stacked
//! higher-priority equalities. Inequalities of solved levels carry down
//! relaxed by their optimal slack.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::{debug, warn};

pub mod nullspace;
pub mod qp;

pub use nullspace::nullspace_basis;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Level {level} is {actual} columns wide, expected {expected}")]
    ColumnMismatch {
        level: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Level {level} has {rows} constraint rows but {targets} targets")]
    TargetMismatch {
        level: usize,
        rows: usize,
        targets: usize,
    },
    #[error("No level has any rows, the problem dimension is undefined")]
    EmptyProblem,
}

pub type Result<T> = std::result::Result<T, Error>;

/// One priority level: equalities `A x = b` and inequalities `C x ≤ d`.
///
/// Zero-height matrices are allowed and mean the block is absent.
#[derive(Debug, Clone)]
pub struct TaskLevel {
    pub eq_matrix: DMatrix<f64>,
    pub eq_vector: DVector<f64>,
    pub ineq_matrix: DMatrix<f64>,
    pub ineq_vector: DVector<f64>,
}

impl TaskLevel {
    #[must_use]
    pub fn new(
        eq_matrix: DMatrix<f64>,
        eq_vector: DVector<f64>,
        ineq_matrix: DMatrix<f64>,
        ineq_vector: DVector<f64>,
    ) -> Self {
        Self {
            eq_matrix,
            eq_vector,
            ineq_matrix,
            ineq_vector,
        }
    }

    /// A level with only equality rows.
    #[must_use]
    pub fn equality(eq_matrix: DMatrix<f64>, eq_vector: DVector<f64>) -> Self {
        let width = eq_matrix.ncols();
        Self::new(eq_matrix, eq_vector, DMatrix::zeros(0, width), DVector::zeros(0))
    }

    /// A level with only inequality rows.
    #[must_use]
    pub fn inequality(ineq_matrix: DMatrix<f64>, ineq_vector: DVector<f64>) -> Self {
        let width = ineq_matrix.ncols();
        Self::new(DMatrix::zeros(0, width), DVector::zeros(0), ineq_matrix, ineq_vector)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.eq_matrix.nrows() == 0 && self.ineq_matrix.nrows() == 0
    }
}

/// Counters a caller can surface as diagnostics; none of them is an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Levels with no rows at all.
    pub skipped_levels: usize,
    /// Active-set solves that hit their iteration cap.
    pub qp_iteration_overflows: usize,
    /// The first processed level had equality rows of rank zero.
    pub top_level_rank_zero: bool,
}

#[derive(Debug, Clone)]
pub struct Solution {
    /// The lexicographic minimizer.
    pub x: DVector<f64>,
    /// `‖A_p x − b_p‖` per input level, at the returned x.
    pub equality_residuals: Vec<f64>,
    pub diagnostics: Diagnostics,
}

/// The cascade solver. Stateless between calls apart from its tolerances.
#[derive(Debug, Clone, Copy)]
pub struct HierarchicalQp {
    /// Relative singular-value cutoff for the null-space rank decision.
    tolerance: f64,
    /// Tikhonov weight that breaks ties towards the minimum-norm step.
    regularization: f64,
    /// Iteration cap per active-set solve.
    max_qp_iterations: usize,
}

impl Default for HierarchicalQp {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            regularization: 1e-8,
            max_qp_iterations: 200,
        }
    }
}

impl HierarchicalQp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_max_qp_iterations(mut self, max_qp_iterations: usize) -> Self {
        self.max_qp_iterations = max_qp_iterations;
        self
    }

    /// Solves the cascade, highest priority first.
    ///
    /// Never fails for numerical reasons: rank loss and iteration overflows
    /// are reported through [`Diagnostics`] and the best iterate is kept.
    pub fn solve(&self, levels: &[TaskLevel]) -> Result<Solution> {
        let width = problem_width(levels)?;

        let mut x = DVector::zeros(width);
        let mut basis = DMatrix::identity(width, width);
        let mut carried: Vec<(DMatrix<f64>, DVector<f64>)> = Vec::new();
        let mut diagnostics = Diagnostics::default();
        let mut first_processed = true;

        for (index, level) in levels.iter().enumerate() {
            if level.is_empty() {
                diagnostics.skipped_levels += 1;
                continue;
            }

            let n_eq = level.eq_matrix.nrows();
            let n_ineq = level.ineq_matrix.nrows();
            let freedom = basis.ncols();

            if freedom == 0 && n_ineq == 0 {
                // nothing left to decide; the residual is recorded below
                debug!(level = index, "no freedom left, equality level becomes a residual");
                first_processed = false;
                continue;
            }

            let reduced_eq = &level.eq_matrix * &basis;
            let reduced_rhs = &level.eq_vector - &level.eq_matrix * &x;

            let (step, slack, overflowed) =
                self.solve_level(&reduced_eq, &reduced_rhs, level, &carried, &basis, &x);
            if overflowed {
                diagnostics.qp_iteration_overflows += 1;
            }

            x += &basis * &step;

            if n_ineq > 0 {
                carried.push((level.ineq_matrix.clone(), &level.ineq_vector + slack));
            }

            if n_eq > 0 && freedom > 0 {
                let update = nullspace_basis(&reduced_eq, self.tolerance);
                let rank = freedom - update.ncols();

                if rank == 0 && first_processed {
                    diagnostics.top_level_rank_zero = true;
                    warn!(level = index, "equality rows of the top level have rank zero");
                } else if rank < n_eq.min(freedom) {
                    debug!(level = index, rank, rows = n_eq, "rank-deficient equality level");
                }

                basis = if update.ncols() == 0 {
                    DMatrix::zeros(width, 0)
                } else {
                    &basis * &update
                };
            }

            first_processed = false;
        }

        let equality_residuals = levels
            .iter()
            .map(|level| {
                if level.eq_matrix.nrows() == 0 {
                    0.0
                } else {
                    (&level.eq_matrix * &x - &level.eq_vector).norm()
                }
            })
            .collect();

        Ok(Solution {
            x,
            equality_residuals,
            diagnostics,
        })
    }

    /// Reduced QP of one level in the variables `(ξ, w)`.
    ///
    /// Returns the step in the null-space coordinates, the optimal slack of
    /// the level's inequalities, and whether the active set overflowed.
    fn solve_level(
        &self,
        reduced_eq: &DMatrix<f64>,
        reduced_rhs: &DVector<f64>,
        level: &TaskLevel,
        carried: &[(DMatrix<f64>, DVector<f64>)],
        basis: &DMatrix<f64>,
        x: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>, bool) {
        let freedom = basis.ncols();
        let n_ineq = level.ineq_matrix.nrows();
        let dim = freedom + n_ineq;

        let mut hessian = DMatrix::zeros(dim, dim);
        let mut gradient = DVector::zeros(dim);
        if freedom > 0 {
            let mut top = reduced_eq.transpose() * reduced_eq;
            for i in 0..freedom {
                top[(i, i)] += self.regularization;
            }
            hessian.view_mut((0, 0), (freedom, freedom)).copy_from(&top);
            gradient
                .rows_mut(0, freedom)
                .copy_from(&(-(reduced_eq.transpose() * reduced_rhs)));
        }
        for i in 0..n_ineq {
            hessian[(freedom + i, freedom + i)] = 1.0;
        }

        let carried_rows: usize = carried.iter().map(|(c, _)| c.nrows()).sum();
        let total_rows = carried_rows + 2 * n_ineq;
        let mut constraints = DMatrix::zeros(total_rows, dim);
        let mut bounds = DVector::zeros(total_rows);

        let mut row = 0;
        for (matrix, vector) in carried {
            let rows = matrix.nrows();
            if freedom > 0 {
                constraints
                    .view_mut((row, 0), (rows, freedom))
                    .copy_from(&(matrix * basis));
            }
            bounds.rows_mut(row, rows).copy_from(&(vector - matrix * x));
            row += rows;
        }

        let mut start = DVector::zeros(dim);
        if n_ineq > 0 {
            if freedom > 0 {
                constraints
                    .view_mut((row, 0), (n_ineq, freedom))
                    .copy_from(&(&level.ineq_matrix * basis));
            }
            let violation = &level.ineq_matrix * x - &level.ineq_vector;
            bounds.rows_mut(row, n_ineq).copy_from(&(-&violation));
            for i in 0..n_ineq {
                constraints[(row + i, freedom + i)] = -1.0;
                start[freedom + i] = violation[i].max(0.0);
            }
            row += n_ineq;

            // slack positivity: −w ≤ 0
            for i in 0..n_ineq {
                constraints[(row + i, freedom + i)] = -1.0;
            }
        }

        let outcome = qp::solve(
            &hessian,
            &gradient,
            &constraints,
            &bounds,
            start,
            self.max_qp_iterations,
        );

        let step = outcome.solution.rows(0, freedom).into_owned();
        let slack = outcome.solution.rows(freedom, n_ineq).into_owned();
        (step, slack, !outcome.converged)
    }
}

/// Common column count of all non-empty blocks.
fn problem_width(levels: &[TaskLevel]) -> Result<usize> {
    let mut width = None;

    for (index, level) in levels.iter().enumerate() {
        for (matrix, vector, rows) in [
            (&level.eq_matrix, &level.eq_vector, level.eq_matrix.nrows()),
            (&level.ineq_matrix, &level.ineq_vector, level.ineq_matrix.nrows()),
        ] {
            if rows == 0 {
                continue;
            }
            if vector.len() != rows {
                return Err(Error::TargetMismatch {
                    level: index,
                    rows,
                    targets: vector.len(),
                });
            }
            match width {
                None => width = Some(matrix.ncols()),
                Some(expected) if expected != matrix.ncols() => {
                    return Err(Error::ColumnMismatch {
                        level: index,
                        expected,
                        actual: matrix.ncols(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    width.ok_or(Error::EmptyProblem)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    use super::*;

    fn eq(matrix: DMatrix<f64>, vector: DVector<f64>) -> TaskLevel {
        TaskLevel::equality(matrix, vector)
    }

    #[test]
    fn single_full_rank_level() {
        let levels = [eq(dmatrix![2.0, 0.0; 0.0, 4.0], dvector![2.0, 8.0])];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        assert_relative_eq!(solution.x[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(solution.x[1], 2.0, epsilon = 1e-4);
        assert!(solution.equality_residuals[0] < 1e-4);
    }

    #[test]
    fn lower_level_optimizes_inside_the_null_space() {
        let levels = [
            eq(dmatrix![1.0, 1.0], dvector![2.0]),
            eq(dmatrix![1.0, 0.0], dvector![5.0]),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        // level 1 is achievable on the level-0 line: x = (5, -3)
        assert_relative_eq!(solution.x[0], 5.0, epsilon = 1e-3);
        assert_relative_eq!(solution.x[1], -3.0, epsilon = 1e-3);
        assert_relative_eq!(solution.x[0] + solution.x[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn conflicting_level_becomes_a_residual() {
        let levels = [
            eq(dmatrix![1.0, 0.0], dvector![1.0]),
            eq(dmatrix![1.0, 0.0], dvector![3.0]),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        assert_relative_eq!(solution.x[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(solution.equality_residuals[1], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn minimum_norm_solution_through_the_cascade() {
        let levels = [
            eq(dmatrix![1.0, 1.0, 1.0], dvector![3.0]),
            eq(DMatrix::identity(3, 3), DVector::zeros(3)),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        for i in 0..3 {
            assert_relative_eq!(solution.x[i], 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn inequality_level_constrains_lower_levels() {
        // level 0 demands x ≥ 1, level 1 pulls towards 0
        let levels = [
            TaskLevel::inequality(dmatrix![-1.0], dvector![-1.0]),
            eq(dmatrix![1.0], dvector![0.0]),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        assert_relative_eq!(solution.x[0], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn infeasible_inequality_is_absorbed_by_slack() {
        // level 0 pins x = 5, level 1 asks x ≤ 0.1: only the slack can give
        let levels = [
            eq(dmatrix![1.0], dvector![5.0]),
            TaskLevel::inequality(dmatrix![1.0], dvector![0.1]),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        assert_relative_eq!(solution.x[0], 5.0, epsilon = 1e-3);
        assert_eq!(solution.diagnostics.qp_iteration_overflows, 0);
    }

    #[test]
    fn empty_levels_are_skipped() {
        let levels = [
            eq(dmatrix![1.0], dvector![2.0]),
            TaskLevel::new(
                DMatrix::zeros(0, 1),
                DVector::zeros(0),
                DMatrix::zeros(0, 1),
                DVector::zeros(0),
            ),
            eq(dmatrix![1.0], dvector![7.0]),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        assert_eq!(solution.diagnostics.skipped_levels, 1);
        assert_relative_eq!(solution.x[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(solution.equality_residuals[2], 5.0, epsilon = 1e-3);
    }

    #[test]
    fn raising_priority_never_hurts_the_raised_task() {
        let task_a = (dmatrix![1.0], dvector![1.0]);
        let task_b = (dmatrix![1.0], dvector![2.0]);

        // both tasks on one level: the compromise splits the difference
        let merged = [eq(dmatrix![1.0; 1.0], dvector![1.0, 2.0])];
        let compromise = HierarchicalQp::new().solve(&merged).unwrap();
        let compromise_residual = (task_a.1[0] - compromise.x[0]).abs();

        // task a raised above task b: it is now met exactly
        let split = [
            eq(task_a.0.clone(), task_a.1.clone()),
            eq(task_b.0.clone(), task_b.1.clone()),
        ];
        let prioritized = HierarchicalQp::new().solve(&split).unwrap();
        let prioritized_residual = (task_a.1[0] - prioritized.x[0]).abs();

        assert!(prioritized_residual <= compromise_residual + 1e-6);
    }

    #[test]
    fn zero_top_level_sets_the_rank_diagnostic() {
        let levels = [
            eq(DMatrix::zeros(2, 2), DVector::zeros(2)),
            eq(dmatrix![1.0, 0.0], dvector![4.0]),
        ];
        let solution = HierarchicalQp::new().solve(&levels).unwrap();

        assert!(solution.diagnostics.top_level_rank_zero);
        // the zero level costs nothing, the next one is still met
        assert_relative_eq!(solution.x[0], 4.0, epsilon = 1e-3);
    }

    #[test]
    fn dimension_errors_are_reported() {
        let levels = [
            eq(dmatrix![1.0, 0.0], dvector![1.0]),
            eq(dmatrix![1.0], dvector![1.0]),
        ];
        assert!(matches!(
            HierarchicalQp::new().solve(&levels),
            Err(Error::ColumnMismatch { level: 1, .. })
        ));

        assert!(matches!(
            HierarchicalQp::new().solve(&[]),
            Err(Error::EmptyProblem)
        ));
    }
}
