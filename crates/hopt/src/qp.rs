//! Dense strictly-convex QP with inequality constraints.
//!
//! Primal active-set method for `min ½ zᵀHz + gᵀz  s.t.  Cz ≤ d` with H
//! positive definite and a feasible starting point. The working-set KKT
//! systems are solved by LU with a least-squares fallback when dependent
//! constraints make the system singular.

use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Step and multiplier magnitudes below this are treated as zero.
const ZERO_TOLERANCE: f64 = 1e-10;

/// Minimum directional derivative for a constraint to block a step.
const BLOCKING_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct QpOutcome {
    pub solution: DVector<f64>,
    pub iterations: usize,
    /// False when the iteration cap was hit; the solution is the best
    /// feasible iterate seen.
    pub converged: bool,
}

/// Solves the QP starting from the feasible point `start`.
pub fn solve(
    hessian: &DMatrix<f64>,
    gradient: &DVector<f64>,
    constraints: &DMatrix<f64>,
    bounds: &DVector<f64>,
    start: DVector<f64>,
    max_iterations: usize,
) -> QpOutcome {
    let n = hessian.nrows();
    debug_assert_eq!(gradient.len(), n);
    if constraints.nrows() > 0 {
        debug_assert_eq!(constraints.ncols(), n);
    }

    let mut z = start;
    let mut working_set: Vec<usize> = Vec::new();

    for iteration in 0..max_iterations {
        let (step, multipliers) = solve_kkt(hessian, gradient, constraints, bounds, &z, &working_set);

        if step.norm() <= ZERO_TOLERANCE {
            // stationary on the working set: check optimality via the multipliers
            let most_negative = multipliers
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1));

            match most_negative {
                Some((index, value)) if *value < -ZERO_TOLERANCE => {
                    working_set.remove(index);
                }
                _ => {
                    return QpOutcome {
                        solution: z,
                        iterations: iteration,
                        converged: true,
                    };
                }
            }
        } else {
            // longest step that keeps all inactive constraints satisfied
            let mut alpha = 1.0;
            let mut blocking = None;

            for row in 0..constraints.nrows() {
                if working_set.contains(&row) {
                    continue;
                }
                let direction = constraints.row(row).transpose().dot(&step);
                if direction <= BLOCKING_TOLERANCE {
                    continue;
                }
                let slack = bounds[row] - constraints.row(row).transpose().dot(&z);
                let ratio = (slack / direction).max(0.0);
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some(row);
                }
            }

            z += alpha * &step;
            if let Some(row) = blocking {
                working_set.push(row);
            }
        }
    }

    warn!(max_iterations, "active-set QP hit its iteration cap");
    QpOutcome {
        solution: z,
        iterations: max_iterations,
        converged: false,
    }
}

/// Solves the equality-constrained subproblem on the working set.
///
/// Returns the step `p` and the working-set multipliers.
fn solve_kkt(
    hessian: &DMatrix<f64>,
    gradient: &DVector<f64>,
    constraints: &DMatrix<f64>,
    bounds: &DVector<f64>,
    z: &DVector<f64>,
    working_set: &[usize],
) -> (DVector<f64>, DVector<f64>) {
    let n = hessian.nrows();
    let m = working_set.len();
    let dim = n + m;

    let mut kkt = DMatrix::zeros(dim, dim);
    kkt.view_mut((0, 0), (n, n)).copy_from(hessian);

    let mut rhs = DVector::zeros(dim);
    rhs.rows_mut(0, n).copy_from(&(-(hessian * z + gradient)));

    for (slot, &row) in working_set.iter().enumerate() {
        let constraint_row = constraints.row(row);
        kkt.view_mut((n + slot, 0), (1, n)).copy_from(&constraint_row);
        kkt.view_mut((0, n + slot), (n, 1))
            .copy_from(&constraint_row.transpose());
        rhs[n + slot] = bounds[row] - constraint_row.transpose().dot(z);
    }

    let solution = match kkt.clone().lu().solve(&rhs) {
        Some(solution) => solution,
        None => {
            // dependent working set: fall back to the minimum-norm solve
            warn!("singular KKT system, using least-squares fallback");
            match lstsq::lstsq(&kkt, &rhs, 1e-12) {
                Ok(result) => result.solution,
                Err(error) => {
                    warn!(error, "KKT least-squares fallback failed");
                    DVector::zeros(dim)
                }
            }
        }
    };

    let step = solution.rows(0, n).into_owned();
    let multipliers = solution.rows(n, m).into_owned();
    (step, multipliers)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    use super::*;

    #[test]
    fn unconstrained_minimum() {
        let hessian = dmatrix![2.0, 0.0; 0.0, 2.0];
        let gradient = dvector![-2.0, -4.0];
        let constraints = DMatrix::zeros(0, 0);
        let bounds = dvector![];

        let outcome = solve(
            &hessian,
            &gradient,
            &constraints,
            &bounds,
            dvector![0.0, 0.0],
            50,
        );

        assert!(outcome.converged);
        assert_relative_eq!(outcome.solution[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(outcome.solution[1], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn active_bound_clips_the_minimum() {
        // minimize (z - 2)², subject to z ≤ 1
        let hessian = dmatrix![2.0];
        let gradient = dvector![-4.0];
        let constraints = dmatrix![1.0];
        let bounds = dvector![1.0];

        let outcome = solve(&hessian, &gradient, &constraints, &bounds, dvector![0.0], 50);

        assert!(outcome.converged);
        assert_relative_eq!(outcome.solution[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn inactive_constraints_are_ignored() {
        // minimum at (1, 1) is interior to z ≤ 10
        let hessian = dmatrix![2.0, 0.0; 0.0, 2.0];
        let gradient = dvector![-2.0, -2.0];
        let constraints = dmatrix![1.0, 0.0; 0.0, 1.0];
        let bounds = dvector![10.0, 10.0];

        let outcome = solve(
            &hessian,
            &gradient,
            &constraints,
            &bounds,
            dvector![0.0, 0.0],
            50,
        );

        assert!(outcome.converged);
        assert_relative_eq!(outcome.solution[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(outcome.solution[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn corner_of_two_constraints() {
        // minimize ‖z − (2, 2)‖², subject to z₁ ≤ 1 and z₂ ≤ 0.5
        let hessian = dmatrix![2.0, 0.0; 0.0, 2.0];
        let gradient = dvector![-4.0, -4.0];
        let constraints = dmatrix![1.0, 0.0; 0.0, 1.0];
        let bounds = dvector![1.0, 0.5];

        let outcome = solve(
            &hessian,
            &gradient,
            &constraints,
            &bounds,
            dvector![0.0, 0.0],
            50,
        );

        assert!(outcome.converged);
        assert_relative_eq!(outcome.solution[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(outcome.solution[1], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn constraint_released_when_multiplier_turns_negative() {
        // start on the bound z₁ ≤ 0 which is not active at the optimum (-1, 0)
        let hessian = dmatrix![2.0, 0.0; 0.0, 2.0];
        let gradient = dvector![2.0, 0.0];
        let constraints = dmatrix![1.0, 0.0];
        let bounds = dvector![0.0];

        let outcome = solve(
            &hessian,
            &gradient,
            &constraints,
            &bounds,
            dvector![0.0, 0.0],
            50,
        );

        assert!(outcome.converged);
        assert_relative_eq!(outcome.solution[0], -1.0, epsilon = 1e-9);
    }
}
