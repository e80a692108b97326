//! Grouping of elementary tasks into priority levels.

use hopt::TaskLevel;
use nalgebra::{DMatrix, DVector};
use rbd::RigidBodyDynamics;
use strum::IntoEnumIterator;

use crate::{
    Error, Result,
    tasks::{ControlTasks, TaskContext, TaskName},
};

/// An ordered priority list over the elementary tasks.
///
/// Level index is priority: level 0 is handled first and every later level is
/// optimized strictly inside the optimum set of the levels before it.
#[derive(Debug, Clone)]
pub struct PrioritizedTasks {
    levels: Vec<Vec<TaskName>>,
    tasks: ControlTasks,
}

impl PrioritizedTasks {
    /// The default stack-up: dynamics, actuation limits, motion tracking,
    /// contact model, regularization.
    #[must_use]
    pub fn default_levels() -> Vec<Vec<TaskName>> {
        vec![
            vec![TaskName::FloatingBaseEom],
            vec![TaskName::TorqueLimits, TaskName::FrictionAndForceModulation],
            vec![
                TaskName::LinearBaseMotionTracking,
                TaskName::AngularBaseMotionTracking,
                TaskName::SwingFeetMotionTracking,
            ],
            vec![TaskName::ContactConstraints],
            vec![TaskName::EnergyAndForcesOptimization],
        ]
    }

    #[must_use]
    pub fn new(tasks: ControlTasks) -> Self {
        Self {
            levels: Self::default_levels(),
            tasks,
        }
    }

    /// Uses a custom priority list; every task must appear exactly once.
    pub fn with_levels(tasks: ControlTasks, levels: Vec<Vec<TaskName>>) -> Result<Self> {
        for name in TaskName::iter() {
            let count = levels.iter().flatten().filter(|task| **task == name).count();
            if count != 1 {
                return Err(Error::PriorityList { name, count });
            }
        }

        Ok(Self { levels, tasks })
    }

    #[must_use]
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn levels(&self) -> &[Vec<TaskName>] {
        &self.levels
    }

    #[must_use]
    pub fn tasks(&self) -> &ControlTasks {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut ControlTasks {
        &mut self.tasks
    }

    /// Stacks the elementary tasks of priority `p` in list order.
    #[must_use]
    pub fn task_at_priority<R: RigidBodyDynamics>(
        &self,
        priority: usize,
        context: &TaskContext<R>,
    ) -> TaskLevel {
        let width = ControlTasks::width(context.oracle);
        let parts: Vec<TaskLevel> = self.levels[priority]
            .iter()
            .map(|name| self.tasks.build(*name, context))
            .collect();
        stack(&parts, width)
    }

    /// All priority levels, ready for the cascade.
    #[must_use]
    pub fn stacked_levels<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> Vec<TaskLevel> {
        (0..self.levels.len())
            .map(|priority| self.task_at_priority(priority, context))
            .collect()
    }
}

/// Row-stacks several tasks into one level.
fn stack(parts: &[TaskLevel], width: usize) -> TaskLevel {
    let eq_rows: usize = parts.iter().map(|part| part.eq_matrix.nrows()).sum();
    let ineq_rows: usize = parts.iter().map(|part| part.ineq_matrix.nrows()).sum();

    let mut eq_matrix = DMatrix::zeros(eq_rows, width);
    let mut eq_vector = DVector::zeros(eq_rows);
    let mut ineq_matrix = DMatrix::zeros(ineq_rows, width);
    let mut ineq_vector = DVector::zeros(ineq_rows);

    let mut eq_row = 0;
    let mut ineq_row = 0;
    for part in parts {
        let rows = part.eq_matrix.nrows();
        if rows > 0 {
            eq_matrix
                .view_mut((eq_row, 0), (rows, width))
                .copy_from(&part.eq_matrix);
            eq_vector.rows_mut(eq_row, rows).copy_from(&part.eq_vector);
            eq_row += rows;
        }

        let rows = part.ineq_matrix.nrows();
        if rows > 0 {
            ineq_matrix
                .view_mut((ineq_row, 0), (rows, width))
                .copy_from(&part.ineq_matrix);
            ineq_vector
                .rows_mut(ineq_row, rows)
                .copy_from(&part.ineq_vector);
            ineq_row += rows;
        }
    }

    TaskLevel::new(eq_matrix, eq_vector, ineq_matrix, ineq_vector)
}

#[cfg(test)]
mod tests {
    use crate::tasks::{ContactConstraintType, TaskGains};

    use super::*;

    fn control_tasks() -> ControlTasks {
        ControlTasks::new(TaskGains::default(), ContactConstraintType::SoftKv, 0.004).unwrap()
    }

    #[test]
    fn default_levels_cover_every_task_once() {
        let levels = PrioritizedTasks::default_levels();
        for name in TaskName::iter() {
            assert_eq!(
                levels.iter().flatten().filter(|task| **task == name).count(),
                1
            );
        }
        assert_eq!(levels.len(), 5);
    }

    #[test]
    fn custom_levels_are_validated() {
        let missing = vec![vec![TaskName::FloatingBaseEom]];
        assert!(matches!(
            PrioritizedTasks::with_levels(control_tasks(), missing),
            Err(Error::PriorityList { .. })
        ));

        let mut duplicated = PrioritizedTasks::default_levels();
        duplicated[0].push(TaskName::FloatingBaseEom);
        assert!(
            PrioritizedTasks::with_levels(control_tasks(), duplicated).is_err()
        );

        assert!(
            PrioritizedTasks::with_levels(control_tasks(), PrioritizedTasks::default_levels())
                .is_ok()
        );
    }
}
