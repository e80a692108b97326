//! Deformation history of the contact feet.
//!
//! The compliant-contact rows need the two previously commanded deformations
//! of every contact foot. Since the contact set changes from tick to tick,
//! the history is keyed by foot identity and only re-permuted into contact
//! order on demand.

use legged::{Foot, FootSet};
use nalgebra::{DVector, Vector3};

#[derive(Debug, Default, Clone, Copy)]
struct FootDeformations {
    /// `d_{k−1}`
    previous: Vector3<f64>,
    /// `d_{k−2}`
    older: Vector3<f64>,
}

#[derive(Debug, Default, Clone)]
pub struct DeformationHistory {
    entries: [FootDeformations; 4],
}

impl DeformationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotates the history after a solve.
    ///
    /// `deformations` holds the freshly commanded `d_des`, three entries per
    /// contact foot in contact order. Feet out of contact lose their history.
    pub fn advance(&mut self, deformations: &DVector<f64>, contact: FootSet) {
        debug_assert_eq!(deformations.len(), 3 * contact.count());

        for foot in Foot::ALL {
            let entry = &mut self.entries[foot.index()];
            match contact.position(foot) {
                Some(row) => {
                    entry.older = entry.previous;
                    entry.previous =
                        Vector3::from_row_slice(&deformations.as_slice()[3 * row..3 * row + 3]);
                }
                None => *entry = FootDeformations::default(),
            }
        }
    }

    /// The two history vectors aligned to the given contact order.
    #[must_use]
    pub fn aligned(&self, contact: FootSet) -> (DVector<f64>, DVector<f64>) {
        let mut previous = DVector::zeros(3 * contact.count());
        let mut older = DVector::zeros(3 * contact.count());

        for (row, foot) in contact.iter().enumerate() {
            let entry = &self.entries[foot.index()];
            previous.rows_mut(3 * row, 3).copy_from(&entry.previous);
            older.rows_mut(3 * row, 3).copy_from(&entry.older);
        }

        (previous, older)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deformations(feet: FootSet, scale: f64) -> DVector<f64> {
        let mut values = DVector::zeros(3 * feet.count());
        for (row, foot) in feet.iter().enumerate() {
            values[3 * row + 2] = scale * (foot.index() + 1) as f64;
        }
        values
    }

    #[test]
    fn rotation_shifts_the_backlog() {
        let mut history = DeformationHistory::new();
        let contact = FootSet::ALL;

        history.advance(&deformations(contact, 1.0), contact);
        history.advance(&deformations(contact, 2.0), contact);

        let (previous, older) = history.aligned(contact);
        assert_eq!(previous[2], 2.0);
        assert_eq!(older[2], 1.0);
        assert_eq!(previous[11], 8.0);
        assert_eq!(older[11], 4.0);
    }

    #[test]
    fn leaving_contact_clears_the_history() {
        let mut history = DeformationHistory::new();
        history.advance(&deformations(FootSet::ALL, 1.0), FootSet::ALL);

        // only the left diagonal stays in contact
        let contact = FootSet::LEFT_DIAGONAL;
        history.advance(&deformations(contact, 3.0), contact);

        let (previous, older) = history.aligned(FootSet::ALL);
        // LF kept its backlog
        assert_eq!(previous[2], 3.0);
        assert_eq!(older[2], 1.0);
        // RF was dropped and reads zero
        assert_eq!(previous[5], 0.0);
        assert_eq!(older[5], 0.0);
    }

    #[test]
    fn alignment_follows_contact_order_not_foot_index() {
        let mut history = DeformationHistory::new();
        history.advance(&deformations(FootSet::ALL, 1.0), FootSet::ALL);

        // RIGHT_DIAGONAL stacks RF then LH
        let (previous, _) = history.aligned(FootSet::RIGHT_DIAGONAL);
        assert_eq!(previous.len(), 6);
        assert_eq!(previous[2], 2.0); // RF is foot index 1
        assert_eq!(previous[5], 3.0); // LH is foot index 2
    }
}
