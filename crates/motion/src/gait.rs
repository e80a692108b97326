//! Trot gait pattern and step phase clock.

use legged::FootSet;

/// Phase clock over one step.
///
/// The phase runs from 0 to 1 over a step; wrapping increments the step
/// counter and signals the caller to rebuild its step plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepClock {
    phase: f64,
    step_count: u64,
}

impl StepClock {
    /// Advances the clock by `dt / step_duration`; true when a new step starts.
    pub fn advance(&mut self, phase_increment: f64) -> bool {
        self.phase += phase_increment;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
            self.step_count += 1;
            return true;
        }
        false
    }

    #[must_use]
    pub fn phase(&self) -> f64 {
        self.phase
    }

    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn reset(&mut self) {
        *self = StepClock::default();
    }
}

/// Diagonal trot: while one diagonal pair stances, the other swings, and the
/// pairs alternate every step.
#[derive(Debug, Clone, Copy)]
pub struct TrotGait {
    swing: FootSet,
}

impl Default for TrotGait {
    fn default() -> Self {
        Self {
            swing: FootSet::RIGHT_DIAGONAL,
        }
    }
}

impl TrotGait {
    #[must_use]
    pub fn swing_feet(&self) -> FootSet {
        self.swing
    }

    #[must_use]
    pub fn stance_feet(&self) -> FootSet {
        self.swing.complement()
    }

    /// Swaps the swinging and stancing pairs.
    pub fn alternate(&mut self) {
        self.swing = self.swing.complement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_wraps_and_counts() {
        let mut clock = StepClock::default();

        for _ in 0..3 {
            assert!(!clock.advance(0.25));
        }
        assert!(clock.advance(0.25));
        assert_eq!(clock.step_count(), 1);
        assert!(clock.phase() < 1e-12);

        clock.reset();
        assert_eq!(clock.step_count(), 0);
        assert_eq!(clock.phase(), 0.0);
    }

    #[test]
    fn pairs_alternate_and_always_partition() {
        let mut gait = TrotGait::default();

        for _ in 0..4 {
            let swing = gait.swing_feet();
            let stance = gait.stance_feet();

            assert!(swing.is_disjoint(stance));
            assert_eq!(swing.union(stance), FootSet::ALL);
            assert_eq!(swing.count(), 2);

            let before = swing;
            gait.alternate();
            assert_eq!(gait.swing_feet(), before.complement());
        }
    }
}
