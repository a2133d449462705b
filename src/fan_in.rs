//! Last-one-out barrier.
//!
//! After writing its outcome, every executor increments the job counter
//! through the store and feeds the observation here. The counter crosses
//! `unit_count` exactly once, so exactly one executor sees [`FanIn::Assemble`].

use crate::store::CompletionTick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanIn {
    /// Other units are still outstanding.
    Wait { remaining: usize },
    /// This executor observed the transition to "all units accounted for"
    /// and alone runs the assembly step.
    Assemble,
    /// A redelivered message; the unit already contributed to the counter.
    AlreadyCounted,
    /// The counter went past the number of units. Never happens under
    /// correct dispatch; the job must be failed, not assembled.
    Overflow { observed: usize, unit_count: usize },
}

impl FanIn {
    pub fn decide(tick: &CompletionTick) -> Self {
        if tick.completed_count > tick.unit_count {
            return FanIn::Overflow {
                observed: tick.completed_count,
                unit_count: tick.unit_count,
            };
        }
        if !tick.counted_now {
            return FanIn::AlreadyCounted;
        }
        if tick.completed_count == tick.unit_count {
            FanIn::Assemble
        } else {
            FanIn::Wait {
                remaining: tick.unit_count - tick.completed_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(completed_count: usize, unit_count: usize, counted_now: bool) -> CompletionTick {
        CompletionTick {
            completed_count,
            unit_count,
            counted_now,
        }
    }

    #[test]
    fn waits_until_last_unit() {
        assert_eq!(FanIn::decide(&tick(1, 3, true)), FanIn::Wait { remaining: 2 });
        assert_eq!(FanIn::decide(&tick(2, 3, true)), FanIn::Wait { remaining: 1 });
        assert_eq!(FanIn::decide(&tick(3, 3, true)), FanIn::Assemble);
    }

    #[test]
    fn single_unit_job_assembles_immediately() {
        assert_eq!(FanIn::decide(&tick(1, 1, true)), FanIn::Assemble);
    }

    #[test]
    fn redelivery_at_total_does_not_trigger_again() {
        assert_eq!(FanIn::decide(&tick(3, 3, false)), FanIn::AlreadyCounted);
    }

    #[test]
    fn overflow_is_reported_even_for_duplicates() {
        assert_eq!(
            FanIn::decide(&tick(4, 3, true)),
            FanIn::Overflow {
                observed: 4,
                unit_count: 3
            }
        );
        assert!(matches!(
            FanIn::decide(&tick(4, 3, false)),
            FanIn::Overflow { .. }
        ));
    }
}
