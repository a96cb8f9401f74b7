//! Execution budget shared by the evaluator and value operations.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::SandboxError;

/// Statements plus loop iterations a program may execute.
pub const MAX_STEPS: usize = 100_000;

/// Element visits inside builtins, comparisons and copies.
pub const MAX_WORK: usize = 10_000_000;

/// Counters for one run plus the flag the host sets to stop it early.
#[derive(Debug, Default)]
pub struct Budget {
    steps: Cell<usize>,
    work: Cell<usize>,
    cancel: Arc<AtomicBool>,
}

impl Budget {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// One statement or loop iteration.
    pub fn tick(&self) -> Result<(), SandboxError> {
        self.check_cancelled()?;
        let steps = self.steps.get() + 1;
        self.steps.set(steps);
        if steps > MAX_STEPS {
            return Err(SandboxError::Limit(format!(
                "execution exceeded {} steps",
                MAX_STEPS
            )));
        }
        Ok(())
    }

    /// `units` element visits done without a statement boundary.
    pub fn charge(&self, units: usize) -> Result<(), SandboxError> {
        self.check_cancelled()?;
        let work = self.work.get().saturating_add(units);
        self.work.set(work);
        if work > MAX_WORK {
            return Err(SandboxError::Limit(format!(
                "execution exceeded {} operations",
                MAX_WORK
            )));
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), SandboxError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SandboxError::Limit("execution cancelled".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_run_out() {
        let budget = Budget::default();
        for _ in 0..MAX_STEPS {
            budget.tick().unwrap();
        }
        assert!(matches!(budget.tick(), Err(SandboxError::Limit(_))));
    }

    #[test]
    fn work_is_counted_in_bulk() {
        let budget = Budget::default();
        budget.charge(MAX_WORK).unwrap();
        assert!(matches!(budget.charge(1), Err(SandboxError::Limit(_))));
        // Steps are a separate allowance.
        budget.tick().unwrap();
    }

    #[test]
    fn cancellation_stops_both_counters() {
        let cancel = Arc::new(AtomicBool::new(false));
        let budget = Budget::new(Arc::clone(&cancel));
        budget.tick().unwrap();
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(
            budget.tick(),
            Err(SandboxError::Limit("execution cancelled".to_string()))
        );
        assert!(budget.charge(1).is_err());
    }
}
