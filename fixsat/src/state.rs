//! Miscellaneous solver state.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Satisfiability state.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SatState {
    Unknown,
    Sat,
    Unsat,
    UnsatUnderAssumptions,
}

impl Default for SatState {
    fn default() -> SatState {
        SatState::Unknown
    }
}

/// Miscellaneous solver state.
///
/// Anything larger or any larger group of related state variables should be moved into a separate
/// part of [`Context`](crate::context::Context).
pub struct SolverState {
    pub sat_state: SatState,
    /// Set from any thread to request cooperative termination; polled between conflict steps.
    pub terminate: Arc<AtomicBool>,
    /// Whether the last search loop exited because termination was requested.
    pub interrupted: bool,
    /// Theories were loaded or changed and have to be (re)initialized before the next search.
    pub theories_dirty: bool,
}

impl Default for SolverState {
    fn default() -> SolverState {
        SolverState {
            sat_state: SatState::Unknown,
            terminate: Arc::new(AtomicBool::new(false)),
            interrupted: false,
            theories_dirty: false,
        }
    }
}

impl SolverState {
    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }
}

/// Snapshot of the most recent satisfying assignment.
///
/// The search may destroy the live assignment after a model was found, for example when the
/// optimization driver restarts with an invalidating clause. Models are therefore copied out as
/// soon as they are accepted.
#[derive(Default)]
pub struct Model {
    assignment: Vec<Option<bool>>,
}

impl Model {
    /// Store the given full assignment as the current model.
    pub fn capture(&mut self, assignment: &[Option<bool>]) {
        self.assignment.clear();
        self.assignment.extend_from_slice(assignment);
    }

    /// Assignment of the stored model.
    ///
    /// Only valid if the solver state is SAT.
    pub fn assignment(&self) -> &[Option<bool>] {
        &self.assignment
    }

    /// Whether a given literal is true in the stored model.
    pub fn lit_is_true(&self, lit: fixsat_formula::Lit) -> bool {
        self.assignment[lit.index()] == Some(lit.is_positive())
    }
}
