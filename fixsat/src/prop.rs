//! Unit propagation.
use partial_ref::{partial, PartialRef};

use crate::context::{parts::*, Context};
use crate::theory;

pub mod assignment;
pub mod binary;
pub mod graph;
pub mod long;
pub mod watch;

pub use assignment::{backtrack, enqueue_assignment, full_restart, restart, Assignment, Trail};
pub use binary::{propagate_binary, BinaryClauses};
pub use graph::{Conflict, ImplGraph, ImplNode, Reason};
pub use long::propagate_long;
pub use watch::{enable_watchlists, Watch, Watchlists};

/// Propagate all enqueued assignments to a fixpoint.
///
/// This runs watched literal propagation over binary and long clauses for each enqueued literal,
/// feeds the literal to the theory engines, and once the queue is drained lets the theory engines
/// run their deferred passes. Deferred passes may enqueue further assignments, in which case
/// clause propagation resumes.
///
/// On conflict the clause or theory explanation propagating the conflicting assignment is
/// returned.
pub fn propagate(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut ModalP,
        mut MonitorsP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) -> Result<(), Conflict> {
    enable_watchlists(ctx.borrow());

    loop {
        while let Some(lit) = ctx.part_mut(TrailP).pop_queue() {
            propagate_binary(ctx.borrow(), lit)?;
            propagate_long(ctx.borrow(), lit)?;
            theory::propagate_assignment(ctx.borrow(), lit)?;
        }

        if !theory::propagate_end_of_queue(ctx.borrow())? {
            return Ok(());
        }
    }
}
