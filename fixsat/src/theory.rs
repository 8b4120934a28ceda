//! Dispatch of assignments to the theory propagators.
//!
//! The kernel feeds every new assignment to the aggregate engine and the definition engine in
//! that fixed order. Work that has to see the complete propagation queue, like aggregate bound
//! derivations, unfounded set search and modal child checks, runs once the queue is drained.
//! Derived literals flow back through [`crate::agg`]'s notify routine or as materialized clauses;
//! conflicts are materialized into the clause buffer kept here.
use partial_ref::{partial, PartialRef};

use fixsat_formula::Lit;

use crate::agg;
use crate::cdcl::add_redundant_clause_during_search;
use crate::context::{parts::*, Context};
use crate::def;
use crate::modal;
use crate::prop::graph::TheoryToken;
use crate::prop::Conflict;

/// Result of the theory check on a total assignment.
pub enum FinalCheck {
    /// All theory engines accept the assignment as a model.
    Accept,
    /// An engine enqueued further assignments or added clauses; propagation has to resume.
    Continue,
    /// An engine rejected the assignment.
    Conflict(Conflict),
}

/// Dispatch bookkeeping and the materialized theory conflict.
#[derive(Default)]
pub struct TheoryState {
    /// The falsified clause of a `Conflict::Theory`, materialized by the engine that found it.
    conflict: Vec<Lit>,
    /// Registered symmetries as literal permutations indexed by literal code.
    symmetries: Vec<Vec<Lit>>,
}

impl TheoryState {
    /// The clause of the pending theory conflict.
    pub fn conflict_clause(&self) -> &[Lit] {
        &self.conflict
    }

    /// Install a falsified clause as the pending theory conflict.
    pub fn set_conflict(&mut self, lits: &[Lit]) {
        self.conflict.clear();
        self.conflict.extend_from_slice(lits);
    }

    /// Register a literal permutation.
    pub fn add_symmetry(&mut self, map: Vec<Lit>) {
        self.symmetries.push(map);
    }
}

/// Feed a new assignment to each theory engine in registration order.
pub fn propagate_assignment(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut DefP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        SolverConfigP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    agg::propagate_assignment(ctx.borrow(), lit)?;
    def::propagate_assignment(ctx.borrow(), lit)?;
    Ok(())
}

/// Run the deferred theory passes once the propagation queue is empty.
///
/// Returns whether any engine enqueued new assignments, in which case clause propagation has to
/// resume before the next deferred pass.
pub fn propagate_end_of_queue(
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
) -> Result<bool, Conflict> {
    let queued_before = ctx.part(TrailP).trail().len();

    agg::propagate_end_of_queue(ctx.borrow())?;
    def::propagate_end_of_queue(ctx.borrow(), false)?;
    modal::propagate_end_of_queue(ctx.borrow())?;

    Ok(ctx.part(TrailP).trail().len() > queued_before)
}

/// Final theory check before a total assignment is accepted as a model.
pub fn final_check(
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
        SolverStateP,
    ),
) -> FinalCheck {
    let queued_before = ctx.part(TrailP).trail().len();

    if let Err(conflict) = def::propagate_end_of_queue(ctx.borrow(), true) {
        return FinalCheck::Conflict(conflict);
    }
    if ctx.part(TrailP).trail().len() > queued_before {
        return FinalCheck::Continue;
    }

    if let Err(conflict) = def::check_well_founded(ctx.borrow()) {
        return FinalCheck::Conflict(conflict);
    }

    match modal::final_check(ctx.borrow()) {
        Err(conflict) => return FinalCheck::Conflict(conflict),
        Ok(true) => return FinalCheck::Continue,
        Ok(false) => (),
    }

    if ctx.part(TrailP).trail().len() > queued_before {
        FinalCheck::Continue
    } else {
        FinalCheck::Accept
    }
}

/// Undo theory engine state above the given decision level.
pub fn backtrack_theories(
    mut ctx: partial!(Context, mut AggP, mut DefP, mut ModalP, TrailP),
    level: usize,
) {
    agg::backtrack(ctx.borrow(), level);
    def::backtrack(ctx.borrow(), level);
    ctx.part_mut(ModalP).backtrack(level);
}

/// Materialize the reason clause behind a theory token.
///
/// After this call the owning engine's reason cache holds a clause whose first literal is the
/// propagated literal and whose remaining literals are false at levels at or below its level.
pub fn materialize_theory_reason(
    mut ctx: partial!(Context, mut AggP, AssignmentP, SolverConfigP),
    lit: Lit,
    token: TheoryToken,
) {
    match token {
        TheoryToken::Aggregate(index) => agg::materialize_reason(ctx.borrow(), lit, index),
    }
}

/// Map a freshly learned clause through the registered symmetries and add the images as
/// redundant clauses.
pub fn add_symmetric_images(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut TmpDataP,
        mut WatchlistsP,
        SolverConfigP,
        TheoryP,
    ),
    clause: &[Lit],
) {
    if ctx.part(TheoryP).symmetries.is_empty() {
        return;
    }

    let limit = ctx.part(SolverConfigP).symmetry_learning_limit;
    let mut added = 0;

    for sym_index in 0..ctx.part(TheoryP).symmetries.len() {
        if added >= limit {
            break;
        }

        let image: Vec<Lit> = {
            let map = &ctx.part(TheoryP).symmetries[sym_index];
            clause
                .iter()
                .map(|&lit| map.get(lit.code()).cloned().unwrap_or(lit))
                .collect()
        };

        if image[..] == *clause {
            continue;
        }

        add_redundant_clause_during_search(ctx.borrow(), &image);
        added += 1;
    }
}
