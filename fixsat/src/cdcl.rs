//! Conflict driven clause learning.
use partial_ref::{partial, PartialRef};

use fixsat_formula::Lit;

use crate::analyze_conflict::analyze_conflict;
use crate::clause::{
    assess_learned_clause, bump_clause_activity, db, decay_clause_activities, ClauseHeader, Tier,
};
use crate::context::{parts::*, Context};
use crate::decision::make_decision;
use crate::incremental::{enqueue_assumption, EnqueueAssumption};
use crate::prop::{backtrack, enqueue_assignment, propagate, Conflict, Reason};
use crate::state::SatState;
use crate::theory::{self, FinalCheck};

/// Find a conflict, learn a clause and backtrack.
///
/// When no conflict is left and the assignment is total and all theory engines accept it, the
/// solver state becomes satisfied and the assignment is captured as the current model.
pub fn conflict_step(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ModalP,
        mut ModelP,
        mut MonitorsP,
        mut SolverStateP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) {
    let conflict = find_conflict(ctx.borrow());

    let conflict = match conflict {
        Ok(()) => {
            let (model, mut ctx) = ctx.split_part_mut(ModelP);
            model.capture(ctx.part(AssignmentP).assignment());
            ctx.part_mut(SolverStateP).sat_state = SatState::Sat;
            return;
        }
        Err(FoundConflict::Assumption) => {
            ctx.part_mut(SolverStateP).sat_state = SatState::UnsatUnderAssumptions;
            return;
        }
        Err(FoundConflict::Interrupted) => {
            ctx.part_mut(SolverStateP).interrupted = true;
            return;
        }
        Err(FoundConflict::Conflict(conflict)) => conflict,
    };

    let backtrack_to = analyze_conflict(ctx.borrow(), conflict);

    let (analyze, mut ctx) = ctx.split_part(AnalyzeConflictP);

    for &cref in analyze.involved() {
        bump_clause_activity(ctx.borrow(), cref);
    }

    decay_clause_activities(ctx.borrow());

    backtrack(ctx.borrow(), backtrack_to);

    let clause = analyze.clause();

    let reason = match clause.len() {
        0 => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            return;
        }
        1 => Reason::Unit,
        2 => {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([clause[0], clause[1]]);
            Reason::Binary([clause[1]])
        }
        _ => {
            let header = assess_learned_clause(ctx.borrow(), clause);
            let cref = db::add_clause(ctx.borrow(), header, clause);
            Reason::Long(cref)
        }
    };

    enqueue_assignment(ctx.borrow(), clause[0], reason);

    theory::add_symmetric_images(ctx.borrow(), clause);
}

/// Return type of [`find_conflict`].
///
/// Specifies whether a conflict was found during propagation, while enqueuing assumptions, or
/// whether termination was requested.
enum FoundConflict {
    Conflict(Conflict),
    Assumption,
    Interrupted,
}

impl From<Conflict> for FoundConflict {
    fn from(conflict: Conflict) -> FoundConflict {
        FoundConflict::Conflict(conflict)
    }
}

/// Find a conflict.
///
/// Returns `Err` if a conflict was found and `Ok` if a satisfying assignment was found instead.
fn find_conflict(
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
        mut IncrementalP,
        mut ModalP,
        mut MonitorsP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
        SolverStateP,
    ),
) -> Result<(), FoundConflict> {
    loop {
        if ctx.part(SolverStateP).terminate_requested() {
            return Err(FoundConflict::Interrupted);
        }

        propagate(ctx.borrow()).map_err(FoundConflict::from)?;

        match enqueue_assumption(ctx.borrow()) {
            EnqueueAssumption::Enqueued => continue,
            EnqueueAssumption::Conflict => return Err(FoundConflict::Assumption),
            EnqueueAssumption::Done => (),
        }

        if !make_decision(ctx.borrow()) {
            // The assignment is total; the theory engines get a last word before the candidate
            // is accepted as a model.
            match theory::final_check(ctx.borrow()) {
                FinalCheck::Accept => return Ok(()),
                FinalCheck::Continue => continue,
                FinalCheck::Conflict(conflict) => return Err(conflict.into()),
            }
        }
    }
}

/// Add a redundant clause in the middle of the search, without restarting.
///
/// This is used for clauses that are implied by the current formula, like symmetric images of
/// learned clauses. The clause is only installed when its watch invariant can be established
/// without propagation or backtracking, otherwise it is silently dropped, which is always sound
/// for redundant clauses.
pub fn add_redundant_clause_during_search(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut TmpDataP,
        mut WatchlistsP,
    ),
    lits: &[Lit],
) {
    if lits.len() < 2 {
        return;
    }

    let (tmp, mut ctx) = ctx.split_part_mut(TmpDataP);
    tmp.lits_2.clear();
    tmp.lits_2.extend_from_slice(lits);
    let lits = &mut tmp.lits_2;

    // The first two positions must hold literals that are unassigned or true, otherwise the
    // watch invariant cannot be established without further work.
    let mut watch_count = 0;
    for i in 0..lits.len() {
        if !ctx.part(AssignmentP).lit_is_false(lits[i]) {
            lits.swap(watch_count, i);
            watch_count += 1;
            if watch_count == 2 {
                break;
            }
        }
    }

    if watch_count < 2 {
        return;
    }

    if lits.len() == 2 {
        ctx.part_mut(BinaryClausesP)
            .add_binary_clause([lits[0], lits[1]]);
    } else {
        let mut header = ClauseHeader::new();
        header.set_tier(Tier::Local);
        db::add_clause(ctx.borrow(), header, lits);
    }
}
