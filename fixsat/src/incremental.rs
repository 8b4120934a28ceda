//! Incremental solving and assumptions.
use partial_ref::{partial, split_borrow, PartialRef};

use fixsat_formula::Lit;

use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, full_restart, Reason};
use crate::state::SatState;

/// Incremental solving.
#[derive(Default)]
pub struct Incremental {
    assumptions: Vec<Lit>,
    failed_core: Vec<Lit>,
    assumption_levels: usize,
}

impl Incremental {
    /// Currently active assumptions.
    pub fn assumptions(&self) -> &[Lit] {
        &self.assumptions
    }

    /// Current number of decision levels used for assumptions.
    pub fn assumption_levels(&self) -> usize {
        self.assumption_levels
    }

    /// Resets assumption_levels to zero on a full restart.
    pub fn full_restart(&mut self) {
        self.assumption_levels = 0;
    }

    /// Subset of assumptions that made the formula unsatisfiable.
    pub fn failed_core(&self) -> &[Lit] {
        &self.failed_core
    }
}

/// Return type of [`enqueue_assumption`].
pub enum EnqueueAssumption {
    Done,
    Enqueued,
    Conflict,
}

/// Change the currently active assumptions.
pub fn set_assumptions(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut DefP,
        mut ModalP,
        mut IncrementalP,
        mut MonitorsP,
        mut SolverStateP,
        mut TrailP,
        mut VsidsP,
    ),
    assumptions: &[Lit],
) {
    full_restart(ctx.borrow());

    let state = ctx.part_mut(SolverStateP);

    state.sat_state = match state.sat_state {
        SatState::Unsat => SatState::Unsat,
        SatState::Sat | SatState::UnsatUnderAssumptions | SatState::Unknown => SatState::Unknown,
    };

    let incremental = ctx.part_mut(IncrementalP);

    incremental.assumptions.clear();
    incremental.assumptions.extend_from_slice(assumptions);
}

/// Enqueue another assumption if possible.
///
/// Returns whether an assumption was enqueued, whether no assumptions are left or whether the
/// assumptions result in a conflict.
pub fn enqueue_assumption(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut ImplGraphP,
        mut IncrementalP,
        mut MonitorsP,
        mut TmpDataP,
        mut TrailP,
        ClauseAllocP,
        SolverConfigP,
    ),
) -> EnqueueAssumption {
    while let Some(&assumption) = ctx
        .part(IncrementalP)
        .assumptions
        .get(ctx.part(TrailP).current_level())
    {
        match ctx.part(AssignmentP).lit_value(assumption) {
            Some(false) => {
                analyze_assumption_conflict(ctx.borrow(), assumption);
                return EnqueueAssumption::Conflict;
            }
            Some(true) => {
                // The next assumption is already implied by other assumptions so we can remove
                // it.
                let level = ctx.part(TrailP).current_level();
                let incremental = ctx.part_mut(IncrementalP);
                incremental.assumptions.swap_remove(level);
            }
            None => {
                ctx.part_mut(TrailP).new_decision_level();
                enqueue_assignment(ctx.borrow(), assumption, Reason::Unit);
                let (incremental, ctx) = ctx.split_part_mut(IncrementalP);
                incremental.assumption_levels = ctx.part(TrailP).current_level();
                return EnqueueAssumption::Enqueued;
            }
        }
    }
    EnqueueAssumption::Done
}

/// Analyze a conflicting set of assumptions.
///
/// Compute a set of incompatible assumptions given an assumption that is incompatible with the
/// assumptions enqueued so far.
fn analyze_assumption_conflict(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut IncrementalP,
        mut TmpDataP,
        AssignmentP,
        ClauseAllocP,
        ImplGraphP,
        SolverConfigP,
        TrailP,
    ),
    assumption: Lit,
) {
    split_borrow!(lit_ctx = &(ClauseAllocP) ctx);

    {
        let (incremental, mut ctx) = ctx.split_part_mut(IncrementalP);
        let tmp = ctx.part_mut(TmpDataP);

        incremental.failed_core.clear();
        incremental.failed_core.push(assumption);

        tmp.flags[assumption.index()] = true;
    }
    let mut flag_count = 1;

    let trail_len = ctx.part(TrailP).trail().len();

    for pos in (0..trail_len).rev() {
        let lit = ctx.part(TrailP).trail()[pos];
        if !ctx.part(TmpDataP).flags[lit.index()] {
            continue;
        }
        ctx.part_mut(TmpDataP).flags[lit.index()] = false;
        flag_count -= 1;

        let reason = *ctx.part(ImplGraphP).reason(lit.var());

        match reason {
            Reason::Unit => {
                if ctx.part(ImplGraphP).level(lit.var()) > 0 {
                    ctx.part_mut(IncrementalP).failed_core.push(lit);
                }
            }
            Reason::Theory(token) => {
                crate::theory::materialize_theory_reason(ctx.borrow(), lit, token);
                let (agg, mut ctx) = ctx.split_part(AggP);
                for &reason_lit in &agg.reason_clause(token)[1..] {
                    let flag = &mut ctx.part_mut(TmpDataP).flags[reason_lit.index()];
                    if !*flag {
                        *flag = true;
                        flag_count += 1;
                    }
                }
            }
            reason => {
                for &reason_lit in reason.lits(&lit_ctx) {
                    let flag = &mut ctx.part_mut(TmpDataP).flags[reason_lit.index()];
                    if !*flag {
                        *flag = true;
                        flag_count += 1;
                    }
                }
            }
        }

        if flag_count == 0 {
            break;
        }
    }
}
