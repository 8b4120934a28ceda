//! Scheduling of restarts, reductions and solving steps.
use log::info;

use partial_ref::{partial, PartialRef};

use crate::cdcl::conflict_step;
use crate::clause::gc::collect_garbage;
use crate::clause::reduce::{reduce_locals, reduce_mids};
use crate::clause::Tier;
use crate::context::{parts::*, Context};
use crate::prop::restart;
use crate::state::SatState;

mod luby;

use luby::LubySequence;

/// Scheduling of restarts and clause database maintenance.
#[derive(Default)]
pub struct Schedule {
    conflicts: u64,
    next_restart: u64,
    restarts: u64,
    luby: LubySequence,
}

impl Schedule {
    /// Number of conflicts handled so far.
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }
}

/// Perform one step of the search schedule.
///
/// Returns `false` when the solver state is decided and no further steps are needed.
pub fn schedule_step(
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
        mut ScheduleP,
        mut SolverStateP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) -> bool {
    let (schedule, mut ctx) = ctx.split_part_mut(ScheduleP);

    if ctx.part(SolverStateP).sat_state != SatState::Unknown
        || ctx.part(SolverStateP).interrupted
    {
        return false;
    }

    let config = ctx.part(SolverConfigP);
    let restart_scale = config.luby_restart_interval_scale;
    let locals_interval = config.reduce_locals_interval;
    let mids_interval = config.reduce_mids_interval;

    if schedule.conflicts > 0 && schedule.conflicts % 5000 == 0 {
        let db = ctx.part(ClauseDbP);
        let units = ctx.part(TrailP).top_level_assignment_count();
        info!(
            "confl: {}k rest: {} vars: {} bin: {} irred: {} core: {} mid: {} local: {}",
            schedule.conflicts / 1000,
            schedule.restarts,
            ctx.part(AssignmentP).assignment().len() - units,
            ctx.part(BinaryClausesP).count(),
            db.count_by_tier(Tier::Irred),
            db.count_by_tier(Tier::Core),
            db.count_by_tier(Tier::Mid),
            db.count_by_tier(Tier::Local)
        );
    }

    if schedule.next_restart == schedule.conflicts {
        restart(ctx.borrow());
        schedule.restarts += 1;
        schedule.next_restart += restart_scale * schedule.luby.advance();
    }

    if schedule.conflicts > 0 && schedule.conflicts % locals_interval == 0 {
        reduce_locals(ctx.borrow());
    }
    if schedule.conflicts > 0 && schedule.conflicts % mids_interval == 0 {
        reduce_mids(ctx.borrow());
    }

    collect_garbage(ctx.borrow());

    conflict_step(ctx.borrow());
    schedule.conflicts += 1;

    ctx.part(SolverStateP).sat_state == SatState::Unknown
        && !ctx.part(SolverStateP).interrupted
}
