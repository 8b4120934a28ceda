//! Propagation of long clauses.
use partial_ref::{partial, PartialRef};

use fixsat_formula::Lit;

use crate::clause::bump_clause_activity;
use crate::context::{parts::*, Context};

use super::enqueue_assignment;
use super::{Conflict, Reason, Watch};

/// Propagate all literals implied by long clauses watched by the given literal.
///
/// On conflict return the clause propagating the conflicting assignment.
///
/// See [`watch`](crate::prop::watch) for the invariants that this has to uphold.
pub fn propagate_long(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    let false_lit = !lit;

    // The watchlist of lit is taken out of the watchlists while it is processed, so watches can
    // be moved to other lists without aliasing. Watches that stay with lit are compacted into the
    // prefix of the list and the list is truncated afterwards.
    let mut watch_list = std::mem::replace(
        ctx.part_mut(WatchlistsP).watched_by_mut(lit),
        vec![],
    );

    let mut keep = 0;
    let mut read = 0;
    let mut conflict = None;

    'watchers: while read < watch_list.len() {
        let watch = watch_list[read];
        read += 1;

        // If the blocking literal (which is part of the watched clause) is already true, the
        // watched clause is satisfied and we don't even have to look at it.
        if ctx.part(AssignmentP).lit_is_true(watch.blocking) {
            watch_list[keep] = watch;
            keep += 1;
            continue;
        }

        let cref = watch.cref;

        // Ensure the literal we're currently propagating is at index 1. This prepares the literal
        // order for further propagations, as the propagating literal has to be at index 0.
        let mut first = {
            let clause = ctx.part_mut(ClauseAllocP).clause_mut(cref);
            let lits = clause.lits_mut();
            let mut first = lits[0];
            if first == false_lit {
                lits.swap(0, 1);
                first = lits[0];
                lits[1] = false_lit;
            }
            first
        };

        // The new watch has the other watched literal as blocking literal. It either replaces the
        // currently processed watch or is added to another literal's watch list.
        let new_watch = Watch {
            cref,
            blocking: first,
        };

        // If the other watched literal (now the first) isn't the blocking literal, check whether
        // that one is true. If so nothing else needs to be done.
        if first != watch.blocking && ctx.part(AssignmentP).lit_is_true(first) {
            watch_list[keep] = new_watch;
            keep += 1;
            continue;
        }

        // Try to find a non-false unwatched literal to take over the watch.
        let mut replacement = None;
        {
            let clause = ctx.part(ClauseAllocP).clause(cref);
            let lits = clause.lits();
            for (pos, &rest_lit) in lits.iter().enumerate().skip(2) {
                if !ctx.part(AssignmentP).lit_is_false(rest_lit) {
                    replacement = Some((pos, rest_lit));
                    break;
                }
            }
        }

        if let Some((pos, rest_lit)) = replacement {
            // Move the replacement into the watched position and move the watch to its list.
            let clause = ctx.part_mut(ClauseAllocP).clause_mut(cref);
            let lits = clause.lits_mut();
            lits[1] = rest_lit;
            lits[pos] = false_lit;

            debug_assert_ne!(!rest_lit, lit);
            ctx.part_mut(WatchlistsP).add_watch(!rest_lit, new_watch);
            continue 'watchers;
        }

        // No replacement was found, so either we're propagating or we have a conflict.
        watch_list[keep] = new_watch;
        keep += 1;

        if ctx.part(AssignmentP).lit_is_false(first) {
            // Move all unprocessed watches and stop propagating.
            while read < watch_list.len() {
                watch_list[keep] = watch_list[read];
                keep += 1;
                read += 1;
            }

            bump_clause_activity(ctx.borrow(), cref);
            conflict = Some(Conflict::Long(cref));
            break 'watchers;
        }

        enqueue_assignment(ctx.borrow(), first, Reason::Long(cref));
    }

    watch_list.truncate(keep);
    *ctx.part_mut(WatchlistsP).watched_by_mut(lit) = watch_list;

    match conflict {
        Some(conflict) => Err(conflict),
        None => Ok(()),
    }
}
