//! The generalized watch aggregate propagator.
//!
//! Partially watched sets hold exactly one one-sided aggregate, canonicalized during
//! normalization to a monotone lower bound: `head implies (sum of positive weights over the set
//! literals >= bound)`. Upper bounds are turned into lower bounds over the negated literals, and
//! equivalences were split into two such implications beforehand, so the complementary
//! implication provides the other derivation direction.
//!
//! Instead of watching the whole set, a subset of non-false literals is watched whose weights
//! cover the bound plus the largest watched weight of slack. Only when a watched literal is
//! falsified does the propagator scan, largest weight first, for replacement watches. If the
//! remaining non-false weight cannot reach the bound the head is forced false; if the head is
//! true and a watched literal is indispensable it is forced true.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{Lit, Weight};

use crate::context::{parts::*, Context};
use crate::prop::Conflict;

use super::{notify, AggReason, Expl};

/// Watch state of a partially watched set.
#[derive(Clone, Debug, Default)]
pub struct PwState {
    /// Indices of the currently watched literals.
    watched: Vec<u32>,
    is_watched: Vec<bool>,
    /// Whether a falsification watch was ever subscribed for a literal. Subscriptions are sticky;
    /// the handler checks `is_watched` to skip stale entries.
    subscribed: Vec<bool>,
    /// The watch cover was given up after a failed replacement scan and has to be rebuilt after
    /// backtracking.
    pub needs_rewatch: bool,
}

impl PwState {
    pub fn new(len: usize) -> PwState {
        PwState {
            watched: vec![],
            is_watched: vec![false; len],
            subscribed: vec![false; len],
            needs_rewatch: false,
        }
    }
}

/// The head of a partially watched set's aggregate got a value.
pub fn on_head(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TheoryP,
        mut TrailP,
        SolverConfigP,
    ),
    set_index: u32,
) -> Result<(), Conflict> {
    check(ctx.borrow(), set_index)
}

/// A watched literal of a partially watched set was falsified.
pub fn on_watch_falsified(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TheoryP,
        mut TrailP,
        SolverConfigP,
    ),
    set_index: u32,
    wl_index: u32,
) -> Result<(), Conflict> {
    {
        let agg_engine = ctx.part(AggP);
        let state = match agg_engine.pw[set_index as usize].as_ref() {
            Some(state) => state,
            None => return Ok(()),
        };
        // Stale subscription of a literal that is no longer watched.
        if !state.is_watched[wl_index as usize] {
            return Ok(());
        }
    }

    check(ctx.borrow(), set_index)
}

/// Re-establish the watch cover and derive everything forced by its absence.
pub fn check(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TheoryP,
        mut TrailP,
        SolverConfigP,
    ),
    set_index: u32,
) -> Result<(), Conflict> {
    let mut new_subscriptions: Vec<(u32, Lit)> = vec![];
    let mut derivations: Vec<AggReason> = vec![];

    {
        let (agg_engine, mut rest) = ctx.split_part_mut(AggP);
        let assignment = rest.part(AssignmentP);

        let set = &agg_engine.sets[set_index as usize];
        let agg = &set.aggs[0];
        let bound = agg.bound;
        let head_true = assignment.lit_is_true(agg.head);
        let state = agg_engine.pw[set_index as usize]
            .as_mut()
            .expect("partially watched set without watch state");

        // Drop falsified watches.
        let mut covered = set.empty_value();
        let mut watched = std::mem::replace(&mut state.watched, vec![]);
        watched.retain(|&wl_index| {
            let wl = set.wls[wl_index as usize];
            if assignment.lit_is_false(wl.lit) {
                state.is_watched[wl_index as usize] = false;
                false
            } else {
                covered = covered + wl.weight;
                true
            }
        });
        state.watched = watched;

        let max_watched = state
            .watched
            .iter()
            .map(|&wl_index| set.wls[wl_index as usize].weight)
            .max()
            .unwrap_or(Weight::ZERO);

        // Scan for replacements, largest weight first, until the cover has a full watch of
        // slack beyond the bound.
        let target = bound + max_watched;
        let mut exhausted = true;
        for wl_index in (0..set.wls.len()).rev() {
            if covered >= target {
                exhausted = false;
                break;
            }
            if state.is_watched[wl_index] {
                continue;
            }
            let wl = set.wls[wl_index];
            if assignment.lit_is_false(wl.lit) {
                continue;
            }
            state.watched.push(wl_index as u32);
            state.is_watched[wl_index] = true;
            if !state.subscribed[wl_index] {
                state.subscribed[wl_index] = true;
                new_subscriptions.push((wl_index as u32, wl.lit));
            }
            covered = covered + wl.weight;
        }

        let stack_len = 0;
        let reason_base = |prop_lit: Lit, head_lit: Option<Lit>, clause: Vec<Lit>| AggReason {
            set: set_index,
            agg: 0,
            prop_lit,
            expl: Expl::BasedOnPb,
            head_lit,
            stack_len,
            level: 0,
            threshold: bound,
            clause: Some(clause.into_boxed_slice()),
        };

        if covered < bound {
            // The bound is out of reach even with every non-false literal true.
            state.needs_rewatch = true;
            let clause = refutation_clause(set, assignment, !agg.head, bound);
            derivations.push(reason_base(!agg.head, None, clause));
        } else if head_true && exhausted {
            // The cover equals the full possible weight, so indispensable literals are forced.
            for &wl_index in state.watched.iter() {
                let wl = set.wls[wl_index as usize];
                if assignment.lit_value(wl.lit).is_none() && covered - wl.weight < bound {
                    let mut clause =
                        refutation_clause(set, assignment, wl.lit, bound + wl.weight);
                    clause.insert(1, !agg.head);
                    derivations.push(reason_base(wl.lit, Some(agg.head), clause));
                }
            }
        }
    }

    {
        let agg_engine = ctx.part_mut(AggP);
        for (wl_index, lit) in new_subscriptions {
            agg_engine.subscribe_pw_watch(set_index, wl_index, lit);
        }
    }

    for derivation in derivations {
        notify(ctx.borrow(), derivation)?;
    }

    Ok(())
}

/// Build the clause explaining that the bound is unreachable: the derived literal followed by
/// enough currently false set literals, largest weight first, to pin the possible weight below
/// the given threshold.
fn refutation_clause(
    set: &super::TypedSet,
    assignment: &crate::prop::Assignment,
    derived: Lit,
    threshold: Weight,
) -> Vec<Lit> {
    let mut clause = vec![derived];

    let mut possible = set.best_possible();
    for wl_index in (0..set.wls.len()).rev() {
        if possible < threshold {
            break;
        }
        let wl = set.wls[wl_index];
        if assignment.lit_is_false(wl.lit) && wl.lit != !derived {
            clause.push(wl.lit);
            possible = possible - wl.weight;
        }
    }

    clause
}
