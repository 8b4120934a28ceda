//! The fully watched aggregate propagator.
//!
//! Every literal of the set is watched permanently. The certain bound (the aggregate value when
//! all unassigned literals are taken false) and the possible bound (all unassigned taken true)
//! are maintained incrementally, so head and body derivations are direct bound comparisons. All
//! derivations run in the end-of-queue pass over the sets whose bookkeeping changed.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{AggSem, AggSign, Lit, Weight};

use crate::context::{parts::*, Context};
use crate::prop::Conflict;

use super::set::{AggOp, TypedSet};
use super::{notify, AggReason, Expl};

/// An undo record for one set literal assignment.
#[derive(Copy, Clone, Debug)]
pub struct FwEntry {
    pub wl: u32,
    pub became_true: bool,
    pub level: u32,
    pub old_cb: Weight,
    pub old_pb: Weight,
}

/// An undo record for one head assignment.
#[derive(Copy, Clone, Debug)]
pub struct HeadEntry {
    pub agg: u32,
    pub level: u32,
}

/// Incremental bound state of a fully watched set.
#[derive(Clone, Debug, Default)]
pub struct FwState {
    pub cb: Weight,
    pub pb: Weight,
    pub truth: Vec<Option<bool>>,
    pub head_value: Vec<Option<bool>>,
    pub stack: Vec<FwEntry>,
    pub head_stack: Vec<HeadEntry>,
}

impl FwState {
    /// Set up the bound state from the current (root) assignment.
    pub fn init(set: &TypedSet, assignment: &[Option<bool>]) -> FwState {
        let mut state = FwState {
            cb: set.empty_value(),
            pb: set.empty_value(),
            truth: vec![None; set.wls.len()],
            head_value: vec![None; set.aggs.len()],
            stack: vec![],
            head_stack: vec![],
        };

        for (index, wl) in set.wls.iter().enumerate() {
            match assignment[wl.lit.index()].map(|v| v == wl.lit.is_positive()) {
                Some(true) => {
                    state.truth[index] = Some(true);
                    state.cb = set.op.combine(state.cb, wl.weight);
                    state.pb = set.op.combine(state.pb, wl.weight);
                }
                Some(false) => {
                    state.truth[index] = Some(false);
                }
                None => {
                    state.pb = set.op.combine(state.pb, wl.weight);
                }
            }
        }

        for (index, agg) in set.aggs.iter().enumerate() {
            state.head_value[index] =
                assignment[agg.head.index()].map(|v| v == agg.head.is_positive());
        }

        state
    }

    /// Recompute the possible bound by scanning the non-false literals, for operations without an
    /// inverse.
    fn rescan_pb(&self, set: &TypedSet) -> Weight {
        let mut value = set.empty_value();
        for (index, wl) in set.wls.iter().enumerate() {
            if self.truth[index] != Some(false) {
                value = set.op.combine(value, wl.weight);
            }
        }
        value
    }

    /// Undo all records above the given decision level.
    pub fn backtrack(&mut self, level: usize) {
        while let Some(&entry) = self.stack.last() {
            if entry.level as usize <= level {
                break;
            }
            self.stack.pop();
            self.truth[entry.wl as usize] = None;
            self.cb = entry.old_cb;
            self.pb = entry.old_pb;
        }
        while let Some(&entry) = self.head_stack.last() {
            if entry.level as usize <= level {
                break;
            }
            self.head_stack.pop();
            self.head_value[entry.agg as usize] = None;
        }
    }
}

/// A literal of a fully watched set got a value.
pub fn on_set_lit(
    mut ctx: partial!(Context, mut AggP, TrailP),
    set_index: u32,
    wl_index: u32,
    becomes_true: bool,
) {
    let level = ctx.part(TrailP).current_level() as u32;
    let agg_engine = ctx.part_mut(AggP);
    let set = &agg_engine.sets[set_index as usize];
    let state = agg_engine.fw[set_index as usize]
        .as_mut()
        .expect("set literal watch on a set without fully watched state");

    if state.truth[wl_index as usize].is_some() {
        return;
    }

    let weight = set.wls[wl_index as usize].weight;

    let entry = FwEntry {
        wl: wl_index,
        became_true: becomes_true,
        level,
        old_cb: state.cb,
        old_pb: state.pb,
    };
    state.stack.push(entry);
    state.truth[wl_index as usize] = Some(becomes_true);

    if becomes_true {
        state.cb = set.op.combine(state.cb, weight);
    } else {
        state.pb = match set.op.remove(state.pb, weight) {
            Some(value) => value,
            None => state.rescan_pb(set),
        };
    }

    agg_engine.mark_dirty(set_index);
}

/// The head of an aggregate of a fully watched set got a value.
pub fn on_head(mut ctx: partial!(Context, mut AggP, AssignmentP, TrailP), set_index: u32, agg_index: u32) {
    let level = ctx.part(TrailP).current_level() as u32;
    let head = ctx.part(AggP).sets[set_index as usize].aggs[agg_index as usize].head;
    let value = ctx.part(AssignmentP).lit_value(head);

    let agg_engine = ctx.part_mut(AggP);
    let state = agg_engine.fw[set_index as usize]
        .as_mut()
        .expect("head watch on a set without fully watched state");

    if state.head_value[agg_index as usize].is_some() || value.is_none() {
        return;
    }

    state.head_value[agg_index as usize] = value;
    state.head_stack.push(HeadEntry {
        agg: agg_index,
        level,
    });

    agg_engine.mark_dirty(set_index);
}

/// Derive everything the current bounds allow for one set.
pub fn propagate_set(
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
    let derivations = {
        let agg_engine = ctx.part(AggP);
        let set = &agg_engine.sets[set_index as usize];
        match agg_engine.fw[set_index as usize].as_ref() {
            Some(state) => derive_for_set(set, state, set_index),
            None => vec![],
        }
    };

    for derivation in derivations {
        notify(ctx.borrow(), derivation)?;
    }

    Ok(())
}

/// Collect the derivations justified by the current bounds of a set.
fn derive_for_set(set: &TypedSet, state: &FwState, set_index: u32) -> Vec<AggReason> {
    let mut out = vec![];
    let stack_len = state.stack.len() as u32;

    for (agg_index, agg) in set.aggs.iter().enumerate() {
        let certainly_true = match agg.sign {
            AggSign::Lower => state.cb >= agg.bound,
            AggSign::Upper => state.pb <= agg.bound,
        };
        let certainly_false = match agg.sign {
            AggSign::Lower => state.pb < agg.bound,
            AggSign::Upper => state.cb > agg.bound,
        };

        let reason_base = |prop_lit: Lit, expl: Expl, head_lit: Option<Lit>| AggReason {
            set: set_index,
            agg: agg_index as u32,
            prop_lit,
            expl,
            head_lit,
            stack_len,
            level: 0,
            threshold: agg.bound,
            clause: None,
        };

        // Head derivations. Implication heads only propagate towards the negated head.
        if certainly_true && agg.sem != AggSem::Implication {
            let expl = match agg.sign {
                AggSign::Lower => Expl::BasedOnCb,
                AggSign::Upper => Expl::BasedOnPb,
            };
            out.push(reason_base(agg.head, expl, None));
        }
        if certainly_false {
            let expl = match agg.sign {
                AggSign::Lower => Expl::BasedOnPb,
                AggSign::Upper => Expl::BasedOnCb,
            };
            out.push(reason_base(!agg.head, expl, None));
        }

        // Body derivations need a decided head.
        let head_value = match state.head_value[agg_index as usize] {
            Some(value) => value,
            None => continue,
        };
        let head_lit = if head_value { agg.head } else { !agg.head };

        // An unsatisfied implication derives nothing from a false head.
        if !head_value && agg.sem == AggSem::Implication {
            continue;
        }

        let constraint_holds = head_value;

        for (wl_index, wl) in set.wls.iter().enumerate() {
            if state.truth[wl_index].is_some() {
                continue;
            }

            match (constraint_holds, agg.sign) {
                (true, AggSign::Lower) => {
                    // The bound must be reached; a literal whose loss makes that impossible is
                    // forced true.
                    if pb_without(set, state, wl_index) < agg.bound {
                        out.push(reason_base(wl.lit, Expl::BasedOnPb, Some(head_lit)));
                    }
                }
                (true, AggSign::Upper) => {
                    // The bound must not be exceeded; a literal whose addition exceeds it is
                    // forced false.
                    if set.op.combine(state.cb, wl.weight) > agg.bound {
                        let expl = match set.op {
                            AggOp::Max => Expl::HeadOnly,
                            _ => Expl::BasedOnCb,
                        };
                        out.push(reason_base(!wl.lit, expl, Some(head_lit)));
                    }
                }
                (false, AggSign::Lower) => {
                    // The value must stay below the bound; a literal reaching it is forced
                    // false.
                    if set.op.combine(state.cb, wl.weight) >= agg.bound {
                        let expl = match set.op {
                            AggOp::Max => Expl::HeadOnly,
                            _ => Expl::BasedOnCb,
                        };
                        out.push(reason_base(!wl.lit, expl, Some(head_lit)));
                    }
                }
                (false, AggSign::Upper) => {
                    // The value must exceed the bound; a literal whose loss caps the value at
                    // the bound is forced true.
                    if pb_without(set, state, wl_index) <= agg.bound {
                        out.push(reason_base(wl.lit, Expl::BasedOnPb, Some(head_lit)));
                    }
                }
            }
        }
    }

    out
}

/// The possible bound with one literal taken false.
pub(crate) fn pb_without(set: &TypedSet, state: &FwState, wl_index: usize) -> Weight {
    let weight = set.wls[wl_index].weight;
    match set.op.remove(state.pb, weight) {
        Some(value) => value,
        None => {
            let mut value = set.empty_value();
            for (index, wl) in set.wls.iter().enumerate() {
                if index != wl_index && state.truth[index] != Some(false) {
                    value = set.op.combine(value, wl.weight);
                }
            }
            value
        }
    }
}

/// Reconstruct the reason clause for a derivation of this set.
///
/// The clause starts with the derived literal, then the negated head assignment when the
/// derivation used it, then the negations of the set literal assignments that produced the
/// relevant bound. With subset minimization the scan stops once the recorded threshold is
/// decisive.
pub fn explain(
    set: &TypedSet,
    state: &FwState,
    reason: &AggReason,
    lit: Lit,
    subset_minimize: bool,
) -> Vec<Lit> {
    let mut clause = vec![lit];

    if let Some(head_lit) = reason.head_lit {
        clause.push(!head_lit);
    }

    if reason.expl == Expl::HeadOnly {
        return clause;
    }

    let include_true = reason.expl != Expl::BasedOnPb;
    let include_false = reason.expl != Expl::BasedOnCb;

    // Sum explanations can stop early once the accumulated bound argument is decisive on its
    // own. The other operations always take the full contribution list.
    let early_stop = subset_minimize && set.op == AggOp::Sum;
    let mut running_cb = set.empty_value();
    let mut running_pb = set.best_possible();

    for entry in state.stack.iter().take(reason.stack_len as usize) {
        let wl = set.wls[entry.wl as usize];

        if entry.became_true {
            running_cb = set.op.combine(running_cb, wl.weight);
            if include_true {
                clause.push(!wl.lit);
            }
        } else {
            running_pb = running_pb - wl.weight;
            if include_false {
                clause.push(wl.lit);
            }
        }

        if early_stop {
            let decisive = match reason.expl {
                Expl::BasedOnCb => running_cb > reason.threshold,
                Expl::BasedOnPb => running_pb < reason.threshold,
                _ => false,
            };
            if decisive {
                break;
            }
        }
    }

    clause
}

#[cfg(test)]
mod tests {
    use super::*;

    use fixsat_formula::wls;

    use crate::agg::set::PropScheme;

    fn sum_set(wls: Vec<fixsat_formula::WL>) -> TypedSet {
        TypedSet {
            set_id: 0,
            wls,
            op: AggOp::Sum,
            esv: Weight::ZERO,
            offset: Weight::ZERO,
            aggs: vec![],
            scheme: PropScheme::FullyWatched,
        }
    }

    /// The incrementally maintained bounds stay exact functions of the recorded truth values.
    fn check_bounds(set: &TypedSet, state: &FwState) {
        let mut cb = set.empty_value();
        let mut pb = set.empty_value();
        for (index, wl) in set.wls.iter().enumerate() {
            match state.truth[index] {
                Some(true) => {
                    cb = set.op.combine(cb, wl.weight);
                    pb = set.op.combine(pb, wl.weight);
                }
                Some(false) => {}
                None => pb = set.op.combine(pb, wl.weight),
            }
        }
        assert_eq!(state.cb, cb);
        assert_eq!(state.pb, pb);
    }

    #[test]
    fn bounds_follow_assignments_and_backtracking() {
        let set = sum_set(wls![1 * 2, 2 * 3, 3 * 5, 4 * 7].to_vec());
        let assignment = vec![None; 4];
        let mut state = FwState::init(&set, &assignment);

        check_bounds(&set, &state);
        assert_eq!(state.pb, Weight::new(17));

        let apply = |state: &mut FwState, wl: u32, value: bool, level: u32| {
            let entry = FwEntry {
                wl,
                became_true: value,
                level,
                old_cb: state.cb,
                old_pb: state.pb,
            };
            state.stack.push(entry);
            state.truth[wl as usize] = Some(value);
            let weight = set.wls[wl as usize].weight;
            if value {
                state.cb = set.op.combine(state.cb, weight);
            } else {
                state.pb = set.op.remove(state.pb, weight).unwrap();
            }
        };

        apply(&mut state, 1, true, 1);
        check_bounds(&set, &state);
        apply(&mut state, 3, false, 1);
        check_bounds(&set, &state);
        apply(&mut state, 0, true, 2);
        check_bounds(&set, &state);

        assert_eq!(state.cb, Weight::new(5));
        assert_eq!(state.pb, Weight::new(10));
        assert_eq!(pb_without(&set, &state, 2), Weight::new(5));

        state.backtrack(1);
        check_bounds(&set, &state);
        assert_eq!(state.truth[0], None);
        assert_eq!(state.truth[1], Some(true));

        state.backtrack(0);
        check_bounds(&set, &state);
        assert_eq!(state.pb, Weight::new(17));
        assert_eq!(state.cb, Weight::ZERO);
    }

    #[test]
    fn max_possible_bound_rescans() {
        let set = TypedSet {
            set_id: 0,
            wls: wls![1 * 2, 2 * 5, 3 * 9].to_vec(),
            op: AggOp::Max,
            esv: Weight::MIN,
            offset: Weight::ZERO,
            aggs: vec![],
            scheme: PropScheme::FullyWatched,
        };

        let assignment = vec![None; 3];
        let mut state = FwState::init(&set, &assignment);
        assert_eq!(state.pb, Weight::new(9));

        // Falsifying the maximum forces a rescan of the remaining literals.
        state.stack.push(FwEntry {
            wl: 2,
            became_true: false,
            level: 1,
            old_cb: state.cb,
            old_pb: state.pb,
        });
        state.truth[2] = Some(false);
        state.pb = match set.op.remove(state.pb, Weight::new(9)) {
            Some(value) => value,
            None => state.rescan_pb(&set),
        };
        assert_eq!(state.pb, Weight::new(5));
    }
}
