//! The aggregate constraint engine.
//!
//! Weighted sets arrive through the constraint API, are canonicalized by the normalization
//! pipeline in [`transform`] and are then propagated either by the fully watched scheme in [`fw`]
//! (exact certain/possible bounds maintained incrementally) or by the generalized watch scheme in
//! [`pw`] (a minimal watched subset that covers the remaining slack of one-sided aggregates).
use partial_ref::{partial, PartialRef};

use fixsat_formula::lit::LitIdx;
use fixsat_formula::{AggSem, AggSign, Lit, Var, Weight, WL};

use rustc_hash::FxHashMap;

use crate::config::AggClauseSaving;
use crate::context::{parts::*, Context};
use crate::prop::graph::TheoryToken;
use crate::prop::{enqueue_assignment, Conflict, Reason};

pub mod fw;
pub mod pw;
pub mod set;
pub mod transform;

pub use set::{Agg, AggOp, PropScheme, TypedSet};

use fw::FwState;
use pw::PwState;

/// A weighted set as it arrived through the API, before normalization.
#[derive(Clone, Debug)]
pub struct PendingSet {
    pub set_id: usize,
    pub wls: Vec<WL>,
    pub kind: fixsat_formula::AggKind,
}

/// An aggregate as it arrived through the API, before normalization.
#[derive(Clone, Debug)]
pub struct PendingAgg {
    pub head: Lit,
    pub set_id: usize,
    pub bound: Weight,
    pub sign: AggSign,
    pub sem: AggSem,
    pub def_id: Option<usize>,
}

/// Why a literal was derived, used to reconstruct the explanation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Expl {
    /// Follows from the head assignment alone.
    HeadOnly,
    /// Based on the certain bound, explained by the true set literals.
    BasedOnCb,
    /// Based on the possible bound, explained by the false set literals.
    BasedOnPb,
    /// Needs both bounds.
    BasedOnBoth,
}

/// Reason descriptor for a derived literal.
///
/// The clause is materialized lazily unless the clause saving policy or the propagation scheme
/// fills it eagerly.
pub struct AggReason {
    pub set: u32,
    pub agg: u32,
    pub prop_lit: Lit,
    pub expl: Expl,
    /// The asserted head literal at derivation time when the derived literal is a set literal.
    pub head_lit: Option<Lit>,
    /// Length of the set's propagation stack at derivation time.
    pub stack_len: u32,
    /// Decision level of the derivation, for truncation on backtrack.
    pub level: u32,
    /// Bound value the explanation has to reach to be decisive, used by subset minimization.
    pub threshold: Weight,
    /// The materialized reason clause, with `prop_lit` first.
    pub clause: Option<Box<[Lit]>>,
}

/// Subscription of a set to an assignment event.
#[derive(Copy, Clone, Debug)]
pub enum AggWatch {
    /// A literal of the set got a value; `becomes_true` tells which polarity this entry tracks.
    SetLit {
        set: u32,
        wl: u32,
        becomes_true: bool,
    },
    /// The head of an aggregate got a value.
    Head { set: u32, agg: u32 },
    /// A generalized watch of a partially watched set was falsified. Entries may be stale; the
    /// handler verifies them against the current watch set.
    PwFalsified { set: u32, wl: u32 },
}

/// The aggregate constraint engine.
#[derive(Default)]
pub struct AggEngine {
    /// Sets waiting for normalization.
    pending_sets: Vec<PendingSet>,
    pending_aggs: Vec<PendingAgg>,

    /// Normalized sets with their propagator state.
    pub(crate) sets: Vec<TypedSet>,
    pub(crate) fw: Vec<Option<FwState>>,
    pub(crate) pw: Vec<Option<PwState>>,

    /// Per literal code: the watches fired when the literal becomes true.
    watches: Vec<Vec<AggWatch>>,

    /// Sets with unprocessed bookkeeping changes, deduplicated by flag.
    dirty: Vec<u32>,
    dirty_flag: Vec<bool>,

    /// Reason descriptors for literals derived by this engine, in trail order.
    reasons: Vec<AggReason>,

    /// Aggregate-defined heads: variable index to (set, agg).
    def_heads: FxHashMap<usize, (u32, u32)>,
}

impl AggEngine {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.watches.resize(count * 2, vec![]);
    }

    /// Queue a parsed set for normalization.
    pub fn add_pending_set(&mut self, pending: PendingSet) {
        self.pending_sets.push(pending);
    }

    /// Queue a parsed aggregate for normalization.
    pub fn add_pending_agg(&mut self, pending: PendingAgg) {
        self.pending_aggs.push(pending);
    }

    /// Whether there is unnormalized input.
    pub fn has_pending(&self) -> bool {
        !self.pending_sets.is_empty() || !self.pending_aggs.is_empty()
    }

    /// Take the queued input for normalization.
    pub fn take_pending(&mut self) -> (Vec<PendingSet>, Vec<PendingAgg>) {
        (
            std::mem::replace(&mut self.pending_sets, vec![]),
            std::mem::replace(&mut self.pending_aggs, vec![]),
        )
    }

    /// The materialized clause behind a reason token.
    ///
    /// Panics if the clause was not materialized yet.
    pub fn reason_clause(&self, token: TheoryToken) -> &[Lit] {
        let TheoryToken::Aggregate(index) = token;
        self.reasons[index as usize]
            .clause
            .as_ref()
            .expect("aggregate reason clause was not materialized")
    }

    /// Register a finalized set and subscribe its watches.
    pub(crate) fn install_set(&mut self, set: TypedSet, fw: Option<FwState>, pw: Option<PwState>) {
        let set_index = self.sets.len() as u32;

        match set.scheme {
            PropScheme::FullyWatched => {
                for (wl_index, wl) in set.wls.iter().enumerate() {
                    self.watches[wl.lit.code()].push(AggWatch::SetLit {
                        set: set_index,
                        wl: wl_index as u32,
                        becomes_true: true,
                    });
                    self.watches[(!wl.lit).code()].push(AggWatch::SetLit {
                        set: set_index,
                        wl: wl_index as u32,
                        becomes_true: false,
                    });
                }
                for (agg_index, agg) in set.aggs.iter().enumerate() {
                    self.watches[agg.head.code()].push(AggWatch::Head {
                        set: set_index,
                        agg: agg_index as u32,
                    });
                    self.watches[(!agg.head).code()].push(AggWatch::Head {
                        set: set_index,
                        agg: agg_index as u32,
                    });
                }
            }
            PropScheme::PartiallyWatched => {
                // The initial generalized watches are subscribed by the caller once the watch set
                // is chosen; head activation is always watched.
                for (agg_index, agg) in set.aggs.iter().enumerate() {
                    self.watches[agg.head.code()].push(AggWatch::Head {
                        set: set_index,
                        agg: agg_index as u32,
                    });
                }
            }
        }

        for (agg_index, agg) in set.aggs.iter().enumerate() {
            if agg.sem == AggSem::Def {
                self.def_heads
                    .insert(agg.head.index(), (set_index, agg_index as u32));
            }
        }

        self.sets.push(set);
        self.fw.push(fw);
        self.pw.push(pw);
        self.dirty_flag.push(false);
    }

    /// Subscribe a falsification watch for a generalized watch entry.
    pub(crate) fn subscribe_pw_watch(&mut self, set: u32, wl_index: u32, watched_lit: Lit) {
        self.watches[(!watched_lit).code()].push(AggWatch::PwFalsified {
            set,
            wl: wl_index,
        });
    }

    /// Mark a set for the end-of-queue pass.
    pub(crate) fn mark_dirty(&mut self, set: u32) {
        if !self.dirty_flag[set as usize] {
            self.dirty_flag[set as usize] = true;
            self.dirty.push(set);
        }
    }

    /// Aggregate-defined head lookup for the definition engine.
    pub fn def_head(&self, var: Var) -> Option<(u32, u32)> {
        self.def_heads.get(&var.index()).cloned()
    }

    /// Positive dependency literals of an aggregate-defined head: the literals whose truth can
    /// support the head's defining constraint.
    pub fn def_body_lits(&self, set: u32, agg: u32) -> Vec<Lit> {
        let set = &self.sets[set as usize];
        let agg = &set.aggs[agg as usize];
        set.wls
            .iter()
            .map(|wl| match agg.sign {
                AggSign::Lower => wl.lit,
                AggSign::Upper => !wl.lit,
            })
            .collect()
    }

    /// Try to find a justification for an aggregate-defined head.
    ///
    /// `usable` decides which support literals may appear in a justification; the definition
    /// engine passes a predicate that excludes false literals and unjustified atoms of the same
    /// strongly connected component. On success the chosen support literals are returned.
    pub fn can_justify_head(
        &self,
        set_index: u32,
        agg_index: u32,
        usable: &mut dyn FnMut(Lit) -> bool,
    ) -> Option<Vec<Lit>> {
        let set = &self.sets[set_index as usize];
        let agg = &set.aggs[agg_index as usize];

        let mut jstf = vec![];

        match agg.sign {
            AggSign::Lower => {
                // Accumulate usable contributions, largest weight first.
                let mut value = set.empty_value();
                if agg.holds_for(value) {
                    return Some(jstf);
                }
                for wl in set.wls.iter().rev() {
                    if usable(wl.lit) {
                        value = set.op.combine(value, wl.weight);
                        jstf.push(wl.lit);
                        if agg.holds_for(value) {
                            return Some(jstf);
                        }
                    }
                }
                None
            }
            AggSign::Upper => {
                // Remove usable exclusions, largest weight first, until the rest fits the bound.
                let mut removed = vec![false; set.wls.len()];
                let recompute = |removed: &[bool]| {
                    let mut value = set.empty_value();
                    for (index, wl) in set.wls.iter().enumerate() {
                        if !removed[index] {
                            value = set.op.combine(value, wl.weight);
                        }
                    }
                    value
                };
                if agg.holds_for(recompute(&removed)) {
                    return Some(jstf);
                }
                for index in (0..set.wls.len()).rev() {
                    let wl = set.wls[index];
                    if usable(!wl.lit) {
                        removed[index] = true;
                        jstf.push(!wl.lit);
                        if agg.holds_for(recompute(&removed)) {
                            return Some(jstf);
                        }
                    }
                }
                None
            }
        }
    }

    /// The support literals of an aggregate-defined head whose variable lies outside the given
    /// unfounded set, for loop formula construction.
    pub fn external_support_lits(
        &self,
        set_index: u32,
        agg_index: u32,
        in_ufs: &mut dyn FnMut(Var) -> bool,
    ) -> Vec<Lit> {
        let set = &self.sets[set_index as usize];
        let agg = &set.aggs[agg_index as usize];
        set.wls
            .iter()
            .filter(|wl| !in_ufs(wl.lit.var()))
            .map(|wl| match agg.sign {
                AggSign::Lower => wl.lit,
                AggSign::Upper => !wl.lit,
            })
            .collect()
    }

    /// Truncate the reason store on backtracking.
    fn truncate_reasons(&mut self, level: usize) {
        while let Some(last) = self.reasons.last() {
            if last.level as usize > level {
                self.reasons.pop();
            } else {
                break;
            }
        }
    }
}

/// Feed a new assignment into the aggregate engine.
///
/// Fully watched sets only update their bound bookkeeping here and defer derivations to the
/// end-of-queue pass; generalized watches propagate immediately when their slack runs out.
pub fn propagate_assignment(
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
    lit: Lit,
) -> Result<(), Conflict> {
    let watch_list = std::mem::replace(&mut ctx.part_mut(AggP).watches[lit.code()], vec![]);

    let mut result = Ok(());

    for &watch in watch_list.iter() {
        match watch {
            AggWatch::SetLit {
                set,
                wl,
                becomes_true,
            } => {
                fw::on_set_lit(ctx.borrow(), set, wl, becomes_true);
            }
            AggWatch::Head { set, agg } => {
                let scheme = ctx.part(AggP).sets[set as usize].scheme;
                match scheme {
                    PropScheme::FullyWatched => fw::on_head(ctx.borrow(), set, agg),
                    PropScheme::PartiallyWatched => {
                        result = pw::on_head(ctx.borrow(), set);
                    }
                }
            }
            AggWatch::PwFalsified { set, wl } => {
                result = pw::on_watch_falsified(ctx.borrow(), set, wl);
            }
        }
        if result.is_err() {
            break;
        }
    }

    let slot = &mut ctx.part_mut(AggP).watches[lit.code()];
    debug_assert!(slot.is_empty());
    *slot = watch_list;

    result
}

/// Run the deferred bound derivations for all sets with changed bookkeeping.
pub fn propagate_end_of_queue(
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
) -> Result<(), Conflict> {
    loop {
        let set = {
            let agg = ctx.part_mut(AggP);
            match agg.dirty.pop() {
                Some(set) => {
                    agg.dirty_flag[set as usize] = false;
                    set
                }
                None => return Ok(()),
            }
        };

        match ctx.part(AggP).sets[set as usize].scheme {
            PropScheme::FullyWatched => fw::propagate_set(ctx.borrow(), set)?,
            PropScheme::PartiallyWatched => pw::check(ctx.borrow(), set)?,
        }
    }
}

/// Undo aggregate state above the given decision level.
pub fn backtrack(mut ctx: partial!(Context, mut AggP, TrailP), level: usize) {
    let agg = ctx.part_mut(AggP);

    for index in 0..agg.sets.len() {
        if let Some(fw_state) = agg.fw[index].as_mut() {
            fw_state.backtrack(level);
        }
    }

    // A partially watched set that gave up its watch cover re-establishes it in the next
    // end-of-queue pass.
    for index in 0..agg.sets.len() {
        let needs_rewatch = match agg.pw[index].as_mut() {
            Some(pw_state) if pw_state.needs_rewatch => {
                pw_state.needs_rewatch = false;
                true
            }
            _ => false,
        };
        if needs_rewatch {
            agg.mark_dirty(index as u32);
        }
    }

    agg.truncate_reasons(level);

    // Dirty marks of backtracked changes are left in place; the end-of-queue pass re-derives
    // from the restored bounds, which is sound and cheap.
}

/// Route a derived literal back to the kernel.
///
/// A literal that is already true is dropped, an unassigned literal is enqueued with a theory
/// token reason, and a false literal turns the materialized explanation into the conflict
/// clause.
pub fn notify(
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
    mut reason: AggReason,
) -> Result<(), Conflict> {
    let lit = reason.prop_lit;

    if ctx.part(AssignmentP).lit_is_true(lit) {
        return Ok(());
    }

    reason.level = ctx.part(TrailP).current_level() as u32;

    let conflicting = ctx.part(AssignmentP).lit_is_false(lit);
    let eager = conflicting
        || reason.clause.is_some()
        || ctx.part(SolverConfigP).agg_clause_saving == AggClauseSaving::Clause;

    let token_index = ctx.part(AggP).reasons.len() as LitIdx;
    ctx.part_mut(AggP).reasons.push(reason);

    if eager {
        materialize_reason(ctx.borrow(), lit, token_index);
    }

    if conflicting {
        let conflict_lits: Vec<Lit> = ctx
            .part(AggP)
            .reason_clause(TheoryToken::Aggregate(token_index))
            .to_vec();
        ctx.part_mut(TheoryP).set_conflict(&conflict_lits);
        ctx.part_mut(AggP).reasons.pop();
        return Err(Conflict::Theory);
    }

    enqueue_assignment(
        ctx.borrow(),
        lit,
        Reason::Theory(TheoryToken::Aggregate(token_index)),
    );

    Ok(())
}

/// Materialize the reason clause for a derived literal.
///
/// The clause has the derived literal first; all other literals are false at levels at or below
/// the derivation level. For fully watched sets the clause is reconstructed from the set's
/// propagation stack, including the contributions to the relevant bound; with subset
/// minimization enabled the scan stops as soon as the bound argument is decisive.
pub fn materialize_reason(
    mut ctx: partial!(Context, mut AggP, AssignmentP, SolverConfigP),
    lit: Lit,
    index: LitIdx,
) {
    let subset_minimize = ctx.part(SolverConfigP).subset_minimize_explanations;
    let agg_engine = ctx.part_mut(AggP);

    if agg_engine.reasons[index as usize].clause.is_some() {
        return;
    }

    let clause = {
        let reason = &agg_engine.reasons[index as usize];
        let set = &agg_engine.sets[reason.set as usize];
        let fw_state = agg_engine.fw[reason.set as usize]
            .as_ref()
            .expect("lazy aggregate reasons only come from fully watched sets");

        fw::explain(set, fw_state, reason, lit, subset_minimize)
    };

    agg_engine.reasons[index as usize].clause = Some(clause.into_boxed_slice());
}
