//! The aggregate normalization pipeline.
//!
//! Parsed sets run through a fixed sequence of transformations: partition by aggregate type, min
//! to max rewriting, attaching the operation record, weight verification, direct SAT encodings
//! for max and trivial cardinality aggregates, set reduction, card/sum retagging, head
//! implication lemmas, and finally the choice between the fully and the partially watched scheme
//! (splitting equivalences into one-sided implications for the latter). Sum and cardinality
//! equivalences can leave the pipeline entirely through the pseudo-Boolean CNF compiler.
use partial_ref::{partial, PartialRef};

use fixsat_formula::constraint::cmp_wl_by_var;
use fixsat_formula::{AggKind, AggSem, AggSign, Lit, Rule, Weight, WL};

use log::debug;

use crate::context::{parts::*, Context};
use crate::load::load_clause;
use crate::pb;

use super::fw::FwState;
use super::pw::PwState;
use super::set::{Agg, AggOp, PropScheme, TypedSet};
use super::PendingSet;

/// Constraints emitted while normalizing, applied after the pipeline.
#[derive(Default)]
struct Emitted {
    clauses: Vec<Vec<Lit>>,
    rules: Vec<Rule>,
}

/// Normalize all pending sets and aggregates and install the survivors.
pub fn initialize_aggregates(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ModalP,
        mut MonitorsP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) {
    let (pending_sets, pending_aggs) = ctx.part_mut(AggP).take_pending();

    let mut emitted = Emitted::default();
    let mut finished: Vec<TypedSet> = vec![];

    for pending in pending_sets {
        let aggs: Vec<Agg> = pending_aggs
            .iter()
            .filter(|agg| agg.set_id == pending.set_id)
            .map(|agg| Agg {
                head: agg.head,
                bound: agg.bound,
                sign: agg.sign,
                sem: agg.sem,
                kind: pending.kind,
                def_id: agg.def_id,
            })
            .collect();

        if aggs.is_empty() {
            debug!("dropping set {} without aggregates", pending.set_id);
            continue;
        }

        normalize_set(ctx.borrow(), pending, aggs, &mut emitted, &mut finished);
    }

    for clause in emitted.clauses.iter() {
        load_clause(ctx.borrow(), clause);
    }
    for rule in emitted.rules {
        ctx.part_mut(DefP).add_rule(rule);
    }

    for set in finished {
        install_finished_set(ctx.borrow(), set);
    }
}

/// Run the transformation sequence on one parsed set.
fn normalize_set(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ModalP,
        mut MonitorsP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    pending: PendingSet,
    aggs: Vec<Agg>,
    emitted: &mut Emitted,
    finished: &mut Vec<TypedSet>,
) {
    let mut set = TypedSet {
        set_id: pending.set_id,
        wls: pending.wls,
        op: AggOp::Sum,
        esv: Weight::ZERO,
        offset: Weight::ZERO,
        aggs,
        scheme: PropScheme::FullyWatched,
    };

    // Min to max: negate the weights and flip each aggregate's bound and sign.
    if pending.kind == AggKind::Min {
        for wl in set.wls.iter_mut() {
            wl.weight = -wl.weight;
        }
        for agg in set.aggs.iter_mut() {
            agg.bound = -agg.bound;
            agg.sign = agg.sign.flipped();
            agg.kind = AggKind::Max;
        }
    }

    // Attach the operation record and empty set value.
    let kind = match pending.kind {
        AggKind::Min | AggKind::Max => AggKind::Max,
        AggKind::Prod => AggKind::Prod,
        AggKind::Sum | AggKind::Card => AggKind::Sum,
    };
    set.op = match kind {
        AggKind::Max => AggOp::Max,
        AggKind::Prod => AggOp::Prod,
        _ => AggOp::Sum,
    };
    set.esv = set.op.identity();

    // A max set with a single aggregate is encoded to SAT directly.
    if set.op == AggOp::Max && set.aggs.len() == 1 {
        max_to_sat(&set, emitted);
        return;
    }

    set_reduce(&mut set);

    if set.op == AggOp::Sum {
        flip_negative_weights(&mut set);
    }

    // Retag as cardinality when only unit weights remain, and back when not.
    if set.op == AggOp::Sum {
        let card = set.wls.iter().all(|wl| wl.weight == Weight::ONE);
        for agg in set.aggs.iter_mut() {
            agg.kind = if card { AggKind::Card } else { AggKind::Sum };
        }
    }

    // Constant aggregates and cardinality lower bounds of one become clauses.
    resolve_trivial_aggs(&mut set, emitted);
    if set.aggs.is_empty() {
        return;
    }

    // Bound-ordered head implications speed up propagation on shared sets.
    if set.aggs.len() > 1 {
        head_implication_lemmas(&set, emitted);
    }

    // Sum and cardinality equivalences may leave for CNF through the pseudo-Boolean compiler.
    if ctx.part(SolverConfigP).pb_to_cnf && set.op == AggOp::Sum {
        let mut remaining = vec![];
        for agg in std::mem::replace(&mut set.aggs, vec![]) {
            if agg.sem == AggSem::Comp && pb::encode_aggregate(ctx.borrow(), &set, &agg) {
                continue;
            }
            remaining.push(agg);
        }
        set.aggs = remaining;
        if set.aggs.is_empty() {
            return;
        }
    }

    // Scheme selection; equality of the estimated watch fraction keeps the fully watched scheme.
    let watches_ratio = ctx.part(SolverConfigP).watches_ratio;
    let use_pw = set.op == AggOp::Sum
        && set.aggs.len() == 1
        && set.aggs[0].sem != AggSem::Def
        && !set.wls.is_empty()
        && pw_watch_fraction(&set) < watches_ratio;

    if use_pw {
        for part in split_for_pw(set) {
            finished.push(part);
        }
    } else {
        finished.push(set);
    }
}

/// Estimated fraction of the set the generalized watch scheme would have to watch.
fn pw_watch_fraction(set: &TypedSet) -> f32 {
    let agg = &set.aggs[0];
    let total: Weight = set.wls.iter().map(|wl| wl.weight).sum();
    let needed = match agg.sign {
        AggSign::Lower => agg.bound,
        AggSign::Upper => total - agg.bound,
    };

    let mut covered = Weight::ZERO;
    let mut count = 0usize;
    for wl in set.wls.iter().rev() {
        if covered >= needed {
            break;
        }
        covered = covered + wl.weight;
        count += 1;
    }

    count as f32 / set.wls.len() as f32
}

/// Encode a single-aggregate max set as clauses or a rule.
///
/// An upper bound holds exactly when every literal heavier than the bound is false; a lower
/// bound holds exactly when some literal at least as heavy as the bound is true.
fn max_to_sat(set: &TypedSet, emitted: &mut Emitted) {
    let agg = &set.aggs[0];
    let head = agg.head;

    match agg.sign {
        AggSign::Upper => {
            let over: Vec<Lit> = set
                .wls
                .iter()
                .filter(|wl| wl.weight > agg.bound)
                .map(|wl| wl.lit)
                .collect();
            if agg.sem == AggSem::Def {
                emitted.rules.push(Rule::new(
                    head.var(),
                    over.iter().map(|&lit| !lit).collect(),
                    true,
                    agg.def_id.unwrap_or(0),
                ));
            } else {
                for &lit in over.iter() {
                    emitted.clauses.push(vec![!head, !lit]);
                }
                if agg.sem == AggSem::Comp {
                    let mut clause = vec![head];
                    clause.extend(over.iter().cloned());
                    emitted.clauses.push(clause);
                }
            }
        }
        AggSign::Lower => {
            let reaching: Vec<Lit> = set
                .wls
                .iter()
                .filter(|wl| wl.weight >= agg.bound)
                .map(|wl| wl.lit)
                .collect();
            if agg.sem == AggSem::Def {
                emitted.rules.push(Rule::new(
                    head.var(),
                    reaching.clone(),
                    false,
                    agg.def_id.unwrap_or(0),
                ));
            } else {
                let mut clause = vec![!head];
                clause.extend(reaching.iter().cloned());
                emitted.clauses.push(clause);
                if agg.sem == AggSem::Comp {
                    for &lit in reaching.iter() {
                        emitted.clauses.push(vec![!lit, head]);
                    }
                }
            }
        }
    }
}

/// Sort by variable, merge duplicate literals, fold opposite polarities and drop neutral
/// weights.
fn set_reduce(set: &mut TypedSet) {
    let mut wls = std::mem::replace(&mut set.wls, vec![]);
    wls.sort_by(cmp_wl_by_var);

    let mut reduced: Vec<WL> = vec![];
    let mut bound_shift = Weight::ZERO;

    for wl in wls {
        match reduced.last_mut() {
            Some(last) if last.lit == wl.lit => {
                last.weight = set.op.combine(last.weight, wl.weight);
            }
            Some(last) if last.lit.var() == wl.lit.var() => {
                // Opposite polarities of one variable.
                match set.op {
                    AggOp::Sum => {
                        let guaranteed = last.weight.min(wl.weight);
                        bound_shift += guaranteed;
                        if last.weight >= wl.weight {
                            last.weight = last.weight - guaranteed;
                        } else {
                            *last = WL::new(wl.lit, wl.weight - guaranteed);
                        }
                    }
                    AggOp::Max => {
                        // One of the two is always in the set, so the smaller weight is
                        // guaranteed.
                        let guaranteed = last.weight.min(wl.weight);
                        if set.esv < guaranteed {
                            set.esv = guaranteed;
                        }
                        if wl.weight > last.weight {
                            *last = wl;
                        }
                    }
                    AggOp::Prod => {
                        unreachable!("product sets with clashing polarities are rejected on addition")
                    }
                }
            }
            _ => reduced.push(wl),
        }
    }

    reduced.retain(|wl| !set.op.is_neutral(wl.weight));
    if set.op == AggOp::Max {
        let esv = set.esv;
        reduced.retain(|wl| wl.weight > esv);
    }

    reduced.sort_by(fixsat_formula::constraint::cmp_wl_by_weight);

    if bound_shift != Weight::ZERO {
        set.offset += bound_shift;
        for agg in set.aggs.iter_mut() {
            agg.bound -= bound_shift;
        }
    }

    set.wls = reduced;
}

/// Replace negative sum weights by the negated literal with the positive weight, shifting the
/// bounds by the total negative weight.
fn flip_negative_weights(set: &mut TypedSet) {
    let mut total_negative = Weight::ZERO;
    for wl in set.wls.iter_mut() {
        if wl.weight.is_negative() {
            total_negative += wl.weight;
            *wl = WL::new(!wl.lit, -wl.weight);
        }
    }

    if total_negative != Weight::ZERO {
        set.offset += total_negative;
        for agg in set.aggs.iter_mut() {
            agg.bound -= total_negative;
        }
        set.wls
            .sort_by(fixsat_formula::constraint::cmp_wl_by_weight);
    }
}

/// Turn constant aggregates into clauses and cardinality lower bounds of one into an
/// equivalence with the disjunction of the set.
fn resolve_trivial_aggs(set: &mut TypedSet, emitted: &mut Emitted) {
    let empty = set.empty_value();
    let best = set.best_possible();

    let mut remaining = vec![];

    for agg in std::mem::replace(&mut set.aggs, vec![]) {
        let always_true = match agg.sign {
            AggSign::Lower => agg.bound <= empty,
            AggSign::Upper => agg.bound >= best,
        };
        let always_false = match agg.sign {
            AggSign::Lower => agg.bound > best,
            AggSign::Upper => agg.bound < empty,
        };

        if always_true {
            match agg.sem {
                AggSem::Implication => {}
                AggSem::Def => {
                    emitted
                        .rules
                        .push(Rule::new(agg.head.var(), vec![], true, agg.def_id.unwrap_or(0)));
                }
                AggSem::Comp => emitted.clauses.push(vec![agg.head]),
            }
            continue;
        }

        if always_false {
            // Implication heads are forced false as well: the constraint cannot hold.
            match agg.sem {
                AggSem::Def => {
                    emitted
                        .rules
                        .push(Rule::new(agg.head.var(), vec![], false, agg.def_id.unwrap_or(0)));
                }
                _ => emitted.clauses.push(vec![!agg.head]),
            }
            continue;
        }

        // A cardinality "at least one" is the disjunction of the set.
        if agg.kind == AggKind::Card
            && agg.sign == AggSign::Lower
            && agg.bound == Weight::ONE
        {
            let body: Vec<Lit> = set.wls.iter().map(|wl| wl.lit).collect();
            match agg.sem {
                AggSem::Def => {
                    emitted.rules.push(Rule::new(
                        agg.head.var(),
                        body,
                        false,
                        agg.def_id.unwrap_or(0),
                    ));
                }
                sem => {
                    let mut clause = vec![!agg.head];
                    clause.extend(body.iter().cloned());
                    emitted.clauses.push(clause);
                    if sem == AggSem::Comp {
                        for &lit in body.iter() {
                            emitted.clauses.push(vec![!lit, agg.head]);
                        }
                    }
                }
            }
            continue;
        }

        remaining.push(agg);
    }

    set.aggs = remaining;
}

/// For aggregates sharing a set, bound-ordered implications between the heads.
fn head_implication_lemmas(set: &TypedSet, emitted: &mut Emitted) {
    let mut by_bound: Vec<&Agg> = set
        .aggs
        .iter()
        .filter(|agg| agg.sem == AggSem::Comp)
        .collect();
    by_bound.sort_by_key(|agg| agg.bound);

    for pair in by_bound.windows(2) {
        let (lower, higher) = (pair[0], pair[1]);
        if lower.sign != higher.sign {
            continue;
        }
        match lower.sign {
            // value >= b2 implies value >= b1 for b1 <= b2.
            AggSign::Lower => emitted.clauses.push(vec![!higher.head, lower.head]),
            // value <= b1 implies value <= b2 for b1 <= b2.
            AggSign::Upper => emitted.clauses.push(vec![!lower.head, higher.head]),
        }
    }
}

/// Rewrite an aggregate to the canonical monotone lower bound form of the generalized watch
/// scheme: all weights positive, sign `Lower`, upper bounds turned into lower bounds over the
/// negated literals.
fn canonicalize_monotone(set: &TypedSet, agg: Agg) -> TypedSet {
    let total: Weight = set.wls.iter().map(|wl| wl.weight).sum();

    let (wls, bound) = match agg.sign {
        AggSign::Lower => (set.wls.clone(), agg.bound),
        AggSign::Upper => (
            set.wls
                .iter()
                .map(|wl| WL::new(!wl.lit, wl.weight))
                .collect(),
            total - agg.bound,
        ),
    };

    TypedSet {
        set_id: set.set_id,
        wls,
        op: AggOp::Sum,
        esv: Weight::ZERO,
        offset: set.offset,
        aggs: vec![Agg {
            head: agg.head,
            bound,
            sign: AggSign::Lower,
            sem: AggSem::Implication,
            kind: agg.kind,
            def_id: agg.def_id,
        }],
        scheme: PropScheme::PartiallyWatched,
    }
}

/// Split the single aggregate of a partially watched set into one-sided implications.
fn split_for_pw(set: TypedSet) -> Vec<TypedSet> {
    let agg = set.aggs[0].clone();

    let mut parts = vec![];

    // head -> constraint
    parts.push(canonicalize_monotone(&set, agg.clone()));

    if agg.sem == AggSem::Comp {
        // not head -> not constraint
        let complement = match agg.sign {
            AggSign::Lower => Agg {
                head: !agg.head,
                bound: agg.bound - Weight::ONE,
                sign: AggSign::Upper,
                ..agg.clone()
            },
            AggSign::Upper => Agg {
                head: !agg.head,
                bound: agg.bound + Weight::ONE,
                sign: AggSign::Lower,
                ..agg.clone()
            },
        };
        parts.push(canonicalize_monotone(&set, complement));
    }

    parts
}

/// Install one finished set: build its propagator state from the current root assignment,
/// register the watches and queue it for an initial propagation pass.
fn install_finished_set(
    mut ctx: partial!(Context, mut AggP, mut DefP, AssignmentP),
    set: TypedSet,
) {
    let set_index = ctx.part(AggP).sets.len() as u32;

    for (agg_index, agg) in set.aggs.iter().enumerate() {
        if agg.sem == AggSem::Def {
            ctx.part_mut(DefP).add_aggregate_head(
                agg.head.var(),
                agg.def_id.unwrap_or(0),
                set_index,
                agg_index as u32,
            );
        }
    }

    match set.scheme {
        PropScheme::FullyWatched => {
            let state = FwState::init(&set, ctx.part(AssignmentP).assignment());
            ctx.part_mut(AggP).install_set(set, Some(state), None);
        }
        PropScheme::PartiallyWatched => {
            let state = PwState::new(set.wls.len());
            ctx.part_mut(AggP).install_set(set, None, Some(state));
        }
    }

    let agg_engine = ctx.part_mut(AggP);
    agg_engine.mark_dirty(set_index);
    if let Some(pw_state) = agg_engine.pw[set_index as usize].as_mut() {
        pw_state.needs_rewatch = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fixsat_formula::{lit, wls};

    fn sum_set(wls: Vec<WL>, aggs: Vec<Agg>) -> TypedSet {
        TypedSet {
            set_id: 0,
            wls,
            op: AggOp::Sum,
            esv: Weight::ZERO,
            offset: Weight::ZERO,
            aggs,
            scheme: PropScheme::FullyWatched,
        }
    }

    fn lower_agg(head: isize, bound: i64) -> Agg {
        Agg {
            head: lit!(head),
            bound: Weight::new(bound),
            sign: AggSign::Lower,
            sem: AggSem::Comp,
            kind: AggKind::Sum,
            def_id: None,
        }
    }

    #[test]
    fn set_reduce_merges_duplicates() {
        let mut set = sum_set(
            vec![
                WL::new(lit!(1), Weight::new(2)),
                WL::new(lit!(1), Weight::new(3)),
                WL::new(lit!(2), Weight::new(4)),
            ],
            vec![lower_agg(5, 6)],
        );

        set_reduce(&mut set);

        assert_eq!(set.wls.len(), 2);
        let merged = set.wls.iter().find(|wl| wl.lit == lit!(1)).unwrap();
        assert_eq!(merged.weight, Weight::new(5));
        assert_eq!(set.aggs[0].bound, Weight::new(6));
    }

    #[test]
    fn set_reduce_folds_opposite_polarities() {
        // 3*x + 5*(not x): 3 is guaranteed, 2 rides on not x.
        let mut set = sum_set(
            vec![
                WL::new(lit!(1), Weight::new(3)),
                WL::new(lit!(-1), Weight::new(5)),
            ],
            vec![lower_agg(5, 4)],
        );

        set_reduce(&mut set);

        assert_eq!(set.wls.len(), 1);
        assert_eq!(set.wls[0].lit, lit!(-1));
        assert_eq!(set.wls[0].weight, Weight::new(2));
        assert_eq!(set.offset, Weight::new(3));
        assert_eq!(set.aggs[0].bound, Weight::new(1));
    }

    #[test]
    fn negative_weights_flip_to_negated_literals() {
        // 4*x - 3*y >= 1  <=>  4*x + 3*(not y) >= 4
        let mut set = sum_set(
            vec![
                WL::new(lit!(1), Weight::new(4)),
                WL::new(lit!(2), Weight::new(-3)),
            ],
            vec![lower_agg(5, 1)],
        );

        flip_negative_weights(&mut set);

        assert!(set.wls.iter().all(|wl| wl.weight.is_positive()));
        assert!(set.wls.iter().any(|wl| wl.lit == lit!(-2)));
        assert_eq!(set.aggs[0].bound, Weight::new(4));
    }

    #[test]
    fn trivial_aggregates_become_clauses() {
        let mut emitted = Emitted::default();

        // Bound 0 is trivially reached, bound 20 is out of reach.
        let mut set = sum_set(
            wls![1 * 2, 2 * 3].to_vec(),
            vec![lower_agg(5, 0), lower_agg(6, 20)],
        );

        resolve_trivial_aggs(&mut set, &mut emitted);

        assert!(set.aggs.is_empty());
        assert!(emitted.clauses.contains(&vec![lit!(5)]));
        assert!(emitted.clauses.contains(&vec![lit!(-6)]));
    }

    #[test]
    fn watch_fraction_counts_heavy_literals() {
        let set = sum_set(wls![1 * 1, 2 * 1, 3 * 1, 4 * 7].to_vec(), vec![lower_agg(5, 7)]);
        // One heavy literal already covers the bound.
        assert!(pw_watch_fraction(&set) <= 0.25 + f32::EPSILON);
    }
}
