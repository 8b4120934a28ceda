//! Justifications, cycle sources and the unfounded set search.
//!
//! Every head inside a positive loop keeps a justification: one supporting body literal for a
//! disjunction, the whole body for a conjunction, a supporting subset for an aggregate. The
//! justification graph stays cycle free because justifications are recomputed in rounds: a head
//! may only lean on component members that were justified in an earlier round.
//!
//! When a justification literal is falsified its head becomes a cycle source. The search then
//! recomputes justifications for the affected components; members that no round can justify form
//! an unfounded set, and a loop formula is emitted for each member.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{Lit, Var};

use log::debug;

use rustc_hash::FxHashSet;

use crate::agg::AggEngine;
use crate::cdcl::add_redundant_clause_during_search;
use crate::clause::{db, ClauseHeader, Tier};
use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, Assignment, Conflict, Reason};

use super::{DefEngine, RuleKind};

/// Pick initial justifications for all heads in positive loops.
///
/// Heads that cannot be justified at the root become the first cycle sources, which makes the
/// first end-of-queue pass run the unfounded set search on them.
pub fn initial_justifications(mut ctx: partial!(Context, mut DefP, AggP, AssignmentP)) {
    let components: Vec<u32> = {
        let def = ctx.part(DefP);
        let mut seen = FxHashSet::default();
        def.rules
            .iter()
            .filter(|rule| def.in_pos_loop[rule.head.index()])
            .map(|rule| def.scc[rule.head.index()])
            .filter(|&component| seen.insert(component))
            .collect()
    };

    for component in components {
        let (agg_engine, mut rest) = ctx.split_part(AggP);
        let (assignment, mut rest) = rest.split_part(AssignmentP);
        let def = rest.part_mut(DefP);

        let (justified, unfounded) = justify_component(def, agg_engine, assignment, component);

        for (head, jstf) in justified {
            def.set_justification(head, jstf);
        }
        for head in unfounded {
            def.mark_cycle_source(head);
        }
    }
}

/// Members of a component, in increasing variable order for determinism.
fn component_members(def: &DefEngine, component: u32) -> Vec<Var> {
    def.rules
        .iter()
        .map(|rule| rule.head)
        .filter(|head| def.in_pos_loop[head.index()] && def.scc[head.index()] == component)
        .collect()
}

/// Recompute justifications for one component.
///
/// Returns the justified heads with their new justifications and the unfounded rest. Heads whose
/// atom is false need no justification and are in neither list.
fn justify_component(
    def: &DefEngine,
    agg_engine: &AggEngine,
    assignment: &Assignment,
    component: u32,
) -> (Vec<(Var, Vec<Lit>)>, Vec<Var>) {
    let members = component_members(def, component);

    let mut candidate = FxHashSet::default();
    for &head in members.iter() {
        if assignment.var_value(head) != Some(false) {
            candidate.insert(head.index());
        }
    }

    let mut justified: FxHashSet<usize> = FxHashSet::default();
    let mut result: Vec<(Var, Vec<Lit>)> = vec![];

    loop {
        let mut progress = false;

        for &head in members.iter() {
            if !candidate.contains(&head.index()) || justified.contains(&head.index()) {
                continue;
            }

            let jstf = {
                let mut usable = |lit: Lit| -> bool {
                    if assignment.lit_is_false(lit) {
                        return false;
                    }
                    if lit.is_positive()
                        && def.in_pos_loop[lit.index()]
                        && def.scc[lit.index()] == component
                    {
                        return justified.contains(&lit.index());
                    }
                    true
                };

                let rule = def.rule(head).expect("member without rule");
                match rule.kind {
                    RuleKind::Disj => rule
                        .body
                        .iter()
                        .cloned()
                        .find(|&lit| usable(lit))
                        .map(|lit| vec![lit]),
                    RuleKind::Conj => {
                        if rule.body.iter().all(|&lit| usable(lit)) {
                            Some(rule.body.clone())
                        } else {
                            None
                        }
                    }
                    RuleKind::Aggr { set, agg } => {
                        agg_engine.can_justify_head(set, agg, &mut usable)
                    }
                }
            };

            if let Some(jstf) = jstf {
                justified.insert(head.index());
                result.push((head, jstf));
                progress = true;
            }
        }

        if !progress {
            break;
        }
    }

    let unfounded = members
        .iter()
        .cloned()
        .filter(|head| candidate.contains(&head.index()) && !justified.contains(&head.index()))
        .collect();

    (result, unfounded)
}

/// Re-justify every component with a pending cycle source, emitting loop formulas for confirmed
/// unfounded sets.
///
/// Returns whether any unfounded set was found.
pub fn process_cycle_sources(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) -> Result<bool, Conflict> {
    let mut found = false;

    loop {
        let source = {
            let def = ctx.part_mut(DefP);
            match def.cycle_sources.pop() {
                Some(source) => {
                    if !def.is_cycle_source[source.index()] {
                        continue;
                    }
                    source
                }
                None => break,
            }
        };

        let component = ctx.part(DefP).scc[source.index()];

        let unfounded = {
            let (agg_engine, mut rest) = ctx.split_part(AggP);
            let (assignment, mut rest) = rest.split_part(AssignmentP);
            let def = rest.part_mut(DefP);

            let (justified, unfounded) = justify_component(def, agg_engine, assignment, component);

            for (head, jstf) in justified {
                def.set_justification(head, jstf);
            }
            for head in component_members(def, component) {
                def.is_cycle_source[head.index()] = false;
            }

            unfounded
        };

        if !unfounded.is_empty() {
            found = true;
            debug!("unfounded set of size {}", unfounded.len());
            emit_loop_formulas(ctx.borrow(), &unfounded)?;
        }
    }

    Ok(found)
}

/// Emit the loop formula `not a or external(UFS)` for every member of a confirmed unfounded
/// set.
///
/// Asserting instances propagate the member's negation with the stored clause as reason; a
/// member that is already true with all externals false is a conflict; non-asserting instances
/// are only added as redundant clauses.
fn emit_loop_formulas(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut WatchlistsP,
        AggP,
    ),
    unfounded: &[Var],
) -> Result<(), Conflict> {
    let mut in_ufs = FxHashSet::default();
    for &head in unfounded {
        in_ufs.insert(head.index());
    }

    // External body literals over the whole unfounded set, deduplicated.
    let mut externals: Vec<Lit> = vec![];
    {
        let def = ctx.part(DefP);
        let agg_engine = ctx.part(AggP);

        for &head in unfounded {
            let rule = def.rule(head).expect("unfounded member without rule");
            match rule.kind {
                RuleKind::Disj => {
                    for &lit in rule.body.iter() {
                        if !(lit.is_positive() && in_ufs.contains(&lit.index())) {
                            externals.push(lit);
                        }
                    }
                }
                RuleKind::Conj => {}
                RuleKind::Aggr { set, agg } => {
                    let mut membership = |var: Var| in_ufs.contains(&var.index());
                    externals.extend(agg_engine.external_support_lits(set, agg, &mut membership));
                }
            }
        }
    }
    externals.sort_unstable();
    externals.dedup();

    let all_externals_false = externals
        .iter()
        .all(|&lit| ctx.part(AssignmentP).lit_is_false(lit));

    for &head in unfounded {
        let head_value = ctx.part(AssignmentP).var_value(head);
        if head_value == Some(false) {
            continue;
        }

        let mut clause = vec![head.negative()];
        clause.extend(externals.iter().cloned());

        if !all_externals_false {
            add_redundant_clause_during_search(ctx.borrow(), &clause);
            continue;
        }

        if head_value == Some(true) {
            ctx.part_mut(TheoryP).set_conflict(&clause);
            return Err(Conflict::Theory);
        }

        // Asserting: the member is forced false by the loop formula.
        let reason = match clause.len() {
            1 => Reason::Unit,
            2 => {
                ctx.part_mut(BinaryClausesP)
                    .add_binary_clause([clause[0], clause[1]]);
                Reason::Binary([clause[1]])
            }
            _ => {
                // Watch invariant: the propagating literal first, the deepest false literal
                // second.
                let deepest = (1..clause.len())
                    .max_by_key(|&pos| ctx.part(ImplGraphP).level(clause[pos].var()))
                    .unwrap();
                clause.swap(1, deepest);

                let mut header = ClauseHeader::new();
                header.set_tier(Tier::Core);
                let cref = db::add_clause(ctx.borrow(), header, &clause);
                Reason::Long(cref)
            }
        };

        enqueue_assignment(ctx.borrow(), clause[0], reason);
    }

    Ok(())
}
