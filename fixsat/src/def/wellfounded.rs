//! Well-founded model verification.
//!
//! On a total candidate model the alternating fixpoint of the definition is computed, with open
//! atoms fixed to their model values: the true set is the least fixpoint of applying the
//! one-step operator twice, the possible set its single application. The model passes when the
//! fixpoint is total and agrees with the model on every defined atom. A failing model is cut off
//! with a clause over the open atom assignments, since those determine the well-founded values.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{AggSign, Lit};

use log::debug;

use rustc_hash::FxHashSet;

use crate::agg::AggEngine;
use crate::context::{parts::*, Context};
use crate::prop::{Assignment, Conflict};

use super::{DefEngine, RuleKind, StoredRule};

/// Verify the candidate model against the well-founded semantics of the definitions.
pub fn check(
    mut ctx: partial!(
        Context,
        mut DefP,
        mut TheoryP,
        AggP,
        AssignmentP,
        SolverConfigP,
    ),
) -> Result<(), Conflict> {
    let rejected = {
        let def = ctx.part(DefP);
        let agg_engine = ctx.part(AggP);
        let assignment = ctx.part(AssignmentP);

        if def.rules.is_empty() {
            return Ok(());
        }

        let mut true_set: FxHashSet<usize> = FxHashSet::default();
        let possible_set;

        loop {
            let upper = gamma(def, agg_engine, assignment, &true_set);
            let lower = gamma(def, agg_engine, assignment, &upper);
            if lower == true_set {
                possible_set = upper;
                break;
            }
            true_set = lower;
        }

        def.rules.iter().any(|rule| {
            let index = rule.head.index();
            let model_true = assignment.var_value(rule.head) == Some(true);
            let wf_true = true_set.contains(&index);
            let wf_possible = possible_set.contains(&index);
            model_true != wf_true || wf_true != wf_possible
        })
    };

    if !rejected {
        return Ok(());
    }

    debug!("candidate model is not well-founded");

    // The well-founded values are a function of the open atoms, so their assignment carries the
    // rejection.
    let clause: Vec<Lit> = {
        let def = ctx.part(DefP);
        let assignment = ctx.part(AssignmentP);
        (0..assignment.assignment().len())
            .filter(|&index| def.rule_of[index].is_none())
            .filter_map(|index| {
                assignment.assignment()[index]
                    .map(|value| Lit::from_index(index, !value))
            })
            .collect()
    };

    ctx.part_mut(TheoryP).set_conflict(&clause);
    Err(Conflict::Theory)
}

/// One application of the definition's consequence operator.
///
/// Positive occurrences of defined atoms are read from the growing least fixpoint, negative
/// occurrences from the fixed outer set, open atoms from the model.
fn gamma(
    def: &DefEngine,
    agg_engine: &AggEngine,
    assignment: &Assignment,
    outer: &FxHashSet<usize>,
) -> FxHashSet<usize> {
    let mut derived: FxHashSet<usize> = FxHashSet::default();

    loop {
        let mut changed = false;

        for rule in def.rules.iter() {
            if derived.contains(&rule.head.index()) {
                continue;
            }
            if eval_rule(def, agg_engine, assignment, rule, &derived, outer) {
                derived.insert(rule.head.index());
                changed = true;
            }
        }

        if !changed {
            return derived;
        }
    }
}

fn eval_lit(
    def: &DefEngine,
    assignment: &Assignment,
    lit: Lit,
    derived: &FxHashSet<usize>,
    outer: &FxHashSet<usize>,
) -> bool {
    if def.rule_of[lit.index()].is_some() {
        if lit.is_positive() {
            derived.contains(&lit.index())
        } else {
            !outer.contains(&lit.index())
        }
    } else {
        assignment.lit_value(lit) == Some(true)
    }
}

fn eval_rule(
    def: &DefEngine,
    agg_engine: &AggEngine,
    assignment: &Assignment,
    rule: &StoredRule,
    derived: &FxHashSet<usize>,
    outer: &FxHashSet<usize>,
) -> bool {
    match rule.kind {
        RuleKind::Disj => rule
            .body
            .iter()
            .any(|&lit| eval_lit(def, assignment, lit, derived, outer)),
        RuleKind::Conj => rule
            .body
            .iter()
            .all(|&lit| eval_lit(def, assignment, lit, derived, outer)),
        RuleKind::Aggr { set, agg } => {
            let typed_set = &agg_engine.sets[set as usize];
            let agg = &typed_set.aggs[agg as usize];

            let mut value = typed_set.empty_value();
            for wl in typed_set.wls.iter() {
                let lit_true = match agg.sign {
                    // Monotone support comes from the fixpoint, antitone aggregates take the
                    // model values.
                    AggSign::Lower => eval_lit(def, assignment, wl.lit, derived, outer),
                    AggSign::Upper => assignment.lit_value(wl.lit) == Some(true),
                };
                if lit_true {
                    value = typed_set.op.combine(value, wl.weight);
                }
            }
            agg.holds_for(value)
        }
    }
}
