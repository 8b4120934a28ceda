//! The inductive definition engine.
//!
//! Rules are collected through the constraint API and finalized before the first search: heads
//! with several rules are merged through fresh auxiliary atoms, the Clark completion is emitted
//! as clauses, and a Tarjan pass over the positive dependency graph assigns strongly connected
//! components. Only heads inside a positive loop keep definitional bookkeeping: a cycle free
//! justification that is revalidated whenever one of its literals is falsified, and an unfounded
//! set search over the affected components that emits loop formulas.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{Lit, Rule, Var};

use log::{debug, info};

use crate::config::DefnStrategy;
use crate::context::{parts::*, Context};
use crate::load::load_clause;
use crate::prop::Conflict;

pub mod justify;
pub mod scc;
pub mod wellfounded;

/// How a defined atom is supported.
#[derive(Clone, Debug)]
pub enum RuleKind {
    /// Any body literal supports the head.
    Disj,
    /// All body literals together support the head.
    Conj,
    /// The aggregate engine decides support.
    Aggr { set: u32, agg: u32 },
}

/// A finalized rule.
#[derive(Clone, Debug)]
pub struct StoredRule {
    pub head: Var,
    pub body: Vec<Lit>,
    pub kind: RuleKind,
    pub def_id: usize,
}

/// Marker for an aggregate-defined head waiting for finalization.
#[derive(Copy, Clone, Debug)]
pub struct PendingAggHead {
    pub head: Var,
    pub def_id: usize,
    pub set: u32,
    pub agg: u32,
}

/// The inductive definition engine.
#[derive(Default)]
pub struct DefEngine {
    pending_rules: Vec<Rule>,
    pending_agg_heads: Vec<PendingAggHead>,

    /// Per variable: index into `rules` when the variable is a defined head.
    rule_of: Vec<Option<u32>>,
    pub(crate) rules: Vec<StoredRule>,

    /// Per variable: id of its positive dependency component, meaningful for defined heads.
    pub(crate) scc: Vec<u32>,
    /// Per variable: whether the head can be part of a positive loop.
    pub(crate) in_pos_loop: Vec<bool>,

    /// Per rule: the current justification. Cycle free in the positive dependency graph.
    justification: Vec<Vec<Lit>>,
    /// Per literal code: heads whose justification may contain the literal. Entries can be
    /// stale; they are verified against the current justification before use.
    jstf_occurs: Vec<Vec<Var>>,

    cycle_sources: Vec<Var>,
    is_cycle_source: Vec<bool>,

    /// Unfounded set search scheduling for the adaptive strategy.
    skip_budget: u32,
    skip_left: u32,

    initialized: bool,
    ufs_found: u64,
}

impl DefEngine {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.rule_of.resize(count, None);
        self.scc.resize(count, 0);
        self.in_pos_loop.resize(count, false);
        self.is_cycle_source.resize(count, false);
        self.jstf_occurs.resize(count * 2, vec![]);
    }

    /// Queue a rule for finalization.
    pub fn add_rule(&mut self, rule: Rule) {
        self.pending_rules.push(rule);
    }

    /// Queue an aggregate-defined head for finalization.
    pub fn add_aggregate_head(&mut self, head: Var, def_id: usize, set: u32, agg: u32) {
        self.pending_agg_heads.push(PendingAggHead {
            head,
            def_id,
            set,
            agg,
        });
    }

    /// Whether there are rules waiting for finalization.
    pub fn has_pending(&self) -> bool {
        !self.pending_rules.is_empty() || !self.pending_agg_heads.is_empty()
    }

    /// Whether the variable is the head of a definition.
    pub fn is_defined(&self, var: Var) -> bool {
        self.rule_of
            .get(var.index())
            .map(|entry| entry.is_some())
            .unwrap_or(false)
    }

    /// The rule defining a variable.
    pub fn rule(&self, var: Var) -> Option<&StoredRule> {
        self.rule_of[var.index()].map(|index| &self.rules[index as usize])
    }

    /// Install a new justification for a head and index its literals.
    pub(crate) fn set_justification(&mut self, head: Var, jstf: Vec<Lit>) {
        let rule_index = self.rule_of[head.index()].expect("justification for undefined head");
        for &lit in jstf.iter() {
            self.jstf_occurs[lit.code()].push(head);
        }
        self.justification[rule_index as usize] = jstf;
    }

    pub(crate) fn mark_cycle_source(&mut self, var: Var) {
        if !self.is_cycle_source[var.index()] {
            self.is_cycle_source[var.index()] = true;
            self.cycle_sources.push(var);
        }
    }

    /// Whether any head is waiting for a justification check.
    pub fn has_cycle_sources(&self) -> bool {
        !self.cycle_sources.is_empty()
    }
}

/// Finalize all pending rules: merge multi-rule heads, emit completion clauses, compute the
/// positive dependency components and pick initial justifications.
pub fn initialize_definitions(
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
    if !ctx.part(DefP).has_pending() {
        return;
    }

    let pending_rules = std::mem::replace(&mut ctx.part_mut(DefP).pending_rules, vec![]);
    let pending_agg_heads = std::mem::replace(&mut ctx.part_mut(DefP).pending_agg_heads, vec![]);

    // Group rules by head; heads with several rules get fresh auxiliary atoms, so afterwards
    // every head has exactly one rule.
    let mut by_head: Vec<(Var, Vec<Rule>)> = vec![];
    for rule in pending_rules {
        match by_head.iter_mut().find(|(head, _)| *head == rule.head) {
            Some((_, rules)) => rules.push(rule),
            None => by_head.push((rule.head, vec![rule])),
        }
    }

    let mut new_rules: Vec<StoredRule> = vec![];

    for (head, mut rules) in by_head {
        if rules.len() == 1 {
            let rule = rules.pop().unwrap();
            new_rules.push(StoredRule {
                head,
                body: rule.body,
                kind: if rule.conjunctive {
                    RuleKind::Conj
                } else {
                    RuleKind::Disj
                },
                def_id: rule.def_id,
            });
        } else {
            let def_id = rules[0].def_id;
            let mut aux_lits = vec![];
            for rule in rules {
                let aux = new_aux_var(ctx.borrow());
                aux_lits.push(aux.positive());
                new_rules.push(StoredRule {
                    head: aux,
                    body: rule.body,
                    kind: if rule.conjunctive {
                        RuleKind::Conj
                    } else {
                        RuleKind::Disj
                    },
                    def_id: rule.def_id,
                });
            }
            new_rules.push(StoredRule {
                head,
                body: aux_lits,
                kind: RuleKind::Disj,
                def_id,
            });
        }
    }

    for agg_head in pending_agg_heads {
        let body = ctx.part(AggP).def_body_lits(agg_head.set, agg_head.agg);
        new_rules.push(StoredRule {
            head: agg_head.head,
            body,
            kind: RuleKind::Aggr {
                set: agg_head.set,
                agg: agg_head.agg,
            },
            def_id: agg_head.def_id,
        });
    }

    // Completion clauses for disjunctive and conjunctive rules; aggregate heads are propagated
    // as equivalences by the aggregate engine.
    for rule in new_rules.iter() {
        let head = rule.head.positive();
        match rule.kind {
            RuleKind::Disj => {
                let mut clause = vec![!head];
                clause.extend(rule.body.iter().cloned());
                load_clause(ctx.borrow(), &clause);
                for &body_lit in rule.body.iter() {
                    load_clause(ctx.borrow(), &[!body_lit, head]);
                }
            }
            RuleKind::Conj => {
                let mut clause = vec![head];
                clause.extend(rule.body.iter().map(|&lit| !lit));
                load_clause(ctx.borrow(), &clause);
                for &body_lit in rule.body.iter() {
                    load_clause(ctx.borrow(), &[!head, body_lit]);
                }
            }
            RuleKind::Aggr { .. } => {}
        }
    }

    // Register the new rules.
    {
        let def = ctx.part_mut(DefP);
        for rule in new_rules {
            let index = def.rules.len() as u32;
            debug_assert!(
                def.rule_of[rule.head.index()].is_none(),
                "head defined twice after merging"
            );
            def.rule_of[rule.head.index()] = Some(index);
            def.rules.push(rule);
            def.justification.push(vec![]);
        }
    }

    // Components of the positive dependency graph; heads outside any positive loop need no
    // definitional bookkeeping beyond their completion.
    scc::assign_components(ctx.part_mut(DefP));

    let (pos_loop_heads, total_heads) = {
        let def = ctx.part(DefP);
        let pos = def
            .rules
            .iter()
            .filter(|rule| def.in_pos_loop[rule.head.index()])
            .count();
        (pos, def.rules.len())
    };
    info!(
        "definitions: {} heads, {} in positive loops",
        total_heads, pos_loop_heads
    );

    // Initial cycle free justifications; heads that cannot be justified at the root become the
    // first cycle sources.
    justify::initial_justifications(ctx.borrow());

    ctx.part_mut(DefP).initialized = true;
}

/// Allocate a fresh auxiliary variable.
fn new_aux_var(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut DefP,
        mut ImplGraphP,
        mut TmpDataP,
        mut VsidsP,
        mut WatchlistsP,
    ),
) -> Var {
    let count = ctx.part(AssignmentP).assignment().len();
    crate::context::set_var_count(ctx.borrow(), count + 1);
    Var::from_index(count)
}

/// A literal became true; justifications using its negation are invalidated.
pub fn propagate_assignment(
    mut ctx: partial!(Context, mut DefP, SolverConfigP),
    lit: Lit,
) -> Result<(), Conflict> {
    if !ctx.part(DefP).initialized || !ctx.part(SolverConfigP).needs_ufs_search() {
        return Ok(());
    }

    let def = ctx.part_mut(DefP);
    let falsified = !lit;

    let occs = std::mem::replace(&mut def.jstf_occurs[falsified.code()], vec![]);
    let mut retained = vec![];

    for head in occs {
        let still_used = def
            .rule_of[head.index()]
            .map(|rule_index| def.justification[rule_index as usize].contains(&falsified))
            .unwrap_or(false);
        if still_used {
            retained.push(head);
            def.mark_cycle_source(head);
        }
    }

    def.jstf_occurs[falsified.code()] = retained;

    Ok(())
}

/// Run the unfounded set search for all pending cycle sources.
///
/// With the lazy strategy the search only runs on total assignments; the adaptive strategy skips
/// a number of invocations that grows while no unfounded sets turn up.
pub fn propagate_end_of_queue(
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
        mut MonitorsP,
        mut TheoryP,
        mut TmpDataP,
        mut TrailP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    total_assignment: bool,
) -> Result<(), Conflict> {
    if !ctx.part(DefP).initialized
        || !ctx.part(SolverConfigP).needs_ufs_search()
        || !ctx.part(DefP).has_cycle_sources()
    {
        return Ok(());
    }

    match ctx.part(SolverConfigP).defn_strategy {
        DefnStrategy::Always => {}
        DefnStrategy::Lazy => {
            if !total_assignment {
                return Ok(());
            }
        }
        DefnStrategy::Adaptive => {
            if !total_assignment {
                let def = ctx.part_mut(DefP);
                if def.skip_left > 0 {
                    def.skip_left -= 1;
                    return Ok(());
                }
            }
        }
    }

    let found = justify::process_cycle_sources(ctx.borrow())?;

    let def = ctx.part_mut(DefP);
    if found {
        def.ufs_found += 1;
        def.skip_budget = 0;
    } else {
        def.skip_budget = (def.skip_budget + 1).min(16);
    }
    def.skip_left = def.skip_budget;
    if found {
        debug!("unfounded sets so far: {}", def.ufs_found);
    }

    Ok(())
}

/// Reject a total model whose definitions are not well-founded.
pub fn check_well_founded(
    mut ctx: partial!(
        Context,
        mut DefP,
        mut TheoryP,
        AggP,
        AssignmentP,
        SolverConfigP,
    ),
) -> Result<(), Conflict> {
    if !ctx.part(DefP).initialized || !ctx.part(SolverConfigP).needs_well_founded_check() {
        return Ok(());
    }

    wellfounded::check(ctx.borrow())
}

/// Undo definition state above the given decision level.
///
/// Justifications only reference literals that were true or unknown when they were chosen;
/// unassigning literals cannot invalidate them, so nothing needs to be rewound. Cycle source
/// flags are conservative and get re-examined by the next search pass.
pub fn backtrack(_ctx: partial!(Context, mut DefP, TrailP), _level: usize) {}
