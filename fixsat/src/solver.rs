//! The solver facade.
//!
//! This is the boundary consumed by parsers and front-ends: constraints arrive here in user
//! numbering, get translated to the dense kernel range and queued for theory initialization,
//! and results travel back out in user numbering. The facade also hosts the optimization driver,
//! which wraps the kernel's solve loop with improvement constraints.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use partial_ref::{IntoPartialRefMut, PartialRef};

use log::info;

use rustc_hash::FxHashSet;

use fixsat_formula::{AggKind, AggSem, AggSign, CnfFormula, Lit, Var, Weight, WL};

use crate::agg::{PendingAgg, PendingSet};
use crate::config::SolverConfig;
use crate::context::{config_changed, ensure_var_count, parts::*, set_var_count, var_count, Context};
use crate::def;
use crate::errors::SolverError;
use crate::incremental::set_assumptions;
use crate::load::load_clause;
use crate::monitor::Monitor;
use crate::optimize::{improvement, Improvement, Objective};
use crate::prop;
use crate::remap::Remapper;
use crate::schedule::schedule_step;
use crate::state::SatState;

/// Result of a solve call.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SolveResult {
    Sat,
    Unsat,
    /// Termination was requested; all state is preserved and solve can be re-entered.
    Timeout,
}

/// Requests cooperative termination from any thread.
///
/// The kernel polls the flag between conflict steps and between solve iterations; work in flight
/// completes and `solve` returns [`SolveResult::Timeout`] with usable state.
#[derive(Clone)]
pub struct TerminateHandle {
    terminate: Arc<AtomicBool>,
}

impl TerminateHandle {
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.terminate.store(false, Ordering::Relaxed);
    }
}

/// A hybrid solver for clauses, aggregates and inductive definitions.
pub struct Solver {
    ctx: Box<Context>,
    remap: Remapper,
    /// User assumptions in kernel numbering.
    assumptions: Vec<Lit>,
    /// Kernel variables defined by rules.
    rule_heads: FxHashSet<usize>,
    /// Kernel variables defined by aggregates.
    agg_def_heads: FxHashSet<usize>,
    /// User set ids seen so far, with the checked absolute weight total of each set.
    set_totals: rustc_hash::FxHashMap<usize, Weight>,
    /// Source of fresh user variables handed out by `new_var`.
    next_user_var: usize,
    /// Source of internal ids for sets added by the optimization driver.
    internal_set_ids: usize,
}

impl Default for Solver {
    fn default() -> Solver {
        Solver::new()
    }
}

impl Solver {
    /// Create a new solver with the default configuration.
    pub fn new() -> Solver {
        Solver::with_config(SolverConfig::default())
    }

    /// Create a new solver with the given configuration.
    pub fn with_config(config: SolverConfig) -> Solver {
        let mut ctx = Box::new(Context::default());
        ctx.solver_config = config;
        {
            let mut ctx = ctx.into_partial_ref_mut();
            config_changed(ctx.borrow());
        }
        Solver {
            ctx,
            remap: Remapper::default(),
            assumptions: vec![],
            rule_heads: FxHashSet::default(),
            agg_def_heads: FxHashSet::default(),
            set_totals: rustc_hash::FxHashMap::default(),
            next_user_var: 0,
            internal_set_ids: 0,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.ctx.solver_config
    }

    /// Replace the configuration; intended to be called before constraints are added.
    pub fn set_config(&mut self, config: SolverConfig) {
        self.ctx.solver_config = config;
        let mut ctx = self.ctx.into_partial_ref_mut();
        config_changed(ctx.borrow());
    }

    /// A fresh user variable.
    pub fn new_var(&mut self) -> Var {
        let var = Var::from_index(self.next_user_var);
        self.next_user_var += 1;
        self.map_var(var);
        var
    }

    /// Translate a user variable to its kernel counterpart, allocating one if needed.
    fn map_var(&mut self, user: Var) -> Var {
        self.next_user_var = self.next_user_var.max(user.index() + 1);

        if !self.ctx.solver_config.remap_vars {
            let mut ctx = self.ctx.into_partial_ref_mut();
            ensure_var_count(ctx.borrow(), user.index() + 1);
            return user;
        }

        if let Some(kernel) = self.remap.kernel_var(user) {
            return kernel;
        }

        let kernel = {
            let mut ctx = self.ctx.into_partial_ref_mut();
            let kernel = Var::from_index(var_count(ctx.borrow()));
            set_var_count(ctx.borrow(), kernel.index() + 1);
            kernel
        };
        self.remap.insert(user, kernel);
        kernel
    }

    fn map_lit(&mut self, user: Lit) -> Lit {
        self.map_var(user.var()).lit(user.is_positive())
    }

    /// A fresh kernel-internal variable without a user number.
    fn internal_var(&mut self) -> Var {
        let mut ctx = self.ctx.into_partial_ref_mut();
        let var = Var::from_index(var_count(ctx.borrow()));
        set_var_count(ctx.borrow(), var.index() + 1);
        var
    }

    /// Add a clause over user literals.
    pub fn add_clause(&mut self, lits: &[Lit]) {
        let kernel_lits: Vec<Lit> = lits.iter().map(|&lit| self.map_lit(lit)).collect();
        let mut ctx = self.ctx.into_partial_ref_mut();
        load_clause(ctx.borrow(), &kernel_lits);
    }

    /// Add a whole formula.
    pub fn add_formula(&mut self, formula: &CnfFormula) {
        for clause in formula.iter() {
            self.add_clause(clause);
        }
    }

    /// Add a clause given as signed non-zero integers, the external text form.
    pub fn add_clause_ints(&mut self, lits: &[isize]) -> Result<(), SolverError> {
        for &number in lits {
            if number == 0 {
                return Err(SolverError::NonPositiveVariable(number));
            }
        }
        let lits: Vec<Lit> = lits.iter().map(|&number| Lit::from_dimacs(number)).collect();
        self.add_clause(&lits);
        Ok(())
    }

    /// Add a rule of an inductive definition.
    pub fn add_rule(
        &mut self,
        head: Var,
        body: &[Lit],
        conjunctive: bool,
        def_id: usize,
    ) -> Result<(), SolverError> {
        let head = self.map_var(head);
        if self.agg_def_heads.contains(&head.index()) {
            return Err(SolverError::ConflictingDefinition);
        }
        self.rule_heads.insert(head.index());

        let body: Vec<Lit> = body.iter().map(|&lit| self.map_lit(lit)).collect();

        self.ctx
            .def
            .add_rule(fixsat_formula::Rule::new(head, body, conjunctive, def_id));
        self.ctx.solver_state.theories_dirty = true;
        Ok(())
    }

    /// Add a weighted set for later aggregate constraints.
    pub fn add_set(&mut self, set_id: usize, wls: &[WL], kind: AggKind) -> Result<(), SolverError> {
        if self.set_totals.contains_key(&set_id) {
            return Err(SolverError::DuplicateSet { set_id });
        }

        // Overflow and well-formedness checks happen here, synchronously, so that propagation
        // time arithmetic cannot fail.
        let mut total = match kind {
            AggKind::Prod => Weight::ONE,
            _ => Weight::ZERO,
        };
        let mut seen_vars = FxHashSet::default();

        for wl in wls {
            match kind {
                AggKind::Prod => {
                    if !wl.weight.is_positive() {
                        return Err(SolverError::NonPositiveProductWeight {
                            set_id,
                            weight: wl.weight.value(),
                        });
                    }
                    if !seen_vars.insert(wl.lit.index()) {
                        return Err(SolverError::DuplicateProductAtom { set_id });
                    }
                    total = total
                        .checked_mul(wl.weight)
                        .ok_or(SolverError::WeightOverflow)?;
                }
                _ => {
                    total = total
                        .checked_add(wl.weight.abs())
                        .ok_or(SolverError::WeightOverflow)?;
                }
            }
        }

        let kernel_wls: Vec<WL> = wls
            .iter()
            .map(|wl| WL::new(self.map_lit(wl.lit), wl.weight))
            .collect();

        self.set_totals.insert(set_id, total);
        self.ctx.agg.add_pending_set(PendingSet {
            set_id,
            wls: kernel_wls,
            kind,
        });
        self.ctx.solver_state.theories_dirty = true;
        Ok(())
    }

    /// Add an aggregate constraint over a previously added set.
    pub fn add_aggregate(
        &mut self,
        head: Lit,
        set_id: usize,
        bound: Weight,
        sign: AggSign,
        sem: AggSem,
        def_id: usize,
    ) -> Result<(), SolverError> {
        let total = *self
            .set_totals
            .get(&set_id)
            .ok_or(SolverError::UnknownSet { set_id })?;

        // The normalization pipeline shifts bounds by at most the absolute weight total.
        bound
            .checked_add(total)
            .and_then(|sum| bound.checked_sub(total).map(|_| sum))
            .ok_or(SolverError::WeightOverflow)?;

        let head = self.map_lit(head);

        if sem == AggSem::Def {
            if self.rule_heads.contains(&head.index()) || self.agg_def_heads.contains(&head.index())
            {
                return Err(SolverError::ConflictingDefinition);
            }
            self.agg_def_heads.insert(head.index());
        }

        self.ctx.agg.add_pending_agg(PendingAgg {
            head,
            set_id,
            bound,
            sign,
            sem,
            def_id: if sem == AggSem::Def {
                Some(def_id)
            } else {
                None
            },
        });
        self.ctx.solver_state.theories_dirty = true;
        Ok(())
    }

    /// Minimize the index of the first true literal of an ordered list.
    pub fn add_minimize_list(&mut self, lits: &[Lit]) {
        let lits: Vec<Lit> = lits.iter().map(|&lit| self.map_lit(lit)).collect();
        self.ctx.optimize.objective = Some(Objective::OrderedList(lits));
    }

    /// Minimize the subset of true literals of a list.
    pub fn add_minimize_subset(&mut self, lits: &[Lit]) {
        let lits: Vec<Lit> = lits.iter().map(|&lit| self.map_lit(lit)).collect();
        self.ctx.optimize.objective = Some(Objective::Subset(lits));
    }

    /// Minimize the value of an aggregate over a weighted set.
    pub fn add_minimize_aggregate(
        &mut self,
        wls: &[WL],
        kind: AggKind,
    ) -> Result<(), SolverError> {
        let mut total = Weight::ZERO;
        for wl in wls {
            total = total
                .checked_add(wl.weight.abs())
                .ok_or(SolverError::WeightOverflow)?;
        }

        let wls: Vec<WL> = wls
            .iter()
            .map(|wl| WL::new(self.map_lit(wl.lit), wl.weight))
            .collect();
        self.ctx.optimize.objective = Some(Objective::Aggregate { wls, kind });
        Ok(())
    }

    /// Minimize a CP integer variable.
    ///
    /// The CP back-end is an external collaborator; without one registered this mode is
    /// rejected.
    pub fn add_minimize_int_var(&mut self, _var_id: usize) -> Result<(), SolverError> {
        Err(SolverError::UnsupportedMinimization)
    }

    /// Register a symmetry of the theory as a literal permutation.
    ///
    /// Learned clauses are mapped through registered symmetries and the images added as
    /// redundant clauses.
    pub fn add_symmetry(&mut self, map: &[(Lit, Lit)]) -> Result<(), SolverError> {
        let kernel_pairs: Vec<(Lit, Lit)> = map
            .iter()
            .map(|&(from, to)| (self.map_lit(from), self.map_lit(to)))
            .collect();

        let count = {
            let mut ctx = self.ctx.into_partial_ref_mut();
            var_count(ctx.borrow())
        };

        let mut table: Vec<Lit> = (0..count * 2).map(Lit::from_code).collect();
        let mut targets = FxHashSet::default();

        for &(from, to) in kernel_pairs.iter() {
            table[from.code()] = to;
            table[(!from).code()] = !to;
            if !targets.insert(to.var().index()) {
                return Err(SolverError::MalformedSymmetry);
            }
        }

        // A permutation maps distinct sources to distinct targets and vice versa.
        let mut sources = FxHashSet::default();
        for &(from, _) in kernel_pairs.iter() {
            if !sources.insert(from.var().index()) {
                return Err(SolverError::MalformedSymmetry);
            }
        }

        self.ctx.theory.add_symmetry(table);
        Ok(())
    }

    /// Assume a literal for the next solve calls.
    pub fn assume(&mut self, lit: Lit) {
        let lit = self.map_lit(lit);
        self.assumptions.push(lit);
    }

    /// Alias for [`Solver::assume`], matching the constraint addition vocabulary.
    pub fn add_assumption(&mut self, lit: Lit) {
        self.assume(lit);
    }

    /// Remove all assumptions.
    pub fn clear_assumptions(&mut self) {
        self.assumptions.clear();
    }

    /// Add a child solver sharing the given rigid atoms, summarized by the head literal.
    ///
    /// The child's sub-theory is loaded through [`Solver::modal_child_mut`] using the same user
    /// numbering for the rigid atoms. Returns the child index.
    pub fn add_modal_child(&mut self, head: Lit, rigid: &[Var]) -> usize {
        let head = self.map_lit(head);
        let rigid: Vec<(Var, isize)> = rigid
            .iter()
            .map(|&user| (self.map_var(user), user.to_dimacs()))
            .collect();

        let mut child = Box::new(Solver::with_config(self.ctx.solver_config.clone()));
        child.ctx.solver_state.terminate = self.ctx.solver_state.terminate.clone();

        self.ctx.modal.add_child(head, rigid, child)
    }

    /// Mutable access to a child solver for loading its sub-theory.
    pub fn modal_child_mut(&mut self, index: usize) -> &mut Solver {
        &mut self.ctx.modal.child_mut(index).solver
    }

    /// Register a search observer.
    pub fn register_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.ctx.monitors.register(monitor);
    }

    /// A handle for requesting termination from another thread.
    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            terminate: self.ctx.solver_state.terminate.clone(),
        }
    }

    /// Finalize queued theory input.
    fn prepare(&mut self) {
        if !self.ctx.solver_state.theories_dirty {
            return;
        }
        self.ctx.solver_state.theories_dirty = false;

        let mut ctx = self.ctx.into_partial_ref_mut();
        prop::full_restart(ctx.borrow());
        crate::agg::transform::initialize_aggregates(ctx.borrow());
        def::initialize_definitions(ctx.borrow());
    }

    /// Run the kernel search under the given assumptions until it is decided or interrupted.
    fn run_search(&mut self, assumptions: &[Lit]) -> SatState {
        let mut ctx = self.ctx.into_partial_ref_mut();
        set_assumptions(ctx.borrow(), assumptions);
        while schedule_step(ctx.borrow()) {}
        ctx.part(SolverStateP).sat_state
    }

    /// Check satisfiability of the current theory, minimizing the objective if one is set.
    pub fn solve(&mut self) -> SolveResult {
        self.ctx.solver_state.interrupted = false;
        self.prepare();

        match self.ctx.optimize.objective.clone() {
            None => {
                let assumptions = self.assumptions.clone();
                let state = self.run_search(&assumptions);
                self.result_of(state)
            }
            Some(objective) => self.solve_minimize(objective),
        }
    }

    fn result_of(&self, state: SatState) -> SolveResult {
        if self.ctx.solver_state.interrupted {
            return SolveResult::Timeout;
        }
        match state {
            SatState::Sat => SolveResult::Sat,
            SatState::Unsat | SatState::UnsatUnderAssumptions => SolveResult::Unsat,
            SatState::Unknown => SolveResult::Timeout,
        }
    }

    /// The branch and bound loop around the kernel.
    fn solve_minimize(&mut self, objective: Objective) -> SolveResult {
        // All improvement constraints of this run are guarded by a fresh activation literal, so
        // they become inert once the run finishes.
        let act = self.internal_var().positive();

        let mut assumptions = self.assumptions.clone();
        assumptions.push(act);

        let mut best: Option<Vec<Option<bool>>> = None;
        let mut iterations = 0u64;

        loop {
            let state = self.run_search(&assumptions);

            if self.ctx.solver_state.interrupted {
                return SolveResult::Timeout;
            }

            match state {
                SatState::Sat => {
                    iterations += 1;
                    let model = self.ctx.model.assignment().to_vec();

                    match improvement(&objective, &model) {
                        Improvement::Clause(mut clause) => {
                            clause.push(!act);
                            let mut ctx = self.ctx.into_partial_ref_mut();
                            load_clause(ctx.borrow(), &clause);
                        }
                        Improvement::TightenBound(bound) => {
                            self.internal_set_ids += 1;
                            let set_id = usize::max_value() - self.internal_set_ids;

                            let (wls, kind) = match &objective {
                                Objective::Aggregate { wls, kind } => (wls.clone(), *kind),
                                _ => unreachable!(),
                            };

                            self.set_totals.insert(set_id, Weight::ZERO);
                            self.ctx.agg.add_pending_set(PendingSet { set_id, wls, kind });
                            self.ctx.agg.add_pending_agg(PendingAgg {
                                head: act,
                                set_id,
                                bound,
                                sign: AggSign::Upper,
                                sem: AggSem::Implication,
                                def_id: None,
                            });
                            self.ctx.solver_state.theories_dirty = true;
                            self.prepare();
                        }
                    }

                    best = Some(model);
                }
                SatState::Unsat | SatState::UnsatUnderAssumptions => {
                    return match best {
                        Some(model) => {
                            info!("optimum proven after {} improving models", iterations);
                            // Permanently disable this run's guarded constraints.
                            {
                                let mut ctx = self.ctx.into_partial_ref_mut();
                                load_clause(ctx.borrow(), &[!act]);
                            }
                            self.ctx.model.capture(&model);
                            self.ctx.solver_state.sat_state = SatState::Sat;
                            SolveResult::Sat
                        }
                        None => SolveResult::Unsat,
                    };
                }
                SatState::Unknown => return SolveResult::Timeout,
            }
        }
    }

    /// Set of user literals that satisfy the theory.
    ///
    /// Only valid after `solve` returned [`SolveResult::Sat`].
    pub fn model(&self) -> Option<Vec<Lit>> {
        if self.ctx.solver_state.sat_state != SatState::Sat {
            return None;
        }

        let model = &self.ctx.model;

        if self.ctx.solver_config.remap_vars {
            Some(
                self.remap
                    .pairs()
                    .into_iter()
                    .filter_map(|(user, kernel)| {
                        model
                            .assignment()
                            .get(kernel.index())
                            .cloned()
                            .flatten()
                            .map(|value| user.lit(value))
                    })
                    .collect(),
            )
        } else {
            Some(
                model
                    .assignment()
                    .iter()
                    .enumerate()
                    .filter_map(|(index, value)| value.map(|value| Lit::from_index(index, value)))
                    .collect(),
            )
        }
    }

    /// Literals entailed by propagation at the root level, without assumptions.
    ///
    /// Returns `None` when root propagation already derives a contradiction.
    pub fn entailed(&mut self) -> Option<Vec<Lit>> {
        self.prepare();

        let conflict = {
            let mut ctx = self.ctx.into_partial_ref_mut();
            set_assumptions(ctx.borrow(), &[]);
            if ctx.part(SolverStateP).sat_state == SatState::Unsat {
                true
            } else {
                prop::propagate(ctx.borrow()).is_err() && ctx.part(TrailP).current_level() == 0
            }
        };

        if conflict {
            self.ctx.solver_state.sat_state = SatState::Unsat;
            return None;
        }

        let trail: Vec<Lit> = self.ctx.trail.trail().to_vec();
        Some(self.to_user_lits(&trail))
    }

    /// The subset of assumptions that made the last solve unsatisfiable.
    pub fn unsat_core(&self) -> Vec<Lit> {
        self.to_user_lits(self.ctx.incremental.failed_core())
    }

    fn to_user_lits(&self, lits: &[Lit]) -> Vec<Lit> {
        if self.ctx.solver_config.remap_vars {
            lits.iter()
                .filter_map(|&lit| self.remap.user_lit(lit))
                .collect()
        } else {
            lits.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use fixsat_formula::cnf_formula;

    use fixsat_formula::test::{sat_formula, sgen_unsat_formula};

    #[test]
    fn empty_theory_is_sat() {
        let mut solver = Solver::new();
        assert_eq!(solver.solve(), SolveResult::Sat);
    }

    #[test]
    fn empty_clause_is_unsat() {
        let mut solver = Solver::new();
        solver.add_clause(&[]);
        assert_eq!(solver.solve(), SolveResult::Unsat);
    }

    #[test]
    fn solve_is_idempotent() {
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1, 2, 3;
            -1, -2;
            -2, -3;
        ]);

        assert_eq!(solver.solve(), SolveResult::Sat);
        let first = solver.model().unwrap();
        assert_eq!(solver.solve(), SolveResult::Sat);
        let second = solver.model().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn assumptions_and_core() {
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1, 2;
            -1, 2;
        ]);

        solver.assume(Lit::from_dimacs(-2));
        assert_eq!(solver.solve(), SolveResult::Unsat);
        let core = solver.unsat_core();
        assert_eq!(core, vec![Lit::from_dimacs(-2)]);

        solver.clear_assumptions();
        assert_eq!(solver.solve(), SolveResult::Sat);
        assert!(solver.model().unwrap().contains(&Lit::from_dimacs(2)));
    }

    #[test]
    fn entailed_returns_root_units() {
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1;
            -1, 2;
            3, 4;
        ]);

        let entailed = solver.entailed().unwrap();
        assert!(entailed.contains(&Lit::from_dimacs(1)));
        assert!(entailed.contains(&Lit::from_dimacs(2)));
        assert!(!entailed.iter().any(|lit| lit.var().to_dimacs() == 3));
    }

    #[test]
    fn terminate_preserves_state() {
        let mut solver = Solver::new();
        solver.add_formula(&cnf_formula![
            1, 2;
            -1, 2;
        ]);

        let handle = solver.terminate_handle();
        handle.terminate();
        assert_eq!(solver.solve(), SolveResult::Timeout);

        handle.clear();
        assert_eq!(solver.solve(), SolveResult::Sat);
    }

    proptest! {
        #[test]
        fn sgen_unsat(formula in sgen_unsat_formula(1..7usize)) {
            let mut solver = Solver::new();

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve(), SolveResult::Unsat);
        }

        #[test]
        fn sat(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut solver = Solver::new();

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve(), SolveResult::Sat);

            let model = solver.model().unwrap();

            for clause in formula.iter() {
                prop_assert!(clause.iter().any(|lit| model.contains(lit)));
            }
        }

        #[test]
        fn sgen_unsat_incremental_clauses(formula in sgen_unsat_formula(1..7usize)) {
            let mut solver = Solver::new();

            let mut last_state = SolveResult::Sat;

            for clause in formula.iter() {
                solver.add_clause(clause);

                let state = solver.solve();
                if state != last_state {
                    prop_assert_eq!(state, SolveResult::Unsat);
                    prop_assert_eq!(last_state, SolveResult::Sat);
                    last_state = state;
                }
            }

            prop_assert_eq!(last_state, SolveResult::Unsat);
        }
    }

}
