//! Inductive definition semantics: completion, stable and well-founded.
use fixsat::config::DefSemantics;
use fixsat::{Lit, SolveResult, Solver, SolverConfig, Var};

fn var(number: isize) -> Var {
    Var::from_dimacs(number)
}

fn lit(number: isize) -> Lit {
    Lit::from_dimacs(number)
}

fn solver_with_semantics(semantics: DefSemantics) -> Solver {
    let mut config = SolverConfig::default();
    config.def_semantics = semantics;
    Solver::with_config(config)
}

/// Rules `a <- b`, `b <- a` with the clause `a or b`: unsupported under stable semantics,
/// satisfiable under completion only.
#[test]
fn unit_definition_cycle() {
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(1)], false, 0).unwrap();
    solver.add_clause(&[lit(1), lit(2)]);
    assert_eq!(solver.solve(), SolveResult::Unsat);

    let mut solver = solver_with_semantics(DefSemantics::Completion);
    solver.add_rule(var(1), &[lit(2)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(1)], false, 0).unwrap();
    solver.add_clause(&[lit(1), lit(2)]);
    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(1)));
    assert!(model.contains(&lit(2)));
}

/// Rules `a <- b`, `b <- c`, `c <- a`, `a <- x`: with `x` false the loop `{a, b, c}` is
/// unfounded and every member is derived false.
#[test]
fn unfounded_set_loop_formula() {
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(3)], false, 0).unwrap();
    solver.add_rule(var(3), &[lit(1)], false, 0).unwrap();
    solver.add_rule(var(1), &[lit(4)], false, 0).unwrap();
    solver.add_clause(&[lit(-4)]);

    // The loop formulas make the members root-level consequences.
    let entailed = solver.entailed().unwrap();
    for number in 1..=3 {
        assert!(
            entailed.contains(&lit(-number)),
            "expected -{} to be entailed, got {:?}",
            number,
            entailed
        );
    }

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    for number in 1..=4 {
        assert!(model.contains(&lit(-number)));
    }
}

/// With `x` true the same program supports the whole loop through `a <- x`.
#[test]
fn loop_supported_through_external_literal() {
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(3)], false, 0).unwrap();
    solver.add_rule(var(3), &[lit(1)], false, 0).unwrap();
    solver.add_rule(var(1), &[lit(4)], false, 0).unwrap();
    solver.add_clause(&[lit(4)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    for number in 1..=4 {
        assert!(model.contains(&lit(number)));
    }
}

/// Conjunctive rules propagate through their completion.
#[test]
fn conjunctive_rule_completion() {
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2), lit(3)], true, 0).unwrap();
    solver.add_clause(&[lit(2)]);
    solver.add_clause(&[lit(3)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(1)));

    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2), lit(3)], true, 0).unwrap();
    solver.add_clause(&[lit(-2)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(-1)));
}

/// A negative cycle `a <- not b`, `b <- not a` has stable models but no total well-founded
/// model.
#[test]
fn well_founded_check_rejects_negative_cycle_models() {
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(-2)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(-1)], false, 0).unwrap();
    assert_eq!(solver.solve(), SolveResult::Sat);

    let mut solver = solver_with_semantics(DefSemantics::WellFounded);
    solver.add_rule(var(1), &[lit(-2)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(-1)], false, 0).unwrap();
    assert_eq!(solver.solve(), SolveResult::Unsat);
}

/// A definition whose well-founded model is total is accepted as-is.
#[test]
fn well_founded_accepts_stratified_definitions() {
    let mut solver = solver_with_semantics(DefSemantics::WellFounded);
    solver.add_rule(var(1), &[lit(3)], false, 0).unwrap();
    solver.add_rule(var(2), &[lit(-1)], false, 0).unwrap();
    solver.add_clause(&[lit(3)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(1)));
    assert!(model.contains(&lit(-2)));
    assert!(model.contains(&lit(3)));
}

/// Aggregate-defined heads participate in unfounded set reasoning.
#[test]
fn recursive_aggregate_definition() {
    use fixsat::{AggKind, AggSem, AggSign, Weight, WL};

    // a is defined by card{a, x} >= 1; with x false the only support of a is itself.
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver
        .add_set(
            1,
            &[
                WL::new(lit(1), Weight::ONE),
                WL::new(lit(2), Weight::ONE),
            ],
            AggKind::Card,
        )
        .unwrap();
    solver
        .add_aggregate(lit(1), 1, Weight::new(1), AggSign::Lower, AggSem::Def, 0)
        .unwrap();
    solver.add_clause(&[lit(-2)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(-1)), "unsupported head must be false");

    // With x true the aggregate supports a.
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver
        .add_set(
            1,
            &[
                WL::new(lit(1), Weight::ONE),
                WL::new(lit(2), Weight::ONE),
            ],
            AggKind::Card,
        )
        .unwrap();
    solver
        .add_aggregate(lit(1), 1, Weight::new(1), AggSign::Lower, AggSem::Def, 0)
        .unwrap();
    solver.add_clause(&[lit(2)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(1)));
}

/// Multiple rules for one head are merged without changing the semantics.
#[test]
fn multiple_rules_per_head() {
    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2)], false, 0).unwrap();
    solver.add_rule(var(1), &[lit(3)], false, 0).unwrap();
    solver.add_clause(&[lit(-2)]);
    solver.add_clause(&[lit(3)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(1)));

    let mut solver = solver_with_semantics(DefSemantics::Stable);
    solver.add_rule(var(1), &[lit(2)], false, 0).unwrap();
    solver.add_rule(var(1), &[lit(3)], false, 0).unwrap();
    solver.add_clause(&[lit(-2)]);
    solver.add_clause(&[lit(-3)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(-1)));
}
