//! Aggregate constraint behavior against a naive evaluator.
use proptest::prelude::*;

use fixsat::{AggKind, AggSem, AggSign, Lit, SolveResult, Solver, SolverConfig, SolverError, Weight, WL};

fn wl(number: isize, weight: i64) -> WL {
    WL::new(Lit::from_dimacs(number), Weight::new(weight))
}

#[test]
fn cardinality_one_equivalence() {
    // h <-> card{l1, l2, l3} >= 1
    let build = || {
        let mut solver = Solver::new();
        solver
            .add_set(1, &[wl(1, 1), wl(2, 1), wl(3, 1)], AggKind::Card)
            .unwrap();
        solver
            .add_aggregate(
                Lit::from_dimacs(4),
                1,
                Weight::new(1),
                AggSign::Lower,
                AggSem::Comp,
                0,
            )
            .unwrap();
        solver
    };

    // With the head false all three literals must be false.
    let mut solver = build();
    solver.add_clause(&[Lit::from_dimacs(-4)]);
    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    for number in 1..=3 {
        assert!(model.contains(&Lit::from_dimacs(-number)));
    }

    // With the head true some literal is true in every model.
    let mut solver = build();
    solver.add_clause(&[Lit::from_dimacs(4)]);
    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!((1..=3).any(|number| model.contains(&Lit::from_dimacs(number))));

    // Head true and all literals false is a contradiction.
    let mut solver = build();
    solver.add_clause(&[Lit::from_dimacs(4)]);
    for number in 1..=3 {
        solver.add_clause(&[Lit::from_dimacs(-number)]);
    }
    assert_eq!(solver.solve(), SolveResult::Unsat);
}

#[test]
fn sum_overflow_is_rejected_at_addition() {
    let mut solver = Solver::new();
    let half = i64::max_value() / 2 + 1;
    let result = solver.add_set(1, &[wl(1, half), wl(2, half)], AggKind::Sum);
    match result {
        Err(SolverError::WeightOverflow) => {}
        other => panic!("expected overflow, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn product_sets_reject_bad_weights() {
    let mut solver = Solver::new();
    match solver.add_set(1, &[wl(1, 2), wl(2, 0)], AggKind::Prod) {
        Err(SolverError::NonPositiveProductWeight { .. }) => {}
        other => panic!("expected weight rejection, got {:?}", other.map(|_| ())),
    }

    let mut solver = Solver::new();
    match solver.add_set(1, &[wl(1, 2), wl(-1, 3)], AggKind::Prod) {
        Err(SolverError::DuplicateProductAtom { .. }) => {}
        other => panic!("expected duplicate rejection, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn duplicate_set_ids_are_rejected() {
    let mut solver = Solver::new();
    solver.add_set(1, &[wl(1, 1)], AggKind::Card).unwrap();
    match solver.add_set(1, &[wl(2, 1)], AggKind::Card) {
        Err(SolverError::DuplicateSet { set_id: 1 }) => {}
        other => panic!("expected duplicate set, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn empty_set_bounds() {
    // An empty sum set: lower bound 0 holds trivially, lower bound 1 forces the head false.
    let mut solver = Solver::new();
    solver.add_set(1, &[], AggKind::Sum).unwrap();
    solver
        .add_aggregate(
            Lit::from_dimacs(1),
            1,
            Weight::ZERO,
            AggSign::Lower,
            AggSem::Comp,
            0,
        )
        .unwrap();
    solver.add_clause(&[Lit::from_dimacs(1)]);
    assert_eq!(solver.solve(), SolveResult::Sat);

    let mut solver = Solver::new();
    solver.add_set(1, &[], AggKind::Sum).unwrap();
    solver
        .add_aggregate(
            Lit::from_dimacs(1),
            1,
            Weight::ONE,
            AggSign::Lower,
            AggSem::Comp,
            0,
        )
        .unwrap();
    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver
        .model()
        .unwrap()
        .contains(&Lit::from_dimacs(-1)));
}

/// Evaluate an aggregate over a full assignment the obvious way.
fn naive_value(kind: AggKind, wls: &[(isize, i64)], assignment: &[bool]) -> i64 {
    let mut value: Option<i64> = None;
    for &(number, weight) in wls {
        let var = number.abs() as usize - 1;
        let lit_true = assignment[var] == (number > 0);
        if lit_true {
            value = Some(match (kind, value) {
                (AggKind::Sum, acc) | (AggKind::Card, acc) => acc.unwrap_or(0) + weight,
                (AggKind::Prod, acc) => acc.unwrap_or(1) * weight,
                (AggKind::Max, acc) => acc.map(|a| a.max(weight)).unwrap_or(weight),
                (AggKind::Min, acc) => acc.map(|a| a.min(weight)).unwrap_or(weight),
            });
        }
    }
    match kind {
        AggKind::Sum | AggKind::Card => value.unwrap_or(0),
        AggKind::Prod => value.unwrap_or(1),
        AggKind::Max => value.unwrap_or(i64::min_value()),
        AggKind::Min => value.unwrap_or(i64::max_value()),
    }
}

/// Force a full assignment through assumptions and compare the solver's head value with the
/// naive evaluation.
fn check_head_agrees(
    solver: &mut Solver,
    kind: AggKind,
    wls: &[(isize, i64)],
    bound: i64,
    sign: AggSign,
    assignment: &[bool],
) {
    solver.clear_assumptions();
    for (index, &value) in assignment.iter().enumerate() {
        solver.assume(Lit::from_index(index, value));
    }

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();

    let value = naive_value(kind, wls, assignment);
    let expected = match sign {
        AggSign::Lower => value >= bound,
        AggSign::Upper => value <= bound,
    };

    let head = Lit::from_dimacs(100);
    assert_eq!(
        model.contains(&(head ^ !expected)),
        true,
        "head disagrees for assignment {:?}: value {}",
        assignment,
        value
    );
}

fn aggregate_solver(
    kind: AggKind,
    wls: &[(isize, i64)],
    bound: i64,
    sign: AggSign,
    config: SolverConfig,
) -> Solver {
    let mut solver = Solver::with_config(config);
    let set: Vec<WL> = wls.iter().map(|&(number, weight)| wl(number, weight)).collect();
    solver.add_set(7, &set, kind).unwrap();
    solver
        .add_aggregate(
            Lit::from_dimacs(100),
            7,
            Weight::new(bound),
            sign,
            AggSem::Comp,
            0,
        )
        .unwrap();
    solver
}

proptest! {
    #[test]
    fn sum_head_matches_naive_evaluation(
        assignment in proptest::collection::vec(any::<bool>(), 6),
        bound in 0i64..20,
    ) {
        let wls = [(1, 3), (2, 5), (-3, 2), (4, 7), (5, 1), (6, 4)];
        let mut solver =
            aggregate_solver(AggKind::Sum, &wls, bound, AggSign::Lower, SolverConfig::default());
        check_head_agrees(&mut solver, AggKind::Sum, &wls, bound, AggSign::Lower, &assignment);
    }

    #[test]
    fn max_head_matches_naive_evaluation(
        assignment in proptest::collection::vec(any::<bool>(), 5),
        bound in 0i64..10,
    ) {
        let wls = [(1, 3), (2, 9), (3, 2), (-4, 7), (5, 5)];
        let mut solver =
            aggregate_solver(AggKind::Max, &wls, bound, AggSign::Upper, SolverConfig::default());
        check_head_agrees(&mut solver, AggKind::Max, &wls, bound, AggSign::Upper, &assignment);
    }

    #[test]
    fn min_head_matches_naive_evaluation(
        assignment in proptest::collection::vec(any::<bool>(), 5),
        bound in 0i64..10,
    ) {
        let wls = [(1, 3), (2, 9), (3, 2), (4, 7), (5, 5)];
        let mut solver =
            aggregate_solver(AggKind::Min, &wls, bound, AggSign::Lower, SolverConfig::default());
        check_head_agrees(&mut solver, AggKind::Min, &wls, bound, AggSign::Lower, &assignment);
    }

    #[test]
    fn prod_head_matches_naive_evaluation(
        assignment in proptest::collection::vec(any::<bool>(), 4),
        bound in 1i64..30,
    ) {
        let wls = [(1, 2), (2, 3), (3, 5), (4, 2)];
        let mut solver =
            aggregate_solver(AggKind::Prod, &wls, bound, AggSign::Upper, SolverConfig::default());
        check_head_agrees(&mut solver, AggKind::Prod, &wls, bound, AggSign::Upper, &assignment);
    }

    #[test]
    fn partially_watched_agrees_with_fully_watched(
        assignment in proptest::collection::vec(any::<bool>(), 6),
        bound in 1i64..15,
    ) {
        let wls = [(1, 3), (2, 5), (3, 2), (4, 7), (5, 1), (6, 4)];

        // A watch ratio of one forces the generalized watch scheme wherever it applies.
        let mut pw_config = SolverConfig::default();
        pw_config.watches_ratio = 1.0;
        let mut pw_solver =
            aggregate_solver(AggKind::Sum, &wls, bound, AggSign::Lower, pw_config);

        // A watch ratio of zero keeps every set fully watched.
        let mut fw_config = SolverConfig::default();
        fw_config.watches_ratio = 0.0;
        let mut fw_solver =
            aggregate_solver(AggKind::Sum, &wls, bound, AggSign::Lower, fw_config);

        check_head_agrees(&mut pw_solver, AggKind::Sum, &wls, bound, AggSign::Lower, &assignment);
        check_head_agrees(&mut fw_solver, AggKind::Sum, &wls, bound, AggSign::Lower, &assignment);
    }

    /// A cardinality 5-of-20 compiled to CNF agrees with the propagator on full assignments.
    #[test]
    fn pb_encoding_agrees_with_propagator(
        assignment in proptest::collection::vec(any::<bool>(), 20),
    ) {
        let wls: Vec<(isize, i64)> = (1..=20).map(|number| (number as isize, 1)).collect();

        let mut cnf_config = SolverConfig::default();
        cnf_config.pb_to_cnf = true;
        cnf_config.bdd_threshold = 1000.0;
        cnf_config.sort_threshold = 1000.0;
        let mut cnf_solver =
            aggregate_solver(AggKind::Card, &wls, 5, AggSign::Lower, cnf_config);

        let mut prop_solver = aggregate_solver(
            AggKind::Card,
            &wls,
            5,
            AggSign::Lower,
            SolverConfig::default(),
        );

        check_head_agrees(&mut cnf_solver, AggKind::Card, &wls, 5, AggSign::Lower, &assignment);
        check_head_agrees(&mut prop_solver, AggKind::Card, &wls, 5, AggSign::Lower, &assignment);
    }
}
