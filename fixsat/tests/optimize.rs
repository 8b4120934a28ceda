//! The branch and bound optimization driver.
use fixsat::{AggKind, Lit, SolveResult, Solver, Weight, WL};

fn lit(number: isize) -> Lit {
    Lit::from_dimacs(number)
}

/// Subset minimization over `l1 or l2` and `l1 or l3` reaches a subset-minimal model, further
/// assumptions walk the remaining models, and finally nothing is left.
#[test]
fn subset_minimization() {
    let build = || {
        let mut solver = Solver::new();
        solver.add_clause(&[lit(1), lit(2)]);
        solver.add_clause(&[lit(1), lit(3)]);
        solver.add_minimize_subset(&[lit(1), lit(2), lit(3)]);
        solver
    };

    let mut solver = build();
    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();

    // The optimum is subset-minimal: clearing any true literal of the objective violates a
    // constraint or leaves a non-minimal superset.
    let true_count = (1..=3).filter(|&n| model.contains(&lit(n))).count();
    if model.contains(&lit(1)) {
        assert_eq!(true_count, 1, "{{l1}} is the only minimal model containing l1");
    } else {
        assert!(model.contains(&lit(2)) && model.contains(&lit(3)));
        assert_eq!(true_count, 2);
    }

    // Without l1 the minimal model is {l2, l3}.
    let mut solver = build();
    solver.assume(lit(-1));
    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(2)));
    assert!(model.contains(&lit(3)));

    // Without l1 and l2 nothing satisfies the constraints.
    let mut solver = build();
    solver.assume(lit(-1));
    solver.assume(lit(-2));
    assert_eq!(solver.solve(), SolveResult::Unsat);
}

/// Ordered list minimization prefers the earliest literal that can be true.
#[test]
fn ordered_list_minimization() {
    let mut solver = Solver::new();
    // l1 is impossible, l2 is possible.
    solver.add_clause(&[lit(-1)]);
    solver.add_clause(&[lit(2), lit(3)]);
    solver.add_minimize_list(&[lit(1), lit(2), lit(3)]);

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(2)));
}

/// Aggregate minimization tightens the bound until the optimum is proven.
#[test]
fn aggregate_minimization() {
    let mut solver = Solver::new();
    // Cover constraint: pick 2 or {3, 4}.
    solver.add_clause(&[lit(2), lit(3)]);
    solver.add_clause(&[lit(2), lit(4)]);
    solver
        .add_minimize_aggregate(
            &[
                WL::new(lit(2), Weight::new(5)),
                WL::new(lit(3), Weight::new(2)),
                WL::new(lit(4), Weight::new(2)),
            ],
            AggKind::Sum,
        )
        .unwrap();

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();

    // Optimal cover is {3, 4} with weight 4, beating {2} with weight 5.
    assert!(model.contains(&lit(-2)));
    assert!(model.contains(&lit(3)));
    assert!(model.contains(&lit(4)));
}

/// The optimization run leaves no residue: solving again still reaches a minimal model.
#[test]
fn optimization_is_repeatable() {
    let mut solver = Solver::new();
    solver.add_clause(&[lit(1), lit(2)]);
    solver.add_minimize_subset(&[lit(1), lit(2)]);

    for _ in 0..3 {
        assert_eq!(solver.solve(), SolveResult::Sat);
        let model = solver.model().unwrap();
        let true_count = (1..=2).filter(|&n| model.contains(&lit(n))).count();
        assert_eq!(true_count, 1, "optimum is one of the two singleton models");
    }
}

/// Minimization over CP integer variables needs a CP back-end.
#[test]
fn int_var_minimization_is_rejected() {
    let mut solver = Solver::new();
    assert!(solver.add_minimize_int_var(3).is_err());
}
