//! Modal composition of solvers.
use fixsat::{Lit, SolveResult, Solver, Var};

fn lit(number: isize) -> Lit {
    Lit::from_dimacs(number)
}

/// The head literal tracks the child's satisfiability under the rigid assignment.
#[test]
fn head_follows_child_verdict() {
    // Parent: head 10, rigid atom 1. Child theory: the rigid atom must be true.
    let mut solver = Solver::new();
    let child = solver.add_modal_child(lit(10), &[Var::from_dimacs(1)]);
    solver.modal_child_mut(child).add_clause(&[lit(1)]);

    solver.assume(lit(1));
    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(10)));

    solver.clear_assumptions();
    solver.assume(lit(-1));
    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(-10)));
}

/// A head forced against the child's verdict is a conflict over the rigid atoms.
#[test]
fn conflicting_head_prunes_rigid_assignments() {
    let mut solver = Solver::new();
    let child = solver.add_modal_child(lit(10), &[Var::from_dimacs(1)]);
    solver.modal_child_mut(child).add_clause(&[lit(1)]);

    // Demand the head while making the child unsatisfiable.
    solver.add_clause(&[lit(10)]);
    solver.assume(lit(-1));
    assert_eq!(solver.solve(), SolveResult::Unsat);

    // Without the assumption the search settles on the rigid value the child needs.
    solver.clear_assumptions();
    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(1)));
    assert!(model.contains(&lit(10)));
}

/// A child with multiple rigid atoms constrains their combination.
#[test]
fn child_constrains_rigid_combination() {
    let mut solver = Solver::new();
    let rigid = [Var::from_dimacs(1), Var::from_dimacs(2)];
    let child = solver.add_modal_child(lit(10), &rigid);
    // Child forbids both rigid atoms true at once.
    solver.modal_child_mut(child).add_clause(&[lit(-1), lit(-2)]);

    solver.add_clause(&[lit(10)]);
    solver.assume(lit(1));
    solver.assume(lit(2));
    assert_eq!(solver.solve(), SolveResult::Unsat);

    solver.clear_assumptions();
    solver.assume(lit(1));
    assert_eq!(solver.solve(), SolveResult::Sat);
    assert!(solver.model().unwrap().contains(&lit(-2)));
}
