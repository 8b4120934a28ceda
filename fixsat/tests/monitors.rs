//! Monitor callbacks and symmetry registration.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fixsat::{Lit, Monitor, SolveResult, Solver};

fn lit(number: isize) -> Lit {
    Lit::from_dimacs(number)
}

struct Counter {
    propagations: Arc<AtomicUsize>,
    backtracks: Arc<AtomicUsize>,
}

impl Monitor for Counter {
    fn on_propagate(&mut self, _lit: Lit, _level: usize) {
        self.propagations.fetch_add(1, Ordering::Relaxed);
    }

    fn on_backtrack(&mut self, _level: usize) {
        self.backtracks.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn monitors_observe_propagations() {
    let propagations = Arc::new(AtomicUsize::new(0));
    let backtracks = Arc::new(AtomicUsize::new(0));

    let mut solver = Solver::new();
    solver.register_monitor(Box::new(Counter {
        propagations: propagations.clone(),
        backtracks: backtracks.clone(),
    }));

    solver.add_clause(&[lit(1)]);
    solver.add_clause(&[lit(-1), lit(2)]);
    solver.add_clause(&[lit(-2), lit(3)]);

    assert_eq!(solver.solve(), SolveResult::Sat);

    // The three chained units plus any decisions all pass through the monitor.
    assert!(propagations.load(Ordering::Relaxed) >= 3);
}

#[test]
fn symmetric_problems_accept_symmetries() {
    let mut solver = Solver::new();
    // The theory is symmetric under swapping variables 1 and 2.
    solver.add_clause(&[lit(1), lit(2)]);
    solver.add_clause(&[lit(-1), lit(-2)]);
    solver
        .add_symmetry(&[(lit(1), lit(2)), (lit(2), lit(1))])
        .unwrap();

    assert_eq!(solver.solve(), SolveResult::Sat);
    let model = solver.model().unwrap();
    assert!(model.contains(&lit(1)) ^ model.contains(&lit(2)));
}

#[test]
fn malformed_symmetry_is_rejected() {
    let mut solver = Solver::new();
    solver.add_clause(&[lit(1), lit(2), lit(3)]);
    // Two sources map to the same target.
    assert!(solver
        .add_symmetry(&[(lit(1), lit(3)), (lit(2), lit(3))])
        .is_err());
}
