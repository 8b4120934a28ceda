//! Branch and bound optimization over repeated solves.
//!
//! The driver in the solver facade wraps the kernel's solve loop: after every model it imposes
//! an improvement constraint and re-solves until the tightened theory becomes unsatisfiable,
//! which proves the last model optimal. All improvement constraints are guarded by a fresh
//! activation literal that is finalized to false after the run, so repeated solves start from
//! the same theory.
use fixsat_formula::{AggKind, Lit, Weight, WL};

/// What is being minimized.
#[derive(Clone, Debug)]
pub enum Objective {
    /// Minimize the index of the first true literal of the list.
    OrderedList(Vec<Lit>),
    /// Minimize the set of true literals of the list under subset inclusion.
    Subset(Vec<Lit>),
    /// Minimize the aggregate value of a weighted set.
    Aggregate { wls: Vec<WL>, kind: AggKind },
}

/// Optimization state of the solver.
#[derive(Default)]
pub struct OptimizeState {
    pub objective: Option<Objective>,
}

/// How the next iteration constrains the search.
pub enum Improvement {
    /// A clause that any better model satisfies. An empty clause means the optimum was reached.
    Clause(Vec<Lit>),
    /// A new upper bound for the minimized aggregate.
    TightenBound(Weight),
}

/// The measured objective value of a model, for reporting.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ObjectiveValue {
    /// Index of the first true literal, the list length when none is true.
    Index(usize),
    /// Number of true literals.
    Count(usize),
    /// Aggregate value.
    Value(Weight),
}

/// Evaluate the objective under a total model assignment.
pub fn objective_value(objective: &Objective, model: &[Option<bool>]) -> ObjectiveValue {
    let lit_true = |lit: Lit| model[lit.index()] == Some(lit.is_positive());

    match objective {
        Objective::OrderedList(lits) => ObjectiveValue::Index(
            lits.iter()
                .position(|&lit| lit_true(lit))
                .unwrap_or(lits.len()),
        ),
        Objective::Subset(lits) => {
            ObjectiveValue::Count(lits.iter().filter(|&&lit| lit_true(lit)).count())
        }
        Objective::Aggregate { wls, kind } => {
            let mut value = kind.empty_set_value();
            for wl in wls.iter() {
                if lit_true(wl.lit) {
                    value = match kind {
                        AggKind::Sum | AggKind::Card => value + wl.weight,
                        AggKind::Prod => value * wl.weight,
                        AggKind::Max => value.max(wl.weight),
                        AggKind::Min => value.min(wl.weight),
                    };
                }
            }
            ObjectiveValue::Value(value)
        }
    }
}

/// The constraint that rules out the current model and everything at least as bad.
pub fn improvement(objective: &Objective, model: &[Option<bool>]) -> Improvement {
    let lit_true = |lit: Lit| model[lit.index()] == Some(lit.is_positive());

    match objective {
        Objective::OrderedList(lits) => {
            // A better model makes a literal before the currently first true one true.
            let first_true = lits
                .iter()
                .position(|&lit| lit_true(lit))
                .unwrap_or(lits.len());
            Improvement::Clause(lits[..first_true].to_vec())
        }
        Objective::Subset(lits) => {
            // A better model drops at least one of the currently true literals.
            Improvement::Clause(
                lits.iter()
                    .filter(|&&lit| lit_true(lit))
                    .map(|&lit| !lit)
                    .collect(),
            )
        }
        Objective::Aggregate { .. } => {
            let value = match objective_value(objective, model) {
                ObjectiveValue::Value(value) => value,
                _ => unreachable!(),
            };
            Improvement::TightenBound(value - Weight::ONE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fixsat_formula::lit;

    fn model_of(values: &[bool]) -> Vec<Option<bool>> {
        values.iter().map(|&value| Some(value)).collect()
    }

    #[test]
    fn ordered_list_improvement() {
        let objective = Objective::OrderedList(vec![lit!(1), lit!(2), lit!(3)]);
        let model = model_of(&[false, true, false]);

        assert_eq!(
            objective_value(&objective, &model),
            ObjectiveValue::Index(1)
        );

        match improvement(&objective, &model) {
            Improvement::Clause(clause) => assert_eq!(clause, vec![lit!(1)]),
            _ => panic!("expected a clause"),
        }
    }

    #[test]
    fn subset_improvement_blocks_true_literals() {
        let objective = Objective::Subset(vec![lit!(1), lit!(2), lit!(3)]);
        let model = model_of(&[true, false, true]);

        assert_eq!(
            objective_value(&objective, &model),
            ObjectiveValue::Count(2)
        );

        match improvement(&objective, &model) {
            Improvement::Clause(clause) => assert_eq!(clause, vec![lit!(-1), lit!(-3)]),
            _ => panic!("expected a clause"),
        }
    }

    #[test]
    fn aggregate_improvement_tightens() {
        let objective = Objective::Aggregate {
            wls: vec![
                WL::new(lit!(1), Weight::new(3)),
                WL::new(lit!(2), Weight::new(5)),
            ],
            kind: AggKind::Sum,
        };
        let model = model_of(&[true, true]);

        match improvement(&objective, &model) {
            Improvement::TightenBound(bound) => assert_eq!(bound, Weight::new(7)),
            _ => panic!("expected a tightened bound"),
        }
    }
}
