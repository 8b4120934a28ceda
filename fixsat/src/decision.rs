//! Decision heuristics.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{Lit, Var};

use crate::config::Polarity;
use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, Reason};

pub mod vsids;

pub use vsids::Vsids;

/// Make a decision and enqueue it.
///
/// The decision variable is the unassigned variable with the highest VSIDS activity. The phase is
/// chosen by the configured polarity policy.
///
/// Returns `false` if no decision was made because all variables are assigned.
pub fn make_decision(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut MonitorsP,
        mut TrailP,
        mut VsidsP,
        SolverConfigP,
    ),
) -> bool {
    let decision_var = loop {
        match ctx.part_mut(VsidsP).next() {
            Some(var) => {
                if ctx.part(AssignmentP).var_value(var).is_none() {
                    break var;
                }
            }
            None => return false,
        }
    };

    let polarity = match ctx.part(SolverConfigP).polarity {
        Polarity::True => true,
        Polarity::False => false,
        Polarity::Stored => ctx.part(AssignmentP).last_var_value(decision_var),
        Polarity::Rand => ctx.part_mut(VsidsP).random_bool(),
    };

    let decision = Lit::from_var(decision_var, polarity);

    ctx.part_mut(TrailP).new_decision_level();

    enqueue_assignment(ctx.borrow(), decision, Reason::Unit);

    true
}

/// Mark a variable as available for decisions.
pub fn make_available(mut ctx: partial!(Context, mut VsidsP), var: Var) {
    ctx.part_mut(VsidsP).make_available(var);
}
