//! Modal composition: a hierarchical tree of solvers.
//!
//! Each child solver owns a sub-theory, shares a set of rigid atoms with its parent and is
//! summarized in the parent by a head literal: the head holds exactly when the child theory is
//! satisfiable under the current values of the rigid atoms. Once a child's head and rigid atoms
//! are all assigned, the child solves under assumptions formed from the rigid values; a result
//! inconsistent with the head becomes a parent conflict clause over the rigid literals and the
//! head.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{Lit, Var};

use log::debug;

use crate::clause::{db, ClauseHeader, Tier};
use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, Conflict, Reason};
use crate::solver::{SolveResult, Solver};

/// One child solver of the tree.
pub struct ModalChild {
    /// Parent literal summarizing the child's satisfiability.
    pub head: Lit,
    /// Rigid atoms as parent kernel variables paired with the child's external number.
    pub rigid: Vec<(Var, isize)>,
    pub solver: Box<Solver>,
    /// Decision level at which the child was last checked, cleared on backtracking below it.
    checked_at_level: Option<usize>,
}

/// The tree of child solvers below this solver.
#[derive(Default)]
pub struct ModalTree {
    pub children: Vec<ModalChild>,
}

impl ModalTree {
    pub fn add_child(&mut self, head: Lit, rigid: Vec<(Var, isize)>, solver: Box<Solver>) -> usize {
        self.children.push(ModalChild {
            head,
            rigid,
            solver,
            checked_at_level: None,
        });
        self.children.len() - 1
    }

    pub fn child_mut(&mut self, index: usize) -> &mut ModalChild {
        &mut self.children[index]
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Invalidate checks recorded above the given decision level.
    pub fn backtrack(&mut self, level: usize) {
        for child in self.children.iter_mut() {
            if child.checked_at_level.map(|l| l > level).unwrap_or(false) {
                child.checked_at_level = None;
            }
        }
    }
}

/// Solve every child whose head and rigid atoms are fully assigned and has not been checked on
/// this level yet.
pub fn propagate_end_of_queue(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut ModalP,
        mut MonitorsP,
        mut TheoryP,
        mut TrailP,
        mut WatchlistsP,
    ),
) -> Result<(), Conflict> {
    if ctx.part(ModalP).is_empty() {
        return Ok(());
    }

    let level = ctx.part(TrailP).current_level();

    for child_index in 0..ctx.part(ModalP).children.len() {
        // Gather the rigid assignment; skip children with unassigned rigid atoms.
        let (head, head_value, assumptions, rigid_lits) = {
            let assignment = ctx.part(AssignmentP);
            let child = &ctx.part(ModalP).children[child_index];

            if child.checked_at_level.is_some() {
                continue;
            }

            let head_value = assignment.lit_value(child.head);

            let mut assumptions = vec![];
            let mut rigid_lits = vec![];
            let mut complete = true;
            for &(parent_var, child_number) in child.rigid.iter() {
                match assignment.var_value(parent_var) {
                    Some(value) => {
                        assumptions.push(if value { child_number } else { -child_number });
                        rigid_lits.push(parent_var.lit(value));
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }

            if !complete {
                continue;
            }

            (child.head, head_value, assumptions, rigid_lits)
        };

        // Solve the child under the rigid assumptions.
        let child_result = {
            let child = &mut ctx.part_mut(ModalP).children[child_index];
            child.solver.clear_assumptions();
            for &number in assumptions.iter() {
                child.solver.assume(Lit::from_dimacs(number));
            }
            child.solver.solve()
        };

        let child_sat = match child_result {
            SolveResult::Sat => true,
            SolveResult::Unsat => false,
            SolveResult::Timeout => {
                // The shared terminate flag stops the parent at its next safe point.
                continue;
            }
        };

        ctx.part_mut(ModalP).children[child_index].checked_at_level = Some(level);

        debug!(
            "modal child {} solved: {} (head {})",
            child_index,
            if child_sat { "sat" } else { "unsat" },
            head
        );

        // The entailed head value, as a clause over the rigid assignment.
        let derived = if child_sat { head } else { !head };

        let mut clause = vec![derived];
        clause.extend(rigid_lits.iter().map(|&lit| !lit));

        match head_value {
            Some(value) if value == child_sat => {}
            Some(_) => {
                // Head contradicts the child's verdict.
                ctx.part_mut(TheoryP).set_conflict(&clause);
                return Err(Conflict::Theory);
            }
            None => {
                let reason = match clause.len() {
                    1 => Reason::Unit,
                    2 => {
                        ctx.part_mut(BinaryClausesP)
                            .add_binary_clause([clause[0], clause[1]]);
                        Reason::Binary([clause[1]])
                    }
                    _ => {
                        let deepest = (1..clause.len())
                            .max_by_key(|&pos| ctx.part(ImplGraphP).level(clause[pos].var()))
                            .unwrap();
                        clause.swap(1, deepest);

                        let mut header = ClauseHeader::new();
                        header.set_tier(Tier::Core);
                        let cref = db::add_clause(ctx.borrow(), header, &clause);
                        Reason::Long(cref)
                    }
                };
                enqueue_assignment(ctx.borrow(), clause[0], reason);
            }
        }
    }

    Ok(())
}

/// Verify all children against a total assignment.
///
/// Returns whether new assignments were enqueued.
pub fn final_check(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut ModalP,
        mut MonitorsP,
        mut TheoryP,
        mut TrailP,
        mut WatchlistsP,
    ),
) -> Result<bool, Conflict> {
    let trail_before = ctx.part(TrailP).trail().len();
    propagate_end_of_queue(ctx.borrow())?;
    Ok(ctx.part(TrailP).trail().len() > trail_before)
}
