//! The implication graph.
use partial_ref::{partial, PartialRef};

use fixsat_formula::lit::{Lit, LitIdx, Var};

use crate::clause::ClauseRef;
use crate::context::{parts::*, Context};

/// Identifies the propagator that owns a lazily materialized explanation.
///
/// Propagators that derive literals without materializing a reason clause record a compact reason
/// descriptor instead and hand the kernel a token. Conflict analysis calls back into the owning
/// propagator to turn the token into an actual clause.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TheoryToken {
    /// Index into the aggregate engine's reason store.
    Aggregate(LitIdx),
}

/// Assignments that caused a propagation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Reason {
    Unit,
    Binary([Lit; 1]),
    Long(ClauseRef),
    Theory(TheoryToken),
}

impl Reason {
    /// The literals that caused the propagation, for clause reasons.
    ///
    /// Theory reasons have no stored literals; they are materialized through the owning
    /// propagator's explain call instead.
    pub fn lits<'out, 'a, 'b>(&'a self, ctx: &'b partial!('b Context, ClauseAllocP)) -> &'out [Lit]
    where
        'a: 'out,
        'b: 'out,
    {
        match self {
            Reason::Unit => &[],
            Reason::Binary(lit) => lit,
            // The propagated literal is always kept at position 0
            Reason::Long(cref) => &ctx.part(ClauseAllocP).clause(*cref).lits()[1..],
            Reason::Theory(_) => {
                unreachable!("theory reasons are materialized during conflict analysis")
            }
        }
    }

    /// Whether the propagation was caused by a unit clause or assumption.
    pub fn is_unit(&self) -> bool {
        matches!(self, Reason::Unit)
    }

    /// Whether this reason requires an explain call to produce its literals.
    pub fn is_theory(&self) -> bool {
        matches!(self, Reason::Theory(_))
    }
}

/// Propagation that resulted in a conflict.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Conflict {
    Binary([Lit; 2]),
    Long(ClauseRef),
    /// The falsified clause is stored in the theory dispatch state.
    Theory,
}

/// Node and incoming edges of the implication graph.
#[derive(Copy, Clone)]
pub struct ImplNode {
    pub reason: Reason,
    pub level: LitIdx,
}

/// The implication graph.
///
/// This is a DAG having all assigned variables as nodes. It has unit clauses, assumptions and
/// decisions as sources. For each propagated assignment it has incoming edges from the literals
/// whose assignment caused the propagation to happen.
#[derive(Default)]
pub struct ImplGraph {
    /// Contains only valid data for indices of assigned variables.
    pub nodes: Vec<ImplNode>,
}

impl ImplGraph {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.nodes.resize(
            count,
            ImplNode {
                reason: Reason::Unit,
                level: 0,
            },
        );
    }

    /// Get the reason for an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn reason(&self, var: Var) -> &Reason {
        &self.nodes[var.index()].reason
    }

    /// Get the decision level of an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn level(&self, var: Var) -> usize {
        self.nodes[var.index()].level as usize
    }

    /// Updates the reason for an assigned variable.
    ///
    /// Make sure the reason vars are in front of the assigned variable in the trail.
    pub fn update_reason(&mut self, var: Var, reason: Reason) {
        self.nodes[var.index()].reason = reason
    }
}
