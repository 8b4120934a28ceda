//! The pseudo-Boolean to CNF compiler.
//!
//! Sum and cardinality equivalences can be compiled away during normalization: the weights are
//! decomposed over a mixed radix base found by branch-and-bound over prime digits ([`base`]),
//! the digits run through odd-even merge sorting networks with carry chains ([`network`]), and
//! the resulting comparison circuit is emitted as clauses over fresh atoms ([`encode`]). When
//! no encoding stays below the configured multiple of the adder network estimate the aggregate
//! remains in propagator form.
use partial_ref::{partial, PartialRef};

use crate::agg::set::{Agg, TypedSet};
use crate::context::{parts::*, Context};

pub mod base;
pub mod encode;
pub mod network;

/// Try to compile one aggregate equivalence to CNF.
///
/// Returns whether the aggregate was fully encoded and can be dropped.
pub fn encode_aggregate(
    mut ctx: partial!(
        Context,
        mut AggP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ModalP,
        mut MonitorsP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    set: &TypedSet,
    agg: &Agg,
) -> bool {
    encode::encode(ctx.borrow(), set, agg)
}
