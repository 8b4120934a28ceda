//! Errors reported at the public API boundary.
use thiserror::Error;

/// Errors raised synchronously while adding constraints.
///
/// An unsatisfiable theory is not an error: additions that contradict the root assignment set a
/// sticky state that makes later `solve` calls return unsatisfiable. Errors here mean the input
/// itself was rejected and no partial state of the offending constraint persists.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("variable number {0} is not positive")]
    NonPositiveVariable(isize),

    #[error("set {set_id} was added twice")]
    DuplicateSet { set_id: usize },

    #[error("aggregate refers to unknown set {set_id}")]
    UnknownSet { set_id: usize },

    #[error("product set {set_id} contains the non-positive weight {weight}")]
    NonPositiveProductWeight { set_id: usize, weight: i64 },

    #[error("product set {set_id} contains an atom more than once")]
    DuplicateProductAtom { set_id: usize },

    #[error("variable is already the head of a definition in another rule kind")]
    ConflictingDefinition,

    #[error("arithmetic overflow combining weights; the constraint cannot be represented in fixed precision")]
    WeightOverflow,

    #[error("minimization over CP integer variables requires a CP back-end, none is registered")]
    UnsupportedMinimization,

    #[error("symmetry map is not a permutation of literals")]
    MalformedSymmetry,

    #[error("modal child solver refers to unknown rigid atom")]
    MalformedModalChild,
}
