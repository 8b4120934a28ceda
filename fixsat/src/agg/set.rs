//! Typed weighted sets and their aggregates.
use fixsat_formula::{AggKind, AggSem, AggSign, Lit, Weight, WL};

/// The operation record of an aggregate type.
///
/// Min aggregates are rewritten to max during normalization, cardinality is a sum with unit
/// weights, so three operation sets remain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggOp {
    Sum,
    Prod,
    Max,
}

impl AggOp {
    /// The value of the aggregate over the empty set.
    pub fn identity(self) -> Weight {
        match self {
            AggOp::Sum => Weight::ZERO,
            AggOp::Prod => Weight::ONE,
            AggOp::Max => Weight::MIN,
        }
    }

    /// Combine the running value with the contribution of one more element.
    pub fn combine(self, lhs: Weight, rhs: Weight) -> Weight {
        match self {
            AggOp::Sum => lhs + rhs,
            AggOp::Prod => lhs * rhs,
            AggOp::Max => lhs.max(rhs),
        }
    }

    /// Combine with overflow detection, used while constraints are being added.
    pub fn checked_combine(self, lhs: Weight, rhs: Weight) -> Option<Weight> {
        match self {
            AggOp::Sum => lhs.checked_add(rhs),
            AggOp::Prod => lhs.checked_mul(rhs),
            AggOp::Max => Some(lhs.max(rhs)),
        }
    }

    /// Undo the contribution of one element, `None` when the value has to be recomputed by a
    /// scan (max has no inverse).
    pub fn remove(self, lhs: Weight, rhs: Weight) -> Option<Weight> {
        match self {
            AggOp::Sum => Some(lhs - rhs),
            AggOp::Prod => Some(lhs / rhs),
            AggOp::Max => None,
        }
    }

    /// Whether a weight contributes nothing to the aggregate.
    pub fn is_neutral(self, weight: Weight) -> bool {
        match self {
            AggOp::Sum => weight == Weight::ZERO,
            AggOp::Prod => weight == Weight::ONE,
            AggOp::Max => false,
        }
    }
}

/// One aggregate constraint over a set.
#[derive(Clone, Debug)]
pub struct Agg {
    pub head: Lit,
    pub bound: Weight,
    pub sign: AggSign,
    pub sem: AggSem,
    /// The aggregate function named in the input, before normalization collapsed it.
    pub kind: AggKind,
    /// Definition this aggregate belongs to when `sem` is `Def`.
    pub def_id: Option<usize>,
}

impl Agg {
    /// Whether a value on the constrained side of the bound satisfies the aggregate.
    pub fn holds_for(&self, value: Weight) -> bool {
        match self.sign {
            AggSign::Lower => value >= self.bound,
            AggSign::Upper => value <= self.bound,
        }
    }
}

/// Which propagation scheme a set ended up with.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PropScheme {
    FullyWatched,
    PartiallyWatched,
}

/// A normalized weighted set with its aggregates.
///
/// After normalization the weighted literals are sorted by increasing weight and hold aggregates
/// of a single type.
#[derive(Clone, Debug)]
pub struct TypedSet {
    /// User visible id of the originating set.
    pub set_id: usize,
    pub wls: Vec<WL>,
    pub op: AggOp,
    /// Lower bound on the aggregate value that holds independent of the assignment. This absorbs
    /// the folded dual-sign weights of max sets.
    pub esv: Weight,
    /// Bound shift accumulated while folding literals during normalization. Already applied to
    /// the aggregate bounds; kept for reporting.
    pub offset: Weight,
    pub aggs: Vec<Agg>,
    pub scheme: PropScheme,
}

impl TypedSet {
    /// The aggregate value if every literal of the set were false.
    pub fn empty_value(&self) -> Weight {
        self.esv
    }

    /// The aggregate value if every literal of the set were true.
    pub fn best_possible(&self) -> Weight {
        let mut value = self.empty_value();
        for wl in self.wls.iter() {
            value = self.op.combine(value, wl.weight);
        }
        value
    }
}
