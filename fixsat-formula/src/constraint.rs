//! Constraint descriptors consumed by the solver API.
//!
//! These are the wire-level forms produced by parsers and front-ends. The solver normalizes them
//! into its internal representations during initialization.
use std::fmt;

use crate::lit::{Lit, Var};
use crate::weight::Weight;

/// The aggregate function applied to a weighted set.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AggKind {
    Sum,
    Prod,
    Card,
    Min,
    Max,
}

impl AggKind {
    /// The value of the aggregate on the empty set.
    pub fn empty_set_value(self) -> Weight {
        match self {
            AggKind::Sum | AggKind::Card => Weight::ZERO,
            AggKind::Prod => Weight::ONE,
            AggKind::Max => Weight::MIN,
            AggKind::Min => Weight::MAX,
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AggKind::Sum => "sum",
            AggKind::Prod => "prod",
            AggKind::Card => "card",
            AggKind::Min => "min",
            AggKind::Max => "max",
        };
        write!(f, "{}", name)
    }
}

/// Which side of the bound the aggregate value must be on.
///
/// `Lower` requires `value >= bound`, `Upper` requires `value <= bound`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AggSign {
    Lower,
    Upper,
}

impl AggSign {
    pub fn flipped(self) -> AggSign {
        match self {
            AggSign::Lower => AggSign::Upper,
            AggSign::Upper => AggSign::Lower,
        }
    }
}

/// How the head literal relates to the aggregate constraint.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AggSem {
    /// Head is equivalent to the constraint.
    Comp,
    /// Head is defined by the constraint within an inductive definition.
    Def,
    /// Head implies the constraint, produced by splitting equivalences.
    Implication,
}

/// A weighted literal.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct WL {
    pub lit: Lit,
    pub weight: Weight,
}

impl WL {
    #[inline]
    pub fn new(lit: Lit, weight: Weight) -> WL {
        WL { lit, weight }
    }
}

impl fmt::Debug for WL {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}*{}", self.lit, self.weight)
    }
}

/// Compare weighted literals by their variable, placing duplicates next to each other.
pub fn cmp_wl_by_var(a: &WL, b: &WL) -> std::cmp::Ordering {
    a.lit.var().cmp(&b.lit.var()).then(a.lit.cmp(&b.lit))
}

/// Compare weighted literals by their weight.
pub fn cmp_wl_by_weight(a: &WL, b: &WL) -> std::cmp::Ordering {
    a.weight.cmp(&b.weight).then(a.lit.cmp(&b.lit))
}

/// A rule of an inductive definition.
///
/// The body is a disjunction or a conjunction of literals depending on `conjunctive`. Rules
/// sharing a `def_id` form one definition.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Rule {
    pub head: Var,
    pub body: Vec<Lit>,
    pub conjunctive: bool,
    pub def_id: usize,
}

impl Rule {
    pub fn new(head: Var, body: Vec<Lit>, conjunctive: bool, def_id: usize) -> Rule {
        Rule {
            head,
            body,
            conjunctive,
            def_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_values() {
        assert_eq!(AggKind::Sum.empty_set_value(), Weight::ZERO);
        assert_eq!(AggKind::Card.empty_set_value(), Weight::ZERO);
        assert_eq!(AggKind::Prod.empty_set_value(), Weight::ONE);
        assert_eq!(AggKind::Max.empty_set_value(), Weight::MIN);
        assert_eq!(AggKind::Min.empty_set_value(), Weight::MAX);
    }

    #[test]
    fn wl_orderings() {
        let a = WL::new(Lit::from_dimacs(3), Weight::new(1));
        let b = WL::new(Lit::from_dimacs(-3), Weight::new(2));
        let c = WL::new(Lit::from_dimacs(1), Weight::new(5));

        let mut by_var = vec![a, b, c];
        by_var.sort_by(cmp_wl_by_var);
        assert_eq!(by_var[0], c);

        let mut by_weight = vec![a, b, c];
        by_weight.sort_by(cmp_wl_by_weight);
        assert_eq!(by_weight[2], c);
    }
}
