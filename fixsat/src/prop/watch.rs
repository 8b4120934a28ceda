//! Watchlists to detect clauses that became unit.
//!
//! Each (long) clause has always two watches pointing to it. The watches are kept in the
//! watchlists of two different literals of the clause. Whenever the watches are moved to
//! different literals the literals of the clause are permuted so the watched literals are in
//! position 0 and 1.
//!
//! When a clause is not unit under the current assignment, the watched literals point at two
//! non-false literals. When a clause is unit and thus propagating, the true literal is watched
//! and in position 0, the other watched literal is the one with the largest decision level and
//! kept in position 1. When a clause becomes satisfied before becoming unit the watches can be
//! kept as they were.
//!
//! There is no need to update watchlists on backtracking, as unassigning variables cannot
//! invalidate the invariant.
//!
//! As a further optimization we use blocking literals. Each watch stores a literal of the clause
//! that is different from the watched literal. When that literal is true, the clause is already
//! satisfied, which can be detected without accessing the clause database.
//!
//! See [Section 4.5.1 of the "Handbook of Satisfiability"][handbook-ch4] for details and
//! references.
//!
//! [handbook-ch4]: https://www.satassociation.org/articles/FAIA185-0131.pdf
use partial_ref::{partial, PartialRef};

use fixsat_formula::Lit;

use crate::clause::ClauseRef;
use crate::context::{parts::*, Context};

/// A watch on a long clause.
#[derive(Copy, Clone)]
pub struct Watch {
    /// Clause which has the referring lit in position 0 or 1.
    pub cref: ClauseRef,
    /// A lit of the clause, different from the referring lit.
    pub blocking: Lit,
}

/// Watchlists to detect clauses that became unit.
#[derive(Default)]
pub struct Watchlists {
    /// Contains only valid data for indices of assigned variables.
    watches: Vec<Vec<Watch>>,
    /// Whether the watchlists are up to date with the clause database.
    enabled: bool,
}

impl Watchlists {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.watches.resize(count * 2, vec![]);
    }

    /// Start watching a clause.
    ///
    /// `lits` have to be the first two literals of the given clause.
    pub fn watch_clause(&mut self, cref: ClauseRef, lits: [Lit; 2]) {
        if !self.enabled {
            return;
        }
        for i in 0..2 {
            let watch = Watch {
                cref,
                blocking: lits[i ^ 1],
            };
            self.watches[(!lits[i]).code()].push(watch);
        }
    }

    /// Stop watching a clause.
    ///
    /// `lits` have to be the two currently watched literals of the clause.
    pub fn unwatch_clause(&mut self, cref: ClauseRef, lits: [Lit; 2]) {
        if !self.enabled {
            return;
        }
        for &lit in lits.iter() {
            self.watches[(!lit).code()].retain(|watch| watch.cref != cref);
        }
    }

    /// Return watches for a given literal.
    pub fn watched_by_mut(&mut self, lit: Lit) -> &mut Vec<Watch> {
        &mut self.watches[lit.code()]
    }

    /// Make a literal watch a clause.
    pub fn add_watch(&mut self, lit: Lit, watch: Watch) {
        self.watches[lit.code()].push(watch)
    }

    /// Invalidate all watchlists.
    ///
    /// Clause storage compaction invalidates all clause references, so the watchlists are
    /// discarded wholesale and rebuilt before the next propagation.
    pub fn disable(&mut self) {
        self.enabled = false;
        for watchlist in self.watches.iter_mut() {
            watchlist.clear();
        }
    }

    /// Whether the watchlists are up to date.
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Rebuild the watchlists from the clause database if they are out of date.
pub fn enable_watchlists(mut ctx: partial!(Context, mut WatchlistsP, ClauseAllocP, ClauseDbP)) {
    if ctx.part(WatchlistsP).enabled() {
        return;
    }

    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    let (db, ctx) = ctx.split_part(ClauseDbP);
    let alloc = ctx.part(ClauseAllocP);

    watchlists.enabled = true;

    for &cref in db.clauses() {
        let clause = alloc.clause(cref);
        if clause.header().deleted() {
            continue;
        }
        let lits = clause.lits();
        watchlists.watch_clause(cref, [lits[0], lits[1]]);
    }
}
