//! Solver configuration.

/// Initial phase selected for decision variables.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Polarity {
    /// Always decide variables positive.
    True,
    /// Always decide variables negative.
    False,
    /// Reuse the last value the variable was assigned (phase saving).
    Stored,
    /// Pick a random phase from a generator seeded with `random_seed`.
    Rand,
}

/// Semantics applied to inductive definitions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DefSemantics {
    /// Completion plus absence of unfounded sets.
    Stable,
    /// Stable semantics plus the well-founded model check over mixed cycles.
    WellFounded,
    /// Clark completion only, no unfounded set reasoning.
    Completion,
}

/// Strategy for the unfounded set search itself.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UfsStrategy {
    BreadthFirst,
}

/// How often the unfounded set search runs.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DefnStrategy {
    /// At every end of the propagation queue.
    Always,
    /// Skip a number of invocations that adapts to how often the search finds something.
    Adaptive,
    /// Only when a total assignment is about to be accepted as a model.
    Lazy,
}

/// How aggressively aggregate propagations materialize their reasons.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggClauseSaving {
    /// Recompute the explanation from the trail whenever it is requested.
    None,
    /// Materialize the explanation as a clause as soon as the propagation happens.
    Clause,
    /// Remember the reason descriptor and materialize the clause at analysis time.
    Reason,
}

/// Configurable parameters used during solving.
///
/// The configuration is fixed when the solver is created; there is no global mutable state.
#[derive(Clone)]
pub struct SolverConfig {
    /// Multiplicative decay for the VSIDS decision heuristic. (Default: 0.95)
    pub vsids_decay: f32,

    /// Multiplicative decay for clause activities. (Default: 0.999)
    pub clause_activity_decay: f32,

    /// Number of conflicts between local clause reductions. (Default: 15000)
    pub reduce_locals_interval: u64,

    /// Number of conflicts between mid clause reductions. (Default: 10000)
    pub reduce_mids_interval: u64,

    /// Scaling factor for Luby sequence based restarts (number of conflicts). (Default: 128)
    pub luby_restart_interval_scale: u64,

    /// Seed for all randomized tie breaking; equal seeds give byte-identical runs. (Default: 42)
    pub random_seed: u64,

    /// Initial phase policy for decisions. (Default: `Polarity::Stored`)
    pub polarity: Polarity,

    /// Semantics of inductive definitions. (Default: `DefSemantics::Stable`)
    pub def_semantics: DefSemantics,

    /// Unfounded set search strategy. (Default: `UfsStrategy::BreadthFirst`)
    pub ufs_strategy: UfsStrategy,

    /// Scheduling of unfounded set searches. (Default: `DefnStrategy::Always`)
    pub defn_strategy: DefnStrategy,

    /// Reason materialization policy for aggregate propagations.
    /// (Default: `AggClauseSaving::Reason`)
    pub agg_clause_saving: AggClauseSaving,

    /// A set whose watched fraction under the generalized watch scheme stays below this ratio is
    /// propagated partially watched; ties keep the fully watched scheme. (Default: 0.75)
    pub watches_ratio: f32,

    /// Compile sum and cardinality aggregates with completion semantics to CNF. (Default: false)
    pub pb_to_cnf: bool,

    /// Accept a BDD based CNF encoding if its size stays below this multiple of the adder network
    /// estimate. (Default: 2.0)
    pub bdd_threshold: f32,

    /// Accept a sorting network CNF encoding if its size stays below this multiple of the adder
    /// network estimate. (Default: 4.0)
    pub sort_threshold: f32,

    /// Verify the well-founded model over mixed cycles before accepting a total model.
    /// (Default: false, implied by `DefSemantics::WellFounded`)
    pub check_well_founded: bool,

    /// Translate sparse user variable numbers to a dense kernel range. (Default: true)
    pub remap_vars: bool,

    /// Subset-minimize aggregate explanations by re-scanning contributions in weight order.
    /// (Default: false)
    pub subset_minimize_explanations: bool,

    /// Upper bound on learned clause images added per conflict through registered symmetries.
    /// (Default: 4)
    pub symmetry_learning_limit: usize,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            vsids_decay: 0.95,
            clause_activity_decay: 0.999,
            reduce_locals_interval: 15000,
            reduce_mids_interval: 10000,
            luby_restart_interval_scale: 128,
            random_seed: 42,
            polarity: Polarity::Stored,
            def_semantics: DefSemantics::Stable,
            ufs_strategy: UfsStrategy::BreadthFirst,
            defn_strategy: DefnStrategy::Always,
            agg_clause_saving: AggClauseSaving::Reason,
            watches_ratio: 0.75,
            pb_to_cnf: false,
            bdd_threshold: 2.0,
            sort_threshold: 4.0,
            check_well_founded: false,
            remap_vars: true,
            subset_minimize_explanations: false,
            symmetry_learning_limit: 4,
        }
    }
}

impl SolverConfig {
    /// Whether the well-founded model check has to run on total models.
    pub fn needs_well_founded_check(&self) -> bool {
        self.check_well_founded || self.def_semantics == DefSemantics::WellFounded
    }

    /// Whether unfounded set propagation is active at all.
    pub fn needs_ufs_search(&self) -> bool {
        self.def_semantics != DefSemantics::Completion
    }
}
