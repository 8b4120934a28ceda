//! Translation between sparse user variables and the dense kernel range.
//!
//! The kernel requires contiguous variable indices. When remapping is enabled, user variables
//! are interned in arrival order; kernel-internal atoms (auxiliaries, Tseitin variables,
//! activation guards) never get a user number and stay invisible in models.
use fixsat_formula::{Lit, Var};

use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct Remapper {
    to_kernel: FxHashMap<usize, Var>,
    to_user: FxHashMap<usize, Var>,
}

impl Remapper {
    /// The kernel variable of a user variable, if it was seen before.
    pub fn kernel_var(&self, user: Var) -> Option<Var> {
        self.to_kernel.get(&user.index()).cloned()
    }

    /// The user variable behind a kernel variable, if it has one.
    pub fn user_var(&self, kernel: Var) -> Option<Var> {
        self.to_user.get(&kernel.index()).cloned()
    }

    /// Intern a user variable with the given kernel counterpart.
    pub fn insert(&mut self, user: Var, kernel: Var) {
        self.to_kernel.insert(user.index(), kernel);
        self.to_user.insert(kernel.index(), user);
    }

    /// Translate a kernel literal back to user numbering.
    pub fn user_lit(&self, kernel: Lit) -> Option<Lit> {
        self.user_var(kernel.var())
            .map(|var| var.lit(kernel.is_positive()))
    }

    /// Number of interned user variables.
    pub fn len(&self) -> usize {
        self.to_kernel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_kernel.is_empty()
    }

    /// All (user, kernel) pairs, sorted by user index.
    pub fn pairs(&self) -> Vec<(Var, Var)> {
        let mut pairs: Vec<(Var, Var)> = self
            .to_kernel
            .iter()
            .map(|(&user, &kernel)| (Var::from_index(user), kernel))
            .collect();
        pairs.sort_unstable_by_key(|(user, _)| user.index());
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut remap = Remapper::default();
        remap.insert(Var::from_index(100), Var::from_index(0));
        remap.insert(Var::from_index(7), Var::from_index(1));

        assert_eq!(
            remap.kernel_var(Var::from_index(100)),
            Some(Var::from_index(0))
        );
        assert_eq!(
            remap.user_var(Var::from_index(1)),
            Some(Var::from_index(7))
        );
        assert_eq!(remap.user_var(Var::from_index(2)), None);

        let pairs = remap.pairs();
        assert_eq!(pairs[0].0, Var::from_index(7));
        assert_eq!(pairs[1].0, Var::from_index(100));

        assert_eq!(
            remap.user_lit(Lit::from_index(0, false)),
            Some(Lit::from_index(100, false))
        );
    }
}
