//! Emitting aggregate equivalences as CNF.
//!
//! The encoder normalizes the constraint to a monotone lower bound, estimates the cost of a BDD
//! and of a mixed-radix sorting network encoding against an adder network yardstick, builds the
//! cheaper circuit that stays below its configured threshold, and emits the Tseitin clauses
//! together with the equivalence between the aggregate head and the circuit output.
use partial_ref::{partial, PartialRef};

use fixsat_formula::{AggSign, Lit, Weight, WL};

use log::debug;

use rustc_hash::FxHashMap;

use crate::agg::set::{Agg, TypedSet};
use crate::context::{parts::*, Context};
use crate::load::load_clause;

use super::base::{self, CostModel, WeightCount};
use super::network::{self, ComparatorSink, WireId};

/// A wire of the circuit under construction: a constant or a literal.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum BLit {
    True,
    False,
    Of(Lit),
}

impl BLit {
    fn negated(self) -> BLit {
        match self {
            BLit::True => BLit::False,
            BLit::False => BLit::True,
            BLit::Of(lit) => BLit::Of(!lit),
        }
    }
}

/// Collects fresh atoms and Tseitin clauses, with constant folding on every gate.
struct Circuit {
    next_index: usize,
    fresh_count: usize,
    clauses: Vec<Vec<Lit>>,
}

impl Circuit {
    fn new(var_count: usize) -> Circuit {
        Circuit {
            next_index: var_count,
            fresh_count: 0,
            clauses: vec![],
        }
    }

    fn fresh(&mut self) -> Lit {
        let lit = Lit::from_index(self.next_index, true);
        self.next_index += 1;
        self.fresh_count += 1;
        lit
    }

    /// `y` equivalent to `a or b`.
    fn or2(&mut self, a: BLit, b: BLit) -> BLit {
        match (a, b) {
            (BLit::True, _) | (_, BLit::True) => BLit::True,
            (BLit::False, other) | (other, BLit::False) => other,
            (BLit::Of(a), BLit::Of(b)) if a == b => BLit::Of(a),
            (BLit::Of(a), BLit::Of(b)) if a == !b => BLit::True,
            (BLit::Of(a), BLit::Of(b)) => {
                let y = self.fresh();
                self.clauses.push(vec![!a, y]);
                self.clauses.push(vec![!b, y]);
                self.clauses.push(vec![a, b, !y]);
                BLit::Of(y)
            }
        }
    }

    /// `y` equivalent to `a and b`.
    fn and2(&mut self, a: BLit, b: BLit) -> BLit {
        self.or2(a.negated(), b.negated()).negated()
    }

    fn or_many(&mut self, lits: &[BLit]) -> BLit {
        let mut result = BLit::False;
        for &lit in lits {
            result = self.or2(result, lit);
        }
        result
    }

    /// `y` equivalent to `if sel then hi else lo`.
    fn ite(&mut self, sel: Lit, hi: BLit, lo: BLit) -> BLit {
        if hi == lo {
            return hi;
        }
        match (hi, lo) {
            (BLit::True, BLit::False) => BLit::Of(sel),
            (BLit::False, BLit::True) => BLit::Of(!sel),
            (BLit::True, lo) => self.or2(BLit::Of(sel), lo),
            (BLit::False, lo) => self.and2(BLit::Of(!sel), lo),
            (hi, BLit::True) => self.or2(BLit::Of(!sel), hi),
            (hi, BLit::False) => self.and2(BLit::Of(sel), hi),
            (BLit::Of(hi), BLit::Of(lo)) => {
                let y = self.fresh();
                self.clauses.push(vec![!sel, !hi, y]);
                self.clauses.push(vec![!sel, hi, !y]);
                self.clauses.push(vec![sel, !lo, y]);
                self.clauses.push(vec![sel, lo, !y]);
                BLit::Of(y)
            }
        }
    }
}

/// Try to encode `head <-> (aggregate over set holds)`; returns whether it was emitted.
pub fn encode(
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
    if set.wls.len() > 10_000 {
        return false;
    }

    // Monotone lower bound form: an upper bound becomes a lower bound over the negated
    // literals.
    let total: Weight = set.wls.iter().map(|wl| wl.weight).sum();
    let (wls, bound) = match agg.sign {
        AggSign::Lower => (set.wls.clone(), agg.bound),
        AggSign::Upper => (
            set.wls
                .iter()
                .map(|wl| WL::new(!wl.lit, wl.weight))
                .collect::<Vec<_>>(),
            total - agg.bound,
        ),
    };

    if bound <= Weight::ZERO || bound > total {
        // Constant constraints were already resolved by normalization.
        return false;
    }

    let weight_counts = weight_counts(&wls);
    let adder_estimate = adder_cost(&weight_counts).max(1);

    let config = ctx.part(SolverConfigP);
    let bdd_limit = (adder_estimate as f32 * config.bdd_threshold) as u64;
    let sort_limit = (adder_estimate as f32 * config.sort_threshold) as u64;

    let bdd_clauses = bdd_cost(&wls, bound, bdd_limit).map(|nodes| nodes.saturating_mul(4));
    let found_base = base::find_base(&weight_counts, CostModel::OddEvenSize, true);
    let sorter_size = found_base.cost.saturating_mul(3);

    let bdd_viable = bdd_clauses.map(|size| size <= bdd_limit).unwrap_or(false);
    let sorter_viable = sorter_size <= sort_limit;

    let var_count = ctx.part(AssignmentP).assignment().len();
    let mut circuit = Circuit::new(var_count);

    let output = if bdd_viable && (!sorter_viable || bdd_clauses.unwrap() <= sorter_size) {
        debug!(
            "pb: bdd encoding for set {} ({} clauses)",
            set.set_id,
            bdd_clauses.unwrap()
        );
        build_bdd(&mut circuit, &wls, bound)
    } else if sorter_viable {
        debug!(
            "pb: sorter encoding for set {} (base {:?}, cost {})",
            set.set_id, found_base.base, found_base.cost
        );
        build_sorter(&mut circuit, &wls, &found_base.base, bound)
    } else {
        debug!(
            "pb: set {} too expensive to encode (sorter {} vs adder {})",
            set.set_id, sorter_size, adder_estimate
        );
        return false;
    };

    // Equivalence between the head and the circuit output.
    let head = agg.head;
    match output {
        BLit::True => circuit.clauses.push(vec![head]),
        BLit::False => circuit.clauses.push(vec![!head]),
        BLit::Of(output) => {
            circuit.clauses.push(vec![!head, output]);
            circuit.clauses.push(vec![head, !output]);
        }
    }

    let new_count = circuit.next_index;
    crate::context::ensure_var_count(ctx.borrow(), new_count);

    for clause in circuit.clauses.iter() {
        load_clause(ctx.borrow(), clause);
    }

    true
}

fn weight_counts(wls: &[WL]) -> Vec<WeightCount> {
    let mut counts: FxHashMap<u64, u64> = FxHashMap::default();
    for wl in wls {
        *counts.entry(wl.weight.value() as u64).or_insert(0) += 1;
    }
    let mut result: Vec<WeightCount> = counts
        .into_iter()
        .map(|(weight, count)| WeightCount { weight, count })
        .collect();
    result.sort_unstable_by(|a, b| b.weight.cmp(&a.weight));
    result
}

/// Clause count yardstick of a ripple adder network with a binary comparator.
fn adder_cost(weights: &[WeightCount]) -> u64 {
    let bits: u64 = weights
        .iter()
        .map(|entry| entry.weight.count_ones() as u64 * entry.count)
        .sum();
    bits.saturating_mul(7)
}

/// Node count of the interval-memoized BDD, or `None` when the cap is exceeded.
fn bdd_cost(wls: &[WL], bound: Weight, cap: u64) -> Option<u64> {
    let mut suffix_sum = vec![Weight::ZERO; wls.len() + 1];
    for index in (0..wls.len()).rev() {
        suffix_sum[index] = suffix_sum[index + 1] + wls[index].weight;
    }

    let mut memo: FxHashMap<(usize, Weight), ()> = FxHashMap::default();
    let mut stack = vec![(0usize, bound)];

    while let Some((index, needed)) = stack.pop() {
        if needed <= Weight::ZERO || suffix_sum[index] < needed {
            continue;
        }
        if memo.insert((index, needed), ()).is_some() {
            continue;
        }
        if memo.len() as u64 > cap {
            return None;
        }
        stack.push((index + 1, needed - wls[index].weight));
        stack.push((index + 1, needed));
    }

    Some(memo.len() as u64)
}

/// Build the BDD circuit for `sum over wls >= bound`, weights descending.
fn build_bdd(circuit: &mut Circuit, wls: &[WL], bound: Weight) -> BLit {
    let mut sorted = wls.to_vec();
    sorted.sort_unstable_by(|a, b| b.weight.cmp(&a.weight));

    let mut suffix_sum = vec![Weight::ZERO; sorted.len() + 1];
    for index in (0..sorted.len()).rev() {
        suffix_sum[index] = suffix_sum[index + 1] + sorted[index].weight;
    }

    let mut memo: FxHashMap<(usize, Weight), BLit> = FxHashMap::default();

    build_bdd_node(circuit, &sorted, &suffix_sum, &mut memo, 0, bound)
}

fn build_bdd_node(
    circuit: &mut Circuit,
    wls: &[WL],
    suffix_sum: &[Weight],
    memo: &mut FxHashMap<(usize, Weight), BLit>,
    index: usize,
    needed: Weight,
) -> BLit {
    if needed <= Weight::ZERO {
        return BLit::True;
    }
    if suffix_sum[index] < needed {
        return BLit::False;
    }
    if let Some(&node) = memo.get(&(index, needed)) {
        return node;
    }

    let wl = wls[index];
    let hi = build_bdd_node(circuit, wls, suffix_sum, memo, index + 1, needed - wl.weight);
    let lo = build_bdd_node(circuit, wls, suffix_sum, memo, index + 1, needed);
    let node = circuit.ite(wl.lit, hi, lo);

    memo.insert((index, needed), node);
    node
}

/// The circuit sink materializing comparators as or/and gates over wire contents.
struct GateSink<'a> {
    circuit: &'a mut Circuit,
    contents: Vec<BLit>,
}

impl<'a> ComparatorSink for GateSink<'a> {
    fn compare(&mut self, wires: &mut [WireId], high: usize, low: usize) {
        let a = self.contents[wires[high] as usize];
        let b = self.contents[wires[low] as usize];
        let hi = self.circuit.or2(a, b);
        let lo = self.circuit.and2(a, b);

        let hi_wire = self.push(hi);
        let lo_wire = self.push(lo);
        wires[high] = hi_wire;
        wires[low] = lo_wire;
    }
}

impl<'a> GateSink<'a> {
    fn push(&mut self, content: BLit) -> WireId {
        self.contents.push(content);
        (self.contents.len() - 1) as WireId
    }
}

/// Build the mixed-radix sorting network circuit for `sum over wls >= bound`.
fn build_sorter(circuit: &mut Circuit, wls: &[WL], radices: &[u64], bound: Weight) -> BLit {
    let mut sink = GateSink {
        circuit,
        contents: vec![BLit::False],
    };
    let pad: WireId = 0;

    // Unary digit inputs per position, least significant first, plus the open top position.
    let mut digit_outputs: Vec<Vec<BLit>> = vec![];
    let mut carries: Vec<BLit> = vec![];
    let mut factor: u64 = 1;

    for position in 0..=radices.len() {
        let mut inputs: Vec<WireId> = vec![];

        for wl in wls {
            let digit = if position < radices.len() {
                (wl.weight.value() as u64 / factor) % radices[position]
            } else {
                wl.weight.value() as u64 / factor
            };
            for _ in 0..digit {
                let wire = sink.push(BLit::Of(wl.lit));
                inputs.push(wire);
            }
        }
        for &carry in carries.iter() {
            let wire = sink.push(carry);
            inputs.push(wire);
        }

        network::sort(&mut inputs, pad, &mut sink);

        let outputs: Vec<BLit> = inputs
            .iter()
            .map(|&wire| sink.contents[wire as usize])
            .collect();

        carries = vec![];
        if position < radices.len() {
            let radix = radices[position] as usize;
            let mut take = radix;
            while take <= outputs.len() {
                carries.push(outputs[take - 1]);
                take += radix;
            }
            factor *= radices[position];
        }

        digit_outputs.push(outputs);
    }

    // Mixed radix digits of the bound, least significant first; the top position takes the
    // remainder.
    let mut bound_digits: Vec<u64> = vec![];
    let mut rest = bound.value() as u64;
    for &radix in radices {
        bound_digits.push(rest % radix);
        rest /= radix;
    }
    bound_digits.push(rest);

    // Lexicographic comparison from the most significant position down. The non-top digits are
    // residues modulo their radix, read off the sorted outputs window-wise.
    let circuit = &mut sink.circuit;

    // Bottom-up accumulation: after handling a position, `ge` compares the digit suffix up to
    // and including it against the bound's suffix.
    let mut ge = BLit::True;

    for position in 0..=radices.len() {
        let outputs = &digit_outputs[position];
        let target = bound_digits[position];

        let count_ge = |k: u64| -> BLit {
            if k == 0 {
                BLit::True
            } else if (k as usize) <= outputs.len() {
                outputs[k as usize - 1]
            } else {
                BLit::False
            }
        };

        let (gt, eq) = if position == radices.len() {
            // Top position: the full count.
            let gt = count_ge(target + 1);
            let at_least = count_ge(target);
            let eq = circuit.and2(at_least, gt.negated());
            (gt, eq)
        } else {
            let radix = radices[position];
            let mut gt_terms = vec![];
            let mut eq_terms = vec![];
            let mut window = 0u64;
            while window * radix <= outputs.len() as u64 {
                let lo = window * radix;
                // residue > target: count in [lo + target + 1, lo + radix - 1]
                if target + 1 < radix {
                    let lower = count_ge(lo + target + 1);
                    let upper = count_ge(lo + radix).negated();
                    let term = circuit.and2(lower, upper);
                    gt_terms.push(term);
                }
                // residue == target: count in [lo + target, lo + target]
                let lower = count_ge(lo + target);
                let upper = count_ge(lo + target + 1).negated();
                let term = circuit.and2(lower, upper);
                eq_terms.push(term);
                window += 1;
            }
            let gt = circuit.or_many(&gt_terms);
            let eq = circuit.or_many(&eq_terms);
            (gt, eq)
        };

        let eq_and_rest = circuit.and2(eq, ge);
        ge = circuit.or2(gt, eq_and_rest);
    }

    ge
}
