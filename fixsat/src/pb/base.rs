//! Mixed radix base search for the sorting network encoding.
//!
//! A base is a sequence of digit radices. Decomposing the constraint weights over a good base
//! shrinks the sorting networks dramatically; the search explores products of prime digits up to
//! the largest weight and scores each candidate with one of several cost models.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use crate::pb::network;

/// How a candidate base is scored.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CostModel {
    /// Total number of digit inputs over all weights.
    SumOfDigits,
    /// Number of carry wires between digit positions.
    Carries,
    /// Digit inputs plus carries, a proxy for comparator count.
    Comparators,
    /// Estimated size of the odd-even merge networks.
    OddEvenSize,
    /// Odd-even size relative to the single-digit base, probing for genuine improvements.
    Relative,
}

/// A weight with its multiplicity in the constraint.
#[derive(Copy, Clone, Debug)]
pub struct WeightCount {
    pub weight: u64,
    pub count: u64,
}

/// Result of a base search.
#[derive(Clone, Debug, Default)]
pub struct FoundBase {
    /// Digit radices, least significant first. Empty means a single unary digit.
    pub base: Vec<u64>,
    pub cost: u64,
    pub bases_evaluated: u64,
}

/// The number of digit inputs each weight contributes under a base.
pub fn sum_of_digits(weights: &[WeightCount], base: &[u64]) -> u64 {
    let mut total = 0;
    for entry in weights {
        let mut rest = entry.weight;
        for &radix in base {
            total += (rest % radix) * entry.count;
            rest /= radix;
        }
        total += rest * entry.count;
    }
    total
}

/// The number of carry wires produced between digit positions under a base.
pub fn carry_count(weights: &[WeightCount], base: &[u64]) -> u64 {
    let mut total = 0;
    let mut carry = 0;
    let mut factor = 1;
    for &radix in base {
        let mut digit_inputs = carry;
        for entry in weights {
            digit_inputs += ((entry.weight / factor) % radix) * entry.count;
        }
        carry = digit_inputs / radix;
        total += carry;
        factor *= radix;
    }
    total
}

/// Inputs per digit position including carries, most significant position last.
pub fn digit_inputs(weights: &[WeightCount], base: &[u64]) -> Vec<u64> {
    let mut inputs = vec![];
    let mut carry = 0;
    let mut factor = 1;
    for &radix in base {
        let mut digit = carry;
        for entry in weights {
            digit += ((entry.weight / factor) % radix) * entry.count;
        }
        carry = digit / radix;
        inputs.push(digit);
        factor = factor.saturating_mul(radix);
    }
    let mut top = carry;
    for entry in weights {
        top += (entry.weight / factor) * entry.count;
    }
    inputs.push(top);
    inputs
}

/// Score a base under a cost model.
pub fn evaluate(weights: &[WeightCount], base: &[u64], model: CostModel) -> u64 {
    match model {
        CostModel::SumOfDigits => sum_of_digits(weights, base),
        CostModel::Carries => carry_count(weights, base),
        CostModel::Comparators => sum_of_digits(weights, base) + carry_count(weights, base),
        CostModel::OddEvenSize => digit_inputs(weights, base)
            .iter()
            .map(|&inputs| network::odd_even_cost(inputs))
            .sum(),
        CostModel::Relative => {
            let absolute = evaluate(weights, base, CostModel::OddEvenSize);
            let unary = evaluate(weights, &[], CostModel::OddEvenSize).max(1);
            // Scaled ratio so that integral comparison stays meaningful.
            absolute * 1024 / unary
        }
    }
}

/// Primes up to the given limit, by sieve.
pub fn primes_up_to(limit: u64) -> Vec<u64> {
    let limit = limit.max(2) as usize;
    let mut composite = vec![false; limit + 1];
    let mut primes = vec![];
    for candidate in 2..=limit {
        if !composite[candidate] {
            primes.push(candidate as u64);
            let mut multiple = candidate * candidate;
            while multiple <= limit {
                composite[multiple] = true;
                multiple += candidate;
            }
        }
    }
    primes
}

/// Best-first branch and bound over prime digit extensions.
///
/// States with the same running base product describe the same decomposition up to digit order,
/// so only the first of them is expanded. Optionally, adjacent digits of the best base are
/// merged into composite digits when that lowers the cost.
pub fn find_base(weights: &[WeightCount], model: CostModel, allow_composite: bool) -> FoundBase {
    let max_weight = weights.iter().map(|entry| entry.weight).max().unwrap_or(1);
    let primes = primes_up_to(max_weight.min(1009));

    let mut best = FoundBase {
        base: vec![],
        cost: evaluate(weights, &[], model),
        bases_evaluated: 1,
    };

    let mut heap: BinaryHeap<(Reverse<u64>, Vec<u64>, u64)> = BinaryHeap::new();
    heap.push((Reverse(best.cost), vec![], 1));

    let mut seen: FxHashSet<u64> = FxHashSet::default();
    seen.insert(1);

    while let Some((Reverse(cost), base, product)) = heap.pop() {
        if cost > best.cost {
            // Best-first order: nothing cheaper is left.
            break;
        }

        for &prime in primes.iter() {
            let new_product = match product.checked_mul(prime) {
                Some(product) if product <= max_weight => product,
                _ => continue,
            };
            if !seen.insert(new_product) {
                continue;
            }

            let mut new_base = base.clone();
            new_base.push(prime);
            let new_cost = evaluate(weights, &new_base, model);
            best.bases_evaluated += 1;

            if new_cost < best.cost {
                best.cost = new_cost;
                best.base = new_base.clone();
            }

            heap.push((Reverse(new_cost), new_base, new_product));
        }
    }

    if allow_composite {
        compress_base(weights, model, &mut best);
    }

    best
}

/// Depth-first variant with iterative deepening, kept for small weight sets where the heap
/// overhead dominates.
pub fn find_base_dfs(weights: &[WeightCount], model: CostModel, max_depth: usize) -> FoundBase {
    let max_weight = weights.iter().map(|entry| entry.weight).max().unwrap_or(1);
    let primes = primes_up_to(max_weight.min(1009));

    let mut best = FoundBase {
        base: vec![],
        cost: evaluate(weights, &[], model),
        bases_evaluated: 1,
    };

    for depth in 1..=max_depth {
        let mut base = vec![];
        dfs(weights, model, &primes, max_weight, depth, 1, &mut base, &mut best);
    }

    best
}

fn dfs(
    weights: &[WeightCount],
    model: CostModel,
    primes: &[u64],
    max_weight: u64,
    depth_left: usize,
    product: u64,
    base: &mut Vec<u64>,
    best: &mut FoundBase,
) {
    if depth_left == 0 {
        return;
    }

    for &prime in primes {
        let new_product = match product.checked_mul(prime) {
            Some(new_product) if new_product <= max_weight => new_product,
            _ => continue,
        };

        base.push(prime);
        let cost = evaluate(weights, base, model);
        best.bases_evaluated += 1;
        if cost < best.cost {
            best.cost = cost;
            best.base = base.clone();
        }
        dfs(
            weights,
            model,
            primes,
            max_weight,
            depth_left - 1,
            new_product,
            base,
            best,
        );
        base.pop();
    }
}

/// Merge adjacent digits into composite radices while that improves the cost.
fn compress_base(weights: &[WeightCount], model: CostModel, best: &mut FoundBase) {
    loop {
        let mut improved = false;

        for position in 0..best.base.len().saturating_sub(1) {
            let mut candidate = best.base.clone();
            let merged = candidate[position] * candidate[position + 1];
            candidate[position] = merged;
            candidate.remove(position + 1);

            let cost = evaluate(weights, &candidate, model);
            best.bases_evaluated += 1;
            if cost < best.cost {
                best.cost = cost;
                best.base = candidate;
                improved = true;
                break;
            }
        }

        if !improved {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(values: &[(u64, u64)]) -> Vec<WeightCount> {
        values
            .iter()
            .map(|&(weight, count)| WeightCount { weight, count })
            .collect()
    }

    #[test]
    fn unary_weights_need_no_base() {
        let ws = weights(&[(1, 20)]);
        let found = find_base(&ws, CostModel::Comparators, false);
        assert!(found.base.is_empty());
    }

    #[test]
    fn powers_of_two_find_binary_digits() {
        let ws = weights(&[(8, 3), (4, 3), (2, 3), (1, 3)]);
        let found = find_base(&ws, CostModel::SumOfDigits, false);
        assert_eq!(found.base, vec![2, 2, 2]);
        assert_eq!(found.cost, sum_of_digits(&ws, &[2, 2, 2]));
    }

    #[test]
    fn digit_inputs_track_carries() {
        let ws = weights(&[(6, 2), (1, 3)]);
        // base [2, 3]: 6 = 0 + 2*3, digits (0,0,1); 1 = digit (1,0,0).
        let inputs = digit_inputs(&ws, &[2, 3]);
        assert_eq!(inputs[0], 3);
        // carry of 3 ones into position one: 3/2 = 1 carry.
        assert_eq!(inputs[1], 1);
        assert_eq!(inputs[2], 2 + 0);
    }

    #[test]
    fn searches_beat_the_unary_base() {
        let ws = weights(&[(12, 2), (9, 1), (3, 4), (1, 2)]);
        let unary = evaluate(&ws, &[], CostModel::SumOfDigits);

        let best_first = find_base(&ws, CostModel::SumOfDigits, false);
        let depth_first = find_base_dfs(&ws, CostModel::SumOfDigits, 6);

        // The depth limited search is exhaustive here, so it is at least as good as the pruned
        // best-first search, and both improve on no base at all.
        assert!(depth_first.cost <= best_first.cost);
        assert!(best_first.cost < unary);
        assert_eq!(depth_first.cost, evaluate(&ws, &depth_first.base, CostModel::SumOfDigits));
    }
}
