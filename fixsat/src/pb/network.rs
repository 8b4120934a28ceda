//! Odd-even merge sorting networks.
//!
//! Networks are built over a three-valued literal type so that the constant padding used to
//! reach power-of-two sizes folds away during construction. The exact comparator counts are
//! memoized for the sizes the encoder actually builds; beyond 512 inputs the usual
//! `n (log n)^2` approximation stands in, matching the cost the base search optimizes.
use std::cell::RefCell;

use rustc_hash::FxHashMap;

/// Comparator count of an odd-even merge sort over `n` inputs.
pub fn odd_even_cost(n: u64) -> u64 {
    if n <= 512 {
        thread_local! {
            static MEMO: RefCell<FxHashMap<u64, u64>> = RefCell::new(FxHashMap::default());
        }
        MEMO.with(|memo| sort_cost(n, &mut memo.borrow_mut()))
    } else {
        let lg = 64 - n.leading_zeros() as u64;
        n * lg * lg
    }
}

fn sort_cost(n: u64, memo: &mut FxHashMap<u64, u64>) -> u64 {
    if n <= 1 {
        return 0;
    }
    if let Some(&cost) = memo.get(&n) {
        return cost;
    }
    let half = n / 2;
    let rest = n - half;
    let cost = sort_cost(half, memo) + sort_cost(rest, memo) + merge_cost(half, rest);
    memo.insert(n, cost);
    cost
}

/// Comparator count of Batcher's merge of two sorted sequences.
fn merge_cost(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    if a == 1 && b == 1 {
        return 1;
    }
    let odd_a = a - a / 2;
    let odd_b = b - b / 2;
    merge_cost(odd_a, odd_b) + merge_cost(a / 2, b / 2) + (a + b - 1) / 2
}

/// A comparator sink: the network calls this for every two-input comparator, receiving the
/// operand positions; the callee swaps the wire contents so the maximum ends up first.
pub trait ComparatorSink {
    fn compare(&mut self, wires: &mut [WireId], high: usize, low: usize);
}

pub type WireId = u32;

/// Emit an odd-even merge sort over `wires`, largest value first.
///
/// The input length is padded to a power of two internally; the sink sees only comparators
/// between real positions when the padding can be folded, which the encoder's constant folding
/// guarantees by representing padding as constant wires.
pub fn sort(wires: &mut Vec<WireId>, pad: WireId, sink: &mut impl ComparatorSink) {
    let n = wires.len();
    if n <= 1 {
        return;
    }

    let mut size = 1;
    while size < n {
        size *= 2;
    }
    wires.resize(size, pad);

    sort_range(wires, 0, size, sink);
    wires.truncate(n);
}

fn sort_range(wires: &mut Vec<WireId>, lo: usize, len: usize, sink: &mut impl ComparatorSink) {
    if len <= 1 {
        return;
    }
    let half = len / 2;
    sort_range(wires, lo, half, sink);
    sort_range(wires, lo + half, half, sink);
    merge_range(wires, lo, len, 1, sink);
}

/// Batcher's odd-even merge over a power-of-two range with the given stride.
fn merge_range(
    wires: &mut Vec<WireId>,
    lo: usize,
    len: usize,
    stride: usize,
    sink: &mut impl ComparatorSink,
) {
    let step = stride * 2;
    if step < len {
        merge_range(wires, lo, len, step, sink);
        merge_range(wires, lo + stride, len, step, sink);
        let mut index = lo + stride;
        while index + stride < lo + len {
            sink.compare(wires, index, index + stride);
            index += step;
        }
    } else {
        sink.compare(wires, lo, lo + stride);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        values: Vec<u32>,
    }

    impl ComparatorSink for Recorder {
        fn compare(&mut self, wires: &mut [WireId], high: usize, low: usize) {
            let a = self.values[wires[high] as usize];
            let b = self.values[wires[low] as usize];
            if a < b {
                let tmp = wires[high];
                wires[high] = wires[low];
                wires[low] = tmp;
            }
        }
    }

    #[test]
    fn sorts_all_small_permutations() {
        for n in 1..=8usize {
            for bits in 0..(1u32 << n) {
                let values: Vec<u32> = (0..n).map(|i| (bits >> i) & 1).collect();
                let mut recorder = Recorder {
                    values: {
                        let mut padded = values.clone();
                        padded.push(0); // the padding wire
                        padded
                    },
                };
                let mut wires: Vec<WireId> = (0..n as u32).collect();
                let pad = n as u32;
                sort(&mut wires, pad, &mut recorder);

                let mut sorted: Vec<u32> = values.clone();
                sorted.sort_unstable_by(|a, b| b.cmp(a));
                let result: Vec<u32> = wires
                    .iter()
                    .map(|&wire| recorder.values[wire as usize])
                    .collect();
                assert_eq!(result, sorted, "n={} bits={:b}", n, bits);
            }
        }
    }

    #[test]
    fn known_comparator_counts() {
        // Exact odd-even mergesort sizes for powers of two.
        assert_eq!(odd_even_cost(2), 1);
        assert_eq!(odd_even_cost(4), 5);
        assert_eq!(odd_even_cost(8), 19);
        assert_eq!(odd_even_cost(16), 63);
    }
}
