//! Coin selection: choose a subset of coins covering a target amount with
//! minimal change.

use alloc::vec::Vec;

use rand_core::RngCore;

use crate::money::{Money, NativeAmount};
use crate::util::shuffle_slice;

/// Anything that can be reduced to a [`Money`] amount and compared/summed
/// as one, so the selector can operate generically over native or asset
/// candidates.
pub trait SelectorAmount: Copy {
    /// `true` if `self` is zero.
    fn is_zero(&self) -> bool;
    /// `self + other`.
    fn add(&self, other: &Self) -> Self;
    /// `self - other`; may go negative for native amounts.
    fn sub(&self, other: &Self) -> Self;
    /// Total order comparison.
    fn cmp(&self, other: &Self) -> core::cmp::Ordering;
}

impl SelectorAmount for NativeAmount {
    fn is_zero(&self) -> bool {
        self.0 == 0
    }
    fn add(&self, other: &Self) -> Self {
        *self + *other
    }
    fn sub(&self, other: &Self) -> Self {
        *self - *other
    }
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        Ord::cmp(&self.0, &other.0)
    }
}

impl SelectorAmount for u64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }
    fn add(&self, other: &Self) -> Self {
        self.saturating_add(*other)
    }
    fn sub(&self, other: &Self) -> Self {
        self.saturating_sub(*other)
    }
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        Ord::cmp(self, other)
    }
}

/// A pluggable coin-selection strategy, generic over the candidate and
/// amount representation so the same trait serves both native and asset
/// selection passes.
pub trait CoinSelectionAlgorithm<C, A: SelectorAmount> {
    /// Select a subset of `candidates` (by index) whose total amount,
    /// given by `amount_of`, meets or exceeds `target`. Returns `None` if
    /// no subset suffices.
    fn select<R: RngCore>(
        &self,
        candidates: &[C],
        amount_of: impl Fn(&C) -> A,
        target: A,
        rng: &mut R,
    ) -> Option<Vec<usize>>;
}

/// The default selector: exact match, then sweep-smaller, then
/// smallest-over, falling back to a 1000-round randomized search.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCoinSelector;

impl<C, A: SelectorAmount> CoinSelectionAlgorithm<C, A> for DefaultCoinSelector {
    fn select<R: RngCore>(
        &self,
        candidates: &[C],
        amount_of: impl Fn(&C) -> A,
        target: A,
        rng: &mut R,
    ) -> Option<Vec<usize>> {
        if target.is_zero() {
            return Some(Vec::new());
        }

        // Step 1: exact match on a single candidate.
        for (i, c) in candidates.iter().enumerate() {
            let amt = amount_of(c);
            if amt.cmp(&target) == core::cmp::Ordering::Equal {
                return Some(alloc::vec![i]);
            }
        }

        // Steps 3/4: sort ascending, sweep while below target.
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| amount_of(&candidates[a]).cmp(&amount_of(&candidates[b])));

        let mut acc: Option<A> = None;
        let mut taken: Vec<usize> = Vec::new();
        for &idx in &order {
            let amt = amount_of(&candidates[idx]);
            let running = match acc {
                Some(a) => a,
                None => amt.sub(&amt), // zero of the same kind
            };
            if running.cmp(&target) != core::cmp::Ordering::Less {
                break;
            }
            if amt.cmp(&target) == core::cmp::Ordering::Less {
                taken.push(idx);
                let sum = running.add(&amt);
                acc = Some(sum);
                match sum.cmp(&target) {
                    core::cmp::Ordering::Equal => return Some(taken),
                    // Overshot by accumulating: this is not the exact
                    // match step 3 requires, so stop sweeping and fall
                    // through to step 4/5 rather than returning a
                    // non-minimal prefix.
                    core::cmp::Ordering::Greater => break,
                    core::cmp::Ordering::Less => {}
                }
            } else if amt.cmp(&target) == core::cmp::Ordering::Greater {
                // Step 4: the running sum is still below target and this
                // candidate alone exceeds it.
                return Some(alloc::vec![idx]);
            } else {
                break;
            }
        }

        // Step 5: randomized 1000-round search.
        let mut shuffled: Vec<usize> = (0..candidates.len()).collect();
        let mut best: Option<(A, Vec<usize>)> = None;
        for _ in 0..1000 {
            shuffle_slice(&mut shuffled, rng);
            let mut running: Option<A> = None;
            let mut picked: Vec<usize> = Vec::new();
            for &idx in &shuffled {
                let amt = amount_of(&candidates[idx]);
                picked.push(idx);
                running = Some(match running {
                    Some(r) => r.add(&amt),
                    None => amt,
                });
                if let Some(sum) = running {
                    if sum.cmp(&target) != core::cmp::Ordering::Less {
                        break;
                    }
                }
            }
            let Some(sum) = running else { continue };
            if sum.cmp(&target) == core::cmp::Ordering::Less {
                // this shuffle's full sum still doesn't reach target
                continue;
            }
            if sum.cmp(&target) == core::cmp::Ordering::Equal {
                return Some(picked);
            }
            let better = match &best {
                None => true,
                Some((best_sum, _)) => sum.cmp(best_sum) == core::cmp::Ordering::Less,
            };
            if better {
                best = Some((sum, picked));
            }
        }
        best.map(|(_, picked)| picked)
    }
}

/// Run [`DefaultCoinSelector`] and map the result back to owned [`Money`]
/// amounts and indices, the shape the planner consumes.
pub fn select_default<C, A: SelectorAmount, R: RngCore>(
    candidates: &[C],
    amount_of: impl Fn(&C) -> A,
    target: A,
    rng: &mut R,
) -> Option<Vec<usize>> {
    DefaultCoinSelector.select(candidates, amount_of, target, rng)
}

/// The zero value used purely to satisfy [`Money`]'s display in error
/// paths; not used by the core algorithm above.
pub fn zero_of(money: &Money) -> Money {
    money.zero_like()
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn rng(seed: u8) -> StdRng {
        StdRng::from_seed([seed; 32])
    }

    #[test]
    fn exact_match_prefers_single_candidate() {
        let coins = [1u64, 2, 3];
        let mut r = rng(0);
        let sel = select_default(&coins, |c| *c, 2u64, &mut r).unwrap();
        assert_eq!(sel, alloc::vec![1]);
    }

    #[test]
    fn zero_target_selects_nothing() {
        let coins = [1u64, 2, 3];
        let mut r = rng(0);
        let sel = select_default(&coins, |c| *c, 0u64, &mut r).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn sweep_smaller_accumulates_ascending() {
        let coins = [1u64, 2, 3];
        let mut r = rng(0);
        let sel = select_default(&coins, |c| *c, 6u64, &mut r).unwrap();
        let mut vals: Vec<u64> = sel.iter().map(|&i| coins[i]).collect();
        vals.sort();
        assert_eq!(vals, alloc::vec![1, 2, 3]);
    }

    #[test]
    fn smallest_over_picks_single_candidate() {
        let coins = [5u64, 10];
        let mut r = rng(0);
        let sel = select_default(&coins, |c| *c, 7u64, &mut r).unwrap();
        assert_eq!(sel, alloc::vec![1]);
    }

    #[test]
    fn randomized_fallback_finds_minimum_overshoot() {
        let coins = [4u64, 4, 4, 4];
        let mut r = rng(1);
        let sel = select_default(&coins, |c| *c, 7u64, &mut r).unwrap();
        let sum: u64 = sel.iter().map(|&i| coins[i]).sum();
        assert_eq!(sum, 8);
    }

    #[test]
    fn sweep_overshoot_falls_through_to_randomized_search() {
        // Ascending sweep [2,2,2,5] overshoots to 11 before reaching the
        // target exactly; the exact combination [2,5] only turns up via
        // the randomized search, not the greedy sweep.
        let coins = [2u64, 2, 2, 5];
        let mut r = rng(1);
        let sel = select_default(&coins, |c| *c, 7u64, &mut r).unwrap();
        let sum: u64 = sel.iter().map(|&i| coins[i]).sum();
        assert_eq!(sum, 7);
    }

    #[test]
    fn insufficient_candidates_returns_none() {
        let coins = [1u64, 2];
        let mut r = rng(0);
        assert!(select_default(&coins, |c| *c, 100u64, &mut r).is_none());
    }

    #[test]
    fn determinism_same_seed_same_selection() {
        let coins = [4u64, 4, 4, 4];
        let mut r1 = rng(7);
        let mut r2 = rng(7);
        let sel1 = select_default(&coins, |c| *c, 9u64, &mut r1).unwrap();
        let sel2 = select_default(&coins, |c| *c, 9u64, &mut r2).unwrap();
        assert_eq!(sel1, sel2);
    }
}
