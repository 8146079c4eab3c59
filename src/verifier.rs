//! Transaction verification: policy checks plus fee-conservation check
//! against an expected fee.
//!
//! Unlike the planner, a verifier error is never raised to abort
//! anything — see the module doc on [`Violation`]; only coin resolution
//! can fail outright (spec §4.7, §7: "policy violation ... returned as a
//! list from verify; not raised").

use alloc::string::String;
use alloc::vec::Vec;

use bitcoin::{OutPoint, Transaction};

use crate::coin::Coin;
use crate::error::NotFoundError;
use crate::money::NativeAmount;
use crate::size::NATIVE_DUST;

/// A pluggable policy check (miner relay policy, standard-ness policy,
/// ...): given a transaction and its spent coins, return zero or more
/// human-readable violations.
pub trait Policy {
    /// Inspect `tx`, whose inputs spend `spent` (in input order), and
    /// report any violations.
    fn check(&self, tx: &Transaction, spent: &[Coin]) -> Vec<String>;
}

/// A [`Policy`] that never objects; the default when a session has not
/// configured miner/standard policy objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPolicy;

impl Policy for NullPolicy {
    fn check(&self, _tx: &Transaction, _spent: &[Coin]) -> Vec<String> {
        Vec::new()
    }
}

/// One reason [`verify`] considers a transaction invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A miner-relay policy check failed.
    Miner(String),
    /// A standardness policy check failed.
    Standard(String),
    /// The actual fee fell outside `expected +/- margin`.
    FeeOutOfRange {
        /// The fee the caller expected.
        expected: NativeAmount,
        /// The fee actually paid (`inputs - outputs`).
        actual: NativeAmount,
        /// The tolerance applied around `expected`.
        margin: NativeAmount,
    },
}

/// What the caller expects the transaction's fee to be, for the
/// fee-conservation check.
#[derive(Debug, Clone, Copy)]
pub enum ExpectedFee {
    /// An exact amount.
    Exact(NativeAmount),
    /// A rate to be multiplied by the transaction's estimated size.
    Rate(bitcoin::FeeRate),
}

/// Verify `tx` against `miner_policy` and `standard_policy`, and, if
/// `expected_fee` is given, against fee conservation.
///
/// `find_coin` resolves each input's previous output; a miss is a hard
/// error (unlike a policy violation, the verifier cannot proceed without
/// knowing what was spent). `dust_prevention` widens the fee-conservation
/// margin to `2 * native dust`, matching the planner's own dust-rerouting
/// behavior so that an equally-valid, fee-pool-absorbing build does not
/// spuriously fail verification.
pub fn verify(
    tx: &Transaction,
    find_coin: impl Fn(&OutPoint) -> Option<Coin>,
    miner_policy: &dyn Policy,
    standard_policy: &dyn Policy,
    expected_fee: Option<ExpectedFee>,
    dust_prevention: bool,
) -> Result<Vec<Violation>, NotFoundError> {
    let mut spent = Vec::with_capacity(tx.input.len());
    for (input_index, txin) in tx.input.iter().enumerate() {
        let coin = find_coin(&txin.previous_output).ok_or(NotFoundError::Coin {
            outpoint: txin.previous_output,
            input_index,
        })?;
        spent.push(coin);
    }

    let mut violations = Vec::new();
    violations.extend(miner_policy.check(tx, &spent).into_iter().map(Violation::Miner));
    violations.extend(
        standard_policy
            .check(tx, &spent)
            .into_iter()
            .map(Violation::Standard),
    );

    if let Some(expected_fee) = expected_fee {
        let input_total: u64 = spent.iter().map(|c| c.value.to_sat()).sum();
        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        let actual = NativeAmount::from_sat(input_total) - NativeAmount::from_sat(output_total);

        let expected = match expected_fee {
            ExpectedFee::Exact(amount) => amount,
            ExpectedFee::Rate(rate) => {
                let coins: Vec<Option<&Coin>> = spent.iter().map(Some).collect();
                let size = crate::size::estimate_size(tx, &coins);
                NativeAmount::from_sat(rate.fee_vb(size).unwrap_or(bitcoin::Amount::MAX).to_sat())
            }
        };

        let margin = if dust_prevention {
            NATIVE_DUST + NATIVE_DUST
        } else {
            NativeAmount::ZERO
        };

        if (actual - expected).abs().0 > margin.0 {
            violations.push(Violation::FeeOutOfRange {
                expected,
                actual,
                margin,
            });
        }
    }

    Ok(violations)
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::{transaction, Amount, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness};

    fn outpoint(i: u32) -> OutPoint {
        OutPoint::new(Txid::all_zeros(), i)
    }

    fn tx_spending(input_value: u64, output_value: u64) -> (Transaction, Coin) {
        let coin = Coin::plain(outpoint(0), Amount::from_sat(input_value), ScriptBuf::new());
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: alloc::vec![TxIn {
                previous_output: coin.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: alloc::vec![TxOut {
                value: Amount::from_sat(output_value),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        (tx, coin)
    }

    #[test]
    fn no_violations_when_fee_matches_exactly() {
        let (tx, coin) = tx_spending(1000, 900);
        let result = verify(
            &tx,
            |op| (*op == coin.outpoint).then(|| coin.clone()),
            &NullPolicy,
            &NullPolicy,
            Some(ExpectedFee::Exact(NativeAmount::from_sat(100))),
            false,
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn fee_mismatch_beyond_margin_is_a_violation() {
        let (tx, coin) = tx_spending(1000, 900);
        let result = verify(
            &tx,
            |op| (*op == coin.outpoint).then(|| coin.clone()),
            &NullPolicy,
            &NullPolicy,
            Some(ExpectedFee::Exact(NativeAmount::from_sat(50))),
            false,
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert!(matches!(result[0], Violation::FeeOutOfRange { .. }));
    }

    #[test]
    fn dust_prevention_widens_margin() {
        let (tx, coin) = tx_spending(1000, 900);
        // off by one dust threshold; fails with margin=0, passes with
        // margin = 2 * dust.
        let off = NativeAmount::from_sat(100) + NATIVE_DUST;
        let strict = verify(
            &tx,
            |op| (*op == coin.outpoint).then(|| coin.clone()),
            &NullPolicy,
            &NullPolicy,
            Some(ExpectedFee::Exact(off)),
            false,
        )
        .unwrap();
        assert_eq!(strict.len(), 1);

        let lenient = verify(
            &tx,
            |op| (*op == coin.outpoint).then(|| coin.clone()),
            &NullPolicy,
            &NullPolicy,
            Some(ExpectedFee::Exact(off)),
            true,
        )
        .unwrap();
        assert!(lenient.is_empty());
    }

    #[test]
    fn missing_coin_is_an_error() {
        let (tx, _coin) = tx_spending(1000, 900);
        let result = verify(&tx, |_| None, &NullPolicy, &NullPolicy, None, false);
        assert!(result.is_err());
    }

    #[test]
    fn policy_violations_are_collected_not_raised() {
        struct Rejecting;
        impl Policy for Rejecting {
            fn check(&self, _tx: &Transaction, _spent: &[Coin]) -> Vec<String> {
                alloc::vec!["always rejects".into()]
            }
        }
        let (tx, coin) = tx_spending(1000, 900);
        let result = verify(
            &tx,
            |op| (*op == coin.outpoint).then(|| coin.clone()),
            &Rejecting,
            &NullPolicy,
            None,
            false,
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert!(matches!(result[0], Violation::Miner(_)));
    }
}
