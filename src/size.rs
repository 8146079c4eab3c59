//! Size and fee estimation, and the dust-threshold heuristic used by the
//! planner's change logic.

use bitcoin::{Amount, FeeRate, ScriptBuf, Transaction};

use crate::coin::{Coin, CoinKind};
use crate::money::NativeAmount;

/// The native dust threshold used by the planner's fixed point and the
/// verifier's fee-conservation margin.
pub const NATIVE_DUST: NativeAmount = NativeAmount::from_sat(546);

/// Per-outpoint overhead contributed by every input regardless of
/// script: 32-byte txid + 4-byte vout + 1-byte script length + 4-byte
/// sequence.
const INPUT_BASE_BYTES: u64 = 41;

/// A worst-case dummy ECDSA signature length (1-byte sighash type
/// included), used for dummy script-sig sizing.
const DUMMY_SIG_LEN: u64 = 72;
/// A dummy compressed pubkey length.
const DUMMY_PUBKEY_LEN: u64 = 33;

/// `true` if `value` sent to `script` would fall below the minimum
/// relayable ("dust") amount, using the same "3 witness-spend-sized
/// inputs per 4 inputs" heuristic as `Script::minimal_non_dust`.
pub fn is_dust(script: &ScriptBuf, value: Amount) -> bool {
    if script.is_op_return() {
        return false;
    }
    value < minimal_non_dust(script)
}

/// The minimum native value below which an output paying `script` would
/// not be relayed.
pub fn minimal_non_dust(script: &ScriptBuf) -> NativeAmount {
    // 8 (value) + 1 (script length) + script bytes, spent by a witness
    // input whose weight is conservatively estimated at 180 WU.
    let output_size = 8 + 1 + script.len() as u64;
    let spend_weight = output_size * 4 + 180;
    NativeAmount::from_sat(spend_weight * 3)
}

/// Estimate the number of script-sig bytes a dummy signature would need
/// for the given coin's spending template.
fn dummy_script_sig_len(coin: &Coin) -> u64 {
    match &coin.kind {
        CoinKind::Plain | CoinKind::Colored { .. } | CoinKind::Issuance { .. } => {
            1 + DUMMY_SIG_LEN + 1 + DUMMY_PUBKEY_LEN
        }
        CoinKind::Stealth(_) => 1 + DUMMY_SIG_LEN + 1 + DUMMY_PUBKEY_LEN,
        CoinKind::Script { redeem_script } => {
            let inner = estimate_multisig_sig_count(redeem_script) * (1 + DUMMY_SIG_LEN)
                + 1 // OP_0 bug byte for multisig, harmless overestimate otherwise
                + 1
                + redeem_script.len() as u64;
            inner
        }
    }
}

fn estimate_multisig_sig_count(redeem_script: &ScriptBuf) -> u64 {
    // crude n-of-m sniff: first opcode, if OP_1..OP_16, is `n`.
    redeem_script
        .as_bytes()
        .first()
        .map(|b| match b {
            0x51..=0x60 => (*b - 0x50) as u64,
            _ => 1,
        })
        .unwrap_or(1)
}

/// Estimate a transaction's total size in vbytes, given the coins its
/// inputs spend (in input order). Unknown coins fall back to the
/// referenced output's own script length as a worst-case heuristic.
pub fn estimate_size(tx: &Transaction, coins: &[Option<&Coin>]) -> u64 {
    let mut clone = tx.clone();
    for txin in &mut clone.input {
        txin.script_sig = ScriptBuf::new();
    }
    let base = clone.base_size() as u64;
    let extra: u64 = coins
        .iter()
        .map(|maybe_coin| match maybe_coin {
            Some(coin) => INPUT_BASE_BYTES + dummy_script_sig_len(coin),
            None => INPUT_BASE_BYTES,
        })
        .sum();
    base + extra
}

/// Multiply an estimated size by a fee rate.
pub fn estimate_fees(tx: &Transaction, coins: &[Option<&Coin>], rate: FeeRate) -> Amount {
    let vsize = estimate_size(tx, coins);
    rate.fee_vb(vsize).unwrap_or(Amount::MAX)
}
