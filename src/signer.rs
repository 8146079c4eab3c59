//! Per-template signing and signature combination.
//!
//! Dispatch is purely by output-script template (pay-to-pubkey,
//! pay-to-pubkey-hash, bare or wrapped multisig) rather than by a
//! descriptor/`Plan`: this crate signs legacy scriptSigs directly with
//! `secp256k1`, the way an older, pre-descriptor signer in this lineage
//! would have.

use alloc::vec::Vec;

use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG};
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::ecdsa::Signature as EcdsaSignature;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, All, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{PrivateKey, PublicKey, ScriptBuf, Transaction};

use crate::coin::{Coin, CoinKind, StealthMeta};
use crate::error::{NotFoundError, SigningError};

/// Derives the private key that spends a stealth coin, given the
/// ephemeral payment material carried by [`StealthMeta`].
///
/// Stealth-address cryptography (scanning, ECDH uncovering) is an
/// external concern the same way address parsing is (spec §1
/// Non-goals); this trait is the seam a caller plugs a real
/// implementation into. The key it returns joins the "context-additional
/// keys" tier of the lookup precedence in spec §4.6, behind the
/// builder's own key set and ahead of the [`KeyFinder`] fallback.
pub trait StealthUncover {
    /// Derive the spend key for `meta`, if the session holds a matching
    /// scan/spend key pair.
    fn uncover(&self, meta: &StealthMeta) -> Option<PrivateKey>;
}

/// A [`StealthUncover`] that never uncovers anything; the default when a
/// session has no stealth key material configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStealthUncover;

impl StealthUncover for NullStealthUncover {
    fn uncover(&self, _meta: &StealthMeta) -> Option<PrivateKey> {
        None
    }
}

/// A caller-supplied fallback for locating the private key that spends a
/// given script (direct pubkey, its hash, or a P2SH wrapper of either).
pub trait KeyFinder {
    /// Find the private key matching `script_pubkey`, if known.
    fn find_key(&self, script_pubkey: &ScriptBuf) -> Option<PrivateKey>;
}

/// A [`KeyFinder`] that never finds anything; the default when a
/// session has no external key source configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullKeyFinder;

impl KeyFinder for NullKeyFinder {
    fn find_key(&self, _script_pubkey: &ScriptBuf) -> Option<PrivateKey> {
        None
    }
}

/// The recognized output-script templates this signer can satisfy.
enum Template {
    P2pk(PublicKey),
    /// The actual pubkey is not recoverable from a P2PKH script alone;
    /// it is derived from whatever key the lookup returns for this
    /// script.
    P2pkh,
    Multisig {
        required: u8,
        pubkeys: Vec<PublicKey>,
    },
    P2sh {
        redeem_script: ScriptBuf,
    },
}

fn classify(coin: &Coin) -> Result<Template, SigningError> {
    if let CoinKind::Script { redeem_script } = &coin.kind {
        return Ok(Template::P2sh {
            redeem_script: redeem_script.clone(),
        });
    }
    let script = &coin.script_pubkey;
    if script.is_p2pkh() {
        return Ok(Template::P2pkh);
    }
    if let Some((required, pubkeys)) = parse_bare_multisig(script) {
        return Ok(Template::Multisig { required, pubkeys });
    }
    if let Some(pubkey) = parse_p2pk(script) {
        return Ok(Template::P2pk(pubkey));
    }
    Err(SigningError::UnknownTemplate)
}

fn parse_p2pk(script: &ScriptBuf) -> Option<PublicKey> {
    let mut ins = script.instructions();
    let push = match ins.next()? {
        Ok(Instruction::PushBytes(b)) => b,
        _ => return None,
    };
    match ins.next()? {
        Ok(Instruction::Op(op)) if op == OP_CHECKSIG => {}
        _ => return None,
    }
    if ins.next().is_some() {
        return None;
    }
    PublicKey::from_slice(push.as_bytes()).ok()
}

fn parse_bare_multisig(script: &ScriptBuf) -> Option<(u8, Vec<PublicKey>)> {
    let mut ins = script.instructions();
    let required = match ins.next()? {
        Ok(Instruction::Op(op)) => small_int(op)?,
        _ => return None,
    };
    let mut pubkeys = Vec::new();
    let total;
    loop {
        match ins.next()? {
            Ok(Instruction::PushBytes(b)) => {
                pubkeys.push(PublicKey::from_slice(b.as_bytes()).ok()?);
            }
            Ok(Instruction::Op(op)) => {
                total = small_int(op)?;
                break;
            }
            Err(_) => return None,
        }
    }
    match ins.next()? {
        Ok(Instruction::Op(op)) if op == OP_CHECKMULTISIG => {}
        _ => return None,
    }
    if ins.next().is_some() || total as usize != pubkeys.len() {
        return None;
    }
    Some((required, pubkeys))
}

fn small_int(op: bitcoin::blockdata::opcodes::Opcode) -> Option<u8> {
    let b = op.to_u8();
    match b {
        0x51..=0x60 => Some(b - 0x50),
        _ => None,
    }
}

/// Look up the key to spend `script_pubkey`: first among `keys` (the
/// builder's own key set), matching the script directly, its hash, or
/// P2SH wraps of either.
pub fn find_key_for(
    script_pubkey: &ScriptBuf,
    keys: &[PrivateKey],
    secp: &Secp256k1<All>,
    fallback: &dyn KeyFinder,
) -> Option<PrivateKey> {
    for key in keys {
        let pubkey = key.public_key(secp);
        if matches_script(script_pubkey, &pubkey) {
            return Some(*key);
        }
    }
    fallback.find_key(script_pubkey)
}

fn matches_script(script_pubkey: &ScriptBuf, pubkey: &PublicKey) -> bool {
    let p2pk = Builder::new()
        .push_key(pubkey)
        .push_opcode(OP_CHECKSIG)
        .into_script();
    if &p2pk == script_pubkey {
        return true;
    }
    let p2pkh = ScriptBuf::new_p2pkh(&pubkey.pubkey_hash());
    &p2pkh == script_pubkey
}

/// Sign input `input_index` of `tx`, spending `coin`, using legacy
/// (non-segwit) sighashing and scriptSig construction.
pub fn sign_input(
    tx: &mut Transaction,
    input_index: usize,
    coin: &Coin,
    keys: &[PrivateKey],
    secp: &Secp256k1<All>,
    fallback: &dyn KeyFinder,
) -> Result<(), SigningError> {
    let script_sig = build_script_sig(tx, input_index, coin, keys, secp, fallback)?;
    tx.input[input_index].script_sig = script_sig;
    Ok(())
}

fn build_script_sig(
    tx: &Transaction,
    input_index: usize,
    coin: &Coin,
    keys: &[PrivateKey],
    secp: &Secp256k1<All>,
    fallback: &dyn KeyFinder,
) -> Result<ScriptBuf, SigningError> {
    match classify(coin)? {
        Template::P2pk(pubkey) => {
            let key = find_key_for(&coin.script_pubkey, keys, secp, fallback)
                .filter(|k| k.public_key(secp) == pubkey)
                .ok_or(SigningError::NotFound(NotFoundError::Key))?;
            let sig = ecdsa_sign(tx, input_index, &coin.script_pubkey, &key, secp);
            Ok(Builder::new().push_slice(sig.serialize()).into_script())
        }
        Template::P2pkh => {
            let key = find_key_for(&coin.script_pubkey, keys, secp, fallback)
                .ok_or(SigningError::NotFound(NotFoundError::Key))?;
            let pubkey = key.public_key(secp);
            let sig = ecdsa_sign(tx, input_index, &coin.script_pubkey, &key, secp);
            Ok(Builder::new()
                .push_slice(sig.serialize())
                .push_key(&pubkey)
                .into_script())
        }
        Template::Multisig { required, pubkeys } => {
            let sigs = sign_multisig(tx, input_index, &coin.script_pubkey, &pubkeys, required, keys, secp, fallback);
            Ok(encode_multisig_script_sig(&sigs))
        }
        Template::P2sh { redeem_script } => {
            let inner = build_p2sh_inner(tx, input_index, &redeem_script, keys, secp, fallback)?;
            let mut builder = Builder::new();
            for ins in inner.instructions() {
                builder = append_instruction(builder, ins);
            }
            builder = builder.push_slice(
                bitcoin::script::PushBytesBuf::try_from(redeem_script.to_bytes())
                    .unwrap_or_default(),
            );
            Ok(builder.into_script())
        }
    }
}

fn build_p2sh_inner(
    tx: &Transaction,
    input_index: usize,
    redeem_script: &ScriptBuf,
    keys: &[PrivateKey],
    secp: &Secp256k1<All>,
    fallback: &dyn KeyFinder,
) -> Result<ScriptBuf, SigningError> {
    if let Some(pubkey) = parse_p2pk(redeem_script) {
        let key = find_key_for(redeem_script, keys, secp, fallback)
            .filter(|k| k.public_key(secp) == pubkey)
            .ok_or(SigningError::NotFound(NotFoundError::Key))?;
        let sig = ecdsa_sign(tx, input_index, redeem_script, &key, secp);
        return Ok(Builder::new().push_slice(sig.serialize()).into_script());
    }
    if let Some((required, pubkeys)) = parse_bare_multisig(redeem_script) {
        let sigs = sign_multisig(tx, input_index, redeem_script, &pubkeys, required, keys, secp, fallback);
        return Ok(encode_multisig_script_sig(&sigs));
    }
    Err(SigningError::MalformedScript)
}

fn append_instruction<'a>(builder: Builder, ins: Result<Instruction<'a>, bitcoin::script::Error>) -> Builder {
    match ins {
        Ok(Instruction::PushBytes(b)) => builder.push_slice(b),
        Ok(Instruction::Op(op)) => builder.push_opcode(op),
        Err(_) => builder,
    }
}

fn sign_multisig(
    tx: &Transaction,
    input_index: usize,
    script_code: &ScriptBuf,
    pubkeys: &[PublicKey],
    required: u8,
    keys: &[PrivateKey],
    secp: &Secp256k1<All>,
    fallback: &dyn KeyFinder,
) -> Vec<EcdsaSignature> {
    let mut sigs = Vec::new();
    for pubkey in pubkeys {
        if sigs.len() >= required as usize {
            break;
        }
        let found = keys
            .iter()
            .find(|k| k.public_key(secp) == *pubkey)
            .copied()
            .or_else(|| {
                fallback
                    .find_key(script_code)
                    .filter(|k| k.public_key(secp) == *pubkey)
            });
        if let Some(key) = found {
            sigs.push(ecdsa_sign(tx, input_index, script_code, &key, secp));
        }
    }
    sigs
}

fn encode_multisig_script_sig(sigs: &[EcdsaSignature]) -> ScriptBuf {
    let mut builder = Builder::new().push_opcode(bitcoin::blockdata::opcodes::OP_0);
    for sig in sigs {
        builder = builder.push_slice(sig.serialize());
    }
    builder.into_script()
}

fn ecdsa_sign(
    tx: &Transaction,
    input_index: usize,
    script_code: &ScriptBuf,
    key: &PrivateKey,
    secp: &Secp256k1<All>,
) -> EcdsaSignature {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .legacy_signature_hash(input_index, script_code, EcdsaSighashType::All.to_u32())
        .unwrap_or_else(|_| bitcoin::sighash::LegacySighash::all_zeros());
    let msg = secp256k1::Message::from_digest(sighash.to_byte_array());
    let sig = secp.sign_ecdsa(&msg, &key.inner);
    EcdsaSignature {
        signature: sig,
        sighash_type: EcdsaSighashType::All,
    }
}

/// A signed copy of a transaction, as produced independently by
/// cooperating signers before being merged by [`combine_signatures`].
#[derive(Debug, Clone)]
pub struct SignedTx(pub Transaction);

/// Fold `a` and `b`'s per-input scriptSigs into one transaction. Where a
/// coin is not supplied for an input, the output script is deduced from
/// either side's existing scriptSig (P2PKH from the embedded pubkey's
/// hash, P2SH from the embedded redeem script's hash).
pub fn combine_signatures(
    a: &SignedTx,
    b: &SignedTx,
    coins: &[Option<&Coin>],
    secp: &Secp256k1<All>,
) -> SignedTx {
    let mut out = a.0.clone();
    for (i, txin) in out.input.iter_mut().enumerate() {
        let other = match b.0.input.get(i) {
            Some(o) => o,
            None => continue,
        };
        if txin.script_sig.is_empty() {
            txin.script_sig = other.script_sig.clone();
            continue;
        }
        if other.script_sig.is_empty() {
            continue;
        }
        let script_pubkey = coins
            .get(i)
            .and_then(|c| *c)
            .map(|c| c.script_pubkey.clone());
        if let Some(merged) = merge_script_sigs(
            &a.0,
            i,
            &txin.script_sig,
            &other.script_sig,
            script_pubkey.as_ref(),
            secp,
        ) {
            txin.script_sig = merged;
        }
    }
    SignedTx(out)
}

/// A multisig scriptSig's signature pushes plus, for a P2SH wrapper, the
/// trailing redeem-script push. The redeem script is distinguished from a
/// signature push by attempting to parse it as one first: a push that
/// doesn't decode as an ECDSA signature is the redeem script.
fn parse_multisig_script_sig(script: &ScriptBuf) -> Option<(Vec<EcdsaSignature>, Option<ScriptBuf>)> {
    let mut ins = script.instructions();
    match ins.next()? {
        Ok(Instruction::PushBytes(b)) if b.as_bytes().is_empty() => {}
        Ok(Instruction::Op(op)) if op.to_u8() == 0x00 => {}
        _ => return None,
    }
    let mut pushes: Vec<Vec<u8>> = Vec::new();
    for item in ins {
        match item {
            Ok(Instruction::PushBytes(b)) => pushes.push(b.as_bytes().to_vec()),
            _ => return None,
        }
    }
    if pushes.is_empty() {
        return None;
    }
    let mut redeem = None;
    let mut sig_pushes = &pushes[..];
    if let Some(last) = pushes.last() {
        if EcdsaSignature::from_slice(last).is_err() {
            redeem = Some(ScriptBuf::from_bytes(last.clone()));
            sig_pushes = &pushes[..pushes.len() - 1];
        }
    }
    let sigs = sig_pushes
        .iter()
        .map(|b| EcdsaSignature::from_slice(b))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    Some((sigs, redeem))
}

/// Merge two multisig scriptSigs for the same input into one carrying the
/// union of their signatures, ordered to match `OP_CHECKMULTISIG`'s
/// expectation (signatures in the same order as the pubkeys they satisfy).
/// Falls back to `a` unchanged when the scriptSigs are identical or don't
/// parse as a recognized multisig template (non-multisig templates carry
/// exactly one signer's worth of data, so two non-empty sides are already
/// the same signature modulo nothing to merge).
fn merge_script_sigs(
    tx: &Transaction,
    input_index: usize,
    a: &ScriptBuf,
    b: &ScriptBuf,
    script_pubkey: Option<&ScriptBuf>,
    secp: &Secp256k1<All>,
) -> Option<ScriptBuf> {
    if a == b {
        return Some(a.clone());
    }
    let (sigs_a, redeem_a) = parse_multisig_script_sig(a)?;
    let (sigs_b, redeem_b) = parse_multisig_script_sig(b)?;
    let redeem_script = redeem_a.or(redeem_b);
    let script_code = redeem_script.clone().or_else(|| script_pubkey.cloned())?;
    let (_, pubkeys) = parse_bare_multisig(&script_code)?;

    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .legacy_signature_hash(input_index, &script_code, EcdsaSighashType::All.to_u32())
        .ok()?;
    let msg = secp256k1::Message::from_digest(sighash.to_byte_array());

    let mut candidates: Vec<EcdsaSignature> = Vec::new();
    for sig in sigs_a.into_iter().chain(sigs_b.into_iter()) {
        if !candidates.iter().any(|s| s.serialize() == sig.serialize()) {
            candidates.push(sig);
        }
    }

    let mut ordered = Vec::new();
    for pubkey in &pubkeys {
        if let Some(sig) = candidates
            .iter()
            .find(|s| secp.verify_ecdsa(&msg, &s.signature, &pubkey.inner).is_ok())
        {
            ordered.push(sig.clone());
        }
    }
    if ordered.is_empty() {
        return None;
    }

    let mut builder = Builder::new().push_opcode(bitcoin::blockdata::opcodes::OP_0);
    for sig in &ordered {
        builder = builder.push_slice(sig.serialize());
    }
    if let Some(redeem_script) = redeem_script {
        builder = builder.push_slice(
            bitcoin::script::PushBytesBuf::try_from(redeem_script.to_bytes()).ok()?,
        );
    }
    Some(builder.into_script())
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::{transaction, Amount, OutPoint, Sequence, TxIn, TxOut, Txid, Witness};

    fn secp() -> Secp256k1<All> {
        Secp256k1::new()
    }

    fn key(byte: u8) -> PrivateKey {
        PrivateKey::new(
            secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap(),
            bitcoin::Network::Bitcoin,
        )
    }

    fn base_tx() -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: alloc::vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: alloc::vec![TxOut {
                value: Amount::from_sat(900),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn signs_p2pk_input() {
        let secp = secp();
        let k = key(1);
        let pubkey = k.public_key(&secp);
        let script = Builder::new().push_key(&pubkey).push_opcode(OP_CHECKSIG).into_script();
        let coin = Coin::plain(OutPoint::new(Txid::all_zeros(), 0), Amount::from_sat(1000), script);
        let mut tx = base_tx();
        sign_input(&mut tx, 0, &coin, &[k], &secp, &NullKeyFinder).unwrap();
        assert!(!tx.input[0].script_sig.is_empty());
    }

    #[test]
    fn signs_p2sh_multisig_input() {
        let secp = secp();
        let k1 = key(1);
        let k2 = key(2);
        let pk1 = k1.public_key(&secp);
        let pk2 = k2.public_key(&secp);
        let redeem = Builder::new()
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_PUSHNUM_2)
            .push_key(&pk1)
            .push_key(&pk2)
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_PUSHNUM_2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
        let coin = Coin::script(
            OutPoint::new(Txid::all_zeros(), 0),
            Amount::from_sat(1000),
            script_pubkey,
            redeem,
        );
        let mut tx = base_tx();
        sign_input(&mut tx, 0, &coin, &[k1, k2], &secp, &NullKeyFinder).unwrap();
        assert!(!tx.input[0].script_sig.is_empty());
    }

    #[test]
    fn combine_signatures_merges_two_cooperating_signers() {
        let secp = secp();
        let k1 = key(1);
        let k2 = key(2);
        let k3 = key(3);
        let pk1 = k1.public_key(&secp);
        let pk2 = k2.public_key(&secp);
        let pk3 = k3.public_key(&secp);
        let redeem = Builder::new()
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_PUSHNUM_2)
            .push_key(&pk1)
            .push_key(&pk2)
            .push_key(&pk3)
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_PUSHNUM_3)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
        let coin = Coin::script(
            OutPoint::new(Txid::all_zeros(), 0),
            Amount::from_sat(1000),
            script_pubkey,
            redeem,
        );

        // Two cooperating signers, each holding only one of the two keys
        // needed to satisfy the 2-of-3 redeem script.
        let mut tx_a = base_tx();
        sign_input(&mut tx_a, 0, &coin, &[k1], &secp, &NullKeyFinder).unwrap();
        let mut tx_b = base_tx();
        sign_input(&mut tx_b, 0, &coin, &[k2], &secp, &NullKeyFinder).unwrap();

        let coins = [Some(&coin)];
        let merged_ab =
            combine_signatures(&SignedTx(tx_a.clone()), &SignedTx(tx_b.clone()), &coins, &secp);
        let merged_ba =
            combine_signatures(&SignedTx(tx_b.clone()), &SignedTx(tx_a.clone()), &coins, &secp);

        let (sigs, redeem_script) =
            parse_multisig_script_sig(&merged_ab.0.input[0].script_sig).unwrap();
        assert_eq!(sigs.len(), 2);
        assert!(redeem_script.is_some());
        // Commutative: order depends on the pubkey list, not argument order.
        assert_eq!(
            merged_ab.0.input[0].script_sig,
            merged_ba.0.input[0].script_sig
        );
    }
}
