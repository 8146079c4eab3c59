//! Mutable per-build state threaded through intent application and the
//! funding fixed point.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use bitcoin::{OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::marker::ColorMarker;
use crate::money::NativeAmount;

/// Which money kind the current fixed-point pass is funding; determines
/// which change script and dust threshold apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The pass is funding native currency.
    Uncolored,
    /// The pass is funding a colored asset.
    Colored,
}

/// The single nullable slot tracking which subsystem owns the
/// transaction's one `OP_RETURN` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpReturnOwner {
    /// No subsystem has claimed the slot yet.
    #[default]
    Unused,
    /// The color marker owns the slot.
    Colored,
    /// A stealth send owns the slot.
    Stealth,
}

/// A cheap snapshot of build state, used to roll back a funding pass that
/// turns out to need a change output.
#[derive(Debug, Clone)]
pub struct Memento {
    marker: Option<ColorMarker>,
    transaction: Transaction,
    additional_fees: NativeAmount,
}

/// Mutable state threaded through a single group's funding passes.
///
/// Coins are referenced elsewhere (by the group/session); the context
/// owns only the transaction under construction and the bookkeeping
/// needed to reach a fixed point.
pub struct BuildContext {
    /// The transaction under construction.
    pub transaction: Transaction,
    /// Outpoints already consumed by some prior selection.
    pub consumed: BTreeSet<OutPoint>,
    /// Native value still owed to fees beyond what selected inputs cover
    /// (e.g. the bearer cost of colored outputs).
    pub additional_fees: NativeAmount,
    /// The color marker, once any colored intent has run.
    pub marker: Option<ColorMarker>,
    /// The change amount computed by the current fixed-point pass.
    pub change_amount: NativeAmount,
    /// The asset change quantity computed by the current per-asset pass.
    pub asset_change_amount: u64,
    /// The minimum relayable native value for the pass's change kind.
    pub dust: NativeAmount,
    /// An upper bound on how much may be selected this pass, beyond
    /// `change_amount`; `None` means uncapped.
    pub cover_only: Option<NativeAmount>,
    /// Which kind of change the current pass is producing.
    pub change_kind: ChangeKind,
    /// Whether a non-final sequence number has already been applied
    /// because a locktime is set.
    pub non_final_sequence_set: bool,
    /// `true` if a locktime has been requested for this build.
    pub locktime_set: bool,
    /// Which subsystem currently owns the sole OP_RETURN output.
    pub op_return_owner: OpReturnOwner,
    /// `true` once an issuance intent has run.
    pub issuance_done: bool,
    /// `true` once an exchange-operation intent has run in the current
    /// group.
    pub exchange_operation_done: bool,
    /// Messages written to the external metadata repository so far (test
    /// and introspection aid; production callers supply their own sink
    /// via the builder and this mirrors what was sent to it).
    pub metadata_writes: Vec<String>,
    /// `true` if a send below a script's dust threshold should be
    /// silently rerouted to the fee pool rather than emitted as an
    /// unrelayable output (spec §4.3 "Dust policy"). Defaults to `true`.
    pub dust_prevention: bool,
}

impl BuildContext {
    /// A fresh context for one build.
    pub fn new(version: bitcoin::transaction::Version, lock_time: bitcoin::absolute::LockTime) -> Self {
        BuildContext {
            transaction: Transaction {
                version,
                lock_time,
                input: Vec::new(),
                output: Vec::new(),
            },
            consumed: BTreeSet::new(),
            additional_fees: NativeAmount::ZERO,
            marker: None,
            change_amount: NativeAmount::ZERO,
            asset_change_amount: 0,
            dust: NativeAmount::from_sat(546),
            cover_only: None,
            change_kind: ChangeKind::Uncolored,
            non_final_sequence_set: false,
            locktime_set: lock_time != bitcoin::absolute::LockTime::ZERO,
            op_return_owner: OpReturnOwner::Unused,
            issuance_done: false,
            exchange_operation_done: false,
            metadata_writes: Vec::new(),
            dust_prevention: true,
        }
    }

    /// Snapshot the rollback-relevant state.
    pub fn memento(&self) -> Memento {
        Memento {
            marker: self.marker.clone(),
            transaction: self.transaction.clone(),
            additional_fees: self.additional_fees,
        }
    }

    /// Restore state captured by [`BuildContext::memento`].
    pub fn restore(&mut self, snapshot: Memento) {
        self.marker = snapshot.marker;
        self.transaction = snapshot.transaction;
        self.additional_fees = snapshot.additional_fees;
    }

    /// Mark `outpoint` as consumed and append a matching input if one is
    /// not already present.
    pub fn ensure_input_for(&mut self, outpoint: OutPoint) {
        self.consumed.insert(outpoint);
        if self
            .transaction
            .input
            .iter()
            .any(|i| i.previous_output == outpoint)
        {
            return;
        }
        let mut txin = TxIn {
            previous_output: outpoint,
            script_sig: Default::default(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        if self.locktime_set && !self.non_final_sequence_set {
            txin.sequence = Sequence::ZERO;
            self.non_final_sequence_set = true;
        }
        self.transaction.input.push(txin);
    }

    /// Append an output, returning its index.
    pub fn push_output(&mut self, txout: TxOut) -> usize {
        self.transaction.output.push(txout);
        self.transaction.output.len() - 1
    }

    /// Locate the marker output by pattern match (never by remembered
    /// index, since outputs may have been reordered by the caller between
    /// builds).
    pub fn marker_output_index(&self) -> Option<usize> {
        self.transaction
            .output
            .iter()
            .position(|o| ColorMarker::matches(&o.script_pubkey))
    }

    /// Ensure a marker exists, inserting a fresh `OP_RETURN` placeholder
    /// output if none is present yet. Returns the marker output's index.
    pub fn ensure_marker(&mut self) -> usize {
        if self.marker.is_none() {
            self.marker = Some(ColorMarker::new());
        }
        match self.marker_output_index() {
            Some(i) => i,
            None => {
                let txout = self
                    .marker
                    .as_ref()
                    .map(ColorMarker::to_txout)
                    .unwrap_or_default();
                self.push_output(txout)
            }
        }
    }

    /// Rewrite the marker output in place with the current marker's final
    /// encoding; a no-op if no marker was ever created.
    pub fn finish_marker(&mut self) {
        let Some(marker) = &self.marker else {
            return;
        };
        let txout = marker.to_txout();
        if let Some(idx) = self.marker_output_index() {
            self.transaction.output[idx] = txout;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::{transaction, Txid};

    fn ctx() -> BuildContext {
        BuildContext::new(transaction::Version::TWO, LockTime::ZERO)
    }

    #[test]
    fn memento_round_trips() {
        let mut c = ctx();
        c.additional_fees = NativeAmount::from_sat(10);
        let snap = c.memento();
        c.additional_fees = NativeAmount::from_sat(999);
        c.restore(snap);
        assert_eq!(c.additional_fees, NativeAmount::from_sat(10));
    }

    #[test]
    fn ensure_input_is_idempotent() {
        let mut c = ctx();
        let op = OutPoint::new(Txid::all_zeros(), 0);
        c.ensure_input_for(op);
        c.ensure_input_for(op);
        assert_eq!(c.transaction.input.len(), 1);
    }

    #[test]
    fn marker_located_by_pattern_after_reorder() {
        let mut c = ctx();
        c.push_output(TxOut {
            value: bitcoin::Amount::from_sat(1000),
            script_pubkey: Default::default(),
        });
        let idx = c.ensure_marker();
        assert_eq!(idx, 1);
        // simulate reordering
        c.transaction.output.swap(0, 1);
        assert_eq!(c.marker_output_index(), Some(0));
    }
}
