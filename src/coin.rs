//! The [`Coin`] family: immutable references to previously created outputs.

use alloc::vec::Vec;

use bitcoin::{Amount, OutPoint, ScriptBuf};

use crate::money::AssetId;

/// Stealth address material needed to recognize and later spend a stealth
/// output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthMeta {
    /// The ephemeral public key published alongside the payment.
    pub ephemeral_pubkey: bitcoin::secp256k1::PublicKey,
    /// Index of this payment within the sender's ephemeral output set.
    pub output_index: u32,
}

/// A bearer reference to a single prior output, plus the data needed to
/// reconstruct what it takes to spend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// The outpoint this coin references.
    pub outpoint: OutPoint,
    /// The native value carried by the referenced output.
    pub value: Amount,
    /// The referenced output's script.
    pub script_pubkey: ScriptBuf,
    /// Additional data distinguishing plain / script / stealth / colored /
    /// issuance coins.
    pub kind: CoinKind,
}

/// The variant-specific data of a [`Coin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinKind {
    /// An ordinary bearer coin with no redeem script.
    Plain,
    /// A coin whose output script is a hash of `redeem_script`.
    Script {
        /// The redeem (or witness) script matching the output's script hash.
        redeem_script: ScriptBuf,
    },
    /// A coin paid to a stealth address.
    Stealth(StealthMeta),
    /// A colored coin: a bearer coin carrying a quantity of one asset.
    Colored {
        /// Which asset, and how much of it.
        asset_id: AssetId,
        /// The quantity of `asset_id` carried by this coin.
        quantity: u64,
    },
    /// An issuance coin: authorizes creating new units of `asset_id`.
    Issuance {
        /// The asset id this coin is authorized to issue.
        asset_id: AssetId,
        /// An optional metadata URL describing the asset's definition.
        definition_url: Option<alloc::string::String>,
    },
}

impl Coin {
    /// Build a plain bearer coin.
    pub fn plain(outpoint: OutPoint, value: Amount, script_pubkey: ScriptBuf) -> Self {
        Coin {
            outpoint,
            value,
            script_pubkey,
            kind: CoinKind::Plain,
        }
    }

    /// Build a coin wrapped in a redeem script (P2SH/P2WSH).
    pub fn script(
        outpoint: OutPoint,
        value: Amount,
        script_pubkey: ScriptBuf,
        redeem_script: ScriptBuf,
    ) -> Self {
        Coin {
            outpoint,
            value,
            script_pubkey,
            kind: CoinKind::Script { redeem_script },
        }
    }

    /// Build a colored coin.
    pub fn colored(
        outpoint: OutPoint,
        value: Amount,
        script_pubkey: ScriptBuf,
        asset_id: AssetId,
        quantity: u64,
    ) -> Self {
        Coin {
            outpoint,
            value,
            script_pubkey,
            kind: CoinKind::Colored {
                asset_id,
                quantity,
            },
        }
    }

    /// Build an issuance coin.
    pub fn issuance(
        outpoint: OutPoint,
        value: Amount,
        script_pubkey: ScriptBuf,
        asset_id: AssetId,
        definition_url: Option<alloc::string::String>,
    ) -> Self {
        Coin {
            outpoint,
            value,
            script_pubkey,
            kind: CoinKind::Issuance {
                asset_id,
                definition_url,
            },
        }
    }

    /// The asset id carried by this coin, if it is colored or an issuance
    /// coin.
    pub fn asset_id(&self) -> Option<AssetId> {
        match &self.kind {
            CoinKind::Colored { asset_id, .. } | CoinKind::Issuance { asset_id, .. } => {
                Some(*asset_id)
            }
            _ => None,
        }
    }

    /// The asset quantity carried by this coin, if colored.
    pub fn asset_quantity(&self) -> Option<u64> {
        match &self.kind {
            CoinKind::Colored { quantity, .. } => Some(*quantity),
            _ => None,
        }
    }

    /// `true` if this is a colored or issuance coin.
    pub fn is_colored(&self) -> bool {
        matches!(self.kind, CoinKind::Colored { .. } | CoinKind::Issuance { .. })
    }

    /// `true` if this is specifically an issuance coin.
    pub fn is_issuance(&self) -> bool {
        matches!(self.kind, CoinKind::Issuance { .. })
    }
}

/// Filter `coins` down to colored coins carrying `asset_id`.
pub fn colored_coins_of<'a>(coins: &'a [Coin], asset_id: AssetId) -> Vec<&'a Coin> {
    coins
        .iter()
        .filter(|c| matches!(&c.kind, CoinKind::Colored { asset_id: a, .. } if *a == asset_id))
        .collect()
}

/// Filter `coins` down to uncolored (plain/script/stealth) coins.
pub fn plain_coins(coins: &[Coin]) -> Vec<&Coin> {
    coins
        .iter()
        .filter(|c| !c.is_colored())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn outpoint(i: u32) -> OutPoint {
        OutPoint::new(Txid::all_zeros(), i)
    }

    #[test]
    fn colored_coins_filters_by_asset() {
        let a1 = AssetId([1; 20]);
        let a2 = AssetId([2; 20]);
        let coins = alloc::vec![
            Coin::colored(outpoint(0), Amount::from_sat(600), ScriptBuf::new(), a1, 10),
            Coin::colored(outpoint(1), Amount::from_sat(600), ScriptBuf::new(), a2, 20),
            Coin::plain(outpoint(2), Amount::from_sat(1000), ScriptBuf::new()),
        ];
        let filtered = colored_coins_of(&coins, a1);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].asset_quantity(), Some(10));

        let plains = plain_coins(&coins);
        assert_eq!(plains.len(), 1);
    }
}
