//! Independent funding plans within a session.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use bitcoin::ScriptBuf;

use crate::coin::Coin;
use crate::intent::Intent;
use crate::money::{AssetId, NativeAmount};

/// An independent funding plan: its own coins, change scripts, and
/// intent lists. A session holds an ordered list of groups.
#[derive(Debug, Clone)]
pub struct BuilderGroup {
    /// A caller-chosen, human-readable name, used in error messages.
    pub name: String,
    /// Coins available to this group, keyed by outpoint for lookup.
    pub coins: Vec<Coin>,
    /// Native-currency intents, in the order they were queued. The first
    /// entry is always the implicit `SetChange` intent, prepended by the
    /// planner rather than the caller.
    pub native_intents: Vec<Intent>,
    /// Per-asset intents, keyed by asset id; each list's first entry is
    /// the implicit `SetColoredChange` intent for that asset.
    pub asset_intents: BTreeMap<AssetId, Vec<Intent>>,
    /// Issuance intents queued in this group.
    pub issuance_intents: Vec<Intent>,
    /// Change script used when change is native currency.
    pub uncolored_change_script: Option<ScriptBuf>,
    /// Change script used when change is a colored asset.
    pub colored_change_script: Option<ScriptBuf>,
    /// An upper bound on how much native value this group may select
    /// beyond what it strictly needs; `None` means uncapped.
    pub cover_only_cap: Option<NativeAmount>,
}

impl BuilderGroup {
    /// A new, empty group with the given name. Its native list starts
    /// with the implicit `SetChange` entry.
    pub fn new(name: impl Into<String>) -> Self {
        BuilderGroup {
            name: name.into(),
            coins: Vec::new(),
            native_intents: alloc::vec![Intent::SetChange],
            asset_intents: BTreeMap::new(),
            issuance_intents: Vec::new(),
            uncolored_change_script: None,
            colored_change_script: None,
            cover_only_cap: None,
        }
    }

    /// Queue an intent in the group's native list.
    pub fn push_native_intent(&mut self, intent: Intent) {
        self.native_intents.push(intent);
    }

    /// Queue an intent in the per-asset list for `asset_id`, prepending
    /// the implicit `SetColoredChange` entry the first time this asset
    /// id is seen.
    pub fn push_asset_intent(&mut self, asset_id: AssetId, intent: Intent) {
        let list = self
            .asset_intents
            .entry(asset_id)
            .or_insert_with(|| alloc::vec![Intent::SetColoredChange { asset_id }]);
        list.push(intent);
    }

    /// Queue an issuance intent.
    pub fn push_issuance_intent(&mut self, intent: Intent) {
        self.issuance_intents.push(intent);
    }

    /// `true` if any per-asset intent list has been started for any
    /// asset other than `except`.
    pub fn has_other_asset_intents(&self, except: AssetId) -> bool {
        self.asset_intents
            .keys()
            .any(|id| *id != except)
    }

    /// `true` if any asset intent has been queued at all.
    pub fn has_any_asset_intents(&self) -> bool {
        !self.asset_intents.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::money::Money;

    #[test]
    fn group_tracks_per_asset_lists_independently() {
        let mut g = BuilderGroup::new("g1");
        let a1 = AssetId([1; 20]);
        let a2 = AssetId([2; 20]);
        g.push_asset_intent(a1, Intent::SendFees { amount: Money::Native(NativeAmount::ZERO) });
        g.push_asset_intent(a2, Intent::SendFees { amount: Money::Native(NativeAmount::ZERO) });
        assert_eq!(g.asset_intents.len(), 2);
        assert!(g.has_other_asset_intents(a1));
        assert!(!g.has_other_asset_intents(a1) || g.asset_intents.contains_key(&a2));
    }
}
