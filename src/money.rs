//! Native and asset money types, and the [`MoneyBag`] multiset.

use alloc::vec::Vec;
use core::fmt;

use bitcoin::hashes::{hash160, Hash};
use bitcoin::ScriptBuf;

/// A signed native-currency amount, in satoshi.
///
/// Signed so that selector/planner arithmetic (`target - accumulated`,
/// change computation) can go negative transiently without the caller
/// having to juggle a separate "deficit" type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeAmount(pub i64);

impl NativeAmount {
    /// The zero amount.
    pub const ZERO: NativeAmount = NativeAmount(0);

    /// Build from an unsigned `u64` satoshi count.
    pub const fn from_sat(sat: u64) -> Self {
        NativeAmount(sat as i64)
    }

    /// Absolute value, saturating at `i64::MAX`.
    pub fn abs(self) -> NativeAmount {
        NativeAmount(self.0.unsigned_abs().min(i64::MAX as u64) as i64)
    }

    /// `true` if this amount is zero or negative.
    pub fn is_non_positive(self) -> bool {
        self.0 <= 0
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

impl core::ops::Add for NativeAmount {
    type Output = NativeAmount;
    fn add(self, rhs: Self) -> Self::Output {
        NativeAmount(self.0 + rhs.0)
    }
}

impl core::ops::Sub for NativeAmount {
    type Output = NativeAmount;
    fn sub(self, rhs: Self) -> Self::Output {
        NativeAmount(self.0 - rhs.0)
    }
}

impl core::iter::Sum for NativeAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(NativeAmount::ZERO, |a, b| a + b)
    }
}

/// The 20-byte identity of an asset, derived as `Hash160` of the issuing
/// output's script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(pub [u8; 20]);

impl AssetId {
    /// Derive an asset id from the script that authorized its issuance.
    pub fn from_issuer_script(script: &ScriptBuf) -> Self {
        let hash = hash160::Hash::hash(script.as_bytes());
        AssetId(*hash.as_ref())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// An unsigned quantity of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetAmount {
    /// Which asset.
    pub asset_id: AssetId,
    /// How many units.
    pub quantity: u64,
}

impl AssetAmount {
    /// Build a new asset amount.
    pub fn new(asset_id: AssetId, quantity: u64) -> Self {
        AssetAmount { asset_id, quantity }
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.quantity, self.asset_id)
    }
}

/// Either a native or an asset amount; the common currency of selector
/// targets and planner accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Money {
    /// Native satoshi.
    Native(NativeAmount),
    /// A quantity of one asset.
    Asset(AssetAmount),
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Money::Native(n) => write!(f, "{n}"),
            Money::Asset(a) => write!(f, "{a}"),
        }
    }
}

impl Money {
    /// The zero value of the same kind as `self`.
    pub fn zero_like(&self) -> Money {
        match self {
            Money::Native(_) => Money::Native(NativeAmount::ZERO),
            Money::Asset(a) => Money::Asset(AssetAmount::new(a.asset_id, 0)),
        }
    }
}

/// A multiset of [`Money`] values.
///
/// Sending a bag is equivalent to sending each of its components
/// separately: factories that accept a `MoneyBag` expand it into one
/// intent per component rather than recursing on the bag as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoneyBag(pub Vec<Money>);

impl MoneyBag {
    /// An empty bag.
    pub fn new() -> Self {
        MoneyBag(Vec::new())
    }

    /// Add a component.
    pub fn push(&mut self, money: Money) {
        self.0.push(money);
    }

    /// Iterate the bag's components.
    pub fn iter(&self) -> core::slice::Iter<'_, Money> {
        self.0.iter()
    }
}

impl FromIterator<Money> for MoneyBag {
    fn from_iter<T: IntoIterator<Item = Money>>(iter: T) -> Self {
        MoneyBag(iter.into_iter().collect())
    }
}

impl IntoIterator for MoneyBag {
    type Item = Money;
    type IntoIter = alloc::vec::IntoIter<Money>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn native_amount_arithmetic() {
        let a = NativeAmount::from_sat(100);
        let b = NativeAmount::from_sat(40);
        assert_eq!(a - b, NativeAmount::from_sat(60));
        assert_eq!(a + b, NativeAmount::from_sat(140));
        assert!(NativeAmount::ZERO.is_non_positive());
    }

    #[test]
    fn asset_id_derivation_is_deterministic() {
        let script = ScriptBuf::from_bytes(alloc::vec![0x51, 0x21, 0x02]);
        let a = AssetId::from_issuer_script(&script);
        let b = AssetId::from_issuer_script(&script);
        assert_eq!(a, b);
    }

    #[test]
    fn money_bag_expands_components() {
        let id = AssetId([7; 20]);
        let bag: MoneyBag = [
            Money::Native(NativeAmount::from_sat(10)),
            Money::Asset(AssetAmount::new(id, 5)),
        ]
        .into_iter()
        .collect();
        let components: Vec<_> = bag.into_iter().collect();
        assert_eq!(components.len(), 2);
    }
}
