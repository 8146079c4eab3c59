//! `colortx`
//!
//! A transaction builder for a Bitcoin-family ledger extended with a
//! colored-coin (asset issuance/transfer) overlay. See [`TransactionBuilder`]
//! for the caller-facing entry point.

#![warn(missing_docs)]
#![no_std]

extern crate alloc;

#[macro_use]
#[cfg(feature = "std")]
extern crate std;

mod builder;
mod coin;
mod context;
mod error;
mod group;
mod intent;
mod marker;
mod money;
mod planner;
mod selector;
mod signer;
mod size;
mod util;
mod verifier;

pub use builder::*;
pub use coin::*;
pub use context::{BuildContext, Memento};
pub use error::*;
pub use group::BuilderGroup;
pub use intent::{Intent, MetadataRepository, NullMetadataRepository, StealthAddress};
pub use marker::{ColorMarker, MARKER_TAG};
pub use money::*;
pub use selector::{CoinSelectionAlgorithm, DefaultCoinSelector};
pub use signer::{
    combine_signatures, find_key_for, sign_input, KeyFinder, NullKeyFinder, NullStealthUncover,
    SignedTx, StealthUncover,
};
pub use size::{estimate_fees, estimate_size, is_dust, minimal_non_dust, NATIVE_DUST};
pub use verifier::{verify, ExpectedFee, NullPolicy, Policy, Violation};

pub(crate) mod collections {
    #![allow(unused)]

    #[cfg(feature = "std")]
    pub use std::collections::*;

    #[cfg(not(feature = "std"))]
    pub type HashMap<K, V> = alloc::collections::BTreeMap<K, V>;
    pub use alloc::collections::*;
}
