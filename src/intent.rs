//! Intents: data describing a requested send/issuance/fee directive,
//! dispatched through [`Intent::apply`] rather than represented as boxed
//! closures — see the design note on intents-as-data.

use alloc::string::{String, ToString};

use bitcoin::{Amount, FeeRate, ScriptBuf, TxOut};
use sha1::{Digest, Sha1};

use crate::context::{BuildContext, OpReturnOwner};
use crate::error::ConfigurationError;
use crate::group::BuilderGroup;
use crate::marker::{self, ColorMarker};
use crate::money::{AssetAmount, Money, NativeAmount};
use crate::size;

/// A write-only sink for metadata associated with protocol operations
/// (e.g. the human-readable reason behind an exchange operation).
pub trait MetadataRepository {
    /// Record `data`.
    fn add(&mut self, data: &str);
}

/// A [`MetadataRepository`] that discards everything written to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetadataRepository;

impl MetadataRepository for NullMetadataRepository {
    fn add(&mut self, _data: &str) {}
}

/// A stealth address' public material, sufficient to construct the
/// ephemeral payment output (opaque beyond what's needed here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthAddress {
    /// The scan public key published by the recipient.
    pub scan_pubkey: bitcoin::secp256k1::PublicKey,
    /// The spend public key published by the recipient.
    pub spend_pubkey: bitcoin::secp256k1::PublicKey,
}

/// A single queued build instruction. Applying an intent mutates the
/// in-progress transaction/marker and returns the amount it contributed
/// toward the funding target of its list.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Pay `amount` native currency to `script`, subject to dust
    /// rerouting.
    SendNative {
        /// Destination script.
        script: ScriptBuf,
        /// Amount to send.
        amount: NativeAmount,
    },
    /// Pay a quantity of one asset to `script`.
    SendAsset {
        /// Destination script.
        script: ScriptBuf,
        /// Which asset and how much.
        asset_amount: AssetAmount,
    },
    /// Like [`Intent::SendAsset`], but flags the new marker entry as
    /// exchange-bound and forces marker version 2 / opcode 0x01.
    SendAssetToExchange {
        /// Destination script.
        script: ScriptBuf,
        /// Which asset and how much.
        asset_amount: AssetAmount,
    },
    /// Perform an atomic two-leg exchange operation: two colored
    /// outputs, each exchange-flagged, with a SHA-1(reason) marker
    /// metadata digest and the reason written to the metadata
    /// repository.
    PerformExchangeOperation {
        /// First leg's destination script.
        script1: ScriptBuf,
        /// First leg's asset amount.
        amount1: AssetAmount,
        /// Second leg's destination script.
        script2: ScriptBuf,
        /// Second leg's asset amount.
        amount2: AssetAmount,
        /// Human-readable reason, hashed into the marker and written to
        /// the metadata repository verbatim.
        reason: String,
    },
    /// Issue new units of an asset, consuming a matching issuance coin
    /// from the group.
    IssueAsset {
        /// Destination script for the newly issued units.
        script: ScriptBuf,
        /// Which asset and how much.
        asset_amount: AssetAmount,
        /// An optional definition URL, recorded as marker metadata
        /// `"u=" || url`.
        definition_url: Option<String>,
    },
    /// Contribute a flat amount to the native target without producing
    /// an output.
    SendFees {
        /// The amount to contribute.
        amount: Money,
    },
    /// Build an unsigned transaction, estimate its size, and contribute
    /// `size * rate` to the native target.
    SendEstimatedFees {
        /// The fee rate to apply to the estimated size.
        rate: FeeRate,
    },
    /// Reserve the sole OP_RETURN slot for a stealth payment.
    StealthSend {
        /// The recipient's stealth address material.
        address: StealthAddress,
        /// Amount to send.
        amount: NativeAmount,
    },
    /// Implicit: add a native change output if `ctx.change_amount` is
    /// material. Always the first entry of every group's native list.
    SetChange,
    /// Implicit: add a colored change output (and record its quantity in
    /// the marker) if `ctx.asset_change_amount` is material. Always the
    /// first entry of every per-asset list.
    SetColoredChange {
        /// The asset this change belongs to.
        asset_id: crate::money::AssetId,
    },
    /// Implicit, inserted by the native pass: contribute the fees
    /// accumulated while funding colored outputs.
    AdditionalFees,
}

impl Intent {
    /// Apply this intent to `ctx`, using `group` for read-only
    /// configuration (change scripts) and `repo` as the metadata sink.
    /// Returns the [`Money`] amount this intent contributed to its
    /// list's funding target.
    pub fn apply(
        &self,
        ctx: &mut BuildContext,
        group: &BuilderGroup,
        repo: &mut dyn MetadataRepository,
    ) -> Result<Money, ConfigurationError> {
        match self {
            Intent::SendNative { script, amount } => {
                let routed = reroute_if_dust(ctx, script, *amount);
                if let Some(amount) = routed {
                    ctx.push_output(TxOut {
                        value: sat_amount(amount),
                        script_pubkey: script.clone(),
                    });
                    Ok(Money::Native(amount))
                } else {
                    Ok(Money::Native(*amount))
                }
            }
            Intent::SendAsset { script, asset_amount } => {
                push_colored_output(ctx, script, *asset_amount, false)?;
                Ok(Money::Asset(*asset_amount))
            }
            Intent::SendAssetToExchange { script, asset_amount } => {
                claim_op_return(ctx, OpReturnOwner::Colored, "send-asset-to-exchange")?;
                let marker = ctx.marker.get_or_insert_with(ColorMarker::new);
                marker.require_v2();
                match marker.opcode {
                    None | Some(marker::OPCODE_TRANSFER_TO_EXCHANGE) => {
                        marker.opcode = Some(marker::OPCODE_TRANSFER_TO_EXCHANGE);
                    }
                    Some(_) => return Err(ConfigurationError::ExchangeInProgress),
                }
                push_colored_output(ctx, script, *asset_amount, true)?;
                Ok(Money::Asset(*asset_amount))
            }
            Intent::PerformExchangeOperation {
                script1,
                amount1,
                script2,
                amount2,
                reason,
            } => {
                if group.has_any_asset_intents() {
                    return Err(ConfigurationError::ExchangeInProgress);
                }
                claim_op_return(ctx, OpReturnOwner::Colored, "perform-exchange-operation")?;
                let digest = Sha1::digest(reason.as_bytes());
                let marker = ctx.marker.get_or_insert_with(ColorMarker::new);
                marker.require_v2();
                marker.opcode = Some(marker::OPCODE_EXCHANGE_OPERATION);
                marker.metadata = digest.to_vec();
                push_colored_output(ctx, script1, *amount1, true)?;
                push_colored_output(ctx, script2, *amount2, true)?;
                repo.add(reason);
                ctx.exchange_operation_done = true;
                Ok(Money::Asset(AssetAmount::new(
                    amount1.asset_id,
                    amount1.quantity + if amount2.asset_id == amount1.asset_id {
                        amount2.quantity
                    } else {
                        0
                    },
                )))
            }
            Intent::IssueAsset {
                script,
                asset_amount,
                definition_url,
            } => {
                if ctx.issuance_done {
                    return Err(ConfigurationError::SecondIssuance);
                }
                let issuance_coin = group
                    .coins
                    .iter()
                    .find(|c| c.asset_id() == Some(asset_amount.asset_id) && c.is_issuance());
                if let Some(coin) = issuance_coin {
                    ctx.transaction.input.insert(
                        0,
                        bitcoin::TxIn {
                            previous_output: coin.outpoint,
                            script_sig: ScriptBuf::new(),
                            sequence: bitcoin::Sequence::MAX,
                            witness: bitcoin::Witness::new(),
                        },
                    );
                    ctx.consumed.insert(coin.outpoint);
                    ctx.additional_fees = ctx.additional_fees - NativeAmount::from_sat(coin.value.to_sat());
                }
                push_colored_output(ctx, script, *asset_amount, false)?;
                if let Some(url) = definition_url {
                    let marker = ctx.marker.get_or_insert_with(ColorMarker::new);
                    let mut meta = String::from("u=");
                    meta.push_str(url);
                    marker.metadata = meta.into_bytes();
                }
                ctx.issuance_done = true;
                Ok(Money::Asset(*asset_amount))
            }
            Intent::SendFees { amount } => Ok(*amount),
            Intent::SendEstimatedFees { rate } => {
                let coins: alloc::vec::Vec<Option<&crate::coin::Coin>> = ctx
                    .transaction
                    .input
                    .iter()
                    .map(|txin| group.coins.iter().find(|c| c.outpoint == txin.previous_output))
                    .collect();
                let size = size::estimate_size(&ctx.transaction, &coins);
                let fee = rate.fee_vb(size).unwrap_or(Amount::MAX);
                Ok(Money::Native(NativeAmount::from_sat(fee.to_sat())))
            }
            Intent::StealthSend { amount, .. } => {
                claim_op_return(ctx, OpReturnOwner::Stealth, "stealth-send")?;
                ctx.push_output(TxOut {
                    value: sat_amount(*amount),
                    script_pubkey: ScriptBuf::new(),
                });
                Ok(Money::Native(*amount))
            }
            Intent::SetChange => {
                if ctx.change_amount.0 > 0 {
                    let script = group
                        .uncolored_change_script
                        .clone()
                        .ok_or(ConfigurationError::MissingChangeScript)?;
                    ctx.push_output(TxOut {
                        value: sat_amount(ctx.change_amount),
                        script_pubkey: script,
                    });
                }
                Ok(Money::Native(NativeAmount::ZERO))
            }
            Intent::SetColoredChange { asset_id } => {
                if ctx.asset_change_amount > 0 {
                    let script = group
                        .colored_change_script
                        .clone()
                        .ok_or(ConfigurationError::MissingChangeScript)?;
                    let change = AssetAmount::new(*asset_id, ctx.asset_change_amount);
                    push_colored_output(ctx, &script, change, false)?;
                }
                Ok(Money::Native(NativeAmount::ZERO))
            }
            Intent::AdditionalFees => Ok(Money::Native(ctx.additional_fees)),
        }
    }
}

fn sat_amount(amount: NativeAmount) -> Amount {
    Amount::from_sat(amount.0.max(0) as u64)
}

fn reroute_if_dust(
    ctx: &mut BuildContext,
    script: &ScriptBuf,
    amount: NativeAmount,
) -> Option<NativeAmount> {
    if ctx.dust_prevention && size::is_dust(script, sat_amount(amount)) {
        ctx.additional_fees = ctx.additional_fees + amount;
        None
    } else {
        Some(amount)
    }
}

fn push_colored_output(
    ctx: &mut BuildContext,
    script: &ScriptBuf,
    asset_amount: AssetAmount,
    flag_exchange: bool,
) -> Result<(), ConfigurationError> {
    let dust_value = size::minimal_non_dust(script);
    ctx.push_output(TxOut {
        value: sat_amount(dust_value),
        script_pubkey: script.clone(),
    });
    ctx.additional_fees = ctx.additional_fees + dust_value;
    let marker = ctx.marker.get_or_insert_with(ColorMarker::new);
    let idx = marker.push_quantity(asset_amount.quantity);
    if flag_exchange {
        marker.flag_exchange(idx);
    }
    ctx.ensure_marker();
    claim_op_return(ctx, OpReturnOwner::Colored, "colored-output")?;
    Ok(())
}

fn claim_op_return(
    ctx: &mut BuildContext,
    owner: OpReturnOwner,
    requested_by: &'static str,
) -> Result<(), ConfigurationError> {
    match ctx.op_return_owner {
        OpReturnOwner::Unused => {
            ctx.op_return_owner = owner;
            Ok(())
        }
        current if current == owner => Ok(()),
        OpReturnOwner::Colored => Err(ConfigurationError::OpReturnOwnerConflict {
            owner: "colored",
            requested_by,
        }),
        OpReturnOwner::Stealth => Err(ConfigurationError::OpReturnOwnerConflict {
            owner: "stealth",
            requested_by,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coin::Coin;
    use crate::money::AssetId;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction;

    fn ctx() -> BuildContext {
        BuildContext::new(transaction::Version::TWO, LockTime::ZERO)
    }

    #[test]
    fn send_asset_to_exchange_rejects_conflicting_opcode() {
        let mut c = ctx();
        let group = BuilderGroup::new("g");
        let mut repo = NullMetadataRepository;
        let asset = AssetAmount::new(AssetId([1; 20]), 10);
        let i1 = Intent::SendAssetToExchange {
            script: ScriptBuf::new(),
            asset_amount: asset,
        };
        i1.apply(&mut c, &group, &mut repo).unwrap();
        c.marker.as_mut().unwrap().opcode = Some(marker::OPCODE_EXCHANGE_OPERATION);
        let i2 = Intent::SendAssetToExchange {
            script: ScriptBuf::new(),
            asset_amount: asset,
        };
        assert!(i2.apply(&mut c, &group, &mut repo).is_err());
    }

    #[test]
    fn perform_exchange_operation_hashes_reason() {
        let mut c = ctx();
        let group = BuilderGroup::new("g");
        let mut repo = NullMetadataRepository;
        let asset_a = AssetAmount::new(AssetId([1; 20]), 50);
        let asset_b = AssetAmount::new(AssetId([2; 20]), 75);
        let intent = Intent::PerformExchangeOperation {
            script1: ScriptBuf::new(),
            amount1: asset_a,
            script2: ScriptBuf::new(),
            amount2: asset_b,
            reason: "r".into(),
        };
        intent.apply(&mut c, &group, &mut repo).unwrap();
        let marker = c.marker.unwrap();
        assert_eq!(marker.opcode, Some(marker::OPCODE_EXCHANGE_OPERATION));
        assert_eq!(marker.metadata.len(), 20);
    }

    #[test]
    fn op_return_exclusivity_blocks_stealth_after_colored() {
        let mut c = ctx();
        let group = BuilderGroup::new("g");
        let mut repo = NullMetadataRepository;
        let asset = AssetAmount::new(AssetId([1; 20]), 10);
        Intent::SendAsset {
            script: ScriptBuf::new(),
            asset_amount: asset,
        }
        .apply(&mut c, &group, &mut repo)
        .unwrap();
        let stealth = Intent::StealthSend {
            address: StealthAddress {
                scan_pubkey: test_pubkey(),
                spend_pubkey: test_pubkey(),
            },
            amount: NativeAmount::from_sat(1000),
        };
        assert!(stealth.apply(&mut c, &group, &mut repo).is_err());
    }

    fn test_pubkey() -> bitcoin::secp256k1::PublicKey {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk)
    }
}
