//! The build planner: per-group, per-asset, and native funding passes,
//! and the fixed point that resolves change and dust.

use alloc::string::ToString;
use alloc::vec::Vec;

use rand_core::RngCore;

use crate::coin::{colored_coins_of, plain_coins, Coin};
use crate::context::{BuildContext, ChangeKind};
use crate::error::{BuildError, ConfigurationError, InsufficientFundsError};
use crate::group::BuilderGroup;
use crate::intent::{Intent, MetadataRepository};
use crate::money::{AssetAmount, AssetId, Money, NativeAmount};
use crate::selector::select_default;
use crate::size::NATIVE_DUST;

/// A cap on fixed-point re-entries; the loop stabilizes in at most two
/// passes in practice (one discovering non-zero change, one with the
/// change output placed), but this guards against runaway re-entry.
const MAX_FIXED_POINT_PASSES: usize = 8;

/// Run every group's funding passes against `ctx`, mutating it in place.
pub fn plan_groups<R: RngCore>(
    ctx: &mut BuildContext,
    groups: &[BuilderGroup],
    repo: &mut dyn MetadataRepository,
    rng: &mut R,
) -> Result<(), BuildError> {
    for group in groups {
        plan_group(ctx, group, repo, rng)?;
    }
    Ok(())
}

fn plan_group<R: RngCore>(
    ctx: &mut BuildContext,
    group: &BuilderGroup,
    repo: &mut dyn MetadataRepository,
    rng: &mut R,
) -> Result<(), BuildError> {
    ctx.additional_fees = NativeAmount::ZERO;

    for intent in &group.issuance_intents {
        intent.apply(ctx, group, repo)?;
    }

    for (asset_id, intents) in &group.asset_intents {
        let candidates: Vec<Coin> = colored_coins_of(&group.coins, *asset_id)
            .into_iter()
            .cloned()
            .collect();
        let consumed = plan_asset_fixed_point(ctx, group, *asset_id, intents, &candidates, repo, rng)?;
        // The bearer native value of selected colored coins becomes a
        // native cost to be recovered by the uncolored pass.
        let bearer_value: u64 = consumed.iter().map(|c| c.value.to_sat()).sum();
        ctx.additional_fees = ctx.additional_fees - NativeAmount::from_sat(bearer_value);
    }

    // Native pass: fund additional fees plus every queued native intent.
    let plain: Vec<Coin> = plain_coins(&group.coins).into_iter().cloned().collect();
    let mut native_intents = group.native_intents.clone();
    native_intents.push(Intent::AdditionalFees);

    plan_native_fixed_point(ctx, group, &native_intents, &plain, repo, rng)?;

    Ok(())
}

/// The native-currency funding fixed point (spec section 4.3).
fn plan_native_fixed_point<R: RngCore>(
    ctx: &mut BuildContext,
    group: &BuilderGroup,
    intents: &[Intent],
    candidates: &[Coin],
    repo: &mut dyn MetadataRepository,
    rng: &mut R,
) -> Result<Vec<Coin>, BuildError> {
    ctx.change_kind = ChangeKind::Uncolored;
    ctx.dust = NATIVE_DUST;
    ctx.cover_only = group.cover_only_cap;

    for _ in 0..MAX_FIXED_POINT_PASSES {
        let snapshot = ctx.memento();

        let mut contributions = NativeAmount::ZERO;
        for intent in intents {
            let contributed = intent.apply(ctx, group, repo)?;
            contributions = contributions + as_native(contributed);
        }
        // The change output already added this pass (if any) is folded
        // into the target so the fixed point converges once the
        // selection exactly covers "what we send" plus "what we return
        // to ourselves": see the design note on the funding fixed point.
        let target = match ctx.cover_only {
            Some(cap) => cap + ctx.change_amount,
            None => contributions + ctx.change_amount,
        };

        let unconsumed: Vec<&Coin> = candidates
            .iter()
            .filter(|c| !ctx.consumed.contains(&c.outpoint))
            .collect();

        let Some(selection) = select_default(
            &unconsumed,
            |c: &&Coin| NativeAmount::from_sat(c.value.to_sat()),
            target,
            rng,
        ) else {
            let total: NativeAmount = unconsumed
                .iter()
                .map(|c| NativeAmount::from_sat(c.value.to_sat()))
                .sum();
            return Err(InsufficientFundsError {
                group: group.name.to_string(),
                missing: Money::Native(target - total),
            }
            .into());
        };

        let total: NativeAmount = selection
            .iter()
            .map(|&idx| NativeAmount::from_sat(unconsumed[idx].value.to_sat()))
            .sum();

        if total.0 < target.0 {
            return Err(InsufficientFundsError {
                group: group.name.to_string(),
                missing: Money::Native(target - total),
            }
            .into());
        }

        let change = total - target;

        if change.0 > ctx.dust.0 {
            ctx.restore(snapshot);
            if group.uncolored_change_script.is_none() {
                return Err(ConfigurationError::MissingChangeScript.into());
            }
            ctx.change_amount = change;
            continue;
        }

        ctx.change_amount = NativeAmount::ZERO;

        let mut consumed = Vec::with_capacity(selection.len());
        for &idx in &selection {
            let coin = unconsumed[idx];
            ctx.ensure_input_for(coin.outpoint);
            consumed.push(coin.clone());
        }
        ctx.finish_marker();
        return Ok(consumed);
    }
    Err(InsufficientFundsError {
        group: group.name.to_string(),
        missing: Money::Native(NativeAmount::ZERO),
    }
    .into())
}

/// The per-asset funding fixed point. Unlike native currency, any
/// positive leftover asset quantity is material (there is no dust
/// concept for an abstract asset unit), so any non-zero change forces a
/// re-plan with a colored change output.
fn plan_asset_fixed_point<R: RngCore>(
    ctx: &mut BuildContext,
    group: &BuilderGroup,
    asset_id: AssetId,
    intents: &[Intent],
    candidates: &[Coin],
    repo: &mut dyn MetadataRepository,
    rng: &mut R,
) -> Result<Vec<Coin>, BuildError> {
    ctx.change_kind = ChangeKind::Colored;
    ctx.cover_only = None;

    for _ in 0..MAX_FIXED_POINT_PASSES {
        let snapshot = ctx.memento();

        let mut contributions: u64 = 0;
        for intent in intents {
            let contributed = intent.apply(ctx, group, repo)?;
            contributions = contributions.saturating_add(as_quantity(contributed));
        }
        let target = contributions.saturating_add(ctx.asset_change_amount);

        let unconsumed: Vec<&Coin> = candidates
            .iter()
            .filter(|c| !ctx.consumed.contains(&c.outpoint))
            .collect();

        let Some(selection) = select_default(
            &unconsumed,
            |c: &&Coin| c.asset_quantity().unwrap_or(0),
            target,
            rng,
        ) else {
            let total: u64 = unconsumed.iter().filter_map(|c| c.asset_quantity()).sum();
            return Err(InsufficientFundsError {
                group: group.name.to_string(),
                missing: Money::Asset(AssetAmount::new(asset_id, target.saturating_sub(total))),
            }
            .into());
        };

        let total: u64 = selection
            .iter()
            .map(|&idx| unconsumed[idx].asset_quantity().unwrap_or(0))
            .sum();

        if total < target {
            return Err(InsufficientFundsError {
                group: group.name.to_string(),
                missing: Money::Asset(AssetAmount::new(asset_id, target - total)),
            }
            .into());
        }

        let change = total - target;

        if change > 0 {
            ctx.restore(snapshot);
            if group.colored_change_script.is_none() {
                return Err(ConfigurationError::MissingChangeScript.into());
            }
            ctx.asset_change_amount = change;
            continue;
        }

        ctx.asset_change_amount = 0;

        let mut consumed = Vec::with_capacity(selection.len());
        for &idx in &selection {
            let coin = unconsumed[idx];
            ctx.ensure_input_for(coin.outpoint);
            consumed.push(coin.clone());
        }
        return Ok(consumed);
    }
    Err(InsufficientFundsError {
        group: group.name.to_string(),
        missing: Money::Asset(AssetAmount::new(asset_id, 0)),
    }
    .into())
}

fn as_native(money: Money) -> NativeAmount {
    match money {
        Money::Native(n) => n,
        Money::Asset(_) => NativeAmount::ZERO,
    }
}

fn as_quantity(money: Money) -> u64 {
    match money {
        Money::Asset(a) => a.quantity,
        Money::Native(_) => 0,
    }
}
