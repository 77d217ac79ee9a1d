//! Asset custody operations shared by parent and child vaults.

use crossvault_protocol::assets::AssetBook;
use crossvault_protocol::config::LOCAL_EXECUTION_BUDGET;
use crossvault_protocol::cpit::CpitTracker;
use crossvault_protocol::integrations::{
    Accountant, ExecutionError, ExecutionMeter, ExecutorKind, Integrations, Payout,
    RedemptionError, Redeemer, Trade, VaultValue,
};
use crossvault_protocol::registry::Registry;
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::AssetId;
use tracing::{debug, info};

use crate::error::VaultError;

/// Values a vault's local book under the local execution budget.
pub fn local_value(
    book: &AssetBook,
    registry: &Registry,
    integrations: &Integrations,
) -> Result<VaultValue, VaultError> {
    let mut meter = ExecutionMeter::new(LOCAL_EXECUTION_BUDGET);
    Ok(Accountant::vault_value(book, registry, integrations, &mut meter)?)
}

fn redeemer_for<'a>(
    registry: &Registry,
    integrations: &'a Integrations,
    asset: AssetId,
) -> Result<&'a dyn Redeemer, RedemptionError> {
    registry
        .redeemer(&asset)
        .and_then(|kind| integrations.redeemer(kind))
        .map(|r| r.as_ref())
        .ok_or(RedemptionError::NoRedeemer(asset))
}

/// Two-phase redemption of `portion` of every enabled asset.
///
/// Both phases iterate one snapshot of the enabled set taken before any
/// redeemer runs, so an asset removed mid-loop is still visited by the
/// main phase.
pub fn redeem(
    book: &mut AssetBook,
    registry: &Registry,
    integrations: &Integrations,
    portion: u128,
) -> Result<Vec<Payout>, VaultError> {
    let snapshot = book.enabled_assets();
    let mut payouts = Vec::new();

    for asset in &snapshot {
        let redeemer = redeemer_for(registry, integrations, *asset)?;
        if redeemer.has_pre_withdraw() {
            payouts.extend(redeemer.pre_withdraw(book, *asset, portion)?);
        }
    }
    for asset in &snapshot {
        let redeemer = redeemer_for(registry, integrations, *asset)?;
        payouts.extend(redeemer.withdraw(book, *asset, portion)?);
    }

    debug!(assets = snapshot.len(), payouts = payouts.len(), portion, "redemption complete");
    Ok(payouts)
}

/// Everything a manager trade touches.
pub struct TradeContext<'a> {
    pub book: &'a mut AssetBook,
    pub cpit: &'a mut CpitTracker,
    pub risk_profile: RiskProfile,
    pub registry: &'a Registry,
    pub integrations: &'a Integrations,
    pub now: u64,
}

/// Runs a trade through an allowed executor. Impact-relevant executors
/// are checked against the vault's CPIT window using the vault's max value
/// before and after the trade.
pub fn execute_trade(
    ctx: TradeContext<'_>,
    kind: ExecutorKind,
    trade: &Trade,
) -> Result<u64, VaultError> {
    ctx.registry.ensure_not_paused()?;
    if !ctx.registry.executor_allowed(kind) {
        return Err(ExecutionError::NotAllowed(kind).into());
    }
    let executor = ctx
        .integrations
        .executor(kind)
        .ok_or(ExecutionError::NoExecutor(kind))?;

    if !executor.requires_cpit() {
        executor.execute(ctx.book, trade)?;
        debug!(?kind, "trade executed without cpit");
        return Ok(0);
    }

    let before = local_value(ctx.book, ctx.registry, ctx.integrations)?.max;
    executor.execute(ctx.book, trade)?;
    let after = local_value(ctx.book, ctx.registry, ctx.integrations)?.max;
    let cap = ctx.registry.cpit_cap(ctx.risk_profile);
    let impact = ctx.cpit.record_trade(ctx.now, before, after, cap)?;
    info!(?kind, before, after, impact, "trade executed");
    Ok(impact)
}
