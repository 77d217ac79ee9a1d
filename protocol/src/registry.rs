//! # Registry
//!
//! The per-chain configuration directory. Every vault and the transport on
//! a chain read from it; only the owner writes to it. It also carries the
//! global pause switch that gates every state-mutating vault and transport
//! operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config;
use crate::integrations::{ExecutorKind, RedeemerKind, ValuerKind};
use crate::types::{Address, AssetId, ChainId, RiskProfile};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Caller is not the registry owner.
    #[error("caller {0} is not the registry owner")]
    NotOwner(Address),

    /// The protocol is paused on this chain.
    #[error("protocol is paused")]
    Paused,

    /// A bips value above 10_000 was supplied.
    #[error("invalid bips value: {0}")]
    InvalidBips(u32),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Configuration for one chain. Created once at deploy time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registry {
    chain_id: ChainId,
    owner: Address,
    treasury: Address,
    paused: bool,
    valuers: HashMap<AssetId, ValuerKind>,
    redeemers: HashMap<AssetId, RedeemerKind>,
    executors: BTreeSet<ExecutorKind>,
    deposit_assets: BTreeSet<AssetId>,
    hard_deprecated_assets: BTreeSet<AssetId>,
    cpit_caps: BTreeMap<RiskProfile, u32>,
    liveliness_threshold: u64,
    deposit_limit: u128,
    custom_deposit_limits: HashMap<Address, u128>,
    min_deposit_value: u128,
    deposit_lockup: u64,
    protocol_fee_share_bips: u32,
    max_active_assets: usize,
}

impl Registry {
    /// Creates a registry with protocol defaults.
    pub fn new(chain_id: ChainId, owner: Address, treasury: Address) -> Self {
        let mut cpit_caps = BTreeMap::new();
        cpit_caps.insert(RiskProfile::Low, config::DEFAULT_CPIT_CAP_LOW_BIPS);
        cpit_caps.insert(RiskProfile::Medium, config::DEFAULT_CPIT_CAP_MEDIUM_BIPS);
        cpit_caps.insert(RiskProfile::High, config::DEFAULT_CPIT_CAP_HIGH_BIPS);

        Self {
            chain_id,
            owner,
            treasury,
            paused: false,
            valuers: HashMap::new(),
            redeemers: HashMap::new(),
            executors: BTreeSet::new(),
            deposit_assets: BTreeSet::new(),
            hard_deprecated_assets: BTreeSet::new(),
            cpit_caps,
            liveliness_threshold: config::DEFAULT_LIVELINESS_THRESHOLD,
            deposit_limit: config::DEFAULT_DEPOSIT_LIMIT,
            custom_deposit_limits: HashMap::new(),
            min_deposit_value: config::DEFAULT_MIN_DEPOSIT_VALUE,
            deposit_lockup: 0,
            protocol_fee_share_bips: config::DEFAULT_PROTOCOL_FEE_SHARE_BIPS,
            max_active_assets: config::DEFAULT_MAX_ACTIVE_ASSETS,
        }
    }

    fn ensure_owner(&self, caller: Address) -> Result<(), RegistryError> {
        if caller != self.owner {
            return Err(RegistryError::NotOwner(caller));
        }
        Ok(())
    }

    /// Fails with [`RegistryError::Paused`] while the pause switch is on.
    pub fn ensure_not_paused(&self) -> Result<(), RegistryError> {
        if self.paused {
            return Err(RegistryError::Paused);
        }
        Ok(())
    }

    // -- getters -------------------------------------------------------------

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_owner(&self, caller: Address) -> bool {
        caller == self.owner
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn valuer(&self, asset: &AssetId) -> Option<ValuerKind> {
        self.valuers.get(asset).copied()
    }

    pub fn redeemer(&self, asset: &AssetId) -> Option<RedeemerKind> {
        self.redeemers.get(asset).copied()
    }

    pub fn executor_allowed(&self, kind: ExecutorKind) -> bool {
        self.executors.contains(&kind)
    }

    pub fn deposit_asset(&self, asset: &AssetId) -> bool {
        self.deposit_assets.contains(asset)
    }

    pub fn hard_deprecated(&self, asset: &AssetId) -> bool {
        self.hard_deprecated_assets.contains(asset)
    }

    /// CPIT cap for a risk profile. An unset profile gets a zero cap, which
    /// blocks every impact-relevant trade rather than allowing unbounded loss.
    pub fn cpit_cap(&self, profile: RiskProfile) -> u32 {
        self.cpit_caps.get(&profile).copied().unwrap_or(0)
    }

    pub fn liveliness_threshold(&self) -> u64 {
        self.liveliness_threshold
    }

    /// Deposit limit for a vault: its custom limit if set, else the default.
    pub fn deposit_limit(&self, vault: &Address) -> u128 {
        self.custom_deposit_limits
            .get(vault)
            .copied()
            .unwrap_or(self.deposit_limit)
    }

    pub fn min_deposit_value(&self) -> u128 {
        self.min_deposit_value
    }

    pub fn deposit_lockup(&self) -> u64 {
        self.deposit_lockup
    }

    pub fn protocol_fee_share_bips(&self) -> u32 {
        self.protocol_fee_share_bips
    }

    pub fn max_active_assets(&self) -> usize {
        self.max_active_assets
    }

    // -- owner-gated setters -------------------------------------------------

    pub fn transfer_ownership(&mut self, caller: Address, new_owner: Address) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        info!(chain = self.chain_id, %new_owner, "registry ownership transferred");
        self.owner = new_owner;
        Ok(())
    }

    pub fn set_treasury(&mut self, caller: Address, treasury: Address) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.treasury = treasury;
        Ok(())
    }

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        info!(chain = self.chain_id, paused, "pause switch toggled");
        self.paused = paused;
        Ok(())
    }

    /// Registers how an asset is valued and redeemed.
    pub fn set_asset(
        &mut self,
        caller: Address,
        asset: AssetId,
        valuer: ValuerKind,
        redeemer: RedeemerKind,
    ) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.valuers.insert(asset, valuer);
        self.redeemers.insert(asset, redeemer);
        Ok(())
    }

    pub fn set_deposit_asset(&mut self, caller: Address, asset: AssetId, allowed: bool) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        if allowed {
            self.deposit_assets.insert(asset);
        } else {
            self.deposit_assets.remove(&asset);
        }
        Ok(())
    }

    pub fn set_executor(&mut self, caller: Address, kind: ExecutorKind, allowed: bool) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        if allowed {
            self.executors.insert(kind);
        } else {
            self.executors.remove(&kind);
        }
        Ok(())
    }

    /// Flags an asset whose value can no longer be trusted. Any vault
    /// holding it refuses deposits until the flag is lifted.
    pub fn set_hard_deprecated(&mut self, caller: Address, asset: AssetId, deprecated: bool) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        if deprecated {
            self.hard_deprecated_assets.insert(asset);
        } else {
            self.hard_deprecated_assets.remove(&asset);
        }
        info!(chain = self.chain_id, %asset, deprecated, "hard deprecation updated");
        Ok(())
    }

    pub fn set_cpit_cap(&mut self, caller: Address, profile: RiskProfile, cap_bips: u32) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        if cap_bips as u128 > config::BIPS {
            return Err(RegistryError::InvalidBips(cap_bips));
        }
        self.cpit_caps.insert(profile, cap_bips);
        Ok(())
    }

    pub fn set_liveliness_threshold(&mut self, caller: Address, seconds: u64) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.liveliness_threshold = seconds;
        Ok(())
    }

    pub fn set_deposit_limit(&mut self, caller: Address, limit: u128) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.deposit_limit = limit;
        Ok(())
    }

    pub fn set_custom_deposit_limit(&mut self, caller: Address, vault: Address, limit: Option<u128>) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        match limit {
            Some(l) => {
                self.custom_deposit_limits.insert(vault, l);
            }
            None => {
                self.custom_deposit_limits.remove(&vault);
            }
        }
        Ok(())
    }

    pub fn set_min_deposit_value(&mut self, caller: Address, value: u128) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.min_deposit_value = value;
        Ok(())
    }

    pub fn set_deposit_lockup(&mut self, caller: Address, seconds: u64) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.deposit_lockup = seconds;
        Ok(())
    }

    pub fn set_protocol_fee_share(&mut self, caller: Address, bips: u32) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        if bips as u128 > config::BIPS {
            return Err(RegistryError::InvalidBips(bips));
        }
        self.protocol_fee_share_bips = bips;
        Ok(())
    }

    pub fn set_max_active_assets(&mut self, caller: Address, max: usize) -> Result<(), RegistryError> {
        self.ensure_owner(caller)?;
        self.max_active_assets = max;
        Ok(())
    }
}
