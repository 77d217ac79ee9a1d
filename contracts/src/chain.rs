//! # Chain Runtime
//!
//! One [`Chain`] is everything Crossvault deploys on a single chain: the
//! registry, the transport, the vault factory and every parent and child
//! vault living there. All state changes go through [`Chain::transact`],
//! which gives each entry point the atomicity of a chain transaction:
//!
//! ```text
//!   snapshot ──► run ──► Ok  ──► flush transport outbox ──► commit
//!                  │
//!                  └──► Err ──► restore snapshot (outbox discarded)
//! ```
//!
//! A handler that fails therefore leaves no trace: no partial state and no
//! outbound message.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossvault_protocol::integrations::{ExecutorKind, Integrations, Payout, Trade, VaultValue};
use crossvault_protocol::ledger::{FeeLevy, FeeSchedule};
use crossvault_protocol::registry::Registry;
use crossvault_protocol::transport::{BridgeService, MessagingEndpoint, Transport};
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::{Address, AssetId, ChainId, TokenId, VaultRef};
use tracing::{debug, info, warn};

use crate::child::ChildVault;
use crate::error::VaultError;
use crate::parent::{ParentParams, ParentVault, SyncState};
use crate::wallet::Wallets;

// ---------------------------------------------------------------------------
// Call Context
// ---------------------------------------------------------------------------

/// Who is calling and how much native currency they attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub value: u128,
}

impl CallContext {
    pub fn new(caller: Address) -> Self {
        Self { caller, value: 0 }
    }

    pub fn with_value(caller: Address, value: u128) -> Self {
        Self { caller, value }
    }
}

/// Per-chain state shared by every vault on the chain.
#[derive(Clone, Debug)]
pub struct ChainEnv {
    pub chain_id: ChainId,
    pub registry: Registry,
    pub transport: Transport,
    pub wallets: Wallets,
    pub now: u64,
}

/// Deterministic transport address of `chain_id`.
pub fn transport_address(chain_id: ChainId) -> Address {
    Address::derive(format!("crossvault/transport/{chain_id}").as_bytes())
}

fn vault_address(chain_id: ChainId, nonce: u64) -> Address {
    let mut seed = b"crossvault/vault".to_vec();
    seed.extend_from_slice(&chain_id.to_be_bytes());
    seed.extend_from_slice(&nonce.to_be_bytes());
    Address::derive(&seed)
}

struct Snapshot {
    env: ChainEnv,
    parents: BTreeMap<Address, ParentVault>,
    children: BTreeMap<Address, ChildVault>,
    vault_nonce: u64,
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

pub struct Chain {
    pub(crate) env: ChainEnv,
    pub(crate) integrations: Integrations,
    pub(crate) parents: BTreeMap<Address, ParentVault>,
    pub(crate) children: BTreeMap<Address, ChildVault>,
    vault_nonce: u64,
    entered: bool,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("chain_id", &self.env.chain_id)
            .field("now", &self.env.now)
            .field("parents", &self.parents.len())
            .field("children", &self.children.len())
            .finish()
    }
}

impl Chain {
    pub fn new(
        chain_id: ChainId,
        owner: Address,
        treasury: Address,
        endpoint: Arc<dyn MessagingEndpoint>,
        bridge: Arc<dyn BridgeService>,
        integrations: Integrations,
    ) -> Self {
        let transport = Transport::new(chain_id, transport_address(chain_id), owner, endpoint, bridge);
        Self {
            env: ChainEnv {
                chain_id,
                registry: Registry::new(chain_id, owner, treasury),
                transport,
                wallets: Wallets::new(),
                now: 0,
            },
            integrations,
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
            vault_nonce: 0,
            entered: false,
        }
    }

    // -- transactions -------------------------------------------------------

    /// Runs `f` atomically. On error every change is rolled back, including
    /// buffered outbound messages; on success the outbox is released.
    pub fn transact<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        if self.entered {
            return Err(VaultError::Reentrant);
        }
        self.entered = true;
        let snapshot = Snapshot {
            env: self.env.clone(),
            parents: self.parents.clone(),
            children: self.children.clone(),
            vault_nonce: self.vault_nonce,
        };

        let result = f(self).and_then(|value| {
            let released = self.env.transport.flush()?;
            debug!(chain = self.env.chain_id, op, released, "transaction committed");
            Ok(value)
        });

        if let Err(e) = &result {
            self.env = snapshot.env;
            self.env.transport.discard_outbox();
            self.parents = snapshot.parents;
            self.children = snapshot.children;
            self.vault_nonce = snapshot.vault_nonce;
            warn!(chain = self.env.chain_id, op, error = %e, class = %e.class(), "transaction reverted");
        }
        self.entered = false;
        result
    }

    /// Moves the attached native value from the caller to the transport,
    /// where it pays for outbound messages.
    fn pay_in(&mut self, ctx: &CallContext) -> Result<(), VaultError> {
        if ctx.value == 0 {
            return Ok(());
        }
        self.env.wallets.debit_native(ctx.caller, ctx.value)?;
        self.env.transport.credit(ctx.value)?;
        Ok(())
    }

    fn next_vault_address(&mut self) -> Address {
        let address = vault_address(self.env.chain_id, self.vault_nonce);
        self.vault_nonce += 1;
        address
    }

    fn with_parent<T>(
        &mut self,
        vault: Address,
        f: impl FnOnce(&mut ParentVault, &mut ChainEnv, &Integrations) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let parent = self
            .parents
            .get_mut(&vault)
            .ok_or(VaultError::UnknownVault(vault))?;
        f(parent, &mut self.env, &self.integrations)
    }

    fn with_child<T>(
        &mut self,
        vault: Address,
        f: impl FnOnce(&mut ChildVault, &mut ChainEnv, &Integrations) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let child = self
            .children
            .get_mut(&vault)
            .ok_or(VaultError::UnknownVault(vault))?;
        f(child, &mut self.env, &self.integrations)
    }

    /// Deploys a child vault. Only reachable through a creation request
    /// from a parent.
    pub(crate) fn deploy_child(
        &mut self,
        parent: VaultRef,
        manager: Address,
        risk_profile: RiskProfile,
        siblings: &[VaultRef],
    ) -> VaultRef {
        let address = self.next_vault_address();
        let child = ChildVault::new(address, &self.env, parent, manager, risk_profile, siblings);
        self.children.insert(address, child);
        info!(chain = self.env.chain_id, vault = %address, parent = %parent, "child vault deployed");
        VaultRef::new(self.env.chain_id, address)
    }

    // -- environment --------------------------------------------------------

    pub fn chain_id(&self) -> ChainId {
        self.env.chain_id
    }

    pub fn now(&self) -> u64 {
        self.env.now
    }

    pub fn set_time(&mut self, now: u64) {
        self.env.now = now;
    }

    pub fn env(&self) -> &ChainEnv {
        &self.env
    }

    pub fn registry(&self) -> &Registry {
        &self.env.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.env.registry
    }

    /// Sets the enabled-asset cap in the registry and applies it to every
    /// vault already deployed on this chain.
    pub fn set_max_active_assets(&mut self, caller: Address, max: usize) -> Result<(), VaultError> {
        self.env.registry.set_max_active_assets(caller, max)?;
        for parent in self.parents.values_mut() {
            parent.book_mut().set_max_active(max);
        }
        for child in self.children.values_mut() {
            child.book_mut().set_max_active(max);
        }
        info!(chain = self.env.chain_id, max, "max active assets updated");
        Ok(())
    }

    pub fn transport(&self) -> &Transport {
        &self.env.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.env.transport
    }

    pub fn wallets(&self) -> &Wallets {
        &self.env.wallets
    }

    pub fn integrations(&self) -> &Integrations {
        &self.integrations
    }

    /// Faucet: credits `amount` of `asset` to `owner`'s wallet.
    pub fn mint_to(&mut self, owner: Address, asset: AssetId, amount: u128) -> Result<(), VaultError> {
        self.env.wallets.credit(owner, asset, amount)
    }

    /// Faucet for native currency.
    pub fn fund_native(&mut self, owner: Address, amount: u128) -> Result<(), VaultError> {
        self.env.wallets.credit_native(owner, amount)
    }

    // -- queries ------------------------------------------------------------

    pub fn parent(&self, vault: &Address) -> Option<&ParentVault> {
        self.parents.get(vault)
    }

    pub fn child(&self, vault: &Address) -> Option<&ChildVault> {
        self.children.get(vault)
    }

    pub fn parent_vaults(&self) -> impl Iterator<Item = &ParentVault> {
        self.parents.values()
    }

    pub fn child_vaults(&self) -> impl Iterator<Item = &ChildVault> {
        self.children.values()
    }

    /// The child vault on this chain belonging to `parent`, if any.
    pub fn child_of(&self, parent: VaultRef) -> Option<&ChildVault> {
        self.children.values().find(|c| c.parent() == parent)
    }

    pub fn sync_state(&self, vault: &Address) -> Result<SyncState, VaultError> {
        let parent = self.parents.get(vault).ok_or(VaultError::UnknownVault(*vault))?;
        Ok(parent.sync_state(self.env.now, self.env.registry.liveliness_threshold()))
    }

    pub fn total_value(&self, vault: &Address) -> Result<VaultValue, VaultError> {
        let parent = self.parents.get(vault).ok_or(VaultError::UnknownVault(*vault))?;
        parent.total_value_across_chains(&self.env, &self.integrations)
    }

    /// Local value of a parent or child vault on this chain.
    pub fn local_value(&self, vault: &Address) -> Result<VaultValue, VaultError> {
        let book = match (self.parents.get(vault), self.children.get(vault)) {
            (Some(p), _) => p.book(),
            (None, Some(c)) => c.book(),
            (None, None) => return Err(VaultError::UnknownVault(*vault)),
        };
        crate::custody::local_value(book, &self.env.registry, &self.integrations)
    }

    // -- factory ------------------------------------------------------------

    /// Creates a parent vault managed by the caller.
    pub fn create_parent_vault(
        &mut self,
        ctx: CallContext,
        risk_profile: RiskProfile,
        fees: FeeSchedule,
    ) -> Result<Address, VaultError> {
        self.transact("create_parent_vault", |chain| {
            chain.env.registry.ensure_not_paused()?;
            let address = chain.next_vault_address();
            let params = ParentParams {
                manager: ctx.caller,
                risk_profile,
                fees,
            };
            let vault = ParentVault::new(address, &chain.env, params)?;
            chain.parents.insert(address, vault);
            info!(
                chain = chain.env.chain_id,
                vault = %address,
                manager = %ctx.caller,
                %risk_profile,
                "parent vault created"
            );
            Ok(address)
        })
    }

    // -- parent entry points ------------------------------------------------

    pub fn deposit(
        &mut self,
        ctx: CallContext,
        vault: Address,
        token_id: Option<TokenId>,
        asset: AssetId,
        amount: u128,
    ) -> Result<TokenId, VaultError> {
        self.transact("deposit", |chain| {
            chain.pay_in(&ctx)?;
            chain.with_parent(vault, |p, env, integrations| {
                p.deposit(env, integrations, &ctx, token_id, asset, amount)
            })
        })
    }

    pub fn withdraw(
        &mut self,
        ctx: CallContext,
        vault: Address,
        token_id: TokenId,
        shares: u128,
        fees: &[u128],
    ) -> Result<Vec<Payout>, VaultError> {
        self.transact("withdraw", |chain| {
            chain.pay_in(&ctx)?;
            chain.with_parent(vault, |p, env, integrations| {
                p.withdraw(env, integrations, &ctx, token_id, shares, fees)
            })
        })
    }

    pub fn request_value_sync(
        &mut self,
        ctx: CallContext,
        vault: Address,
        fees: &[u128],
    ) -> Result<(), VaultError> {
        self.transact("request_value_sync", |chain| {
            chain.pay_in(&ctx)?;
            chain.with_parent(vault, |p, env, _| p.request_value_sync(env, &ctx, fees))
        })
    }

    pub fn request_bridge_approval(
        &mut self,
        ctx: CallContext,
        vault: Address,
        source_chain: ChainId,
        dst_chain: ChainId,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.transact("request_bridge_approval", |chain| {
            chain.pay_in(&ctx)?;
            chain.with_parent(vault, |p, env, _| {
                p.request_bridge_approval(env, &ctx, source_chain, dst_chain, fee)
            })
        })
    }

    pub fn request_create_child(
        &mut self,
        ctx: CallContext,
        vault: Address,
        chain_id: ChainId,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.transact("request_create_child", |chain| {
            chain.pay_in(&ctx)?;
            chain.with_parent(vault, |p, env, _| p.request_create_child(env, &ctx, chain_id, fee))
        })
    }

    pub fn change_manager(
        &mut self,
        ctx: CallContext,
        vault: Address,
        new_manager: Address,
        fees: &[u128],
    ) -> Result<(), VaultError> {
        self.transact("change_manager", |chain| {
            chain.pay_in(&ctx)?;
            chain.with_parent(vault, |p, env, _| p.change_manager(env, &ctx, new_manager, fees))
        })
    }

    pub fn announce_fee_increase(
        &mut self,
        ctx: CallContext,
        vault: Address,
        fees: FeeSchedule,
    ) -> Result<(), VaultError> {
        self.transact("announce_fee_increase", |chain| {
            chain.with_parent(vault, |p, env, _| p.announce_fee_increase(ctx.caller, fees, env.now))
        })
    }

    pub fn commit_fee_increase(
        &mut self,
        ctx: CallContext,
        vault: Address,
    ) -> Result<FeeSchedule, VaultError> {
        self.transact("commit_fee_increase", |chain| {
            chain.with_parent(vault, |p, env, _| p.commit_fee_increase(ctx.caller, env.now))
        })
    }

    pub fn renounce_fee_increase(&mut self, ctx: CallContext, vault: Address) -> Result<(), VaultError> {
        self.transact("renounce_fee_increase", |chain| {
            chain.with_parent(vault, |p, _, _| p.renounce_fee_increase(ctx.caller))
        })
    }

    pub fn decrease_fees(
        &mut self,
        ctx: CallContext,
        vault: Address,
        fees: FeeSchedule,
    ) -> Result<(), VaultError> {
        self.transact("decrease_fees", |chain| {
            chain.with_parent(vault, |p, _, _| p.decrease_fees(ctx.caller, fees))
        })
    }

    pub fn set_holding_discount(
        &mut self,
        ctx: CallContext,
        vault: Address,
        token_id: TokenId,
        discount_bips: u32,
    ) -> Result<(), VaultError> {
        self.transact("set_holding_discount", |chain| {
            chain.with_parent(vault, |p, _, _| {
                p.set_holding_discount(ctx.caller, token_id, discount_bips)
            })
        })
    }

    pub fn levy_fees_on_holdings(
        &mut self,
        ctx: CallContext,
        vault: Address,
        token_ids: &[TokenId],
    ) -> Result<Vec<FeeLevy>, VaultError> {
        self.transact("levy_fees_on_holdings", |chain| {
            chain.with_parent(vault, |p, env, integrations| {
                p.levy_fees_on_holdings(env, integrations, ctx.caller, token_ids)
            })
        })
    }

    pub fn close_vault(&mut self, ctx: CallContext, vault: Address) -> Result<(), VaultError> {
        self.transact("close_vault", |chain| {
            chain.with_parent(vault, |p, _, _| p.close_vault(ctx.caller))
        })
    }

    // -- entry points on either side ----------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn bridge_asset(
        &mut self,
        ctx: CallContext,
        vault: Address,
        dst_chain: ChainId,
        asset: AssetId,
        amount: u128,
        min_amount_out: u128,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.transact("bridge_asset", |chain| {
            chain.pay_in(&ctx)?;
            if chain.parents.contains_key(&vault) {
                chain.with_parent(vault, |p, env, _| {
                    p.bridge_asset(env, &ctx, dst_chain, asset, amount, min_amount_out, fee)
                })
            } else {
                chain.with_child(vault, |c, env, _| {
                    c.bridge_asset(env, &ctx, dst_chain, asset, amount, min_amount_out, fee)
                })
            }
        })
    }

    /// Cancels an unused bridge approval. On a child the cancellation is
    /// forwarded to the parent and `fee` pays for it; on the parent it is
    /// applied directly.
    pub fn cancel_bridge_approval(
        &mut self,
        ctx: CallContext,
        vault: Address,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.transact("cancel_bridge_approval", |chain| {
            chain.pay_in(&ctx)?;
            if chain.parents.contains_key(&vault) {
                chain.with_parent(vault, |p, env, _| p.cancel_bridge_approval(env, &ctx))
            } else {
                chain.with_child(vault, |c, env, _| c.cancel_bridge_approval(env, &ctx, fee))
            }
        })
    }

    pub fn execute_trade(
        &mut self,
        ctx: CallContext,
        vault: Address,
        kind: ExecutorKind,
        trade: Trade,
    ) -> Result<u64, VaultError> {
        self.transact("execute_trade", |chain| {
            if chain.parents.contains_key(&vault) {
                chain.with_parent(vault, |p, env, integrations| {
                    p.execute_trade(env, integrations, ctx.caller, kind, &trade)
                })
            } else {
                chain.with_child(vault, |c, env, integrations| {
                    c.execute_trade(env, integrations, ctx.caller, kind, &trade)
                })
            }
        })
    }
}
