//! The per-chain transport gateway.
//!
//! [`Transport`] is the only component that talks to the messaging
//! endpoint and the bridge service. Vault state machines hand it typed
//! messages; it checks fees, builds gas descriptors, and buffers the
//! packets. [`Transport::flush`] releases the buffer once the enclosing
//! transaction has committed, so a reverted transaction never leaks a
//! message.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::bridge::{BridgePayload, BridgeService, BridgeTransfer};
use super::endpoint::{GasParams, MessagingEndpoint, OutboundPacket};
use super::error::TransportError;
use super::message::{Message, MessageKind};
use crate::assets::AssetBook;
use crate::config::{
    BIPS, BRIDGE_MIN_AMOUNT_OUT_BIPS, DEFAULT_BRIDGE_APPROVAL_CANCEL_COOLDOWN,
    DEFAULT_DESTINATION_GAS,
};
use crate::math::mul_div;
use crate::types::{Address, AssetId, ChainId, VaultRef};

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Owner-managed transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    trusted_remotes: BTreeMap<ChainId, Address>,
    /// Local asset → local bridge pool.
    asset_pools: BTreeMap<AssetId, u32>,
    /// (destination chain, local asset) → pool on that chain.
    dst_pools: BTreeMap<(ChainId, AssetId), u32>,
    /// Local bridge pool → local asset, for deliveries.
    pool_assets: BTreeMap<u32, AssetId>,
    destination_gas: BTreeMap<(ChainId, MessageKind), u64>,
    /// Native cost of the reply leg, airdropped to the remote transport.
    return_costs: BTreeMap<(ChainId, MessageKind), u128>,
    vault_creation_fee: u128,
    bridge_approval_cancel_cooldown: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            trusted_remotes: BTreeMap::new(),
            asset_pools: BTreeMap::new(),
            dst_pools: BTreeMap::new(),
            pool_assets: BTreeMap::new(),
            destination_gas: BTreeMap::new(),
            return_costs: BTreeMap::new(),
            vault_creation_fee: 0,
            bridge_approval_cancel_cooldown: DEFAULT_BRIDGE_APPROVAL_CANCEL_COOLDOWN,
        }
    }
}

impl TransportConfig {
    pub fn trusted_remote(&self, chain: ChainId) -> Option<Address> {
        self.trusted_remotes.get(&chain).copied()
    }

    pub fn trusted_chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.trusted_remotes.keys().copied()
    }

    pub fn asset_pool(&self, asset: &AssetId) -> Option<u32> {
        self.asset_pools.get(asset).copied()
    }

    pub fn dst_pool(&self, chain: ChainId, asset: &AssetId) -> Option<u32> {
        self.dst_pools.get(&(chain, *asset)).copied()
    }

    pub fn pool_asset(&self, pool: u32) -> Option<AssetId> {
        self.pool_assets.get(&pool).copied()
    }

    pub fn destination_gas(&self, chain: ChainId, kind: MessageKind) -> u64 {
        self.destination_gas
            .get(&(chain, kind))
            .copied()
            .unwrap_or(DEFAULT_DESTINATION_GAS)
    }

    pub fn return_cost(&self, chain: ChainId, kind: MessageKind) -> u128 {
        self.return_costs.get(&(chain, kind)).copied().unwrap_or(0)
    }

    pub fn vault_creation_fee(&self) -> u128 {
        self.vault_creation_fee
    }

    pub fn bridge_approval_cancel_cooldown(&self) -> u64 {
        self.bridge_approval_cancel_cooldown
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Arguments of [`Transport::bridge_asset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeAssetRequest {
    pub dst_chain: ChainId,
    pub dst_vault: Address,
    pub src_vault: VaultRef,
    pub parent: VaultRef,
    pub asset: AssetId,
    pub amount: u128,
    pub min_amount_out: u128,
}

#[derive(Clone, Debug)]
enum Outbound {
    Packet(OutboundPacket),
    Bridge(BridgeTransfer),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Transport {
    chain_id: ChainId,
    address: Address,
    owner: Address,
    config: TransportConfig,
    endpoint: Arc<dyn MessagingEndpoint>,
    bridge: Arc<dyn BridgeService>,
    /// Native currency available to pay outbound fees.
    balance: u128,
    outbox: Vec<Outbound>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("chain_id", &self.chain_id)
            .field("address", &self.address)
            .field("balance", &self.balance)
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

impl Transport {
    pub fn new(
        chain_id: ChainId,
        address: Address,
        owner: Address,
        endpoint: Arc<dyn MessagingEndpoint>,
        bridge: Arc<dyn BridgeService>,
    ) -> Self {
        Self {
            chain_id,
            address,
            owner,
            config: TransportConfig::default(),
            endpoint,
            bridge,
            balance: 0,
            outbox: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn balance(&self) -> u128 {
        self.balance
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbox.len()
    }

    pub fn endpoint_address(&self) -> Address {
        self.endpoint.address()
    }

    pub fn bridge_router(&self) -> Address {
        self.bridge.router()
    }

    // -- native balance ------------------------------------------------------

    /// Credits attached value or an inbound airdrop.
    pub fn credit(&mut self, amount: u128) -> Result<(), TransportError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(TransportError::Overflow)?;
        Ok(())
    }

    /// Releases native currency, e.g. a creation fee forwarded to the
    /// treasury.
    pub fn debit(&mut self, amount: u128) -> Result<(), TransportError> {
        if amount > self.balance {
            return Err(TransportError::InsufficientBalance {
                available: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    // -- outbound messages ---------------------------------------------------

    /// Gas descriptor for `kind` sent to `dst`. Kinds that expect a reply
    /// get a v2 descriptor airdropping the return-leg cost on the remote
    /// transport.
    pub fn gas_params(&self, dst: ChainId, kind: MessageKind) -> GasParams {
        let gas = self.config.destination_gas(dst, kind);
        if kind.requires_reply() {
            GasParams::V2 {
                gas,
                airdrop: self.config.return_cost(dst, kind),
                airdrop_to: self.config.trusted_remote(dst).unwrap_or(Address::ZERO),
            }
        } else {
            GasParams::V1 { gas }
        }
    }

    /// Minimum fee for sending `kind` to `dst`, return leg included.
    pub fn quote(&self, dst: ChainId, kind: MessageKind) -> u128 {
        let params = self.gas_params(dst, kind);
        self.endpoint.estimate_fee(self.chain_id, dst, &params)
    }

    /// Buffers `message` for `dst`, paying `fee` from the native balance.
    pub fn send(
        &mut self,
        dst: ChainId,
        message: &Message,
        fee: u128,
    ) -> Result<Uuid, TransportError> {
        let kind = message.kind();
        let required = self.quote(dst, kind);
        if fee < required {
            return Err(TransportError::InsufficientFee {
                required,
                provided: fee,
            });
        }
        if self.balance < fee {
            return Err(TransportError::InsufficientBalance {
                available: self.balance,
                required: fee,
            });
        }
        let dst_address = self
            .config
            .trusted_remote(dst)
            .ok_or(TransportError::NoTrustedRemote(dst))?;
        let payload = message.encode()?;

        self.balance -= fee;
        let id = Uuid::new_v4();
        debug!(%id, ?kind, src = self.chain_id, dst, fee, "message queued");
        self.outbox.push(Outbound::Packet(OutboundPacket {
            id,
            src_chain: self.chain_id,
            src_address: self.address,
            dst_chain: dst,
            dst_address,
            payload,
            adapter_params: self.gas_params(dst, kind).encode(),
            fee,
        }));
        Ok(id)
    }

    // -- inbound authentication ---------------------------------------------

    /// Fails closed: the caller must be the endpoint and the source must be
    /// the configured trusted remote for `src_chain`.
    pub fn authenticate(
        &self,
        caller: Address,
        src_chain: ChainId,
        src_address: Address,
    ) -> Result<(), TransportError> {
        if caller != self.endpoint.address() {
            return Err(TransportError::NotEndpoint(caller));
        }
        match self.config.trusted_remote(src_chain) {
            Some(trusted) if trusted == src_address => Ok(()),
            _ => Err(TransportError::UntrustedSource {
                chain: src_chain,
                address: src_address,
            }),
        }
    }

    pub fn authenticate_bridge(&self, caller: Address) -> Result<(), TransportError> {
        if caller != self.bridge.router() {
            return Err(TransportError::NotBridgeRouter(caller));
        }
        Ok(())
    }

    // -- bridging -----------------------------------------------------------

    fn bridge_gas_params(&self, dst_chain: ChainId, parent_chain: ChainId) -> GasParams {
        let gas = self
            .config
            .destination_gas(dst_chain, MessageKind::BridgedAssetAcknowledgement);
        if dst_chain == parent_chain {
            GasParams::V1 { gas }
        } else {
            GasParams::V2 {
                gas,
                airdrop: self
                    .config
                    .return_cost(dst_chain, MessageKind::BridgedAssetAcknowledgement),
                airdrop_to: self
                    .config
                    .trusted_remote(dst_chain)
                    .unwrap_or(Address::ZERO),
            }
        }
    }

    /// Minimum fee for a bridge transfer to `dst_chain`, including the
    /// acknowledgement leg when the destination is not the parent chain.
    pub fn quote_bridge(&self, dst_chain: ChainId, parent_chain: ChainId) -> u128 {
        let params = self.bridge_gas_params(dst_chain, parent_chain);
        self.bridge.quote(self.chain_id, dst_chain, &params)
    }

    /// Escrows `req.amount` of `req.asset` out of `book` and buffers a
    /// bridge transfer.
    pub fn bridge_asset(
        &mut self,
        book: &mut AssetBook,
        req: &BridgeAssetRequest,
        fee: u128,
    ) -> Result<Uuid, TransportError> {
        let floor = mul_div(req.amount, BRIDGE_MIN_AMOUNT_OUT_BIPS, BIPS)
            .map_err(|_| TransportError::SlippageTooHigh {
                amount: req.amount,
                min_amount_out: req.min_amount_out,
            })?;
        if req.min_amount_out < floor {
            return Err(TransportError::SlippageTooHigh {
                amount: req.amount,
                min_amount_out: req.min_amount_out,
            });
        }
        let src_pool = self
            .config
            .asset_pool(&req.asset)
            .ok_or(TransportError::UnknownPool(req.asset))?;
        let dst_pool = self.config.dst_pool(req.dst_chain, &req.asset).ok_or(
            TransportError::UnknownDestinationPool {
                chain: req.dst_chain,
                asset: req.asset,
            },
        )?;
        let dst_address = self
            .config
            .trusted_remote(req.dst_chain)
            .ok_or(TransportError::NoTrustedRemote(req.dst_chain))?;

        let required = self.quote_bridge(req.dst_chain, req.parent.chain_id);
        if fee < required {
            return Err(TransportError::InsufficientFee {
                required,
                provided: fee,
            });
        }
        if self.balance < fee {
            return Err(TransportError::InsufficientBalance {
                available: self.balance,
                required: fee,
            });
        }

        book.debit(req.asset, req.amount)?;
        book.update_active_asset(req.asset)?;
        self.balance -= fee;

        let id = Uuid::new_v4();
        info!(
            %id,
            asset = %req.asset,
            amount = req.amount,
            src = self.chain_id,
            dst = req.dst_chain,
            "asset bridge queued"
        );
        self.outbox.push(Outbound::Bridge(BridgeTransfer {
            id,
            src_chain: self.chain_id,
            src_pool,
            dst_chain: req.dst_chain,
            dst_pool,
            dst_address,
            amount: req.amount,
            min_amount_out: req.min_amount_out,
            payload: BridgePayload {
                dst_vault: req.dst_vault,
                src_vault: req.src_vault,
                parent: req.parent,
            },
            gas: self.bridge_gas_params(req.dst_chain, req.parent.chain_id),
            fee,
        }));
        Ok(id)
    }

    /// Resolves a local pool id from a bridge delivery.
    pub fn pool_asset(&self, pool: u32) -> Result<AssetId, TransportError> {
        self.config
            .pool_asset(pool)
            .ok_or(TransportError::UnknownPoolId(pool))
    }

    // -- commit -------------------------------------------------------------

    /// Drops everything buffered. Used when the enclosing transaction
    /// reverts.
    pub fn discard_outbox(&mut self) {
        self.outbox.clear();
    }

    /// Hands buffered packets and transfers to the endpoint and bridge, in
    /// order. Returns how many were released.
    ///
    /// Every item is validated first; if any is refused nothing is released
    /// and the outbox is left for the caller to discard.
    pub fn flush(&mut self) -> Result<usize, TransportError> {
        for item in &self.outbox {
            match item {
                Outbound::Packet(p) => self.endpoint.validate(p)?,
                Outbound::Bridge(t) => self.bridge.validate(t)?,
            }
        }
        let outbox = std::mem::take(&mut self.outbox);
        let n = outbox.len();
        for item in outbox {
            match item {
                Outbound::Packet(p) => self.endpoint.send(p)?,
                Outbound::Bridge(t) => self.bridge.transfer(t)?,
            }
        }
        Ok(n)
    }

    // -- owner configuration ------------------------------------------------

    fn only_owner(&self, caller: Address) -> Result<(), TransportError> {
        if caller != self.owner {
            return Err(TransportError::NotOwner(caller));
        }
        Ok(())
    }

    pub fn set_trusted_remote(
        &mut self,
        caller: Address,
        chain: ChainId,
        remote: Address,
    ) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.trusted_remotes.insert(chain, remote);
        Ok(())
    }

    /// Registers the local pool for `asset` (both directions).
    pub fn set_asset_pool(
        &mut self,
        caller: Address,
        asset: AssetId,
        pool: u32,
    ) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.asset_pools.insert(asset, pool);
        self.config.pool_assets.insert(pool, asset);
        Ok(())
    }

    pub fn set_dst_pool(
        &mut self,
        caller: Address,
        chain: ChainId,
        asset: AssetId,
        pool: u32,
    ) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.dst_pools.insert((chain, asset), pool);
        Ok(())
    }

    pub fn set_destination_gas(
        &mut self,
        caller: Address,
        chain: ChainId,
        kind: MessageKind,
        gas: u64,
    ) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.destination_gas.insert((chain, kind), gas);
        Ok(())
    }

    pub fn set_return_cost(
        &mut self,
        caller: Address,
        chain: ChainId,
        kind: MessageKind,
        cost: u128,
    ) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.return_costs.insert((chain, kind), cost);
        Ok(())
    }

    pub fn set_vault_creation_fee(&mut self, caller: Address, fee: u128) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.vault_creation_fee = fee;
        Ok(())
    }

    pub fn set_bridge_approval_cancel_cooldown(
        &mut self,
        caller: Address,
        seconds: u64,
    ) -> Result<(), TransportError> {
        self.only_owner(caller)?;
        self.config.bridge_approval_cancel_cooldown = seconds;
        Ok(())
    }
}
