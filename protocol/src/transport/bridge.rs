//! Bridge service contract.
//!
//! Assets move between chains through an external pool-based bridge. The
//! transport escrows the asset, names source and destination pools, and
//! attaches a [`BridgePayload`] so the receiving side knows which vault to
//! credit and which parent to notify.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::GasParams;
use super::error::TransportError;
use crate::types::{Address, ChainId, VaultRef};

/// Routing data carried alongside a bridged amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgePayload {
    /// Vault on the destination chain that receives the asset.
    pub dst_vault: Address,
    pub src_vault: VaultRef,
    /// Parent to acknowledge once the asset lands.
    pub parent: VaultRef,
}

/// An escrowed transfer handed to the bridge service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub id: Uuid,
    pub src_chain: ChainId,
    pub src_pool: u32,
    pub dst_chain: ChainId,
    pub dst_pool: u32,
    /// Destination transport.
    pub dst_address: Address,
    pub amount: u128,
    pub min_amount_out: u128,
    pub payload: BridgePayload,
    pub gas: GasParams,
    pub fee: u128,
}

/// A transfer arriving at the destination transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDelivery {
    pub id: Uuid,
    pub src_chain: ChainId,
    pub dst_pool: u32,
    pub amount_received: u128,
    pub payload: BridgePayload,
    pub airdrop: u128,
}

pub trait BridgeService: Send + Sync {
    /// Address that calls destination transports with deliveries.
    fn router(&self) -> Address;

    fn quote(&self, src_chain: ChainId, dst_chain: ChainId, gas: &GasParams) -> u128;

    /// Checks that `transfer` would be accepted without moving anything.
    fn validate(&self, _transfer: &BridgeTransfer) -> Result<(), TransportError> {
        Ok(())
    }

    fn transfer(&self, transfer: BridgeTransfer) -> Result<(), TransportError>;
}
