//! # Local Network
//!
//! Several [`Chain`]s wired to one [`LocalRelayer`]. The network plays the
//! off-chain relayer role: it pops packets and bridge transfers, hands them
//! to the destination chain, and stores failed packets so their lane stays
//! blocked until a retry succeeds. Bridge transfers that fail to land are
//! stored the same way, keyed by transfer id.
//!
//! ```text
//!   Chain A ──flush──► LocalRelayer ──deliver_next──► Chain B
//!                          ▲      ──settle_bridges──►    │
//!                          └──── store_failed (Err) ◄────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crossvault_protocol::integrations::Integrations;
use crossvault_protocol::relay::{LocalRelayer, PacketPath, QueuedTransfer, RelayStats, RelayerFees};
use crossvault_protocol::transport::{BridgeService, MessageKind, MessagingEndpoint};
use crossvault_protocol::{Address, AssetId, ChainId};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chain::{transport_address, Chain};
use crate::error::VaultError;

/// Outcome of delivering one packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered { dst_chain: ChainId },
    Stored { dst_chain: ChainId, reason: String },
}

pub struct LocalNetwork {
    relayer: Arc<LocalRelayer>,
    chains: BTreeMap<ChainId, Chain>,
    owner: Address,
    treasury: Address,
    now: u64,
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("now", &self.now)
            .finish()
    }
}

impl LocalNetwork {
    pub fn new(owner: Address, treasury: Address) -> Self {
        Self::with_fees(owner, treasury, RelayerFees::default())
    }

    pub fn with_fees(owner: Address, treasury: Address, fees: RelayerFees) -> Self {
        Self {
            relayer: Arc::new(LocalRelayer::with_fees(fees)),
            chains: BTreeMap::new(),
            owner,
            treasury,
            now: 0,
        }
    }

    pub fn relayer(&self) -> &LocalRelayer {
        &self.relayer
    }

    pub fn stats(&self) -> RelayStats {
        self.relayer.stats()
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().copied().collect()
    }

    pub fn chain(&self, id: ChainId) -> Result<&Chain, VaultError> {
        self.chains.get(&id).ok_or(VaultError::UnknownChain(id))
    }

    pub fn chain_mut(&mut self, id: ChainId) -> Result<&mut Chain, VaultError> {
        self.chains.get_mut(&id).ok_or(VaultError::UnknownChain(id))
    }

    /// Adds a chain and trusts it from every existing chain and back.
    /// Return costs are set so every reply leg is prepaid exactly.
    pub fn add_chain(&mut self, id: ChainId, integrations: Integrations) -> Result<(), VaultError> {
        let mut chain = Chain::new(
            id,
            self.owner,
            self.treasury,
            self.relayer.clone(),
            self.relayer.clone(),
            integrations,
        );
        chain.set_time(self.now);
        self.chains.insert(id, chain);

        let others: Vec<ChainId> = self.chains.keys().copied().filter(|c| *c != id).collect();
        for other in others {
            self.connect(id, other)?;
            self.connect(other, id)?;
        }
        info!(chain = id, "chain added to local network");
        Ok(())
    }

    /// Trusts `remote` on `local` and prices the return legs.
    fn connect(&mut self, local: ChainId, remote: ChainId) -> Result<(), VaultError> {
        let owner = self.owner;
        let reply_costs: Vec<(MessageKind, u128)> = {
            let remote_chain = self.chain(remote)?;
            MessageKind::ALL
                .iter()
                .filter_map(|kind| kind.reply_kind().map(|reply| (*kind, reply)))
                .map(|(kind, reply)| (kind, remote_chain.transport().quote(local, reply)))
                .collect()
        };
        // The acknowledgement that follows a bridge delivery is a reply leg
        // too, paid by the bridge airdrop.
        let ack_cost = self
            .chain(remote)?
            .transport()
            .quote(local, MessageKind::BridgedAssetAcknowledgement);

        let transport = self.chain_mut(local)?.transport_mut();
        transport.set_trusted_remote(owner, remote, transport_address(remote))?;
        for (kind, cost) in reply_costs {
            transport.set_return_cost(owner, remote, kind, cost)?;
        }
        transport.set_return_cost(owner, remote, MessageKind::BridgedAssetAcknowledgement, ack_cost)?;
        Ok(())
    }

    /// Registers one bridge pool id for `asset` on each listed chain and
    /// points every chain at every other chain's pool.
    pub fn register_bridge_pool(&mut self, pool: u32, assets: &[(ChainId, AssetId)]) -> Result<(), VaultError> {
        let owner = self.owner;
        for (chain_id, asset) in assets {
            let transport = self.chain_mut(*chain_id)?.transport_mut();
            transport.set_asset_pool(owner, *asset, pool)?;
            for (other, _) in assets.iter().filter(|(c, _)| c != chain_id) {
                transport.set_dst_pool(owner, *other, *asset, pool)?;
            }
        }
        Ok(())
    }

    /// Moves every chain's clock to `now`.
    pub fn set_time(&mut self, now: u64) {
        self.now = now;
        for chain in self.chains.values_mut() {
            chain.set_time(now);
        }
    }

    pub fn advance_time(&mut self, seconds: u64) {
        self.set_time(self.now.saturating_add(seconds));
    }

    // -- delivery -----------------------------------------------------------

    /// Delivers the oldest deliverable packet, if any.
    pub fn deliver_next(&mut self) -> Option<Delivery> {
        let queued = self.relayer.next_packet()?;
        let dst_chain = queued.dst_chain;
        let endpoint = self.relayer.address();
        let result = match self.chains.get_mut(&dst_chain) {
            Some(chain) => chain.receive_packet(endpoint, &queued.packet),
            None => Err(VaultError::UnknownChain(dst_chain)),
        };
        Some(match result {
            Ok(()) => {
                self.relayer.record_delivered();
                Delivery::Delivered { dst_chain }
            }
            Err(e) => {
                let reason = e.to_string();
                self.relayer.store_failed(queued, reason.clone());
                Delivery::Stored { dst_chain, reason }
            }
        })
    }

    /// Delivers packets and settles bridge transfers until both queues are
    /// drained or blocked. Returns how many packets were delivered.
    pub fn deliver_all(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            while let Some(outcome) = self.deliver_next() {
                progressed = true;
                if matches!(outcome, Delivery::Delivered { .. }) {
                    delivered += 1;
                }
            }
            if self.settle_bridges() > 0 {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        debug!(delivered, stored = self.relayer.stored_payloads().len(), "network drained");
        delivered
    }

    /// Retries the stored payload on `path`, optionally with a larger
    /// execution budget. A packet that fails again is stored again.
    pub fn retry_stored(&mut self, path: &PacketPath, gas_limit: Option<u64>) -> Option<Delivery> {
        let mut queued = self.relayer.take_stored(path)?;
        if let Some(gas) = gas_limit {
            queued.packet.gas_limit = gas;
        }
        let dst_chain = queued.dst_chain;
        let endpoint = self.relayer.address();
        let result = match self.chains.get_mut(&dst_chain) {
            Some(chain) => chain.receive_packet(endpoint, &queued.packet),
            None => Err(VaultError::UnknownChain(dst_chain)),
        };
        Some(match result {
            Ok(()) => {
                self.relayer.record_delivered();
                info!(?path, "stored payload retried");
                Delivery::Delivered { dst_chain }
            }
            Err(e) => {
                let reason = e.to_string();
                self.relayer.store_failed(queued, reason.clone());
                Delivery::Stored { dst_chain, reason }
            }
        })
    }

    /// Lands every queued bridge transfer. A transfer whose receipt fails
    /// is stored for [`LocalNetwork::retry_bridge`]; the bridge keeps the
    /// funds meanwhile.
    pub fn settle_bridges(&mut self) -> usize {
        let mut settled = 0;
        while let Some(queued) = self.relayer.next_transfer() {
            if matches!(self.land_transfer(queued), Delivery::Delivered { .. }) {
                settled += 1;
            }
        }
        settled
    }

    /// Retries the stored bridge transfer `id`. A transfer that fails again
    /// is stored again.
    pub fn retry_bridge(&mut self, id: &Uuid) -> Option<Delivery> {
        let queued = self.relayer.take_stored_transfer(id)?;
        let outcome = self.land_transfer(queued);
        if matches!(outcome, Delivery::Delivered { .. }) {
            info!(%id, "stored bridge transfer retried");
        }
        Some(outcome)
    }

    fn land_transfer(&mut self, queued: QueuedTransfer) -> Delivery {
        let dst_chain = queued.dst_chain;
        let router = self.relayer.router();
        let result = match self.chains.get_mut(&dst_chain) {
            Some(chain) => chain.receive_bridged_asset(router, &queued.delivery),
            None => Err(VaultError::UnknownChain(dst_chain)),
        };
        match result {
            Ok(()) => {
                self.relayer.record_settled();
                Delivery::Delivered { dst_chain }
            }
            Err(e) => {
                let reason = e.to_string();
                self.relayer.store_failed_transfer(queued, reason.clone());
                Delivery::Stored { dst_chain, reason }
            }
        }
    }
}
