//! # Local Relayer
//!
//! An in-memory stand-in for the external messaging endpoint and bridge
//! service, used by the devnet node and the integration tests.
//!
//! It models the delivery guarantees the vaults are written against:
//!
//! - packets are delivered in FIFO order per path;
//! - delivery is at-least-once: when a destination handler fails, the
//!   packet is stored and its path `(src chain, src address, dst chain)` is
//!   blocked until the stored payload is retried successfully;
//! - a bridge transfer whose destination receipt fails is stored by id,
//!   with its funds still held by the bridge, until it is retried;
//! - fees are a flat base plus destination gas at a fixed price plus any
//!   airdrop.
//!
//! The relayer never calls into chains itself. A driver pops packets with
//! [`LocalRelayer::next_packet`], hands them to the destination, and
//! reports failures back with [`LocalRelayer::store_failed`].

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BIPS;
use crate::math::mul_div;
use crate::transport::{
    BridgeDelivery, BridgeService, BridgeTransfer, GasParams, InboundPacket, MessagingEndpoint,
    OutboundPacket, TransportError,
};
use crate::types::{Address, ChainId};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Fee model charged by the relayer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerFees {
    pub base_fee: u128,
    /// Native units per unit of destination gas.
    pub gas_price: u128,
    pub bridge_base_fee: u128,
    /// Bridge liquidity fee taken out of the transferred amount.
    pub bridge_fee_bips: u128,
}

impl Default for RelayerFees {
    fn default() -> Self {
        Self {
            base_fee: 1_000,
            gas_price: 1,
            bridge_base_fee: 5_000,
            bridge_fee_bips: 5,
        }
    }
}

/// The ordered lane a packet travels on. A failed packet blocks its lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketPath {
    pub src_chain: ChainId,
    pub src_address: Address,
    pub dst_chain: ChainId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedPacket {
    pub dst_chain: ChainId,
    pub packet: InboundPacket,
}

impl QueuedPacket {
    pub fn path(&self) -> PacketPath {
        PacketPath {
            src_chain: self.packet.src_chain,
            src_address: self.packet.src_address,
            dst_chain: self.dst_chain,
        }
    }
}

/// A packet whose handler failed, waiting for a retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPayload {
    pub packet: QueuedPacket,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedTransfer {
    pub dst_chain: ChainId,
    pub delivery: BridgeDelivery,
}

/// A bridge transfer whose destination receipt failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTransfer {
    pub transfer: QueuedTransfer,
    pub reason: String,
}

/// Running counters, exported by the node as metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_failed: u64,
    pub packets_retried: u64,
    pub transfers_sent: u64,
    pub transfers_settled: u64,
    pub transfers_failed: u64,
    pub transfers_retried: u64,
}

#[derive(Default)]
struct RelayState {
    packets: VecDeque<QueuedPacket>,
    stored: BTreeMap<PacketPath, StoredPayload>,
    transfers: VecDeque<QueuedTransfer>,
    stored_transfers: BTreeMap<Uuid, StoredTransfer>,
    stats: RelayStats,
}

// ---------------------------------------------------------------------------
// LocalRelayer
// ---------------------------------------------------------------------------

pub struct LocalRelayer {
    address: Address,
    router: Address,
    fees: RelayerFees,
    state: Mutex<RelayState>,
}

impl Default for LocalRelayer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRelayer {
    pub fn new() -> Self {
        Self::with_fees(RelayerFees::default())
    }

    pub fn with_fees(fees: RelayerFees) -> Self {
        Self {
            address: Address::from_label("crossvault/local-endpoint"),
            router: Address::from_label("crossvault/local-bridge-router"),
            fees,
            state: Mutex::new(RelayState::default()),
        }
    }

    pub fn fees(&self) -> RelayerFees {
        self.fees
    }

    pub fn stats(&self) -> RelayStats {
        self.state.lock().stats
    }

    pub fn pending_packets(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn pending_transfers(&self) -> usize {
        self.state.lock().transfers.len()
    }

    /// Pops the oldest packet whose path is not blocked.
    pub fn next_packet(&self) -> Option<QueuedPacket> {
        let mut state = self.state.lock();
        let idx = {
            let stored = &state.stored;
            state
                .packets
                .iter()
                .position(|p| !stored.contains_key(&p.path()))?
        };
        state.packets.remove(idx)
    }

    pub fn record_delivered(&self) {
        self.state.lock().stats.packets_delivered += 1;
    }

    /// Stores a packet whose handler failed and blocks its path.
    pub fn store_failed(&self, packet: QueuedPacket, reason: String) {
        let path = packet.path();
        warn!(id = %packet.packet.id, ?path, %reason, "packet stored for retry");
        let mut state = self.state.lock();
        state.stats.packets_failed += 1;
        state.stored.insert(path, StoredPayload { packet, reason });
    }

    pub fn stored_payloads(&self) -> Vec<StoredPayload> {
        self.state.lock().stored.values().cloned().collect()
    }

    pub fn is_blocked(&self, path: &PacketPath) -> bool {
        self.state.lock().stored.contains_key(path)
    }

    /// Removes the stored payload of `path` for a retry, unblocking it. A
    /// retry that fails again must be stored again.
    pub fn take_stored(&self, path: &PacketPath) -> Option<QueuedPacket> {
        let mut state = self.state.lock();
        let stored = state.stored.remove(path)?;
        state.stats.packets_retried += 1;
        Some(stored.packet)
    }

    pub fn next_transfer(&self) -> Option<QueuedTransfer> {
        self.state.lock().transfers.pop_front()
    }

    pub fn record_settled(&self) {
        self.state.lock().stats.transfers_settled += 1;
    }

    /// Parks a transfer whose destination receipt failed. The bridge keeps
    /// the funds until [`LocalRelayer::take_stored_transfer`] hands it back.
    pub fn store_failed_transfer(&self, transfer: QueuedTransfer, reason: String) {
        let id = transfer.delivery.id;
        warn!(%id, dst = transfer.dst_chain, %reason, "bridge transfer stored for retry");
        let mut state = self.state.lock();
        state.stats.transfers_failed += 1;
        state
            .stored_transfers
            .insert(id, StoredTransfer { transfer, reason });
    }

    pub fn stored_transfers(&self) -> Vec<StoredTransfer> {
        self.state.lock().stored_transfers.values().cloned().collect()
    }

    pub fn take_stored_transfer(&self, id: &Uuid) -> Option<QueuedTransfer> {
        let mut state = self.state.lock();
        let stored = state.stored_transfers.remove(id)?;
        state.stats.transfers_retried += 1;
        Some(stored.transfer)
    }

    /// Transferred amount net of the liquidity fee, refused below the
    /// transfer's minimum.
    fn amount_received(&self, transfer: &BridgeTransfer) -> Result<u128, TransportError> {
        let fee = mul_div(transfer.amount, self.fees.bridge_fee_bips, BIPS)
            .map_err(|e| TransportError::Delivery(e.to_string()))?;
        let received = transfer.amount - fee;
        if received < transfer.min_amount_out {
            return Err(TransportError::Delivery(format!(
                "bridge output {received} below minimum {}",
                transfer.min_amount_out
            )));
        }
        Ok(received)
    }

    fn gas_fee(&self, params: &GasParams) -> u128 {
        (params.gas() as u128)
            .saturating_mul(self.fees.gas_price)
            .saturating_add(params.airdrop())
    }
}

impl MessagingEndpoint for LocalRelayer {
    fn address(&self) -> Address {
        self.address
    }

    fn estimate_fee(&self, _src_chain: ChainId, _dst_chain: ChainId, params: &GasParams) -> u128 {
        self.fees.base_fee.saturating_add(self.gas_fee(params))
    }

    fn validate(&self, packet: &OutboundPacket) -> Result<(), TransportError> {
        GasParams::decode(&packet.adapter_params)?;
        Ok(())
    }

    fn send(&self, packet: OutboundPacket) -> Result<(), TransportError> {
        let params = GasParams::decode(&packet.adapter_params)?;
        debug!(
            id = %packet.id,
            src = packet.src_chain,
            dst = packet.dst_chain,
            gas = params.gas(),
            "packet accepted"
        );
        let queued = QueuedPacket {
            dst_chain: packet.dst_chain,
            packet: InboundPacket {
                id: packet.id,
                src_chain: packet.src_chain,
                src_address: packet.src_address,
                dst_address: packet.dst_address,
                payload: packet.payload,
                gas_limit: params.gas(),
                airdrop: params.airdrop(),
            },
        };
        let mut state = self.state.lock();
        state.stats.packets_sent += 1;
        state.packets.push_back(queued);
        Ok(())
    }
}

impl BridgeService for LocalRelayer {
    fn router(&self) -> Address {
        self.router
    }

    fn quote(&self, _src_chain: ChainId, _dst_chain: ChainId, gas: &GasParams) -> u128 {
        self.fees.bridge_base_fee.saturating_add(self.gas_fee(gas))
    }

    fn validate(&self, transfer: &BridgeTransfer) -> Result<(), TransportError> {
        self.amount_received(transfer).map(|_| ())
    }

    fn transfer(&self, transfer: BridgeTransfer) -> Result<(), TransportError> {
        let received = self.amount_received(&transfer)?;
        debug!(id = %transfer.id, amount = transfer.amount, received, "bridge transfer accepted");
        let mut state = self.state.lock();
        state.stats.transfers_sent += 1;
        state.transfers.push_back(QueuedTransfer {
            dst_chain: transfer.dst_chain,
            delivery: BridgeDelivery {
                id: transfer.id,
                src_chain: transfer.src_chain,
                dst_pool: transfer.dst_pool,
                amount_received: received,
                payload: transfer.payload,
                airdrop: transfer.gas.airdrop(),
            },
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BridgePayload;
    use crate::types::VaultRef;

    fn packet(src: ChainId, dst: ChainId, label: &str) -> OutboundPacket {
        OutboundPacket {
            id: Uuid::new_v4(),
            src_chain: src,
            src_address: Address::from_label(label),
            dst_chain: dst,
            dst_address: Address::from_label("dst"),
            payload: label.as_bytes().to_vec(),
            adapter_params: GasParams::V1 { gas: 10 }.encode(),
            fee: 0,
        }
    }

    #[test]
    fn fee_model() {
        let r = LocalRelayer::new();
        let f = r.fees();
        let v2 = GasParams::V2 { gas: 100, airdrop: 9, airdrop_to: Address::ZERO };
        assert_eq!(r.estimate_fee(1, 2, &v2), f.base_fee + 100 * f.gas_price + 9);
    }

    #[test]
    fn failed_packet_blocks_its_path_only() {
        let r = LocalRelayer::new();
        r.send(packet(1, 2, "a")).unwrap();
        r.send(packet(1, 2, "a")).unwrap();
        r.send(packet(3, 2, "b")).unwrap();

        let first = r.next_packet().unwrap();
        let path = first.path();
        r.store_failed(first, "boom".into());
        assert!(r.is_blocked(&path));

        // Second packet on the blocked path is skipped; the other path flows.
        let next = r.next_packet().unwrap();
        assert_eq!(next.packet.src_chain, 3);
        assert!(r.next_packet().is_none());

        let retried = r.take_stored(&path).unwrap();
        assert_eq!(retried.packet.payload, b"a".to_vec());
        assert!(r.next_packet().is_some());
        assert_eq!(r.stats().packets_retried, 1);
    }

    #[test]
    fn failed_transfer_waits_for_its_retry() {
        let r = LocalRelayer::new();
        let id = Uuid::new_v4();
        let queued = QueuedTransfer {
            dst_chain: 2,
            delivery: BridgeDelivery {
                id,
                src_chain: 1,
                dst_pool: 1,
                amount_received: 500,
                payload: BridgePayload {
                    dst_vault: Address::from_label("child"),
                    src_vault: VaultRef::new(1, Address::from_label("parent")),
                    parent: VaultRef::new(1, Address::from_label("parent")),
                },
                airdrop: 0,
            },
        };
        r.store_failed_transfer(queued.clone(), "unknown pool".into());
        assert!(r.next_transfer().is_none());
        assert_eq!(r.stored_transfers().len(), 1);
        assert_eq!(r.stats().transfers_failed, 1);

        assert!(r.take_stored_transfer(&Uuid::new_v4()).is_none());
        assert_eq!(r.take_stored_transfer(&id), Some(queued));
        assert!(r.stored_transfers().is_empty());
        assert_eq!(r.stats().transfers_retried, 1);
    }
}
