//! Messaging endpoint contract and packet types.
//!
//! The endpoint is the external cross-chain messaging service. It is
//! assumed to deliver at-least-once and to report the true source of every
//! packet; nothing beyond that is relied on.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CodecError, TransportError};
use crate::types::{Address, ChainId};

// ---------------------------------------------------------------------------
// GasParams
// ---------------------------------------------------------------------------

/// Destination execution allowance attached to an outbound packet.
///
/// ## Encoding
///
/// ```text
///   v1:  version:u16 (=1) | gas:u64                                 10 bytes
///   v2:  version:u16 (=2) | gas:u64 | airdrop:u128 | to:[u8; 20]    46 bytes
/// ```
///
/// All integers big-endian. Version 2 additionally drops `airdrop` native
/// currency on `to` at the destination, which is how a request prepays the
/// return message of its reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasParams {
    V1 {
        gas: u64,
    },
    V2 {
        gas: u64,
        airdrop: u128,
        airdrop_to: Address,
    },
}

const V1_LEN: usize = 2 + 8;
const V2_LEN: usize = V1_LEN + 16 + 20;

impl GasParams {
    pub fn gas(&self) -> u64 {
        match self {
            GasParams::V1 { gas } | GasParams::V2 { gas, .. } => *gas,
        }
    }

    pub fn airdrop(&self) -> u128 {
        match self {
            GasParams::V1 { .. } => 0,
            GasParams::V2 { airdrop, .. } => *airdrop,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            GasParams::V1 { gas } => {
                let mut out = Vec::with_capacity(V1_LEN);
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&gas.to_be_bytes());
                out
            }
            GasParams::V2 {
                gas,
                airdrop,
                airdrop_to,
            } => {
                let mut out = Vec::with_capacity(V2_LEN);
                out.extend_from_slice(&2u16.to_be_bytes());
                out.extend_from_slice(&gas.to_be_bytes());
                out.extend_from_slice(&airdrop.to_be_bytes());
                out.extend_from_slice(&airdrop_to.0);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<GasParams, CodecError> {
        if bytes.len() < 2 {
            return Err(CodecError::BadGasParams("missing version".into()));
        }
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        let expected = match version {
            1 => V1_LEN,
            2 => V2_LEN,
            v => return Err(CodecError::BadGasParams(format!("unknown version {v}"))),
        };
        if bytes.len() != expected {
            return Err(CodecError::BadGasParams(format!(
                "version {version} expects {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let gas = u64::from_be_bytes(read_array(&bytes[2..10]));
        if version == 1 {
            return Ok(GasParams::V1 { gas });
        }
        let airdrop = u128::from_be_bytes(read_array(&bytes[10..26]));
        let airdrop_to = Address(read_array(&bytes[26..46]));
        Ok(GasParams::V2 {
            gas,
            airdrop,
            airdrop_to,
        })
    }
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// What a transport hands to the endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPacket {
    pub id: Uuid,
    pub src_chain: ChainId,
    pub src_address: Address,
    pub dst_chain: ChainId,
    pub dst_address: Address,
    pub payload: Vec<u8>,
    /// Encoded [`GasParams`].
    pub adapter_params: Vec<u8>,
    pub fee: u128,
}

/// What the endpoint delivers to the destination transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPacket {
    pub id: Uuid,
    pub src_chain: ChainId,
    pub src_address: Address,
    pub dst_address: Address,
    pub payload: Vec<u8>,
    /// Execution budget the handler runs under.
    pub gas_limit: u64,
    /// Native currency dropped on the destination transport.
    pub airdrop: u128,
}

// ---------------------------------------------------------------------------
// MessagingEndpoint
// ---------------------------------------------------------------------------

pub trait MessagingEndpoint: Send + Sync {
    /// Address the endpoint calls destination transports from.
    fn address(&self) -> Address;

    /// Native fee for delivering a packet to `dst_chain` under `params`.
    fn estimate_fee(&self, src_chain: ChainId, dst_chain: ChainId, params: &GasParams) -> u128;

    /// Checks that `send` would accept `packet` without queuing it.
    fn validate(&self, _packet: &OutboundPacket) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, packet: OutboundPacket) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_layout_is_fixed_width() {
        let p = GasParams::V2 {
            gas: 200_000,
            airdrop: 7,
            airdrop_to: Address::from_label("remote"),
        };
        let bytes = p.encode();
        assert_eq!(bytes.len(), 46);
        assert_eq!(&bytes[..2], &[0, 2]);
        assert_eq!(GasParams::decode(&bytes).unwrap(), p);
    }

    #[test]
    fn truncated_v2_rejected() {
        let bytes = GasParams::V2 {
            gas: 1,
            airdrop: 1,
            airdrop_to: Address::ZERO,
        }
        .encode();
        assert!(GasParams::decode(&bytes[..20]).is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        assert!(matches!(
            GasParams::decode(&[0, 3, 0, 0, 0, 0, 0, 0, 0, 1]),
            Err(CodecError::BadGasParams(_))
        ));
    }
}
