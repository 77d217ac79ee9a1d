//! Error types for the transport layer.

use thiserror::Error;

use crate::assets::AssetError;
use crate::types::{Address, AssetId, ChainId};

/// Wire-format failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The envelope names a handler outside the whitelist.
    #[error("unknown handler selector 0x{}", hex::encode(.0))]
    UnknownSelector([u8; 4]),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("malformed gas params: {0}")]
    BadGasParams(String),
}

/// Errors raised by [`Transport`](super::Transport) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("caller {0} is not the transport owner")]
    NotOwner(Address),

    /// Prepaid fee does not cover the destination execution (and return leg).
    #[error("insufficient fee: required {required}, provided {provided}")]
    InsufficientFee {
        /// Minimum fee quoted for this message.
        required: u128,
        /// Fee the caller attached.
        provided: u128,
    },

    #[error("insufficient native balance: have {available}, need {required}")]
    InsufficientBalance { available: u128, required: u128 },

    #[error("native balance overflow")]
    Overflow,

    #[error("no trusted remote configured for chain {0}")]
    NoTrustedRemote(ChainId),

    #[error("caller {0} is not the messaging endpoint")]
    NotEndpoint(Address),

    #[error("untrusted source {address} on chain {chain}")]
    UntrustedSource { chain: ChainId, address: Address },

    #[error("caller {0} is not the bridge router")]
    NotBridgeRouter(Address),

    /// `min_amount_out` is below the 99% floor.
    #[error("min amount out {min_amount_out} below slippage floor for {amount}")]
    SlippageTooHigh { amount: u128, min_amount_out: u128 },

    #[error("no bridge pool for asset {0}")]
    UnknownPool(AssetId),

    #[error("no destination pool for asset {asset} on chain {chain}")]
    UnknownDestinationPool { chain: ChainId, asset: AssetId },

    #[error("no asset for bridge pool {0}")]
    UnknownPoolId(u32),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Asset(#[from] AssetError),
}
