//! # Cross-Chain Transport
//!
//! Every cross-chain effect in a Crossvault vault goes through a
//! [`Transport`] instance deployed on each chain. It owns three concerns:
//!
//! 1. **Codec**: typed messages are wrapped in an [`Envelope`] carrying a
//!    4-byte handler selector. Only the eleven whitelisted kinds decode.
//! 2. **Outbound**: fee checks, gas-allowance descriptors and asset
//!    bridging. Outbound packets are buffered and handed to the endpoint
//!    only after the enclosing transaction commits.
//! 3. **Inbound authentication**: a packet is accepted only when it is
//!    delivered by the configured messaging endpoint and originates from
//!    the trusted remote transport of its source chain.
//!
//! ```text
//!   ┌──────────┐  send / bridge_asset   ┌───────────┐  deliver   ┌──────────┐
//!   │  Vault   ├───────────────────────►│ Transport ├──────────► │ Endpoint │
//!   └──────────┘   (buffered outbox)    └─────┬─────┘  (flush)   └────┬─────┘
//!                                             │                       │
//!                                   authenticate(caller, src)         │
//!                                             │◄──────────────────────┘
//!                                             ▼
//!                                   fixed handler dispatch
//! ```
//!
//! The messaging endpoint and the bridge service are external; their
//! contracts are the [`MessagingEndpoint`] and [`BridgeService`] traits.

pub mod bridge;
pub mod endpoint;
pub mod gateway;
pub mod message;

mod error;

pub use bridge::{BridgeDelivery, BridgePayload, BridgeService, BridgeTransfer};
pub use endpoint::{GasParams, InboundPacket, MessagingEndpoint, OutboundPacket};
pub use error::{CodecError, TransportError};
pub use gateway::{BridgeAssetRequest, Transport, TransportConfig};
pub use message::{
    AddVaultSiblingRequest, BridgeApprovalCancellationRequest, BridgeApprovalRequest,
    BridgedAssetAcknowledgement, ChangeManagerRequest, ChildCreatedRequest, Envelope, Message,
    MessageKind, ValueUpdateRequest, ValueUpdatedRequest, VaultChildCreationRequest,
    WithdrawComplete, WithdrawRequest,
};
