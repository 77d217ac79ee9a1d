//! Typed cross-chain messages and their wire envelope.
//!
//! ## Wire Format
//!
//! ```text
//!   Envelope { selector: [u8; 4], body: Vec<u8> }      (bincode)
//!              │                  │
//!              │                  └─ bincode of the typed message struct
//!              └─ SHA-256(handler signature)[..4]
//! ```
//!
//! The receiving transport resolves the selector against a fixed whitelist
//! before it decodes the body, so a packet can only ever reach one of the
//! eleven handlers below.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::CodecError;
use crate::types::{Address, ChainId, RiskProfile, TokenId, VaultRef};

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The whitelist of inbound handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    ValueUpdateRequest,
    ValueUpdatedRequest,
    WithdrawRequest,
    WithdrawComplete,
    VaultChildCreationRequest,
    ChildCreatedRequest,
    BridgeApprovalRequest,
    BridgeApprovalCancellationRequest,
    ChangeManagerRequest,
    AddVaultSiblingRequest,
    BridgedAssetAcknowledgement,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::ValueUpdateRequest,
        MessageKind::ValueUpdatedRequest,
        MessageKind::WithdrawRequest,
        MessageKind::WithdrawComplete,
        MessageKind::VaultChildCreationRequest,
        MessageKind::ChildCreatedRequest,
        MessageKind::BridgeApprovalRequest,
        MessageKind::BridgeApprovalCancellationRequest,
        MessageKind::ChangeManagerRequest,
        MessageKind::AddVaultSiblingRequest,
        MessageKind::BridgedAssetAcknowledgement,
    ];

    /// Canonical signature of the handler this kind dispatches to. The
    /// selector is derived from it.
    pub fn handler_signature(&self) -> &'static str {
        match self {
            MessageKind::ValueUpdateRequest => "handle_value_update_request(VaultRef,VaultRef)",
            MessageKind::ValueUpdatedRequest => {
                "handle_value_updated(VaultRef,VaultRef,u128,u128,u64,bool)"
            }
            MessageKind::WithdrawRequest => {
                "handle_withdraw_request(VaultRef,VaultRef,u64,Address,u128)"
            }
            MessageKind::WithdrawComplete => "handle_withdraw_complete(VaultRef,VaultRef)",
            MessageKind::VaultChildCreationRequest => {
                "handle_child_creation_request(VaultRef,Address,RiskProfile,u16)"
            }
            MessageKind::ChildCreatedRequest => "handle_child_created(VaultRef,VaultRef)",
            MessageKind::BridgeApprovalRequest => {
                "handle_bridge_approval(VaultRef,VaultRef,u16)"
            }
            MessageKind::BridgeApprovalCancellationRequest => {
                "handle_bridge_approval_cancellation(VaultRef,VaultRef,Address)"
            }
            MessageKind::ChangeManagerRequest => "handle_change_manager(VaultRef,VaultRef,Address)",
            MessageKind::AddVaultSiblingRequest => "handle_add_sibling(VaultRef,VaultRef)",
            MessageKind::BridgedAssetAcknowledgement => {
                "handle_bridged_asset_ack(VaultRef,VaultRef)"
            }
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        let digest = Sha256::digest(self.handler_signature().as_bytes());
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&digest[..4]);
        sel
    }

    pub fn from_selector(selector: [u8; 4]) -> Option<MessageKind> {
        MessageKind::ALL
            .iter()
            .copied()
            .find(|k| k.selector() == selector)
    }

    /// The reply the destination sends back, if any. Senders of these kinds
    /// prepay the return leg.
    pub fn reply_kind(&self) -> Option<MessageKind> {
        match self {
            MessageKind::ValueUpdateRequest => Some(MessageKind::ValueUpdatedRequest),
            MessageKind::WithdrawRequest => Some(MessageKind::WithdrawComplete),
            MessageKind::VaultChildCreationRequest => Some(MessageKind::ChildCreatedRequest),
            _ => None,
        }
    }

    pub fn requires_reply(&self) -> bool {
        self.reply_kind().is_some()
    }
}

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

/// Parent → child: report your current value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueUpdateRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
}

/// Child → parent: the reply to [`ValueUpdateRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueUpdatedRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
    pub min_value: u128,
    pub max_value: u128,
    /// Child-side timestamp of the valuation.
    pub time: u64,
    pub has_hard_deprecated_asset: bool,
}

/// Parent → child: pay `portion` of every enabled asset to `withdrawer`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
    pub token_id: TokenId,
    pub withdrawer: Address,
    /// Fraction of the vault being withdrawn, scaled by `PORTION_SCALE`.
    pub portion: u128,
}

/// Child → parent: the reply to [`WithdrawRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawComplete {
    pub parent: VaultRef,
    pub child: VaultRef,
}

/// Parent → remote transport: deploy a child vault for `parent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultChildCreationRequest {
    pub parent: VaultRef,
    pub manager: Address,
    pub risk_profile: RiskProfile,
    /// Children that already exist, seeded as siblings of the new one.
    pub siblings: Vec<VaultRef>,
}

/// Remote transport → parent: the reply to [`VaultChildCreationRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildCreatedRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
}

/// Parent → child: single-use approval to bridge to `approved_for`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeApprovalRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
    pub approved_for: ChainId,
}

/// Child → parent: an unused approval was cancelled by `requester`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeApprovalCancellationRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
    pub requester: Address,
}

/// Parent → child: the vault has a new manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeManagerRequest {
    pub parent: VaultRef,
    pub child: VaultRef,
    pub manager: Address,
}

/// Parent → existing child: a new sibling exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVaultSiblingRequest {
    pub child: VaultRef,
    pub sibling: VaultRef,
}

/// Bridge destination → parent: assets arrived at `receiver`, so every
/// cached child value is stale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgedAssetAcknowledgement {
    pub parent: VaultRef,
    pub receiver: VaultRef,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    ValueUpdateRequest(ValueUpdateRequest),
    ValueUpdatedRequest(ValueUpdatedRequest),
    WithdrawRequest(WithdrawRequest),
    WithdrawComplete(WithdrawComplete),
    VaultChildCreationRequest(VaultChildCreationRequest),
    ChildCreatedRequest(ChildCreatedRequest),
    BridgeApprovalRequest(BridgeApprovalRequest),
    BridgeApprovalCancellationRequest(BridgeApprovalCancellationRequest),
    ChangeManagerRequest(ChangeManagerRequest),
    AddVaultSiblingRequest(AddVaultSiblingRequest),
    BridgedAssetAcknowledgement(BridgedAssetAcknowledgement),
}

/// Outer wire frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub selector: [u8; 4],
    pub body: Vec<u8>,
}

fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(body).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(body).map_err(|e| CodecError::Malformed(e.to_string()))
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ValueUpdateRequest(_) => MessageKind::ValueUpdateRequest,
            Message::ValueUpdatedRequest(_) => MessageKind::ValueUpdatedRequest,
            Message::WithdrawRequest(_) => MessageKind::WithdrawRequest,
            Message::WithdrawComplete(_) => MessageKind::WithdrawComplete,
            Message::VaultChildCreationRequest(_) => MessageKind::VaultChildCreationRequest,
            Message::ChildCreatedRequest(_) => MessageKind::ChildCreatedRequest,
            Message::BridgeApprovalRequest(_) => MessageKind::BridgeApprovalRequest,
            Message::BridgeApprovalCancellationRequest(_) => {
                MessageKind::BridgeApprovalCancellationRequest
            }
            Message::ChangeManagerRequest(_) => MessageKind::ChangeManagerRequest,
            Message::AddVaultSiblingRequest(_) => MessageKind::AddVaultSiblingRequest,
            Message::BridgedAssetAcknowledgement(_) => MessageKind::BridgedAssetAcknowledgement,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = match self {
            Message::ValueUpdateRequest(m) => encode_body(m)?,
            Message::ValueUpdatedRequest(m) => encode_body(m)?,
            Message::WithdrawRequest(m) => encode_body(m)?,
            Message::WithdrawComplete(m) => encode_body(m)?,
            Message::VaultChildCreationRequest(m) => encode_body(m)?,
            Message::ChildCreatedRequest(m) => encode_body(m)?,
            Message::BridgeApprovalRequest(m) => encode_body(m)?,
            Message::BridgeApprovalCancellationRequest(m) => encode_body(m)?,
            Message::ChangeManagerRequest(m) => encode_body(m)?,
            Message::AddVaultSiblingRequest(m) => encode_body(m)?,
            Message::BridgedAssetAcknowledgement(m) => encode_body(m)?,
        };
        let envelope = Envelope {
            selector: self.kind().selector(),
            body,
        };
        encode_body(&envelope)
    }

    pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
        let envelope: Envelope = decode_body(bytes)?;
        let kind = MessageKind::from_selector(envelope.selector)
            .ok_or(CodecError::UnknownSelector(envelope.selector))?;
        let body = &envelope.body;
        Ok(match kind {
            MessageKind::ValueUpdateRequest => Message::ValueUpdateRequest(decode_body(body)?),
            MessageKind::ValueUpdatedRequest => Message::ValueUpdatedRequest(decode_body(body)?),
            MessageKind::WithdrawRequest => Message::WithdrawRequest(decode_body(body)?),
            MessageKind::WithdrawComplete => Message::WithdrawComplete(decode_body(body)?),
            MessageKind::VaultChildCreationRequest => {
                Message::VaultChildCreationRequest(decode_body(body)?)
            }
            MessageKind::ChildCreatedRequest => Message::ChildCreatedRequest(decode_body(body)?),
            MessageKind::BridgeApprovalRequest => {
                Message::BridgeApprovalRequest(decode_body(body)?)
            }
            MessageKind::BridgeApprovalCancellationRequest => {
                Message::BridgeApprovalCancellationRequest(decode_body(body)?)
            }
            MessageKind::ChangeManagerRequest => Message::ChangeManagerRequest(decode_body(body)?),
            MessageKind::AddVaultSiblingRequest => {
                Message::AddVaultSiblingRequest(decode_body(body)?)
            }
            MessageKind::BridgedAssetAcknowledgement => {
                Message::BridgedAssetAcknowledgement(decode_body(body)?)
            }
        })
    }
}
