//! Vault-level errors.
//!
//! Every vault operation returns a [`VaultError`]. Component errors from
//! the protocol crate convert into it with `?`. [`VaultError::class`]
//! sorts a failure into one of four kinds, which tells the caller what
//! to do about it.

use std::fmt;

use crossvault_protocol::cpit::CpitError;
use crossvault_protocol::integrations::{
    BudgetExhausted, ExecutionError, RedemptionError, ValuationError,
};
use crossvault_protocol::ledger::LedgerError;
use crossvault_protocol::math::MathError;
use crossvault_protocol::assets::AssetError;
use crossvault_protocol::registry::RegistryError;
use crossvault_protocol::transport::{CodecError, MessageKind, TransportError};
use crossvault_protocol::{Address, AssetId, ChainId, TokenId};
use thiserror::Error;

/// What a caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Wrong caller, paused, closed, bad input. Fix the input and retry.
    Precondition,
    /// Cached remote values are missing or expired. Re-sync first.
    Staleness,
    /// A cross-chain handler failed in a way that may be resource
    /// exhaustion. The relayer stores and retries the packet.
    Delivery,
    /// Fee governance bound violated.
    Governance,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Precondition => write!(f, "precondition"),
            ErrorClass::Staleness => write!(f, "staleness"),
            ErrorClass::Delivery => write!(f, "delivery"),
            ErrorClass::Governance => write!(f, "governance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("caller {0} is not the vault manager")]
    NotManager(Address),

    #[error("caller {caller} does not own holding {token_id}")]
    NotHoldingOwner { token_id: TokenId, caller: Address },

    #[error("vault is closed")]
    Closed,

    #[error("a bridge is in progress")]
    BridgeInProgress,

    #[error("{0} withdraws are in progress")]
    WithdrawInProgress(u32),

    #[error("child creation on chain {0} is in progress")]
    ChildCreationInProgress(ChainId),

    /// At least one active child has no fresh cached value.
    #[error("vault is not in sync")]
    NotInSync,

    #[error("holding {token_id} is locked until {unlock_time}")]
    HoldingLocked { token_id: TokenId, unlock_time: u64 },

    #[error("asset {0} is not accepted for deposits")]
    AssetNotDepositable(AssetId),

    #[error("vault holds a hard-deprecated asset")]
    HardDeprecatedAsset,

    #[error("deposit would take vault value to {value}, above limit {limit}")]
    DepositLimitExceeded { value: u128, limit: u128 },

    #[error("deposit value {value} below minimum {min}")]
    DepositTooSmall { value: u128, min: u128 },

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("expected {expected} fees, got {got}")]
    FeeCountMismatch { expected: usize, got: usize },

    #[error("attached value {provided} does not cover {required}")]
    InsufficientValue { required: u128, provided: u128 },

    #[error("{owner} has {available} of {asset}, needs {requested}")]
    InsufficientWalletBalance {
        owner: Address,
        asset: AssetId,
        available: u128,
        requested: u128,
    },

    #[error("{owner} has {available} native, needs {requested}")]
    InsufficientNativeBalance {
        owner: Address,
        available: u128,
        requested: u128,
    },

    #[error("chain {0} is not part of this vault")]
    UnknownChain(ChainId),

    #[error("no vault {0} on this chain")]
    UnknownVault(Address),

    #[error("vault already has a child on chain {0}")]
    ChildExists(ChainId),

    #[error("chain {0} is not a valid target")]
    InvalidTarget(ChainId),

    #[error("no bridge approval granted")]
    NoBridgeApproval,

    #[error("bridge approval is for chain {approved}, not {requested}")]
    BridgeApprovalMismatch { approved: ChainId, requested: ChainId },

    #[error("bridge approval can be cancelled by anyone after {ready_at}")]
    CancelCooldownActive { ready_at: u64 },

    #[error("manager may not request a bridge approval before {until}")]
    ManagerLockout { until: u64 },

    #[error("manager fees on holding {token_id} can be levied again at {ready_at}")]
    ManagerLevyTooSoon { token_id: TokenId, ready_at: u64 },

    #[error("nested call rejected")]
    Reentrant,

    #[error("unexpected {kind:?}: {reason}")]
    UnexpectedMessage { kind: MessageKind, reason: String },

    /// Retryable handler failure.
    #[error("handler must be retried: {0}")]
    Delivery(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Cpit(#[from] CpitError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),

    #[error(transparent)]
    Redemption(#[from] RedemptionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Budget(#[from] BudgetExhausted),
}

impl VaultError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VaultError::NotInSync => ErrorClass::Staleness,
            VaultError::Delivery(_)
            | VaultError::Budget(_)
            | VaultError::Valuation(ValuationError::BudgetExhausted(_))
            | VaultError::Redemption(RedemptionError::BudgetExhausted(_))
            | VaultError::Transport(TransportError::Delivery(_)) => ErrorClass::Delivery,
            VaultError::Ledger(e) if e.is_governance() => ErrorClass::Governance,
            _ => ErrorClass::Precondition,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(VaultError::NotInSync.class(), ErrorClass::Staleness);
        assert_eq!(VaultError::Closed.class(), ErrorClass::Precondition);
        assert_eq!(
            VaultError::from(LedgerError::NotAnIncrease).class(),
            ErrorClass::Governance
        );
        assert_eq!(
            VaultError::from(LedgerError::HoldingNotFound(9)).class(),
            ErrorClass::Precondition
        );
        assert!(VaultError::from(BudgetExhausted { needed: 2, remaining: 1 }).is_retryable());
        assert_eq!(
            VaultError::from(RegistryError::Paused).class(),
            ErrorClass::Precondition
        );
    }
}
