//! # Ledger: Holdings, Shares & Fees
//!
//! The share ledger of a parent vault. Each investor position is a
//! [`Holding`] keyed by token id; two reserved holdings collect fees
//! (manager = 0, protocol = 1). Fees are never charged on a schedule: they
//! are levied lazily whenever something touches a holding, by burning fee
//! shares from the holding and minting them to the reserved holdings.
//!
//! ```text
//! holding.rs     Holding record
//! shares.rs      ShareLedger: issuance, burns, fee levies
//! fees.rs        streaming / performance fee formulas
//! governance.rs  fee schedule and the announce → wait → commit flow
//! ```
//!
//! Invariant: the sum of every holding's shares equals the ledger total,
//! after every operation. Fee levies move shares, they never create them.

pub mod fees;
pub mod governance;
pub mod holding;
pub mod shares;

use thiserror::Error;

use crate::math::MathError;
use crate::types::TokenId;

pub use fees::FeeLevy;
pub use governance::{FeeAnnouncement, FeeGovernance, FeeSchedule};
pub use holding::Holding;
pub use shares::ShareLedger;

/// Errors raised by the share ledger and fee governance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("holding {0} does not exist")]
    HoldingNotFound(TokenId),

    #[error("insufficient shares in holding {token_id}: has {available}, needs {requested}")]
    InsufficientShares {
        token_id: TokenId,
        available: u128,
        requested: u128,
    },

    #[error("holding {0} is reserved for fee collection")]
    ReservedHolding(TokenId),

    #[error("{kind} fee of {bips} bips exceeds cap of {cap} bips")]
    FeeAboveCap {
        kind: &'static str,
        bips: u32,
        cap: u32,
    },

    #[error("{kind} fee increase of {step} bips exceeds the per-announcement step of {max_step} bips")]
    FeeStepTooLarge {
        kind: &'static str,
        step: u32,
        max_step: u32,
    },

    #[error("announced schedule does not increase any fee")]
    NotAnIncrease,

    #[error("schedule is not a decrease; increases must be announced")]
    NotADecrease,

    #[error("no fee increase is pending")]
    NoPendingAnnouncement,

    #[error("fee increase cannot be committed before {ready_at}")]
    AnnouncementWindowOpen { ready_at: u64 },

    #[error("discount of {0} bips is invalid")]
    InvalidDiscount(u32),

    #[error(transparent)]
    Math(#[from] MathError),
}

impl LedgerError {
    /// True for violations of the fee governance bounds.
    pub fn is_governance(&self) -> bool {
        matches!(
            self,
            LedgerError::FeeAboveCap { .. }
                | LedgerError::FeeStepTooLarge { .. }
                | LedgerError::NotAnIncrease
                | LedgerError::NotADecrease
                | LedgerError::NoPendingAnnouncement
                | LedgerError::AnnouncementWindowOpen { .. }
        )
    }
}
