//! # Integrations: Valuer, Redeemer & Executor Seams
//!
//! Pricing, redemption and trade execution are pluggable roles. The vault
//! state machines only ever see these traits; the registry maps each asset
//! (or trade kind) to a role *kind*, and [`Integrations`] maps kinds to the
//! live implementations on a chain.
//!
//! ```text
//! meter.rs       explicit execution budget handed to collaborators
//! accountant.rs  sums per-asset valuations into a vault value
//! reference.rs   reference collaborators for devnets and tests
//! ```

pub mod accountant;
pub mod meter;
pub mod reference;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::{AssetBook, AssetError};
use crate::types::AssetId;

pub use accountant::{Accountant, VaultValue};
pub use meter::{BudgetExhausted, ExecutionMeter};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// How an asset is priced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValuerKind {
    PriceFeed,
    LiquidityPosition,
    LendingPosition,
    Derivatives,
}

/// How a slice of an asset is paid out on withdraw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RedeemerKind {
    Transfer,
    LiquidityPosition,
    LendingPosition,
    Derivatives,
}

/// Which integration a manager trade goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutorKind {
    Swap,
    Liquidity,
    Lending,
    Derivatives,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValuationError {
    #[error(transparent)]
    BudgetExhausted(#[from] BudgetExhausted),

    #[error("no valuer registered for asset {0}")]
    NoValuer(AssetId),

    #[error("no price for asset {0}")]
    NoPrice(AssetId),

    #[error("valuation failed: {0}")]
    Failed(String),
}

impl ValuationError {
    /// Whether the failure could be resource exhaustion rather than logic.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, ValuationError::BudgetExhausted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedemptionError {
    #[error("no redeemer registered for asset {0}")]
    NoRedeemer(AssetId),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    BudgetExhausted(#[from] BudgetExhausted),

    #[error("redemption failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("executor {0:?} is not allowed on this chain")]
    NotAllowed(ExecutorKind),

    #[error("no executor registered for {0:?}")]
    NoExecutor(ExecutorKind),

    #[error("output {got} below minimum {min}")]
    InsufficientOutput { got: u128, min: u128 },

    #[error("unsupported trade: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Asset(#[from] AssetError),
}

// ---------------------------------------------------------------------------
// Role types
// ---------------------------------------------------------------------------

/// Value of one asset position, as a min/max band in USD (18 decimals).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetValuation {
    pub min: u128,
    pub max: u128,
}

/// An asset amount leaving the vault towards a withdrawer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub asset: AssetId,
    pub amount: u128,
}

/// A manager trade instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub sell: AssetId,
    pub amount: u128,
    pub buy: AssetId,
    pub min_amount_out: u128,
}

/// Prices an asset balance.
pub trait Valuer: Send + Sync {
    fn value(
        &self,
        asset: &AssetId,
        balance: u128,
        meter: &mut ExecutionMeter,
    ) -> Result<AssetValuation, ValuationError>;
}

/// Pays out a portion of an asset position.
///
/// Withdrawals run in two phases over the same snapshot of enabled assets:
/// every redeemer that declares a pre-phase runs it first, then every
/// redeemer runs its main phase.
pub trait Redeemer: Send + Sync {
    fn has_pre_withdraw(&self) -> bool {
        false
    }

    fn pre_withdraw(
        &self,
        _book: &mut AssetBook,
        _asset: AssetId,
        _portion: u128,
    ) -> Result<Vec<Payout>, RedemptionError> {
        Ok(Vec::new())
    }

    fn withdraw(
        &self,
        book: &mut AssetBook,
        asset: AssetId,
        portion: u128,
    ) -> Result<Vec<Payout>, RedemptionError>;
}

/// Executes a manager trade against a vault's asset book.
pub trait Executor: Send + Sync {
    /// Whether trades through this executor count towards the CPIT window.
    fn requires_cpit(&self) -> bool;

    fn execute(&self, book: &mut AssetBook, trade: &Trade) -> Result<(), ExecutionError>;
}

// ---------------------------------------------------------------------------
// Integrations
// ---------------------------------------------------------------------------

/// Live collaborator implementations available on one chain.
#[derive(Clone, Default)]
pub struct Integrations {
    valuers: HashMap<ValuerKind, Arc<dyn Valuer>>,
    redeemers: HashMap<RedeemerKind, Arc<dyn Redeemer>>,
    executors: HashMap<ExecutorKind, Arc<dyn Executor>>,
}

impl Integrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_valuer(mut self, kind: ValuerKind, valuer: Arc<dyn Valuer>) -> Self {
        self.valuers.insert(kind, valuer);
        self
    }

    pub fn with_redeemer(mut self, kind: RedeemerKind, redeemer: Arc<dyn Redeemer>) -> Self {
        self.redeemers.insert(kind, redeemer);
        self
    }

    pub fn with_executor(mut self, kind: ExecutorKind, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn valuer(&self, kind: ValuerKind) -> Option<&Arc<dyn Valuer>> {
        self.valuers.get(&kind)
    }

    pub fn redeemer(&self, kind: RedeemerKind) -> Option<&Arc<dyn Redeemer>> {
        self.redeemers.get(&kind)
    }

    pub fn executor(&self, kind: ExecutorKind) -> Option<&Arc<dyn Executor>> {
        self.executors.get(&kind)
    }
}

impl fmt::Debug for Integrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integrations")
            .field("valuers", &self.valuers.keys().collect::<Vec<_>>())
            .field("redeemers", &self.redeemers.keys().collect::<Vec<_>>())
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
