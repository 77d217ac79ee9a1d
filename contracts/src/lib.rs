//! # Crossvault Vault Contracts
//!
//! The vault state machines that run on every chain of a Crossvault
//! deployment:
//!
//! - **Parent vault**: owns the share ledger, caches each child chain's
//!   value, and coordinates deposits, withdrawals, bridging and child
//!   creation.
//! - **Child vault**: holds assets on a remote chain and only acts on
//!   authenticated requests from its parent.
//! - **Chain**: the per-chain runtime: registry, transport, vault factory
//!   and transactional entry points.
//! - **Local network**: several chains wired through the in-memory
//!   relayer, used by the devnet node and the integration tests.
//!
//! ## Design Principles
//!
//! 1. Every entry point is atomic. A failed call or handler leaves neither
//!    state changes nor outbound messages behind.
//! 2. Cross-chain data is cached with the remote timestamp and never used
//!    once stale; operations fail with [`VaultError::NotInSync`] instead.
//! 3. Long-running flows (bridging, withdraw fan-out, child creation) are
//!    guarded by explicit locks that only their own completion clears.
//! 4. All monetary operations are checked.

pub mod approval;
pub mod chain;
pub mod child;
pub mod custody;
pub mod error;
pub mod network;
pub mod parent;
pub mod receive;
pub mod wallet;

pub use approval::BridgeApproval;
pub use chain::{CallContext, Chain, ChainEnv};
pub use child::ChildVault;
pub use error::{ErrorClass, VaultError};
pub use network::{Delivery, LocalNetwork};
pub use parent::{ChainValue, ParentParams, ParentVault, SyncState};
pub use wallet::Wallets;
