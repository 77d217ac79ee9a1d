// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Crossvault Protocol: Core Library
//!
//! Crossvault runs one logical investment vault across several chains: the
//! shares live on a canonical *parent* chain, the assets are spread over any
//! number of *child* chains, and the two sides talk only through
//! asynchronous, possibly-retried messages. This crate holds everything the
//! vault state machines lean on but that does not itself know what a vault
//! is.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants. Every magic number lives there.
//! - **types**: Addresses, chain ids, vault references.
//! - **math**: Wide `mul_div` so share math never silently overflows.
//! - **registry**: Per-chain configuration directory and pause switch.
//! - **cpit**: Rolling 24h price-impact circuit breaker.
//! - **ledger**: Holdings, share issuance and fee accrual.
//! - **assets**: A vault's asset balances and enabled-asset set.
//! - **integrations**: Valuer / Redeemer / Executor seams plus reference
//!   implementations used by the devnet and tests.
//! - **transport**: Message codec, gas descriptors, outbound gateway.
//! - **relay**: In-memory messaging endpoint and bridge service.
//!
//! ## Design Philosophy
//!
//! 1. Money math is checked. Overflow is an error, never a wrap.
//! 2. Remote data is cached with a timestamp and treated as stale once it
//!    ages out. Stale data makes operations fail, it is never used silently.
//! 3. The external collaborators (pricing, redemption, trading) are traits.
//!    Nothing here assumes how a particular integration works.

pub mod assets;
pub mod config;
pub mod cpit;
pub mod integrations;
pub mod ledger;
pub mod math;
pub mod registry;
pub mod relay;
pub mod transport;
pub mod types;

pub use types::{Address, AssetId, ChainId, TokenId, VaultRef};
