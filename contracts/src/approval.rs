//! Single-use bridge approval.
//!
//! The parent grants a vault permission to bridge out to exactly one
//! chain. The manager consumes it once; it is cleared on use. An unused
//! approval can be cancelled by the manager at any time, or by anyone once
//! the cooldown has passed.

use crossvault_protocol::{Address, ChainId};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeApproval {
    approved_for: Option<ChainId>,
    granted_at: u64,
}

impl BridgeApproval {
    pub fn grant(&mut self, dst_chain: ChainId, now: u64) {
        self.approved_for = Some(dst_chain);
        self.granted_at = now;
    }

    pub fn is_approved(&self) -> bool {
        self.approved_for.is_some()
    }

    pub fn approved_for(&self) -> Option<ChainId> {
        self.approved_for
    }

    pub fn granted_at(&self) -> u64 {
        self.granted_at
    }

    /// Uses the approval. Returns the chain it was granted for.
    pub fn consume(&mut self) -> Result<ChainId, VaultError> {
        let dst = self.approved_for.take().ok_or(VaultError::NoBridgeApproval)?;
        self.granted_at = 0;
        Ok(dst)
    }

    /// Cancels an unused approval on behalf of `caller`.
    pub fn cancel(
        &mut self,
        caller: Address,
        manager: Address,
        now: u64,
        cooldown: u64,
    ) -> Result<(), VaultError> {
        if self.approved_for.is_none() {
            return Err(VaultError::NoBridgeApproval);
        }
        let ready_at = self.granted_at.saturating_add(cooldown);
        if caller != manager && now < ready_at {
            return Err(VaultError::CancelCooldownActive { ready_at });
        }
        self.approved_for = None;
        self.granted_at = 0;
        Ok(())
    }
}
