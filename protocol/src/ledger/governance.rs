//! Manager fee schedule and increase governance.
//!
//! Increases follow announce → 30-day window → commit, so investors always
//! have a month to leave before paying more. The manager may renounce a
//! pending increase at any time before commit. Decreases apply at once.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::LedgerError;
use crate::config::{
    FEE_ANNOUNCEMENT_WINDOW, MAX_PERFORMANCE_FEE_BIPS, MAX_PERFORMANCE_FEE_STEP_BIPS,
    MAX_STREAMING_FEE_BIPS, MAX_STREAMING_FEE_STEP_BIPS,
};

/// The two manager fee rates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub streaming_fee_bips: u32,
    pub performance_fee_bips: u32,
}

impl FeeSchedule {
    pub fn new(streaming_fee_bips: u32, performance_fee_bips: u32) -> Self {
        Self {
            streaming_fee_bips,
            performance_fee_bips,
        }
    }

    /// Checks both rates against the absolute caps.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.streaming_fee_bips > MAX_STREAMING_FEE_BIPS {
            return Err(LedgerError::FeeAboveCap {
                kind: "streaming",
                bips: self.streaming_fee_bips,
                cap: MAX_STREAMING_FEE_BIPS,
            });
        }
        if self.performance_fee_bips > MAX_PERFORMANCE_FEE_BIPS {
            return Err(LedgerError::FeeAboveCap {
                kind: "performance",
                bips: self.performance_fee_bips,
                cap: MAX_PERFORMANCE_FEE_BIPS,
            });
        }
        Ok(())
    }
}

/// A pending increase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAnnouncement {
    pub fees: FeeSchedule,
    pub announced_at: u64,
}

impl FeeAnnouncement {
    pub fn ready_at(&self) -> u64 {
        self.announced_at + FEE_ANNOUNCEMENT_WINDOW
    }
}

/// Current schedule plus at most one pending increase.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeeGovernance {
    current: FeeSchedule,
    pending: Option<FeeAnnouncement>,
}

impl FeeGovernance {
    pub fn new(initial: FeeSchedule) -> Result<Self, LedgerError> {
        initial.validate()?;
        Ok(Self {
            current: initial,
            pending: None,
        })
    }

    pub fn current(&self) -> FeeSchedule {
        self.current
    }

    pub fn pending(&self) -> Option<FeeAnnouncement> {
        self.pending
    }

    /// Announces an increase. Replaces any previous pending announcement
    /// and restarts the window.
    pub fn announce(&mut self, fees: FeeSchedule, now: u64) -> Result<(), LedgerError> {
        fees.validate()?;

        if fees.streaming_fee_bips <= self.current.streaming_fee_bips
            && fees.performance_fee_bips <= self.current.performance_fee_bips
        {
            return Err(LedgerError::NotAnIncrease);
        }

        let streaming_step = fees
            .streaming_fee_bips
            .saturating_sub(self.current.streaming_fee_bips);
        if streaming_step > MAX_STREAMING_FEE_STEP_BIPS {
            return Err(LedgerError::FeeStepTooLarge {
                kind: "streaming",
                step: streaming_step,
                max_step: MAX_STREAMING_FEE_STEP_BIPS,
            });
        }

        let performance_step = fees
            .performance_fee_bips
            .saturating_sub(self.current.performance_fee_bips);
        if performance_step > MAX_PERFORMANCE_FEE_STEP_BIPS {
            return Err(LedgerError::FeeStepTooLarge {
                kind: "performance",
                step: performance_step,
                max_step: MAX_PERFORMANCE_FEE_STEP_BIPS,
            });
        }

        info!(
            streaming = fees.streaming_fee_bips,
            performance = fees.performance_fee_bips,
            "fee increase announced"
        );
        self.pending = Some(FeeAnnouncement {
            fees,
            announced_at: now,
        });
        Ok(())
    }

    /// Applies the pending increase once the window has elapsed.
    pub fn commit(&mut self, now: u64) -> Result<FeeSchedule, LedgerError> {
        let pending = self.pending.ok_or(LedgerError::NoPendingAnnouncement)?;
        if now < pending.ready_at() {
            return Err(LedgerError::AnnouncementWindowOpen {
                ready_at: pending.ready_at(),
            });
        }
        self.current = pending.fees;
        self.pending = None;
        info!(
            streaming = self.current.streaming_fee_bips,
            performance = self.current.performance_fee_bips,
            "fee increase committed"
        );
        Ok(self.current)
    }

    /// Drops the pending increase.
    pub fn renounce(&mut self) -> Result<(), LedgerError> {
        if self.pending.take().is_none() {
            return Err(LedgerError::NoPendingAnnouncement);
        }
        info!("fee increase renounced");
        Ok(())
    }

    /// Lowers one or both fees immediately.
    pub fn decrease(&mut self, fees: FeeSchedule) -> Result<(), LedgerError> {
        if fees.streaming_fee_bips > self.current.streaming_fee_bips
            || fees.performance_fee_bips > self.current.performance_fee_bips
        {
            return Err(LedgerError::NotADecrease);
        }
        self.current = fees;
        Ok(())
    }
}
