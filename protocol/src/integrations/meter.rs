//! Explicit execution budget.
//!
//! Inbound handlers run under the destination-gas allowance their message
//! paid for. Rather than guessing from a failed call whether it ran out of
//! resources, work is charged against this meter and exhaustion is a
//! distinct, typed error the handler can act on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("execution budget exhausted: needed {needed}, remaining {remaining}")]
pub struct BudgetExhausted {
    pub needed: u64,
    pub remaining: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionMeter {
    limit: u64,
    used: u64,
}

impl ExecutionMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Charges `cost`. On failure nothing is charged.
    pub fn charge(&mut self, cost: u64) -> Result<(), BudgetExhausted> {
        if cost > self.remaining() {
            return Err(BudgetExhausted {
                needed: cost,
                remaining: self.remaining(),
            });
        }
        self.used += cost;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_until_exhausted() {
        let mut m = ExecutionMeter::new(100);
        m.charge(60).unwrap();
        assert_eq!(m.remaining(), 40);
        let err = m.charge(41).unwrap_err();
        assert_eq!(err, BudgetExhausted { needed: 41, remaining: 40 });
        assert_eq!(m.used(), 60);
    }
}
