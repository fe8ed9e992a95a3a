//! Per-session AI credit balance.
//!
//! The balance is never persisted. It is reset lazily to the tier's daily
//! allowance on the first use whose UTC date is later than the period the
//! balance was granted for.

use crate::models::user::SubscriptionTier;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiCredits {
    remaining: u32,
    /// UTC date the current balance was granted for
    period: NaiveDate,
}

impl AiCredits {
    /// Fresh balance for a session starting on `today`.
    pub fn for_tier(tier: SubscriptionTier, daily_allowance: u32, today: NaiveDate) -> Self {
        Self {
            remaining: if tier.has_ai_access() {
                daily_allowance
            } else {
                0
            },
            period: today,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Spend one credit. Returns whether the spend was granted.
    ///
    /// Tiers without AI access are rejected before any reset, so their
    /// balance never changes.
    pub fn try_consume(
        &mut self,
        tier: SubscriptionTier,
        daily_allowance: u32,
        today: NaiveDate,
    ) -> bool {
        if !tier.has_ai_access() {
            return false;
        }

        if today > self.period {
            self.remaining = daily_allowance;
            self.period = today;
        }

        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}
