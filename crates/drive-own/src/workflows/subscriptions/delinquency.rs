//! Payment-health derivation. Nothing here is persisted; every evaluation recomputes
//! from the subscription's cadence and billing anchor.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{Cadence, Subscription};
use super::policy::{EffectivePolicy, LATE_FEE_WEEKS};
use super::pricing::compute_late_fee;

/// A flat fee owed for one week of delinquency against one due date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LateFeeDue {
    pub week: u32,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "band", rename_all = "snake_case")]
pub enum DelinquencyBand {
    Current,
    LateFee { week: u32 },
    Escalated {
        recovery_eligible: bool,
        termination_due: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelinquencyAssessment {
    pub weeks_delinquent: u32,
    pub next_due_date: Option<DateTime<Utc>>,
    pub band: DelinquencyBand,
    pub late_fees_due: Vec<LateFeeDue>,
}

impl DelinquencyAssessment {
    pub fn current(next_due_date: Option<DateTime<Utc>>) -> Self {
        Self {
            weeks_delinquent: 0,
            next_due_date,
            band: DelinquencyBand::Current,
            late_fees_due: Vec::new(),
        }
    }

    pub fn is_escalated(&self) -> bool {
        matches!(self.band, DelinquencyBand::Escalated { .. })
    }
}

pub fn next_due_date(cadence: Cadence, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match cadence {
        Cadence::Weekly => anchor.checked_add_signed(Duration::days(7)),
        Cadence::Monthly => anchor.checked_add_months(Months::new(1)),
    }
}

/// Whole weeks into delinquency. The first week starts the moment the due date
/// passes, so 28 days past due is the start of week 5.
pub fn weeks_delinquent(due_date: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    if now <= due_date {
        return 0;
    }
    let days_late = (now - due_date).num_days().max(0);
    u32::try_from(days_late / 7 + 1).unwrap_or(u32::MAX)
}

pub fn assess(
    subscription: &Subscription,
    policy: &EffectivePolicy,
    now: DateTime<Utc>,
) -> DelinquencyAssessment {
    if !subscription.status.is_active_like() {
        return DelinquencyAssessment::current(None);
    }

    let Some(anchor) = subscription.billing_anchor() else {
        return DelinquencyAssessment::current(None);
    };
    let Some(due_date) = next_due_date(subscription.cadence, anchor) else {
        return DelinquencyAssessment::current(None);
    };

    let weeks = weeks_delinquent(due_date, now);
    if weeks == 0 {
        return DelinquencyAssessment::current(Some(due_date));
    }

    let last_fee_week = weeks.min(*LATE_FEE_WEEKS.end()).min(policy.suspend_after_weeks.saturating_sub(1));
    let late_fees_due = (1..=last_fee_week)
        .filter_map(|week| {
            compute_late_fee(week, &policy.late_fees)
                .filter(|amount| *amount > Decimal::ZERO)
                .map(|amount| LateFeeDue {
                    week,
                    amount,
                    due_date,
                })
        })
        .collect();

    let band = if weeks >= policy.suspend_after_weeks {
        DelinquencyBand::Escalated {
            recovery_eligible: weeks >= policy.recovery_week(),
            termination_due: weeks >= policy.termination_week(),
        }
    } else {
        DelinquencyBand::LateFee { week: weeks }
    };

    DelinquencyAssessment {
        weeks_delinquent: weeks,
        next_due_date: Some(due_date),
        band,
        late_fees_due,
    }
}
