//! Pure money calculations. Every output is rounded to cents, half-up.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::policy::LateFeeSchedule;

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Tax-inclusive breakdown of one recurring charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringCharge {
    pub base: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// `base_rate` must be non-negative; callers validate vehicle rates on registration.
pub fn compute_recurring_charge(base_rate: Decimal, tax_rate: Decimal) -> RecurringCharge {
    let base = round_money(base_rate);
    let tax = round_money(base * tax_rate);
    RecurringCharge {
        base,
        tax,
        total: base + tax,
    }
}

pub fn compute_early_buyout(remaining_balance: Decimal, multiplier: Decimal) -> Decimal {
    round_money(remaining_balance.max(Decimal::ZERO) * multiplier)
}

/// Flat fee for a delinquency week; `None` outside the fee weeks.
pub fn compute_late_fee(weeks_delinquent: u32, schedule: &LateFeeSchedule) -> Option<Decimal> {
    schedule.fee_for_week(weeks_delinquent).map(round_money)
}

pub fn compute_platform_fee(amount: Decimal, platform_fee_rate: Decimal) -> Decimal {
    round_money(amount * platform_fee_rate)
}

/// Buyout quote presented before a customer commits to early ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyoutQuote {
    pub remaining_balance: Decimal,
    pub multiplier: Decimal,
    pub amount: Decimal,
}

impl BuyoutQuote {
    pub fn new(price: Decimal, total_paid: Decimal, multiplier: Decimal) -> Self {
        let remaining_balance = round_money((price - total_paid).max(Decimal::ZERO));
        Self {
            remaining_balance,
            multiplier,
            amount: compute_early_buyout(remaining_balance, multiplier),
        }
    }
}
