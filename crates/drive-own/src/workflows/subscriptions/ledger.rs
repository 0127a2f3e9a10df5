use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delinquency::LateFeeDue;
use super::domain::{
    Payment, PaymentId, PaymentStatus, PaymentType, Subscription, SubscriptionId,
    SubscriptionStatus,
};
use super::pricing::{compute_platform_fee, round_money, BuyoutQuote};

/// A caller's request to record money against a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub payment_type: PaymentType,
    pub amount: Decimal,
    /// Token identifying one payment attempt; replays return the original record.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl PaymentRequest {
    pub fn new(payment_type: PaymentType, amount: Decimal) -> Self {
        Self {
            payment_type,
            amount,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerRejected {
    #[error("payment amount must be positive (got {amount})")]
    NonPositiveAmount { amount: Decimal },
    #[error("subscription is {status}; this payment can no longer be recorded")]
    SubscriptionClosed { status: &'static str },
    #[error("buyout of {offered} does not cover the quoted amount {required}")]
    BuyoutShortfall { required: Decimal, offered: Decimal },
}

/// Payment record plus the subscription update that must commit with it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub payment: Payment,
    pub subscription: Option<Subscription>,
}

/// Builds ledger entries; persistence is left to the engine.
#[derive(Debug, Clone)]
pub struct LedgerRecorder {
    platform_fee_rate: Decimal,
}

impl LedgerRecorder {
    pub fn new(platform_fee_rate: Decimal) -> Self {
        Self { platform_fee_rate }
    }

    pub fn prepare(
        &self,
        subscription: &Subscription,
        request: &PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerRejected> {
        let closed = match subscription.status {
            SubscriptionStatus::Terminated => true,
            SubscriptionStatus::Completed | SubscriptionStatus::Rejected => {
                request.payment_type != PaymentType::Refund
            }
            _ => false,
        };
        if closed {
            return Err(LedgerRejected::SubscriptionClosed {
                status: subscription.status.label(),
            });
        }

        let amount = round_money(request.amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerRejected::NonPositiveAmount {
                amount: request.amount,
            });
        }

        let payment_type = request.payment_type;
        let platform_fee = if payment_type.carries_platform_fee() {
            compute_platform_fee(amount, self.platform_fee_rate)
        } else {
            Decimal::ZERO
        };

        let payment = Payment {
            id: PaymentId::generate(),
            subscription_id: subscription.id.clone(),
            payment_type,
            amount,
            platform_fee,
            status: PaymentStatus::Completed,
            refundable: payment_type.is_refundable(),
            idempotency_key: request
                .idempotency_key
                .clone()
                .unwrap_or_else(|| format!("attempt-{}", Uuid::new_v4().simple())),
            delinquency_week: None,
            created_date: now,
        };

        let subscription = payment_type.counts_toward_ownership().then(|| {
            let mut next = subscription.clone();
            next.total_paid += amount;
            next.last_payment_date = Some(now);
            next
        });

        Ok(LedgerEntry {
            payment,
            subscription,
        })
    }

    /// Checks a buyout against the current quote before it is prepared.
    pub fn prepare_buyout(
        &self,
        subscription: &Subscription,
        quote: &BuyoutQuote,
        request: &PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerRejected> {
        let offered = round_money(request.amount);
        if offered < quote.amount {
            return Err(LedgerRejected::BuyoutShortfall {
                required: quote.amount,
                offered,
            });
        }
        self.prepare(subscription, request, now)
    }

    /// A late fee owed but not yet paid; recorded as `pending`.
    pub fn assess_late_fee(
        &self,
        subscription: &Subscription,
        fee: &LateFeeDue,
        now: DateTime<Utc>,
    ) -> Payment {
        Payment {
            id: PaymentId::generate(),
            subscription_id: subscription.id.clone(),
            payment_type: PaymentType::LateFee,
            amount: round_money(fee.amount),
            platform_fee: Decimal::ZERO,
            status: PaymentStatus::Pending,
            refundable: true,
            idempotency_key: late_fee_key(&subscription.id, fee),
            delinquency_week: Some(fee.week),
            created_date: now,
        }
    }
}

/// One key per subscription, due date, and delinquency week.
pub fn late_fee_key(subscription_id: &SubscriptionId, fee: &LateFeeDue) -> String {
    format!(
        "{}:late-fee:{}:week-{}",
        subscription_id,
        fee.due_date.format("%Y%m%dT%H%M%S"),
        fee.week
    )
}

pub fn refund_key(claim_id: &str) -> String {
    format!("claim:{claim_id}:refund")
}

/// Recomputes `total_paid` from completed ownership payments.
pub fn reconcile_total_paid(payments: &[Payment]) -> Decimal {
    payments
        .iter()
        .filter(|payment| {
            payment.status == PaymentStatus::Completed
                && payment.payment_type.counts_toward_ownership()
        })
        .map(|payment| payment.amount)
        .sum()
}

pub fn has_completed_down_payment(payments: &[Payment]) -> bool {
    payments.iter().any(|payment| {
        payment.payment_type == PaymentType::DownPayment
            && payment.status == PaymentStatus::Completed
    })
}
