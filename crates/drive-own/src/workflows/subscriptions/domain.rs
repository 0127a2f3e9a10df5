use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

record_id!(
    /// Opaque identifier of a fleet vehicle in the record store.
    VehicleId,
    "veh"
);
record_id!(
    /// Opaque identifier of a subscription.
    SubscriptionId,
    "sub"
);
record_id!(PaymentId, "pay");
record_id!(ClaimId, "clm");
record_id!(CustomerId, "cus");

/// Fleet availability of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Subscribed,
    Maintenance,
    Suspended,
}

impl VehicleStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Subscribed => "subscribed",
            Self::Maintenance => "maintenance",
            Self::Suspended => "suspended",
        }
    }
}

/// Per-vehicle policy dials editable by operators ("per car / per week").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehiclePricingOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyout_multiplier: Option<Decimal>,
    /// Week of delinquency (1-4) to flat fee.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub late_fees: BTreeMap<u32, Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_after_weeks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_after_weeks: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub vin: String,
    pub year: u16,
    pub make: String,
    pub model: String,
    /// Total ownership price.
    pub price: Decimal,
    pub weekly_subscription: Decimal,
    pub monthly_subscription: Decimal,
    pub down_payment: Decimal,
    pub status: VehicleStatus,
    #[serde(default)]
    pub overrides: VehiclePricingOverrides,
    #[serde(default)]
    pub version: u64,
}

impl Vehicle {
    pub fn base_rate(&self, cadence: Cadence) -> Decimal {
        match cadence {
            Cadence::Weekly => self.weekly_subscription,
            Cadence::Monthly => self.monthly_subscription,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

/// Billing frequency for recurring charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Some(Self::Weekly),
            "monthly" | "month" => Some(Self::Monthly),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Subscription term length; only 3 to 6 months are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct TermMonths(u8);

impl TermMonths {
    pub const ALLOWED: [u8; 4] = [3, 4, 5, 6];

    pub fn new(months: u8) -> Option<Self> {
        Self::ALLOWED.contains(&months).then_some(Self(months))
    }

    pub const fn months(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for TermMonths {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("term_months must be one of 3, 4, 5, 6 (got {value})"))
    }
}

impl From<TermMonths> for u8 {
    fn from(value: TermMonths) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Delinquent,
    Suspended,
    Terminated,
    Completed,
    Rejected,
}

impl SubscriptionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Delinquent => "delinquent",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// States in which the customer holds the vehicle and billing runs.
    pub const fn is_active_like(self) -> bool {
        matches!(self, Self::Active | Self::Delinquent | Self::Suspended)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Completed | Self::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub vehicle_id: VehicleId,
    pub customer_id: CustomerId,
    pub term_months: TermMonths,
    pub cadence: Cadence,
    pub status: SubscriptionStatus,
    pub kyc_verified: bool,
    /// Sum of completed down payment and recurring charge amounts.
    pub total_paid: Decimal,
    pub last_payment_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collections_flagged: bool,
    #[serde(default)]
    pub recovery_eligible: bool,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Subscription {
    pub fn open(
        vehicle_id: VehicleId,
        customer_id: CustomerId,
        term_months: TermMonths,
        cadence: Cadence,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::generate(),
            vehicle_id,
            customer_id,
            term_months,
            cadence,
            status: SubscriptionStatus::Pending,
            kyc_verified: false,
            total_paid: Decimal::ZERO,
            last_payment_date: None,
            activated_date: None,
            collections_flagged: false,
            recovery_eligible: false,
            created_date: now,
            version: 0,
        }
    }

    /// The point the billing clock runs from: the later of activation and the last
    /// qualifying payment.
    pub fn billing_anchor(&self) -> Option<DateTime<Utc>> {
        match (self.last_payment_date, self.activated_date) {
            (Some(paid), Some(activated)) => Some(paid.max(activated)),
            (paid, activated) => paid.or(activated),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    DownPayment,
    RecurringCharge,
    LateFee,
    FinanceFee,
    Buyout,
    Refund,
}

impl PaymentType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "down_payment" => Some(Self::DownPayment),
            "recurring_charge" => Some(Self::RecurringCharge),
            "late_fee" => Some(Self::LateFee),
            "finance_fee" => Some(Self::FinanceFee),
            "buyout" => Some(Self::Buyout),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::DownPayment => "down_payment",
            Self::RecurringCharge => "recurring_charge",
            Self::LateFee => "late_fee",
            Self::FinanceFee => "finance_fee",
            Self::Buyout => "buyout",
            Self::Refund => "refund",
        }
    }

    /// Platform fee applies to recurring and buyout charges only.
    pub const fn carries_platform_fee(self) -> bool {
        matches!(self, Self::RecurringCharge | Self::Buyout)
    }

    /// Types that count toward `total_paid` and reset the delinquency clock.
    pub const fn counts_toward_ownership(self) -> bool {
        matches!(self, Self::DownPayment | Self::RecurringCharge)
    }

    pub const fn is_refundable(self) -> bool {
        !matches!(self, Self::DownPayment | Self::FinanceFee)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Immutable ledger entry owned by a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub subscription_id: SubscriptionId,
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub status: PaymentStatus,
    pub refundable: bool,
    pub idempotency_key: String,
    /// Delinquency week a late fee was assessed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delinquency_week: Option<u32>,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Damage,
    Insurance,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Submitted,
    UnderReview,
    Approved,
    Denied,
}

impl ClaimStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Denied)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub subscription_id: SubscriptionId,
    pub vehicle_id: VehicleId,
    pub claim_type: ClaimType,
    pub status: ClaimStatus,
    pub incident_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub total_loss: bool,
    #[serde(default)]
    pub description: String,
    pub created_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}
