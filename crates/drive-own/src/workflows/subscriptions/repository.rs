use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{
    Claim, ClaimId, Payment, Subscription, SubscriptionId, Vehicle, VehicleId,
};

/// Outcome of an idempotent payment commit.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentCommit {
    /// The payment and any subscription update were applied together.
    Recorded(Payment),
    /// The idempotency key was already committed; nothing was applied.
    Replayed(Payment),
}

impl PaymentCommit {
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Recorded(payment) | Self::Replayed(payment) => payment,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Generic record store for the four engine entities.
///
/// Updates carry the version the caller read; a mismatch fails with
/// [`StoreError::VersionConflict`] and leaves the record untouched. Stores bump the
/// version on every successful write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, StoreError>;
    async fn insert_vehicle(&self, vehicle: Vehicle) -> Result<Vehicle, StoreError>;
    async fn update_vehicle(
        &self,
        vehicle: Vehicle,
        expected_version: u64,
    ) -> Result<Vehicle, StoreError>;

    async fn subscription(&self, id: &SubscriptionId)
        -> Result<Option<Subscription>, StoreError>;
    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, StoreError>;
    async fn update_subscription(
        &self,
        subscription: Subscription,
        expected_version: u64,
    ) -> Result<Subscription, StoreError>;

    /// Ledger for one subscription in commit order.
    async fn payments(&self, subscription_id: &SubscriptionId) -> Result<Vec<Payment>, StoreError>;
    async fn payment_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>, StoreError>;

    /// Single upsert keyed by `payment.idempotency_key`. Either the payment and the
    /// subscription update both apply or neither does.
    async fn commit_payment(
        &self,
        payment: Payment,
        subscription_update: Option<(Subscription, u64)>,
    ) -> Result<PaymentCommit, StoreError>;

    async fn claim(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError>;
    async fn insert_claim(&self, claim: Claim) -> Result<Claim, StoreError>;
    async fn update_claim(&self, claim: Claim, expected_version: u64) -> Result<Claim, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },
    #[error("record not found")]
    NotFound,
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for lifecycle events handled outside the engine.
pub trait LifecycleNotifier: Send + Sync {
    fn notify(&self, alert: LifecycleAlert) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleAlert {
    pub template: String,
    pub subscription_id: SubscriptionId,
    pub details: BTreeMap<String, String>,
}

impl LifecycleAlert {
    pub const TITLE_TRANSFER: &'static str = "title_transfer";
    pub const COLLECTIONS_FLAGGED: &'static str = "collections_flagged";
    pub const RECOVERY_ELIGIBLE: &'static str = "recovery_eligible";
    pub const CLAIM_TOTAL_LOSS: &'static str = "claim_total_loss";

    pub fn new(template: &str, subscription_id: &SubscriptionId) -> Self {
        Self {
            template: template.to_string(),
            subscription_id: subscription_id.clone(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Notifier that drops every alert; used when no transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl LifecycleNotifier for NoopNotifier {
    fn notify(&self, _alert: LifecycleAlert) -> Result<(), NotifyError> {
        Ok(())
    }
}
