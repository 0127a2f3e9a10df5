use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::domain::{
    Claim, ClaimId, Payment, Subscription, SubscriptionId, Vehicle, VehicleId,
};
use super::repository::{PaymentCommit, RecordStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    vehicles: HashMap<VehicleId, Vehicle>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    payments: Vec<Payment>,
    payment_keys: HashMap<String, usize>,
    claims: HashMap<ClaimId, Claim>,
}

/// Process-local record store. All tables sit behind one lock so a payment commit
/// is a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: Mutex<Tables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("record store lock poisoned".to_string()))
    }
}

fn check_version(found: u64, expected: u64) -> Result<(), StoreError> {
    if found == expected {
        Ok(())
    } else {
        Err(StoreError::VersionConflict { expected, found })
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.tables()?.vehicles.get(id).cloned())
    }

    async fn insert_vehicle(&self, vehicle: Vehicle) -> Result<Vehicle, StoreError> {
        let mut tables = self.tables()?;
        if tables.vehicles.contains_key(&vehicle.id) {
            return Err(StoreError::Conflict);
        }
        tables.vehicles.insert(vehicle.id.clone(), vehicle.clone());
        Ok(vehicle)
    }

    async fn update_vehicle(
        &self,
        mut vehicle: Vehicle,
        expected_version: u64,
    ) -> Result<Vehicle, StoreError> {
        let mut tables = self.tables()?;
        let current = tables
            .vehicles
            .get_mut(&vehicle.id)
            .ok_or(StoreError::NotFound)?;
        check_version(current.version, expected_version)?;
        vehicle.version = expected_version + 1;
        *current = vehicle.clone();
        Ok(vehicle)
    }

    async fn subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.tables()?.subscriptions.get(id).cloned())
    }

    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, StoreError> {
        let mut tables = self.tables()?;
        if tables.subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Conflict);
        }
        tables
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        mut subscription: Subscription,
        expected_version: u64,
    ) -> Result<Subscription, StoreError> {
        let mut tables = self.tables()?;
        let current = tables
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or(StoreError::NotFound)?;
        check_version(current.version, expected_version)?;
        subscription.version = expected_version + 1;
        *current = subscription.clone();
        Ok(subscription)
    }

    async fn payments(&self, subscription_id: &SubscriptionId) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .tables()?
            .payments
            .iter()
            .filter(|payment| &payment.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn payment_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .payment_keys
            .get(idempotency_key)
            .and_then(|index| tables.payments.get(*index))
            .cloned())
    }

    async fn commit_payment(
        &self,
        payment: Payment,
        subscription_update: Option<(Subscription, u64)>,
    ) -> Result<PaymentCommit, StoreError> {
        let mut tables = self.tables()?;

        if let Some(existing) = tables
            .payment_keys
            .get(&payment.idempotency_key)
            .and_then(|index| tables.payments.get(*index))
        {
            return Ok(PaymentCommit::Replayed(existing.clone()));
        }

        let owner_version = tables
            .subscriptions
            .get(&payment.subscription_id)
            .map(|subscription| subscription.version)
            .ok_or(StoreError::NotFound)?;

        // Validate everything before the first write.
        let update = match subscription_update {
            Some((mut subscription, expected_version)) => {
                if subscription.id != payment.subscription_id {
                    return Err(StoreError::Conflict);
                }
                check_version(owner_version, expected_version)?;
                subscription.version = expected_version + 1;
                Some(subscription)
            }
            None => None,
        };

        let index = tables.payments.len();
        tables
            .payment_keys
            .insert(payment.idempotency_key.clone(), index);
        tables.payments.push(payment.clone());
        if let Some(subscription) = update {
            tables
                .subscriptions
                .insert(subscription.id.clone(), subscription);
        }

        Ok(PaymentCommit::Recorded(payment))
    }

    async fn claim(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        Ok(self.tables()?.claims.get(id).cloned())
    }

    async fn insert_claim(&self, claim: Claim) -> Result<Claim, StoreError> {
        let mut tables = self.tables()?;
        if tables.claims.contains_key(&claim.id) {
            return Err(StoreError::Conflict);
        }
        tables.claims.insert(claim.id.clone(), claim.clone());
        Ok(claim)
    }

    async fn update_claim(&self, mut claim: Claim, expected_version: u64) -> Result<Claim, StoreError> {
        let mut tables = self.tables()?;
        let current = tables.claims.get_mut(&claim.id).ok_or(StoreError::NotFound)?;
        check_version(current.version, expected_version)?;
        claim.version = expected_version + 1;
        *current = claim.clone();
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::subscriptions::domain::{
        Cadence, CustomerId, PaymentId, PaymentStatus, PaymentType, TermMonths,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn subscription() -> Subscription {
        Subscription::open(
            VehicleId::from("veh-1"),
            CustomerId::from("cus-1"),
            TermMonths::new(3).expect("valid term"),
            Cadence::Weekly,
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).single().expect("valid time"),
        )
    }

    fn payment(subscription: &Subscription, key: &str) -> Payment {
        Payment {
            id: PaymentId::generate(),
            subscription_id: subscription.id.clone(),
            payment_type: PaymentType::DownPayment,
            amount: Decimal::new(1_000, 0),
            platform_fee: Decimal::ZERO,
            status: PaymentStatus::Completed,
            refundable: false,
            idempotency_key: key.to_string(),
            delinquency_week: None,
            created_date: subscription.created_date,
        }
    }

    #[tokio::test]
    async fn updates_require_the_version_that_was_read() {
        let store = InMemoryRecordStore::new();
        let stored = store
            .insert_subscription(subscription())
            .await
            .expect("insert");

        let mut next = stored.clone();
        next.kyc_verified = true;
        let updated = store
            .update_subscription(next.clone(), stored.version)
            .await
            .expect("first update");
        assert_eq!(updated.version, stored.version + 1);

        let stale = store.update_subscription(next, stored.version).await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn replayed_key_applies_nothing() {
        let store = InMemoryRecordStore::new();
        let stored = store
            .insert_subscription(subscription())
            .await
            .expect("insert");

        let mut paid = stored.clone();
        paid.total_paid = Decimal::new(1_000, 0);
        let first = store
            .commit_payment(payment(&stored, "dp-1"), Some((paid.clone(), stored.version)))
            .await
            .expect("commit");
        assert!(!first.is_replay());

        let mut doubled = paid.clone();
        doubled.total_paid = Decimal::new(2_000, 0);
        let second = store
            .commit_payment(payment(&stored, "dp-1"), Some((doubled, stored.version + 1)))
            .await
            .expect("replay");
        assert!(second.is_replay());
        assert_eq!(second.payment().id, first.payment().id);

        let current = store
            .subscription(&stored.id)
            .await
            .expect("read")
            .expect("present");
        assert_eq!(current.total_paid, Decimal::new(1_000, 0));
        assert_eq!(store.payments(&stored.id).await.expect("ledger").len(), 1);
    }

    #[tokio::test]
    async fn stale_commit_leaves_no_partial_state() {
        let store = InMemoryRecordStore::new();
        let stored = store
            .insert_subscription(subscription())
            .await
            .expect("insert");

        let result = store
            .commit_payment(payment(&stored, "dp-1"), Some((stored.clone(), 7)))
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert!(store.payments(&stored.id).await.expect("ledger").is_empty());
        assert!(store.payment_by_key("dp-1").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn payments_need_an_existing_subscription() {
        let store = InMemoryRecordStore::new();
        let orphan = subscription();
        let result = store.commit_payment(payment(&orphan, "dp-1"), None).await;
        assert_eq!(result, Err(StoreError::NotFound));
    }
}
