use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::workflows::subscriptions::domain::{
    Cadence, Claim, ClaimId, CustomerId, Payment, PaymentType, Subscription, SubscriptionId,
    SubscriptionStatus, Vehicle, VehicleId, VehiclePricingOverrides,
};
use crate::workflows::subscriptions::repository::{
    LifecycleAlert, LifecycleNotifier, NotifyError, PaymentCommit, RecordStore, StoreError,
};
use crate::workflows::subscriptions::{
    subscription_router, FixedClock, InMemoryRecordStore, PaymentRequest,
    SubscriptionApplication, SubscriptionEngine, VehicleRegistration,
};

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0)
        .single()
        .expect("valid time")
}

pub(super) fn dollars(amount: i64) -> Decimal {
    Decimal::new(amount, 0)
}

pub(super) fn cents(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

pub(super) fn registration() -> VehicleRegistration {
    VehicleRegistration {
        vin: "2T1BURHE5JC074326".to_string(),
        year: 2018,
        make: "Toyota".to_string(),
        model: "Corolla".to_string(),
        price: dollars(9_000),
        weekly_subscription: dollars(200),
        monthly_subscription: dollars(800),
        down_payment: dollars(1_000),
        overrides: VehiclePricingOverrides::default(),
    }
}

pub(super) fn application(vehicle: &Vehicle) -> SubscriptionApplication {
    SubscriptionApplication {
        vehicle_id: vehicle.id.clone(),
        customer_id: CustomerId::from("cus-ada"),
        term_months: 4,
        cadence: Cadence::Weekly,
    }
}

pub(super) type MemoryEngine = SubscriptionEngine<InMemoryRecordStore, MemoryNotifier>;

pub(super) struct Harness {
    pub(super) engine: Arc<MemoryEngine>,
    pub(super) store: Arc<InMemoryRecordStore>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) clock: Arc<FixedClock>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub(super) fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryRecordStore::new());
        let notifier = Arc::new(MemoryNotifier::default());
        let clock = Arc::new(FixedClock::new(start()));
        let engine = Arc::new(SubscriptionEngine::with_clock(
            store.clone(),
            notifier.clone(),
            config,
            clock.clone(),
        ));
        Self {
            engine,
            store,
            notifier,
            clock,
        }
    }

    pub(super) fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    pub(super) async fn vehicle(&self) -> Vehicle {
        self.engine
            .register_vehicle(registration())
            .await
            .expect("vehicle registers")
    }

    pub(super) async fn pending(&self, vehicle: &Vehicle) -> Subscription {
        self.engine
            .open_subscription(application(vehicle))
            .await
            .expect("subscription opens")
    }

    pub(super) async fn pay(
        &self,
        id: &SubscriptionId,
        payment_type: PaymentType,
        amount: Decimal,
    ) -> Payment {
        self.engine
            .record_payment(id, PaymentRequest::new(payment_type, amount))
            .await
            .expect("payment records")
    }

    /// Registers a vehicle and walks a subscription through KYC, down payment, and activation.
    pub(super) async fn active(&self) -> (Vehicle, Subscription) {
        let vehicle = self.vehicle().await;
        let subscription = self.pending(&vehicle).await;
        self.engine
            .set_kyc_verification(&subscription.id, true)
            .await
            .expect("kyc verifies");
        self.pay(&subscription.id, PaymentType::DownPayment, dollars(1_000))
            .await;
        let report = self
            .engine
            .evaluate_subscription(&subscription.id)
            .await
            .expect("evaluation runs");
        assert_eq!(report.status, SubscriptionStatus::Active);

        let subscription = self
            .engine
            .get_subscription(&subscription.id)
            .await
            .expect("subscription present");
        let vehicle = self
            .engine
            .get_vehicle(&vehicle.id)
            .await
            .expect("vehicle present");
        (vehicle, subscription)
    }

    pub(super) fn router(&self) -> axum::Router {
        subscription_router(self.engine.clone())
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    alerts: Mutex<Vec<LifecycleAlert>>,
}

impl MemoryNotifier {
    pub(super) fn templates(&self) -> Vec<String> {
        self.alerts
            .lock()
            .expect("alert mutex poisoned")
            .iter()
            .map(|alert| alert.template.clone())
            .collect()
    }
}

impl LifecycleNotifier for MemoryNotifier {
    fn notify(&self, alert: LifecycleAlert) -> Result<(), NotifyError> {
        self.alerts
            .lock()
            .expect("alert mutex poisoned")
            .push(alert);
        Ok(())
    }
}

pub(super) struct UnavailableStore;

fn offline<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("database offline".to_string()))
}

#[async_trait]
impl RecordStore for UnavailableStore {
    async fn vehicle(&self, _id: &VehicleId) -> Result<Option<Vehicle>, StoreError> {
        offline()
    }

    async fn insert_vehicle(&self, _vehicle: Vehicle) -> Result<Vehicle, StoreError> {
        offline()
    }

    async fn update_vehicle(&self, _vehicle: Vehicle, _expected: u64) -> Result<Vehicle, StoreError> {
        offline()
    }

    async fn subscription(
        &self,
        _id: &SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        offline()
    }

    async fn insert_subscription(
        &self,
        _subscription: Subscription,
    ) -> Result<Subscription, StoreError> {
        offline()
    }

    async fn update_subscription(
        &self,
        _subscription: Subscription,
        _expected: u64,
    ) -> Result<Subscription, StoreError> {
        offline()
    }

    async fn payments(&self, _id: &SubscriptionId) -> Result<Vec<Payment>, StoreError> {
        offline()
    }

    async fn payment_by_key(&self, _key: &str) -> Result<Option<Payment>, StoreError> {
        offline()
    }

    async fn commit_payment(
        &self,
        _payment: Payment,
        _update: Option<(Subscription, u64)>,
    ) -> Result<PaymentCommit, StoreError> {
        offline()
    }

    async fn claim(&self, _id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        offline()
    }

    async fn insert_claim(&self, _claim: Claim) -> Result<Claim, StoreError> {
        offline()
    }

    async fn update_claim(&self, _claim: Claim, _expected: u64) -> Result<Claim, StoreError> {
        offline()
    }
}

/// Delegates to an in-memory store but fails the first `failures` subscription reads
/// and, when armed, every subscription write.
#[derive(Default)]
pub(super) struct FlakyStore {
    pub(super) inner: InMemoryRecordStore,
    failures: AtomicU32,
    pub(super) subscription_reads: AtomicU32,
    fail_subscription_writes: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    pub(super) fn fail_next_reads(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub(super) fn fail_subscription_writes(&self, fail: bool) {
        self.fail_subscription_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, StoreError> {
        self.inner.vehicle(id).await
    }

    async fn insert_vehicle(&self, vehicle: Vehicle) -> Result<Vehicle, StoreError> {
        self.inner.insert_vehicle(vehicle).await
    }

    async fn update_vehicle(&self, vehicle: Vehicle, expected: u64) -> Result<Vehicle, StoreError> {
        self.inner.update_vehicle(vehicle, expected).await
    }

    async fn subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, StoreError> {
        self.subscription_reads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.subscription(id).await
    }

    async fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, StoreError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn update_subscription(
        &self,
        subscription: Subscription,
        expected: u64,
    ) -> Result<Subscription, StoreError> {
        if self.fail_subscription_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write timed out".to_string()));
        }
        self.inner.update_subscription(subscription, expected).await
    }

    async fn payments(&self, id: &SubscriptionId) -> Result<Vec<Payment>, StoreError> {
        self.inner.payments(id).await
    }

    async fn payment_by_key(&self, key: &str) -> Result<Option<Payment>, StoreError> {
        self.inner.payment_by_key(key).await
    }

    async fn commit_payment(
        &self,
        payment: Payment,
        update: Option<(Subscription, u64)>,
    ) -> Result<PaymentCommit, StoreError> {
        self.inner.commit_payment(payment, update).await
    }

    async fn claim(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        self.inner.claim(id).await
    }

    async fn insert_claim(&self, claim: Claim) -> Result<Claim, StoreError> {
        self.inner.insert_claim(claim).await
    }

    async fn update_claim(&self, claim: Claim, expected: u64) -> Result<Claim, StoreError> {
        self.inner.update_claim(claim, expected).await
    }
}

pub(super) fn fast_retry_config() -> EngineConfig {
    EngineConfig {
        read_retry_backoff: std::time::Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn decimal_field(payload: &Value, field: &str) -> Decimal {
    let raw = &payload[field];
    let text = match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    text.parse().expect("decimal field")
}
