use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use drive_own::config::{CompletionPolicy, EngineConfig};
use drive_own::workflows::subscriptions::{
    pricing::{compute_early_buyout, compute_recurring_charge},
    Cadence, CustomerId, FixedClock, InMemoryRecordStore, NoopNotifier, PaymentRequest,
    PaymentType, Subscription, SubscriptionApplication, SubscriptionEngine, SubscriptionStatus,
    Vehicle, VehiclePricingOverrides, VehicleRegistration, VehicleStatus,
};
use rust_decimal::Decimal;

type Engine = SubscriptionEngine<InMemoryRecordStore, NoopNotifier>;

fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0)
        .single()
        .expect("valid time")
}

fn engine(config: EngineConfig) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(opened_at()));
    let engine = SubscriptionEngine::with_clock(
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(NoopNotifier),
        config,
        clock.clone(),
    );
    (engine, clock)
}

fn registration(overrides: VehiclePricingOverrides) -> VehicleRegistration {
    VehicleRegistration {
        vin: "1FTFW1ET5DFC10312".to_string(),
        year: 2019,
        make: "Ford".to_string(),
        model: "F-150".to_string(),
        price: Decimal::new(12_000, 0),
        weekly_subscription: Decimal::new(200, 0),
        monthly_subscription: Decimal::new(780, 0),
        down_payment: Decimal::new(1_500, 0),
        overrides,
    }
}

async fn activate(engine: &Engine, vehicle: &Vehicle) -> Subscription {
    let subscription = engine
        .open_subscription(SubscriptionApplication {
            vehicle_id: vehicle.id.clone(),
            customer_id: CustomerId::from("cus-grace"),
            term_months: 6,
            cadence: Cadence::Weekly,
        })
        .await
        .expect("subscription opens");
    engine
        .set_kyc_verification(&subscription.id, true)
        .await
        .expect("kyc verifies");
    engine
        .record_payment(
            &subscription.id,
            PaymentRequest::new(PaymentType::DownPayment, Decimal::new(1_500, 0)),
        )
        .await
        .expect("down payment records");
    let report = engine
        .evaluate_subscription(&subscription.id)
        .await
        .expect("evaluation runs");
    assert_eq!(report.status, SubscriptionStatus::Active);
    engine
        .get_subscription(&subscription.id)
        .await
        .expect("subscription present")
}

#[test]
fn pricing_rules_hold_for_sample_rates() {
    for cents in [0_i64, 1, 99, 12_345, 20_000, 78_050] {
        let base = Decimal::new(cents, 2);
        let charge = compute_recurring_charge(base, Decimal::new(6, 3));
        assert!(charge.tax >= Decimal::ZERO);
        assert_eq!(charge.total, charge.base + charge.tax);
    }
    assert_eq!(
        compute_early_buyout(Decimal::ZERO, Decimal::new(75, 2)),
        Decimal::ZERO
    );
    assert_eq!(
        compute_early_buyout(Decimal::new(10_001, 2), Decimal::new(75, 2)),
        Decimal::new(7_501, 2)
    );
}

#[tokio::test]
async fn unverified_customer_never_activates() {
    let (engine, clock) = engine(EngineConfig::default());
    let vehicle = engine
        .register_vehicle(registration(VehiclePricingOverrides::default()))
        .await
        .expect("vehicle registers");
    let subscription = engine
        .open_subscription(SubscriptionApplication {
            vehicle_id: vehicle.id.clone(),
            customer_id: CustomerId::from("cus-unverified"),
            term_months: 3,
            cadence: Cadence::Monthly,
        })
        .await
        .expect("subscription opens");

    for _ in 0..3 {
        engine
            .record_payment(
                &subscription.id,
                PaymentRequest::new(PaymentType::DownPayment, Decimal::new(1_500, 0)),
            )
            .await
            .expect("payment records");
        clock.advance(Duration::days(20));
        let report = engine
            .evaluate_subscription(&subscription.id)
            .await
            .expect("evaluation runs");
        assert_eq!(report.status, SubscriptionStatus::Pending);
    }

    let vehicle = engine.get_vehicle(&vehicle.id).await.expect("vehicle");
    assert_eq!(vehicle.status, VehicleStatus::Available);
}

#[tokio::test]
async fn missed_payments_escalate_to_suspension_with_vehicle_overrides() {
    let mut overrides = VehiclePricingOverrides::default();
    overrides.late_fees.insert(1, Decimal::new(40, 0));
    let (engine, clock) = engine(EngineConfig::default());
    let vehicle = engine
        .register_vehicle(registration(overrides))
        .await
        .expect("vehicle registers");
    let subscription = activate(&engine, &vehicle).await;

    clock.advance(Duration::days(35));
    let first = engine
        .evaluate_subscription(&subscription.id)
        .await
        .expect("evaluation runs");
    let second = engine
        .evaluate_subscription(&subscription.id)
        .await
        .expect("evaluation runs");

    assert_eq!(first.weeks_delinquent, 5);
    assert_eq!(first.status, SubscriptionStatus::Suspended);
    assert_eq!(
        (second.status, second.weeks_delinquent),
        (first.status, first.weeks_delinquent)
    );

    let fees: Vec<Decimal> = first
        .late_fees_assessed
        .iter()
        .map(|payment| payment.amount)
        .collect();
    assert_eq!(
        fees,
        vec![
            Decimal::new(40, 0),
            Decimal::new(35, 0),
            Decimal::new(50, 0),
            Decimal::new(75, 0),
        ]
    );

    let vehicle = engine.get_vehicle(&vehicle.id).await.expect("vehicle");
    assert_eq!(vehicle.status, VehicleStatus::Maintenance);

    let late_payment = engine
        .record_payment(
            &subscription.id,
            PaymentRequest::new(PaymentType::RecurringCharge, Decimal::new(20_120, 2)),
        )
        .await
        .expect("suspended subscriptions still accept payments");
    assert_eq!(late_payment.amount, Decimal::new(20_120, 2));
    let report = engine
        .evaluate_subscription(&subscription.id)
        .await
        .expect("evaluation runs");
    assert_eq!(report.status, SubscriptionStatus::Suspended);
}

#[tokio::test]
async fn final_recurring_payment_completes_under_auto_policy() {
    let (engine, _) = engine(EngineConfig {
        completion: CompletionPolicy::AutoOnFullPayment,
        ..EngineConfig::default()
    });
    let vehicle = engine
        .register_vehicle(registration(VehiclePricingOverrides::default()))
        .await
        .expect("vehicle registers");
    let subscription = activate(&engine, &vehicle).await;

    engine
        .record_payment(
            &subscription.id,
            PaymentRequest::new(PaymentType::RecurringCharge, Decimal::new(10_500, 0)),
        )
        .await
        .expect("payment records");

    let subscription = engine
        .get_subscription(&subscription.id)
        .await
        .expect("subscription");
    assert_eq!(subscription.total_paid, Decimal::new(12_000, 0));
    assert_eq!(subscription.status, SubscriptionStatus::Completed);

    let vehicle = engine.get_vehicle(&vehicle.id).await.expect("vehicle");
    assert_eq!(vehicle.status, VehicleStatus::Subscribed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_with_interleaved_fees_keep_total_paid_exact() {
    let (engine, _) = engine(EngineConfig::default());
    let engine = Arc::new(engine);
    let vehicle = engine
        .register_vehicle(registration(VehiclePricingOverrides::default()))
        .await
        .expect("vehicle registers");
    let subscription = activate(&engine, &vehicle).await;

    let mut handles = Vec::new();
    for attempt in 0..16_i64 {
        let engine = engine.clone();
        let id = subscription.id.clone();
        handles.push(tokio::spawn(async move {
            let request = if attempt % 4 == 0 {
                PaymentRequest::new(PaymentType::FinanceFee, Decimal::new(1_000, 2))
            } else {
                PaymentRequest::new(PaymentType::RecurringCharge, Decimal::new(20_000 + attempt, 2))
            };
            engine.record_payment(&id, request).await
        }));
    }

    let mut ownership_sum = Decimal::new(1_500, 0);
    for handle in handles {
        let payment = handle.await.expect("task joins").expect("payment records");
        if payment.payment_type.counts_toward_ownership() {
            ownership_sum += payment.amount;
        }
    }

    let subscription = engine
        .get_subscription(&subscription.id)
        .await
        .expect("subscription");
    assert_eq!(subscription.total_paid, ownership_sum);
    let ledger = engine
        .list_payments(&subscription.id)
        .await
        .expect("ledger");
    assert_eq!(ledger.len(), 17);
}
