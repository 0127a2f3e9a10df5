use crate::infra::{parse_date, parse_money, LoggingNotifier};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use clap::Args;
use drive_own::config::{CompletionPolicy, EngineConfig};
use drive_own::error::AppError;
use drive_own::workflows::subscriptions::{
    pricing::compute_recurring_charge, BuyoutQuote, Cadence, ClaimDecision, ClaimSubmission,
    ClaimType, CustomerId, EvaluationReport, FixedClock, InMemoryRecordStore, PaymentRequest,
    PaymentType, SubscriptionApplication, SubscriptionEngine, VehiclePricingOverrides,
    VehicleRegistration,
};
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct QuoteArgs {
    /// Ownership price of the vehicle
    #[arg(long, value_parser = parse_money)]
    pub(crate) price: Decimal,
    /// Base subscription rate for one billing period
    #[arg(long, value_parser = parse_money)]
    pub(crate) rate: Decimal,
    /// Amount already credited toward ownership
    #[arg(long, value_parser = parse_money, default_value = "0")]
    pub(crate) total_paid: Decimal,
    /// Billing cadence the rate applies to (weekly or monthly)
    #[arg(long, default_value = "weekly", value_parser = parse_cadence)]
    pub(crate) cadence: Cadence,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Activation date for the demo subscription (YYYY-MM-DD). Defaults to 2025-03-03.
    #[arg(long, value_parser = parse_date)]
    pub(crate) start: Option<NaiveDate>,
    /// Days to let pass without a payment after activation
    #[arg(long, default_value_t = 35)]
    pub(crate) days_late: u16,
    /// Complete subscriptions automatically once the ownership price is paid
    #[arg(long)]
    pub(crate) auto_complete: bool,
}

fn parse_cadence(raw: &str) -> Result<Cadence, String> {
    Cadence::parse(raw).ok_or_else(|| format!("unknown cadence '{raw}' (expected weekly or monthly)"))
}

pub(crate) fn run_quote(args: QuoteArgs) -> Result<(), AppError> {
    let config = EngineConfig::from_env()?;
    let charge = compute_recurring_charge(args.rate, config.tax_rate);
    let buyout = BuyoutQuote::new(args.price, args.total_paid, config.buyout_multiplier);

    println!("{} charge", args.cadence.label());
    println!(
        "- base {} + tax {} = {}",
        charge.base, charge.tax, charge.total
    );
    println!("Early buyout");
    println!(
        "- remaining balance {} x {} = {}",
        buyout.remaining_balance, buyout.multiplier, buyout.amount
    );
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        start,
        days_late,
        auto_complete,
    } = args;

    let start = start.unwrap_or_else(|| NaiveDate::from_ymd_opt(2025, 3, 3).unwrap_or_default());
    let started_at = Utc.from_utc_datetime(&start.and_hms_opt(9, 0, 0).unwrap_or_default());
    let clock = Arc::new(FixedClock::new(started_at));
    let notifier = Arc::new(LoggingNotifier::default());
    let mut config = EngineConfig::default();
    if auto_complete {
        config.completion = CompletionPolicy::AutoOnFullPayment;
    }
    let engine = SubscriptionEngine::with_clock(
        Arc::new(InMemoryRecordStore::new()),
        notifier.clone(),
        config,
        clock.clone(),
    );

    println!("Subscribe-to-own demo (starting {start})");
    let vehicle = engine
        .register_vehicle(VehicleRegistration {
            vin: "2T1BURHE5JC074326".to_string(),
            year: 2018,
            make: "Toyota".to_string(),
            model: "Corolla".to_string(),
            price: Decimal::new(9_000, 0),
            weekly_subscription: Decimal::new(200, 0),
            monthly_subscription: Decimal::new(800, 0),
            down_payment: Decimal::new(1_000, 0),
            overrides: VehiclePricingOverrides::default(),
        })
        .await?;
    let quote = engine.quote_price(&vehicle.id, Cadence::Weekly).await?;
    println!(
        "- {} ({}) listed at {} | weekly {} + tax {} = {}",
        vehicle.display_name(),
        vehicle.vin,
        vehicle.price,
        quote.base,
        quote.tax,
        quote.total
    );

    let subscription = engine
        .open_subscription(SubscriptionApplication {
            vehicle_id: vehicle.id.clone(),
            customer_id: CustomerId::from("cus-demo"),
            term_months: 4,
            cadence: Cadence::Weekly,
        })
        .await?;
    println!("\nIntake");
    println!("- opened {} -> {}", subscription.id, subscription.status.label());

    engine
        .record_payment(
            &subscription.id,
            PaymentRequest::new(PaymentType::DownPayment, vehicle.down_payment),
        )
        .await?;
    let report = engine.evaluate_subscription(&subscription.id).await?;
    println!(
        "- down payment received before KYC: {} ({:?})",
        report.status.label(),
        report.next_action
    );

    engine.set_kyc_verification(&subscription.id, true).await?;
    let report = engine.evaluate_subscription(&subscription.id).await?;
    print_report("after KYC verification", &report);

    clock.advance(Duration::days(i64::from(days_late)));
    let report = engine.evaluate_subscription(&subscription.id).await?;
    print_report(&format!("{days_late} days without a payment"), &report);
    for fee in &report.late_fees_assessed {
        println!(
            "    late fee week {} -> {} ({})",
            fee.delinquency_week.unwrap_or_default(),
            fee.amount,
            fee.status.label()
        );
    }

    println!("\nClaims");
    let claim = engine
        .submit_claim(ClaimSubmission {
            subscription_id: subscription.id.clone(),
            vehicle_id: vehicle.id.clone(),
            claim_type: ClaimType::Insurance,
            incident_date: engine.now().date_naive(),
            amount: Some(Decimal::new(350, 0)),
            total_loss: false,
            description: "Windshield replacement".to_string(),
        })
        .await?;
    let claim = engine.decide_claim(&claim.id, ClaimDecision::Approved).await?;
    println!("- claim {} -> {}", claim.id, claim.status.label());

    println!("\nBuyout");
    match engine.quote_buyout(&subscription.id).await {
        Ok(quote) => {
            println!(
                "- remaining {} x {} = {}",
                quote.remaining_balance, quote.multiplier, quote.amount
            );
            let payment = engine
                .record_payment(
                    &subscription.id,
                    PaymentRequest::new(PaymentType::Buyout, quote.amount)
                        .with_idempotency_key("demo-buyout"),
                )
                .await?;
            println!(
                "- paid {} (platform fee {})",
                payment.amount, payment.platform_fee
            );
        }
        Err(err) => println!("- buyout unavailable: {err}"),
    }

    let subscription = engine.get_subscription(&subscription.id).await?;
    println!(
        "- final status {} | total paid {}",
        subscription.status.label(),
        subscription.total_paid
    );

    println!("\nLedger");
    for payment in engine.list_payments(&subscription.id).await? {
        println!(
            "- {} {} {} ({})",
            payment.created_date.format("%Y-%m-%d"),
            payment.payment_type.label(),
            payment.amount,
            payment.status.label()
        );
    }

    let events = notifier.events();
    if events.is_empty() {
        println!("\nLifecycle alerts: none dispatched");
    } else {
        println!("\nLifecycle alerts");
        for alert in events {
            println!("- {} -> {}", alert.template, alert.subscription_id);
        }
    }

    Ok(())
}

fn print_report(heading: &str, report: &EvaluationReport) {
    println!("\nEvaluation: {heading}");
    println!(
        "- {} -> {} | weeks delinquent {} | vehicle {}",
        report.previous_status.label(),
        report.status.label(),
        report.weeks_delinquent,
        report.vehicle_status.label()
    );
    if let Some(due) = report.next_due_date {
        println!("- next due {}", due.format("%Y-%m-%d"));
    }
    println!("- next action {:?}", report.next_action);
}
