use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::claims::{self, ClaimDecision, ClaimEffect, ClaimTransitionRejected};
use super::commands::{ClaimSubmission, SubscriptionApplication, VehicleRegistration};
use super::domain::{
    Cadence, Claim, ClaimId, Payment, PaymentType, Subscription, SubscriptionId,
    SubscriptionStatus, Vehicle, VehicleId, VehicleStatus,
};
use super::ledger::{
    has_completed_down_payment, refund_key, LedgerRecorder, LedgerRejected, PaymentRequest,
};
use super::lifecycle::{
    self, EvaluationInputs, NextAction, SideEffect, TerminationReason, Transition,
    TransitionRejected,
};
use super::locks::KeyedLocks;
use super::policy::EffectivePolicy;
use super::pricing::{compute_recurring_charge, BuyoutQuote, RecurringCharge};
use super::repository::{
    LifecycleAlert, LifecycleNotifier, PaymentCommit, RecordStore, StoreError,
};
use super::retry::ReadRetry;
use crate::config::{CompletionPolicy, EngineConfig};

/// Source of "now" for every time-dependent rule.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for demos and tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// How the presentation layer should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Show the violated rule.
    RuleViolation,
    /// Likely a stale view; prompt a refresh.
    NotFound,
    /// Temporarily unavailable; offer a retry.
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{rule}")]
    StateConflict { rule: String },
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn conflict(rule: impl ToString) -> Self {
        Self::StateConflict {
            rule: rule.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::StateConflict { .. } => ErrorKind::RuleViolation,
            Self::Persistence(StoreError::Conflict) => ErrorKind::RuleViolation,
            Self::NotFound { .. } | Self::Persistence(StoreError::NotFound) => ErrorKind::NotFound,
            Self::Persistence(_) => ErrorKind::Unavailable,
        }
    }

    /// Only store outages and lost optimistic races are safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(StoreError::Unavailable(_) | StoreError::VersionConflict { .. })
        )
    }
}

impl From<TransitionRejected> for EngineError {
    fn from(value: TransitionRejected) -> Self {
        Self::conflict(value)
    }
}

impl From<ClaimTransitionRejected> for EngineError {
    fn from(value: ClaimTransitionRejected) -> Self {
        Self::conflict(value)
    }
}

impl From<LedgerRejected> for EngineError {
    fn from(value: LedgerRejected) -> Self {
        match value {
            LedgerRejected::NonPositiveAmount { .. } => Self::Validation(value.to_string()),
            LedgerRejected::SubscriptionClosed { .. } | LedgerRejected::BuyoutShortfall { .. } => {
                Self::conflict(value)
            }
        }
    }
}

/// Result of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub subscription_id: SubscriptionId,
    pub previous_status: SubscriptionStatus,
    pub status: SubscriptionStatus,
    pub weeks_delinquent: u32,
    pub next_due_date: Option<DateTime<Utc>>,
    pub next_action: NextAction,
    pub vehicle_status: VehicleStatus,
    /// Late-fee entries newly recorded by this cycle.
    pub late_fees_assessed: Vec<Payment>,
}

/// External collections/recovery signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionsEvent {
    RecoveryCompleted,
    PickupScheduled,
}

impl CollectionsEvent {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "recovery_completed" => Some(Self::RecoveryCompleted),
            "pickup_scheduled" => Some(Self::PickupScheduled),
            _ => None,
        }
    }
}

/// Facade over the pricing, ledger, delinquency, lifecycle, and claims rules.
///
/// Every mutation of one subscription runs under that subscription's lock, and store
/// updates carry the version that was read, so two writers never interleave on the same
/// record even across engine instances sharing a store.
pub struct SubscriptionEngine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: EngineConfig,
    ledger: LedgerRecorder,
    retry: ReadRetry,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
}

impl<S, N> SubscriptionEngine<S, N>
where
    S: RecordStore + 'static,
    N: LifecycleNotifier + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: EngineConfig) -> Self {
        Self::with_clock(store, notifier, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        notifier: Arc<N>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            ledger: LedgerRecorder::new(config.platform_fee_rate),
            retry: ReadRetry::new(config.read_retry_attempts, config.read_retry_backoff),
            config,
            locks: KeyedLocks::new(),
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // --- reads -------------------------------------------------------------------------

    pub async fn get_vehicle(&self, id: &VehicleId) -> Result<Vehicle, EngineError> {
        self.retry
            .run("vehicle", || self.store.vehicle(id))
            .await?
            .ok_or_else(|| EngineError::not_found("vehicle", id))
    }

    pub async fn get_subscription(&self, id: &SubscriptionId) -> Result<Subscription, EngineError> {
        self.retry
            .run("subscription", || self.store.subscription(id))
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", id))
    }

    pub async fn get_claim(&self, id: &ClaimId) -> Result<Claim, EngineError> {
        self.retry
            .run("claim", || self.store.claim(id))
            .await?
            .ok_or_else(|| EngineError::not_found("claim", id))
    }

    pub async fn list_payments(&self, id: &SubscriptionId) -> Result<Vec<Payment>, EngineError> {
        self.get_subscription(id).await?;
        Ok(self.retry.run("payments", || self.store.payments(id)).await?)
    }

    // --- pricing -----------------------------------------------------------------------

    pub async fn quote_price(
        &self,
        vehicle_id: &VehicleId,
        cadence: Cadence,
    ) -> Result<RecurringCharge, EngineError> {
        let vehicle = self.get_vehicle(vehicle_id).await?;
        Ok(compute_recurring_charge(
            vehicle.base_rate(cadence),
            self.config.tax_rate,
        ))
    }

    pub async fn quote_buyout(&self, id: &SubscriptionId) -> Result<BuyoutQuote, EngineError> {
        let subscription = self.get_subscription(id).await?;
        if !subscription.status.is_active_like() {
            return Err(EngineError::conflict(format!(
                "subscription is {}; buyout is only offered while active, delinquent or suspended",
                subscription.status.label()
            )));
        }
        let vehicle = self.get_vehicle(&subscription.vehicle_id).await?;
        Ok(self.buyout_quote(&subscription, &vehicle))
    }

    fn buyout_quote(&self, subscription: &Subscription, vehicle: &Vehicle) -> BuyoutQuote {
        let policy = EffectivePolicy::resolve(&self.config, vehicle);
        BuyoutQuote::new(vehicle.price, subscription.total_paid, policy.buyout_multiplier)
    }

    // --- fleet and intake --------------------------------------------------------------

    pub async fn register_vehicle(
        &self,
        registration: VehicleRegistration,
    ) -> Result<Vehicle, EngineError> {
        let vehicle = registration
            .into_vehicle()
            .map_err(EngineError::Validation)?;
        let stored = self.store.insert_vehicle(vehicle).await?;
        info!(vehicle_id = %stored.id, vin = %stored.vin, "vehicle registered");
        Ok(stored)
    }

    pub async fn open_subscription(
        &self,
        application: SubscriptionApplication,
    ) -> Result<Subscription, EngineError> {
        let term = application.term().map_err(EngineError::Validation)?;
        let vehicle = self.get_vehicle(&application.vehicle_id).await?;
        if vehicle.status != VehicleStatus::Available {
            return Err(EngineError::conflict(format!(
                "vehicle {} is {} and cannot take a new subscription",
                vehicle.id,
                vehicle.status.label()
            )));
        }

        let subscription = Subscription::open(
            application.vehicle_id,
            application.customer_id,
            term,
            application.cadence,
            self.now(),
        );
        let stored = self.store.insert_subscription(subscription).await?;
        info!(
            subscription_id = %stored.id,
            vehicle_id = %stored.vehicle_id,
            cadence = stored.cadence.label(),
            term_months = stored.term_months.months(),
            "subscription opened"
        );
        Ok(stored)
    }

    pub async fn set_kyc_verification(
        &self,
        id: &SubscriptionId,
        verified: bool,
    ) -> Result<Subscription, EngineError> {
        let _guard = self.locks.acquire(&subscription_key(id)).await;
        let subscription = self.get_subscription(id).await?;
        if subscription.kyc_verified == verified {
            return Ok(subscription);
        }
        let next = lifecycle::set_kyc_verified(&subscription, verified)?;
        let stored = self
            .store
            .update_subscription(next, subscription.version)
            .await?;
        info!(subscription_id = %id, verified, "kyc verification updated");
        Ok(stored)
    }

    pub async fn reject_subscription(&self, id: &SubscriptionId) -> Result<Subscription, EngineError> {
        let _guard = self.locks.acquire(&subscription_key(id)).await;
        let subscription = self.get_subscription(id).await?;
        let transition = lifecycle::reject(&subscription)?;
        let stored = self
            .store
            .update_subscription(transition.subscription, subscription.version)
            .await?;
        info!(subscription_id = %id, "subscription rejected");
        Ok(stored)
    }

    // --- ledger ------------------------------------------------------------------------

    /// Records one payment. Replaying an idempotency key returns the original record
    /// without applying anything a second time.
    pub async fn record_payment(
        &self,
        id: &SubscriptionId,
        request: PaymentRequest,
    ) -> Result<Payment, EngineError> {
        let _guard = self.locks.acquire(&subscription_key(id)).await;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self
                .retry
                .run("payment", || self.store.payment_by_key(key))
                .await?
            {
                if &existing.subscription_id != id {
                    return Err(EngineError::Validation(format!(
                        "idempotency key {key} belongs to another subscription"
                    )));
                }
                debug!(subscription_id = %id, payment_id = %existing.id, "payment replayed");
                return Ok(existing);
            }
        }

        let subscription = self.get_subscription(id).await?;
        let now = self.now();

        let (entry, completes) = if request.payment_type == PaymentType::Buyout {
            let vehicle = self.get_vehicle(&subscription.vehicle_id).await?;
            let quote = self.buyout_quote(&subscription, &vehicle);
            let completion = lifecycle::complete(&subscription, &vehicle, true)?;
            let mut entry = self
                .ledger
                .prepare_buyout(&subscription, &quote, &request, now)?;
            entry.subscription = Some(completion.subscription);
            (entry, true)
        } else {
            (self.ledger.prepare(&subscription, &request, now)?, false)
        };

        let update = entry
            .subscription
            .clone()
            .map(|next| (next, subscription.version));
        let commit = self.store.commit_payment(entry.payment, update).await?;
        let payment = match commit {
            PaymentCommit::Replayed(payment) => {
                debug!(subscription_id = %id, payment_id = %payment.id, "payment replayed");
                return Ok(payment);
            }
            PaymentCommit::Recorded(payment) => payment,
        };

        info!(
            subscription_id = %id,
            payment_id = %payment.id,
            payment_type = payment.payment_type.label(),
            amount = %payment.amount,
            platform_fee = %payment.platform_fee,
            "payment recorded"
        );

        if completes {
            info!(subscription_id = %id, "subscription completed by buyout");
            self.publish(
                LifecycleAlert::new(LifecycleAlert::TITLE_TRANSFER, id)
                    .detail("vehicle_id", &subscription.vehicle_id)
                    .detail("via", "buyout"),
            );
        } else if self.config.completion == CompletionPolicy::AutoOnFullPayment
            && payment.payment_type.counts_toward_ownership()
            && subscription.status.is_active_like()
        {
            // The payment is committed; a failed follow-up evaluation is picked up by the next cycle.
            if let Err(error) = self.evaluate_locked(id).await {
                warn!(subscription_id = %id, %error, "post-payment evaluation failed");
            }
        }

        Ok(payment)
    }

    // --- lifecycle ---------------------------------------------------------------------

    pub async fn evaluate_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<EvaluationReport, EngineError> {
        let _guard = self.locks.acquire(&subscription_key(id)).await;
        self.evaluate_locked(id).await
    }

    async fn evaluate_locked(&self, id: &SubscriptionId) -> Result<EvaluationReport, EngineError> {
        let subscription = self.get_subscription(id).await?;
        let _vehicle_guard = self
            .locks
            .acquire(&vehicle_key(&subscription.vehicle_id))
            .await;
        let vehicle = self.get_vehicle(&subscription.vehicle_id).await?;
        let payments = self.retry.run("payments", || self.store.payments(id)).await?;

        let policy = EffectivePolicy::resolve(&self.config, &vehicle);
        let now = self.now();
        let evaluation = lifecycle::evaluate(EvaluationInputs {
            subscription: &subscription,
            vehicle: &vehicle,
            has_completed_down_payment: has_completed_down_payment(&payments),
            policy: &policy,
            now,
        });

        let next_action = evaluation.transition.next_action.clone();
        let applied = self
            .apply_transition(&subscription, &vehicle, evaluation.transition, now)
            .await?;

        Ok(EvaluationReport {
            subscription_id: id.clone(),
            previous_status: subscription.status,
            status: applied.subscription.status,
            weeks_delinquent: evaluation.assessment.weeks_delinquent,
            next_due_date: evaluation.assessment.next_due_date,
            next_action,
            vehicle_status: applied.vehicle_status,
            late_fees_assessed: applied.late_fees,
        })
    }

    pub async fn complete_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Subscription, EngineError> {
        let _guard = self.locks.acquire(&subscription_key(id)).await;
        let subscription = self.get_subscription(id).await?;
        let _vehicle_guard = self
            .locks
            .acquire(&vehicle_key(&subscription.vehicle_id))
            .await;
        let vehicle = self.get_vehicle(&subscription.vehicle_id).await?;
        let transition = lifecycle::complete(&subscription, &vehicle, false)?;
        let applied = self
            .apply_transition(&subscription, &vehicle, transition, self.now())
            .await?;
        Ok(applied.subscription)
    }

    pub async fn terminate_subscription(
        &self,
        id: &SubscriptionId,
        reason: TerminationReason,
    ) -> Result<Subscription, EngineError> {
        let _guard = self.locks.acquire(&subscription_key(id)).await;
        self.terminate_locked(id, reason).await
    }

    async fn terminate_locked(
        &self,
        id: &SubscriptionId,
        reason: TerminationReason,
    ) -> Result<Subscription, EngineError> {
        let subscription = self.get_subscription(id).await?;
        let _vehicle_guard = self
            .locks
            .acquire(&vehicle_key(&subscription.vehicle_id))
            .await;
        let vehicle = self.get_vehicle(&subscription.vehicle_id).await?;
        let transition = lifecycle::terminate(&subscription, reason)?;
        let applied = self
            .apply_transition(&subscription, &vehicle, transition, self.now())
            .await?;
        info!(subscription_id = %id, reason = ?reason, "subscription terminated");
        Ok(applied.subscription)
    }

    pub async fn signal_collections(
        &self,
        id: &SubscriptionId,
        event: &str,
    ) -> Result<Subscription, EngineError> {
        let event = CollectionsEvent::parse(event).ok_or_else(|| {
            EngineError::Validation(format!("unknown collections event {event:?}"))
        })?;

        let _guard = self.locks.acquire(&subscription_key(id)).await;
        match event {
            CollectionsEvent::RecoveryCompleted => {
                self.terminate_locked(id, TerminationReason::RecoveryCompleted)
                    .await
            }
            CollectionsEvent::PickupScheduled => {
                let subscription = self.get_subscription(id).await?;
                info!(
                    subscription_id = %id,
                    status = subscription.status.label(),
                    "vehicle pickup scheduled"
                );
                Ok(subscription)
            }
        }
    }

    /// Persists a transition: late fees first, then the vehicle, then the subscription.
    /// A failed subscription write rolls the vehicle back.
    async fn apply_transition(
        &self,
        original: &Subscription,
        vehicle: &Vehicle,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<AppliedTransition, EngineError> {
        let mut late_fees = Vec::new();
        let mut vehicle_target = None;
        for effect in &transition.effects {
            match effect {
                SideEffect::AssessLateFee { fee } => {
                    let assessed = self.ledger.assess_late_fee(original, fee, now);
                    if let PaymentCommit::Recorded(payment) =
                        self.store.commit_payment(assessed, None).await?
                    {
                        info!(
                            subscription_id = %original.id,
                            week = fee.week,
                            amount = %payment.amount,
                            "late fee assessed"
                        );
                        late_fees.push(payment);
                    }
                }
                SideEffect::SetVehicleStatus { status } => vehicle_target = Some(*status),
                _ => {}
            }
        }

        let vehicle_update = match vehicle_target {
            Some(status) if status != vehicle.status => {
                let mut next = vehicle.clone();
                next.status = status;
                Some(self.store.update_vehicle(next, vehicle.version).await?)
            }
            _ => None,
        };

        let subscription = if transition.subscription != *original {
            match self
                .store
                .update_subscription(transition.subscription, original.version)
                .await
            {
                Ok(stored) => stored,
                Err(error) => {
                    if let Some(updated) = &vehicle_update {
                        self.restore_vehicle(updated, vehicle.status).await;
                    }
                    return Err(error.into());
                }
            }
        } else {
            original.clone()
        };

        if subscription.status != original.status {
            info!(
                subscription_id = %subscription.id,
                from = original.status.label(),
                to = subscription.status.label(),
                "subscription status changed"
            );
        }

        for effect in &transition.effects {
            let alert = match effect {
                SideEffect::FlagCollections => {
                    LifecycleAlert::new(LifecycleAlert::COLLECTIONS_FLAGGED, &subscription.id)
                }
                SideEffect::RecoveryEligible => {
                    LifecycleAlert::new(LifecycleAlert::RECOVERY_ELIGIBLE, &subscription.id)
                }
                SideEffect::TransferTitle => {
                    LifecycleAlert::new(LifecycleAlert::TITLE_TRANSFER, &subscription.id)
                        .detail("total_paid", subscription.total_paid)
                }
                SideEffect::AssessLateFee { .. } | SideEffect::SetVehicleStatus { .. } => continue,
            };
            self.publish(alert.detail("vehicle_id", &vehicle.id));
        }

        Ok(AppliedTransition {
            vehicle_status: vehicle_update
                .map(|updated| updated.status)
                .unwrap_or(vehicle.status),
            subscription,
            late_fees,
        })
    }

    async fn restore_vehicle(&self, updated: &Vehicle, status: VehicleStatus) {
        let mut previous = updated.clone();
        previous.status = status;
        match self.store.update_vehicle(previous, updated.version).await {
            Ok(_) => debug!(vehicle_id = %updated.id, "vehicle status rolled back"),
            Err(error) => warn!(
                vehicle_id = %updated.id,
                %error,
                "failed to roll back vehicle status"
            ),
        }
    }

    fn publish(&self, alert: LifecycleAlert) {
        let template = alert.template.clone();
        if let Err(error) = self.notifier.notify(alert) {
            warn!(template = %template, %error, "lifecycle notification failed");
        }
    }

    // --- claims ------------------------------------------------------------------------

    pub async fn submit_claim(&self, submission: ClaimSubmission) -> Result<Claim, EngineError> {
        let claim = submission
            .into_claim(self.now())
            .map_err(EngineError::Validation)?;
        let subscription = self.get_subscription(&claim.subscription_id).await?;
        if subscription.vehicle_id != claim.vehicle_id {
            return Err(EngineError::Validation(format!(
                "vehicle {} is not the vehicle on subscription {}",
                claim.vehicle_id, subscription.id
            )));
        }
        self.get_vehicle(&claim.vehicle_id).await?;

        let stored = self.store.insert_claim(claim).await?;
        info!(
            claim_id = %stored.id,
            subscription_id = %stored.subscription_id,
            total_loss = stored.total_loss,
            "claim submitted"
        );
        Ok(stored)
    }

    pub async fn start_claim_review(&self, id: &ClaimId) -> Result<Claim, EngineError> {
        let _guard = self.locks.acquire(&claim_key(id)).await;
        let claim = self.get_claim(id).await?;
        let next = claims::start_review(&claim)?;
        Ok(self.store.update_claim(next, claim.version).await?)
    }

    /// Final admin decision. Refunds are keyed by claim, so retrying after a failed
    /// claim write never issues a second credit.
    pub async fn decide_claim(
        &self,
        id: &ClaimId,
        decision: ClaimDecision,
    ) -> Result<Claim, EngineError> {
        let _guard = self.locks.acquire(&claim_key(id)).await;
        let claim = self.get_claim(id).await?;
        let now = self.now();
        let (decided, effects) = claims::decide(&claim, decision, now)?;

        for effect in &effects {
            match effect {
                ClaimEffect::IssueRefund { amount } => self.issue_refund(&claim, *amount).await?,
                ClaimEffect::SetVehicleStatus { status } => {
                    self.set_vehicle_status(&claim.vehicle_id, *status).await?
                }
                ClaimEffect::RecommendTermination => self.publish(
                    LifecycleAlert::new(LifecycleAlert::CLAIM_TOTAL_LOSS, &claim.subscription_id)
                        .detail("claim_id", &claim.id)
                        .detail("vehicle_id", &claim.vehicle_id),
                ),
            }
        }

        let stored = self.store.update_claim(decided, claim.version).await?;
        info!(
            claim_id = %id,
            decision = stored.status.label(),
            "claim decided"
        );
        Ok(stored)
    }

    async fn issue_refund(&self, claim: &Claim, amount: Decimal) -> Result<(), EngineError> {
        let _guard = self
            .locks
            .acquire(&subscription_key(&claim.subscription_id))
            .await;
        let subscription = self.get_subscription(&claim.subscription_id).await?;
        let request = PaymentRequest::new(PaymentType::Refund, amount)
            .with_idempotency_key(refund_key(claim.id.as_str()));
        let entry = self.ledger.prepare(&subscription, &request, self.now())?;
        let commit = self.store.commit_payment(entry.payment, None).await?;
        if !commit.is_replay() {
            info!(
                claim_id = %claim.id,
                subscription_id = %claim.subscription_id,
                amount = %amount,
                "claim refund credited"
            );
        }
        Ok(())
    }

    async fn set_vehicle_status(
        &self,
        id: &VehicleId,
        status: VehicleStatus,
    ) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(&vehicle_key(id)).await;
        let vehicle = self.get_vehicle(id).await?;
        if vehicle.status == status {
            return Ok(());
        }
        let mut next = vehicle.clone();
        next.status = status;
        self.store.update_vehicle(next, vehicle.version).await?;
        info!(vehicle_id = %id, status = status.label(), "vehicle status changed");
        Ok(())
    }
}

struct AppliedTransition {
    subscription: Subscription,
    vehicle_status: VehicleStatus,
    late_fees: Vec<Payment>,
}

fn subscription_key(id: &SubscriptionId) -> String {
    format!("subscription:{id}")
}

fn vehicle_key(id: &VehicleId) -> String {
    format!("vehicle:{id}")
}

fn claim_key(id: &ClaimId) -> String {
    format!("claim:{id}")
}
