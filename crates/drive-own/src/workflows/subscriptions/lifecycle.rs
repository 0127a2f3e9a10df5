//! Subscription state machine.
//!
//! Transitions are pure: each function takes the current records and returns the next
//! subscription state together with the side effects the engine must apply. Callers
//! persist the result; nothing here touches the store.
//!
//! ```text
//! pending -> active <-> delinquent -> suspended -> terminated
//!    |         \______________________/
//!    v                    |
//! rejected            completed
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::delinquency::{assess, DelinquencyAssessment, DelinquencyBand, LateFeeDue};
use super::domain::{Subscription, SubscriptionStatus, Vehicle, VehicleStatus};
use super::policy::EffectivePolicy;
use crate::config::CompletionPolicy;

/// Work the engine performs after committing a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    SetVehicleStatus { status: VehicleStatus },
    AssessLateFee { fee: LateFeeDue },
    FlagCollections,
    RecoveryEligible,
    TransferTitle,
}

/// What the presentation layer should prompt for next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextAction {
    AwaitKycVerification,
    AwaitDownPayment,
    VehicleUnavailable { vehicle_status: VehicleStatus },
    AwaitNextPayment,
    CollectLateFees { outstanding_weeks: u32 },
    Collections,
    RecoverVehicle,
    TransferTitle,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: SubscriptionStatus,
    pub subscription: Subscription,
    pub effects: Vec<SideEffect>,
    pub next_action: NextAction,
}

impl Transition {
    fn stay(subscription: &Subscription, next_action: NextAction) -> Self {
        Self {
            from: subscription.status,
            subscription: subscription.clone(),
            effects: Vec::new(),
            next_action,
        }
    }
}

/// Result of an evaluation cycle together with the delinquency it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub transition: Transition,
    pub assessment: DelinquencyAssessment,
}

/// A guard that blocked an explicitly requested transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejected {
    #[error("subscription is {status}; {action} requires {required}")]
    InvalidState {
        action: &'static str,
        status: &'static str,
        required: &'static str,
    },
    #[error("subscription cannot become active without KYC verification")]
    KycNotVerified,
    #[error("subscription cannot become active without a completed down payment")]
    DownPaymentMissing,
    #[error("vehicle is {status} and cannot be claimed by another subscription")]
    VehicleUnavailable { status: &'static str },
    #[error("total paid {total_paid} has not reached the ownership price {price}")]
    OwnershipNotReached { total_paid: Decimal, price: Decimal },
    #[error("kyc verification can only be cleared while the subscription is pending")]
    KycLocked,
}

/// Inputs gathered by the engine for one evaluation cycle.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInputs<'a> {
    pub subscription: &'a Subscription,
    pub vehicle: &'a Vehicle,
    pub has_completed_down_payment: bool,
    pub policy: &'a EffectivePolicy,
    pub now: DateTime<Utc>,
}

/// Activation guard shared by evaluation and the engine's pre-commit vehicle check.
pub fn activation_guard(
    subscription: &Subscription,
    vehicle_status: VehicleStatus,
    has_completed_down_payment: bool,
) -> Result<(), TransitionRejected> {
    if subscription.status != SubscriptionStatus::Pending {
        return Err(TransitionRejected::InvalidState {
            action: "activation",
            status: subscription.status.label(),
            required: "pending",
        });
    }
    if !subscription.kyc_verified {
        return Err(TransitionRejected::KycNotVerified);
    }
    if !has_completed_down_payment {
        return Err(TransitionRejected::DownPaymentMissing);
    }
    if vehicle_status != VehicleStatus::Available {
        return Err(TransitionRejected::VehicleUnavailable {
            status: vehicle_status.label(),
        });
    }
    Ok(())
}

const MAX_SETTLE_STEPS: usize = 4;

/// Runs transitions until the subscription settles, so evaluating again with the same
/// inputs changes nothing. Late-fee effects repeat on every cycle and rely on the ledger's
/// idempotency keys.
pub fn evaluate(inputs: EvaluationInputs<'_>) -> Evaluation {
    let mut current = inputs.subscription.clone();
    let mut vehicle_status = inputs.vehicle.status;
    let mut effects: Vec<SideEffect> = Vec::new();
    let mut last = step(&current, vehicle_status, &inputs);

    for _ in 0..MAX_SETTLE_STEPS {
        for effect in last.0.effects.drain(..) {
            if let SideEffect::SetVehicleStatus { status } = effect {
                vehicle_status = status;
            }
            if !effects.contains(&effect) {
                effects.push(effect);
            }
        }
        if last.0.subscription == current {
            break;
        }
        current = last.0.subscription.clone();
        last = step(&current, vehicle_status, &inputs);
    }

    let (mut transition, assessment) = last;
    transition.from = inputs.subscription.status;
    transition.effects = effects;
    Evaluation {
        transition,
        assessment,
    }
}

fn step(
    subscription: &Subscription,
    vehicle_status: VehicleStatus,
    inputs: &EvaluationInputs<'_>,
) -> (Transition, DelinquencyAssessment) {
    let assessment = assess(subscription, inputs.policy, inputs.now);
    if subscription.status.is_active_like()
        && inputs.policy.completion == CompletionPolicy::AutoOnFullPayment
        && ownership_reached(subscription, inputs.vehicle)
    {
        return (complete_with_title_transfer(subscription), assessment);
    }
    let transition = match subscription.status {
        SubscriptionStatus::Pending => step_pending(subscription, vehicle_status, inputs),
        SubscriptionStatus::Active | SubscriptionStatus::Delinquent => {
            step_billing(subscription, &assessment)
        }
        SubscriptionStatus::Suspended => step_suspended(subscription, &assessment),
        SubscriptionStatus::Completed
        | SubscriptionStatus::Terminated
        | SubscriptionStatus::Rejected => Transition::stay(subscription, NextAction::None),
    };
    (transition, assessment)
}

fn step_pending(
    subscription: &Subscription,
    vehicle_status: VehicleStatus,
    inputs: &EvaluationInputs<'_>,
) -> Transition {
    match activation_guard(subscription, vehicle_status, inputs.has_completed_down_payment) {
        Ok(()) => {
            let mut next = subscription.clone();
            next.status = SubscriptionStatus::Active;
            next.activated_date = Some(inputs.now);
            Transition {
                from: subscription.status,
                subscription: next,
                effects: vec![SideEffect::SetVehicleStatus {
                    status: VehicleStatus::Subscribed,
                }],
                next_action: NextAction::AwaitNextPayment,
            }
        }
        Err(TransitionRejected::KycNotVerified) => {
            Transition::stay(subscription, NextAction::AwaitKycVerification)
        }
        Err(TransitionRejected::DownPaymentMissing) => {
            Transition::stay(subscription, NextAction::AwaitDownPayment)
        }
        Err(_) => Transition::stay(subscription, NextAction::VehicleUnavailable { vehicle_status }),
    }
}

pub fn ownership_reached(subscription: &Subscription, vehicle: &Vehicle) -> bool {
    subscription.total_paid >= vehicle.price
}

fn step_billing(subscription: &Subscription, assessment: &DelinquencyAssessment) -> Transition {
    let mut next = subscription.clone();
    let mut effects: Vec<SideEffect> = assessment
        .late_fees_due
        .iter()
        .cloned()
        .map(|fee| SideEffect::AssessLateFee { fee })
        .collect();

    let next_action = match &assessment.band {
        DelinquencyBand::Current => {
            next.status = SubscriptionStatus::Active;
            NextAction::AwaitNextPayment
        }
        DelinquencyBand::LateFee { week } => {
            next.status = SubscriptionStatus::Delinquent;
            NextAction::CollectLateFees {
                outstanding_weeks: *week,
            }
        }
        DelinquencyBand::Escalated { .. } => {
            next.status = SubscriptionStatus::Suspended;
            effects.push(SideEffect::SetVehicleStatus {
                status: VehicleStatus::Maintenance,
            });
            if !next.collections_flagged {
                next.collections_flagged = true;
                effects.push(SideEffect::FlagCollections);
            }
            NextAction::Collections
        }
    };

    Transition {
        from: subscription.status,
        subscription: next,
        effects,
        next_action,
    }
}

fn mark_recovery_eligible(next: &mut Subscription, effects: &mut Vec<SideEffect>) {
    if !next.recovery_eligible {
        next.recovery_eligible = true;
        effects.push(SideEffect::RecoveryEligible);
    }
}

/// A late payment does not reinstate a suspension. It ends in termination, or in
/// completion once the price is paid under automatic completion.
fn step_suspended(subscription: &Subscription, assessment: &DelinquencyAssessment) -> Transition {
    let mut next = subscription.clone();
    let mut effects = Vec::new();

    let next_action = match &assessment.band {
        DelinquencyBand::Escalated {
            termination_due: true,
            ..
        } => {
            mark_recovery_eligible(&mut next, &mut effects);
            next.status = SubscriptionStatus::Terminated;
            NextAction::None
        }
        DelinquencyBand::Escalated {
            recovery_eligible: true,
            ..
        } => {
            mark_recovery_eligible(&mut next, &mut effects);
            NextAction::RecoverVehicle
        }
        _ => NextAction::Collections,
    };

    Transition {
        from: subscription.status,
        subscription: next,
        effects,
        next_action,
    }
}

fn complete_with_title_transfer(subscription: &Subscription) -> Transition {
    let mut next = subscription.clone();
    next.status = SubscriptionStatus::Completed;
    Transition {
        from: subscription.status,
        subscription: next,
        effects: vec![SideEffect::TransferTitle],
        next_action: NextAction::TransferTitle,
    }
}

/// Explicit completion: a buyout payment, or the final-payment action once the price is met.
pub fn complete(
    subscription: &Subscription,
    vehicle: &Vehicle,
    via_buyout: bool,
) -> Result<Transition, TransitionRejected> {
    if !subscription.status.is_active_like() {
        return Err(TransitionRejected::InvalidState {
            action: "completion",
            status: subscription.status.label(),
            required: "active, delinquent or suspended",
        });
    }
    if !via_buyout && !ownership_reached(subscription, vehicle) {
        return Err(TransitionRejected::OwnershipNotReached {
            total_paid: subscription.total_paid,
            price: vehicle.price,
        });
    }
    Ok(complete_with_title_transfer(subscription))
}

/// Admin KYC denial while the subscription is still pending.
pub fn reject(subscription: &Subscription) -> Result<Transition, TransitionRejected> {
    if subscription.status != SubscriptionStatus::Pending {
        return Err(TransitionRejected::InvalidState {
            action: "rejection",
            status: subscription.status.label(),
            required: "pending",
        });
    }
    let mut next = subscription.clone();
    next.status = SubscriptionStatus::Rejected;
    next.kyc_verified = false;
    Ok(Transition {
        from: subscription.status,
        subscription: next,
        effects: Vec::new(),
        next_action: NextAction::None,
    })
}

pub fn set_kyc_verified(
    subscription: &Subscription,
    verified: bool,
) -> Result<Subscription, TransitionRejected> {
    if subscription.status.is_terminal() {
        return Err(TransitionRejected::InvalidState {
            action: "kyc update",
            status: subscription.status.label(),
            required: "a non-terminal status",
        });
    }
    if !verified && subscription.status != SubscriptionStatus::Pending {
        return Err(TransitionRejected::KycLocked);
    }
    let mut next = subscription.clone();
    next.kyc_verified = verified;
    Ok(next)
}

/// Why an operator or the collections process ends a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    RecoveryCompleted,
    GraceWindowExpired,
    TotalLoss,
}

pub fn terminate(
    subscription: &Subscription,
    reason: TerminationReason,
) -> Result<Transition, TransitionRejected> {
    let allowed = match reason {
        TerminationReason::TotalLoss => subscription.status.is_active_like(),
        TerminationReason::RecoveryCompleted | TerminationReason::GraceWindowExpired => {
            subscription.status == SubscriptionStatus::Suspended
        }
    };
    if !allowed {
        return Err(TransitionRejected::InvalidState {
            action: "termination",
            status: subscription.status.label(),
            required: match reason {
                TerminationReason::TotalLoss => "active, delinquent or suspended",
                _ => "suspended",
            },
        });
    }

    let mut next = subscription.clone();
    next.status = SubscriptionStatus::Terminated;
    Ok(Transition {
        from: subscription.status,
        subscription: next,
        effects: vec![SideEffect::SetVehicleStatus {
            status: VehicleStatus::Maintenance,
        }],
        next_action: NextAction::None,
    })
}
