//! Claims adjudication: `submitted -> under_review -> approved | denied`.
//!
//! Admins may decide a claim straight from `submitted`; `under_review` is an optional
//! manual triage step. Approval never changes subscription status on its own.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{Claim, ClaimStatus, ClaimType, VehicleStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDecision {
    Approved,
    Denied,
}

impl ClaimDecision {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "denied" | "deny" => Some(Self::Denied),
            _ => None,
        }
    }

    const fn status(self) -> ClaimStatus {
        match self {
            Self::Approved => ClaimStatus::Approved,
            Self::Denied => ClaimStatus::Denied,
        }
    }
}

/// Follow-up work produced by an approved claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ClaimEffect {
    /// Credit the subscription's ledger with a `refund` entry.
    IssueRefund { amount: Decimal },
    SetVehicleStatus { status: VehicleStatus },
    /// Total loss: an operator should terminate the subscription.
    RecommendTermination,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimTransitionRejected {
    #[error("claim is already {status}; decisions are final")]
    AlreadyDecided { status: &'static str },
    #[error("claim is {status}; review can only start from submitted")]
    NotSubmitted { status: &'static str },
}

pub fn start_review(claim: &Claim) -> Result<Claim, ClaimTransitionRejected> {
    if claim.status != ClaimStatus::Submitted {
        return Err(ClaimTransitionRejected::NotSubmitted {
            status: claim.status.label(),
        });
    }
    let mut next = claim.clone();
    next.status = ClaimStatus::UnderReview;
    Ok(next)
}

pub fn decide(
    claim: &Claim,
    decision: ClaimDecision,
    now: DateTime<Utc>,
) -> Result<(Claim, Vec<ClaimEffect>), ClaimTransitionRejected> {
    if claim.status.is_terminal() {
        return Err(ClaimTransitionRejected::AlreadyDecided {
            status: claim.status.label(),
        });
    }

    let mut next = claim.clone();
    next.status = decision.status();
    next.decided_date = Some(now);

    let mut effects = Vec::new();
    if decision == ClaimDecision::Approved {
        if claim.claim_type == ClaimType::Insurance {
            if let Some(amount) = claim.amount.filter(|amount| *amount > Decimal::ZERO) {
                effects.push(ClaimEffect::IssueRefund { amount });
            }
        }
        if claim.total_loss {
            effects.push(ClaimEffect::SetVehicleStatus {
                status: VehicleStatus::Maintenance,
            });
            effects.push(ClaimEffect::RecommendTermination);
        }
    }

    Ok((next, effects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::subscriptions::domain::{ClaimId, SubscriptionId, VehicleId};
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single().expect("valid time")
    }

    fn claim(claim_type: ClaimType, amount: Option<Decimal>, total_loss: bool) -> Claim {
        Claim {
            id: ClaimId::from("clm-1"),
            subscription_id: SubscriptionId::from("sub-1"),
            vehicle_id: VehicleId::from("veh-1"),
            claim_type,
            status: ClaimStatus::Submitted,
            incident_date: NaiveDate::from_ymd_opt(2025, 5, 28).expect("valid date"),
            amount,
            total_loss,
            description: "rear bumper".to_string(),
            created_date: now(),
            decided_date: None,
            version: 0,
        }
    }

    #[test]
    fn submitted_claims_can_be_decided_directly() {
        let (decided, effects) = decide(
            &claim(ClaimType::Damage, None, false),
            ClaimDecision::Denied,
            now(),
        )
        .expect("submitted claim can be denied");
        assert_eq!(decided.status, ClaimStatus::Denied);
        assert_eq!(decided.decided_date, Some(now()));
        assert!(effects.is_empty());
    }

    #[test]
    fn reviewed_claims_can_be_decided() {
        let reviewed = start_review(&claim(ClaimType::Damage, None, false)).expect("review");
        assert_eq!(reviewed.status, ClaimStatus::UnderReview);
        let (decided, _) = decide(&reviewed, ClaimDecision::Approved, now()).expect("decide");
        assert_eq!(decided.status, ClaimStatus::Approved);
    }

    #[test]
    fn decisions_are_final() {
        let (decided, _) = decide(
            &claim(ClaimType::Other, None, false),
            ClaimDecision::Approved,
            now(),
        )
        .expect("first decision");
        assert_eq!(
            decide(&decided, ClaimDecision::Denied, now()),
            Err(ClaimTransitionRejected::AlreadyDecided {
                status: "approved"
            })
        );
        assert!(start_review(&decided).is_err());
    }

    #[test]
    fn approved_insurance_claim_issues_refund() {
        let (_, effects) = decide(
            &claim(ClaimType::Insurance, Some(Decimal::new(45_000, 2)), false),
            ClaimDecision::Approved,
            now(),
        )
        .expect("approve");
        assert_eq!(
            effects,
            vec![ClaimEffect::IssueRefund {
                amount: Decimal::new(45_000, 2)
            }]
        );
    }

    #[test]
    fn damage_claims_never_refund() {
        let (_, effects) = decide(
            &claim(ClaimType::Damage, Some(Decimal::new(300, 0)), false),
            ClaimDecision::Approved,
            now(),
        )
        .expect("approve");
        assert!(effects.is_empty());
    }

    #[test]
    fn approved_total_loss_takes_vehicle_out_of_service() {
        let (_, effects) = decide(
            &claim(ClaimType::Insurance, None, true),
            ClaimDecision::Approved,
            now(),
        )
        .expect("approve");
        assert_eq!(
            effects,
            vec![
                ClaimEffect::SetVehicleStatus {
                    status: VehicleStatus::Maintenance
                },
                ClaimEffect::RecommendTermination,
            ]
        );
    }
}
