//! Request payloads accepted by the engine, validated before anything is read or written.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::MAX_ESCALATION_WEEKS;

use super::domain::{
    Cadence, Claim, ClaimId, ClaimStatus, ClaimType, CustomerId, SubscriptionId, TermMonths,
    Vehicle, VehicleId, VehiclePricingOverrides, VehicleStatus,
};
use super::policy::LATE_FEE_WEEKS;
use super::pricing::round_money;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRegistration {
    pub vin: String,
    pub year: u16,
    pub make: String,
    pub model: String,
    pub price: Decimal,
    pub weekly_subscription: Decimal,
    pub monthly_subscription: Decimal,
    pub down_payment: Decimal,
    #[serde(default)]
    pub overrides: VehiclePricingOverrides,
}

impl VehicleRegistration {
    pub fn into_vehicle(self) -> Result<Vehicle, String> {
        let vin = self.vin.trim().to_ascii_uppercase();
        if vin.is_empty() {
            return Err("vin is required".to_string());
        }
        if self.price <= Decimal::ZERO {
            return Err("price must be positive".to_string());
        }
        for (field, value) in [
            ("weekly_subscription", self.weekly_subscription),
            ("monthly_subscription", self.monthly_subscription),
            ("down_payment", self.down_payment),
        ] {
            if value < Decimal::ZERO {
                return Err(format!("{field} must not be negative"));
            }
        }
        validate_overrides(&self.overrides)?;

        Ok(Vehicle {
            id: VehicleId::generate(),
            vin,
            year: self.year,
            make: self.make.trim().to_string(),
            model: self.model.trim().to_string(),
            price: round_money(self.price),
            weekly_subscription: round_money(self.weekly_subscription),
            monthly_subscription: round_money(self.monthly_subscription),
            down_payment: round_money(self.down_payment),
            status: VehicleStatus::Available,
            overrides: self.overrides,
            version: 0,
        })
    }
}

fn validate_overrides(overrides: &VehiclePricingOverrides) -> Result<(), String> {
    if let Some(multiplier) = overrides.buyout_multiplier {
        if multiplier < Decimal::ZERO || multiplier > Decimal::ONE {
            return Err("buyout_multiplier must be between 0 and 1".to_string());
        }
    }
    for (week, fee) in &overrides.late_fees {
        if !LATE_FEE_WEEKS.contains(week) {
            return Err(format!("late fee week {week} is outside weeks 1-4"));
        }
        if *fee < Decimal::ZERO {
            return Err(format!("late fee for week {week} must not be negative"));
        }
    }
    if let Some(weeks) = overrides.suspend_after_weeks {
        if !(1..=MAX_ESCALATION_WEEKS).contains(&weeks) {
            return Err(format!(
                "suspend_after_weeks must be between 1 and {MAX_ESCALATION_WEEKS}"
            ));
        }
    }
    if let Some(weeks) = overrides.recovery_after_weeks {
        if weeks > MAX_ESCALATION_WEEKS {
            return Err(format!(
                "recovery_after_weeks must be at most {MAX_ESCALATION_WEEKS}"
            ));
        }
    }
    Ok(())
}

/// Customer request to subscribe to a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionApplication {
    pub vehicle_id: VehicleId,
    pub customer_id: CustomerId,
    pub term_months: u8,
    pub cadence: Cadence,
}

impl SubscriptionApplication {
    pub fn term(&self) -> Result<TermMonths, String> {
        TermMonths::try_from(self.term_months)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSubmission {
    pub subscription_id: SubscriptionId,
    pub vehicle_id: VehicleId,
    pub claim_type: ClaimType,
    pub incident_date: NaiveDate,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub total_loss: bool,
    #[serde(default)]
    pub description: String,
}

impl ClaimSubmission {
    pub fn into_claim(self, now: DateTime<Utc>) -> Result<Claim, String> {
        if let Some(amount) = self.amount {
            if amount <= Decimal::ZERO {
                return Err("claim amount must be positive when provided".to_string());
            }
        }
        if self.incident_date > now.date_naive() {
            return Err("incident_date cannot be in the future".to_string());
        }

        Ok(Claim {
            id: ClaimId::generate(),
            subscription_id: self.subscription_id,
            vehicle_id: self.vehicle_id,
            claim_type: self.claim_type,
            status: ClaimStatus::Submitted,
            incident_date: self.incident_date,
            amount: self.amount.map(round_money),
            total_loss: self.total_loss,
            description: self.description.trim().to_string(),
            created_date: now,
            decided_date: None,
            version: 0,
        })
    }
}
