use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::Vehicle;
use crate::config::{CompletionPolicy, EngineConfig};

/// Delinquency weeks that carry a flat fee; later weeks escalate instead.
pub const LATE_FEE_WEEKS: std::ops::RangeInclusive<u32> = 1..=4;

/// Week to flat late fee table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LateFeeSchedule(BTreeMap<u32, Decimal>);

impl LateFeeSchedule {
    pub fn new(fees: BTreeMap<u32, Decimal>) -> Self {
        Self(
            fees.into_iter()
                .filter(|(week, _)| LATE_FEE_WEEKS.contains(week))
                .collect(),
        )
    }

    pub fn fee_for_week(&self, week: u32) -> Option<Decimal> {
        if !LATE_FEE_WEEKS.contains(&week) {
            return None;
        }
        Some(self.0.get(&week).copied().unwrap_or(Decimal::ZERO))
    }

    /// Applies per-vehicle week overrides on top of this schedule.
    pub fn overlay(&self, overrides: &BTreeMap<u32, Decimal>) -> Self {
        let mut merged = self.0.clone();
        for (week, fee) in overrides {
            if LATE_FEE_WEEKS.contains(week) {
                merged.insert(*week, *fee);
            }
        }
        Self(merged)
    }
}

/// Engine defaults with a single vehicle's overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub tax_rate: Decimal,
    pub platform_fee_rate: Decimal,
    pub buyout_multiplier: Decimal,
    pub late_fees: LateFeeSchedule,
    pub suspend_after_weeks: u32,
    pub recovery_after_weeks: u32,
    pub termination_grace_weeks: u32,
    pub completion: CompletionPolicy,
}

impl EffectivePolicy {
    pub fn resolve(config: &EngineConfig, vehicle: &Vehicle) -> Self {
        let overrides = &vehicle.overrides;
        Self {
            tax_rate: config.tax_rate,
            platform_fee_rate: config.platform_fee_rate,
            buyout_multiplier: overrides
                .buyout_multiplier
                .unwrap_or(config.buyout_multiplier),
            late_fees: LateFeeSchedule::new(config.late_fees.clone()).overlay(&overrides.late_fees),
            suspend_after_weeks: overrides
                .suspend_after_weeks
                .filter(|weeks| *weeks > 0)
                .unwrap_or(config.suspend_after_weeks),
            recovery_after_weeks: overrides
                .recovery_after_weeks
                .unwrap_or(config.recovery_after_weeks),
            termination_grace_weeks: config.termination_grace_weeks,
            completion: config.completion,
        }
    }

    pub fn fleet_default(config: &EngineConfig) -> Self {
        Self {
            tax_rate: config.tax_rate,
            platform_fee_rate: config.platform_fee_rate,
            buyout_multiplier: config.buyout_multiplier,
            late_fees: LateFeeSchedule::new(config.late_fees.clone()),
            suspend_after_weeks: config.suspend_after_weeks,
            recovery_after_weeks: config.recovery_after_weeks,
            termination_grace_weeks: config.termination_grace_weeks,
            completion: config.completion,
        }
    }

    pub fn recovery_week(&self) -> u32 {
        self.suspend_after_weeks.saturating_add(self.recovery_after_weeks)
    }

    pub fn termination_week(&self) -> u32 {
        self.recovery_week().saturating_add(self.termination_grace_weeks)
    }
}
