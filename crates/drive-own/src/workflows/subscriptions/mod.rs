//! Subscription lifecycle, payment ledger, and claims adjudication.
//!
//! The rule modules (`pricing`, `delinquency`, `lifecycle`, `claims`, `ledger`) are pure;
//! [`SubscriptionEngine`] reads records through a [`RecordStore`], applies the rules, and
//! writes the results back under per-record locks.

pub mod claims;
pub mod commands;
pub mod delinquency;
pub mod domain;
pub mod ledger;
pub mod lifecycle;
mod locks;
pub mod policy;
pub mod pricing;
pub mod repository;
mod retry;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use claims::{ClaimDecision, ClaimEffect};
pub use commands::{ClaimSubmission, SubscriptionApplication, VehicleRegistration};
pub use delinquency::{DelinquencyAssessment, DelinquencyBand, LateFeeDue};
pub use domain::{
    Cadence, Claim, ClaimId, ClaimStatus, ClaimType, CustomerId, Payment, PaymentId,
    PaymentStatus, PaymentType, Subscription, SubscriptionId, SubscriptionStatus, TermMonths,
    Vehicle, VehicleId, VehiclePricingOverrides, VehicleStatus,
};
pub use ledger::PaymentRequest;
pub use lifecycle::{NextAction, TerminationReason};
pub use policy::EffectivePolicy;
pub use pricing::{BuyoutQuote, RecurringCharge};
pub use repository::{
    LifecycleAlert, LifecycleNotifier, NoopNotifier, NotifyError, PaymentCommit, RecordStore,
    StoreError,
};
pub use router::subscription_router;
pub use service::{
    Clock, EngineError, ErrorKind, EvaluationReport, FixedClock, SubscriptionEngine, SystemClock,
};
pub use store::InMemoryRecordStore;
