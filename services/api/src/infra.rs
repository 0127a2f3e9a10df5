use chrono::NaiveDate;
use drive_own::workflows::subscriptions::{LifecycleAlert, LifecycleNotifier, NotifyError};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Logs every lifecycle alert and keeps a copy for the demo transcript.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotifier {
    events: Arc<Mutex<Vec<LifecycleAlert>>>,
}

impl LifecycleNotifier for LoggingNotifier {
    fn notify(&self, alert: LifecycleAlert) -> Result<(), NotifyError> {
        info!(
            template = %alert.template,
            subscription_id = %alert.subscription_id,
            details = ?alert.details,
            "lifecycle alert"
        );
        let mut guard = self
            .events
            .lock()
            .map_err(|_| NotifyError::Transport("alert log poisoned".to_string()))?;
        guard.push(alert);
        Ok(())
    }
}

impl LoggingNotifier {
    pub(crate) fn events(&self) -> Vec<LifecycleAlert> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_money(raw: &str) -> Result<Decimal, String> {
    let value: Decimal = raw
        .trim()
        .parse()
        .map_err(|err| format!("failed to parse '{raw}' as an amount ({err})"))?;
    if value.is_sign_negative() {
        return Err(format!("amount '{raw}' must not be negative"));
    }
    Ok(value)
}
