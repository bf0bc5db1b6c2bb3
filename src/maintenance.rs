use crate::{
    backend::BookingBackend,
    error::BookingError,
    payment::expire_stale_bookings,
    slot_generator::{generate_slots, GenerationRequest},
};
use chrono::{Days, Local, NaiveDate, NaiveDateTime, Utc};
use futures::future::join_all;
use std::time::Duration;
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveragePolicy {
    /// Number of days, today included, that should have slots.
    pub horizon_days: u32,
    pub slot_duration_minutes: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub created: usize,
    pub failed_resources: Vec<Uuid>,
    pub expired_bookings: Vec<Uuid>,
}

/// Range still missing for a resource whose newest slot starts at `latest`,
/// or `None` when the horizon is already covered.
pub fn coverage_request(
    resource_id: Uuid,
    latest: Option<NaiveDateTime>,
    today: NaiveDate,
    policy: CoveragePolicy,
) -> Option<GenerationRequest> {
    let horizon_end = today.checked_add_days(Days::new(u64::from(policy.horizon_days.max(1) - 1)))?;
    let start_date = match latest {
        Some(latest) if latest.date() >= horizon_end => return None,
        Some(latest) => latest.date().succ_opt()?.max(today),
        None => today,
    };

    Some(GenerationRequest {
        resource_id,
        start_date,
        end_date: horizon_end,
        slot_duration_minutes: policy.slot_duration_minutes,
    })
}

pub fn ensure_resource_coverage<B: BookingBackend>(
    backend: &B,
    resource_id: Uuid,
    today: NaiveDate,
    policy: CoveragePolicy,
) -> Result<usize, BookingError> {
    let latest = backend.latest_slot_start(resource_id)?;
    match coverage_request(resource_id, latest, today, policy) {
        Some(request) => generate_slots(backend, request),
        None => {
            debug!(%resource_id, "Slot coverage already complete");
            Ok(0)
        }
    }
}

/// One maintenance pass: tops up the slot coverage of every resource and,
/// when `pending_hold` is set, expires bookings that never got a receipt.
///
/// Every resource is handled on its own blocking task. A failing resource is
/// logged and reported without affecting the others.
pub async fn run_maintenance<B: BookingBackend>(
    backend: B,
    today: NaiveDate,
    policy: CoveragePolicy,
    pending_hold: Option<chrono::Duration>,
) -> Result<MaintenanceReport, BookingError> {
    let resources = {
        let backend = backend.clone();
        spawn_blocking(move || backend.resources())
            .await
            .map_err(|err| BookingError::Storage(err.to_string()))??
    };

    let tasks = resources.into_iter().map(|resource| {
        let backend = backend.clone();
        let resource_id = resource.id;
        let task = spawn_blocking(move || {
            ensure_resource_coverage(&backend, resource_id, today, policy)
        });
        async move { (resource_id, task.await) }
    });

    let mut report = MaintenanceReport::default();
    for (resource_id, result) in join_all(tasks).await {
        match result {
            Ok(Ok(created)) => report.created += created,
            Ok(Err(err)) => {
                error!(%resource_id, %err, "Slot coverage failed");
                report.failed_resources.push(resource_id);
            }
            Err(err) => {
                error!(%resource_id, %err, "Slot coverage task panicked");
                report.failed_resources.push(resource_id);
            }
        }
    }

    if let Some(hold) = pending_hold {
        let backend = backend.clone();
        report.expired_bookings =
            spawn_blocking(move || expire_stale_bookings(&backend, Utc::now(), hold))
                .await
                .map_err(|err| BookingError::Storage(err.to_string()))??;
    }

    info!(
        created = report.created,
        failed = report.failed_resources.len(),
        expired = report.expired_bookings.len(),
        "Maintenance finished"
    );
    Ok(report)
}

/// Runs `run_maintenance` right away and then every `interval`.
pub fn start_maintenance_job<B: BookingBackend>(
    backend: B,
    policy: CoveragePolicy,
    pending_hold: Option<chrono::Duration>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let today = Local::now().date_naive();
            if let Err(err) = run_maintenance(backend.clone(), today, policy, pending_hold).await {
                error!(%err, "Maintenance run failed");
            }
        }
    })
}
