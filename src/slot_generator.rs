use crate::{
    backend::BookingBackend,
    error::BookingError,
    pricing::resolve_price,
    types::{day_of_week, NewSlot, PricingRule, Resource, WeeklyScheduleRule},
};
use chrono::{Days, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_SLOT_MINUTES: u32 = 60;
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;
pub const MAX_GENERATION_DAYS: i64 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationRequest {
    pub resource_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub slot_duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationSummary {
    pub removed: usize,
    pub created: usize,
}

/// One rule per weekday, Monday first. Days without a stored rule are closed.
pub fn full_week(resource_id: Uuid, stored: &[WeeklyScheduleRule]) -> Vec<WeeklyScheduleRule> {
    (1..=7)
        .map(|day| {
            stored
                .iter()
                .find(|rule| rule.day_of_week == day)
                .copied()
                .unwrap_or_else(|| WeeklyScheduleRule::closed(resource_id, day))
        })
        .collect()
}

/// End of the opening window on `date`. A close time of 00:00 means midnight
/// at the end of the day.
fn closing_datetime(date: NaiveDate, rule: &WeeklyScheduleRule) -> NaiveDateTime {
    if rule.close_time == NaiveTime::MIN {
        date.and_time(NaiveTime::MIN) + Duration::days(1)
    } else {
        date.and_time(rule.close_time)
    }
}

pub fn validate_schedule(rules: &[WeeklyScheduleRule]) -> Result<(), BookingError> {
    let mut seen = [false; 7];
    for rule in rules {
        if !(1..=7).contains(&rule.day_of_week) {
            return Err(BookingError::Validation(format!(
                "Day {} is outside 1..=7",
                rule.day_of_week
            )));
        }
        let index = usize::from(rule.day_of_week - 1);
        if seen[index] {
            return Err(BookingError::Validation(format!(
                "Day {} is configured twice",
                rule.day_of_week
            )));
        }
        seen[index] = true;

        let anchor = NaiveDate::MIN;
        if rule.is_open && anchor.and_time(rule.open_time) >= closing_datetime(anchor, rule) {
            return Err(BookingError::Validation(format!(
                "Day {} must open before it closes",
                rule.day_of_week
            )));
        }
    }
    Ok(())
}

fn validate_request(request: &GenerationRequest) -> Result<(), BookingError> {
    if request.start_date > request.end_date {
        return Err(BookingError::Validation(format!(
            "Start date {} is after end date {}",
            request.start_date, request.end_date
        )));
    }
    if (request.end_date - request.start_date).num_days() >= MAX_GENERATION_DAYS {
        return Err(BookingError::Validation(format!(
            "Date range exceeds {MAX_GENERATION_DAYS} days"
        )));
    }
    if request.slot_duration_minutes == 0 || request.slot_duration_minutes > MAX_SLOT_MINUTES {
        return Err(BookingError::Validation(format!(
            "Slot duration must be within 1..={MAX_SLOT_MINUTES} minutes"
        )));
    }
    Ok(())
}

/// Plans the slots of every open day in the requested range, grouped by day.
///
/// Nothing is written here, so a missing price fails the whole request before
/// any slot reaches the store.
pub fn plan_slots(
    resource: &Resource,
    schedule: &[WeeklyScheduleRule],
    pricing_rules: &[PricingRule],
    request: &GenerationRequest,
) -> Result<Vec<(NaiveDate, Vec<NewSlot>)>, BookingError> {
    validate_request(request)?;
    let week = full_week(resource.id, schedule);
    let duration = Duration::minutes(i64::from(request.slot_duration_minutes));
    let mut plan = Vec::new();

    for date in request.start_date.iter_days() {
        if date > request.end_date {
            break;
        }
        let day = day_of_week(date);
        let rule = &week[usize::from(day - 1)];
        if !rule.is_open {
            continue;
        }

        let close = closing_datetime(date, rule);
        let mut start = date.and_time(rule.open_time);
        let mut slots = Vec::new();
        while start + duration <= close {
            let end = start + duration;
            let end_of_day_time = if end.date() > date {
                NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
            } else {
                end.time()
            };
            let price = resolve_price(
                pricing_rules,
                day,
                start.time(),
                end_of_day_time,
                resource.base_price,
            )
            .ok_or_else(|| {
                BookingError::Validation(format!(
                    "Resource {} has no base price and no pricing rule covering {start}",
                    resource.id
                ))
            })?;
            slots.push(NewSlot {
                resource_id: resource.id,
                start_time: start,
                end_time: end,
                price,
            });
            start = end;
        }
        if !slots.is_empty() {
            plan.push((date, slots));
        }
    }
    Ok(plan)
}

fn schedule_lookup_failure(resource_id: Uuid, err: BookingError) -> BookingError {
    match err {
        BookingError::NotFound(_) => err,
        other => {
            error!(%resource_id, err = %other, "Schedule lookup failed");
            BookingError::ScheduleLookupFailure {
                resource_id,
                reason: other.to_string(),
            }
        }
    }
}

/// The seven weekday rules of a resource, as shown by date pickers.
pub fn weekly_schedule<B: BookingBackend>(
    backend: &B,
    resource_id: Uuid,
) -> Result<Vec<WeeklyScheduleRule>, BookingError> {
    let stored = backend
        .weekly_schedule(resource_id)
        .map_err(|err| schedule_lookup_failure(resource_id, err))?;
    Ok(full_week(resource_id, &stored))
}

pub fn set_weekly_schedule<B: BookingBackend>(
    backend: &B,
    resource_id: Uuid,
    rules: Vec<WeeklyScheduleRule>,
) -> Result<Vec<WeeklyScheduleRule>, BookingError> {
    validate_schedule(&rules)?;
    let week = full_week(resource_id, &rules)
        .into_iter()
        .map(|rule| WeeklyScheduleRule {
            resource_id,
            ..rule
        })
        .collect::<Vec<_>>();
    backend.replace_weekly_schedule(resource_id, week.clone())?;
    info!(%resource_id, "Weekly schedule replaced");
    Ok(week)
}

/// Reads what the resource needs for planning and plans the request.
fn load_plan<B: BookingBackend>(
    backend: &B,
    request: &GenerationRequest,
) -> Result<Vec<(NaiveDate, Vec<NewSlot>)>, BookingError> {
    validate_request(request)?;
    let resource_id = request.resource_id;
    let resource = backend.resource(resource_id)?;
    let schedule = backend
        .weekly_schedule(resource_id)
        .map_err(|err| schedule_lookup_failure(resource_id, err))?;
    let pricing_rules = backend
        .pricing_rules(resource_id)
        .map_err(|err| schedule_lookup_failure(resource_id, err))?;

    plan_slots(&resource, &schedule, &pricing_rules, request)
}

/// Creates the missing slots of a resource for every day of the range.
///
/// Existing `(resource, start, end)` rows are left untouched, so repeated or
/// overlapping calls only add what is missing. Each day is written atomically.
pub fn generate_slots<B: BookingBackend>(
    backend: &B,
    request: GenerationRequest,
) -> Result<usize, BookingError> {
    let resource_id = request.resource_id;
    let plan = load_plan(backend, &request)?;

    let mut created = 0;
    for (date, slots) in plan {
        let inserted = backend.insert_slots(&slots)?;
        debug!(%resource_id, %date, planned = slots.len(), inserted, "Slots generated");
        created += inserted;
    }
    info!(
        %resource_id,
        start = %request.start_date,
        end = %request.end_date,
        created,
        "Slot generation finished"
    );
    Ok(created)
}

/// Replaces the unbooked slots of the range that start after `now` with slots
/// planned from the current schedule and prices.
///
/// The plan is complete before anything is written, and the swap is a single
/// backend call. Slots that carry booking history are kept.
pub fn regenerate_slots<B: BookingBackend>(
    backend: &B,
    request: GenerationRequest,
    now: NaiveDateTime,
) -> Result<RegenerationSummary, BookingError> {
    let plan = load_plan(backend, &request)?;
    let slots: Vec<NewSlot> = plan.into_iter().flat_map(|(_, slots)| slots).collect();

    let range_start = request.start_date.and_time(NaiveTime::MIN);
    let from = range_start.max(now);
    let until = request
        .end_date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| BookingError::Validation("End date is out of range".into()))?
        .and_time(NaiveTime::MIN);

    let (removed, created) =
        backend.replace_unbooked_slots(request.resource_id, from, until, &slots)?;
    info!(resource_id = %request.resource_id, removed, created, "Slots regenerated");
    Ok(RegenerationSummary { removed, created })
}
