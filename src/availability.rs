use crate::{
    backend::BookingBackend,
    error::BookingError,
    types::{Resource, SlotWithResource},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub slot_id: Uuid,
    pub price: i64,
    pub is_booked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub price: i64,
    /// Resources without a slot in this window have no entry.
    pub cells: HashMap<Uuid, MatrixCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityMatrix {
    pub business_id: Uuid,
    pub date: NaiveDate,
    pub resources: Vec<Resource>,
    pub rows: Vec<MatrixRow>,
}

/// Groups the slots of one day into time-window rows.
///
/// `slots` is expected in store order; the first slot seen for a window sets
/// the row price. On `now`'s date, windows that already started are dropped.
pub fn build_rows(slots: Vec<SlotWithResource>, date: NaiveDate, now: NaiveDateTime) -> Vec<MatrixRow> {
    let hide_started = date == now.date();
    let mut rows: BTreeMap<(NaiveDateTime, NaiveDateTime), MatrixRow> = BTreeMap::new();

    for SlotWithResource { slot, .. } in slots {
        if slot.start_time.date() != date || (hide_started && slot.start_time < now) {
            continue;
        }
        let row = rows
            .entry((slot.start_time, slot.end_time))
            .or_insert_with(|| MatrixRow {
                start_time: slot.start_time,
                end_time: slot.end_time,
                price: slot.price,
                cells: HashMap::new(),
            });
        row.cells.insert(
            slot.resource_id,
            MatrixCell {
                slot_id: slot.id,
                price: slot.price,
                is_booked: slot.is_booked,
            },
        );
    }
    rows.into_values().collect()
}

/// Availability grid of all resources of a business on `date`, as seen at `now`.
pub fn build_matrix<B: BookingBackend>(
    backend: &B,
    business_id: Uuid,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<AvailabilityMatrix, BookingError> {
    let resources = backend.business_resources(business_id)?;
    let rows = if resources.is_empty() {
        Vec::new()
    } else {
        build_rows(backend.business_slots(business_id, date)?, date, now)
    };

    Ok(AvailabilityMatrix {
        business_id,
        date,
        resources,
        rows,
    })
}
