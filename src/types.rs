use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// ISO weekday number of `date`, Monday = 1 ... Sunday = 7.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub field_type: Option<String>,
    /// Default slot price in the smallest currency unit.
    pub base_price: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyScheduleRule {
    pub resource_id: Uuid,
    pub day_of_week: u8,
    pub is_open: bool,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
}

impl WeeklyScheduleRule {
    pub fn closed(resource_id: Uuid, day_of_week: u8) -> Self {
        Self {
            resource_id,
            day_of_week,
            is_open: false,
            open_time: NaiveTime::MIN,
            close_time: NaiveTime::MIN,
        }
    }
}

/// Price override for a resource within a daily time window.
///
/// An empty `days_of_week` applies the rule to every day. When several rules
/// match the same interval the highest `priority` wins, ties going to the most
/// recently created rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub name: String,
    pub price_override: i64,
    pub days_of_week: Vec<u8>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl PricingRule {
    pub fn applies_to_day(&self, day: u8) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&day)
    }

    /// True if the rule window covers any part of `[start, end)`.
    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time < end && start < self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub price: i64,
    pub is_booked: bool,
    pub booking_id: Option<Uuid>,
}

/// A slot that has been planned by the generator but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlot {
    pub resource_id: Uuid,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub price: i64,
}

/// Slot as returned by the business slot query, with the owning resource embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWithResource {
    #[serde(flatten)]
    pub slot: Slot,
    pub resource_name: String,
    pub field_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Submitted,
    Confirmed,
    Rejected,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Submitted => "submitted",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Expired => "expired",
        }
    }

    /// Statuses in which the booking keeps its slot marked as booked.
    pub fn holds_slot(&self) -> bool {
        matches!(
            self,
            BookingStatus::PendingPayment | BookingStatus::Submitted | BookingStatus::Confirmed
        )
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::PendingPayment, BookingStatus::Submitted)
                | (BookingStatus::PendingPayment, BookingStatus::Expired)
                | (BookingStatus::Submitted, BookingStatus::Confirmed)
                | (BookingStatus::Submitted, BookingStatus::Rejected)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(BookingStatus::PendingPayment),
            "submitted" => Ok(BookingStatus::Submitted),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "rejected" => Ok(BookingStatus::Rejected),
            "expired" => Ok(BookingStatus::Expired),
            other => Err(format!("Unknown booking status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub user_id: String,
    pub amount: i64,
    pub receipt_url: Option<String>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub business_id: Uuid,
    pub method_type: String,
    pub account_name: String,
    pub account_number: String,
}
