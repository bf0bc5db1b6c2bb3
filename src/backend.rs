use crate::error::BookingError;
use crate::types::{
    Booking, BookingStatus, NewSlot, PaymentMethod, PricingRule, Resource, Slot, SlotWithResource,
    WeeklyScheduleRule,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// Persistence contract shared by the in-memory store and the PostgreSQL backend.
///
/// Implementations must make `insert_slots`, `reserve_slot` and
/// `transition_booking` atomic: concurrent callers never observe a booking
/// without its slot flag or a duplicated `(resource, start, end)` slot.
pub trait BookingBackend: Clone + Send + Sync + 'static {
    fn add_resource(&self, resource: Resource) -> Result<(), BookingError>;
    fn resource(&self, id: Uuid) -> Result<Resource, BookingError>;
    fn resources(&self) -> Result<Vec<Resource>, BookingError>;
    fn business_resources(&self, business_id: Uuid) -> Result<Vec<Resource>, BookingError>;

    /// Stored rules only. Days without a stored rule are left out.
    fn weekly_schedule(&self, resource_id: Uuid) -> Result<Vec<WeeklyScheduleRule>, BookingError>;
    fn replace_weekly_schedule(
        &self,
        resource_id: Uuid,
        rules: Vec<WeeklyScheduleRule>,
    ) -> Result<(), BookingError>;

    fn pricing_rules(&self, resource_id: Uuid) -> Result<Vec<PricingRule>, BookingError>;
    fn add_pricing_rule(&self, rule: PricingRule) -> Result<(), BookingError>;

    /// Inserts the given slots in one atomic step, skipping every slot whose
    /// `(resource_id, start_time, end_time)` already exists. Returns the number
    /// of created rows.
    fn insert_slots(&self, slots: &[NewSlot]) -> Result<usize, BookingError>;
    fn slot(&self, id: Uuid) -> Result<Slot, BookingError>;
    /// Slots of every resource of the business starting on `date`, ordered by
    /// start time, then resource name, then resource id.
    fn business_slots(
        &self,
        business_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<SlotWithResource>, BookingError>;
    fn latest_slot_start(&self, resource_id: Uuid) -> Result<Option<NaiveDateTime>, BookingError>;
    /// In one atomic step, deletes the slots of the resource with
    /// `from <= start_time < until` that are unbooked and not referenced by any
    /// booking, then inserts `slots` like `insert_slots`.
    /// Returns `(removed, created)`.
    fn replace_unbooked_slots(
        &self,
        resource_id: Uuid,
        from: NaiveDateTime,
        until: NaiveDateTime,
        slots: &[NewSlot],
    ) -> Result<(usize, usize), BookingError>;

    /// Check-and-set on the slot's booked flag plus creation of a
    /// `PendingPayment` booking carrying the slot price.
    fn reserve_slot(
        &self,
        slot_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError>;
    fn booking(&self, id: Uuid) -> Result<Booking, BookingError>;
    fn bookings(&self, status: Option<BookingStatus>) -> Result<Vec<Booking>, BookingError>;
    /// Moves the booking from `from` to `to` only if it is still in `from`.
    /// A target status that no longer holds the slot releases it in the same step.
    fn transition_booking(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        receipt_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError>;

    fn payment_methods(&self, business_id: Uuid) -> Result<Vec<PaymentMethod>, BookingError>;
    fn add_payment_method(&self, method: PaymentMethod) -> Result<(), BookingError>;
}
