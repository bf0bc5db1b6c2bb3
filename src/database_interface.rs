use crate::schema::{bookings, payment_methods, pricing_rules, resources, slots, weekly_schedules};
use crate::{
    backend::BookingBackend,
    error::BookingError,
    types::{
        Booking, BookingStatus, NewSlot, PaymentMethod, PricingRule, Resource, Slot,
        SlotWithResource, WeeklyScheduleRule,
    },
};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::{
    dsl::{exists, not},
    pg::Pg,
    prelude::*,
    ConnectionError, PgConnection,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = resources)]
#[diesel(check_for_backend(Pg))]
struct ResourceRow {
    id: Uuid,
    business_id: Uuid,
    name: String,
    field_type: Option<String>,
    base_price: Option<i64>,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = weekly_schedules)]
#[diesel(check_for_backend(Pg))]
struct ScheduleRow {
    resource_id: Uuid,
    day_of_week: i16,
    is_open: bool,
    open_time: NaiveTime,
    close_time: NaiveTime,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = pricing_rules)]
#[diesel(check_for_backend(Pg))]
struct PricingRuleRow {
    id: Uuid,
    resource_id: Uuid,
    name: String,
    price_override: i64,
    days_of_week: Vec<i16>,
    start_time: NaiveTime,
    end_time: NaiveTime,
    priority: i32,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = slots)]
#[diesel(check_for_backend(Pg))]
struct SlotRow {
    id: Uuid,
    resource_id: Uuid,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    price: i64,
    is_booked: bool,
    booking_id: Option<Uuid>,
}

#[derive(Insertable)]
#[diesel(table_name = slots)]
struct NewSlotRow {
    resource_id: Uuid,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    price: i64,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = bookings)]
#[diesel(check_for_backend(Pg))]
struct BookingRow {
    id: Uuid,
    slot_id: Uuid,
    user_id: String,
    amount: i64,
    receipt_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = payment_methods)]
#[diesel(check_for_backend(Pg))]
struct PaymentMethodRow {
    id: Uuid,
    business_id: Uuid,
    method_type: String,
    account_name: String,
    account_number: String,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: row.id,
            business_id: row.business_id,
            name: row.name,
            field_type: row.field_type,
            base_price: row.base_price,
        }
    }
}

impl From<Resource> for ResourceRow {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            business_id: resource.business_id,
            name: resource.name,
            field_type: resource.field_type,
            base_price: resource.base_price,
        }
    }
}

impl From<ScheduleRow> for WeeklyScheduleRule {
    fn from(row: ScheduleRow) -> Self {
        Self {
            resource_id: row.resource_id,
            day_of_week: row.day_of_week as u8,
            is_open: row.is_open,
            open_time: row.open_time,
            close_time: row.close_time,
        }
    }
}

impl From<PricingRuleRow> for PricingRule {
    fn from(row: PricingRuleRow) -> Self {
        Self {
            id: row.id,
            resource_id: row.resource_id,
            name: row.name,
            price_override: row.price_override,
            days_of_week: row.days_of_week.into_iter().map(|day| day as u8).collect(),
            start_time: row.start_time,
            end_time: row.end_time,
            priority: row.priority,
            created_at: row.created_at,
        }
    }
}

impl From<SlotRow> for Slot {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id,
            resource_id: row.resource_id,
            start_time: row.start_time,
            end_time: row.end_time,
            price: row.price,
            is_booked: row.is_booked,
            booking_id: row.booking_id,
        }
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            slot_id: row.slot_id,
            user_id: row.user_id,
            amount: row.amount,
            receipt_url: row.receipt_url,
            status: row.status.parse().map_err(BookingError::Storage)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(row: PaymentMethodRow) -> Self {
        Self {
            id: row.id,
            business_id: row.business_id,
            method_type: row.method_type,
            account_name: row.account_name,
            account_number: row.account_number,
        }
    }
}

fn find_resource(connection: &mut PgConnection, id: Uuid) -> Result<ResourceRow, BookingError> {
    resources::table
        .find(id)
        .select(ResourceRow::as_select())
        .first(connection)
        .optional()?
        .ok_or_else(|| BookingError::NotFound(format!("Resource {id}")))
}

fn find_booking(connection: &mut PgConnection, id: Uuid) -> Result<BookingRow, BookingError> {
    bookings::table
        .find(id)
        .select(BookingRow::as_select())
        .first(connection)
        .optional()?
        .ok_or_else(|| BookingError::NotFound(format!("Booking {id}")))
}

/// Inserts the slots, skipping rows whose `(resource, start, end)` already exists.
fn insert_slot_rows(
    connection: &mut PgConnection,
    new_slots: &[NewSlot],
) -> Result<usize, BookingError> {
    if new_slots.is_empty() {
        return Ok(0);
    }
    let rows: Vec<NewSlotRow> = new_slots
        .iter()
        .map(|slot| NewSlotRow {
            resource_id: slot.resource_id,
            start_time: slot.start_time,
            end_time: slot.end_time,
            price: slot.price,
        })
        .collect();

    let created = diesel::insert_into(slots::table)
        .values(&rows)
        .on_conflict((slots::resource_id, slots::start_time, slots::end_time))
        .do_nothing()
        .execute(connection)?;
    Ok(created)
}

/// PostgreSQL backend. Atomic operations run in transactions that lock the
/// affected slot or booking row with `FOR UPDATE`.
#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, BookingError> {
        self.connection.lock().map_err(|err| {
            error!(%err, "Database connection lock poisoned");
            BookingError::Storage("Database connection is unavailable".into())
        })
    }
}

impl BookingBackend for DatabaseInterface {
    fn add_resource(&self, resource: Resource) -> Result<(), BookingError> {
        let mut connection = self.connection()?;
        diesel::insert_into(resources::table)
            .values(ResourceRow::from(resource))
            .execute(&mut *connection)?;
        Ok(())
    }

    fn resource(&self, id: Uuid) -> Result<Resource, BookingError> {
        let mut connection = self.connection()?;
        find_resource(&mut connection, id).map(Resource::from)
    }

    fn resources(&self) -> Result<Vec<Resource>, BookingError> {
        let mut connection = self.connection()?;
        let rows = resources::table
            .order((resources::name.asc(), resources::id.asc()))
            .select(ResourceRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(Resource::from).collect())
    }

    fn business_resources(&self, business_id: Uuid) -> Result<Vec<Resource>, BookingError> {
        let mut connection = self.connection()?;
        let rows = resources::table
            .filter(resources::business_id.eq(business_id))
            .order((resources::name.asc(), resources::id.asc()))
            .select(ResourceRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(Resource::from).collect())
    }

    fn weekly_schedule(&self, resource_id: Uuid) -> Result<Vec<WeeklyScheduleRule>, BookingError> {
        let mut connection = self.connection()?;
        find_resource(&mut connection, resource_id)?;
        let rows = weekly_schedules::table
            .filter(weekly_schedules::resource_id.eq(resource_id))
            .order(weekly_schedules::day_of_week.asc())
            .select(ScheduleRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(WeeklyScheduleRule::from).collect())
    }

    fn replace_weekly_schedule(
        &self,
        resource_id: Uuid,
        rules: Vec<WeeklyScheduleRule>,
    ) -> Result<(), BookingError> {
        let rows: Vec<ScheduleRow> = rules
            .into_iter()
            .map(|rule| ScheduleRow {
                resource_id,
                day_of_week: i16::from(rule.day_of_week),
                is_open: rule.is_open,
                open_time: rule.open_time,
                close_time: rule.close_time,
            })
            .collect();

        let mut connection = self.connection()?;
        connection.transaction::<_, BookingError, _>(|connection| {
            find_resource(connection, resource_id)?;
            diesel::delete(
                weekly_schedules::table.filter(weekly_schedules::resource_id.eq(resource_id)),
            )
            .execute(connection)?;
            diesel::insert_into(weekly_schedules::table)
                .values(&rows)
                .execute(connection)?;
            Ok(())
        })
    }

    fn pricing_rules(&self, resource_id: Uuid) -> Result<Vec<PricingRule>, BookingError> {
        let mut connection = self.connection()?;
        let rows = pricing_rules::table
            .filter(pricing_rules::resource_id.eq(resource_id))
            .order((pricing_rules::created_at.asc(), pricing_rules::id.asc()))
            .select(PricingRuleRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(PricingRule::from).collect())
    }

    fn add_pricing_rule(&self, rule: PricingRule) -> Result<(), BookingError> {
        let row = PricingRuleRow {
            id: rule.id,
            resource_id: rule.resource_id,
            name: rule.name,
            price_override: rule.price_override,
            days_of_week: rule.days_of_week.into_iter().map(i16::from).collect(),
            start_time: rule.start_time,
            end_time: rule.end_time,
            priority: rule.priority,
            created_at: rule.created_at,
        };

        let mut connection = self.connection()?;
        find_resource(&mut connection, row.resource_id)?;
        diesel::insert_into(pricing_rules::table)
            .values(&row)
            .execute(&mut *connection)?;
        Ok(())
    }

    fn insert_slots(&self, new_slots: &[NewSlot]) -> Result<usize, BookingError> {
        let mut connection = self.connection()?;
        insert_slot_rows(&mut connection, new_slots)
    }

    fn slot(&self, id: Uuid) -> Result<Slot, BookingError> {
        let mut connection = self.connection()?;
        slots::table
            .find(id)
            .select(SlotRow::as_select())
            .first(&mut *connection)
            .optional()?
            .map(Slot::from)
            .ok_or_else(|| BookingError::NotFound(format!("Slot {id}")))
    }

    fn business_slots(
        &self,
        business_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<SlotWithResource>, BookingError> {
        let day_start = date.and_time(NaiveTime::MIN);
        let next_day_start = date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| BookingError::Validation(format!("Date {date} is out of range")))?
            .and_time(NaiveTime::MIN);

        let mut connection = self.connection()?;
        let rows: Vec<(SlotRow, String, Option<String>)> = slots::table
            .inner_join(resources::table)
            .filter(resources::business_id.eq(business_id))
            .filter(slots::start_time.ge(day_start))
            .filter(slots::start_time.lt(next_day_start))
            .order((
                slots::start_time.asc(),
                resources::name.asc(),
                resources::id.asc(),
            ))
            .select((SlotRow::as_select(), resources::name, resources::field_type))
            .load(&mut *connection)?;

        Ok(rows
            .into_iter()
            .map(|(slot, resource_name, field_type)| SlotWithResource {
                slot: slot.into(),
                resource_name,
                field_type,
            })
            .collect())
    }

    fn latest_slot_start(&self, resource_id: Uuid) -> Result<Option<NaiveDateTime>, BookingError> {
        let mut connection = self.connection()?;
        let latest = slots::table
            .filter(slots::resource_id.eq(resource_id))
            .select(diesel::dsl::max(slots::start_time))
            .first::<Option<NaiveDateTime>>(&mut *connection)?;
        Ok(latest)
    }

    fn replace_unbooked_slots(
        &self,
        resource_id: Uuid,
        from: NaiveDateTime,
        until: NaiveDateTime,
        new_slots: &[NewSlot],
    ) -> Result<(usize, usize), BookingError> {
        let mut connection = self.connection()?;
        connection.transaction::<_, BookingError, _>(|connection| {
            find_resource(connection, resource_id)?;
            let removed = diesel::delete(
                slots::table
                    .filter(slots::resource_id.eq(resource_id))
                    .filter(slots::is_booked.eq(false))
                    .filter(slots::start_time.ge(from))
                    .filter(slots::start_time.lt(until))
                    .filter(not(exists(
                        bookings::table.filter(bookings::slot_id.eq(slots::id)),
                    ))),
            )
            .execute(connection)?;
            let created = insert_slot_rows(connection, new_slots)?;
            Ok((removed, created))
        })
    }

    fn reserve_slot(
        &self,
        slot_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let mut connection = self.connection()?;
        connection.transaction::<_, BookingError, _>(|connection| {
            let slot = slots::table
                .find(slot_id)
                .select(SlotRow::as_select())
                .for_update()
                .first(connection)
                .optional()?
                .ok_or_else(|| BookingError::NotFound(format!("Slot {slot_id}")))?;
            if slot.is_booked {
                warn!(%slot_id, "Slot was already booked");
                return Err(BookingError::Conflict(slot_id));
            }

            let booking = BookingRow {
                id: Uuid::new_v4(),
                slot_id,
                user_id: user_id.to_owned(),
                amount: slot.price,
                receipt_url: None,
                status: BookingStatus::PendingPayment.as_str().to_owned(),
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(bookings::table)
                .values(&booking)
                .execute(connection)?;

            let updated = diesel::update(
                slots::table
                    .filter(slots::id.eq(slot_id))
                    .filter(slots::is_booked.eq(false)),
            )
            .set((
                slots::is_booked.eq(true),
                slots::booking_id.eq(Some(booking.id)),
            ))
            .execute(connection)?;
            if updated == 0 {
                return Err(BookingError::Conflict(slot_id));
            }

            Booking::try_from(booking)
        })
    }

    fn booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        let mut connection = self.connection()?;
        find_booking(&mut connection, id)?.try_into()
    }

    fn bookings(&self, status: Option<BookingStatus>) -> Result<Vec<Booking>, BookingError> {
        let mut query = bookings::table.into_boxed();
        if let Some(status) = status {
            query = query.filter(bookings::status.eq(status.as_str()));
        }

        let mut connection = self.connection()?;
        query
            .order((bookings::created_at.asc(), bookings::id.asc()))
            .select(BookingRow::as_select())
            .load(&mut *connection)?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    fn transition_booking(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        receipt_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        if !from.can_transition_to(to) {
            return Err(BookingError::InvalidStateTransition {
                booking_id: id,
                from,
                to,
            });
        }

        let mut connection = self.connection()?;
        connection.transaction::<_, BookingError, _>(|connection| {
            let current = bookings::table
                .find(id)
                .select(BookingRow::as_select())
                .for_update()
                .first(connection)
                .optional()?
                .ok_or_else(|| BookingError::NotFound(format!("Booking {id}")))?;
            let current_status: BookingStatus =
                current.status.parse().map_err(BookingError::Storage)?;
            if current_status != from {
                return Err(BookingError::InvalidStateTransition {
                    booking_id: id,
                    from: current_status,
                    to,
                });
            }

            diesel::update(bookings::table.find(id))
                .set((
                    bookings::status.eq(to.as_str()),
                    bookings::updated_at.eq(now),
                ))
                .execute(connection)?;
            if let Some(receipt_url) = receipt_url {
                diesel::update(bookings::table.find(id))
                    .set(bookings::receipt_url.eq(receipt_url))
                    .execute(connection)?;
            }

            if !to.holds_slot() {
                diesel::update(
                    slots::table
                        .filter(slots::id.eq(current.slot_id))
                        .filter(slots::booking_id.eq(id)),
                )
                .set((
                    slots::is_booked.eq(false),
                    slots::booking_id.eq(None::<Uuid>),
                ))
                .execute(connection)?;
            }

            find_booking(connection, id)?.try_into()
        })
    }

    fn payment_methods(&self, business_id: Uuid) -> Result<Vec<PaymentMethod>, BookingError> {
        let mut connection = self.connection()?;
        let rows = payment_methods::table
            .filter(payment_methods::business_id.eq(business_id))
            .order(payment_methods::method_type.asc())
            .select(PaymentMethodRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(PaymentMethod::from).collect())
    }

    fn add_payment_method(&self, method: PaymentMethod) -> Result<(), BookingError> {
        let mut connection = self.connection()?;
        diesel::insert_into(payment_methods::table)
            .values(PaymentMethodRow {
                id: method.id,
                business_id: method.business_id,
                method_type: method.method_type,
                account_name: method.account_name,
                account_number: method.account_number,
            })
            .execute(&mut *connection)?;
        Ok(())
    }
}
