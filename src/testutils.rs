use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::{
    backend::BookingBackend,
    configuration::Configuration,
    error::BookingError,
    local_store::LocalStore,
    receipt_storage::ReceiptStorage,
    types::{
        Booking, BookingStatus, NewSlot, PaymentMethod, PricingRule, Resource, Slot,
        SlotWithResource, WeeklyScheduleRule,
    },
};

pub const BASE_PRICE: i64 = 100;
pub const ADMIN_PASSWORD: &str = "123";

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn monday() -> NaiveDate {
    date(2026, 10, 19)
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    date.and_time(time(hour, minute))
}

pub fn new_slot(resource_id: Uuid, start: NaiveDateTime, end: NaiveDateTime, price: i64) -> NewSlot {
    NewSlot {
        resource_id,
        start_time: start,
        end_time: end,
        price,
    }
}

/// Monday to Friday open between `open` and `close`, weekend closed.
pub fn weekday_schedule(resource_id: Uuid, open: NaiveTime, close: NaiveTime) -> Vec<WeeklyScheduleRule> {
    (1..=7)
        .map(|day| WeeklyScheduleRule {
            resource_id,
            day_of_week: day,
            is_open: day <= 5,
            open_time: open,
            close_time: close,
        })
        .collect()
}

pub struct Fixture {
    pub store: LocalStore,
    pub business_id: Uuid,
    pub resource: Resource,
}

/// A business with one resource, "Field A", open Monday to Friday 09:00-11:00.
pub fn seeded_store() -> Fixture {
    let store = LocalStore::default();
    let business_id = Uuid::new_v4();
    let resource = Resource {
        id: Uuid::new_v4(),
        business_id,
        name: "Field A".into(),
        field_type: Some("football".into()),
        base_price: Some(BASE_PRICE),
    };
    store.add_resource(resource.clone()).unwrap();
    store
        .replace_weekly_schedule(resource.id, weekday_schedule(resource.id, time(9, 0), time(11, 0)))
        .unwrap();

    Fixture {
        store,
        business_id,
        resource,
    }
}

impl Fixture {
    pub fn add_resource(&self, name: &str) -> Resource {
        self.add_resource_with_price(name, Some(BASE_PRICE))
    }

    pub fn add_resource_with_price(&self, name: &str, base_price: Option<i64>) -> Resource {
        let resource = Resource {
            id: Uuid::new_v4(),
            business_id: self.business_id,
            name: name.into(),
            field_type: None,
            base_price,
        };
        self.store.add_resource(resource.clone()).unwrap();
        resource
    }

    pub fn open_every_day(&self, open: NaiveTime, close: NaiveTime) {
        self.open_every_day_for(self.resource.id, open, close);
    }

    pub fn open_every_day_for(&self, resource_id: Uuid, open: NaiveTime, close: NaiveTime) {
        let rules = (1..=7)
            .map(|day| WeeklyScheduleRule {
                resource_id,
                day_of_week: day,
                is_open: true,
                open_time: open,
                close_time: close,
            })
            .collect();
        self.store.replace_weekly_schedule(resource_id, rules).unwrap();
    }

    pub fn add_pricing_rule(
        &self,
        name: &str,
        price: i64,
        days: Vec<u8>,
        start: NaiveTime,
        end: NaiveTime,
        priority: i32,
    ) {
        self.add_pricing_rule_for(self.resource.id, name, price, days, start, end, priority);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_pricing_rule_for(
        &self,
        resource_id: Uuid,
        name: &str,
        price: i64,
        days: Vec<u8>,
        start: NaiveTime,
        end: NaiveTime,
        priority: i32,
    ) {
        self.store
            .add_pricing_rule(PricingRule {
                id: Uuid::new_v4(),
                resource_id,
                name: name.into(),
                price_override: price,
                days_of_week: days,
                start_time: start,
                end_time: end,
                priority,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    /// Inserts the one hour slot starting at `hour` on `monday()` and returns its id.
    pub fn insert_monday_slot(&self, hour: u32) -> Uuid {
        let start = at(monday(), hour, 0);
        self.store
            .insert_slots(&[new_slot(
                self.resource.id,
                start,
                at(monday(), hour + 1, 0),
                BASE_PRICE,
            )])
            .unwrap();
        self.store
            .business_slots(self.business_id, monday())
            .unwrap()
            .into_iter()
            .find(|slot| slot.slot.resource_id == self.resource.id && slot.slot.start_time == start)
            .map(|slot| slot.slot.id)
            .unwrap()
    }
}

/// Receipt storage keeping uploads in memory.
#[derive(Default)]
pub struct MemoryReceipts {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ReceiptStorage for MemoryReceipts {
    async fn upload(
        &self,
        booking_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<String, BookingError> {
        let url = format!("memory://{booking_id}/{file_name}");
        self.files.lock().unwrap().insert(url.clone(), bytes);
        Ok(url)
    }
}

pub struct InstrumentedBackendInner {
    pub store: LocalStore,
    pub success: AtomicBool,
    pub calls_to_insert_slots: AtomicU64,
    pub calls_to_reserve_slot: AtomicU64,
    pub calls_to_transition_booking: AtomicU64,
    pub failing_schedules: Mutex<HashSet<Uuid>>,
}

/// `LocalStore` wrapper counting calls and injecting failures.
#[derive(Clone)]
pub struct InstrumentedBackend(pub Arc<InstrumentedBackendInner>);

impl InstrumentedBackend {
    pub fn new(store: LocalStore) -> Self {
        Self(Arc::new(InstrumentedBackendInner {
            store,
            success: AtomicBool::new(true),
            calls_to_insert_slots: AtomicU64::default(),
            calls_to_reserve_slot: AtomicU64::default(),
            calls_to_transition_booking: AtomicU64::default(),
            failing_schedules: Mutex::default(),
        }))
    }

    pub fn fail_schedule_for(&self, resource_id: Uuid) {
        self.0.failing_schedules.lock().unwrap().insert(resource_id);
    }

    pub fn insert_calls(&self) -> u64 {
        self.0.calls_to_insert_slots.load(Ordering::SeqCst)
    }

    fn result(&self) -> Result<(), BookingError> {
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(()),
            false => Err(BookingError::Storage("Supposed to fail".into())),
        }
    }
}

impl BookingBackend for InstrumentedBackend {
    fn add_resource(&self, resource: Resource) -> Result<(), BookingError> {
        self.0.store.add_resource(resource)
    }

    fn resource(&self, id: Uuid) -> Result<Resource, BookingError> {
        self.0.store.resource(id)
    }

    fn resources(&self) -> Result<Vec<Resource>, BookingError> {
        self.0.store.resources()
    }

    fn business_resources(&self, business_id: Uuid) -> Result<Vec<Resource>, BookingError> {
        self.0.store.business_resources(business_id)
    }

    fn weekly_schedule(&self, resource_id: Uuid) -> Result<Vec<WeeklyScheduleRule>, BookingError> {
        if self.0.failing_schedules.lock().unwrap().contains(&resource_id) {
            return Err(BookingError::Storage("Schedule table unavailable".into()));
        }
        self.0.store.weekly_schedule(resource_id)
    }

    fn replace_weekly_schedule(
        &self,
        resource_id: Uuid,
        rules: Vec<WeeklyScheduleRule>,
    ) -> Result<(), BookingError> {
        self.0.store.replace_weekly_schedule(resource_id, rules)
    }

    fn pricing_rules(&self, resource_id: Uuid) -> Result<Vec<PricingRule>, BookingError> {
        self.0.store.pricing_rules(resource_id)
    }

    fn add_pricing_rule(&self, rule: PricingRule) -> Result<(), BookingError> {
        self.0.store.add_pricing_rule(rule)
    }

    fn insert_slots(&self, slots: &[NewSlot]) -> Result<usize, BookingError> {
        self.0.calls_to_insert_slots.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.store.insert_slots(slots)
    }

    fn slot(&self, id: Uuid) -> Result<Slot, BookingError> {
        self.0.store.slot(id)
    }

    fn business_slots(
        &self,
        business_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<SlotWithResource>, BookingError> {
        self.0.store.business_slots(business_id, date)
    }

    fn latest_slot_start(&self, resource_id: Uuid) -> Result<Option<NaiveDateTime>, BookingError> {
        self.0.store.latest_slot_start(resource_id)
    }

    fn replace_unbooked_slots(
        &self,
        resource_id: Uuid,
        from: NaiveDateTime,
        until: NaiveDateTime,
        slots: &[NewSlot],
    ) -> Result<(usize, usize), BookingError> {
        self.0.calls_to_insert_slots.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.store.replace_unbooked_slots(resource_id, from, until, slots)
    }

    fn reserve_slot(
        &self,
        slot_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        self.0.calls_to_reserve_slot.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0.store.reserve_slot(slot_id, user_id, now)
    }

    fn booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.0.store.booking(id)
    }

    fn bookings(&self, status: Option<BookingStatus>) -> Result<Vec<Booking>, BookingError> {
        self.0.store.bookings(status)
    }

    fn transition_booking(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        receipt_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        self.0
            .calls_to_transition_booking
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        self.0
            .store
            .transition_booking(id, from, to, receipt_url, now)
    }

    fn payment_methods(&self, business_id: Uuid) -> Result<Vec<PaymentMethod>, BookingError> {
        self.0.store.payment_methods(business_id)
    }

    fn add_payment_method(&self, method: PaymentMethod) -> Result<(), BookingError> {
        self.0.store.add_payment_method(method)
    }
}

#[derive(Clone)]
pub struct TestConfiguration {
    pub receipt_dir: PathBuf,
}

impl Configuration for TestConfiguration {
    fn port(&self) -> u16 {
        0
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn admin_password(&self) -> String {
        ADMIN_PASSWORD.into()
    }

    fn receipt_dir(&self) -> PathBuf {
        self.receipt_dir.clone()
    }

    fn receipt_base_url(&self) -> String {
        "/receipts".into()
    }

    fn coverage_days(&self) -> u32 {
        30
    }

    fn slot_minutes(&self) -> u32 {
        60
    }

    fn maintenance_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(3600)
    }

    fn pending_hold(&self) -> Option<chrono::Duration> {
        None
    }
}
