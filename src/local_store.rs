use crate::{
    backend::BookingBackend,
    error::BookingError,
    types::{
        Booking, BookingStatus, NewSlot, PaymentMethod, PricingRule, Resource, Slot,
        SlotWithResource, WeeklyScheduleRule,
    },
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{error, warn};
use uuid::Uuid;

type SlotKey = (Uuid, NaiveDateTime, NaiveDateTime);

#[derive(Debug, Default)]
struct StoreState {
    resources: HashMap<Uuid, Resource>,
    schedules: HashMap<Uuid, BTreeMap<u8, WeeklyScheduleRule>>,
    pricing_rules: HashMap<Uuid, Vec<PricingRule>>,
    slots: HashMap<Uuid, Slot>,
    slot_keys: HashSet<SlotKey>,
    bookings: HashMap<Uuid, Booking>,
    payment_methods: Vec<PaymentMethod>,
}

impl StoreState {
    fn check_resources(&self, slots: &[NewSlot]) -> Result<(), BookingError> {
        match slots
            .iter()
            .find(|slot| !self.resources.contains_key(&slot.resource_id))
        {
            Some(slot) => Err(BookingError::NotFound(format!("Resource {}", slot.resource_id))),
            None => Ok(()),
        }
    }

    /// Inserts the slots whose `(resource, start, end)` key is still free.
    fn insert_new_slots(&mut self, slots: &[NewSlot]) -> usize {
        let mut created = 0;
        for new_slot in slots {
            let key = (new_slot.resource_id, new_slot.start_time, new_slot.end_time);
            if !self.slot_keys.insert(key) {
                continue;
            }
            let id = Uuid::new_v4();
            self.slots.insert(
                id,
                Slot {
                    id,
                    resource_id: new_slot.resource_id,
                    start_time: new_slot.start_time,
                    end_time: new_slot.end_time,
                    price: new_slot.price,
                    is_booked: false,
                    booking_id: None,
                },
            );
            created += 1;
        }
        created
    }
}

/// In-memory backend. Every operation runs under one store-wide lock, which
/// makes the slot check-and-set and the batch inserts atomic.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    state: Arc<Mutex<StoreState>>,
}

impl LocalStore {
    fn state(&self) -> Result<MutexGuard<'_, StoreState>, BookingError> {
        self.state.lock().map_err(|err| {
            error!(%err, "Local store lock poisoned");
            BookingError::Storage("Local store is unavailable".into())
        })
    }
}

impl BookingBackend for LocalStore {
    fn add_resource(&self, resource: Resource) -> Result<(), BookingError> {
        self.state()?.resources.insert(resource.id, resource);
        Ok(())
    }

    fn resource(&self, id: Uuid) -> Result<Resource, BookingError> {
        self.state()?
            .resources
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Resource {id}")))
    }

    fn resources(&self) -> Result<Vec<Resource>, BookingError> {
        let mut resources: Vec<Resource> = self.state()?.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(resources)
    }

    fn business_resources(&self, business_id: Uuid) -> Result<Vec<Resource>, BookingError> {
        Ok(self
            .resources()?
            .into_iter()
            .filter(|resource| resource.business_id == business_id)
            .collect())
    }

    fn weekly_schedule(&self, resource_id: Uuid) -> Result<Vec<WeeklyScheduleRule>, BookingError> {
        let state = self.state()?;
        if !state.resources.contains_key(&resource_id) {
            return Err(BookingError::NotFound(format!("Resource {resource_id}")));
        }
        Ok(state
            .schedules
            .get(&resource_id)
            .map(|rules| rules.values().copied().collect())
            .unwrap_or_default())
    }

    fn replace_weekly_schedule(
        &self,
        resource_id: Uuid,
        rules: Vec<WeeklyScheduleRule>,
    ) -> Result<(), BookingError> {
        let mut state = self.state()?;
        if !state.resources.contains_key(&resource_id) {
            return Err(BookingError::NotFound(format!("Resource {resource_id}")));
        }
        let rules = rules
            .into_iter()
            .map(|rule| (rule.day_of_week, rule))
            .collect();
        state.schedules.insert(resource_id, rules);
        Ok(())
    }

    fn pricing_rules(&self, resource_id: Uuid) -> Result<Vec<PricingRule>, BookingError> {
        Ok(self
            .state()?
            .pricing_rules
            .get(&resource_id)
            .cloned()
            .unwrap_or_default())
    }

    fn add_pricing_rule(&self, rule: PricingRule) -> Result<(), BookingError> {
        let mut state = self.state()?;
        if !state.resources.contains_key(&rule.resource_id) {
            return Err(BookingError::NotFound(format!(
                "Resource {}",
                rule.resource_id
            )));
        }
        state
            .pricing_rules
            .entry(rule.resource_id)
            .or_default()
            .push(rule);
        Ok(())
    }

    fn insert_slots(&self, slots: &[NewSlot]) -> Result<usize, BookingError> {
        let mut state = self.state()?;
        state.check_resources(slots)?;
        Ok(state.insert_new_slots(slots))
    }

    fn slot(&self, id: Uuid) -> Result<Slot, BookingError> {
        self.state()?
            .slots
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Slot {id}")))
    }

    fn business_slots(
        &self,
        business_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<SlotWithResource>, BookingError> {
        let state = self.state()?;
        let mut slots: Vec<SlotWithResource> = state
            .slots
            .values()
            .filter(|slot| slot.start_time.date() == date)
            .filter_map(|slot| {
                let resource = state.resources.get(&slot.resource_id)?;
                (resource.business_id == business_id).then(|| SlotWithResource {
                    slot: slot.clone(),
                    resource_name: resource.name.clone(),
                    field_type: resource.field_type.clone(),
                })
            })
            .collect();

        slots.sort_by(|a, b| {
            a.slot
                .start_time
                .cmp(&b.slot.start_time)
                .then_with(|| a.resource_name.cmp(&b.resource_name))
                .then_with(|| a.slot.resource_id.cmp(&b.slot.resource_id))
        });
        Ok(slots)
    }

    fn latest_slot_start(&self, resource_id: Uuid) -> Result<Option<NaiveDateTime>, BookingError> {
        Ok(self
            .state()?
            .slots
            .values()
            .filter(|slot| slot.resource_id == resource_id)
            .map(|slot| slot.start_time)
            .max())
    }

    fn replace_unbooked_slots(
        &self,
        resource_id: Uuid,
        from: NaiveDateTime,
        until: NaiveDateTime,
        slots: &[NewSlot],
    ) -> Result<(usize, usize), BookingError> {
        let mut guard = self.state()?;
        let state = &mut *guard;
        if !state.resources.contains_key(&resource_id) {
            return Err(BookingError::NotFound(format!("Resource {resource_id}")));
        }
        state.check_resources(slots)?;

        let referenced: HashSet<Uuid> =
            state.bookings.values().map(|booking| booking.slot_id).collect();
        let before = state.slots.len();
        let slot_keys = &mut state.slot_keys;
        state.slots.retain(|id, slot| {
            let remove = slot.resource_id == resource_id
                && !slot.is_booked
                && !referenced.contains(id)
                && slot.start_time >= from
                && slot.start_time < until;
            if remove {
                slot_keys.remove(&(slot.resource_id, slot.start_time, slot.end_time));
            }
            !remove
        });
        let removed = before - state.slots.len();

        Ok((removed, state.insert_new_slots(slots)))
    }

    fn reserve_slot(
        &self,
        slot_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        let slot = state
            .slots
            .get_mut(&slot_id)
            .ok_or_else(|| BookingError::NotFound(format!("Slot {slot_id}")))?;
        if slot.is_booked {
            warn!(%slot_id, "Slot was already booked");
            return Err(BookingError::Conflict(slot_id));
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            slot_id,
            user_id: user_id.to_owned(),
            amount: slot.price,
            receipt_url: None,
            status: BookingStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        };
        slot.is_booked = true;
        slot.booking_id = Some(booking.id);
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    fn booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.state()?
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Booking {id}")))
    }

    fn bookings(&self, status: Option<BookingStatus>) -> Result<Vec<Booking>, BookingError> {
        let mut bookings: Vec<Booking> = self
            .state()?
            .bookings
            .values()
            .filter(|booking| status.map_or(true, |status| booking.status == status))
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| (booking.created_at, booking.id));
        Ok(bookings)
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

        let mut guard = self.state()?;
        let state = &mut *guard;

        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| BookingError::NotFound(format!("Booking {id}")))?;
        if booking.status != from {
            return Err(BookingError::InvalidStateTransition {
                booking_id: id,
                from: booking.status,
                to,
            });
        }

        booking.status = to;
        booking.updated_at = now;
        if receipt_url.is_some() {
            booking.receipt_url = receipt_url;
        }

        if !to.holds_slot() {
            if let Some(slot) = state.slots.get_mut(&booking.slot_id) {
                if slot.booking_id == Some(id) {
                    slot.is_booked = false;
                    slot.booking_id = None;
                }
            }
        }
        Ok(booking.clone())
    }

    fn payment_methods(&self, business_id: Uuid) -> Result<Vec<PaymentMethod>, BookingError> {
        Ok(self
            .state()?
            .payment_methods
            .iter()
            .filter(|method| method.business_id == business_id)
            .cloned()
            .collect())
    }

    fn add_payment_method(&self, method: PaymentMethod) -> Result<(), BookingError> {
        self.state()?.payment_methods.push(method);
        Ok(())
    }
}
