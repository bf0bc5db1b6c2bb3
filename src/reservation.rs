use crate::{backend::BookingBackend, error::BookingError, types::Booking};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Claims a slot for `user_id` and opens a `PendingPayment` booking on it.
///
/// The booking amount is always the slot price. A client-quoted `amount`
/// is only compared against it, and a mismatch is rejected before the slot
/// is touched.
pub fn reserve<B: BookingBackend>(
    backend: &B,
    slot_id: Uuid,
    user_id: &str,
    amount: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(BookingError::Validation("User id is missing".into()));
    }

    if let Some(amount) = amount {
        let slot = backend.slot(slot_id)?;
        if amount != slot.price {
            warn!(%slot_id, amount, price = slot.price, "Quoted amount differs from slot price");
            return Err(BookingError::Validation(format!(
                "Amount {amount} does not match the slot price {}",
                slot.price
            )));
        }
    }

    match backend.reserve_slot(slot_id, user_id, now) {
        Ok(booking) => {
            info!(%slot_id, booking_id = %booking.id, user_id, "Slot reserved");
            Ok(booking)
        }
        Err(err @ BookingError::Conflict(_)) => {
            warn!(%slot_id, user_id, "Reservation lost against an existing booking");
            Err(err)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{testutils::seeded_store, types::BookingStatus};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use test_case::test_case;

    #[test]
    fn test_reserve_uses_slot_price() {
        let fixture = seeded_store();
        let slot_id = fixture.insert_monday_slot(9);

        let booking = reserve(&fixture.store, slot_id, "user-a", None, Utc::now()).unwrap();
        assert_eq!(booking.amount, 100);
        assert_eq!(booking.status, BookingStatus::PendingPayment);
        assert_eq!(booking.user_id, "user-a");
        assert_eq!(booking.receipt_url, None);
    }

    #[test_case(Some(100), true ; "matching quote")]
    #[test_case(Some(1), false ; "lower quote")]
    #[test_case(Some(500), false ; "higher quote")]
    #[test_case(None, true ; "no quote")]
    fn test_quoted_amount_must_match(amount: Option<i64>, accepted: bool) {
        let fixture = seeded_store();
        let slot_id = fixture.insert_monday_slot(9);

        let result = reserve(&fixture.store, slot_id, "user-a", amount, Utc::now());
        assert_eq!(result.is_ok(), accepted);
        assert_eq!(fixture.store.slot(slot_id).unwrap().is_booked, accepted);
        if let Ok(booking) = result {
            assert_eq!(booking.amount, 100);
        }
    }

    #[test]
    fn test_blank_user_is_rejected() {
        let fixture = seeded_store();
        let slot_id = fixture.insert_monday_slot(9);

        let err = reserve(&fixture.store, slot_id, "  ", None, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(!fixture.store.slot(slot_id).unwrap().is_booked);
    }

    #[test]
    fn test_racing_users_get_one_booking() {
        let fixture = seeded_store();
        let slot_id = fixture.insert_monday_slot(9);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["user-a", "user-b"]
            .into_iter()
            .map(|user| {
                let store = fixture.store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    reserve(&store, slot_id, user, Some(100), Utc::now())
                })
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|result| matches!(result, Err(BookingError::Conflict(id)) if *id == slot_id)));

        let winner = results.into_iter().find_map(Result::ok).unwrap();
        assert_eq!(fixture.store.slot(slot_id).unwrap().booking_id, Some(winner.id));
    }
}
