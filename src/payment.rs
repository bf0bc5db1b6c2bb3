//! Payment receipt workflow.
//!
//! ```text
//! PendingPayment ──submit_receipt──▶ Submitted ──confirm──▶ Confirmed
//!        │                               └──────reject────▶ Rejected  (slot released)
//!        └──────────expire─────────▶ Expired  (slot released)
//! ```
//!
//! Every transition is a compare-and-set against the stored status, so a
//! stale caller gets `InvalidStateTransition` instead of overwriting a newer
//! decision.

use crate::{
    backend::BookingBackend,
    error::BookingError,
    receipt_storage::ReceiptStorage,
    types::{Booking, BookingStatus},
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

fn transition<B: BookingBackend>(
    backend: &B,
    booking_id: Uuid,
    from: BookingStatus,
    to: BookingStatus,
    receipt_url: Option<String>,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    match backend.transition_booking(booking_id, from, to, receipt_url, now) {
        Ok(booking) => {
            info!(%booking_id, slot_id = %booking.slot_id, status = %to, "Booking updated");
            Ok(booking)
        }
        Err(err @ BookingError::InvalidStateTransition { .. }) => {
            warn!(%booking_id, %err, "Booking transition refused");
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Stores the payment receipt and moves the booking to `Submitted`.
///
/// The booking has to be `PendingPayment` both before the upload and when the
/// URL is recorded. A failed upload leaves the booking untouched.
pub async fn submit_receipt<B, S>(
    backend: &B,
    storage: &S,
    booking_id: Uuid,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<Booking, BookingError>
where
    B: BookingBackend,
    S: ReceiptStorage + ?Sized,
{
    let booking = backend.booking(booking_id)?;
    if booking.status != BookingStatus::PendingPayment {
        let err = BookingError::InvalidStateTransition {
            booking_id,
            from: booking.status,
            to: BookingStatus::Submitted,
        };
        warn!(%booking_id, %err, "Receipt submitted for a booking that is not awaiting payment");
        return Err(err);
    }

    let receipt_url = storage
        .upload(booking_id, file_name.to_owned(), bytes)
        .await
        .map_err(|err| {
            error!(%booking_id, %err, "Receipt upload failed");
            if err.is_retryable() {
                err
            } else {
                BookingError::UploadFailure(err.to_string())
            }
        })?;

    transition(
        backend,
        booking_id,
        BookingStatus::PendingPayment,
        BookingStatus::Submitted,
        Some(receipt_url.clone()),
        Utc::now(),
    )
    .inspect_err(|_| {
        warn!(%booking_id, %receipt_url, "Uploaded receipt is no longer referenced");
    })
}

pub fn confirm_booking<B: BookingBackend>(
    backend: &B,
    booking_id: Uuid,
) -> Result<Booking, BookingError> {
    transition(
        backend,
        booking_id,
        BookingStatus::Submitted,
        BookingStatus::Confirmed,
        None,
        Utc::now(),
    )
}

/// Rejects a submitted receipt and returns the slot to the availability pool.
pub fn reject_booking<B: BookingBackend>(
    backend: &B,
    booking_id: Uuid,
) -> Result<Booking, BookingError> {
    transition(
        backend,
        booking_id,
        BookingStatus::Submitted,
        BookingStatus::Rejected,
        None,
        Utc::now(),
    )
}

/// Releases a slot held by a booking that never received a receipt.
pub fn expire_booking<B: BookingBackend>(
    backend: &B,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    transition(
        backend,
        booking_id,
        BookingStatus::PendingPayment,
        BookingStatus::Expired,
        None,
        now,
    )
}

/// Expires every `PendingPayment` booking created more than `hold` before `now`.
/// Bookings that move on while the sweep runs are skipped.
pub fn expire_stale_bookings<B: BookingBackend>(
    backend: &B,
    now: DateTime<Utc>,
    hold: Duration,
) -> Result<Vec<Uuid>, BookingError> {
    let cutoff = now - hold;
    let mut expired = Vec::new();

    for booking in backend.bookings(Some(BookingStatus::PendingPayment))? {
        if booking.created_at >= cutoff {
            continue;
        }
        match expire_booking(backend, booking.id, now) {
            Ok(_) => expired.push(booking.id),
            Err(BookingError::InvalidStateTransition { .. }) => {
                debug!(booking_id = %booking.id, "Booking left pending payment during sweep");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(expired)
}
