use super::guard::ensure_free;
use super::BookingError;
use crate::models::{Booking, BookingStatus};
use crate::store::{BookingPatch, NewRevenueEntry, StoreTx};

/// Allowed moves: pending→confirmed, pending→cancelled, confirmed→cancelled,
/// confirmed→completed. Cancelled and completed are terminal; staying in the
/// same state is not a transition.
pub fn can_transition_to(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
    )
}

pub fn ensure_transition(from: BookingStatus, to: BookingStatus) -> Result<(), BookingError> {
    if can_transition_to(from, to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}

pub fn revenue_entry_for(booking: &Booking) -> NewRevenueEntry {
    NewRevenueEntry {
        description: format!("Serviço: {} - {}", booking.procedure_name, booking.client_name),
        amount_cents: booking.price_cents,
        date: booking.date,
        booking_id: booking.id,
    }
}

/// Applies `next` to `booking` inside the caller's unit.
///
/// Confirmation re-checks the interval, since pending bookings never held
/// it. Completion posts the revenue entry in the same unit, so the status
/// and the entry commit or roll back together.
pub async fn apply_status(
    tx: &mut dyn StoreTx,
    booking: &Booking,
    next: BookingStatus,
) -> Result<Booking, BookingError> {
    ensure_transition(booking.status, next)?;

    if next == BookingStatus::Confirmed {
        ensure_free(
            tx,
            booking.date,
            booking.start_time,
            booking.duration_minutes,
            Some(booking.id),
        )
        .await?;
    }

    let updated = tx
        .update_booking(booking.id, &BookingPatch::status(next))
        .await?
        .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking.id)))?;

    if next == BookingStatus::Completed {
        tx.insert_revenue_entry(&revenue_entry_for(&updated)).await?;
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::occupancy::tests::make_booking;
    use crate::models::BookingStatus::*;
    use crate::store::{BookingStore, MemoryStore, NewBooking};

    const ALL: [BookingStatus; 4] = [Pending, Confirmed, Cancelled, Completed];

    #[test]
    fn transition_table() {
        let allowed = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, Cancelled),
            (Confirmed, Completed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    can_transition_to(from, to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in ALL {
            assert!(ensure_transition(Completed, to).is_err());
            assert!(ensure_transition(Cancelled, to).is_err());
        }
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        assert!(matches!(
            ensure_transition(Pending, Completed),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn revenue_description_names_procedure_and_client() {
        let booking = make_booking(3, "2026-03-02", "10:00", 120, Completed);
        let entry = revenue_entry_for(&booking);
        assert_eq!(entry.description, "Serviço: Volume Brasileiro - Ana");
        assert_eq!(entry.amount_cents, 10_000);
        assert_eq!(entry.booking_id, 3);
    }

    async fn insert(store: &MemoryStore, start: &str, status: BookingStatus) -> Booking {
        let template = make_booking(0, "2026-03-02", start, 60, status);
        let mut tx = store.begin().await.unwrap();
        let booking = tx
            .insert_booking(&NewBooking {
                procedure_id: template.procedure_id,
                procedure_name: template.procedure_name,
                price_cents: template.price_cents,
                duration_minutes: template.duration_minutes,
                date: template.date,
                start_time: template.start_time,
                client_name: template.client_name,
                client_contact: template.client_contact,
                client_birth_date: None,
                status,
                created_at: template.created_at,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        booking
    }

    #[tokio::test]
    async fn completion_posts_exactly_one_revenue_entry() {
        let store = MemoryStore::new();
        let booking = insert(&store, "10:00", Confirmed).await;

        let mut tx = store.begin().await.unwrap();
        let completed = apply_status(tx.as_mut(), &booking, Completed).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = apply_status(tx.as_mut(), &completed, Completed).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));
        drop(tx);

        assert_eq!(store.revenue_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirming_into_an_occupied_interval_conflicts() {
        let store = MemoryStore::new();
        insert(&store, "10:00", Confirmed).await;
        let pending = insert(&store, "10:30", Pending).await;

        let mut tx = store.begin().await.unwrap();
        let err = apply_status(tx.as_mut(), &pending, Confirmed).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict { .. }));
        // cancelling needs no free interval
        apply_status(tx.as_mut(), &pending, Cancelled).await.unwrap();
    }
}
