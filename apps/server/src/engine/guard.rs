use chrono::NaiveDate;

use super::clock::{TimeOfDay, MINUTES_PER_DAY};
use super::occupancy::occupied_intervals;
use super::BookingError;
use crate::models::{Booking, BookingStatus};
use crate::store::{NewBooking, StoreTx};

/// Rejects `[start, start + duration)` on `date` if it overlaps any
/// confirmed or completed booking in `day_bookings`. `exclude` skips the
/// booking being edited.
pub fn check_conflict(
    date: NaiveDate,
    start: TimeOfDay,
    duration_minutes: u32,
    day_bookings: &[Booking],
    exclude: Option<i64>,
) -> Result<(), BookingError> {
    let proposed = start.span(duration_minutes);
    let conflict = occupied_intervals(day_bookings.iter().filter(|b| Some(b.id) != exclude))
        .into_iter()
        .find(|(_, interval)| interval.overlaps(&proposed));

    match conflict {
        Some((conflicting_id, _)) => Err(BookingError::SlotConflict {
            date,
            start,
            conflicting_id,
        }),
        None => Ok(()),
    }
}

/// Re-reads the occupying bookings of `date` inside the unit and checks the
/// proposed interval against them.
pub async fn ensure_free(
    tx: &mut dyn StoreTx,
    date: NaiveDate,
    start: TimeOfDay,
    duration_minutes: u32,
    exclude: Option<i64>,
) -> Result<(), BookingError> {
    let day = tx.bookings_on(date, &BookingStatus::OCCUPYING).await?;
    check_conflict(date, start, duration_minutes, &day, exclude)
}

/// Check-then-insert. Must run inside an open unit; the caller commits.
pub async fn try_reserve(tx: &mut dyn StoreTx, new: &NewBooking) -> Result<Booking, BookingError> {
    if new.duration_minutes == 0 || new.duration_minutes > MINUTES_PER_DAY {
        return Err(BookingError::Validation(format!(
            "duration {} min is outside 1..={}",
            new.duration_minutes, MINUTES_PER_DAY
        )));
    }
    ensure_free(tx, new.date, new.start_time, new.duration_minutes, None).await?;
    Ok(tx.insert_booking(new).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::occupancy::tests::make_booking;
    use crate::store::{BookingStore, MemoryStore};
    use chrono::Utc;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn back_to_back_is_permitted() {
        let day = vec![make_booking(1, "2026-03-02", "09:00", 60, BookingStatus::Confirmed)];
        assert!(check_conflict(monday(), t("10:00"), 45, &day, None).is_ok());
        assert!(check_conflict(monday(), t("08:00"), 60, &day, None).is_ok());
    }

    #[test]
    fn one_minute_overlap_conflicts() {
        let day = vec![make_booking(4, "2026-03-02", "09:00", 60, BookingStatus::Confirmed)];
        let err = check_conflict(monday(), t("09:59"), 45, &day, None).unwrap_err();
        match err {
            BookingError::SlotConflict {
                conflicting_id,
                start,
                ..
            } => {
                assert_eq!(conflicting_id, 4);
                assert_eq!(start, t("09:59"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn edited_booking_does_not_conflict_with_itself() {
        let day = vec![make_booking(7, "2026-03-02", "10:00", 90, BookingStatus::Confirmed)];
        assert!(check_conflict(monday(), t("10:30"), 90, &day, Some(7)).is_ok());
        assert!(check_conflict(monday(), t("10:30"), 90, &day, Some(8)).is_err());
    }

    #[test]
    fn snapshot_duration_decides_footprint() {
        // booked as 150 minutes even if the procedure was shortened later
        let day = vec![make_booking(1, "2026-03-02", "09:00", 150, BookingStatus::Completed)];
        assert!(check_conflict(monday(), t("11:00"), 30, &day, None).is_err());
        assert!(check_conflict(monday(), t("11:30"), 30, &day, None).is_ok());
    }

    #[test]
    fn non_occupying_statuses_are_ignored() {
        let day = vec![
            make_booking(1, "2026-03-02", "09:00", 60, BookingStatus::Pending),
            make_booking(2, "2026-03-02", "09:00", 60, BookingStatus::Cancelled),
        ];
        assert!(check_conflict(monday(), t("09:00"), 60, &day, None).is_ok());
    }

    fn request(start: &str) -> NewBooking {
        NewBooking {
            procedure_id: 1,
            procedure_name: "Volume Express".into(),
            price_cents: 8_000,
            duration_minutes: 90,
            date: monday(),
            start_time: t(start),
            client_name: "Bia".into(),
            client_contact: "21999998888".into(),
            client_birth_date: None,
            status: BookingStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn try_reserve_sees_writes_of_the_same_unit() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        try_reserve(tx.as_mut(), &request("10:00")).await.unwrap();
        let err = try_reserve(tx.as_mut(), &request("11:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict { .. }));
        try_reserve(tx.as_mut(), &request("11:30")).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.bookings(&Default::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let req = NewBooking {
            duration_minutes: 0,
            ..request("10:00")
        };
        let err = try_reserve(tx.as_mut(), &req).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn duration_longer_than_a_day_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        try_reserve(tx.as_mut(), &request("10:00")).await.unwrap();
        let req = NewBooking {
            duration_minutes: u32::MAX,
            ..request("08:00")
        };
        let err = try_reserve(tx.as_mut(), &req).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn huge_duration_still_conflicts() {
        let day = vec![make_booking(1, "2026-03-02", "10:00", 60, BookingStatus::Confirmed)];
        let err = check_conflict(monday(), t("09:00"), u32::MAX, &day, None).unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict { conflicting_id: 1, .. }));
    }
}
