use super::clock::{Interval, TimeOfDay};
use crate::models::Booking;

/// Business-hour bounds a candidate must respect before occupancy is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitBounds {
    /// The procedure must end on or before this time.
    pub closing: TimeOfDay,
    /// No appointment may start after this time. Business policy, distinct
    /// from `closing`.
    pub latest_start: Option<TimeOfDay>,
}

impl FitBounds {
    pub fn admits(&self, start: TimeOfDay, duration_minutes: u32) -> bool {
        if let Some(latest) = self.latest_start {
            if start > latest {
                return false;
            }
        }
        start.span(duration_minutes).ends_by(self.closing)
    }
}

/// Occupied intervals of the confirmed/completed bookings among `bookings`,
/// each using the booking's own snapshot duration. Sorted by start.
pub fn occupied_intervals<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Vec<(i64, Interval)> {
    let mut occupied: Vec<(i64, Interval)> = bookings
        .into_iter()
        .filter(|b| b.status.occupies())
        .map(|b| (b.id, b.interval()))
        .collect();
    occupied.sort_by_key(|(_, interval)| interval.start);
    occupied
}

/// Full two-stage filter: fit within business hours, then no overlap with
/// any occupied interval of the day. Keeps input order.
pub fn filter_available(
    candidates: &[TimeOfDay],
    fit: FitBounds,
    duration_minutes: u32,
    day_bookings: &[Booking],
) -> Vec<TimeOfDay> {
    let occupied = occupied_intervals(day_bookings);
    candidates
        .iter()
        .copied()
        .filter(|slot| fit.admits(*slot, duration_minutes))
        .filter(|slot| is_free(&occupied, slot.span(duration_minutes)))
        .collect()
}

/// Occupancy stage only: drop candidates whose `[slot, slot + footprint)`
/// intersects an occupied interval.
pub fn without_occupied(
    candidates: &[TimeOfDay],
    footprint_minutes: u32,
    day_bookings: &[Booking],
) -> Vec<TimeOfDay> {
    let occupied = occupied_intervals(day_bookings);
    candidates
        .iter()
        .copied()
        .filter(|slot| is_free(&occupied, slot.span(footprint_minutes)))
        .collect()
}

fn is_free(occupied: &[(i64, Interval)], proposed: Interval) -> bool {
    !occupied.iter().any(|(_, interval)| interval.overlaps(&proposed))
}
