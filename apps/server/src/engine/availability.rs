use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

use super::clock::TimeOfDay;
use super::occupancy::{filter_available, without_occupied, FitBounds};
use super::BookingError;
use crate::models::{Booking, Procedure, ScheduleTemplate};

/// Date → free start times, chronological. Serializes as
/// `{"YYYY-MM-DD": ["HH:MM", ...]}`.
pub type AvailabilityMap = BTreeMap<NaiveDate, Vec<TimeOfDay>>;

pub const DEFAULT_HORIZON_DAYS: u32 = 60;

/// Upper bound for a single query; keeps recomputation cheap.
pub const MAX_HORIZON_DAYS: u32 = 366;

/// Which duration the free slots are computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotQuery {
    /// Duration-agnostic grid: each candidate occupies one slot interval and
    /// no fit filter runs. Callers filter again once a procedure is chosen.
    AnyProcedure,
    /// Duration-aware: fit within business hours and the latest-start
    /// cutoff, and no overlap for the procedure's full duration.
    Procedure(i64),
}

/// Free start times for every active date in `[today, today + horizon_days)`.
///
/// Dates whose weekday is inactive are absent from the map; active dates
/// are always present, possibly with an empty list. Recomputed from scratch
/// on every call.
pub fn compute_availability(
    template: &ScheduleTemplate,
    procedures: &[Procedure],
    bookings: &[Booking],
    query: SlotQuery,
    today: NaiveDate,
    horizon_days: u32,
) -> Result<AvailabilityMap, BookingError> {
    template.validate()?;
    let grid = template.slots()?;

    let duration = match query {
        SlotQuery::AnyProcedure => None,
        SlotQuery::Procedure(id) => {
            let procedure = procedures
                .iter()
                .find(|p| p.id == id)
                .ok_or_else(|| BookingError::NotFound(format!("procedure {id}")))?;
            if procedure.duration_minutes == 0 {
                return Err(BookingError::Validation(format!(
                    "procedure {id} has no duration"
                )));
            }
            Some(procedure.duration_minutes)
        }
    };
    let fit = FitBounds {
        closing: template.day_end,
        latest_start: template.latest_start,
    };

    let mut by_date: BTreeMap<NaiveDate, Vec<Booking>> = BTreeMap::new();
    for booking in bookings.iter().filter(|b| b.status.occupies() && b.date >= today) {
        by_date.entry(booking.date).or_default().push(booking.clone());
    }

    let mut availability = AvailabilityMap::new();
    for offset in 0..horizon_days {
        let Some(date) = today.checked_add_days(Days::new(u64::from(offset))) else {
            break;
        };
        if !template.is_open_on(date) {
            continue;
        }
        let day_bookings = by_date.get(&date).map(Vec::as_slice).unwrap_or(&[]);
        let free = match duration {
            None => without_occupied(&grid, template.slot_interval, day_bookings),
            Some(minutes) => filter_available(&grid, fit, minutes, day_bookings),
        };
        availability.insert(date, free);
    }

    Ok(availability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::occupancy::tests::make_booking;
    use crate::models::BookingStatus;
    use chrono::Datelike;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn procedure(id: i64, minutes: u32) -> Procedure {
        Procedure {
            id,
            name: format!("Procedure {id}"),
            description: String::new(),
            price_cents: 8_000,
            duration_minutes: minutes,
            image_url: None,
        }
    }

    /// Mon–Sat 08:00–20:30 every 30 minutes, Sunday disabled, no cutoff.
    fn template() -> ScheduleTemplate {
        ScheduleTemplate {
            latest_start: None,
            ..ScheduleTemplate::default()
        }
    }

    // 2026-03-02 is a Monday
    const MONDAY: &str = "2026-03-02";

    #[test]
    fn monday_with_90_minute_block() {
        let bookings = vec![make_booking(1, MONDAY, "10:00", 90, BookingStatus::Confirmed)];
        let procedures = vec![procedure(1, 90), procedure(2, 60)];

        let map = compute_availability(
            &template(),
            &procedures,
            &bookings,
            SlotQuery::Procedure(2),
            date(MONDAY),
            1,
        )
        .unwrap();
        let monday = &map[&date(MONDAY)];
        for taken in ["09:30", "10:00", "10:30", "11:00"] {
            assert!(!monday.contains(&t(taken)), "{taken} overlaps 10:00-11:30");
        }
        assert!(monday.contains(&t("09:00")));
        assert!(monday.contains(&t("11:30")));
    }

    #[test]
    fn duration_agnostic_grid_keeps_end_inclusive_slot() {
        let bookings = vec![make_booking(1, MONDAY, "10:00", 90, BookingStatus::Confirmed)];
        let map = compute_availability(
            &template(),
            &[],
            &bookings,
            SlotQuery::AnyProcedure,
            date(MONDAY),
            1,
        )
        .unwrap();
        let monday = &map[&date(MONDAY)];
        assert!(monday.contains(&t("09:30")));
        assert!(!monday.contains(&t("10:00")));
        assert!(!monday.contains(&t("11:00")));
        assert!(monday.contains(&t("11:30")));
        assert_eq!(monday.last(), Some(&t("20:30")));
    }

    #[test]
    fn sundays_never_appear_when_disabled() {
        let map = compute_availability(
            &template(),
            &[],
            &[],
            SlotQuery::AnyProcedure,
            date("2026-03-01"),
            DEFAULT_HORIZON_DAYS,
        )
        .unwrap();
        assert!(!map.is_empty());
        assert!(map.keys().all(|d| d.weekday() != chrono::Weekday::Sun));
        // 60 days from a Sunday include 9 Sundays
        assert_eq!(map.len(), 51);
    }

    #[test]
    fn sunday_appears_when_toggled_on() {
        let template = ScheduleTemplate {
            sunday_scheduling: true,
            ..template()
        };
        let map = compute_availability(
            &template,
            &[],
            &[],
            SlotQuery::AnyProcedure,
            date("2026-03-01"),
            7,
        )
        .unwrap();
        assert_eq!(map.len(), 7);
        assert!(map.contains_key(&date("2026-03-01")));
    }

    #[test]
    fn horizon_is_half_open_and_starts_today() {
        let map = compute_availability(
            &template(),
            &[],
            &[],
            SlotQuery::AnyProcedure,
            date(MONDAY),
            3,
        )
        .unwrap();
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec![date("2026-03-02"), date("2026-03-03"), date("2026-03-04")]);
    }

    #[test]
    fn fully_booked_day_is_present_but_empty() {
        let bookings = vec![make_booking(1, MONDAY, "08:00", 12 * 60 + 30, BookingStatus::Completed)];
        let map = compute_availability(
            &template(),
            &[],
            &bookings,
            SlotQuery::AnyProcedure,
            date(MONDAY),
            1,
        )
        .unwrap();
        // 20:30 starts exactly when the block ends
        assert_eq!(map[&date(MONDAY)], vec![t("20:30")]);
    }

    #[test]
    fn latest_start_limits_duration_aware_queries() {
        let map = compute_availability(
            &ScheduleTemplate::default(),
            &[procedure(5, 30)],
            &[],
            SlotQuery::Procedure(5),
            date(MONDAY),
            1,
        )
        .unwrap();
        assert_eq!(map[&date(MONDAY)].last(), Some(&t("18:00")));
    }

    #[test]
    fn bookings_on_other_dates_are_ignored() {
        let bookings = vec![make_booking(1, "2026-03-03", "10:00", 60, BookingStatus::Confirmed)];
        let map = compute_availability(
            &template(),
            &[procedure(1, 60)],
            &bookings,
            SlotQuery::Procedure(1),
            date(MONDAY),
            2,
        )
        .unwrap();
        assert!(map[&date(MONDAY)].contains(&t("10:00")));
        assert!(!map[&date("2026-03-03")].contains(&t("10:00")));
    }

    #[test]
    fn empty_weekday_set_disables_scheduling() {
        let template = ScheduleTemplate {
            weekdays: vec![],
            ..template()
        };
        let map = compute_availability(&template, &[], &[], SlotQuery::AnyProcedure, date(MONDAY), 14)
            .unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn invalid_template_fails_the_query() {
        let template = ScheduleTemplate {
            slot_interval: 0,
            ..template()
        };
        let err = compute_availability(&template, &[], &[], SlotQuery::AnyProcedure, date(MONDAY), 7)
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidConfiguration(_)));
    }

    #[test]
    fn unknown_procedure_is_not_found() {
        let err = compute_availability(&template(), &[], &[], SlotQuery::Procedure(42), date(MONDAY), 7)
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[test]
    fn serializes_with_iso_keys_and_hh_mm_values() {
        let map = compute_availability(
            &ScheduleTemplate {
                day_start: t("09:00"),
                day_end: t("10:00"),
                latest_start: None,
                ..ScheduleTemplate::default()
            },
            &[],
            &[],
            SlotQuery::AnyProcedure,
            date(MONDAY),
            1,
        )
        .unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"2026-03-02":["09:00","09:30","10:00"]}"#);
    }
}
