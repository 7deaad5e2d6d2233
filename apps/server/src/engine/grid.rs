use super::clock::TimeOfDay;
use super::BookingError;

/// Every start time `day_start + k * interval` that is `<= day_end`.
///
/// The end boundary is inclusive: a slot exactly at `day_end` is produced
/// even though no procedure could fit there. The occupancy filter discards
/// it later once a duration is known.
pub fn generate_slots(
    day_start: TimeOfDay,
    day_end: TimeOfDay,
    interval_minutes: u32,
) -> Result<Vec<TimeOfDay>, BookingError> {
    if interval_minutes == 0 {
        return Err(BookingError::InvalidConfiguration(
            "slot interval must be positive".into(),
        ));
    }
    if day_start > day_end {
        return Err(BookingError::InvalidConfiguration(format!(
            "day start {day_start} is after day end {day_end}"
        )));
    }

    let end = day_end.minutes();
    let mut slots = Vec::with_capacity(((end - day_start.minutes()) / interval_minutes + 1) as usize);
    let mut current = day_start.minutes();
    while current <= end {
        // current <= day_end < 24:00, always a valid time of day
        if let Some(slot) = TimeOfDay::from_minutes(current) {
            slots.push(slot);
        }
        match current.checked_add(interval_minutes) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn fmt(slots: &[TimeOfDay]) -> Vec<String> {
        slots.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_day_is_end_inclusive() {
        let slots = generate_slots(t("08:00"), t("20:30"), 30).unwrap();
        assert_eq!(slots.len(), 26);
        assert_eq!(slots.first(), Some(&t("08:00")));
        assert_eq!(slots.last(), Some(&t("20:30")));
    }

    #[test]
    fn end_not_on_grid_is_not_emitted() {
        let slots = generate_slots(t("09:00"), t("10:45"), 30).unwrap();
        assert_eq!(fmt(&slots), vec!["09:00", "09:30", "10:00", "10:30"]);
    }

    #[test]
    fn start_equal_to_end_yields_single_slot() {
        let slots = generate_slots(t("12:00"), t("12:00"), 15).unwrap();
        assert_eq!(fmt(&slots), vec!["12:00"]);
    }

    #[test]
    fn odd_interval() {
        let slots = generate_slots(t("10:00"), t("11:00"), 25).unwrap();
        assert_eq!(fmt(&slots), vec!["10:00", "10:25", "10:50"]);
    }

    #[test]
    fn zero_interval_is_invalid_configuration() {
        let err = generate_slots(t("08:00"), t("20:00"), 0).unwrap_err();
        assert!(matches!(err, BookingError::InvalidConfiguration(_)));
    }

    #[test]
    fn inverted_bounds_are_invalid_configuration() {
        let err = generate_slots(t("20:00"), t("08:00"), 30).unwrap_err();
        assert!(matches!(err, BookingError::InvalidConfiguration(_)));
    }

    #[test]
    fn slots_near_midnight_do_not_wrap() {
        let slots = generate_slots(t("23:00"), t("23:59"), 45).unwrap();
        assert_eq!(fmt(&slots), vec!["23:00", "23:45"]);
    }

    #[test]
    fn interval_wider_than_the_day_stays_ascending() {
        let slots = generate_slots(t("08:00"), t("20:30"), u32::MAX).unwrap();
        assert_eq!(fmt(&slots), vec!["08:00"]);
    }
}
