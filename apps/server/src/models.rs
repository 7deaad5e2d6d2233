use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::engine::clock::{Interval, TimeOfDay, MINUTES_PER_DAY};
use crate::engine::grid::generate_slots;
use crate::engine::BookingError;

// ── Schedule template ──

/// Weekly recurrence the slot grid is generated from. Singleton, admin-edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    /// Weekday numbers, 0 = Sunday .. 6 = Saturday.
    pub weekdays: Vec<u8>,
    pub day_start: TimeOfDay,
    pub day_end: TimeOfDay,
    pub slot_interval: u32,
    /// Sunday is only bookable when this is set, whatever `weekdays` says.
    #[serde(default)]
    pub sunday_scheduling: bool,
    /// Last start time offered to clients for duration-aware queries.
    /// `None` means only the closing time bounds a slot.
    #[serde(default)]
    pub latest_start: Option<TimeOfDay>,
}

impl Default for ScheduleTemplate {
    fn default() -> Self {
        Self {
            weekdays: vec![1, 2, 3, 4, 5, 6],
            day_start: TimeOfDay::from_hm(8, 0).expect("valid time"),
            day_end: TimeOfDay::from_hm(20, 30).expect("valid time"),
            slot_interval: 30,
            sunday_scheduling: false,
            latest_start: TimeOfDay::from_hm(18, 0),
        }
    }
}

impl ScheduleTemplate {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.slot_interval == 0 {
            return Err(BookingError::InvalidConfiguration(
                "slot interval must be positive".into(),
            ));
        }
        if self.slot_interval > MINUTES_PER_DAY {
            return Err(BookingError::InvalidConfiguration(format!(
                "slot interval {} exceeds one day",
                self.slot_interval
            )));
        }
        if self.day_start >= self.day_end {
            return Err(BookingError::InvalidConfiguration(format!(
                "day start {} must be before day end {}",
                self.day_start, self.day_end
            )));
        }
        if let Some(day) = self.weekdays.iter().find(|d| **d > 6) {
            return Err(BookingError::InvalidConfiguration(format!(
                "weekday {day} is out of range 0..=6"
            )));
        }
        if let Some(latest) = self.latest_start {
            if latest < self.day_start || latest > self.day_end {
                return Err(BookingError::InvalidConfiguration(format!(
                    "latest start {latest} is outside {}-{}",
                    self.day_start, self.day_end
                )));
            }
        }
        Ok(())
    }

    /// Weekdays on which bookings are accepted, with the Sunday toggle applied.
    pub fn active_weekdays(&self) -> BTreeSet<u8> {
        let mut days: BTreeSet<u8> = self.weekdays.iter().copied().filter(|d| *d <= 6).collect();
        if self.sunday_scheduling {
            days.insert(0);
        } else {
            days.remove(&0);
        }
        days
    }

    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        self.active_weekdays().contains(&weekday)
    }

    pub fn slots(&self) -> Result<Vec<TimeOfDay>, BookingError> {
        generate_slots(self.day_start, self.day_end, self.slot_interval)
    }
}

// ── Procedures ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub image_url: Option<String>,
}

// ── Bookings ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Statuses whose interval blocks the schedule.
    pub const OCCUPYING: [BookingStatus; 2] = [BookingStatus::Confirmed, BookingStatus::Completed];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn occupies(self) -> bool {
        Self::OCCUPYING.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

/// A booking with the procedure's name, price and duration copied in at
/// creation time. Later procedure edits never change these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub procedure_id: i64,
    pub procedure_name: String,
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub client_name: String,
    pub client_contact: String,
    pub client_birth_date: Option<NaiveDate>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub reminder_sent: bool,
    pub maintenance_reminder_sent: bool,
}

impl Booking {
    pub fn interval(&self) -> Interval {
        self.start_time.span(self.duration_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub contact: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

impl ClientInfo {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.name.trim().chars().count() < 2 {
            return Err(BookingError::Validation(
                "client name must have at least 2 characters".into(),
            ));
        }
        if contact_digits(&self.contact).len() < 10 {
            return Err(BookingError::Validation(
                "client contact must have at least 10 digits including area code".into(),
            ));
        }
        Ok(())
    }
}

/// Digits of a phone-like contact; used as the client key.
pub fn contact_digits(contact: &str) -> String {
    contact.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// One entry of the client directory, derived from booking history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub name: String,
    pub contact: String,
    pub birth_date: Option<NaiveDate>,
    pub booking_count: usize,
    pub last_visit: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BirthdayFilter {
    Today,
    Month,
}

// ── Revenue ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueEntry {
    pub id: i64,
    pub description: String,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub booking_id: i64,
    pub created_at: DateTime<Utc>,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub horizon_days: Option<u32>,
    pub procedure_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRequest {
    pub procedure_id: i64,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    #[serde(flatten)]
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditReservationRequest {
    pub date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub procedure_id: Option<i64>,
    pub client: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Deserialize)]
pub struct ContactQuery {
    pub contact: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientsQuery {
    pub birthdays: Option<BirthdayFilter>,
}

#[derive(Debug, Deserialize)]
pub struct RemindersQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProcedureRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    pub duration_minutes: u32,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProcedureRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<u32>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// Set on rejections: whether repeating the same request may succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
            retryable: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            code: None,
            retryable: None,
        }
    }

    pub fn error_with_code(msg: impl Into<String>, code: &'static str) -> Self {
        Self {
            code: Some(code),
            ..Self::error(msg)
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}
