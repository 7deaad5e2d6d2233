//! Persistence collaborator for the booking engine.
//!
//! Plain reads go through [`BookingStore`]. Every mutation of the booking
//! collection runs inside an atomic unit obtained from [`BookingStore::begin`]:
//! reads through the handle see its own writes, [`StoreTx::commit`] applies
//! them, and dropping the handle without committing discards them. Both
//! implementations admit one open unit at a time, so a check-then-insert
//! inside a unit is serializable against every other unit.

pub mod memory;
pub mod migrate;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::engine::clock::TimeOfDay;
use crate::models::{Booking, BookingStatus, Procedure, RevenueEntry, ScheduleTemplate};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, I/O or lock timeout. Nothing was committed.
    #[error("{0}")]
    Unavailable(String),

    /// A persisted row could not be mapped back to a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A uniqueness constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Constraint(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

// ── Write shapes ──

/// Filter for plain booking reads. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub statuses: Vec<BookingStatus>,
}

impl BookingFilter {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn from_date(from: NaiveDate) -> Self {
        Self {
            from: Some(from),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[BookingStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.date.map_or(true, |d| booking.date == d)
            && self.from.map_or(true, |d| booking.date >= d)
            && self.to.map_or(true, |d| booking.date <= d)
            && (self.statuses.is_empty() || self.statuses.contains(&booking.status))
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
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
}

/// Partial update of a booking; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub procedure_id: Option<i64>,
    pub procedure_name: Option<String>,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<u32>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub client_name: Option<String>,
    pub client_contact: Option<String>,
    pub client_birth_date: Option<Option<NaiveDate>>,
    pub status: Option<BookingStatus>,
    pub reminder_sent: Option<bool>,
    pub maintenance_reminder_sent: Option<bool>,
}

impl BookingPatch {
    pub fn status(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, booking: &mut Booking) {
        if let Some(v) = self.procedure_id {
            booking.procedure_id = v;
        }
        if let Some(v) = &self.procedure_name {
            booking.procedure_name = v.clone();
        }
        if let Some(v) = self.price_cents {
            booking.price_cents = v;
        }
        if let Some(v) = self.duration_minutes {
            booking.duration_minutes = v;
        }
        if let Some(v) = self.date {
            booking.date = v;
        }
        if let Some(v) = self.start_time {
            booking.start_time = v;
        }
        if let Some(v) = &self.client_name {
            booking.client_name = v.clone();
        }
        if let Some(v) = &self.client_contact {
            booking.client_contact = v.clone();
        }
        if let Some(v) = self.client_birth_date {
            booking.client_birth_date = v;
        }
        if let Some(v) = self.status {
            booking.status = v;
        }
        if let Some(v) = self.reminder_sent {
            booking.reminder_sent = v;
        }
        if let Some(v) = self.maintenance_reminder_sent {
            booking.maintenance_reminder_sent = v;
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProcedure {
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcedurePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<u32>,
    pub image_url: Option<String>,
}

impl ProcedurePatch {
    pub fn apply(&self, procedure: &mut Procedure) {
        if let Some(v) = &self.name {
            procedure.name = v.clone();
        }
        if let Some(v) = &self.description {
            procedure.description = v.clone();
        }
        if let Some(v) = self.price_cents {
            procedure.price_cents = v;
        }
        if let Some(v) = self.duration_minutes {
            procedure.duration_minutes = v;
        }
        if let Some(v) = &self.image_url {
            procedure.image_url = Some(v.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRevenueEntry {
    pub description: String,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub booking_id: i64,
}

// ── Traits ──

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Reads the singleton template, persisting the defaults first if absent.
    async fn schedule_template(&self) -> Result<ScheduleTemplate, StoreError>;
    async fn save_schedule_template(&self, template: &ScheduleTemplate) -> Result<(), StoreError>;

    async fn procedures(&self) -> Result<Vec<Procedure>, StoreError>;
    async fn procedure(&self, id: i64) -> Result<Option<Procedure>, StoreError>;
    async fn insert_procedure(&self, new: &NewProcedure) -> Result<Procedure, StoreError>;
    async fn update_procedure(
        &self,
        id: i64,
        patch: &ProcedurePatch,
    ) -> Result<Option<Procedure>, StoreError>;
    /// Returns whether a row was removed. Bookings keep their snapshot.
    async fn delete_procedure(&self, id: i64) -> Result<bool, StoreError>;

    /// Ordered by date, then start time.
    async fn bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;
    async fn revenue_entries(&self) -> Result<Vec<RevenueEntry>, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Opens an atomic unit. Waits while another unit is open.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Bookings on `date` whose status is in `statuses`, ordered by start time.
    async fn bookings_on(
        &mut self,
        date: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError>;
    async fn booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError>;
    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError>;
    async fn update_booking(
        &mut self,
        id: i64,
        patch: &BookingPatch,
    ) -> Result<Option<Booking>, StoreError>;
    async fn delete_booking(&mut self, id: i64) -> Result<bool, StoreError>;
    /// Fails with [`StoreError::Constraint`] if the booking already has an entry.
    async fn insert_revenue_entry(
        &mut self,
        new: &NewRevenueEntry,
    ) -> Result<RevenueEntry, StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
