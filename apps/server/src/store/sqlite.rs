use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    migrate, BookingFilter, BookingPatch, BookingStore, NewBooking, NewProcedure,
    NewRevenueEntry, ProcedurePatch, StoreError, StoreTx,
};
use crate::engine::clock::TimeOfDay;
use crate::models::{Booking, BookingStatus, Procedure, RevenueEntry, ScheduleTemplate};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const BOOKING_COLUMNS: &str = "id, procedure_id, procedure_name, price_cents, duration_minutes,
     date, start_time, client_name, client_contact, client_birth_date, status, created_at,
     reminder_sent, maintenance_reminder_sent";

const PROCEDURE_COLUMNS: &str = "id, name, description, price_cents, duration_minutes, image_url";

/// SQLite-backed store.
///
/// Atomic units additionally take `write_gate`, so at most one is open per
/// process and the occupancy read inside a unit cannot go stale before its
/// insert commits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Opens the pool (WAL, busy timeout) and applies pending migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

// ── Row mapping ──

#[derive(sqlx::FromRow)]
struct TemplateRow {
    weekdays: String,
    day_start: String,
    day_end: String,
    slot_interval: i64,
    sunday_scheduling: bool,
    latest_start: Option<String>,
}

impl TryFrom<TemplateRow> for ScheduleTemplate {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let weekdays = row
            .weekdays
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u8>().map_err(|e| StoreError::Corrupt(format!("weekday '{s}': {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScheduleTemplate {
            weekdays,
            day_start: parse_time(&row.day_start)?,
            day_end: parse_time(&row.day_end)?,
            slot_interval: u32::try_from(row.slot_interval)
                .map_err(|_| StoreError::Corrupt(format!("slot interval {}", row.slot_interval)))?,
            sunday_scheduling: row.sunday_scheduling,
            latest_start: row.latest_start.as_deref().map(parse_time).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProcedureRow {
    id: i64,
    name: String,
    description: String,
    price_cents: i64,
    duration_minutes: i64,
    image_url: Option<String>,
}

impl TryFrom<ProcedureRow> for Procedure {
    type Error = StoreError;

    fn try_from(row: ProcedureRow) -> Result<Self, Self::Error> {
        Ok(Procedure {
            id: row.id,
            name: row.name,
            description: row.description,
            price_cents: row.price_cents,
            duration_minutes: parse_duration(row.duration_minutes)?,
            image_url: row.image_url.filter(|url| !url.is_empty()),
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    procedure_id: i64,
    procedure_name: String,
    price_cents: i64,
    duration_minutes: i64,
    date: NaiveDate,
    start_time: String,
    client_name: String,
    client_contact: String,
    client_birth_date: Option<NaiveDate>,
    status: String,
    created_at: DateTime<Utc>,
    reminder_sent: bool,
    maintenance_reminder_sent: bool,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            procedure_id: row.procedure_id,
            procedure_name: row.procedure_name,
            price_cents: row.price_cents,
            duration_minutes: parse_duration(row.duration_minutes)?,
            date: row.date,
            start_time: parse_time(&row.start_time)?,
            client_name: row.client_name,
            client_contact: row.client_contact,
            client_birth_date: row.client_birth_date,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            reminder_sent: row.reminder_sent,
            maintenance_reminder_sent: row.maintenance_reminder_sent,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RevenueRow {
    id: i64,
    description: String,
    amount_cents: i64,
    date: NaiveDate,
    booking_id: i64,
    created_at: DateTime<Utc>,
}

impl From<RevenueRow> for RevenueEntry {
    fn from(row: RevenueRow) -> Self {
        RevenueEntry {
            id: row.id,
            description: row.description,
            amount_cents: row.amount_cents,
            date: row.date,
            booking_id: row.booking_id,
            created_at: row.created_at,
        }
    }
}

fn parse_time(raw: &str) -> Result<TimeOfDay, StoreError> {
    raw.parse::<TimeOfDay>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn parse_duration(minutes: i64) -> Result<u32, StoreError> {
    u32::try_from(minutes).map_err(|_| StoreError::Corrupt(format!("duration {minutes}")))
}

fn join_weekdays(weekdays: &[u8]) -> String {
    weekdays
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn status_placeholders(statuses: &[BookingStatus]) -> String {
    vec!["?"; statuses.len()].join(", ")
}

fn to_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

// ── Store ──

#[async_trait]
impl BookingStore for SqliteStore {
    async fn schedule_template(&self) -> Result<ScheduleTemplate, StoreError> {
        let row = sqlx::query_as::<_, TemplateRow>(
            "SELECT weekdays, day_start, day_end, slot_interval, sunday_scheduling, latest_start
             FROM schedule_template WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let template = ScheduleTemplate::default();
                self.save_schedule_template(&template).await?;
                tracing::info!("Created default schedule template");
                Ok(template)
            }
        }
    }

    async fn save_schedule_template(&self, template: &ScheduleTemplate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO schedule_template
                (id, weekdays, day_start, day_end, slot_interval, sunday_scheduling, latest_start, updated_at)
             VALUES (1, ?, ?, ?, ?, ?, ?, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                weekdays = excluded.weekdays,
                day_start = excluded.day_start,
                day_end = excluded.day_end,
                slot_interval = excluded.slot_interval,
                sunday_scheduling = excluded.sunday_scheduling,
                latest_start = excluded.latest_start,
                updated_at = excluded.updated_at",
        )
        .bind(join_weekdays(&template.weekdays))
        .bind(template.day_start.to_string())
        .bind(template.day_end.to_string())
        .bind(i64::from(template.slot_interval))
        .bind(template.sunday_scheduling)
        .bind(template.latest_start.map(|t| t.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn procedures(&self) -> Result<Vec<Procedure>, StoreError> {
        let rows = sqlx::query_as::<_, ProcedureRow>(&format!(
            "SELECT {PROCEDURE_COLUMNS} FROM procedures ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Procedure::try_from).collect()
    }

    async fn procedure(&self, id: i64) -> Result<Option<Procedure>, StoreError> {
        let row = sqlx::query_as::<_, ProcedureRow>(&format!(
            "SELECT {PROCEDURE_COLUMNS} FROM procedures WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Procedure::try_from).transpose()
    }

    async fn insert_procedure(&self, new: &NewProcedure) -> Result<Procedure, StoreError> {
        let id = sqlx::query(
            "INSERT INTO procedures (name, description, price_cents, duration_minutes, image_url)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.price_cents)
        .bind(i64::from(new.duration_minutes))
        .bind(&new.image_url)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.procedure(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("procedure {id} vanished after insert")))
    }

    async fn update_procedure(
        &self,
        id: i64,
        patch: &ProcedurePatch,
    ) -> Result<Option<Procedure>, StoreError> {
        let Some(mut procedure) = self.procedure(id).await? else {
            return Ok(None);
        };
        patch.apply(&mut procedure);

        sqlx::query(
            "UPDATE procedures SET name = ?, description = ?, price_cents = ?,
                    duration_minutes = ?, image_url = ?
             WHERE id = ?",
        )
        .bind(&procedure.name)
        .bind(&procedure.description)
        .bind(procedure.price_cents)
        .bind(i64::from(procedure.duration_minutes))
        .bind(&procedure.image_url)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(Some(procedure))
    }

    async fn delete_procedure(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM procedures WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let mut sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE 1 = 1");
        if filter.date.is_some() {
            sql.push_str(" AND date = ?");
        }
        if filter.from.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if filter.to.is_some() {
            sql.push_str(" AND date <= ?");
        }
        if !filter.statuses.is_empty() {
            sql.push_str(&format!(" AND status IN ({})", status_placeholders(&filter.statuses)));
        }
        sql.push_str(" ORDER BY date ASC, start_time ASC, id ASC");

        let mut query = sqlx::query_as::<_, BookingRow>(&sql);
        for date in [filter.date, filter.from, filter.to].into_iter().flatten() {
            query = query.bind(date);
        }
        for status in &filter.statuses {
            query = query.bind(status.as_str());
        }
        to_bookings(query.fetch_all(&self.pool).await?)
    }

    async fn revenue_entries(&self) -> Result<Vec<RevenueEntry>, StoreError> {
        let rows = sqlx::query_as::<_, RevenueRow>(
            "SELECT id, description, amount_cents, date, booking_id, created_at
             FROM revenue_entries ORDER BY date DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RevenueEntry::from).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx, _gate: gate }))
    }
}

// ── Atomic unit ──

/// `tx` is declared first so it rolls back before the gate is released.
struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn bookings_on(
        &mut self,
        date: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        let mut sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE date = ?");
        if !statuses.is_empty() {
            sql.push_str(&format!(" AND status IN ({})", status_placeholders(statuses)));
        }
        sql.push_str(" ORDER BY start_time ASC, id ASC");

        let mut query = sqlx::query_as::<_, BookingRow>(&sql).bind(date);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        to_bookings(query.fetch_all(&mut *self.tx).await?)
    }

    async fn booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError> {
        let id = sqlx::query(
            "INSERT INTO bookings (procedure_id, procedure_name, price_cents, duration_minutes,
                    date, start_time, client_name, client_contact, client_birth_date, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.procedure_id)
        .bind(&new.procedure_name)
        .bind(new.price_cents)
        .bind(i64::from(new.duration_minutes))
        .bind(new.date)
        .bind(new.start_time.to_string())
        .bind(&new.client_name)
        .bind(&new.client_contact)
        .bind(new.client_birth_date)
        .bind(new.status.as_str())
        .bind(new.created_at)
        .execute(&mut *self.tx)
        .await?
        .last_insert_rowid();

        self.booking(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("booking {id} vanished after insert")))
    }

    async fn update_booking(
        &mut self,
        id: i64,
        patch: &BookingPatch,
    ) -> Result<Option<Booking>, StoreError> {
        let Some(mut booking) = self.booking(id).await? else {
            return Ok(None);
        };
        patch.apply(&mut booking);

        sqlx::query(
            "UPDATE bookings SET procedure_id = ?, procedure_name = ?, price_cents = ?,
                    duration_minutes = ?, date = ?, start_time = ?, client_name = ?,
                    client_contact = ?, client_birth_date = ?, status = ?,
                    reminder_sent = ?, maintenance_reminder_sent = ?
             WHERE id = ?",
        )
        .bind(booking.procedure_id)
        .bind(&booking.procedure_name)
        .bind(booking.price_cents)
        .bind(i64::from(booking.duration_minutes))
        .bind(booking.date)
        .bind(booking.start_time.to_string())
        .bind(&booking.client_name)
        .bind(&booking.client_contact)
        .bind(booking.client_birth_date)
        .bind(booking.status.as_str())
        .bind(booking.reminder_sent)
        .bind(booking.maintenance_reminder_sent)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(Some(booking))
    }

    async fn delete_booking(&mut self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_revenue_entry(
        &mut self,
        new: &NewRevenueEntry,
    ) -> Result<RevenueEntry, StoreError> {
        let created_at = Utc::now();
        let id = sqlx::query(
            "INSERT INTO revenue_entries (description, amount_cents, date, booking_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new.description)
        .bind(new.amount_cents)
        .bind(new.date)
        .bind(new.booking_id)
        .bind(created_at)
        .execute(&mut *self.tx)
        .await?
        .last_insert_rowid();

        Ok(RevenueEntry {
            id,
            description: new.description.clone(),
            amount_cents: new.amount_cents,
            date: new.date,
            booking_id: new.booking_id,
            created_at,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let SqliteTx { tx, _gate } = *self;
        tx.commit().await?;
        Ok(())
    }
}
