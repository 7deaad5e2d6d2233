use chrono::{Datelike, Days, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::availability::{compute_availability, AvailabilityMap, SlotQuery, DEFAULT_HORIZON_DAYS, MAX_HORIZON_DAYS};
use super::clock::{StudioClock, TimeOfDay, MINUTES_PER_DAY};
use super::occupancy::FitBounds;
use super::{guard, lifecycle, BookingError};
use crate::models::{
    contact_digits, BirthdayFilter, Booking, BookingStatus, BookingsQuery, ClientSummary,
    ClientsQuery, CreateProcedureRequest,
    EditReservationRequest, Procedure, ReservationRequest, RevenueEntry, ScheduleTemplate,
    UpdateProcedureRequest,
};
use crate::store::migrate::default_catalog;
use crate::store::{BookingFilter, BookingPatch, BookingStore, NewBooking, NewProcedure, ProcedurePatch};

pub const DEFAULT_MAINTENANCE_PERIOD_DAYS: u32 = 21;

/// Who created a reservation. Decides the initial status and whether the
/// schedule template constrains the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOrigin {
    /// Self-service request; starts `pending` and must lie on the template.
    Client,
    /// Entered by the studio; starts `confirmed`, only the guard applies.
    Admin,
}

impl BookingOrigin {
    fn initial_status(self) -> BookingStatus {
        match self {
            BookingOrigin::Client => BookingStatus::Pending,
            BookingOrigin::Admin => BookingStatus::Confirmed,
        }
    }
}

pub struct BookingService {
    store: Arc<dyn BookingStore>,
    clock: StudioClock,
    horizon_days: u32,
    maintenance_period_days: u32,
}

impl BookingService {
    pub fn new(store: Arc<dyn BookingStore>, clock: StudioClock) -> Self {
        Self {
            store,
            clock,
            horizon_days: DEFAULT_HORIZON_DAYS,
            maintenance_period_days: DEFAULT_MAINTENANCE_PERIOD_DAYS,
        }
    }

    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    pub fn with_maintenance_period_days(mut self, days: u32) -> Self {
        self.maintenance_period_days = days;
        self
    }

    pub async fn ping(&self) -> Result<(), BookingError> {
        Ok(self.store.ping().await?)
    }

    // ── Schedule template ──

    pub async fn schedule_template(&self) -> Result<ScheduleTemplate, BookingError> {
        Ok(self.store.schedule_template().await?)
    }

    pub async fn update_schedule_template(
        &self,
        template: ScheduleTemplate,
    ) -> Result<ScheduleTemplate, BookingError> {
        template.validate()?;
        self.store.save_schedule_template(&template).await?;
        tracing::info!(
            "Schedule template updated: weekdays={:?} {}-{} every {} min, sunday={}",
            template.weekdays,
            template.day_start,
            template.day_end,
            template.slot_interval,
            template.sunday_scheduling
        );
        Ok(template)
    }

    // ── Procedures ──

    pub async fn procedures(&self) -> Result<Vec<Procedure>, BookingError> {
        Ok(self.store.procedures().await?)
    }

    pub async fn procedure(&self, id: i64) -> Result<Procedure, BookingError> {
        self.store
            .procedure(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("procedure {id}")))
    }

    pub async fn create_procedure(
        &self,
        req: CreateProcedureRequest,
    ) -> Result<Procedure, BookingError> {
        let new = NewProcedure {
            name: req.name.trim().to_string(),
            description: req.description.unwrap_or_default(),
            price_cents: req.price_cents,
            duration_minutes: req.duration_minutes,
            image_url: req.image_url.filter(|url| !url.is_empty()),
        };
        validate_procedure(&new.name, new.price_cents, new.duration_minutes)?;

        let procedure = self.store.insert_procedure(&new).await?;
        tracing::info!("Procedure created: {} ({})", procedure.name, procedure.id);
        Ok(procedure)
    }

    /// Existing bookings keep their snapshot of the old values.
    pub async fn update_procedure(
        &self,
        id: i64,
        req: UpdateProcedureRequest,
    ) -> Result<Procedure, BookingError> {
        let current = self.procedure(id).await?;
        let patch = ProcedurePatch {
            name: req.name.map(|n| n.trim().to_string()),
            description: req.description,
            price_cents: req.price_cents,
            duration_minutes: req.duration_minutes,
            image_url: req.image_url,
        };
        let mut preview = current;
        patch.apply(&mut preview);
        validate_procedure(&preview.name, preview.price_cents, preview.duration_minutes)?;

        let updated = self
            .store
            .update_procedure(id, &patch)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("procedure {id}")))?;
        tracing::info!("Procedure updated: {} ({})", updated.name, updated.id);
        Ok(updated)
    }

    pub async fn delete_procedure(&self, id: i64) -> Result<(), BookingError> {
        if !self.store.delete_procedure(id).await? {
            return Err(BookingError::NotFound(format!("procedure {id}")));
        }
        tracing::info!("Procedure deleted: {}", id);
        Ok(())
    }

    /// Adds every default procedure whose name is missing. Fails when the
    /// whole catalog is already present.
    pub async fn restore_default_procedures(&self) -> Result<Vec<Procedure>, BookingError> {
        let existing: HashSet<String> = self
            .store
            .procedures()
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();
        let missing: Vec<NewProcedure> = default_catalog()
            .into_iter()
            .filter(|p| !existing.contains(&p.name))
            .collect();
        if missing.is_empty() {
            return Err(BookingError::Validation(
                "default procedures already exist".into(),
            ));
        }

        let mut added = Vec::with_capacity(missing.len());
        for new in &missing {
            added.push(self.store.insert_procedure(new).await?);
        }
        tracing::info!("Restored {} default procedures", added.len());
        Ok(added)
    }

    // ── Availability ──

    /// Duration-agnostic free slots: each candidate occupies one slot interval.
    pub async fn availability(
        &self,
        horizon_days: Option<u32>,
    ) -> Result<AvailabilityMap, BookingError> {
        self.compute(SlotQuery::AnyProcedure, horizon_days).await
    }

    /// Free slots where `procedure_id` fits entirely.
    pub async fn availability_for(
        &self,
        procedure_id: i64,
        horizon_days: Option<u32>,
    ) -> Result<AvailabilityMap, BookingError> {
        self.compute(SlotQuery::Procedure(procedure_id), horizon_days)
            .await
    }

    async fn compute(
        &self,
        query: SlotQuery,
        horizon_days: Option<u32>,
    ) -> Result<AvailabilityMap, BookingError> {
        let horizon = self.horizon(horizon_days)?;
        let today = self.clock.today();
        let template = self.store.schedule_template().await?;
        let procedures = match query {
            SlotQuery::AnyProcedure => Vec::new(),
            SlotQuery::Procedure(_) => self.store.procedures().await?,
        };
        let bookings = self
            .store
            .bookings(&BookingFilter::from_date(today).with_statuses(&BookingStatus::OCCUPYING))
            .await?;

        compute_availability(&template, &procedures, &bookings, query, today, horizon)
    }

    fn horizon(&self, requested: Option<u32>) -> Result<u32, BookingError> {
        let days = requested.unwrap_or(self.horizon_days);
        if days == 0 || days > MAX_HORIZON_DAYS {
            return Err(BookingError::Validation(format!(
                "horizon must be between 1 and {MAX_HORIZON_DAYS} days"
            )));
        }
        Ok(days)
    }

    /// Client-side constraints on a slot, checked before the guard: working
    /// day within the horizon, not in the past, on the grid, and fitting
    /// before closing and the latest start.
    fn check_on_template(
        &self,
        template: &ScheduleTemplate,
        date: NaiveDate,
        start: TimeOfDay,
        duration_minutes: u32,
    ) -> Result<(), BookingError> {
        template.validate()?;
        let today = self.clock.today();

        if date < today || (date == today && start <= self.clock.time_now()) {
            return Err(BookingError::Validation(format!(
                "{date} {start} is in the past"
            )));
        }
        let horizon_end = today.checked_add_days(Days::new(u64::from(self.horizon_days)));
        if horizon_end.is_some_and(|end| date >= end) {
            return Err(BookingError::Validation(format!(
                "{date} is beyond the booking horizon"
            )));
        }
        if !template.is_open_on(date) {
            return Err(BookingError::Validation(format!(
                "{date} is not a working day"
            )));
        }
        if !template.slots()?.contains(&start) {
            return Err(BookingError::Validation(format!(
                "{start} is not a bookable start time"
            )));
        }
        let fit = FitBounds {
            closing: template.day_end,
            latest_start: template.latest_start,
        };
        if !fit.admits(start, duration_minutes) {
            return Err(BookingError::Validation(format!(
                "a {duration_minutes}-minute procedure cannot start at {start}"
            )));
        }
        Ok(())
    }

    // ── Reservations ──

    pub async fn reserve(
        &self,
        req: ReservationRequest,
        origin: BookingOrigin,
    ) -> Result<Booking, BookingError> {
        req.client.validate()?;
        let procedure = self.procedure(req.procedure_id).await?;
        if origin == BookingOrigin::Client {
            let template = self.store.schedule_template().await?;
            self.check_on_template(&template, req.date, req.start_time, procedure.duration_minutes)?;
        }

        let new = NewBooking {
            procedure_id: procedure.id,
            procedure_name: procedure.name,
            price_cents: procedure.price_cents,
            duration_minutes: procedure.duration_minutes,
            date: req.date,
            start_time: req.start_time,
            client_name: req.client.name.trim().to_string(),
            client_contact: req.client.contact.trim().to_string(),
            client_birth_date: req.client.birth_date,
            status: origin.initial_status(),
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        let booking = guard::try_reserve(tx.as_mut(), &new)
            .await
            .inspect_err(|e| log_rejection("reserve", e))?;
        tx.commit().await?;

        tracing::info!(
            "Booking created: id={} {} {} {} ({})",
            booking.id,
            booking.date,
            booking.start_time,
            booking.procedure_name,
            booking.status
        );
        Ok(booking)
    }

    /// Moves and/or re-details a pending or confirmed booking. The result is
    /// pending again and needs a new confirmation.
    pub async fn edit_reservation(
        &self,
        id: i64,
        req: EditReservationRequest,
        origin: BookingOrigin,
    ) -> Result<Booking, BookingError> {
        if let Some(client) = &req.client {
            client.validate()?;
        }
        // store reads outside the unit must happen before it is opened
        let new_procedure = match req.procedure_id {
            Some(pid) => Some(self.procedure(pid).await?),
            None => None,
        };
        let template = match origin {
            BookingOrigin::Client => Some(self.store.schedule_template().await?),
            BookingOrigin::Admin => None,
        };

        let mut tx = self.store.begin().await?;
        let current = tx
            .booking(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {id}")))?;
        if !matches!(current.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(BookingError::InvalidTransition {
                from: current.status,
                to: BookingStatus::Pending,
            });
        }

        let date = req.date.unwrap_or(current.date);
        let start = req.start_time.unwrap_or(current.start_time);
        let moved = date != current.date || start != current.start_time;

        let mut patch = BookingPatch {
            date: Some(date),
            start_time: Some(start),
            status: Some(BookingStatus::Pending),
            reminder_sent: Some(false),
            ..BookingPatch::default()
        };
        let mut duration = current.duration_minutes;
        if let Some(procedure) = new_procedure.filter(|p| p.id != current.procedure_id) {
            duration = procedure.duration_minutes;
            patch.procedure_id = Some(procedure.id);
            patch.procedure_name = Some(procedure.name);
            patch.price_cents = Some(procedure.price_cents);
            patch.duration_minutes = Some(procedure.duration_minutes);
        }
        if let Some(client) = req.client {
            patch.client_name = Some(client.name.trim().to_string());
            patch.client_contact = Some(client.contact.trim().to_string());
            patch.client_birth_date = Some(client.birth_date);
        }

        if moved {
            if let Some(template) = &template {
                self.check_on_template(template, date, start, duration)?;
            }
            guard::ensure_free(tx.as_mut(), date, start, duration, Some(id))
                .await
                .inspect_err(|e| log_rejection("edit", e))?;
        }

        let updated = tx
            .update_booking(id, &patch)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {id}")))?;
        tx.commit().await?;

        tracing::info!(
            "Booking edited: id={} {} {} -> {} {}",
            id,
            current.date,
            current.start_time,
            updated.date,
            updated.start_time
        );
        Ok(updated)
    }

    pub async fn set_status(&self, id: i64, status: BookingStatus) -> Result<Booking, BookingError> {
        let mut tx = self.store.begin().await?;
        let current = tx
            .booking(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {id}")))?;
        let updated = lifecycle::apply_status(tx.as_mut(), &current, status)
            .await
            .inspect_err(|e| log_rejection("set_status", e))?;
        tx.commit().await?;

        tracing::info!("Booking {} status: {} -> {}", id, current.status, updated.status);
        Ok(updated)
    }

    pub async fn cancel(&self, id: i64) -> Result<Booking, BookingError> {
        self.set_status(id, BookingStatus::Cancelled).await
    }

    /// Hard delete. Frees the interval without keeping history.
    pub async fn discard(&self, id: i64) -> Result<(), BookingError> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_booking(id).await? {
            return Err(BookingError::NotFound(format!("booking {id}")));
        }
        tx.commit().await?;
        tracing::info!("Booking discarded: {}", id);
        Ok(())
    }

    // ── Listings ──

    pub async fn bookings(&self, query: &BookingsQuery) -> Result<Vec<Booking>, BookingError> {
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(BookingError::Validation(format!(
                    "range start {from} is after range end {to}"
                )));
            }
        }
        let filter = BookingFilter {
            date: query.date,
            from: query.from,
            to: query.to,
            statuses: query.status.into_iter().collect(),
        };
        Ok(self.store.bookings(&filter).await?)
    }

    /// Bookings whose contact, reduced to digits, ends with the digits of
    /// `contact`. A query without digits matches nothing.
    pub async fn bookings_by_contact(&self, contact: &str) -> Result<Vec<Booking>, BookingError> {
        let digits = contact_digits(contact);
        if digits.is_empty() {
            return Ok(Vec::new());
        }
        let mut bookings: Vec<Booking> = self
            .store
            .bookings(&BookingFilter::default())
            .await?
            .into_iter()
            .filter(|b| contact_digits(&b.client_contact).ends_with(&digits))
            .collect();
        bookings.sort_by(|a, b| (b.date, b.start_time).cmp(&(a.date, a.start_time)));
        Ok(bookings)
    }

    /// Client directory built from every booking, one entry per contact
    /// digits. Name and contact come from the latest booking; the birth date
    /// from the latest booking that carries one.
    pub async fn clients(&self, query: &ClientsQuery) -> Result<Vec<ClientSummary>, BookingError> {
        let mut bookings = self.store.bookings(&BookingFilter::default()).await?;
        bookings.sort_by(|a, b| (b.date, b.start_time, b.id).cmp(&(a.date, a.start_time, a.id)));

        let mut by_contact: HashMap<String, ClientSummary> = HashMap::new();
        for booking in bookings {
            let key = contact_digits(&booking.client_contact);
            if key.is_empty() {
                continue;
            }
            let entry = by_contact.entry(key).or_insert_with(|| ClientSummary {
                name: booking.client_name.clone(),
                contact: booking.client_contact.clone(),
                birth_date: None,
                booking_count: 0,
                last_visit: booking.date,
            });
            entry.booking_count += 1;
            if entry.birth_date.is_none() {
                entry.birth_date = booking.client_birth_date;
            }
        }

        let today = self.clock.today();
        let mut clients: Vec<ClientSummary> = by_contact
            .into_values()
            .filter(|c| match (query.birthdays, c.birth_date) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(BirthdayFilter::Month), Some(born)) => born.month() == today.month(),
                (Some(BirthdayFilter::Today), Some(born)) => {
                    (born.month(), born.day()) == (today.month(), today.day())
                }
            })
            .collect();
        match query.birthdays {
            Some(_) => clients.sort_by_key(|c| (c.birth_date.map(|d| d.day()), c.name.to_lowercase())),
            None => clients.sort_by_key(|c| c.name.to_lowercase()),
        }
        Ok(clients)
    }

    pub async fn revenue_entries(&self) -> Result<Vec<RevenueEntry>, BookingError> {
        Ok(self.store.revenue_entries().await?)
    }

    // ── Reminders ──

    /// Confirmed bookings on `date` (default tomorrow) not yet reminded.
    pub async fn due_reminders(&self, date: Option<NaiveDate>) -> Result<Vec<Booking>, BookingError> {
        let date = match date {
            Some(d) => d,
            None => self
                .clock
                .today()
                .succ_opt()
                .ok_or_else(|| BookingError::Validation("date out of range".into()))?,
        };
        let filter = BookingFilter::on(date).with_statuses(&[BookingStatus::Confirmed]);
        Ok(self
            .store
            .bookings(&filter)
            .await?
            .into_iter()
            .filter(|b| !b.reminder_sent)
            .collect())
    }

    pub async fn mark_reminder_sent(&self, id: i64) -> Result<Booking, BookingError> {
        self.patch_flags(
            id,
            BookingPatch {
                reminder_sent: Some(true),
                ..BookingPatch::default()
            },
        )
        .await
    }

    /// Completed bookings at least `period_days` old (default from config)
    /// whose maintenance reminder has not been sent.
    pub async fn maintenance_due(&self, period_days: Option<u32>) -> Result<Vec<Booking>, BookingError> {
        let period = period_days.unwrap_or(self.maintenance_period_days);
        if period == 0 {
            return Err(BookingError::Validation(
                "maintenance period must be positive".into(),
            ));
        }
        let Some(cutoff) = self.clock.today().checked_sub_days(Days::new(u64::from(period))) else {
            return Ok(Vec::new());
        };
        let filter = BookingFilter {
            to: Some(cutoff),
            ..BookingFilter::default()
        }
        .with_statuses(&[BookingStatus::Completed]);
        Ok(self
            .store
            .bookings(&filter)
            .await?
            .into_iter()
            .filter(|b| !b.maintenance_reminder_sent)
            .collect())
    }

    pub async fn mark_maintenance_reminder_sent(&self, id: i64) -> Result<Booking, BookingError> {
        self.patch_flags(
            id,
            BookingPatch {
                maintenance_reminder_sent: Some(true),
                ..BookingPatch::default()
            },
        )
        .await
    }

    async fn patch_flags(&self, id: i64, patch: BookingPatch) -> Result<Booking, BookingError> {
        let mut tx = self.store.begin().await?;
        let updated = tx
            .update_booking(id, &patch)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {id}")))?;
        tx.commit().await?;
        Ok(updated)
    }
}

fn validate_procedure(name: &str, price_cents: i64, duration_minutes: u32) -> Result<(), BookingError> {
    if name.is_empty() {
        return Err(BookingError::Validation("procedure name is required".into()));
    }
    if price_cents < 0 {
        return Err(BookingError::Validation("price cannot be negative".into()));
    }
    if duration_minutes == 0 {
        return Err(BookingError::Validation("duration must be positive".into()));
    }
    if duration_minutes > MINUTES_PER_DAY {
        return Err(BookingError::Validation(format!(
            "duration {duration_minutes} min exceeds one day"
        )));
    }
    Ok(())
}

/// Store failures are left to the caller, which logs them at error level.
fn log_rejection(op: &str, e: &BookingError) {
    if !matches!(e, BookingError::StoreUnavailable(_)) {
        tracing::warn!("{} rejected: {}", op, e);
    }
}
