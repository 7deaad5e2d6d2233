use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    BookingFilter, BookingPatch, BookingStore, NewBooking, NewProcedure, NewRevenueEntry,
    ProcedurePatch, StoreError, StoreTx,
};
use crate::models::{Booking, BookingStatus, Procedure, RevenueEntry, ScheduleTemplate};

#[derive(Debug, Clone, Default)]
struct Tables {
    template: Option<ScheduleTemplate>,
    procedures: BTreeMap<i64, Procedure>,
    bookings: BTreeMap<i64, Booking>,
    revenue: Vec<RevenueEntry>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store. An atomic unit holds the table lock for its whole
/// lifetime and works on a copy that replaces the tables on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    #[cfg(test)]
    offline: Arc<std::sync::atomic::AtomicBool>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with procedures, ids assigned in order.
    pub fn with_procedures(procedures: impl IntoIterator<Item = NewProcedure>) -> Self {
        let mut tables = Tables::default();
        for new in procedures {
            let id = tables.next_id();
            tables.procedures.insert(id, procedure_from(id, &new));
        }
        Self {
            tables: Arc::new(Mutex::new(tables)),
            ..Self::default()
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_online(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn procedure_from(id: i64, new: &NewProcedure) -> Procedure {
    Procedure {
        id,
        name: new.name.clone(),
        description: new.description.clone(),
        price_cents: new.price_cents,
        duration_minutes: new.duration_minutes,
        image_url: new.image_url.clone(),
    }
}

fn sorted(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by_key(|b| (b.date, b.start_time, b.id));
    bookings
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn schedule_template(&self) -> Result<ScheduleTemplate, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        Ok(tables
            .template
            .get_or_insert_with(ScheduleTemplate::default)
            .clone())
    }

    async fn save_schedule_template(&self, template: &ScheduleTemplate) -> Result<(), StoreError> {
        self.check_online()?;
        self.tables.lock().await.template = Some(template.clone());
        Ok(())
    }

    async fn procedures(&self) -> Result<Vec<Procedure>, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().await.procedures.values().cloned().collect())
    }

    async fn procedure(&self, id: i64) -> Result<Option<Procedure>, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().await.procedures.get(&id).cloned())
    }

    async fn insert_procedure(&self, new: &NewProcedure) -> Result<Procedure, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let procedure = procedure_from(id, new);
        tables.procedures.insert(id, procedure.clone());
        Ok(procedure)
    }

    async fn update_procedure(
        &self,
        id: i64,
        patch: &ProcedurePatch,
    ) -> Result<Option<Procedure>, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.procedures.get_mut(&id).map(|p| {
            patch.apply(p);
            p.clone()
        }))
    }

    async fn delete_procedure(&self, id: i64) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().await.procedures.remove(&id).is_some())
    }

    async fn bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables
                .bookings
                .values()
                .filter(|b| filter.matches(b))
                .cloned()
                .collect(),
        ))
    }

    async fn revenue_entries(&self) -> Result<Vec<RevenueEntry>, StoreError> {
        self.check_online()?;
        let mut entries = self.tables.lock().await.revenue.clone();
        entries.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        self.check_online()?;
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn bookings_on(
        &mut self,
        date: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        let filter = BookingFilter::on(date).with_statuses(statuses);
        Ok(sorted(
            self.working
                .bookings
                .values()
                .filter(|b| filter.matches(b))
                .cloned()
                .collect(),
        ))
    }

    async fn booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        Ok(self.working.bookings.get(&id).cloned())
    }

    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError> {
        let id = self.working.next_id();
        let booking = Booking {
            id,
            procedure_id: new.procedure_id,
            procedure_name: new.procedure_name.clone(),
            price_cents: new.price_cents,
            duration_minutes: new.duration_minutes,
            date: new.date,
            start_time: new.start_time,
            client_name: new.client_name.clone(),
            client_contact: new.client_contact.clone(),
            client_birth_date: new.client_birth_date,
            status: new.status,
            created_at: new.created_at,
            reminder_sent: false,
            maintenance_reminder_sent: false,
        };
        self.working.bookings.insert(id, booking.clone());
        Ok(booking)
    }

    async fn update_booking(
        &mut self,
        id: i64,
        patch: &BookingPatch,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self.working.bookings.get_mut(&id).map(|b| {
            patch.apply(b);
            b.clone()
        }))
    }

    async fn delete_booking(&mut self, id: i64) -> Result<bool, StoreError> {
        Ok(self.working.bookings.remove(&id).is_some())
    }

    async fn insert_revenue_entry(
        &mut self,
        new: &NewRevenueEntry,
    ) -> Result<RevenueEntry, StoreError> {
        if self.working.revenue.iter().any(|e| e.booking_id == new.booking_id) {
            return Err(StoreError::Constraint(format!(
                "revenue entry for booking {} already exists",
                new.booking_id
            )));
        }
        let entry = RevenueEntry {
            id: self.working.next_id(),
            description: new.description.clone(),
            amount_cents: new.amount_cents,
            date: new.date,
            booking_id: new.booking_id,
            created_at: Utc::now(),
        };
        self.working.revenue.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
