mod analytics;
mod conflict;
mod eligibility;
mod error;
mod mutations;
mod queries;
mod quota;
mod store;
mod verdict;
#[cfg(test)]
mod tests;

pub use analytics::{Attendance, DashboardMetrics, RangeReport, WeeklyTrend, DEFAULT_TREND_WEEKS};
pub use conflict::find_conflicts;
pub use eligibility::{evaluate, evaluate_match, evaluate_now, today, Advisory, Blocker, Verdict};
pub use error::EngineError;
pub use quota::{check_quota, iso_week, same_iso_week, weekly_count, QuotaCheck};
pub use store::{InMemoryStore, Store};
pub use verdict::{format_verdict, VerdictView};

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;

type LockTable = DashMap<Ulid, Arc<Mutex<()>>>;

/// Registration service over an injected [`Store`].
///
/// Writes that read-then-modify hold the user's lock and then the activity's
/// lock, always in that order.
pub struct Engine {
    store: Arc<dyn Store>,
    pub notify: Arc<NotifyHub>,
    user_locks: LockTable,
    activity_locks: LockTable,
    clock: fn() -> NaiveDate,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, notify: Arc<NotifyHub>) -> Self {
        Self {
            store,
            notify,
            user_locks: DashMap::new(),
            activity_locks: DashMap::new(),
            clock: today,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(NotifyHub::new()))
    }

    /// Replace the source of "today" used by the past-date rule.
    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The date the past-date rule compares against.
    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub(super) async fn lock_user(&self, id: Ulid) -> OwnedMutexGuard<()> {
        lock(&self.user_locks, id).await
    }

    pub(super) async fn lock_activity(&self, id: Ulid) -> OwnedMutexGuard<()> {
        lock(&self.activity_locks, id).await
    }

    /// Drop an activity's lock entry once nobody else holds or waits on it.
    pub(super) fn forget_activity_lock(&self, id: Ulid) {
        self.activity_locks.remove_if(&id, |_, m| Arc::strong_count(m) == 1);
    }

    pub(super) async fn load_activity(&self, id: Ulid) -> Result<Activity, EngineError> {
        self.store.get_activity(id).await?.ok_or(EngineError::NotFound(id))
    }

    pub(super) async fn load_user(&self, id: Ulid) -> Result<UserProfile, EngineError> {
        self.store.get_user(id).await?.ok_or(EngineError::NotFound(id))
    }

    /// A user's bookings joined with activity snapshots. Bookings whose
    /// activity no longer exists are dropped.
    pub(super) async fn booking_infos(
        &self,
        user_id: Ulid,
        kind: Option<BookingKind>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let bookings: Vec<Booking> = self
            .store
            .bookings_for_user(user_id)
            .await?
            .into_iter()
            .filter(|b| kind.is_none_or(|k| b.kind == k))
            .collect();
        self.join_snapshots(&bookings).await
    }

    /// A user's non-cancelled bookings of one kind, not yet joined.
    pub(super) async fn active_bookings(&self, user_id: Ulid, kind: BookingKind) -> Result<Vec<Booking>, EngineError> {
        Ok(self
            .store
            .bookings_for_user(user_id)
            .await?
            .into_iter()
            .filter(|b| b.kind == kind && !b.status.is_cancelled())
            .collect())
    }

    pub(super) async fn join_snapshots(&self, bookings: &[Booking]) -> Result<Vec<BookingInfo>, EngineError> {
        let mut infos = Vec::with_capacity(bookings.len());
        for b in bookings {
            if let Some(activity) = self.store.get_activity(b.activity_id).await? {
                infos.push(BookingInfo::from_parts(b, &activity));
            }
        }
        Ok(infos)
    }

    pub(super) fn publish(&self, event: Event) {
        self.notify.send(event.activity_id(), &event);
    }
}

async fn lock(table: &LockTable, id: Ulid) -> OwnedMutexGuard<()> {
    let mutex = table.entry(id).or_default().value().clone();
    mutex.lock_owned().await
}
