use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Persistence seam for the engine. Every read hands back an owned copy;
/// nothing the caller holds aliases store state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_activity(&self, activity: Activity) -> Result<(), EngineError>;
    async fn get_activity(&self, id: Ulid) -> Result<Option<Activity>, EngineError>;
    /// Replace an existing activity. `NotFound` if absent.
    async fn update_activity(&self, activity: Activity) -> Result<(), EngineError>;
    async fn remove_activity(&self, id: Ulid) -> Result<Option<Activity>, EngineError>;
    async fn list_activities(&self) -> Result<Vec<Activity>, EngineError>;
    async fn activity_count(&self) -> Result<usize, EngineError>;

    async fn insert_booking(&self, booking: Booking) -> Result<(), EngineError>;
    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError>;
    /// Replace an existing booking. `NotFound` if absent.
    async fn update_booking(&self, booking: Booking) -> Result<(), EngineError>;
    /// A user's bookings in creation order.
    async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, EngineError>;
    async fn bookings_for_activity(&self, activity_id: Ulid) -> Result<Vec<Booking>, EngineError>;

    async fn upsert_user(&self, user: UserProfile) -> Result<(), EngineError>;
    async fn get_user(&self, id: Ulid) -> Result<Option<UserProfile>, EngineError>;
    async fn list_users(&self) -> Result<Vec<UserProfile>, EngineError>;
}

pub struct InMemoryStore {
    activities: DashMap<Ulid, Activity>,
    bookings: DashMap<Ulid, Booking>,
    users: DashMap<Ulid, UserProfile>,
    /// user id → booking ids, in insertion order
    by_user: DashMap<Ulid, Vec<Ulid>>,
    /// activity id → booking ids, in insertion order
    by_activity: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            activities: DashMap::new(),
            bookings: DashMap::new(),
            users: DashMap::new(),
            by_user: DashMap::new(),
            by_activity: DashMap::new(),
        }
    }

    fn collect_bookings(&self, ids: &[Ulid]) -> Vec<Booking> {
        ids.iter()
            .filter_map(|id| self.bookings.get(id).map(|b| b.value().clone()))
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_activity(&self, activity: Activity) -> Result<(), EngineError> {
        self.activities.insert(activity.id, activity);
        Ok(())
    }

    async fn get_activity(&self, id: Ulid) -> Result<Option<Activity>, EngineError> {
        Ok(self.activities.get(&id).map(|e| e.value().clone()))
    }

    async fn update_activity(&self, activity: Activity) -> Result<(), EngineError> {
        let mut slot = self
            .activities
            .get_mut(&activity.id)
            .ok_or(EngineError::NotFound(activity.id))?;
        *slot = activity;
        Ok(())
    }

    async fn remove_activity(&self, id: Ulid) -> Result<Option<Activity>, EngineError> {
        Ok(self.activities.remove(&id).map(|(_, a)| a))
    }

    async fn list_activities(&self) -> Result<Vec<Activity>, EngineError> {
        Ok(self.activities.iter().map(|e| e.value().clone()).collect())
    }

    async fn activity_count(&self) -> Result<usize, EngineError> {
        Ok(self.activities.len())
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), EngineError> {
        self.by_user.entry(booking.user_id).or_default().push(booking.id);
        self.by_activity
            .entry(booking.activity_id)
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn update_booking(&self, booking: Booking) -> Result<(), EngineError> {
        let mut slot = self
            .bookings
            .get_mut(&booking.id)
            .ok_or(EngineError::NotFound(booking.id))?;
        *slot = booking;
        Ok(())
    }

    async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let ids = self
            .by_user
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(self.collect_bookings(&ids))
    }

    async fn bookings_for_activity(&self, activity_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let ids = self
            .by_activity
            .get(&activity_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(self.collect_bookings(&ids))
    }

    async fn upsert_user(&self, user: UserProfile) -> Result<(), EngineError> {
        self.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: Ulid) -> Result<Option<UserProfile>, EngineError> {
        Ok(self.users.get(&id).map(|e| e.value().clone()))
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, EngineError> {
        Ok(self.users.iter().map(|e| e.value().clone()).collect())
    }
}
