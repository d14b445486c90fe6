use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::eligibility::{evaluate, Verdict};
use super::quota::{check_quota, QuotaCheck};
use super::{Engine, EngineError};

fn chronological(activities: &mut [Activity]) {
    activities.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then(a.start_time.cmp(&b.start_time))
            .then(a.id.cmp(&b.id))
    });
}

impl Engine {
    pub async fn get_activity(&self, id: Ulid) -> Result<Activity, EngineError> {
        self.load_activity(id).await
    }

    pub async fn get_user(&self, id: Ulid) -> Result<UserProfile, EngineError> {
        self.load_user(id).await
    }

    /// Activities matching `filter`, ordered by date then start time.
    pub async fn list_activities(&self, filter: &ActivityFilter) -> Result<Vec<Activity>, EngineError> {
        let mut activities: Vec<Activity> = self
            .store
            .list_activities()
            .await?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        chronological(&mut activities);
        Ok(activities)
    }

    /// Dry run of `register`: the verdict without writing anything.
    pub async fn evaluate_registration(&self, user_id: Ulid, activity_id: Ulid) -> Result<Verdict, EngineError> {
        let user = self.load_user(user_id).await?;
        let activity = self.load_activity(activity_id).await?;
        let bookings = self
            .booking_infos(user_id, Some(BookingKind::Registration))
            .await?;
        Ok(evaluate(&activity, &user, &bookings, self.today()))
    }

    pub async fn bookings_for_user(
        &self,
        user_id: Ulid,
        kind: Option<BookingKind>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        self.booking_infos(user_id, kind).await
    }

    pub async fn bookings_for_activity(&self, activity_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        self.store.bookings_for_activity(activity_id).await
    }

    /// Where the user stands against their weekly cap for the week of `date`.
    pub async fn quota_status(&self, user_id: Ulid, date: NaiveDate) -> Result<QuotaCheck, EngineError> {
        let user = self.load_user(user_id).await?;
        let Some(tier) = user.membership else {
            return Ok(QuotaCheck {
                allowed: true,
                limit: None,
                current: 0,
            });
        };
        let bookings = self
            .booking_infos(user_id, Some(BookingKind::Registration))
            .await?;
        Ok(check_quota(tier, date, &bookings))
    }

    /// Upcoming activities a volunteer has not matched with yet.
    pub async fn available_for_volunteer(&self, user_id: Ulid, today: NaiveDate) -> Result<Vec<Activity>, EngineError> {
        let matched: HashSet<Ulid> = self
            .store
            .bookings_for_user(user_id)
            .await?
            .into_iter()
            .filter(|b| b.kind == BookingKind::VolunteerMatch && !b.status.is_cancelled())
            .map(|b| b.activity_id)
            .collect();

        let mut activities: Vec<Activity> = self
            .store
            .list_activities()
            .await?
            .into_iter()
            .filter(|a| a.date >= today && !matched.contains(&a.id))
            .collect();
        chronological(&mut activities);
        Ok(activities)
    }
}
