use chrono::Utc;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::REGISTRATIONS_TOTAL;

use super::eligibility::{evaluate, evaluate_match, Verdict};
use super::{Engine, EngineError};

fn validate_activity(
    title: &str,
    description: &str,
    location: &str,
    max_capacity: u32,
    window: &TimeWindow,
) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidActivity("title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if location.len() > MAX_LOCATION_LEN {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    if max_capacity == 0 {
        return Err(EngineError::InvalidActivity("max_capacity must be positive"));
    }
    if max_capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("max_capacity too large"));
    }
    if !window.is_well_formed() {
        return Err(EngineError::InvalidActivity("end_time must be after start_time"));
    }
    Ok(())
}

fn record_outcome(kind: &'static str, verdict: &Verdict) {
    let outcome = if verdict.is_valid() { "accepted" } else { "rejected" };
    metrics::counter!(REGISTRATIONS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

impl Engine {
    pub async fn create_activity(&self, new: NewActivity) -> Result<Activity, EngineError> {
        if self.store.activity_count().await? >= MAX_ACTIVITIES {
            return Err(EngineError::LimitExceeded("too many activities"));
        }
        let window = TimeWindow::new(new.date, new.start_time, new.end_time);
        validate_activity(&new.title, &new.description, &new.location, new.max_capacity, &window)?;

        let activity = Activity {
            id: Ulid::new(),
            title: new.title,
            description: new.description,
            date: new.date,
            start_time: new.start_time,
            end_time: new.end_time,
            location: new.location,
            max_capacity: new.max_capacity,
            current_participants: 0,
            program_type: new.program_type,
        };
        self.store.insert_activity(activity.clone()).await?;
        info!("activity {} created: {:?} on {}", activity.id, activity.title, activity.date);
        self.publish(Event::ActivityCreated { id: activity.id });
        Ok(activity)
    }

    pub async fn update_activity(&self, id: Ulid, patch: ActivityPatch) -> Result<Activity, EngineError> {
        let _guard = self.lock_activity(id).await;
        let mut activity = self.load_activity(id).await?;

        if let Some(title) = patch.title {
            activity.title = title;
        }
        if let Some(description) = patch.description {
            activity.description = description;
        }
        if let Some(date) = patch.date {
            activity.date = date;
        }
        if let Some(start) = patch.start_time {
            activity.start_time = start;
        }
        if let Some(end) = patch.end_time {
            activity.end_time = end;
        }
        if let Some(location) = patch.location {
            activity.location = location;
        }
        if let Some(capacity) = patch.max_capacity {
            activity.max_capacity = capacity;
        }
        if patch.program_type.is_some() {
            activity.program_type = patch.program_type;
        }

        validate_activity(
            &activity.title,
            &activity.description,
            &activity.location,
            activity.max_capacity,
            &activity.window(),
        )?;
        if activity.max_capacity < activity.current_participants {
            return Err(EngineError::CapacityBelowParticipants {
                capacity: activity.max_capacity,
                participants: activity.current_participants,
            });
        }

        self.store.update_activity(activity.clone()).await?;
        self.publish(Event::ActivityUpdated { id });
        Ok(activity)
    }

    /// Refused while any non-cancelled booking still points at the activity.
    pub async fn delete_activity(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.lock_activity(id).await;
        self.load_activity(id).await?;

        let bookings = self.store.bookings_for_activity(id).await?;
        if bookings.iter().any(|b| !b.status.is_cancelled()) {
            return Err(EngineError::HasBookings(id));
        }

        self.store.remove_activity(id).await?;
        drop(guard);
        self.forget_activity_lock(id);
        info!("activity {id} deleted");
        self.publish(Event::ActivityDeleted { id });
        Ok(())
    }

    pub async fn upsert_user(&self, user: UserProfile) -> Result<(), EngineError> {
        if let Some(name) = &user.name
            && name.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        self.store.upsert_user(user).await
    }

    /// Evaluate and, if no rule blocks, record a confirmed registration.
    ///
    /// Warnings don't block; they come back with the booking so the caller
    /// can show them.
    pub async fn register(&self, user_id: Ulid, activity_id: Ulid) -> Result<(Booking, Verdict), EngineError> {
        let user = self.load_user(user_id).await?;
        let _user_guard = self.lock_user(user_id).await;
        let _activity_guard = self.lock_activity(activity_id).await;

        let mut activity = self.load_activity(activity_id).await?;
        // Cancelled bookings never count toward the per-user limit.
        let active = self.active_bookings(user_id, BookingKind::Registration).await?;
        if active.len() >= MAX_BOOKINGS_PER_USER {
            return Err(EngineError::LimitExceeded("too many bookings for user"));
        }
        let bookings = self.join_snapshots(&active).await?;

        let verdict = evaluate(&activity, &user, &bookings, self.today());
        record_outcome("registration", &verdict);
        if !verdict.is_valid() {
            info!("registration of {user_id} for {activity_id} rejected");
            return Err(EngineError::Rejected(verdict));
        }

        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            user_id,
            activity_id,
            kind: BookingKind::Registration,
            status: BookingStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_booking(booking.clone()).await?;
        activity.current_participants += 1;
        self.store.update_activity(activity).await?;

        info!("registration {} confirmed: user {user_id} → activity {activity_id}", booking.id);
        self.publish(Event::Registered {
            booking_id: booking.id,
            activity_id,
            user_id,
        });
        Ok((booking, verdict))
    }

    /// Volunteer sign-up. Only duplicate, conflict and past-date rules apply,
    /// and the participant count is left alone.
    pub async fn match_volunteer(&self, user_id: Ulid, activity_id: Ulid) -> Result<(Booking, Verdict), EngineError> {
        let user = self.load_user(user_id).await?;
        if user.role != Role::Volunteer {
            return Err(EngineError::WrongRole {
                user: user_id,
                required: Role::Volunteer,
            });
        }
        let _user_guard = self.lock_user(user_id).await;
        let _activity_guard = self.lock_activity(activity_id).await;

        let activity = self.load_activity(activity_id).await?;
        // Cancelled bookings never count toward the per-user limit.
        let active = self.active_bookings(user_id, BookingKind::VolunteerMatch).await?;
        if active.len() >= MAX_BOOKINGS_PER_USER {
            return Err(EngineError::LimitExceeded("too many bookings for user"));
        }
        let bookings = self.join_snapshots(&active).await?;

        let verdict = evaluate_match(&activity, &bookings, self.today());
        record_outcome("volunteer_match", &verdict);
        if !verdict.is_valid() {
            return Err(EngineError::Rejected(verdict));
        }

        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            user_id,
            activity_id,
            kind: BookingKind::VolunteerMatch,
            status: BookingStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_booking(booking.clone()).await?;

        info!("volunteer {user_id} matched to activity {activity_id}");
        self.publish(Event::Matched {
            booking_id: booking.id,
            activity_id,
            user_id,
        });
        Ok((booking, verdict))
    }

    /// Flip a booking to `cancelled`. Confirmed registrations give their
    /// seat back.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let existing = self
            .store
            .get_booking(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        let _user_guard = self.lock_user(existing.user_id).await;
        let _activity_guard = self.lock_activity(existing.activity_id).await;

        // Re-read under the locks.
        let mut booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        if booking.status.is_cancelled() {
            return Err(EngineError::AlreadyCancelled(id));
        }

        let frees_seat =
            booking.kind == BookingKind::Registration && booking.status == BookingStatus::Confirmed;
        booking.status = BookingStatus::Cancelled;
        booking.updated_at = Utc::now();
        self.store.update_booking(booking.clone()).await?;

        if frees_seat
            && let Some(mut activity) = self.store.get_activity(booking.activity_id).await?
        {
            activity.current_participants = activity.current_participants.saturating_sub(1);
            self.store.update_activity(activity).await?;
        }

        info!("booking {id} cancelled");
        self.publish(Event::Cancelled {
            booking_id: id,
            activity_id: booking.activity_id,
            user_id: booking.user_id,
        });
        Ok(booking)
    }
}
