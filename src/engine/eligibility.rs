use std::fmt;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::model::*;

use super::conflict::find_conflicts;
use super::quota::check_quota;

/// A rule violation that must stop the registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Blocker {
    AlreadyRegistered,
    AlreadyVolunteering,
    Full,
    TimeConflict { titles: Vec<String> },
    PastActivity,
}

/// A concern the user may acknowledge and proceed past.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Advisory {
    WeeklyLimitReached { current: u32, limit: u32 },
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blocker::AlreadyRegistered => f.write_str("You are already registered for this activity."),
            Blocker::AlreadyVolunteering => {
                f.write_str("You are already volunteering for this activity.")
            }
            Blocker::Full => f.write_str("This activity is full."),
            Blocker::TimeConflict { titles } => {
                write!(f, "Time conflict with: {}", titles.join(", "))
            }
            Blocker::PastActivity => f.write_str("Cannot register for past activities."),
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::WeeklyLimitReached { current, limit } => write!(
                f,
                "You have reached your weekly limit ({current}/{limit} activities this week)"
            ),
        }
    }
}

/// Outcome of an eligibility evaluation, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub errors: Vec<Blocker>,
    pub warnings: Vec<Advisory>,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every registration rule against `candidate`.
///
/// `bookings` must already be limited to the requesting user. Rules run in a
/// fixed order and never short-circuit:
/// duplicate, capacity, conflict, weekly quota (warning only), past date.
pub fn evaluate(
    candidate: &Activity,
    profile: &UserProfile,
    bookings: &[BookingInfo],
    today: NaiveDate,
) -> Verdict {
    let mut verdict = Verdict::default();

    if has_confirmed_booking(candidate, bookings) {
        verdict.errors.push(Blocker::AlreadyRegistered);
    }

    if candidate.current_participants >= candidate.max_capacity {
        verdict.errors.push(Blocker::Full);
    }

    push_conflicts(&mut verdict, candidate, bookings);

    if let Some(tier) = profile.membership {
        let quota = check_quota(tier, candidate.date, bookings);
        if !quota.allowed
            && let Some(limit) = quota.limit
        {
            verdict.warnings.push(Advisory::WeeklyLimitReached {
                current: quota.current,
                limit,
            });
        }
    }

    if candidate.date < today {
        verdict.errors.push(Blocker::PastActivity);
    }

    debug!(
        activity = %candidate.id,
        user = %profile.id,
        valid = verdict.is_valid(),
        errors = verdict.errors.len(),
        warnings = verdict.warnings.len(),
        "registration evaluated"
    );
    verdict
}

/// Volunteer variant: no capacity or quota rules apply to volunteers.
pub fn evaluate_match(candidate: &Activity, bookings: &[BookingInfo], today: NaiveDate) -> Verdict {
    let mut verdict = Verdict::default();

    if has_confirmed_booking(candidate, bookings) {
        verdict.errors.push(Blocker::AlreadyVolunteering);
    }
    push_conflicts(&mut verdict, candidate, bookings);
    if candidate.date < today {
        verdict.errors.push(Blocker::PastActivity);
    }

    debug!(activity = %candidate.id, valid = verdict.is_valid(), "volunteer match evaluated");
    verdict
}

/// `evaluate` against the local calendar date.
pub fn evaluate_now(candidate: &Activity, profile: &UserProfile, bookings: &[BookingInfo]) -> Verdict {
    evaluate(candidate, profile, bookings, today())
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn has_confirmed_booking(candidate: &Activity, bookings: &[BookingInfo]) -> bool {
    bookings
        .iter()
        .any(|b| b.activity_id == candidate.id && b.status == BookingStatus::Confirmed)
}

fn push_conflicts(verdict: &mut Verdict, candidate: &Activity, bookings: &[BookingInfo]) {
    let conflicts = find_conflicts(candidate.id, &candidate.window(), bookings);
    if !conflicts.is_empty() {
        verdict.errors.push(Blocker::TimeConflict {
            titles: conflicts.iter().map(|b| b.activity.title.clone()).collect(),
        });
    }
}
