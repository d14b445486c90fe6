use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_TREND_WEEKS;
use crate::model::*;

use super::{Engine, EngineError};

/// Window count used when a trends request names none.
pub const DEFAULT_TREND_WEEKS: usize = 4;

const UNCATEGORIZED: &str = "Uncategorized";

/// Headline numbers for the staff dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub total_activities: usize,
    pub total_registrations: usize,
    pub total_volunteers: usize,
    pub upcoming_activities: usize,
    /// Percent of upcoming activities with at least one confirmed volunteer,
    /// rounded to one decimal. 0 when nothing is upcoming.
    pub volunteer_coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyTrend {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub registrations: usize,
}

/// Confirmed participants and volunteers of one activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendance {
    pub activity: Activity,
    pub participants: Vec<UserProfile>,
    pub volunteers: Vec<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub activities_count: usize,
    pub participants_count: usize,
    pub volunteers_count: usize,
    pub program_breakdown: BTreeMap<String, usize>,
}

/// Confirmed bookings on one activity, split by kind.
struct Tally {
    activity: Activity,
    registrations: usize,
    volunteers: usize,
}

fn in_range(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start <= date && date <= end
}

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if start > end {
        return Err(EngineError::InvalidRange { start, end });
    }
    Ok(())
}

fn breakdown<'a>(activities: impl Iterator<Item = &'a Activity>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for a in activities {
        let program = a.program_type.as_deref().unwrap_or(UNCATEGORIZED);
        *counts.entry(program.to_string()).or_insert(0) += 1;
    }
    counts
}

fn round_tenth(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

impl Engine {
    async fn tallies(&self) -> Result<Vec<Tally>, EngineError> {
        let activities = self.store.list_activities().await?;
        let mut tallies = Vec::with_capacity(activities.len());
        for activity in activities {
            let mut tally = Tally {
                activity,
                registrations: 0,
                volunteers: 0,
            };
            for b in self.store.bookings_for_activity(tally.activity.id).await? {
                if b.status != BookingStatus::Confirmed {
                    continue;
                }
                match b.kind {
                    BookingKind::Registration => tally.registrations += 1,
                    BookingKind::VolunteerMatch => tally.volunteers += 1,
                }
            }
            tallies.push(tally);
        }
        Ok(tallies)
    }

    pub async fn dashboard_metrics(&self) -> Result<DashboardMetrics, EngineError> {
        let today = self.today();
        let tallies = self.tallies().await?;
        let upcoming: Vec<&Tally> = tallies.iter().filter(|t| t.activity.date >= today).collect();
        let covered = upcoming.iter().filter(|t| t.volunteers > 0).count();
        let volunteer_coverage = if upcoming.is_empty() {
            0.0
        } else {
            round_tenth(covered as f64 * 100.0 / upcoming.len() as f64)
        };
        let total_volunteers = self
            .store
            .list_users()
            .await?
            .iter()
            .filter(|u| u.role == Role::Volunteer)
            .count();

        let metrics = DashboardMetrics {
            total_activities: tallies.len(),
            total_registrations: tallies.iter().map(|t| t.registrations).sum(),
            total_volunteers,
            upcoming_activities: upcoming.len(),
            volunteer_coverage,
        };
        debug!("dashboard as of {today}: {metrics:?}");
        Ok(metrics)
    }

    /// Confirmed registrations per seven-day window, oldest window first.
    ///
    /// Windows are counted back from today, so the newest one ends yesterday.
    /// A registration lands in the window holding its activity's date.
    pub async fn weekly_trends(&self, weeks: usize) -> Result<Vec<WeeklyTrend>, EngineError> {
        if weeks > MAX_TREND_WEEKS {
            return Err(EngineError::LimitExceeded("too many weeks"));
        }
        let today = self.today();
        let tallies = self.tallies().await?;
        let trends = (1..=weeks as u64)
            .rev()
            .filter_map(|i| {
                let week_start = today.checked_sub_days(Days::new(i * 7))?;
                let week_end = week_start.checked_add_days(Days::new(6))?;
                let registrations = tallies
                    .iter()
                    .filter(|t| in_range(t.activity.date, week_start, week_end))
                    .map(|t| t.registrations)
                    .sum();
                Some(WeeklyTrend {
                    week_start,
                    week_end,
                    registrations,
                })
            })
            .collect();
        Ok(trends)
    }

    /// Activity counts per program type. Activities without one are grouped
    /// under "Uncategorized". `range` bounds are inclusive.
    pub async fn program_breakdown(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<BTreeMap<String, usize>, EngineError> {
        if let Some((start, end)) = range {
            check_range(start, end)?;
        }
        let activities = self.store.list_activities().await?;
        Ok(breakdown(
            activities
                .iter()
                .filter(|a| range.is_none_or(|(start, end)| in_range(a.date, start, end))),
        ))
    }

    /// Activity, participant and volunteer totals for activities dated
    /// within `start..=end`.
    pub async fn range_report(&self, start: NaiveDate, end: NaiveDate) -> Result<RangeReport, EngineError> {
        check_range(start, end)?;
        let tallies: Vec<Tally> = self
            .tallies()
            .await?
            .into_iter()
            .filter(|t| in_range(t.activity.date, start, end))
            .collect();
        Ok(RangeReport {
            start_date: start,
            end_date: end,
            activities_count: tallies.len(),
            participants_count: tallies.iter().map(|t| t.registrations).sum(),
            volunteers_count: tallies.iter().map(|t| t.volunteers).sum(),
            program_breakdown: breakdown(tallies.iter().map(|t| &t.activity)),
        })
    }

    pub async fn activity_attendance(&self, activity_id: Ulid) -> Result<Attendance, EngineError> {
        let activity = self.load_activity(activity_id).await?;
        let mut participants = Vec::new();
        let mut volunteers = Vec::new();
        for b in self.store.bookings_for_activity(activity_id).await? {
            if b.status != BookingStatus::Confirmed {
                continue;
            }
            let Some(user) = self.store.get_user(b.user_id).await? else {
                continue;
            };
            match b.kind {
                BookingKind::Registration => participants.push(user),
                BookingKind::VolunteerMatch => volunteers.push(user),
            }
        }
        Ok(Attendance {
            activity,
            participants,
            volunteers,
        })
    }
}
