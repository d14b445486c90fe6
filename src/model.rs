use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Time of day with minute resolution, stored as minutes since midnight.
///
/// Parsed from `HH:MM` or `HH:MM:SS`. Seconds are validated and then dropped:
/// only hours and minutes take part in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        if hours > 23 || minutes > 59 {
            return None;
        }
        Some(Self(hours * 60 + minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseClockError(pub String);

impl fmt::Display for ParseClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {:?} (expected HH:MM or HH:MM:SS)", self.0)
    }
}

impl std::error::Error for ParseClockError {}

impl FromStr for ClockTime {
    type Err = ParseClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseClockError(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(err());
        }
        let field = |p: &str| -> Result<u16, ParseClockError> {
            if p.len() != 2 || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            p.parse().map_err(|_| err())
        };
        let hours = field(parts[0])?;
        let minutes = field(parts[1])?;
        if let Some(sec) = parts.get(2).copied()
            && field(sec)? > 59
        {
            return Err(err());
        }
        Self::from_hm(hours, minutes).ok_or_else(err)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:00", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A same-day commitment `[start, end)` on a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeWindow {
    pub fn new(date: NaiveDate, start: ClockTime, end: ClockTime) -> Self {
        Self { date, start, end }
    }

    /// Windows on different dates never overlap. On the same date the
    /// half-open intervals must strictly intersect; touching ends don't count.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    /// Part of the status vocabulary; no eligibility rule treats it specially.
    Waitlist,
}

impl BookingStatus {
    pub fn is_cancelled(self) -> bool {
        self == BookingStatus::Cancelled
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
            BookingStatus::Waitlist => write!(f, "waitlist"),
        }
    }
}

/// Registrations and volunteer matches share one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Registration,
    VolunteerMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipTier {
    #[serde(rename = "ad_hoc")]
    AdHoc,
    #[serde(rename = "once_weekly")]
    OnceWeekly,
    #[serde(rename = "twice_weekly")]
    TwiceWeekly,
    #[serde(rename = "3_plus")]
    ThreePlus,
}

impl MembershipTier {
    /// Activities allowed per ISO week; `None` is unlimited.
    pub fn weekly_cap(self) -> Option<u32> {
        match self {
            MembershipTier::AdHoc => None,
            MembershipTier::OnceWeekly => Some(1),
            MembershipTier::TwiceWeekly => Some(2),
            MembershipTier::ThreePlus => Some(3),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            MembershipTier::AdHoc => "ad_hoc",
            MembershipTier::OnceWeekly => "once_weekly",
            MembershipTier::TwiceWeekly => "twice_weekly",
            MembershipTier::ThreePlus => "3_plus",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            MembershipTier::AdHoc => "Ad-Hoc (No weekly limit)",
            MembershipTier::OnceWeekly => "Once Weekly (1 activity/week)",
            MembershipTier::TwiceWeekly => "Twice Weekly (2 activities/week)",
            MembershipTier::ThreePlus => "3+ Weekly (3+ activities/week)",
        }
    }
}

impl FromStr for MembershipTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ad_hoc" => Ok(MembershipTier::AdHoc),
            "once_weekly" => Ok(MembershipTier::OnceWeekly),
            "twice_weekly" => Ok(MembershipTier::TwiceWeekly),
            "3_plus" => Ok(MembershipTier::ThreePlus),
            other => Err(format!("unknown membership tier: {other}")),
        }
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Participant,
    Volunteer,
    Staff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Ulid,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    #[serde(default, rename = "membership_type")]
    pub membership: Option<MembershipTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Ulid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default)]
    pub location: String,
    pub max_capacity: u32,
    #[serde(default)]
    pub current_participants: u32,
    #[serde(default)]
    pub program_type: Option<String>,
}

impl Activity {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.date, self.start_time, self.end_time)
    }

    pub fn available_spots(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_participants)
    }

    pub fn is_full(&self) -> bool {
        self.available_spots() == 0
    }
}

/// The slice of an activity a booking carries with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub title: String,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

impl ActivitySnapshot {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.date, self.start_time, self.end_time)
    }
}

impl From<&Activity> for ActivitySnapshot {
    fn from(a: &Activity) -> Self {
        Self {
            title: a.title.clone(),
            date: a.date,
            start_time: a.start_time,
            end_time: a.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub activity_id: Ulid,
    pub kind: BookingKind,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A booking joined with its activity: the shape eligibility rules read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub activity_id: Ulid,
    pub kind: BookingKind,
    pub status: BookingStatus,
    pub activity: ActivitySnapshot,
}

impl BookingInfo {
    pub fn from_parts(booking: &Booking, activity: &Activity) -> Self {
        Self {
            id: booking.id,
            activity_id: booking.activity_id,
            kind: booking.kind,
            status: booking.status,
            activity: ActivitySnapshot::from(activity),
        }
    }
}

// ── Inputs for service operations ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default)]
    pub location: String,
    pub max_capacity: u32,
    #[serde(default)]
    pub program_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<ClockTime>,
    pub end_time: Option<ClockTime>,
    pub location: Option<String>,
    pub max_capacity: Option<u32>,
    pub program_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityFilter {
    pub date: Option<NaiveDate>,
    pub upcoming_from: Option<NaiveDate>,
    pub program_type: Option<String>,
}

impl ActivityFilter {
    pub fn matches(&self, a: &Activity) -> bool {
        self.date.is_none_or(|d| a.date == d)
            && self.upcoming_from.is_none_or(|d| a.date >= d)
            && self
                .program_type
                .as_ref()
                .is_none_or(|p| a.program_type.as_ref() == Some(p))
    }
}

/// Change notifications, published per activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ActivityCreated {
        id: Ulid,
    },
    ActivityUpdated {
        id: Ulid,
    },
    ActivityDeleted {
        id: Ulid,
    },
    Registered {
        booking_id: Ulid,
        activity_id: Ulid,
        user_id: Ulid,
    },
    Matched {
        booking_id: Ulid,
        activity_id: Ulid,
        user_id: Ulid,
    },
    Cancelled {
        booking_id: Ulid,
        activity_id: Ulid,
        user_id: Ulid,
    },
}

impl Event {
    pub fn activity_id(&self) -> Ulid {
        match self {
            Event::ActivityCreated { id }
            | Event::ActivityUpdated { id }
            | Event::ActivityDeleted { id } => *id,
            Event::Registered { activity_id, .. }
            | Event::Matched { activity_id, .. }
            | Event::Cancelled { activity_id, .. } => *activity_id,
        }
    }
}
