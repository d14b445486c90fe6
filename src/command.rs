use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::*;

/// One request line, decoded. The `cmd` field selects the variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    CreateActivity {
        activity: NewActivity,
    },
    UpdateActivity {
        id: Ulid,
        #[serde(default)]
        patch: ActivityPatch,
    },
    DeleteActivity {
        id: Ulid,
    },
    GetActivity {
        id: Ulid,
    },
    ListActivities {
        #[serde(default)]
        filter: ActivityFilter,
    },
    UpsertUser {
        user: UserProfile,
    },
    Evaluate {
        user_id: Ulid,
        activity_id: Ulid,
    },
    Register {
        user_id: Ulid,
        activity_id: Ulid,
    },
    Cancel {
        booking_id: Ulid,
    },
    Match {
        user_id: Ulid,
        activity_id: Ulid,
    },
    Available {
        user_id: Ulid,
        #[serde(default)]
        today: Option<NaiveDate>,
    },
    Bookings {
        #[serde(default)]
        user_id: Option<Ulid>,
        #[serde(default)]
        activity_id: Option<Ulid>,
        #[serde(default)]
        kind: Option<BookingKind>,
    },
    Quota {
        user_id: Ulid,
        date: NaiveDate,
    },
    Subscribe {
        activity_id: Ulid,
    },
    Dashboard,
    WeeklyTrends {
        #[serde(default)]
        weeks: Option<usize>,
    },
    Attendance {
        activity_id: Ulid,
    },
    /// Both dates or neither.
    ProgramBreakdown {
        #[serde(default)]
        start_date: Option<NaiveDate>,
        #[serde(default)]
        end_date: Option<NaiveDate>,
    },
    RangeReport {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    Empty,
    Malformed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty request"),
            CommandError::Malformed(e) => write!(f, "malformed request: {e}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CommandError::Empty);
    }
    serde_json::from_str(line).map_err(|e| CommandError::Malformed(e.to_string()))
}
