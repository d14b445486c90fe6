use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::Role;

use super::eligibility::Verdict;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// The eligibility verdict carried at least one blocker.
    Rejected(Verdict),
    AlreadyCancelled(Ulid),
    HasBookings(Ulid),
    WrongRole { user: Ulid, required: Role },
    CapacityBelowParticipants { capacity: u32, participants: u32 },
    InvalidActivity(&'static str),
    LimitExceeded(&'static str),
    /// A report range whose start falls after its end.
    InvalidRange { start: NaiveDate, end: NaiveDate },
    /// Failure reported by the backing store.
    Store(String),
}

impl EngineError {
    /// Stable machine-readable code, sent alongside the message on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Rejected(_) => "rejected",
            EngineError::AlreadyCancelled(_) => "already_cancelled",
            EngineError::HasBookings(_) => "has_bookings",
            EngineError::WrongRole { .. } => "wrong_role",
            EngineError::CapacityBelowParticipants { .. } => "capacity_below_participants",
            EngineError::InvalidActivity(_) => "invalid_activity",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Rejected(verdict) => {
                let reasons: Vec<String> = verdict.errors.iter().map(|b| b.to_string()).collect();
                write!(f, "registration rejected: {}", reasons.join("; "))
            }
            EngineError::AlreadyCancelled(id) => write!(f, "booking already cancelled: {id}"),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete activity {id}: has active bookings")
            }
            EngineError::WrongRole { user, required } => {
                write!(f, "user {user} must have the {required:?} role")
            }
            EngineError::CapacityBelowParticipants {
                capacity,
                participants,
            } => write!(
                f,
                "capacity {capacity} is below the {participants} participants already registered"
            ),
            EngineError::InvalidActivity(msg) => write!(f, "invalid activity: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: {start} is after {end}")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
