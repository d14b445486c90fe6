use chrono::{Datelike, IsoWeek, NaiveDate};
use serde::Serialize;

use crate::model::*;

/// ISO-8601 week of a date. Carries the ISO year, so week 1 of one year never
/// compares equal to week 1 of another.
pub fn iso_week(date: NaiveDate) -> IsoWeek {
    date.iso_week()
}

pub fn same_iso_week(a: NaiveDate, b: NaiveDate) -> bool {
    iso_week(a) == iso_week(b)
}

/// Non-cancelled bookings in the ISO week containing `target`.
pub fn weekly_count(target: NaiveDate, bookings: &[BookingInfo]) -> u32 {
    let week = iso_week(target);
    bookings
        .iter()
        .filter(|b| !b.status.is_cancelled())
        .filter(|b| iso_week(b.activity.date) == week)
        .count() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    /// `None` means the tier is unlimited.
    pub limit: Option<u32>,
    pub current: u32,
}

pub fn check_quota(tier: MembershipTier, target: NaiveDate, bookings: &[BookingInfo]) -> QuotaCheck {
    let Some(limit) = tier.weekly_cap() else {
        return QuotaCheck {
            allowed: true,
            limit: None,
            current: 0,
        };
    };
    let current = weekly_count(target, bookings);
    QuotaCheck {
        allowed: current < limit,
        limit: Some(limit),
        current,
    }
}
