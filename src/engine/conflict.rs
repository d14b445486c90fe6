use ulid::Ulid;

use crate::model::*;

/// Bookings whose activity overlaps `candidate` in time.
///
/// Skips bookings for the candidate itself and cancelled bookings. Order of
/// the input is preserved.
pub fn find_conflicts<'a>(
    candidate_id: Ulid,
    candidate: &TimeWindow,
    bookings: &'a [BookingInfo],
) -> Vec<&'a BookingInfo> {
    bookings
        .iter()
        .filter(|b| b.activity_id != candidate_id)
        .filter(|b| !b.status.is_cancelled())
        .filter(|b| b.activity.window().overlaps(candidate))
        .collect()
}
