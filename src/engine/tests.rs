use super::*;
use crate::limits::*;
use chrono::Utc;
use tokio_test::{assert_err, assert_ok};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn t(s: &str) -> ClockTime {
    s.parse().unwrap()
}

/// 2026-03-01 is a Sunday; the activities below sit in the following weeks.
fn fixed_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn activity(title: &str, date: &str, start: &str, end: &str, capacity: u32, participants: u32) -> Activity {
    Activity {
        id: Ulid::new(),
        title: title.to_string(),
        description: String::new(),
        date: d(date),
        start_time: t(start),
        end_time: t(end),
        location: String::new(),
        max_capacity: capacity,
        current_participants: participants,
        program_type: None,
    }
}

fn booking_on(a: &Activity, status: BookingStatus) -> BookingInfo {
    let now = Utc::now();
    let booking = Booking {
        id: Ulid::new(),
        user_id: Ulid::new(),
        activity_id: a.id,
        kind: BookingKind::Registration,
        status,
        created_at: now,
        updated_at: now,
    };
    BookingInfo::from_parts(&booking, a)
}

fn confirmed(a: &Activity) -> BookingInfo {
    booking_on(a, BookingStatus::Confirmed)
}

fn profile(tier: Option<MembershipTier>) -> UserProfile {
    UserProfile {
        id: Ulid::new(),
        name: None,
        role: Role::Participant,
        membership: tier,
    }
}

fn messages(v: &Verdict) -> VerdictView {
    VerdictView::from(v)
}

// ── Pure evaluator tests ─────────────────────────────────

#[test]
fn full_activity_is_rejected() {
    let a1 = activity("Morning Walk", "2026-03-10", "09:00", "10:00", 5, 5);
    let v = evaluate(&a1, &profile(Some(MembershipTier::AdHoc)), &[], fixed_today());

    assert!(!v.is_valid());
    assert_eq!(v.errors, vec![Blocker::Full]);
    assert!(v.warnings.is_empty());
    assert_eq!(messages(&v).errors, vec!["This activity is full."]);
}

#[test]
fn overlapping_booking_is_a_conflict() {
    let a2 = activity("Morning Walk", "2026-03-10", "09:00", "10:00", 5, 2);
    let a3 = activity("Tai Chi", "2026-03-10", "09:30", "10:30", 10, 1);
    let v = evaluate(&a2, &profile(Some(MembershipTier::AdHoc)), &[confirmed(&a3)], fixed_today());

    assert!(!v.is_valid());
    assert_eq!(messages(&v).errors, vec!["Time conflict with: Tai Chi"]);
    assert!(v.warnings.is_empty());
}

#[test]
fn weekly_limit_warns_without_blocking() {
    let monday = activity("Choir", "2026-03-09", "18:00", "19:00", 20, 3);
    let wednesday = activity("Painting", "2026-03-11", "14:00", "16:00", 15, 4);
    let v = evaluate(
        &wednesday,
        &profile(Some(MembershipTier::OnceWeekly)),
        &[confirmed(&monday)],
        fixed_today(),
    );

    assert!(v.is_valid());
    assert!(v.errors.is_empty());
    assert_eq!(
        messages(&v).warnings,
        vec!["You have reached your weekly limit (1/1 activities this week)"]
    );
}

#[test]
fn duplicate_registration() {
    let a = activity("Bingo", "2026-03-12", "15:00", "16:00", 30, 1);
    let v = evaluate(&a, &profile(None), &[confirmed(&a)], fixed_today());
    // The booking for the same activity is excluded from the conflict check.
    assert_eq!(v.errors, vec![Blocker::AlreadyRegistered]);
}

#[test]
fn waitlisted_or_cancelled_same_activity_is_not_a_duplicate() {
    let a = activity("Bingo", "2026-03-12", "15:00", "16:00", 30, 1);
    for status in [BookingStatus::Waitlist, BookingStatus::Cancelled] {
        let v = evaluate(&a, &profile(None), &[booking_on(&a, status)], fixed_today());
        assert!(v.is_valid(), "{status} booking blocked registration: {v:?}");
    }
}

#[test]
fn cancelled_booking_does_not_conflict() {
    let a = activity("Bingo", "2026-03-12", "15:00", "16:00", 30, 1);
    let other = activity("Quiz", "2026-03-12", "15:30", "16:30", 30, 1);
    let v = evaluate(&a, &profile(None), &[booking_on(&other, BookingStatus::Cancelled)], fixed_today());
    assert!(v.is_valid());
}

#[test]
fn waitlisted_booking_still_conflicts() {
    let a = activity("Bingo", "2026-03-12", "15:00", "16:00", 30, 1);
    let other = activity("Quiz", "2026-03-12", "15:30", "16:30", 30, 1);
    let v = evaluate(&a, &profile(None), &[booking_on(&other, BookingStatus::Waitlist)], fixed_today());
    assert_eq!(
        v.errors,
        vec![Blocker::TimeConflict {
            titles: vec!["Quiz".into()]
        }]
    );
}

#[test]
fn touching_activities_do_not_conflict() {
    let a = activity("Lunch Club", "2026-03-12", "12:00", "13:00", 30, 0);
    let before = activity("Stretching", "2026-03-12", "11:00", "12:00", 30, 0);
    let after = activity("Reading", "2026-03-12", "13:00", "14:00", 30, 0);
    let v = evaluate(&a, &profile(None), &[confirmed(&before), confirmed(&after)], fixed_today());
    assert!(v.is_valid());
}

#[test]
fn conflict_titles_keep_booking_order() {
    let a = activity("Workshop", "2026-03-12", "10:00", "14:00", 30, 0);
    let first = activity("Coffee Morning", "2026-03-12", "09:00", "10:30", 30, 0);
    let unrelated = activity("Evening Talk", "2026-03-12", "18:00", "19:00", 30, 0);
    let second = activity("Gardening", "2026-03-12", "13:30", "15:00", 30, 0);
    let v = evaluate(
        &a,
        &profile(None),
        &[confirmed(&first), confirmed(&unrelated), confirmed(&second)],
        fixed_today(),
    );
    assert_eq!(messages(&v).errors, vec!["Time conflict with: Coffee Morning, Gardening"]);
}

#[test]
fn rules_report_in_fixed_order() {
    let past = activity("Old Class", "2026-02-20", "10:00", "11:00", 2, 2);
    let clash = activity("Clash", "2026-02-20", "10:30", "11:30", 5, 0);
    let v = evaluate(
        &past,
        &profile(Some(MembershipTier::OnceWeekly)),
        &[confirmed(&past), confirmed(&clash)],
        fixed_today(),
    );
    assert_eq!(
        v.errors,
        vec![
            Blocker::AlreadyRegistered,
            Blocker::Full,
            Blocker::TimeConflict {
                titles: vec!["Clash".into()]
            },
            Blocker::PastActivity,
        ]
    );
    // Both bookings share the ISO week of the candidate.
    assert_eq!(
        v.warnings,
        vec![Advisory::WeeklyLimitReached { current: 2, limit: 1 }]
    );
}

#[test]
fn past_date_rule_is_strict() {
    let yesterday = activity("Yesterday", "2026-02-28", "10:00", "11:00", 5, 0);
    let today = activity("Today", "2026-03-01", "10:00", "11:00", 5, 0);
    assert_eq!(
        evaluate(&yesterday, &profile(None), &[], fixed_today()).errors,
        vec![Blocker::PastActivity]
    );
    assert!(evaluate(&today, &profile(None), &[], fixed_today()).is_valid());
}

#[test]
fn overbooked_activity_is_full() {
    let a = activity("Overbooked", "2026-03-10", "09:00", "10:00", 5, 7);
    assert_eq!(evaluate(&a, &profile(None), &[], fixed_today()).errors, vec![Blocker::Full]);
}

#[test]
fn no_tier_means_no_quota_warning() {
    let target = activity("Target", "2026-03-13", "10:00", "11:00", 5, 0);
    let week: Vec<BookingInfo> = ["2026-03-09", "2026-03-10", "2026-03-11", "2026-03-12"]
        .iter()
        .map(|day| confirmed(&activity("Daily", day, "10:00", "11:00", 5, 0)))
        .collect();
    assert!(evaluate(&target, &profile(None), &week, fixed_today()).warnings.is_empty());
    assert!(
        evaluate(&target, &profile(Some(MembershipTier::AdHoc)), &week, fixed_today())
            .warnings
            .is_empty()
    );
}

#[test]
fn twice_weekly_boundary() {
    let target = activity("Target", "2026-03-13", "10:00", "11:00", 5, 0);
    let mon = confirmed(&activity("Mon", "2026-03-09", "10:00", "11:00", 5, 0));
    let tue = confirmed(&activity("Tue", "2026-03-10", "10:00", "11:00", 5, 0));
    let tier = Some(MembershipTier::TwiceWeekly);

    let one = evaluate(&target, &profile(tier), std::slice::from_ref(&mon), fixed_today());
    assert!(one.warnings.is_empty());

    let two = evaluate(&target, &profile(tier), &[mon, tue], fixed_today());
    assert_eq!(
        messages(&two).warnings,
        vec!["You have reached your weekly limit (2/2 activities this week)"]
    );
}

#[test]
fn other_weeks_and_cancellations_do_not_count() {
    let target = activity("Target", "2026-03-13", "10:00", "11:00", 5, 0);
    let sunday_before = activity("Sun", "2026-03-08", "10:00", "11:00", 5, 0);
    let monday_after = activity("Mon", "2026-03-16", "10:00", "11:00", 5, 0);
    let same_week = activity("Wed", "2026-03-11", "10:00", "11:00", 5, 0);
    let bookings = [
        confirmed(&sunday_before),
        confirmed(&monday_after),
        booking_on(&same_week, BookingStatus::Cancelled),
    ];
    let v = evaluate(&target, &profile(Some(MembershipTier::OnceWeekly)), &bookings, fixed_today());
    assert!(v.warnings.is_empty());
}

#[test]
fn volunteer_match_ignores_capacity() {
    let full = activity("Full Class", "2026-03-10", "09:00", "10:00", 5, 5);
    assert!(evaluate_match(&full, &[], fixed_today()).is_valid());
    assert_eq!(
        evaluate_match(&full, &[confirmed(&full)], fixed_today()).errors,
        vec![Blocker::AlreadyVolunteering]
    );
}

#[test]
fn evaluate_now_uses_the_local_date() {
    let far = activity("Next Year", "2099-06-01", "10:00", "11:00", 5, 0);
    let long_gone = activity("Long Gone", "2001-06-01", "10:00", "11:00", 5, 0);
    assert!(evaluate_now(&far, &profile(None), &[]).is_valid());
    assert_eq!(
        evaluate_now(&long_gone, &profile(None), &[]).errors,
        vec![Blocker::PastActivity]
    );
}

#[test]
fn formatted_verdict_for_rejection() {
    let a = activity("Morning Walk", "2026-03-10", "09:00", "10:00", 5, 5);
    let v = evaluate(&a, &profile(None), &[], fixed_today());
    assert_eq!(format_verdict(&v), "❌ Cannot register:\n• This activity is full.");
}

// ── Async engine tests ───────────────────────────────────

fn engine() -> Engine {
    Engine::in_memory().with_clock(fixed_today)
}

fn new_activity(title: &str, date: &str, start: &str, end: &str, capacity: u32) -> NewActivity {
    NewActivity {
        title: title.to_string(),
        description: String::new(),
        date: d(date),
        start_time: t(start),
        end_time: t(end),
        location: "Community Hall".to_string(),
        max_capacity: capacity,
        program_type: None,
    }
}

async fn add_user(engine: &Engine, role: Role, tier: Option<MembershipTier>) -> Ulid {
    let id = Ulid::new();
    engine
        .upsert_user(UserProfile {
            id,
            name: None,
            role,
            membership: tier,
        })
        .await
        .unwrap();
    id
}

async fn participant(engine: &Engine) -> Ulid {
    add_user(engine, Role::Participant, None).await
}

#[tokio::test]
async fn create_and_get_activity() {
    let engine = engine();
    let a = engine
        .create_activity(new_activity("Chair Yoga", "2026-03-10", "10:00", "11:00", 12))
        .await
        .unwrap();
    assert_eq!(a.current_participants, 0);

    let fetched = engine.get_activity(a.id).await.unwrap();
    assert_eq!(fetched, a);
}

#[tokio::test]
async fn create_activity_validation() {
    let engine = engine();
    let cases = [
        new_activity("  ", "2026-03-10", "10:00", "11:00", 12),
        new_activity("No seats", "2026-03-10", "10:00", "11:00", 0),
        new_activity("Backwards", "2026-03-10", "11:00", "10:00", 12),
        new_activity("Zero length", "2026-03-10", "10:00", "10:00", 12),
    ];
    for case in cases {
        let err = engine.create_activity(case.clone()).await.unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidActivity(_)),
            "{case:?} gave {err}"
        );
    }

    let long_title = "x".repeat(MAX_TITLE_LEN + 1);
    let err = engine
        .create_activity(new_activity(&long_title, "2026-03-10", "10:00", "11:00", 12))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine
        .create_activity(new_activity("Stadium", "2026-03-10", "10:00", "11:00", MAX_CAPACITY + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn register_takes_a_seat() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Pottery", "2026-03-10", "10:00", "12:00", 8))
        .await
        .unwrap();

    let (booking, verdict) = engine.register(user, a.id).await.unwrap();
    assert!(verdict.is_valid());
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.kind, BookingKind::Registration);
    assert_eq!(engine.get_activity(a.id).await.unwrap().current_participants, 1);

    let mine = engine.bookings_for_user(user, None).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].activity.title, "Pottery");
    assert_eq!(mine[0].activity.start_time, t("10:00"));
}

#[tokio::test]
async fn rejected_registration_writes_nothing() {
    let engine = engine();
    let a = engine
        .create_activity(new_activity("Tiny", "2026-03-10", "10:00", "11:00", 1))
        .await
        .unwrap();
    let first = participant(&engine).await;
    let second = participant(&engine).await;
    assert_ok!(engine.register(first, a.id).await);

    let err = engine.register(second, a.id).await.unwrap_err();
    let EngineError::Rejected(verdict) = err else {
        panic!("expected Rejected, got {err}");
    };
    assert_eq!(verdict.errors, vec![Blocker::Full]);
    assert_eq!(engine.get_activity(a.id).await.unwrap().current_participants, 1);
    assert!(engine.bookings_for_user(second, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn register_twice_is_a_duplicate() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Choir", "2026-03-10", "18:00", "19:00", 20))
        .await
        .unwrap();
    engine.register(user, a.id).await.unwrap();

    match engine.register(user, a.id).await {
        Err(EngineError::Rejected(v)) => assert_eq!(v.errors, vec![Blocker::AlreadyRegistered]),
        other => panic!("expected duplicate rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn over_quota_registration_succeeds_with_warning() {
    let engine = engine();
    let user = add_user(&engine, Role::Participant, Some(MembershipTier::OnceWeekly)).await;
    let monday = engine
        .create_activity(new_activity("Choir", "2026-03-09", "18:00", "19:00", 20))
        .await
        .unwrap();
    let thursday = engine
        .create_activity(new_activity("Quiz", "2026-03-12", "18:00", "19:00", 20))
        .await
        .unwrap();

    let (_, first) = engine.register(user, monday.id).await.unwrap();
    assert!(first.warnings.is_empty());

    let (_, second) = engine.register(user, thursday.id).await.unwrap();
    assert_eq!(
        second.warnings,
        vec![Advisory::WeeklyLimitReached { current: 1, limit: 1 }]
    );
    assert_eq!(engine.get_activity(thursday.id).await.unwrap().current_participants, 1);

    let status = engine.quota_status(user, d("2026-03-10")).await.unwrap();
    assert_eq!(
        status,
        QuotaCheck {
            allowed: false,
            limit: Some(1),
            current: 2
        }
    );
}

#[tokio::test]
async fn quota_status_without_tier() {
    let engine = engine();
    let user = participant(&engine).await;
    let status = engine.quota_status(user, d("2026-03-10")).await.unwrap();
    assert_eq!(
        status,
        QuotaCheck {
            allowed: true,
            limit: None,
            current: 0
        }
    );
}

#[tokio::test]
async fn past_activity_cannot_be_booked() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Last Week", "2026-02-24", "10:00", "11:00", 5))
        .await
        .unwrap();
    match engine.register(user, a.id).await {
        Err(EngineError::Rejected(v)) => assert_eq!(v.errors, vec![Blocker::PastActivity]),
        other => panic!("expected past-date rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_user_or_activity() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Darts", "2026-03-10", "19:00", "21:00", 8))
        .await
        .unwrap();

    let ghost = Ulid::new();
    assert!(matches!(engine.register(ghost, a.id).await, Err(EngineError::NotFound(id)) if id == ghost));
    assert!(matches!(engine.register(user, ghost).await, Err(EngineError::NotFound(id)) if id == ghost));
    assert!(matches!(engine.cancel_booking(ghost).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn cancel_frees_the_seat_once() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Knitting", "2026-03-10", "14:00", "15:00", 1))
        .await
        .unwrap();
    let (booking, _) = engine.register(user, a.id).await.unwrap();
    assert!(engine.get_activity(a.id).await.unwrap().is_full());

    let cancelled = engine.cancel_booking(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.updated_at >= booking.updated_at);
    assert_eq!(engine.get_activity(a.id).await.unwrap().current_participants, 0);
    // Cancellation keeps the record.
    let stored = engine.store().get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);

    assert!(matches!(
        engine.cancel_booking(booking.id).await,
        Err(EngineError::AlreadyCancelled(_))
    ));
    assert_eq!(engine.get_activity(a.id).await.unwrap().current_participants, 0);

    // The cancelled booking no longer counts as a duplicate.
    assert_ok!(engine.register(user, a.id).await);
}

#[tokio::test]
async fn volunteer_matching() {
    let engine = engine();
    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    let participant = participant(&engine).await;
    let full = engine
        .create_activity(new_activity("Full Class", "2026-03-10", "09:00", "10:00", 1))
        .await
        .unwrap();
    engine.register(participant, full.id).await.unwrap();

    assert!(matches!(
        engine.match_volunteer(participant, full.id).await,
        Err(EngineError::WrongRole { required: Role::Volunteer, .. })
    ));

    let (booking, verdict) = engine.match_volunteer(volunteer, full.id).await.unwrap();
    assert!(verdict.is_valid());
    assert_eq!(booking.kind, BookingKind::VolunteerMatch);
    assert_eq!(engine.get_activity(full.id).await.unwrap().current_participants, 1);

    match engine.match_volunteer(volunteer, full.id).await {
        Err(EngineError::Rejected(v)) => assert_eq!(v.errors, vec![Blocker::AlreadyVolunteering]),
        other => panic!("expected duplicate match rejection, got {other:?}"),
    }

    let matches = engine
        .bookings_for_user(volunteer, Some(BookingKind::VolunteerMatch))
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert!(engine
        .bookings_for_user(volunteer, Some(BookingKind::Registration))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn volunteer_matches_conflict_with_each_other() {
    let engine = engine();
    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    let a = engine
        .create_activity(new_activity("Morning", "2026-03-10", "09:00", "11:00", 5))
        .await
        .unwrap();
    let b = engine
        .create_activity(new_activity("Overlap", "2026-03-10", "10:00", "12:00", 5))
        .await
        .unwrap();
    engine.match_volunteer(volunteer, a.id).await.unwrap();
    match engine.match_volunteer(volunteer, b.id).await {
        Err(EngineError::Rejected(v)) => assert_eq!(
            v.errors,
            vec![Blocker::TimeConflict {
                titles: vec!["Morning".into()]
            }]
        ),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn available_for_volunteer_lists_upcoming_unmatched() {
    let engine = engine();
    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    let past = engine
        .create_activity(new_activity("Past", "2026-02-20", "09:00", "10:00", 5))
        .await
        .unwrap();
    let later = engine
        .create_activity(new_activity("Later", "2026-03-12", "09:00", "10:00", 5))
        .await
        .unwrap();
    let sooner = engine
        .create_activity(new_activity("Sooner", "2026-03-05", "13:00", "14:00", 5))
        .await
        .unwrap();
    let matched = engine
        .create_activity(new_activity("Matched", "2026-03-06", "09:00", "10:00", 5))
        .await
        .unwrap();
    engine.match_volunteer(volunteer, matched.id).await.unwrap();

    let available = engine
        .available_for_volunteer(volunteer, fixed_today())
        .await
        .unwrap();
    let ids: Vec<Ulid> = available.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![sooner.id, later.id]);
    assert!(!ids.contains(&past.id));
}

#[tokio::test]
async fn delete_requires_no_active_bookings() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Film Night", "2026-03-10", "19:00", "21:00", 40))
        .await
        .unwrap();
    let (booking, _) = engine.register(user, a.id).await.unwrap();

    assert!(matches!(engine.delete_activity(a.id).await, Err(EngineError::HasBookings(_))));

    engine.cancel_booking(booking.id).await.unwrap();
    assert_ok!(engine.delete_activity(a.id).await);
    assert_err!(engine.get_activity(a.id).await);
    assert!(engine.bookings_for_user(user, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_activity_patches_fields() {
    let engine = engine();
    let a = engine
        .create_activity(new_activity("Draft", "2026-03-10", "10:00", "11:00", 10))
        .await
        .unwrap();
    let patched = engine
        .update_activity(
            a.id,
            ActivityPatch {
                title: Some("Watercolours".into()),
                end_time: Some(t("12:30")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(patched.title, "Watercolours");
    assert_eq!(patched.end_time, t("12:30"));
    assert_eq!(patched.start_time, t("10:00"));
    assert_eq!(engine.get_activity(a.id).await.unwrap(), patched);

    let err = engine
        .update_activity(
            a.id,
            ActivityPatch {
                start_time: Some(t("13:00")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidActivity(_)));
}

#[tokio::test]
async fn capacity_cannot_drop_below_participants() {
    let engine = engine();
    let a = engine
        .create_activity(new_activity("Dance", "2026-03-10", "10:00", "11:00", 3))
        .await
        .unwrap();
    for _ in 0..2 {
        let user = participant(&engine).await;
        engine.register(user, a.id).await.unwrap();
    }
    let err = engine
        .update_activity(
            a.id,
            ActivityPatch {
                max_capacity: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::CapacityBelowParticipants {
            capacity: 1,
            participants: 2
        }
    ));
    assert_ok!(
        engine
            .update_activity(
                a.id,
                ActivityPatch {
                    max_capacity: Some(2),
                    ..Default::default()
                },
            )
            .await
    );
}

#[tokio::test]
async fn list_activities_is_chronological_and_filtered() {
    let engine = engine();
    let late = engine
        .create_activity(new_activity("Late", "2026-03-10", "15:00", "16:00", 5))
        .await
        .unwrap();
    let early = engine
        .create_activity(new_activity("Early", "2026-03-10", "09:00", "10:00", 5))
        .await
        .unwrap();
    let next_day = engine
        .create_activity(new_activity("Next", "2026-03-11", "08:00", "09:00", 5))
        .await
        .unwrap();

    let all = engine.list_activities(&ActivityFilter::default()).await.unwrap();
    let ids: Vec<Ulid> = all.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![early.id, late.id, next_day.id]);

    let tenth = engine
        .list_activities(&ActivityFilter {
            date: Some(d("2026-03-10")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tenth.len(), 2);

    let upcoming = engine
        .list_activities(&ActivityFilter {
            upcoming_from: Some(d("2026-03-11")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].id, next_day.id);
}

#[tokio::test]
async fn evaluate_registration_is_a_dry_run() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Sketching", "2026-03-10", "10:00", "11:00", 5))
        .await
        .unwrap();

    let verdict = engine.evaluate_registration(user, a.id).await.unwrap();
    assert!(verdict.is_valid());
    assert_eq!(engine.get_activity(a.id).await.unwrap().current_participants, 0);
    assert!(engine.bookings_for_activity(a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn registration_publishes_events() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Cards", "2026-03-10", "10:00", "11:00", 5))
        .await
        .unwrap();
    let mut rx = engine.notify.subscribe(a.id);

    let (booking, _) = engine.register(user, a.id).await.unwrap();
    engine.cancel_booking(booking.id).await.unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        Event::Registered {
            booking_id: booking.id,
            activity_id: a.id,
            user_id: user
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        Event::Cancelled {
            booking_id: booking.id,
            activity_id: a.id,
            user_id: user
        }
    );
}

#[tokio::test]
async fn user_name_limit() {
    let engine = engine();
    let err = engine
        .upsert_user(UserProfile {
            id: Ulid::new(),
            name: Some("n".repeat(MAX_NAME_LEN + 1)),
            role: Role::Participant,
            membership: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

fn stored_booking(user_id: Ulid, activity_id: Ulid, kind: BookingKind, status: BookingStatus) -> Booking {
    let now = Utc::now();
    Booking {
        id: Ulid::new(),
        user_id,
        activity_id,
        kind,
        status,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn cancelled_bookings_do_not_use_up_the_booking_limit() {
    let engine = engine();
    let user = participant(&engine).await;
    let old = engine
        .create_activity(new_activity("Old", "2026-03-09", "10:00", "11:00", 5))
        .await
        .unwrap();
    for _ in 0..MAX_BOOKINGS_PER_USER {
        let b = stored_booking(user, old.id, BookingKind::Registration, BookingStatus::Cancelled);
        engine.store().insert_booking(b).await.unwrap();
    }
    let a = engine
        .create_activity(new_activity("Pottery", "2026-03-10", "10:00", "11:00", 5))
        .await
        .unwrap();

    assert_ok!(engine.register(user, a.id).await);
}

#[tokio::test]
async fn booking_limit_counts_bookings_of_missing_activities() {
    let engine = engine();
    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    for _ in 0..MAX_BOOKINGS_PER_USER {
        let b = stored_booking(volunteer, Ulid::new(), BookingKind::VolunteerMatch, BookingStatus::Confirmed);
        engine.store().insert_booking(b).await.unwrap();
    }
    let a = engine
        .create_activity(new_activity("Gardening", "2026-03-10", "10:00", "11:00", 5))
        .await
        .unwrap();

    let err = engine.match_volunteer(volunteer, a.id).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    // Registrations are counted separately.
    assert_ok!(engine.register(volunteer, a.id).await);
}

#[tokio::test]
async fn delete_releases_the_activity_lock() {
    let engine = engine();
    let user = participant(&engine).await;
    let a = engine
        .create_activity(new_activity("Quiz", "2026-03-10", "19:00", "20:00", 10))
        .await
        .unwrap();
    let (booking, _) = engine.register(user, a.id).await.unwrap();
    engine.cancel_booking(booking.id).await.unwrap();
    assert!(engine.activity_locks.contains_key(&a.id));

    let _rx = engine.notify.subscribe(a.id);
    engine.delete_activity(a.id).await.unwrap();
    assert!(!engine.activity_locks.contains_key(&a.id));
    assert_eq!(engine.notify.channel_count(), 0);
}

// ── Staff analytics ──────────────────────────────────────

fn categorized(title: &str, date: &str, program: &str) -> NewActivity {
    NewActivity {
        program_type: Some(program.to_string()),
        ..new_activity(title, date, "10:00", "11:00", 20)
    }
}

#[tokio::test]
async fn dashboard_counts_confirmed_bookings_and_coverage() {
    let engine = engine();
    assert_eq!(engine.dashboard_metrics().await.unwrap().volunteer_coverage, 0.0);

    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    add_user(&engine, Role::Volunteer, None).await;
    let user = participant(&engine).await;
    let past = engine
        .create_activity(new_activity("Past", "2026-02-20", "10:00", "11:00", 5))
        .await
        .unwrap();
    let mut upcoming = Vec::new();
    for date in ["2026-03-10", "2026-03-11", "2026-03-12"] {
        let a = engine
            .create_activity(new_activity("Upcoming", date, "10:00", "11:00", 5))
            .await
            .unwrap();
        upcoming.push(a.id);
    }

    engine.register(user, upcoming[0]).await.unwrap();
    let (dropped, _) = engine.register(user, upcoming[1]).await.unwrap();
    engine.cancel_booking(dropped.id).await.unwrap();
    engine.match_volunteer(volunteer, upcoming[0]).await.unwrap();
    let old = stored_booking(user, past.id, BookingKind::Registration, BookingStatus::Confirmed);
    engine.store().insert_booking(old).await.unwrap();

    assert_eq!(
        engine.dashboard_metrics().await.unwrap(),
        DashboardMetrics {
            total_activities: 4,
            total_registrations: 2,
            total_volunteers: 2,
            upcoming_activities: 3,
            volunteer_coverage: 33.3,
        }
    );
}

#[tokio::test]
async fn weekly_trends_count_back_from_today() {
    let engine = engine();
    let user = participant(&engine).await;
    for (date, status) in [
        ("2026-02-14", BookingStatus::Confirmed),
        ("2026-02-15", BookingStatus::Confirmed),
        ("2026-02-21", BookingStatus::Confirmed),
        ("2026-02-28", BookingStatus::Confirmed),
        ("2026-02-28", BookingStatus::Cancelled),
        ("2026-03-01", BookingStatus::Confirmed),
    ] {
        let a = engine
            .create_activity(new_activity("Trend", date, "10:00", "11:00", 5))
            .await
            .unwrap();
        let b = stored_booking(user, a.id, BookingKind::Registration, status);
        engine.store().insert_booking(b).await.unwrap();
    }

    let trends = engine.weekly_trends(2).await.unwrap();
    assert_eq!(
        trends,
        vec![
            WeeklyTrend {
                week_start: d("2026-02-15"),
                week_end: d("2026-02-21"),
                registrations: 2,
            },
            WeeklyTrend {
                week_start: d("2026-02-22"),
                week_end: d("2026-02-28"),
                registrations: 1,
            },
        ]
    );

    assert!(engine.weekly_trends(0).await.unwrap().is_empty());
    assert!(matches!(
        engine.weekly_trends(MAX_TREND_WEEKS + 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn range_report_and_program_breakdown() {
    let engine = engine();
    let user = participant(&engine).await;
    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    let yoga = engine
        .create_activity(categorized("Yoga", "2026-03-02", "wellness"))
        .await
        .unwrap();
    engine
        .create_activity(new_activity("Chess", "2026-03-08", "14:00", "15:00", 8))
        .await
        .unwrap();
    let walk = engine
        .create_activity(categorized("Walk", "2026-03-20", "wellness"))
        .await
        .unwrap();
    engine.register(user, yoga.id).await.unwrap();
    engine.match_volunteer(volunteer, yoga.id).await.unwrap();
    engine.register(user, walk.id).await.unwrap();

    let report = engine.range_report(d("2026-03-02"), d("2026-03-08")).await.unwrap();
    assert_eq!(report.activities_count, 2);
    assert_eq!(report.participants_count, 1);
    assert_eq!(report.volunteers_count, 1);
    assert_eq!(
        report.program_breakdown,
        std::collections::BTreeMap::from([("Uncategorized".to_string(), 1), ("wellness".to_string(), 1)])
    );

    let all = engine.program_breakdown(None).await.unwrap();
    assert_eq!(all.get("wellness"), Some(&2));
    assert_eq!(all.get("Uncategorized"), Some(&1));

    let march = (d("2026-03-08"), d("2026-03-02"));
    assert!(matches!(
        engine.range_report(march.0, march.1).await,
        Err(EngineError::InvalidRange { .. })
    ));
    assert!(matches!(
        engine.program_breakdown(Some(march)).await,
        Err(EngineError::InvalidRange { .. })
    ));
}

#[tokio::test]
async fn attendance_lists_confirmed_people() {
    let engine = engine();
    let stayed = participant(&engine).await;
    let left = participant(&engine).await;
    let volunteer = add_user(&engine, Role::Volunteer, None).await;
    let a = engine
        .create_activity(new_activity("Bingo", "2026-03-10", "18:00", "19:00", 30))
        .await
        .unwrap();
    engine.register(stayed, a.id).await.unwrap();
    let (gone, _) = engine.register(left, a.id).await.unwrap();
    engine.cancel_booking(gone.id).await.unwrap();
    engine.match_volunteer(volunteer, a.id).await.unwrap();

    let attendance = engine.activity_attendance(a.id).await.unwrap();
    assert_eq!(attendance.activity.id, a.id);
    assert_eq!(attendance.participants, vec![engine.get_user(stayed).await.unwrap()]);
    assert_eq!(attendance.volunteers, vec![engine.get_user(volunteer).await.unwrap()]);

    assert!(matches!(
        engine.activity_attendance(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_never_overbook() {
    let engine = Arc::new(engine());
    let a = engine
        .create_activity(new_activity("Popular", "2026-03-10", "10:00", "11:00", 3))
        .await
        .unwrap();

    let mut users = Vec::new();
    for _ in 0..20 {
        users.push(participant(&engine).await);
    }

    let handles: Vec<_> = users
        .into_iter()
        .map(|user| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.register(user, a.id).await })
        })
        .collect();

    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::Rejected(v)) => assert_eq!(v.errors, vec![Blocker::Full]),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(engine.get_activity(a.id).await.unwrap().current_participants, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conflicting_registrations_for_one_user() {
    let engine = Arc::new(engine());
    let user = participant(&engine).await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let a = engine
            .create_activity(new_activity(&format!("Slot {i}"), "2026-03-10", "10:00", "11:00", 10))
            .await
            .unwrap();
        ids.push(a.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.register(user, id).await })
        })
        .collect();

    let mut accepted = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(engine.bookings_for_user(user, None).await.unwrap().len(), 1);
}
