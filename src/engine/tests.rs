use super::*;
use crate::directory::{InMemoryDirectory, Role, UserInfo};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationCenter;

use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use ulid::Ulid;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn range(start: &str, end: &str) -> DateRange {
    DateRange::new(d(start), d(end))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("rentd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct TestCtx {
    engine: Arc<Engine>,
    directory: Arc<InMemoryDirectory>,
    notify: Arc<NotificationCenter>,
}

fn test_engine(name: &str) -> TestCtx {
    let notify = Arc::new(NotificationCenter::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = Arc::new(
        Engine::new(test_wal_path(name), notify.clone(), directory.clone()).unwrap(),
    );
    TestCtx {
        engine,
        directory,
        notify,
    }
}

fn seed_user(ctx: &TestCtx, name: &str, role: Role) -> Ulid {
    let id = Ulid::new();
    ctx.directory.upsert(UserInfo {
        id,
        display_name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        role,
    });
    id
}

async fn seed_vehicle(ctx: &TestCtx, daily_price: i64) -> Ulid {
    let id = Ulid::new();
    ctx.engine
        .add_vehicle(id, "Corolla".into(), daily_price)
        .await
        .unwrap();
    id
}

async fn seed_booking(ctx: &TestCtx, vehicle_id: Ulid, user_id: Ulid, start: &str, end: &str) -> Booking {
    ctx.engine
        .create_booking(Ulid::new(), vehicle_id, user_id, range(start, end), None)
        .await
        .unwrap()
}

// ── Vehicle catalog ──────────────────────────────────────

#[tokio::test]
async fn vehicle_add_and_query() {
    let ctx = test_engine("vehicle_add.wal");
    let vid = seed_vehicle(&ctx, 500).await;

    let info = ctx.engine.vehicle_info(vid).await.unwrap();
    assert_eq!(info.daily_price, 500);
    assert_eq!(info.name, "Corolla");
    assert_eq!(ctx.engine.list_vehicles().await.len(), 1);
}

#[tokio::test]
async fn vehicle_duplicate_rejected() {
    let ctx = test_engine("vehicle_dup.wal");
    let vid = seed_vehicle(&ctx, 500).await;
    let result = ctx.engine.add_vehicle(vid, "Other".into(), 100).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn vehicle_price_must_be_positive() {
    let ctx = test_engine("vehicle_price.wal");
    let result = ctx.engine.add_vehicle(Ulid::new(), "Free car".into(), 0).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn vehicle_update_changes_future_pricing_only() {
    let ctx = test_engine("vehicle_update.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    ctx.engine
        .update_vehicle(vid, "Corolla".into(), 900)
        .await
        .unwrap();

    // Existing booking keeps the price captured at creation
    let reloaded = ctx.engine.booking(booking.id).await.unwrap();
    assert_eq!(reloaded.total_price, 1500);

    // A new booking prices at the current rate
    let fresh = seed_booking(&ctx, vid, user, "2025-04-01", "2025-04-03").await;
    assert_eq!(fresh.total_price, 1800);
}

#[tokio::test]
async fn vehicle_remove_blocked_by_active_bookings() {
    let ctx = test_engine("vehicle_remove.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let result = ctx.engine.remove_vehicle(vid).await;
    assert!(matches!(result, Err(EngineError::HasActiveBookings(_))));

    ctx.engine
        .update_status(booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    ctx.engine.remove_vehicle(vid).await.unwrap();
    assert!(ctx.engine.vehicle_info(vid).await.is_none());
    // Index entries of the removed vehicle's bookings are gone too
    assert!(ctx.engine.booking(booking.id).await.is_err());
}

// ── Booking creation ─────────────────────────────────────

#[tokio::test]
async fn create_computes_days_and_price() {
    let ctx = test_engine("create_price.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;

    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    assert_eq!(booking.total_days, 3);
    assert_eq!(booking.total_price, 1500);
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn create_zero_length_rejected_before_lookup() {
    let ctx = test_engine("create_zero.wal");
    // Unknown vehicle id: the range check must fire first
    let result = ctx
        .engine
        .create_booking(
            Ulid::new(),
            Ulid::new(),
            Ulid::new(),
            DateRange {
                start: d("2025-03-05"),
                end: d("2025-03-05"),
            },
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidRange)));
}

#[tokio::test]
async fn create_unknown_vehicle_fails() {
    let ctx = test_engine("create_unknown.wal");
    let result = ctx
        .engine
        .create_booking(Ulid::new(), Ulid::new(), Ulid::new(), range("2025-03-01", "2025-03-04"), None)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn create_rejects_overlap_with_confirmed() {
    let ctx = test_engine("create_overlap.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let existing = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    ctx.engine
        .update_status(existing.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    let result = ctx
        .engine
        .create_booking(Ulid::new(), vid, user, range("2025-03-03", "2025-03-05"), None)
        .await;
    assert!(matches!(result, Err(EngineError::Unavailable(id)) if id == existing.id));
}

#[tokio::test]
async fn create_cancelled_does_not_block() {
    let ctx = test_engine("create_cancelled.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let existing = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    ctx.engine
        .update_status(existing.id, BookingStatus::Cancelled)
        .await
        .unwrap();

    // Identical range now succeeds
    let result = ctx
        .engine
        .create_booking(Ulid::new(), vid, user, range("2025-03-01", "2025-03-04"), None)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn create_abutting_range_rejected() {
    let ctx = test_engine("create_abutting.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    // Pick-up on the existing return day: no same-day handover
    let result = ctx
        .engine
        .create_booking(Ulid::new(), vid, user, range("2025-03-04", "2025-03-06"), None)
        .await;
    assert!(matches!(result, Err(EngineError::Unavailable(_))));
}

#[tokio::test]
async fn create_form_statuses_do_not_hold_slot() {
    let ctx = test_engine("create_form_free.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let existing = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    ctx.engine
        .update_status(existing.id, BookingStatus::FormRequired)
        .await
        .unwrap();

    let result = ctx
        .engine
        .create_booking(Ulid::new(), vid, user, range("2025-03-01", "2025-03-04"), None)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn create_duplicate_booking_id_rejected() {
    let ctx = test_engine("create_dup_id.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let result = ctx
        .engine
        .create_booking(booking.id, vid, user, range("2025-06-01", "2025-06-04"), None)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn create_notes_too_long_rejected() {
    let ctx = test_engine("create_notes.wal");
    let vid = seed_vehicle(&ctx, 500).await;
    let notes = "x".repeat(MAX_NOTES_LEN + 1);
    let result = ctx
        .engine
        .create_booking(Ulid::new(), vid, Ulid::new(), range("2025-03-01", "2025-03-04"), Some(notes))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn create_rental_too_long_rejected() {
    let ctx = test_engine("create_long.wal");
    let vid = seed_vehicle(&ctx, 500).await;
    let result = ctx
        .engine
        .create_booking(Ulid::new(), vid, Ulid::new(), range("2025-01-01", "2026-06-01"), None)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn concurrent_creates_one_winner() {
    let ctx = test_engine("concurrent_create.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;

    // Both requests fully overlap; the vehicle write lock serializes the
    // check-then-insert, so exactly one can win.
    let (r1, r2) = tokio::join!(
        ctx.engine
            .create_booking(Ulid::new(), vid, user, range("2025-03-01", "2025-03-04"), None),
        ctx.engine
            .create_booking(Ulid::new(), vid, user, range("2025-03-01", "2025-03-04"), None),
    );
    assert!(
        r1.is_ok() != r2.is_ok(),
        "exactly one of two conflicting creations may succeed"
    );
    let loser = if r1.is_ok() { r2 } else { r1 };
    assert!(matches!(loser, Err(EngineError::Unavailable(_))));
}

// ── Availability queries ─────────────────────────────────

#[tokio::test]
async fn is_available_idempotent() {
    let ctx = test_engine("avail_idem.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let q = range("2025-03-03", "2025-03-05");
    let first = ctx.engine.is_available(vid, q).await.unwrap();
    let second = ctx.engine.is_available(vid, q).await.unwrap();
    assert_eq!(first, second);
    assert!(!first);
    assert!(ctx.engine.is_available(vid, range("2025-04-01", "2025-04-03")).await.unwrap());
}

#[tokio::test]
async fn is_available_unknown_vehicle_fails() {
    let ctx = test_engine("avail_unknown.wal");
    let result = ctx
        .engine
        .is_available(Ulid::new(), range("2025-03-01", "2025-03-04"))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn available_windows_between_bookings() {
    let ctx = test_engine("avail_windows.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    seed_booking(&ctx, vid, user, "2025-03-10", "2025-03-12").await;

    let windows = ctx
        .engine
        .available_windows(vid, range("2025-03-01", "2025-03-31"))
        .await
        .unwrap();
    assert_eq!(
        windows,
        vec![range("2025-03-05", "2025-03-09"), range("2025-03-13", "2025-03-31")]
    );
}

#[tokio::test]
async fn available_windows_query_too_wide() {
    let ctx = test_engine("avail_wide.wal");
    let vid = seed_vehicle(&ctx, 500).await;
    let result = ctx
        .engine
        .available_windows(vid, range("2025-01-01", "2030-01-01"))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Status transitions ───────────────────────────────────

#[tokio::test]
async fn status_pending_to_form_required() {
    let ctx = test_engine("status_form_req.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let updated = ctx
        .engine
        .update_status(booking.id, BookingStatus::FormRequired)
        .await
        .unwrap();
    assert_eq!(updated.status, BookingStatus::FormRequired);

    // Requester got the creation row plus the form instruction
    let rows = ctx.notify.for_user(user);
    assert_eq!(rows.len(), 2);
    let form_row = rows.iter().find(|n| n.kind == NotificationKind::FormRequired).unwrap();
    assert!(form_row.message.contains("form"));
}

#[tokio::test]
async fn status_illegal_edges_rejected() {
    let ctx = test_engine("status_illegal.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    ctx.engine
        .update_status(booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();

    // Terminal: cancelled bookings cannot come back
    let result = ctx
        .engine
        .update_status(booking.id, BookingStatus::Confirmed)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::IllegalTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Confirmed,
        })
    ));

    // Pending cannot jump straight to FormPending
    let other = seed_booking(&ctx, vid, user, "2025-04-01", "2025-04-03").await;
    let result = ctx
        .engine
        .update_status(other.id, BookingStatus::FormPending)
        .await;
    assert!(matches!(result, Err(EngineError::IllegalTransition { .. })));
}

#[tokio::test]
async fn status_unknown_booking_fails() {
    let ctx = test_engine("status_unknown.wal");
    let result = ctx
        .engine
        .update_status(Ulid::new(), BookingStatus::Confirmed)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn confirm_notifies_requester_once() {
    let ctx = test_engine("confirm_notify.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let operator = seed_user(&ctx, "Olga", Role::Operator);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let before = ctx.notify.for_user(user).len();
    ctx.engine
        .update_status(booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    let rows = ctx.notify.for_user(user);
    assert_eq!(rows.len(), before + 1);
    let confirm = rows.last().unwrap();
    assert_eq!(confirm.kind, NotificationKind::BookingConfirmed);
    assert!(confirm.message.contains("pick up"));

    // Operators are only notified at creation time
    assert_eq!(ctx.notify.for_user(operator).len(), 1);
}

// ── Creation notifications ───────────────────────────────

#[tokio::test]
async fn create_notifies_requester_and_all_operators() {
    let ctx = test_engine("create_notify.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let op1 = seed_user(&ctx, "Olga", Role::Operator);
    let op2 = seed_user(&ctx, "Omar", Role::Operator);
    let vid = seed_vehicle(&ctx, 500).await;

    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let requester_rows = ctx.notify.for_user(user);
    assert_eq!(requester_rows.len(), 1);
    assert_eq!(requester_rows[0].kind, NotificationKind::BookingRequested);
    assert_eq!(
        requester_rows[0].payload["booking_id"],
        booking.id.to_string()
    );

    for op in [op1, op2] {
        let rows = ctx.notify.for_user(op);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, NotificationKind::OperatorNewRequest);
        // Requester identity resolved at emission time
        assert!(rows[0].message.contains("Alice"));
        assert!(rows[0].message.contains("alice@example.com"));
    }
}

#[tokio::test]
async fn operator_audience_is_fresh_per_creation() {
    let ctx = test_engine("create_fresh_ops.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;

    seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    // Operator joins after the first booking; only the second reaches them
    let late_op = seed_user(&ctx, "Olga", Role::Operator);
    seed_booking(&ctx, vid, user, "2025-04-01", "2025-04-03").await;
    assert_eq!(ctx.notify.for_user(late_op).len(), 1);
}

#[tokio::test]
async fn notification_failure_does_not_block_transition() {
    let ctx = test_engine("notify_failure.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    // Fill the requester's inbox so further writes fail
    let deficit = MAX_NOTIFICATIONS_PER_USER - ctx.notify.for_user(user).len();
    for _ in 0..deficit {
        ctx.notify
            .push(
                user,
                NotificationKind::BookingRequested,
                "filler".into(),
                "filler".into(),
                serde_json::json!({}),
            )
            .unwrap();
    }

    // The transition still commits
    let updated = ctx
        .engine
        .update_status(booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(updated.status, BookingStatus::Confirmed);
    assert_eq!(
        ctx.engine.booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
}

// ── Reschedule & notes ───────────────────────────────────

#[tokio::test]
async fn reschedule_recomputes_days_and_price() {
    let ctx = test_engine("reschedule.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    // Price changed since creation; the reschedule prices at the new rate
    ctx.engine
        .update_vehicle(vid, "Corolla".into(), 600)
        .await
        .unwrap();

    let updated = ctx
        .engine
        .reschedule(booking.id, range("2025-05-01", "2025-05-06"))
        .await
        .unwrap();
    assert_eq!(updated.total_days, 5);
    assert_eq!(updated.total_price, 3000);
    assert_eq!(updated.range, range("2025-05-01", "2025-05-06"));
}

#[tokio::test]
async fn reschedule_checks_conflicts_excluding_self() {
    let ctx = test_engine("reschedule_conflict.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let a = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    let b = seed_booking(&ctx, vid, user, "2025-03-10", "2025-03-12").await;

    // Sliding within its own range is fine
    assert!(ctx
        .engine
        .reschedule(a.id, range("2025-03-02", "2025-03-05"))
        .await
        .is_ok());

    // Landing on another booking is not
    let result = ctx.engine.reschedule(a.id, range("2025-03-11", "2025-03-13")).await;
    assert!(matches!(result, Err(EngineError::Unavailable(id)) if id == b.id));
}

#[tokio::test]
async fn reschedule_keeps_sort_order() {
    let ctx = test_engine("reschedule_sort.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let a = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;
    seed_booking(&ctx, vid, user, "2025-03-10", "2025-03-12").await;

    ctx.engine
        .reschedule(a.id, range("2025-06-01", "2025-06-03"))
        .await
        .unwrap();

    let bookings = ctx.engine.bookings_for_vehicle(vid).await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert!(bookings[0].range.start < bookings[1].range.start);
    assert_eq!(bookings[1].id, a.id);
}

#[tokio::test]
async fn update_notes_persists() {
    let ctx = test_engine("notes.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let updated = ctx
        .engine
        .update_notes(booking.id, Some("airport pickup".into()))
        .await
        .unwrap();
    assert_eq!(updated.notes.as_deref(), Some("airport pickup"));

    let cleared = ctx.engine.update_notes(booking.id, None).await.unwrap();
    assert_eq!(cleared.notes, None);
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_booking_frees_slot() {
    let ctx = test_engine("delete.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    assert!(ctx.engine.delete_booking(booking.id).await.unwrap());
    assert!(!ctx.engine.delete_booking(booking.id).await.unwrap());
    assert!(ctx.engine.booking(booking.id).await.is_err());

    // The dates are free again
    assert!(ctx
        .engine
        .is_available(vid, range("2025-03-01", "2025-03-04"))
        .await
        .unwrap());
}

// ── Forms ────────────────────────────────────────────────

async fn booking_awaiting_form(ctx: &TestCtx, vid: Ulid, user: Ulid) -> Booking {
    let booking = seed_booking(ctx, vid, user, "2025-03-01", "2025-03-04").await;
    ctx.engine
        .update_status(booking.id, BookingStatus::FormRequired)
        .await
        .unwrap()
}

async fn submit_test_form(ctx: &TestCtx, booking_id: Ulid) -> Booking {
    ctx.engine
        .submit_form(
            booking_id,
            "Alice Doe".into(),
            "alice@example.com".into(),
            "+1-555-0100".into(),
            "D1234567".into(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn form_submission_drives_form_pending() {
    let ctx = test_engine("form_submit.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = booking_awaiting_form(&ctx, vid, user).await;

    let updated = submit_test_form(&ctx, booking.id).await;
    assert_eq!(updated.status, BookingStatus::FormPending);
    let form = ctx.engine.form(booking.id).await.unwrap().unwrap();
    assert_eq!(form.review, FormReview::Pending);
    assert_eq!(form.license_number, "D1234567");

    let last = ctx.notify.for_user(user).pop().unwrap();
    assert_eq!(last.kind, NotificationKind::FormPending);
}

#[tokio::test]
async fn form_submission_requires_form_required_status() {
    let ctx = test_engine("form_wrong_status.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let result = ctx
        .engine
        .submit_form(
            booking.id,
            "Alice Doe".into(),
            "alice@example.com".into(),
            "+1-555-0100".into(),
            "D1234567".into(),
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::IllegalTransition {
            from: BookingStatus::Pending,
            to: BookingStatus::FormPending,
        })
    ));
}

#[tokio::test]
async fn form_approval_confirms_booking() {
    let ctx = test_engine("form_approve.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = booking_awaiting_form(&ctx, vid, user).await;
    submit_test_form(&ctx, booking.id).await;

    let updated = ctx.engine.review_form(booking.id, true, None).await.unwrap();
    assert_eq!(updated.status, BookingStatus::Confirmed);
    assert_eq!(
        updated.form.as_ref().unwrap().review,
        FormReview::Approved
    );

    let last = ctx.notify.for_user(user).pop().unwrap();
    assert_eq!(last.kind, NotificationKind::FormApproved);
    assert!(last.message.contains("stands"));
}

#[tokio::test]
async fn form_rejection_cancels_with_reason() {
    let ctx = test_engine("form_reject.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = booking_awaiting_form(&ctx, vid, user).await;
    submit_test_form(&ctx, booking.id).await;

    let updated = ctx
        .engine
        .review_form(booking.id, false, Some("license expired".into()))
        .await
        .unwrap();
    assert_eq!(updated.status, BookingStatus::Cancelled);
    assert_eq!(
        updated.form.as_ref().unwrap().review,
        FormReview::Rejected {
            reason: "license expired".into()
        }
    );

    let last = ctx.notify.for_user(user).pop().unwrap();
    assert_eq!(last.kind, NotificationKind::BookingCancelled);
    assert!(last.message.contains("license expired"));
}

#[tokio::test]
async fn form_review_requires_form_pending() {
    let ctx = test_engine("form_review_status.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = seed_booking(&ctx, vid, user, "2025-03-01", "2025-03-04").await;

    let result = ctx.engine.review_form(booking.id, true, None).await;
    assert!(matches!(result, Err(EngineError::IllegalTransition { .. })));
}

#[tokio::test]
async fn form_review_without_submission_fails() {
    let ctx = test_engine("form_missing.wal");
    let user = seed_user(&ctx, "Alice", Role::Customer);
    let vid = seed_vehicle(&ctx, 500).await;
    let booking = booking_awaiting_form(&ctx, vid, user).await;

    // FormPending reached through the generic transition, skipping submission
    ctx.engine
        .update_status(booking.id, BookingStatus::FormPending)
        .await
        .unwrap();

    let result = ctx.engine.review_form(booking.id, true, None).await;
    assert!(matches!(result, Err(EngineError::FormMissing(_))));
}

// ── User queries ─────────────────────────────────────────

#[tokio::test]
async fn bookings_for_unknown_vehicle_fails() {
    let ctx = test_engine("bookings_unknown.wal");
    let result = ctx.engine.bookings_for_vehicle(Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn bookings_for_user_spans_vehicles() {
    let ctx = test_engine("user_bookings.wal");
    let alice = seed_user(&ctx, "Alice", Role::Customer);
    let bob = seed_user(&ctx, "Bob", Role::Customer);
    let v1 = seed_vehicle(&ctx, 500).await;
    let v2 = seed_vehicle(&ctx, 700).await;

    seed_booking(&ctx, v1, alice, "2025-03-01", "2025-03-04").await;
    seed_booking(&ctx, v2, alice, "2025-03-01", "2025-03-04").await;
    seed_booking(&ctx, v1, bob, "2025-04-01", "2025-04-03").await;

    assert_eq!(ctx.engine.bookings_for_user(alice).await.len(), 2);
    assert_eq!(ctx.engine.bookings_for_user(bob).await.len(), 1);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn reopen_restores_state() {
    let path = test_wal_path("reopen.wal");
    let vid = Ulid::new();
    let user = Ulid::new();
    let booking_id;

    {
        let notify = Arc::new(NotificationCenter::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = Engine::new(path.clone(), notify, directory).unwrap();
        engine.add_vehicle(vid, "Corolla".into(), 500).await.unwrap();
        let booking = engine
            .create_booking(Ulid::new(), vid, user, range("2025-03-01", "2025-03-04"), Some("vip".into()))
            .await
            .unwrap();
        booking_id = booking.id;
        engine
            .update_status(booking_id, BookingStatus::Confirmed)
            .await
            .unwrap();
    }

    let notify = Arc::new(NotificationCenter::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(path, notify, directory).unwrap();

    let booking = engine.booking(booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.total_price, 1500);
    assert_eq!(booking.notes.as_deref(), Some("vip"));

    // Restored bookings still hold their dates
    let result = engine
        .create_booking(Ulid::new(), vid, user, range("2025-03-02", "2025-03-05"), None)
        .await;
    assert!(matches!(result, Err(EngineError::Unavailable(_))));
}

#[tokio::test]
async fn compact_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let vid = Ulid::new();
    let user = Ulid::new();

    let notify = Arc::new(NotificationCenter::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(path.clone(), notify, directory).unwrap();
    engine.add_vehicle(vid, "Corolla".into(), 500).await.unwrap();

    // Churn: bookings created and deleted
    for _ in 0..10 {
        let id = Ulid::new();
        engine
            .create_booking(id, vid, user, range("2025-03-01", "2025-03-04"), None)
            .await
            .unwrap();
        engine.delete_booking(id).await.unwrap();
    }
    let kept = engine
        .create_booking(Ulid::new(), vid, user, range("2025-03-01", "2025-03-04"), None)
        .await
        .unwrap();
    engine
        .update_status(kept.id, BookingStatus::FormRequired)
        .await
        .unwrap();
    engine
        .submit_form(
            kept.id,
            "Alice Doe".into(),
            "alice@example.com".into(),
            "+1-555-0100".into(),
            "D1234567".into(),
        )
        .await
        .unwrap();
    engine.review_form(kept.id, true, None).await.unwrap();

    engine.compact_wal().await.unwrap();
    drop(engine);

    let notify = Arc::new(NotificationCenter::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(path, notify, directory).unwrap();

    let booking = engine.booking(kept.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.form.as_ref().unwrap().review, FormReview::Approved);
    assert_eq!(engine.bookings_for_vehicle(vid).await.unwrap().len(), 1);
}
