use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date range of a rental: pick-up on `start`, return on `end`.
/// Duration is `end - start` whole days; a valid range is at least one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    pub fn total_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Inclusive on both ends: a rental ending on the day another starts
    /// still clashes (no same-day handover).
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Booking lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    FormRequired,
    FormPending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that keep the vehicle's dates blocked for other requests.
    pub fn holds_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Cancelled)
    }

    /// Legal edges of the lifecycle. Everything not listed is rejected.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, FormRequired)
                | (Pending, Cancelled)
                | (FormRequired, FormPending)
                | (FormPending, Confirmed)
                | (FormPending, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::FormRequired => "form_required",
            BookingStatus::FormPending => "form_pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// Review state of a submitted identity/license form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormReview {
    Pending,
    Approved,
    Rejected { reason: String },
}

/// Identity/license form, one-to-one with a booking that requires verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserForm {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub license_number: String,
    pub review: FormReview,
    pub submitted_at: DateTime<Utc>,
}

/// A reservation of a vehicle for a date range.
///
/// `total_days` and `total_price` are captured at creation (or reschedule)
/// time and never silently recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub user_id: Ulid,
    pub range: DateRange,
    pub total_days: i64,
    pub total_price: i64,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub form: Option<UserForm>,
}

/// In-memory state of one vehicle: catalog fields plus its bookings,
/// kept sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub name: String,
    /// Price per rental day, in minor currency units.
    pub daily_price: i64,
    pub bookings: Vec<Booking>,
}

impl VehicleState {
    pub fn new(id: Ulid, name: String, daily_price: i64) -> Self {
        Self {
            id,
            name,
            daily_price,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by range.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.range.start, |b| b.range.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose range overlaps the query under the inclusive test.
    /// Binary search skips bookings starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end >= query.start)
    }
}

/// Notification type tag, keyed by the transition that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    BookingRequested,
    OperatorNewRequest,
    BookingConfirmed,
    BookingCancelled,
    FormRequired,
    FormPending,
    FormApproved,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingRequested => "booking_requested",
            NotificationKind::OperatorNewRequest => "operator_new_request",
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::FormRequired => "form_required",
            NotificationKind::FormPending => "form_pending",
            NotificationKind::FormApproved => "form_approved",
        }
    }
}

/// A message record produced as a side effect of a lifecycle transition.
/// `payload` carries correlation ids (booking id, vehicle id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleAdded {
        id: Ulid,
        name: String,
        daily_price: i64,
    },
    VehicleUpdated {
        id: Ulid,
        name: String,
        daily_price: i64,
    },
    VehicleRemoved {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        range: DateRange,
        total_days: i64,
        total_price: i64,
        notes: Option<String>,
        created_at: DateTime<Utc>,
    },
    StatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        status: BookingStatus,
    },
    Rescheduled {
        id: Ulid,
        vehicle_id: Ulid,
        range: DateRange,
        total_days: i64,
        total_price: i64,
    },
    NotesUpdated {
        id: Ulid,
        vehicle_id: Ulid,
        notes: Option<String>,
    },
    BookingDeleted {
        id: Ulid,
        vehicle_id: Ulid,
    },
    FormSubmitted {
        booking_id: Ulid,
        vehicle_id: Ulid,
        form: UserForm,
    },
    FormReviewed {
        booking_id: Ulid,
        vehicle_id: Ulid,
        approved: bool,
        reason: Option<String>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub name: String,
    pub daily_price: i64,
}
