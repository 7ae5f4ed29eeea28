//! Notification title/message table, keyed by the transition that fired.
//! Wording is user-facing; the engine picks the row, the sink delivers it.

use crate::directory::UserInfo;
use crate::model::{BookingStatus, DateRange, NotificationKind};

/// Requester-facing message for a booking entering `status`.
pub(super) fn requester_message(
    status: BookingStatus,
    vehicle_name: &str,
    range: &DateRange,
) -> (NotificationKind, String, String) {
    match status {
        BookingStatus::Pending => (
            NotificationKind::BookingRequested,
            "Booking request received".into(),
            format!(
                "Your request for {vehicle_name} from {} to {} is awaiting review.",
                range.start, range.end
            ),
        ),
        BookingStatus::Confirmed => (
            NotificationKind::BookingConfirmed,
            "Booking confirmed".into(),
            format!(
                "Your booking for {vehicle_name} is approved. Come pick up the vehicle on {}.",
                range.start
            ),
        ),
        BookingStatus::Cancelled => (
            NotificationKind::BookingCancelled,
            "Booking cancelled".into(),
            format!("Your booking request for {vehicle_name} was declined or cancelled."),
        ),
        BookingStatus::FormRequired => (
            NotificationKind::FormRequired,
            "Verification form required".into(),
            format!(
                "Please submit your identity and license form to continue your booking of {vehicle_name}."
            ),
        ),
        BookingStatus::FormPending => (
            NotificationKind::FormPending,
            "Form received".into(),
            format!("Your form for the {vehicle_name} booking is pending review."),
        ),
    }
}

/// Broadcast row for one operator when a new request lands. The requester's
/// identity is resolved at emission time, not stored.
pub(super) fn operator_message(
    requester: Option<&UserInfo>,
    vehicle_name: &str,
    range: &DateRange,
) -> (NotificationKind, String, String) {
    let who = match requester {
        Some(u) => format!("{} ({})", u.display_name, u.email),
        None => "An unknown user".into(),
    };
    (
        NotificationKind::OperatorNewRequest,
        "New booking request".into(),
        format!(
            "{who} requested {vehicle_name} from {} to {}.",
            range.start, range.end
        ),
    )
}

/// Form approval keeps the booking's pickup date; the plain Confirmed row
/// is not used on this path.
pub(super) fn form_approved_message(
    vehicle_name: &str,
    range: &DateRange,
) -> (NotificationKind, String, String) {
    (
        NotificationKind::FormApproved,
        "Form approved".into(),
        format!(
            "Your form was approved. Your pickup date of {} for {vehicle_name} stands.",
            range.start
        ),
    )
}

pub(super) fn form_rejected_message(
    vehicle_name: &str,
    reason: Option<&str>,
) -> (NotificationKind, String, String) {
    let message = match reason {
        Some(r) => format!("Your form for the {vehicle_name} booking was rejected: {r}"),
        None => format!("Your form for the {vehicle_name} booking was rejected."),
    };
    (
        NotificationKind::BookingCancelled,
        "Booking cancelled".into(),
        message,
    )
}
