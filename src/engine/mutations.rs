use chrono::Utc;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use std::sync::Arc;

use crate::limits::*;
use crate::model::*;

use super::availability::{find_conflict, validate_range};
use super::messages::*;
use super::{Engine, EngineError, WalCommand, correlation};

impl Engine {
    // ── Vehicle catalog ──────────────────────────────────

    pub async fn add_vehicle(
        &self,
        id: Ulid,
        name: String,
        daily_price: i64,
    ) -> Result<(), EngineError> {
        let _barrier = self.compact_barrier.read().await;
        if self.state.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("vehicle name too long"));
        }
        if daily_price <= 0 {
            return Err(EngineError::LimitExceeded("daily price must be positive"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VehicleAdded {
            id,
            name: name.clone(),
            daily_price,
        };
        self.wal_append(&event).await?;
        let vs = VehicleState::new(id, name, daily_price);
        self.state.insert(id, Arc::new(RwLock::new(vs)));
        metrics::gauge!(crate::observability::VEHICLES_ACTIVE).set(self.state.len() as f64);
        Ok(())
    }

    pub async fn update_vehicle(
        &self,
        id: Ulid,
        name: String,
        daily_price: i64,
    ) -> Result<(), EngineError> {
        let _barrier = self.compact_barrier.read().await;
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("vehicle name too long"));
        }
        if daily_price <= 0 {
            return Err(EngineError::LimitExceeded("daily price must be positive"));
        }
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = vs.write().await;

        let event = Event::VehicleUpdated {
            id,
            name,
            daily_price,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Refused while any booking still holds the vehicle's dates.
    pub async fn remove_vehicle(&self, id: Ulid) -> Result<(), EngineError> {
        let _barrier = self.compact_barrier.read().await;
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.write().await;
        if guard.bookings.iter().any(|b| b.status.holds_slot()) {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::VehicleRemoved { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_index.remove(&b.id);
        }
        self.state.remove(&id);
        metrics::gauge!(crate::observability::VEHICLES_ACTIVE).set(self.state.len() as f64);
        Ok(())
    }

    // ── Booking lifecycle ────────────────────────────────

    /// Create a booking request. The availability check and the insert run
    /// under the vehicle's write lock, so two concurrent requests for
    /// clashing dates cannot both pass the check.
    pub async fn create_booking(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        range: DateRange,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        // Range validation runs before any lookup
        validate_range(&range)?;
        let _barrier = self.compact_barrier.read().await;
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        if self.booking_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }

        if let Some(conflict) = find_conflict(&guard, &range, None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Unavailable(conflict));
        }

        let total_days = range.total_days();
        let total_price = total_days * guard.daily_price;
        let event = Event::BookingCreated {
            id,
            vehicle_id,
            user_id,
            range,
            total_days,
            total_price,
            notes,
            created_at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);

        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let vehicle_name = guard.name.clone();
        drop(guard);

        // Side effects after the lock: requester row plus one per operator,
        // all best-effort.
        let (kind, title, message) =
            requester_message(BookingStatus::Pending, &vehicle_name, &range);
        self.emit_best_effort(user_id, kind, title, message, correlation(id, vehicle_id));

        let requester = self.directory.user(user_id).await;
        for operator in self.directory.list_operators().await {
            let (kind, title, message) =
                operator_message(requester.as_ref(), &vehicle_name, &range);
            self.emit_best_effort(operator.id, kind, title, message, correlation(id, vehicle_id));
        }

        Ok(booking)
    }

    /// Apply a status transition. Edges outside the lifecycle table are
    /// rejected; a successful transition notifies the requester.
    pub async fn update_status(
        &self,
        booking_id: Ulid,
        new_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let _barrier = self.compact_barrier.read().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let current = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .status;
        if !current.can_transition_to(new_status) {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: new_status,
            });
        }

        let event = Event::StatusChanged {
            id: booking_id,
            vehicle_id,
            status: new_status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::STATUS_CHANGES_TOTAL,
            "status" => new_status.as_str()
        )
        .increment(1);

        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        let vehicle_name = guard.name.clone();
        drop(guard);

        let (kind, title, message) =
            requester_message(new_status, &vehicle_name, &booking.range);
        self.emit_best_effort(
            booking.user_id,
            kind,
            title,
            message,
            correlation(booking_id, vehicle_id),
        );

        Ok(booking)
    }

    /// Move a booking to new dates. Duration and price are recomputed from
    /// the vehicle's current daily price in the same write — date mutation
    /// without recomputation is not offered.
    pub async fn reschedule(
        &self,
        booking_id: Ulid,
        range: DateRange,
    ) -> Result<Booking, EngineError> {
        validate_range(&range)?;
        let _barrier = self.compact_barrier.read().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }

        if let Some(conflict) = find_conflict(&guard, &range, Some(booking_id)) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Unavailable(conflict));
        }

        let total_days = range.total_days();
        let total_price = total_days * guard.daily_price;
        let event = Event::Rescheduled {
            id: booking_id,
            vehicle_id,
            range,
            total_days,
            total_price,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    pub async fn update_notes(
        &self,
        booking_id: Ulid,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        let _barrier = self.compact_barrier.read().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }

        let event = Event::NotesUpdated {
            id: booking_id,
            vehicle_id,
            notes,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Administrative hard delete, outside the normal lifecycle. Returns
    /// true iff the booking existed. No notification is produced.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<bool, EngineError> {
        let _barrier = self.compact_barrier.read().await;
        if !self.booking_index.contains_key(&booking_id) {
            return Ok(false);
        }
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        let event = Event::BookingDeleted {
            id: booking_id,
            vehicle_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── Verification forms ───────────────────────────────

    /// Submit the identity/license form for a booking awaiting one.
    /// Drives the booking to FormPending.
    pub async fn submit_form(
        &self,
        booking_id: Ulid,
        full_name: String,
        email: String,
        phone: String,
        license_number: String,
    ) -> Result<Booking, EngineError> {
        for field in [&full_name, &email, &phone, &license_number] {
            if field.len() > MAX_FORM_FIELD_LEN {
                return Err(EngineError::LimitExceeded("form field too long"));
            }
        }
        let _barrier = self.compact_barrier.read().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let current = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .status;
        if current != BookingStatus::FormRequired {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: BookingStatus::FormPending,
            });
        }

        let form = UserForm {
            full_name,
            email,
            phone,
            license_number,
            review: FormReview::Pending,
            submitted_at: Utc::now(),
        };
        let event = Event::FormSubmitted {
            booking_id,
            vehicle_id,
            form,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::STATUS_CHANGES_TOTAL,
            "status" => BookingStatus::FormPending.as_str()
        )
        .increment(1);

        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        let vehicle_name = guard.name.clone();
        drop(guard);

        let (kind, title, message) =
            requester_message(BookingStatus::FormPending, &vehicle_name, &booking.range);
        self.emit_best_effort(
            booking.user_id,
            kind,
            title,
            message,
            correlation(booking_id, vehicle_id),
        );

        Ok(booking)
    }

    /// Operator verdict on a submitted form: approval confirms the booking
    /// (the pickup date stands), rejection cancels it with the reason.
    pub async fn review_form(
        &self,
        booking_id: Ulid,
        approved: bool,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("rejection reason too long"));
            }
        let _barrier = self.compact_barrier.read().await;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let target = if approved {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Cancelled
        };
        if booking.status != BookingStatus::FormPending {
            return Err(EngineError::IllegalTransition {
                from: booking.status,
                to: target,
            });
        }
        if booking.form.is_none() {
            return Err(EngineError::FormMissing(booking_id));
        }

        let event = Event::FormReviewed {
            booking_id,
            vehicle_id,
            approved,
            reason: reason.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::STATUS_CHANGES_TOTAL,
            "status" => target.as_str()
        )
        .increment(1);

        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        let vehicle_name = guard.name.clone();
        drop(guard);

        let (kind, title, message) = if approved {
            form_approved_message(&vehicle_name, &booking.range)
        } else {
            form_rejected_message(&vehicle_name, reason.as_deref())
        };
        self.emit_best_effort(
            booking.user_id,
            kind,
            title,
            message,
            correlation(booking_id, vehicle_id),
        );

        Ok(booking)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Holds the compaction barrier exclusively
    /// from snapshot through the writer's ack: no mutation can commit in
    /// between, so an acknowledged write is always in the rewritten log.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _barrier = self.compact_barrier.write().await;
        let mut events = Vec::new();

        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for vs in vehicles {
            let guard = vs.read().await;
            events.push(Event::VehicleAdded {
                id: guard.id,
                name: guard.name.clone(),
                daily_price: guard.daily_price,
            });

            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    vehicle_id: b.vehicle_id,
                    user_id: b.user_id,
                    range: b.range,
                    total_days: b.total_days,
                    total_price: b.total_price,
                    notes: b.notes.clone(),
                    created_at: b.created_at,
                });
                // FormSubmitted carries the stored review state and forces
                // FormPending; a trailing StatusChanged restores anything else.
                let mut replayed_status = BookingStatus::Pending;
                if let Some(form) = &b.form {
                    events.push(Event::FormSubmitted {
                        booking_id: b.id,
                        vehicle_id: b.vehicle_id,
                        form: form.clone(),
                    });
                    replayed_status = BookingStatus::FormPending;
                }
                if b.status != replayed_status {
                    events.push(Event::StatusChanged {
                        id: b.id,
                        vehicle_id: b.vehicle_id,
                        status: b.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
