mod availability;
mod error;
mod messages;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{free_windows, merge_blocked, subtract_blocked};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::directory::UserDirectory;
use crate::model::*;
use crate::notify::NotificationCenter;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block until an Append arrives, drain everything immediately available,
/// then a single fsync for the whole batch before responding to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                // Drain the batch window
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then the non-append command
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// One fsync for the whole batch, then answer every waiting caller.
fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    let result = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotificationCenter>,
    pub directory: Arc<dyn UserDirectory>,
    /// Reverse lookup: booking id → vehicle id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction holds it exclusive across
    /// snapshot, rewrite, and ack, so the rewritten log can never miss a
    /// write that was acknowledged before it. Acquired before any vehicle
    /// lock.
    pub(super) compact_barrier: RwLock<()>,
}

/// Apply an event directly to a VehicleState (no locking — caller holds the lock).
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::VehicleUpdated {
            name, daily_price, ..
        } => {
            vs.name = name.clone();
            vs.daily_price = *daily_price;
        }
        Event::BookingCreated {
            id,
            vehicle_id,
            user_id,
            range,
            total_days,
            total_price,
            notes,
            created_at,
        } => {
            vs.insert_booking(Booking {
                id: *id,
                vehicle_id: *vehicle_id,
                user_id: *user_id,
                range: *range,
                total_days: *total_days,
                total_price: *total_price,
                status: BookingStatus::Pending,
                notes: notes.clone(),
                created_at: *created_at,
                form: None,
            });
            index.insert(*id, *vehicle_id);
        }
        Event::StatusChanged { id, status, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.status = *status;
            }
        }
        Event::Rescheduled {
            id,
            range,
            total_days,
            total_price,
            ..
        } => {
            // Remove and reinsert: the new start date changes sort position.
            if let Some(mut b) = vs.remove_booking(*id) {
                b.range = *range;
                b.total_days = *total_days;
                b.total_price = *total_price;
                vs.insert_booking(b);
            }
        }
        Event::NotesUpdated { id, notes, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.notes = notes.clone();
            }
        }
        Event::BookingDeleted { id, .. } => {
            vs.remove_booking(*id);
            index.remove(id);
        }
        Event::FormSubmitted {
            booking_id, form, ..
        } => {
            if let Some(b) = vs.booking_mut(*booking_id) {
                b.form = Some(form.clone());
                b.status = BookingStatus::FormPending;
            }
        }
        Event::FormReviewed {
            booking_id,
            approved,
            reason,
            ..
        } => {
            if let Some(b) = vs.booking_mut(*booking_id) {
                if let Some(form) = &mut b.form {
                    form.review = if *approved {
                        FormReview::Approved
                    } else {
                        FormReview::Rejected {
                            reason: reason.clone().unwrap_or_default(),
                        }
                    };
                }
                b.status = if *approved {
                    BookingStatus::Confirmed
                } else {
                    BookingStatus::Cancelled
                };
            }
        }
        // VehicleAdded/Removed are handled at the DashMap level, not here
        Event::VehicleAdded { .. } | Event::VehicleRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotificationCenter>,
        directory: Arc<dyn UserDirectory>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            directory,
            booking_index: DashMap::new(),
            compact_barrier: RwLock::new(()),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            match event {
                Event::VehicleAdded {
                    id,
                    name,
                    daily_price,
                } => {
                    let vs = VehicleState::new(*id, name.clone(), *daily_price);
                    engine.state.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VehicleRemoved { id } => {
                    if let Some((_, vs)) = engine.state.remove(id) {
                        let guard = vs.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            engine.booking_index.remove(&b.id);
                        }
                    }
                }
                other => {
                    if let Some(vehicle_id) = event_vehicle_id(other)
                        && let Some(entry) = engine.state.get(&vehicle_id) {
                            let vs = entry.value().clone();
                            let mut guard = vs.try_write().expect("replay: uncontended write");
                            apply_to_vehicle(&mut guard, other, &engine.booking_index);
                        }
                }
            }
        }

        metrics::gauge!(crate::observability::VEHICLES_ACTIVE).set(engine.state.len() as f64);
        Ok(engine)
    }

    /// Write event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn vehicle_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. The caller holds the vehicle's
    /// write lock across this, so check-then-persist is race-free.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vehicle(vs, event, &self.booking_index);
        Ok(())
    }

    /// Lookup booking → vehicle, acquire the vehicle's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        let vehicle_id = self
            .vehicle_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        Ok((vehicle_id, guard))
    }

    /// Write a notification row. Failures are counted and logged, never
    /// propagated: the lifecycle transition that triggered this already
    /// committed and stands regardless.
    pub(super) fn emit_best_effort(
        &self,
        user_id: Ulid,
        kind: NotificationKind,
        title: String,
        message: String,
        payload: serde_json::Value,
    ) {
        match self.notify.push(user_id, kind, title, message, payload) {
            Ok(_) => {
                metrics::counter!(
                    crate::observability::NOTIFICATIONS_EMITTED_TOTAL,
                    "kind" => kind.as_str()
                )
                .increment(1);
            }
            Err(e) => {
                metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
                tracing::warn!("notification for {user_id} dropped: {e}");
            }
        }
    }
}

/// Correlation payload attached to every notification.
pub(super) fn correlation(booking_id: Ulid, vehicle_id: Ulid) -> serde_json::Value {
    serde_json::json!({
        "booking_id": booking_id.to_string(),
        "vehicle_id": vehicle_id.to_string(),
    })
}

/// Extract the vehicle id from an event (for non-VehicleAdded/Removed events).
fn event_vehicle_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { vehicle_id, .. }
        | Event::StatusChanged { vehicle_id, .. }
        | Event::Rescheduled { vehicle_id, .. }
        | Event::NotesUpdated { vehicle_id, .. }
        | Event::BookingDeleted { vehicle_id, .. }
        | Event::FormSubmitted { vehicle_id, .. }
        | Event::FormReviewed { vehicle_id, .. } => Some(*vehicle_id),
        Event::VehicleUpdated { id, .. } => Some(*id),
        Event::VehicleAdded { .. } | Event::VehicleRemoved { .. } => None,
    }
}
