use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;

use super::availability::{find_conflict, free_windows, validate_range};
use super::{Engine, EngineError};

impl Engine {
    /// True iff no slot-holding booking clashes with `range`. Read-only and
    /// idempotent; `create_booking` re-runs the same check under the write
    /// lock, so a green answer here is advisory only.
    pub async fn is_available(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
    ) -> Result<bool, EngineError> {
        validate_range(&range)?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(find_conflict(&guard, &range, None).is_none())
    }

    /// Free date windows of a vehicle inside `query`.
    pub async fn available_windows(
        &self,
        vehicle_id: Ulid,
        query: DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        if query.start > query.end {
            return Err(EngineError::InvalidRange);
        }
        if (query.end - query.start).num_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(free_windows(&guard, &query))
    }

    pub async fn booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let vehicle_id = self
            .vehicle_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// All bookings of a vehicle, ordered by start date.
    pub async fn bookings_for_vehicle(
        &self,
        vehicle_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(guard.bookings.clone())
    }

    /// All bookings a user has placed, across vehicles.
    pub async fn bookings_for_user(&self, user_id: Ulid) -> Vec<Booking> {
        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut result = Vec::new();
        for vs in vehicles {
            let guard = vs.read().await;
            result.extend(guard.bookings.iter().filter(|b| b.user_id == user_id).cloned());
        }
        result
    }

    pub async fn form(&self, booking_id: Ulid) -> Result<Option<UserForm>, EngineError> {
        Ok(self.booking(booking_id).await?.form)
    }

    pub async fn vehicle_info(&self, vehicle_id: Ulid) -> Option<VehicleInfo> {
        let vs = self.get_vehicle(&vehicle_id)?;
        let guard = vs.read().await;
        Some(VehicleInfo {
            id: guard.id,
            name: guard.name.clone(),
            daily_price: guard.daily_price,
        })
    }

    pub async fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut result = Vec::with_capacity(vehicles.len());
        for vs in vehicles {
            let guard = vs.read().await;
            result.push(VehicleInfo {
                id: guard.id,
                name: guard.name.clone(),
                daily_price: guard.daily_price,
            });
        }
        result
    }
}
