use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A courier's self-declared willingness to take work.
///
/// Independent of whether the courier currently holds a live connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierAvailability {
    pub courier_id: Uuid,
    pub city: String,
    pub is_available: bool,
    pub is_working: bool,
    pub last_status_change: DateTime<Utc>,
}

impl CourierAvailability {
    pub fn is_ready_for_work(&self) -> bool {
        self.is_available && self.is_working
    }
}

/// One stored position sample. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierLocation {
    pub courier_id: Uuid,
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}
