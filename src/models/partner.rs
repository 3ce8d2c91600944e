use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub city: String,
    pub location: Option<GeoPoint>,
    pub max_delivery_distance_km: Option<f64>,
    pub logo_url: Option<String>,
}

impl Partner {
    /// Pickup point and radius, when both are configured.
    pub fn dispatch_area(&self) -> Option<(&GeoPoint, f64)> {
        match (&self.location, self.max_delivery_distance_km) {
            (Some(location), Some(radius)) if location.is_valid() && radius > 0.0 => {
                Some((location, radius))
            }
            _ => None,
        }
    }
}
