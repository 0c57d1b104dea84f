use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::geo::LatLng;

pub const LOCATIONS: &str = "locations";

/// Latest reported position of a driver. Overwritten on every report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub timestamp: i64,
}

impl Location {
    pub fn now(position: LatLng) -> Self {
        Self {
            lat: position.lat,
            lng: position.lng,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

pub fn location_path(driver_id: &str) -> String {
    format!("{LOCATIONS}/{driver_id}")
}
