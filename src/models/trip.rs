use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::geo::Place;

pub const TRIPS: &str = "trips";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TripStatus {
    #[default]
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "ended")]
    Ended,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::Ended => "ended",
        }
    }

    /// Returns the status after moving to `next`, or `None` when the move
    /// would leave `ended`.
    pub fn transition_to(self, next: TripStatus) -> Option<TripStatus> {
        match (self, next) {
            (TripStatus::Ended, TripStatus::Active) => None,
            _ => Some(next),
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub driver_name: String,
    #[serde(default)]
    pub leader_name: String,
    #[serde(default)]
    pub status: TripStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup: Option<Place>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop: Option<Place>,
    #[serde(default)]
    pub created_at: i64,
}

impl Trip {
    pub fn is_ended(&self) -> bool {
        self.status == TripStatus::Ended
    }

    pub fn route_label(&self) -> String {
        let name = |place: &Option<Place>| {
            place
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "–".into())
        };
        format!("{} ➜ {}", name(&self.pickup), name(&self.drop))
    }
}

pub fn trip_path(driver_id: &str) -> String {
    format!("{TRIPS}/{driver_id}")
}

pub fn trip_status_path(driver_id: &str) -> String {
    format!("{TRIPS}/{driver_id}/status")
}

/// Turns a display name into a URL-safe driver id.
pub fn make_slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut in_space = false;
    for ch in lowered.trim().chars() {
        if ch.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            slug.push(ch);
        }
    }
    slug
}

/// Link the driver opens to start reporting: `{base}/driver.html?id={id}`.
pub fn driver_link(base_url: &str, driver_id: &str) -> String {
    let page = format!("{}/driver.html", base_url.trim_end_matches('/'));
    match Url::parse(&page) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("id", driver_id);
            url.to_string()
        }
        Err(_) => format!("{page}?id={driver_id}"),
    }
}
