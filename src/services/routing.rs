use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{config::AppConfig, models::geo::LatLng};

const EARTH_RADIUS_KM: f64 = 6371.0088;
const ROAD_FACTOR: f64 = 1.3;

/// Driving ETA as display text, e.g. `12 mins` / `3.4 km`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eta {
    pub time: String,
    pub distance: String,
}

impl Eta {
    pub fn from_route(duration_secs: f64, distance_m: f64) -> Self {
        Self {
            time: format_duration(duration_secs),
            distance: format_distance(distance_m),
        }
    }
}

/// Computes driving ETAs. A failed lookup or an empty route answer is
/// `None`, never an error.
#[async_trait]
pub trait RoutingEngine: Send + Sync {
    async fn eta(&self, origin: LatLng, destination: LatLng) -> Option<Eta>;
}

pub fn router_from_config(config: &AppConfig) -> Arc<dyn RoutingEngine> {
    match &config.routing_url {
        Some(base) => Arc::new(OsrmRouter::new(base.clone())),
        None => Arc::new(StraightLineRouter::new(config.eta_average_speed_kmh)),
    }
}

/// Great-circle distance stretched by a fixed road factor, driven at a
/// constant average speed.
#[derive(Debug, Clone)]
pub struct StraightLineRouter {
    average_speed_kmh: f64,
}

impl StraightLineRouter {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self { average_speed_kmh }
    }
}

#[async_trait]
impl RoutingEngine for StraightLineRouter {
    async fn eta(&self, origin: LatLng, destination: LatLng) -> Option<Eta> {
        if !origin.is_valid() || !destination.is_valid() || self.average_speed_kmh <= 0.0 {
            return None;
        }
        let distance_km = haversine_km(origin, destination) * ROAD_FACTOR;
        let duration_secs = distance_km / self.average_speed_kmh * 3600.0;
        Some(Eta::from_route(duration_secs, distance_km * 1000.0))
    }
}

/// Client for an OSRM-compatible `route` service.
#[derive(Debug, Clone)]
pub struct OsrmRouter {
    client: reqwest::Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    duration: f64,
    distance: f64,
}

impl OsrmRouter {
    pub fn new(base: Url) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base }
    }

    fn route_url(&self, origin: LatLng, destination: LatLng) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=false",
            self.base.as_str().trim_end_matches('/'),
            origin.lng,
            origin.lat,
            destination.lng,
            destination.lat
        )
    }
}

#[async_trait]
impl RoutingEngine for OsrmRouter {
    async fn eta(&self, origin: LatLng, destination: LatLng) -> Option<Eta> {
        let url = self.route_url(origin, destination);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("routing request failed: {err}");
                return None;
            }
        };
        let body: OsrmResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!("routing response unreadable: {err}");
                return None;
            }
        };
        body.into_eta()
    }
}

impl OsrmResponse {
    fn into_eta(self) -> Option<Eta> {
        if self.code != "Ok" {
            debug!(code = %self.code, "router found no route");
            return None;
        }
        self.routes
            .first()
            .map(|route| Eta::from_route(route.duration, route.distance))
    }
}

pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

pub fn format_duration(secs: f64) -> String {
    let minutes = ((secs / 60.0).round() as u64).max(1);
    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };
    if minutes < 60 {
        return plural(minutes, "min");
    }
    let (hours, rest) = (minutes / 60, minutes % 60);
    if rest == 0 {
        plural(hours, "hour")
    } else {
        format!("{} {}", plural(hours, "hour"), plural(rest, "min"))
    }
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round() as u64)
    } else if meters < 100_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_like_directions() {
        assert_eq!(format_duration(10.0), "1 min");
        assert_eq!(format_duration(12.0 * 60.0), "12 mins");
        assert_eq!(format_duration(65.0 * 60.0), "1 hour 5 mins");
        assert_eq!(format_duration(121.0 * 60.0), "2 hours 1 min");
        assert_eq!(format_duration(120.0 * 60.0), "2 hours");
    }

    #[test]
    fn distances_switch_units() {
        assert_eq!(format_distance(849.6), "850 m");
        assert_eq!(format_distance(3_420.0), "3.4 km");
        assert_eq!(format_distance(250_400.0), "250 km");
    }

    #[test]
    fn haversine_matches_known_distance() {
        // MG Road to the airport in Bengaluru, about 27 km apart.
        let km = haversine_km(LatLng::new(12.9756, 77.6066), LatLng::new(13.1986, 77.7066));
        assert!((km - 27.1).abs() < 0.5, "got {km}");
    }

    #[tokio::test]
    async fn straight_line_router_gives_an_eta() {
        let router = StraightLineRouter::new(40.0);
        let eta = router
            .eta(LatLng::new(12.97, 77.59), LatLng::new(12.99, 77.61))
            .await
            .expect("eta");
        assert!(eta.time.ends_with("mins"), "{eta:?}");
        assert!(eta.distance.ends_with("km"), "{eta:?}");
    }

    #[tokio::test]
    async fn invalid_coordinates_have_no_eta() {
        let router = StraightLineRouter::new(40.0);
        assert_eq!(
            router
                .eta(LatLng::new(f64::NAN, 0.0), LatLng::new(0.0, 0.0))
                .await,
            None
        );
    }

    #[test]
    fn osrm_url_puts_longitude_first() {
        let router = OsrmRouter::new(Url::parse("http://router.local/").expect("url"));
        assert_eq!(
            router.route_url(LatLng::new(1.5, 2.5), LatLng::new(3.5, 4.5)),
            "http://router.local/route/v1/driving/2.5,1.5;4.5,3.5?overview=false"
        );
    }

    fn osrm_eta(body: &str) -> Option<Eta> {
        serde_json::from_str::<OsrmResponse>(body)
            .expect("osrm body")
            .into_eta()
    }

    #[test]
    fn osrm_without_a_route_has_no_eta() {
        assert_eq!(osrm_eta(r#"{"code":"NoRoute","routes":[]}"#), None);
        assert_eq!(osrm_eta(r#"{"code":"Ok","routes":[]}"#), None);
        assert_eq!(osrm_eta(r#"{"code":"InvalidQuery"}"#), None);
    }

    #[test]
    fn osrm_uses_the_first_route() {
        let eta = osrm_eta(
            r#"{"code":"Ok","routes":[
                {"duration":720.0,"distance":3420.0,"weight":720.0},
                {"duration":900.0,"distance":5000.0,"weight":900.0}
            ]}"#,
        );
        assert_eq!(
            eta,
            Some(Eta {
                time: "12 mins".into(),
                distance: "3.4 km".into(),
            })
        );
    }
}
