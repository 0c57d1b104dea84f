//! Driver-side loop that publishes the current position.

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    geolocation::{FixOptions, GeoError, GeolocationProvider},
    store::StoreWriter,
};
use crate::models::location::{location_path, Location};

pub const REPORT_INTERVAL: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReporterError {
    #[error("❌ Driver ID missing")]
    MissingDriverId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverId(String);

impl DriverId {
    pub fn from_query(raw: Option<&str>) -> Result<Self, ReporterError> {
        raw.map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Self(id.to_string()))
            .ok_or(ReporterError::MissingDriverId)
    }

    /// Reads the `id` parameter of a driver link.
    pub fn from_link(link: &str) -> Result<Self, ReporterError> {
        let url = Url::parse(link).map_err(|_| ReporterError::MissingDriverId)?;
        let id = url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned());
        Self::from_query(id.as_deref())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Sent(Location),
    NoFix(GeoError),
    NotSaved,
}

#[derive(Clone)]
pub struct Reporter {
    driver_id: DriverId,
    provider: Arc<dyn GeolocationProvider>,
    writer: Arc<dyn StoreWriter>,
    options: FixOptions,
    period: Duration,
    status: Arc<watch::Sender<String>>,
}

impl Reporter {
    pub fn new(
        driver_id: DriverId,
        provider: Arc<dyn GeolocationProvider>,
        writer: Arc<dyn StoreWriter>,
    ) -> Self {
        let (status, _) = watch::channel(format!("Driver ID: {driver_id}"));
        Self {
            driver_id,
            provider,
            writer,
            options: FixOptions::default(),
            period: REPORT_INTERVAL,
            status: Arc::new(status),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_options(mut self, options: FixOptions) -> Self {
        self.options = options;
        self
    }

    pub fn driver_id(&self) -> &DriverId {
        &self.driver_id
    }

    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    /// One attempt: wait for a fix no longer than the fix timeout, then
    /// overwrite the driver's location. Failures only touch the status.
    pub async fn report_once(&self) -> ReportOutcome {
        let fix = time::timeout(
            self.options.timeout,
            self.provider.current_position(&self.options),
        )
        .await
        .unwrap_or(Err(GeoError::Timeout));

        let position = match fix {
            Ok(position) => position,
            Err(err) => {
                warn!(driver_id = %self.driver_id, "GPS error: {err}");
                self.status.send_replace("❌ Location error".into());
                return ReportOutcome::NoFix(err);
            }
        };

        let location = Location::now(position);
        let written = match serde_json::to_value(location) {
            Ok(body) => self
                .writer
                .set(&location_path(self.driver_id.as_str()), body)
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(err) = written {
            error!(driver_id = %self.driver_id, "location write failed: {err}");
            self.status.send_replace("❌ Location not saved".into());
            return ReportOutcome::NotSaved;
        }

        debug!(driver_id = %self.driver_id, lat = location.lat, lng = location.lng, "location sent");
        self.status.send_replace(format!(
            "Location sent ✔️\n{:.5}, {:.5}",
            location.lat, location.lng
        ));
        ReportOutcome::Sent(location)
    }

    /// Reports now and then once per period until the task is dropped.
    /// Attempts run in their own tasks, so a slow fix never delays the
    /// next one.
    pub async fn run(self) {
        info!(driver_id = %self.driver_id, period_ms = self.period.as_millis() as u64, "reporter started");
        let mut ticks = time::interval(self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let attempt = self.clone();
            tokio::spawn(async move {
                attempt.report_once().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        models::geo::LatLng,
        services::{
            geolocation::feed,
            store::{RealtimeStore, StoreWriter, TreeStore},
        },
    };

    struct CountingProvider {
        calls: AtomicUsize,
        answer: Option<LatLng>,
    }

    #[async_trait]
    impl GeolocationProvider for CountingProvider {
        async fn current_position(&self, _: &FixOptions) -> Result<LatLng, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Some(position) => Ok(position),
                None => std::future::pending().await,
            }
        }
    }

    fn reporter(store: &TreeStore, provider: Arc<dyn GeolocationProvider>) -> Reporter {
        Reporter::new(
            DriverId::from_query(Some("john-doe")).expect("id"),
            provider,
            Arc::new(store.clone()),
        )
    }

    #[test]
    fn driver_id_must_be_present() {
        assert_eq!(DriverId::from_query(None), Err(ReporterError::MissingDriverId));
        assert_eq!(DriverId::from_query(Some("  ")), Err(ReporterError::MissingDriverId));
        assert_eq!(
            ReporterError::MissingDriverId.to_string(),
            "❌ Driver ID missing"
        );
    }

    #[test]
    fn driver_id_from_link() {
        let id = DriverId::from_link("https://driver-live-tracking.vercel.app/driver.html?id=john-doe")
            .expect("id");
        assert_eq!(id.as_str(), "john-doe");
        assert!(DriverId::from_link("https://example.com/driver.html").is_err());
        assert!(DriverId::from_link("not a url").is_err());
    }

    #[tokio::test]
    async fn successful_fix_overwrites_location() {
        let store = TreeStore::in_memory();
        store
            .set("locations/john-doe", json!({ "lat": 0.0, "lng": 0.0, "timestamp": 1 }))
            .await
            .expect("seed");
        let (handle, provider) = feed();
        let reporter = reporter(&store, Arc::new(provider));

        let attempt = tokio::spawn({
            let reporter = reporter.clone();
            async move { reporter.report_once().await }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        handle.push(LatLng::new(12.97, 77.59));

        let outcome = attempt.await.expect("join");
        assert!(matches!(outcome, ReportOutcome::Sent(_)), "{outcome:?}");
        let stored = store.get("locations/john-doe").await.expect("get").expect("location");
        assert_eq!(stored["lat"], json!(12.97));
        assert_eq!(stored["lng"], json!(77.59));
        assert!(stored["timestamp"].as_i64().expect("timestamp") > 1);
        assert_eq!(reporter.status(), "Location sent ✔️\n12.97000, 77.59000");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fix_times_out_without_writing() {
        let store = TreeStore::in_memory();
        let (_handle, provider) = feed();
        let reporter = reporter(&store, Arc::new(provider));

        let outcome = reporter.report_once().await;

        assert_eq!(outcome, ReportOutcome::NoFix(GeoError::Timeout));
        assert_eq!(reporter.status(), "❌ Location error");
        assert!(store.get("locations/john-doe").await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_immediately_then_every_period() {
        let store = TreeStore::in_memory();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            answer: Some(LatLng::new(1.0, 2.0)),
        });
        let task = tokio::spawn(reporter(&store, provider.clone()).run());

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(store.get("locations/john-doe").await.expect("get").is_some());

        time::sleep(REPORT_INTERVAL).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_attempts_do_not_hold_back_the_schedule() {
        let store = TreeStore::in_memory();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let reporter = reporter(&store, provider.clone()).with_options(FixOptions {
            timeout: Duration::from_secs(60),
            ..FixOptions::default()
        });
        let task = tokio::spawn(reporter.run());

        time::sleep(Duration::from_millis(12_000)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        task.abort();
    }
}
