use std::sync::Arc;

use serde_json::Value;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

use super::{
    map::MapState,
    reconciler::{EtaRequest, Reconciler, TripRow},
    routing::RoutingEngine,
    store::RealtimeStore,
    trips::{self, CreatedTrip, NewTrip, TripDraft},
};
use crate::{
    error::AppError,
    models::{geo::Place, snapshot::Snapshot, trip::driver_link},
};

struct View {
    reconciler: Reconciler,
    map: MapState,
}

/// Viewer side: follows the store, keeps the map and trip list in sync and
/// carries out operator actions.
#[derive(Clone)]
pub struct Dispatcher {
    view: Arc<Mutex<View>>,
    store: Arc<dyn RealtimeStore>,
    router: Arc<dyn RoutingEngine>,
    driver_base_url: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        router: Arc<dyn RoutingEngine>,
        driver_base_url: impl Into<String>,
    ) -> Self {
        let driver_base_url = driver_base_url.into();
        Self {
            view: Arc::new(Mutex::new(View {
                reconciler: Reconciler::new(driver_base_url.clone()),
                map: MapState::default(),
            })),
            store,
            router,
            driver_base_url,
        }
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    pub async fn run(self) {
        let mut subscription = self.store.subscribe().await;
        while let Some(tree) = subscription.next().await {
            self.reconcile(&tree).await;
        }
        info!("store closed, dispatcher stopped");
    }

    /// Reconciles one full tree and starts the ETA lookups it calls for.
    /// Trees have to come in the order the store produced them.
    pub async fn reconcile(&self, tree: &Value) -> Vec<JoinHandle<()>> {
        let snapshot = Snapshot::from_value(tree);
        let requests = {
            let mut view = self.view.lock().await;
            let View { reconciler, map } = &mut *view;
            reconciler.apply(snapshot, map)
        };
        requests
            .into_iter()
            .map(|request| self.spawn_eta(request))
            .collect()
    }

    /// Reads the store directly and reconciles against it. Only safe while
    /// no [`Dispatcher::run`] loop is following the same store.
    #[cfg(test)]
    pub(crate) async fn refresh(&self) -> Result<Vec<JoinHandle<()>>, super::store::StoreError> {
        let tree = self.store.get("").await?.unwrap_or(Value::Null);
        Ok(self.reconcile(&tree).await)
    }

    fn spawn_eta(&self, request: EtaRequest) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let eta = this.router.eta(request.origin, request.destination).await;
            let mut view = this.view.lock().await;
            if !view
                .reconciler
                .patch_eta(&request.trip_id, request.token, eta)
            {
                debug!(trip_id = %request.trip_id, "ETA arrived after the trip changed");
            }
        })
    }

    pub async fn rows(&self) -> Vec<TripRow> {
        self.view.lock().await.reconciler.rows().to_vec()
    }

    pub async fn map(&self) -> MapState {
        self.view.lock().await.map.clone()
    }

    pub fn link(&self, id: &str) -> String {
        driver_link(&self.driver_base_url, id)
    }

    pub async fn create_trip(&self, new_trip: NewTrip) -> Result<CreatedTrip, AppError> {
        trips::create_trip(&*self.store, &self.driver_base_url, new_trip).await
    }

    pub async fn end_trip(&self, id: &str, confirmed: bool) -> Result<(), AppError> {
        trips::end_trip(&*self.store, id, confirmed).await
    }

    /// Deletes the trip from the store and takes its markers off the map.
    pub async fn delete_trip(&self, id: &str, confirmed: bool) -> Result<(), AppError> {
        // Held across the write: the tree without the trip must not be
        // reconciled before the reconciler knows about the delete.
        let mut view = self.view.lock().await;
        trips::delete_trip(&*self.store, id, confirmed).await?;
        let View { reconciler, map } = &mut *view;
        reconciler.forget_trip(id, map);
        Ok(())
    }

    pub async fn draft(&self) -> Option<TripDraft> {
        self.view.lock().await.reconciler.draft().cloned()
    }

    pub async fn start_draft(
        &self,
        driver_name: &str,
        leader_name: &str,
    ) -> Result<TripDraft, AppError> {
        let mut view = self.view.lock().await;
        view.reconciler
            .start_draft(driver_name, leader_name)
            .cloned()
    }

    pub async fn set_draft_pickup(&self, place: Place) -> Result<TripDraft, AppError> {
        let mut view = self.view.lock().await;
        view.reconciler.set_draft_pickup(place).cloned()
    }

    pub async fn set_draft_drop(&self, place: Place) -> Result<TripDraft, AppError> {
        let mut view = self.view.lock().await;
        view.reconciler.set_draft_drop(place).cloned()
    }

    pub async fn cancel_draft(&self) -> Option<TripDraft> {
        self.view.lock().await.reconciler.cancel_draft()
    }

    /// Writes the drafted trip. On failure the draft is kept for another try.
    pub async fn confirm_draft(&self) -> Result<CreatedTrip, AppError> {
        let new_trip = self.view.lock().await.reconciler.take_draft()?;
        match self.create_trip(new_trip.clone()).await {
            Ok(created) => Ok(created),
            Err(err) => {
                let mut view = self.view.lock().await;
                let restored = view
                    .reconciler
                    .start_draft(&new_trip.driver_name, &new_trip.leader_name)
                    .is_ok();
                if restored {
                    if let Some(pickup) = new_trip.pickup {
                        view.reconciler.set_draft_pickup(pickup)?;
                    }
                    if let Some(drop) = new_trip.drop {
                        view.reconciler.set_draft_drop(drop)?;
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        models::geo::LatLng,
        services::{
            map::MarkerKind,
            reconciler::EtaState,
            routing::Eta,
            store::{StoreWriter, TreeStore},
        },
    };

    const BASE: &str = "https://driver-live-tracking.vercel.app";

    struct FixedRouter(Option<Eta>);

    #[async_trait]
    impl RoutingEngine for FixedRouter {
        async fn eta(&self, _: LatLng, _: LatLng) -> Option<Eta> {
            self.0.clone()
        }
    }

    fn dispatcher(store: &TreeStore, eta: Option<Eta>) -> Dispatcher {
        Dispatcher::new(Arc::new(store.clone()), Arc::new(FixedRouter(eta)), BASE)
    }

    fn place(lat: f64, lng: f64, name: &str) -> Place {
        Place {
            lat,
            lng,
            name: name.into(),
        }
    }

    async fn settle(dispatcher: &Dispatcher) {
        for handle in dispatcher.refresh().await.expect("refresh") {
            handle.await.expect("eta task");
        }
    }

    #[tokio::test]
    async fn trip_with_driver_and_drop_gets_an_eta() {
        let store = TreeStore::in_memory();
        let dispatcher = dispatcher(
            &store,
            Some(Eta {
                time: "9 mins".into(),
                distance: "3.1 km".into(),
            }),
        );

        dispatcher.start_draft("John Doe", "Lee").await.expect("draft");
        dispatcher
            .set_draft_pickup(place(12.95, 77.55, "Home"))
            .await
            .expect("pickup");
        dispatcher
            .set_draft_drop(place(13.0, 77.7, "Office"))
            .await
            .expect("drop");
        let created = dispatcher.confirm_draft().await.expect("confirm");
        assert_eq!(created.id, "john-doe");
        assert!(dispatcher.draft().await.is_none());

        store
            .set("locations/john-doe", json!({ "lat": 12.97, "lng": 77.59, "timestamp": 1 }))
            .await
            .expect("location");
        settle(&dispatcher).await;

        let rows = dispatcher.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].driver_name, "John Doe");
        assert_eq!(rows[0].eta_text(), "ETA: 9 mins (3.1 km)");

        let map = dispatcher.map().await;
        let drivers: Vec<_> = map.markers_of(MarkerKind::Driver).collect();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].position, LatLng::new(12.97, 77.59));
    }

    #[tokio::test]
    async fn no_route_shows_unavailable() {
        let store = TreeStore::in_memory();
        let dispatcher = dispatcher(&store, None);
        dispatcher
            .create_trip(NewTrip {
                driver_name: "John Doe".into(),
                leader_name: "Lee".into(),
                pickup: None,
                drop: Some(place(13.0, 77.7, "Office")),
            })
            .await
            .expect("create");
        store
            .set("locations/john-doe", json!({ "lat": 12.97, "lng": 77.59, "timestamp": 1 }))
            .await
            .expect("location");
        settle(&dispatcher).await;

        let rows = dispatcher.rows().await;
        assert_eq!(rows[0].eta, EtaState::Unavailable);
    }

    #[tokio::test]
    async fn delete_clears_store_and_markers() {
        let store = TreeStore::in_memory();
        let dispatcher = dispatcher(&store, None);
        dispatcher
            .create_trip(NewTrip {
                driver_name: "John Doe".into(),
                leader_name: "Lee".into(),
                pickup: Some(place(12.95, 77.55, "Home")),
                drop: Some(place(13.0, 77.7, "Office")),
            })
            .await
            .expect("create");
        store
            .set("locations/john-doe", json!({ "lat": 12.97, "lng": 77.59, "timestamp": 1 }))
            .await
            .expect("location");
        settle(&dispatcher).await;
        assert_eq!(dispatcher.map().await.markers.len(), 3);

        dispatcher.delete_trip("john-doe", true).await.expect("delete");
        settle(&dispatcher).await;

        assert!(dispatcher.map().await.markers.is_empty());
        assert!(dispatcher.rows().await.is_empty());
        assert_eq!(store.get("").await.expect("get"), None);
    }

    #[tokio::test]
    async fn queued_tree_from_before_delete_keeps_markers_gone() {
        let store = TreeStore::in_memory();
        let dispatcher = dispatcher(&store, None);
        let mut subscription = store.subscribe().await;
        dispatcher
            .reconcile(&subscription.next().await.expect("initial"))
            .await;

        dispatcher
            .create_trip(NewTrip {
                driver_name: "John Doe".into(),
                leader_name: "Lee".into(),
                pickup: None,
                drop: Some(place(13.0, 77.7, "Office")),
            })
            .await
            .expect("create");
        dispatcher
            .reconcile(&subscription.next().await.expect("created"))
            .await;
        store
            .set("locations/john-doe", json!({ "lat": 12.97, "lng": 77.59, "timestamp": 1 }))
            .await
            .expect("location");

        dispatcher.delete_trip("john-doe", true).await.expect("delete");
        for _ in 0..2 {
            let tree = subscription.next().await.expect("queued tree");
            for handle in dispatcher.reconcile(&tree).await {
                handle.await.expect("eta task");
            }
        }

        assert!(dispatcher.map().await.markers.is_empty());
        assert!(dispatcher.rows().await.is_empty());
    }

    #[tokio::test]
    async fn background_task_follows_the_store() {
        let store = TreeStore::in_memory();
        let dispatcher = dispatcher(&store, None);
        let task = dispatcher.spawn();

        dispatcher
            .create_trip(NewTrip {
                driver_name: "Jane Roe".into(),
                leader_name: "Lee".into(),
                pickup: None,
                drop: None,
            })
            .await
            .expect("create");

        let mut seen = false;
        for _ in 0..50 {
            if dispatcher.rows().await.iter().any(|row| row.id == "jane-roe") {
                seen = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(seen, "dispatcher never rendered the new trip");
        task.abort();
    }
}
