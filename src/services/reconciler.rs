//! Turns store snapshots into map and trip-list state.
//!
//! Every snapshot is the full tree. The reconciler compares it with the
//! previous one so that markers keep their identity, unchanged positions
//! are not touched and ETA lookups only go out when their inputs moved.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::{
    map::{Bounds, MapSurface, MarkerId, MarkerKind},
    routing::Eta,
    trips::{NewTrip, TripDraft},
};
use crate::{
    error::AppError,
    models::{
        geo::{LatLng, Place},
        snapshot::Snapshot,
        trip::{driver_link, TripStatus},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EtaState {
    Waiting,
    Ready(Eta),
    Unavailable,
}

impl EtaState {
    pub fn text(&self) -> String {
        match self {
            EtaState::Waiting => "ETA: waiting for driver...".into(),
            EtaState::Ready(eta) => format!("ETA: {} ({})", eta.time, eta.distance),
            EtaState::Unavailable => "ETA: unavailable".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRow {
    pub id: String,
    pub driver_name: String,
    pub leader_name: String,
    pub route: String,
    pub status: TripStatus,
    pub eta: EtaState,
    pub link: String,
}

impl TripRow {
    pub fn eta_text(&self) -> String {
        self.eta.text()
    }
}

/// ETA lookup to run for `trip_id`. The answer only lands if `token` is
/// still the trip's current token.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaRequest {
    pub trip_id: String,
    pub token: u64,
    pub origin: LatLng,
    pub destination: LatLng,
}

pub struct Reconciler {
    driver_base_url: String,
    driver_markers: HashMap<String, MarkerId>,
    /// Where each driver marker was last placed.
    driver_positions: HashMap<String, LatLng>,
    pickup_markers: HashMap<String, MarkerId>,
    drop_markers: HashMap<String, MarkerId>,
    draft: Option<TripDraft>,
    previous: Snapshot,
    rows: Vec<TripRow>,
    eta_tokens: HashMap<String, u64>,
    next_token: u64,
    /// Deleted trips whose removal has not shown up in a snapshot yet.
    pending_deletes: HashSet<String>,
}

impl Reconciler {
    pub fn new(driver_base_url: impl Into<String>) -> Self {
        Self {
            driver_base_url: driver_base_url.into(),
            driver_markers: HashMap::new(),
            driver_positions: HashMap::new(),
            pickup_markers: HashMap::new(),
            drop_markers: HashMap::new(),
            draft: None,
            previous: Snapshot::default(),
            rows: Vec::new(),
            eta_tokens: HashMap::new(),
            next_token: 1,
            pending_deletes: HashSet::new(),
        }
    }

    pub fn rows(&self) -> &[TripRow] {
        &self.rows
    }

    pub fn row(&self, id: &str) -> Option<&TripRow> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn driver_marker(&self, id: &str) -> Option<MarkerId> {
        self.driver_markers.get(id).copied()
    }

    pub fn pickup_marker(&self, id: &str) -> Option<MarkerId> {
        self.pickup_markers.get(id).copied()
    }

    pub fn drop_marker(&self, id: &str) -> Option<MarkerId> {
        self.drop_markers.get(id).copied()
    }

    /// Reconciles one snapshot and returns the ETA lookups to start.
    pub fn apply<M: MapSurface + ?Sized>(
        &mut self,
        snapshot: Snapshot,
        map: &mut M,
    ) -> Vec<EtaRequest> {
        self.pending_deletes
            .retain(|id| snapshot.trips.contains_key(id));

        let mut previous_eta: HashMap<String, EtaState> = self
            .rows
            .drain(..)
            .map(|row| (row.id, row.eta))
            .collect();
        let mut tokens = HashMap::new();
        let mut requests = Vec::new();
        let mut rows = Vec::with_capacity(snapshot.trips.len());

        for (id, trip) in &snapshot.trips {
            if self.pending_deletes.contains(id) {
                debug!(trip_id = %id, "skipping trip deleted after this snapshot");
                continue;
            }
            let location = snapshot.locations.get(id).map(|loc| loc.position());
            let previous_location = self.previous.locations.get(id).map(|loc| loc.position());
            let mut bounds = Bounds::default();

            if let Some(position) = location {
                bounds.extend(position);
                match self.driver_markers.get(id).copied() {
                    Some(marker) => {
                        if self.driver_positions.get(id) != Some(&position) {
                            map.move_marker(marker, position);
                        }
                    }
                    None => {
                        let marker = map.add_marker(MarkerKind::Driver, position);
                        self.driver_markers.insert(id.clone(), marker);
                    }
                }
                self.driver_positions.insert(id.clone(), position);
            }

            place_once(
                &mut self.pickup_markers,
                map,
                id,
                MarkerKind::Pickup,
                trip.pickup.as_ref(),
                &mut bounds,
            );
            place_once(
                &mut self.drop_markers,
                map,
                id,
                MarkerKind::Drop,
                trip.drop.as_ref(),
                &mut bounds,
            );

            if !bounds.is_empty() {
                map.fit_bounds(&bounds);
            }

            let carried = previous_eta.remove(id).unwrap_or(EtaState::Waiting);
            let eta = match (location, trip.drop.as_ref()) {
                (Some(origin), Some(drop)) if !trip.is_ended() => {
                    let unchanged = previous_location == Some(origin)
                        && self.previous.trips.get(id).is_some_and(|previous| {
                            previous.drop == trip.drop && previous.status == trip.status
                        });
                    if unchanged {
                        if let Some(token) = self.eta_tokens.get(id) {
                            tokens.insert(id.clone(), *token);
                        }
                        carried
                    } else {
                        let token = self.next_token;
                        self.next_token += 1;
                        tokens.insert(id.clone(), token);
                        requests.push(EtaRequest {
                            trip_id: id.clone(),
                            token,
                            origin,
                            destination: drop.position(),
                        });
                        EtaState::Waiting
                    }
                }
                _ => EtaState::Waiting,
            };

            rows.push(TripRow {
                id: id.clone(),
                driver_name: trip.driver_name.clone(),
                leader_name: trip.leader_name.clone(),
                route: trip.route_label(),
                status: trip.status,
                eta,
                link: driver_link(&self.driver_base_url, id),
            });
        }

        let orphans = snapshot.orphan_locations().count();
        if orphans > 0 {
            debug!(orphans, "locations without a trip ignored");
        }

        self.eta_tokens = tokens;
        self.rows = rows;
        self.previous = snapshot;
        requests
    }

    /// Applies an ETA answer. Returns `false` when the answer is stale: the
    /// trip vanished, ended, or its inputs changed since the request.
    pub fn patch_eta(&mut self, trip_id: &str, token: u64, eta: Option<Eta>) -> bool {
        if self.eta_tokens.get(trip_id) != Some(&token) {
            debug!(trip_id, token, "dropping stale ETA");
            return false;
        }
        let Some(row) = self.rows.iter_mut().find(|row| row.id == trip_id) else {
            debug!(trip_id, "ETA target row is gone");
            return false;
        };
        row.eta = match eta {
            Some(eta) => EtaState::Ready(eta),
            None => EtaState::Unavailable,
        };
        self.eta_tokens.remove(trip_id);
        true
    }

    /// Drops everything shown for `id`. Used after an explicit delete.
    ///
    /// Snapshots taken before the delete may still be on their way; the
    /// trip stays hidden until a snapshot without it has been applied.
    pub fn forget_trip<M: MapSurface + ?Sized>(&mut self, id: &str, map: &mut M) {
        for markers in [
            &mut self.driver_markers,
            &mut self.pickup_markers,
            &mut self.drop_markers,
        ] {
            if let Some(marker) = markers.remove(id) {
                map.remove_marker(marker);
            }
        }
        self.driver_positions.remove(id);
        self.rows.retain(|row| row.id != id);
        self.eta_tokens.remove(id);
        self.pending_deletes.insert(id.to_string());
        self.previous.trips.remove(id);
        self.previous.locations.remove(id);
    }

    /// Removes every marker and forgets all state, draft included.
    pub fn reset<M: MapSurface + ?Sized>(&mut self, map: &mut M) {
        for markers in [
            &mut self.driver_markers,
            &mut self.pickup_markers,
            &mut self.drop_markers,
        ] {
            for (_, marker) in markers.drain() {
                map.remove_marker(marker);
            }
        }
        self.driver_positions.clear();
        self.pending_deletes.clear();
        self.draft = None;
        self.previous = Snapshot::default();
        self.rows.clear();
        self.eta_tokens.clear();
    }

    pub fn draft(&self) -> Option<&TripDraft> {
        self.draft.as_ref()
    }

    pub fn start_draft(
        &mut self,
        driver_name: &str,
        leader_name: &str,
    ) -> Result<&TripDraft, AppError> {
        let draft = TripDraft::new(driver_name, leader_name)?;
        Ok(&*self.draft.insert(draft))
    }

    pub fn set_draft_pickup(&mut self, place: Place) -> Result<&TripDraft, AppError> {
        let draft = self.draft_mut()?;
        draft.pickup = Some(place);
        Ok(&*draft)
    }

    pub fn set_draft_drop(&mut self, place: Place) -> Result<&TripDraft, AppError> {
        let draft = self.draft_mut()?;
        draft.drop = Some(place);
        Ok(&*draft)
    }

    /// Hands out the draft as a trip to create. The draft is kept when
    /// pickup or drop is still missing.
    pub fn take_draft(&mut self) -> Result<NewTrip, AppError> {
        let draft = self.draft.clone().ok_or_else(no_draft)?;
        let new_trip = draft.into_new_trip()?;
        self.draft = None;
        Ok(new_trip)
    }

    pub fn cancel_draft(&mut self) -> Option<TripDraft> {
        self.draft.take()
    }

    fn draft_mut(&mut self) -> Result<&mut TripDraft, AppError> {
        self.draft.as_mut().ok_or_else(no_draft)
    }
}

fn no_draft() -> AppError {
    AppError::BadRequest("no trip draft in progress".into())
}

/// Pickup and drop markers are placed on first sight and never moved.
fn place_once<M: MapSurface + ?Sized>(
    markers: &mut HashMap<String, MarkerId>,
    map: &mut M,
    id: &str,
    kind: MarkerKind,
    place: Option<&Place>,
    bounds: &mut Bounds,
) {
    let Some(place) = place else {
        return;
    };
    bounds.extend(place.position());
    if !markers.contains_key(id) {
        let marker = map.add_marker(kind, place.position());
        markers.insert(id.to_string(), marker);
    }
}
