//! Operator actions on trips. Each one is a plain write against the store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{RealtimeStore, StoreError};
use crate::{
    error::AppError,
    models::{
        geo::Place,
        location::location_path,
        trip::{driver_link, make_slug, trip_path, trip_status_path, Trip, TripStatus},
    },
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub driver_name: String,
    pub leader_name: String,
    #[serde(default)]
    pub pickup: Option<Place>,
    #[serde(default)]
    pub drop: Option<Place>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedTrip {
    pub id: String,
    pub link: String,
}

/// Trip being put together by the operator before it is written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TripDraft {
    pub driver_name: String,
    pub leader_name: String,
    pub pickup: Option<Place>,
    pub drop: Option<Place>,
}

impl TripDraft {
    pub fn new(driver_name: &str, leader_name: &str) -> Result<Self, AppError> {
        let driver_name = driver_name.trim();
        let leader_name = leader_name.trim();
        if driver_name.is_empty() || leader_name.is_empty() {
            return Err(AppError::BadRequest(
                "Driver name and leader name are required".into(),
            ));
        }
        Ok(Self {
            driver_name: driver_name.to_string(),
            leader_name: leader_name.to_string(),
            pickup: None,
            drop: None,
        })
    }

    pub fn into_new_trip(self) -> Result<NewTrip, AppError> {
        let (Some(pickup), Some(drop)) = (self.pickup, self.drop) else {
            return Err(AppError::BadRequest(
                "Please select both pickup and drop".into(),
            ));
        };
        Ok(NewTrip {
            driver_name: self.driver_name,
            leader_name: self.leader_name,
            pickup: Some(pickup),
            drop: Some(drop),
        })
    }
}

/// Picks the driver id for a new trip: the slug of the driver name, or the
/// slug plus a random suffix when a trip already lives under that slug.
pub async fn allocate_driver_id<S>(store: &S, driver_name: &str) -> Result<String, AppError>
where
    S: RealtimeStore + ?Sized,
{
    let slug = make_slug(driver_name);
    if slug.is_empty() {
        return Err(AppError::BadRequest(format!(
            "driver name {driver_name:?} has no usable characters"
        )));
    }
    if store.get(&trip_path(&slug)).await?.is_none() {
        return Ok(slug);
    }
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let candidate = format!("{slug}-{}", &suffix[..6]);
        if store.get(&trip_path(&candidate)).await?.is_none() {
            return Ok(candidate);
        }
    }
}

pub async fn create_trip<S>(
    store: &S,
    driver_base_url: &str,
    new_trip: NewTrip,
) -> Result<CreatedTrip, AppError>
where
    S: RealtimeStore + ?Sized,
{
    let driver_name = new_trip.driver_name.trim().to_string();
    let leader_name = new_trip.leader_name.trim().to_string();
    if driver_name.is_empty() || leader_name.is_empty() {
        return Err(AppError::BadRequest(
            "Driver name and leader name are required".into(),
        ));
    }
    for place in [&new_trip.pickup, &new_trip.drop].into_iter().flatten() {
        if !place.position().is_valid() {
            return Err(AppError::BadRequest(format!(
                "invalid coordinates for {:?}",
                place.name
            )));
        }
    }

    let id = allocate_driver_id(store, &driver_name).await?;
    let trip = Trip {
        driver_name,
        leader_name,
        status: TripStatus::Active,
        pickup: new_trip.pickup,
        drop: new_trip.drop,
        created_at: Utc::now().timestamp_millis(),
    };
    let body = serde_json::to_value(&trip).map_err(StoreError::from)?;
    store.set(&trip_path(&id), body).await?;
    info!(driver_id = %id, "trip created");

    Ok(CreatedTrip {
        link: driver_link(driver_base_url, &id),
        id,
    })
}

/// Marks a trip as ended. Ended trips stay ended.
pub async fn end_trip<S>(store: &S, id: &str, confirmed: bool) -> Result<(), AppError>
where
    S: RealtimeStore + ?Sized,
{
    if !confirmed {
        return Err(AppError::ConfirmationRequired);
    }
    let raw = store
        .get(&trip_path(id))
        .await?
        .ok_or(AppError::NotFound)?;
    let trip: Trip = serde_json::from_value(raw).map_err(StoreError::from)?;
    let next = match trip.status.transition_to(TripStatus::Ended) {
        Some(next) if next != trip.status => next,
        _ => {
            debug!(driver_id = %id, "trip already ended");
            return Ok(());
        }
    };
    store
        .set(&trip_status_path(id), serde_json::Value::from(next.as_str()))
        .await?;
    info!(driver_id = %id, "trip ended");
    Ok(())
}

/// Removes the trip and its location in one multi-path write.
pub async fn delete_trip<S>(store: &S, id: &str, confirmed: bool) -> Result<(), AppError>
where
    S: RealtimeStore + ?Sized,
{
    if !confirmed {
        return Err(AppError::ConfirmationRequired);
    }
    store
        .update(vec![(trip_path(id), None), (location_path(id), None)])
        .await?;
    info!(driver_id = %id, "trip deleted");
    Ok(())
}
