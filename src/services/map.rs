use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::geo::LatLng;

pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 20.5937,
    lng: 78.9629,
};
pub const DEFAULT_ZOOM: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Driver,
    Pickup,
    Drop,
}

impl MarkerKind {
    pub fn label(&self) -> &'static str {
        match self {
            MarkerKind::Driver => "Driver",
            MarkerKind::Pickup => "P",
            MarkerKind::Drop => "X",
        }
    }
}

/// Bounding box accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bounds {
    south_west: Option<LatLng>,
    north_east: Option<LatLng>,
}

impl Bounds {
    pub fn extend(&mut self, point: LatLng) {
        let (sw, ne) = match (self.south_west, self.north_east) {
            (Some(sw), Some(ne)) => (
                LatLng::new(sw.lat.min(point.lat), sw.lng.min(point.lng)),
                LatLng::new(ne.lat.max(point.lat), ne.lng.max(point.lng)),
            ),
            _ => (point, point),
        };
        self.south_west = Some(sw);
        self.north_east = Some(ne);
    }

    pub fn is_empty(&self) -> bool {
        self.south_west.is_none()
    }

    pub fn contains(&self, point: LatLng) -> bool {
        match (self.south_west, self.north_east) {
            (Some(sw), Some(ne)) => {
                (sw.lat..=ne.lat).contains(&point.lat) && (sw.lng..=ne.lng).contains(&point.lng)
            }
            _ => false,
        }
    }

    pub fn center(&self) -> Option<LatLng> {
        let (sw, ne) = (self.south_west?, self.north_east?);
        Some(LatLng::new((sw.lat + ne.lat) / 2.0, (sw.lng + ne.lng) / 2.0))
    }
}

/// What the reconciler needs from a map widget.
pub trait MapSurface {
    fn add_marker(&mut self, kind: MarkerKind, position: LatLng) -> MarkerId;
    fn move_marker(&mut self, id: MarkerId, position: LatLng);
    fn remove_marker(&mut self, id: MarkerId);
    fn fit_bounds(&mut self, bounds: &Bounds);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub id: MarkerId,
    pub kind: MarkerKind,
    pub label: &'static str,
    pub position: LatLng,
}

/// In-memory map model served to the dispatcher page.
#[derive(Debug, Clone, Serialize)]
pub struct MapState {
    pub center: LatLng,
    pub zoom: u8,
    pub fitted: Option<Bounds>,
    pub markers: BTreeMap<MarkerId, Marker>,
    #[serde(skip)]
    next_id: u64,
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            fitted: None,
            markers: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl MapState {
    pub fn marker(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(&id)
    }

    pub fn markers_of(&self, kind: MarkerKind) -> impl Iterator<Item = &Marker> {
        self.markers.values().filter(move |marker| marker.kind == kind)
    }
}

impl MapSurface for MapState {
    fn add_marker(&mut self, kind: MarkerKind, position: LatLng) -> MarkerId {
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        self.markers.insert(
            id,
            Marker {
                id,
                kind,
                label: kind.label(),
                position,
            },
        );
        id
    }

    fn move_marker(&mut self, id: MarkerId, position: LatLng) {
        if let Some(marker) = self.markers.get_mut(&id) {
            marker.position = position;
        }
    }

    fn remove_marker(&mut self, id: MarkerId) {
        self.markers.remove(&id);
    }

    fn fit_bounds(&mut self, bounds: &Bounds) {
        if let Some(center) = bounds.center() {
            self.center = center;
        }
        self.fitted = Some(*bounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_grow_to_cover_points() {
        let mut bounds = Bounds::default();
        assert!(bounds.is_empty());
        bounds.extend(LatLng::new(12.0, 77.0));
        bounds.extend(LatLng::new(13.0, 78.0));
        assert!(!bounds.is_empty());
        assert!(bounds.contains(LatLng::new(12.5, 77.5)));
        assert!(!bounds.contains(LatLng::new(14.0, 77.5)));
        assert_eq!(bounds.center(), Some(LatLng::new(12.5, 77.5)));
    }

    #[test]
    fn markers_keep_their_id_when_moved() {
        let mut map = MapState::default();
        let id = map.add_marker(MarkerKind::Driver, LatLng::new(1.0, 1.0));
        map.move_marker(id, LatLng::new(2.0, 2.0));
        assert_eq!(map.markers.len(), 1);
        assert_eq!(map.marker(id).map(|m| m.position), Some(LatLng::new(2.0, 2.0)));
        map.remove_marker(id);
        assert!(map.marker(id).is_none());
    }
}
