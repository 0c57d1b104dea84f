use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::{
    location::{Location, LOCATIONS},
    trip::{Trip, TRIPS},
};

/// Typed view of the full store tree.
///
/// Keys are kept sorted, matching the order in which the store lists
/// children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub trips: BTreeMap<String, Trip>,
    pub locations: BTreeMap<String, Location>,
}

impl Snapshot {
    pub fn from_value(tree: &Value) -> Self {
        Self {
            trips: parse_collection(tree, TRIPS),
            locations: parse_collection(tree, LOCATIONS),
        }
    }

    /// Locations with no matching trip. They are never rendered.
    pub fn orphan_locations(&self) -> impl Iterator<Item = &str> {
        self.locations
            .keys()
            .filter(|id| !self.trips.contains_key(*id))
            .map(String::as_str)
    }
}

fn parse_collection<T: DeserializeOwned>(tree: &Value, name: &str) -> BTreeMap<String, T> {
    let Some(entries) = tree.get(name).and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(id, raw)| match serde_json::from_value::<T>(raw.clone()) {
            Ok(record) => Some((id.clone(), record)),
            Err(err) => {
                warn!(collection = name, id = %id, "skipping malformed record: {err}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_collections_are_empty() {
        let snapshot = Snapshot::from_value(&Value::Null);
        assert!(snapshot.trips.is_empty());
        assert!(snapshot.locations.is_empty());

        let snapshot = Snapshot::from_value(&json!({ "trips": {} }));
        assert!(snapshot.locations.is_empty());
    }

    #[test]
    fn malformed_records_are_skipped() {
        let tree = json!({
            "trips": {
                "john-doe": { "driverName": "John Doe", "status": "active" },
                "broken": { "status": "ended" }
            },
            "locations": {
                "john-doe": { "lat": 12.97, "lng": 77.59, "timestamp": 1 },
                "junk": "not a location"
            }
        });
        let snapshot = Snapshot::from_value(&tree);
        assert_eq!(snapshot.trips.len(), 1);
        assert_eq!(snapshot.locations.len(), 1);
        assert_eq!(snapshot.trips["john-doe"].driver_name, "John Doe");
    }

    #[test]
    fn reports_orphan_locations() {
        let tree = json!({
            "locations": { "ghost": { "lat": 1.0, "lng": 2.0, "timestamp": 3 } }
        });
        let snapshot = Snapshot::from_value(&tree);
        assert_eq!(snapshot.orphan_locations().collect::<Vec<_>>(), vec!["ghost"]);
    }
}
