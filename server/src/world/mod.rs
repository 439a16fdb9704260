/*
 * Created on Wed Feb 07 2024
 *
 * This file is a part of Loggerhead
 * Loggerhead is a free and open-source in-memory geospatial database that
 * aims to provide fast location writes, reads and range queries with
 * effortless horizontal scaling
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # The world
//!
//! The world is the whole working set of one node: a lazily-grown map of
//! namespaces, each fronting its own quadtree. Everything in here is
//! in-memory and eventually consistent across the cluster; peers converge by
//! replaying each other's commands and by pulling snapshots on join

pub mod error;
mod location;
mod namespace;
mod snapshot;
mod tree;

pub use self::error::{WorldError, WorldResult};
pub use self::location::{Location, LocationSnapshot};
pub use self::namespace::Namespace;
pub use self::snapshot::SnapshotError;
pub use self::tree::QuadTree;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// The namespace-partitioned world map. Cheap to share: clone the `Arc`
#[derive(Debug, Default)]
pub struct World {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl World {
    pub fn new() -> Self {
        World {
            namespaces: RwLock::new(HashMap::new()),
        }
    }
    /// Get or lazily create a namespace. Namespaces live for the rest of the
    /// process once created
    fn namespace(&self, ns: &str) -> Arc<Namespace> {
        if let Some(namespace) = self.namespaces.read().get(ns) {
            return Arc::clone(namespace);
        }
        let mut map = self.namespaces.write();
        Arc::clone(
            map.entry(ns.to_owned())
                .or_insert_with(|| Arc::new(Namespace::new(ns))),
        )
    }
    /// Insert or move a location. Validation runs before the namespace is
    /// resolved, so a bad save never creates an empty namespace
    pub fn save(&self, ns: &str, id: &str, lat: f64, lon: f64) -> WorldResult<()> {
        Location::validate(ns, id, lat, lon)?;
        self.namespace(ns).save(id, lat, lon).map(|_| ())
    }
    /// Remove a location. Unknown namespaces and ids are no-ops
    pub fn delete(&self, ns: &str, id: &str) {
        self.namespace(ns).delete(id);
    }
    /// A value-copy of the location, or `None` when absent. Returning a copy
    /// keeps callers that serialise the result out of mutation races
    pub fn get(&self, ns: &str, id: &str) -> Option<LocationSnapshot> {
        self.namespace(ns).get(id).map(|loc| loc.snapshot())
    }
    /// Every location of `ns` inside the closed rectangle, as value-copies
    pub fn query_range(
        &self,
        ns: &str,
        lat1: f64,
        lat2: f64,
        lon1: f64,
        lon2: f64,
    ) -> Vec<LocationSnapshot> {
        self.namespace(ns)
            .query_range(lat1, lat2, lon1, lon2)
            .iter()
            .map(|loc| loc.snapshot())
            .collect()
    }
    pub fn namespace_count(&self) -> usize {
        self.namespaces.read().len()
    }
    pub fn location_count(&self) -> usize {
        let namespaces: Vec<Arc<Namespace>> =
            self.namespaces.read().values().cloned().collect();
        namespaces.iter().map(|ns| ns.len()).sum()
    }
    /// Value-copies of everything in the world, namespace by namespace
    pub(crate) fn all_locations(&self) -> Vec<LocationSnapshot> {
        let namespaces: Vec<Arc<Namespace>> =
            self.namespaces.read().values().cloned().collect();
        let mut out = Vec::new();
        for namespace in namespaces {
            for location in namespace.iter_snapshots() {
                out.push(location);
            }
        }
        out
    }
    /// Serialise the whole world. An encoding failure yields an empty buffer
    /// (and an error log); peers treat an empty state as nothing-to-merge
    pub fn to_bytes(&self) -> Vec<u8> {
        match snapshot::encode(self) {
            Ok(buf) => buf,
            Err(e) => {
                log::error!("Failed to encode world snapshot: {}", e);
                Vec::new()
            }
        }
    }
    /// Rebuild a world from an encoded snapshot. Any failure means the
    /// snapshot is corrupt; callers treat that as fatal
    pub fn from_bytes(buf: &[u8]) -> Result<World, SnapshotError> {
        snapshot::decode(buf)
    }
    /// Replay every location of `other` into `self`. Last writer wins per
    /// `(ns, id)` in call order; merging the same world twice is a no-op
    pub fn merge(&self, other: &World) -> WorldResult<()> {
        for location in other.all_locations() {
            self.save(&location.ns, &location.id, location.lat, location.lon)?;
        }
        Ok(())
    }
    #[cfg(test)]
    /// Assert every cross-structure invariant: tree shape, rectangle
    /// containment, and agreement between each id-map and its tree
    pub(crate) fn assert_invariants(&self) {
        let namespaces: Vec<Arc<Namespace>> =
            self.namespaces.read().values().cloned().collect();
        for namespace in namespaces {
            namespace.tree().assert_structure();
            for location in namespace.locations() {
                let leaf = location
                    .leaf()
                    .expect("location in map but detached from the tree");
                assert!(
                    leaf.holds(&location),
                    "back-reference points at a leaf that doesn't hold the location"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_your_writes() {
        let world = World::new();
        world.save("fleet", "truck-1", 1.0, 2.0).unwrap();
        let loc = world.get("fleet", "truck-1").expect("present");
        assert_eq!((loc.lat, loc.lon), (1.0, 2.0));
    }

    #[test]
    fn test_resave_keeps_cardinality() {
        let world = World::new();
        world.save("fleet", "truck-1", 1.0, 2.0).unwrap();
        world.save("fleet", "truck-1", 3.0, 4.0).unwrap();
        let loc = world.get("fleet", "truck-1").expect("present");
        assert_eq!((loc.lat, loc.lon), (3.0, 4.0));
        assert_eq!(world.location_count(), 1);
    }

    #[test]
    fn test_delete_then_query_misses() {
        let world = World::new();
        world.save("fleet", "truck-1", 1.0, 2.0).unwrap();
        world.delete("fleet", "truck-1");
        assert!(world.get("fleet", "truck-1").is_none());
        assert!(world.query_range("fleet", 0.0, 2.0, 1.0, 3.0).is_empty());
    }

    #[test]
    fn test_bad_save_creates_no_namespace() {
        let world = World::new();
        assert!(world.save("", "truck-1", 1.0, 2.0).is_err());
        assert!(world.save("fleet", "truck-1", 100.0, 2.0).is_err());
        assert_eq!(world.namespace_count(), 0);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let world = World::new();
        world.save("fleet", "x", 1.0, 1.0).unwrap();
        world.save("birds", "x", 1.0, 1.0).unwrap();
        world.delete("fleet", "x");
        assert!(world.get("fleet", "x").is_none());
        assert!(world.get("birds", "x").is_some());
        let in_birds = world.query_range("birds", 0.0, 2.0, 0.0, 2.0);
        assert_eq!(in_birds.len(), 1);
        assert!(world.query_range("fleet", 0.0, 2.0, 0.0, 2.0).is_empty());
    }

    #[test]
    fn test_merge_is_last_writer_wins() {
        let ours = World::new();
        ours.save("fleet", "truck-1", 1.0, 1.0).unwrap();
        ours.save("fleet", "truck-2", 2.0, 2.0).unwrap();
        let theirs = World::new();
        theirs.save("fleet", "truck-1", 9.0, 9.0).unwrap();
        theirs.save("birds", "pigeon", 3.0, 3.0).unwrap();
        ours.merge(&theirs).unwrap();
        // the merged-in copy overwrote ours, everything else survived
        let truck1 = ours.get("fleet", "truck-1").unwrap();
        assert_eq!((truck1.lat, truck1.lon), (9.0, 9.0));
        assert!(ours.get("fleet", "truck-2").is_some());
        assert!(ours.get("birds", "pigeon").is_some());
        assert_eq!(ours.location_count(), 3);
    }

    #[test]
    fn test_merge_is_idempotent_on_equal_input() {
        let ours = World::new();
        ours.save("fleet", "truck-1", 1.0, 1.0).unwrap();
        let theirs = World::new();
        theirs.save("fleet", "truck-1", 5.0, 5.0).unwrap();
        ours.merge(&theirs).unwrap();
        ours.merge(&theirs).unwrap();
        assert_eq!(ours.location_count(), 1);
        let loc = ours.get("fleet", "truck-1").unwrap();
        assert_eq!((loc.lat, loc.lon), (5.0, 5.0));
    }

    #[test]
    fn test_to_bytes_from_bytes_identity() {
        let world = World::new();
        for i in 0..25 {
            world
                .save("fleet", &format!("truck-{i}"), i as f64, -(i as f64))
                .unwrap();
        }
        let rebuilt = World::from_bytes(&world.to_bytes()).unwrap();
        assert_eq!(rebuilt.location_count(), world.location_count());
        for i in 0..25 {
            let id = format!("truck-{i}");
            assert_eq!(
                rebuilt.get("fleet", &id),
                world.get("fleet", &id)
            );
        }
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        assert!(World::from_bytes(b"\x00\x01garbage").is_err());
    }
}
