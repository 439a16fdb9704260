/*
 * Created on Fri Feb 09 2024
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

//! # Namespaces
//!
//! A namespace scopes an id-space: it owns the `id → Location` map and the
//! quadtree fronting it. Save/delete for one id are serialised through the
//! location's update guard, so the map and the tree always agree once the
//! dust settles

use crate::world::error::WorldResult;
use crate::world::location::Location;
use crate::world::tree::QuadTree;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct Namespace {
    name: String,
    locations: RwLock<HashMap<String, Arc<Location>>>,
    tree: QuadTree,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Namespace {
            name: name.to_owned(),
            locations: RwLock::new(HashMap::new()),
            tree: QuadTree::new(),
        }
    }
    /// Insert a new location or move an existing one. Idempotent for equal
    /// inputs; validation failures leave both the map and the tree untouched
    pub fn save(&self, id: &str, lat: f64, lon: f64) -> WorldResult<Arc<Location>> {
        Location::validate(&self.name, id, lat, lon)?;
        loop {
            let existing = self.locations.read().get(id).cloned();
            match existing {
                Some(location) => {
                    let _guard = location.update_guard();
                    // the id may have been deleted while we waited for the
                    // guard; in that case this save starts a fresh lifecycle
                    if !self.still_indexed(id, &location) {
                        continue;
                    }
                    location.set_coords(lat, lon)?;
                    self.tree.insert(&location)?;
                    drop(_guard);
                    return Ok(location);
                }
                None => {
                    let location = Location::new(&self.name, id, lat, lon)?;
                    {
                        let mut map = self.locations.write();
                        match map.entry(id.to_owned()) {
                            // another writer created the id first; retry as
                            // an update of that object
                            Entry::Occupied(_) => continue,
                            Entry::Vacant(slot) => {
                                slot.insert(Arc::clone(&location));
                            }
                        }
                    }
                    let _guard = location.update_guard();
                    if !self.still_indexed(id, &location) {
                        continue;
                    }
                    self.tree.insert(&location)?;
                    drop(_guard);
                    return Ok(location);
                }
            }
        }
    }
    /// Remove an id. Absent ids are a no-op; this never errors
    pub fn delete(&self, id: &str) {
        let location = self.locations.read().get(id).cloned();
        if let Some(location) = location {
            let _guard = location.update_guard();
            if !self.still_indexed(id, &location) {
                return;
            }
            // O(1) removal through the back-reference first, then the map.
            // The back-reference is only a hint; if it is gone, fall back to
            // the cascading delete from the root
            match location.leaf() {
                Some(leaf) => leaf.remove_exact(&location),
                None => self.tree.delete(id),
            }
            self.locations.write().remove(id);
        }
    }
    pub fn get(&self, id: &str) -> Option<Arc<Location>> {
        self.locations.read().get(id).cloned()
    }
    pub fn len(&self) -> usize {
        self.locations.read().len()
    }
    pub fn query_range(
        &self,
        lat1: f64,
        lat2: f64,
        lon1: f64,
        lon2: f64,
    ) -> Vec<Arc<Location>> {
        self.tree.query_range(lat1, lat2, lon1, lon2)
    }
    /// Value-copies of everything currently present, for snapshotting
    pub(super) fn iter_snapshots(&self) -> Vec<crate::world::location::LocationSnapshot> {
        self.locations
            .read()
            .values()
            .map(|loc| loc.snapshot())
            .collect()
    }
    /// Is this exact object still what the map holds for `id`?
    fn still_indexed(&self, id: &str, location: &Arc<Location>) -> bool {
        self.locations
            .read()
            .get(id)
            .map(|current| Arc::ptr_eq(current, location))
            .unwrap_or(false)
    }
    #[cfg(test)]
    pub(crate) fn tree(&self) -> &QuadTree {
        &self.tree
    }
    #[cfg(test)]
    pub(crate) fn locations(&self) -> Vec<Arc<Location>> {
        self.locations.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::error::WorldError;

    #[test]
    fn test_save_then_get() {
        let ns = Namespace::new("fleet");
        ns.save("truck-1", 1.0, 2.0).unwrap();
        let location = ns.get("truck-1").expect("saved");
        assert_eq!(location.coords(), (1.0, 2.0));
        assert_eq!(location.ns(), "fleet");
    }

    #[test]
    fn test_resave_updates_in_place() {
        let ns = Namespace::new("fleet");
        let first = ns.save("truck-1", 1.0, 2.0).unwrap();
        let second = ns.save("truck-1", 3.0, 4.0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ns.len(), 1);
        assert_eq!(first.coords(), (3.0, 4.0));
        // the tree followed the move
        let found = ns.query_range(2.5, 3.5, 3.5, 4.5);
        assert_eq!(found.len(), 1);
        assert!(ns.query_range(0.5, 1.5, 1.5, 2.5).is_empty());
    }

    #[test]
    fn test_save_rejects_bad_coords_without_mutation() {
        let ns = Namespace::new("fleet");
        ns.save("truck-1", 1.0, 2.0).unwrap();
        assert_eq!(
            ns.save("truck-1", 91.0, 2.0).unwrap_err(),
            WorldError::InvalidLatitude
        );
        assert_eq!(ns.get("truck-1").unwrap().coords(), (1.0, 2.0));
        assert_eq!(
            ns.save("truck-2", 0.0, 190.0).unwrap_err(),
            WorldError::InvalidLongitude
        );
        assert!(ns.get("truck-2").is_none());
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_delete_removes_from_map_and_tree() {
        let ns = Namespace::new("fleet");
        ns.save("truck-1", 1.0, 2.0).unwrap();
        ns.delete("truck-1");
        assert!(ns.get("truck-1").is_none());
        assert!(ns.query_range(0.0, 2.0, 1.0, 3.0).is_empty());
        // absent id is a no-op
        ns.delete("truck-1");
        assert_eq!(ns.len(), 0);
    }

    #[test]
    fn test_backref_matches_tree_membership() {
        let ns = Namespace::new("fleet");
        for i in 0..32 {
            ns.save(&format!("t{i}"), (i % 10) as f64, (i % 17) as f64)
                .unwrap();
        }
        for location in ns.locations() {
            let leaf = location.leaf().expect("attached");
            assert!(leaf.holds(&location));
        }
        ns.tree().assert_structure();
    }
}
