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

//! # Locations
//!
//! A [`Location`] is a named point: the `(ns, id)` pair is fixed for the
//! lifetime of the object while the coordinates are updated in place by
//! subsequent saves. The namespace's id-map and (at most) one quadtree leaf
//! hold the only strong references; the leaf back-reference is weak so that
//! dropping both owners actually frees the object

use crate::world::error::{WorldError, WorldResult};
use crate::world::tree::Node;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};

/// A point stored in the world. Share it as `Arc<Location>`; all mutable
/// state sits behind internal locks
#[derive(Debug)]
pub struct Location {
    ns: String,
    id: String,
    pos: RwLock<Position>,
    /// the leaf currently holding this location. This is a hint: the leaf's
    /// own object map is authoritative and a reader may observe a stale value
    /// while the location is being relocated
    leaf: RwLock<Weak<Node>>,
    /// serialises save/delete for this one id; held before any map or tree
    /// lock and never while one is held
    update: Mutex<()>,
}

#[derive(Debug)]
struct Position {
    lat: f64,
    lon: f64,
    updated_at: DateTime<Utc>,
}

impl Location {
    /// Validate a `(ns, id, lat, lon)` quadruple without constructing anything
    pub fn validate(ns: &str, id: &str, lat: f64, lon: f64) -> WorldResult<()> {
        if id.is_empty() {
            return Err(WorldError::RequiredId);
        }
        if ns.is_empty() {
            return Err(WorldError::RequiredNamespace);
        }
        Self::validate_coords(lat, lon)
    }
    /// Validate a coordinate pair against the world's bounds
    pub fn validate_coords(lat: f64, lon: f64) -> WorldResult<()> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(WorldError::InvalidLatitude);
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(WorldError::InvalidLongitude);
        }
        Ok(())
    }
    /// Create a new validated location (detached from any leaf)
    pub fn new(ns: &str, id: &str, lat: f64, lon: f64) -> WorldResult<Arc<Self>> {
        Self::validate(ns, id, lat, lon)?;
        Ok(Arc::new(Location {
            ns: ns.to_owned(),
            id: id.to_owned(),
            pos: RwLock::new(Position {
                lat,
                lon,
                updated_at: Utc::now(),
            }),
            leaf: RwLock::new(Weak::new()),
            update: Mutex::new(()),
        }))
    }
    /// Take the per-id update guard. See the field docs for the lock order
    pub(super) fn update_guard(&self) -> MutexGuard<'_, ()> {
        self.update.lock()
    }
    pub fn ns(&self) -> &str {
        &self.ns
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    /// The current coordinate pair, read atomically
    pub fn coords(&self) -> (f64, f64) {
        let pos = self.pos.read();
        (pos.lat, pos.lon)
    }
    #[allow(dead_code)] // only tests read this today
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.pos.read().updated_at
    }
    /// Update the coordinates in place. On a validation error the location is
    /// left untouched
    pub(super) fn set_coords(&self, lat: f64, lon: f64) -> WorldResult<()> {
        Self::validate_coords(lat, lon)?;
        let mut pos = self.pos.write();
        pos.lat = lat;
        pos.lon = lon;
        pos.updated_at = Utc::now();
        Ok(())
    }
    /// The leaf currently holding this location, if it is attached
    pub(super) fn leaf(&self) -> Option<Arc<Node>> {
        self.leaf.read().upgrade()
    }
    /// Publish a new back-reference. Callers hold the destination leaf's
    /// write lock while doing this
    pub(super) fn set_leaf(&self, leaf: &Arc<Node>) {
        *self.leaf.write() = Arc::downgrade(leaf);
    }
    /// Detach the back-reference (the location is mid-move)
    pub(super) fn clear_leaf(&self) {
        *self.leaf.write() = Weak::new();
    }
    /// Take a consistent value-copy of this location
    pub fn snapshot(&self) -> LocationSnapshot {
        let (lat, lon) = self.coords();
        LocationSnapshot {
            ns: self.ns.clone(),
            id: self.id.clone(),
            lat,
            lon,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lat, lon) = self.coords();
        write!(f, "{},{},{:.6},{:.6}", self.ns, self.id, lat, lon)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A value-copy of a [`Location`], detached from the live object so that
/// callers serialising it cannot race a concurrent move
pub struct LocationSnapshot {
    pub ns: String,
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

impl fmt::Display for LocationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{:.6},{:.6}",
            self.ns, self.id, self.lat, self.lon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_location_validates() {
        assert!(Location::new("fleet", "truck-1", 12.5, -7.25).is_ok());
        assert_eq!(
            Location::new("fleet", "", 0.0, 0.0).unwrap_err(),
            WorldError::RequiredId
        );
        assert_eq!(
            Location::new("", "truck-1", 0.0, 0.0).unwrap_err(),
            WorldError::RequiredNamespace
        );
        assert_eq!(
            Location::new("fleet", "truck-1", 90.01, 0.0).unwrap_err(),
            WorldError::InvalidLatitude
        );
        assert_eq!(
            Location::new("fleet", "truck-1", 0.0, -180.5).unwrap_err(),
            WorldError::InvalidLongitude
        );
    }

    #[test]
    fn test_boundary_coords_are_valid() {
        assert!(Location::new("ns", "a", 90.0, 180.0).is_ok());
        assert!(Location::new("ns", "b", -90.0, -180.0).is_ok());
    }

    #[test]
    fn test_failed_update_leaves_location_unchanged() {
        let loc = Location::new("ns", "a", 1.0, 2.0).unwrap();
        assert_eq!(
            loc.set_coords(100.0, 2.0).unwrap_err(),
            WorldError::InvalidLatitude
        );
        assert_eq!(loc.coords(), (1.0, 2.0));
    }

    #[test]
    fn test_display_uses_six_decimals() {
        let loc = Location::new("ns", "a", 1.0, 2.0).unwrap();
        assert_eq!(loc.to_string(), "ns,a,1.000000,2.000000");
    }

    #[test]
    fn test_update_touches_the_timestamp() {
        let loc = Location::new("ns", "a", 1.0, 2.0).unwrap();
        let created = loc.updated_at();
        loc.set_coords(3.0, 4.0).unwrap();
        assert!(loc.updated_at() >= created);
    }
}
