/*
 * Created on Thu Feb 08 2024
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

//! # The point-region quadtree
//!
//! Every namespace fronts its locations with a [`QuadTree`] over the world
//! rectangle (`lat ∈ [-90, 90]`, `lon ∈ [-180, 180]`). A leaf holds up to
//! `capacity` locations; one more insert splits it into the four quadrants of
//! its rectangle. All intervals are closed and a point sitting exactly on a
//! shared midpoint goes to the first accepting child in NW, NE, SW, SE order.
//!
//! Each node guards its object map and child array with its own rwlock, so
//! writers touching different leaves never contend. Locks are only ever taken
//! parent before child; a split takes the splitting node's lock and then the
//! locks of its four freshly-built children, never a sibling's.

use crate::world::error::{WorldError, WorldResult};
use crate::world::location::Location;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// How many locations a leaf holds before it splits
pub const DEFAULT_NODE_CAPACITY: usize = 500;
/// The root is split down to this depth up front (4^5 = 1024 leaves) so that
/// concurrent writers spread over the world don't all fight for one lock
const PREDIVIDE_DEPTH: usize = 5;

const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;

/// A quadtree node. Undivided nodes hold objects; divided nodes hold exactly
/// four children that partition the rectangle and an empty object map
#[derive(Debug)]
pub struct Node {
    lat1: f64,
    lat2: f64,
    lon1: f64,
    lon2: f64,
    capacity: usize,
    inner: RwLock<NodeInner>,
}

#[derive(Debug, Default)]
struct NodeInner {
    objects: HashMap<String, Arc<Location>>,
    /// NW, NE, SW, SE when divided
    children: Option<[Arc<Node>; 4]>,
}

impl Node {
    fn new(lat1: f64, lat2: f64, lon1: f64, lon2: f64, capacity: usize) -> Arc<Self> {
        Arc::new(Node {
            lat1,
            lat2,
            lon1,
            lon2,
            capacity,
            inner: RwLock::new(NodeInner::default()),
        })
    }
    /// Closed-interval containment check for a point
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.lat1 <= lat && lat <= self.lat2 && self.lon1 <= lon && lon <= self.lon2
    }
    /// Does this node's rectangle touch the query rectangle? Touching edges
    /// count: a closed-interval query must not lose points sitting exactly on
    /// a leaf boundary
    fn overlaps(&self, lat1: f64, lat2: f64, lon1: f64, lon2: f64) -> bool {
        !(self.lat1 > lat2 || self.lat2 < lat1 || self.lon1 > lon2 || self.lon2 < lon1)
    }
    /// Walk down from `start` to the leaf currently covering the point
    fn locate(start: &Arc<Node>, lat: f64, lon: f64) -> Arc<Node> {
        let mut node = Arc::clone(start);
        loop {
            let next = {
                let inner = node.inner.read();
                match &inner.children {
                    Some(children) => children.iter().find(|c| c.contains(lat, lon)).cloned(),
                    None => None,
                }
            };
            match next {
                Some(child) => node = child,
                None => return node,
            }
        }
    }
    /// Remove `id` from this subtree, descending into every child. This is
    /// the slow fallback; callers holding a live location prefer
    /// [`Node::remove_exact`] through the back-reference
    pub fn delete(&self, id: &str) {
        let children = {
            let mut inner = self.inner.write();
            match &inner.children {
                Some(children) => children.clone(),
                None => {
                    inner.objects.remove(id);
                    return;
                }
            }
        };
        for child in &children {
            child.delete(id);
        }
    }
    /// Remove exactly this location from the subtree rooted here. The pointer
    /// comparison keeps a concurrent re-save of the same id safe: we never
    /// throw away an entry that belongs to a newer object
    pub(super) fn remove_exact(&self, location: &Arc<Location>) {
        let children = {
            let mut inner = self.inner.write();
            match &inner.children {
                Some(children) => children.clone(),
                None => {
                    if let Some(existing) = inner.objects.get(location.id()) {
                        if Arc::ptr_eq(existing, location) {
                            inner.objects.remove(location.id());
                        }
                    }
                    return;
                }
            }
        };
        // the leaf this location lived in was split while we were on our way
        // here; sweep the children
        for child in &children {
            child.remove_exact(location);
        }
    }
    /// Split this node into its four quadrants, re-homing every object into
    /// the first child that accepts it. The caller holds this node's write
    /// lock (`inner`); the child locks are fresh and uncontended
    fn divide(self: &Arc<Self>, inner: &mut NodeInner) {
        let mid_lat = (self.lat1 + self.lat2) / 2.0;
        let mid_lon = (self.lon1 + self.lon2) / 2.0;
        let children = [
            // NW
            Node::new(mid_lat, self.lat2, self.lon1, mid_lon, self.capacity),
            // NE
            Node::new(mid_lat, self.lat2, mid_lon, self.lon2, self.capacity),
            // SW
            Node::new(self.lat1, mid_lat, self.lon1, mid_lon, self.capacity),
            // SE
            Node::new(self.lat1, mid_lat, mid_lon, self.lon2, self.capacity),
        ];
        for (id, location) in inner.objects.drain() {
            let (lat, lon) = location.coords();
            // a save racing this split may already have moved the point out
            // of this rectangle; its insert re-homes it once we unlock
            if let Some(child) = children.iter().find(|c| c.contains(lat, lon)) {
                let mut child_inner = child.inner.write();
                location.set_leaf(child);
                child_inner.objects.insert(id, location);
            }
        }
        inner.children = Some(children);
    }
    fn query_range_into(
        &self,
        lat1: f64,
        lat2: f64,
        lon1: f64,
        lon2: f64,
        out: &mut Vec<Arc<Location>>,
    ) {
        if !self.overlaps(lat1, lat2, lon1, lon2) {
            return;
        }
        let children = {
            let inner = self.inner.read();
            match &inner.children {
                Some(children) => children.clone(),
                None => {
                    for location in inner.objects.values() {
                        let (lat, lon) = location.coords();
                        if lat1 <= lat && lat <= lat2 && lon1 <= lon && lon <= lon2 {
                            out.push(Arc::clone(location));
                        }
                    }
                    return;
                }
            }
        };
        for child in &children {
            child.query_range_into(lat1, lat2, lon1, lon2, out);
        }
    }
    #[cfg(test)]
    pub(crate) fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.lat1, self.lat2, self.lon1, self.lon2)
    }
    #[cfg(test)]
    pub(crate) fn children(&self) -> Option<[Arc<Node>; 4]> {
        self.inner.read().children.clone()
    }
    #[cfg(test)]
    pub(crate) fn objects(&self) -> Vec<Arc<Location>> {
        self.inner.read().objects.values().cloned().collect()
    }
    #[cfg(test)]
    pub(crate) fn object_count(&self) -> usize {
        self.inner.read().objects.len()
    }
    #[cfg(test)]
    pub(crate) fn holds(&self, location: &Arc<Location>) -> bool {
        self.inner
            .read()
            .objects
            .get(location.id())
            .map(|l| Arc::ptr_eq(l, location))
            .unwrap_or(false)
    }
}

/// The tree itself: a pre-divided root over the world rectangle
#[derive(Debug)]
pub struct QuadTree {
    root: Arc<Node>,
}

impl Default for QuadTree {
    fn default() -> Self {
        Self::new()
    }
}

impl QuadTree {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_NODE_CAPACITY, PREDIVIDE_DEPTH)
    }
    /// Build a tree with explicit capacity and pre-division depth. The world
    /// rectangle is fixed
    pub(crate) fn with_settings(capacity: usize, predivide_depth: usize) -> Self {
        let root = Node::new(LAT_MIN, LAT_MAX, LON_MIN, LON_MAX, capacity);
        Self::predivide(&root, predivide_depth);
        QuadTree { root }
    }
    fn predivide(node: &Arc<Node>, depth: usize) {
        if depth == 0 {
            return;
        }
        let children = {
            let mut inner = node.inner.write();
            node.divide(&mut inner);
            inner.children.clone()
        };
        if let Some(children) = children {
            for child in &children {
                Self::predivide(child, depth - 1);
            }
        }
    }
    /// Place (or re-place) a location into the leaf covering its current
    /// coordinates.
    ///
    /// A location that is already attached to a different leaf is removed
    /// from that leaf first, so a concurrent range query sees it in at most
    /// one leaf at any instant (and possibly in neither, mid-move). The new
    /// back-reference is published while the destination leaf's write lock is
    /// held
    pub fn insert(&self, location: &Arc<Location>) -> WorldResult<()> {
        let (lat, lon) = location.coords();
        if !self.root.contains(lat, lon) {
            return Err(WorldError::OutOfBounds);
        }
        let target = Node::locate(&self.root, lat, lon);
        if let Some(prev) = location.leaf() {
            if !Arc::ptr_eq(&prev, &target) {
                prev.remove_exact(location);
                location.clear_leaf();
            }
        }
        let mut node = target;
        loop {
            let mut inner = node.inner.write();
            if inner.children.is_some() {
                // a splitter got here between our descent and taking the
                // write lock; resume the descent below this node
                drop(inner);
                node = Node::locate(&node, lat, lon);
                continue;
            }
            inner
                .objects
                .insert(location.id().to_owned(), Arc::clone(location));
            location.set_leaf(&node);
            if inner.objects.len() > node.capacity {
                node.divide(&mut inner);
            }
            return Ok(());
        }
    }
    /// Cascade-delete `id` from the whole tree. Much slower than going
    /// through a live location's back-reference; only for detached ids
    pub fn delete(&self, id: &str) {
        self.root.delete(id);
    }
    /// Every location whose current coordinates fall inside the closed query
    /// rectangle. Order is unspecified
    pub fn query_range(&self, lat1: f64, lat2: f64, lon1: f64, lon2: f64) -> Vec<Arc<Location>> {
        let mut out = Vec::new();
        self.root
            .query_range_into(lat1, lat2, lon1, lon2, &mut out);
        out
    }
    #[cfg(test)]
    pub(crate) fn root(&self) -> &Arc<Node> {
        &self.root
    }
    #[cfg(test)]
    /// Walk the whole tree asserting the structural invariants: a node is
    /// either a leaf with objects or divided with an empty map, and every
    /// object satisfies its leaf's rectangle
    pub(crate) fn assert_structure(&self) {
        fn walk(node: &Arc<Node>) {
            match node.children() {
                Some(children) => {
                    assert_eq!(
                        node.object_count(),
                        0,
                        "divided node still holds objects"
                    );
                    for child in &children {
                        walk(child);
                    }
                }
                None => {
                    for location in node.objects() {
                        let (lat, lon) = location.coords();
                        assert!(
                            node.contains(lat, lon),
                            "object ({lat}, {lon}) escaped its leaf {:?}",
                            node.bounds()
                        );
                    }
                }
            }
        }
        walk(&self.root);
    }
}
