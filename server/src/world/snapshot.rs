/*
 * Created on Mon Feb 12 2024
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

//! # World snapshots
//!
//! The cluster bootstraps joining nodes with a full copy of the world. The
//! wire form is a flat sequence of `(ns, id, lat, lon)` records behind a
//! format version tag; no tree structure travels, every receiver rebuilds its
//! own. Replaying `save` for each record reconstructs the world exactly

use crate::world::error::WorldError;
use crate::world::World;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Bump this if the record layout ever changes; decoders reject foreign tags
const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u8,
    records: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    ns: String,
    id: String,
    lat: f64,
    lon: f64,
}

#[derive(Debug)]
pub enum SnapshotError {
    /// The payload didn't decode as a snapshot at all
    Decode(String),
    /// The payload decoded but carries a format tag we don't speak
    Version(u8),
    /// A record failed to replay; the snapshot content is bad
    Replay(WorldError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "snapshot failed to decode: {}", e),
            Self::Version(v) => write!(f, "snapshot has unsupported version {}", v),
            Self::Replay(e) => write!(f, "snapshot replay failed: {}", e),
        }
    }
}

impl Error for SnapshotError {}

/// Serialise every location currently present in the world
pub(super) fn encode(world: &World) -> Result<Vec<u8>, SnapshotError> {
    let records = world
        .all_locations()
        .into_iter()
        .map(|loc| SnapshotRecord {
            ns: loc.ns,
            id: loc.id,
            lat: loc.lat,
            lon: loc.lon,
        })
        .collect();
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        records,
    };
    bincode::serialize(&snapshot).map_err(|e| SnapshotError::Decode(e.to_string()))
}

/// Rebuild a fresh world from an encoded snapshot by replaying `save` for
/// every record
pub(super) fn decode(buf: &[u8]) -> Result<World, SnapshotError> {
    let snapshot: Snapshot =
        bincode::deserialize(buf).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version(snapshot.version));
    }
    let world = World::new();
    for record in snapshot.records {
        world
            .save(&record.ns, &record.id, record.lat, record.lon)
            .map_err(SnapshotError::Replay)?;
    }
    Ok(world)
}
