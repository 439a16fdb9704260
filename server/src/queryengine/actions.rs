/*
 * Created on Wed Feb 14 2024
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

//! One function per action. Each takes the world and the parsed arguments
//! and returns the full response, terminators included

use crate::protocol::{self, responses};
use crate::world::World;

/// Run a `SAVE`: either `saved` or the quoted validation error
pub fn save(world: &World, ns: &str, id: &str, lat: f64, lon: f64) -> String {
    match world.save(ns, id, lat, lon) {
        Ok(()) => responses::SAVED.to_owned(),
        Err(e) => protocol::error_line(&e.to_string()),
    }
}

/// Run a `DELETE`. Always `deleted`: removing an absent id is not an error
pub fn del(world: &World, ns: &str, id: &str) -> String {
    world.delete(ns, id);
    responses::DELETED.to_owned()
}

/// Run a `GET`: the location line on a hit, then `done` either way
pub fn get(world: &World, ns: &str, id: &str) -> String {
    match world.get(ns, id) {
        Some(location) => {
            let mut response = protocol::location_line(&location);
            response.push_str(responses::DONE);
            response
        }
        None => responses::DONE.to_owned(),
    }
}

/// Run a `POLY`: zero or more location lines followed by `done`
pub fn poly(
    world: &World,
    ns: &str,
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> String {
    let mut response = String::new();
    for location in world.query_range(ns, lat1, lat2, lon1, lon2) {
        response.push_str(&protocol::location_line(&location));
    }
    response.push_str(responses::DONE);
    response
}
