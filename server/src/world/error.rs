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

use std::error::Error;
use std::fmt;

/// The result type returned by the spatial core
pub type WorldResult<T> = Result<T, WorldError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Validation errors produced by the spatial core. These are user-caused and
/// never mutate state; the query engine turns them into protocol lines
pub enum WorldError {
    /// The location id was empty
    RequiredId,
    /// The namespace name was empty
    RequiredNamespace,
    /// The latitude was outside [-90, 90]
    InvalidLatitude,
    /// The longitude was outside [-180, 180]
    InvalidLongitude,
    /// The point fell outside the tree's bounding box
    OutOfBounds,
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredId => write!(f, "location id is required"),
            Self::RequiredNamespace => write!(f, "namespace is required"),
            Self::InvalidLatitude => write!(f, "invalid latitude"),
            Self::InvalidLongitude => write!(f, "invalid longitude"),
            Self::OutOfBounds => write!(f, "insertion failed because location is out of bounds"),
        }
    }
}

impl Error for WorldError {}
