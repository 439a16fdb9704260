/*
 * Created on Tue Feb 13 2024
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

//! # The response grammar
//!
//! Every response line starts with the protocol version. Success markers are
//! bare words, error messages travel double-quoted, and multi-line responses
//! (`GET` hits, `POLY` results) are closed by a `done` line

use crate::world::LocationSnapshot;

/// The protocol version stamped onto every response line
pub const PROTOCOL_VERSION: &str = "1.0";

pub mod responses {
    //! Canned response lines, ready to go onto the wire
    /// Response of a successful `SAVE`
    pub const SAVED: &str = "1.0,saved\n";
    /// Response of a `DELETE`
    pub const DELETED: &str = "1.0,deleted\n";
    /// Terminator of a `GET`/`POLY` response
    pub const DONE: &str = "1.0,done\n";
    /// Anything the current listener doesn't understand or accept
    pub const INVALID_QUERY: &str = "1.0,\"invalid query\"\n";
}

pub mod errors {
    //! Wire error strings (the quoting happens in [`super::error_line`])
    pub const BAD_LAT_FLOAT: &str = "Invalid float64 value for latitude";
    pub const BAD_LON_FLOAT: &str = "Invalid float64 value for longitude";
}

/// Quote an error message into a response line
pub fn error_line(message: &str) -> String {
    format!("{},\"{}\"\n", PROTOCOL_VERSION, message)
}

/// Render a location hit: `1.0,<ns>,<id>,<lat>,<lon>` with six-decimal floats
pub fn location_line(location: &LocationSnapshot) -> String {
    format!("{},{}\n", PROTOCOL_VERSION, location)
}
