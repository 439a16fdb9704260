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

//! Turns a raw query line into a [`Command`]. Arguments are single-space
//! separated; arity is checked per command, so a line that doesn't match any
//! known shape is simply an unknown command

use crate::protocol::errors;

/// A parsed query line, borrowing from the input
#[derive(Debug, PartialEq)]
pub enum Command<'a> {
    Save {
        ns: &'a str,
        id: &'a str,
        lat: f64,
        lon: f64,
    },
    Delete {
        ns: &'a str,
        id: &'a str,
    },
    Get {
        ns: &'a str,
        id: &'a str,
    },
    Poly {
        ns: &'a str,
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
    },
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// Not a known command shape; the listener answers `invalid query`
    UnknownCommand,
    /// A coordinate failed to parse; carries the wire error string
    BadFloat(&'static str),
}

pub fn parse(line: &str) -> Result<Command<'_>, ParseError> {
    let chunks: Vec<&str> = line.split(' ').collect();
    match (chunks[0], chunks.len()) {
        ("SAVE", 5) => Ok(Command::Save {
            ns: chunks[1],
            id: chunks[2],
            lat: parse_lat(chunks[3])?,
            lon: parse_lon(chunks[4])?,
        }),
        ("DELETE", 3) => Ok(Command::Delete {
            ns: chunks[1],
            id: chunks[2],
        }),
        ("GET", 3) => Ok(Command::Get {
            ns: chunks[1],
            id: chunks[2],
        }),
        ("POLY", 6) => Ok(Command::Poly {
            ns: chunks[1],
            lat1: parse_lat(chunks[2])?,
            lon1: parse_lon(chunks[3])?,
            lat2: parse_lat(chunks[4])?,
            lon2: parse_lon(chunks[5])?,
        }),
        _ => Err(ParseError::UnknownCommand),
    }
}

fn parse_lat(token: &str) -> Result<f64, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::BadFloat(errors::BAD_LAT_FLOAT))
}

fn parse_lon(token: &str) -> Result<f64, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::BadFloat(errors::BAD_LON_FLOAT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_save() {
        assert_eq!(
            parse("SAVE fleet truck-1 1.5 -2.25"),
            Ok(Command::Save {
                ns: "fleet",
                id: "truck-1",
                lat: 1.5,
                lon: -2.25
            })
        );
    }

    #[test]
    fn test_parse_delete_and_get() {
        assert_eq!(
            parse("DELETE fleet truck-1"),
            Ok(Command::Delete {
                ns: "fleet",
                id: "truck-1"
            })
        );
        assert_eq!(
            parse("GET fleet truck-1"),
            Ok(Command::Get {
                ns: "fleet",
                id: "truck-1"
            })
        );
    }

    #[test]
    fn test_parse_poly() {
        assert_eq!(
            parse("POLY fleet 0 0 2 2"),
            Ok(Command::Poly {
                ns: "fleet",
                lat1: 0.0,
                lon1: 0.0,
                lat2: 2.0,
                lon2: 2.0
            })
        );
    }

    #[test]
    fn test_wrong_arity_is_unknown() {
        assert_eq!(
            parse("SAVE fleet truck-1 1.5"),
            Err(ParseError::UnknownCommand)
        );
        assert_eq!(parse("GET fleet"), Err(ParseError::UnknownCommand));
        assert_eq!(parse("FROB a b"), Err(ParseError::UnknownCommand));
        // double spaces produce empty tokens and break the arity
        assert_eq!(
            parse("SAVE fleet  truck-1 1 2"),
            Err(ParseError::UnknownCommand)
        );
    }

    #[test]
    fn test_bad_floats_carry_wire_strings() {
        assert_eq!(
            parse("SAVE fleet truck-1 north 2"),
            Err(ParseError::BadFloat(errors::BAD_LAT_FLOAT))
        );
        assert_eq!(
            parse("SAVE fleet truck-1 1 east"),
            Err(ParseError::BadFloat(errors::BAD_LON_FLOAT))
        );
        assert_eq!(
            parse("POLY fleet 0 x 2 2"),
            Err(ParseError::BadFloat(errors::BAD_LON_FLOAT))
        );
    }
}
