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

//! # The Query Engine
//!
//! A query engine executes one text command against the world and returns
//! the response string. Engines come in two roles: the read engine serves the
//! read listener (`GET`, `POLY`), the write engine serves the write listener
//! and the cluster delegate (`SAVE`, `DELETE`). A command outside the
//! engine's role is an invalid query, exactly like an unknown one

mod actions;
mod parser;

use crate::protocol::{self, responses};
use crate::world::World;
use parser::{Command, ParseError};
use std::sync::Arc;

/// Anything that can execute a query line. The write decorator wraps the
/// concrete engine through this trait
pub trait QueryExecutor: Send + Sync {
    /// Execute one command line (no terminator) and return the full response
    fn execute(&self, query: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Read,
    Write,
}

/// The concrete engine: a role plus a world handle
pub struct QueryEngine {
    world: Arc<World>,
    role: Role,
}

impl QueryEngine {
    /// An engine accepting only `GET` and `POLY`
    pub fn new_read(world: Arc<World>) -> Self {
        QueryEngine {
            world,
            role: Role::Read,
        }
    }
    /// An engine accepting only `SAVE` and `DELETE`
    pub fn new_write(world: Arc<World>) -> Self {
        QueryEngine {
            world,
            role: Role::Write,
        }
    }
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }
}

impl QueryExecutor for QueryEngine {
    fn execute(&self, query: &str) -> String {
        let command = match parser::parse(query) {
            Ok(command) => command,
            Err(ParseError::BadFloat(message)) => return protocol::error_line(message),
            Err(ParseError::UnknownCommand) => return responses::INVALID_QUERY.to_owned(),
        };
        match (self.role, command) {
            (Role::Write, Command::Save { ns, id, lat, lon }) => {
                actions::save(&self.world, ns, id, lat, lon)
            }
            (Role::Write, Command::Delete { ns, id }) => actions::del(&self.world, ns, id),
            (Role::Read, Command::Get { ns, id }) => actions::get(&self.world, ns, id),
            (
                Role::Read,
                Command::Poly {
                    ns,
                    lat1,
                    lon1,
                    lat2,
                    lon2,
                },
            ) => actions::poly(&self.world, ns, lat1, lon1, lat2, lon2),
            // right command, wrong listener
            _ => responses::INVALID_QUERY.to_owned(),
        }
    }
}
