/*
 * Created on Tue Feb 27 2024
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

//! # Loggerhead
//!
//! `loggerheadd` is the Loggerhead database server: an in-memory geospatial
//! store speaking a line-oriented text protocol on two TCP ports (one for
//! reads, one for writes), replicating every mutation to its gossip peers
//! and bootstrapping joiners with full-state snapshots. See the modules for
//! their respective documentation

use env_logger::Builder;
use libloggerhead::util::terminal;
use std::env;
use std::process;

mod admin;
mod arbiter;
mod cluster;
mod config;
mod dbnet;
mod protocol;
mod queryengine;
mod util;
mod world;
#[cfg(test)]
mod tests;

/// The exit code on startup or shutdown failure
const EXIT_FAILURE: i32 = 0x100;

fn main() {
    Builder::new()
        .parse_filters(&env::var("LH_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();
    let cfg = match config::get_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Startup failure: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("server")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Startup failure: failed to build the runtime: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };
    if let Err(e) = runtime.block_on(arbiter::run(cfg)) {
        log::error!("Startup failure: {}", e);
        process::exit(EXIT_FAILURE);
    }
    drop(runtime);
    let _ = terminal::write_info("Goodbye :)\n");
}
