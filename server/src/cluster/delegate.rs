/*
 * Created on Tue Feb 20 2024
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

//! # The broadcast delegate
//!
//! The gossip transport is application-agnostic; these five hooks are how it
//! reaches the database. User messages are raw command lines fed to the
//! write engine, state sync payloads are world snapshots

use crate::admin::metrics;
use crate::cluster::queue::TransmitLimitedQueue;
use crate::queryengine::{QueryEngine, QueryExecutor};
use crate::world::World;
use std::sync::Arc;

/// The process exit code used when a join snapshot turns out to be corrupt
const EXIT_CORRUPT_SNAPSHOT: i32 = 0x100;

/// The hooks the gossip transport invokes to deliver application data
pub trait Delegate: Send + Sync + 'static {
    /// Metadata to attach to this node's membership entry, at most `limit`
    /// bytes. May be empty
    fn node_meta(&self, limit: usize) -> Vec<u8>;
    /// One user-level gossip message arrived
    fn notify_msg(&self, buf: &[u8]);
    /// Hand the transport up to `limit` bytes of queued broadcasts,
    /// accounting `overhead` bytes of framing per message
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>>;
    /// The full local state for a push/pull exchange. Only join exchanges
    /// carry state
    fn local_state(&self, join: bool) -> Vec<u8>;
    /// Merge a remote node's state into ours. Only join exchanges do
    fn merge_remote_state(&self, buf: &[u8], join: bool);
}

/// The database-side implementation: commands go to the write engine,
/// state sync goes through world snapshots
pub struct BroadcastDelegate {
    engine: Arc<QueryEngine>,
    broadcasts: Arc<TransmitLimitedQueue>,
}

impl BroadcastDelegate {
    /// `engine` must be the undecorated write engine: commands a peer sends
    /// us were already broadcast by that peer and must not be re-broadcast
    pub fn new(engine: Arc<QueryEngine>, broadcasts: Arc<TransmitLimitedQueue>) -> Self {
        BroadcastDelegate { engine, broadcasts }
    }
    fn world(&self) -> &Arc<World> {
        self.engine.world()
    }
}

impl Delegate for BroadcastDelegate {
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        Vec::new()
    }
    fn notify_msg(&self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        let command = match std::str::from_utf8(buf) {
            Ok(command) => command,
            Err(_) => {
                // a peer speaking something else entirely must not crash us
                metrics::GOSSIP_DECODE_FAILURES.inc();
                log::warn!("Dropping non-UTF-8 cluster command");
                return;
            }
        };
        let _ = self.engine.execute(command);
        metrics::CLUSTER_COMMANDS_APPLIED.inc();
        log::debug!("Received cluster command: {}", command);
    }
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        self.broadcasts.get_broadcasts(overhead, limit)
    }
    fn local_state(&self, join: bool) -> Vec<u8> {
        metrics::LOCAL_STATE_SHARED.inc();
        if join {
            log::info!("Sharing local state with a joining node");
            return self.world().to_bytes();
        }
        Vec::new()
    }
    fn merge_remote_state(&self, buf: &[u8], join: bool) {
        metrics::REMOTE_STATE_MERGED.inc();
        if !join || buf.is_empty() {
            return;
        }
        log::info!("Bootstrapping from remote state");
        let remote = match World::from_bytes(buf) {
            Ok(world) => world,
            Err(e) => {
                log::error!("Join snapshot is corrupt, cannot continue: {}", e);
                std::process::exit(EXIT_CORRUPT_SNAPSHOT);
            }
        };
        if let Err(e) = self.world().merge(&remote) {
            log::error!("Join snapshot failed to replay, cannot continue: {}", e);
            std::process::exit(EXIT_CORRUPT_SNAPSHOT);
        }
    }
}
