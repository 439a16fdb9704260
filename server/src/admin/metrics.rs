/*
 * Created on Mon Feb 19 2024
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

//! Process-wide counters exported on `/metrics`. Everything is a plain
//! monotonic atomic; gauges (world size, member count) are sampled straight
//! from the owning structures at scrape time

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Counter {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
    /// Render this counter in the Prometheus text exposition format
    pub fn render(&self, out: &mut String) {
        out.push_str("# HELP ");
        out.push_str(self.name);
        out.push(' ');
        out.push_str(self.help);
        out.push_str("\n# TYPE ");
        out.push_str(self.name);
        out.push_str(" counter\n");
        out.push_str(self.name);
        out.push(' ');
        out.push_str(&self.get().to_string());
        out.push('\n');
    }
}

/// Commands received from peers and applied locally
pub static CLUSTER_COMMANDS_APPLIED: Counter = Counter::new(
    "loggerhead_cluster_commands_applied_total",
    "Cluster commands received over gossip and applied locally",
);
/// Local state shared with a joining node
pub static LOCAL_STATE_SHARED: Counter = Counter::new(
    "loggerhead_clustering_local_state_shared",
    "Local state shared with new node",
);
/// Remote state merged into the local world
pub static REMOTE_STATE_MERGED: Counter = Counter::new(
    "loggerhead_clustering_remote_state_merged",
    "Remote state merged with local state",
);
/// Gossip payloads that failed to decode and were dropped
pub static GOSSIP_DECODE_FAILURES: Counter = Counter::new(
    "loggerhead_gossip_decode_failures_total",
    "Gossip messages dropped because they failed to decode",
);
/// Write commands handed to the forwarder channel
pub static BROADCASTS_ENQUEUED: Counter = Counter::new(
    "loggerhead_broadcasts_enqueued_total",
    "Write commands enqueued for cluster broadcast",
);
/// Write commands the forwarder moved into the gossip queue. The gap between
/// this and `loggerhead_broadcasts_enqueued_total` is the window lost if the
/// process dies
pub static BROADCASTS_FORWARDED: Counter = Counter::new(
    "loggerhead_broadcasts_forwarded_total",
    "Write commands moved from the forwarder channel into the gossip queue",
);
/// Broadcast transmissions that actually left on a gossip packet
pub static BROADCASTS_SENT: Counter = Counter::new(
    "loggerhead_broadcasts_sent_total",
    "Broadcast payloads sent out on gossip packets",
);

/// Every counter, in scrape order
pub static ALL_COUNTERS: [&Counter; 7] = [
    &CLUSTER_COMMANDS_APPLIED,
    &LOCAL_STATE_SHARED,
    &REMOTE_STATE_MERGED,
    &GOSSIP_DECODE_FAILURES,
    &BROADCASTS_ENQUEUED,
    &BROADCASTS_FORWARDED,
    &BROADCASTS_SENT,
];

/// Render a gauge sampled at scrape time
pub fn render_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str("# HELP ");
    out.push_str(name);
    out.push(' ');
    out.push_str(help);
    out.push_str("\n# TYPE ");
    out.push_str(name);
    out.push_str(" gauge\n");
    out.push_str(name);
    out.push(' ');
    out.push_str(&value.to_string());
    out.push('\n');
}
