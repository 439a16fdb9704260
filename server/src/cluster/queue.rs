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

//! # The transmit-limited broadcast queue
//!
//! Every local mutation becomes one [`LocationBroadcast`] carrying the raw
//! command line. The queue retransmits each broadcast for a bounded number of
//! gossip rounds (`mult × ⌈log10(n + 1)⌉`, scaling with the cluster size) and
//! a newly queued broadcast for the same command replaces the queued one:
//! re-sending an identical command is pointless, the newest transmission
//! count should win

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A single queued gossip message: the raw textual command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationBroadcast {
    command: String,
}

impl LocationBroadcast {
    pub fn new(command: impl Into<String>) -> Self {
        LocationBroadcast {
            command: command.into(),
        }
    }
    /// The wire payload: the command's UTF-8 bytes, no terminator
    pub fn message(&self) -> &[u8] {
        self.command.as_bytes()
    }
    /// Does this broadcast make `old` redundant? Equal commands are
    /// equivalent, and the later one wins
    pub fn invalidates(&self, old: &LocationBroadcast) -> bool {
        self.command == old.command
    }
}

#[derive(Debug)]
struct QueuedBroadcast {
    broadcast: LocationBroadcast,
    transmits: usize,
}

/// The queue itself. `num_nodes` is shared with the membership tracker so the
/// retransmit budget follows the live cluster size
#[derive(Debug)]
pub struct TransmitLimitedQueue {
    retransmit_mult: usize,
    num_nodes: Arc<AtomicUsize>,
    queue: Mutex<Vec<QueuedBroadcast>>,
}

impl TransmitLimitedQueue {
    pub fn new(retransmit_mult: usize, num_nodes: Arc<AtomicUsize>) -> Self {
        TransmitLimitedQueue {
            retransmit_mult,
            num_nodes,
            queue: Mutex::new(Vec::new()),
        }
    }
    /// How many times a broadcast gets retransmitted before it is dropped
    fn retransmit_limit(&self) -> usize {
        let nodes = self.num_nodes.load(Ordering::Relaxed).max(1);
        let scale = ((nodes + 1) as f64).log10().ceil() as usize;
        self.retransmit_mult * scale.max(1)
    }
    /// Queue a broadcast, invalidating any queued broadcast it supersedes
    pub fn queue_broadcast(&self, broadcast: LocationBroadcast) {
        let mut queue = self.queue.lock();
        queue.retain(|queued| !broadcast.invalidates(&queued.broadcast));
        queue.push(QueuedBroadcast {
            broadcast,
            transmits: 0,
        });
    }
    /// Pull payloads for one gossip packet. `overhead` is the per-message
    /// framing cost and `limit` the total byte budget; least-transmitted
    /// broadcasts go first and anything that exhausts its retransmit budget
    /// is dropped from the queue
    pub fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let retransmit_limit = self.retransmit_limit();
        let mut queue = self.queue.lock();
        queue.sort_by_key(|queued| queued.transmits);
        let mut used = 0usize;
        let mut payloads = Vec::new();
        for queued in queue.iter_mut() {
            let cost = overhead + queued.broadcast.message().len();
            if used + cost > limit {
                continue;
            }
            used += cost;
            queued.transmits += 1;
            payloads.push(queued.broadcast.message().to_vec());
        }
        queue.retain(|queued| queued.transmits < retransmit_limit);
        payloads
    }
    /// How many broadcasts are waiting
    pub fn num_queued(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with_nodes(nodes: usize) -> TransmitLimitedQueue {
        TransmitLimitedQueue::new(3, Arc::new(AtomicUsize::new(nodes)))
    }

    #[test]
    fn test_same_command_invalidates_older() {
        let queue = queue_with_nodes(2);
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns id 1 2"));
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns id 1 2"));
        assert_eq!(queue.num_queued(), 1);
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns id 3 4"));
        assert_eq!(queue.num_queued(), 2);
    }

    #[test]
    fn test_byte_budget_is_respected() {
        let queue = queue_with_nodes(2);
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns aaaa 1 2"));
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns bbbb 1 2"));
        // room for exactly one message (16 bytes payload + 2 overhead)
        let out = queue.get_broadcasts(2, 20);
        assert_eq!(out.len(), 1);
        // both stay queued; neither has hit its retransmit budget
        assert_eq!(queue.num_queued(), 2);
    }

    #[test]
    fn test_retransmit_budget_drops_broadcasts() {
        let queue = queue_with_nodes(1);
        // one node: limit = 3 * ceil(log10(2)) = 3
        queue.queue_broadcast(LocationBroadcast::new("DELETE ns id"));
        for _ in 0..3 {
            let out = queue.get_broadcasts(0, 1024);
            assert_eq!(out.len(), 1);
        }
        assert_eq!(queue.num_queued(), 0);
        assert!(queue.get_broadcasts(0, 1024).is_empty());
    }

    #[test]
    fn test_least_transmitted_goes_first() {
        let queue = queue_with_nodes(50);
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns old 1 2"));
        let _ = queue.get_broadcasts(0, 15);
        queue.queue_broadcast(LocationBroadcast::new("SAVE ns new 1 2"));
        let out = queue.get_broadcasts(0, 15);
        assert_eq!(out[0], b"SAVE ns new 1 2".to_vec());
    }

    #[test]
    fn test_payload_is_raw_command_bytes() {
        let broadcast = LocationBroadcast::new("SAVE ns id 1 2");
        assert_eq!(broadcast.message(), b"SAVE ns id 1 2");
    }
}
