/*
 * Created on Wed Feb 21 2024
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

//! # The replicating write decorator
//!
//! Wraps the write engine so that every executed command is also queued for
//! the cluster. Memory is applied first: it is much faster than the network,
//! and a stalled gossip layer must never backpressure a client write. The
//! price is a small window where a crash loses a locally-applied mutation;
//! the peer re-pulls a snapshot when it rejoins
//!
//! The channel is unbounded on purpose: dropping the newest commands under
//! load would silently lose mutations, and the forwarder drains faster than
//! clients can realistically write

use crate::admin::metrics;
use crate::cluster::queue::{LocationBroadcast, TransmitLimitedQueue};
use crate::dbnet::Terminator;
use crate::queryengine::{QueryEngine, QueryExecutor};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The write engine plus a hand-off of every executed line to the forwarder
pub struct ReplicatingEngine {
    engine: Arc<QueryEngine>,
    commands: mpsc::UnboundedSender<String>,
}

impl ReplicatingEngine {
    pub fn new(engine: Arc<QueryEngine>, commands: mpsc::UnboundedSender<String>) -> Self {
        ReplicatingEngine { engine, commands }
    }
}

impl QueryExecutor for ReplicatingEngine {
    fn execute(&self, query: &str) -> String {
        let response = self.engine.execute(query);
        metrics::BROADCASTS_ENQUEUED.inc();
        if self.commands.send(query.to_owned()).is_err() {
            // only happens during shutdown, when the forwarder is gone
            log::trace!("Dropping broadcast, forwarder has exited");
        }
        response
    }
}

/// Drains the command channel into the gossip broadcast queue. Exits when the
/// shutdown signal fires or the last sender is dropped
pub async fn command_forwarder(
    mut commands: mpsc::UnboundedReceiver<String>,
    broadcasts: Arc<TransmitLimitedQueue>,
    mut terminator: Terminator,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => {
                        broadcasts.queue_broadcast(LocationBroadcast::new(command));
                        metrics::BROADCASTS_FORWARDED.inc();
                    }
                    None => break,
                }
            }
            _ = terminator.receive_signal() => break,
        }
    }
    log::info!("Broadcast forwarder has exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_local_apply_and_forwarding() {
        let world = Arc::new(World::new());
        let engine = Arc::new(QueryEngine::new_write(world.clone()));
        let queue = Arc::new(TransmitLimitedQueue::new(
            3,
            Arc::new(AtomicUsize::new(2)),
        ));
        let (signal, _) = broadcast::channel(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(command_forwarder(
            rx,
            queue.clone(),
            Terminator::new(signal.subscribe()),
        ));
        let replicating = ReplicatingEngine::new(engine, tx);
        // local apply happens synchronously
        assert_eq!(replicating.execute("SAVE fleet truck-1 1 2"), "1.0,saved\n");
        assert!(world.get("fleet", "truck-1").is_some());
        // the forwarder moves the line into the gossip queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.num_queued(), 1);
        let payloads = queue.get_broadcasts(0, 1024);
        assert_eq!(payloads, vec![b"SAVE fleet truck-1 1 2".to_vec()]);
        // shutdown stops the forwarder
        drop(signal);
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarder_exits_when_senders_drop() {
        let queue = Arc::new(TransmitLimitedQueue::new(
            3,
            Arc::new(AtomicUsize::new(1)),
        ));
        let (signal, _) = broadcast::channel(1);
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let forwarder = tokio::spawn(command_forwarder(
            rx,
            queue,
            Terminator::new(signal.subscribe()),
        ));
        drop(tx);
        forwarder.await.unwrap();
    }
}
