/*
 * Created on Thu Feb 15 2024
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

//! # The client networking plane
//!
//! Two line-oriented TCP listeners front the database: the read listener
//! (`GET`/`POLY`) and the write listener (`SAVE`/`DELETE`). Each accepted
//! connection runs on its own task and holds a permit from the listener's
//! semaphore, so the per-listener connection cap backpressures the accept
//! loop instead of the clients

mod connection;
mod listener;

pub use self::connection::{Connection, ConnectionHandler};
pub use self::listener::{connect, BaseListener, Listener, ServerListeners};

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

/// The hard ceiling on the per-listener connection cap
pub const MAXIMUM_CONNECTION_LIMIT: usize = 50000;

/// A single-use cancellation token fed from the shutdown broadcast channel
#[derive(Debug)]
pub struct Terminator {
    terminate: bool,
    signal: broadcast::Receiver<()>,
}

impl Terminator {
    pub fn new(signal: broadcast::Receiver<()>) -> Self {
        Terminator {
            terminate: false,
            signal,
        }
    }
    /// Wait for the termination signal (returns immediately once received)
    pub async fn receive_signal(&mut self) {
        if !self.terminate {
            let _ = self.signal.recv().await;
            self.terminate = true;
        }
    }
}

/// A backoff implementation that is meant to be used in accept loops
pub(self) struct NetBackoff {
    c: AtomicU8,
}

impl NetBackoff {
    /// The maximum backoff duration in seconds
    const MAX_BACKOFF: u8 = 64;
    pub const fn new() -> Self {
        Self {
            c: AtomicU8::new(1),
        }
    }
    /// Wait for the current backoff duration
    pub async fn spin(&self) {
        let c = self.c.load(Ordering::Relaxed);
        time::sleep(Duration::from_secs(c as _)).await;
        self.c.store(c << 1, Ordering::Relaxed);
    }
    /// Have we backed off far enough to give up?
    pub fn should_disconnect(&self) -> bool {
        self.c.load(Ordering::Relaxed) > Self::MAX_BACKOFF
    }
}
