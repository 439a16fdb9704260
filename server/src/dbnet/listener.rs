/*
 * Created on Fri Feb 16 2024
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

use crate::config::ConfigurationSet;
use crate::dbnet::{
    Connection, ConnectionHandler, NetBackoff, Terminator, MAXIMUM_CONNECTION_LIMIT,
};
use crate::queryengine::QueryExecutor;
use crate::util::error::{Error, LhResult};
use std::io::Result as IoResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};

/// The shared plumbing of one listener: the bound socket, the connection-cap
/// semaphore and the shutdown channels
pub struct BaseListener {
    /// the engine this listener's connections execute against
    pub engine: Arc<dyn QueryExecutor>,
    /// the incoming connection listener (binding)
    pub listener: TcpListener,
    /// the maximum number of concurrent connections
    pub climit: Arc<Semaphore>,
    /// how long a connection may sit without producing a complete line
    pub max_eof_wait: Duration,
    /// the shutdown broadcaster
    pub signal: broadcast::Sender<()>,
    // When all `Sender`s are dropped - the `Receiver` gets a `None` value
    // We send a clone of `terminate_tx` to each handler
    pub terminate_tx: mpsc::Sender<()>,
    pub terminate_rx: mpsc::Receiver<()>,
}

impl BaseListener {
    pub async fn init(
        engine: Arc<dyn QueryExecutor>,
        port: u16,
        maxcon: usize,
        max_eof_wait: Duration,
        signal: broadcast::Sender<()>,
    ) -> LhResult<Self> {
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| Error::ioerror_extra(e, format!("binding to port {port}")))?;
        Ok(Self {
            engine,
            listener,
            climit: Arc::new(Semaphore::new(maxcon.min(MAXIMUM_CONNECTION_LIMIT))),
            max_eof_wait,
            signal,
            terminate_tx,
            terminate_rx,
        })
    }
    /// Wait for every handler task spawned off this listener to finish
    pub async fn release_self(self) {
        let Self {
            mut terminate_rx,
            terminate_tx,
            signal,
            ..
        } = self;
        drop(signal);
        drop(terminate_tx);
        let _ = terminate_rx.recv().await;
    }
}

/// One accept loop over a [`BaseListener`]
pub struct Listener {
    pub base: BaseListener,
}

impl Listener {
    pub fn new(base: BaseListener) -> Self {
        Self { base }
    }
    /// Accept an incoming connection, backing off on transient accept errors
    async fn accept(&mut self) -> IoResult<TcpStream> {
        let backoff = NetBackoff::new();
        loop {
            match self.base.listener.accept().await {
                // We don't need the bindaddr
                Ok((stream, _)) => return Ok(stream),
                Err(e) => {
                    if backoff.should_disconnect() {
                        // Too many retries, give up on this listener
                        return Err(e);
                    }
                }
            }
            // spin to wait for the backoff duration
            backoff.spin().await;
        }
    }
    /// Run the accept loop until shutdown
    pub async fn run(&mut self) -> IoResult<()> {
        loop {
            // Take the permit first, but we won't use it right now, so
            // forget it: the handler gives it back on drop
            if let Ok(permit) = self.base.climit.acquire().await {
                permit.forget();
            }
            /*
             Ignore any errors that may arise in the accept loop: applying
             the try operator here would bring down the whole listener over
             one bad connection, and logging every transient error would
             flood the log
            */
            let stream = match self.accept().await {
                Ok(stream) => stream,
                Err(_) => continue,
            };
            let mut handler = ConnectionHandler::new(
                Arc::clone(&self.base.engine),
                Connection::new(stream),
                Arc::clone(&self.base.climit),
                self.base.max_eof_wait,
                Terminator::new(self.base.signal.subscribe()),
            );
            let terminate_tx = self.base.terminate_tx.clone();
            tokio::spawn(async move {
                // the handler owns a clone of the terminate sender for as
                // long as it runs; dropping it signals release_self
                let _term_sig_tx = terminate_tx;
                if let Err(e) = handler.run().await {
                    log::error!("Error handling connection: {}", e);
                }
            });
        }
    }
}

/// Both role listeners, run and torn down together
pub struct ServerListeners {
    pub read: Listener,
    pub write: Listener,
}

impl ServerListeners {
    /// Run both accept loops; returns when either one dies
    pub async fn run_server(&mut self) -> IoResult<()> {
        let (read_result, write_result) =
            tokio::join!(self.read.run(), self.write.run());
        if let Err(e) = &read_result {
            log::error!("Read listener failed with: {}", e);
        }
        if let Err(e) = &write_result {
            log::error!("Write listener failed with: {}", e);
        }
        read_result.and(write_result)
    }
    /// Signal the listeners to shut down and only return after every
    /// connection task has finished
    pub async fn finish_with_termsig(self) {
        self.read.base.release_self().await;
        self.write.base.release_self().await;
    }
}

/// Bind the read and write listeners per the configuration
pub async fn connect(
    cfg: &ConfigurationSet,
    read_engine: Arc<dyn QueryExecutor>,
    write_engine: Arc<dyn QueryExecutor>,
    signal: broadcast::Sender<()>,
) -> LhResult<ServerListeners> {
    let read = Listener::new(
        BaseListener::init(
            read_engine,
            cfg.read_port,
            cfg.max_connections,
            cfg.max_eof_wait(),
            signal.clone(),
        )
        .await?,
    );
    let write = Listener::new(
        BaseListener::init(
            write_engine,
            cfg.write_port,
            cfg.max_connections,
            cfg.max_eof_wait(),
            signal,
        )
        .await?,
    );
    log::info!(
        "Server started: reads on port {}, writes on port {}",
        cfg.read_port,
        cfg.write_port
    );
    Ok(ServerListeners { read, write })
}
