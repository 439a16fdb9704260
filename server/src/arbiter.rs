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

//! Wires the node together and babysits it until a termination signal:
//! world, engines, cluster, write decorator, admin surface and the two
//! client listeners

use crate::admin::OpsServer;
use crate::cluster::{
    command_forwarder, BroadcastDelegate, Cluster, ReplicatingEngine, TransmitLimitedQueue,
    RETRANSMIT_MULT,
};
use crate::config::ConfigurationSet;
use crate::dbnet::{self, Terminator};
use crate::queryengine::QueryEngine;
use crate::util::error::LhResult;
use crate::world::World;
use libloggerhead::util::terminal;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

#[cfg(unix)]
use core::{future::Future, pin::Pin, task::Context, task::Poll};
#[cfg(unix)]
use tokio::signal::unix::{signal as fnsignal, Signal, SignalKind};

#[cfg(unix)]
/// Object to bind to unix-specific signals
pub struct UnixTerminationSignal {
    sigterm: Signal,
}

#[cfg(unix)]
impl UnixTerminationSignal {
    pub fn init() -> LhResult<Self> {
        let sigterm = fnsignal(SignalKind::terminate())
            .map_err(|e| crate::util::error::Error::ioerror_extra(e, "binding to SIGTERM"))?;
        Ok(Self { sigterm })
    }
}

#[cfg(unix)]
impl Future for UnixTerminationSignal {
    type Output = Option<()>;

    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        self.sigterm.poll_recv(ctx)
    }
}

/// Start the node, wait for a termination signal, then take everything down
/// in order: listeners drain, forwarder stops, the cluster gets a goodbye
pub async fn run(cfg: ConfigurationSet) -> LhResult<()> {
    let boot_started = Instant::now();
    let (signal, _) = broadcast::channel(1);

    let world = Arc::new(World::new());
    let read_engine = Arc::new(QueryEngine::new_read(Arc::clone(&world)));
    let write_engine = Arc::new(QueryEngine::new_write(Arc::clone(&world)));

    // the replication plane
    let num_nodes = Arc::new(AtomicUsize::new(1));
    let broadcasts = Arc::new(TransmitLimitedQueue::new(
        RETRANSMIT_MULT,
        Arc::clone(&num_nodes),
    ));
    let delegate = Arc::new(BroadcastDelegate::new(
        Arc::clone(&write_engine),
        Arc::clone(&broadcasts),
    ));
    let cluster = Arc::new(
        Cluster::create(&cfg, delegate, Arc::clone(&broadcasts), num_nodes, &signal).await?,
    );
    match cluster.join(&cfg).await {
        Ok(0) => log::info!("No seeds configured; running standalone"),
        Ok(n) => log::info!("Joined the cluster through {} seed(s)", n),
        // a failed join is not fatal: we serve alone and keep accepting
        // joiners
        Err(e) => log::warn!("{}; continuing standalone", e),
    }

    // writes are applied locally first, then forwarded to the cluster
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(command_forwarder(
        command_rx,
        Arc::clone(&broadcasts),
        Terminator::new(signal.subscribe()),
    ));
    let replicating_engine = Arc::new(ReplicatingEngine::new(
        Arc::clone(&write_engine),
        command_tx,
    ));

    let ops = OpsServer::new(Arc::clone(&world), Arc::clone(&cluster), cfg.http_port);
    let ops_handle = tokio::spawn(ops.start(Terminator::new(signal.subscribe())));

    let mut server = dbnet::connect(&cfg, read_engine, replicating_engine, signal.clone()).await?;

    log::info!("Startup took {:?}", boot_started.elapsed());
    print_welcome(&cfg, &cluster);

    let ctrlc = tokio::signal::ctrl_c();
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = server.run_server() => {}
            _ = ctrlc => {}
        }
    }
    #[cfg(unix)]
    {
        let sigterm = UnixTerminationSignal::init()?;
        tokio::select! {
            _ = server.run_server() => {}
            _ = ctrlc => {}
            _ = sigterm => {}
        }
    }

    log::info!("Signalling all workers to shut down");
    // drop the signal and let every task exit
    drop(signal);
    server.finish_with_termsig().await;
    let _ = forwarder.await;
    let _ = ops_handle.await;
    cluster.leave(Duration::ZERO).await;
    Ok(())
}

fn print_welcome(cfg: &ConfigurationSet, cluster: &Cluster) {
    let banner = format!(
        "===========================================================\n\
         Loggerhead v{} | {}\n\
         ===========================================================\n\
         Read Port:       {}\n\
         Write Port:      {}\n\
         HTTP Port:       {}\n\
         Cluster Port:    {}\n\
         Max Connections: {}\n\
         Max EOF Wait:    {}s\n\
         Cluster DNS:     {}\n\
         Seed Node:       {}\n\
         Node Name:       {}\n\
         My IP:           {}\n\
         ===========================================================\n",
        libloggerhead::VERSION,
        libloggerhead::URL,
        cfg.read_port,
        cfg.write_port,
        cfg.http_port,
        cfg.cluster_port,
        cfg.max_connections,
        cfg.max_eof_wait_secs,
        if cfg.cluster_dns.is_empty() { "-" } else { &cfg.cluster_dns },
        if cfg.seed_node.is_empty() { "-" } else { &cfg.seed_node },
        cluster.local_node().name,
        cluster.local_node().addr.ip(),
    );
    let _ = terminal::write_info(banner);
}
