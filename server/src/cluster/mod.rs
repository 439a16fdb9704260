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

//! # The replication plane
//!
//! Every node is a member of a gossip cluster (possibly of size one). Local
//! mutations flow: write engine → forwarder channel → transmit-limited queue
//! → gossip packets; remote mutations arrive as user messages and replay
//! through the write engine. A joining node pulls a full world snapshot from
//! a seed before it starts answering

mod delegate;
mod gossip;
mod queue;
mod replicate;

pub use self::delegate::{BroadcastDelegate, Delegate};
pub use self::gossip::{Member, MemberState, NodeIdentity};
pub use self::queue::{LocationBroadcast, TransmitLimitedQueue};
pub use self::replicate::{command_forwarder, ReplicatingEngine};

use self::gossip::GossipNode;
use crate::config::ConfigurationSet;
use std::error::Error;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The retransmit multiplier for the broadcast queue (gossip rounds per
/// message scale with `mult × ⌈log10(members + 1)⌉`)
pub const RETRANSMIT_MULT: usize = 3;

#[derive(Debug)]
pub enum ClusterError {
    /// Couldn't bind the cluster sockets; fatal at startup
    FailedToCreateCluster(std::io::Error),
    /// No seed completed a state exchange; the node runs alone
    FailedToJoinCluster,
    /// The DNS seed name didn't resolve to any usable address
    FailedToExtractIpsFromDns(String),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailedToCreateCluster(e) => write!(f, "failed to create cluster: {}", e),
            Self::FailedToJoinCluster => write!(f, "failed to join cluster"),
            Self::FailedToExtractIpsFromDns(name) => {
                write!(f, "failed to extract IPs from DNS name '{}'", name)
            }
        }
    }
}

impl Error for ClusterError {}

/// A running cluster node plus its broadcast queue
pub struct Cluster {
    node: Arc<GossipNode>,
    broadcasts: Arc<TransmitLimitedQueue>,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Bind the gossip sockets and start the cluster tasks. The node is
    /// alone until [`Cluster::join`] completes
    pub async fn create(
        cfg: &ConfigurationSet,
        delegate: Arc<dyn Delegate>,
        broadcasts: Arc<TransmitLimitedQueue>,
        num_nodes: Arc<AtomicUsize>,
        signal: &broadcast::Sender<()>,
    ) -> Result<Self, ClusterError> {
        let bind: SocketAddr = ([0, 0, 0, 0], cfg.cluster_port).into();
        let advertise = SocketAddr::new(local_ip(), cfg.cluster_port);
        let identity = NodeIdentity {
            // the advertised address is unique per node, which makes it a
            // workable default name
            name: advertise.to_string(),
            addr: advertise,
        };
        let (node, sync_listener) = GossipNode::create(bind, identity, delegate, num_nodes)
            .await
            .map_err(ClusterError::FailedToCreateCluster)?;
        let tasks = node.spawn_tasks(sync_listener, signal);
        Ok(Cluster {
            node,
            broadcasts,
            tasks,
        })
    }
    /// Resolve the configured seeds and pull state from them. Returns how
    /// many seeds answered; zero seeds configured is a standalone start, not
    /// an error
    pub async fn join(&self, cfg: &ConfigurationSet) -> Result<usize, ClusterError> {
        let seeds = resolve_seeds(cfg).await?;
        if seeds.is_empty() {
            return Ok(0);
        }
        self.node
            .join(&seeds)
            .await
            .map_err(|_| ClusterError::FailedToJoinCluster)
    }
    /// Gossip a graceful exit, waiting at most `timeout` (zero means just
    /// fire the leave and go)
    pub async fn leave(&self, timeout: Duration) {
        self.node.leave().await;
        if !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }
        for task in &self.tasks {
            task.abort();
        }
    }
    pub fn broadcasts(&self) -> &Arc<TransmitLimitedQueue> {
        &self.broadcasts
    }
    pub fn local_node(&self) -> &NodeIdentity {
        self.node.local_node()
    }
    pub fn members(&self) -> Vec<Member> {
        self.node.members()
    }
    pub fn num_members(&self) -> usize {
        self.node.num_members()
    }
    pub fn health_score(&self) -> usize {
        self.node.health_score()
    }
}

/// The seed list: an explicit seed node wins over the DNS name; neither
/// configured means standalone
async fn resolve_seeds(cfg: &ConfigurationSet) -> Result<Vec<SocketAddr>, ClusterError> {
    if !cfg.seed_node.is_empty() {
        // a bare IP gets the cluster port; an explicit ip:port is taken as-is
        let seed = cfg.seed_node.as_str();
        let addr = match seed.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => match seed.parse::<IpAddr>() {
                Ok(ip) => SocketAddr::new(ip, cfg.cluster_port),
                Err(_) => {
                    return Err(ClusterError::FailedToExtractIpsFromDns(
                        cfg.seed_node.clone(),
                    ))
                }
            },
        };
        return Ok(vec![addr]);
    }
    if !cfg.cluster_dns.is_empty() {
        let addrs: Vec<SocketAddr> =
            tokio::net::lookup_host((cfg.cluster_dns.as_str(), cfg.cluster_port))
                .await
                .map_err(|_| ClusterError::FailedToExtractIpsFromDns(cfg.cluster_dns.clone()))?
                .collect();
        if addrs.is_empty() {
            return Err(ClusterError::FailedToExtractIpsFromDns(
                cfg.cluster_dns.clone(),
            ));
        }
        return Ok(addrs);
    }
    Ok(Vec::new())
}

/// The address this host is reachable on. The connected-UDP trick never
/// sends a packet; it just asks the kernel which interface would route out.
/// Falls back to loopback on airgapped hosts
fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(("10.255.255.255", 1))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or_else(|_| IpAddr::from([127, 0, 0, 1]))
}
