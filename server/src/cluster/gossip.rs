/*
 * Created on Thu Feb 22 2024
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

//! # The gossip transport
//!
//! A compact SWIM-style membership and dissemination layer. Two planes share
//! the cluster port:
//!
//! - **UDP**: a periodic gossip tick fans a heartbeat (plus as many queued
//!   broadcasts as fit the packet) out to a random sample of members.
//!   Heartbeats double as the failure detector: a member we haven't heard
//!   from goes suspect, then gets removed. Heartbeats piggyback a member
//!   sample so the mesh closes transitively.
//! - **TCP**: push/pull state sync. A joining node exchanges full state with
//!   a seed through the delegate's `local_state`/`merge_remote_state` hooks;
//!   running members serve the same exchange to joiners.
//!
//! The transport knows nothing about the database: everything application
//! level goes through the [`Delegate`] hooks

use crate::admin::metrics;
use crate::cluster::delegate::Delegate;
use crate::dbnet::Terminator;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

/// How often a node gossips
const GOSSIP_INTERVAL: Duration = Duration::from_millis(200);
/// How many members each gossip round targets
const GOSSIP_FANOUT: usize = 3;
/// How many member identities a heartbeat piggybacks
const HEARTBEAT_MEMBER_SAMPLE: usize = 8;
/// Silence after which a member is marked suspect
const SUSPECT_AFTER: Duration = Duration::from_secs(2);
/// Silence after which a member is removed
const REMOVE_AFTER: Duration = Duration::from_secs(6);
/// Byte budget for one gossip packet
const UDP_PACKET_BUDGET: usize = 1400;
/// Estimated framing cost per message inside a packet
const MESSAGE_OVERHEAD: usize = 16;
/// Byte budget for the node metadata attached to heartbeats
const NODE_META_LIMIT: usize = 512;
/// Connect/handshake budget for a push/pull exchange
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on a push/pull payload; anything bigger is rejected
const MAX_SYNC_PAYLOAD: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Who a node is: its unique name and the address its cluster port answers on
pub struct NodeIdentity {
    pub name: String,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Alive,
    Suspect,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Suspect => write!(f, "suspect"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub identity: NodeIdentity,
    pub state: MemberState,
    last_seen: Instant,
}

#[derive(Debug, Serialize, Deserialize)]
enum GossipMessage {
    /// Liveness plus a sample of who the sender knows
    Heartbeat {
        node: NodeIdentity,
        members: Vec<NodeIdentity>,
        /// application metadata; nothing reads it today but the slot is part
        /// of the wire format
        meta: Vec<u8>,
    },
    /// An application broadcast: one raw command line
    User { payload: Vec<u8> },
    /// Graceful exit
    Leave { name: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    messages: Vec<GossipMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PushPull {
    node: NodeIdentity,
    join: bool,
    members: Vec<NodeIdentity>,
    state: Vec<u8>,
}

/// One gossiping node. Shared as `Arc<GossipNode>` between its tasks
pub struct GossipNode {
    identity: NodeIdentity,
    delegate: Arc<dyn Delegate>,
    udp: UdpSocket,
    members: RwLock<HashMap<String, Member>>,
    /// live cluster size (members + self), shared with the broadcast queue
    num_nodes: Arc<AtomicUsize>,
}

impl GossipNode {
    /// Bind the gossip sockets. Returns the node and the TCP listener the
    /// caller passes back into [`GossipNode::spawn_tasks`]
    pub async fn create(
        bind: SocketAddr,
        identity: NodeIdentity,
        delegate: Arc<dyn Delegate>,
        num_nodes: Arc<AtomicUsize>,
    ) -> IoResult<(Arc<Self>, TcpListener)> {
        let udp = UdpSocket::bind(bind).await?;
        let sync_listener = TcpListener::bind(bind).await?;
        num_nodes.store(1, Ordering::Relaxed);
        let node = Arc::new(GossipNode {
            identity,
            delegate,
            udp,
            members: RwLock::new(HashMap::new()),
            num_nodes,
        });
        Ok((node, sync_listener))
    }
    /// Start the receive, gossip and sync tasks
    pub fn spawn_tasks(
        self: &Arc<Self>,
        sync_listener: TcpListener,
        signal: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).run_recv_loop(Terminator::new(signal.subscribe()))),
            tokio::spawn(Arc::clone(self).run_gossip_loop(Terminator::new(signal.subscribe()))),
            tokio::spawn(
                Arc::clone(self).run_sync_listener(sync_listener, Terminator::new(signal.subscribe())),
            ),
        ]
    }
    pub fn local_node(&self) -> &NodeIdentity {
        &self.identity
    }
    pub fn members(&self) -> Vec<Member> {
        self.members.read().values().cloned().collect()
    }
    /// Members plus self
    pub fn num_members(&self) -> usize {
        self.members.read().len() + 1
    }
    /// 0 is healthy; anything else counts currently-suspect members
    pub fn health_score(&self) -> usize {
        self.members
            .read()
            .values()
            .filter(|m| m.state == MemberState::Suspect)
            .count()
    }

    // membership bookkeeping

    /// We heard from this node directly: refresh its liveness
    fn observe_direct(&self, identity: NodeIdentity) {
        if identity.name == self.identity.name {
            return;
        }
        let mut members = self.members.write();
        let known = members.contains_key(&identity.name);
        members.insert(
            identity.name.clone(),
            Member {
                identity: identity.clone(),
                state: MemberState::Alive,
                last_seen: Instant::now(),
            },
        );
        self.store_num_nodes(members.len());
        drop(members);
        if !known {
            log::info!("Node {} joined the cluster", identity.name);
        }
    }
    /// Somebody else vouched for this node: remember it, but don't refresh
    /// liveness we haven't witnessed
    fn observe_indirect(&self, identity: NodeIdentity) {
        if identity.name == self.identity.name {
            return;
        }
        let mut members = self.members.write();
        if members.contains_key(&identity.name) {
            return;
        }
        log::info!("Discovered node {} through gossip", identity.name);
        members.insert(
            identity.name.clone(),
            Member {
                identity,
                state: MemberState::Alive,
                last_seen: Instant::now(),
            },
        );
        self.store_num_nodes(members.len());
    }
    fn remove_member(&self, name: &str) {
        let mut members = self.members.write();
        if members.remove(name).is_some() {
            log::info!("Node {} left the cluster", name);
        }
        self.store_num_nodes(members.len());
    }
    fn store_num_nodes(&self, members: usize) {
        self.num_nodes.store(members + 1, Ordering::Relaxed);
    }
    /// Suspect the quiet, drop the dead
    fn sweep_members(&self) {
        let mut members = self.members.write();
        members.retain(|name, member| {
            if member.last_seen.elapsed() > REMOVE_AFTER {
                log::warn!("Node {} stopped gossiping; removing it", name);
                false
            } else {
                true
            }
        });
        for member in members.values_mut() {
            member.state = if member.last_seen.elapsed() > SUSPECT_AFTER {
                MemberState::Suspect
            } else {
                MemberState::Alive
            };
        }
        self.store_num_nodes(members.len());
    }
    fn member_identities(&self) -> Vec<NodeIdentity> {
        self.members
            .read()
            .values()
            .map(|m| m.identity.clone())
            .collect()
    }
    fn sample_peers(&self, count: usize) -> Vec<NodeIdentity> {
        let mut identities = self.member_identities();
        identities.shuffle(&mut rand::thread_rng());
        identities.truncate(count);
        identities
    }

    // the UDP plane

    async fn run_recv_loop(self: Arc<Self>, mut terminator: Terminator) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                received = self.udp.recv_from(&mut buf) => {
                    match received {
                        Ok((len, _)) => self.handle_packet(&buf[..len]),
                        Err(e) => log::warn!("Gossip receive failed: {}", e),
                    }
                }
                _ = terminator.receive_signal() => break,
            }
        }
        log::info!("Gossip receiver has exited");
    }
    fn handle_packet(&self, buf: &[u8]) {
        let frame: Frame = match bincode::deserialize(buf) {
            Ok(frame) => frame,
            Err(_) => {
                // a node running an incompatible version must not crash us
                metrics::GOSSIP_DECODE_FAILURES.inc();
                log::debug!("Dropping undecodable gossip packet");
                return;
            }
        };
        for message in frame.messages {
            match message {
                GossipMessage::Heartbeat { node, members, .. } => {
                    self.observe_direct(node);
                    for identity in members {
                        self.observe_indirect(identity);
                    }
                }
                GossipMessage::User { payload } => self.delegate.notify_msg(&payload),
                GossipMessage::Leave { name } => self.remove_member(&name),
            }
        }
    }
    async fn run_gossip_loop(self: Arc<Self>, mut terminator: Terminator) {
        let mut interval = time::interval(GOSSIP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => self.gossip_round().await,
                _ = terminator.receive_signal() => break,
            }
        }
        log::info!("Gossip sender has exited");
    }
    async fn gossip_round(&self) {
        self.sweep_members();
        let peers = self.sample_peers(GOSSIP_FANOUT);
        if peers.is_empty() {
            return;
        }
        let mut member_sample = self.member_identities();
        member_sample.shuffle(&mut rand::thread_rng());
        member_sample.truncate(HEARTBEAT_MEMBER_SAMPLE);
        let heartbeat = GossipMessage::Heartbeat {
            node: self.identity.clone(),
            members: member_sample,
            meta: self.delegate.node_meta(NODE_META_LIMIT),
        };
        let heartbeat_cost = bincode::serialized_size(&heartbeat)
            .map(|s| s as usize)
            .unwrap_or(UDP_PACKET_BUDGET);
        let budget = UDP_PACKET_BUDGET.saturating_sub(heartbeat_cost + MESSAGE_OVERHEAD);
        let mut messages = vec![heartbeat];
        for payload in self.delegate.get_broadcasts(MESSAGE_OVERHEAD, budget) {
            metrics::BROADCASTS_SENT.inc();
            messages.push(GossipMessage::User { payload });
        }
        let frame = Frame { messages };
        let bytes = match bincode::serialize(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to encode gossip frame: {}", e);
                return;
            }
        };
        for peer in peers {
            if let Err(e) = self.udp.send_to(&bytes, peer.addr).await {
                log::debug!("Gossip send to {} failed: {}", peer.addr, e);
            }
        }
    }
    /// Tell everyone we're going away. Best effort: a missed leave just means
    /// the peers time us out instead
    pub async fn leave(&self) {
        let frame = Frame {
            messages: vec![GossipMessage::Leave {
                name: self.identity.name.clone(),
            }],
        };
        let bytes = match bincode::serialize(&frame) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        let peers = self.member_identities();
        for peer in &peers {
            let _ = self.udp.send_to(&bytes, peer.addr).await;
        }
        log::info!("Sent graceful leave to {} members", peers.len());
    }

    // the TCP push/pull plane

    /// Try a full state exchange with every seed. Succeeds if at least one
    /// exchange completed
    pub async fn join(&self, seeds: &[SocketAddr]) -> IoResult<usize> {
        let mut attempted = 0;
        let mut joined = 0;
        for seed in seeds {
            if *seed == self.identity.addr {
                continue;
            }
            attempted += 1;
            match self.push_pull(*seed, true).await {
                Ok(()) => joined += 1,
                Err(e) => log::warn!("State sync with seed {} failed: {}", seed, e),
            }
        }
        if attempted > 0 && joined == 0 {
            return Err(IoError::new(
                ErrorKind::NotConnected,
                "no seed completed a state exchange",
            ));
        }
        Ok(joined)
    }
    async fn push_pull(&self, addr: SocketAddr, join: bool) -> IoResult<()> {
        let mut stream = time::timeout(SYNC_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| IoError::new(ErrorKind::TimedOut, "connect timed out"))??;
        let request = PushPull {
            node: self.identity.clone(),
            join,
            members: self.member_identities(),
            state: self.delegate.local_state(join),
        };
        write_sync_frame(&mut stream, &request).await?;
        let reply: PushPull = time::timeout(SYNC_TIMEOUT, read_sync_frame(&mut stream))
            .await
            .map_err(|_| IoError::new(ErrorKind::TimedOut, "state exchange timed out"))??;
        self.absorb_push_pull(reply);
        Ok(())
    }
    async fn run_sync_listener(
        self: Arc<Self>,
        listener: TcpListener,
        mut terminator: Terminator,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let node = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = node.serve_sync(stream).await {
                                    log::warn!("State sync with a joiner failed: {}", e);
                                }
                            });
                        }
                        Err(e) => log::warn!("Cluster sync accept failed: {}", e),
                    }
                }
                _ = terminator.receive_signal() => break,
            }
        }
        log::info!("Cluster sync listener has exited");
    }
    async fn serve_sync(&self, mut stream: TcpStream) -> IoResult<()> {
        let request: PushPull = time::timeout(SYNC_TIMEOUT, read_sync_frame(&mut stream))
            .await
            .map_err(|_| IoError::new(ErrorKind::TimedOut, "state exchange timed out"))??;
        let reply = PushPull {
            node: self.identity.clone(),
            join: request.join,
            members: self.member_identities(),
            state: self.delegate.local_state(request.join),
        };
        write_sync_frame(&mut stream, &reply).await?;
        self.absorb_push_pull(request);
        Ok(())
    }
    /// Fold the other side of a push/pull into our view: the peer itself, the
    /// members it vouches for, and its state
    fn absorb_push_pull(&self, remote: PushPull) {
        self.observe_direct(remote.node.clone());
        for identity in remote.members {
            self.observe_indirect(identity);
        }
        self.delegate.merge_remote_state(&remote.state, remote.join);
    }
}

async fn write_sync_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> IoResult<()> {
    let payload =
        bincode::serialize(value).map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(&payload).await?;
    stream.flush().await
}

async fn read_sync_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> IoResult<T> {
    let len = stream.read_u32().await? as usize;
    if len > MAX_SYNC_PAYLOAD {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            "oversized state exchange payload",
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}
