/*
 * Created on Thu Feb 29 2024
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

//! End-to-end tests: real sockets against live listeners, and two-node
//! clusters replicating over real gossip

use crate::cluster::{
    command_forwarder, BroadcastDelegate, Cluster, ReplicatingEngine, TransmitLimitedQueue,
    RETRANSMIT_MULT,
};
use crate::config::ConfigurationSet;
use crate::dbnet::{BaseListener, Listener, Terminator};
use crate::queryengine::{QueryEngine, QueryExecutor};
use crate::world::World;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time;

/// Ask the kernel for a free port. There is a tiny window for another
/// process to grab it back, which is fine for tests
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind probe");
    listener.local_addr().expect("probe addr").port()
}

/// Spawn one role listener on an ephemeral port and return its address
async fn spawn_listener(
    engine: Arc<dyn QueryExecutor>,
    max_eof_wait: Duration,
    signal: &broadcast::Sender<()>,
) -> SocketAddr {
    let base = BaseListener::init(engine, 0, 10, max_eof_wait, signal.clone())
        .await
        .expect("bind listener");
    let addr = base.listener.local_addr().expect("listener addr");
    let mut listener = Listener::new(base);
    tokio::spawn(async move {
        let _ = listener.run().await;
    });
    addr
}

/// A read listener and a write listener over a fresh world
async fn spawn_server() -> (SocketAddr, SocketAddr, Arc<World>, broadcast::Sender<()>) {
    let (signal, _) = broadcast::channel(1);
    let world = Arc::new(World::new());
    let read_engine: Arc<dyn QueryExecutor> =
        Arc::new(QueryEngine::new_read(Arc::clone(&world)));
    let write_engine: Arc<dyn QueryExecutor> =
        Arc::new(QueryEngine::new_write(Arc::clone(&world)));
    let read_addr = spawn_listener(read_engine, Duration::from_secs(30), &signal).await;
    let write_addr = spawn_listener(write_engine, Duration::from_secs(30), &signal).await;
    (read_addr, write_addr, world, signal)
}

/// Every response ends in one of these; reading stops as soon as one shows up
fn response_complete(buf: &[u8]) -> bool {
    for terminator in [&b"saved\n"[..], b"deleted\n", b"done\n", b"\"\n"] {
        if buf.ends_with(terminator) {
            return true;
        }
    }
    false
}

async fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !response_complete(&buf) {
        match time::timeout(Duration::from_secs(2), stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            _ => break,
        }
    }
    String::from_utf8(buf).expect("utf8 response")
}

async fn send(stream: &mut TcpStream, line: &str) -> String {
    stream.write_all(line.as_bytes()).await.expect("write");
    stream.write_all(b"\n").await.expect("write newline");
    read_response(stream).await
}

async fn query_once(addr: SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    send(&mut stream, line).await
}

mod listeners {
    use super::*;

    #[tokio::test]
    async fn test_save_then_get() {
        let (read_addr, write_addr, _world, _signal) = spawn_server().await;
        assert_eq!(query_once(write_addr, "SAVE ns id 1 2").await, "1.0,saved\n");
        assert_eq!(
            query_once(read_addr, "GET ns id").await,
            "1.0,ns,id,1.000000,2.000000\n1.0,done\n"
        );
    }

    #[tokio::test]
    async fn test_resave_moves_the_point() {
        let (read_addr, write_addr, world, _signal) = spawn_server().await;
        query_once(write_addr, "SAVE ns id 1 2").await;
        assert_eq!(query_once(write_addr, "SAVE ns id 3 4").await, "1.0,saved\n");
        assert_eq!(
            query_once(read_addr, "GET ns id").await,
            "1.0,ns,id,3.000000,4.000000\n1.0,done\n"
        );
        assert_eq!(world.location_count(), 1);
    }

    #[tokio::test]
    async fn test_poly_returns_both_points() {
        let (read_addr, write_addr, _world, _signal) = spawn_server().await;
        query_once(write_addr, "SAVE ns a 1 1").await;
        query_once(write_addr, "SAVE ns b 1.5 2").await;
        let response = query_once(read_addr, "POLY ns 0 0 2 2").await;
        assert!(response.contains("1.0,ns,a,1.000000,1.000000\n"));
        assert!(response.contains("1.0,ns,b,1.500000,2.000000\n"));
        assert!(response.ends_with("1.0,done\n"));
        assert_eq!(response.matches("1.0,").count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_latitude_leaves_connection_usable() {
        let (read_addr, write_addr, _world, _signal) = spawn_server().await;
        let mut stream = TcpStream::connect(write_addr).await.expect("connect");
        assert_eq!(
            send(&mut stream, "SAVE ns x 200 0").await,
            "1.0,\"invalid latitude\"\n"
        );
        // exactly one response line, and the connection still works
        assert_eq!(send(&mut stream, "SAVE ns y 5 5").await, "1.0,saved\n");
        assert_eq!(query_once(read_addr, "GET ns x").await, "1.0,done\n");
    }

    #[tokio::test]
    async fn test_role_split_on_the_wire() {
        let (read_addr, write_addr, _world, _signal) = spawn_server().await;
        assert_eq!(
            query_once(read_addr, "SAVE ns id 1 2").await,
            "1.0,\"invalid query\"\n"
        );
        assert_eq!(
            query_once(write_addr, "GET ns id").await,
            "1.0,\"invalid query\"\n"
        );
    }

    #[tokio::test]
    async fn test_empty_line_closes_connection() {
        let (_, write_addr, _world, _signal) = spawn_server().await;
        let mut stream = TcpStream::connect(write_addr).await.expect("connect");
        stream.write_all(b"\n").await.expect("write");
        let mut buf = [0u8; 16];
        let n = time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server should close, not dawdle")
            .expect("clean close");
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let (signal, _) = broadcast::channel(1);
        let world = Arc::new(World::new());
        let engine: Arc<dyn QueryExecutor> =
            Arc::new(QueryEngine::new_write(Arc::clone(&world)));
        let addr = spawn_listener(engine, Duration::from_millis(300), &signal).await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        // say nothing; the server should hang up after the EOF-wait window
        let mut buf = [0u8; 16];
        let n = time::timeout(Duration::from_secs(3), stream.read(&mut buf))
            .await
            .expect("server should close the idle connection")
            .expect("clean close");
        assert_eq!(n, 0);
    }
}

mod cluster {
    use super::*;

    struct TestNode {
        world: Arc<World>,
        cluster: Arc<Cluster>,
        write: Arc<ReplicatingEngine>,
        _signal: broadcast::Sender<()>,
    }

    async fn start_node(cluster_port: u16, seed: &str) -> TestNode {
        let cfg = ConfigurationSet {
            cluster_port,
            seed_node: seed.to_owned(),
            ..Default::default()
        };
        let (signal, _) = broadcast::channel(1);
        let world = Arc::new(World::new());
        let write_engine = Arc::new(QueryEngine::new_write(Arc::clone(&world)));
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
            Cluster::create(&cfg, delegate, Arc::clone(&broadcasts), num_nodes, &signal)
                .await
                .expect("cluster sockets"),
        );
        cluster.join(&cfg).await.expect("join");
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(command_forwarder(
            rx,
            Arc::clone(&broadcasts),
            Terminator::new(signal.subscribe()),
        ));
        let write = Arc::new(ReplicatingEngine::new(write_engine, tx));
        TestNode {
            world,
            cluster,
            write,
            _signal: signal,
        }
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, check: F) {
        let started = time::Instant::now();
        while !check() {
            assert!(
                started.elapsed() < deadline,
                "timed out waiting for {what}"
            );
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test]
    async fn test_write_gossips_to_peer() {
        let port_a = free_port();
        let port_b = free_port();
        let node_a = start_node(port_a, "").await;
        let node_b = start_node(port_b, &format!("127.0.0.1:{port_a}")).await;
        // the join taught both sides about each other
        wait_for("membership to settle", Duration::from_secs(3), || {
            node_a.cluster.num_members() == 2 && node_b.cluster.num_members() == 2
        })
        .await;
        assert_eq!(node_a.write.execute("SAVE ns id 1 2"), "1.0,saved\n");
        wait_for("the save to reach the peer", Duration::from_secs(5), || {
            node_b.world.get("ns", "id").is_some()
        })
        .await;
        let loc = node_b.world.get("ns", "id").expect("replicated");
        assert_eq!((loc.lat, loc.lon), (1.0, 2.0));
    }

    #[tokio::test]
    async fn test_delete_gossips_to_peer() {
        let port_a = free_port();
        let port_b = free_port();
        let node_a = start_node(port_a, "").await;
        let node_b = start_node(port_b, &format!("127.0.0.1:{port_a}")).await;
        node_a.write.execute("SAVE ns id 1 2");
        wait_for("the save to reach the peer", Duration::from_secs(5), || {
            node_b.world.get("ns", "id").is_some()
        })
        .await;
        node_a.write.execute("DELETE ns id");
        wait_for("the delete to reach the peer", Duration::from_secs(5), || {
            node_b.world.get("ns", "id").is_none()
        })
        .await;
    }

    #[tokio::test]
    async fn test_joiner_bootstraps_from_snapshot() {
        let port_a = free_port();
        let port_b = free_port();
        let node_a = start_node(port_a, "").await;
        for i in 0..10 {
            assert_eq!(
                node_a
                    .write
                    .execute(&format!("SAVE fleet truck-{i} {} {}", i, -i)),
                "1.0,saved\n"
            );
        }
        // join pulls the snapshot synchronously: everything must be visible
        // the moment start_node returns
        let node_b = start_node(port_b, &format!("127.0.0.1:{port_a}")).await;
        for i in 0..10 {
            let id = format!("truck-{i}");
            let loc = node_b.world.get("fleet", &id).expect("bootstrapped");
            assert_eq!((loc.lat, loc.lon), (i as f64, -(i as f64)));
        }
        assert_eq!(node_b.world.location_count(), 10);
    }
}

mod concurrency {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_random_ops_converge_with_invariants_intact() {
        let world = Arc::new(World::new());
        let threads = 8;
        let ops_per_thread = 400;
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let world = Arc::clone(&world);
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for i in 0..ops_per_thread {
                        let ns = if rng.gen_bool(0.5) { "alpha" } else { "beta" };
                        let id = format!("id-{}", rng.gen_range(0..24));
                        match rng.gen_range(0..10) {
                            0 | 1 => world.delete(ns, &id),
                            2 => {
                                let _ = world.query_range(ns, -90.0, 90.0, -180.0, 180.0);
                            }
                            _ => {
                                let lat = rng.gen_range(-90.0..=90.0);
                                let lon = rng.gen_range(-180.0..=180.0);
                                world
                                    .save(ns, &id, lat, lon)
                                    .unwrap_or_else(|e| panic!("save {t}/{i} failed: {e}"));
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }
        // quiescent state: tree shape, rectangle containment and map/tree
        // agreement must all hold, and reads must agree with range queries
        world.assert_invariants();
        for ns in ["alpha", "beta"] {
            let everything = world.query_range(ns, -90.0, 90.0, -180.0, 180.0);
            for loc in &everything {
                let direct = world.get(ns, &loc.id).expect("in tree but not in map");
                assert_eq!((direct.lat, direct.lon), (loc.lat, loc.lon));
            }
        }
    }

    #[test]
    fn test_same_id_hammering_stays_consistent() {
        let world = Arc::new(World::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let world = Arc::clone(&world);
                std::thread::spawn(move || {
                    for i in 0..500i64 {
                        let seq = w as i64 * 500 + i;
                        let lat = (seq % 180 - 90) as f64;
                        let lon = (seq % 360 - 180) as f64;
                        world.save("contended", "the-one", lat, lon).expect("save");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }
        world.assert_invariants();
        assert_eq!(world.location_count(), 1);
        // the point is in exactly one leaf and queries find it there
        let found = world.query_range("contended", -90.0, 90.0, -180.0, 180.0);
        assert_eq!(found.len(), 1);
        let direct = world.get("contended", "the-one").expect("present");
        assert_eq!((direct.lat, direct.lon), (found[0].lat, found[0].lon));
    }
}
