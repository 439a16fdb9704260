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

//! # The ops surface
//!
//! A small HTTP server for operators and scrapers: `/metrics` speaks the
//! Prometheus text format, `/admin-data` returns one JSON document describing
//! this node. Failing to start it is logged but never takes the database down

pub mod metrics;

use crate::cluster::Cluster;
use crate::dbnet::Terminator;
use crate::world::World;
use chrono::{DateTime, Utc};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct OpsServer {
    world: Arc<World>,
    cluster: Arc<Cluster>,
    port: u16,
    started_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AdminData {
    name: String,
    address: String,
    state: String,
    nodes_alive: usize,
    health: usize,
    queue_count: usize,
    locations: usize,
    namespaces: usize,
    uptime_secs: i64,
    members: Vec<MemberData>,
}

#[derive(Serialize)]
struct MemberData {
    name: String,
    address: String,
    state: String,
}

impl OpsServer {
    pub fn new(world: Arc<World>, cluster: Arc<Cluster>, port: u16) -> Arc<Self> {
        Arc::new(OpsServer {
            world,
            cluster,
            port,
            started_at: Utc::now(),
        })
    }
    /// Serve until shutdown. Bind failures are logged and swallowed: a node
    /// without its ops port still serves queries
    pub async fn start(self: Arc<Self>, mut terminator: Terminator) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let ops = Arc::clone(&self);
        let make_svc = make_service_fn(move |_| {
            let ops = Arc::clone(&ops);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let ops = Arc::clone(&ops);
                    async move { Ok::<_, Infallible>(ops.route(&req)) }
                }))
            }
        });
        let builder = match Server::try_bind(&addr) {
            Ok(builder) => builder,
            Err(e) => {
                log::error!("Failed to start the admin server: {}", e);
                return;
            }
        };
        let server = builder
            .serve(make_svc)
            .with_graceful_shutdown(async move { terminator.receive_signal().await });
        log::info!("Admin server listening on port {}", self.port);
        if let Err(e) = server.await {
            log::error!("Admin server failed: {}", e);
        }
    }
    fn route(&self, req: &Request<Body>) -> Response<Body> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/metrics") => Response::builder()
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Body::from(self.render_metrics()))
                .unwrap_or_default(),
            (&Method::GET, "/admin-data") => match serde_json::to_vec(&self.admin_data()) {
                Ok(body) => Response::builder()
                    .header("Content-Type", "application/json")
                    .body(Body::from(body))
                    .unwrap_or_default(),
                Err(e) => {
                    log::error!("Failed to serialise admin data: {}", e);
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            },
            _ => status_response(StatusCode::NOT_FOUND),
        }
    }
    fn render_metrics(&self) -> String {
        let mut out = String::new();
        for counter in metrics::ALL_COUNTERS {
            counter.render(&mut out);
        }
        metrics::render_gauge(
            &mut out,
            "loggerhead_world_locations",
            "Locations currently in the world",
            self.world.location_count() as u64,
        );
        metrics::render_gauge(
            &mut out,
            "loggerhead_world_namespaces",
            "Namespaces currently in the world",
            self.world.namespace_count() as u64,
        );
        metrics::render_gauge(
            &mut out,
            "loggerhead_cluster_members",
            "Cluster members including this node",
            self.cluster.num_members() as u64,
        );
        metrics::render_gauge(
            &mut out,
            "loggerhead_broadcast_queue_depth",
            "Broadcasts waiting for gossip rounds",
            self.cluster.broadcasts().num_queued() as u64,
        );
        out
    }
    fn admin_data(&self) -> AdminData {
        let local = self.cluster.local_node();
        AdminData {
            name: local.name.clone(),
            address: local.addr.to_string(),
            state: "alive".to_owned(),
            nodes_alive: self.cluster.num_members(),
            health: self.cluster.health_score(),
            queue_count: self.cluster.broadcasts().num_queued(),
            locations: self.world.location_count(),
            namespaces: self.world.namespace_count(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            members: self
                .cluster
                .members()
                .into_iter()
                .map(|member| MemberData {
                    name: member.identity.name,
                    address: member.identity.addr.to_string(),
                    state: member.state.to_string(),
                })
                .collect(),
        }
    }
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
