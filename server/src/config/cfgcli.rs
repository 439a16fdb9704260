/*
 * Created on Fri Feb 23 2024
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

//! The command-line layer of the configuration

use super::{ConfigError, ConfigurationSet};
use clap::{App, Arg, ArgMatches};

/// Build the CLI definition
pub(super) fn cli<'a, 'b>() -> App<'a, 'b> {
    App::new("Loggerhead")
        .version(libloggerhead::VERSION)
        .about("An in-memory geospatial database with masterless replication")
        .arg(
            Arg::with_name("read-port")
                .long("read-port")
                .value_name("PORT")
                .takes_value(true)
                .help("Port serving GET/POLY queries. Default: 19998"),
        )
        .arg(
            Arg::with_name("write-port")
                .long("write-port")
                .value_name("PORT")
                .takes_value(true)
                .help("Port serving SAVE/DELETE queries. Default: 19999"),
        )
        .arg(
            Arg::with_name("http-port")
                .long("http-port")
                .value_name("PORT")
                .takes_value(true)
                .help("Admin/metrics HTTP port. Default: 20000"),
        )
        .arg(
            Arg::with_name("cluster-port")
                .long("cluster-port")
                .value_name("PORT")
                .takes_value(true)
                .help("Gossip cluster port (UDP and TCP). Default: 20001"),
        )
        .arg(
            Arg::with_name("max-connections")
                .long("max-connections")
                .value_name("COUNT")
                .takes_value(true)
                .help(
                    "Max concurrent connections per listener. This database is \
                     meant to be called by your backend services, not your \
                     consumers, so you shouldn't need many. Default: 20",
                ),
        )
        .arg(
            Arg::with_name("max-eof-wait")
                .long("max-eof-wait")
                .value_name("SECONDS")
                .takes_value(true)
                .help("How long an idle connection may sit before it is closed. Default: 30"),
        )
        .arg(
            Arg::with_name("cluster-dns")
                .long("cluster-dns")
                .value_name("NAME")
                .takes_value(true)
                .help("DNS name resolving to the cluster's seed nodes"),
        )
        .arg(
            Arg::with_name("seed-node")
                .long("seed-node")
                .value_name("ADDR")
                .takes_value(true)
                .help("Explicit seed node address; wins over --cluster-dns"),
        )
}

/// Fold the CLI matches into the defaults
pub(super) fn apply_matches(
    cfg: &mut ConfigurationSet,
    matches: &ArgMatches<'_>,
) -> Result<(), ConfigError> {
    macro_rules! set_parsed {
        ($key:literal, $field:expr) => {
            if let Some(value) = matches.value_of($key) {
                $field = value.parse().map_err(|_| {
                    ConfigError::BadCliValue($key, value.to_owned())
                })?;
            }
        };
    }
    set_parsed!("read-port", cfg.read_port);
    set_parsed!("write-port", cfg.write_port);
    set_parsed!("http-port", cfg.http_port);
    set_parsed!("cluster-port", cfg.cluster_port);
    set_parsed!("max-connections", cfg.max_connections);
    set_parsed!("max-eof-wait", cfg.max_eof_wait_secs);
    if let Some(value) = matches.value_of("cluster-dns") {
        cfg.cluster_dns = value.to_owned();
    }
    if let Some(value) = matches.value_of("seed-node") {
        cfg.seed_node = value.to_owned();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let matches = cli().get_matches_from(vec![
            "loggerheadd",
            "--read-port",
            "4000",
            "--seed-node",
            "10.0.0.9",
        ]);
        let mut cfg = ConfigurationSet::default();
        apply_matches(&mut cfg, &matches).unwrap();
        assert_eq!(cfg.read_port, 4000);
        assert_eq!(cfg.seed_node, "10.0.0.9");
        // untouched knobs keep their defaults
        assert_eq!(cfg.write_port, 19999);
    }

    #[test]
    fn test_bad_cli_value_is_an_error() {
        let matches =
            cli().get_matches_from(vec!["loggerheadd", "--read-port", "not-a-port"]);
        let mut cfg = ConfigurationSet::default();
        assert!(apply_matches(&mut cfg, &matches).is_err());
    }
}
