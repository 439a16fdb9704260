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

//! # Configuration
//!
//! Three layers, later wins: built-in defaults, then command-line flags,
//! then environment variables (when set to something meaningful: a positive
//! number or a non-empty string). A value that is present but unparseable in
//! either layer is a startup error, not a silent default

mod cfgcli;
mod cfgenv;

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// The resolved configuration the rest of the server consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSet {
    /// port serving `GET`/`POLY`
    pub read_port: u16,
    /// port serving `SAVE`/`DELETE`
    pub write_port: u16,
    /// admin/metrics HTTP port
    pub http_port: u16,
    /// gossip port (UDP + TCP)
    pub cluster_port: u16,
    /// concurrent connection cap, per listener
    pub max_connections: usize,
    /// seconds an idle connection may sit without a complete line
    pub max_eof_wait_secs: u64,
    /// DNS name resolving to seed nodes ("" = unset)
    pub cluster_dns: String,
    /// explicit seed node address ("" = unset); wins over `cluster_dns`
    pub seed_node: String,
}

impl Default for ConfigurationSet {
    fn default() -> Self {
        ConfigurationSet {
            read_port: 19998,
            write_port: 19999,
            http_port: 20000,
            cluster_port: 20001,
            max_connections: 20,
            max_eof_wait_secs: 30,
            cluster_dns: String::new(),
            seed_node: String::new(),
        }
    }
}

impl ConfigurationSet {
    pub fn max_eof_wait(&self) -> Duration {
        Duration::from_secs(self.max_eof_wait_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    BadCliValue(&'static str, String),
    BadEnvValue(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadCliValue(flag, value) => {
                write!(f, "bad value '{}' for --{}", value, flag)
            }
            Self::BadEnvValue(var, value) => {
                write!(f, "bad value '{}' for environment variable {}", value, var)
            }
        }
    }
}

impl Error for ConfigError {}

/// Resolve the full configuration from the process arguments and environment
pub fn get_config() -> Result<ConfigurationSet, ConfigError> {
    let matches = cfgcli::cli().get_matches();
    let mut cfg = ConfigurationSet::default();
    cfgcli::apply_matches(&mut cfg, &matches)?;
    cfgenv::apply_env(&mut cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ConfigurationSet::default();
        assert_eq!(cfg.read_port, 19998);
        assert_eq!(cfg.write_port, 19999);
        assert_eq!(cfg.http_port, 20000);
        assert_eq!(cfg.cluster_port, 20001);
        assert_eq!(cfg.max_connections, 20);
        assert_eq!(cfg.max_eof_wait(), Duration::from_secs(30));
        assert!(cfg.cluster_dns.is_empty());
        assert!(cfg.seed_node.is_empty());
    }
}
