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

//! The environment layer of the configuration. It is applied after the CLI
//! layer, so a meaningful environment value (a positive number, a non-empty
//! string) wins over the matching flag

use super::{ConfigError, ConfigurationSet};
use std::env::{self, VarError};

pub(super) fn apply_env(cfg: &mut ConfigurationSet) -> Result<(), ConfigError> {
    macro_rules! getenv {
        ($var:ident, $ty:ty) => {{
            let var = stringify!($var);
            match env::var(var) {
                Ok(v) => match v.parse::<$ty>() {
                    Ok(parsed) => Some(parsed),
                    Err(_) => return Err(ConfigError::BadEnvValue(var, v)),
                },
                Err(VarError::NotPresent) => None,
                Err(VarError::NotUnicode(..)) => {
                    return Err(ConfigError::BadEnvValue(var, "<not unicode>".to_owned()))
                }
            }
        }};
    }
    macro_rules! set_if_positive {
        ($value:expr, $field:expr) => {
            if let Some(value) = $value {
                if value > 0 {
                    $field = value;
                }
            }
        };
    }
    set_if_positive!(getenv!(READ_PORT, u16), cfg.read_port);
    set_if_positive!(getenv!(WRITE_PORT, u16), cfg.write_port);
    set_if_positive!(getenv!(HTTP_PORT, u16), cfg.http_port);
    set_if_positive!(getenv!(CLUSTER_PORT, u16), cfg.cluster_port);
    set_if_positive!(getenv!(MAX_CONNECTIONS, usize), cfg.max_connections);
    set_if_positive!(getenv!(MAX_EOF_WAIT, u64), cfg.max_eof_wait_secs);
    if let Some(value) = getenv!(CLUSTER_DNS, String) {
        if !value.is_empty() {
            cfg.cluster_dns = value;
        }
    }
    if let Some(value) = getenv!(SEED_NODE, String) {
        if !value.is_empty() {
            cfg.seed_node = value;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // process environment is global; serialise the tests that touch it
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_env_wins_over_existing_value() {
        let _guard = ENV_LOCK.lock();
        env::set_var("READ_PORT", "5005");
        let mut cfg = ConfigurationSet {
            read_port: 4000,
            ..Default::default()
        };
        apply_env(&mut cfg).unwrap();
        assert_eq!(cfg.read_port, 5005);
        env::remove_var("READ_PORT");
    }

    #[test]
    fn test_meaningless_env_value_is_ignored() {
        let _guard = ENV_LOCK.lock();
        env::set_var("WRITE_PORT", "0");
        env::set_var("SEED_NODE", "");
        let mut cfg = ConfigurationSet::default();
        apply_env(&mut cfg).unwrap();
        assert_eq!(cfg.write_port, 19999);
        assert!(cfg.seed_node.is_empty());
        env::remove_var("WRITE_PORT");
        env::remove_var("SEED_NODE");
    }

    #[test]
    fn test_unparseable_env_value_is_an_error() {
        let _guard = ENV_LOCK.lock();
        env::set_var("MAX_CONNECTIONS", "many");
        let mut cfg = ConfigurationSet::default();
        assert!(apply_env(&mut cfg).is_err());
        env::remove_var("MAX_CONNECTIONS");
    }
}
