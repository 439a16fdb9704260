/*
 * Created on Mon Feb 26 2024
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

use crate::cluster::ClusterError;
use std::fmt;
use std::io::Error as IoError;

pub type LhResult<T> = Result<T, Error>;

#[derive(Debug)]
/// Startup and runtime plumbing errors; everything here is fatal to the
/// process unless the caller says otherwise
pub enum Error {
    Io(IoError),
    IoExtra(IoError, String),
    Cluster(ClusterError),
}

impl Error {
    pub fn ioerror_extra(e: IoError, extra: impl ToString) -> Self {
        Self::IoExtra(e, extra.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::IoExtra(e, extra) => write!(f, "I/O error while {extra}: {e}"),
            Self::Cluster(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

impl From<ClusterError> for Error {
    fn from(e: ClusterError) -> Self {
        Self::Cluster(e)
    }
}
