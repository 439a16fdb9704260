/*
 * Created on Thu Feb 15 2024
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

use crate::dbnet::Terminator;
use crate::queryengine::QueryExecutor;
use bytes::BytesMut;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time;

/// A buffered client connection accumulating `\n`-terminated lines
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(libloggerhead::BUF_CAP),
        }
    }
    /// Read one complete line off the stream. `None` means the peer went
    /// away (EOF); a trailing `\r` is stripped; non-UTF-8 input is an error
    pub async fn read_line(&mut self) -> IoResult<Option<String>> {
        loop {
            if let Some(position) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line = self.buffer.split_to(position + 1);
                // drop the newline (and a CR if the client sent CRLF)
                line.truncate(position);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return String::from_utf8(line.to_vec())
                    .map(Some)
                    .map_err(|_| IoError::new(ErrorKind::InvalidData, "query is not valid UTF-8"));
            }
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                // EOF; whatever is left in the buffer never got terminated
                self.buffer.clear();
                return Ok(None);
            }
        }
    }
    /// Write a full response and flush it out
    pub async fn write_response(&mut self, response: &str) -> IoResult<()> {
        self.stream.write_all(response.as_bytes()).await?;
        self.stream.flush().await
    }
}

/// Runs one client connection: read a line, execute it on the role engine,
/// write the response, repeat. The handler exits on EOF, on an empty line,
/// on the idle timeout and on shutdown
pub struct ConnectionHandler {
    engine: Arc<dyn QueryExecutor>,
    con: Connection,
    climit: Arc<Semaphore>,
    max_eof_wait: Duration,
    terminator: Terminator,
}

impl ConnectionHandler {
    pub fn new(
        engine: Arc<dyn QueryExecutor>,
        con: Connection,
        climit: Arc<Semaphore>,
        max_eof_wait: Duration,
        terminator: Terminator,
    ) -> Self {
        ConnectionHandler {
            engine,
            con,
            climit,
            max_eof_wait,
            terminator,
        }
    }
    pub async fn run(&mut self) -> IoResult<()> {
        loop {
            let line = tokio::select! {
                read = time::timeout(self.max_eof_wait, self.con.read_line()) => {
                    match read {
                        // no complete line within the EOF-wait window
                        Err(_) => {
                            log::info!("Connection idled out; closing");
                            return Ok(());
                        }
                        Ok(line) => line?,
                    }
                }
                _ = self.terminator.receive_signal() => return Ok(()),
            };
            let line = match line {
                Some(line) => line,
                None => return Ok(()),
            };
            if line.is_empty() {
                // an empty line closes the connection
                return Ok(());
            }
            let response = self.engine.execute(&line);
            self.con.write_response(&response).await?;
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // Make sure that the permit is returned to the semaphore even if the
        // task panicked
        self.climit.add_permits(1);
    }
}
