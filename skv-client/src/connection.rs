//! # Store Connections
//!
//! Purpose: Define the driver seam the pool is built on and provide the TCP
//! implementation used in production.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The pool only sees `Connector`/`Connection`, so
//!    tests can inject connections that fail at a chosen step.
//! 2. **Write Batching**: `send` only encodes into a buffer; `flush` performs
//!    the write, so pipelines and transactions cost one round trip.
//! 3. **Buffer Reuse**: Each connection keeps its own line and write buffers.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// One physical connection to a store or monitor node.
pub trait Connection: Send {
    /// Encodes one command into the outgoing buffer without writing it.
    fn send(&mut self, args: &[&[u8]]) -> ClientResult<()>;

    /// Writes every buffered command.
    fn flush(&mut self) -> ClientResult<()>;

    /// Reads the next reply.
    fn read_reply(&mut self) -> ClientResult<RespValue>;

    /// Performs one request/response round trip.
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.send(args)?;
        self.flush()?;
        self.read_reply()
    }
}

/// Opens connections for the pool and for monitor queries.
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Conn: Connection + 'static;

    /// Connects to `addr` (`host:port`), bounding connect and IO by `timeout`.
    fn connect(&self, addr: &str, timeout: Option<Duration>) -> ClientResult<Self::Conn>;
}

/// Connector producing plain TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Conn = TcpConnection;

    fn connect(&self, addr: &str, timeout: Option<Duration>) -> ClientResult<TcpConnection> {
        TcpConnection::connect(addr, timeout)
    }
}

/// Single TCP connection with reusable buffers.
pub struct TcpConnection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl TcpConnection {
    /// Connects and applies the timeout to connect, read and write.
    pub fn connect(addr: &str, timeout: Option<Duration>) -> ClientResult<Self> {
        let stream = connect_stream(addr, timeout)?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(TcpConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        encode_command(args, &mut self.write_buf);
        Ok(())
    }

    fn flush(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        let written = stream.write_all(&self.write_buf).and_then(|()| stream.flush());
        self.write_buf.clear();
        written?;
        Ok(())
    }

    fn read_reply(&mut self) -> ClientResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(addr: &str, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(addr.to_string()))?
        .collect();
    if candidates.is_empty() {
        return Err(ClientError::InvalidAddress(addr.to_string()));
    }

    let mut last_err = None;
    for candidate in candidates {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err
        .map(ClientError::Io)
        .unwrap_or_else(|| ClientError::InvalidAddress(addr.to_string())))
}
