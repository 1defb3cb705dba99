//! Blocking TCP command channel.

use crate::channel::CommandChannel;
use crate::error::{ScanError, ScanResult};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Timeouts and framing for a [`TcpChannel`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Per-read timeout
    pub read_timeout: Duration,
    /// Per-write timeout
    pub write_timeout: Duration,
    /// Line terminator appended to writes and stripped from replies
    pub terminator: u8,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            terminator: b'\n',
        }
    }
}

/// A line-terminated text channel over a TCP socket.
///
/// Covers the common case of ethernet-attached instruments speaking a
/// SCPI-like protocol on a raw socket. I/O is blocking with the configured
/// timeouts; a timeout surfaces as a transport error.
pub struct TcpChannel {
    reader: BufReader<TcpStream>,
    resource: String,
    terminator: u8,
}

impl TcpChannel {
    /// Connect to `addr` (`host:port`).
    pub fn connect(addr: &str, config: &ConnectionConfig) -> ScanResult<Self> {
        let mut last_err: Option<io::Error> = None;
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| ScanError::transport("connect", e))?;

        for sock in addrs {
            match TcpStream::connect_timeout(&sock, config.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(config.read_timeout))
                        .map_err(|e| ScanError::transport("connect", e))?;
                    stream
                        .set_write_timeout(Some(config.write_timeout))
                        .map_err(|e| ScanError::transport("connect", e))?;
                    stream
                        .set_nodelay(true)
                        .map_err(|e| ScanError::transport("connect", e))?;
                    debug!(resource = %addr, "tcp channel connected");
                    return Ok(Self {
                        reader: BufReader::new(stream),
                        resource: format!("tcp://{addr}"),
                        terminator: config.terminator,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(ScanError::transport(
            "connect",
            last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
            }),
        ))
    }
}

impl CommandChannel for TcpChannel {
    fn write(&mut self, command: &str) -> ScanResult<()> {
        debug!(resource = %self.resource, command, "tcp write");
        let stream = self.reader.get_mut();
        stream
            .write_all(command.as_bytes())
            .and_then(|()| stream.write_all(&[self.terminator]))
            .map_err(|e| ScanError::transport("write", e))
    }

    fn read(&mut self) -> ScanResult<String> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(self.terminator, &mut buf)
            .map_err(|e| ScanError::transport("read", e))?;
        if n == 0 {
            return Err(ScanError::transport(
                "read",
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
            ));
        }
        if buf.last() == Some(&self.terminator) {
            buf.pop();
        }
        let reply = String::from_utf8_lossy(&buf).into_owned();
        debug!(resource = %self.resource, reply = %reply, "tcp read");
        Ok(reply)
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    // One-shot echo server: reads a line, replies with a canned response.
    fn spawn_server(reply: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 128];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        addr
    }

    #[test]
    fn query_round_trip() {
        let addr = spawn_server("5.000\n");
        let mut chan =
            TcpChannel::connect(&addr.to_string(), &ConnectionConfig::default()).unwrap();
        assert_eq!(chan.query("VOLT?").unwrap(), "5.000");
        assert!(chan.resource().starts_with("tcp://"));
    }

    #[test]
    fn closed_connection_is_a_transport_error() {
        let addr = spawn_server("");
        let mut chan =
            TcpChannel::connect(&addr.to_string(), &ConnectionConfig::default()).unwrap();
        chan.write("VOLT?").unwrap();
        assert!(matches!(chan.read(), Err(ScanError::Transport { .. })));
    }

    #[test]
    fn connect_to_closed_port_fails() {
        // Bind and drop to get a port that is very likely closed.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let config = ConnectionConfig {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        assert!(TcpChannel::connect(&addr.to_string(), &config).is_err());
    }
}
