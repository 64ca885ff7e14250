use crate::errors::*;
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVersion};
use std::io::{BufRead, BufReader, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// I/O timeout used when a session is opened without an explicit one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

enum TCPStreamType {
    Plain(BufReader<TcpStream>),
    SSL(BufReader<SslStream<TcpStream>>),
    Closed,
}

/// A TCP connection to a mail server, optionally wrapped in TLS.
///
/// Reads are buffered; a STARTTLS upgrade swaps the plain stream for a TLS
/// stream over the same socket.
pub struct Connection {
    host: String,
    stream: TCPStreamType,
}

impl Connection {
    pub fn connect(host: &str, port: u16, use_tls: bool, timeout: Option<Duration>) -> Result<Connection> {
        trace!("Resolving {}:{}", host, port);
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::from(ErrorKind::DnsFailure(host.to_string())))?
            .collect();
        if addrs.is_empty() {
            bail!(ErrorKind::DnsFailure(host.to_string()));
        }

        let tcp_stream = open_socket(&addrs, timeout)
            .ok_or_else(|| Error::from(ErrorKind::ConnectFailure(host.to_string(), port)))?;
        tcp_stream.set_read_timeout(timeout)?;
        tcp_stream.set_write_timeout(timeout)?;

        let stream = if use_tls {
            debug!("Creating a TLS Connection to {}:{}", host, port);
            TCPStreamType::SSL(BufReader::new(tls_handshake(host, tcp_stream)?))
        } else {
            debug!("Creating a Plain TCP Connection to {}:{}", host, port);
            TCPStreamType::Plain(BufReader::new(tcp_stream))
        };
        trace!("Connection Established");

        Ok(Connection {
            host: host.to_string(),
            stream: stream,
        })
    }

    pub fn uses_tls(&self) -> bool {
        match self.stream {
            TCPStreamType::SSL(_) => true,
            _ => false,
        }
    }

    pub fn is_open(&self) -> bool {
        match self.stream {
            TCPStreamType::Closed => false,
            _ => true,
        }
    }

    /// Layer TLS onto the open plaintext socket.
    pub fn starttls(&mut self) -> Result<()> {
        match mem::replace(&mut self.stream, TCPStreamType::Closed) {
            TCPStreamType::Plain(reader) => {
                if !reader.buffer().is_empty() {
                    let _ = reader.get_ref().shutdown(Shutdown::Both);
                    bail!(ErrorKind::TlsHandshakeFailure(
                        "plaintext data received before TLS negotiation".to_string()
                    ));
                }
                debug!("Upgrading connection to {} to TLS", self.host);
                let tls = tls_handshake(&self.host, reader.into_inner())?;
                self.stream = TCPStreamType::SSL(BufReader::new(tls));
                Ok(())
            }
            other => {
                let closed = match other {
                    TCPStreamType::Closed => true,
                    _ => false,
                };
                self.stream = other;
                if closed {
                    bail!(ErrorKind::ConnectionClosed);
                }
                bail!(ErrorKind::TlsHandshakeFailure("connection already uses TLS".to_string()))
            }
        }
    }

    /// Close TLS state, then the socket. Safe to call more than once.
    pub fn disconnect(&mut self) {
        match mem::replace(&mut self.stream, TCPStreamType::Closed) {
            TCPStreamType::SSL(reader) => {
                let mut tls = reader.into_inner();
                let _ = tls.shutdown();
                let _ = tls.get_ref().shutdown(Shutdown::Both);
                trace!("Closed TLS connection to {}", self.host);
            }
            TCPStreamType::Plain(reader) => {
                let _ = reader.get_ref().shutdown(Shutdown::Both);
                trace!("Closed connection to {}", self.host);
            }
            TCPStreamType::Closed => {}
        }
    }

    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        match self.stream {
            TCPStreamType::Plain(ref mut stream) => stream.get_mut().write_all(data)?,
            TCPStreamType::SSL(ref mut stream) => stream.get_mut().write_all(data)?,
            TCPStreamType::Closed => bail!(ErrorKind::ConnectionClosed),
        }
        Ok(data.len())
    }

    /// Send `line` followed by CRLF.
    pub fn write_string(&mut self, line: &str) -> Result<usize> {
        self.send(format!("{}\r\n", line).as_bytes())
    }

    /// Append one line (terminator included) to `buf`, reading at most
    /// `limit` bytes. Returns 0 once the peer has closed the connection.
    pub fn recv_line(&mut self, buf: &mut Vec<u8>, limit: usize) -> Result<usize> {
        const LF: u8 = 0x0a;
        let n = match self.stream {
            TCPStreamType::Plain(ref mut stream) => stream.by_ref().take(limit as u64).read_until(LF, buf)?,
            TCPStreamType::SSL(ref mut stream) => stream.by_ref().take(limit as u64).read_until(LF, buf)?,
            TCPStreamType::Closed => bail!(ErrorKind::ConnectionClosed),
        };
        Ok(n)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_socket(addrs: &[SocketAddr], timeout: Option<Duration>) -> Option<TcpStream> {
    for addr in addrs {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Some(stream),
            Err(e) => debug!("Connect to {} failed: {}", addr, e),
        }
    }
    None
}

fn tls_handshake(host: &str, tcp_stream: TcpStream) -> Result<SslStream<TcpStream>> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    let connector = builder.build();
    connector
        .connect(host, tcp_stream)
        .map_err(|e| ErrorKind::TlsHandshakeFailure(e.to_string()).into())
}
