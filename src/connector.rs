// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::prelude::*;
use std::io::{self, BufReader, Error, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::connect::ConnectInfo;
use crate::proto::{self, ClientOp, ServerOp};
use crate::{Endpoint, EndpointList, Options, Result, RouterInfo};

pub(crate) const BUF_CAPACITY: usize = 32 * 1024;

/// A session with a router that completed the handshake.
pub(crate) struct Session {
    pub(crate) endpoint: Endpoint,
    pub(crate) info: RouterInfo,
    pub(crate) reader: BufReader<RouterStream>,
    pub(crate) stream: RouterStream,
}

/// Opens sessions to the first reachable endpoint.
pub(crate) struct Connector {
    endpoints: EndpointList,
    options: Arc<Options>,
}

impl Connector {
    /// Creates a new connector with the endpoints and options.
    pub(crate) fn new(endpoints: EndpointList, options: Arc<Options>) -> Connector {
        Connector { endpoints, options }
    }

    /// Creates a new session with one of the endpoints.
    ///
    /// Endpoints are tried in list order and each resolved address gets a
    /// single attempt bounded by the connect timeout.
    pub(crate) fn connect(&self, id: &str) -> Result<Session> {
        // The last seen error, which gets returned if all connect attempts
        // fail.
        let mut last_err = Error::new(ErrorKind::AddrNotAvailable, "no socket addresses");

        for endpoint in &self.endpoints {
            let addrs = match endpoint.socket_addrs() {
                Ok(addrs) => addrs.collect::<Vec<_>>(),
                Err(err) => {
                    log::debug!("cannot resolve {}: {}", endpoint, err);
                    last_err = err;
                    continue;
                }
            };

            for addr in addrs {
                match self.connect_addr(addr, id) {
                    Ok((info, reader, stream)) => {
                        log::info!(
                            "connected to {} ({}), router {}",
                            endpoint,
                            addr,
                            info.router_id
                        );
                        return Ok(Session {
                            endpoint: endpoint.clone(),
                            info,
                            reader,
                            stream,
                        });
                    }
                    Err(err) => {
                        log::warn!("cannot connect to {} ({}): {}", endpoint, addr, err);
                        last_err = err;
                    }
                }
            }
        }

        Err(crate::Error::Connection(last_err))
    }

    /// Attempts to establish a session with a single socket address.
    fn connect_addr(
        &self,
        addr: SocketAddr,
        id: &str,
    ) -> io::Result<(RouterInfo, BufReader<RouterStream>, RouterStream)> {
        let timeout = self.options.connect_timeout;

        // Connect to the remote socket.
        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        tcp.set_nodelay(true)?;
        let mut stream = RouterStream::new(tcp);

        // The handshake must complete within the timeout as well.
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut reader = BufReader::with_capacity(BUF_CAPACITY, stream.clone());

        // Expect an INFO message.
        let router_info = match proto::decode(&mut reader)? {
            Some(ServerOp::Info(router_info)) => router_info,
            Some(ServerOp::Err(msg)) => {
                return Err(Error::new(
                    ErrorKind::ConnectionRefused,
                    format!("router rejected the connection: {}", msg),
                ));
            }
            Some(op) => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("expected INFO, received: {:?}", op),
                ));
            }
            None => {
                return Err(Error::new(ErrorKind::UnexpectedEof, "connection closed"));
            }
        };

        // Data that will be formatted as a CONNECT message.
        let connect_info = ConnectInfo {
            id: id.to_string(),
            name: self.options.name.clone(),
            verbose: false,
            pedantic: false,
            lang: crate::LANG.to_string(),
            version: crate::VERSION.to_string(),
        };

        // Send CONNECT and PING messages.
        proto::encode(&mut stream, ClientOp::Connect(&connect_info))?;
        proto::encode(&mut stream, ClientOp::Ping)?;
        stream.flush()?;

        // Wait for a PONG.
        loop {
            match proto::decode(&mut reader)? {
                // If we get PONG, the router is happy and we're done
                // connecting.
                Some(ServerOp::Pong) => break,

                // Respond to a PING with a PONG.
                Some(ServerOp::Ping) => {
                    proto::encode(&mut stream, ClientOp::Pong)?;
                    stream.flush()?;
                }

                Some(ServerOp::Err(msg)) => {
                    return Err(Error::new(
                        ErrorKind::ConnectionRefused,
                        format!("router rejected the connection: {}", msg),
                    ));
                }

                // No other operations should arrive at this time.
                Some(op) => {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("unexpected line while connecting: {:?}", op),
                    ));
                }

                // Error if the connection was closed.
                None => {
                    return Err(Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed while waiting for the first PONG",
                    ));
                }
            }
        }

        // From now on the keep-alive bounds how long the router may stay silent.
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;

        Ok((router_info, reader, stream))
    }
}

/// A raw stream of bytes to a router.
#[derive(Clone, Debug)]
pub(crate) struct RouterStream {
    tcp: Arc<TcpStream>,
}

impl RouterStream {
    fn new(tcp: TcpStream) -> RouterStream {
        RouterStream { tcp: Arc::new(tcp) }
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp.set_read_timeout(timeout)
    }

    pub(crate) fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp.set_write_timeout(timeout)
    }

    /// Will attempt to shutdown the underlying stream.
    pub(crate) fn shutdown(&self) {
        self.tcp.shutdown(Shutdown::Both).ok();
    }
}

impl Read for RouterStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        <&RouterStream as Read>::read(&mut &*self, buf)
    }
}

impl Read for &RouterStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.tcp).read(buf)
    }
}

impl Write for RouterStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        <&RouterStream as Write>::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        <&RouterStream as Write>::flush(&mut &*self)
    }
}

impl Write for &RouterStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.tcp).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.tcp).flush()
    }
}
