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

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::slice;
use std::str::FromStr;

use crate::{Error, Result};

/// Port assumed when an endpoint does not state one.
pub const DEFAULT_PORT: u16 = 7447;

/// Transport used to reach a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Plain TCP.
    Tcp,
}

impl Transport {
    /// The name used in endpoint strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
        }
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            other => Err(Error::InvalidEndpoint(format!(
                "unsupported transport `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a router, written `transport/host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    transport: Transport,
    host: String,
    port: u16,
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parse an endpoint such as `tcp/localhost:7447` or `tcp/[::1]:7447`.
    ///
    /// If not stated explicitly port `7447` is assumed.
    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = |reason: &str| Error::InvalidEndpoint(format!("`{}`: {}", input, reason));

        let (transport, address) = input
            .split_once('/')
            .ok_or_else(|| invalid("expected `<transport>/<host>:<port>`"))?;
        let transport: Transport = transport
            .parse()
            .map_err(|_| invalid("only the `tcp` transport is supported"))?;

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            let port = match &rest[end + 1..] {
                "" => None,
                suffix => Some(
                    suffix
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected `:` after the IPv6 address"))?,
                ),
            };
            (&rest[..end], port)
        } else {
            match address.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if host.contains(|c: char| c == '/' || c == '[' || c == ']' || c.is_whitespace()) {
            return Err(invalid("malformed host"));
        }
        if host.contains(':') && !address.starts_with('[') {
            return Err(invalid("IPv6 addresses must be enclosed in brackets"));
        }

        let port = match port {
            None => DEFAULT_PORT,
            Some(port) => port
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| invalid("invalid port"))?,
        };

        Ok(Endpoint {
            transport,
            host: host.to_owned(),
            port,
        })
    }
}

impl Endpoint {
    /// Returns the transport.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the host, without brackets for IPv6 addresses.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the sockets from resolving the endpoint.
    pub fn socket_addrs(&self) -> io::Result<impl Iterator<Item = SocketAddr>> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint {
            transport: Transport::Tcp,
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}/[{}]:{}", self.transport, self.host, self.port)
        } else {
            write!(f, "{}/{}:{}", self.transport, self.host, self.port)
        }
    }
}

/// A non-empty list of endpoints, in the order connection attempts are made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList(Vec<Endpoint>);

impl EndpointList {
    /// Fails with [`Error::InvalidEndpoint`] when `endpoints` is empty.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<EndpointList> {
        if endpoints.is_empty() {
            Err(Error::InvalidEndpoint("no endpoint given".to_string()))
        } else {
            Ok(EndpointList(endpoints))
        }
    }

    /// The first endpoint to try.
    pub fn primary(&self) -> &Endpoint {
        &self.0[0]
    }

    /// Iterates over the endpoints in the order they are tried.
    pub fn iter(&self) -> slice::Iter<'_, Endpoint> {
        self.0.iter()
    }

    /// The endpoints in the order they are tried.
    pub fn as_slice(&self) -> &[Endpoint] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a EndpointList {
    type Item = &'a Endpoint;
    type IntoIter = slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for EndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, endpoint) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", endpoint)?;
        }
        Ok(())
    }
}

/// Capability to convert into a list of router endpoints.
///
/// There are several implementations ensuring the easy passing of one or more
/// endpoints to functions like [`crate::open()`].
pub trait IntoEndpointList {
    /// Convert the instance into an [`EndpointList`].
    fn into_endpoint_list(self) -> Result<EndpointList>;
}

fn parse_all<'s, I: IntoIterator<Item = &'s str>>(inputs: I) -> Result<EndpointList> {
    let endpoints = inputs
        .into_iter()
        .map(str::parse)
        .collect::<Result<Vec<Endpoint>>>()?;
    EndpointList::new(endpoints)
}

impl<'s> IntoEndpointList for &'s str {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        parse_all(self.split(','))
    }
}

impl<'s> IntoEndpointList for &'s [&'s str] {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        parse_all(self.iter().copied())
    }
}

impl<'s, const N: usize> IntoEndpointList for &'s [&'s str; N] {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        self.as_ref().into_endpoint_list()
    }
}

impl IntoEndpointList for String {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        self.as_str().into_endpoint_list()
    }
}

impl<'s> IntoEndpointList for &'s String {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        self.as_str().into_endpoint_list()
    }
}

impl IntoEndpointList for Vec<String> {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        parse_all(self.iter().map(String::as_str))
    }
}

impl IntoEndpointList for Endpoint {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        EndpointList::new(vec![self])
    }
}

impl IntoEndpointList for Vec<Endpoint> {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        EndpointList::new(self)
    }
}

impl IntoEndpointList for EndpointList {
    fn into_endpoint_list(self) -> Result<EndpointList> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_domain() {
        let endpoint: Endpoint = "tcp/localhost:7447".parse().unwrap();
        assert_eq!(endpoint.transport(), Transport::Tcp);
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 7447);
        assert_eq!(endpoint.to_string(), "tcp/localhost:7447");
    }

    #[test]
    fn endpoint_ipv4() {
        let endpoint: Endpoint = "tcp/127.0.0.1:7448".parse().unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 7448);
    }

    #[test]
    fn endpoint_ipv6() {
        let endpoint: Endpoint = "tcp/[::1]:7447".parse().unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.to_string(), "tcp/[::1]:7447");

        let endpoint: Endpoint = "tcp/[::]".parse().unwrap();
        assert_eq!(endpoint.host(), "::");
        assert_eq!(endpoint.port(), DEFAULT_PORT);
    }

    #[test]
    fn endpoint_default_port() {
        let endpoint: Endpoint = "tcp/zenoh-router".parse().unwrap();
        assert_eq!(endpoint.port(), DEFAULT_PORT);
    }

    #[test]
    fn endpoint_rejects_malformed_input() {
        for input in &[
            "",
            "localhost:7447",
            "udp/localhost:7447",
            "tcp/",
            "tcp/:7447",
            "tcp/localhost:port",
            "tcp/localhost:0",
            "tcp/localhost:70000",
            "tcp/::1:7447",
            "tcp/[::1",
            "tcp/[::1]7447",
        ] {
            let res = input.parse::<Endpoint>();
            assert!(
                matches!(res, Err(Error::InvalidEndpoint(_))),
                "{:?} should be rejected, got {:?}",
                input,
                res
            );
        }
    }

    #[test]
    fn endpoint_from_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(Endpoint::from(addr).to_string(), "tcp/127.0.0.1:4000");
    }

    #[test]
    fn endpoint_list_keeps_order() {
        let list = "tcp/zenoh-router:7447,tcp/zenoh-mqtt-bridge:7448"
            .into_endpoint_list()
            .unwrap();
        let hosts: Vec<&str> = list.iter().map(Endpoint::host).collect();
        assert_eq!(hosts, vec!["zenoh-router", "zenoh-mqtt-bridge"]);
        assert_eq!(list.primary().port(), 7447);
        assert_eq!(list.as_slice().len(), 2);
        assert_eq!(list.as_slice()[0], *list.primary());
        assert_eq!(
            list.to_string(),
            "tcp/zenoh-router:7447,tcp/zenoh-mqtt-bridge:7448"
        );
    }

    #[test]
    fn endpoint_list_conversions() {
        let list = (&["tcp/a:1", "tcp/b:2"]).into_endpoint_list().unwrap();
        assert_eq!(list.as_slice().len(), 2);

        let list = vec!["tcp/a:1".to_string()].into_endpoint_list().unwrap();
        assert_eq!(list.primary().host(), "a");

        assert!(matches!(
            Vec::<Endpoint>::new().into_endpoint_list(),
            Err(Error::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "tcp/a:1,udp/b:2".into_endpoint_list(),
            Err(Error::InvalidEndpoint(_))
        ));
    }
}
