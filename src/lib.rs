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

//! A synchronous subscriber client for key-expression pub/sub routers.
//!
//! `keysub` opens a session with the first reachable router of an ordered
//! endpoint list, registers interest in one or more key expressions and
//! delivers every matching message to a handler running on its own thread.
//!
//! Key expressions are `/`-separated chunks where `*` matches exactly one
//! chunk and `**` matches any number of chunks, including none.
//!
//! # Example
//! ```no_run
//! use keysub::{Config, SubscriberClient};
//!
//! # fn main() -> keysub::Result<()> {
//! let mut config = Config::new();
//! config.insert_json("connect/endpoints", r#"["tcp/localhost:7447"]"#)?;
//!
//! let mut client = SubscriberClient::open(&config)?;
//! client.cancel_on_interrupt()?;
//! client.subscribe("mqtt/demo/**", |message| {
//!     println!("{}", message);
//!     Ok(())
//! })?;
//! client.run_until_cancelled();
//! client.close();
//! # Ok(())
//! # }
//! ```
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    missing_docs,
    trivial_numeric_casts,
    unsafe_code,
    unused_qualifications
)]
#![deny(
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::checked_conversions,
    clippy::doc_markdown,
    clippy::explicit_into_iter_loop,
    clippy::get_unwrap,
    clippy::mem_forget,
    clippy::mut_mut,
    clippy::needless_borrow,
    clippy::print_stdout,
    clippy::unimplemented,
    clippy::wildcard_dependencies
)]

mod client;
mod connect;
mod connector;
mod endpoint;
mod error;
mod handler;
mod message;
mod options;
mod proto;
mod shutdown;
mod subscriber;

/// Configuration tree and its well-known keys.
pub mod config;

/// Validation and matching of key expressions.
pub mod key_expr;

/// Pull-style subscriptions and handler threads.
pub mod subscription;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[doc(hidden)]
pub use connect::ConnectInfo;

pub use config::Config;
pub use endpoint::{Endpoint, EndpointList, IntoEndpointList, Transport, DEFAULT_PORT};
pub use error::{Error, HandlerError, HandlerResult, Result};
pub use handler::{MessageHandler, Printer};
pub use key_expr::KeyExpr;
pub use message::Message;
pub use options::Options;
pub use shutdown::{Cancelled, Shutdown};
pub use subscriber::SubscriberClient;
pub use subscription::{Handler, Subscription};

use client::Client;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LANG: &str = "rust";

const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Information sent by the router while establishing a session.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RouterInfo {
    /// The unique identifier of the router.
    pub router_id: String,
    /// The version of the router.
    pub version: String,
    /// Maximum payload size the router will deliver.
    pub max_payload: usize,
    /// An optional unsigned integer (64 bits) representing the internal
    /// client identifier in the router.
    pub client_id: u64,
}

impl RouterInfo {
    /// Parses the JSON object carried by an `INFO` operation.
    pub(crate) fn parse(s: &str) -> Option<RouterInfo> {
        serde_json::from_str(s.trim()).ok()
    }
}

/// A session with a router.
///
/// Clones share the session. It is closed when [`Connection::close`] is
/// called or when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct Connection(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    client: Client,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Opens a session with the first reachable endpoint.
///
/// Endpoints are tried in order, each attempt bounded by the connect timeout
/// of [`Options`]. If none of them completes the handshake, the error of the
/// last attempt is returned as [`Error::Connection`].
///
/// # Examples
///
/// A single endpoint, or several separated by commas:
/// ```no_run
/// let connection = keysub::open("tcp/localhost:7447")?;
/// let connection = keysub::open("tcp/10.0.0.1:7447,tcp/10.0.0.2:7447")?;
/// # Ok::<(), keysub::Error>(())
/// ```
///
/// An array of strings works as well:
/// ```no_run
/// let connection = keysub::open(&["tcp/10.0.0.1:7447", "tcp/10.0.0.2:7447"])?;
/// # Ok::<(), keysub::Error>(())
/// ```
pub fn open<I: IntoEndpointList>(endpoints: I) -> Result<Connection> {
    Options::new().connect(endpoints)
}

impl Connection {
    /// Connects to one of the endpoints with the given options.
    pub(crate) fn connect_with_options<I>(endpoints: I, options: Options) -> Result<Connection>
    where
        I: IntoEndpointList,
    {
        let endpoints = endpoints.into_endpoint_list()?;
        let client = Client::connect(endpoints, options)?;
        Ok(Connection(Arc::new(Inner { client })))
    }

    /// Create a subscription for the given key expression.
    ///
    /// Returns once the router has acknowledged the interest, so every
    /// matching message published afterwards is delivered.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// let sub = connection.subscribe("mqtt/demo/**")?;
    /// for message in sub.timeout_iter(std::time::Duration::from_secs(1)) {
    ///     println!("{}", message);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self, key_expr: &str) -> Result<Subscription> {
        let key_expr = KeyExpr::new(key_expr)?;
        let (sid, receiver) = self.0.client.subscribe(&key_expr)?;
        let subscription = Subscription::new(sid, key_expr, receiver, self.0.client.clone());

        // Wait for the router to register the interest. Dropping the
        // subscription on failure withdraws it.
        self.0.client.flush(DEFAULT_FLUSH_TIMEOUT)?;

        Ok(subscription)
    }

    /// Create a subscription whose messages are delivered to `handler` on a
    /// dedicated thread.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// let handler = connection.subscribe_with_handler("mqtt/demo/**", keysub::Printer::stdout())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe_with_handler<H: MessageHandler>(
        &self,
        key_expr: &str,
        handler: H,
    ) -> Result<Handler> {
        self.subscribe(key_expr)?.with_message_handler(handler)
    }

    /// Flush the session by sending a `PING` and waiting for the responding
    /// `PONG`, for at most 10 seconds.
    pub fn flush(&self) -> Result<()> {
        self.flush_timeout(DEFAULT_FLUSH_TIMEOUT)
    }

    /// Flush the session by sending a `PING` and waiting for the responding
    /// `PONG`. Fails with a `TimedOut` I/O error if the router takes longer
    /// than `timeout` to respond, and with [`Error::ConnectionClosed`] once
    /// the session was closed or lost.
    pub fn flush_timeout(&self, timeout: Duration) -> Result<()> {
        self.0.client.flush(timeout)
    }

    /// Close the session. All clones of this `Connection` are closed as well.
    ///
    /// Every subscription is withdrawn and handler threads finish the
    /// messages already queued for them. Closing twice has no effect.
    pub fn close(&self) {
        self.0.client.close();
    }

    /// Returns `true` once [`Connection::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.0.client.is_closed()
    }

    /// Information sent by the router in its greeting.
    pub fn router_info(&self) -> RouterInfo {
        self.0.client.router_info()
    }

    /// The session id generated on open and announced to the router.
    pub fn id(&self) -> &str {
        self.0.client.id()
    }

    /// The endpoint the session is established with.
    pub fn endpoint(&self) -> &Endpoint {
        self.0.client.endpoint()
    }

    /// A token cancelled when the session ends: [`Cancelled::Requested`]
    /// after close, [`Cancelled::ConnectionLost`] when the router dropped it.
    pub fn session_end(&self) -> Shutdown {
        self.0.client.session_end()
    }
}
