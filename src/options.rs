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
use std::time::Duration;

use crate::{Connection, Error, IntoEndpointList, Result};

/// Connect options.
pub struct Options {
    pub(crate) name: Option<String>,
    pub(crate) connect_timeout: Duration,

    pub(crate) error_callback: ErrorCallback,
    pub(crate) disconnect_callback: Callback,
    pub(crate) close_callback: Callback,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        f.debug_map()
            .entry(&"name", &self.name)
            .entry(&"connect_timeout", &self.connect_timeout)
            .entry(&"error_callback", &self.error_callback)
            .entry(&"disconnect_callback", &self.disconnect_callback)
            .entry(&"close_callback", &self.close_callback)
            .finish()
    }
}

impl Default for Options {
    fn default() -> Options {
        Options {
            name: None,
            connect_timeout: Duration::from_secs(10),
            error_callback: ErrorCallback(None),
            disconnect_callback: Callback(None),
            close_callback: Callback(None),
        }
    }
}

impl Options {
    /// `Options` for opening a new [`Connection`].
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// let options = keysub::Options::new();
    /// let connection = options.connect("tcp/localhost:7447")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new() -> Options {
        Options::default()
    }

    /// Add a name option to this configuration.
    ///
    /// The name is announced to the router during the handshake.
    pub fn with_name(mut self, name: &str) -> Options {
        self.name = Some(name.to_string());
        self
    }

    /// Bound each connection attempt, covering the TCP connect and the
    /// handshake with the router. Defaults to 10 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Options {
        self.connect_timeout = timeout;
        self
    }

    /// Open a [`Connection`] to the first reachable endpoint.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// let connection = keysub::Options::new()
    ///     .with_name("dashboard")
    ///     .connect(&["tcp/zenoh-router:7447", "tcp/zenoh-mqtt-bridge:7448"])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect<I: IntoEndpointList>(self, endpoints: I) -> Result<Connection> {
        Connection::connect_with_options(endpoints, self)
    }

    /// Set a callback to be executed when an asynchronous error occurs, such
    /// as a failing message handler or an error reported by the router.
    ///
    /// These errors are logged whether or not a callback is set.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// let connection = keysub::Options::new()
    ///     .error_callback(|err| eprintln!("connection received an error: {}", err))
    ///     .connect("tcp/localhost:7447")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn error_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.error_callback = ErrorCallback(Some(Box::new(cb)));
        self
    }

    /// Set a callback to be executed when the router drops the session.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// let connection = keysub::Options::new()
    ///     .disconnect_callback(|| println!("connection has been lost"))
    ///     .connect("tcp/localhost:7447")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn disconnect_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnect_callback = Callback(Some(Box::new(cb)));
        self
    }

    /// Set a callback to be executed once the connection has been closed.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// let connection = keysub::Options::new()
    ///     .close_callback(|| println!("connection has been closed"))
    ///     .connect("tcp/localhost:7447")?;
    /// connection.close();
    /// # Ok(())
    /// # }
    /// ```
    pub fn close_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_callback = Callback(Some(Box::new(cb)));
        self
    }
}

pub(crate) struct Callback(Option<Box<dyn Fn() + Send + Sync + 'static>>);
impl Callback {
    pub fn call(&self) {
        if let Some(callback) = self.0.as_ref() {
            callback();
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        f.debug_map()
            .entry(
                &"callback",
                if self.0.is_some() { &"set" } else { &"unset" },
            )
            .finish()
    }
}

pub(crate) struct ErrorCallback(Option<Box<dyn Fn(Error) + Send + Sync + 'static>>);
impl ErrorCallback {
    pub fn call(&self, err: Error) {
        if let Some(callback) = self.0.as_ref() {
            callback(err);
        }
    }
}

impl fmt::Debug for ErrorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        f.debug_map()
            .entry(
                &"error_callback",
                if self.0.is_some() { &"set" } else { &"unset" },
            )
            .finish()
    }
}
