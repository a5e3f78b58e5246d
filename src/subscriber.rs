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

use crate::{
    Cancelled, Config, Connection, Handler, HandlerResult, IntoEndpointList, KeyExpr, Message,
    MessageHandler, Options, Result, Shutdown,
};

/// A subscriber bound to a single router session.
///
/// It opens the session, registers handlers for key expressions, blocks in
/// [`SubscriberClient::run_until_cancelled`] while messages are delivered in
/// the background, and closes the session when dropped.
///
/// # Example
/// ```no_run
/// use keysub::{Options, Printer, SubscriberClient};
///
/// # fn main() -> keysub::Result<()> {
/// let mut client = SubscriberClient::open_with_options("tcp/localhost:7447", Options::new())?;
/// client.subscribe_with("mqtt/demo/**", Printer::stdout())?;
///
/// let stop = client.shutdown_handle();
/// std::thread::spawn(move || {
///     std::thread::sleep(std::time::Duration::from_secs(5));
///     stop.cancel(keysub::Cancelled::Requested);
/// });
/// client.run_until_cancelled();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SubscriberClient {
    connection: Connection,
    shutdown: Shutdown,
    handlers: Vec<Handler>,
}

impl SubscriberClient {
    /// Opens a session using the endpoints and options found in `config`.
    pub fn open(config: &Config) -> Result<SubscriberClient> {
        let endpoints = config.endpoints()?;
        let options = config.options()?;
        SubscriberClient::open_with_options(endpoints, options)
    }

    /// Opens a session with the first reachable endpoint.
    pub fn open_with_options<I: IntoEndpointList>(
        endpoints: I,
        options: Options,
    ) -> Result<SubscriberClient> {
        let connection = options.connect(endpoints)?;
        Ok(SubscriberClient {
            connection,
            shutdown: Shutdown::new(),
            handlers: Vec::new(),
        })
    }

    /// The underlying session.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// A handle on the token [`SubscriberClient::run_until_cancelled`]
    /// waits for. Cancelling it from any thread stops the client.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Cancels the client when the process receives an interrupt signal.
    pub fn cancel_on_interrupt(&self) -> Result<()> {
        self.shutdown.cancel_on_interrupt()
    }

    /// Delivers every message matching `key_expr` to the closure `handler`.
    ///
    /// Returns once the router has registered the interest.
    pub fn subscribe<F>(&mut self, key_expr: &str, handler: F) -> Result<()>
    where
        F: Fn(Message) -> HandlerResult + Send + 'static,
    {
        self.subscribe_with(key_expr, handler)
    }

    /// Delivers every message matching `key_expr` to `handler`.
    pub fn subscribe_with<H: MessageHandler>(&mut self, key_expr: &str, handler: H) -> Result<()> {
        let handler = self.connection.subscribe_with_handler(key_expr, handler)?;
        log::info!("subscribed to {}", handler.key_expr());
        self.handlers.push(handler);
        Ok(())
    }

    /// The key expressions subscribed so far.
    pub fn key_exprs(&self) -> impl Iterator<Item = &KeyExpr> {
        self.handlers.iter().map(Handler::key_expr)
    }

    /// Blocks until the client is cancelled or the session ends.
    pub fn run_until_cancelled(&self) -> Cancelled {
        let reason = self.shutdown.wait_either(&self.connection.session_end());
        log::info!("stopping subscriber: {}", reason);
        reason
    }

    /// Closes the session. Closing twice has no effect.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for SubscriberClient {
    fn drop(&mut self) {
        self.close();
    }
}
