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

use std::io;

use crate::key_expr;

/// The error type a [`MessageHandler`](crate::MessageHandler) may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of handling a single message.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A specialized `Result` type for subscriber operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while connecting, subscribing or delivering messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// None of the configured endpoints accepted a session.
    #[error("cannot connect to any endpoint: {0}")]
    Connection(#[source] io::Error),

    /// The key expression passed to a subscribe call is malformed.
    #[error("invalid key expression: {0}")]
    InvalidPattern(#[from] key_expr::Error),

    /// The connection is no longer open, either because this client closed
    /// it or because the router dropped the session.
    #[error("the connection is closed")]
    ConnectionClosed,

    /// A message handler returned an error or panicked.
    #[error("message handler failed: {0}")]
    Handler(HandlerError),

    /// The router reported an error on an established session.
    #[error("router error: {0}")]
    Router(String),

    /// An endpoint string could not be parsed, or no endpoint was given.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The configuration is malformed or lacks a required key.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The interrupt handler could not be installed.
    #[error("cannot install the interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// I/O failure on an established session.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    fn kind(&self) -> io::ErrorKind {
        match self {
            Error::Connection(err) | Error::Io(err) => err.kind(),
            Error::InvalidPattern(_) | Error::InvalidEndpoint(_) | Error::Config(_) => {
                io::ErrorKind::InvalidInput
            }
            Error::ConnectionClosed => io::ErrorKind::NotConnected,
            Error::Handler(_) | Error::Router(_) | Error::Signal(_) => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            err => io::Error::new(err.kind(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_io_error() {
        let err: io::Error = Error::ConnectionClosed.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(err.to_string(), "the connection is closed");

        let err: io::Error = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: io::Error = Error::Connection(refused).into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn handler_errors_display_their_cause() {
        let err = Error::Handler("bad payload".into());
        assert_eq!(err.to_string(), "message handler failed: bad payload");
    }
}
