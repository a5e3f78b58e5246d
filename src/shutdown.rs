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
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as channel;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;

use crate::Result;

/// Why a blocking wait for cancellation returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// The process received an interrupt signal.
    Interrupted,
    /// Cancellation was requested programmatically, or the connection was closed.
    Requested,
    /// The router dropped the session.
    ConnectionLost,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cancelled::Interrupted => "interrupted",
            Cancelled::Requested => "cancellation requested",
            Cancelled::ConnectionLost => "connection lost",
        })
    }
}

/// A cancellation token.
///
/// Clones share the same state: cancelling one wakes every waiter on all
/// clones. Only the first cancellation takes effect.
#[derive(Clone)]
pub struct Shutdown(Arc<Inner>);

struct Inner {
    reason: Mutex<Option<Cancelled>>,

    /// Dropped on cancellation, which disconnects `done`.
    trigger: Mutex<Option<channel::Sender<()>>>,
    done: channel::Receiver<()>,
}

impl Default for Shutdown {
    fn default() -> Shutdown {
        let (trigger, done) = channel::bounded(0);
        Shutdown(Arc::new(Inner {
            reason: Mutex::new(None),
            trigger: Mutex::new(Some(trigger)),
            done,
        }))
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("reason", &self.reason())
            .finish()
    }
}

impl Shutdown {
    /// Creates a token that is not cancelled yet.
    ///
    /// ```
    /// use keysub::{Cancelled, Shutdown};
    ///
    /// let shutdown = Shutdown::new();
    /// assert!(!shutdown.is_cancelled());
    /// assert!(shutdown.cancel(Cancelled::Requested));
    /// assert_eq!(shutdown.reason(), Some(Cancelled::Requested));
    /// ```
    pub fn new() -> Shutdown {
        Shutdown::default()
    }

    /// Cancels the token, returning `false` if it was already cancelled.
    pub fn cancel(&self, reason: Cancelled) -> bool {
        let mut slot = self.0.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.0.trigger.lock().take();
        true
    }

    /// Why the token was cancelled, if it was.
    pub fn reason(&self) -> Option<Cancelled> {
        *self.0.reason.lock()
    }

    /// Returns `true` once the token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) -> Cancelled {
        self.0.done.recv().ok();
        self.reason().unwrap_or(Cancelled::Requested)
    }

    /// Blocks until the token is cancelled or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Cancelled> {
        match self.0.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => None,
            _ => self.reason(),
        }
    }

    /// Blocks until either token is cancelled.
    pub(crate) fn wait_either(&self, other: &Shutdown) -> Cancelled {
        let reason = channel::select! {
            recv(self.0.done) -> _ => self.reason(),
            recv(other.0.done) -> _ => other.reason(),
        };
        reason.unwrap_or(Cancelled::Requested)
    }

    /// Cancels the token with [`Cancelled::Interrupted`] when the process
    /// receives an interrupt signal.
    ///
    /// The signal handler is process-wide and can be installed only once.
    pub fn cancel_on_interrupt(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, shutting down");
            token.cancel(Cancelled::Interrupted);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn first_cancellation_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_cancelled());
        assert!(shutdown.cancel(Cancelled::ConnectionLost));
        assert!(!shutdown.cancel(Cancelled::Interrupted));
        assert_eq!(shutdown.reason(), Some(Cancelled::ConnectionLost));
        assert_eq!(shutdown.wait(), Cancelled::ConnectionLost);
    }

    #[test]
    fn cancel_wakes_waiters_on_other_threads() {
        let shutdown = Shutdown::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let shutdown = shutdown.clone();
                thread::spawn(move || shutdown.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        shutdown.cancel(Cancelled::Interrupted);

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Cancelled::Interrupted);
        }
    }

    #[test]
    fn wait_timeout_expires() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert_eq!(shutdown.wait_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));

        shutdown.cancel(Cancelled::Requested);
        assert_eq!(
            shutdown.wait_timeout(Duration::from_millis(20)),
            Some(Cancelled::Requested)
        );
    }

    #[test]
    fn wait_either_reports_the_cancelled_token() {
        let user = Shutdown::new();
        let session = Shutdown::new();
        session.cancel(Cancelled::ConnectionLost);
        assert_eq!(user.wait_either(&session), Cancelled::ConnectionLost);
    }
}
