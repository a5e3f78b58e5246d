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

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use crossbeam_channel::RecvTimeoutError;

use crate::client::Client;
use crate::{Error, HandlerResult, KeyExpr, Message, MessageHandler, Result};

/// A `Subscription` receives `Message`s published on topics matching a key
/// expression.
///
/// Dropping a `Subscription` unregisters its interest with the router.
#[derive(Debug)]
pub struct Subscription {
    sid: u64,
    key_expr: KeyExpr,
    messages: channel::Receiver<Message>,
    client: Client,
    do_unsub: bool,
}

impl Subscription {
    pub(crate) fn new(
        sid: u64,
        key_expr: KeyExpr,
        messages: channel::Receiver<Message>,
        client: Client,
    ) -> Subscription {
        Subscription {
            sid,
            key_expr,
            messages,
            client,
            do_unsub: true,
        }
    }

    /// The key expression this subscription was registered with.
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// Get the next message, or None if the subscription has been
    /// unsubscribed or the connection closed.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// # let sub = connection.subscribe("demo/**")?;
    /// if let Some(message) = sub.next() {}
    /// # Ok(())
    /// # }
    /// ```
    pub fn next(&self) -> Option<Message> {
        self.messages.recv().ok()
    }

    /// Try to get the next message, or None if no messages are present or
    /// if the subscription has been unsubscribed or the connection closed.
    pub fn try_next(&self) -> Option<Message> {
        self.messages.try_recv().ok()
    }

    /// Get the next message, or a timeout error if no messages are available
    /// for `timeout`.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// # let sub = connection.subscribe("demo/**")?;
    /// if let Ok(message) = sub.next_timeout(std::time::Duration::from_secs(1)) {}
    /// # Ok(())
    /// # }
    /// ```
    pub fn next_timeout(&self, timeout: Duration) -> std::result::Result<Message, RecvTimeoutError> {
        self.messages.recv_timeout(timeout)
    }

    /// Returns a blocking message iterator.
    pub fn iter(&self) -> Iter<'_> {
        Iter { subscription: self }
    }

    /// Returns a non-blocking message iterator.
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { subscription: self }
    }

    /// Returns a blocking message iterator with a time deadline for blocking.
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            subscription: self,
            to: timeout,
        }
    }

    /// Attach a closure to handle messages.
    ///
    /// The closure runs on a dedicated thread and receives the messages of
    /// this subscription one at a time, in arrival order. An error returned
    /// by the closure, or a panic inside it, is logged and reported to the
    /// error callback; delivery continues with the next message.
    ///
    /// The resulting `Handler` does not unregister interest when dropped.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// connection.subscribe("demo/**")?.with_handler(move |message| {
    ///     println!("{}", message);
    ///     Ok(())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_handler<F>(self, handler: F) -> Result<Handler>
    where
        F: Fn(Message) -> HandlerResult + Send + 'static,
    {
        self.with_message_handler(handler)
    }

    /// Attach a [`MessageHandler`] to handle messages.
    ///
    /// Behaves like [`Subscription::with_handler`].
    pub fn with_message_handler<H: MessageHandler>(mut self, handler: H) -> Result<Handler> {
        let messages = self.messages.clone();
        let client = self.client.clone();
        let key_expr = self.key_expr.clone();

        let handle = thread::Builder::new()
            .name(format!("keysub_subscriber_{}_{}", self.sid, self.key_expr))
            .spawn(move || {
                for message in messages.iter() {
                    let topic = message.topic.clone();
                    let res = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message)));
                    let err = match res {
                        Ok(Ok(())) => continue,
                        Ok(Err(err)) => err,
                        Err(payload) => panic_message(payload).into(),
                    };
                    log::error!(
                        "handler of {} failed on message from {}: {}",
                        key_expr,
                        topic,
                        err
                    );
                    client.report(Error::Handler(err));
                }
            })?;

        // From here on the handler thread owns the interest.
        self.do_unsub = false;
        self.client.register_handler(self.sid, handle);

        Ok(Handler {
            sid: self.sid,
            key_expr: self.key_expr.clone(),
            client: self.client.clone(),
        })
    }

    /// Unsubscribe a subscription immediately. Messages already queued stay
    /// readable until the iterator reports the end.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// let sub = connection.subscribe("demo/**")?;
    /// sub.unsubscribe()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn unsubscribe(mut self) -> Result<()> {
        self.do_unsub = false;
        self.client.unsubscribe(self.sid)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.do_unsub {
            self.client.unsubscribe(self.sid).ok();
        }
    }
}

impl IntoIterator for Subscription {
    type Item = Message;
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        IntoIter { subscription: self }
    }
}

impl<'a> IntoIterator for &'a Subscription {
    type Item = Message;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        Iter { subscription: self }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}

/// A `Handler` may be used to unsubscribe a handler thread.
#[derive(Debug)]
pub struct Handler {
    sid: u64,
    key_expr: KeyExpr,
    client: Client,
}

impl Handler {
    /// The key expression the handler is subscribed to.
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// Unsubscribe the handler and wait for it to finish the messages
    /// already queued for it.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> keysub::Result<()> {
    /// # let connection = keysub::open("tcp/localhost:7447")?;
    /// let handler = connection
    ///     .subscribe("demo/**")?
    ///     .with_handler(move |message| {
    ///         println!("{}", message);
    ///         Ok(())
    ///     })?;
    /// handler.unsubscribe()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn unsubscribe(self) -> Result<()> {
        self.client.unsubscribe(self.sid)?;
        self.client.join_handler(self.sid);
        Ok(())
    }
}

/// A non-blocking iterator over messages from a `Subscription`
pub struct TryIter<'a> {
    subscription: &'a Subscription,
}

impl<'a> Iterator for TryIter<'a> {
    type Item = Message;
    fn next(&mut self) -> Option<Self::Item> {
        self.subscription.try_next()
    }
}

/// An iterator over messages from a `Subscription`
pub struct Iter<'a> {
    subscription: &'a Subscription,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Message;
    fn next(&mut self) -> Option<Self::Item> {
        self.subscription.next()
    }
}

/// An iterator over messages from a `Subscription`
pub struct IntoIter {
    subscription: Subscription,
}

impl Iterator for IntoIter {
    type Item = Message;
    fn next(&mut self) -> Option<Self::Item> {
        self.subscription.next()
    }
}

/// An iterator over messages from a `Subscription`
/// where `None` will be returned if a new `Message`
/// has not been received by the end of a timeout.
pub struct TimeoutIter<'a> {
    subscription: &'a Subscription,
    to: Duration,
}

impl<'a> Iterator for TimeoutIter<'a> {
    type Item = Message;
    fn next(&mut self) -> Option<Self::Item> {
        self.subscription.next_timeout(self.to).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(
            panic_message(Box::new("boom")),
            "handler panicked: boom".to_string()
        );
        assert_eq!(
            panic_message(Box::new(String::from("bang"))),
            "handler panicked: bang".to_string()
        );
        assert_eq!(panic_message(Box::new(7_u8)), "handler panicked".to_string());
    }
}
