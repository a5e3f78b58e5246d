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

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::prelude::*;
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;

use crate::connector::{Connector, RouterStream, Session, BUF_CAPACITY};
use crate::proto::{self, ClientOp, ServerOp};
use crate::{
    Cancelled, Endpoint, EndpointList, Error, KeyExpr, Message, Options, Result, RouterInfo,
    Shutdown,
};

/// Client state.
///
/// NB: locking protocol - writes must ALWAYS be locked
///     first and released after when both are used.
///     Failure to follow this strict rule WILL create
///     a deadlock!
struct State {
    write: Mutex<WriteState>,
    read: Mutex<ReadState>,
}

struct WriteState {
    /// Buffered writer with an active connection.
    ///
    /// When `None`, the session is over: either closed or lost.
    writer: Option<BufWriter<RouterStream>>,

    /// Signals to the flush thread that the writer needs a flush.
    flush_kicker: channel::Sender<()>,

    /// Next subscription ID.
    next_sid: u64,
}

struct ReadState {
    /// Current subscriptions.
    subscriptions: HashMap<u64, Subscription>,

    /// Expected pongs and their notification channels.
    pongs: VecDeque<channel::Sender<()>>,

    /// Tracks the last activity from the router.
    last_active: Instant,

    /// Used for client side monitoring of connection health.
    pings_out: u8,
}

/// A registered subscription.
struct Subscription {
    key_expr: KeyExpr,
    messages: channel::Sender<Message>,
}

/// The session machinery shared by a connection, its subscriptions and its
/// background threads.
#[derive(Clone)]
pub(crate) struct Client {
    /// Shared client state.
    state: Arc<State>,

    /// Router info provided by the last INFO message.
    router_info: Arc<Mutex<RouterInfo>>,

    /// Session id announced in the CONNECT message.
    id: Arc<str>,

    /// The endpoint the session was opened with.
    endpoint: Arc<Endpoint>,

    /// Set to `true` if shutdown has been requested.
    shutdown: Arc<Mutex<bool>>,

    /// Cancelled when the session ends, whether closed or lost.
    session_end: Shutdown,

    /// The options that this `Client` was created using.
    pub(crate) options: Arc<Options>,

    /// handler of client thread.
    client_thread: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// handler of flush thread.
    flush_thread: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Message handler threads by subscription id.
    handler_threads: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl Client {
    /// Opens a session with the first reachable endpoint and starts the
    /// background threads serving it.
    pub(crate) fn connect(endpoints: EndpointList, options: Options) -> Result<Client> {
        let options = Arc::new(options);
        let id = nuid::next().to_string();

        let connector = Connector::new(endpoints, options.clone());
        let Session {
            endpoint,
            info,
            reader,
            stream,
        } = connector.connect(&id)?;

        // A channel for coordinating flushes.
        let (flush_kicker, flush_wanted) = channel::bounded(1);

        // The client state.
        let client = Client {
            state: Arc::new(State {
                write: Mutex::new(WriteState {
                    writer: Some(BufWriter::with_capacity(BUF_CAPACITY, stream)),
                    flush_kicker,
                    next_sid: 1,
                }),
                read: Mutex::new(ReadState {
                    subscriptions: HashMap::new(),
                    pongs: VecDeque::new(),
                    last_active: Instant::now(),
                    pings_out: 0,
                }),
            }),
            router_info: Arc::new(Mutex::new(info)),
            id: Arc::from(id.as_str()),
            endpoint: Arc::new(endpoint),
            shutdown: Arc::new(Mutex::new(false)),
            session_end: Shutdown::new(),
            options,
            client_thread: Arc::new(Mutex::new(None)),
            flush_thread: Arc::new(Mutex::new(None)),
            handler_threads: Arc::new(Mutex::new(HashMap::new())),
        };

        // Spawn the client thread responsible for:
        // - Reading operations from the router and processing them.
        // - Forwarding MSG operations to subscribers.
        // - Reporting the end of the session.
        let handle = thread::Builder::new()
            .name(format!("keysub_reader_{}", client.id))
            .spawn({
                let client = client.clone();
                move || client.run(reader)
            })?;
        *client.client_thread.lock() = Some(handle);

        // Spawn a thread that periodically flushes buffered operations and
        // keeps the session alive.
        let handle = thread::Builder::new()
            .name(format!("keysub_flusher_{}", client.id))
            .spawn({
                let client = client.clone();
                move || client.run_flusher(flush_wanted)
            })?;
        *client.flush_thread.lock() = Some(handle);

        Ok(client)
    }

    /// Session id announced to the router.
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// The endpoint the session was opened with.
    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Retrieves router info as received by the most recent INFO message.
    pub(crate) fn router_info(&self) -> RouterInfo {
        self.router_info.lock().clone()
    }

    /// A token cancelled once the session ends.
    pub(crate) fn session_end(&self) -> Shutdown {
        self.session_end.clone()
    }

    /// Reports an asynchronous error to the error callback, if one is set.
    pub(crate) fn report(&self, err: Error) {
        self.options.error_callback.call(err);
    }

    /// Makes a round trip to the router to ensure buffered operations reach it.
    pub(crate) fn flush(&self, timeout: Duration) -> Result<()> {
        let pong = {
            let mut write = self.state.write.lock();

            // Check if the client is closed.
            self.check_shutdown()?;

            let (sender, receiver) = channel::bounded(1);

            // Only a live session can answer a PING.
            let writer = write.writer.as_mut().ok_or(Error::ConnectionClosed)?;
            writer.get_ref().set_write_timeout(Some(timeout))?;
            proto::encode(&mut *writer, ClientOp::Ping)?;
            writer.flush()?;
            writer.get_ref().set_write_timeout(None)?;

            // Enqueue an expected PONG.
            let mut read = self.state.read.lock();
            read.pongs.push_back(sender);

            // NB see locking protocol for state.write and state.read
            drop(read);
            drop(write);

            receiver
        };

        // Wait until the PONG operation is received.
        match pong.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(Error::Io(io::Error::new(
                ErrorKind::TimedOut,
                "no PONG received within the flush timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Closes the session.
    ///
    /// Every subscription is unsubscribed, buffered operations are flushed
    /// and the socket is shut down. Handler threads finish the messages
    /// already queued for them before this returns, unless it is called from
    /// one of them.
    pub(crate) fn close(&self) {
        let mut write = self.state.write.lock();
        let mut read = self.state.read.lock();

        // Initiate shutdown process.
        if !self.shutdown() {
            return;
        }

        let subscriptions = mem::take(&mut read.subscriptions);
        if let Some(mut writer) = write.writer.take() {
            // Send UNSUB messages and ignore errors.
            for sid in subscriptions.keys() {
                proto::encode(&mut writer, ClientOp::Unsub { sid: *sid }).ok();
            }
            writer.flush().ok();
            writer.get_ref().shutdown();
        }

        // Dropping the senders lets handler threads drain their queues and exit.
        drop(subscriptions);

        // Wake up all pending flushes and the flush thread.
        read.pongs.clear();
        write.flush_kicker.try_send(()).ok();

        // NB see locking protocol for state.write and state.read
        drop(read);
        drop(write);

        // wait for the threads.
        let client_thread = self.client_thread.lock().take();
        if let Some(handle) = client_thread {
            join(handle);
        }
        let flush_thread = self.flush_thread.lock().take();
        if let Some(handle) = flush_thread {
            join(handle);
        }
        // Handlers registered from now on are joined by `register_handler`.
        let handler_threads: Vec<_> = self
            .handler_threads
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handler_threads {
            join(handle);
        }

        log::info!("connection [{}] to {} closed", self.id, self.endpoint);
        self.session_end.cancel(Cancelled::Requested);
        self.options.close_callback.call();
    }

    /// Kicks off the shutdown process, but doesn't wait for its completion.
    /// Returns true if this is the first attempt to shut down the system.
    fn shutdown(&self) -> bool {
        let mut shutdown = self.shutdown.lock();
        let old = *shutdown;
        *shutdown = true;
        !old
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.shutdown.lock()
    }

    fn check_shutdown(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Registers interest in a key expression.
    pub(crate) fn subscribe(
        &self,
        key_expr: &KeyExpr,
    ) -> Result<(u64, channel::Receiver<Message>)> {
        let mut write = self.state.write.lock();
        let mut read = self.state.read.lock();

        // Check if the client is closed.
        self.check_shutdown()?;

        // Generate a subscription ID.
        let sid = write.next_sid;

        // Send a SUB operation.
        let writer = write.writer.as_mut().ok_or(Error::ConnectionClosed)?;
        proto::encode(
            writer,
            ClientOp::Sub {
                key_expr: key_expr.as_str(),
                sid,
            },
        )?;
        write.next_sid += 1;
        write.flush_kicker.try_send(()).ok();

        // Register the subscription in the hash map.
        let (sender, receiver) = channel::unbounded();
        read.subscriptions.insert(
            sid,
            Subscription {
                key_expr: key_expr.clone(),
                messages: sender,
            },
        );

        // NB see locking protocol for state.write and state.read
        drop(read);
        drop(write);

        log::debug!("subscribed to {} with sid {}", key_expr, sid);
        Ok((sid, receiver))
    }

    /// Unsubscribes from a key expression.
    pub(crate) fn unsubscribe(&self, sid: u64) -> Result<()> {
        let mut write = self.state.write.lock();
        let mut read = self.state.read.lock();

        // Remove the subscription from the map.
        if read.subscriptions.remove(&sid).is_none() {
            // already unsubscribed

            // NB see locking protocol for state.write and state.read
            drop(read);
            drop(write);

            return Ok(());
        }

        // Send an UNSUB message.
        if let Some(writer) = write.writer.as_mut() {
            proto::encode(writer, ClientOp::Unsub { sid })?;
            write.flush_kicker.try_send(()).ok();
        }

        // NB see locking protocol for state.write and state.read
        drop(read);
        drop(write);

        log::debug!("unsubscribed sid {}", sid);
        Ok(())
    }

    /// Tracks the thread delivering messages of subscription `sid`, so that
    /// closing the connection waits for it.
    pub(crate) fn register_handler(&self, sid: u64, handle: JoinHandle<()>) {
        // `close` sets the shutdown flag before it drains this table.
        let mut handler_threads = self.handler_threads.lock();
        if !self.is_closed() {
            handler_threads.insert(sid, handle);
            return;
        }
        drop(handler_threads);

        // The queue lost its sender on close, so the thread ends once it is
        // drained.
        join(handle);
    }

    /// Waits for the handler thread of subscription `sid` to finish.
    pub(crate) fn join_handler(&self, sid: u64) {
        let handle = self.handler_threads.lock().remove(&sid);
        if let Some(handle) = handle {
            join(handle);
        }
    }

    /// Reads operations until the session ends, then reports how it ended.
    fn run(&self, reader: BufReader<RouterStream>) {
        let res = self.dispatch(reader);

        {
            let mut write = self.state.write.lock();
            let mut read = self.state.read.lock();

            if let Some(writer) = write.writer.take() {
                writer.get_ref().shutdown();
            }
            read.pongs.clear();
            read.subscriptions.clear();

            // NB see locking protocol for state.write and state.read
            drop(read);
            drop(write);
        }

        if self.is_closed() {
            return;
        }

        match res {
            Ok(()) => log::error!("router at {} closed the connection", self.endpoint),
            Err(err) => log::error!("connection to {} lost: {}", self.endpoint, err),
        }
        self.options.disconnect_callback.call();
        self.session_end.cancel(Cancelled::ConnectionLost);
    }

    /// Flushes the writer when kicked and sends keep-alive PINGs when the
    /// router has been silent for too long.
    fn run_flusher(&self, flush_wanted: channel::Receiver<()>) {
        // Track last flush/write time.
        const MIN_FLUSH_BETWEEN: Duration = Duration::from_millis(5);

        // Handle recv timeouts and check if we should send a PING.
        const PING_INTERVAL: Duration = Duration::from_secs(2 * 60);
        const MAX_PINGS_OUT: u8 = 2;

        let mut last = Instant::now()
            .checked_sub(MIN_FLUSH_BETWEEN)
            .unwrap_or_else(Instant::now);

        loop {
            // if client is shutting down, stop periodic flushes.
            if self.is_closed() {
                break;
            }
            match flush_wanted.recv_timeout(PING_INTERVAL) {
                Ok(()) => {
                    let since = last.elapsed();
                    if since < MIN_FLUSH_BETWEEN {
                        thread::sleep(MIN_FLUSH_BETWEEN - since);
                    }

                    // Flush the writer.
                    let mut write = self.state.write.lock();
                    let mut read = self.state.read.lock();

                    if let Some(writer) = write.writer.as_mut() {
                        let res = writer.flush();
                        last = Instant::now();
                        // If flushing fails, disconnect.
                        if res.is_err() {
                            writer.get_ref().shutdown();
                            write.writer = None;
                            read.pongs.clear();
                        }
                    }

                    // NB see locking protocol for state.write and state.read
                    drop(read);
                    drop(write);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let mut write = self.state.write.lock();
                    let mut read = self.state.read.lock();

                    if read.pings_out >= MAX_PINGS_OUT {
                        log::warn!(
                            "router at {} did not answer {} pings",
                            self.endpoint,
                            read.pings_out
                        );
                        if let Some(writer) = write.writer.as_mut() {
                            writer.get_ref().shutdown();
                        }
                        write.writer = None;
                        read.pongs.clear();
                    } else if read.last_active.elapsed() > PING_INTERVAL {
                        read.pings_out += 1;
                        read.pongs.push_back(write.flush_kicker.clone());
                        // Send out a PING here.
                        if let Some(writer) = write.writer.as_mut() {
                            // Ok to ignore errors here.
                            proto::encode(&mut *writer, ClientOp::Ping).ok();
                            if writer.flush().is_err() {
                                writer.get_ref().shutdown();
                                write.writer = None;
                                read.pongs.clear();
                            }
                        }
                    }

                    // NB see locking protocol for state.write and state.read
                    drop(read);
                    drop(write);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Updates our last activity from the router.
    fn update_activity(&self) {
        let mut read = self.state.read.lock();
        read.last_active = Instant::now();
    }

    /// Reads operations from the router and dispatches them to subscribers.
    ///
    /// Returns `Ok` when the router closes the stream or shutdown was
    /// requested.
    fn dispatch(&self, mut reader: impl BufRead) -> io::Result<()> {
        // Handle operations received from the router.
        while let Some(op) = proto::decode(&mut reader)? {
            if self.is_closed() {
                break;
            }

            // Track activity.
            self.update_activity();
            log::trace!("connection [{}] received {:?}", self.id, op);

            match op {
                ServerOp::Info(router_info) => {
                    *self.router_info.lock() = router_info;
                }

                ServerOp::Ping => {
                    // Respond with a PONG if connected.
                    let mut write = self.state.write.lock();
                    let read = self.state.read.lock();

                    if let Some(w) = write.writer.as_mut() {
                        proto::encode(w, ClientOp::Pong)?;
                        write.flush_kicker.try_send(()).ok();
                    }

                    // NB see locking protocol for state.write and state.read
                    drop(read);
                    drop(write);
                }

                ServerOp::Pong => {
                    let write = self.state.write.lock();
                    let mut read = self.state.read.lock();

                    // Clear any outstanding pings.
                    read.pings_out = 0;

                    if write.writer.is_some() {
                        // Take the next expected PONG and complete it by
                        // sending a message.
                        if let Some(pong) = read.pongs.pop_front() {
                            pong.try_send(()).ok();
                        }
                    }

                    // NB see locking protocol for state.write and state.read
                    drop(read);
                    drop(write);
                }

                ServerOp::Msg {
                    topic,
                    sid,
                    payload,
                } => {
                    let read = self.state.read.lock();

                    // Send the message to matching subscription.
                    if let Some(subscription) = read.subscriptions.get(&sid) {
                        if subscription.key_expr.matches(&topic) {
                            // The receiver is gone only while the subscription
                            // is being dropped.
                            subscription
                                .messages
                                .send(Message { topic, payload })
                                .ok();
                        } else {
                            log::warn!(
                                "dropping message on {} not matching subscription {} ({})",
                                topic,
                                sid,
                                subscription.key_expr
                            );
                        }
                    }
                }

                ServerOp::Err(msg) => {
                    log::warn!("router error on connection [{}]: {}", self.id, msg);
                    self.report(Error::Router(msg));
                }

                ServerOp::Unknown(line) => {
                    log::warn!("unknown op: {}", line);
                }
            }
        }

        Ok(())
    }
}

/// Joins a background thread, unless it is the calling thread.
fn join(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::error!("a connection thread panicked");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        f.debug_struct("Client").field("id", &self.id).finish()
    }
}
