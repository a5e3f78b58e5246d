//! A test router for keysub-based systems.
//!
//! It speaks the client protocol on a single background thread, matches
//! topics with [`keysub::KeyExpr`] and lets tests inject messages, reject
//! or ignore handshakes, and drop every session on demand.

use std::any::Any;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::mem::ManuallyDrop;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as channel;
use keysub::{ConnectInfo, Endpoint, KeyExpr, RouterInfo};

const MAX_PAYLOAD: usize = 1024 * 1024;

/// Requests sent from the controlling `TestRouter` to the router thread.
enum Command {
    Publish {
        topic: String,
        payload: Vec<u8>,
        done: channel::Sender<()>,
    },
    DisconnectAll {
        done: channel::Sender<()>,
    },
    SendError {
        msg: String,
        done: channel::Sender<()>,
    },
}

/// A session opened by a client.
struct Session {
    client_id: u64,
    socket: TcpStream,
    inbuf: Vec<u8>,
    subs: HashMap<u64, KeyExpr>,
}

/// What the router loop should do after a line was handled.
#[derive(Debug, PartialEq)]
enum SessionAction {
    None,
    Evict,
}

/// A test router, stopped on drop.
pub struct TestRouter {
    address: SocketAddr,
    shutdown: Arc<AtomicBool>,
    commands: channel::Sender<Command>,
    subscriptions: Arc<AtomicUsize>,
    clients: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

/// Configures a [`TestRouter`] before spawning it.
pub struct TestRouterBuilder {
    address: String,
    silent: bool,
    reject: Option<String>,
}

impl TestRouter {
    /// Starts configuring a router on an ephemeral local port.
    pub fn build() -> TestRouterBuilder {
        TestRouterBuilder {
            address: "127.0.0.1:0".to_string(),
            silent: false,
            reject: None,
        }
    }

    /// Spawns a router on an ephemeral local port.
    pub fn spawn() -> io::Result<TestRouter> {
        TestRouter::build().spawn()
    }

    /// Get the socket address on which the router is listening.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The `tcp/host:port` endpoint of this router.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.address)
    }

    /// Delivers a message to every subscription matching `topic`.
    ///
    /// Returns once the matching `MSG` operations were written to the
    /// client sockets.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) {
        let (done, wait) = channel::bounded(1);
        let command = Command::Publish {
            topic: topic.to_string(),
            payload: payload.as_ref().to_vec(),
            done,
        };
        if self.commands.send(command).is_ok() {
            wait.recv().ok();
        }
    }

    /// Drops every client session, as a crashing router would.
    pub fn disconnect_all(&self) {
        let (done, wait) = channel::bounded(1);
        if self.commands.send(Command::DisconnectAll { done }).is_ok() {
            wait.recv().ok();
        }
    }

    /// Sends `-ERR '<msg>'` to every client without closing its session.
    pub fn send_error(&self, msg: &str) {
        let (done, wait) = channel::bounded(1);
        let command = Command::SendError {
            msg: msg.to_string(),
            done,
        };
        if self.commands.send(command).is_ok() {
            wait.recv().ok();
        }
    }

    /// Number of subscriptions currently registered by all clients.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    /// Number of client sessions currently open.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    /// Leave the router running and join.
    pub fn join(self) -> Result<(), Box<dyn Any + Send>> {
        let mut router = ManuallyDrop::new(self);
        match router.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("error joining the test router thread for shutdown");
            }
            log::debug!("stopped test router");
        }
    }
}

impl TestRouterBuilder {
    /// Address for the router to listen on.
    pub fn address(self, address: impl Into<String>) -> TestRouterBuilder {
        TestRouterBuilder {
            address: address.into(),
            ..self
        }
    }

    /// Accept connections but never speak, so that handshakes time out.
    pub fn silent(self) -> TestRouterBuilder {
        TestRouterBuilder {
            silent: true,
            ..self
        }
    }

    /// Answer every CONNECT with `-ERR '<msg>'` and close the session.
    pub fn reject_with(self, msg: &str) -> TestRouterBuilder {
        TestRouterBuilder {
            reject: Some(msg.to_string()),
            ..self
        }
    }

    /// Spawn the router on a thread, returns a controller which will stop
    /// the router on drop.
    pub fn spawn(self) -> io::Result<TestRouter> {
        let listener = TcpListener::bind(&self.address)?;
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;
        log::info!(
            "test router started on {} (requested {})",
            address,
            self.address
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let clients = Arc::new(AtomicUsize::new(0));
        let (commands, inbox) = channel::unbounded();

        let router = Router {
            listener,
            silent: self.silent,
            reject: self.reject,
            shutdown: shutdown.clone(),
            inbox,
            subscriptions: subscriptions.clone(),
            clients: clients.clone(),
            sessions: HashMap::new(),
            idle: Vec::new(),
            max_client_id: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("keysub_test_router_{}", address.port()))
            .spawn(move || router.run())?;

        Ok(TestRouter {
            address,
            shutdown,
            commands,
            subscriptions,
            clients,
            handle: Some(handle),
        })
    }
}

/// State owned by the router thread.
struct Router {
    listener: TcpListener,
    silent: bool,
    reject: Option<String>,
    shutdown: Arc<AtomicBool>,
    inbox: channel::Receiver<Command>,
    subscriptions: Arc<AtomicUsize>,
    clients: Arc<AtomicUsize>,
    sessions: HashMap<u64, Session>,
    /// Sockets accepted in silent mode, kept open but never served.
    idle: Vec<TcpStream>,
    max_client_id: u64,
}

impl Router {
    fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            // maybe accept a new client
            match self.listener.accept() {
                Ok((socket, addr)) => self.accept(socket, addr),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => log::warn!("accept failed: {}", err),
            }

            let mut to_evict = vec![];
            let mut in_flight = vec![];
            for (client_id, session) in &mut self.sessions {
                match session.read_lines() {
                    Ok(lines) => {
                        for line in lines {
                            log::trace!("{}: got command {}", client_id, line);
                            let action = session.handle_line(
                                &line,
                                self.reject.as_deref(),
                                &self.subscriptions,
                            );
                            if action == SessionAction::Evict {
                                to_evict.push(*client_id);
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        log::debug!("{}: socket error {} caused eviction", client_id, err);
                        to_evict.push(*client_id);
                    }
                }
            }

            while let Ok(command) = self.inbox.try_recv() {
                in_flight.push(command);
            }
            for command in in_flight {
                match command {
                    Command::Publish {
                        topic,
                        payload,
                        done,
                    } => {
                        to_evict.extend(self.publish(&topic, &payload));
                        done.send(()).ok();
                    }
                    Command::DisconnectAll { done } => {
                        log::debug!("evicting all connected clients");
                        to_evict.extend(self.sessions.keys().copied());
                        self.idle.clear();
                        self.evict(&mut to_evict);
                        done.send(()).ok();
                    }
                    Command::SendError { msg, done } => {
                        for (client_id, session) in &mut self.sessions {
                            if let Err(err) = session.error(&msg) {
                                log::debug!("{}: socket error {} caused eviction", client_id, err);
                                to_evict.push(*client_id);
                            }
                        }
                        done.send(()).ok();
                    }
                }
            }

            self.evict(&mut to_evict);

            if self.sessions.is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn accept(&mut self, socket: TcpStream, addr: SocketAddr) {
        log::debug!("new client connected from {}", addr);
        if self.silent {
            self.idle.push(socket);
            return;
        }

        self.max_client_id += 1;
        let client_id = self.max_client_id;
        let info = RouterInfo {
            router_id: "keysub_test_router".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_payload: MAX_PAYLOAD,
            client_id,
        };
        let mut session = Session {
            client_id,
            socket,
            inbuf: Vec::new(),
            subs: HashMap::new(),
        };

        let greeting = match serde_json::to_string(&info) {
            Ok(json) => format!("INFO {}\r\n", json),
            Err(err) => {
                log::warn!("cannot serialize router info: {}", err);
                return;
            }
        };
        let setup = session
            .socket
            .set_read_timeout(Some(Duration::from_millis(1)))
            .and_then(|_| session.write(greeting.as_bytes()));
        if let Err(err) = setup {
            log::debug!("{}: cannot greet client: {}", client_id, err);
            return;
        }

        self.sessions.insert(client_id, session);
        self.clients.store(self.sessions.len(), Ordering::Release);
    }

    /// Writes the message to every matching subscription and returns the
    /// clients whose socket failed.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Vec<u64> {
        log::trace!("emitting msg on {} ({} bytes)", topic, payload.len());
        let mut failed = vec![];
        for (client_id, session) in &mut self.sessions {
            let mut sids: Vec<u64> = session
                .subs
                .iter()
                .filter(|(_, key_expr)| key_expr.matches(topic))
                .map(|(sid, _)| *sid)
                .collect();
            sids.sort_unstable();

            for sid in sids {
                let mut out = format!("MSG {} {} {}\r\n", topic, sid, payload.len()).into_bytes();
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\r\n");
                if let Err(err) = session.write(&out) {
                    log::debug!("{}: socket error {} caused eviction", client_id, err);
                    failed.push(*client_id);
                    break;
                }
            }
        }
        failed
    }

    fn evict(&mut self, to_evict: &mut Vec<u64>) {
        while let Some(client_id) = to_evict.pop() {
            if let Some(session) = self.sessions.remove(&client_id) {
                log::debug!("client {} evicted", client_id);
                self.subscriptions
                    .fetch_sub(session.subs.len(), Ordering::AcqRel);
                session.socket.shutdown(Shutdown::Both).ok();
            }
        }
        self.clients.store(self.sessions.len(), Ordering::Release);
    }
}

impl Session {
    /// Reads whatever is available and returns the complete lines.
    fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut buf = [0_u8; 4096];
        match self.socket.read(&mut buf) {
            Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "client hung up")),
            Ok(n) => self.inbuf.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }

        let mut lines = vec![];
        while let Some(end) = self.inbuf.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.inbuf.drain(..end + 2).take(end).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        Ok(lines)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.socket.write_all(buf)?;
        self.socket.flush()
    }

    fn error(&mut self, msg: &str) -> io::Result<()> {
        self.write(format!("-ERR '{}'\r\n", msg).as_bytes())
    }

    fn handle_line(
        &mut self,
        line: &str,
        reject: Option<&str>,
        subscriptions: &AtomicUsize,
    ) -> SessionAction {
        let (op, args) = match line.find(' ') {
            Some(i) => (&line[..i], line[i + 1..].trim()),
            None => (line, ""),
        };

        let res = match op.to_ascii_uppercase().as_str() {
            "CONNECT" => match serde_json::from_str::<ConnectInfo>(args) {
                Ok(info) => {
                    log::debug!(
                        "{}: client {} ({} {}) connected",
                        self.client_id,
                        info.id,
                        info.lang,
                        info.version
                    );
                    if let Some(msg) = reject {
                        self.error(msg).ok();
                        return SessionAction::Evict;
                    }
                    Ok(())
                }
                Err(err) => {
                    log::debug!("{}: malformed CONNECT: {}", self.client_id, err);
                    self.error("Malformed Connect").ok();
                    return SessionAction::Evict;
                }
            },
            "PING" => self.write(b"PONG\r\n"),
            "PONG" => Ok(()),
            "SUB" => {
                let mut parts = args.split_whitespace();
                match (parts.next(), parts.next().map(str::parse::<u64>)) {
                    (Some(key_expr), Some(Ok(sid))) => match KeyExpr::new(key_expr) {
                        Ok(key_expr) => {
                            if self.subs.insert(sid, key_expr).is_none() {
                                subscriptions.fetch_add(1, Ordering::AcqRel);
                            }
                            Ok(())
                        }
                        Err(err) => self.error(&format!("Invalid Key Expression: {}", err)),
                    },
                    _ => self.error("Invalid Subscription"),
                }
            }
            "UNSUB" => match args.parse::<u64>() {
                Ok(sid) => {
                    if self.subs.remove(&sid).is_some() {
                        subscriptions.fetch_sub(1, Ordering::AcqRel);
                    }
                    Ok(())
                }
                Err(_) => self.error("Invalid Subscription"),
            },
            other => {
                log::debug!("{}: unknown command {}", self.client_id, other);
                self.error("Unknown Protocol Operation").ok();
                return SessionAction::Evict;
            }
        };

        match res {
            Ok(()) => SessionAction::None,
            Err(err) => {
                log::debug!("{}: socket error {} caused eviction", self.client_id, err);
                SessionAction::Evict
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_router_cleanup() {
        let success = Arc::new(AtomicBool::new(false));
        {
            let success = success.clone();
            thread::spawn(move || {
                let router = TestRouter::spawn().unwrap();
                thread::sleep(Duration::from_millis(1));
                drop(router);
                success.store(true, Ordering::Release);
            })
            .join()
            .unwrap();
        }
        assert!(success.load(Ordering::Acquire));
    }

    #[test]
    fn greets_with_info() {
        let router = TestRouter::spawn().unwrap();
        let mut socket = TcpStream::connect(router.address()).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut buf = vec![0_u8; 512];
        let n = socket.read(&mut buf).unwrap();
        let greeting = String::from_utf8_lossy(&buf[..n]);
        assert!(greeting.starts_with("INFO {"), "{}", greeting);
        assert!(greeting.contains("keysub_test_router"));
    }

    #[test]
    fn counts_subscriptions() {
        let router = TestRouter::spawn().unwrap();
        let connection = keysub::open(router.endpoint()).unwrap();
        assert_eq!(router.client_count(), 1);

        let sub = connection.subscribe("a/*").unwrap();
        let _other = connection.subscribe("b/**").unwrap();
        assert_eq!(router.subscription_count(), 2);

        sub.unsubscribe().unwrap();
        connection.flush().unwrap();
        assert_eq!(router.subscription_count(), 1);
    }

    #[test]
    fn publishes_to_matching_subscriptions() {
        let router = TestRouter::spawn().unwrap();
        let connection = keysub::open(router.endpoint()).unwrap();
        let sub = connection.subscribe("mqtt/demo/**").unwrap();

        router.publish("other/topic", "ignored");
        router.publish("mqtt/demo/sensor/temp", "21.5");

        let message = sub.next_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(message.topic, "mqtt/demo/sensor/temp");
        assert_eq!(message.payload, b"21.5");
        assert!(sub.try_next().is_none());
    }
}
