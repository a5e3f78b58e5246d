#![allow(dead_code)]

use std::io::{self, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use keysub::{HandlerResult, Message};
use parking_lot::Mutex;

pub use keysub_test_router::TestRouter;

/// How long tests wait for asynchronous deliveries.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Spawns a test router on an ephemeral local port.
pub fn router() -> TestRouter {
    init_logging();
    TestRouter::spawn().unwrap()
}

/// An endpoint nothing listens on.
pub fn unreachable_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("tcp/127.0.0.1:{}", port)
}

/// A handler forwarding every message to the returned channel.
pub fn collector() -> (
    impl Fn(Message) -> HandlerResult + Send + 'static,
    channel::Receiver<Message>,
) {
    let (tx, rx) = channel::unbounded();
    let handler = move |message: Message| {
        tx.send(message).ok();
        Ok(())
    };
    (handler, rx)
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// An in-memory writer whose content stays readable after it was moved into
/// a handler.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
