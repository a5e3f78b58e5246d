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

use std::io::{self, Write};

use parking_lot::Mutex;

use crate::{HandlerResult, Message};

/// Capability to process delivered messages.
///
/// Handlers of one subscription are invoked sequentially, in arrival order,
/// on a thread owned by the library. An `Err` or a panic is logged and
/// reported to the error callback; delivery then continues with the next
/// message.
///
/// Closures taking a [`Message`] and returning a [`HandlerResult`] are handlers.
pub trait MessageHandler: Send + 'static {
    /// Processes one message.
    fn handle(&self, message: Message) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> HandlerResult + Send + 'static,
{
    fn handle(&self, message: Message) -> HandlerResult {
        self(message)
    }
}

/// Writes one `✓ [<topic>]: <payload>` line per message.
#[derive(Debug)]
pub struct Printer<W> {
    out: Mutex<W>,
}

impl Printer<io::Stdout> {
    /// A printer writing to standard output.
    pub fn stdout() -> Printer<io::Stdout> {
        Printer::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> Printer<W> {
    /// A printer writing to `out`.
    pub fn new(out: W) -> Printer<W> {
        Printer {
            out: Mutex::new(out),
        }
    }

    /// Consumes the printer, returning the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send + 'static> MessageHandler for Printer<W> {
    fn handle(&self, message: Message) -> HandlerResult {
        let mut out = self.out.lock();
        writeln!(out, "{}", message)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printer_writes_one_line_per_message() {
        let printer = Printer::new(Vec::new());
        printer
            .handle(Message::new("mqtt/demo/sensor/temp", "21.5"))
            .unwrap();
        printer
            .handle(Message::new("mqtt/demo/sensor/humidity", "40"))
            .unwrap();
        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(
            out,
            "✓ [mqtt/demo/sensor/temp]: 21.5\n✓ [mqtt/demo/sensor/humidity]: 40\n"
        );
    }

    #[test]
    fn closures_are_handlers() {
        let handler = |msg: Message| -> HandlerResult {
            if msg.payload.is_empty() {
                Err("empty payload".into())
            } else {
                Ok(())
            }
        };
        assert!(handler.handle(Message::new("a", "x")).is_ok());
        assert!(handler.handle(Message::new("a", "")).is_err());
    }
}
