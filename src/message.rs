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

use std::borrow::Cow;
use std::fmt;

/// A message delivered to a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// The concrete topic the message was published on.
    pub topic: String,

    /// The message payload, opaque bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Message {
        Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// The payload decoded as UTF-8, with invalid sequences replaced by `U+FFFD`.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Formats the message as one output line, `✓ [<topic>]: <payload>`.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\u{2713} [{}]: {}", self.topic, self.payload_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_as_output_line() {
        let msg = Message::new("mqtt/demo/sensor/temp", "21.5");
        assert_eq!(msg.to_string(), "✓ [mqtt/demo/sensor/temp]: 21.5");
    }

    #[test]
    fn display_replaces_invalid_utf8() {
        let msg = Message::new("a/b", vec![b'o', b'k', 0xff]);
        assert_eq!(msg.to_string(), "✓ [a/b]: ok\u{fffd}");
    }

    #[test]
    fn display_empty_payload() {
        let msg = Message::new("a/b", Vec::new());
        assert_eq!(msg.to_string(), "✓ [a/b]: ");
    }
}
