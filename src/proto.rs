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

use std::io::prelude::*;
use std::io::{self, Error, ErrorKind};
use std::str::{self, FromStr};

use crate::connect::ConnectInfo;
use crate::RouterInfo;

/// Longest control line accepted from the router.
const MAX_CONTROL_LINE: usize = 4096;

/// A protocol operation sent by the router.
#[derive(Debug, PartialEq)]
pub(crate) enum ServerOp {
    /// `INFO {["option_name":option_value],...}`
    Info(RouterInfo),

    /// `MSG <topic> <sid> <#bytes>\r\n[payload]\r\n`
    Msg {
        topic: String,
        sid: u64,
        payload: Vec<u8>,
    },

    /// `PING`
    Ping,

    /// `PONG`
    Pong,

    /// `-ERR <error message>`
    Err(String),

    /// Unknown protocol message.
    Unknown(String),
}

// adapted from `std::io::BufRead::read_until`, made
// to use a fixed buffer instead of a growable vector.
fn read_line<R: BufRead + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    loop {
        let available = match r.fill_buf() {
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let (done, len) = match memchr::memchr(b'\n', available) {
            Some(i) => (true, i + 1),
            None => (false, available.len()),
        };
        if len + read > buf.len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "received command exceeded fixed command buffer",
            ));
        }
        buf[read..read + len].copy_from_slice(&available[..len]);
        r.consume(len);
        read += len;
        if done || len == 0 {
            return Ok(read);
        }
    }
}

/// Decodes a single operation from the router.
///
/// If the connection is closed, `None` will be returned.
pub(crate) fn decode(mut stream: impl BufRead) -> io::Result<Option<ServerOp>> {
    // Read a line, which should be human readable.
    let mut command_buf = [0_u8; MAX_CONTROL_LINE];
    let command_len = read_line(&mut stream, &mut command_buf)?;
    if command_len == 0 {
        // If zero bytes were read, the connection is closed.
        return Ok(None);
    }

    // Convert into a UTF8 string for simpler parsing.
    let line = str::from_utf8(&command_buf[..command_len])
        .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

    let op = line
        .split_ascii_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    if op == "PING" {
        return Ok(Some(ServerOp::Ping));
    }

    if op == "PONG" {
        return Ok(Some(ServerOp::Pong));
    }

    if op == "INFO" {
        // Parse the JSON-formatted router information.
        let router_info = RouterInfo::parse(&line["INFO".len()..])
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "cannot parse router info"))?;

        return Ok(Some(ServerOp::Info(router_info)));
    }

    if op == "MSG" {
        // Extract whitespace-delimited arguments that come after "MSG".
        let args = line["MSG".len()..]
            .split_whitespace()
            .filter(|s| !s.is_empty());
        let args = args.collect::<Vec<_>>();

        // Parse the operation syntax: MSG <topic> <sid> <#bytes>
        let (topic, sid, num_bytes) = match args[..] {
            [topic, sid, num_bytes] => (topic, sid, num_bytes),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "invalid number of arguments after MSG",
                ));
            }
        };

        // Convert the slice into an owned string.
        let topic = topic.to_string();

        // Parse the subscription ID.
        let sid = u64::from_str(sid).map_err(|_| {
            Error::new(ErrorKind::InvalidInput, "cannot parse sid argument after MSG")
        })?;

        // Parse the number of payload bytes.
        let num_bytes = u32::from_str(num_bytes).map_err(|_| {
            Error::new(
                ErrorKind::InvalidInput,
                "cannot parse the number of bytes argument after MSG",
            )
        })?;

        // Read the payload.
        let mut payload = vec![0_u8; num_bytes as usize];
        stream.read_exact(&mut payload[..])?;
        // Read "\r\n".
        stream.read_exact(&mut [0_u8; 2])?;

        return Ok(Some(ServerOp::Msg {
            topic,
            sid,
            payload,
        }));
    }

    if op == "-ERR" {
        // Extract the message argument.
        let msg = line["-ERR".len()..].trim().trim_matches('\'').to_string();

        return Ok(Some(ServerOp::Err(msg)));
    }

    Ok(Some(ServerOp::Unknown(line.trim_end().to_owned())))
}

/// A protocol operation sent by the client.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ClientOp<'a> {
    /// `CONNECT {["option_name":option_value],...}`
    Connect(&'a ConnectInfo),

    /// `SUB <key expression> <sid>\r\n`
    Sub { key_expr: &'a str, sid: u64 },

    /// `UNSUB <sid>`
    Unsub { sid: u64 },

    /// `PING`
    Ping,

    /// `PONG`
    Pong,
}

/// Encodes a single operation from the client.
pub(crate) fn encode(mut stream: impl Write, op: ClientOp<'_>) -> io::Result<()> {
    match &op {
        ClientOp::Connect(connect_info) => {
            let op = format!(
                "CONNECT {}\r\n",
                connect_info.dump().ok_or_else(|| Error::new(
                    ErrorKind::InvalidData,
                    "cannot serialize connect info"
                ))?
            );
            stream.write_all(op.as_bytes())?;
        }

        ClientOp::Sub { key_expr, sid } => {
            stream.write_all(b"SUB ")?;
            stream.write_all(key_expr.as_bytes())?;
            stream.write_all(b" ")?;

            let mut buf = itoa::Buffer::new();
            stream.write_all(buf.format(*sid).as_bytes())?;
            stream.write_all(b"\r\n")?;
        }

        ClientOp::Unsub { sid } => {
            stream.write_all(b"UNSUB ")?;

            let mut buf = itoa::Buffer::new();
            stream.write_all(buf.format(*sid).as_bytes())?;
            stream.write_all(b"\r\n")?;
        }

        ClientOp::Ping => {
            stream.write_all(b"PING\r\n")?;
        }

        ClientOp::Pong => {
            stream.write_all(b"PONG\r\n")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(mut input: &[u8]) -> Vec<ServerOp> {
        let mut ops = Vec::new();
        while let Some(op) = decode(&mut input).unwrap() {
            ops.push(op);
        }
        ops
    }

    #[test]
    fn decodes_control_lines() {
        let ops = decode_all(b"PING\r\npong\r\n-ERR 'unknown key'\r\nFOO bar\r\n");
        assert_eq!(
            ops,
            vec![
                ServerOp::Ping,
                ServerOp::Pong,
                ServerOp::Err("unknown key".to_string()),
                ServerOp::Unknown("FOO bar".to_string()),
            ]
        );
    }

    #[test]
    fn decodes_info() {
        let ops = decode_all(
            b"INFO {\"router_id\":\"r1\",\"version\":\"1.0\",\"max_payload\":1024,\"client_id\":7}\r\n",
        );
        match &ops[..] {
            [ServerOp::Info(info)] => {
                assert_eq!(info.router_id, "r1");
                assert_eq!(info.max_payload, 1024);
                assert_eq!(info.client_id, 7);
            }
            other => panic!("unexpected ops: {:?}", other),
        }
    }

    #[test]
    fn decodes_msg_with_binary_payload() {
        let ops = decode_all(b"MSG mqtt/demo/sensor/temp 3 4\r\n21.5\r\nMSG a/b 1 3\r\n\r\n\xff\r\n");
        assert_eq!(
            ops,
            vec![
                ServerOp::Msg {
                    topic: "mqtt/demo/sensor/temp".to_string(),
                    sid: 3,
                    payload: b"21.5".to_vec(),
                },
                ServerOp::Msg {
                    topic: "a/b".to_string(),
                    sid: 1,
                    payload: b"\r\n\xff".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn rejects_malformed_msg() {
        let mut input: &[u8] = b"MSG a/b 1\r\n";
        assert!(decode(&mut input).is_err());

        let mut input: &[u8] = b"MSG a/b x 1\r\nx\r\n";
        assert!(decode(&mut input).is_err());

        let mut input: &[u8] = b"MSG a/b 1 10\r\nshort\r\n";
        assert!(decode(&mut input).is_err());
    }

    #[test]
    fn rejects_oversized_control_line() {
        let line = format!("-ERR '{}'\r\n", "x".repeat(MAX_CONTROL_LINE));
        let mut input = line.as_bytes();
        assert!(decode(&mut input).is_err());
    }

    #[test]
    fn encodes_client_ops() {
        let mut out = Vec::new();
        encode(&mut out, ClientOp::Sub { key_expr: "mqtt/demo/**", sid: 12 }).unwrap();
        encode(&mut out, ClientOp::Unsub { sid: 12 }).unwrap();
        encode(&mut out, ClientOp::Ping).unwrap();
        encode(&mut out, ClientOp::Pong).unwrap();
        assert_eq!(
            out,
            b"SUB mqtt/demo/** 12\r\nUNSUB 12\r\nPING\r\nPONG\r\n".to_vec()
        );
    }

    #[test]
    fn encodes_connect() {
        let info = ConnectInfo {
            id: "abc".to_string(),
            name: Some("dashboard".to_string()),
            verbose: false,
            pedantic: false,
            lang: "rust".to_string(),
            version: "0.1.0".to_string(),
        };
        let mut out = Vec::new();
        encode(&mut out, ClientOp::Connect(&info)).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with("CONNECT {"));
        assert!(line.ends_with("}\r\n"));
        let parsed: ConnectInfo = serde_json::from_str(&line["CONNECT ".len()..]).unwrap();
        assert_eq!(parsed, info);
    }
}
