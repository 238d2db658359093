//! Cache commands over RESP
//!
//! Only the handful of commands the cache capability needs: GET, SET (PX),
//! PEXPIRE and DEL. Replies are parsed just far enough to map them to
//! [`CacheClient`] results.

use super::tcp::PooledConnection;
use super::{clamp_ttl, CacheClient};
use crate::error::PoolError;

use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A decoded RESP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

/// Cache-capability client on top of a pooled TCP connection.
#[derive(Debug)]
pub struct RespCache {
    conn: PooledConnection,
    buf: BytesMut,
}

impl RespCache {
    pub fn new(conn: PooledConnection) -> Self {
        Self {
            conn,
            buf: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Address of the shard this client talks to
    pub fn address(&self) -> &str {
        self.conn.address()
    }

    async fn call(&mut self, args: &[&[u8]]) -> Result<Reply, PoolError> {
        let frame = encode_command(args);

        // Out of sync until the whole reply is read. A failed or cancelled
        // call leaves the connection broken and it is dropped, not reused.
        self.conn.mark_broken();
        let reply = self.round_trip(&frame).await?;
        self.conn.mark_healthy();

        match reply {
            Reply::Error(message) => Err(PoolError::Server(message)),
            reply => Ok(reply),
        }
    }

    async fn round_trip(&mut self, frame: &[u8]) -> Result<Reply, PoolError> {
        self.conn.write_all(frame).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, PoolError> {
        loop {
            if let Some((reply, used)) = parse_reply(&self.buf)? {
                self.buf.advance(used);
                return Ok(reply);
            }

            let n = self.conn.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(PoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-reply",
                )));
            }
        }
    }
}

impl CacheClient for RespCache {
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>, PoolError> {
        match self.call(&[b"GET", key.as_bytes()]).await? {
            Reply::Bulk(value) => Ok(value),
            other => Err(unexpected("GET", &other)),
        }
    }

    async fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PoolError> {
        let reply = match ttl {
            Some(ttl) => {
                let millis = ttl_millis(ttl);
                self.call(&[b"SET", key.as_bytes(), value, b"PX", millis.as_bytes()])
                    .await?
            }
            None => self.call(&[b"SET", key.as_bytes(), value]).await?,
        };

        match reply {
            Reply::Simple(ref status) if status == "OK" => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool, PoolError> {
        let millis = ttl_millis(ttl);
        match self.call(&[b"PEXPIRE", key.as_bytes(), millis.as_bytes()]).await? {
            Reply::Integer(n) => Ok(n == 1),
            other => Err(unexpected("PEXPIRE", &other)),
        }
    }

    async fn delete(&mut self, key: &str) -> Result<bool, PoolError> {
        match self.call(&[b"DEL", key.as_bytes()]).await? {
            Reply::Integer(n) => Ok(n > 0),
            other => Err(unexpected("DEL", &other)),
        }
    }
}

fn ttl_millis(ttl: Duration) -> String {
    clamp_ttl(ttl).as_millis().to_string()
}

fn unexpected(command: &str, reply: &Reply) -> PoolError {
    PoolError::Protocol(format!("unexpected reply to {command}: {reply:?}"))
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Bytes {
    let mut out = BytesMut::new();
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out.freeze()
}

/// Largest bulk string accepted, matching the server's own default limit
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest array accepted
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Deepest array nesting accepted
const MAX_DEPTH: usize = 8;
/// Elements preallocated for an array before any of them is parsed
const ARRAY_PREALLOC: i64 = 64;

/// Parse one reply from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the reply and the
/// number of bytes it occupied.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, PoolError> {
    parse_nested(buf, 0)
}

fn parse_nested(buf: &[u8], depth: usize) -> Result<Option<(Reply, usize)>, PoolError> {
    let Some(line_end) = find_crlf(buf) else {
        return Ok(None);
    };
    let Some((&kind, rest)) = buf[..line_end].split_first() else {
        return Err(PoolError::Protocol("empty reply line".to_string()));
    };
    let line = std::str::from_utf8(rest)
        .map_err(|_| PoolError::Protocol("reply header is not UTF-8".to_string()))?;
    let consumed = line_end + 2;

    match kind {
        b'+' => Ok(Some((Reply::Simple(line.to_string()), consumed))),
        b'-' => Ok(Some((Reply::Error(line.to_string()), consumed))),
        b':' => Ok(Some((Reply::Integer(parse_int(line)?), consumed))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Reply::Bulk(None), consumed)));
            }
            if len > MAX_BULK_LEN {
                return Err(PoolError::Protocol(format!("bulk length {len} exceeds limit")));
            }
            let end = consumed + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(PoolError::Protocol("bulk string not terminated".to_string()));
            }
            let value = Bytes::copy_from_slice(&buf[consumed..end]);
            Ok(Some((Reply::Bulk(Some(value)), end + 2)))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Ok(Some((Reply::Array(None), consumed)));
            }
            if count > MAX_ARRAY_LEN {
                return Err(PoolError::Protocol(format!("array length {count} exceeds limit")));
            }
            if depth >= MAX_DEPTH {
                return Err(PoolError::Protocol("arrays nested too deeply".to_string()));
            }
            let mut items = Vec::with_capacity(count.min(ARRAY_PREALLOC) as usize);
            let mut offset = consumed;
            for _ in 0..count {
                match parse_nested(&buf[offset..], depth + 1)? {
                    Some((item, used)) => {
                        items.push(item);
                        offset += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), offset)))
        }
        other => Err(PoolError::Protocol(format!(
            "unknown reply type byte 0x{other:02x}"
        ))),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_int(line: &str) -> Result<i64, PoolError> {
    line.parse()
        .map_err(|_| PoolError::Protocol(format!("invalid integer '{line}'")))
}
