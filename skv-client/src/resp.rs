//! # RESP2 Framing
//!
//! Purpose: Frame outgoing commands and read server replies for the session
//! client. Only the reply shapes the driver consumes are interpreted; anything
//! else is surfaced as a protocol error.
//!
//! ## Design Principles
//! 1. **Caller-Owned Buffers**: The connection keeps its line buffer across calls.
//! 2. **Binary-Safe**: Bulk payloads are raw bytes, never assumed UTF-8.
//! 3. **Fail Fast**: Broken framing poisons the connection instead of resyncing.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// A single RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`, `+PONG`.
    Simple(Vec<u8>),
    /// `-ERR ...`, `-WRONGPASS ...`.
    Error(Vec<u8>),
    /// `:1`.
    Integer(i64),
    /// `$n` payload, `None` for the `$-1` nil reply.
    Bulk(Option<Vec<u8>>),
    /// `*n` reply, e.g. the result of `KEYS`.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Converts an error reply into `ClientError::Server`, passing other
    /// replies through untouched.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            other => Ok(other),
        }
    }
}

/// Appends `args` to `out` as a RESP2 array of bulk strings.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    write_header(out, b'*', args.len());
    for arg in args {
        write_header(out, b'$', arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one complete reply, recursing into arrays.
pub fn read_response<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line)?;
    let (&tag, body) = line.split_first().ok_or(ClientError::Protocol)?;

    match tag {
        b'+' => Ok(RespValue::Simple(body.to_vec())),
        b'-' => Ok(RespValue::Error(body.to_vec())),
        b':' => parse_i64(body).map(RespValue::Integer),
        b'$' => {
            let len = parse_i64(body)?;
            read_bulk(reader, len).map(RespValue::Bulk)
        }
        b'*' => {
            let len = parse_i64(body)?;
            let mut items = Vec::with_capacity(len.max(0) as usize);
            for _ in 0..len.max(0) {
                items.push(read_response(reader, line)?);
            }
            Ok(RespValue::Array(items))
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<Option<Vec<u8>>> {
    if len < 0 {
        return Ok(None);
    }

    // Payload plus trailing CRLF in one read.
    let mut data = vec![0u8; len as usize + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    data.truncate(len as usize);
    Ok(Some(data))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        // Peer closed the socket between replies.
        return Err(ClientError::Protocol);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

fn write_header(out: &mut Vec<u8>, tag: u8, len: usize) {
    out.push(tag);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}
