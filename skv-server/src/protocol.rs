//! # Request Parsing
//!
//! Incremental RESP2 request parser: clients send every command as an array
//! of bulk strings, which may arrive split across any number of reads.

use bytes::{Buf, BytesMut};

/// Largest argument count accepted in one command.
const MAX_ARGS: usize = 1024 * 1024;
/// Largest single argument, matching Redis' `proto-max-bulk-len` default.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Parser failure. The connection is answered with an error and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RespError {
    /// Framing that no amount of extra input can fix.
    #[error("protocol error")]
    Protocol,
}

/// Stateless between calls; the buffer carries all progress.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    /// Creates a parser.
    pub fn new() -> Self {
        RespParser
    }

    /// Takes one complete command off the front of `buffer`.
    ///
    /// Returns `Ok(None)` and leaves the buffer untouched when more bytes are
    /// needed.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut cursor = 0;

        let count = match read_header(buffer, &mut cursor, b'*')? {
            Some(count) if count <= MAX_ARGS => count,
            Some(_) => return Err(RespError::Protocol),
            None => return Ok(None),
        };

        let mut args = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let len = match read_header(buffer, &mut cursor, b'$')? {
                Some(len) if len <= MAX_BULK_LEN => len,
                Some(_) => return Err(RespError::Protocol),
                None => return Ok(None),
            };
            let end = cursor.checked_add(len).ok_or(RespError::Protocol)?;
            if buffer.len() < end + 2 {
                return Ok(None);
            }
            if &buffer[end..end + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            args.push(buffer[cursor..end].to_vec());
            cursor = end + 2;
        }

        buffer.advance(cursor);
        Ok(Some(args))
    }
}

/// Reads a `<tag><digits>\r\n` line starting at `cursor`.
fn read_header(buffer: &[u8], cursor: &mut usize, tag: u8) -> Result<Option<usize>, RespError> {
    let rest = &buffer[*cursor..];
    let first = match rest.first() {
        Some(&first) => first,
        None => return Ok(None),
    };
    if first != tag {
        return Err(RespError::Protocol);
    }

    let end = match rest.windows(2).position(|window| window == b"\r\n") {
        Some(end) => end,
        None => return Ok(None),
    };

    let digits = &rest[1..end];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(RespError::Protocol);
    }
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(RespError::Protocol)?;

    *cursor += end + 2;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_command() {
        let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]);
        let args = RespParser::new().parse(&mut buffer).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"k".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn waits_for_partial_input() {
        let mut parser = RespParser::new();
        let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r"[..]);
        assert_eq!(parser.parse(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), 16);

        buffer.extend_from_slice(b"\nk\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            parser.parse(&mut buffer).unwrap(),
            Some(vec![b"GET".to_vec(), b"k".to_vec()])
        );
        assert_eq!(parser.parse(&mut buffer).unwrap(), Some(vec![b"PING".to_vec()]));
    }

    #[test]
    fn rejects_inline_commands() {
        let mut buffer = BytesMut::from(&b"PING\r\n"[..]);
        assert_eq!(RespParser::new().parse(&mut buffer), Err(RespError::Protocol));
    }

    #[test]
    fn rejects_oversized_headers() {
        let mut parser = RespParser::new();
        let mut buffer = BytesMut::from(&b"*99999999999999\r\n"[..]);
        assert_eq!(parser.parse(&mut buffer), Err(RespError::Protocol));

        let mut buffer = BytesMut::from(&b"*1\r\n$18446744073709551615\r\n"[..]);
        assert_eq!(parser.parse(&mut buffer), Err(RespError::Protocol));

        let mut buffer = BytesMut::from(&b"*1\r\n$999999999999\r\nk\r\n"[..]);
        assert_eq!(parser.parse(&mut buffer), Err(RespError::Protocol));
    }
}
