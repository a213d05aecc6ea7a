//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! in-memory engine. Each connection carries its own selected database and
//! authentication state, like the real backend.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::engine::MemoryEngine;
use crate::protocol::{RespError, RespParser};

/// Shared server state handed to every connection.
pub struct ServerState {
    /// Backing store.
    pub engine: Arc<MemoryEngine>,
    /// Password required by `AUTH`, if any.
    pub password: Option<String>,
}

/// Per-connection state.
struct Session {
    db: usize,
    authenticated: bool,
}

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, state).await {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

/// Handles a single TCP client connection.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut session = Session {
        db: 0,
        authenticated: state.password.is_none(),
    };

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = dispatch_command(&args, &state, &mut session);
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    warn!("closing connection after malformed request");
                    stream.write_all(&resp_error("ERR protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn dispatch_command(args: &[Vec<u8>], state: &ServerState, session: &mut Session) -> Vec<u8> {
    let cmd = match args.first() {
        Some(cmd) => cmd.to_ascii_uppercase(),
        None => return resp_error("ERR empty command"),
    };

    if cmd == b"AUTH" {
        return handle_auth(args, state, session);
    }
    if !session.authenticated {
        return resp_error("NOAUTH Authentication required.");
    }

    let engine = state.engine.as_ref();
    match cmd.as_slice() {
        b"PING" => handle_ping(args),
        b"SELECT" => handle_select(args, engine, session),
        b"EXISTS" => handle_exists(args, engine, session),
        b"GET" => handle_get(args, engine, session),
        b"SET" => handle_set(args, engine, session),
        b"DEL" => handle_del(args, engine, session),
        b"KEYS" => handle_keys(args, engine, session),
        _ => resp_error("ERR unknown command"),
    }
}

fn handle_auth(args: &[Vec<u8>], state: &ServerState, session: &mut Session) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("auth");
    }
    match state.password.as_deref() {
        None => resp_error("ERR AUTH called without any password configured"),
        Some(password) if password.as_bytes() == args[1].as_slice() => {
            session.authenticated = true;
            resp_simple("OK")
        }
        Some(_) => {
            session.authenticated = false;
            resp_error("WRONGPASS invalid username-password pair")
        }
    }
}

fn handle_ping(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => wrong_arity("ping"),
    }
}

fn handle_select(args: &[Vec<u8>], engine: &MemoryEngine, session: &mut Session) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("select");
    }
    match parse_u64(&args[1]) {
        Some(db) if (db as usize) < engine.database_count() => {
            session.db = db as usize;
            resp_simple("OK")
        }
        Some(_) => resp_error("ERR DB index is out of range"),
        None => resp_error("ERR value is not an integer or out of range"),
    }
}

fn handle_exists(args: &[Vec<u8>], engine: &MemoryEngine, session: &Session) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("exists");
    }
    let mut count = 0i64;
    for key in &args[1..] {
        match engine.exists(session.db, key) {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(err) => return resp_error(&format!("ERR {err}")),
        }
    }
    resp_integer(count)
}

fn handle_get(args: &[Vec<u8>], engine: &MemoryEngine, session: &Session) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("get");
    }
    match engine.get(session.db, &args[1]) {
        Ok(Some(value)) => resp_bulk(&value),
        Ok(None) => resp_null(),
        Err(err) => resp_error(&format!("ERR {err}")),
    }
}

fn handle_set(args: &[Vec<u8>], engine: &MemoryEngine, session: &Session) -> Vec<u8> {
    if args.len() != 3 && args.len() != 5 {
        return if args.len() < 3 { wrong_arity("set") } else { resp_error("ERR syntax error") };
    }

    let ttl = if args.len() == 5 {
        let amount = match parse_u64(&args[4]) {
            Some(amount) if amount > 0 => amount,
            _ => return resp_error("ERR invalid expire time in 'set' command"),
        };
        match args[3].to_ascii_uppercase().as_slice() {
            b"EX" => Some(Duration::from_secs(amount)),
            b"PX" => Some(Duration::from_millis(amount)),
            _ => return resp_error("ERR syntax error"),
        }
    } else {
        None
    };

    match engine.set(session.db, args[1].clone(), args[2].clone(), ttl) {
        Ok(()) => resp_simple("OK"),
        Err(err) => resp_error(&format!("ERR {err}")),
    }
}

fn handle_del(args: &[Vec<u8>], engine: &MemoryEngine, session: &Session) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("del");
    }

    let mut removed = 0i64;
    for key in &args[1..] {
        match engine.delete(session.db, key) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => return resp_error(&format!("ERR {err}")),
        }
    }

    resp_integer(removed)
}

fn handle_keys(args: &[Vec<u8>], engine: &MemoryEngine, session: &Session) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("keys");
    }
    match engine.keys(session.db, &args[1]) {
        Ok(keys) => {
            let mut buf = format!("*{}\r\n", keys.len()).into_bytes();
            for key in keys {
                buf.extend_from_slice(&resp_bulk(&key));
            }
            buf
        }
        Err(err) => resp_error(&format!("ERR {err}")),
    }
}

fn wrong_arity(command: &str) -> Vec<u8> {
    resp_error(&format!("ERR wrong number of arguments for '{command}' command"))
}

fn resp_simple(message: &str) -> Vec<u8> {
    format!("+{message}\r\n").into_bytes()
}

fn resp_error(message: &str) -> Vec<u8> {
    format!("-{message}\r\n").into_bytes()
}

fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = format!("${}\r\n", data.len()).into_bytes();
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn parse_u64(arg: &[u8]) -> Option<u64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualClock;

    fn state(password: Option<&str>) -> (ServerState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let state = ServerState {
            engine: Arc::new(MemoryEngine::with_clock(clock.clone())),
            password: password.map(str::to_string),
        };
        (state, clock)
    }

    fn cmd(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.as_bytes().to_vec()).collect()
    }

    fn open_session() -> Session {
        Session { db: 0, authenticated: true }
    }

    #[test]
    fn set_with_expiry_then_get() {
        let (state, clock) = state(None);
        let mut session = open_session();
        assert_eq!(
            dispatch_command(&cmd(&["SET", "k", "v", "EX", "5"]), &state, &mut session),
            b"+OK\r\n"
        );
        assert_eq!(dispatch_command(&cmd(&["get", "k"]), &state, &mut session), b"$1\r\nv\r\n");
        assert_eq!(state.engine.ttl(0, b"k").unwrap(), Some(Some(Duration::from_secs(5))));

        clock.advance(Duration::from_secs(5));
        assert_eq!(dispatch_command(&cmd(&["GET", "k"]), &state, &mut session), b"$-1\r\n");
        assert_eq!(dispatch_command(&cmd(&["EXISTS", "k"]), &state, &mut session), b":0\r\n");
    }

    #[test]
    fn set_rejects_bad_expiry() {
        let (state, _) = state(None);
        let mut session = open_session();
        let reply = dispatch_command(&cmd(&["SET", "k", "v", "EX", "0"]), &state, &mut session);
        assert!(reply.starts_with(b"-ERR invalid expire time"));
        let reply = dispatch_command(&cmd(&["SET", "k", "v", "EX", "1.5"]), &state, &mut session);
        assert!(reply.starts_with(b"-ERR invalid expire time"));
    }

    #[test]
    fn auth_gates_commands() {
        let (state, _) = state(Some("secret"));
        let mut session = Session { db: 0, authenticated: false };
        assert!(dispatch_command(&cmd(&["PING"]), &state, &mut session).starts_with(b"-NOAUTH"));
        let reply = dispatch_command(&cmd(&["AUTH", "nope"]), &state, &mut session);
        assert!(reply.starts_with(b"-WRONGPASS"));
        assert_eq!(dispatch_command(&cmd(&["AUTH", "secret"]), &state, &mut session), b"+OK\r\n");
        assert_eq!(dispatch_command(&cmd(&["PING"]), &state, &mut session), b"+PONG\r\n");
    }

    #[test]
    fn select_switches_database() {
        let (state, _) = state(None);
        let mut session = open_session();
        dispatch_command(&cmd(&["SET", "k", "zero"]), &state, &mut session);
        assert_eq!(dispatch_command(&cmd(&["SELECT", "2"]), &state, &mut session), b"+OK\r\n");
        assert_eq!(dispatch_command(&cmd(&["GET", "k"]), &state, &mut session), b"$-1\r\n");
        let reply = dispatch_command(&cmd(&["SELECT", "16"]), &state, &mut session);
        assert!(reply.starts_with(b"-ERR DB index"));
        let reply = dispatch_command(&cmd(&["SELECT", "x"]), &state, &mut session);
        assert!(reply.starts_with(b"-ERR value"));
        assert_eq!(session.db, 2);
    }

    #[test]
    fn keys_and_del() {
        let (state, _) = state(None);
        let mut session = open_session();
        dispatch_command(&cmd(&["SET", "user:1", "a"]), &state, &mut session);
        assert_eq!(
            dispatch_command(&cmd(&["KEYS", "user:*"]), &state, &mut session),
            b"*1\r\n$6\r\nuser:1\r\n"
        );
        assert_eq!(
            dispatch_command(&cmd(&["DEL", "user:1", "user:2"]), &state, &mut session),
            b":1\r\n"
        );
        assert_eq!(dispatch_command(&cmd(&["KEYS", "*"]), &state, &mut session), b"*0\r\n");
    }
}
