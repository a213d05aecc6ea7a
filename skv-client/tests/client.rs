use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use skv_client::{ClientError, KVClient, PoolConfig};

type Handler = fn(usize, Vec<Vec<u8>>, &mut TcpStream);

/// Serves each scripted connection in turn: accept, answer `commands`
/// requests through `handler`, then hang up.
fn spawn_server(script: Vec<(usize, Handler)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        for (commands, handler) in script {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            for idx in 0..commands {
                let args = read_command(&mut reader).expect("read command");
                handler(idx, args, &mut stream);
            }
        }
    });

    addr
}

fn script(commands: usize, handler: Handler) -> (usize, Handler) {
    (commands, handler)
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn write_raw(stream: &mut TcpStream, raw: &[u8]) {
    let _ = stream.write_all(raw);
    let _ = stream.flush();
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut buf = format!("${}\r\n", data.len()).into_bytes();
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    write_raw(stream, &buf);
}

fn config_for(addr: String) -> PoolConfig {
    PoolConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..PoolConfig::default()
    }
}

#[test]
fn set_with_ttl_sends_expiry_in_same_command() {
    let addr = spawn_server(vec![script(2, |idx, args, stream| {
        if idx == 0 {
            let expected: Vec<Vec<u8>> =
                [&b"SET"[..], b"k", b"dg==", b"EX", b"30"].iter().map(|arg| arg.to_vec()).collect();
            assert_eq!(args, expected);
            write_raw(stream, b"+OK\r\n");
        } else {
            assert_eq!(args, vec![b"GET".to_vec(), b"k".to_vec()]);
            write_bulk(stream, b"dg==");
        }
    })]);

    let client = KVClient::with_config(config_for(addr));
    client.set(b"k", b"dg==", Some(Duration::from_secs(30))).expect("set");
    assert_eq!(client.get(b"k").expect("get"), Some(b"dg==".to_vec()));
}

#[test]
fn zero_ttl_and_sub_second_ttl() {
    let addr = spawn_server(vec![script(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args.len(), 3);
        } else {
            assert_eq!(args[3], b"EX");
            assert_eq!(args[4], b"1");
        }
        write_raw(stream, b"+OK\r\n");
    })]);

    let client = KVClient::with_config(config_for(addr));
    client.set(b"k", b"v", Some(Duration::ZERO)).expect("set without expiry");
    client.set(b"k", b"v", Some(Duration::from_millis(200))).expect("set rounded");
}

#[test]
fn handshake_authenticates_then_selects() {
    let addr = spawn_server(vec![script(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"AUTH".to_vec(), b"secret".to_vec()]);
            write_raw(stream, b"+OK\r\n");
        }
        1 => {
            assert_eq!(args, vec![b"SELECT".to_vec(), b"3".to_vec()]);
            write_raw(stream, b"+OK\r\n");
        }
        _ => {
            assert_eq!(args[0], b"EXISTS");
            write_raw(stream, b":1\r\n");
        }
    })]);

    let mut config = config_for(addr);
    config.password = Some("secret".to_string());
    config.database = Some("3".to_string());
    let client = KVClient::with_config(config);
    assert!(client.exists(b"k").expect("exists"));
}

#[test]
fn rejected_auth_fails_the_connection() {
    let addr = spawn_server(vec![script(1, |_, args, stream| {
        assert_eq!(args[0], b"AUTH");
        write_raw(stream, b"-WRONGPASS invalid password\r\n");
    })]);

    let mut config = config_for(addr);
    config.password = Some("wrong".to_string());
    let client = KVClient::with_config(config);

    let err = client.ping().expect_err("auth must fail");
    assert!(matches!(err, ClientError::Auth { .. }));
    assert_eq!(client.stats().total, 0);
}

#[test]
fn rejected_select_fails_the_connection() {
    let addr = spawn_server(vec![script(1, |_, args, stream| {
        assert_eq!(args[0], b"SELECT");
        write_raw(stream, b"-ERR DB index is out of range\r\n");
    })]);

    let mut config = config_for(addr);
    config.database = Some("99".to_string());
    let client = KVClient::with_config(config);

    assert!(matches!(client.ping(), Err(ClientError::Select { .. })));
}

#[test]
fn fresh_idle_connection_is_reused_without_probe() {
    let addr = spawn_server(vec![script(2, |_, args, stream| {
        assert_eq!(args[0], b"GET");
        write_raw(stream, b"$-1\r\n");
    })]);

    let client = KVClient::with_config(config_for(addr));
    assert_eq!(client.get(b"a").expect("first get"), None);
    assert_eq!(client.get(b"b").expect("second get"), None);
}

#[test]
fn stale_idle_connection_is_probed_before_reuse() {
    let addr = spawn_server(vec![script(3, |idx, args, stream| match idx {
        1 => {
            assert_eq!(args[0], b"PING");
            write_raw(stream, b"+PONG\r\n");
        }
        _ => {
            assert_eq!(args[0], b"GET");
            write_raw(stream, b"$-1\r\n");
        }
    })]);

    let mut config = config_for(addr);
    config.freshness = Duration::ZERO;
    let client = KVClient::with_config(config);
    assert_eq!(client.get(b"a").expect("first get"), None);
    assert_eq!(client.get(b"b").expect("second get"), None);
}

#[test]
fn failed_probe_redials_transparently() {
    // First connection answers once and hangs up; second serves the retry.
    let addr = spawn_server(vec![
        script(1, |_, _, stream| write_bulk(stream, b"first")),
        script(1, |_, args, stream| {
            assert_eq!(args[0], b"GET");
            write_bulk(stream, b"second");
        }),
    ]);

    let mut config = config_for(addr);
    config.freshness = Duration::ZERO;
    let client = KVClient::with_config(config);

    assert_eq!(client.get(b"k").expect("first"), Some(b"first".to_vec()));
    // Give the scripted server time to close the first socket.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(client.get(b"k").expect("second"), Some(b"second".to_vec()));
    assert_eq!(client.stats().total, 1);
}

#[test]
fn keys_and_delete() {
    let addr = spawn_server(vec![script(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args, vec![b"KEYS".to_vec(), b"user:*".to_vec()]);
            write_raw(stream, b"*2\r\n$6\r\nuser:1\r\n$6\r\nuser:2\r\n");
        } else {
            assert_eq!(args, vec![b"DEL".to_vec(), b"user:1".to_vec()]);
            write_raw(stream, b":1\r\n");
        }
    })]);

    let client = KVClient::with_config(config_for(addr));
    let keys = client.keys(b"user:*").expect("keys");
    assert_eq!(keys, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
    assert!(client.delete(b"user:1").expect("delete"));
}

#[test]
fn server_error_keeps_connection_pooled() {
    let addr = spawn_server(vec![script(2, |idx, _, stream| {
        if idx == 0 {
            write_raw(
                stream,
                b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
            );
        } else {
            write_raw(stream, b"+PONG\r\n");
        }
    })]);

    let client = KVClient::with_config(config_for(addr));
    assert!(matches!(client.get(b"list"), Err(ClientError::Server { .. })));
    assert_eq!(client.stats().idle, 1);
    client.ping().expect("same connection still usable");
}
