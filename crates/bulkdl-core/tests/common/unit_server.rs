//! Minimal HTTP/1.1 server for integration tests.
//!
//! `GET /{index}` answers 200 with `body_for(index)`, or 500 when the index is
//! listed in `failing`. Anything else gets 404.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct UnitServerOptions {
    /// Indices that answer `500 Internal Server Error`.
    pub failing: HashSet<usize>,
    /// Delay before each response is written.
    pub delay: Duration,
}

/// Body served for unit `index`.
pub fn body_for(index: usize) -> Vec<u8> {
    format!("unit-{:04};", index).repeat(64).into_bytes()
}

/// Starts a server in a background thread. Returns a URL template such as
/// "http://127.0.0.1:12345/{index}". The server runs until the process exits.
pub fn start() -> String {
    start_with_options(UnitServerOptions::default())
}

pub fn start_with_options(opts: UnitServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let opts = Arc::new(opts);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let opts = Arc::clone(&opts);
            thread::spawn(move || handle(stream, &opts));
        }
    });
    format!("http://127.0.0.1:{}/{{index}}", port)
}

fn handle(mut stream: std::net::TcpStream, opts: &UnitServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    if !opts.delay.is_zero() {
        thread::sleep(opts.delay);
    }
    let (method, index) = parse_request(request);
    let (status, body) = match (method.eq_ignore_ascii_case("GET"), index) {
        (true, Some(i)) if opts.failing.contains(&i) => {
            ("500 Internal Server Error", b"boom".to_vec())
        }
        (true, Some(i)) => ("200 OK", body_for(i)),
        _ => ("404 Not Found", Vec::new()),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(&body);
}

/// Returns (method, unit index parsed from the request path).
fn parse_request(request: &str) -> (&str, Option<usize>) {
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let index = parts
        .next()
        .and_then(|path| path.trim_start_matches('/').split('?').next())
        .and_then(|s| s.parse::<usize>().ok());
    (method, index)
}
