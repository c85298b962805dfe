//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves several routes, each with its own body and behaviour: HEAD with
//! Content-Length and Accept-Ranges, Range GET with 206 Partial Content,
//! ranges disabled, HEAD refused, a stalled body, or a number of initial 503s.
//! Unknown paths get 404.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RouteOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Send half the body, then sleep this long before the rest.
    pub stall: Option<Duration>,
    /// Answer this many GETs with 503 before serving normally.
    pub fail_first: u32,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            stall: None,
            fail_first: 0,
        }
    }
}

/// Request counters per route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hits {
    pub head: u32,
    pub get: u32,
    pub range_get: u32,
}

struct Route {
    body: Arc<Vec<u8>>,
    opts: RouteOptions,
    hits: Hits,
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;

/// GET bodies currently being served, the most ever served at once, and the
/// order GETs arrived in. A GET stops counting just before its last bytes
/// are written, so a client can never have finished a body that is still
/// counted here.
#[derive(Default)]
struct Gets {
    open: AtomicUsize,
    peak: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl Gets {
    fn enter(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TestServer {
    base: String,
    routes: Routes,
    gets: Arc<Gets>,
}

impl TestServer {
    /// Starts a server in a background thread. It runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let gets = Arc::new(Gets::default());
        let shared = Arc::clone(&routes);
        let shared_gets = Arc::clone(&gets);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&shared);
                let gets = Arc::clone(&shared_gets);
                thread::spawn(move || handle(stream, &routes, &gets));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{port}"),
            routes,
            gets,
        }
    }

    /// Serve `body` at `path` with default behaviour.
    pub fn serve(&self, path: &str, body: Vec<u8>) -> String {
        self.serve_with(path, body, RouteOptions::default())
    }

    pub fn serve_with(&self, path: &str, body: Vec<u8>, opts: RouteOptions) -> String {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                body: Arc::new(body),
                opts,
                hits: Hits::default(),
            },
        );
        self.url(path)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> Hits {
        self.routes
            .lock()
            .unwrap()
            .get(path)
            .map(|r| r.hits)
            .unwrap_or_default()
    }

    /// GET bodies being served right now, across all routes.
    pub fn open_gets(&self) -> usize {
        self.gets.open.load(Ordering::SeqCst)
    }

    /// Most GET bodies ever served at the same time.
    pub fn peak_open_gets(&self) -> usize {
        self.gets.peak.load(Ordering::SeqCst)
    }

    /// Paths of successful GETs in arrival order.
    pub fn get_order(&self) -> Vec<String> {
        self.gets.order.lock().unwrap().clone()
    }
}

fn handle(mut stream: TcpStream, routes: &Routes, gets: &Gets) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(30)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, path, range) = parse_request(request);

    // Decide under the lock, write without it.
    let (body, opts, fail) = {
        let mut routes = routes.lock().unwrap();
        let Some(route) = routes.get_mut(path) else {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            return;
        };
        let is_head = method.eq_ignore_ascii_case("HEAD");
        if is_head {
            route.hits.head += 1;
        } else if range.is_some() && route.opts.support_ranges {
            route.hits.range_get += 1;
        } else {
            route.hits.get += 1;
        }
        let fail = !is_head && route.opts.fail_first > 0;
        if fail {
            route.opts.fail_first -= 1;
        }
        (Arc::clone(&route.body), route.opts, fail)
    };

    let total = body.len() as u64;
    let accept_ranges = if opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}Connection: close\r\n\r\n"
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }
    if fail {
        let _ = stream.write_all(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let (status, content_range, slice): (&str, Option<String>, &[u8]) =
        match range.filter(|_| opts.support_ranges) {
            Some((start, end_incl)) => {
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl || start >= total {
                    ("416 Range Not Satisfiable", Some(format!("bytes */{total}")), &body[0..0])
                } else {
                    let slice = &body[start as usize..=end_incl as usize];
                    (
                        "206 Partial Content",
                        Some(format!("bytes {start}-{end_incl}/{total}")),
                        slice,
                    )
                }
            }
            None => ("200 OK", None, &body[..]),
        };
    let content_range = content_range
        .map(|v| format!("Content-Range: {v}\r\n"))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{content_range}{accept_ranges}Connection: close\r\n\r\n",
        slice.len()
    );
    gets.order.lock().unwrap().push(path.to_string());
    gets.enter();
    if stream.write_all(response.as_bytes()).is_err() {
        gets.leave();
        return;
    }
    match opts.stall {
        Some(stall) => {
            let half = slice.len() / 2;
            let _ = stream.write_all(&slice[..half]);
            let _ = stream.flush();
            thread::sleep(stall);
            gets.leave();
            let _ = stream.write_all(&slice[half..]);
        }
        None => {
            gets.leave();
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, path, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, &str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("");
    let path = first.next().unwrap_or("/");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(part) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = part.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end_incl = b.trim().parse::<u64>().unwrap_or(u64::MAX);
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, path, range)
}
