//! Utility code to help writing octostats tests.
//!
//! A minimal blocking HTTP server runs on a background thread per test;
//! handlers are registered per (method, path) and every request is
//! recorded so tests can assert on what was (or was not) called.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// The callback type for HTTP route handlers.
pub type RequestCallback = Box<dyn Send + Fn(&Request) -> Response>;

/// A request received on the test server.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// The response the test server should send.
pub struct Response {
    pub code: u32,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(code: u32) -> Response {
        Response {
            code,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn json(value: serde_json::Value) -> Response {
        let mut resp = Response::new(200);
        resp.body = value.to_string().into_bytes();
        resp.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        resp
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }
}

type Handlers = Arc<Mutex<HashMap<(String, String), RequestCallback>>>;

pub struct TestServer {
    pub addr: String,
    handlers: Handlers,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl TestServer {
    pub fn spawn() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let handlers: Handlers = Arc::default();
        let requests: Arc<Mutex<Vec<Request>>> = Arc::default();

        let thread_handlers = handlers.clone();
        let thread_requests = requests.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                handle_connection(stream, &thread_handlers, &thread_requests);
            }
        });

        TestServer {
            addr,
            handlers,
            requests,
        }
    }

    /// Registers a handler for `(method, path)`; the path has no query.
    pub fn handle(
        &self,
        method: &str,
        path: &str,
        callback: impl Send + Fn(&Request) -> Response + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), Box::new(callback));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

fn handle_connection(stream: TcpStream, handlers: &Handlers, requests: &Arc<Mutex<Vec<Request>>>) {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    if reader.read_line(&mut line).is_err() || line.is_empty() {
        return;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target, String::new()),
    };

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).is_err() {
            return;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    if length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let request = Request {
        method: method.clone(),
        path: path.clone(),
        query,
        headers,
        body,
    };
    requests.lock().unwrap().push(request.clone());

    let response = match handlers.lock().unwrap().get(&(method, path)) {
        Some(callback) => callback(&request),
        None => Response::new(404).body(b"{\"message\": \"Not Found\"}"),
    };

    let mut out = format!("HTTP/1.1 {} X\r\n", response.code);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    out.push_str("Connection: close\r\n\r\n");

    let mut stream = reader.into_inner();
    let _ = stream.write_all(out.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

/// Serialises tests that point `GITHUB_API_URL` at their own server.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Points the GitHub client at a test server for the guard's lifetime.
pub fn point_github_at(server: &TestServer) -> MutexGuard<'static, ()> {
    let guard = env_lock();
    unsafe {
        std::env::set_var("GITHUB_API_URL", &server.addr);
        std::env::set_var("GITHUB_GRAPHQL_API_URL", format!("{}/graphql", server.addr));
    }
    guard
}

pub fn temp_db(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("octostats-it-{name}-{}.db", uuid::Uuid::new_v4()))
}
