#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use kira_geoextent::config::Settings;

#[derive(Clone)]
struct Route {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
}

/// Minimal HTTP/1.1 server on an ephemeral port. Routes match the request
/// target exactly (path plus query); unknown targets get 404.
pub struct FixtureServer {
    port: u16,
    state: Arc<Mutex<State>>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let state = shared.clone();
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self { port, state }
    }

    pub fn base(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn url(&self, target: &str) -> String {
        format!("{}{target}", self.base())
    }

    pub fn route(&self, target: &str, status: u16, content_type: &str, body: impl Into<Vec<u8>>) {
        self.state.lock().unwrap().routes.insert(
            target.to_string(),
            Route {
                status,
                content_type: content_type.to_string(),
                body: body.into(),
            },
        );
    }

    pub fn json(&self, target: &str, body: &serde_json::Value) {
        self.route(target, 200, "application/json", body.to_string());
    }

    pub fn html(&self, target: &str, body: &str) {
        self.route(target, 200, "text/html", body);
    }

    pub fn bytes(&self, target: &str, body: Vec<u8>) {
        self.route(target, 200, "application/octet-stream", body);
    }

    pub fn hits(&self, target: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(target)
            .copied()
            .unwrap_or(0)
    }
}

fn handle(stream: TcpStream, state: &Mutex<State>) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => continue,
            Err(_) => return,
        }
    }
    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let route = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(target.clone()).or_default() += 1;
        state.routes.get(&target).cloned()
    };
    let route = route.unwrap_or(Route {
        status: 404,
        content_type: "text/plain".to_string(),
        body: b"not found".to_vec(),
    });
    let reason = match route.status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Status",
    };
    let mut stream = reader.into_inner();
    let head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        route.status,
        route.content_type,
        route.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&route.body);
    let _ = stream.flush();
}

/// Settings with every default endpoint kept, no retries and the DOI handle
/// API pointed at the fixture.
pub fn settings_for(server: &FixtureServer) -> Settings {
    let mut settings = Settings::default();
    settings.max_retries = 0;
    settings.timeout_secs = 10;
    settings.endpoints.doi_handle_api = server.url("/api/handles");
    settings.endpoints.zenodo.api = server.url("/api");
    settings.endpoints.zenodo.hosts = vec![server.host()];
    settings
}
