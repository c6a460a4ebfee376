//! Scripted in-process database server for integration tests.
//!
//! Each accepted connection consumes the next script entry. Requests are
//! captured as they arrive so tests can assert on what the client sent.

#![allow(dead_code)]

use dms_engine::command::Database;
use dms_engine::config::ConnectionConfig;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Captured {
    pub head: String,
    pub body: Vec<u8>,
    /// Body length announced by the client
    pub declared_length: usize,
}

impl Captured {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn method(&self) -> &str {
        self.request_line().split(' ').next().unwrap_or_default()
    }

    pub fn target(&self) -> &str {
        self.request_line().split(' ').nth(1).unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Last path segment before the query, e.g. the document id.
    pub fn last_segment(&self) -> &str {
        let path = self.target().split('?').next().unwrap_or_default();
        path.rsplit('/').next().unwrap_or_default()
    }
}

pub enum Reply {
    Json(u16, Value),
    Bytes {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Raw response bytes, written verbatim
    Raw(Vec<u8>),
    /// Build the reply from the captured request
    Echo(fn(&Captured) -> Reply),
    /// Read this many body bytes, then close without answering
    DropAfter(usize),
    /// Read the request, then hold the connection open in silence
    Stall,
}

pub struct ScriptedServer {
    port: u16,
    captured: Arc<Mutex<Vec<Captured>>>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&captured);

        let task = tokio::spawn(async move {
            for reply in script {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                serve(stream, reply, &log).await;
            }
        });

        Self {
            port,
            captured,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self, name: &str) -> Database {
        Database::new("127.0.0.1", self.port, name).unwrap()
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Short timeouts so stall tests finish quickly.
pub fn fast_connection() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_timeouts(Duration::from_millis(300), Duration::from_millis(300))
        .with_buffer_sizes(64 * 1024, 64 * 1024)
}

async fn serve(mut stream: TcpStream, reply: Reply, log: &Mutex<Vec<Captured>>) {
    let limit = match reply {
        Reply::DropAfter(n) => Some(n),
        _ => None,
    };
    let Some(request) = read_request(&mut stream, limit).await else {
        return;
    };
    log.lock().unwrap().push(request.clone());

    let reply = match reply {
        Reply::Echo(build) => build(&request),
        reply => reply,
    };
    match reply {
        Reply::DropAfter(_) => drop(stream),
        Reply::Stall => {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(stream);
            });
        }
        reply => {
            let _ = stream.write_all(&encode(reply)).await;
            let _ = stream.shutdown().await;
        }
    }
}

async fn read_request(stream: &mut TcpStream, limit: Option<usize>) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut captured = Captured {
        head,
        body: buf[head_end..].to_vec(),
        declared_length: 0,
    };
    captured.declared_length = captured
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let wanted = limit
        .unwrap_or(captured.declared_length)
        .min(captured.declared_length);
    while captured.body.len() < wanted {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        captured.body.extend_from_slice(&chunk[..n]);
    }
    Some(captured)
}

fn encode(reply: Reply) -> Vec<u8> {
    let (status, content_type, body) = match reply {
        Reply::Json(status, value) => (status, "application/json", value.to_string().into_bytes()),
        Reply::Bytes {
            status,
            content_type,
            body,
        } => (status, content_type, body),
        Reply::Raw(bytes) => return bytes,
        Reply::Echo(_) | Reply::DropAfter(_) | Reply::Stall => unreachable!(),
    };
    let reason = match status {
        200 => "OK",
        201 => "Created",
        404 => "Object Not Found",
        409 => "Conflict",
        _ => "Status",
    };
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nServer: scripted\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(&body);
    out
}

/// `{"ok":true,"id":..,"rev":..}` for the id in the request path.
pub fn put_ok(request: &Captured) -> Reply {
    let id = request.last_segment().to_string();
    Reply::Json(201, serde_json::json!({"ok": true, "id": id, "rev": "1-aaa"}))
}

/// Write confirmation for an attachment PUT (`/{db}/{id}/{name}`).
pub fn attachment_ok(request: &Captured) -> Reply {
    let path = request.target().split('?').next().unwrap_or_default();
    let mut segments = path.rsplit('/');
    let _name = segments.next();
    let id = segments.next().unwrap_or_default().to_string();
    Reply::Json(201, serde_json::json!({"ok": true, "id": id, "rev": "2-bbb"}))
}
