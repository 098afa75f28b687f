//! Minimal HTTP/1.1 JSON server exposing the chat endpoints.
//!
//! | Method | Path                        | Body                                       |
//! |--------|-----------------------------|--------------------------------------------|
//! | GET    | `/api/messages/get?roomId=` |                                            |
//! | POST   | `/api/messages/send`        | `{content, userName, roomId, replyToId?}`  |
//! | POST   | `/api/room/check`           | `{code}`                                   |
//! | POST   | `/api/room/create`          | `{code}`                                   |
//!
//! One request per connection (`Connection: close`).

use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::TextifyError;
use crate::models::{ErrorBody, RoomCodeRequest, SendMessageRequest};
use crate::providers::ModelBackend;
use crate::service::ChatService;

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 32;

/// Simple percent-decoding for URL query parameters.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A parsed request: method, path, query parameters and raw body.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!(error = %e, "response serialization failed");
                Self::error(500, "Internal server error")
            }
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::to_string(&ErrorBody {
            error: message.to_string(),
        })
        .unwrap_or_else(|_| "{}".to_string());
        Self { status, body }
    }

    /// Serialize status line, headers and body.
    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason_phrase(self.status),
            self.body.len(),
            self.body,
        )
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

/// Map a service error to a response; server-side failures get `fallback`.
fn failure(err: TextifyError, fallback: &str) -> Response {
    if err.is_client_error() {
        Response::error(err.status_code(), &err.to_string())
    } else {
        error!(error = %err, "{}", fallback);
        Response::error(500, fallback)
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Dispatch one request to the chat service.
pub async fn route<B: ModelBackend>(service: &ChatService<B>, req: &Request) -> Response {
    let expected = match req.path.as_str() {
        "/api/messages/get" => "GET",
        "/api/messages/send" | "/api/room/check" | "/api/room/create" => "POST",
        _ => return Response::error(404, "Not found"),
    };
    if req.method != expected {
        return Response::error(405, "Method not allowed");
    }

    match req.path.as_str() {
        "/api/messages/get" => {
            let room_id = req.query.get("roomId").map(String::as_str).unwrap_or("");
            match service.get_messages(room_id) {
                Ok(messages) => Response::json(200, &messages),
                Err(e) => failure(e, "Failed to fetch messages"),
            }
        }
        "/api/messages/send" => {
            let body: SendMessageRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(_) => return Response::error(400, "Invalid JSON body"),
            };
            match service.send_message(&body).await {
                Ok(resp) => Response::json(201, &resp),
                Err(e) => failure(e, "Failed to send message"),
            }
        }
        "/api/room/check" => {
            let body: RoomCodeRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(_) => return Response::error(400, "Invalid JSON body"),
            };
            match service.check_room(&body.code) {
                Ok(resp) => Response::json(200, &resp),
                Err(e) => failure(e, "Failed to check room"),
            }
        }
        _ => {
            let body: RoomCodeRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(_) => return Response::error(400, "Invalid JSON body"),
            };
            match service.create_room(&body.code) {
                Ok(room) => Response::json(201, &room),
                Err(e) => failure(e, "Failed to create room"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ReadError {
    Io(std::io::Error),
    Malformed(&'static str),
    TooLarge,
    Closed,
}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}

/// Read one request from `stream`: head via `httparse`, body up to `Content-Length`.
async fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<Request, ReadError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ReadError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);
        let head_len = match parsed.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(ReadError::TooLarge);
                }
                continue;
            }
            Err(_) => return Err(ReadError::Malformed("invalid request head")),
        };

        let method = parsed.method.unwrap_or("").to_string();
        let target = parsed.path.unwrap_or("/");
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), parse_query(q)),
            None => (target.to_string(), HashMap::new()),
        };
        let content_length = parsed
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-length"))
            .map(|h| {
                std::str::from_utf8(h.value)
                    .ok()
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .ok_or(ReadError::Malformed("invalid content-length"))
            })
            .transpose()?
            .unwrap_or(0);
        if content_length > max_body {
            return Err(ReadError::TooLarge);
        }

        let mut body = buf.split_off(head_len);
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ReadError::Malformed("body shorter than content-length"));
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(content_length);

        return Ok(Request {
            method,
            path,
            query,
            body,
        });
    }
}

async fn handle_connection<B: ModelBackend>(
    mut stream: TcpStream,
    service: Arc<ChatService<B>>,
    max_body: usize,
) -> std::io::Result<()> {
    let response = match read_request(&mut stream, max_body).await {
        Ok(req) => {
            debug!(method = %req.method, path = %req.path, "request");
            route(&service, &req).await
        }
        Err(ReadError::Closed) => return Ok(()),
        Err(ReadError::Io(e)) => return Err(e),
        Err(ReadError::TooLarge) => Response::error(413, "Request too large"),
        Err(ReadError::Malformed(why)) => Response::error(400, why),
    };
    stream.write_all(response.to_http().as_bytes()).await?;
    stream.shutdown().await
}

/// A bound, not yet running, HTTP server.
pub struct Server {
    listener: TcpListener,
    max_body: usize,
}

impl Server {
    pub async fn bind(addr: &str, max_body: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, max_body })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection.
    pub async fn run<B: ModelBackend + 'static>(self, service: Arc<ChatService<B>>) -> std::io::Result<()> {
        info!(addr = %self.local_addr()?, "textify server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let service = Arc::clone(&service);
            let max_body = self.max_body;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, service, max_body).await {
                    warn!(peer = %peer, error = %e, "connection error");
                }
            });
        }
    }
}
