//! Minimal HTTP/1.1 request reading and response writing over `TcpStream`.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
/// Oversized bodies are drained up to this many bytes before replying.
const MAX_DRAIN_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(|v| v.as_str())
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Request(HttpRequest),
    /// Declared body exceeded the limit; nothing was parsed beyond headers.
    BodyTooLarge { declared: usize },
}

pub fn read_request<S: Read>(stream: &mut S, max_body: usize) -> Result<ReadOutcome> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers completed"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES && find_header_end(&data).is_none() {
            return Err(anyhow!("request headers too large"));
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    let mut body = data[header_end + 4..].to_vec();
    if content_length > max_body {
        drain(stream, content_length.saturating_sub(body.len()).min(MAX_DRAIN_BYTES));
        return Ok(ReadOutcome::BodyTooLarge {
            declared: content_length,
        });
    }
    body.truncate(content_length);
    if body.len() < content_length {
        let start = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[start..])?;
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(ReadOutcome::Request(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body,
    }))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn drain<S: Read>(stream: &mut S, mut remaining: usize) {
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        match stream.read(&mut buf[..remaining.min(8192)]) {
            Ok(0) | Err(_) => break,
            Ok(n) => remaining -= n,
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

pub fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

pub fn write_json_response<W: Write>(stream: &mut W, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

pub fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line(status),
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

pub const MJPEG_BOUNDARY: &str = "frame";

pub fn write_multipart_header<W: Write>(stream: &mut W) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    stream.flush()?;
    Ok(())
}

pub fn write_multipart_jpeg<W: Write>(stream: &mut W, jpeg: &[u8]) -> Result<()> {
    let part = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    stream.write_all(part.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

pub fn set_timeouts(stream: &std::net::TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &[u8], max_body: usize) -> ReadOutcome {
        read_request(&mut Cursor::new(raw.to_vec()), max_body).unwrap()
    }

    #[test]
    fn parses_path_query_and_body() {
        let raw = b"POST /upload?limit=3&x HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello";
        let ReadOutcome::Request(req) = parse(raw, 100) else {
            panic!("expected request");
        };
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/upload");
        assert_eq!(req.query_param("limit"), Some("3"));
        assert_eq!(req.query_param("x"), Some(""));
        assert_eq!(req.headers.get("host").map(String::as_str), Some("a"));
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn oversized_body_is_flagged() {
        let raw = b"POST /upload HTTP/1.1\r\nContent-Length: 50\r\n\r\n0123456789";
        assert!(matches!(
            parse(raw, 10),
            ReadOutcome::BodyTooLarge { declared: 50 }
        ));
    }

    #[test]
    fn truncated_headers_are_errors() {
        assert!(read_request(&mut Cursor::new(b"GET / HTTP/1.1\r\n".to_vec()), 10).is_err());
    }

    #[test]
    fn response_has_length_and_status() {
        let mut out = Vec::new();
        write_json_response(&mut out, 413, r#"{"error":"x"}"#).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(text.contains("Content-Length: 13\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"error\":\"x\"}"));
    }
}
