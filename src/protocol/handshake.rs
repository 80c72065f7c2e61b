//! Opening handshake
//!
//! Extracts the client's `Sec-WebSocket-Key`, derives the accept key and
//! renders the `101 Switching Protocols` response.

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::bytes::Regex;
use sha1::{Digest, Sha1};
use std::sync::OnceLock;

use crate::protocol::error::{ProtocolError, ProtocolResult};

/// RFC 6455 handshake GUID appended to the client key
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default cap on the buffered request head
pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 8192;

/// Response written when the request carries no usable key
pub const BAD_REQUEST_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)Sec-WebSocket-Key: *(.*?)\r\n").expect("static pattern is valid")
    })
}

/// Length of the request head including the blank line, once fully buffered
pub fn request_head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Pull the `Sec-WebSocket-Key` value out of a raw request head
pub fn extract_key(request: &[u8]) -> ProtocolResult<String> {
    let captures = key_pattern()
        .captures(request)
        .ok_or(ProtocolError::MissingKey)?;
    let key = captures
        .get(1)
        .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string())
        .unwrap_or_default();

    if key.is_empty() {
        return Err(ProtocolError::MissingKey);
    }
    Ok(key)
}

/// `base64(SHA1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// Render the upgrade response for a given accept key
pub fn upgrade_response(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key
    )
}

/// Validate a request head and produce the full upgrade response
pub fn negotiate(request: &[u8]) -> ProtocolResult<String> {
    let key = extract_key(request)?;
    Ok(upgrade_response(&accept_key(&key)))
}

/// Render a client upgrade request, used by the client binary and tests
pub fn client_request(host: &str, key: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        host, key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_extract_key() {
        let request = client_request("localhost:8080", SAMPLE_KEY);
        assert_eq!(extract_key(request.as_bytes()).unwrap(), SAMPLE_KEY);
    }

    #[test]
    fn test_extract_key_case_insensitive_header() {
        let request = format!("GET / HTTP/1.1\r\nsec-websocket-key:   {}\r\n\r\n", SAMPLE_KEY);
        assert_eq!(extract_key(request.as_bytes()).unwrap(), SAMPLE_KEY);
    }

    #[test]
    fn test_missing_key() {
        let request = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(extract_key(request), Err(ProtocolError::MissingKey));

        let request = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: \r\n\r\n";
        assert_eq!(extract_key(request), Err(ProtocolError::MissingKey));
    }

    #[test]
    fn test_upgrade_response_shape() {
        let response = negotiate(client_request("h", SAMPLE_KEY).as_bytes()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(response.ends_with("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"));
    }

    #[test]
    fn test_request_head_len() {
        assert_eq!(request_head_len(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);

        let mut buf = client_request("h", SAMPLE_KEY).into_bytes();
        let head = buf.len();
        buf.extend_from_slice(&[0x81, 0x80]);
        assert_eq!(request_head_len(&buf), Some(head));
    }
}
