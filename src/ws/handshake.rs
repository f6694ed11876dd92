//! Upgrade handshake validation and the Sec-WebSocket-Accept computation
//! (§4.4, RFC 6455 §1.3).

use std::fmt;

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::http1::Request;

/// The fixed GUID RFC 6455 appends to the client's nonce before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Everything needed to answer an upgrade request.
pub struct HandshakeInfo {
    pub accept_key: String,
    pub sub_protocol: Option<String>,
}

/// Why [`validate`] rejected a request, distinguishing the one case
/// (§4.4) that maps to `426` instead of the default `400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// A required header was missing or malformed.
    BadRequest(&'static str),
    /// `Sec-WebSocket-Version` was present but not `13`.
    UnsupportedVersion,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::BadRequest(why) => write!(f, "invalid websocket upgrade: {why}"),
            HandshakeError::UnsupportedVersion => {
                write!(f, "unsupported Sec-WebSocket-Version")
            }
        }
    }
}

/// Validates that `req` is a well-formed WebSocket upgrade request and
/// computes the response's `Sec-WebSocket-Accept` value. Sub-protocol
/// negotiation just echoes the first client-offered protocol back, if any
/// (§4.4 leaves negotiation policy to the handler; this is the default).
pub fn validate(req: &Request) -> Result<HandshakeInfo, HandshakeError> {
    let upgrade_ok = req
        .header("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(HandshakeError::BadRequest("missing Upgrade: websocket"));
    }

    let connection_ok = req
        .header("connection")
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    if !connection_ok {
        return Err(HandshakeError::BadRequest("missing Connection: Upgrade"));
    }

    let version_ok = req.header("sec_websocket_version").map(|v| v.trim()) == Some("13");
    if !version_ok {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let key = req
        .header("sec_websocket_key")
        .filter(|k| k.len() == 24)
        .ok_or(HandshakeError::BadRequest("missing or malformed Sec-WebSocket-Key"))?;

    let accept_key = compute_accept_key(key);
    let sub_protocol = req
        .header("sec_websocket_protocol")
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string());

    Ok(HandshakeInfo {
        accept_key,
        sub_protocol,
    })
}

/// `base64(SHA1(key + GUID))`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Builds the `101 Switching Protocols` response head.
pub fn build_response(accept_key: &str, sub_protocol: Option<&str>) -> Vec<u8> {
    let mut head = String::with_capacity(192);
    head.push_str("HTTP/1.1 101 Switching Protocols\r\n");
    head.push_str("Upgrade: websocket\r\n");
    head.push_str("Connection: Upgrade\r\n");
    head.push_str("Sec-WebSocket-Accept: ");
    head.push_str(accept_key);
    head.push_str("\r\n");
    if let Some(proto) = sub_protocol {
        head.push_str("Sec-WebSocket-Protocol: ");
        head.push_str(proto);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn req_with(headers: &[(&str, &str)]) -> Request {
        let mut map = HashMap::new();
        for (k, v) in headers {
            map.insert((*k).to_string(), (*v).to_string());
        }
        Request {
            method: http::Method::GET,
            path: "/ws".to_string(),
            headers: map,
            body: bytes::Bytes::new(),
            keep_alive: true,
            fd: 0,
            peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        }
    }

    #[test]
    fn rfc6455_accept_key_test_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn validates_a_well_formed_upgrade() {
        let req = req_with(&[
            ("upgrade", "websocket"),
            ("connection", "Upgrade"),
            ("sec_websocket_version", "13"),
            ("sec_websocket_key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]);
        let info = validate(&req).unwrap();
        assert_eq!(info.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(info.sub_protocol.is_none());
    }

    #[test]
    fn rejects_missing_upgrade_header() {
        let req = req_with(&[
            ("connection", "Upgrade"),
            ("sec_websocket_version", "13"),
            ("sec_websocket_key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]);
        assert!(validate(&req).is_err());
    }

    #[test]
    fn picks_first_offered_sub_protocol() {
        let req = req_with(&[
            ("upgrade", "websocket"),
            ("connection", "Upgrade"),
            ("sec_websocket_version", "13"),
            ("sec_websocket_key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec_websocket_protocol", "chat, superchat"),
        ]);
        let info = validate(&req).unwrap();
        assert_eq!(info.sub_protocol.as_deref(), Some("chat"));
    }
}
