//! Session-key derivation and client-IP extraction.

use axum::http::HeaderMap;
use std::net::IpAddr;

const USER_ID_HEADER: &str = "x-openwebui-user-id";
const CHAT_ID_HEADER: &str = "x-openwebui-chat-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

/// Derives the session key a request maps to: `user:<uid>[:chat:<cid>]` when
/// `X-OpenWebUI-User-Id` is present (and header-forwarding is enabled),
/// otherwise `ip:<client-ip>`.
pub fn derive(headers: &HeaderMap, peer_ip: Option<&str>, enable_user_headers: bool) -> String {
    if enable_user_headers {
        if let Some(user_id) = header_str(headers, USER_ID_HEADER) {
            let mut key = format!("user:{user_id}");
            if let Some(chat_id) = header_str(headers, CHAT_ID_HEADER) {
                key = format!("{key}:chat:{chat_id}");
            }
            return key;
        }
    }
    format!("ip:{}", extract_client_ip(headers, peer_ip))
}

/// Client IP precedence: `X-Forwarded-For` (first entry), `X-Real-IP`, the
/// TCP peer address, else the literal `"unknown"`.
pub fn extract_client_ip(headers: &HeaderMap, peer_ip: Option<&str>) -> String {
    if let Some(forwarded) = header_str(headers, FORWARDED_FOR_HEADER) {
        if let Some(first) = forwarded.split(',').next() {
            let candidate = first.trim();
            if is_valid_ip(candidate) {
                return candidate.to_string();
            }
        }
    }
    if let Some(real_ip) = header_str(headers, REAL_IP_HEADER) {
        let candidate = real_ip.trim();
        if is_valid_ip(candidate) {
            return candidate.to_string();
        }
    }
    if let Some(peer) = peer_ip {
        if is_valid_ip(peer) {
            return peer.to_string();
        }
    }
    "unknown".to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_valid_ip(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn user_id_header_takes_precedence() {
        let h = headers(&[("x-openwebui-user-id", "alice")]);
        assert_eq!(derive(&h, Some("10.0.0.1"), true), "user:alice");
    }

    #[test]
    fn user_and_chat_id_combine() {
        let h = headers(&[("x-openwebui-user-id", "alice"), ("x-openwebui-chat-id", "chat-9")]);
        assert_eq!(derive(&h, None, true), "user:alice:chat:chat-9");
    }

    #[test]
    fn user_headers_ignored_when_forwarding_disabled() {
        let h = headers(&[("x-openwebui-user-id", "alice")]);
        assert_eq!(derive(&h, Some("10.0.0.1"), false), "ip:10.0.0.1");
    }

    #[test]
    fn falls_back_to_forwarded_for_first_entry() {
        let h = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(derive(&h, None, true), "ip:203.0.113.9");
    }

    #[test]
    fn falls_back_to_real_ip_when_forwarded_for_absent() {
        let h = headers(&[("x-real-ip", "203.0.113.5")]);
        assert_eq!(derive(&h, None, true), "ip:203.0.113.5");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let h = HeaderMap::new();
        assert_eq!(derive(&h, Some("192.168.1.1"), true), "ip:192.168.1.1");
        assert_eq!(derive(&h, None, true), "ip:unknown");
    }

    #[test]
    fn invalid_forwarded_for_entry_falls_through() {
        let h = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(derive(&h, Some("192.168.1.1"), true), "ip:192.168.1.1");
    }
}
