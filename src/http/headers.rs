//! Header fields and hop-by-hop sanitation

use std::fmt;

/// Hop-by-hop headers never forwarded in either direction
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "proxy-authorization",
    "proxy-authenticate",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "transfer-encoding",
];

/// One header field, value kept as raw bytes
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    /// Field name, original case
    pub name: String,
    /// Field value
    pub value: Vec<u8>,
}

impl Header {
    /// Create a header field
    pub fn new(name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        Header {
            name: name.into(),
            value: value.as_ref().to_vec(),
        }
    }

    /// Case-insensitive name comparison
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Value as trimmed text, if it is valid UTF-8
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok().map(str::trim)
    }

    /// Append `Name: value\r\n`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(&self.value);
        out.extend_from_slice(b"\r\n");
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is("proxy-authorization") || self.is("authorization") {
            write!(f, "{}: <redacted>", self.name)
        } else {
            write!(f, "{}: {}", self.name, String::from_utf8_lossy(&self.value))
        }
    }
}

/// First header with the given name
pub fn find<'a>(headers: &'a [Header], name: &str) -> Option<&'a Header> {
    headers.iter().find(|h| h.is(name))
}

/// Whether `name` is one of the fixed hop-by-hop headers
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Remove hop-by-hop headers, including any listed in `Connection`
pub fn strip_hop_by_hop(headers: &mut Vec<Header>) {
    let listed: Vec<String> = headers
        .iter()
        .filter(|h| h.is("connection") || h.is("proxy-connection"))
        .filter_map(|h| h.value_str())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    headers.retain(|h| {
        !is_hop_by_hop(&h.name) && !listed.iter().any(|token| h.name.eq_ignore_ascii_case(token))
    });
}

/// Whether the final transfer coding is `chunked`
pub fn is_chunked(headers: &[Header]) -> bool {
    headers
        .iter()
        .filter(|h| h.is("transfer-encoding"))
        .filter_map(|h| h.value_str())
        .flat_map(|v| v.split(','))
        .last()
        .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

/// Whether the client sent `Expect: 100-continue`
pub fn expects_continue(headers: &[Header]) -> bool {
    headers
        .iter()
        .filter(|h| h.is("expect"))
        .filter_map(|h| h.value_str())
        .any(|v| v.trim().eq_ignore_ascii_case("100-continue"))
}

/// Parsed `Content-Length`; `Err` when present but unusable
pub fn content_length(headers: &[Header]) -> Result<Option<u64>, String> {
    let mut length = None;
    for header in headers.iter().filter(|h| h.is("content-length")) {
        let value = header
            .value_str()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| "invalid Content-Length".to_string())?;
        if length.is_some_and(|previous| previous != value) {
            return Err("conflicting Content-Length headers".to_string());
        }
        length = Some(value);
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(headers: &[Header]) -> Vec<&str> {
        headers.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_strip_fixed_list() {
        let mut headers = vec![
            Header::new("Host", "example.com"),
            Header::new("Proxy-Authorization", "Basic xxx"),
            Header::new("Connection", "keep-alive"),
            Header::new("Proxy-Connection", "keep-alive"),
            Header::new("TE", "trailers"),
            Header::new("Upgrade", "websocket"),
            Header::new("Accept", "*/*"),
        ];
        strip_hop_by_hop(&mut headers);
        assert_eq!(names(&headers), vec!["Host", "Accept"]);
    }

    #[test]
    fn test_strip_connection_listed() {
        let mut headers = vec![
            Header::new("Connection", "close, X-Trace-Hop"),
            Header::new("x-trace-hop", "1"),
            Header::new("X-Keep", "1"),
        ];
        strip_hop_by_hop(&mut headers);
        assert_eq!(names(&headers), vec!["X-Keep"]);
    }

    #[test]
    fn test_is_chunked() {
        assert!(is_chunked(&[Header::new("Transfer-Encoding", "chunked")]));
        assert!(is_chunked(&[Header::new("transfer-encoding", "gzip, chunked")]));
        assert!(!is_chunked(&[Header::new("Transfer-Encoding", "chunked, gzip")]));
        assert!(!is_chunked(&[]));
    }

    #[test]
    fn test_content_length() {
        assert_eq!(content_length(&[]).unwrap(), None);
        assert_eq!(
            content_length(&[Header::new("Content-Length", " 12 ")]).unwrap(),
            Some(12)
        );
        assert!(content_length(&[Header::new("Content-Length", "abc")]).is_err());
        assert!(content_length(&[
            Header::new("Content-Length", "1"),
            Header::new("Content-Length", "2"),
        ])
        .is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let header = Header::new("Proxy-Authorization", "Basic c2VjcmV0");
        assert_eq!(format!("{:?}", header), "Proxy-Authorization: <redacted>");
    }

    #[test]
    fn test_expects_continue() {
        assert!(expects_continue(&[Header::new("Expect", "100-Continue")]));
        assert!(!expects_continue(&[Header::new("Expect", "something-else")]));
        assert!(!expects_continue(&[Header::new("Host", "example.com")]));
    }
}
