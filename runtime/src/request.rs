//! The neutral request/response data model between the HTTP server and
//! the interpreter hosts.
//!
//! The server builds a `RequestData` from the wire request and receives
//! a `ResponseData` back; neither side sees the other's native types.

/// One incoming HTTP request, marshalled for an interpreter.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    /// Upper-case HTTP method.
    pub method: String,
    /// Request path, without the query string.
    pub path: String,
    /// Decoded query parameters in wire order.
    pub query: Vec<(String, String)>,
    /// Headers with lower-cased names.
    pub headers: Vec<(String, String)>,
    /// Route parameters; filled in by the host from the route pattern.
    pub params: Vec<(String, String)>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl RequestData {
    /// Minimal request, used by tests.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a header (name stored lower-cased).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }
}

/// The response a handler produced.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Default for ResponseData {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl ResponseData {
    /// Fresh response: 200, no headers, empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed response the dispatcher emits when a handler fails.
    pub fn internal_error() -> Self {
        Self {
            status: 500,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: b"internal server error".to_vec(),
        }
    }

    /// Set a header, replacing any previous value for the same
    /// (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let lower = name.to_ascii_lowercase();
        self.headers.retain(|(n, _)| *n != lower);
        self.headers.push((lower, value.to_string()));
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = RequestData::new("post", "/echo")
            .with_body("hello world")
            .with_header("Content-Type", "text/plain");
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, b"hello world");
        assert_eq!(req.headers[0].0, "content-type");
    }

    #[test]
    fn test_response_defaults() {
        let resp = ResponseData::new();
        assert_eq!(resp.status, 200);
        assert!(resp.body.is_empty());
    }

    #[test]
    fn test_internal_error_shape() {
        let resp = ResponseData::internal_error();
        assert_eq!(resp.status, 500);
        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
        assert_eq!(resp.body, b"internal server error");
    }

    #[test]
    fn test_set_header_replaces() {
        let mut resp = ResponseData::new();
        resp.set_header("Content-Type", "text/plain");
        resp.set_header("content-type", "application/json");
        assert_eq!(resp.headers.len(), 1);
        assert_eq!(resp.header("CONTENT-TYPE"), Some("application/json"));
    }
}
