//! Outbound HTTP client capability.
//!
//! The target authority must match a manifest host entry exactly
//! (case-insensitive) before any connection is attempted. Responses are
//! size-bounded: an oversize body is an error, never a truncation.
//! Redirects are returned to the script rather than followed — a
//! redirect to a host outside the allowlist must not be chased.

use std::io::Read;
use std::time::Duration;

use hull_primitives::{CapError, Manifest};

/// Limits for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Maximum accepted response-body size in bytes.
    pub max_response_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_response_bytes: 4 * 1024 * 1024, // 4 MiB
        }
    }
}

/// A completed response, headers lower-cased.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The outbound HTTP capability.
pub struct HttpCapability {
    client: reqwest::blocking::Client,
    config: HttpConfig,
}

impl HttpCapability {
    /// Build the client. TLS certificate validation is on; there is no
    /// switch to turn it off.
    pub fn new(config: HttpConfig) -> Result<Self, CapError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CapError::Io(std::io::Error::other(e)))?;
        Ok(Self { client, config })
    }

    /// Perform one request.
    ///
    /// `method` is a standard HTTP method name; `url` must be `http` or
    /// `https` and its host must be in the manifest's allowlist.
    pub fn request(
        &self,
        manifest: &Manifest,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, CapError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| CapError::invalid(format!("bad url {url:?}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CapError::invalid(format!("unsupported scheme {other:?}")));
            }
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| CapError::invalid(format!("url {url:?} has no host")))?;

        if !manifest.has_hosts() {
            return Err(CapError::manifest("no hosts declared"));
        }
        if !manifest.allows_host(host) {
            return Err(CapError::denied(format!("host {host:?} not in allowlist")));
        }

        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CapError::invalid(format!("bad method {method:?}")))?;

        let mut req = self.client.request(method, parsed);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            req = req.body(body.to_vec());
        }

        let resp = req
            .send()
            .map_err(|e| CapError::Io(std::io::Error::other(e)))?;

        let status = resp.status().as_u16();
        let mut out_headers = Vec::with_capacity(resp.headers().len());
        for (name, value) in resp.headers() {
            // Header names from the client are already lower-case.
            out_headers.push((
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            ));
        }

        let limit = self.config.max_response_bytes;
        let mut body = Vec::new();
        resp.take(limit as u64 + 1)
            .read_to_end(&mut body)
            .map_err(CapError::Io)?;
        if body.len() > limit {
            return Err(CapError::QuotaExhausted(format!(
                "response body exceeds {limit} bytes"
            )));
        }

        Ok(HttpResponse {
            status,
            headers: out_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(host: &str) -> Manifest {
        Manifest {
            hosts: vec![host.into()],
            ..Manifest::default()
        }
    }

    #[test]
    fn test_denied_host_never_connects() {
        let cap = HttpCapability::new(HttpConfig::default()).unwrap();
        let m = manifest_with("api.example.com");
        // "evil.example.org" does not resolve from the test environment;
        // a Denied (not Io) error proves no connection was attempted.
        let err = cap
            .request(&m, "GET", "https://evil.example.org/", &[], None)
            .unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_empty_allowlist_is_violation() {
        let cap = HttpCapability::new(HttpConfig::default()).unwrap();
        let err = cap
            .request(&Manifest::default(), "GET", "https://api.example.com/", &[], None)
            .unwrap_err();
        assert!(matches!(err, CapError::ManifestViolation(_)));
    }

    #[test]
    fn test_host_match_ignores_case_not_suffix() {
        let cap = HttpCapability::new(HttpConfig::default()).unwrap();
        let m = manifest_with("api.example.com");
        let err = cap
            .request(&m, "GET", "https://api.example.com.evil.org/", &[], None)
            .unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn test_bad_inputs() {
        let cap = HttpCapability::new(HttpConfig::default()).unwrap();
        let m = manifest_with("api.example.com");
        assert!(matches!(
            cap.request(&m, "GET", "not a url", &[], None).unwrap_err(),
            CapError::InvalidArgument(_)
        ));
        assert!(matches!(
            cap.request(&m, "GET", "ftp://api.example.com/", &[], None)
                .unwrap_err(),
            CapError::InvalidArgument(_)
        ));
        assert!(matches!(
            cap.request(&m, "G E T", "https://api.example.com/", &[], None)
                .unwrap_err(),
            CapError::InvalidArgument(_)
        ));
    }
}
