//! Host-owned route and middleware tables, plus the pattern matcher.
//!
//! Scripts register handlers during their top-level run through a small
//! registration interface; the host stores the tables itself instead of
//! reading them back out of interpreter globals. After startup the
//! tables are immutable.
//!
//! Patterns are literal segments with `:name` captures, e.g.
//! `/greet/:name`. A lone `*` pattern matches every path (middleware
//! convenience).

/// One registered route: `(method, pattern, handler-id)`.
///
/// `handler` indexes the owning host's function registry; it is never
/// meaningful outside that host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub method: String,
    pub pattern: String,
    pub handler: usize,
}

/// One registered middleware entry, matched before the primary handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareDef {
    pub method: String,
    pub pattern: String,
    pub handler: usize,
}

/// Match `path` against `pattern`, returning captured parameters.
///
/// Returns `None` on mismatch. Captures are percent-decoded.
pub fn match_pattern(pattern: &str, path: &str) -> Option<Vec<(String, String)>> {
    if pattern == "*" {
        return Some(Vec::new());
    }
    let pat_segs: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segs: Vec<&str> = path.trim_matches('/').split('/').collect();
    if pat_segs.len() != path_segs.len() {
        return None;
    }
    let mut params = Vec::new();
    for (pat, seg) in pat_segs.iter().zip(path_segs.iter()) {
        if let Some(name) = pat.strip_prefix(':') {
            if seg.is_empty() {
                return None;
            }
            params.push((name.to_string(), percent_decode(seg)));
        } else if pat != seg {
            return None;
        }
    }
    Some(params)
}

/// True when a middleware method spec covers the request method.
/// `*` covers everything.
pub fn method_matches(spec: &str, method: &str) -> bool {
    spec == "*" || spec.eq_ignore_ascii_case(method)
}

/// Percent-decode one path segment, byte by byte. Malformed escapes are
/// passed through untouched.
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_val(*b));
            let lo = bytes.get(i + 2).and_then(|b| hex_val(*b));
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
