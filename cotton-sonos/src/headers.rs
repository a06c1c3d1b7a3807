use crate::error::Error;
use core::fmt::Write;

/// The first line of an HTTP-like message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// For instance `NOTIFY * HTTP/1.1`
    Request {
        /// Request method, e.g. "M-SEARCH" or "SUBSCRIBE"
        method: String,
        /// Request target, "*" for SSDP
        path: String,
        /// Protocol version, e.g. "HTTP/1.1"
        version: String,
    },

    /// For instance `HTTP/1.1 200 OK`
    Status {
        /// Protocol version, e.g. "HTTP/1.1"
        version: String,
        /// Numeric status code
        code: u16,
        /// Reason phrase, possibly empty
        reason: String,
    },
}

impl StartLine {
    fn parse(line: &str) -> Option<Self> {
        if line.starts_with("HTTP/") {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next()?;
            let code = parts.next()?.parse::<u16>().ok()?;
            let reason = parts.next().unwrap_or("").trim();
            return Some(StartLine::Status {
                version: version.to_string(),
                code,
                reason: reason.to_string(),
            });
        }

        let mut parts = line.split_whitespace();
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if !version.starts_with("HTTP/") {
            return None;
        }
        Some(StartLine::Request {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
        })
    }
}

impl core::fmt::Display for StartLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Request {
                method,
                path,
                version,
            } => write!(f, "{method} {path} {version}"),
            Self::Status {
                version,
                code,
                reason,
            } => write!(f, "{version} {code} {reason}"),
        }
    }
}

/// The header block of an HTTP-like message (SSDP, GENA)
///
/// Keys are stored upper-cased; lookups are case-insensitive and
/// return the first match. Insertion order is preserved, so a block
/// built with [`Headers::set`] serialises in the order it was built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    start: Option<StartLine>,
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header block with no start line
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty header block for a request
    #[must_use]
    pub fn request(method: &str, path: &str) -> Self {
        let mut h = Self::new();
        h.set_request_line(method, path);
        h
    }

    /// Parse raw message text
    ///
    /// Both "\n" and "\r\n" line endings are accepted. The header
    /// section ends at the first blank line or at end of input; any
    /// body is ignored. Lines without a colon are
    /// skipped. Never fails: missing fields show up as `None` from
    /// [`Headers::get`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if n == 0 {
                if let Some(start) = StartLine::parse(line) {
                    headers.start = Some(start);
                    continue;
                }
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    headers
                        .fields
                        .push((key.to_ascii_uppercase(), value.trim().into()));
                }
            }
        }
        headers
    }

    /// The start line, if any
    #[must_use]
    pub fn start_line(&self) -> Option<&StartLine> {
        self.start.as_ref()
    }

    /// The status code, if this is a response
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.start {
            Some(StartLine::Status { code, .. }) => Some(code),
            _ => None,
        }
    }

    /// Make this block a request, replacing any start line
    pub fn set_request_line(&mut self, method: &str, path: &str) {
        self.start = Some(StartLine::Request {
            method: method.to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
        });
    }

    /// Make this block a response, replacing any start line
    pub fn set_status_line(&mut self, code: u16, reason: &str) {
        self.start = Some(StartLine::Status {
            version: "HTTP/1.1".to_string(),
            code,
            reason: reason.to_string(),
        });
    }

    /// Look up a header, case-insensitively
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, overwriting an existing value in place
    pub fn set<V: Into<String>>(&mut self, key: &str, value: V) {
        let value = value.into();
        if let Some(slot) = self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            slot.1 = value;
        } else {
            self.fields.push((key.to_ascii_uppercase(), value));
        }
    }

    /// Iterate over the headers in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers (not counting the start line)
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no headers at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialise to wire format
    ///
    /// Lines are CRLF-terminated and the block ends with a blank line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStartLine`] if neither a request line nor a
    /// status line has been set.
    pub fn to_wire(&self) -> Result<String, Error> {
        let start = self.start.as_ref().ok_or(Error::NoStartLine)?;
        let mut out = String::new();
        let _ = write!(out, "{start}\r\n");
        for (k, v) in &self.fields {
            let _ = write!(out, "{k}: {v}\r\n");
        }
        out.push_str("\r\n");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line() {
        let h = Headers::parse("NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\r\n");
        assert_eq!(
            h.start_line(),
            Some(&StartLine::Request {
                method: "NOTIFY".to_string(),
                path: "*".to_string(),
                version: "HTTP/1.1".to_string(),
            })
        );
        assert_eq!(h.get("nts"), Some("ssdp:alive"));
    }

    #[test]
    fn parses_status_line() {
        let h = Headers::parse("HTTP/1.1 412 Precondition Failed\n\n");
        assert_eq!(h.status_code(), Some(412));
        assert!(matches!(h.start_line(),
                         Some(StartLine::Status { reason, .. })
                         if reason == "Precondition Failed"));
        assert!(h.is_empty());
    }

    #[test]
    fn accepts_bare_newlines() {
        let h = Headers::parse("HTTP/1.1 200 OK\nSID: uuid:1\nTIMEOUT: Second-60\n");
        assert_eq!(h.get("SID"), Some("uuid:1"));
        assert_eq!(h.get("Timeout"), Some("Second-60"));
    }

    #[test]
    fn no_start_line_is_fine_for_parsing() {
        let h = Headers::parse("Host: foo\r\nX: y\r\n");
        assert!(h.start_line().is_none());
        assert_eq!(h.get("HOST"), Some("foo"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn stops_at_blank_line() {
        let h = Headers::parse("HTTP/1.1 200 OK\r\nA: 1\r\n\r\nB: 2\r\n");
        assert_eq!(h.get("A"), Some("1"));
        assert_eq!(h.get("B"), None);
    }

    #[test]
    fn first_match_wins() {
        let h = Headers::parse("HTTP/1.1 200 OK\r\nA: 1\r\na: 2\r\n");
        assert_eq!(h.get("a"), Some("1"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn value_may_contain_colons() {
        let h = Headers::parse(
            "HTTP/1.1 200 OK\r\nLOCATION: http://10.0.0.2:1400/xml/d.xml\r\n",
        );
        assert_eq!(h.get("location"), Some("http://10.0.0.2:1400/xml/d.xml"));
    }

    #[test]
    fn skips_lines_without_colon() {
        let h = Headers::parse("HTTP/1.1 200 OK\r\nLocation\r\nA: 1\r\n");
        assert_eq!(h.get("LOCATION"), None);
        assert_eq!(h.get("A"), Some("1"));
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut h = Headers::request("SUBSCRIBE", "/ev");
        h.set("Host", "a");
        h.set("NT", "upnp:event");
        h.set("host", "b");
        let order: Vec<_> = h.iter().collect();
        assert_eq!(order, vec![("HOST", "b"), ("NT", "upnp:event")]);
    }

    #[test]
    fn serialises_request() {
        let mut h = Headers::request("UNSUBSCRIBE", "/MediaRenderer/AVTransport/Event");
        h.set("HOST", "10.0.0.2:1400");
        h.set("SID", "uuid:RINCON_1_sub0000000001");
        assert_eq!(
            h.to_wire().unwrap(),
            "UNSUBSCRIBE /MediaRenderer/AVTransport/Event HTTP/1.1\r\n\
HOST: 10.0.0.2:1400\r\n\
SID: uuid:RINCON_1_sub0000000001\r\n\
\r\n"
        );
    }

    #[test]
    fn serialises_status() {
        let mut h = Headers::new();
        h.set_status_line(200, "OK");
        h.set("SID", "x");
        assert_eq!(h.to_wire().unwrap(), "HTTP/1.1 200 OK\r\nSID: x\r\n\r\n");
    }

    #[test]
    fn serialising_without_start_line_fails() {
        let mut h = Headers::new();
        h.set("HOST", "x");
        assert!(matches!(h.to_wire(), Err(Error::NoStartLine)));
    }

    #[test]
    fn rejects_odd_request_lines() {
        assert!(StartLine::parse("NOTIFY *").is_none());
        assert!(StartLine::parse("NOTIFY * FTP/1.0").is_none());
        assert!(StartLine::parse("NOTIFY * HTTP/1.1 extra").is_none());
        assert!(StartLine::parse("HTTP/1.1 abc OK").is_none());
    }
}
