//! Request journal: every request the server receives, kept for verification.

use crate::config::RequestMatcher;
use crate::error::VerificationError;
use crate::matcher::{parse_query_string, CompiledRequest};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A request as received by the server.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedRequest {
    /// Upper-case HTTP method
    pub method: String,
    /// Path plus query string, as sent
    pub url: String,
    /// Path only
    pub path: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, String>,
    /// Headers in arrival order, names lower-cased
    pub headers: Vec<(String, String)>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Vec<u8>,
    /// Stub that answered the request, if any
    pub stub_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

fn serialize_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

impl RecordedRequest {
    pub fn new(method: &str, url: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, parse_query_string(query)),
            None => (url, BTreeMap::new()),
        };

        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            path: path.to_string(),
            query,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            body,
            stub_id: None,
            received_at: Utc::now(),
        }
    }

    /// First value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8, if it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Expected number of matching requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMatcher {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
}

impl CountMatcher {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            CountMatcher::Exactly(n) => count == n,
            CountMatcher::AtLeast(n) => count >= n,
            CountMatcher::AtMost(n) => count <= n,
        }
    }
}

impl fmt::Display for CountMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountMatcher::Exactly(n) => write!(f, "exactly {n}"),
            CountMatcher::AtLeast(n) => write!(f, "at least {n}"),
            CountMatcher::AtMost(n) => write!(f, "at most {n}"),
        }
    }
}

/// Ordered log of received requests.
#[derive(Debug, Default)]
pub struct RequestJournal {
    requests: Vec<RecordedRequest>,
}

impl RequestJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, request: RecordedRequest) {
        self.requests.push(request);
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Requests that no stub answered.
    pub fn unmatched(&self) -> Vec<RecordedRequest> {
        self.requests
            .iter()
            .filter(|r| r.stub_id.is_none())
            .cloned()
            .collect()
    }

    /// Requests satisfying `pattern`.
    pub fn find(&self, pattern: &RequestMatcher) -> Result<Vec<RecordedRequest>, VerificationError> {
        let compiled = CompiledRequest::compile(pattern)?;
        Ok(self
            .requests
            .iter()
            .filter(|r| compiled.matches(r).is_some())
            .cloned()
            .collect())
    }

    /// Check that the number of requests satisfying `pattern` is acceptable.
    pub fn verify(
        &self,
        count: CountMatcher,
        pattern: &RequestMatcher,
    ) -> Result<(), VerificationError> {
        let actual = self.find(pattern)?.len();
        if count.accepts(actual) {
            Ok(())
        } else {
            Err(VerificationError::CountMismatch {
                expected: count.to_string(),
                actual,
                total: self.requests.len(),
                pattern: pattern.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathMatcher, ValueMatcher};

    fn journal() -> RequestJournal {
        let mut journal = RequestJournal::new();
        journal.record(RecordedRequest::new("get", "/rest", Vec::new(), Vec::new()));

        let mut post = RecordedRequest::new(
            "POST",
            "/rest/wiremock",
            vec![("Content-Type".to_string(), "application/json".to_string())],
            br#"{"testing-library": "WireMock"}"#.to_vec(),
        );
        post.stub_id = Some("post-intro".to_string());
        journal.record(post);
        journal
    }

    #[test]
    fn test_recorded_request_parts() {
        let request = RecordedRequest::new(
            "get",
            "/search?q=a%2Bb&page=2",
            vec![("X-Trace".to_string(), "abc".to_string())],
            Vec::new(),
        );
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/search");
        assert_eq!(request.url, "/search?q=a%2Bb&page=2");
        assert_eq!(request.query.get("q").map(String::as_str), Some("a+b"));
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(request.header("X-TRACE"), Some("abc"));
    }

    #[test]
    fn test_verify_at_least_once() {
        let journal = journal();
        let pattern = RequestMatcher::get(PathMatcher::url("/rest"));
        assert!(journal.verify(CountMatcher::AtLeast(1), &pattern).is_ok());
    }

    #[test]
    fn test_verify_with_header() {
        let journal = journal();
        let pattern = RequestMatcher::post(PathMatcher::url("/rest/wiremock"))
            .with_header("Content-Type", ValueMatcher::exact("application/json"));
        assert!(journal.verify(CountMatcher::Exactly(1), &pattern).is_ok());

        let wrong = RequestMatcher::post(PathMatcher::url("/rest/wiremock"))
            .with_header("Content-Type", ValueMatcher::exact("text/plain"));
        assert!(journal.verify(CountMatcher::AtLeast(1), &wrong).is_err());
    }

    #[test]
    fn test_verify_never_sent_fails() {
        let journal = journal();
        let pattern = RequestMatcher::new("DELETE", PathMatcher::url("/rest"));
        match journal.verify(CountMatcher::AtLeast(1), &pattern) {
            Err(VerificationError::CountMismatch {
                expected,
                actual,
                total,
                ..
            }) => {
                assert_eq!(expected, "at least 1");
                assert_eq!(actual, 0);
                assert_eq!(total, 2);
            }
            other => panic!("Expected count mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_pattern() {
        let journal = journal();
        let pattern = RequestMatcher::get(PathMatcher::regex("(("));
        assert!(matches!(
            journal.verify(CountMatcher::AtLeast(1), &pattern),
            Err(VerificationError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_unmatched_and_clear() {
        let mut journal = journal();
        let unmatched = journal.unmatched();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].path, "/rest");

        journal.clear();
        assert!(journal.is_empty());
    }

    #[test]
    fn test_count_matcher() {
        assert!(CountMatcher::Exactly(2).accepts(2));
        assert!(!CountMatcher::Exactly(2).accepts(3));
        assert!(CountMatcher::AtMost(1).accepts(0));
        assert!(!CountMatcher::AtLeast(1).accepts(0));
    }
}
