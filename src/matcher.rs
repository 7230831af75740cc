//! Request matching logic.
//!
//! Compiles [`RequestMatcher`] definitions once and evaluates them against
//! recorded requests, both for stub lookup and for journal verification.

use crate::config::{BodyMatcher, PathMatcher, RequestMatcher, ValueMatcher};
use crate::error::ConfigError;
use crate::journal::RecordedRequest;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Compile `pattern` so that it must match the entire input.
pub(crate) fn whole_match_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ConfigError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Context captured during matching (for template variables).
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Path parameters extracted from template matching
    pub path_params: HashMap<String, String>,
    /// Regex capture groups
    pub captures: HashMap<String, String>,
}

/// A [`RequestMatcher`] with its patterns compiled.
#[derive(Debug)]
pub struct CompiledRequest {
    methods: Vec<String>,
    path: Option<CompiledPath>,
    query: Vec<(String, CompiledValue)>,
    headers: Vec<(String, CompiledValue)>,
    body: Vec<CompiledBody>,
}

#[derive(Debug)]
enum CompiledPath {
    Exact(String),
    Url(String),
    Prefix(String),
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Template(PathTemplate),
}

#[derive(Debug)]
enum CompiledValue {
    Exact(String),
    Regex(Regex),
    Present,
    Absent,
    Contains(String),
}

#[derive(Debug)]
enum CompiledBody {
    Exact(String),
    Regex(Regex),
    JsonPath(BTreeMap<String, serde_json::Value>),
    Contains(String),
    Json,
    Empty,
}

#[derive(Debug)]
struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

#[derive(Debug)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            if open > 0 {
                segments.push(TemplateSegment::Literal(rest[..open].to_string()));
            }
            segments.push(TemplateSegment::Param(rest[open + 1..close].to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(TemplateSegment::Literal(rest.to_string()));
        }

        Self { segments }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut remaining = path;

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                TemplateSegment::Literal(lit) => {
                    remaining = remaining.strip_prefix(lit.as_str())?;
                }
                TemplateSegment::Param(name) => {
                    // A parameter runs up to the following literal, or to the
                    // next '/' when it ends the template.
                    let end = match self.segments.get(i + 1) {
                        Some(TemplateSegment::Literal(next)) => remaining.find(next.as_str())?,
                        _ => remaining.find('/').unwrap_or(remaining.len()),
                    };
                    if end == 0 {
                        return None;
                    }
                    params.insert(name.clone(), remaining[..end].to_string());
                    remaining = &remaining[end..];
                }
            }
        }

        remaining.is_empty().then_some(params)
    }
}

impl CompiledRequest {
    /// Compile a request matcher.
    pub fn compile(matcher: &RequestMatcher) -> Result<Self, ConfigError> {
        let path = matcher.path.as_ref().map(compile_path).transpose()?;

        let query = matcher
            .query
            .iter()
            .map(|(name, m)| compile_value(m).map(|c| (name.clone(), c)))
            .collect::<Result<_, ConfigError>>()?;

        let headers = matcher
            .headers
            .iter()
            .map(|(name, m)| compile_value(m).map(|c| (name.to_ascii_lowercase(), c)))
            .collect::<Result<_, ConfigError>>()?;

        let body = matcher
            .body
            .iter()
            .map(compile_body)
            .collect::<Result<_, ConfigError>>()?;

        Ok(Self {
            methods: matcher.method.iter().map(|m| m.to_uppercase()).collect(),
            path,
            query,
            headers,
            body,
        })
    }

    /// Evaluate against a request, returning the captured context on a match.
    pub fn matches(&self, request: &RecordedRequest) -> Option<MatchContext> {
        let mut context = MatchContext::default();

        if !self.methods.is_empty() && !self.methods.iter().any(|m| *m == request.method) {
            return None;
        }

        if let Some(path) = &self.path {
            if !matches_path(path, request, &mut context) {
                return None;
            }
        }

        for (name, matcher) in &self.query {
            if !matches_value(matcher, request.query.get(name).map(String::as_str)) {
                return None;
            }
        }

        for (name, matcher) in &self.headers {
            if !matches_value(matcher, request.header(name)) {
                return None;
            }
        }

        if !self.body.iter().all(|m| matches_body(m, &request.body)) {
            return None;
        }

        Some(context)
    }
}

fn compile_path(path: &PathMatcher) -> Result<CompiledPath, ConfigError> {
    Ok(match path {
        PathMatcher::Exact { value } => CompiledPath::Exact(value.clone()),
        PathMatcher::Url { value } => CompiledPath::Url(value.clone()),
        PathMatcher::Prefix { value } => CompiledPath::Prefix(value.clone()),
        PathMatcher::Regex { pattern } => CompiledPath::Regex(whole_match_regex(pattern)?),
        PathMatcher::Glob { pattern } => {
            let glob = globset::Glob::new(pattern).map_err(|source| ConfigError::Glob {
                pattern: pattern.clone(),
                source,
            })?;
            CompiledPath::Glob(glob.compile_matcher())
        }
        PathMatcher::Template { template } => CompiledPath::Template(PathTemplate::parse(template)),
    })
}

fn compile_value(matcher: &ValueMatcher) -> Result<CompiledValue, ConfigError> {
    Ok(match matcher {
        ValueMatcher::Exact { value } => CompiledValue::Exact(value.clone()),
        ValueMatcher::Regex { pattern } => CompiledValue::Regex(whole_match_regex(pattern)?),
        ValueMatcher::Present => CompiledValue::Present,
        ValueMatcher::Absent => CompiledValue::Absent,
        ValueMatcher::Contains { value } => CompiledValue::Contains(value.clone()),
    })
}

fn compile_body(matcher: &BodyMatcher) -> Result<CompiledBody, ConfigError> {
    Ok(match matcher {
        BodyMatcher::Exact { value } => CompiledBody::Exact(value.clone()),
        BodyMatcher::Regex { pattern } => {
            CompiledBody::Regex(Regex::new(pattern).map_err(|source| ConfigError::Regex {
                pattern: pattern.clone(),
                source,
            })?)
        }
        BodyMatcher::JsonPath { expressions } => CompiledBody::JsonPath(expressions.clone()),
        BodyMatcher::Contains { value } => CompiledBody::Contains(value.clone()),
        BodyMatcher::Json => CompiledBody::Json,
        BodyMatcher::Empty => CompiledBody::Empty,
    })
}

fn matches_path(path: &CompiledPath, request: &RecordedRequest, context: &mut MatchContext) -> bool {
    match path {
        CompiledPath::Exact(value) => request.path == *value,
        CompiledPath::Url(value) => request.url == *value,
        CompiledPath::Prefix(value) => request.path.starts_with(value.as_str()),
        CompiledPath::Regex(regex) => {
            let Some(captures) = regex.captures(&request.path) else {
                return false;
            };
            for (i, cap) in captures.iter().enumerate().skip(1) {
                if let Some(m) = cap {
                    context.captures.insert(i.to_string(), m.as_str().to_string());
                }
            }
            for name in regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    context.captures.insert(name.to_string(), m.as_str().to_string());
                }
            }
            true
        }
        CompiledPath::Glob(glob) => glob.is_match(&request.path),
        CompiledPath::Template(template) => match template.matches(&request.path) {
            Some(params) => {
                context.path_params = params;
                true
            }
            None => false,
        },
    }
}

fn matches_value(matcher: &CompiledValue, actual: Option<&str>) -> bool {
    match (matcher, actual) {
        (CompiledValue::Present, found) => found.is_some(),
        (CompiledValue::Absent, found) => found.is_none(),
        (_, None) => false,
        (CompiledValue::Exact(value), Some(v)) => v == value.as_str(),
        (CompiledValue::Regex(regex), Some(v)) => regex.is_match(v),
        (CompiledValue::Contains(value), Some(v)) => v.contains(value.as_str()),
    }
}

fn matches_body(matcher: &CompiledBody, body: &[u8]) -> bool {
    let body_str = std::str::from_utf8(body).ok();

    match matcher {
        CompiledBody::Exact(value) => body_str == Some(value.as_str()),
        CompiledBody::Regex(regex) => body_str.is_some_and(|bs| regex.is_match(bs)),
        CompiledBody::JsonPath(expressions) => body_str
            .and_then(|bs| serde_json::from_str::<serde_json::Value>(bs).ok())
            .is_some_and(|json| matches_json_paths(&json, expressions)),
        CompiledBody::Contains(value) => body_str.is_some_and(|bs| bs.contains(value.as_str())),
        CompiledBody::Json => body_str
            .is_some_and(|bs| serde_json::from_str::<serde_json::Value>(bs).is_ok()),
        CompiledBody::Empty => body.is_empty(),
    }
}

fn matches_json_paths(
    json: &serde_json::Value,
    expressions: &BTreeMap<String, serde_json::Value>,
) -> bool {
    use jsonpath_rust::JsonPath;

    expressions.iter().all(|(path_expr, expected)| {
        let Ok(path) = JsonPath::try_from(path_expr.as_str()) else {
            return false;
        };
        let results = path.find(json);

        // A null expectation only requires the path to resolve
        if expected.is_null() {
            !results.is_null()
        } else {
            results == *expected
        }
    })
}

/// Parse a query string into key-value pairs.
pub(crate) fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(part), String::new()),
        })
        .collect()
}

/// Decode `%XX` escapes and `+` in a query component.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                        continue;
                    }
                    None => decoded.push(b'%'),
                }
            }
            b'+' => decoded.push(b' '),
            b => decoded.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
