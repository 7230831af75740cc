//! Configuration for the stub server.
//!
//! Defines request matchers, response stubs, and server settings.

use crate::error::ConfigError;
use crate::matcher::whole_match_regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Port the stub server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9090;

/// Main configuration for the stub server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubServerConfig {
    /// Listening address
    #[serde(default)]
    pub server: ListenConfig,

    /// List of stub definitions
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Response when no stub matches
    #[serde(default)]
    pub default_response: Option<ResponseDefinition>,
}

impl StubServerConfig {
    /// Configuration listening on `port` with no stubs.
    pub fn on_port(port: u16) -> Self {
        Self {
            server: ListenConfig {
                port,
                ..ListenConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stub in &self.stubs {
            stub.validate()?;
        }
        if let Some(default) = &self.default_response {
            default.validate()?;
        }
        Ok(())
    }
}

/// Where the server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl ListenConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_PORT,
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// A single stub definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    /// Unique identifier for this stub
    pub id: String,

    /// Optional name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Request matcher
    #[serde(default)]
    pub request: RequestMatcher,

    /// Response to return
    #[serde(default)]
    pub response: ResponseDefinition,

    /// Priority (higher = matched first)
    #[serde(default)]
    pub priority: i32,

    /// Whether this stub is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of times this stub can be matched (0 = unlimited)
    #[serde(default)]
    pub max_matches: u32,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,
}

fn default_true() -> bool {
    true
}

impl StubDefinition {
    pub fn new(id: impl Into<String>, request: RequestMatcher, response: ResponseDefinition) -> Self {
        Self {
            id: id.into(),
            name: None,
            request,
            response,
            priority: 0,
            enabled: true,
            max_matches: 0,
            delay: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_matches(mut self, max_matches: u32) -> Self {
        self.max_matches = max_matches;
        self
    }

    pub fn with_delay(mut self, delay: DelayConfig) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Validate the stub definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::InvalidStub {
                id: String::new(),
                reason: "stub id cannot be empty".to_string(),
            });
        }
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }
}

/// Request matching configuration.
///
/// Also used as the pattern for request verification.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// HTTP method(s) to match (empty = any)
    #[serde(default)]
    pub method: Vec<String>,

    /// Path matching
    #[serde(default)]
    pub path: Option<PathMatcher>,

    /// Query parameter matching
    #[serde(default)]
    pub query: BTreeMap<String, ValueMatcher>,

    /// Header matching (names are case-insensitive)
    #[serde(default)]
    pub headers: BTreeMap<String, ValueMatcher>,

    /// Body matching, every entry must hold
    #[serde(default)]
    pub body: Vec<BodyMatcher>,
}

impl RequestMatcher {
    /// Matches any request.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(method: &str, path: PathMatcher) -> Self {
        Self {
            method: vec![method.to_uppercase()],
            path: Some(path),
            ..Self::default()
        }
    }

    pub fn get(path: PathMatcher) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: PathMatcher) -> Self {
        Self::new("POST", path)
    }

    pub fn with_header(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.headers.insert(name.into(), matcher);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.query.insert(name.into(), matcher);
        self
    }

    pub fn with_body(mut self, matcher: BodyMatcher) -> Self {
        self.body.push(matcher);
        self
    }

    /// Validate the request matcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            path.validate()?;
        }
        for matcher in self.query.values().chain(self.headers.values()) {
            matcher.validate()?;
        }
        for matcher in &self.body {
            matcher.validate()?;
        }
        Ok(())
    }
}

impl std::fmt::Display for RequestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.method.is_empty() {
            write!(f, "ANY")?;
        } else {
            write!(f, "{}", self.method.join("|"))?;
        }
        match &self.path {
            Some(path) => write!(f, " {path}")?,
            None => write!(f, " *")?,
        }
        for (name, matcher) in &self.headers {
            write!(f, " [{name} {matcher}]")?;
        }
        for (name, matcher) in &self.query {
            write!(f, " [?{name} {matcher}]")?;
        }
        if !self.body.is_empty() {
            write!(f, " (+{} body predicates)", self.body.len())?;
        }
        Ok(())
    }
}

/// Path matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathMatcher {
    /// Exact path match, query string ignored
    Exact { value: String },
    /// Exact match on path plus query string
    Url { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Regex pattern match against the whole path
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Path with parameters (e.g., /users/{id})
    Template { template: String },
}

impl PathMatcher {
    pub fn exact(value: impl Into<String>) -> Self {
        PathMatcher::Exact { value: value.into() }
    }

    pub fn url(value: impl Into<String>) -> Self {
        PathMatcher::Url { value: value.into() }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        PathMatcher::Prefix { value: value.into() }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        PathMatcher::Regex {
            pattern: pattern.into(),
        }
    }

    /// Validate the path matcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PathMatcher::Regex { pattern } => {
                whole_match_regex(pattern)?;
            }
            PathMatcher::Glob { pattern } => {
                globset::Glob::new(pattern).map_err(|source| ConfigError::Glob {
                    pattern: pattern.clone(),
                    source,
                })?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Display for PathMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathMatcher::Exact { value } => write!(f, "{value}"),
            PathMatcher::Url { value } => write!(f, "url={value}"),
            PathMatcher::Prefix { value } => write!(f, "{value}*"),
            PathMatcher::Regex { pattern } => write!(f, "~{pattern}"),
            PathMatcher::Glob { pattern } => write!(f, "glob={pattern}"),
            PathMatcher::Template { template } => write!(f, "{template}"),
        }
    }
}

/// Matching for a single header or query parameter value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match against the whole value
    Regex { pattern: String },
    /// Must be present (any value)
    Present,
    /// Must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

impl ValueMatcher {
    pub fn exact(value: impl Into<String>) -> Self {
        ValueMatcher::Exact { value: value.into() }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        ValueMatcher::Regex {
            pattern: pattern.into(),
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        ValueMatcher::Contains { value: value.into() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let ValueMatcher::Regex { pattern } = self {
            whole_match_regex(pattern)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ValueMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueMatcher::Exact { value } => write!(f, "== {value}"),
            ValueMatcher::Regex { pattern } => write!(f, "~ {pattern}"),
            ValueMatcher::Present => write!(f, "present"),
            ValueMatcher::Absent => write!(f, "absent"),
            ValueMatcher::Contains { value } => write!(f, "contains {value}"),
        }
    }
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values (null = path must exist)
        expressions: BTreeMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

impl BodyMatcher {
    pub fn contains(value: impl Into<String>) -> Self {
        BodyMatcher::Contains { value: value.into() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let BodyMatcher::Regex { pattern } = self {
            regex::Regex::new(pattern).map_err(|source| ConfigError::Regex {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Whether this is a template response
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
            template: false,
        }
    }
}

impl ResponseDefinition {
    /// Empty `200 OK`.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, content: impl Into<String>) -> Self {
        self.body = Some(ResponseBody::Text {
            content: content.into(),
        });
        self
    }

    pub fn with_json(mut self, content: serde_json::Value) -> Self {
        self.body = Some(ResponseBody::Json { content });
        self
    }

    pub fn templated(mut self) -> Self {
        self.template = true;
        self
    }

    /// Configured `Content-Type`, looked up case-insensitively.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=599).contains(&self.status) {
            return Err(ConfigError::Status(self.status));
        }
        if let Some(body @ ResponseBody::Base64 { .. }) = &self.body {
            body.to_bytes()?;
        }
        Ok(())
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => {
                serde_json::to_vec(content).map_err(|e| ConfigError::Body(e.to_string()))
            }
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| ConfigError::Body(format!("invalid base64: {e}")))
            }
            ResponseBody::File { path } => std::fs::read(path).map_err(|source| ConfigError::Io {
                path: path.into(),
                source,
            }),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } | ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    pub fn fixed(ms: u64) -> Self {
        Self {
            fixed_ms: ms,
            ..Self::default()
        }
    }

    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched stubs
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type of the built-in not-found response
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Serve the `/__admin` endpoints
    #[serde(default = "default_true")]
    pub admin_enabled: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
            admin_enabled: true,
        }
    }
}

fn default_content_type() -> String {
    "application/json".to_string()
}
