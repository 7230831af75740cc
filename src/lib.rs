//! Stub Server
//!
//! A local HTTP stub server for tests. Register request matchers with canned
//! responses, point an HTTP client at the server, then verify which requests
//! it received.
//!
//! # Features
//!
//! - **Request Matching**: Match by method, path, headers, query params, body
//! - **Static Responses**: Return fixed responses for matched requests
//! - **Dynamic Templates**: Use Handlebars templates for dynamic responses
//! - **Latency Simulation**: Add fixed or random delays
//! - **Match Limits**: Limit how many times a stub can be matched
//! - **Verification**: Assert on the journal of received requests
//!
//! # Example Configuration
//!
//! ```yaml
//! server:
//!   port: 9090
//! stubs:
//!   - id: welcome
//!     request:
//!       method: [GET]
//!       path:
//!         type: url
//!         value: /rest
//!     response:
//!       status: 200
//!       body:
//!         type: text
//!         content: "Welcome to Baeldung!"
//! ```

mod admin;
pub mod config;
pub mod error;
pub mod fixture;
pub mod journal;
pub mod matcher;
pub mod registry;
pub mod responder;
pub mod server;
pub mod template;

pub use config::{
    BodyMatcher, DelayConfig, PathMatcher, RequestMatcher, ResponseBody, ResponseDefinition,
    StubDefinition, StubServerConfig, ValueMatcher,
};
pub use error::{ConfigError, ServerError, VerificationError};
pub use journal::{CountMatcher, RecordedRequest};
pub use server::StubServer;
