//! The WireMock introduction stub set.
//!
//! Four stubs used by the integration suite and shipped as the default
//! configuration of the `stub-server` binary.

use crate::config::{
    BodyMatcher, PathMatcher, RequestMatcher, ResponseDefinition, StubDefinition, StubServerConfig,
    ValueMatcher,
};
use crate::error::ServerError;
use crate::server::StubServer;

pub const WELCOME_BODY: &str = "Welcome to Baeldung!";
pub const LIBRARY_BODY: &str = r#""testing-library": "WireMock""#;
pub const SERVICE_UNAVAILABLE_BODY: &str = "!!! Service Unavailable !!!";

/// Substrings a POST body must contain to be accepted.
pub const INTRO_BODY_FRAGMENTS: [&str; 3] = [
    r#""testing-library": "WireMock""#,
    r#""creator": "Tom Akehurst""#,
    r#""website": "wiremock.org""#,
];

/// YAML equivalent of [`intro_stubs`].
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default-config.yaml");

/// Stubs in registration order. Later stubs shadow earlier ones when both match.
pub fn intro_stubs() -> Vec<StubDefinition> {
    let post_intro = INTRO_BODY_FRAGMENTS.iter().fold(
        RequestMatcher::post(PathMatcher::url("/rest/wiremock"))
            .with_header("Content-Type", ValueMatcher::exact("application/json")),
        |matcher, fragment| matcher.with_body(BodyMatcher::contains(*fragment)),
    );

    vec![
        StubDefinition::new(
            "welcome",
            RequestMatcher::get(PathMatcher::url("/rest")),
            ResponseDefinition::ok().with_text(WELCOME_BODY),
        ),
        StubDefinition::new(
            "library-json",
            RequestMatcher::get(PathMatcher::regex("/rest/.*")),
            ResponseDefinition::with_status(200)
                .with_header("Content-Type", "application/json")
                .with_text(LIBRARY_BODY),
        ),
        StubDefinition::new(
            "service-unavailable",
            RequestMatcher::get(PathMatcher::exact("/rest/wiremock"))
                .with_header("Accept", ValueMatcher::regex("text/.*")),
            ResponseDefinition::with_status(503)
                .with_header("Content-Type", "text/html")
                .with_text(SERVICE_UNAVAILABLE_BODY),
        ),
        StubDefinition::new("post-intro", post_intro, ResponseDefinition::with_status(200)),
    ]
}

/// Start a server on `port` with the intro stubs registered.
pub async fn start_intro_server(port: u16) -> Result<StubServer, ServerError> {
    let mut config = StubServerConfig::on_port(port);
    config.stubs = intro_stubs();
    StubServer::start(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_intro_stubs() {
        let config: StubServerConfig = serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.stubs, intro_stubs());
    }

    #[test]
    fn test_intro_stubs_are_valid() {
        for stub in intro_stubs() {
            stub.validate().unwrap();
        }
    }
}
