//! Builds HTTP responses from stub definitions.

use crate::config::{GlobalSettings, ResponseBody, ResponseDefinition};
use crate::journal::RecordedRequest;
use crate::matcher::MatchContext;
use crate::registry::StubMatch;
use crate::template::{TemplateContext, TemplateEngine};
use std::time::Duration;
use tracing::{debug, warn};

/// A fully rendered response, independent of the HTTP stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Renders stub responses.
pub struct Responder {
    templates: TemplateEngine,
    settings: GlobalSettings,
    default_response: Option<ResponseDefinition>,
}

impl Responder {
    pub fn new(settings: GlobalSettings, default_response: Option<ResponseDefinition>) -> Self {
        Self {
            templates: TemplateEngine::new(),
            settings,
            default_response,
        }
    }

    /// Respond for a matched stub, applying its delay.
    pub async fn respond(&self, matched: &StubMatch, request: &RecordedRequest) -> StubResponse {
        if let Some(delay) = &matched.stub.delay {
            let delay_ms = delay.calculate();
            if delay_ms > 0 {
                debug!(stub_id = %matched.stub.id, delay_ms, "Applying delay");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        self.render(&matched.stub.response, &matched.context, request)
            .unwrap_or_else(|reason| {
                warn!(stub_id = %matched.stub.id, %reason, "Failed to render stub response");
                render_failed(reason)
            })
    }

    /// Response for a request no stub answered.
    pub fn unmatched(&self, request: &RecordedRequest) -> StubResponse {
        if let Some(default) = &self.default_response {
            return self
                .render(default, &MatchContext::default(), request)
                .unwrap_or_else(|reason| {
                    warn!(%reason, "Failed to render default response");
                    render_failed(reason)
                });
        }

        StubResponse::new(404)
            .with_header("Content-Type", self.settings.default_content_type.clone())
            .with_body(
                br#"{"error": "not_found", "message": "No matching stub found"}"#.to_vec(),
            )
    }

    /// Render a response definition against a request.
    pub fn render(
        &self,
        definition: &ResponseDefinition,
        match_ctx: &MatchContext,
        request: &RecordedRequest,
    ) -> Result<StubResponse, String> {
        let body = match &definition.body {
            Some(body) if definition.template => self.render_template_body(body, match_ctx, request)?,
            Some(body) => body.to_bytes().map_err(|e| e.to_string())?,
            None => Vec::new(),
        };

        let mut response = StubResponse::new(definition.status).with_body(body);
        if definition.content_type().is_none() {
            if let Some(body) = &definition.body {
                response = response.with_header("Content-Type", body.content_type());
            }
        }
        for (name, value) in &definition.headers {
            response = response.with_header(name.clone(), value.clone());
        }

        Ok(response)
    }

    fn render_template_body(
        &self,
        body: &ResponseBody,
        match_ctx: &MatchContext,
        request: &RecordedRequest,
    ) -> Result<Vec<u8>, String> {
        let ctx = TemplateContext::new(match_ctx, request);
        match body {
            ResponseBody::Text { content } => self
                .templates
                .render(content, &ctx)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
            ResponseBody::Json { content } => {
                let rendered = self
                    .templates
                    .render_json(content, &ctx)
                    .map_err(|e| e.to_string())?;
                serde_json::to_vec(&rendered).map_err(|e| e.to_string())
            }
            other => other.to_bytes().map_err(|e| e.to_string()),
        }
    }
}

fn render_failed(reason: String) -> StubResponse {
    StubResponse::json(
        500,
        &serde_json::json!({"error": "render_failed", "message": reason}),
    )
}
