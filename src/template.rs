//! Template engine for dynamic responses.
//!
//! Uses Handlebars, rendered against the request that triggered the stub.

use crate::journal::RecordedRequest;
use crate::matcher::MatchContext;
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Values a template can refer to.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    /// Path parameters from URL template matching
    pub path: &'a HashMap<String, String>,
    /// Regex capture groups
    pub captures: &'a HashMap<String, String>,
    pub query: &'a BTreeMap<String, String>,
    /// Request headers, lower-cased names
    pub headers: BTreeMap<&'a str, &'a str>,
    pub method: &'a str,
    pub request_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    /// Request body parsed as JSON, when it is JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(match_ctx: &'a MatchContext, request: &'a RecordedRequest) -> Self {
        let body = request.body_text();
        Self {
            path: &match_ctx.path_params,
            captures: &match_ctx.captures,
            query: &request.query,
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            method: &request.method,
            request_path: &request.path,
            body,
            json: body.and_then(|b| serde_json::from_str(b).ok()),
        }
    }
}

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(default: |value: Json, fallback: str| match value {
    Value::Null => fallback.to_string(),
    Value::String(s) if s.is_empty() => fallback.to_string(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
});

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));
        handlebars.register_helper("default", Box::new(default));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));

        // Responses are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string.
    pub fn render(
        &self,
        template: &str,
        ctx: &TemplateContext<'_>,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render_template(template, ctx)
    }

    /// Render every string inside a JSON value that contains template syntax.
    pub fn render_json(
        &self,
        value: &Value,
        ctx: &TemplateContext<'_>,
    ) -> Result<Value, handlebars::RenderError> {
        Ok(match value {
            Value::String(s) if s.contains("{{") => Value::String(self.render(s, ctx)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_json(v, ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => {
                let mut rendered = serde_json::Map::with_capacity(fields.len());
                for (k, v) in fields {
                    rendered.insert(k.clone(), self.render_json(v, ctx)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffff_ffff_ffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    // An unknown specifier makes chrono's Display fail
    let mut rendered = String::new();
    write!(rendered, "{}", chrono::Utc::now().format(format)).map_err(|_| {
        handlebars::RenderErrorReason::Other(format!("invalid date format: {format}"))
    })?;
    out.write(&rendered)?;
    Ok(())
}
