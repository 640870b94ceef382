//! Response templating.
//!
//! Responses registered with `transform: true` render their body and header
//! values through Handlebars, with the incoming request as context.

use crate::request::RequestDescriptor;
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Root object exposed to templates as `request`.
#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    request: RequestModel<'a>,
}

#[derive(Debug, Serialize)]
struct RequestModel<'a> {
    method: &'a str,
    url: &'a str,
    path: &'a str,
    /// First value of each query parameter
    query: BTreeMap<&'a str, &'a str>,
    /// First value of each header, keyed by lower-cased name
    headers: BTreeMap<String, &'a str>,
    cookies: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    /// Request body as JSON, when it parses
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<serde_json::Value>,
}

impl<'a> RequestModel<'a> {
    fn new(request: &'a RequestDescriptor) -> Self {
        let mut query = BTreeMap::new();
        for (name, value) in request.query_params() {
            query.entry(name.as_str()).or_insert(value.as_str());
        }
        let mut headers = BTreeMap::new();
        for (name, value) in request.headers() {
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert(value.as_str());
        }
        let mut cookies = BTreeMap::new();
        for (name, value) in request.cookies() {
            cookies.entry(name.as_str()).or_insert(value.as_str());
        }

        let body = request.body_text().filter(|b| !b.is_empty());
        Self {
            method: request.method(),
            url: request.url(),
            path: request.path(),
            query,
            headers,
            cookies,
            body,
            json: body.and_then(|b| serde_json::from_str(b).ok()),
        }
    }
}

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));

        // Bodies are not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against the request.
    pub fn render(
        &self,
        template: &str,
        request: &RequestDescriptor,
    ) -> Result<String, handlebars::RenderError> {
        let ctx = TemplateContext {
            request: RequestModel::new(request),
        };
        self.handlebars.render_template(template, &ctx)
    }

    /// Render every string leaf of a JSON value that contains template syntax.
    pub fn render_json(
        &self,
        json: &serde_json::Value,
        request: &RequestDescriptor,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        let ctx = TemplateContext {
            request: RequestModel::new(request),
        };
        self.render_json_value(json, &ctx)
    }

    fn render_json_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext<'_>,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        use serde_json::Value;

        Ok(match value {
            Value::String(s) if s.contains("{{") => {
                Value::String(self.handlebars.render_template(s, ctx)?)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_json_value(v, ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(members) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in members {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
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

/// `{{now}}` or `{{now "%Y-%m-%d"}}`, in UTC.
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
    let mut rendered = String::new();
    write!(rendered, "{}", chrono::Utc::now().format(format)).map_err(|_| {
        handlebars::RenderErrorReason::Other(format!("invalid time format `{}`", format))
    })?;
    out.write(&rendered)?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

/// `{{random min max}}`, inclusive; defaults to 0..=100.
fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let value = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

/// `{{default value "fallback"}}`: the fallback when value is missing or empty.
fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    let rendered = match h.param(0).map(|v| v.value()) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Null) | Some(serde_json::Value::String(_)) | None => {
            fallback.to_string()
        }
        Some(other) => other.to_string(),
    };
    out.write(&rendered)?;
    Ok(())
}
