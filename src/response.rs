//! Response templates and rendering.
//!
//! A [`ResponseTemplate`] is the declarative half of a stub mapping. The
//! [`Renderer`] turns it into a [`RenderedResponse`] for one request,
//! resolving file bodies and Handlebars templates at that point.

use crate::error::{RegistrationError, RenderError};
use crate::request::RequestDescriptor;
use crate::template::TemplateEngine;
use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Canned response returned when a stub matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseTemplate {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Overrides the reason phrase derived from the status code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Response headers, emitted in order; repeated names allowed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<ResponseHeader>,

    /// Response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,

    /// Render body and header values as Handlebars templates
    #[serde(default)]
    pub transform: bool,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self::with_status(default_status())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub name: String,
    pub value: String,
}

/// Response body source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// File under the stub files root, read on every request
    File { path: String },
}

impl ResponseTemplate {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            status_message: None,
            headers: Vec::new(),
            body: None,
            transform: false,
        }
    }

    pub fn ok() -> Self {
        Self::with_status(200)
    }

    pub fn created() -> Self {
        Self::with_status(201)
    }

    pub fn no_content() -> Self {
        Self::with_status(204)
    }

    pub fn bad_request() -> Self {
        Self::with_status(400)
    }

    pub fn unauthorized() -> Self {
        Self::with_status(401)
    }

    pub fn forbidden() -> Self {
        Self::with_status(403)
    }

    pub fn not_found() -> Self {
        Self::with_status(404)
    }

    pub fn server_error() -> Self {
        Self::with_status(500)
    }

    pub fn service_unavailable() -> Self {
        Self::with_status(503)
    }

    /// 301 with `Location`.
    pub fn permanent_redirect(location: impl Into<String>) -> Self {
        Self::with_status(301).header("Location", location)
    }

    /// 302 with `Location`.
    pub fn temporary_redirect(location: impl Into<String>) -> Self {
        Self::with_status(302).header("Location", location)
    }

    /// 303 with `Location`.
    pub fn see_other(location: impl Into<String>) -> Self {
        Self::with_status(303).header("Location", location)
    }

    pub fn status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Append a header. Calling this twice with the same name emits two lines.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(ResponseHeader {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn body(mut self, text: impl Into<String>) -> Self {
        self.body = Some(ResponseBody::Text {
            content: text.into(),
        });
        self
    }

    pub fn json_body(mut self, json: serde_json::Value) -> Self {
        self.body = Some(ResponseBody::Json { content: json });
        self
    }

    pub fn binary_body(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.body = Some(ResponseBody::Base64 {
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
        });
        self
    }

    /// Serve the file at `path`, relative to the stub files root.
    pub fn body_file(mut self, path: impl Into<String>) -> Self {
        self.body = Some(ResponseBody::File { path: path.into() });
        self
    }

    pub fn transformed(mut self) -> Self {
        self.transform = true;
        self
    }

    /// Reject templates that could never be written to the wire.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if !(100..=599).contains(&self.status) {
            return Err(RegistrationError::InvalidStatus(self.status));
        }
        if let Some(message) = &self.status_message {
            if ReasonPhrase::try_from(message.as_bytes()).is_err() {
                return Err(RegistrationError::InvalidStatusMessage(message.clone()));
            }
        }
        for header in &self.headers {
            if HeaderName::from_bytes(header.name.as_bytes()).is_err() {
                return Err(RegistrationError::InvalidHeader(header.name.clone()));
            }
            // Templated values are checked once rendered.
            if !self.transform && HeaderValue::from_str(&header.value).is_err() {
                return Err(RegistrationError::InvalidHeader(header.name.clone()));
            }
        }
        if let Some(ResponseBody::Base64 { content }) = &self.body {
            if let Err(e) = base64::engine::general_purpose::STANDARD.decode(content) {
                return Err(RegistrationError::InvalidBody(e.to_string()));
            }
        }
        Ok(())
    }

    fn has_content_type(&self) -> bool {
        self.headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case("content-type"))
    }
}

/// A response ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RenderedResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            reason: None,
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Bytes::from(body.into()),
        }
    }

    /// The default answer when no stub matches.
    pub fn no_match(request: &RequestDescriptor, stub_count: usize) -> Self {
        Self::text(
            404,
            format!(
                "No stub mapping matched the request.\n\n{} {}\n\n{} stub mapping(s) registered.\n",
                request.method(),
                request.url(),
                stub_count
            ),
        )
    }

    /// The answer when a matched stub could not be rendered.
    pub fn render_failure(error: &RenderError) -> Self {
        Self::text(500, format!("Stub response could not be rendered: {error}\n"))
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if let Some(reason) = self.reason {
            match ReasonPhrase::try_from(reason.into_bytes()) {
                Ok(reason) => {
                    response.extensions_mut().insert(reason);
                }
                Err(_) => warn!(status = self.status, "Dropping invalid status message"),
            }
        }

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "Dropping invalid response header"),
            }
        }
        response
    }
}

/// Materializes response templates for individual requests.
pub struct Renderer {
    files_root: PathBuf,
    templates: TemplateEngine,
}

impl Renderer {
    pub fn new(files_root: impl Into<PathBuf>) -> Self {
        Self {
            files_root: files_root.into(),
            templates: TemplateEngine::new(),
        }
    }

    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    pub async fn render(
        &self,
        template: &ResponseTemplate,
        request: &RequestDescriptor,
    ) -> Result<RenderedResponse, RenderError> {
        let mut headers = Vec::with_capacity(template.headers.len() + 1);
        for header in &template.headers {
            let value = if template.transform {
                self.templates.render(&header.value, request)?
            } else {
                header.value.clone()
            };
            headers.push((header.name.clone(), value));
        }

        let body = match &template.body {
            None => Bytes::new(),
            Some(ResponseBody::Text { content }) => {
                if template.transform {
                    Bytes::from(self.templates.render(content, request)?)
                } else {
                    Bytes::from(content.clone())
                }
            }
            Some(ResponseBody::Json { content }) => {
                let rendered = if template.transform {
                    serde_json::to_vec(&self.templates.render_json(content, request)?)?
                } else {
                    serde_json::to_vec(content)?
                };
                if !template.has_content_type() {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Bytes::from(rendered)
            }
            Some(ResponseBody::Base64 { content }) => {
                Bytes::from(base64::engine::general_purpose::STANDARD.decode(content)?)
            }
            Some(ResponseBody::File { path }) => {
                let contents = self.read_body_file(path).await?;
                match (template.transform, String::from_utf8(contents)) {
                    (true, Ok(text)) => Bytes::from(self.templates.render(&text, request)?),
                    (_, Ok(text)) => Bytes::from(text),
                    (_, Err(raw)) => Bytes::from(raw.into_bytes()),
                }
            }
        };

        Ok(RenderedResponse {
            status: template.status,
            reason: template.status_message.clone(),
            headers,
            body,
        })
    }

    async fn read_body_file(&self, path: &str) -> Result<Vec<u8>, RenderError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(RenderError::BodyFileOutsideRoot(relative.to_path_buf()));
        }

        let full = self.files_root.join(relative);
        tokio::fs::read(&full)
            .await
            .map_err(|source| RenderError::MissingBodyFile { path: full, source })
    }
}
