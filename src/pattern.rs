//! Request patterns: the rule half of a stub mapping.

use crate::error::RegistrationError;
use crate::matcher::{full_match, CompiledMatcher, ValueMatcher};
use crate::request::RequestDescriptor;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP method to match; `Any` matches every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    #[default]
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Any => "ANY",
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Head => "HEAD",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Trace => "TRACE",
        }
    }

    fn accepts(&self, method: &str) -> bool {
        *self == RequestMethod::Any || self.as_str().eq_ignore_ascii_case(method)
    }
}

/// Declarative request pattern.
///
/// At most one of the four URL fields may be set; none means any URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestPattern {
    #[serde(default)]
    pub method: RequestMethod,

    /// Exact path plus query string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Exact path, query ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,

    /// Full-string regex over path plus query string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,

    /// Full-string regex over the path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path_pattern: Option<String>,

    /// Header matchers; names are case-insensitive
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, ValueMatcher>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, ValueMatcher>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, ValueMatcher>,

    /// Expected basic-auth credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicCredentials>,

    /// Body matchers; all must match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<ValueMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    /// The `Authorization` header value these credentials produce.
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl RequestPattern {
    pub fn new(method: RequestMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn any() -> Self {
        Self::new(RequestMethod::Any)
    }

    pub fn get() -> Self {
        Self::new(RequestMethod::Get)
    }

    pub fn post() -> Self {
        Self::new(RequestMethod::Post)
    }

    pub fn put() -> Self {
        Self::new(RequestMethod::Put)
    }

    pub fn delete() -> Self {
        Self::new(RequestMethod::Delete)
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn url_path(mut self, path: impl Into<String>) -> Self {
        self.url_path = Some(path.into());
        self
    }

    pub fn url_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_pattern = Some(pattern.into());
        self
    }

    pub fn url_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_path_pattern = Some(pattern.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.headers.insert(name.into(), matcher);
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.query.insert(name.into(), matcher);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.cookies.insert(name.into(), matcher);
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Add a body matcher. Repeated calls are conjunctive.
    pub fn body(mut self, matcher: ValueMatcher) -> Self {
        self.body.push(matcher);
        self
    }

    /// Validate and compile the pattern.
    pub fn compile(&self) -> Result<CompiledPattern, RegistrationError> {
        let url = self.compile_url()?;

        let mut headers = self
            .headers
            .iter()
            .map(|(name, m)| Ok((name.to_ascii_lowercase(), CompiledMatcher::compile(m)?)))
            .collect::<Result<Vec<_>, RegistrationError>>()?;
        if let Some(credentials) = &self.basic_auth {
            headers.push((
                "authorization".to_string(),
                CompiledMatcher::EqualTo(credentials.header_value()),
            ));
        }

        Ok(CompiledPattern {
            method: self.method,
            url,
            headers,
            query: compile_named(&self.query)?,
            cookies: compile_named(&self.cookies)?,
            body: self
                .body
                .iter()
                .map(CompiledMatcher::compile)
                .collect::<Result<_, _>>()?,
        })
    }

    fn compile_url(&self) -> Result<UrlMatcher, RegistrationError> {
        let declared: Vec<&str> = [
            ("url", self.url.is_some()),
            ("url_path", self.url_path.is_some()),
            ("url_pattern", self.url_pattern.is_some()),
            ("url_path_pattern", self.url_path_pattern.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();

        if declared.len() > 1 {
            return Err(RegistrationError::ConflictingUrlMatchers(declared.join(", ")));
        }

        let url = if let Some(url) = &self.url {
            UrlMatcher::Equals(url.clone())
        } else if let Some(path) = &self.url_path {
            UrlMatcher::PathEquals(path.clone())
        } else if let Some(pattern) = &self.url_pattern {
            UrlMatcher::Matches(full_match(pattern)?)
        } else if let Some(pattern) = &self.url_path_pattern {
            UrlMatcher::PathMatches(full_match(pattern)?)
        } else {
            UrlMatcher::Any
        };
        Ok(url)
    }
}

fn compile_named(
    matchers: &BTreeMap<String, ValueMatcher>,
) -> Result<Vec<(String, CompiledMatcher)>, RegistrationError> {
    matchers
        .iter()
        .map(|(name, m)| Ok((name.clone(), CompiledMatcher::compile(m)?)))
        .collect()
}

#[derive(Debug, Clone)]
enum UrlMatcher {
    Any,
    Equals(String),
    PathEquals(String),
    Matches(Regex),
    PathMatches(Regex),
}

impl UrlMatcher {
    fn matches(&self, request: &RequestDescriptor) -> bool {
        match self {
            UrlMatcher::Any => true,
            UrlMatcher::Equals(url) => request.url() == url,
            UrlMatcher::PathEquals(path) => request.path() == path,
            UrlMatcher::Matches(regex) => regex.is_match(request.url()),
            UrlMatcher::PathMatches(regex) => regex.is_match(request.path()),
        }
    }
}

/// A validated pattern ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    method: RequestMethod,
    url: UrlMatcher,
    /// Lower-cased header names
    headers: Vec<(String, CompiledMatcher)>,
    query: Vec<(String, CompiledMatcher)>,
    cookies: Vec<(String, CompiledMatcher)>,
    body: Vec<CompiledMatcher>,
}

impl CompiledPattern {
    /// Whether the request satisfies every declared criterion.
    pub fn matches(&self, request: &RequestDescriptor) -> bool {
        if !self.method.accepts(request.method()) || !self.url.matches(request) {
            return false;
        }

        let headers_ok = self
            .headers
            .iter()
            .all(|(name, m)| m.matches_any(request.header_values(name)));
        let query_ok = self
            .query
            .iter()
            .all(|(name, m)| m.matches_any(request.query_values(name)));
        let cookies_ok = self
            .cookies
            .iter()
            .all(|(name, m)| m.matches_any(request.cookie_values(name)));
        if !(headers_ok && query_ok && cookies_ok) {
            return false;
        }

        if self.body.is_empty() {
            return true;
        }
        let body = request.body_text();
        self.body.iter().all(|m| match (m, body) {
            (CompiledMatcher::Absent, _) => request.body().is_empty(),
            (_, Some(text)) => m.matches(text),
            (_, None) => false,
        })
    }
}
