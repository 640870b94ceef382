//! Normalized view of an incoming HTTP request used as matching input.

use bytes::Bytes;
use hyper::http::request::Parts;

/// An incoming request, decoded once and shared by matching and rendering.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: String,
    url: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    body: Bytes,
    body_text: Option<String>,
}

impl RequestDescriptor {
    /// Build a descriptor from raw request pieces.
    ///
    /// `url` is the request target as sent (path plus optional query string).
    pub fn new(
        method: &str,
        url: &str,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        let (path, query_string) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        let body = body.into();
        let body_text = std::str::from_utf8(&body).ok().map(str::to_string);

        let cookies = headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, value)| parse_cookie_header(value))
            .collect();

        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            path: path.to_string(),
            query: parse_query_string(query_string),
            headers,
            cookies,
            body,
            body_text,
        }
    }

    /// Build a descriptor from hyper request parts and the collected body.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Self::new(parts.method.as_str(), url, headers, body)
    }

    /// Upper-cased request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path plus query string, as sent by the client.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters in request order.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// All header lines in request order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Values of a header, looked up case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn cookie_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.cookies
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, when it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        self.body_text.as_deref()
    }
}

/// Parse a `Cookie` header value into name/value pairs.
fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = value.trim().trim_matches('"');
            Some((name.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Parse a query string into decoded key-value pairs, keeping repeats.
pub(crate) fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (url_decode(key), url_decode(value)),
            None => (url_decode(part), String::new()),
        })
        .collect()
}

/// Percent-decode a query component; `+` is a space.
fn url_decode(s: &str) -> String {
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
            other => decoded.push(other),
        }
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
