//! Request / Response Model
//!
//! The subset of the Fetch API types the offline engine reasons about:
//! methods, modes, credentials, an ordered header multi-map, request bodies
//! that may still be streaming, and fully buffered responses.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use futures::io::{AsyncRead, AsyncReadExt};
use serde::{Deserialize, Serialize};

// ── Method ──────────────────────────────────────────────────

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl Method {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }

    /// Parse a method name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let method = match name.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "OPTIONS" => Self::Options,
            _ => return None,
        };
        Some(method)
    }

    /// Methods whose requests are queued while offline.
    ///
    /// PATCH is deliberately absent; only the allow-list can opt it in.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Mode / credentials / cache ──────────────────────────────

/// Request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Same-origin only
    SameOrigin,
    /// No CORS
    NoCors,
    /// CORS
    #[default]
    Cors,
    /// Navigate
    Navigate,
}

/// Request credentials mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestCredentials {
    /// Never include credentials
    Omit,
    /// Include for same-origin only
    #[default]
    SameOrigin,
    /// Always include
    Include,
}

/// Request cache mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestCache {
    /// Default browser behavior
    #[default]
    Default,
    /// No store
    NoStore,
    /// Reload (revalidate against the origin, bypassing intermediate caches)
    Reload,
    /// No cache
    NoCache,
}

// ── Headers ─────────────────────────────────────────────────

/// Ordered header multi-map. Names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    /// Combined value for `name`; repeated values are joined with `", "`.
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Flatten into a plain name → value mapping.
    ///
    /// Names are lower-cased and repeated names collapse into one
    /// comma-joined value, matching how the Fetch API enumerates headers.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &self.0 {
            map.entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }
        map
    }

    /// Rebuild headers from a flattened mapping.
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        map.iter()
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

// ── Body ────────────────────────────────────────────────────

/// Request body. A streaming body can only be read once.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Stream(Pin<Box<dyn AsyncRead + Send + Sync>>),
}

impl Body {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Bytes of a buffered body; `None` for empty or streaming bodies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Read the body fully and return a copy of its bytes.
    ///
    /// A streaming body is consumed and replaced by the buffered bytes, so
    /// the request stays usable afterwards. `None` for an empty body.
    pub async fn buffer(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        match self {
            Self::Empty => Ok(None),
            Self::Bytes(bytes) => Ok(Some(bytes.clone())),
            Self::Stream(stream) => {
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await?;
                let copy = buf.clone();
                *self = Self::Bytes(buf);
                Ok(Some(copy))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

// ── Request ─────────────────────────────────────────────────

/// An intercepted (or replayed) request.
#[derive(Debug)]
pub struct Request {
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Body,
    /// Request mode
    pub mode: RequestMode,
    /// Credentials policy
    pub credentials: RequestCredentials,
    /// Cache mode
    pub cache: RequestCache,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Headers::new(),
            body: Body::Empty,
            mode: RequestMode::default(),
            credentials: RequestCredentials::default(),
            cache: RequestCache::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_credentials(mut self, credentials: RequestCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_cache(mut self, cache: RequestCache) -> Self {
        self.cache = cache;
        self
    }
}

// ── Response ────────────────────────────────────────────────

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Final URL of the response
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Status text
    pub status_text: String,
    /// Response headers
    pub headers: Headers,
    /// Response body bytes
    pub body: Vec<u8>,
    /// Set when the response was reached by following a redirect
    pub redirected: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            url: String::new(),
            status,
            status_text: String::from(status_text(status)),
            headers: Headers::new(),
            body: Vec::new(),
            redirected: false,
        }
    }

    /// `200 OK` with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    /// Status in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}
