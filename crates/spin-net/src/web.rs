//! HTTP/JSON control channel.
//!
//! Requests are form-encoded POSTs carrying the session cookie once a token
//! is held. Replies are JSON, except that the server likes to emit
//! JavaScript single-quoted string literals, which are rewritten to JSON
//! strings before parsing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use spin_shared::constants::SET_SESSION_PATH;

use crate::error::WebError;

/// What a fetch is for; decides how its reply is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    Login,
    Friends,
    Mail,
    Prefs,
    BuddyIcon { buddy: String },
}

/// One request on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRequest {
    pub kind: FetchKind,
    pub url: String,
    /// Form fields. Values are raw bytes so names can go out in the wire
    /// charset.
    pub form: Vec<(&'static str, Vec<u8>)>,
    /// Session token sent as cookie.
    pub session: Option<String>,
}

impl WebRequest {
    pub fn new(kind: FetchKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            form: Vec::new(),
            session: None,
        }
    }

    pub fn field(mut self, key: &'static str, value: impl AsRef<[u8]>) -> Self {
        self.form.push((key, value.as_ref().to_vec()));
        self
    }

    pub fn session(mut self, token: Option<&str>) -> Self {
        self.session = token.map(str::to_owned);
        self
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn encode_form(&self) -> String {
        self.form
            .iter()
            .map(|(key, value)| {
                let key: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
                let value: String = form_urlencoded::byte_serialize(value).collect();
                format!("{key}={value}")
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Reply to a finished fetch.
#[derive(Debug, Clone)]
pub enum FetchReply {
    Json(Value),
    Bytes(Vec<u8>),
}

/// HTTP transport used by the session.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch_json(&self, request: &WebRequest) -> Result<Value, WebError>;

    async fn fetch_bytes(&self, url: &str, session: Option<&str>) -> Result<Vec<u8>, WebError>;

    /// Run `request` with the fetch method its kind calls for.
    async fn fetch(&self, request: &WebRequest) -> Result<FetchReply, WebError> {
        match request.kind {
            FetchKind::BuddyIcon { .. } => self
                .fetch_bytes(&request.url, request.session.as_deref())
                .await
                .map(FetchReply::Bytes),
            _ => self.fetch_json(request).await.map(FetchReply::Json),
        }
    }
}

/// [`WebFetcher`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, WebError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WebError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

fn session_cookie(token: &str) -> String {
    format!("session={token};session2={token}")
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch_json(&self, request: &WebRequest) -> Result<Value, WebError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.encode_form());
        if let Some(token) = &request.session {
            builder = builder.header(COOKIE, session_cookie(token));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| WebError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WebError::Status(resp.status().as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| WebError::Request(e.to_string()))?;
        debug!(url = %request.url, len = body.len(), "Web reply received");
        parse_reply(&body)
    }

    async fn fetch_bytes(&self, url: &str, session: Option<&str>) -> Result<Vec<u8>, WebError> {
        let mut builder = self.client.get(url);
        if let Some(token) = session {
            builder = builder.header(COOKIE, session_cookie(token));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| WebError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WebError::Status(resp.status().as_u16()));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| WebError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Parse a reply body, accepting single-quoted string literals.
pub fn parse_reply(body: &str) -> Result<Value, WebError> {
    let fixed = normalize_js_literals(body);
    serde_json::from_str(fixed.trim()).map_err(|e| WebError::Json(e.to_string()))
}

/// Rewrite JavaScript string literals into JSON strings.
///
/// Single-quoted literals become double-quoted: embedded `"` gets escaped,
/// `\'` loses its backslash. Escapes JSON doesn't know (`\x` for any other
/// `x`) are reduced to the bare character. Double-quoted literals pass
/// through unchanged.
pub fn normalize_js_literals(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    out.push(c);
                    match c {
                        '\\' => {
                            if let Some(next) = chars.next() {
                                out.push(next);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '\'' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(e @ ('\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u' | '"')) => {
                                out.push('\\');
                                out.push(e);
                            }
                            Some(other) => out.push(other),
                            None => {}
                        },
                        _ => out.push(c),
                    }
                }
                out.push('"');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Link that logs the browser into the web session before opening `target`.
pub fn session_url(base: &str, token: &str, target: &str) -> String {
    let token: String = form_urlencoded::byte_serialize(token.as_bytes()).collect();
    let target: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!(
        "{}{SET_SESSION_PATH}?session={token}&target={target}",
        base.trim_end_matches('/')
    )
}
