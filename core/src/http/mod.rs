pub mod client;

pub use client::{HttpClient, RequestExecutor};

use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TestConfig;

/// HTTP methods a test may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

/// A single executable request: the unmodified base request or one of its mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub payload: Option<Value>,
    /// Per-request timeout in milliseconds.
    pub timeout: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: u64) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            payload: None,
            timeout,
        }
    }

    /// Builds the happy-path request for a test configuration.
    pub fn from_config(config: &TestConfig) -> Self {
        Self {
            url: config.url.clone(),
            method: config.method,
            headers: config.headers.clone(),
            payload: config.payload.clone(),
            timeout: config.timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Normalized outcome of one outbound call. Failed calls carry `status_code == 0`
/// and a populated `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    /// Elapsed time in milliseconds, up to completion or failure.
    pub response_time: u64,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HttpResponse {
    pub fn failure(error: impl Into<String>, response_time: u64) -> Self {
        Self {
            status_code: 0,
            response_time,
            body: Value::Null,
            headers: BTreeMap::new(),
            error: Some(error.into()),
        }
    }

    /// True when a response arrived and its status is below 400.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status_code > 0 && self.status_code < 400
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }
}

/// Flattens a reqwest header map, dropping values that are not valid UTF-8.
pub(crate) fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect()
}
