use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder, Proxy, RequestBuilder};
use serde_json::Value;
use url::Url;

use super::{headers_to_map, HttpRequest, HttpResponse};
use crate::error::{EngineError, EngineResult};
use crate::EngineConfig;

/// Executes one request and always yields a response record.
///
/// Implementations must not hold shared mutable state: the orchestrator calls
/// `execute` concurrently for independent requests.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> HttpResponse;
}

/// reqwest-backed executor. Every request carries its own timeout taken from
/// the `HttpRequest`, independent of any run-level deadline.
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let mut builder = ClientBuilder::new()
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(proxy) = config.proxy.as_deref() {
            let p = Proxy::all(proxy).map_err(|e| {
                EngineError::Configuration(format!("invalid proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(p);
        }

        let inner = builder
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner,
            user_agent: config.user_agent.clone(),
        })
    }

    fn build_request(&self, req: &HttpRequest) -> Result<RequestBuilder, String> {
        let url = Url::parse(&req.url).map_err(|e| format!("Invalid URL '{}': {}", req.url, e))?;
        let mut builder = self.inner.request(req.method.to_reqwest(), url);

        for (key, val) in &req.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| format!("Invalid header name '{}': {}", key, e))?;
            let value = HeaderValue::from_str(val)
                .map_err(|e| format!("Invalid header value for '{}': {}", key, e))?;
            builder = builder.header(name, value);
        }

        if req.header(USER_AGENT.as_str()).is_none() {
            builder = builder.header(USER_AGENT, self.user_agent.as_str());
        }

        if let Some(payload) = &req.payload {
            builder = builder.json(payload);
        }

        Ok(builder.timeout(Duration::from_millis(req.timeout)))
    }
}

#[async_trait]
impl RequestExecutor for HttpClient {
    async fn execute(&self, request: &HttpRequest) -> HttpResponse {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let builder = match self.build_request(request) {
            Ok(b) => b,
            Err(e) => return HttpResponse::failure(e, elapsed(start)),
        };

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                let error = describe_error(&e, request.timeout);
                warn!("{} {} failed: {}", request.method, request.url, error);
                return HttpResponse::failure(error, elapsed(start));
            }
        };

        let status_code = response.status().as_u16();
        let headers = headers_to_map(response.headers());

        // The body read counts against the same per-request timeout.
        let body = match response.bytes().await {
            Ok(bytes) => decode_body(&bytes),
            Err(e) => {
                let error = describe_error(&e, request.timeout);
                warn!("{} {} body read failed: {}", request.method, request.url, error);
                let mut failed = HttpResponse::failure(error, elapsed(start));
                failed.headers = headers;
                return failed;
            }
        };

        let response_time = elapsed(start);
        debug!(
            "{} {} -> {} in {}ms",
            request.method, request.url, status_code, response_time
        );

        HttpResponse {
            status_code,
            response_time,
            body,
            headers,
            error: None,
        }
    }
}

/// Maps a transport error onto the error text the classifier keys off.
fn describe_error(err: &reqwest::Error, timeout_ms: u64) -> String {
    if err.is_timeout() {
        format!("Request timeout after {}ms", timeout_ms)
    } else if err.is_connect() {
        format!("Connection error: {}", err)
    } else if err.is_body() || err.is_decode() {
        format!("Malformed response: {}", err)
    } else {
        format!("Connection error: {}", err)
    }
}

/// JSON when the body parses as JSON, text otherwise, null when empty.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
