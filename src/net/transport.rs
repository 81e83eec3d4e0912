// src/net/transport.rs
// HTTP transport seam: reqwest binding for production, scripted mock for tests

use crate::errors::TransportError;
use crate::net::request::HttpMethod;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Wire-level request handed to the transport, already stripped of the
/// client's retry/priority envelope.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

/// Wire-level response before client-side classification.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }
}

/// Executes a single HTTP exchange within the given timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Io {
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn classify(error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout;
        }
        let reason = error.to_string();
        let lowered = reason.to_lowercase();
        if lowered.contains("tls") || lowered.contains("certificate") {
            TransportError::Tls { reason }
        } else {
            TransportError::Io { reason }
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let url = Url::parse(&request.url).map_err(|e| TransportError::Io {
            reason: format!("invalid url {}: {}", request.url, e),
        })?;

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .expect("method names are valid tokens");

        let mut builder = self.client.request(method, url).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(Self::classify)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(Self::classify)?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Scripted transport for tests: outcomes are dequeued per call, and
/// every executed request is recorded for assertions. An empty script
/// yields `200 OK` with an empty body.
pub struct MockTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    executed: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, outcome: Result<HttpResponse, TransportError>) {
        self.script
            .lock()
            .expect("mock transport poisoned")
            .push_back(outcome);
    }

    pub fn enqueue_status(&self, status: u16) {
        self.enqueue(Ok(HttpResponse::with_status(status)));
    }

    pub fn enqueue_error(&self, error: TransportError) {
        self.enqueue(Err(error));
    }

    /// Delay every execution, simulating a slow exchange.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().expect("mock transport poisoned") = delay;
    }

    pub fn executed_requests(&self) -> Vec<HttpRequest> {
        self.executed
            .lock()
            .expect("mock transport poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.executed.lock().expect("mock transport poisoned").len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.executed
            .lock()
            .expect("mock transport poisoned")
            .push(request);

        let delay = *self.delay.lock().expect("mock transport poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .expect("mock transport poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::with_status(200)))
    }
}
