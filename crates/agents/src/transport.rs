//! HTTP transport used by every adapter.
//!
//! Adapters only ever see [`Transport`]; the reqwest-backed [`HttpTransport`]
//! is the default, and tests swap in their own implementation or point the
//! adapter at a mock server.
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

/// Receives raw body chunks in arrival order. Returning an error aborts the transfer.
pub type ChunkSink<'a> = dyn FnMut(&str) -> Result<()> + Send + 'a;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// A JSON POST with `content-type: application/json` already set
    pub fn post<S: Into<String>>(url: S, body: Value) -> Self {
        HttpRequest {
            method: Method::POST,
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
            timeout: Duration::from_secs(90),
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Full body for buffered calls; empty when the body was streamed to a sink
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request. With a sink, the body is delivered chunk by chunk
    /// and the returned body is empty.
    async fn fetch(
        &self,
        request: HttpRequest,
        on_chunk: Option<&mut ChunkSink<'_>>,
    ) -> Result<HttpResponse>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        request: HttpRequest,
        on_chunk: Option<&mut ChunkSink<'_>>,
    ) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let Some(sink) = on_chunk else {
            let body = response.text().await?;
            return Ok(HttpResponse { status, body });
        };

        let mut stream = response.bytes_stream();
        // Bytes of a multi-byte character split across reads wait for the next read.
        let mut pending: Vec<u8> = Vec::new();
        while let Some(bytes) = stream.next().await {
            pending.extend_from_slice(&bytes?);
            let split = utf8_boundary(&pending);
            if split == 0 {
                continue;
            }
            let text = String::from_utf8_lossy(&pending[..split]).into_owned();
            pending.drain(..split);
            sink(&text)?;
        }
        if !pending.is_empty() {
            sink(&String::from_utf8_lossy(&pending))?;
        }

        Ok(HttpResponse {
            status,
            body: String::new(),
        })
    }
}

/// Length of the longest prefix that does not end inside a UTF-8 sequence
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Invalid bytes will never complete; hand everything over lossily
        Err(_) => bytes.len(),
    }
}
