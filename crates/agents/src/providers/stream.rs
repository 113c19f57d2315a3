//! Decoding of vendor responses.
//!
//! [`StreamDecoder`] turns raw transport chunks into text fragments, usage
//! increments and errors without touching the network, so every vendor
//! protocol can be tested chunk by chunk. [`stream_request`] and
//! [`buffered_request`] wire decoding to a [`Transport`].
use anyhow::anyhow;
use serde_json::Value;
use tracing::{debug, trace};

use super::base::{Listener, Usage};
use super::utils::{error_field, unknown_error};
use crate::errors::{AgentError, AgentResult};
use crate::transport::{HttpRequest, Transport};

/// What one chunk produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkEvents {
    /// New text, in arrival order; never cumulative
    pub fragments: Vec<String>,
    pub usage: Usage,
    /// Formatted `(code) message` when the vendor reported an error
    pub error: Option<String>,
}

impl ChunkEvents {
    pub fn push_fragment(&mut self, fragment: &str) {
        if !fragment.is_empty() {
            self.fragments.push(fragment.to_string());
        }
    }

    pub fn text(&self) -> String {
        self.fragments.concat()
    }

    /// Append the events of a later chunk
    pub fn merge(&mut self, other: ChunkEvents) {
        self.fragments.extend(other.fragments);
        self.usage += other.usage;
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}

/// Vendor-specific half of stream decoding
pub trait Protocol: Send {
    /// Handle one decoded record that is not an error
    fn record(&mut self, record: &Value, events: &mut ChunkEvents);

    /// Render an error payload as `(code) message`
    fn format_error(&self, payload: &Value) -> Option<String>;
}

/// Turns cumulative usage snapshots into increments
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTracker {
    last: Usage,
}

impl UsageTracker {
    /// The most recent snapshot
    pub fn last(&self) -> Usage {
        self.last
    }

    /// Increment since the previous snapshot. Counters that went backwards
    /// contribute nothing.
    pub fn advance(&mut self, snapshot: Usage) -> Usage {
        let delta = Usage::new(
            snapshot.input_tokens.saturating_sub(self.last.input_tokens),
            snapshot.output_tokens.saturating_sub(self.last.output_tokens),
            snapshot
                .cache_creation_input_tokens
                .saturating_sub(self.last.cache_creation_input_tokens),
            snapshot
                .cache_read_input_tokens
                .saturating_sub(self.last.cache_read_input_tokens),
        );
        self.last = Usage::new(
            self.last.input_tokens.max(snapshot.input_tokens),
            self.last.output_tokens.max(snapshot.output_tokens),
            self.last
                .cache_creation_input_tokens
                .max(snapshot.cache_creation_input_tokens),
            self.last
                .cache_read_input_tokens
                .max(snapshot.cache_read_input_tokens),
        );
        delta
    }
}

/// Line-oriented decoder for `data: {json}` streams.
///
/// Only complete lines are decoded; a trailing partial line waits for the
/// next chunk. A chunk or buffer holding a bare JSON document carrying
/// `error` is reported as a single error.
pub struct StreamDecoder<P> {
    protocol: P,
    buffer: String,
    failed: bool,
    records: usize,
}

impl<P: Protocol> StreamDecoder<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            buffer: String::new(),
            failed: false,
            records: 0,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Records handed to the protocol so far
    pub fn records(&self) -> usize {
        self.records
    }

    /// Feed one raw chunk
    pub fn decode(&mut self, chunk: &str) -> ChunkEvents {
        let mut events = ChunkEvents::default();
        if self.failed {
            return events;
        }
        // an error body can arrive while a partial line is still buffered
        if let Some(error) = self.envelope_error(chunk) {
            self.fail(&mut events, error);
            return events;
        }
        self.buffer.push_str(chunk);

        if let Some(error) = self.envelope_error(&self.buffer) {
            self.fail(&mut events, error);
            return events;
        }
        if self.awaiting_document() {
            return events;
        }
        let Some(end) = self.buffer.rfind('\n') else {
            return events;
        };
        let complete: String = self.buffer.drain(..=end).collect();
        self.decode_lines(&complete, &mut events);
        events
    }

    /// Decode whatever is left once the transport is done
    pub fn finish(&mut self) -> ChunkEvents {
        let mut events = ChunkEvents::default();
        if self.failed {
            return events;
        }
        if let Some(error) = self.envelope_error(&self.buffer) {
            self.fail(&mut events, error);
            return events;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_lines(&rest, &mut events);
        events
    }

    fn fail(&mut self, events: &mut ChunkEvents, error: String) {
        self.failed = true;
        self.buffer.clear();
        events.error = Some(error);
    }

    fn envelope_error(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if !starts_document(trimmed) {
            return None;
        }
        let value: Value = serde_json::from_str(trimmed).ok()?;
        error_field(&value)?;
        Some(
            self.protocol
                .format_error(&value)
                .unwrap_or_else(|| unknown_error(trimmed)),
        )
    }

    /// A multi-line JSON document (a pretty-printed error body) is decoded
    /// whole. Waiting stops at the first complete line that is a record of
    /// its own, so a malformed line never holds back the ones after it.
    fn awaiting_document(&self) -> bool {
        let trimmed = self.buffer.trim_start();
        if !starts_document(trimmed) {
            return false;
        }
        let mut lines = trimmed.split_inclusive('\n');
        let first_line = lines.next().unwrap_or_default();
        if serde_json::from_str::<Value>(first_line).is_ok() {
            return false;
        }
        !lines
            .filter(|line| line.ends_with('\n'))
            .any(|line| is_record_line(line.trim()))
    }

    fn decode_lines(&mut self, text: &str, events: &mut ChunkEvents) {
        for line in text.lines() {
            let line = line.trim();
            let payload = match line.strip_prefix("data:") {
                Some(payload) => payload.trim_start(),
                None if starts_document(line) => line,
                // blank lines, `event:` names and SSE comments
                None => continue,
            };
            if payload.is_empty() || payload == "[DONE]" {
                continue;
            }

            let record: Value = match serde_json::from_str(payload) {
                Ok(record) => record,
                Err(e) => {
                    trace!(error = %e, line = payload, "skipping undecodable stream record");
                    continue;
                }
            };

            if error_field(&record).is_some() {
                let error = self
                    .protocol
                    .format_error(&record)
                    .unwrap_or_else(|| unknown_error(payload));
                self.fail(events, error);
                return;
            }
            self.records += 1;
            self.protocol.record(&record, events);
        }
    }
}

fn starts_document(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

fn is_record_line(line: &str) -> bool {
    line.starts_with("data:") || serde_json::from_str::<Value>(line).is_ok_and(|v| v.is_object())
}

/// Stream `request` through `protocol`.
///
/// Every fragment is appended to the returned text and handed to
/// `listener`; usage increments land in `usage` as they arrive. A vendor
/// error, in-band or through the status code, fails the whole call, and so
/// does a successful body without a single stream record.
pub async fn stream_request<P: Protocol>(
    vendor: &str,
    transport: &dyn Transport,
    request: HttpRequest,
    protocol: P,
    mut listener: Option<&mut Listener<'_>>,
    usage: &mut Usage,
) -> AgentResult<String> {
    let mut decoder = StreamDecoder::new(protocol);
    let mut content = String::new();
    let mut raw = String::new();
    let mut vendor_error: Option<String> = None;
    let mut listener_error: Option<anyhow::Error> = None;

    let mut apply = |events: ChunkEvents,
                     content: &mut String,
                     vendor_error: &mut Option<String>,
                     listener_error: &mut Option<anyhow::Error>|
     -> anyhow::Result<()> {
        *usage += events.usage;
        if vendor_error.is_none() {
            *vendor_error = events.error;
        }
        for fragment in &events.fragments {
            content.push_str(fragment);
            if let Some(listener) = listener.as_deref_mut() {
                if let Err(e) = listener(fragment) {
                    *listener_error = Some(e);
                    return Err(anyhow!("listener stopped the stream"));
                }
            }
        }
        Ok(())
    };

    debug!(vendor, url = %request.url, "streaming request");
    let response = {
        let mut sink = |chunk: &str| -> anyhow::Result<()> {
            raw.push_str(chunk);
            let events = decoder.decode(chunk);
            apply(events, &mut content, &mut vendor_error, &mut listener_error)
        };
        transport.fetch(request, Some(&mut sink)).await
    };
    if let Some(e) = listener_error.take() {
        return Err(AgentError::Listener(e));
    }
    let response = response?;

    let finished = apply(
        decoder.finish(),
        &mut content,
        &mut vendor_error,
        &mut listener_error,
    );
    if let Some(e) = listener_error.take() {
        return Err(AgentError::Listener(e));
    }
    finished?;

    if !response.is_success() {
        let message = vendor_error.unwrap_or_else(|| unknown_error(&raw));
        return Err(AgentError::vendor(vendor, Some(response.status), message));
    }
    if let Some(message) = vendor_error {
        return Err(AgentError::vendor(vendor, None, message));
    }
    if decoder.records() == 0 {
        return Err(AgentError::InvalidResponse {
            vendor: vendor.to_string(),
            reason: "no stream records in response body".to_string(),
        });
    }
    Ok(content)
}

/// Outcome of a buffered call that did not fail
#[derive(Debug, Clone, PartialEq)]
pub struct Buffered {
    pub value: Value,
    pub body: String,
}

/// Issue `request` and decode the whole body as JSON.
///
/// Failed statuses become vendor errors formatted by `format_error`.
pub async fn buffered_request(
    vendor: &str,
    transport: &dyn Transport,
    request: HttpRequest,
    format_error: fn(&Value) -> Option<String>,
) -> AgentResult<Buffered> {
    debug!(vendor, url = %request.url, "buffered request");
    let response = transport.fetch(request, None).await?;
    let parsed = serde_json::from_str::<Value>(&response.body);

    if !response.is_success() {
        let message = parsed
            .ok()
            .and_then(|value| format_error(&value))
            .unwrap_or_else(|| unknown_error(&response.body));
        return Err(AgentError::vendor(vendor, Some(response.status), message));
    }

    let value = parsed.map_err(|e| AgentError::InvalidResponse {
        vendor: vendor.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(message) = format_error(&value) {
        return Err(AgentError::vendor(vendor, None, message));
    }
    Ok(Buffered {
        value,
        body: response.body,
    })
}
