// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire formats for trace-context extraction and injection.
//!
//! Malformed inbound headers are discarded silently: extraction returns
//! whatever fields parsed, and the pipeline generates the rest when id
//! generation is enabled.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

use super::context::TraceContext;

pub const HEADER_TRACEPARENT: &str = "traceparent";
pub const HEADER_B3: &str = "b3";
pub const HEADER_B3_TRACE_ID: &str = "x-b3-traceid";
pub const HEADER_B3_SPAN_ID: &str = "x-b3-spanid";
pub const HEADER_B3_PARENT_SPAN_ID: &str = "x-b3-parentspanid";
pub const HEADER_B3_SAMPLED: &str = "x-b3-sampled";
pub const HEADER_XRAY: &str = "x-amzn-trace-id";
pub const HEADER_TRACE_ID: &str = "x-trace-id";
pub const HEADER_SPAN_ID: &str = "x-span-id";
pub const HEADER_PARENT_SPAN_ID: &str = "x-parent-span-id";
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// On-the-wire trace header format.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum TraceFormat {
    /// W3C Trace Context `traceparent`.
    #[default]
    W3c,
    /// Zipkin B3 multi-header (`X-B3-*`).
    B3Multi,
    /// Zipkin B3 single-header (`b3`).
    B3Single,
    /// AWS X-Ray (`X-Amzn-Trace-Id`).
    XRay,
    /// Plain `X-Trace-ID` / `X-Span-ID` / `X-Parent-Span-ID` /
    /// `X-Correlation-ID` headers.
    Custom,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Extract a trace context from inbound headers.
///
/// The caller's span id (where the format carries one) lands in `span_id`;
/// [`prepare_for_request`](super::prepare_for_request) later promotes it to
/// the parent. The correlation id falls back to `X-Correlation-ID`, then
/// `X-Request-ID`.
pub fn extract_trace_context(format: TraceFormat, headers: &HeaderMap) -> TraceContext {
    let mut ctx = match format {
        TraceFormat::W3c => extract_w3c(headers),
        TraceFormat::B3Multi => extract_b3_multi(headers),
        TraceFormat::B3Single => extract_b3_single(headers),
        TraceFormat::XRay => extract_xray(headers),
        TraceFormat::Custom => extract_custom(headers),
    };

    if ctx.correlation_id.is_none() {
        ctx.correlation_id = header_str(headers, HEADER_CORRELATION_ID)
            .and_then(non_empty)
            .or_else(|| header_str(headers, HEADER_REQUEST_ID).and_then(non_empty));
    }
    ctx
}

fn extract_w3c(headers: &HeaderMap) -> TraceContext {
    let Some(value) = header_str(headers, HEADER_TRACEPARENT) else {
        return TraceContext::default();
    };
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() != 4 || parts[1].len() != 32 || parts[2].len() != 16 {
        return TraceContext::default();
    }
    TraceContext {
        trace_id: parts[1].to_string(),
        span_id: parts[2].to_string(),
        sampled: parts[3] == "01",
        ..TraceContext::default()
    }
}

fn extract_b3_multi(headers: &HeaderMap) -> TraceContext {
    let sampled = header_str(headers, HEADER_B3_SAMPLED)
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    TraceContext {
        trace_id: header_str(headers, HEADER_B3_TRACE_ID)
            .and_then(non_empty)
            .unwrap_or_default(),
        span_id: header_str(headers, HEADER_B3_SPAN_ID)
            .and_then(non_empty)
            .unwrap_or_default(),
        parent_span_id: header_str(headers, HEADER_B3_PARENT_SPAN_ID).and_then(non_empty),
        sampled,
        ..TraceContext::default()
    }
}

fn extract_b3_single(headers: &HeaderMap) -> TraceContext {
    let Some(value) = header_str(headers, HEADER_B3) else {
        return TraceContext::default();
    };
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return TraceContext::default();
    }
    TraceContext {
        trace_id: parts[0].to_string(),
        span_id: parts[1].to_string(),
        sampled: parts.get(2).is_some_and(|v| *v == "1"),
        parent_span_id: parts.get(3).and_then(|v| non_empty(v)),
        ..TraceContext::default()
    }
}

fn extract_xray(headers: &HeaderMap) -> TraceContext {
    let Some(value) = header_str(headers, HEADER_XRAY) else {
        return TraceContext::default();
    };
    let mut ctx = TraceContext::default();
    for field in value.split(';') {
        let Some((key, field_value)) = field.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Root" => {
                if let Some(trace_id) = field_value.trim().strip_prefix("1-") {
                    ctx.trace_id = trace_id.to_string();
                }
            }
            // X-Ray carries the caller's segment as Parent; it maps onto
            // the parent span, not this hop's span.
            "Parent" => ctx.parent_span_id = non_empty(field_value),
            "Sampled" => ctx.sampled = field_value.trim() == "1",
            _ => {}
        }
    }
    ctx
}

fn extract_custom(headers: &HeaderMap) -> TraceContext {
    TraceContext {
        trace_id: header_str(headers, HEADER_TRACE_ID)
            .and_then(non_empty)
            .unwrap_or_default(),
        span_id: header_str(headers, HEADER_SPAN_ID)
            .and_then(non_empty)
            .unwrap_or_default(),
        parent_span_id: header_str(headers, HEADER_PARENT_SPAN_ID).and_then(non_empty),
        correlation_id: header_str(headers, HEADER_CORRELATION_ID).and_then(non_empty),
        ..TraceContext::default()
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Inject `ctx` into outbound or response headers in the given format.
///
/// A context without a trace id injects nothing.
pub fn inject_trace_context(format: TraceFormat, ctx: &TraceContext, headers: &mut HeaderMap) {
    if ctx.trace_id.is_empty() {
        return;
    }
    let sampled_flag = if ctx.sampled { "1" } else { "0" };
    match format {
        TraceFormat::W3c => {
            let flags = if ctx.sampled { "01" } else { "00" };
            set_header(
                headers,
                HEADER_TRACEPARENT,
                &format!("00-{}-{}-{}", ctx.trace_id, ctx.span_id, flags),
            );
        }
        TraceFormat::B3Multi => {
            set_header(headers, HEADER_B3_TRACE_ID, &ctx.trace_id);
            set_header(headers, HEADER_B3_SPAN_ID, &ctx.span_id);
            if let Some(parent) = &ctx.parent_span_id {
                set_header(headers, HEADER_B3_PARENT_SPAN_ID, parent);
            }
            set_header(headers, HEADER_B3_SAMPLED, sampled_flag);
        }
        TraceFormat::B3Single => {
            let mut value = format!("{}-{}-{}", ctx.trace_id, ctx.span_id, sampled_flag);
            if let Some(parent) = &ctx.parent_span_id {
                value.push('-');
                value.push_str(parent);
            }
            set_header(headers, HEADER_B3, &value);
        }
        TraceFormat::XRay => {
            let mut value = format!("Root=1-{}", ctx.trace_id);
            if !ctx.span_id.is_empty() {
                value.push_str(&format!(";Parent={}", ctx.span_id));
            }
            value.push_str(&format!(";Sampled={sampled_flag}"));
            set_header(headers, HEADER_XRAY, &value);
        }
        TraceFormat::Custom => {
            set_header(headers, HEADER_TRACE_ID, &ctx.trace_id);
            if !ctx.span_id.is_empty() {
                set_header(headers, HEADER_SPAN_ID, &ctx.span_id);
            }
            if let Some(parent) = &ctx.parent_span_id {
                set_header(headers, HEADER_PARENT_SPAN_ID, parent);
            }
            if let Some(correlation) = &ctx.correlation_id {
                set_header(headers, HEADER_CORRELATION_ID, correlation);
            }
        }
    }
}

/// Collect baggage from every inbound header starting with `prefix`.
///
/// The key is the header name without the prefix; the first header value
/// wins.
pub fn extract_baggage(headers: &HeaderMap, prefix: &str) -> BTreeMap<String, String> {
    let prefix = prefix.to_lowercase();
    let mut baggage = BTreeMap::new();
    for name in headers.keys() {
        if let Some(key) = name.as_str().strip_prefix(&prefix) {
            if key.is_empty() {
                continue;
            }
            let value = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            baggage
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    baggage
}

/// Emit every baggage entry as `<prefix><key>: <value>`.
pub fn inject_baggage(ctx: &TraceContext, prefix: &str, headers: &mut HeaderMap) {
    for (key, value) in &ctx.baggage {
        let name = format!("{}{}", prefix.to_lowercase(), key.to_lowercase());
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}
