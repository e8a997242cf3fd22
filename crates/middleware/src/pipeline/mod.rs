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

//! The per-request orchestrator.
//!
//! [`HttpLogLayer`] wraps a downstream service and, for every admitted
//! request: starts the clock, bridges trace context, captures bodies,
//! injects request-local context, contains panics, and emits exactly one
//! enriched log record at a status-derived level before recording metrics
//! and running the after-hook. Skipped paths and sampled-out requests pass
//! straight through, untouched and unlogged.

mod fields;

use std::{
    fmt,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use axum::body::Body;
use bytes::Bytes;
use futures::FutureExt;
use http::{HeaderName, HeaderValue, Method, Request, Response, Uri, Version, header::CONTENT_TYPE};
use reqlog_error::ErrorKind;
use serde_json::Value;
use tower::{Layer, Service, ServiceExt};

use crate::{
    body::{ResponseRecorder, capture_request_body},
    capability::{LogCapability, LogLevel},
    config::{ConfigError, Options},
    metrics::BodyDirection,
    pool,
    trace::{
        TraceContext, extract_baggage, extract_trace_context, inject_baggage,
        inject_trace_context, prepare_for_request,
    },
};

/// Requests slower than this get `SlowRequest=true` and a level floor of
/// warning.
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(5);

/// Deadlines closer than this at pipeline entry trigger the timeout
/// handler.
const DEADLINE_WARNING_WINDOW: Duration = Duration::from_secs(5);

/// The enriched log capability, available to handlers via request
/// extensions.
#[derive(Clone)]
pub struct RequestLogger(pub Arc<dyn LogCapability>);

/// The request id, available to handlers via request extensions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestId(pub String);

/// An advisory request deadline. Insert into request extensions upstream
/// of the pipeline to arm the timeout probe.
#[derive(Clone, Copy, Debug)]
pub struct RequestDeadline(pub Instant);

/// The request attributes the pipeline holds onto across the downstream
/// call: hooks, extractors and record assembly all read from here.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method:      Method,
    pub uri:         Uri,
    pub version:     Version,
    pub headers:     http::HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestInfo {
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        RequestInfo {
            method:      parts.method.clone(),
            uri:         parts.uri.clone(),
            version:     parts.version,
            headers:     parts.headers.clone(),
            remote_addr: parts
                .extensions
                .get::<axum::extract::ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        }
    }

    pub fn path(&self) -> &str { self.uri.path() }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Tower layer producing [`HttpLogService`].
#[derive(Clone)]
pub struct HttpLogLayer {
    options: Arc<Options>,
}

impl HttpLogLayer {
    /// Validates the options and builds the layer; invalid configuration
    /// fails here, never during request processing.
    pub fn new(options: Options) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(HttpLogLayer {
            options: Arc::new(options),
        })
    }
}

impl<S> Layer<S> for HttpLogLayer {
    type Service = HttpLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpLogService {
            inner,
            options: Arc::clone(&self.options),
        }
    }
}

/// The wrapped service running the pipeline per request.
#[derive(Clone)]
pub struct HttpLogService<S> {
    inner:   S,
    options: Arc<Options>,
}

impl<S> Service<Request<Body>> for HttpLogService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: fmt::Display + Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the ready service, leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let options = Arc::clone(&self.options);
        Box::pin(run_pipeline(options, inner, req))
    }
}

async fn run_pipeline<S>(
    options: Arc<Options>,
    inner: S,
    req: Request<Body>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send,
    S::Future: Send,
    S::Error: fmt::Display,
{
    // Skip paths bypass everything: no sampling, no hooks, no headers.
    let skipped = {
        let path = req.uri().path();
        options.skip_paths.iter().any(|p| p.as_str() == path)
    };
    if skipped {
        return inner.oneshot(req).await;
    }

    let (mut parts, body) = req.into_parts();

    // The admission decision is made exactly once, before any mutation. A
    // panicking sampler is contained and handled like a handler panic.
    let admission = std::panic::catch_unwind(AssertUnwindSafe(|| {
        options.sampler.should_sample(&parts)
    }));
    let admitted = match admission {
        Ok(admitted) => admitted,
        Err(payload) => {
            let message = panic_payload_message(payload);
            let info = RequestInfo::from_parts(&parts);
            options
                .metrics_recorder
                .record_panic(info.method.as_str(), info.path());
            let log = options
                .log_capability
                .clone()
                .expect("options validated at layer construction");
            emit_record(&RecordParams {
                options: &options,
                info: &info,
                log,
                status: 500,
                size: 0,
                duration: Duration::ZERO,
                request_body: None,
                response_body: None,
                panic_message: Some(&message),
                error_message: None,
            });
            return Ok(structured_panic_response(&options, &info, "", &message));
        }
    };
    if !admitted {
        return inner.oneshot(Request::from_parts(parts, body)).await;
    }

    let info = RequestInfo::from_parts(&parts);
    let start = Instant::now();
    let mut log = options
        .log_capability
        .clone()
        .expect("options validated at layer construction");

    if let Some(hook) = &options.before_request {
        hook(&info, &log);
    }

    if let Some(handler) = &options.timeout_handler {
        if let Some(deadline) = parts.extensions.get::<RequestDeadline>() {
            let remaining = deadline.0.saturating_duration_since(Instant::now());
            if remaining > Duration::ZERO && remaining < DEADLINE_WARNING_WINDOW {
                handler(&info, remaining);
            }
        }
    }

    // Trace bridge: extract, generate what is missing, enrich the logger.
    let mut trace_ctx: Option<TraceContext> = None;
    if let Some(trace_opts) = &options.trace {
        let mut ctx = extract_trace_context(trace_opts.format, &parts.headers);
        if let Some(prefix) = &trace_opts.baggage_prefix {
            ctx.baggage = extract_baggage(&parts.headers, prefix);
        }
        let ctx = prepare_for_request(ctx, trace_opts.generate_ids);
        if !ctx.trace_id.is_empty() {
            log = log.with("TraceId", Value::String(ctx.trace_id.clone()));
        }
        if !ctx.span_id.is_empty() {
            log = log.with("SpanId", Value::String(ctx.span_id.clone()));
        }
        if let Some(parent) = &ctx.parent_span_id {
            log = log.with("ParentSpanId", Value::String(parent.clone()));
        }
        if let Some(correlation) = &ctx.correlation_id {
            log = log.with("CorrelationId", Value::String(correlation.clone()));
        }
        for (key, value) in &ctx.baggage {
            log = log.with(&format!("Baggage.{key}"), Value::String(value.clone()));
        }
        trace_ctx = Some(ctx);
    }

    // Request id: inbound header wins, generation fills the gap.
    let mut request_id = info
        .header(&options.request_id_header)
        .unwrap_or_default()
        .to_string();
    if request_id.is_empty() && options.generate_request_id {
        request_id = uuid::Uuid::new_v4().simple().to_string();
    }
    if !request_id.is_empty() {
        log = log.with("RequestId", Value::String(request_id.clone()));
    }

    // Request-body capture. The handler always sees the original bytes;
    // only the captured copy is bounded and sanitized.
    let mut captured_request: Option<Bytes> = None;
    let mut captured_request_size = 0u64;
    let body = if options.log_request_body {
        let outcome = capture_request_body(body, options.max_body_size).await;
        if let Some(error) = &outcome.error {
            tracing::warn!(
                target: "reqlog::pipeline",
                error = %error,
                method = %info.method,
                path = info.path(),
                "request body capture failed; omitting RequestBody",
            );
        }
        if let Some(captured) = outcome.captured {
            captured_request_size = if outcome.truncated {
                options.max_body_size as u64
            } else {
                captured.len() as u64
            };
            let sanitized = match &options.body_sanitizer {
                Some(sanitizer) => {
                    let content_type = info.header(CONTENT_TYPE.as_str()).unwrap_or_default();
                    Bytes::from(sanitizer.sanitize(&captured, content_type))
                }
                None => captured,
            };
            captured_request = Some(sanitized);
        }
        outcome.body
    } else {
        body
    };

    // Request-local context for the downstream handler.
    parts.extensions.insert(RequestLogger(Arc::clone(&log)));
    if !request_id.is_empty() {
        parts.extensions.insert(RequestId(request_id.clone()));
    }
    if let Some(ctx) = &trace_ctx {
        parts.extensions.insert(ctx.clone());
        parts.extensions.insert(ctx.ids());
    }

    let recorder = if options.log_response_body {
        ResponseRecorder::limited_with_buffer(options.max_body_size, pool::buffer_pool().acquire())
    } else {
        ResponseRecorder::counting()
    };

    // Guarded invocation: a panicking handler is contained here.
    let request = Request::from_parts(parts, body);
    let outcome = AssertUnwindSafe(inner.oneshot(request)).catch_unwind().await;

    let (response, panic_message) = match outcome {
        Ok(Ok(response)) => (response, None),
        Ok(Err(error)) => {
            // The transport never sees a response; emit the record and
            // propagate the failure.
            let duration = start.elapsed();
            let message = error.to_string();
            emit_record(&RecordParams {
                options: &options,
                info: &info,
                log,
                status: 500,
                size: 0,
                duration,
                request_body: captured_request.as_ref(),
                response_body: None,
                panic_message: None,
                error_message: Some(&message),
            });
            options.metrics_recorder.record_request(
                info.method.as_str(),
                info.path(),
                500,
                duration,
            );
            pool::buffer_pool().release(recorder.recycle());
            return Err(error);
        }
        Err(payload) => {
            let message = panic_payload_message(payload);
            options
                .metrics_recorder
                .record_panic(info.method.as_str(), info.path());
            let response = match &options.panic_handler {
                Some(handler) => handler(&info, &message),
                None => structured_panic_response(&options, &info, &request_id, &message),
            };
            (response, Some(message))
        }
    };

    // Latency, status, size: the status is the handler's latched value, or
    // 500 when it panicked.
    let status = if panic_message.is_some() {
        500
    } else {
        response.status().as_u16()
    };

    let (mut res_parts, res_body) = response.into_parts();
    let (out_body, recorded) = recorder.record(res_body).await;
    if let Some(error) = &recorded.error {
        tracing::warn!(
            target: "reqlog::pipeline",
            error = %error,
            method = %info.method,
            path = info.path(),
            "response body errored mid-stream",
        );
    }

    let captured_response = recorded.captured.as_ref().and_then(|captured| {
        if captured.is_empty() {
            return None;
        }
        match &options.body_sanitizer {
            Some(sanitizer) => {
                let content_type = res_parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                Some(Bytes::from(sanitizer.sanitize(captured, content_type)))
            }
            None => Some(captured.clone()),
        }
    });

    // Response headers: request-id echo and trace propagation.
    if !request_id.is_empty() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(options.request_id_header.as_bytes()),
            HeaderValue::from_str(&request_id),
        ) {
            res_parts.headers.insert(name, value);
        }
    }
    if let (Some(trace_opts), Some(ctx)) = (&options.trace, &trace_ctx) {
        if trace_opts.propagate {
            inject_trace_context(trace_opts.format, ctx, &mut res_parts.headers);
            if let Some(prefix) = &trace_opts.baggage_prefix {
                inject_baggage(ctx, prefix, &mut res_parts.headers);
            }
        }
    }

    let duration = start.elapsed();
    let hook_log = Arc::clone(&log);
    emit_record(&RecordParams {
        options: &options,
        info: &info,
        log,
        status,
        size: recorded.size,
        duration,
        request_body: captured_request.as_ref(),
        response_body: captured_response.as_ref(),
        panic_message: panic_message.as_deref(),
        error_message: None,
    });

    let metrics = &options.metrics_recorder;
    metrics.record_request(info.method.as_str(), info.path(), status, duration);
    if captured_request.is_some() {
        metrics.record_body_size(BodyDirection::Request, captured_request_size);
    }
    if recorded.captured.is_some() {
        metrics.record_body_size(BodyDirection::Response, recorded.size);
    }

    if let Some(hook) = &options.after_request {
        hook(&info, status, duration, &hook_log);
    }

    if let Some(buffer) = recorded.buffer {
        pool::buffer_pool().release(buffer);
    }

    Ok(Response::from_parts(res_parts, out_body))
}

struct RecordParams<'a> {
    options:       &'a Options,
    info:          &'a RequestInfo,
    log:           Arc<dyn LogCapability>,
    status:        u16,
    size:          u64,
    duration:      Duration,
    request_body:  Option<&'a Bytes>,
    response_body: Option<&'a Bytes>,
    panic_message: Option<&'a str>,
    error_message: Option<&'a str>,
}

/// Record assembly and the single emission (phases K and L).
fn emit_record(params: &RecordParams<'_>) {
    let options = params.options;
    let info = params.info;
    let mut log = Arc::clone(&params.log);

    log = log.with("Method", Value::String(info.method.as_str().to_string()));
    log = log.with("Path", Value::String(info.path().to_string()));
    for field in &options.request_fields {
        if let Some(value) = fields::request_field_value(*field, info) {
            log = log.with(fields::field_name(*field), value);
        }
    }
    for custom in &options.custom_fields {
        if let Some(value) = (custom.extract)(info) {
            log = log.with(&custom.name, value);
        }
    }

    let latency_value = options.latency_unit.value_of(params.duration);
    log = log.with("StatusCode", Value::from(params.status));
    log = log.with("Size", Value::from(params.size));
    log = log.with(&options.latency_field, latency_value.clone());

    if let Some(body) = params.request_body {
        if !body.is_empty() {
            log = log.with(
                "RequestBody",
                Value::String(String::from_utf8_lossy(body).into_owned()),
            );
        }
    }
    if let Some(body) = params.response_body {
        if !body.is_empty() {
            log = log.with(
                "ResponseBody",
                Value::String(String::from_utf8_lossy(body).into_owned()),
            );
        }
    }
    if let Some(message) = params.panic_message {
        log = log.with("Panic", Value::String(message.to_string()));
    }
    if let Some(message) = params.error_message {
        log = log.with("Error", Value::String(message.to_string()));
    }

    let mut level = options.level_for(params.status);
    if params.duration > SLOW_REQUEST_THRESHOLD {
        log = log.with("SlowRequest", Value::Bool(true));
        if level < LogLevel::Warning {
            level = LogLevel::Warning;
        }
    }

    if let Some(message) = params.panic_message {
        log.error(
            "Panic in handler: {Error}",
            &[Value::String(message.to_string())],
        );
        return;
    }
    if let Some(message) = params.error_message {
        log.error(
            "Handler failed: {Error}",
            &[Value::String(message.to_string())],
        );
        return;
    }

    let template = format!(
        "HTTP {{Method}} {{Path}} responded {{StatusCode}} in {{{}}}{}",
        options.latency_field,
        options.latency_unit.suffix(),
    );
    log.write(
        level,
        &template,
        &[
            Value::String(info.method.as_str().to_string()),
            Value::String(info.path().to_string()),
            Value::from(params.status),
            latency_value,
        ],
    );
}

fn panic_payload_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The response for a recovered panic when no panic handler is configured:
/// the error handler's mapping of a pooled panic record, or a plain-text
/// 500.
fn structured_panic_response(
    options: &Options,
    info: &RequestInfo,
    request_id: &str,
    message: &str,
) -> Response<Body> {
    if let Some(handler) = &options.error_handler {
        let mut record = pool::error_pool().acquire();
        record.assign(ErrorKind::Panic, message);
        record.set_request_info(
            info.method.as_str(),
            info.path(),
            (!request_id.is_empty()).then(|| request_id.to_string()),
        );
        let (status, body) = handler(&record);
        pool::error_pool().release(record);
        return Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("static panic response");
    }
    Response::builder()
        .status(http::StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("Internal Server Error"))
        .expect("static panic response")
}
