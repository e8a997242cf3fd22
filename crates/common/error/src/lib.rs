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

//! Structured error records for the request-logging pipeline.
//!
//! A [`StructuredError`] carries an error kind, a human message, an optional
//! cause, an HTTP status hint and the request coordinates it was raised for.
//! Two response handlers turn a record into an `(status, json)` pair: a
//! production one that leaks nothing, and a development one that includes
//! request coordinates, details and stack traces.

use std::{error::Error as StdError, fmt};

use http::StatusCode as HttpStatusCode;
use serde::Serialize;
use serde_json::{Map, Value, json};
use strum::EnumProperty;

/// Classification of a structured error.
///
/// Each kind carries an HTTP status hint used when the error is turned into
/// a response and no explicit hint was set.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// A recovered panic from a downstream handler.
    #[strum(props(status_hint = "500"))]
    Panic,
    /// A failure while capturing a request or response body.
    #[strum(props(status_hint = "500"))]
    BodyCapture,
    /// The request deadline was (nearly) exceeded.
    #[strum(props(status_hint = "408"))]
    Timeout,
    /// Invalid input supplied by the client.
    #[strum(props(status_hint = "400"))]
    Validation,
    /// An unexpected failure inside this process.
    #[strum(props(status_hint = "500"))]
    Internal,
    /// A failure reported by an upstream or downstream dependency.
    #[strum(props(status_hint = "502"))]
    External,
}

impl ErrorKind {
    /// The HTTP status this kind maps to by default.
    pub fn status_hint(self) -> HttpStatusCode {
        self.get_str("status_hint")
            .and_then(|value| value.parse::<u16>().ok())
            .and_then(|value| HttpStatusCode::from_u16(value).ok())
            .unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// A typed error record assembled by the pipeline.
///
/// Instances are reusable: [`StructuredError::reset`] clears every field so
/// a pool can hand the allocation to the next request.
#[derive(Debug, Default)]
pub struct StructuredError {
    kind:        Option<ErrorKind>,
    message:     String,
    cause:       Option<Box<dyn StdError + Send + Sync>>,
    status_hint: Option<HttpStatusCode>,
    request_id:  Option<String>,
    path:        Option<String>,
    method:      Option<String>,
    stack_trace: Option<String>,
    details:     Map<String, Value>,
}

impl StructuredError {
    fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        StructuredError {
            kind: Some(kind),
            message: message.into(),
            status_hint: Some(kind.status_hint()),
            ..StructuredError::default()
        }
    }

    /// A recovered handler panic. Status hint 500.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Panic, message)
    }

    /// A body-capture failure. Status hint 500.
    pub fn body_capture(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::BodyCapture, message)
    }

    /// A timeout. Status hint 408.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Timeout, message)
    }

    /// Invalid client input. Status hint 400.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Validation, message)
    }

    /// An internal failure. Status hint 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, message)
    }

    /// A dependency failure. Status hint 502.
    pub fn external(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::External, message)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach the request coordinates the error was raised for.
    #[must_use]
    pub fn with_request_info(
        mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self.request_id = request_id;
        self
    }

    /// Capture the current stack into the record.
    #[must_use]
    pub fn with_stack_trace(mut self) -> Self {
        self.stack_trace = Some(format!("{:?}", backtrace::Backtrace::new()));
        self
    }

    /// Override the HTTP status hint derived from the kind.
    #[must_use]
    pub fn with_status_hint(mut self, status: HttpStatusCode) -> Self {
        self.status_hint = Some(status);
        self
    }

    /// Attach a free-form detail entry. Later values win on duplicate keys.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> Option<ErrorKind> { self.kind }

    pub fn message(&self) -> &str { &self.message }

    pub fn status_hint(&self) -> HttpStatusCode {
        self.status_hint
            .or_else(|| self.kind.map(ErrorKind::status_hint))
            .unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn request_id(&self) -> Option<&str> { self.request_id.as_deref() }

    pub fn path(&self) -> Option<&str> { self.path.as_deref() }

    pub fn method(&self) -> Option<&str> { self.method.as_deref() }

    pub fn stack_trace(&self) -> Option<&str> { self.stack_trace.as_deref() }

    pub fn details(&self) -> &Map<String, Value> { &self.details }

    /// The wrapped cause, if any.
    pub fn unwrap_cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Re-arm a (possibly pooled) record in place with a new kind and
    /// message.
    pub fn assign(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.reset();
        self.kind = Some(kind);
        self.message = message.into();
        self.status_hint = Some(kind.status_hint());
    }

    /// Set the request coordinates on a record held by reference.
    pub fn set_request_info(
        &mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        request_id: Option<String>,
    ) {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self.request_id = request_id;
    }

    /// Clear every field so the allocation can be reused.
    ///
    /// Callers returning a record to a pool must not touch it afterwards.
    pub fn reset(&mut self) {
        self.kind = None;
        self.message.clear();
        self.cause = None;
        self.status_hint = None;
        self.request_id = None;
        self.path = None;
        self.method = None;
        self.stack_trace = None;
        self.details.clear();
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{kind}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for StructuredError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as _)
    }
}

/// Production error response: status hint plus a body that exposes only the
/// message, the kind and the request id.
pub fn default_error_response(error: &StructuredError) -> (HttpStatusCode, Value) {
    let mut body = Map::new();
    body.insert("error".to_string(), Value::String(error.message().to_string()));
    if let Some(kind) = error.kind() {
        body.insert("type".to_string(), json!(kind));
    }
    if let Some(request_id) = error.request_id() {
        body.insert("request_id".to_string(), Value::String(request_id.to_string()));
    }
    (error.status_hint(), Value::Object(body))
}

/// Development error response: everything the record knows, including request
/// coordinates, details, stack trace and the cause chain.
pub fn development_error_response(error: &StructuredError) -> (HttpStatusCode, Value) {
    let (status, body) = default_error_response(error);
    let mut body = match body {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("error".to_string(), other);
            map
        }
    };
    if let Some(method) = error.method() {
        body.insert("method".to_string(), Value::String(method.to_string()));
    }
    if let Some(path) = error.path() {
        body.insert("path".to_string(), Value::String(path.to_string()));
    }
    if let Some(stack_trace) = error.stack_trace() {
        body.insert("stack_trace".to_string(), Value::String(stack_trace.to_string()));
    }
    if !error.details().is_empty() {
        body.insert("details".to_string(), Value::Object(error.details().clone()));
    }
    if let Some(cause) = error.unwrap_cause() {
        body.insert("cause".to_string(), Value::String(cause.to_string()));
    }
    (status, Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_status_hints() {
        assert_eq!(ErrorKind::Validation.status_hint(), HttpStatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Timeout.status_hint(), HttpStatusCode::REQUEST_TIMEOUT);
        assert_eq!(ErrorKind::Panic.status_hint(), HttpStatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorKind::Internal.status_hint(), HttpStatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorKind::External.status_hint(), HttpStatusCode::BAD_GATEWAY);
    }

    #[test]
    fn constructors_set_kind_and_hint() {
        let err = StructuredError::validation("bad input");
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
        assert_eq!(err.status_hint(), HttpStatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "bad input");
    }

    #[test]
    fn cause_is_reachable_through_source() {
        let io = std::io::Error::other("connection reset");
        let err = StructuredError::external("upstream failed").with_cause(io);
        assert_eq!(err.unwrap_cause().unwrap().to_string(), "connection reset");
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn default_response_hides_internals() {
        let err = StructuredError::internal("boom")
            .with_request_info("GET", "/api/users", Some("req-1".to_string()))
            .with_stack_trace();
        let (status, body) = default_error_response(&err);
        assert_eq!(status, HttpStatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "boom");
        assert_eq!(body["type"], "internal");
        assert_eq!(body["request_id"], "req-1");
        assert!(body.get("stack_trace").is_none());
        assert!(body.get("path").is_none());
    }

    #[test]
    fn development_response_exposes_request_info() {
        let err = StructuredError::validation("missing field")
            .with_request_info("POST", "/api/users", Some("req-2".to_string()))
            .with_detail("field", json!("email"))
            .with_stack_trace();
        let (status, body) = development_error_response(&err);
        assert_eq!(status, HttpStatusCode::BAD_REQUEST);
        assert_eq!(body["method"], "POST");
        assert_eq!(body["path"], "/api/users");
        assert_eq!(body["details"]["field"], "email");
        assert!(body["stack_trace"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn assign_rearms_a_recycled_record() {
        let mut err = StructuredError::validation("old").with_detail("k", json!(1));
        err.assign(ErrorKind::Panic, "boom");
        err.set_request_info("GET", "/x", Some("req-9".to_string()));
        assert_eq!(err.kind(), Some(ErrorKind::Panic));
        assert_eq!(err.message(), "boom");
        assert_eq!(err.status_hint(), HttpStatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.request_id(), Some("req-9"));
        assert!(err.details().is_empty());
    }

    #[test]
    fn reset_clears_every_field() {
        let mut err = StructuredError::panic("boom")
            .with_request_info("GET", "/x", Some("id".to_string()))
            .with_detail("k", json!(1))
            .with_stack_trace();
        err.reset();
        assert_eq!(err.kind(), None);
        assert_eq!(err.message(), "");
        assert!(err.request_id().is_none());
        assert!(err.path().is_none());
        assert!(err.method().is_none());
        assert!(err.stack_trace().is_none());
        assert!(err.details().is_empty());
        assert!(err.unwrap_cause().is_none());
        assert_eq!(err.status_hint(), HttpStatusCode::INTERNAL_SERVER_ERROR);
    }
}
