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

//! Pipeline configuration.
//!
//! [`Options`] is immutable after the layer is built; [`Options::validate`]
//! fails fast at wire-up so request processing never observes a bad
//! configuration.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::Snafu;

use crate::{
    body::BodySanitizer,
    capability::{LogCapability, LogLevel},
    metrics::{MetricsRecorder, NoopMetricsRecorder},
    pipeline::RequestInfo,
    sample::{AlwaysSampler, Sampler},
    trace::TraceOptions,
};

/// Default bound for captured request/response bodies, in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 4096;

/// Default header carrying the request id in both directions.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Maps a response status onto an emission level.
pub type LevelMapper = Arc<dyn Fn(u16) -> LogLevel + Send + Sync>;

/// Produces the response for a recovered panic.
pub type PanicHandler =
    Arc<dyn Fn(&RequestInfo, &str) -> http::Response<axum::body::Body> + Send + Sync>;

/// Notified once when a request enters with a nearly exhausted deadline.
pub type TimeoutHandler = Arc<dyn Fn(&RequestInfo, Duration) + Send + Sync>;

/// Runs before the downstream handler.
pub type BeforeRequestHook = Arc<dyn Fn(&RequestInfo, &Arc<dyn LogCapability>) + Send + Sync>;

/// Runs after the log record was emitted.
pub type AfterRequestHook =
    Arc<dyn Fn(&RequestInfo, u16, Duration, &Arc<dyn LogCapability>) + Send + Sync>;

/// Maps a structured error onto a response status and JSON body.
pub type ErrorHandler =
    Arc<dyn Fn(&reqlog_error::StructuredError) -> (http::StatusCode, Value) + Send + Sync>;

/// Extracts one value from the request; `None` skips the field.
pub type FieldExtractor = Arc<dyn Fn(&RequestInfo) -> Option<Value> + Send + Sync>;

/// Request attributes the pipeline can enrich onto the log record.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestField {
    Method,
    Path,
    Ip,
    UserAgent,
    Referer,
    Proto,
    Host,
}

/// Unit the latency value is reported in.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LatencyUnit {
    #[default]
    Ms,
    Us,
    Ns,
    S,
}

impl LatencyUnit {
    /// Suffix rendered after the latency placeholder in the message
    /// template.
    pub fn suffix(self) -> &'static str {
        match self {
            LatencyUnit::Ms => "ms",
            LatencyUnit::Us => "us",
            LatencyUnit::Ns => "ns",
            LatencyUnit::S => "s",
        }
    }

    /// Scale a duration into this unit.
    pub fn value_of(self, duration: Duration) -> Value {
        match self {
            LatencyUnit::Ms => Value::from(duration.as_millis() as u64),
            LatencyUnit::Us => Value::from(duration.as_micros() as u64),
            LatencyUnit::Ns => Value::from(duration.as_nanos() as u64),
            LatencyUnit::S => Value::from(duration.as_secs_f64()),
        }
    }
}

/// A named extractor contributing one property to the log record.
#[derive(Clone)]
pub struct CustomField {
    pub name:    String,
    pub extract: FieldExtractor,
}

impl CustomField {
    pub fn new(
        name: impl Into<String>,
        extract: impl Fn(&RequestInfo) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        CustomField {
            name:    name.into(),
            extract: Arc::new(extract),
        }
    }

    /// Extractor reading a request header verbatim.
    pub fn from_header(name: impl Into<String>, header: impl Into<String>) -> Self {
        let header = header.into();
        CustomField::new(name, move |info: &RequestInfo| {
            info.headers
                .get(&header)
                .and_then(|v| v.to_str().ok())
                .map(|v| Value::String(v.to_string()))
        })
    }
}

impl fmt::Debug for CustomField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomField").field("name", &self.name).finish_non_exhaustive()
    }
}

/// The default status→level mapping: 5xx → error, 4xx → warning,
/// everything else → information.
pub fn default_status_level(status: u16) -> LogLevel {
    if status >= 500 {
        LogLevel::Error
    } else if status >= 400 {
        LogLevel::Warning
    } else {
        LogLevel::Information
    }
}

/// Configuration validation failures, raised at layer construction.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("a log capability is required"))]
    MissingLogCapability {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("latency_field must not be empty"))]
    EmptyLatencyField {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("custom field #{index} has an empty name"))]
    EmptyCustomFieldName {
        index: usize,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display("sampler panicked on a synthetic probe request"))]
    SamplerProbe {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

/// Immutable-after-start configuration for the pipeline.
#[derive(Clone, bon::Builder)]
pub struct Options {
    /// The structured logger everything is written through. Required.
    pub log_capability: Option<Arc<dyn LogCapability>>,

    /// Request attributes enriched onto every record, in order. `Method`
    /// and `Path` are always present regardless of this selection.
    #[builder(default)]
    pub request_fields: Vec<RequestField>,

    /// Property name carrying the latency value.
    #[builder(default = "duration_ms".to_string())]
    pub latency_field: String,

    /// Unit the latency value is scaled to.
    #[builder(default)]
    pub latency_unit: LatencyUnit,

    /// Header consulted for the inbound request id and echoed back on the
    /// response.
    #[builder(default = DEFAULT_REQUEST_ID_HEADER.to_string())]
    pub request_id_header: String,

    /// Generate a fresh id when the inbound header is absent.
    #[builder(default = true)]
    pub generate_request_id: bool,

    /// Exact-match paths that bypass the pipeline entirely.
    #[builder(default)]
    pub skip_paths: Vec<String>,

    /// Capture the request body onto the record.
    #[builder(default)]
    pub log_request_body: bool,

    /// Capture the response body onto the record.
    #[builder(default)]
    pub log_response_body: bool,

    /// Capture bound for either body.
    #[builder(default = DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,

    /// Redacts captured bodies before they reach the record.
    pub body_sanitizer: Option<Arc<dyn BodySanitizer>>,

    /// Overrides [`default_status_level`].
    pub custom_level_for: Option<LevelMapper>,

    /// Admission oracle, consulted once per request.
    #[builder(default = Arc::new(AlwaysSampler))]
    pub sampler: Arc<dyn Sampler>,

    /// Produces the response for a recovered panic. When absent, a
    /// structured 500 is produced via `error_handler` or plain text.
    pub panic_handler: Option<PanicHandler>,

    /// Notified when a request enters with less than five seconds of
    /// deadline remaining.
    pub timeout_handler: Option<TimeoutHandler>,

    /// Sink for request/panic/body-size metrics.
    #[builder(default = Arc::new(NoopMetricsRecorder))]
    pub metrics_recorder: Arc<dyn MetricsRecorder>,

    /// Interceptor running before the downstream handler.
    pub before_request: Option<BeforeRequestHook>,

    /// Interceptor running after emission.
    pub after_request: Option<AfterRequestHook>,

    /// Maps structured errors onto responses (used for panics when no
    /// `panic_handler` is set).
    pub error_handler: Option<ErrorHandler>,

    /// Ordered extra extractors; absent values are skipped and duplicate
    /// names keep the later value.
    #[builder(default)]
    pub custom_fields: Vec<CustomField>,

    /// Trace-context bridging; disabled when absent.
    pub trace: Option<TraceOptions>,
}

impl Default for Options {
    fn default() -> Self { Options::builder().build() }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("request_fields", &self.request_fields)
            .field("latency_field", &self.latency_field)
            .field("latency_unit", &self.latency_unit)
            .field("request_id_header", &self.request_id_header)
            .field("generate_request_id", &self.generate_request_id)
            .field("skip_paths", &self.skip_paths)
            .field("log_request_body", &self.log_request_body)
            .field("log_response_body", &self.log_response_body)
            .field("max_body_size", &self.max_body_size)
            .field("custom_fields", &self.custom_fields)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// The emission level for a status, honoring `custom_level_for`.
    pub fn level_for(&self, status: u16) -> LogLevel {
        match &self.custom_level_for {
            Some(mapper) => mapper(status),
            None => default_status_level(status),
        }
    }

    /// Fail-fast validation at pipeline construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        snafu::ensure!(self.log_capability.is_some(), MissingLogCapabilitySnafu);
        snafu::ensure!(!self.latency_field.is_empty(), EmptyLatencyFieldSnafu);
        for (index, field) in self.custom_fields.iter().enumerate() {
            snafu::ensure!(!field.name.is_empty(), EmptyCustomFieldNameSnafu { index });
        }

        // The sampler must survive a synthetic request before it is trusted
        // with live traffic.
        let (probe, ()) = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .body(())
            .expect("synthetic probe request")
            .into_parts();
        let sampler = Arc::clone(&self.sampler);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ = sampler.should_sample(&probe);
        }));
        snafu::ensure!(outcome.is_ok(), SamplerProbeSnafu);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapturingLogger;

    fn valid_options() -> Options {
        Options::builder()
            .log_capability(Arc::new(CapturingLogger::new()))
            .build()
    }

    #[test]
    fn defaults_are_sensible() {
        let options = Options::default();
        assert_eq!(options.latency_field, "duration_ms");
        assert_eq!(options.latency_unit, LatencyUnit::Ms);
        assert_eq!(options.request_id_header, DEFAULT_REQUEST_ID_HEADER);
        assert!(options.generate_request_id);
        assert_eq!(options.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert!(options.skip_paths.is_empty());
        assert!(!options.log_request_body);
        assert!(options.trace.is_none());
    }

    #[test]
    fn validation_requires_log_capability() {
        let err = Options::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingLogCapability { .. }));
        assert!(valid_options().validate().is_ok());
    }

    #[test]
    fn validation_rejects_empty_latency_field() {
        let mut options = valid_options();
        options.latency_field = String::new();
        assert!(matches!(
            options.validate().unwrap_err(),
            ConfigError::EmptyLatencyField { .. }
        ));
    }

    #[test]
    fn validation_rejects_unnamed_custom_fields() {
        let mut options = valid_options();
        options.custom_fields.push(CustomField::new("", |_| None));
        assert!(matches!(
            options.validate().unwrap_err(),
            ConfigError::EmptyCustomFieldName { index: 0, .. }
        ));
    }

    #[test]
    fn validation_probes_the_sampler() {
        struct ExplodingSampler;
        impl Sampler for ExplodingSampler {
            fn should_sample(&self, _parts: &http::request::Parts) -> bool {
                panic!("sampler bug")
            }
        }
        let mut options = valid_options();
        options.sampler = Arc::new(ExplodingSampler);
        assert!(matches!(
            options.validate().unwrap_err(),
            ConfigError::SamplerProbe { .. }
        ));
    }

    #[test]
    fn default_level_mapping() {
        assert_eq!(default_status_level(200), LogLevel::Information);
        assert_eq!(default_status_level(301), LogLevel::Information);
        assert_eq!(default_status_level(404), LogLevel::Warning);
        assert_eq!(default_status_level(500), LogLevel::Error);
        assert_eq!(default_status_level(503), LogLevel::Error);
    }

    #[test]
    fn custom_level_mapper_wins() {
        let mut options = valid_options();
        options.custom_level_for = Some(Arc::new(|_| LogLevel::Debug));
        assert_eq!(options.level_for(500), LogLevel::Debug);
    }

    #[test]
    fn latency_units_scale() {
        let duration = Duration::from_millis(1500);
        assert_eq!(LatencyUnit::Ms.value_of(duration), Value::from(1500u64));
        assert_eq!(LatencyUnit::Us.value_of(duration), Value::from(1_500_000u64));
        assert_eq!(LatencyUnit::S.value_of(duration), Value::from(1.5));
        assert_eq!(LatencyUnit::Ms.suffix(), "ms");
    }

    #[test]
    fn latency_unit_parses_from_config_strings() {
        use std::str::FromStr;
        assert_eq!(LatencyUnit::from_str("ms").unwrap(), LatencyUnit::Ms);
        assert_eq!(LatencyUnit::from_str("us").unwrap(), LatencyUnit::Us);
        assert_eq!(LatencyUnit::from_str("ns").unwrap(), LatencyUnit::Ns);
        assert_eq!(LatencyUnit::from_str("s").unwrap(), LatencyUnit::S);
        assert!(LatencyUnit::from_str("minutes").is_err());
    }
}
