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

//! The logging capability the pipeline writes through.
//!
//! [`LogCapability`] is a small polymorphic handle over a structured logger:
//! [`LogCapability::with`] returns an independent enriched view and
//! [`LogCapability::write`] emits one event with a positional message
//! template. Two implementations ship here: [`TracingLogger`] forwards to
//! the `tracing` ecosystem, [`CapturingLogger`] collects events in memory
//! for assertions.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde_json::{Map, Value};

/// Severity of an emitted event, lowest to highest.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// The closest `tracing` level. `Fatal` folds into `ERROR` since the
    /// tracing ecosystem has no fatal severity.
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            LogLevel::Verbose => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Information => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
        }
    }
}

/// A handle onto a structured logger.
///
/// `with` must return an independent view: the parent stays usable, both
/// views may be written to concurrently, and neither observes the other's
/// later enrichments. Duplicate keys are allowed; the later value wins when
/// the event is rendered.
pub trait LogCapability: Send + Sync {
    /// Return an enriched, independent view carrying `key = value`.
    fn with(&self, key: &str, value: Value) -> Arc<dyn LogCapability>;

    /// Emit one event at `level`. `template` uses positional `{Name}`
    /// placeholders which are substituted with `args` in order.
    fn write(&self, level: LogLevel, template: &str, args: &[Value]);

    fn verbose(&self, template: &str, args: &[Value]) {
        self.write(LogLevel::Verbose, template, args);
    }

    fn debug(&self, template: &str, args: &[Value]) {
        self.write(LogLevel::Debug, template, args);
    }

    fn information(&self, template: &str, args: &[Value]) {
        self.write(LogLevel::Information, template, args);
    }

    fn warning(&self, template: &str, args: &[Value]) {
        self.write(LogLevel::Warning, template, args);
    }

    fn error(&self, template: &str, args: &[Value]) {
        self.write(LogLevel::Error, template, args);
    }

    fn fatal(&self, template: &str, args: &[Value]) {
        self.write(LogLevel::Fatal, template, args);
    }
}

/// Render a positional message template.
///
/// Each `{...}` placeholder consumes the next argument; placeholder names
/// are documentation only. Surplus placeholders are left verbatim, surplus
/// arguments are ignored.
pub fn render_template(template: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut next_arg = 0;
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        match after.find('}') {
            Some(close) if next_arg < args.len() => {
                out.push_str(&render_value(&args[next_arg]));
                next_arg += 1;
                rest = &after[close + 1..];
            }
            Some(close) => {
                out.push_str(&after[..=close]);
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(after);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collapse an ordered field list into a property map, later keys winning.
fn fold_fields(fields: &[(String, Value)]) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    for (key, value) in fields {
        map.insert(key.clone(), value.clone());
    }
    map
}

/// [`LogCapability`] backed by the `tracing` ecosystem.
///
/// Each `write` renders the template and emits one event under the
/// `reqlog` target, carrying the accumulated properties as a single JSON
/// field. Enrichment clones the field list, so views are independent.
#[derive(Clone, Debug, Default)]
pub struct TracingLogger {
    fields: Vec<(String, Value)>,
}

impl TracingLogger {
    pub fn new() -> Self { TracingLogger { fields: Vec::new() } }
}

impl LogCapability for TracingLogger {
    fn with(&self, key: &str, value: Value) -> Arc<dyn LogCapability> {
        let mut fields = self.fields.clone();
        fields.push((key.to_string(), value));
        Arc::new(TracingLogger { fields })
    }

    fn write(&self, level: LogLevel, template: &str, args: &[Value]) {
        let message = render_template(template, args);
        let folded = fold_fields(&self.fields);
        let properties = Value::Object(folded.into_iter().collect::<Map<String, Value>>());
        match level.as_tracing() {
            tracing::Level::TRACE => {
                tracing::trace!(target: "reqlog", properties = %properties, "{message}");
            }
            tracing::Level::DEBUG => {
                tracing::debug!(target: "reqlog", properties = %properties, "{message}");
            }
            tracing::Level::INFO => {
                tracing::info!(target: "reqlog", properties = %properties, "{message}");
            }
            tracing::Level::WARN => {
                tracing::warn!(target: "reqlog", properties = %properties, "{message}");
            }
            tracing::Level::ERROR => {
                tracing::error!(target: "reqlog", properties = %properties, "{message}");
            }
        }
    }
}

/// One event collected by a [`CapturingLogger`].
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level:      LogLevel,
    pub template:   String,
    pub message:    String,
    pub properties: BTreeMap<String, Value>,
}

impl CapturedEvent {
    /// The property value under `key`, if present.
    pub fn property(&self, key: &str) -> Option<&Value> { self.properties.get(key) }
}

/// In-memory [`LogCapability`] for tests.
///
/// Every view derived via `with` shares one sink, so a test can hold the
/// root logger and observe events emitted deep inside the pipeline.
#[derive(Clone, Default)]
pub struct CapturingLogger {
    fields: Vec<(String, Value)>,
    sink:   Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturingLogger {
    pub fn new() -> Self { CapturingLogger::default() }

    /// Snapshot of every event written so far, in emission order.
    pub fn events(&self) -> Vec<CapturedEvent> { self.sink.lock().unwrap().clone() }
}

impl LogCapability for CapturingLogger {
    fn with(&self, key: &str, value: Value) -> Arc<dyn LogCapability> {
        let mut fields = self.fields.clone();
        fields.push((key.to_string(), value));
        Arc::new(CapturingLogger {
            fields,
            sink: Arc::clone(&self.sink),
        })
    }

    fn write(&self, level: LogLevel, template: &str, args: &[Value]) {
        let event = CapturedEvent {
            level,
            template: template.to_string(),
            message: render_template(template, args),
            properties: fold_fields(&self.fields),
        };
        self.sink.lock().unwrap().push(event);
    }
}
