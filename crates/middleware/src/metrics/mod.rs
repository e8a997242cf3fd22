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

//! Request metrics recording.
//!
//! The pipeline reports through a [`MetricsRecorder`]; backends decide what
//! to do with the stream. Two implementations ship here: an in-memory
//! recorder with bounded retention and a batching recorder that hands
//! accumulated metrics to a flush callback.

mod batch;
mod memory;

use std::time::Duration;

pub use batch::{BatchConfig, BatchMetricsRecorder, FlushFn, MetricsBatch};
use chrono::{DateTime, Utc};
pub use memory::{InMemoryMetricsRecorder, MetricsSnapshot};

/// Which captured body a size observation belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BodyDirection {
    Request,
    Response,
}

/// One completed request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestMetric {
    pub method:    String,
    pub path:      String,
    pub status:    u16,
    pub duration:  Duration,
    pub timestamp: DateTime<Utc>,
}

/// One recovered handler panic.
#[derive(Clone, Debug, PartialEq)]
pub struct PanicMetric {
    pub method:    String,
    pub path:      String,
    pub timestamp: DateTime<Utc>,
}

/// One captured body size.
#[derive(Clone, Debug, PartialEq)]
pub struct BodySizeMetric {
    pub direction: BodyDirection,
    pub size:      u64,
    pub timestamp: DateTime<Utc>,
}

/// Sink for the pipeline's metric observations.
///
/// The recording operations run on request threads and must be cheap and
/// non-blocking; `close` flushes and stops any background machinery.
#[async_trait::async_trait]
pub trait MetricsRecorder: Send + Sync {
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration);

    fn record_panic(&self, method: &str, path: &str);

    fn record_body_size(&self, direction: BodyDirection, size: u64);

    async fn close(&self);
}

/// Discards every observation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetricsRecorder;

#[async_trait::async_trait]
impl MetricsRecorder for NoopMetricsRecorder {
    fn record_request(&self, _method: &str, _path: &str, _status: u16, _duration: Duration) {}

    fn record_panic(&self, _method: &str, _path: &str) {}

    fn record_body_size(&self, _direction: BodyDirection, _size: u64) {}

    async fn close(&self) {}
}
