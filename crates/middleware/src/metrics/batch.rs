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

//! Batched metric delivery with time and size triggers.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bon::Builder;
use chrono::Utc;
use smart_default::SmartDefault;
use tokio_util::sync::CancellationToken;

use super::{BodyDirection, MetricsRecorder, PanicMetric, RequestMetric};

/// One delivery to the flush callback.
#[derive(Clone, Debug, Default)]
pub struct MetricsBatch {
    pub requests: Vec<RequestMetric>,
    pub panics:   Vec<PanicMetric>,
}

impl MetricsBatch {
    pub fn is_empty(&self) -> bool { self.requests.is_empty() && self.panics.is_empty() }
}

/// Receives every flushed batch.
pub type FlushFn = Arc<dyn Fn(MetricsBatch) + Send + Sync>;

/// Tuning for [`BatchMetricsRecorder`].
#[derive(Clone, Copy, Debug, SmartDefault, Builder)]
pub struct BatchConfig {
    /// Periodic flush interval.
    #[default(_code = "Duration::from_secs(5)")]
    pub interval: Duration,

    /// Flush as soon as this many request metrics are pending.
    #[default = 1000]
    pub max_batch: usize,
}

struct BatchInner {
    flush:     FlushFn,
    max_batch: usize,
    pending:   Mutex<Vec<RequestMetric>>,
    cancel:    CancellationToken,
}

impl BatchInner {
    fn flush_pending(&self) {
        let batch = std::mem::take(&mut *self.pending.lock().unwrap());
        if !batch.is_empty() {
            (self.flush)(MetricsBatch {
                requests: batch,
                panics:   Vec::new(),
            });
        }
    }
}

/// Accumulates request metrics and flushes them on a timer, on batch-size
/// overflow, and once more on shutdown.
///
/// Panics skip the batch and are delivered immediately. Body sizes are not
/// batched; `record_body_size` is a no-op. Must be created inside a tokio
/// runtime; [`MetricsRecorder::close`] stops the worker and performs the
/// final flush.
pub struct BatchMetricsRecorder {
    inner:  Arc<BatchInner>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BatchMetricsRecorder {
    pub fn spawn(flush: FlushFn, config: BatchConfig) -> Self {
        let inner = Arc::new(BatchInner {
            flush,
            max_batch: config.max_batch.max(1),
            pending: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => worker_inner.flush_pending(),
                    _ = worker_inner.cancel.cancelled() => break,
                }
            }
            worker_inner.flush_pending();
        });

        BatchMetricsRecorder {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }
}

#[async_trait::async_trait]
impl MetricsRecorder for BatchMetricsRecorder {
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let overflow = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.push(RequestMetric {
                method: method.to_string(),
                path: path.to_string(),
                status,
                duration,
                timestamp: Utc::now(),
            });
            if pending.len() >= self.inner.max_batch {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        // Size-triggered flushes run outside the lock.
        if let Some(batch) = overflow {
            (self.inner.flush)(MetricsBatch {
                requests: batch,
                panics:   Vec::new(),
            });
        }
    }

    fn record_panic(&self, method: &str, path: &str) {
        (self.inner.flush)(MetricsBatch {
            requests: Vec::new(),
            panics:   vec![PanicMetric {
                method:    method.to_string(),
                path:      path.to_string(),
                timestamp: Utc::now(),
            }],
        });
    }

    fn record_body_size(&self, _direction: BodyDirection, _size: u64) {}

    async fn close(&self) {
        self.inner.cancel.cancel();
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}
