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

//! Bounded in-memory metric retention.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use chrono::Utc;

use super::{BodyDirection, BodySizeMetric, MetricsRecorder, PanicMetric, RequestMetric};

const MAX_PANICS: usize = 100;
const MAX_BODY_SIZES: usize = 1000;

/// Snapshot of everything an [`InMemoryMetricsRecorder`] retains.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub requests:   Vec<RequestMetric>,
    pub panics:     Vec<PanicMetric>,
    pub body_sizes: Vec<BodySizeMetric>,
}

/// Keeps the most recent observations in bounded rings: requests up to a
/// configurable limit, the last 100 panics and the last 1000 body sizes.
pub struct InMemoryMetricsRecorder {
    max_requests: usize,
    requests:     Mutex<VecDeque<RequestMetric>>,
    panics:       Mutex<VecDeque<PanicMetric>>,
    body_sizes:   Mutex<VecDeque<BodySizeMetric>>,
}

impl InMemoryMetricsRecorder {
    /// Retain up to `max_requests` request metrics.
    pub fn new(max_requests: usize) -> Self {
        InMemoryMetricsRecorder {
            max_requests,
            requests: Mutex::new(VecDeque::new()),
            panics: Mutex::new(VecDeque::new()),
            body_sizes: Mutex::new(VecDeque::new()),
        }
    }

    /// Independent copies of all three rings, oldest first.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests:   self.requests.lock().unwrap().iter().cloned().collect(),
            panics:     self.panics.lock().unwrap().iter().cloned().collect(),
            body_sizes: self.body_sizes.lock().unwrap().iter().cloned().collect(),
        }
    }
}

impl Default for InMemoryMetricsRecorder {
    fn default() -> Self { InMemoryMetricsRecorder::new(1000) }
}

fn push_bounded<T>(ring: &Mutex<VecDeque<T>>, bound: usize, item: T) {
    let mut ring = ring.lock().unwrap();
    if bound == 0 {
        return;
    }
    while ring.len() >= bound {
        ring.pop_front();
    }
    ring.push_back(item);
}

#[async_trait::async_trait]
impl MetricsRecorder for InMemoryMetricsRecorder {
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        push_bounded(
            &self.requests,
            self.max_requests,
            RequestMetric {
                method: method.to_string(),
                path: path.to_string(),
                status,
                duration,
                timestamp: Utc::now(),
            },
        );
    }

    fn record_panic(&self, method: &str, path: &str) {
        push_bounded(
            &self.panics,
            MAX_PANICS,
            PanicMetric {
                method:    method.to_string(),
                path:      path.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    fn record_body_size(&self, direction: BodyDirection, size: u64) {
        push_bounded(
            &self.body_sizes,
            MAX_BODY_SIZES,
            BodySizeMetric {
                direction,
                size,
                timestamp: Utc::now(),
            },
        );
    }

    async fn close(&self) {}
}
