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

//! Admission sampling.
//!
//! A [`Sampler`] decides once per request, before any other pipeline work,
//! whether the request is observed at all. Samplers are shared across
//! connections and must tolerate parallel invocation.

mod dynamic;
mod path;

use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

pub use dynamic::DynamicPathSampler;
pub use path::{PathSampler, PathSamplerBuilder, PathSamplingRule};
use rand::{Rng, SeedableRng, rngs::SmallRng};

/// Admission oracle, invoked exactly once per request.
pub trait Sampler: Send + Sync {
    fn should_sample(&self, parts: &http::request::Parts) -> bool;
}

/// A `SmallRng` seeded from the OS entropy source, falling back to
/// wall-clock nanoseconds when entropy acquisition fails.
pub(crate) fn seeded_rng() -> SmallRng {
    SmallRng::try_from_os_rng().unwrap_or_else(|_| {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        SmallRng::seed_from_u64(nanos)
    })
}

/// Admits every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysSampler;

impl Sampler for AlwaysSampler {
    fn should_sample(&self, _parts: &http::request::Parts) -> bool { true }
}

/// Admits no request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverSampler;

impl Sampler for NeverSampler {
    fn should_sample(&self, _parts: &http::request::Parts) -> bool { false }
}

/// Admits each request independently with probability `rate`.
#[derive(Debug)]
pub struct RateSampler {
    rate: f64,
    rng:  Mutex<SmallRng>,
}

impl RateSampler {
    /// `rate` is clamped into `[0, 1]`.
    pub fn new(rate: f64) -> Self {
        RateSampler {
            rate: rate.clamp(0.0, 1.0),
            rng:  Mutex::new(seeded_rng()),
        }
    }

    pub fn rate(&self) -> f64 { self.rate }
}

impl Sampler for RateSampler {
    fn should_sample(&self, _parts: &http::request::Parts) -> bool {
        self.rng.lock().unwrap().random::<f64>() < self.rate
    }
}

/// Admits every `n`-th request (1-based ordinal divisible by `n`).
#[derive(Debug)]
pub struct CounterSampler {
    every:   u64,
    counter: AtomicU64,
}

impl CounterSampler {
    /// `n = 0` coerces to `n = 1` (admit everything).
    pub fn new(n: u64) -> Self {
        CounterSampler {
            every:   n.max(1),
            counter: AtomicU64::new(0),
        }
    }
}

impl Sampler for CounterSampler {
    fn should_sample(&self, _parts: &http::request::Parts) -> bool {
        let ordinal = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        ordinal % self.every == 0
    }
}

struct AdaptiveState {
    window_start: Instant,
    in_window:    u64,
    current_rate: f64,
}

/// Keeps admissions close to `target_per_second` under varying load.
///
/// Uses one-second windows: on the first call of a new window the prior
/// window's observed rate drives
/// `current_rate = clamp(target / observed, 0.001, 1.0)`. The floor keeps a
/// trickle of admissions alive under extreme load.
pub struct AdaptiveSampler {
    target_per_second: f64,
    state: Mutex<AdaptiveState>,
    rng:   Mutex<SmallRng>,
}

impl AdaptiveSampler {
    pub fn new(target_per_second: f64) -> Self {
        AdaptiveSampler {
            target_per_second: target_per_second.max(0.0),
            state: Mutex::new(AdaptiveState {
                window_start: Instant::now(),
                in_window:    0,
                current_rate: 1.0,
            }),
            rng:   Mutex::new(seeded_rng()),
        }
    }

    /// The admission probability currently in force.
    pub fn current_rate(&self) -> f64 { self.state.lock().unwrap().current_rate }
}

impl Sampler for AdaptiveSampler {
    fn should_sample(&self, _parts: &http::request::Parts) -> bool {
        let rate = {
            let mut state = self.state.lock().unwrap();
            let elapsed = state.window_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                let observed = state.in_window as f64 / elapsed.as_secs_f64();
                state.current_rate = if observed > 0.0 {
                    (self.target_per_second / observed).clamp(0.001, 1.0)
                } else {
                    1.0
                };
                state.window_start = Instant::now();
                state.in_window = 0;
            }
            state.in_window += 1;
            state.current_rate
        };
        self.rng.lock().unwrap().random::<f64>() < rate
    }
}

/// How a [`CompositeSampler`] combines its children.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompositeMode {
    /// Admit iff every child admits.
    And,
    /// Admit iff any child admits.
    Or,
}

/// Combines several samplers. An empty list admits in both modes.
pub struct CompositeSampler {
    mode:     CompositeMode,
    samplers: Vec<std::sync::Arc<dyn Sampler>>,
}

impl CompositeSampler {
    pub fn new(mode: CompositeMode, samplers: Vec<std::sync::Arc<dyn Sampler>>) -> Self {
        CompositeSampler { mode, samplers }
    }
}

impl Sampler for CompositeSampler {
    fn should_sample(&self, parts: &http::request::Parts) -> bool {
        if self.samplers.is_empty() {
            return true;
        }
        match self.mode {
            CompositeMode::And => self.samplers.iter().all(|s| s.should_sample(parts)),
            CompositeMode::Or => self.samplers.iter().any(|s| s.should_sample(parts)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_parts(path: &str) -> http::request::Parts {
    let (parts, ()) = http::Request::builder()
        .method(http::Method::GET)
        .uri(path)
        .body(())
        .expect("synthetic request")
        .into_parts();
    parts
}
