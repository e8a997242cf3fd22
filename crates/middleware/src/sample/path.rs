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

//! Per-path sampling rules.

use std::sync::Mutex;

use rand::{Rng, rngs::SmallRng};

use super::{Sampler, seeded_rng};
use crate::glob::{match_path, match_path_escaped, match_path_with_segments};

/// One ordered sampling rule: requests whose path matches `pattern` are
/// admitted with probability `rate`.
#[derive(Clone, Debug, PartialEq)]
pub struct PathSamplingRule {
    pub pattern:        String,
    pub rate:           f64,
    pub match_segments: bool,
}

impl PathSamplingRule {
    /// Flat-matching rule. `rate` is clamped into `[0, 1]`.
    pub fn new(pattern: impl Into<String>, rate: f64) -> Self {
        PathSamplingRule {
            pattern:        pattern.into(),
            rate:           rate.clamp(0.0, 1.0),
            match_segments: false,
        }
    }

    /// Segment-matching rule (`*` bounded by `/`, `**` spans segments).
    pub fn with_segments(pattern: impl Into<String>, rate: f64) -> Self {
        PathSamplingRule {
            match_segments: true,
            ..PathSamplingRule::new(pattern, rate)
        }
    }
}

/// Matching behavior shared by [`PathSampler`] and the dynamic variant.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MatchConfig {
    pub case_insensitive: bool,
    pub use_escapes:      bool,
}

/// The rate of the first rule matching `path`, or `None` when nothing
/// matches.
pub(crate) fn first_matching_rate(
    rules: &[PathSamplingRule],
    path: &str,
    config: MatchConfig,
) -> Option<f64> {
    let lowered;
    let path = if config.case_insensitive {
        lowered = path.to_lowercase();
        &lowered
    } else {
        path
    };

    for rule in rules {
        let lowered_pattern;
        let pattern = if config.case_insensitive {
            lowered_pattern = rule.pattern.to_lowercase();
            &lowered_pattern
        } else {
            &rule.pattern
        };

        let matched = if rule.match_segments {
            match_path_with_segments(pattern, path)
        } else if config.use_escapes {
            match_path_escaped(pattern, path)
        } else {
            match_path(pattern, path)
        };
        if matched {
            return Some(rule.rate);
        }
    }
    None
}

/// Turn a matched rate into an admission decision. The boundary rates skip
/// the generator entirely.
pub(crate) fn admit_at_rate(rate: f64, rng: &Mutex<SmallRng>) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 {
        false
    } else {
        rng.lock().unwrap().random::<f64>() < rate
    }
}

/// Samples requests by matching their path against an ordered rule list.
///
/// The first matching rule decides; unmatched paths fall back to
/// `default_sample` (true for [`PathSampler::new`], false for
/// [`PathSampler::explicit`]).
pub struct PathSampler {
    rules:          Vec<PathSamplingRule>,
    default_sample: bool,
    config:         MatchConfig,
    rng:            Mutex<SmallRng>,
}

impl PathSampler {
    /// Unmatched paths are admitted.
    pub fn new(rules: Vec<PathSamplingRule>) -> Self {
        PathSampler {
            rules,
            default_sample: true,
            config: MatchConfig::default(),
            rng: Mutex::new(seeded_rng()),
        }
    }

    /// Unmatched paths are rejected: only what the rules name is observed.
    pub fn explicit(rules: Vec<PathSamplingRule>) -> Self {
        PathSampler {
            default_sample: false,
            ..PathSampler::new(rules)
        }
    }

    pub fn builder() -> PathSamplerBuilder { PathSamplerBuilder::default() }

    pub fn rules(&self) -> &[PathSamplingRule] { &self.rules }
}

impl Sampler for PathSampler {
    fn should_sample(&self, parts: &http::request::Parts) -> bool {
        match first_matching_rate(&self.rules, parts.uri.path(), self.config) {
            Some(rate) => admit_at_rate(rate, &self.rng),
            None => self.default_sample,
        }
    }
}

/// Fluent construction for [`PathSampler`].
///
/// ```rust
/// use reqlog::sample::PathSampler;
///
/// let sampler = PathSampler::builder()
///     .never("/health")
///     .sometimes("/api/*", 0.25)
///     .default_allow()
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct PathSamplerBuilder {
    rules:            Vec<PathSamplingRule>,
    default_sample:   Option<bool>,
    case_insensitive: bool,
    use_escapes:      bool,
}

impl PathSamplerBuilder {
    /// Always admit paths matching `pattern`.
    #[must_use]
    pub fn always(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(PathSamplingRule::new(pattern, 1.0));
        self
    }

    /// Never admit paths matching `pattern`.
    #[must_use]
    pub fn never(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(PathSamplingRule::new(pattern, 0.0));
        self
    }

    /// Admit paths matching `pattern` with probability `rate`.
    #[must_use]
    pub fn sometimes(mut self, pattern: impl Into<String>, rate: f64) -> Self {
        self.rules.push(PathSamplingRule::new(pattern, rate));
        self
    }

    /// Like [`PathSamplerBuilder::sometimes`], but with segment matching.
    #[must_use]
    pub fn with_segments(mut self, pattern: impl Into<String>, rate: f64) -> Self {
        self.rules.push(PathSamplingRule::with_segments(pattern, rate));
        self
    }

    /// Admit paths no rule matches (the default).
    #[must_use]
    pub fn default_allow(mut self) -> Self {
        self.default_sample = Some(true);
        self
    }

    /// Reject paths no rule matches.
    #[must_use]
    pub fn default_deny(mut self) -> Self {
        self.default_sample = Some(false);
        self
    }

    /// Lowercase both paths and patterns before matching.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Honor backslash escapes in patterns.
    #[must_use]
    pub fn with_escapes(mut self) -> Self {
        self.use_escapes = true;
        self
    }

    pub fn build(self) -> PathSampler {
        PathSampler {
            rules:          self.rules,
            default_sample: self.default_sample.unwrap_or(true),
            config:         MatchConfig {
                case_insensitive: self.case_insensitive,
                use_escapes:      self.use_escapes,
            },
            rng:            Mutex::new(seeded_rng()),
        }
    }
}
