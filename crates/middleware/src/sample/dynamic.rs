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

//! Path sampling with runtime-updatable rules.

use std::sync::{Arc, Mutex, RwLock};

use rand::rngs::SmallRng;

use super::{
    Sampler,
    path::{MatchConfig, PathSamplingRule, admit_at_rate, first_matching_rate},
    seeded_rng,
};

/// Invoked after every rule change with the old and new rule lists.
pub type RuleChangeCallback = Arc<dyn Fn(&[PathSamplingRule], &[PathSamplingRule]) + Send + Sync>;

/// A [`PathSampler`](super::PathSampler) whose rules can be replaced while
/// requests are in flight.
///
/// Reads take the shared lock, updates the exclusive lock; a sampler call
/// sees either the old or the new list, never a torn one. The change
/// callback runs outside the lock so it may itself consult the sampler.
pub struct DynamicPathSampler {
    rules:          RwLock<Vec<PathSamplingRule>>,
    default_sample: bool,
    config:         MatchConfig,
    rng:            Mutex<SmallRng>,
    on_change:      Mutex<Option<RuleChangeCallback>>,
}

impl DynamicPathSampler {
    /// Unmatched paths are admitted.
    pub fn new(rules: Vec<PathSamplingRule>) -> Self {
        DynamicPathSampler {
            rules:          RwLock::new(rules),
            default_sample: true,
            config:         MatchConfig::default(),
            rng:            Mutex::new(seeded_rng()),
            on_change:      Mutex::new(None),
        }
    }

    /// Unmatched paths are rejected.
    pub fn explicit(rules: Vec<PathSamplingRule>) -> Self {
        DynamicPathSampler {
            default_sample: false,
            ..DynamicPathSampler::new(rules)
        }
    }

    /// Lowercase both paths and patterns before matching.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.config.case_insensitive = true;
        self
    }

    /// Honor backslash escapes in patterns.
    #[must_use]
    pub fn with_escapes(mut self) -> Self {
        self.config.use_escapes = true;
        self
    }

    /// Register a callback observing every rule change.
    pub fn set_change_callback(&self, callback: RuleChangeCallback) {
        *self.on_change.lock().unwrap() = Some(callback);
    }

    /// Replace the whole rule list.
    pub fn update_rules(&self, rules: Vec<PathSamplingRule>) {
        let old = {
            let mut guard = self.rules.write().unwrap();
            std::mem::replace(&mut *guard, rules)
        };
        self.notify(&old);
    }

    /// Append one rule at the end of the list.
    pub fn add_rule(&self, rule: PathSamplingRule) {
        let old = {
            let mut guard = self.rules.write().unwrap();
            let old = guard.clone();
            guard.push(rule);
            old
        };
        self.notify(&old);
    }

    /// Remove every rule with the given pattern. Returns whether anything
    /// was removed.
    pub fn remove_rule(&self, pattern: &str) -> bool {
        let (old, removed) = {
            let mut guard = self.rules.write().unwrap();
            let old = guard.clone();
            let before = guard.len();
            guard.retain(|rule| rule.pattern != pattern);
            (old, guard.len() != before)
        };
        if removed {
            self.notify(&old);
        }
        removed
    }

    /// Update the rate of every rule with the given pattern (clamped to
    /// `[0, 1]`). Returns whether any rule matched.
    pub fn update_rule_rate(&self, pattern: &str, rate: f64) -> bool {
        let rate = rate.clamp(0.0, 1.0);
        let (old, updated) = {
            let mut guard = self.rules.write().unwrap();
            let old = guard.clone();
            let mut updated = false;
            for rule in guard.iter_mut() {
                if rule.pattern == pattern {
                    rule.rate = rate;
                    updated = true;
                }
            }
            (old, updated)
        };
        if updated {
            self.notify(&old);
        }
        updated
    }

    /// A copy of the current rule list.
    pub fn get_rules(&self) -> Vec<PathSamplingRule> { self.rules.read().unwrap().clone() }

    fn notify(&self, old: &[PathSamplingRule]) {
        let callback = self.on_change.lock().unwrap().clone();
        if let Some(callback) = callback {
            let new = self.get_rules();
            callback(old, &new);
        }
    }
}

impl Sampler for DynamicPathSampler {
    fn should_sample(&self, parts: &http::request::Parts) -> bool {
        let matched = {
            let rules = self.rules.read().unwrap();
            first_matching_rate(&rules, parts.uri.path(), self.config)
        };
        match matched {
            Some(rate) => admit_at_rate(rate, &self.rng),
            None => self.default_sample,
        }
    }
}
