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

//! Bounded body capture and sanitization.
//!
//! Request bodies are read through a size-limited capture that rebuilds the
//! original stream for the downstream handler; response bodies are drained
//! through a recorder that re-emits identical frames. Captured payloads are
//! clipped at `max_body_size` bytes plus the [`TRUNCATION_MARKER`] and can
//! be passed through a [`BodySanitizer`] before they reach the log record.

mod capture;
mod recorder;
mod sanitize;

pub use capture::{CapturedRequestBody, TRUNCATION_MARKER, capture_request_body};
pub use recorder::{RecordedBody, ResponseRecorder};
pub use sanitize::{BodySanitizer, JsonSanitizer, NoopSanitizer, REDACTED, RegexSanitizer};
