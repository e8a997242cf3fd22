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

//! The trace context carried through a request.

use std::{collections::BTreeMap, fmt::Write};

use rand::TryRngCore;

/// Trace identifiers and baggage for one request.
///
/// Identifiers are lowercase hex strings: 32 characters (128 bits) for the
/// trace id, 16 characters (64 bits) for span ids. Empty strings mean
/// "absent".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id:       String,
    pub span_id:        String,
    pub parent_span_id: Option<String>,
    pub correlation_id: Option<String>,
    pub sampled:        bool,
    pub baggage:        BTreeMap<String, String>,
}

impl TraceContext {
    /// Whether any identifier was extracted or generated.
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty() && self.span_id.is_empty() && self.parent_span_id.is_none()
    }

    /// The decomposed view stored alongside the whole context.
    pub fn ids(&self) -> TraceIds {
        TraceIds {
            trace_id:       self.trace_id.clone(),
            span_id:        self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Just the identifiers, for readers that do not need baggage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceIds {
    pub trace_id:       String,
    pub span_id:        String,
    pub parent_span_id: Option<String>,
    pub correlation_id: Option<String>,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .expect("os entropy source unavailable");
    let mut out = String::with_capacity(bytes * 2);
    for byte in buf {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A fresh 128-bit trace id as 32 lowercase hex characters.
pub fn generate_trace_id() -> String { random_hex(16) }

/// A fresh 64-bit span id as 16 lowercase hex characters.
pub fn generate_span_id() -> String { random_hex(8) }
