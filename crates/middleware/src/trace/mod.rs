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

//! Distributed-trace context propagation.
//!
//! Extraction and injection across five interchangeable wire formats
//! (W3C traceparent, B3 multi-header, B3 single-header, AWS X-Ray and a
//! custom header set), plus prefix-based baggage and an outbound client
//! that stamps downstream calls.

mod client;
mod context;
mod format;

use bon::Builder;
pub use client::TracedClient;
pub use context::{TraceContext, TraceIds, generate_span_id, generate_trace_id};
pub use format::{TraceFormat, extract_baggage, extract_trace_context, inject_baggage, inject_trace_context};
use smart_default::SmartDefault;

/// How the pipeline bridges trace context for a request.
#[derive(Clone, Debug, SmartDefault, Builder)]
pub struct TraceOptions {
    /// Wire format for both extraction and injection.
    pub format: TraceFormat,

    /// Generate missing trace identifiers (fresh trace id when none came
    /// in, fresh span id for this hop).
    #[default = true]
    #[builder(default = true)]
    pub generate_ids: bool,

    /// Inject the context into response headers (and outbound requests via
    /// [`TracedClient`]).
    #[default = true]
    #[builder(default = true)]
    pub propagate: bool,

    /// When set, every inbound header starting with this prefix becomes a
    /// baggage entry, re-emitted as `<prefix><key>` on propagation.
    pub baggage_prefix: Option<String>,
}

/// Evolve an extracted context into this request's own view: a missing
/// trace id is generated (when enabled), the caller's span id becomes the
/// parent and a fresh span id is minted for this hop.
pub fn prepare_for_request(mut ctx: TraceContext, generate_ids: bool) -> TraceContext {
    if ctx.trace_id.is_empty() && generate_ids {
        ctx.trace_id = generate_trace_id();
    }
    if !ctx.span_id.is_empty() {
        ctx.parent_span_id = Some(std::mem::take(&mut ctx.span_id));
    }
    if generate_ids {
        ctx.span_id = generate_span_id();
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_promotes_caller_span_to_parent() {
        let ctx = TraceContext {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_string(),
            span_id: "00f067aa0ba902b7".to_string(),
            ..TraceContext::default()
        };
        let prepared = prepare_for_request(ctx, true);
        assert_eq!(prepared.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(prepared.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_eq!(prepared.span_id.len(), 16);
        assert_ne!(prepared.span_id, "00f067aa0ba902b7");
    }

    #[test]
    fn prepare_generates_ids_when_absent() {
        let prepared = prepare_for_request(TraceContext::default(), true);
        assert_eq!(prepared.trace_id.len(), 32);
        assert_eq!(prepared.span_id.len(), 16);
        assert!(prepared.parent_span_id.is_none());
    }

    #[test]
    fn prepare_without_generation_leaves_ids_empty() {
        let prepared = prepare_for_request(TraceContext::default(), false);
        assert!(prepared.trace_id.is_empty());
        assert!(prepared.span_id.is_empty());
    }

    #[test]
    fn prepare_keeps_parent_for_xray_style_contexts() {
        // X-Ray extraction yields a parent but no span; generation must not
        // disturb the parent.
        let ctx = TraceContext {
            trace_id: "abcdef0123456789abcdef0123456789".to_string(),
            parent_span_id: Some("53995c3f42cd8ad8".to_string()),
            ..TraceContext::default()
        };
        let prepared = prepare_for_request(ctx, true);
        assert_eq!(prepared.parent_span_id.as_deref(), Some("53995c3f42cd8ad8"));
        assert_eq!(prepared.span_id.len(), 16);
    }
}
