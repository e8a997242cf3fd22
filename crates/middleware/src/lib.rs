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

//! HTTP request-logging middleware.
//!
//! `reqlog` wraps a [`tower::Service`] and produces one structured log
//! record per admitted request: method, path, status, size, latency,
//! optional request/response bodies (bounded and sanitized), distributed
//! trace identifiers and anything custom extractors add.
//!
//! The building blocks compose independently of the pipeline:
//!
//! - [`capability`]: the [`LogCapability`](capability::LogCapability)
//!   abstraction over a structured logger
//! - [`sample`]: admission samplers (rate, counter, adaptive, path-glob,
//!   composite, dynamic)
//! - [`glob`]: the path-glob matcher backing the path samplers
//! - [`body`]: bounded body capture and sanitization
//! - [`trace`]: trace-context extraction/injection across wire formats
//! - [`metrics`]: in-memory and batching metrics recorders
//! - [`pool`]: optional scratch-object pooling
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::{Router, routing::get};
//! use reqlog::{HttpLogLayer, Options, capability::TracingLogger};
//!
//! let options = Options::builder()
//!     .log_capability(Arc::new(TracingLogger::new()))
//!     .build();
//! let layer = HttpLogLayer::new(options).expect("valid options");
//!
//! let app: Router = Router::new()
//!     .route("/api/users", get(|| async { "ok" }))
//!     .layer(layer);
//! ```

pub mod body;
pub mod capability;
pub mod config;
pub mod glob;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod sample;
pub mod trace;

pub use config::{ConfigError, LatencyUnit, Options, RequestField};
pub use pipeline::{
    HttpLogLayer, HttpLogService, RequestDeadline, RequestId, RequestInfo, RequestLogger,
};
