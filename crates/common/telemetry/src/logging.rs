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

use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, filter, layer::SubscriberExt, prelude::*};

/// The default directory name for log files when file logging is enabled.
///
/// This directory will be created relative to the application's working
/// directory if a relative path is used, or can be overridden with an absolute
/// path in the `LoggingOptions.dir` field.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Global handle for dynamically reloading log levels at runtime.
///
/// Populated during logging initialization; `None` before
/// `init_global_logging` has been called.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

/// Configuration options for the logging system.
///
/// Controls output destinations, formats and rotation for the process-wide
/// `tracing` subscriber.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory path for storing log files.
    ///
    /// When set to a non-empty string, log files will be created in this
    /// directory with automatic hourly rotation. If empty, only stdout
    /// logging will be used.
    #[default = ""]
    pub dir: String,

    /// Log level filter string.
    ///
    /// Supports standard Rust log level syntax like "info", "debug,hyper=warn"
    /// or per-target filters like "info,reqlog=debug". If None, falls back to
    /// the RUST_LOG environment variable or "info".
    pub level: Option<String>,

    /// Output format for log messages.
    ///
    /// - `Text`: Human-readable format suitable for development and console
    ///   output
    /// - `Json`: Machine-parseable JSON format ideal for log aggregation
    ///   systems
    pub log_format: LogFormat,

    /// Maximum number of rotated log files to retain.
    ///
    /// When log rotation occurs (hourly), old files are automatically deleted
    /// when this limit is reached. Default is 720 files (30 days of hourly
    /// logs).
    #[default = 720]
    pub max_log_files: usize,

    /// Whether to output logs to stdout in addition to files.
    #[default = true]
    pub append_stdout: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// JSON-structured log format for log aggregation systems.
    Json,

    /// Human-readable text format for development and console output.
    #[default]
    Text,
}

/// Initialize tracing with default configuration for simple applications.
///
/// Logs are written to stdout with text formatting and no file output.
/// Returns worker guards that must be kept alive for logging to function.
///
/// This function can only be called once per process; subsequent calls are
/// ignored.
#[must_use]
pub fn init_tracing_subscriber() -> Vec<WorkerGuard> {
    init_global_logging(&LoggingOptions::default())
}

/// Initialize logging specifically designed for unit tests.
///
/// Writes to files in a dedicated test directory so test output stays clean.
/// Safe to call from multiple tests concurrently; only the first call
/// initializes anything.
///
/// # Environment Variables
///
/// * `UNITTEST_LOG_DIR` - Directory for test logs (default:
///   "/tmp/__unittest_logs")
/// * `UNITTEST_LOG_LEVEL` - Log level filter (default: "debug,hyper=warn,...")
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD.as_ref().lock().unwrap();

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());

        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,hyper=warn,tower=warn,reqwest=warn,h2=info".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };
        *g = Some(init_global_logging(&opts));

        tracing::info!("logs dir = {}", dir);
    });
}

/// Global storage for unit test logging worker guards, kept alive for the
/// whole test run.
static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Default log level filter when no specific configuration is provided.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Initialize comprehensive logging with full configuration options.
///
/// Sets up the process-wide subscriber with up to three layers depending on
/// configuration:
///
/// - **Stdout layer**: logs to stdout (if `append_stdout` is true)
/// - **File layer**: main log files with hourly rotation (if `dir` is set)
/// - **Error file layer**: error-only logs in separate files (if `dir` is set)
///
/// The level filter is wrapped in a reload layer whose handle is stored in
/// [`RELOAD_HANDLE`], so filters can be changed at runtime.
///
/// Returns a vector of `WorkerGuard`s that must be kept alive for the
/// lifetime of the application; dropping them stops the background logging
/// threads. Panics on critical initialization failures so observability
/// issues are caught early. Only the first call per process has any effect.
#[allow(clippy::print_stdout)]
pub fn init_global_logging(opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);

            if opts.log_format == LogFormat::Json {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_ansi(std::io::stdout().is_terminal())
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                )
            } else {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .with_writer(writer)
                        .with_ansi(std::io::stdout().is_terminal())
                        .boxed(),
                )
            }
        } else {
            None
        };

        let file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let rolling_appender = RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_prefix("reqlog")
                .max_log_files(opts.max_log_files)
                .build(&opts.dir)
                .unwrap_or_else(|e| {
                    panic!(
                        "initializing rolling file appender at {} failed: {}",
                        &opts.dir, e
                    )
                });
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender);
            guards.push(guard);

            if opts.log_format == LogFormat::Json {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                )
            } else {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .with_writer(writer)
                        .with_ansi(false)
                        .boxed(),
                )
            }
        };

        let err_file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let rolling_appender = RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_prefix("reqlog-err")
                .max_log_files(opts.max_log_files)
                .build(&opts.dir)
                .unwrap_or_else(|e| {
                    panic!(
                        "initializing rolling file appender at {} failed: {}",
                        &opts.dir, e
                    )
                });
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender);
            guards.push(guard);

            if opts.log_format == LogFormat::Json {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(filter::LevelFilter::ERROR)
                        .boxed(),
                )
            } else {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(filter::LevelFilter::ERROR)
                        .boxed(),
                )
            }
        };

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);

        RELOAD_HANDLE
            .set(reload_handle)
            .expect("reload handle already set, maybe init_global_logging get called twice?");

        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}
