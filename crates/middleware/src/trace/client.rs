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

//! Outbound HTTP client that stamps trace context on every request.

use std::time::Duration;

use http::HeaderMap;

use super::{
    context::TraceContext,
    format::{TraceFormat, inject_baggage, inject_trace_context},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A `reqwest` client wrapper propagating trace context downstream.
///
/// Every request built through it carries the trace headers for the given
/// format, plus baggage headers when a prefix is configured. The bundled
/// client uses a 30-second timeout; bring your own via
/// [`TracedClient::with_client`] to change transport settings.
#[derive(Clone, Debug)]
pub struct TracedClient {
    client:         reqwest::Client,
    format:         TraceFormat,
    baggage_prefix: Option<String>,
}

impl TracedClient {
    /// A client with the default 30-second timeout.
    pub fn new(format: TraceFormat) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(TracedClient {
            client,
            format,
            baggage_prefix: None,
        })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client, format: TraceFormat) -> Self {
        TracedClient {
            client,
            format,
            baggage_prefix: None,
        }
    }

    /// Also propagate baggage under this header prefix.
    #[must_use]
    pub fn baggage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.baggage_prefix = Some(prefix.into());
        self
    }

    /// The headers this client would stamp for `ctx`.
    pub fn trace_headers(&self, ctx: &TraceContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        inject_trace_context(self.format, ctx, &mut headers);
        if let Some(prefix) = &self.baggage_prefix {
            inject_baggage(ctx, prefix, &mut headers);
        }
        headers
    }

    /// Start a stamped request.
    pub fn request(
        &self,
        method: reqwest::Method,
        url: impl reqwest::IntoUrl,
        ctx: &TraceContext,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .headers(self.trace_headers(ctx))
    }

    /// Start a stamped GET request.
    pub fn get(&self, url: impl reqwest::IntoUrl, ctx: &TraceContext) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::GET, url, ctx)
    }

    /// Start a stamped POST request.
    pub fn post(&self, url: impl reqwest::IntoUrl, ctx: &TraceContext) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::POST, url, ctx)
    }
}
