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

//! Bounded request-body capture with stream reconstruction.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

/// Appended to a captured payload that was clipped at the size limit.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Result of [`capture_request_body`].
pub struct CapturedRequestBody {
    /// The body to hand to the downstream handler. Carries every byte the
    /// client sent, whether or not the capture was clipped.
    pub body:      Body,
    /// The capture for the log record, including the truncation marker.
    /// `None` when the read failed.
    pub captured:  Option<Bytes>,
    /// Whether the capture was clipped at the limit.
    pub truncated: bool,
    /// The read error, if the client stream failed mid-capture.
    pub error:     Option<axum::Error>,
}

/// Read up to `max_body_size + 1` bytes of `body` for logging.
///
/// The returned body replays the bytes already read and then continues with
/// the untouched remainder of the client stream, so the downstream handler
/// observes the original payload byte-for-byte. When more than
/// `max_body_size` bytes arrive, the capture is the first `max_body_size`
/// bytes plus [`TRUNCATION_MARKER`].
///
/// A failed read yields no capture; the rebuilt body carries the bytes
/// received before the failure so the handler still sees what arrived.
pub async fn capture_request_body(body: Body, max_body_size: usize) -> CapturedRequestBody {
    let mut stream = body.into_data_stream();
    let mut read = BytesMut::new();
    let mut error = None;
    let mut ended = false;

    // One byte past the limit is enough to prove truncation.
    while read.len() <= max_body_size {
        match stream.next().await {
            Some(Ok(chunk)) => read.extend_from_slice(&chunk),
            Some(Err(e)) => {
                error = Some(e);
                break;
            }
            None => {
                ended = true;
                break;
            }
        }
    }

    let truncated = read.len() > max_body_size;
    let captured = if error.is_some() {
        None
    } else if truncated {
        let mut clipped = Vec::with_capacity(max_body_size + TRUNCATION_MARKER.len());
        clipped.extend_from_slice(&read[..max_body_size]);
        clipped.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        Some(Bytes::from(clipped))
    } else {
        Some(Bytes::copy_from_slice(&read))
    };

    let prefix = read.freeze();
    let body = if ended || error.is_some() {
        Body::from(prefix)
    } else {
        // Replay what was read, then continue with the live stream.
        let replay = futures::stream::once(async move { Ok::<Bytes, axum::Error>(prefix) });
        Body::from_stream(replay.chain(stream))
    };

    CapturedRequestBody {
        body,
        captured,
        truncated,
        error,
    }
}
