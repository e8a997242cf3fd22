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

//! Response-body recording.
//!
//! The recorder drains a response body frame by frame, counts the data
//! bytes and optionally keeps a bounded capture, then re-emits the
//! identical frames (data and trailers) as the outgoing body. The bytes on
//! the wire are the bytes the handler wrote, whatever the capture did.

use std::convert::Infallible;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};

use super::capture::TRUNCATION_MARKER;

/// What a [`ResponseRecorder`] observed while draining a body.
pub struct RecordedBody {
    /// Total data bytes the handler wrote.
    pub size:      u64,
    /// Bounded capture including the truncation marker, when capturing was
    /// requested. `None` for a counting-only recorder.
    pub captured:  Option<Bytes>,
    /// Whether the capture was clipped at the limit.
    pub truncated: bool,
    /// A body error encountered mid-stream, if any.
    pub error:     Option<axum::Error>,
    /// The scratch buffer, handed back for pool return.
    pub buffer:    Option<BytesMut>,
}

/// Drains a response body, counting and optionally capturing its bytes.
///
/// The counting variant records only the size; the limited variant
/// additionally keeps up to `max_body_size` captured bytes followed by
/// [`TRUNCATION_MARKER`], while always passing the unmodified frames
/// through to the client.
pub struct ResponseRecorder {
    capture_limit: Option<usize>,
    buffer:        BytesMut,
    truncated:     bool,
    size:          u64,
}

impl ResponseRecorder {
    /// Count bytes only; no capture.
    pub fn counting() -> Self {
        ResponseRecorder {
            capture_limit: None,
            buffer:        BytesMut::new(),
            truncated:     false,
            size:          0,
        }
    }

    /// Capture up to `max_body_size` bytes plus the truncation marker.
    pub fn limited(max_body_size: usize) -> Self {
        ResponseRecorder {
            capture_limit: Some(max_body_size),
            ..ResponseRecorder::counting()
        }
    }

    /// Like [`ResponseRecorder::limited`], reusing a pooled scratch buffer.
    pub fn limited_with_buffer(max_body_size: usize, buffer: BytesMut) -> Self {
        ResponseRecorder {
            capture_limit: Some(max_body_size),
            buffer,
            truncated: false,
            size: 0,
        }
    }

    /// Give the scratch buffer back without recording anything.
    pub fn recycle(self) -> BytesMut { self.buffer }

    fn observe(&mut self, data: &Bytes) {
        self.size += data.len() as u64;
        let Some(limit) = self.capture_limit else {
            return;
        };
        if self.truncated {
            return;
        }
        let remaining = limit.saturating_sub(self.buffer.len());
        if data.len() <= remaining {
            self.buffer.extend_from_slice(data);
        } else {
            self.buffer.extend_from_slice(&data[..remaining]);
            self.buffer.extend_from_slice(TRUNCATION_MARKER.as_bytes());
            self.truncated = true;
        }
    }

    /// Drain `body`, returning the reassembled outgoing body and the
    /// record of what flowed through.
    pub async fn record(mut self, mut body: Body) -> (Body, RecordedBody) {
        let mut frames: Vec<Frame<Bytes>> = Vec::new();
        let mut error = None;

        while let Some(next) = body.frame().await {
            match next {
                Ok(frame) => {
                    if let Some(data) = frame.data_ref() {
                        self.observe(data);
                    }
                    frames.push(frame);
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        let captured = self
            .capture_limit
            .map(|_| Bytes::copy_from_slice(&self.buffer));

        let outgoing = Body::new(StreamBody::new(futures::stream::iter(
            frames.into_iter().map(Ok::<_, Infallible>),
        )));

        (
            outgoing,
            RecordedBody {
                size: self.size,
                captured,
                truncated: self.truncated,
                error,
                buffer: Some(self.buffer),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(body: Body) -> Bytes {
        body.collect().await.expect("collect body").to_bytes()
    }

    #[tokio::test]
    async fn counting_recorder_reports_size_without_capture() {
        let (body, record) = ResponseRecorder::counting()
            .record(Body::from("hello, world!"))
            .await;
        assert_eq!(record.size, 13);
        assert!(record.captured.is_none());
        assert!(!record.truncated);
        assert_eq!(collect(body).await, Bytes::from("hello, world!"));
    }

    #[tokio::test]
    async fn limited_recorder_captures_small_bodies_whole() {
        let (body, record) = ResponseRecorder::limited(100)
            .record(Body::from("payload"))
            .await;
        assert_eq!(record.captured.as_deref(), Some(&b"payload"[..]));
        assert!(!record.truncated);
        assert_eq!(collect(body).await, Bytes::from("payload"));
    }

    #[tokio::test]
    async fn limited_recorder_clips_and_marks() {
        let payload = "x".repeat(64);
        let (body, record) = ResponseRecorder::limited(16)
            .record(Body::from(payload.clone()))
            .await;
        assert!(record.truncated);
        assert_eq!(record.size, 64);
        assert_eq!(
            record.captured.unwrap(),
            Bytes::from(format!("{}{}", "x".repeat(16), TRUNCATION_MARKER))
        );
        // Full payload still reaches the client.
        assert_eq!(collect(body).await, Bytes::from(payload));
    }

    #[tokio::test]
    async fn capture_stops_at_limit_across_chunks() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("aaaa")),
            Ok(Bytes::from("bbbb")),
            Ok(Bytes::from("cccc")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));
        let (outgoing, record) = ResponseRecorder::limited(6).record(body).await;
        assert!(record.truncated);
        assert_eq!(record.size, 12);
        assert_eq!(
            record.captured.unwrap(),
            Bytes::from(format!("aaaabb{TRUNCATION_MARKER}"))
        );
        assert_eq!(collect(outgoing).await, Bytes::from("aaaabbbbcccc"));
    }

    #[tokio::test]
    async fn body_exactly_at_limit_has_no_marker() {
        let (_, record) = ResponseRecorder::limited(4).record(Body::from("abcd")).await;
        assert!(!record.truncated);
        assert_eq!(record.captured.unwrap(), Bytes::from("abcd"));
    }

    #[tokio::test]
    async fn stream_error_is_reported_with_partial_passthrough() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("head")),
            Err(std::io::Error::other("upstream died")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));
        let (outgoing, record) = ResponseRecorder::limited(100).record(body).await;
        assert!(record.error.is_some());
        assert_eq!(record.size, 4);
        assert_eq!(collect(outgoing).await, Bytes::from("head"));
    }
}
