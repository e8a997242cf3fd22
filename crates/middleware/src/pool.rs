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

//! Scratch-object pooling.
//!
//! Pools are an optimization, never a semantic device: with pooling
//! disabled every acquisition allocates fresh, and callers cannot tell the
//! difference. Objects handed back via [`Pool::release`] are reset first
//! and must be abandoned by the caller.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use bytes::BytesMut;
use reqlog_error::StructuredError;

static POOLING_ENABLED: AtomicBool = AtomicBool::new(true);

/// Toggle pooling process-wide. Takes effect for subsequent acquisitions.
pub fn set_pooling_enabled(enabled: bool) {
    POOLING_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn pooling_enabled() -> bool { POOLING_ENABLED.load(Ordering::Relaxed) }

/// An object that can be recycled through a [`Pool`].
pub trait Poolable: Default + Send {
    /// Clear all state so the next acquirer sees a fresh object.
    fn reset(&mut self);
}

impl Poolable for BytesMut {
    fn reset(&mut self) { self.clear(); }
}

impl Poolable for StructuredError {
    fn reset(&mut self) { StructuredError::reset(self); }
}

/// A bounded, concurrency-safe free list.
pub struct Pool<T: Poolable> {
    items:    Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Poolable> Pool<T> {
    pub const fn new(max_idle: usize) -> Self {
        Pool {
            items: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// A recycled object when pooling is on and one is idle, otherwise a
    /// fresh default.
    pub fn acquire(&self) -> T {
        if pooling_enabled() {
            if let Some(item) = self.items.lock().unwrap().pop() {
                return item;
            }
        }
        T::default()
    }

    /// Hand an object back. It is reset before reuse; the caller must not
    /// touch it afterwards.
    pub fn release(&self, mut item: T) {
        if !pooling_enabled() {
            return;
        }
        item.reset();
        let mut items = self.items.lock().unwrap();
        if items.len() < self.max_idle {
            items.push(item);
        }
    }

    #[cfg(test)]
    fn idle(&self) -> usize { self.items.lock().unwrap().len() }
}

static BUFFER_POOL: Pool<BytesMut> = Pool::new(64);
static ERROR_POOL: Pool<StructuredError> = Pool::new(32);

/// Shared pool of body-capture scratch buffers.
pub fn buffer_pool() -> &'static Pool<BytesMut> { &BUFFER_POOL }

/// Shared pool of structured-error records.
pub fn error_pool() -> &'static Pool<StructuredError> { &ERROR_POOL }

#[cfg(test)]
mod tests {
    use std::sync::MutexGuard;

    use super::*;

    // The enable switch is process-global; tests touching it serialize here.
    static SWITCH_GUARD: Mutex<()> = Mutex::new(());

    fn hold_switch() -> MutexGuard<'static, ()> {
        let guard = SWITCH_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        set_pooling_enabled(true);
        guard
    }

    #[test]
    fn release_resets_before_reuse() {
        let _guard = hold_switch();
        let pool: Pool<BytesMut> = Pool::new(4);
        let mut buffer = pool.acquire();
        buffer.extend_from_slice(b"dirty");
        pool.release(buffer);

        let reused = pool.acquire();
        assert!(reused.is_empty());
    }

    #[test]
    fn pool_is_bounded() {
        let _guard = hold_switch();
        let pool: Pool<BytesMut> = Pool::new(2);
        for _ in 0..5 {
            pool.release(BytesMut::from(&b"x"[..]));
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn disabled_pooling_always_allocates() {
        let _guard = hold_switch();
        let pool: Pool<BytesMut> = Pool::new(4);
        set_pooling_enabled(false);
        pool.release(BytesMut::from(&b"x"[..]));
        assert_eq!(pool.idle(), 0);
        let fresh = pool.acquire();
        assert!(fresh.is_empty());
        set_pooling_enabled(true);
    }

    #[test]
    fn error_records_recycle_clean() {
        let _guard = hold_switch();
        let pool: Pool<StructuredError> = Pool::new(4);
        let error = StructuredError::validation("bad").with_request_info(
            "GET",
            "/x",
            Some("id".to_string()),
        );
        pool.release(error);
        let recycled = pool.acquire();
        assert!(recycled.kind().is_none());
        assert!(recycled.request_id().is_none());
    }
}
