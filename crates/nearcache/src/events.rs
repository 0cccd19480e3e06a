// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexCache.
//
// PlexCache is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexCache is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexCache. If not, see <https://www.gnu.org/licenses/>.

//! Cache events.

use async_trait::async_trait;
use plexcache_core::{CacheValue, Key};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Observable cache events.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A value was read under an acquired lock.
    ObjectRead {
        /// Key read.
        key: Key,
        /// Value observed after the read.
        new_value: Option<CacheValue>,
        /// Value observed before the read, when any.
        old_value: Option<CacheValue>,
    },
}

/// Receives cache events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record one event.
    async fn record(&self, event: CacheEvent);
}

/// Sink that drops all events.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn record(&self, _event: CacheEvent) {}
}

/// Sink that keeps events in memory (for tests and tools).
pub struct RecordingEventSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingEventSink {
    /// Create an empty sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// Snapshot of recorded events.
    pub async fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().await.clone()
    }

    /// Number of recorded events.
    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    /// True when nothing was recorded.
    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn record(&self, event: CacheEvent) {
        self.events.lock().await.push(event);
    }
}
