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

//! Wall-clock timeout processor.
//!
//! ## Purpose
//! Fires registered timeout objects at their absolute deadline. One
//! background task serves all objects; registration and removal wake the
//! task so the nearest deadline is always honored.
//!
//! ## Design
//! - Deadlines are epoch milliseconds, so they survive task reschedules.
//! - An object fires at most once; it is removed before its callback runs.
//! - Removal after firing is a no-op.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// An object with a wall-clock deadline.
#[async_trait]
pub trait TimeoutObject: Send + Sync {
    /// Unique id of this timeout registration.
    fn timeout_id(&self) -> Uuid;

    /// Absolute deadline in epoch milliseconds.
    fn end_time(&self) -> i64;

    /// Invoked once when the deadline passes.
    async fn on_timeout(&self);
}

/// Processor firing timeout objects at their deadline.
pub struct TimeoutProcessor {
    objects: Mutex<HashMap<Uuid, Arc<dyn TimeoutObject>>>,
    wakeup: Notify,
    stopped: AtomicBool,
}

impl TimeoutProcessor {
    /// Create a processor. Call [`TimeoutProcessor::start`] to run it.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn the processor task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Register a timeout object.
    pub async fn add_timeout_object(&self, obj: Arc<dyn TimeoutObject>) {
        self.objects.lock().await.insert(obj.timeout_id(), obj);
        self.wakeup.notify_one();
    }

    /// Remove a timeout object. Returns false when it already fired or was
    /// never registered.
    pub async fn remove_timeout_object(&self, id: &Uuid) -> bool {
        let removed = self.objects.lock().await.remove(id).is_some();
        if removed {
            self.wakeup.notify_one();
        }
        removed
    }

    /// Number of registered objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// True when no objects are registered.
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Stop the processor task.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    async fn run(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            let now = Utc::now().timestamp_millis();

            let mut due: Vec<Arc<dyn TimeoutObject>> = Vec::new();
            let mut nearest: Option<i64> = None;
            {
                let mut objects = self.objects.lock().await;
                objects.retain(|_, obj| {
                    if obj.end_time() <= now {
                        due.push(Arc::clone(obj));
                        false
                    } else {
                        nearest = Some(match nearest {
                            Some(t) => t.min(obj.end_time()),
                            None => obj.end_time(),
                        });
                        true
                    }
                });
            }

            for obj in due {
                debug!("Firing timeout object [id={}]", obj.timeout_id());
                obj.on_timeout().await;
            }

            let notified = self.wakeup.notified();
            tokio::pin!(notified);

            match nearest {
                Some(t) => {
                    let delay = (t - Utc::now().timestamp_millis()).max(0) as u64;
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}
