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

//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Cache configuration shared across the near and primary tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache name (used in logs).
    pub cache_name: String,

    /// Default lock acquisition timeout in milliseconds. Zero waits
    /// indefinitely; a negative value fails immediately when the lock is
    /// not available.
    pub default_lock_timeout_ms: i64,

    /// Eventually-consistent mode default for implicit transactions.
    pub ec_mode: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: "default".to_string(),
            default_lock_timeout_ms: 0,
            ec_mode: false,
        }
    }
}
