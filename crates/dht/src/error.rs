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

//! Error types for DHT tier operations.

use thiserror::Error;

/// Result type for DHT operations.
pub type DhtResult<T> = Result<T, DhtError>;

/// Errors that can occur on the primary tier.
#[derive(Error, Debug, Clone)]
pub enum DhtError {
    /// Value could not be marshalled
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal tier failure
    #[error("Internal error: {0}")]
    InternalError(String),
}
