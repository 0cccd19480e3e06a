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

//! # PlexCache Transport
//!
//! ## Purpose
//! Wire messages exchanged between the near tier and remote primaries,
//! plus the `Transport` trait that delivers them to a named node. Backends
//! are pluggable; the in-memory backend serves tests and single-process
//! deployments.
//!
//! ## Design Decisions
//! - **Typed envelope**: every payload is a `Message` variant, serialized
//!   through serde on delivery so backends stay wire-compatible.
//! - **Topology-aware failures**: a send to a departed node surfaces
//!   `TransportError::NodeLeft`, which lock futures translate into their
//!   peer-left remap path.

pub mod in_memory;
pub mod messages;
pub mod transport;

pub use in_memory::{InMemoryTransport, MessageBus};
pub use messages::{
    KeyLockBlock, KeyLockValue, LockReleaseRequest, LockRequest, LockResponse, Message,
    ResponseError,
};
pub use transport::{MessageHandler, Transport, TransportError, TransportResult};
