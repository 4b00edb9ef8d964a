/*
 * Created on Tue Jul 28 2026
 *
 * This file is part of corestack, a foundational systems-toolbox library
 * providing mergeable priority queues, compressed tries, and adaptive
 * pooling/logging infrastructure for higher-level services.
 *
 * Copyright (c) 2026, The corestack developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! A foundational systems-toolbox library: data structures, synchronization
//! primitives, and resource-management infrastructure meant to be composed
//! by higher-level services.
//!
//! Three tightly-coupled subsystems:
//!
//! - [`heap`]: a binomial heap with stable, generation-checked handles,
//!   supporting merge, decrease-key, and delete-by-handle.
//! - [`trie`]: a compressed 16-ary nibble trie with path condensation and
//!   both structural and value iteration.
//! - [`pool`]: a fixed-size slab pool ([`pool::shard`]) and a
//!   contention-aware multi-shard wrapper around it ([`pool::autoscale`]).
//!
//! [`logging`] is the bounded asynchronous logging back-end built on top of
//! the pool/concurrency primitives above; [`error`] is the shared error
//! taxonomy every fallible operation in this crate returns.

pub mod error;
pub mod heap;
pub mod logging;
pub mod pool;
pub mod trie;

pub use error::{Error, ErrorKind, Result};
