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

//! Fixed-size slab pooling: a single-shard pool ([`shard`]) plus a
//! contention-aware multi-shard wrapper around it ([`autoscale`]) that
//! widens to additional shards under lock contention.

pub mod autoscale;
pub mod shard;

pub use autoscale::{AutoScaleConfig, AutoScalePool, PooledSlab};
pub use shard::{ObjectPool, PoolConfig, Slab};
