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

//! Multi-shard pool that spawns additional shards under lock contention.
//!
//! A list of [`shard::ObjectPool`]s kept approximately sorted by a
//! sliding-window average of observed lock-acquisition latency, with
//! allocation always attempted against the list head first.
//!
//! Shard entries live in a generation-tagged arena (same style as
//! [`crate::heap`] and [`crate::trie`]) rather than an intrusive
//! doubly-linked list of raw pointers, so a [`PooledSlab`]'s owning-shard
//! reference stays valid even if other shards are reaped out from under
//! it (`order`, a plain `Vec` of arena indices, is the sorted list;
//! bubbling a shard is a `Vec::remove` + `Vec::insert`, same O(k) cost as
//! walking neighbor links).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::shard::{ObjectPool, Slab};
use crate::error::{Error, ErrorKind, Result};

/// Validated configuration for an [`AutoScalePool`].
#[derive(Debug, Clone)]
pub struct AutoScaleConfig {
    pub global_limit: usize,
    pub latency_threshold: Duration,
    pub window_size: usize,
    pub per_shard_pool_limit: usize,
}

impl AutoScaleConfig {
    pub fn try_new(
        global_limit: usize,
        latency_threshold: Duration,
        window_size: usize,
        per_shard_pool_limit: usize,
    ) -> Result<Self> {
        if window_size == 0 {
            return Err(Error::with_detail(
                ErrorKind::Invariant,
                "averaging window size must be nonzero",
            ));
        }
        if per_shard_pool_limit > global_limit {
            return Err(Error::with_detail(
                ErrorKind::Invariant,
                "per-shard pool limit exceeds global limit",
            ));
        }
        Ok(AutoScaleConfig {
            global_limit,
            latency_threshold,
            window_size,
            per_shard_pool_limit,
        })
    }
}

/// Private sliding-window average of lock-acquisition latencies, in
/// seconds. The averaging-window statistic itself is out of this crate's
/// public scope; this is the private contract the auto-scaling pool needs.
struct SlidingAvg {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl SlidingAvg {
    fn new(capacity: usize) -> Self {
        SlidingAvg {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    fn push(&mut self, sample: f64) -> f64 {
        self.samples.push_back(sample);
        self.sum += sample;
        if self.samples.len() > self.capacity {
            self.sum -= self.samples.pop_front().unwrap();
        }
        self.mean()
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }
}

struct ShardEntry {
    /// `Arc`-wrapped so a caller can clone the handle out from under the
    /// global lock and call into the shard's own mutex unlocked — the
    /// global lock must never be held across a per-shard blocking call.
    pool: Arc<ObjectPool>,
    in_use: bool,
    latency: SlidingAvg,
}

enum ShardSlot {
    Occupied(ShardEntry),
    Vacant { next_free: Option<usize> },
}

struct Global {
    shards: Vec<ShardSlot>,
    free_head: Option<usize>,
    /// Shard slot indices, kept approximately sorted ascending by mean
    /// observed lock latency. Allocation is always attempted against
    /// `order[0]`.
    order: Vec<usize>,
    outstanding: usize,
}

/// A slab allocated through an [`AutoScalePool`], carrying the owning
/// shard's slot index so `free` can route directly to it without a scan.
pub struct PooledSlab {
    shard: usize,
    slab: Slab,
}

impl PooledSlab {
    pub fn as_slice(&self) -> &[u8] {
        self.slab.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.slab.as_mut_slice()
    }
}

pub struct AutoScalePool {
    config: AutoScaleConfig,
    slab_size: usize,
    global: Mutex<Global>,
}

impl AutoScalePool {
    pub fn new(slab_size: usize, config: AutoScaleConfig) -> Self {
        AutoScalePool {
            config,
            slab_size,
            global: Mutex::new(Global {
                shards: Vec::new(),
                free_head: None,
                order: Vec::new(),
                outstanding: 0,
            }),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.global.lock().outstanding
    }

    pub fn shard_count(&self) -> usize {
        self.global.lock().order.len()
    }

    fn alloc_shard_slot(global: &mut Global, entry: ShardEntry) -> usize {
        match global.free_head {
            Some(idx) => {
                let next_free = match &global.shards[idx] {
                    ShardSlot::Vacant { next_free } => *next_free,
                    ShardSlot::Occupied(_) => unreachable!(),
                };
                global.free_head = next_free;
                global.shards[idx] = ShardSlot::Occupied(entry);
                idx
            }
            None => {
                global.shards.push(ShardSlot::Occupied(entry));
                global.shards.len() - 1
            }
        }
    }

    fn new_shard_entry(&self) -> ShardEntry {
        ShardEntry {
            // Per-shard total is unbounded by design; the global limit is
            // enforced once, up front, under the global lock.
            pool: Arc::new(
                ObjectPool::new(self.slab_size, self.config.per_shard_pool_limit, usize::MAX)
                    .expect("per_shard_pool_limit <= usize::MAX by construction"),
            ),
            in_use: false,
            latency: SlidingAvg::new(self.config.window_size),
        }
    }

    /// Allocates a slab, spawning an additional shard if the chosen shard
    /// is busy (can't acquire its lock within the latency threshold) and
    /// no shard was just created for this call. Fails with `Limit` iff
    /// the global outstanding count is already at `global_limit`; a
    /// failed call is a strict no-op on all counters.
    pub fn try_alloc(&self) -> Option<PooledSlab> {
        let (mut shard_idx, created) = {
            let mut global = self.global.lock();
            if global.outstanding >= self.config.global_limit {
                return None;
            }
            match global.order.first().copied() {
                Some(idx) => {
                    global.shard_mut(idx).in_use = true;
                    global.outstanding += 1;
                    (idx, false)
                }
                None => {
                    let idx = Self::alloc_shard_slot(&mut global, self.new_shard_entry());
                    global.shard_mut(idx).in_use = true;
                    global.order.push(idx);
                    global.outstanding += 1;
                    (idx, true)
                }
            }
        };

        // Clone the shard's `Arc<ObjectPool>` out from under the global
        // lock and drop the lock immediately — the bounded wait below can
        // take up to `latency_threshold`, and the global lock must never
        // be held across it.
        let pool = Arc::clone(&self.global.lock().shard_mut(shard_idx).pool);
        let start = Instant::now();
        let (slab, busy, _) = pool.try_alloc_with_timeout(self.config.latency_threshold);
        let lock_time = start.elapsed();

        if busy && !created {
            // Heavy concurrency on the chosen shard: widen by spawning
            // another one instead of waiting further.
            let mut global = self.global.lock();
            global.shard_mut(shard_idx).in_use = false;
            let new_idx = Self::alloc_shard_slot(&mut global, self.new_shard_entry());
            global.order.push(new_idx);
            global.shard_mut(new_idx).in_use = true;
            shard_idx = new_idx;
            let pool = Arc::clone(&global.shard_mut(shard_idx).pool);
            drop(global);

            let slab = pool.try_alloc();
            let mut global = self.global.lock();
            global.shard_mut(shard_idx).in_use = false;
            return match slab {
                Some(slab) => Some(PooledSlab { shard: shard_idx, slab }),
                None => {
                    global.outstanding -= 1;
                    None
                }
            };
        }

        let mut global = self.global.lock();
        match slab {
            None => {
                global.shard_mut(shard_idx).in_use = false;
                global.outstanding -= 1;
                None
            }
            Some(slab) => {
                let mean = global.shard_mut(shard_idx).latency.push(lock_time.as_secs_f64());
                global.bubble(shard_idx, mean);
                global.shard_mut(shard_idx).in_use = false;
                Some(PooledSlab { shard: shard_idx, slab })
            }
        }
    }

    /// Routes `slab` back to its owning shard (no search needed) and
    /// decrements the global outstanding count.
    pub fn free(&self, slab: PooledSlab) {
        let mut global = self.global.lock();
        let shard = global.shard_mut(slab.shard);
        let in_use = shard.in_use;
        let pooled_before_free_is_zero_and_idle = !in_use;
        shard.pool.free(slab.slab);
        global.outstanding -= 1;

        if pooled_before_free_is_zero_and_idle {
            let total = global.shard_mut(slab.shard).pool.total();
            if total == 0 {
                global.reap(slab.shard);
            }
        }
    }
}

impl Global {
    fn shard_mut(&mut self, idx: usize) -> &mut ShardEntry {
        match &mut self.shards[idx] {
            ShardSlot::Occupied(entry) => entry,
            ShardSlot::Vacant { .. } => unreachable!("dangling shard index"),
        }
    }

    /// Moves shard `idx` to its correct position given its latest mean
    /// latency, walking right then left (same direction order as the
    /// original), performing the re-insert only if the position changed.
    fn bubble(&mut self, idx: usize, mean: f64) {
        let Some(pos) = self.order.iter().position(|&i| i == idx) else {
            return;
        };

        let mut new_pos = pos;
        while new_pos + 1 < self.order.len() {
            let neighbor = self.order[new_pos + 1];
            if mean <= self.shard_mut(neighbor).latency.mean() {
                break;
            }
            new_pos += 1;
        }
        if new_pos == pos {
            while new_pos > 0 {
                let neighbor = self.order[new_pos - 1];
                if mean >= self.shard_mut(neighbor).latency.mean() {
                    break;
                }
                new_pos -= 1;
            }
        }
        if new_pos != pos {
            self.order.remove(pos);
            self.order.insert(new_pos, idx);
        }
    }

    /// Removes an idle, empty shard from the list and frees its slot. A
    /// shard with outstanding allocations is never reaped (its `in_use`
    /// flag, or a nonzero pool total, rules this path out).
    fn reap(&mut self, idx: usize) {
        if let Some(pos) = self.order.iter().position(|&i| i == idx) {
            self.order.remove(pos);
        }
        self.shards[idx] = ShardSlot::Vacant {
            next_free: self.free_head,
        };
        self.free_head = Some(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_shard_roundtrip() {
        let config = AutoScaleConfig::try_new(16, Duration::from_millis(50), 8, 4).unwrap();
        let pool = AutoScalePool::new(32, config);
        let slab = pool.try_alloc().unwrap();
        assert_eq!(pool.outstanding(), 1);
        pool.free(slab);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn global_limit_enforced() {
        let config = AutoScaleConfig::try_new(2, Duration::from_millis(50), 8, 4).unwrap();
        let pool = AutoScalePool::new(32, config);
        let _a = pool.try_alloc().unwrap();
        let _b = pool.try_alloc().unwrap();
        assert!(pool.try_alloc().is_none());
        assert_eq!(pool.outstanding(), 2);
    }

    #[test]
    fn expansion_under_contention() {
        // A very small latency threshold forces shard contention to show
        // up as "busy" quickly, driving shard creation under load.
        let config = AutoScaleConfig::try_new(256, Duration::from_nanos(1), 16, 64).unwrap();
        let pool = Arc::new(AutoScalePool::new(64, config));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for _ in 0..20 {
                        if let Some(s) = pool.try_alloc() {
                            held.push(s);
                        }
                    }
                    for s in held {
                        pool.free(s);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(pool.outstanding() <= 256);
    }

    #[test]
    fn rejects_invalid_window_size() {
        assert!(AutoScaleConfig::try_new(8, Duration::from_millis(1), 0, 4).is_err());
    }
}
