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

//! Single-shard fixed-size object pool.
//!
//! An intrusive free-list of fixed-size memory chunks, guarded by one
//! mutex, with independent pooled/total caps. Modeled here as an
//! explicit `Vec<Box<[u8]>>` free list rather than an intrusive
//! next-pointer written into the chunk itself — the allocator call and
//! the eventual drop both still happen outside the lock.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};

/// A fixed-size slab handed out by an [`ObjectPool`]. Must be returned to
/// the same pool it came from via [`ObjectPool::free`]; freeing it with a
/// different pool is a caller error this type cannot prevent.
#[derive(Debug)]
pub struct Slab(Box<[u8]>);

impl Slab {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Validated configuration for an [`ObjectPool`], checked once here
/// rather than re-checking `pooled_limit <= total_limit` at every call
/// site.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub pooled_limit: usize,
    pub total_limit: usize,
}

impl PoolConfig {
    pub fn try_new(pooled_limit: usize, total_limit: usize) -> Result<Self> {
        if pooled_limit > total_limit {
            return Err(Error::with_detail(
                ErrorKind::Invariant,
                "pool limit exceeds total limit",
            ));
        }
        Ok(PoolConfig {
            pooled_limit,
            total_limit,
        })
    }
}

struct Inner {
    free: Vec<Box<[u8]>>,
    size: usize,
    total: usize,
    pool_limit: usize,
    total_limit: usize,
}

impl Inner {
    fn pooled(&self) -> usize {
        self.free.len()
    }
}

/// A single shard: fixed-size slabs, a pooled-count cap `P`, a total-count
/// cap `T` (`P <= T`), behind one mutex.
pub struct ObjectPool {
    inner: Mutex<Inner>,
}

impl ObjectPool {
    pub fn new(size: usize, pool_limit: usize, total_limit: usize) -> Result<Self> {
        if pool_limit > total_limit {
            return Err(Error::with_detail(
                ErrorKind::Invariant,
                "pool limit exceeds total limit",
            ));
        }
        // A free slab must be able to hold the free-list link in an
        // intrusive implementation; kept here as a floor for parity even
        // though this implementation doesn't write links into the slab.
        let size = size.max(std::mem::size_of::<usize>());
        Ok(ObjectPool {
            inner: Mutex::new(Inner {
                free: Vec::new(),
                size,
                total: 0,
                pool_limit,
                total_limit,
            }),
        })
    }

    /// Builds a pool from an already-validated [`PoolConfig`]; infallible,
    /// since `PoolConfig::try_new` has already ruled out `pooled_limit >
    /// total_limit`.
    pub fn with_config(size: usize, config: PoolConfig) -> Self {
        Self::new(size, config.pooled_limit, config.total_limit)
            .expect("PoolConfig is pre-validated")
    }

    pub fn slab_size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn pooled(&self) -> usize {
        self.inner.lock().pooled()
    }

    pub fn total(&self) -> usize {
        self.inner.lock().total
    }

    pub fn used(&self) -> usize {
        let inner = self.inner.lock();
        inner.total - inner.pooled()
    }

    pub fn pool_limit(&self) -> usize {
        self.inner.lock().pool_limit
    }

    pub fn total_limit(&self) -> usize {
        self.inner.lock().total_limit
    }

    /// Never blocks beyond the single (uncontended) mutex acquisition.
    /// Returns `None` iff the total limit has been reached.
    pub fn try_alloc(&self) -> Option<Slab> {
        let size = {
            let mut inner = self.inner.lock();
            if let Some(slab) = inner.free.pop() {
                return Some(Slab(slab));
            }
            if inner.total >= inner.total_limit {
                return None;
            }
            inner.size
        };

        let fresh = vec![0u8; size].into_boxed_slice(); // allocator call outside the lock

        let mut inner = self.inner.lock();
        inner.total += 1;
        Some(Slab(fresh))
    }

    /// Bounded mutex acquisition. On success reports the elapsed lock wait
    /// so callers (the auto-scaling pool) can adapt.
    pub fn try_alloc_with_timeout(&self, timeout: Duration) -> (Option<Slab>, bool, Duration) {
        let start = Instant::now();
        let Some(mut inner) = self.inner.try_lock_for(timeout) else {
            return (None, true, start.elapsed());
        };
        let lock_time = start.elapsed();

        if let Some(slab) = inner.free.pop() {
            return (Some(Slab(slab)), false, lock_time);
        }
        if inner.total >= inner.total_limit {
            return (None, false, lock_time);
        }
        let size = inner.size;
        drop(inner);

        let fresh = vec![0u8; size].into_boxed_slice();

        let mut inner = self.inner.lock();
        inner.total += 1;
        (Some(Slab(fresh)), false, lock_time)
    }

    /// Returns `slab` to the free-list if under the pooled cap, otherwise
    /// releases it to the system allocator (outside the lock).
    pub fn free(&self, slab: Slab) {
        let trash = {
            let mut inner = self.inner.lock();
            if inner.pooled() < inner.pool_limit {
                inner.free.push(slab.0);
                None
            } else {
                inner.total -= 1;
                Some(slab.0)
            }
        };
        drop(trash); // explicit: the system deallocation happens unlocked
    }

    /// Sets a new pooled-objects cap, releasing any now-over-limit slabs
    /// immediately. Returns the limit now in force.
    pub fn set_pool_limit(&self, limit: usize) -> Result<usize> {
        let trash = {
            let mut inner = self.inner.lock();
            if limit > inner.total_limit {
                return Err(Error::with_detail(
                    ErrorKind::Invariant,
                    "pool limit would exceed total limit",
                ));
            }
            inner.pool_limit = limit;
            let mut trash = Vec::new();
            while inner.pooled() > inner.pool_limit {
                trash.push(inner.free.pop().unwrap());
                inner.total -= 1;
            }
            trash
        };
        drop(trash);
        Ok(limit)
    }

    /// Sets a new total-objects cap. Fails with `Invariant` if more slabs
    /// are currently outstanding than the requested cap would allow even
    /// with an empty free-list — this crate never reclaims a slab a
    /// caller still holds. On success, releases any now-over-limit free
    /// slabs immediately and returns the limit now in force.
    pub fn set_total_limit(&self, limit: usize) -> Result<usize> {
        let trash = {
            let mut inner = self.inner.lock();
            let outstanding = inner.total - inner.pooled();
            if limit < outstanding {
                return Err(Error::with_detail(
                    ErrorKind::Invariant,
                    "total limit would fall below the number of outstanding slabs",
                ));
            }
            if inner.pool_limit > limit {
                inner.pool_limit = limit;
            }
            inner.total_limit = limit;

            let mut trash = Vec::new();
            while inner.total > limit {
                trash.push(inner.free.pop().expect("outstanding <= limit by construction"));
                inner.total -= 1;
            }
            trash
        };
        drop(trash);
        Ok(limit)
    }

    /// Releases all currently pooled slabs. If `finish`, also sets the
    /// total limit to 0 to prevent further allocation, failing with
    /// `InUse` if slabs are still outstanding.
    pub fn cleanup(&self, finish: bool) -> Result<()> {
        let trash = {
            let mut inner = self.inner.lock();
            let trash = std::mem::take(&mut inner.free);
            inner.total -= trash.len();

            if finish {
                if inner.total > 0 {
                    return Err(Error::with_detail(
                        ErrorKind::InUse,
                        "slabs still outstanding",
                    ));
                }
                inner.total_limit = 0;
            }
            trash
        };
        drop(trash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_limit_scenario() {
        let pool = ObjectPool::new(8, 3, 3).unwrap();
        let slabs: Vec<_> = (0..4).map(|_| pool.try_alloc()).collect();
        let ok_count = slabs.iter().filter(|s| s.is_some()).count();
        assert_eq!(ok_count, 3);
        assert!(slabs[3].is_none());

        let freed = slabs.into_iter().flatten().next().unwrap();
        pool.free(freed);
        assert!(pool.try_alloc().is_some());
    }

    #[test]
    fn alloc_then_free_leaves_outstanding_unchanged() {
        let pool = ObjectPool::new(8, 4, 4).unwrap();
        let before = pool.used();
        let slab = pool.try_alloc().unwrap();
        pool.free(slab);
        assert_eq!(pool.used(), before);
    }

    #[test]
    fn set_total_limit_rejects_below_outstanding() {
        let pool = ObjectPool::new(8, 4, 4).unwrap();
        let a = pool.try_alloc().unwrap();
        let b = pool.try_alloc().unwrap();
        assert_eq!(
            pool.set_total_limit(1).unwrap_err().kind(),
            ErrorKind::Invariant
        );
        assert_eq!(pool.total_limit(), 4);
        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn set_total_limit_shrinks_and_releases_free_slabs() {
        let pool = ObjectPool::new(8, 4, 4).unwrap();
        let a = pool.try_alloc().unwrap();
        let b = pool.try_alloc().unwrap();
        pool.free(a);
        pool.free(b);
        assert_eq!(pool.total(), 4);
        let effective = pool.set_total_limit(1).unwrap();
        assert_eq!(effective, 1);
        assert_eq!(pool.total(), 1);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn cleanup_finish_rejects_outstanding() {
        let pool = ObjectPool::new(8, 4, 4).unwrap();
        let slab = pool.try_alloc().unwrap();
        assert_eq!(pool.cleanup(true).unwrap_err().kind(), ErrorKind::InUse);
        pool.free(slab);
        assert!(pool.cleanup(true).is_ok());
    }

    #[test]
    fn invalid_limits_rejected() {
        assert!(ObjectPool::new(8, 5, 3).is_err());
    }

    #[test]
    fn pool_config_validates_then_builds() {
        assert!(PoolConfig::try_new(5, 3).is_err());
        let config = PoolConfig::try_new(2, 4).unwrap();
        let pool = ObjectPool::with_config(8, config);
        assert_eq!(pool.pool_limit(), 2);
        assert_eq!(pool.total_limit(), 4);
    }
}
