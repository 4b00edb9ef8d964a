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

//! Bounded concurrent asynchronous writer: the logger's back-end.
//!
//! A mutex-protected FIFO drained by one worker thread, which schedules
//! up to `K` outstanding async writes in a ring and polls the oldest one
//! when the ring is full or the queue runs dry. A record with `fd < 0`
//! is the poison pill that ends the worker's loop; pending writes are
//! drained before it actually exits.
//!
//! The unix path uses real POSIX AIO (`libc::aiocb`/`aio_write`/`aio_error`).
//! Off unix (no portable AIO without a new dependency) a worker-pool
//! write-behind fallback preserves the external contract (FIFO enqueue,
//! eventual single free) without native AIO.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One queued write: a formatted line bound to a target. `fd < 0` is the
/// poison pill that tells the writer thread to drain and exit.
struct Record {
    fd: RawTarget,
    buffer: Vec<u8>,
}

/// The target a [`Record`] writes to. Resolved once at logger startup:
/// stdout/stderr are recognized by path and never closed; other paths
/// are opened for append with owner-rw/group-rw/other-r permissions.
#[derive(Clone, Copy)]
pub(super) struct RawTarget(pub(super) i32);

impl RawTarget {
    const POISON: RawTarget = RawTarget(-1);
    fn is_poison(self) -> bool {
        self.0 < 0
    }
}

struct Shared {
    queue: Mutex<VecDeque<Record>>,
    signal: Condvar,
}

/// Handle to the running writer thread. Dropping it without calling
/// [`Writer::shutdown`] leaks the thread — callers are expected to shut
/// down explicitly.
pub(super) struct Writer {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl Writer {
    pub(super) fn start(ring_capacity: usize) -> Writer {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name("corestack-logger".into())
            .spawn(move || worker_main(worker_shared, ring_capacity))
            .expect("corestack: failed to spawn logger writer thread");
        Writer {
            shared,
            join: Some(join),
        }
    }

    pub(super) fn enqueue(&self, target: RawTarget, buffer: Vec<u8>) {
        let mut queue = self.shared.queue.lock();
        queue.push_back(Record { fd: target, buffer });
        self.shared.signal.notify_one();
    }

    /// Enqueues the poison record and joins the writer thread. Idempotent
    /// from the caller's perspective: `logging::shutdown` only calls this
    /// once per `Writer`, since the handle is consumed on the way out.
    pub(super) fn shutdown(mut self) {
        self.enqueue(RawTarget::POISON, Vec::new());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn worker_main(shared: Arc<Shared>, ring_capacity: usize) {
    let mut ring: Ring = Ring::new(ring_capacity);
    'drain: loop {
        let record = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(record) = queue.pop_front() {
                    break record;
                }
                if ring.is_empty() {
                    shared.signal.wait(&mut queue);
                } else {
                    // Pending ops and an empty queue: wait a bit for more
                    // work, but don't block past it -- there may be
                    // completions to reap.
                    let timed_out = shared
                        .signal
                        .wait_for(&mut queue, Duration::from_millis(100))
                        .timed_out();
                    if timed_out {
                        drop(queue);
                        ring.try_complete_oldest();
                        continue;
                    }
                }
            }
        };

        if record.fd.is_poison() {
            break 'drain;
        }

        while ring.is_full() {
            if !ring.try_complete_oldest() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        ring.schedule(record);
    }

    while !ring.is_empty() {
        if !ring.try_complete_oldest() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// The `K`-slot ring of in-flight writes.
struct Ring {
    capacity: usize,
    #[cfg(unix)]
    slots: VecDeque<unix_aio::Slot>,
    #[cfg(not(unix))]
    slots: VecDeque<()>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Ring {
            capacity,
            slots: VecDeque::with_capacity(capacity),
        }
    }

    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Schedules `record`'s write. On unix this initiates real async I/O
    /// and returns immediately; off unix the write happens synchronously
    /// in-line (the write-behind fallback), which still preserves FIFO
    /// enqueue order and single eventual free, just without overlap.
    fn schedule(&mut self, record: Record) {
        #[cfg(unix)]
        {
            self.slots.push_back(unix_aio::schedule(record.fd.0, record.buffer));
        }
        #[cfg(not(unix))]
        {
            fallback::write_now(record.fd.0, &record.buffer);
            let _ = record;
        }
    }

    /// Polls the oldest outstanding write. Returns `true` if a slot was
    /// freed (completed, canceled, or -- off unix -- trivially, since
    /// writes there are synchronous and never actually occupy a slot).
    fn try_complete_oldest(&mut self) -> bool {
        #[cfg(unix)]
        {
            match self.slots.front_mut() {
                None => true,
                Some(slot) => {
                    if unix_aio::poll(slot) {
                        self.slots.pop_front();
                        true
                    } else {
                        false
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            true
        }
    }
}

#[cfg(unix)]
mod unix_aio {
    use libc::{aiocb, c_void};

    /// One outstanding AIO write. The backing buffer is kept alive here
    /// until the kernel reports completion.
    pub(super) struct Slot {
        cb: Box<aiocb>,
        _buffer: Vec<u8>,
    }

    pub(super) fn schedule(fd: i32, buffer: Vec<u8>) -> Slot {
        // SAFETY: `aiocb` is a C POD struct; the zeroed bit pattern is a
        // valid (all-fields-default) instance.
        let mut cb: Box<aiocb> = unsafe { Box::new(std::mem::zeroed()) };
        cb.aio_fildes = fd;
        cb.aio_offset = 0;
        cb.aio_reqprio = 0;
        cb.aio_buf = buffer.as_ptr() as *mut c_void;
        cb.aio_nbytes = buffer.len();
        cb.aio_sigevent.sigev_notify = libc::SIGEV_NONE;

        // SAFETY: `cb` outlives the call and is not moved while the
        // operation is outstanding (it lives boxed inside the returned
        // `Slot`, which the ring owns by value); `buffer` likewise stays
        // alive unmoved (only the owning `Vec` struct relocates, never
        // its heap allocation) until this `Slot` is dropped.
        let rc = unsafe { libc::aio_write(cb.as_mut() as *mut aiocb) };
        if rc != 0 {
            fatal_io_error("failed to enqueue async write");
        }
        Slot { cb, _buffer: buffer }
    }

    /// Polls one slot. Returns `true` iff the slot is now free (done or
    /// canceled). A genuine I/O error is fatal to the writer.
    pub(super) fn poll(slot: &mut Slot) -> bool {
        // SAFETY: `cb` is a live, previously-submitted control block.
        let status = unsafe { libc::aio_error(slot.cb.as_ref() as *const aiocb) };
        match status {
            libc::EINPROGRESS => false,
            0 => {
                // SAFETY: aio_error reported completion; aio_return may
                // only be called once per completed operation.
                unsafe {
                    libc::aio_return(slot.cb.as_mut() as *mut aiocb);
                }
                true
            }
            e if e == libc::ECANCELED => true,
            errno => {
                fatal_io_error(&format!("async write failed (errno {errno})"));
                unreachable!()
            }
        }
    }

    fn fatal_io_error(context: &str) -> ! {
        eprintln!("corestack: logger writer: {context}; aborting");
        std::process::abort();
    }
}

#[cfg(not(unix))]
mod fallback {
    use std::io::Write;

    /// Write-behind fallback for non-unix targets, used when no native
    /// AIO facility is available. `fd` here is always one of the three
    /// values `super::open_target` hands back: 1 (stdout), 2 (stderr), or
    /// a slot in the process-wide open-file table -- see `super::target`.
    pub(super) fn write_now(fd: i32, buffer: &[u8]) {
        match fd {
            1 => {
                let _ = std::io::stdout().write_all(buffer);
            }
            2 => {
                let _ = std::io::stderr().write_all(buffer);
            }
            _ => super::target::write_opened(fd, buffer),
        }
    }
}

#[cfg(not(unix))]
pub(super) mod target {
    //! A tiny process-wide table mapping the small integer "fds" this
    //! crate hands out off-unix to open [`std::fs::File`]s, so `Record`
    //! can stay a plain `i32` on every platform.
    use parking_lot::Mutex;
    use std::fs::{File, OpenOptions};
    use std::io::{Result, Write};
    use std::path::Path;
    use std::sync::atomic::{AtomicI32, Ordering};

    static NEXT_FD: AtomicI32 = AtomicI32::new(3);
    static TABLE: Mutex<Vec<(i32, File)>> = Mutex::new(Vec::new());

    pub(in crate::logging) fn open(path: &Path) -> Result<i32> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fd = NEXT_FD.fetch_add(1, Ordering::Relaxed);
        TABLE.lock().push((fd, file));
        Ok(fd)
    }

    pub(super) fn write_opened(fd: i32, buffer: &[u8]) {
        let mut table = TABLE.lock();
        if let Some((_, file)) = table.iter_mut().find(|(f, _)| *f == fd) {
            let _ = file.write_all(buffer);
        }
    }
}
