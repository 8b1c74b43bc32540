//! Fair reader/writer monitor guarding one index instance.
//!
//! Any number of readers may be inside at once; a writer is alone. A
//! waiting writer stops new readers from being admitted so writers are not
//! starved, and readers that queued up behind a writer are admitted as one
//! batch when that writer leaves so readers are not starved either.
//!
//! Nested acquisitions by the same thread are always admitted: a thread
//! holding a read may read again even while a writer waits, and the writing
//! thread may re-enter for read or write. Upgrading (asking for a write while
//! holding a read) is not supported and deadlocks.
//!
//! ```text
//! enter_read   blocks while a writer is active, or a writer waits and the
//!              thread holds no read yet and no reader batch is open
//! enter_write  blocks while any reader or another writer is active
//! ```

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct MonitorState {
    active_readers: usize,
    reader_threads: HashMap<ThreadId, usize>,
    readers_waiting: usize,
    /// Readers that may enter ahead of waiting writers (set when a writer exits).
    reader_batch: usize,
    writer: Option<ThreadId>,
    write_depth: usize,
    writers_waiting: usize,
}

/// Snapshot of the monitor counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub active_readers: usize,
    pub writer_active: bool,
    pub writers_waiting: usize,
}

#[derive(Debug, Default)]
pub struct ReadWriteMonitor {
    state: Mutex<MonitorState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
}

impl ReadWriteMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_read(&self) {
        let tid = thread::current().id();
        let mut st = self.state.lock();

        if st.writer == Some(tid) {
            st.write_depth += 1;
            return;
        }

        if !st.reader_threads.contains_key(&tid) {
            st.readers_waiting += 1;
            while st.writer.is_some() || (st.writers_waiting > 0 && st.reader_batch == 0) {
                self.readers_cv.wait(&mut st);
            }
            st.readers_waiting -= 1;
            if st.reader_batch > 0 {
                st.reader_batch -= 1;
            }
        }

        st.active_readers += 1;
        *st.reader_threads.entry(tid).or_insert(0) += 1;
    }

    pub fn exit_read(&self) {
        let tid = thread::current().id();
        let mut st = self.state.lock();

        if st.writer == Some(tid) {
            debug_assert!(st.write_depth > 1, "exit_read without matching enter_read");
            st.write_depth = st.write_depth.saturating_sub(1);
            return;
        }

        match st.reader_threads.get_mut(&tid) {
            Some(depth) => {
                *depth -= 1;
                if *depth == 0 {
                    st.reader_threads.remove(&tid);
                }
            }
            None => {
                debug_assert!(false, "exit_read without matching enter_read");
                return;
            }
        }
        st.active_readers -= 1;

        if st.active_readers == 0 && st.writers_waiting > 0 {
            self.writers_cv.notify_one();
        }
    }

    pub fn enter_write(&self) {
        let tid = thread::current().id();
        let mut st = self.state.lock();

        if st.writer == Some(tid) {
            st.write_depth += 1;
            return;
        }
        debug_assert!(
            !st.reader_threads.contains_key(&tid),
            "read to write upgrade is not supported"
        );

        st.writers_waiting += 1;
        while st.writer.is_some() || st.active_readers > 0 || st.reader_batch > 0 {
            self.writers_cv.wait(&mut st);
        }
        st.writers_waiting -= 1;
        st.writer = Some(tid);
        st.write_depth = 1;
    }

    pub fn exit_write(&self) {
        let mut st = self.state.lock();
        debug_assert_eq!(st.writer, Some(thread::current().id()));

        st.write_depth = st.write_depth.saturating_sub(1);
        if st.write_depth > 0 {
            return;
        }
        st.writer = None;
        self.release_after_write(&mut st);
    }

    /// Release the write acquisition and take a read one without letting
    /// another writer in between.
    pub fn exit_write_enter_read(&self) {
        let tid = thread::current().id();
        let mut st = self.state.lock();
        debug_assert_eq!(st.writer, Some(tid));
        debug_assert_eq!(st.write_depth, 1, "cannot downgrade a nested write");

        st.writer = None;
        st.write_depth = 0;
        st.active_readers += 1;
        *st.reader_threads.entry(tid).or_insert(0) += 1;
        self.release_after_write(&mut st);
    }

    fn release_after_write(&self, st: &mut MonitorState) {
        if st.readers_waiting > 0 {
            st.reader_batch = st.readers_waiting;
            self.readers_cv.notify_all();
        } else if st.writers_waiting > 0 && st.active_readers == 0 {
            self.writers_cv.notify_one();
        }
    }

    /// RAII read acquisition.
    pub fn read(&self) -> ReadAdmission<'_> {
        self.enter_read();
        ReadAdmission { monitor: self }
    }

    /// RAII write acquisition.
    pub fn write(&self) -> WriteAdmission<'_> {
        self.enter_write();
        WriteAdmission { monitor: self }
    }

    pub fn status(&self) -> MonitorStatus {
        let st = self.state.lock();
        MonitorStatus {
            active_readers: st.active_readers,
            writer_active: st.writer.is_some(),
            writers_waiting: st.writers_waiting,
        }
    }
}

/// Holds one read acquisition until dropped.
#[must_use = "the read acquisition is released when the admission is dropped"]
pub struct ReadAdmission<'a> {
    monitor: &'a ReadWriteMonitor,
}

impl Drop for ReadAdmission<'_> {
    fn drop(&mut self) {
        self.monitor.exit_read();
    }
}

/// Holds one write acquisition until dropped.
#[must_use = "the write acquisition is released when the admission is dropped"]
pub struct WriteAdmission<'a> {
    monitor: &'a ReadWriteMonitor,
}

impl Drop for WriteAdmission<'_> {
    fn drop(&mut self) {
        self.monitor.exit_write();
    }
}

/// A value whose access is admitted by a [`ReadWriteMonitor`].
///
/// The inner `RwLock` only hands out references; it is never contended
/// because the monitor has already decided who may be inside. A thread
/// holding the write guard reads through that guard, not through `read()`.
#[derive(Debug, Default)]
pub struct Monitored<T> {
    monitor: ReadWriteMonitor,
    data: RwLock<T>,
}

impl<T> Monitored<T> {
    pub fn new(value: T) -> Self {
        Self {
            monitor: ReadWriteMonitor::new(),
            data: RwLock::new(value),
        }
    }

    pub fn read(&self) -> MonitorReadGuard<'_, T> {
        let admission = self.monitor.read();
        MonitorReadGuard {
            data: self.data.read_recursive(),
            _admission: admission,
        }
    }

    pub fn write(&self) -> MonitorWriteGuard<'_, T> {
        let admission = self.monitor.write();
        MonitorWriteGuard {
            data: self.data.write(),
            _admission: admission,
        }
    }

    pub fn monitor(&self) -> &ReadWriteMonitor {
        &self.monitor
    }
}

// Field order matters: the data guard drops before the admission is released.
pub struct MonitorReadGuard<'a, T> {
    data: RwLockReadGuard<'a, T>,
    _admission: ReadAdmission<'a>,
}

impl<T> Deref for MonitorReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

pub struct MonitorWriteGuard<'a, T> {
    data: RwLockWriteGuard<'a, T>,
    _admission: WriteAdmission<'a>,
}

impl<T> Deref for MonitorWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for MonitorWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
