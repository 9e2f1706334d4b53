use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters owned by a router. Relaxed ordering: these are reported,
/// never used to synchronise.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    reads: AtomicU64,
    failed_reads: AtomicU64,
    writes: AtomicU64,
    failed_writes: AtomicU64,
    primary_opened: AtomicU64,
    primary_closed: AtomicU64,
}

impl Counters {
    pub(crate) fn read_started(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read_failed(&self) {
        self.failed_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_started(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_failed(&self) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RouterStats {
        RouterStats {
            reads: self.reads.load(Ordering::Relaxed),
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            primary_opened: self.primary_opened.load(Ordering::Relaxed),
            primary_closed: self.primary_closed.load(Ordering::Relaxed),
        }
    }
}

/// Marks one dedicated primary connection as open for as long as it lives.
///
/// Dropping the guard counts the connection as closed, so the tally stays
/// balanced on every exit path, including a cancelled write future.
pub(crate) struct PrimaryGuard<'a> {
    counters: &'a Counters,
}

impl<'a> PrimaryGuard<'a> {
    pub(crate) fn opened(counters: &'a Counters) -> Self {
        counters.primary_opened.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for PrimaryGuard<'_> {
    fn drop(&mut self) {
        self.counters.primary_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a router's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub reads: u64,
    pub failed_reads: u64,
    pub writes: u64,
    pub failed_writes: u64,
    pub primary_opened: u64,
    pub primary_closed: u64,
}

impl RouterStats {
    /// Primary connections opened but not yet closed
    pub fn open_primary_connections(&self) -> u64 {
        self.primary_opened.saturating_sub(self.primary_closed)
    }
}
