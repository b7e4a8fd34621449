// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use static_assertions::assert_impl_all;

use crate::record::Span;

/// Capacity of the raw byte ring the reader fills.
pub(crate) const RING_CAPACITY: usize = 1024 * 1024;
/// Maximum published blocks awaiting a drain.
pub(crate) const MAX_STORED_BLOCKS: usize = 128;
/// Per-`read()` staging size; also the low-room threshold for wrapping the
/// ring. Debugger blocks observed in the wild stay under this.
const READ_CHUNK: usize = 64 * 1024;

/// Ring state shared between the reader task and the driver.
///
/// The reader stages its blocking `read()` outside the lock and only appends
/// bytes and publishes spans while holding it; the driver drains whole
/// blocks under the same lock. Every published block ends in a newline, so
/// the consumer always sees complete lines.
pub(crate) struct BlockTable {
    pub data: Box<[u8]>,
    /// Write offset into `data`.
    insert: usize,
    /// Start of the in-progress block: bytes read but not yet terminated by
    /// a newline, and therefore not yet published.
    base: usize,
    /// Published blocks, in arrival order.
    pub spans: Vec<Span>,
    /// A wake-up is pending; cleared by the drain. Signalling only on the
    /// clear-to-set edge coalesces any number of blocks into one wake-up.
    pub dirty: bool,
    /// The reader task has exited (pipe EOF, read error, or table overflow).
    pub reader_done: bool,
}

pub(crate) struct BlockRing {
    pub table: Mutex<BlockTable>,
    avail: Condvar,
}

assert_impl_all!(BlockRing: Send, Sync);

impl BlockRing {
    pub fn new() -> Self {
        BlockRing {
            table: Mutex::new(BlockTable {
                data: vec![0; RING_CAPACITY].into_boxed_slice(),
                insert: 0,
                base: 0,
                spans: Vec::with_capacity(MAX_STORED_BLOCKS),
                dirty: false,
                reader_done: false,
            }),
            avail: Condvar::new(),
        }
    }

    /// Appends one staged chunk, publishing a block if the chunk completes
    /// one. Returns false when the reader must stop.
    pub fn append(&self, chunk: &[u8]) -> bool {
        let mut table = self.lock();
        if RING_CAPACITY - table.insert < READ_CHUNK {
            // low on room at the end: carry the in-progress bytes to the
            // front and continue there
            let (base, insert) = (table.base, table.insert);
            table.data.copy_within(base..insert, 0);
            table.insert = insert - base;
            table.base = 0;
        }
        if RING_CAPACITY - table.insert < chunk.len() {
            log::error!("debugger output overruns the byte ring; stopping reader");
            return false;
        }
        let insert = table.insert;
        table.data[insert..insert + chunk.len()].copy_from_slice(chunk);
        table.insert += chunk.len();

        // blocks end on a newline; an unterminated read keeps accumulating
        if chunk.last() != Some(&b'\n') {
            return true;
        }
        if table.spans.len() >= MAX_STORED_BLOCKS {
            log::error!("block span table exhausted; stopping reader");
            return false;
        }
        let span = Span::new(table.base, table.insert - table.base);
        table.spans.push(span);
        table.base = table.insert;
        if !table.dirty {
            table.dirty = true;
            self.avail.notify_one();
        }
        true
    }

    pub fn lock(&self) -> MutexGuard<'_, BlockTable> {
        // a poisoned lock means a panicking parser; the table itself is
        // still consistent, so keep going
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// True when a coalesced wake-up is pending.
    pub fn has_pending(&self) -> bool {
        self.lock().dirty
    }

    pub fn reader_done(&self) -> bool {
        self.lock().reader_done
    }

    /// Blocks until a wake-up is pending or the reader exits; false on
    /// timeout.
    pub fn wait_pending(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        match self
            .avail
            .wait_timeout_while(guard, timeout, |t| !t.dirty && !t.reader_done)
        {
            Ok((_, result)) => !result.timed_out(),
            Err(_) => false,
        }
    }

    fn mark_reader_done(&self) {
        let mut table = self.lock();
        table.reader_done = true;
        table.dirty = true;
        self.avail.notify_all();
    }
}

/// Reader task body: blocks on the debugger's merged output pipe and
/// publishes newline-terminated blocks. Never parses.
pub(crate) fn read_blocks<R: Read>(mut pipe: R, ring: Arc<BlockRing>) {
    let mut stage = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut stage) {
            Ok(0) => {
                log::debug!("debugger output pipe closed");
                break;
            }
            Ok(n) => {
                if !ring.append(&stage[..n]) {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::error!("debugger pipe read: {err}");
                break;
            }
        }
    }
    ring.mark_reader_done();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(ring: &BlockRing) -> Vec<Vec<u8>> {
        let table = ring.lock();
        table
            .spans
            .iter()
            .map(|span| span.slice(&table.data).to_vec())
            .collect()
    }

    #[test]
    fn split_reads_accumulate_into_one_block() {
        let ring = BlockRing::new();
        assert!(ring.append(b"^done"));
        assert!(!ring.has_pending());
        assert!(ring.append(b",a=\"1\"\n"));
        assert!(ring.has_pending());
        assert_eq!(published(&ring), [b"^done,a=\"1\"\n".to_vec()]);
    }

    #[test]
    fn blocks_publish_in_order() {
        let ring = BlockRing::new();
        assert!(ring.append(b"~\"one\"\n"));
        assert!(ring.append(b"*stopped\n(gdb)\n"));
        let blocks = published(&ring);
        assert_eq!(blocks[0], b"~\"one\"\n");
        assert_eq!(blocks[1], b"*stopped\n(gdb)\n");
    }

    #[test]
    fn full_span_table_stops_reader() {
        let ring = BlockRing::new();
        for _ in 0..MAX_STORED_BLOCKS {
            assert!(ring.append(b"x\n"));
        }
        assert!(!ring.append(b"y\n"));
    }

    #[test]
    fn reader_thread_reaches_eof() {
        let ring = Arc::new(BlockRing::new());
        let (reader, mut writer) = os_pipe::pipe().unwrap();
        let handle = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || read_blocks(reader, ring))
        };
        use std::io::Write;
        writer.write_all(b"^done\n").unwrap();
        drop(writer);
        handle.join().unwrap();
        assert!(ring.reader_done());
        assert_eq!(published(&ring), [b"^done\n".to_vec()]);
    }

    #[test]
    fn wait_pending_times_out() {
        let ring = BlockRing::new();
        assert!(!ring.wait_pending(Duration::from_millis(10)));
        ring.append(b"^done\n");
        assert!(ring.wait_pending(Duration::from_millis(10)));
    }
}
