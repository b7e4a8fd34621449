// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use bstr::ByteSlice;

use crate::parse::{parse_record, ParseError};
use crate::record::{Atom, AtomKind, Record, RecordHolder, Span};
use crate::session::console::Console;
use crate::session::reader::BlockRing;

/// Reusable pool of parsed records awaiting consumption. Slots whose record
/// has been consumed (`parsed`) are overwritten in place so their buffers
/// keep their allocations.
#[derive(Debug, Default)]
pub struct RecordPool {
    slots: Vec<RecordHolder>,
}

impl RecordPool {
    /// Stores `rec` in the first consumed slot, or appends, growing the pool
    /// generously so appends stay rare.
    pub fn insert(&mut self, rec: Record) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.parsed) {
            slot.parsed = false;
            slot.rec = rec;
            return;
        }
        if self.slots.len() == self.slots.capacity() {
            self.slots.reserve(self.slots.len() * 3 + 1);
        }
        self.slots.push(RecordHolder { parsed: false, rec });
    }

    pub fn slots(&self) -> &[RecordHolder] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [RecordHolder] {
        &mut self.slots
    }

    /// Clones out every unconsumed record, marking the slots consumed.
    pub fn take_unread(&mut self) -> Vec<Record> {
        let mut out = Vec::new();
        for slot in &mut self.slots {
            if !slot.parsed {
                slot.parsed = true;
                out.push(slot.rec.clone());
            }
        }
        out
    }
}

/// Drains every published block under the block lock, in arrival order, and
/// clears the wake-up flag.
pub(crate) fn drain(ring: &BlockRing, pool: &mut RecordPool, console: &mut Console) {
    let mut table = ring.lock();
    for i in 0..table.spans.len() {
        let span = table.spans[i];
        process_block(span.slice(&table.data), pool, console);
    }
    table.spans.clear();
    table.dirty = false;
}

/// Parses every line of one framed block: result/async records go to the
/// pool, stream output to the console, the `(gdb)` prompt is discarded, and
/// anything unclassified (e.g. `shell` output) lands in the console
/// verbatim.
pub(crate) fn process_block(block: &[u8], pool: &mut RecordPool, console: &mut Console) {
    for mut line in block.split(|&b| b == b'\n') {
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            continue;
        }
        // an ordinal only counts when a record prefix follows the digits
        let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
        let rest = &line[digits..];
        match rest.first() {
            Some(&(b'^' | b'*' | b'=')) => {
                let id = parse_ordinal(&line[..digits]);
                match parse_record(rest) {
                    Ok(mut rec) => {
                        rec.id = id;
                        pool.insert(resynthesize_optimized_out(rec));
                    }
                    Err(error) => write_parse_sidecar(rest, &error),
                }
            }
            Some(&(b'~' | b'@' | b'&')) if digits == 0 => console.write_line(rest),
            _ => console.write_line(line),
        }
    }
}

fn parse_ordinal(digits: &[u8]) -> u32 {
    digits
        .iter()
        .fold(0u32, |acc, &d| acc.wrapping_mul(10).wrapping_add((d - b'0') as u32))
}

/// The debugger reports optimized-out values two inconsistent ways:
/// evaluating `argv` yields `^done,value="<optimized out>"` while `argv[0]`
/// yields `^error,msg="value has been optimized out"`. Rewrite the error
/// form into the value form so downstream display is uniform.
fn resynthesize_optimized_out(rec: Record) -> Record {
    if !rec.buf.starts_with(b"^error") || !rec.extract_value("msg").contains_str("optimized out")
    {
        return rec;
    }
    let buf = b"^done,value=\"<optimized out>\"".to_vec();
    let atoms = vec![
        Atom {
            kind: AtomKind::Array,
            name: Span::default(),
            value: Span::new(1, 1),
        },
        Atom {
            kind: AtomKind::String,
            name: Span::new(6, 5),
            value: Span::new(13, 15),
        },
    ];
    Record {
        id: rec.id,
        buf,
        atoms,
    }
}

/// A line the parser rejected is kept beside the binary for offline
/// diagnosis, then dropped; parsing continues with the next line.
fn write_parse_sidecar(line: &[u8], error: &ParseError) {
    log::warn!(
        "dropping unparseable MI line ({error}): {}",
        line.as_bstr()
    );
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let path = format!("badrecord_{millis}.txt");
    let mut contents = format!("error message: {error}\nerror index: {}\n", error.index()).into_bytes();
    contents.extend_from_slice(line);
    if let Err(io_error) = fs::write(&path, contents) {
        log::warn!("could not write {path}: {io_error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(block: &[u8]) -> (RecordPool, Console) {
        let mut pool = RecordPool::default();
        let mut console = Console::default();
        process_block(block, &mut pool, &mut console);
        (pool, console)
    }

    #[test]
    fn ordinal_and_record_routing() {
        let (pool, console) = run(
            b"42^done,bkpt={number=\"1\",line=\"13\",fullname=\"/x/y.c\"}\n(gdb)\n",
        );
        assert_eq!(pool.slots().len(), 1);
        let rec = &pool.slots()[0].rec;
        assert_eq!(rec.id, 42);
        assert_eq!(rec.extract_value("bkpt.number"), "1");
        assert_eq!(rec.extract_int("bkpt.line"), 13);
        assert_eq!(console.lines().count(), 0);
    }

    #[test]
    fn mixed_block_preserves_order() {
        let (pool, console) = run(
            b"~\"one\\n\"\n=thread-group-started,id=\"i1\",pid=\"900\"\n~\"two\\n\"\n*stopped,reason=\"exited-normally\"\n(gdb)\n",
        );
        assert_eq!(pool.slots().len(), 2);
        assert_eq!(pool.slots()[0].rec.keyword(), "thread-group-started");
        assert_eq!(pool.slots()[1].rec.keyword(), "stopped");
        let lines: Vec<_> = console.lines().map(|l| l.text.clone()).collect();
        assert_eq!(lines, ["one", "two"]);
    }

    #[test]
    fn optimized_out_error_is_resynthesized() {
        let (pool, _) = run(b"7^error,msg=\"value has been optimized out\"\n");
        let rec = &pool.slots()[0].rec;
        assert_eq!(rec.id, 7);
        assert!(rec.buf.starts_with(b"^done"));
        assert_eq!(rec.extract_value("value"), "<optimized out>");
    }

    #[test]
    fn ordinary_error_is_kept() {
        let (pool, _) = run(b"8^error,msg=\"No symbol \\\"x\\\" in current context.\"\n");
        let rec = &pool.slots()[0].rec;
        assert!(rec.buf.starts_with(b"^error"));
        assert_eq!(
            rec.extract_value("msg"),
            "No symbol \"x\" in current context."
        );
    }

    #[test]
    fn digits_without_prefix_stay_console_text() {
        let (pool, console) = run(b"42 is not a record\n");
        assert_eq!(pool.slots().len(), 0);
        assert_eq!(console.lines().next().unwrap().text, "42 is not a record");
    }

    #[test]
    fn parsed_slots_are_reused() {
        let mut pool = RecordPool::default();
        let mut console = Console::default();
        process_block(b"1^done\n", &mut pool, &mut console);
        pool.slots_mut()[0].parsed = true;
        process_block(b"2^done\n", &mut pool, &mut console);
        assert_eq!(pool.slots().len(), 1);
        assert_eq!(pool.slots()[0].rec.id, 2);
        assert!(!pool.slots()[0].parsed);
    }

    #[test]
    fn take_unread_marks_consumed() {
        let mut pool = RecordPool::default();
        let mut console = Console::default();
        process_block(b"1^done\n2^done\n", &mut pool, &mut console);
        let unread = pool.take_unread();
        assert_eq!(unread.len(), 2);
        assert!(pool.take_unread().is_empty());
    }

    #[test]
    fn crlf_lines_are_stripped() {
        let (pool, _) = run(b"3^done,a=\"1\"\r\n");
        assert_eq!(pool.slots()[0].rec.extract_value("a"), "1");
    }
}
