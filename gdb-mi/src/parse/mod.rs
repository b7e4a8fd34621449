// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! The two parsers over debugger output bytes: one for MI record lines and
//! one for the looser value grammar of expression evaluations. Both build
//! atoms in the shared arena context below.

mod record;
mod value;

pub use record::parse_record;
pub use value::{parse_value, AtomSequence, ValueExpr, AGGREGATE_MAX};

use thiserror::Error;

use crate::record::{Atom, Span};

/// A protocol-level failure on a single MI line. These are local and
/// recoverable: the caller drops the line and continues with the next one,
/// unlike transport failures which end the session.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// No atom variant can start with this byte.
    #[error("cannot deduce atom type from byte {byte:#04x} at index {index}")]
    BadAtomStart { byte: u8, index: usize },
    #[error("bad byte {byte:#04x} in atom name at index {index}")]
    BadNameByte { byte: u8, index: usize },
    #[error("wrong closing byte {byte:#04x} for aggregate at index {index}")]
    MismatchedClose { byte: u8, index: usize },
    #[error("bad byte {byte:#04x} inside aggregate at index {index}")]
    BadAggregateByte { byte: u8, index: usize },
}

impl ParseError {
    /// The buffer index the parser failed at.
    pub fn index(&self) -> usize {
        match *self {
            ParseError::BadAtomStart { index, .. }
            | ParseError::BadNameByte { index, .. }
            | ParseError::MismatchedClose { index, .. }
            | ParseError::BadAggregateByte { index, .. } => index,
        }
    }
}

/// Scratch arena for one parse.
///
/// Atoms are pushed in order at the live front of the vector while an
/// aggregate is open; when it closes, the finished run is moved to the far
/// end (the "ordered tail") and the parent's value span rewritten to address
/// it. [`ParseContext::finish`] rotates the tail to the front and rebases
/// child spans, producing the final breadth-packed layout. One vector serves
/// an arbitrarily nested parse with no per-level allocation.
///
/// A repeat count is carried per atom in lockstep; the MI grammar leaves them
/// all 1 while the value grammar records run-length repeats there.
pub(crate) struct ParseContext<'a> {
    pub buf: &'a [u8],
    /// Current scan index into `buf`.
    pub i: usize,
    atoms: Vec<Atom>,
    repeats: Vec<u32>,
    /// Live end of the unordered front region.
    atom_idx: usize,
    /// Count of ordered atoms parked at the tail.
    end_atoms: usize,
    pub error: Option<ParseError>,
}

impl<'a> ParseContext<'a> {
    pub fn new(buf: &'a [u8], capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ParseContext {
            buf,
            i: 0,
            atoms: vec![Atom::default(); capacity],
            repeats: vec![1; capacity],
            atom_idx: 0,
            end_atoms: 0,
            error: None,
        }
    }

    /// Records the first failure and forces the scan to the end of the buffer
    /// so the parse unwinds.
    pub fn fail(&mut self, error: ParseError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.i = self.buf.len();
    }

    #[inline]
    pub fn unordered_len(&self) -> usize {
        self.atom_idx
    }

    #[inline]
    pub fn end_atoms(&self) -> usize {
        self.end_atoms
    }

    /// Discards ordered atoms parked since an earlier [`Self::end_atoms`]
    /// observation. Used to drop the subtree of an over-cap aggregate child.
    pub fn truncate_end_atoms(&mut self, count: usize) {
        debug_assert!(count <= self.end_atoms);
        self.end_atoms = count.min(self.end_atoms);
    }

    #[inline]
    fn room(&self) -> usize {
        self.atoms.len() - self.end_atoms
    }

    /// Grows the arena, moving the ordered tail to the new end and rebasing
    /// every aggregate span that points into it.
    fn grow(&mut self) {
        let old_len = self.atoms.len();
        let new_len = (old_len * 2).max(64);
        let delta = new_len - old_len;
        let tail_start = old_len - self.end_atoms;
        self.atoms.resize(new_len, Atom::default());
        self.repeats.resize(new_len, 1);
        self.atoms.copy_within(tail_start..old_len, tail_start + delta);
        self.repeats.copy_within(tail_start..old_len, tail_start + delta);
        let rebase = |atom: &mut Atom| {
            if atom.kind.is_aggregate() && atom.value.length != 0 && atom.value.index >= tail_start {
                atom.value.index += delta;
            }
        };
        for atom in &mut self.atoms[..self.atom_idx] {
            rebase(atom);
        }
        let new_tail = tail_start + delta;
        for atom in &mut self.atoms[new_tail..] {
            rebase(atom);
        }
    }

    pub fn push_unordered(&mut self, atom: Atom) {
        self.push_unordered_repeat(atom, 1);
    }

    pub fn push_unordered_repeat(&mut self, atom: Atom, repeat: u32) {
        if self.atom_idx >= self.room() {
            self.grow();
        }
        self.atoms[self.atom_idx] = atom;
        self.repeats[self.atom_idx] = repeat;
        self.atom_idx += 1;
    }

    /// Moves the atoms pushed since `start_idx` to the ordered tail and
    /// returns the tail span addressing them.
    pub fn pop_unordered(&mut self, start_idx: usize) -> Span {
        debug_assert!(start_idx <= self.atom_idx);
        let count = self.atom_idx.saturating_sub(start_idx);
        while self.atom_idx + count > self.room() {
            self.grow();
        }
        let dest = self.atoms.len() - self.end_atoms - count;
        self.atoms.copy_within(start_idx..start_idx + count, dest);
        self.repeats.copy_within(start_idx..start_idx + count, dest);
        self.end_atoms += count;
        self.atom_idx = start_idx;
        Span::new(if count == 0 { 0 } else { dest }, count)
    }

    /// Installs `root` ahead of the ordered tail, rotates the tail to the
    /// front, and rebases aggregate spans, yielding the final atom table and
    /// its repeat counts.
    pub fn finish(mut self, root: Atom) -> (Vec<Atom>, Vec<u32>) {
        if self.room() == 0 {
            self.grow();
        }
        self.end_atoms += 1;
        let offset = self.atoms.len() - self.end_atoms;
        self.atoms[offset] = root;
        self.repeats[offset] = 1;
        for atom in &mut self.atoms[offset..] {
            if atom.kind.is_aggregate() && atom.value.length != 0 {
                debug_assert!(atom.value.index > offset);
                atom.value.index = atom.value.index.saturating_sub(offset);
            }
        }
        self.atoms.drain(..offset);
        self.repeats.drain(..offset);
        (self.atoms, self.repeats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AtomKind;

    fn string_atom(index: usize) -> Atom {
        Atom {
            kind: AtomKind::String,
            name: Span::default(),
            value: Span::new(index, 1),
        }
    }

    #[test]
    fn pop_moves_run_to_tail() {
        let buf = b"xyz";
        let mut ctx = ParseContext::new(buf, 8);
        ctx.push_unordered(string_atom(0));
        ctx.push_unordered(string_atom(1));
        let span = ctx.pop_unordered(0);
        assert_eq!(span.length, 2);
        assert_eq!(ctx.unordered_len(), 0);
        let root = Atom {
            kind: AtomKind::Array,
            name: Span::default(),
            value: span,
        };
        let (atoms, repeats) = ctx.finish(root);
        assert_eq!(atoms.len(), 3);
        assert_eq!(atoms[0].kind, AtomKind::Array);
        // children rebased to directly follow the root
        assert_eq!(atoms[0].value, Span::new(1, 2));
        assert_eq!(repeats, vec![1, 1, 1]);
    }

    #[test]
    fn grow_rebases_tail_spans() {
        let buf = b"abcdef";
        let mut ctx = ParseContext::new(buf, 1);
        // fill well past the initial capacity
        for i in 0..6 {
            ctx.push_unordered(string_atom(i));
        }
        let span = ctx.pop_unordered(0);
        assert_eq!(span.length, 6);
        let root = Atom {
            kind: AtomKind::Array,
            name: Span::default(),
            value: span,
        };
        let (atoms, _) = ctx.finish(root);
        assert_eq!(atoms.len(), 7);
        assert_eq!(atoms[0].value, Span::new(1, 6));
        for (i, atom) in atoms[1..].iter().enumerate() {
            assert_eq!(atom.value.index, i);
        }
    }
}
