// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::fmt::{self, Debug, Display, Formatter};

use bstr::{BStr, ByteSlice};

/// A range of bytes within an owning buffer.
///
/// Atoms address both their text (within [`Record::buf`]) and their children
/// (within [`Record::atoms`]) with spans, so a record is self-contained:
/// copying it copies the buffer and the atom table and no pointer fixups are
/// needed.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub index: usize,
    pub length: usize,
}

impl Span {
    #[inline]
    pub(crate) fn new(index: usize, length: usize) -> Self {
        Span { index, length }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub(crate) fn end(&self) -> usize {
        self.index + self.length
    }

    /// Slices `bytes`, or returns the empty slice when out of range. Spans
    /// from a defensive parse of corrupt input must degrade to empty output,
    /// never panic.
    #[inline]
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        bytes.get(self.index..self.end()).unwrap_or_default()
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.index, self.length)
    }
}

/// The variant of a parsed atom.
///
/// `None` and `Name` only occur transiently while a parser is mid-atom; a
/// finished record contains `Array`, `Struct`, and `String` atoms only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AtomKind {
    #[default]
    None,
    Name,
    Array,
    Struct,
    String,
}

impl AtomKind {
    #[inline]
    pub fn is_aggregate(self) -> bool {
        matches!(self, AtomKind::Array | AtomKind::Struct)
    }
}

/// One node of a parsed record tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Atom {
    pub kind: AtomKind,
    /// Key text within [`Record::buf`]; empty for array elements.
    pub name: Span,
    /// For `String`, text within [`Record::buf`]; for aggregates, the child
    /// range within [`Record::atoms`].
    pub value: Span,
}

/// Index of the root atom in every finished record.
pub const RECORD_ROOT: usize = 0;

/// One MI output line parsed into a tree of atoms over the original text.
///
/// The atom table is one contiguous arena: atom 0 is the root aggregate and
/// the children of any aggregate are a contiguous run strictly after it, so
/// iteration never chases pointers outside the record.
#[derive(Clone, Default)]
pub struct Record {
    /// Correlation ordinal echoed by the debugger; 0 when uncorrelated.
    pub id: u32,
    /// The line text; atom name and value spans point into it.
    pub buf: Vec<u8>,
    pub atoms: Vec<Atom>,
}

impl Record {
    #[inline]
    pub fn root(&self) -> Option<&Atom> {
        self.atoms.first()
    }

    /// The line's classifying prefix byte (`^`, `*`, `=`, …), or 0 for an
    /// empty record.
    #[inline]
    pub fn prefix(&self) -> u8 {
        self.buf.first().copied().unwrap_or(0)
    }

    /// The word between the prefix byte and the first comma: `done` in
    /// `^done,…`, `stopped` in `*stopped,…`.
    pub fn keyword(&self) -> &BStr {
        let end = memchr::memchr(b',', &self.buf).unwrap_or(self.buf.len());
        self.buf.get(1..end).unwrap_or_default().as_bstr()
    }

    /// The text a span addresses within this record's buffer.
    #[inline]
    pub fn text(&self, span: Span) -> &BStr {
        span.slice(&self.buf).as_bstr()
    }

    /// The children of `parent`, or an empty iterator when `parent` is not an
    /// aggregate or its span does not fit the arena. Records parsed from
    /// corrupt input may carry such shapes; iteration degrades instead of
    /// panicking.
    pub fn children(&self, parent: &Atom) -> std::slice::Iter<'_, Atom> {
        if parent.kind.is_aggregate() && parent.value.end() <= self.atoms.len() {
            self.atoms[parent.value.index..parent.value.end()].iter()
        } else {
            [].iter()
        }
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("buf", &self.buf.as_bstr())
            .field("atoms", &self.atoms.len())
            .finish()
    }
}

/// Pool slot for a parsed record. `parsed` marks slots whose record has been
/// consumed; the consumer reuses them so text buffers and atom tables keep
/// their allocations across lines.
#[derive(Clone, Debug, Default)]
pub struct RecordHolder {
    pub parsed: bool,
    pub rec: Record,
}

/// Indented `name="value"` rendering of a record tree, for logs and tests.
pub struct Pretty<'a>(pub &'a Record);

impl Display for Pretty<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(root) = self.0.root() {
            write_atom(f, self.0, root, 0)?;
        }
        Ok(())
    }
}

fn write_atom(f: &mut Formatter<'_>, rec: &Record, atom: &Atom, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "  ")?;
    }
    match atom.kind {
        AtomKind::String => {
            writeln!(f, "{}=\"{}\"", rec.text(atom.name), rec.text(atom.value))
        }
        AtomKind::Array | AtomKind::Struct => {
            writeln!(f, "{}", rec.text(atom.name))?;
            for child in rec.children(atom) {
                write_atom(f, rec, child, depth + 1)?;
            }
            Ok(())
        }
        _ => writeln!(f, "---BAD ATOM---"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_slice_degrades_to_empty() {
        let buf = b"hello";
        assert_eq!(Span::new(1, 3).slice(buf), b"ell");
        assert_eq!(Span::new(3, 9).slice(buf), b"");
        assert_eq!(Span::new(9, 1).slice(buf), b"");
    }

    #[test]
    fn children_of_non_aggregate_is_empty() {
        let rec = Record {
            id: 0,
            buf: b"^done".to_vec(),
            atoms: vec![Atom {
                kind: AtomKind::String,
                name: Span::default(),
                value: Span::new(1, 4),
            }],
        };
        assert_eq!(rec.children(&rec.atoms[0]).count(), 0);
    }

    #[test]
    fn children_with_bad_span_is_empty() {
        let rec = Record {
            id: 0,
            buf: Vec::new(),
            atoms: vec![Atom {
                kind: AtomKind::Array,
                name: Span::default(),
                value: Span::new(5, 10),
            }],
        };
        assert_eq!(rec.children(&rec.atoms[0]).count(), 0);
    }

    #[test]
    fn keyword_of_result_record() {
        let rec = Record {
            id: 0,
            buf: b"^done,a=\"1\"".to_vec(),
            atoms: Vec::new(),
        };
        assert_eq!(rec.keyword(), "done");
        let rec = Record {
            id: 0,
            buf: b"*stopped".to_vec(),
            atoms: Vec::new(),
        };
        assert_eq!(rec.keyword(), "stopped");
    }
}
