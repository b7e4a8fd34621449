// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use crate::parse::record::collapse_escapes;
use crate::parse::{ParseContext, ParseError};
use crate::record::{Atom, AtomKind, Record, Span};

/// Aggregates stop accepting children once this many (counting run-length
/// repeats) have been added; the remainder of an oversized aggregate is
/// dropped silently.
pub const AGGREGATE_MAX: usize = 200;

/// One parsed element of a value expression: the atom and how many times it
/// repeats. `{0 <repeats 1024 times>}` yields one atom with length 1024.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtomSequence {
    pub atom: Atom,
    pub length: usize,
}

/// A parsed expression-evaluation value: the record tree plus the per-atom
/// repeat counts the record model alone cannot express.
#[derive(Clone, Debug, Default)]
pub struct ValueExpr {
    pub record: Record,
    repeats: Vec<u32>,
}

impl ValueExpr {
    /// The run length of the atom at `atom_idx`; 1 for ordinary atoms.
    pub fn repeat(&self, atom_idx: usize) -> usize {
        self.repeats.get(atom_idx).copied().unwrap_or(1) as usize
    }

    pub fn sequence(&self, atom_idx: usize) -> Option<AtomSequence> {
        self.record.atoms.get(atom_idx).map(|&atom| AtomSequence {
            atom,
            length: self.repeat(atom_idx),
        })
    }
}

/// Parses the value side of a `-data-evaluate-expression` reply, e.g.
/// `{a = 1, b = {0 <repeats 1024 times>}, c = "x, y"}`.
///
/// This grammar is not MI: aggregates use braces for arrays and structs
/// alike, separators carry spaces, long runs are run-length encoded, and an
/// aggregate may be truncated with a trailing `...`. Keep it a separate
/// state machine; the two grammars disagree on the terminator rule and on
/// what `{` means.
pub fn parse_value(text: &[u8]) -> Result<ValueExpr, ParseError> {
    let buf = text.to_vec();
    let (atoms, repeats) = {
        let mut ctx = ParseContext::new(&buf, 64);
        let seq = recurse_value(&mut ctx);
        if let Some(error) = ctx.error {
            return Err(error);
        }
        ctx.finish(seq.atom)
    };
    let mut record = Record { id: 0, buf, atoms };
    if record.atoms.len() > 1 {
        collapse_escapes(&mut record);
    }
    Ok(ValueExpr { record, repeats })
}

/// Recognizes `<repeats N times>` two bytes past the scan position and
/// returns the index of the closing `>` and the count.
fn run_length(ctx: &ParseContext<'_>) -> Option<(usize, u32)> {
    let buf = ctx.buf;
    let i = ctx.i;
    if i + 10 >= buf.len() || !buf[i + 2..].starts_with(b"<repeats ") {
        return None;
    }
    let mut count: u32 = 0;
    let mut dig = i + 11;
    while dig < buf.len() && buf[dig].is_ascii_digit() {
        count = count.saturating_mul(10).saturating_add((buf[dig] - b'0') as u32);
        dig += 1;
    }
    if !buf[dig.min(buf.len())..].starts_with(b" times>") {
        return None;
    }
    Some((dig + 6, count))
}

/// One recursive-descent step over the value grammar. Leaves the scan on the
/// element's final byte and returns the element with its run length.
fn recurse_value(ctx: &mut ParseContext<'_>) -> AtomSequence {
    let mut seq = AtomSequence {
        atom: Atom::default(),
        length: 1,
    };
    let mut string_start = 0usize;
    let mut aggregate_start = 0usize;
    let mut inside_string_literal = false;
    let mut num_children = 0usize;

    while ctx.i < ctx.buf.len() {
        let i = ctx.i;
        let c = ctx.buf[i];
        let p = if i >= 1 { ctx.buf[i - 1] } else { 0 };
        let pp = if i >= 2 { ctx.buf[i - 2] } else { 0 };
        let n = ctx.buf.get(i + 1).copied().unwrap_or(0);
        let nn = ctx.buf.get(i + 2).copied().unwrap_or(0);

        // Structural bytes inside a C string literal are payload, not
        // grammar; the literal state toggles on unescaped \" pairs.
        if pp != b'\\' && p == b'\\' && c == b'"' {
            inside_string_literal = !inside_string_literal;
        }
        if inside_string_literal {
            ctx.i += 1;
            continue;
        }

        // a run suffix ends the scalar being scanned
        if matches!(seq.atom.kind, AtomKind::Name | AtomKind::String) {
            if let Some((last, count)) = run_length(ctx) {
                seq.atom.kind = AtomKind::String;
                seq.atom.value = Span::new(string_start, (i + 1) - string_start);
                ctx.i = last;
                seq.length = count as usize;
                return seq;
            }
        }

        match seq.atom.kind {
            AtomKind::None => {
                if c == b' ' || c == b',' {
                    ctx.i += 1;
                    continue;
                }
                if c == b'{' {
                    aggregate_start = ctx.unordered_len();
                    seq.atom.kind = AtomKind::Struct;
                } else {
                    string_start = i;
                    if (n == b',' || n == b'}' || nn == b'<') && i > 0 {
                        // single-byte scalar like `{0, 1, 2}`: step back so
                        // the new state sees the same byte with lookahead
                        ctx.i -= 1;
                    }
                    seq.atom.kind = if seq.atom.name.is_empty() {
                        AtomKind::Name
                    } else {
                        AtomKind::String
                    };
                }
            }

            AtomKind::Name => {
                if c == b'=' {
                    // `name = value`; the space before `=` ends the name
                    let length = i.saturating_sub(1).saturating_sub(string_start);
                    seq.atom.name = Span::new(string_start, length);
                    seq.atom.kind = AtomKind::None;
                } else if n == b',' || n == b'}' {
                    // bare word in an aggregate; it was a value all along
                    seq.atom.kind = AtomKind::String;
                    seq.atom.value = Span::new(string_start, (i + 1) - string_start);
                    return seq;
                }
            }

            AtomKind::String => {
                if n == b',' || n == b'}' {
                    seq.atom.value = Span::new(string_start, (i + 1) - string_start);
                    return seq;
                }
            }

            AtomKind::Array | AtomKind::Struct => {
                if c == b'}' {
                    seq.atom.value = ctx.pop_unordered(aggregate_start);
                    if let Some((last, count)) = run_length(ctx) {
                        ctx.i = last;
                        seq.length = count as usize;
                    }
                    return seq;
                }
                let saved_end = ctx.end_atoms();
                let elem = recurse_value(ctx);
                if elem.atom.name.is_empty() {
                    seq.atom.kind = AtomKind::Array;
                }
                if num_children < AGGREGATE_MAX {
                    let add = elem.length.min(AGGREGATE_MAX - num_children);
                    let repeat = u32::try_from(elem.length).unwrap_or(u32::MAX);
                    ctx.push_unordered_repeat(elem.atom, repeat);
                    num_children += add;
                } else {
                    // over the cap: drop the element and any subtree it
                    // parked at the tail
                    ctx.truncate_end_atoms(saved_end);
                }
            }
        }

        ctx.i += 1;
    }

    seq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_with_named_fields() {
        let expr = parse_value(b"{a = 1, b = {c = \"x\"}}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        assert_eq!(root.kind, AtomKind::Struct);
        assert_eq!(rec.children(root).count(), 2);
        assert_eq!(rec.extract_value("a"), "1");
        assert_eq!(rec.extract_value("b.c"), "\"x\"");
    }

    #[test]
    fn array_of_small_scalars() {
        let expr = parse_value(b"{0, 1, 2}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        assert_eq!(root.kind, AtomKind::Array);
        let values: Vec<_> = rec
            .children(root)
            .map(|a| rec.text(a.value).to_string())
            .collect();
        assert_eq!(values, ["0", "1", "2"]);
    }

    #[test]
    fn bare_words_are_values() {
        let expr = parse_value(b"{foo, bar}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        assert_eq!(root.kind, AtomKind::Array);
        let values: Vec<_> = rec
            .children(root)
            .map(|a| rec.text(a.value).to_string())
            .collect();
        assert_eq!(values, ["foo", "bar"]);
    }

    #[test]
    fn run_length_stores_one_child() {
        let expr = parse_value(b"{0 <repeats 1024 times>}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        let children: Vec<_> = rec.children(root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(rec.text(children[0].value), "0");
        // the repeat count lives beside the single stored atom
        let child_idx = root.value.index;
        let seq = expr.sequence(child_idx).unwrap();
        assert_eq!(seq.length, 1024);
    }

    #[test]
    fn nested_aggregate_with_run_length() {
        let expr = parse_value(b"{{1, 2} <repeats 8 times>}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        let children: Vec<_> = rec.children(root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, AtomKind::Array);
        assert_eq!(expr.sequence(root.value.index).unwrap().length, 8);
        assert_eq!(rec.children(children[0]).count(), 2);
    }

    #[test]
    fn oversized_aggregate_is_capped() {
        let mut text = String::from("{");
        for i in 0..=AGGREGATE_MAX {
            if i > 0 {
                text.push_str(", ");
            }
            text.push_str(&i.to_string());
        }
        text.push('}');
        let expr = parse_value(text.as_bytes()).unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        assert_eq!(rec.children(root).count(), AGGREGATE_MAX);
        // no error flag: the overflow is dropped silently
        assert_eq!(rec.atoms.len(), AGGREGATE_MAX + 1);
    }

    #[test]
    fn run_length_counts_toward_cap() {
        let expr = parse_value(b"{0 <repeats 150 times>, 1 <repeats 150 times>, 2}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        // both runs fit as stored atoms, but the cap is conceptual: the
        // trailing scalar is past 200 repeats and is dropped
        let values: Vec<_> = rec
            .children(root)
            .map(|a| rec.text(a.value).to_string())
            .collect();
        assert_eq!(values, ["0", "1"]);
    }

    #[test]
    fn comma_inside_string_literal_is_payload() {
        let expr = parse_value(b"{s = \\\"a, b\\\"}").unwrap();
        let rec = &expr.record;
        let root = rec.root().unwrap();
        assert_eq!(rec.children(root).count(), 1);
        assert_eq!(rec.extract_value("s"), "\"a, b\"");
    }

    #[test]
    fn truncated_aggregate_keeps_ellipsis() {
        let expr = parse_value(b"{1, 2, ...}").unwrap();
        let rec = &expr.record;
        let values: Vec<_> = rec
            .children(rec.root().unwrap())
            .map(|a| rec.text(a.value).to_string())
            .collect();
        assert_eq!(values, ["1", "2", "..."]);
    }
}
