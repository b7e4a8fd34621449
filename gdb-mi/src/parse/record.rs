// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use crate::parse::{ParseContext, ParseError};
use crate::record::{Atom, AtomKind, Record, Span};

/// What kind of atom can start at this byte.
fn infer_atom_start(c: u8) -> AtomKind {
    match c {
        b'{' => AtomKind::Struct,
        b'[' => AtomKind::Array,
        b'"' => AtomKind::String,
        b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'_' => AtomKind::Name,
        _ => AtomKind::None,
    }
}

/// Parses one MI result or async line, without its trailing newline, into a
/// [`Record`].
///
/// The first comma opens an implicit top-level array and the end of the line
/// closes it, so `^done,a="1"` parses as a root array with one child. The
/// leading keyword stays outside the atom tree and is read back with
/// [`Record::keyword`]. Single-word lines (`^done`) yield an empty root
/// array.
pub fn parse_record(line: &[u8]) -> Result<Record, ParseError> {
    let mut buf = line.to_vec();
    let Some(comma) = memchr::memchr(b',', &buf) else {
        let root = Atom {
            kind: AtomKind::Array,
            name: Span::default(),
            value: Span::default(),
        };
        return Ok(Record {
            id: 0,
            buf,
            atoms: vec![root],
        });
    };

    // Rewrite the delimiters so the body parses as one array; restored below.
    buf[comma] = b'[';
    buf.push(b']');

    // Census of structural bytes. Name/value pairs count once each way, so
    // twice the census is always enough atoms for the parse.
    let mut estimate = 0;
    for i in 0..buf.len() {
        let c = buf[i];
        let n = buf.get(i + 1).copied().unwrap_or(0);
        if c == b'[' || c == b'{' || (c == b'=' && n == b'"') || (c == b'"' && n == b',') {
            estimate += 1;
        }
    }

    let atoms = {
        let mut ctx = ParseContext::new(&buf, estimate * 2);
        ctx.i = comma;
        let root = recurse_record(&mut ctx);
        if let Some(error) = ctx.error {
            return Err(error);
        }
        let (atoms, _repeats) = ctx.finish(root);
        atoms
    };

    buf.pop();
    buf[comma] = b',';

    let mut rec = Record { id: 0, buf, atoms };
    collapse_escapes(&mut rec);
    Ok(rec)
}

/// One recursive-descent step: parses the atom starting at `ctx.i` and leaves
/// the scan on the atom's final byte. Aggregates recurse for each child and
/// park the finished run at the arena tail on close.
fn recurse_record(ctx: &mut ParseContext<'_>) -> Atom {
    let mut result = Atom::default();
    let mut string_start = 0usize;
    let mut aggregate_start = 0usize;

    while ctx.i < ctx.buf.len() {
        let c = ctx.buf[ctx.i];

        // separator noise outside of strings
        if result.kind != AtomKind::String
            && matches!(c, b' ' | b',' | b';' | b'_' | b'\n' | b'\r')
        {
            ctx.i += 1;
            continue;
        }

        match result.kind {
            AtomKind::None => {
                let start = infer_atom_start(c);
                match start {
                    AtomKind::String => string_start = ctx.i + 1,
                    AtomKind::Name => string_start = ctx.i,
                    AtomKind::Array | AtomKind::Struct => {
                        aggregate_start = ctx.unordered_len();
                    }
                    _ => {
                        ctx.fail(ParseError::BadAtomStart {
                            byte: c,
                            index: ctx.i,
                        });
                        continue;
                    }
                }
                result.kind = start;
            }

            AtomKind::Name => {
                if c == b'=' {
                    result.name = Span::new(string_start, ctx.i - string_start);
                    result.kind = AtomKind::None;
                } else if infer_atom_start(c) != AtomKind::Name {
                    ctx.fail(ParseError::BadNameByte {
                        byte: c,
                        index: ctx.i,
                    });
                    continue;
                }
            }

            AtomKind::String => {
                // A quote only closes the string when it is unescaped and
                // what follows can end a value. The debugger emits unescaped
                // inner quotes in pointer previews, e.g.
                // value="0x555555556004 "%d"".
                let p = if ctx.i >= 1 { ctx.buf[ctx.i - 1] } else { 0 };
                let n = ctx.buf.get(ctx.i + 1).copied().unwrap_or(0);
                if c == b'"' && p != b'\\' && matches!(n, b',' | b'}' | b']') {
                    result.value = Span::new(string_start, ctx.i - string_start);
                    return result;
                }
            }

            AtomKind::Array | AtomKind::Struct => {
                if infer_atom_start(c) != AtomKind::None {
                    let elem = recurse_record(ctx);
                    ctx.push_unordered(elem);
                } else if c == b']' || c == b'}' {
                    let closes = (c == b']') == (result.kind == AtomKind::Array);
                    if !closes {
                        ctx.fail(ParseError::MismatchedClose {
                            byte: c,
                            index: ctx.i,
                        });
                        continue;
                    }
                    result.value = ctx.pop_unordered(aggregate_start);
                    return result;
                } else {
                    ctx.fail(ParseError::BadAggregateByte {
                        byte: c,
                        index: ctx.i,
                    });
                    continue;
                }
            }
        }

        ctx.i += 1;
    }

    result
}

/// Collapses `\\` and `\"` escape pairs inside every String atom, shortening
/// the value spans in place. Stale bytes past a shortened span are left
/// behind; spans, not terminators, delimit atom text.
pub(crate) fn collapse_escapes(rec: &mut Record) {
    for idx in 0..rec.atoms.len() {
        let atom = rec.atoms[idx];
        if atom.kind != AtomKind::String {
            continue;
        }
        let start = atom.value.index;
        let end = atom.value.end();
        if end > rec.buf.len() {
            continue;
        }
        let mut write = start;
        let mut read = start;
        while read < end {
            if rec.buf[read] == b'\\'
                && read + 1 < end
                && matches!(rec.buf[read + 1], b'\\' | b'"')
            {
                // drop the backslash, keep the escaped byte
                read += 1;
            }
            rec.buf[write] = rec.buf[read];
            write += 1;
            read += 1;
        }
        rec.atoms[idx].value.length = write - start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_with_nested_struct() {
        let rec =
            parse_record(b"^done,bkpt={number=\"1\",line=\"13\",fullname=\"/x/y.c\"}").unwrap();
        let root = rec.root().unwrap();
        assert_eq!(root.kind, AtomKind::Array);
        let children: Vec<_> = rec.children(root).collect();
        assert_eq!(children.len(), 1);
        let bkpt = children[0];
        assert_eq!(bkpt.kind, AtomKind::Struct);
        assert_eq!(rec.text(bkpt.name), "bkpt");
        let fields: Vec<_> = rec.children(bkpt).collect();
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().all(|a| a.kind == AtomKind::String));
        assert_eq!(rec.extract_value("bkpt.number"), "1");
        assert_eq!(rec.extract_int("bkpt.line"), 13);
        assert_eq!(rec.extract_value("bkpt.fullname"), "/x/y.c");
        assert_eq!(rec.keyword(), "done");
    }

    #[test]
    fn async_with_struct() {
        let rec =
            parse_record(b"*stopped,reason=\"breakpoint-hit\",frame={line=\"7\",func=\"main\"}")
                .unwrap();
        assert_eq!(rec.extract_value("reason"), "breakpoint-hit");
        assert_eq!(rec.extract_int("frame.line"), 7);
        assert_eq!(rec.extract_value("frame.func"), "main");
    }

    #[test]
    fn array_of_structs() {
        let rec = parse_record(
            b"^done,stack=[frame={level=\"0\",line=\"4\"},frame={level=\"1\",line=\"9\"}]",
        )
        .unwrap();
        let stack = rec.extract_atom("stack").unwrap();
        assert_eq!(stack.kind, AtomKind::Array);
        assert_eq!(rec.children(stack).count(), 2);
        assert_eq!(rec.extract_int("stack[1].line"), 9);
    }

    #[test]
    fn single_word_record() {
        let rec = parse_record(b"^done").unwrap();
        let root = rec.root().unwrap();
        assert_eq!(root.kind, AtomKind::Array);
        assert_eq!(rec.children(root).count(), 0);
        assert_eq!(rec.keyword(), "done");
    }

    #[test]
    fn embedded_quote_closes_on_lookahead() {
        let rec = parse_record(b"^done,value=\"0x555555556004 \\\"%d\\\"\"").unwrap();
        assert_eq!(rec.extract_value("value"), "0x555555556004 \"%d\"");
    }

    #[test]
    fn unescaped_inner_quote_survives() {
        // a raw pointer preview: the inner quotes are not escaped at all
        let rec = parse_record(b"^done,value=\"0x1000 \"hi\"\"").unwrap();
        assert_eq!(rec.extract_value("value"), "0x1000 \"hi\"");
    }

    #[test]
    fn escape_collapse_is_idempotent() {
        let mut rec = parse_record(b"^done,value=\"a\\\"b\\\\nc\"").unwrap();
        let once = rec.extract_value("value").to_owned();
        collapse_escapes(&mut rec);
        assert_eq!(rec.extract_value("value"), once);
    }

    #[test]
    fn bad_byte_reports_error() {
        let err = parse_record(b"^done,bkpt={number=%}").unwrap_err();
        assert!(matches!(err, ParseError::BadAtomStart { byte: b'%', .. }));
    }

    #[test]
    fn mismatched_close_reports_error() {
        let err = parse_record(b"^done,stack=[frame={a=\"1\"]]").unwrap_err();
        assert!(matches!(err, ParseError::MismatchedClose { .. }));
    }

    #[test]
    fn buffer_restored_after_parse() {
        let line = b"^done,a=\"1\"";
        let rec = parse_record(line).unwrap();
        assert_eq!(rec.buf, line);
    }
}
