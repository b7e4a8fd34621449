// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! Dotted-path lookup into a record: `bkpt.fullname`, `stack[2].line`. Every
//! accessor is total; a failed lookup yields `None`, the empty string, or 0.

use bstr::{BStr, ByteSlice};

use crate::record::{Atom, AtomKind, Record};

/// A path segment split into its name and optional `[N]` index.
fn split_index(segment: &str) -> (&str, Option<usize>) {
    let Some(bracket) = segment.find('[') else {
        return (segment, None);
    };
    let name = &segment[..bracket];
    let index = segment[bracket + 1..]
        .strip_suffix(']')
        .and_then(|digits| digits.parse().ok());
    (name, index)
}

impl Record {
    /// Resolves a dotted path from the root atom.
    pub fn extract_atom(&self, path: &str) -> Option<&Atom> {
        self.root().and_then(|root| self.extract_atom_at(path, root))
    }

    /// Resolves a dotted path relative to `base`. Each segment must name a
    /// child; a `[N]` suffix then descends to the N'th element of that child
    /// when it is an array.
    pub fn extract_atom_at<'a>(&'a self, path: &str, base: &'a Atom) -> Option<&'a Atom> {
        let mut cur = base;
        for segment in path.split('.') {
            let (name, index) = split_index(segment);
            let child = self
                .children(cur)
                .find(|c| c.name.slice(&self.buf) == name.as_bytes())?;
            cur = match index {
                None => child,
                Some(n) if child.kind == AtomKind::Array && n < child.value.length => {
                    self.atoms.get(child.value.index + n)?
                }
                Some(_) => return None,
            };
        }
        Some(cur)
    }

    /// String value at `path`, or empty when absent or not a string atom.
    pub fn extract_value(&self, path: &str) -> &BStr {
        self.root()
            .map(|root| self.extract_value_at(path, root))
            .unwrap_or_else(|| BStr::new(""))
    }

    pub fn extract_value_at<'a>(&'a self, path: &str, base: &'a Atom) -> &'a BStr {
        match self.extract_atom_at(path, base) {
            Some(atom) if atom.kind == AtomKind::String => self.text(atom.value),
            _ => BStr::new(""),
        }
    }

    /// Integer value at `path`, or 0 when absent or non-numeric.
    pub fn extract_int(&self, path: &str) -> i64 {
        self.root()
            .map(|root| self.extract_int_at(path, root))
            .unwrap_or(0)
    }

    pub fn extract_int_at(&self, path: &str, base: &Atom) -> i64 {
        self.extract_value_at(path, base)
            .to_str()
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use crate::parse::parse_record;

    #[test]
    fn lookup_nested_fields() {
        let rec = parse_record(
            b"^done,bkpt={number=\"1\",line=\"13\",fullname=\"/x/y.c\"}",
        )
        .unwrap();
        assert_eq!(rec.extract_value("bkpt.number"), "1");
        assert_eq!(rec.extract_int("bkpt.line"), 13);
        assert_eq!(rec.extract_value("bkpt.missing"), "");
        assert_eq!(rec.extract_int("bkpt.fullname"), 0);
        assert!(rec.extract_atom("nothing.here").is_none());
    }

    #[test]
    fn indexed_lookup() {
        let rec = parse_record(
            b"^done,stack=[frame={line=\"4\"},frame={line=\"9\"},frame={line=\"2\"}]",
        )
        .unwrap();
        assert_eq!(rec.extract_int("stack[0].line"), 4);
        assert_eq!(rec.extract_int("stack[2].line"), 2);
        assert!(rec.extract_atom("stack[3].line").is_none());
    }

    #[test]
    fn query_composes() {
        let rec = parse_record(
            b"^done,a={b=[inner={c=\"7\"},inner={c=\"8\"}]}",
        )
        .unwrap();
        let base = rec.extract_atom("a.b[1]").unwrap();
        assert_eq!(
            rec.extract_value("a.b[1].c"),
            rec.extract_value_at("c", base)
        );
        assert_eq!(rec.extract_int_at("c", base), 8);
    }

    #[test]
    fn query_is_pure() {
        let rec = parse_record(b"^done,a=\"1\"").unwrap();
        let first = rec.extract_atom("a").map(|a| *a);
        let second = rec.extract_atom("a").map(|a| *a);
        assert_eq!(first, second);
    }
}
