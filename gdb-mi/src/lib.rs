// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! Library for driving a debugger over the GDB machine-interface protocol:
//! spawning the child, framing and parsing its line-oriented output, and
//! correlating commands with their replies by ordinal.
//!
//! The data model is a span-based arena: every parsed line becomes a
//! [`Record`] owning one text buffer and one contiguous atom table, so
//! records copy, pool, and query without pointer chasing.

pub mod parse;
mod query;
mod record;
pub mod session;

pub use record::{Atom, AtomKind, Pretty, Record, RecordHolder, Span, RECORD_ROOT};
pub use session::{Session, SessionError};
