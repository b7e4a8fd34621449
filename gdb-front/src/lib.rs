// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! The thin consumer over the MI core: the debuggee model a display layer
//! reads each frame, plus the flat key/value configuration.

pub mod config;
pub mod model;
