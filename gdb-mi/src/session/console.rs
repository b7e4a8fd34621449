// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::collections::VecDeque;

/// Rows retained in the console ring.
pub const NUM_LOG_ROWS: usize = 40;
/// Columns per console line; longer lines are clipped.
pub const NUM_LOG_COLS: usize = 128;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsoleLineKind {
    #[default]
    Plain,
    /// Echoed user input, from the debugger's log stream.
    UserInput,
}

#[derive(Clone, Debug)]
pub struct ConsoleLine {
    pub kind: ConsoleLineKind,
    pub text: String,
}

/// Bounded ring of console lines, oldest first.
///
/// Stream records (`~"…"`, `@"…"`, `&"…"`) are unescaped on the way in and a
/// line is completed on each `\n`; consecutive stream records without one
/// accumulate into the same pending line, matching how the debugger splits
/// its console chatter.
#[derive(Debug, Default)]
pub struct Console {
    lines: VecDeque<ConsoleLine>,
    cur: String,
    cur_len: usize,
    cur_kind: ConsoleLineKind,
    total: u64,
}

impl Console {
    /// Routes one output line (without its trailing newline) into the ring.
    /// The `(gdb)` prompt is dropped; stream records are unescaped; anything
    /// else (e.g. `shell` output) is taken verbatim as one full line.
    pub fn write_line(&mut self, raw: &[u8]) {
        if raw.starts_with(b"(gdb)") {
            return;
        }
        if raw.len() > 2 && matches!(raw[0], b'~' | b'@' | b'&') && raw[1] == b'"' {
            if raw[0] == b'&' {
                self.cur_kind = ConsoleLineKind::UserInput;
            }
            let body = &raw[2..];
            let body = body.strip_suffix(b"\"").unwrap_or(body);
            let mut i = 0;
            while i < body.len() {
                let c = body[i];
                if c == b'\\' && i + 1 < body.len() {
                    match body[i + 1] {
                        b'n' => self.push_char(b'\n'),
                        b't' => {
                            self.push_char(b' ');
                            self.push_char(b' ');
                        }
                        escaped @ (b'\\' | b'"') => self.push_char(escaped),
                        _ => {}
                    }
                    i += 2;
                } else {
                    self.push_char(c);
                    i += 1;
                }
            }
        } else {
            for &c in raw {
                self.push_char(c);
            }
            self.flush_line();
        }
    }

    fn push_char(&mut self, c: u8) {
        if c == b'\n' {
            self.flush_line();
        } else if self.cur_len < NUM_LOG_COLS {
            self.cur.push(c as char);
            self.cur_len += 1;
        }
    }

    fn flush_line(&mut self) {
        let line = ConsoleLine {
            kind: self.cur_kind,
            text: std::mem::take(&mut self.cur),
        };
        self.cur_len = 0;
        self.cur_kind = ConsoleLineKind::Plain;
        self.lines.push_back(line);
        self.total += 1;
        while self.lines.len() > NUM_LOG_ROWS {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &ConsoleLine> {
        self.lines.iter()
    }

    /// Count of lines ever completed, including ones the ring has dropped.
    /// Lets a display print only what it has not yet seen.
    pub fn total_lines(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.cur.clear();
        self.cur_len = 0;
        self.cur_kind = ConsoleLineKind::Plain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(console: &Console) -> Vec<&str> {
        console.lines().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn stream_record_unescapes() {
        let mut console = Console::default();
        console.write_line(b"~\"Reading symbols...\\n\"");
        console.write_line(b"~\"a\\tb \\\\ \\\"quoted\\\"\\n\"");
        assert_eq!(
            texts(&console),
            ["Reading symbols...", "a  b \\ \"quoted\""],
        );
    }

    #[test]
    fn stream_records_accumulate_until_newline() {
        let mut console = Console::default();
        console.write_line(b"~\"Reading \"");
        console.write_line(b"~\"symbols\\n\"");
        assert_eq!(texts(&console), ["Reading symbols"]);
    }

    #[test]
    fn prompt_is_dropped() {
        let mut console = Console::default();
        console.write_line(b"(gdb) ");
        assert_eq!(console.lines().count(), 0);
    }

    #[test]
    fn log_stream_marks_user_input() {
        let mut console = Console::default();
        console.write_line(b"&\"-exec-run\\n\"");
        let line = console.lines().next().unwrap();
        assert_eq!(line.kind, ConsoleLineKind::UserInput);
        assert_eq!(line.text, "-exec-run");
    }

    #[test]
    fn plain_text_is_one_line() {
        let mut console = Console::default();
        console.write_line(b"hello from shell");
        assert_eq!(texts(&console), ["hello from shell"]);
    }

    #[test]
    fn ring_is_bounded() {
        let mut console = Console::default();
        for i in 0..(NUM_LOG_ROWS + 5) {
            console.write_line(format!("line {i}").as_bytes());
        }
        assert_eq!(console.lines().count(), NUM_LOG_ROWS);
        assert_eq!(console.lines().next().unwrap().text, "line 5");
        assert_eq!(console.total_lines(), (NUM_LOG_ROWS + 5) as u64);
    }

    #[test]
    fn long_lines_are_clipped() {
        let mut console = Console::default();
        let long = "x".repeat(NUM_LOG_COLS + 40);
        console.write_line(long.as_bytes());
        assert_eq!(console.lines().next().unwrap().text.len(), NUM_LOG_COLS);
    }
}
