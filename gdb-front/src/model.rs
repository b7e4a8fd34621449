// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! The debuggee model: call stack, breakpoints, variables, and watches,
//! refreshed once per display frame from the records the session drained.
//! Everything here runs on the driver thread; the session does the waiting.

use bstr::BStr;

use gdb_mi::parse::{parse_value, ValueExpr};
use gdb_mi::session::{interrupt_process, terminate_process, Feature, TargetFeature};
use gdb_mi::{Record, Session, SessionError};

/// Index reserved for "no source file".
pub const FILE_IDX_INVALID: usize = 0;

/// Namespace prefix for debugger-side varobjs that live for the whole
/// program (currently the default register set).
const GLOBAL_PREFIX: &str = "GB__";

const DEFAULT_REG_ARM: &[&str] = &[
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "cpsr",
];

const DEFAULT_REG_AMD64: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rbp", "rsp", "rip", "rsi", "rdi", "r8", "r9", "r10", "r11",
    "r12", "r13", "r14", "r15",
];

const DEFAULT_REG_X86: &[&str] = &[
    "eax", "ebx", "ecx", "edx", "ebp", "esp", "eip", "esi", "edi",
];

/// One call-stack level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub func: String,
    /// Current PC within this frame.
    pub addr: u64,
    /// Index into [`Debuggee::files`].
    pub file_idx: usize,
    /// Next line to be executed.
    pub line: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Breakpoint {
    /// Ordinal assigned by the debugger.
    pub number: u64,
    pub addr: u64,
    pub file_idx: usize,
    pub line: u64,
}

/// One disassembled instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisassemblyLine {
    pub addr: u64,
    pub text: String,
}

/// A watched value. Scalars compare directly; aggregates carry the parsed
/// tree plus a changed flag per atom so a display can highlight exactly what
/// moved.
#[derive(Clone, Debug, Default)]
pub struct VarObj {
    pub name: String,
    pub value: String,
    pub changed: bool,
    pub expr: Option<ValueExpr>,
    pub expr_changed: Vec<bool>,
}

/// Everything a display layer reads each frame.
pub struct Debuggee {
    pub frames: Vec<Frame>,
    pub frame_idx: usize,
    pub breakpoints: Vec<Breakpoint>,
    /// Variables of the current frame, reconciled by name on each stop.
    pub local_vars: Vec<VarObj>,
    /// Program-lifetime varobjs; the default register set lives here.
    pub global_vars: Vec<VarObj>,
    /// User-defined watch expressions, re-evaluated on each stop.
    pub watch_vars: Vec<VarObj>,
    /// One-shot view of a non-current frame after a thread/frame switch.
    pub other_frame_vars: Vec<VarObj>,
    /// Instructions of the selected frame's function, when fetched.
    pub disassembly: Vec<DisassemblyLine>,
    /// Interned source file paths; index 0 is the empty path.
    pub files: Vec<String>,
    pub running: bool,
    pub started: bool,
    pub inferior_pid: Option<i32>,
    last_stack_sig: String,
    default_registers_set: bool,
}

impl Default for Debuggee {
    fn default() -> Self {
        Debuggee {
            frames: Vec::new(),
            frame_idx: 0,
            breakpoints: Vec::new(),
            local_vars: Vec::new(),
            global_vars: Vec::new(),
            watch_vars: Vec::new(),
            other_frame_vars: Vec::new(),
            disassembly: Vec::new(),
            files: vec![String::new()],
            running: false,
            started: false,
            inferior_pid: None,
            last_stack_sig: String::new(),
            default_registers_set: false,
        }
    }
}

impl Debuggee {
    /// One driver-frame update: drain pending output, fold async records
    /// into the model, and on a stop refresh frames, variables, and watches.
    pub fn update(&mut self, session: &mut Session) {
        session.pump();

        let mut just_stopped = false;
        for rec in session.take_unread_records() {
            match rec.prefix() {
                b'=' => {
                    let keyword = rec.keyword();
                    if keyword == "breakpoint-created" {
                        self.breakpoint_created(&rec);
                    } else if keyword == "breakpoint-modified" {
                        self.breakpoint_modified(&rec);
                    } else if keyword == "breakpoint-deleted" {
                        self.breakpoint_deleted(&rec);
                    } else if keyword == "thread-group-started" {
                        self.inferior_pid = Some(rec.extract_int("pid") as i32);
                    } else if keyword == "thread-selected" {
                        self.thread_selected(&rec, session);
                    }
                }
                b'*' if rec.keyword() == "stopped" => {
                    self.frame_idx = 0;
                    self.running = false;
                    session.set_debuggee_running(false);
                    if rec.extract_value("reason").to_string().contains("exited") {
                        self.started = false;
                        self.frames.clear();
                        self.local_vars.clear();
                    } else {
                        self.started = true;
                        just_stopped = true;
                    }
                }
                _ => {}
            }
        }

        if just_stopped {
            self.refresh_stop_state(session);
            self.query_watchlist(session);
        }
    }

    pub(crate) fn breakpoint_created(&mut self, rec: &Record) {
        let file_idx = self.intern_file(rec.extract_value("bkpt.fullname"));
        self.breakpoints.push(Breakpoint {
            number: rec.extract_int("bkpt.number") as u64,
            addr: parse_hex(rec.extract_value("bkpt.addr")),
            line: rec.extract_int("bkpt.line") as u64,
            file_idx,
        });
    }

    pub(crate) fn breakpoint_modified(&mut self, rec: &Record) {
        let number = rec.extract_int("bkpt.number") as u64;
        let addr = parse_hex(rec.extract_value("bkpt.addr"));
        let line = rec.extract_int("bkpt.line") as u64;
        let file_idx = self.intern_file(rec.extract_value("bkpt.fullname"));
        if let Some(bkpt) = self.breakpoints.iter_mut().find(|b| b.number == number) {
            bkpt.addr = addr;
            bkpt.line = line;
            bkpt.file_idx = file_idx;
        }
    }

    pub(crate) fn breakpoint_deleted(&mut self, rec: &Record) {
        let id = rec.extract_int("id") as u64;
        self.breakpoints.retain(|b| b.number != id);
    }

    /// The user jumped to another thread or frame from the console; mirror
    /// the selection and take a one-shot snapshot of that frame's variables.
    fn thread_selected(&mut self, rec: &Record, session: &mut Session) {
        let level = rec.extract_int("frame.level") as usize;
        if level >= self.frames.len() {
            return;
        }
        self.frame_idx = level;
        if level == 0 {
            return;
        }
        self.other_frame_vars.clear();
        let cmd = format!("-stack-list-variables --frame {level} --thread 1 --all-values");
        let Ok(vars_rec) = session.send_blocking(&cmd) else {
            return;
        };
        if let Some(vars) = vars_rec.extract_atom("variables") {
            for child in vars_rec.children(vars) {
                let name = vars_rec.extract_value_at("name", child).to_string();
                let value = vars_rec.extract_value_at("value", child).to_string();
                let mut add = make_varobj(&name, &value);
                add.changed = false;
                for flag in &mut add.expr_changed {
                    *flag = false;
                }
                self.other_frame_vars.push(add);
            }
        }
    }

    /// The post-stop refresh: frames, default registers, locals, globals.
    fn refresh_stop_state(&mut self, session: &mut Session) {
        if let Ok(rec) = session.send_blocking("-stack-list-frames") {
            let arch = self.rebuild_frames(&rec);
            if !self.default_registers_set && !arch.is_empty() {
                self.default_registers_set = true;
                self.register_defaults(&arch, session);
            }
        }
        if let Ok(rec) = session.send_blocking("-stack-list-variables --all-values") {
            self.reconcile_locals(&rec);
        }
        if let Ok(rec) = session.send_blocking("-var-update --all-values *") {
            self.apply_changelist(&rec);
        }
    }

    /// Rebuilds the frame list from a `-stack-list-frames` reply and returns
    /// the reported architecture. Locals reset only when the cheap stack
    /// signature (concatenated function names) changes; stepping within the
    /// same call stack keeps them for change tracking.
    pub(crate) fn rebuild_frames(&mut self, rec: &Record) -> String {
        let Some(callstack) = rec.extract_atom("stack") else {
            return String::new();
        };
        let mut arch = String::new();
        let mut sig = String::new();
        self.frames.clear();
        for level in rec.children(callstack) {
            let fullname = rec.extract_value_at("fullname", level).to_string();
            let frame = Frame {
                line: rec.extract_int_at("line", level) as u64,
                addr: parse_hex(rec.extract_value_at("addr", level)),
                func: rec.extract_value_at("func", level).to_string(),
                file_idx: self.intern_file(BStr::new(&fullname)),
            };
            let level_arch = rec.extract_value_at("arch", level);
            if !level_arch.is_empty() {
                arch = level_arch.to_string();
            }
            sig.push_str(&frame.func);
            self.frames.push(frame);
        }
        self.frame_idx = 0;
        if self.last_stack_sig != sig {
            self.local_vars.clear();
            self.last_stack_sig = sig;
        }
        arch
    }

    fn register_defaults(&mut self, arch: &str, session: &mut Session) {
        let registers: &[&str] = if arch == "i386:x86-64" {
            DEFAULT_REG_AMD64
        } else if arch == "i386" {
            DEFAULT_REG_X86
        } else if arch.starts_with("arm") {
            DEFAULT_REG_ARM
        } else {
            return;
        };
        for reg in registers {
            let cmd = format!("-var-create {GLOBAL_PREFIX}{reg} @ ${reg}");
            if let Ok(rec) = session.send_blocking(&cmd) {
                let value = rec.extract_value("value").to_string();
                self.global_vars.push(make_varobj(reg, &value));
            }
        }
    }

    /// Folds a `-stack-list-variables --all-values` reply into the local
    /// list: matches update in place carrying change flags, new names
    /// append, and names gone from the reply drop out of scope.
    pub(crate) fn reconcile_locals(&mut self, rec: &Record) {
        for local in &mut self.local_vars {
            local.changed = false;
        }
        let Some(vars) = rec.extract_atom("variables") else {
            return;
        };
        let existing = self.local_vars.len();
        let mut seen = vec![false; existing];
        for child in rec.children(vars) {
            let name = rec.extract_value_at("name", child).to_string();
            let value = rec.extract_value_at("value", child).to_string();
            let mut incoming = make_varobj(&name, &value);
            match self.local_vars[..existing]
                .iter()
                .position(|local| local.name == incoming.name)
            {
                Some(i) => {
                    check_if_changed(&mut incoming, &self.local_vars[i]);
                    self.local_vars[i] = incoming;
                    seen[i] = true;
                }
                None => self.local_vars.push(incoming),
            }
        }
        for i in (0..existing).rev() {
            if !seen[i] {
                self.local_vars.remove(i);
            }
        }
    }

    /// Applies a `-var-update --all-values *` changelist to the prefixed
    /// global varobjs.
    pub(crate) fn apply_changelist(&mut self, rec: &Record) {
        for global in &mut self.global_vars {
            global.changed = false;
        }
        let Some(changelist) = rec.extract_atom("changelist") else {
            return;
        };
        for item in rec.children(changelist) {
            let name = rec.extract_value_at("name", item).to_string();
            let value = rec.extract_value_at("value", item).to_string();
            let Some(bare) = name.strip_prefix(GLOBAL_PREFIX) else {
                continue;
            };
            let mut incoming = make_varobj(bare, &value);
            if let Some(global) = self.global_vars.iter_mut().find(|g| g.name == bare) {
                check_if_changed(&mut incoming, global);
                *global = incoming;
            }
        }
    }

    /// Re-evaluates every user watch against the selected frame.
    fn query_watchlist(&mut self, session: &mut Session) {
        for i in 0..self.watch_vars.len() {
            let name = self.watch_vars[i].name.clone();
            let cmd = format!(
                "-data-evaluate-expression --frame {} --thread 1 \"{}\"",
                self.frame_idx,
                watch_expression(&name)
            );
            let Ok(rec) = session.send_blocking(&cmd) else {
                continue;
            };
            let value = rec.extract_value("value").to_string();
            let mut incoming = make_varobj(&name, &value);
            check_if_changed(&mut incoming, &self.watch_vars[i]);
            self.watch_vars[i] = incoming;
        }
    }

    pub fn add_watch(&mut self, expr: &str) {
        self.watch_vars.push(make_varobj(expr, ""));
    }

    pub fn remove_watch(&mut self, expr: &str) {
        self.watch_vars.retain(|watch| watch.name != expr);
    }

    /// Inserts a breakpoint (`file:line`, function name, or address) and
    /// records it from the reply.
    pub fn add_breakpoint(
        &mut self,
        session: &mut Session,
        location: &str,
    ) -> Result<(), SessionError> {
        let rec = session.send_blocking(&format!("-break-insert {location}"))?;
        if rec.extract_atom("bkpt").is_some() {
            let file_idx = self.intern_file(rec.extract_value("bkpt.fullname"));
            self.breakpoints.push(Breakpoint {
                number: rec.extract_int("bkpt.number") as u64,
                addr: parse_hex(rec.extract_value("bkpt.addr")),
                line: rec.extract_int("bkpt.line") as u64,
                file_idx,
            });
        }
        Ok(())
    }

    pub fn delete_breakpoint(
        &mut self,
        session: &mut Session,
        number: u64,
    ) -> Result<(), SessionError> {
        session.send_blocking(&format!("-break-delete {number}"))?;
        self.breakpoints.retain(|b| b.number != number);
        Ok(())
    }

    /// Starts the debuggee, or resumes it when already started.
    pub fn start_or_continue(&mut self, session: &mut Session) -> Result<(), SessionError> {
        let cmd = if self.started {
            "-exec-continue"
        } else {
            "-exec-run"
        };
        session.send(cmd)?;
        self.running = true;
        session.set_debuggee_running(true);
        Ok(())
    }

    pub fn step_into(&mut self, session: &mut Session) -> Result<(), SessionError> {
        self.exec(session, "-exec-step")
    }

    pub fn step_over(&mut self, session: &mut Session) -> Result<(), SessionError> {
        self.exec(session, "-exec-next")
    }

    pub fn step_out(&mut self, session: &mut Session) -> Result<(), SessionError> {
        self.exec(session, "-exec-finish")
    }

    fn exec(&mut self, session: &mut Session, cmd: &str) -> Result<(), SessionError> {
        session.send(cmd)?;
        self.running = true;
        session.set_debuggee_running(true);
        Ok(())
    }

    /// Pauses the debuggee. Without async execution the debugger will not
    /// take `-exec-interrupt` mid-run, so the inferior gets SIGINT directly.
    pub fn pause(&mut self, session: &mut Session) -> Result<(), SessionError> {
        if session.target_features().contains(TargetFeature::AsyncExecution) {
            session.send("-exec-interrupt")
        } else if let Some(pid) = self.inferior_pid {
            interrupt_process(pid)
        } else {
            session.interrupt()
        }
    }

    /// User-initiated stop of the debuggee.
    pub fn stop(&mut self, _session: &mut Session) -> Result<(), SessionError> {
        if let Some(pid) = self.inferior_pid {
            terminate_process(pid)?;
        }
        Ok(())
    }

    /// Index of `fullpath` in the interned file table, creating it on first
    /// sight.
    pub fn intern_file(&mut self, fullpath: &BStr) -> usize {
        if fullpath.is_empty() {
            return FILE_IDX_INVALID;
        }
        let fullpath = fullpath.to_string();
        match self.files.iter().position(|f| *f == fullpath) {
            Some(i) => i,
            None => {
                self.files.push(fullpath);
                self.files.len() - 1
            }
        }
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.get(self.frame_idx)
    }

    /// Fetches the disassembly of the selected frame's function. Frames
    /// without source info need the `-data-disassemble -a` form; when the
    /// debugger lacks that capability the listing is unavailable.
    pub fn fetch_disassembly(&mut self, session: &mut Session) -> Result<(), SessionError> {
        self.disassembly.clear();
        let (func, file_idx, line) = match self.frames.get(self.frame_idx) {
            Some(frame) => (frame.func.clone(), frame.file_idx, frame.line),
            None => return Ok(()),
        };
        // the dynamic linker reports frames as ?? and refuses to
        // disassemble them either way
        if func == "??" {
            return Ok(());
        }
        let cmd = if file_idx == FILE_IDX_INVALID {
            if !session.features().contains(Feature::DataDisassembleA) {
                return Ok(());
            }
            format!("-data-disassemble -a {func} 0")
        } else {
            let file = self.files.get(file_idx).cloned().unwrap_or_default();
            format!("-data-disassemble -f \"{file}\" -l {line} -n -1 0")
        };
        let rec = session.send_blocking(&cmd)?;
        self.apply_disassembly(&rec);
        Ok(())
    }

    pub(crate) fn apply_disassembly(&mut self, rec: &Record) {
        if let Some(instructions) = rec.extract_atom("asm_insns") {
            for inst in rec.children(instructions) {
                self.disassembly.push(DisassemblyLine {
                    addr: parse_hex(rec.extract_value_at("address", inst)),
                    text: rec.extract_value_at("inst", inst).to_string(),
                });
            }
        }
    }
}

/// Builds a VarObj from a name and the raw value text the debugger printed.
/// Aggregate values (leading `{`) get a parsed tree for per-atom diffing.
pub fn make_varobj(name: &str, value: &str) -> VarObj {
    let mut var = VarObj {
        name: name.to_string(),
        value: value.to_string(),
        changed: true,
        expr: None,
        expr_changed: Vec::new(),
    };
    if var.value.is_empty() {
        var.value = "???".to_string();
    }
    if var.value.starts_with('{') {
        if let Ok(expr) = parse_value(var.value.as_bytes()) {
            var.expr_changed = vec![false; expr.record.atoms.len()];
            var.expr = Some(expr);
        }
    }
    var
}

/// Translates the `expr, N` watch shorthand (view N elements from a
/// pointer) into the debugger's `*(expr)@N`.
pub(crate) fn watch_expression(name: &str) -> String {
    match name.split_once(',') {
        Some((head, count)) => format!("*({})@{}", head, count.trim()),
        None => name.to_string(),
    }
}

/// Carries change flags from the previous observation of a variable into
/// the new one. Aggregates diff atom by atom; a shape change (scalar to
/// aggregate or back) marks everything changed.
pub fn check_if_changed(incoming: &mut VarObj, last: &VarObj) {
    match (incoming.expr.take(), &last.expr) {
        (Some(this), Some(last_expr)) => {
            incoming.changed =
                recurse_check_changed(&this.record, &mut incoming.expr_changed, 0, &last_expr.record, 0);
            incoming.expr = Some(this);
        }
        (None, None) => incoming.changed = incoming.value != last.value,
        (expr, _) => {
            incoming.expr = expr;
            incoming.changed = true;
            for flag in &mut incoming.expr_changed {
                *flag = true;
            }
        }
    }
}

/// Marks, in `flags`, every atom under `this_idx` whose text differs from
/// its counterpart under `last_idx`. A child-count change marks the whole
/// run changed.
fn recurse_check_changed(
    this_rec: &Record,
    flags: &mut [bool],
    this_idx: usize,
    last_rec: &Record,
    last_idx: usize,
) -> bool {
    let (Some(&this_parent), Some(&last_parent)) =
        (this_rec.atoms.get(this_idx), last_rec.atoms.get(last_idx))
    else {
        return true;
    };
    let mut changed = false;
    if this_parent.value.length == last_parent.value.length {
        for k in 0..this_parent.value.length {
            let ti = this_parent.value.index + k;
            let li = last_parent.value.index + k;
            let (Some(&this_child), Some(&last_child)) =
                (this_rec.atoms.get(ti), last_rec.atoms.get(li))
            else {
                changed = true;
                continue;
            };
            if this_child.kind.is_aggregate() && last_child.kind.is_aggregate() {
                changed |= recurse_check_changed(this_rec, flags, ti, last_rec, li);
            } else {
                let differs = this_child.value.slice(&this_rec.buf)
                    != last_child.value.slice(&last_rec.buf);
                if let Some(flag) = flags.get_mut(ti) {
                    *flag = differs;
                }
                changed |= differs;
            }
        }
    } else {
        changed = true;
        for k in 0..this_parent.value.length {
            if let Some(flag) = flags.get_mut(this_parent.value.index + k) {
                *flag = true;
            }
        }
    }
    if let Some(flag) = flags.get_mut(this_idx) {
        *flag = changed;
    }
    changed
}

/// Parses a `0x…` address; junk parses to 0.
pub(crate) fn parse_hex(text: &BStr) -> u64 {
    let text = std::str::from_utf8(text).unwrap_or("");
    let digits = text.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16).unwrap_or(0)
}
