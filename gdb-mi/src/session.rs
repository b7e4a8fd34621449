// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! Debugger session lifecycle and the ordinal correlator.
//!
//! A session owns the spawned debugger, the reader task filling the block
//! ring from its merged output pipe, and all parsed driver-side state: the
//! record pool, the console ring, and the capability bitsets. One driver
//! thread issues commands; replies are matched by ordinal, never by
//! position.

pub mod console;
mod consumer;
pub mod features;
mod reader;

pub use console::{Console, ConsoleLine, ConsoleLineKind, NUM_LOG_COLS, NUM_LOG_ROWS};
pub use consumer::RecordPool;
pub use features::{Feature, TargetFeature};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use enumflags2::BitFlags;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

use crate::record::Record;
use crate::session::reader::BlockRing;

/// How long one blocking send waits for its reply. One timeout fails the
/// call; the driver carries on.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// A failure at the session boundary. Spawn and transport failures are
/// fatal to the session; the rest fail a single call.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not an executable file: {0}")]
    NotExecutable(PathBuf),
    #[error("could not spawn debugger: {0}")]
    Spawn(#[source] io::Error),
    #[error("could not create pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("write to debugger: {0}")]
    Write(#[source] io::Error),
    #[error("command refused while the debuggee is running")]
    Busy,
    #[error("no reply from the debugger within the send timeout")]
    Timeout,
    #[error("debugger reported: {0}")]
    Mi(String),
    #[error("debugger output pipe closed")]
    Closed,
    #[error("could not signal debugger: {0}")]
    Signal(#[source] nix::Error),
}

/// A live debugger process driven over its machine interface.
pub struct Session {
    child: Option<Child>,
    stdin: Option<Box<dyn Write + Send>>,
    ring: Arc<BlockRing>,
    reader: Option<JoinHandle<()>>,
    next_ordinal: u32,
    pool: RecordPool,
    console: Console,
    features: BitFlags<Feature>,
    target_features: BitFlags<TargetFeature>,
    debuggee_running: bool,
}

impl Session {
    /// Spawns the debugger with `--interpreter=mi` appended to its
    /// arguments, merges its stdout and stderr into one pipe, starts the
    /// reader task, and probes the feature set.
    pub fn spawn(gdb_path: &Path, gdb_args: &str) -> Result<Session, SessionError> {
        verify_executable(gdb_path)?;

        let (pipe_read, pipe_write) = os_pipe::pipe().map_err(SessionError::Pipe)?;
        let pipe_write_err = pipe_write.try_clone().map_err(SessionError::Pipe)?;

        let mut argv = split_command_args(gdb_args);
        argv.push("--interpreter=mi".to_string());

        let mut child = {
            use std::os::unix::process::CommandExt;
            Command::new(gdb_path)
                .args(&argv)
                .stdin(Stdio::piped())
                .stdout(pipe_write)
                .stderr(pipe_write_err)
                .process_group(0)
                .spawn()
                .map_err(SessionError::Spawn)?
        };
        let stdin = child.stdin.take().expect("stdin is piped");
        log::info!(
            "spawned debugger {} {} (pid {})",
            gdb_path.display(),
            gdb_args,
            child.id()
        );

        let mut session = Session::over(Box::new(stdin), pipe_read);
        session.child = Some(child);
        session.probe_features();
        Ok(session)
    }

    /// Builds a session over raw transport ends and starts the reader task.
    /// `Session::spawn` layers process management on top; tests drive this
    /// directly with a scripted peer.
    fn over(stdin: Box<dyn Write + Send>, output: os_pipe::PipeReader) -> Session {
        let ring = Arc::new(BlockRing::new());
        let reader = {
            let ring = Arc::clone(&ring);
            thread::Builder::new()
                .name("mi-reader".to_string())
                .spawn(move || reader::read_blocks(output, ring))
                .ok()
        };
        Session {
            child: None,
            stdin: Some(stdin),
            ring,
            reader,
            next_ordinal: 1,
            pool: RecordPool::default(),
            console: Console::default(),
            features: BitFlags::empty(),
            target_features: BitFlags::empty(),
            debuggee_running: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_pipes(
        output: os_pipe::PipeReader,
        input: os_pipe::PipeWriter,
    ) -> Session {
        Session::over(Box::new(input), output)
    }

    fn probe_features(&mut self) {
        if let Ok(rec) = self.send_blocking("-list-features") {
            self.features = features::parse_features(&rec);
        }
        if let Ok(rec) = self.send_blocking("-list-target-features") {
            self.target_features = features::parse_target_features(&rec);
        }
        log::debug!(
            "debugger features: {:?}, target: {:?}",
            self.features,
            self.target_features
        );
    }

    /// Points the debugger at the executable to debug: symbols, source
    /// search directory, and optional command-line arguments.
    pub fn load_inferior(&mut self, exe: &Path, args: &str) -> Result<(), SessionError> {
        verify_executable(exe)?;
        self.send_blocking(&format!("-file-exec-and-symbols \"{}\"", exe.display()))?;
        if let Some(dir) = exe.parent() {
            self.send_blocking(&format!("-environment-directory \"{}\"", dir.display()))?;
        }
        if !args.is_empty() {
            self.send_blocking(&format!("-exec-arguments {args}"))?;
        }
        log::info!("loaded debug target {} {}", exe.display(), args);
        Ok(())
    }

    /// Best-effort write of one MI command; no reply is awaited. Refused
    /// while the debuggee runs unless the debugger takes commands
    /// asynchronously.
    pub fn send(&mut self, cmd: &str) -> Result<(), SessionError> {
        if self.debuggee_running && !self.target_features.contains(TargetFeature::AsyncExecution)
        {
            return Err(SessionError::Busy);
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SessionError::Closed);
        };
        stdin
            .write_all(cmd.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush())
            .map_err(SessionError::Write)
    }

    /// Sends one command prefixed with a fresh ordinal and waits for the
    /// record echoing it, parsing everything that arrives in the meantime.
    /// `^error` replies become console lines and fail the call.
    pub fn send_blocking(&mut self, cmd: &str) -> Result<Record, SessionError> {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.send(&format!("{ordinal}{cmd}"))?;
        loop {
            if !self.ring.wait_pending(SEND_TIMEOUT) {
                log::warn!("command timeout: {cmd}");
                return Err(SessionError::Timeout);
            }
            consumer::drain(&self.ring, &mut self.pool, &mut self.console);
            if let Some(result) = self.take_reply(ordinal) {
                return result;
            }
            if self.ring.reader_done() {
                return Err(SessionError::Closed);
            }
        }
    }

    /// Scans the pool for this ordinal's reply and consumes it.
    fn take_reply(&mut self, ordinal: u32) -> Option<Result<Record, SessionError>> {
        for slot in self.pool.slots_mut() {
            if slot.parsed || slot.rec.id != ordinal {
                continue;
            }
            slot.parsed = true;
            if slot.rec.buf.starts_with(b"^error") {
                let msg = slot.rec.extract_value("msg").to_string();
                self.console
                    .write_line(format!("&\"GDB MI Error: {msg}\\n\"").as_bytes());
                return Some(Err(SessionError::Mi(msg)));
            }
            return Some(Ok(slot.rec.clone()));
        }
        None
    }

    /// Drains published blocks into the pool when a wake-up is pending. The
    /// model update pass calls this once per frame; it never blocks.
    pub fn pump(&mut self) -> bool {
        if !self.ring.has_pending() {
            return false;
        }
        consumer::drain(&self.ring, &mut self.pool, &mut self.console);
        true
    }

    /// Clones out every unprocessed record, oldest first, marking them
    /// consumed.
    pub fn take_unread_records(&mut self) -> Vec<Record> {
        self.pool.take_unread()
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn features(&self) -> BitFlags<Feature> {
        self.features
    }

    pub fn target_features(&self) -> BitFlags<TargetFeature> {
        self.target_features
    }

    /// The model flags run state here so `send` can refuse commands the
    /// debugger would ignore mid-run.
    pub fn set_debuggee_running(&mut self, running: bool) {
        self.debuggee_running = running;
    }

    pub fn debuggee_running(&self) -> bool {
        self.debuggee_running
    }

    /// Interrupts the debugger process itself (pause everything).
    pub fn interrupt(&self) -> Result<(), SessionError> {
        if let Some(child) = &self.child {
            signal_process(child.id() as i32, Signal::SIGINT)?;
        }
        Ok(())
    }

    /// Tears the session down: the debugger's stdin closes, SIGINT nudges
    /// it, the reader joins on pipe EOF, and the child is reaped.
    pub fn shutdown(&mut self) {
        self.stdin = None;
        if let Some(child) = &self.child {
            let _ = signal_process(child.id() as i32, Signal::SIGINT);
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
        log::info!("debugger session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.reader.is_some() || self.child.is_some() {
            self.shutdown();
        }
    }
}

fn signal_process(pid: i32, sig: Signal) -> Result<(), SessionError> {
    kill(Pid::from_raw(pid), sig).map_err(SessionError::Signal)
}

/// SIGINT to a process by id: pause.
pub fn interrupt_process(pid: i32) -> Result<(), SessionError> {
    signal_process(pid, Signal::SIGINT)
}

/// SIGTERM to a process by id: user-initiated stop.
pub fn terminate_process(pid: i32) -> Result<(), SessionError> {
    signal_process(pid, Signal::SIGTERM)
}

/// The debugger and debuggee paths must name regular files with an execute
/// bit set.
fn verify_executable(path: &Path) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.permissions().mode() & 0o111 != 0 => Ok(()),
        _ => Err(SessionError::NotExecutable(path.to_path_buf())),
    }
}

/// Splits a command-line fragment on spaces, keeping quoted stretches (with
/// either quote character) intact, quotes included.
fn split_command_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_string = false;
    let mut prev = '\0';
    for c in args.chars() {
        if (c == '\'' || c == '"') && prev != '\\' {
            in_string = !in_string;
        }
        if c == ' ' && !in_string {
            if !cur.trim().is_empty() {
                out.push(std::mem::take(&mut cur));
            } else {
                cur.clear();
            }
        } else {
            cur.push(c);
        }
        prev = c;
    }
    if !cur.trim().is_empty() {
        out.push(cur);
    }
    out
}
