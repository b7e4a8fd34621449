// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;

use gdb_front::config::{Config, CONFIG_FILENAME};
use gdb_front::model::Debuggee;
use gdb_mi::Session;

/// Debugger front-end core over the GDB machine interface.
#[derive(Parser, Debug)]
#[command(name = "gdb-front", disable_version_flag = true)]
struct Args {
    /// Path to the debugger binary to drive.
    #[arg(long, value_name = "path")]
    gdb: Option<PathBuf>,

    /// Path to the executable to debug.
    #[arg(long, value_name = "path")]
    exe: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            print!("{err}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            // unknown flag or missing value
            eprint!("{err}");
            return ExitCode::FAILURE;
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load(Path::new(CONFIG_FILENAME))
        .with_context(|| format!("could not read {CONFIG_FILENAME}"))?;
    if let Some(gdb) = &args.gdb {
        config.set("gdb_path", &gdb.to_string_lossy());
    }
    if let Some(exe) = &args.exe {
        config.set("debug_exe_path", &exe.to_string_lossy());
    }

    let gdb_path = config.get("gdb_path").to_string();
    anyhow::ensure!(
        !gdb_path.is_empty(),
        "no debugger configured; pass --gdb or set gdb_path in {CONFIG_FILENAME}"
    );

    let mut session = Session::spawn(Path::new(&gdb_path), config.get("gdb_args"))
        .context("debugger session")?;

    let exe_path = config.get("debug_exe_path").to_string();
    if !exe_path.is_empty() {
        session
            .load_inferior(Path::new(&exe_path), config.get("debug_exe_args"))
            .context("loading debug target")?;
    }

    let mut model = Debuggee::default();
    drive(&mut session, &mut model)?;
    session.shutdown();
    Ok(())
}

/// Minimal line console standing in for a display layer: one command per
/// line, model pumped around each, new console output echoed.
fn drive(session: &mut Session, model: &mut Debuggee) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut printed: u64 = 0;
    let mut line = String::new();
    loop {
        model.update(session);
        printed = print_new_console(session, printed);

        print!("> ");
        io::stdout().flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        let (cmd, rest) = match trimmed.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (trimmed, ""),
        };
        let outcome = match cmd {
            "" => Ok(()),
            "q" | "quit" => break,
            "r" | "run" => model.start_or_continue(session),
            "s" | "step" => model.step_into(session),
            "n" | "next" => model.step_over(session),
            "f" | "finish" => model.step_out(session),
            "p" | "pause" => model.pause(session),
            "stop" => model.stop(session),
            "b" | "break" => model.add_breakpoint(session, rest),
            "w" | "watch" => {
                model.add_watch(rest);
                Ok(())
            }
            "disas" => {
                model.fetch_disassembly(session).map(|()| {
                    for line in &model.disassembly {
                        println!("{:#014x}  {}", line.addr, line.text);
                    }
                })
            }
            "bt" => {
                for (i, frame) in model.frames.iter().enumerate() {
                    let file = model.files.get(frame.file_idx).map_or("", |f| f.as_str());
                    println!("#{i} {} at {}:{}", frame.func, file, frame.line);
                }
                Ok(())
            }
            "locals" => {
                for var in &model.local_vars {
                    let mark = if var.changed { "*" } else { " " };
                    println!("{mark}{} = {}", var.name, var.value);
                }
                Ok(())
            }
            // anything else is raw MI or CLI passthrough
            _ => session.send(trimmed),
        };
        if let Err(err) = outcome {
            eprintln!("{err}");
        }
    }
    Ok(())
}

/// Prints console lines completed since the last call; returns the new
/// high-water mark.
fn print_new_console(session: &Session, printed: u64) -> u64 {
    let console = session.console();
    let total = console.total_lines();
    let in_ring = console.lines().count() as u64;
    let first_in_ring = total - in_ring;
    for (i, line) in console.lines().enumerate() {
        if first_in_ring + i as u64 >= printed {
            println!("{}", line.text);
        }
    }
    total
}
