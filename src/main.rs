#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]

mod copy;
mod parse;
mod remote;

use crate::copy::Report;
use crate::remote::{Pid, ProcessHandle};
use anyhow::{Context, Result};
use argh::FromArgs;
use env_logger::Env;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// What a C caller returning -1 from `main` would exit with.
const EXIT_FAILURE: u8 = 255;

#[derive(FromArgs)]
/// Copy a range of another process's memory into a file, or a file into its memory.
struct Args {
    /// enable verbose logging output
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// bytes moved per transfer call (default: 4096)
    #[argh(option, short = 'w', from_str_fn(window_arg))]
    window: Option<NonZeroUsize>,

    #[argh(subcommand)]
    mode: Mode,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Mode {
    Read(ReadArgs),
    Write(WriteArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "read")]
/// Capture a range of the target's memory into a file.
struct ReadArgs {
    /// process ID of the target
    #[argh(positional, from_str_fn(pid_arg))]
    pid: Pid,

    /// start address, in hexadecimal
    #[argh(positional, from_str_fn(hex_arg))]
    address: u64,

    /// number of bytes to copy
    #[argh(positional, from_str_fn(int_arg))]
    length: u64,

    /// file to write the captured bytes to
    #[argh(positional)]
    outfile: PathBuf,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "write")]
/// Copy the contents of a file into the target's memory.
struct WriteArgs {
    /// process ID of the target
    #[argh(positional, from_str_fn(pid_arg))]
    pid: Pid,

    /// start address, in hexadecimal
    #[argh(positional, from_str_fn(hex_arg))]
    address: u64,

    /// file to copy into the target
    #[argh(positional)]
    infile: PathBuf,
}

fn pid_arg(value: &str) -> Result<Pid, String> {
    parse::parse_pid(value).map_err(|err| err.to_string())
}

fn hex_arg(value: &str) -> Result<u64, String> {
    parse::parse_hex(value).map_err(|err| err.to_string())
}

fn int_arg(value: &str) -> Result<u64, String> {
    parse::parse_int(value).map_err(|err| err.to_string())
}

fn window_arg(value: &str) -> Result<NonZeroUsize, String> {
    let size = parse::parse_int(value).map_err(|err| err.to_string())?;
    usize::try_from(size)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| format!("window size {} is out of range", size))
}

/// Lowercase the mode word so `READ` and `Write` select their subcommands.
fn normalize_mode(mut args: Vec<String>) -> Vec<String> {
    let mut iter = args.iter_mut().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "-w" || arg == "--window" {
            iter.next();
        } else if !arg.starts_with('-') {
            if arg.eq_ignore_ascii_case("read") || arg.eq_ignore_ascii_case("write") {
                arg.make_ascii_lowercase();
            }
            break;
        }
    }
    args
}

fn parse_args(args: Vec<String>) -> Result<Args, ExitCode> {
    let args = normalize_mode(args);
    let strs: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = strs
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or("vmcopy");
    Args::from_args(&[command], strs.get(1..).unwrap_or_default()).map_err(|early| {
        if early.status.is_ok() {
            println!("{}", early.output);
            ExitCode::SUCCESS
        } else {
            eprintln!("{}\nRun {} --help for more information.", early.output, command);
            ExitCode::from(EXIT_FAILURE)
        }
    })
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().collect()) {
        Ok(args) => args,
        Err(code) => return code,
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(if args.verbose {
        "vmcopy=debug"
    } else {
        "vmcopy=info"
    }))
    .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let window = args.window.unwrap_or(copy::DEFAULT_WINDOW);
    match args.mode {
        Mode::Read(read) => {
            let mut file = File::create(&read.outfile)
                .with_context(|| format!("failed to open file: {}", read.outfile.display()))?;
            log::info!(
                "reading {:#x} bytes from {:#x} in {} to '{}'",
                read.length,
                read.address,
                read.pid,
                read.outfile.display()
            );
            let handle = ProcessHandle::from(read.pid);
            let report =
                copy::read_range(&handle, read.address, read.length, window, &mut file)
                    .with_context(|| format!("failed to write {}", read.outfile.display()))?;
            summarize(&report);
            log::info!(
                "ok: captured {:#x} of {:#x} bytes",
                report.transferred,
                read.length
            );
        }
        Mode::Write(write) => {
            let mut file = File::open(&write.infile)
                .with_context(|| format!("failed to open file: {}", write.infile.display()))?;
            let length = file
                .metadata()
                .with_context(|| format!("failed to stat {}", write.infile.display()))?
                .len();
            log::info!(
                "writing {:#x} bytes from '{}' to {:#x} in {}",
                length,
                write.infile.display(),
                write.address,
                write.pid
            );
            let handle = ProcessHandle::from(write.pid);
            let report = copy::write_range(&handle, write.address, window, &mut file)
                .with_context(|| format!("failed to read {}", write.infile.display()))?;
            summarize(&report);
            log::info!(
                "ok: wrote {:#x} of {:#x} bytes",
                report.transferred,
                report.file_bytes
            );
        }
    }
    Ok(())
}

fn summarize(report: &Report) {
    log::debug!(
        "{} windows: {} complete, {} partial, {} failed",
        report.windows,
        report.complete,
        report.partial,
        report.failed
    );
    if let Some(first) = &report.first_failure {
        log::warn!(
            "{} of {} windows failed, first at {:#x} (+{:#x}): {}",
            report.failed,
            report.windows,
            first.address,
            first.len,
            first.error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_read() {
        let parsed = parse_args(args(&[
            "vmcopy",
            "read",
            "1337",
            "140000000",
            "0x1000",
            "dump.bin",
        ]))
        .ok()
        .unwrap();
        assert!(parsed.window.is_none());
        match parsed.mode {
            Mode::Read(read) => {
                assert_eq!(read.pid, Pid::from_raw(1337));
                assert_eq!(read.address, 0x1_4000_0000);
                assert_eq!(read.length, 0x1000);
                assert_eq!(read.outfile, PathBuf::from("dump.bin"));
            }
            Mode::Write(_) => panic!("expected read mode"),
        }
    }

    #[test]
    fn test_parse_write_case_insensitive() {
        let parsed = parse_args(args(&[
            "vmcopy", "-w", "0x100", "WRITE", "42", "0xdead", "patch.bin",
        ]))
        .ok()
        .unwrap();
        assert_eq!(parsed.window, NonZeroUsize::new(0x100));
        match parsed.mode {
            Mode::Write(write) => {
                assert_eq!(write.pid, Pid::from_raw(42));
                assert_eq!(write.address, 0xdead);
                assert_eq!(write.infile, PathBuf::from("patch.bin"));
            }
            Mode::Read(_) => panic!("expected write mode"),
        }
    }

    #[test]
    fn test_normalize_mode_leaves_file_names_alone() {
        let normalized = normalize_mode(args(&["vmcopy", "Read", "1", "0", "1", "READ"]));
        assert_eq!(normalized, args(&["vmcopy", "read", "1", "0", "1", "READ"]));
    }

    #[test]
    fn test_usage_errors() {
        for bad in [
            &["vmcopy"][..],
            &["vmcopy", "peek", "1", "0"],
            &["vmcopy", "read", "1", "0", "16"],
            &["vmcopy", "read", "nope", "0", "16", "out.bin"],
            &["vmcopy", "read", "1", "zz", "16", "out.bin"],
            &["vmcopy", "read", "1", "0", "16x", "out.bin"],
            &["vmcopy", "-w", "0", "write", "1", "0", "in.bin"],
        ] {
            assert!(parse_args(args(bad)).is_err(), "{bad:?}");
        }
    }
}
