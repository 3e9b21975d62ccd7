//! Run desktop helper commands (screen capture, input injection) under a
//! deadline, with stdout and stderr drained concurrently and bounded in memory.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// A stream read up to a limit; `dropped` counts the bytes discarded past it.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: u64,
}

type Reader = JoinHandle<io::Result<Captured>>;

/// Run `argv` and return its stdout.
///
/// Fails when the command cannot start, outlives `timeout` (it is killed),
/// exits unsuccessfully or writes more than `limit` bytes to stdout. The
/// failure message for a non-zero exit carries the command's stderr.
#[instrument(skip_all, fields(program = argv.first().map(String::as_str), timeout_ms = timeout.as_millis() as u64))]
pub fn run_argv_checked(argv: &[String], timeout: Duration, limit: usize) -> Result<Vec<u8>> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {program}"))?;
    let (stdout, stderr) = drain(&mut child, limit)?;

    let Some(status) = wait(&mut child, timeout)? else {
        warn!(%program, "command timed out, killed");
        bail!("{program} timed out after {timeout:?}");
    };
    let stdout = collect(stdout).context("read stdout")?;
    let stderr = collect(stderr).context("read stderr")?;
    debug!(%program, exit_code = ?status.code(), bytes = stdout.bytes.len(), "command finished");

    if !status.success() {
        bail!(
            "{program} failed with status {:?}: {}",
            status.code(),
            String::from_utf8_lossy(&stderr.bytes).trim()
        );
    }
    if stdout.dropped > 0 {
        bail!(
            "{program} output exceeded {limit} bytes ({} dropped)",
            stdout.dropped
        );
    }
    Ok(stdout.bytes)
}

fn drain(child: &mut Child, limit: usize) -> Result<(Reader, Reader)> {
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    Ok((
        thread::spawn(move || read_bounded(stdout, limit)),
        thread::spawn(move || read_bounded(stderr, limit)),
    ))
}

/// Exit status, or `None` after killing a child that overran `timeout`.
fn wait(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok(Some(status));
    }
    child.kill().context("kill command")?;
    child.wait().context("reap killed command")?;
    Ok(None)
}

fn collect(reader: Reader) -> Result<Captured> {
    reader
        .join()
        .map_err(|_| anyhow!("output reader panicked"))?
        .map_err(Into::into)
}

/// Keep the first `limit` bytes, then keep draining so the child never blocks
/// on a full pipe.
fn read_bounded<R: Read>(reader: R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    let mut rest = reader.take(limit as u64);
    rest.read_to_end(&mut bytes)?;
    let dropped = io::copy(&mut rest.into_inner(), &mut io::sink())?;
    Ok(Captured { bytes, dropped })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn captures_stdout_of_successful_command() {
        let out = run_argv_checked(
            &argv(&["sh", "-c", "printf 'X=1 Y=2'"]),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(out, b"X=1 Y=2");
    }

    #[test]
    fn reports_non_zero_exit_with_stderr() {
        let err = run_argv_checked(
            &argv(&["sh", "-c", "echo nope >&2; exit 3"]),
            Duration::from_secs(5),
            1024,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("Some(3)"), "{msg}");
        assert!(msg.contains("nope"), "{msg}");
    }

    #[test]
    fn kills_commands_that_overrun() {
        let err = run_argv_checked(
            &argv(&["sh", "-c", "sleep 5"]),
            Duration::from_millis(100),
            1024,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn rejects_oversized_output() {
        let err = run_argv_checked(
            &argv(&["sh", "-c", "printf 0123456789"]),
            Duration::from_secs(5),
            4,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeded 4 bytes (6 dropped)"));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = run_argv_checked(
            &argv(&["pilot-no-such-helper"]),
            Duration::from_secs(1),
            16,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn pilot-no-such-helper"));
    }

    #[test]
    fn rejects_empty_argv() {
        let err = run_argv_checked(&[], Duration::from_secs(1), 16).unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }
}
