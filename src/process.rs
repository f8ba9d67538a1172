//! Run one external program with a wall-clock budget.
//!
//! The child gets its own process group so a timeout can take down any helper
//! processes it spawned. The group is also killed once the leader exits, so a
//! stray helper holding the output pipes cannot stall the run. Output pipes are
//! drained on background threads to keep a chatty tool from blocking on a full
//! pipe.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{RecompressError, Result};
use crate::telemetry::{Phase, ProcessObserver, Sample};

const MIN_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_millis(250);

/// A program that ran to completion, successfully or not.
#[derive(Debug, Clone)]
pub struct Finished {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Stdout followed by stderr, decoded lossily.
    pub output: String,
    pub elapsed: Duration,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone)]
pub enum Completion {
    Finished(Finished),
    /// Budget expired; the process group has been killed and reaped.
    TimedOut { elapsed: Duration, output: String },
}

/// Substitute `{inp}` and `{out}` anywhere inside each argument.
pub fn render_args(template: &[String], input: &Path, output: &Path) -> Vec<String> {
    let inp = input.to_string_lossy();
    let out = output.to_string_lossy();
    template
        .iter()
        .map(|arg| arg.replace("{inp}", &inp).replace("{out}", &out))
        .collect()
}

pub fn run_with_timeout(
    program: &Path,
    args: &[String],
    timeout: Duration,
    observer: Option<(&dyn ProcessObserver, Phase)>,
) -> Result<Completion> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    debug!(program = %program.display(), ?args, timeout_secs = timeout.as_secs(), "spawning");
    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| RecompressError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let observation = observer.and_then(|(o, phase)| o.observe(phase, child.id()));

    // Budgets past the end of the clock never expire.
    let deadline = start.checked_add(timeout);
    let mut delay = MIN_POLL;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                kill_group(&child);
                break Some(status);
            }
            Ok(None) => {}
            Err(e) => {
                terminate(&mut child);
                return Err(e.into());
            }
        }
        let now = Instant::now();
        let nap = match deadline {
            Some(deadline) if now >= deadline => {
                terminate(&mut child);
                break None;
            }
            Some(deadline) => delay.min(deadline - now),
            None => delay,
        };
        thread::sleep(nap);
        delay = (delay * 2).min(MAX_POLL);
    };
    let elapsed = start.elapsed();
    let samples = observation.map(|o| o.finish()).unwrap_or_default();
    let output = collect(stdout, stderr);

    Ok(match status {
        Some(status) => Completion::Finished(Finished {
            success: status.success(),
            code: status.code(),
            output,
            elapsed,
            samples,
        }),
        None => Completion::TimedOut { elapsed, output },
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf) {
            debug!(error = %e, "output pipe closed early");
        }
        buf
    })
}

fn collect(stdout: Option<JoinHandle<Vec<u8>>>, stderr: Option<JoinHandle<Vec<u8>>>) -> String {
    let mut bytes = Vec::new();
    for handle in [stdout, stderr].into_iter().flatten() {
        match handle.join() {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(_) => warn!("output reader thread panicked"),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// SIGKILL every process left in the child's group.
///
/// An empty group (ESRCH) is the normal case after a clean exit.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal; the group id is the child's own
    // pid because it was spawned with process_group(0).
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pgid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Kill the child's whole process group, then reap the child itself.
fn terminate(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.kill() {
        debug!(error = %e, "child already gone");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap timed-out child");
    }
}
