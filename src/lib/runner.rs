//! Process runner
//!
//! Spawns a command line as a child process with no input, captures its
//! stdout and stderr, and enforces a wall-clock timeout. The command line is
//! split into argv with POSIX shell-word rules and executed directly; shell
//! features are only available when the line itself invokes a shell.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::mem;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::elevation::DEFAULT_SHELL;
use crate::error::RunAsError;
use crate::policy::ExecutionPolicy;

/// Exit code reported for a process killed on timeout (128 + SIGKILL)
pub const TIMEOUT_EXIT_CODE: i32 = 128 + 9;

/// Maximum bytes kept per stream; the rest is drained and dropped
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How long to wait for the pipes to close once the process is gone
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for a killed process to be reaped
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Spawn attempts when the executable is still open for writing elsewhere
const TEXT_BUSY_RETRIES: u32 = 5;
const TEXT_BUSY_DELAY: Duration = Duration::from_millis(20);

/// A command line plus the environment it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command_line: String,
    /// `None` waits without limit
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    pub chroot: Option<PathBuf>,
}

impl Invocation {
    /// Invocation under `policy`; a timeout of 0 seconds means no limit.
    pub fn new(command_line: impl Into<String>, timeout_seconds: u32, policy: &ExecutionPolicy) -> Self {
        let timeout = match timeout_seconds {
            0 => None,
            secs => Some(Duration::from_millis(u64::from(secs) * 1000)),
        };
        Invocation {
            command_line: command_line.into(),
            timeout,
            cwd: policy.cwd.clone(),
            chroot: policy.chroot_path.clone(),
        }
    }
}

/// What a finished (or killed) process produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Executes invocations. Implementations must be usable from many threads
/// at once.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<RunOutput, RunAsError>;
}

/// Runs invocations as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<RunOutput, RunAsError> {
        let command_line = invocation.command_line.as_str();
        let argv = split_command_line(command_line)?;

        let mut child = spawn(&argv, invocation).map_err(|e| {
            RunAsError::process(command_line, format!("unable to start {}: {}", argv[0], e))
        })?;

        // Drain both pipes while waiting, or a chatty child blocks on a full
        // pipe buffer and never exits
        let stdout = StreamCapture::start(child.stdout.take());
        let stderr = StreamCapture::start(child.stderr.take());

        let waited = match invocation.timeout {
            Some(limit) => child.wait_timeout(limit),
            None => child.wait().map(Some),
        };

        match waited {
            Ok(Some(status)) => {
                // A backgrounded descendant may keep the pipes open long after
                // the child is gone; take what arrived within the grace window
                let deadline = collection_deadline(invocation.timeout);
                Ok(RunOutput {
                    exit_code: exit_code(status),
                    stdout: stdout.take(deadline),
                    stderr: stderr.take(deadline),
                    timed_out: false,
                })
            }
            Ok(None) => {
                kill_process_group(&mut child);
                let deadline = collection_deadline(invocation.timeout);
                let stdout = stdout.take(deadline);
                let mut stderr = stderr.take(deadline);
                let secs = invocation.timeout.map_or(0, |t| t.as_secs());
                if !stderr.is_empty() && !stderr.ends_with(b"\n") {
                    stderr.push(b'\n');
                }
                stderr.extend_from_slice(format!("[process killed after {}s timeout]\n", secs).as_bytes());
                tracing::debug!(command = command_line, secs, "process timed out");

                Ok(RunOutput {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout,
                    stderr,
                    timed_out: true,
                })
            }
            Err(e) => {
                kill_process_group(&mut child);
                let deadline = collection_deadline(invocation.timeout);
                Err(RunAsError::Process {
                    command: command_line.to_string(),
                    reason: format!("waiting for process failed: {}", e),
                    stdout: stdout.take(deadline),
                    stderr: stderr.take(deadline),
                })
            }
        }
    }
}

/// Split a command line into argv using POSIX shell-word rules
pub fn split_command_line(command_line: &str) -> Result<Vec<String>, RunAsError> {
    match shlex::split(command_line) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        Some(_) => Err(RunAsError::process(command_line, "empty command line")),
        None => Err(RunAsError::process(command_line, "unbalanced quoting in command line")),
    }
}

fn spawn(argv: &[String], invocation: &Invocation) -> io::Result<Child> {
    match spawn_retrying_busy(argv, invocation) {
        // No interpreter line: run it through the shell, as execvp would
        Err(e) if is_os_error(&e, ENOEXEC) => {
            let mut shell_argv = Vec::with_capacity(argv.len() + 1);
            shell_argv.push(DEFAULT_SHELL.to_string());
            shell_argv.extend(argv.iter().cloned());
            spawn_retrying_busy(&shell_argv, invocation)
        }
        other => other,
    }
}

fn spawn_retrying_busy(argv: &[String], invocation: &Invocation) -> io::Result<Child> {
    let mut attempt = 0;
    loop {
        match command_for(argv, invocation)?.spawn() {
            Err(e) if is_os_error(&e, ETXTBSY) && attempt < TEXT_BUSY_RETRIES => {
                attempt += 1;
                thread::sleep(TEXT_BUSY_DELAY * attempt);
            }
            other => return other,
        }
    }
}

fn command_for(argv: &[String], invocation: &Invocation) -> io::Result<Command> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    configure_child(&mut cmd, invocation)?;

    #[cfg(not(unix))]
    if let Some(cwd) = &invocation.cwd {
        cmd.current_dir(cwd);
    }

    Ok(cmd)
}

/// Own process group for the child; change-root then working directory.
#[cfg(unix)]
fn configure_child(cmd: &mut Command, invocation: &Invocation) -> io::Result<()> {
    use std::os::unix::process::CommandExt;

    let chroot = match &invocation.chroot {
        Some(root) => {
            let dir = invocation.cwd.as_deref().unwrap_or_else(|| Path::new("/"));
            Some((path_cstring(root)?, path_cstring(dir)?))
        }
        None => {
            if let Some(cwd) = &invocation.cwd {
                cmd.current_dir(cwd);
            }
            None
        }
    };

    // SAFETY: the hook runs between fork and exec and only makes
    // async-signal-safe libc calls on pre-built C strings
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            if let Some((root, dir)) = &chroot {
                if libc::chroot(root.as_ptr()) == -1 || libc::chdir(dir.as_ptr()) == -1 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    Ok(())
}

#[cfg(unix)]
fn path_cstring(path: &Path) -> io::Result<std::ffi::CString> {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(unix)]
const ENOEXEC: i32 = libc::ENOEXEC;
#[cfg(unix)]
const ETXTBSY: i32 = libc::ETXTBSY;
#[cfg(not(unix))]
const ENOEXEC: i32 = -1;
#[cfg(not(unix))]
const ETXTBSY: i32 = -1;

fn is_os_error(error: &io::Error, code: i32) -> bool {
    error.raw_os_error() == Some(code)
}

/// Exit code, or 128 + signal for a child killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Kill the child and everything in its process group, then reap it
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pid) = i32::try_from(child.id()) {
        // SAFETY: signalling a process group we created has no memory effects
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    // Errors here mean the process already exited
    let _ = child.kill();
    if !matches!(child.wait_timeout(KILL_GRACE), Ok(Some(_))) {
        tracing::warn!(pid = child.id(), "killed process did not exit");
    }
}

/// One output stream, filled by a reader thread as data arrives
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    finished: Receiver<()>,
}

impl StreamCapture {
    fn start<R: Read + Send + 'static>(stream: Option<R>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, finished) = mpsc::channel();
        // Without a stream the sender is dropped and `finished` disconnects
        if let Some(stream) = stream {
            let sink = Arc::clone(&buffer);
            thread::spawn(move || {
                read_capped(stream, &sink);
                let _ = tx.send(());
            });
        }
        StreamCapture { buffer, finished }
    }

    /// Wait for end of stream until `deadline`, then take what was read.
    fn take(self, deadline: Instant) -> Vec<u8> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let _ = self.finished.recv_timeout(remaining);
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        mem::take(&mut *buffer)
    }
}

/// Shared deadline for collecting both streams once the child is gone,
/// never longer than the invocation's own timeout
fn collection_deadline(timeout: Option<Duration>) -> Instant {
    let grace = timeout.map_or(OUTPUT_GRACE, |limit| limit.min(OUTPUT_GRACE));
    Instant::now() + grace
}

/// Read a stream to its end into `sink`, keeping at most
/// [`MAX_CAPTURE_BYTES`]
fn read_capped<R: Read>(mut stream: R, sink: &Mutex<Vec<u8>>) {
    let mut chunk = [0u8; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let mut buf = sink.lock().unwrap_or_else(PoisonError::into_inner);
                let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}
