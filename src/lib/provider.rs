//! Command, shell command and script executors
//!
//! [`RunAsProvider`] composes the policy gate, the elevation builder, the
//! script materializer, the process runner and the output limiter into three
//! blocking operations. Executions share nothing mutable, so any number may
//! run at once from different threads; [`RunAsProvider::spawn`] runs one on
//! its own worker and hands back an [`ExecutionHandle`] to wait on.
//!
//! Policy violations and malformed requests are returned as errors. Failures
//! while executing become a failed [`ExecutionResult`] with exit code `-1`.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::elevation::{build_command, build_shell_command, Elevation};
use crate::error::RunAsError;
use crate::identity::{Identity, ProcessIdentity};
use crate::log_suppressor::LogSuppressor;
use crate::output_limiter::{limit_output, OUTPUT_BUDGET};
use crate::policy::ExecutionPolicy;
use crate::request::{decode_base64, ExecutionRequest, ExecutionResult, Operation};
use crate::runner::{Invocation, ProcessRunner, RunOutput, SystemProcessRunner};
use crate::script::{resolve_script_dir, ScriptFile};

pub struct RunAsProvider {
    policy: ExecutionPolicy,
    runner: Arc<dyn ProcessRunner>,
    identity: Arc<dyn Identity>,
    tmp_dir_warnings: LogSuppressor,
}

impl RunAsProvider {
    /// Provider running real processes as the current process identity
    pub fn new(policy: ExecutionPolicy) -> Self {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            allow_root = policy.allow_root,
            cwd = ?policy.cwd,
            chroot = ?policy.chroot_path,
            tmp_dir = %policy.tmp_dir.display(),
            "runas provider loaded"
        );
        RunAsProvider {
            policy,
            runner: Arc::new(SystemProcessRunner::new()),
            identity: Arc::new(ProcessIdentity),
            tmp_dir_warnings: LogSuppressor::default(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Validate `request` and run it through the executor for `operation`.
    pub fn execute(
        &self,
        operation: Operation,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, RunAsError> {
        let valid = request.validate()?;
        match operation {
            Operation::Command => {
                self.execute_command(&valid.body, valid.timeout_seconds, valid.elevation)
            }
            Operation::ShellCommand => self.execute_shell_command(
                &valid.body,
                valid.timeout_seconds,
                valid.elevation,
                valid.base64,
            ),
            Operation::Script => self.execute_script(
                &valid.body,
                &valid.arguments,
                valid.timeout_seconds,
                valid.elevation,
                valid.base64,
            ),
        }
    }

    /// Run `request` on a dedicated worker thread.
    pub fn spawn(self: &Arc<Self>, operation: Operation, request: ExecutionRequest) -> ExecutionHandle {
        let provider = Arc::clone(self);
        let (tx, rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name(format!("runas-{}", operation))
            .spawn(move || {
                let _ = tx.send(provider.execute(operation, &request));
            });
        if let Err(e) = &worker {
            tracing::warn!(error = %e, %operation, "could not start execution worker");
        }

        ExecutionHandle {
            rx,
            worker: worker.ok(),
        }
    }

    /// Execute a command line directly, without a shell unless elevated.
    ///
    /// On failure the partial output captured so far is kept and the error
    /// text is appended to stderr.
    pub fn execute_command(
        &self,
        command: &str,
        timeout_seconds: u32,
        elevation: Elevation,
    ) -> Result<ExecutionResult, RunAsError> {
        tracing::trace!(%elevation, timeout_seconds, "ExecuteCommand");
        self.policy.check_allowed(self.identity.as_ref())?;

        let command_line = build_command(command, elevation);
        let outcome = self
            .run(&command_line, timeout_seconds)
            .map(|output| self.finish(Operation::Command, Some(command), &command_line, output));

        settle(Operation::Command, outcome)
    }

    /// Execute a command through the shell, decoding it from base64 first
    /// when asked to.
    pub fn execute_shell_command(
        &self,
        command: &str,
        timeout_seconds: u32,
        elevation: Elevation,
        base64: bool,
    ) -> Result<ExecutionResult, RunAsError> {
        tracing::trace!(%elevation, timeout_seconds, base64, "ExecuteShellCommand");
        self.policy.check_allowed(self.identity.as_ref())?;

        let command = if base64 {
            decode_base64(command)?
        } else {
            command.to_string()
        };

        let command_line = build_shell_command(&command, elevation);
        let outcome = self.run(&command_line, timeout_seconds).map(|output| {
            self.finish(Operation::ShellCommand, Some(command.as_str()), &command_line, output)
        });

        settle(Operation::ShellCommand, outcome)
    }

    /// Materialize `script` and execute it with `arguments`.
    ///
    /// Only the script body is base64-decoded, never the arguments. Carriage
    /// returns are stripped from the body before it is written.
    pub fn execute_script(
        &self,
        script: &str,
        arguments: &str,
        timeout_seconds: u32,
        elevation: Elevation,
        base64: bool,
    ) -> Result<ExecutionResult, RunAsError> {
        tracing::trace!(%elevation, timeout_seconds, base64, "ExecuteScript");
        self.policy.check_allowed(self.identity.as_ref())?;

        let script = if base64 {
            decode_base64(script)?
        } else {
            script.to_string()
        };
        let script = script.replace('\r', "");
        tracing::trace!(script = %script, arguments, "script to execute");

        let outcome = self.run_script(&script, arguments, timeout_seconds, elevation);
        settle(Operation::Script, outcome)
    }

    fn run_script(
        &self,
        script: &str,
        arguments: &str,
        timeout_seconds: u32,
        elevation: Elevation,
    ) -> Result<ExecutionResult, RunAsError> {
        let dir = resolve_script_dir(&self.policy.tmp_dir, &self.tmp_dir_warnings);
        let file = ScriptFile::materialize(script, &dir)?;

        let command_line = build_command(&file.command_line(arguments), elevation);
        let output = self.run(&command_line, timeout_seconds)?;
        drop(file);

        Ok(self.finish(Operation::Script, None, &command_line, output))
    }

    fn run(&self, command_line: &str, timeout_seconds: u32) -> Result<RunOutput, RunAsError> {
        let invocation = Invocation::new(command_line, timeout_seconds, &self.policy);
        self.runner.run(&invocation)
    }

    /// Bound the output and build the result. `command` is named in the
    /// truncation warning; scripts pass `None` so their body stays out of
    /// warning-level logs.
    fn finish(
        &self,
        operation: Operation,
        command: Option<&str>,
        command_line: &str,
        output: RunOutput,
    ) -> ExecutionResult {
        tracing::debug!(
            %operation,
            command_line,
            exit_code = output.exit_code,
            timed_out = output.timed_out,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "process returned"
        );

        // Replacement characters are wider than the bytes they replace, so
        // the budget is applied to the converted text
        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if limit_output(&mut stdout, &mut stderr) {
            match command {
                Some(command) => tracing::warn!(
                    "{}: Exceeded maximum output size ({} bytes), output truncated. Monitoring will not be reliable! Command executed: {}",
                    operation,
                    OUTPUT_BUDGET,
                    command
                ),
                None => tracing::warn!(
                    "{}: Exceeded maximum output size ({} bytes), output truncated. Monitoring will not be reliable! Script contents logged only at trace level.",
                    operation,
                    OUTPUT_BUDGET
                ),
            }
        }

        ExecutionResult::new(output.exit_code, stdout, stderr)
    }
}

/// Fold execution-time failures into a failed result; pass other errors on.
///
/// `ExecuteCommand` keeps the partial output and appends the error to
/// stderr. The shell and script executors drop partial output and report
/// only the error text.
fn settle(
    operation: Operation,
    outcome: Result<ExecutionResult, RunAsError>,
) -> Result<ExecutionResult, RunAsError> {
    let error = match outcome {
        Err(error) if error.is_folded() => error,
        other => return other,
    };
    tracing::debug!(%operation, error = %error, kind = %error.kind(), "execution failed");

    Ok(match operation {
        Operation::Command => {
            let (stdout, stderr) = error.partial_output();
            let mut stdout = String::from_utf8_lossy(stdout).into_owned();
            let mut stderr = String::from_utf8_lossy(stderr).into_owned();
            stderr.push_str(&error.to_string());
            limit_output(&mut stdout, &mut stderr);
            ExecutionResult::failure(stdout, stderr)
        }
        Operation::ShellCommand | Operation::Script => {
            ExecutionResult::failure(String::new(), error.to_string())
        }
    })
}

/// An execution running on its own worker thread
pub struct ExecutionHandle {
    rx: Receiver<Result<ExecutionResult, RunAsError>>,
    worker: Option<JoinHandle<()>>,
}

impl ExecutionHandle {
    /// Block until the execution finishes.
    pub fn wait(self) -> Result<ExecutionResult, RunAsError> {
        let result = self.rx.recv().unwrap_or(Err(RunAsError::WorkerLost));
        if let Some(worker) = self.worker {
            let _ = worker.join();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FixedIdentity;
    use std::sync::Mutex;

    /// Runner that records invocations and replays a canned outcome
    struct CannedRunner {
        outcome: fn() -> Result<RunOutput, RunAsError>,
        seen: Mutex<Vec<Invocation>>,
    }

    impl CannedRunner {
        fn new(outcome: fn() -> Result<RunOutput, RunAsError>) -> Arc<Self> {
            Arc::new(CannedRunner {
                outcome,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Invocation> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for CannedRunner {
        fn run(&self, invocation: &Invocation) -> Result<RunOutput, RunAsError> {
            self.seen.lock().unwrap().push(invocation.clone());
            (self.outcome)()
        }
    }

    fn ok_output() -> Result<RunOutput, RunAsError> {
        Ok(RunOutput {
            exit_code: 0,
            stdout: b"ok\n".to_vec(),
            ..Default::default()
        })
    }

    fn failing_wait() -> Result<RunOutput, RunAsError> {
        Err(RunAsError::Process {
            command: "cmd".into(),
            reason: "wait failed".into(),
            stdout: b"partial out".to_vec(),
            stderr: b"partial err;".to_vec(),
        })
    }

    fn provider(runner: Arc<CannedRunner>) -> RunAsProvider {
        RunAsProvider::new(ExecutionPolicy::default())
            .with_runner(runner)
            .with_identity(Arc::new(FixedIdentity::user("omi")))
    }

    #[test]
    fn test_command_line_and_timeout_reach_runner() {
        let runner = CannedRunner::new(ok_output);
        let result = provider(runner.clone())
            .execute_command("ls -l", 7, Elevation::Sudo)
            .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.stdout, "ok\n");

        let seen = runner.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].command_line, "sudo -n /bin/sh -c 'ls -l'");
        assert_eq!(seen[0].timeout, Some(std::time::Duration::from_millis(7000)));
    }

    #[test]
    fn test_shell_command_is_wrapped() {
        let runner = CannedRunner::new(ok_output);
        provider(runner.clone())
            .execute_shell_command("echo $PATH", 1, Elevation::None, false)
            .unwrap();
        assert_eq!(runner.seen()[0].command_line, "/bin/sh -c 'echo $PATH'");
    }

    #[test]
    fn test_command_failure_keeps_partial_output() {
        let runner = CannedRunner::new(failing_wait);
        let result = provider(runner)
            .execute_command("cmd", 1, Elevation::None)
            .unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stdout, "partial out");
        assert!(result.stderr.starts_with("partial err;"));
        assert!(result.stderr.ends_with("wait failed"));
    }

    #[test]
    fn test_shell_failure_discards_partial_output() {
        let runner = CannedRunner::new(failing_wait);
        let result = provider(runner)
            .execute_shell_command("cmd", 1, Elevation::None, false)
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "failed to run \"cmd\": wait failed");
    }

    #[test]
    fn test_bad_base64_is_an_error_and_nothing_runs() {
        let runner = CannedRunner::new(ok_output);
        let err = provider(runner.clone())
            .execute_shell_command("%%%", 1, Elevation::None, true)
            .unwrap_err();
        assert!(matches!(err, RunAsError::Base64Decode(_)));
        assert!(runner.seen().is_empty());
    }

    #[test]
    fn test_output_is_limited() {
        fn huge() -> Result<RunOutput, RunAsError> {
            Ok(RunOutput {
                exit_code: 0,
                stdout: vec![b'x'; OUTPUT_BUDGET * 2],
                ..Default::default()
            })
        }
        let result = provider(CannedRunner::new(huge))
            .execute_command("yes", 1, Elevation::None)
            .unwrap();
        assert_eq!(result.stdout.len(), OUTPUT_BUDGET - 1);
    }

    #[test]
    fn test_invalid_utf8_output_stays_within_budget() {
        fn invalid_bytes() -> Result<RunOutput, RunAsError> {
            Ok(RunOutput {
                exit_code: 0,
                stdout: vec![0xFF; 100_000],
                stderr: vec![0xFE; 5000],
                ..Default::default()
            })
        }
        let result = provider(CannedRunner::new(invalid_bytes))
            .execute_command("cat blob", 1, Elevation::None)
            .unwrap();
        assert!(result.stdout.len() + result.stderr.len() <= OUTPUT_BUDGET);
        assert!(result.stdout.chars().all(|c| c == '\u{FFFD}'));
        assert!(result.stderr.len() < crate::output_limiter::STDERR_SHARE);
    }

    #[test]
    fn test_partial_output_of_failed_command_is_limited() {
        fn huge_failure() -> Result<RunOutput, RunAsError> {
            Err(RunAsError::Process {
                command: "cmd".into(),
                reason: "wait failed".into(),
                stdout: vec![b'x'; OUTPUT_BUDGET * 2],
                stderr: Vec::new(),
            })
        }
        let result = provider(CannedRunner::new(huge_failure))
            .execute_command("cmd", 1, Elevation::None)
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.stdout.len() + result.stderr.len() <= OUTPUT_BUDGET);
        assert!(result.stderr.ends_with("wait failed"));
    }

    #[test]
    fn test_spawned_execution_reports_result() {
        let runner = CannedRunner::new(ok_output);
        let provider = Arc::new(provider(runner));
        let handle = provider.spawn(Operation::Command, ExecutionRequest::new("ls", 1));
        let result = handle.wait().unwrap();
        assert_eq!(result.stdout, "ok\n");
    }
}
