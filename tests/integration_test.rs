//! Integration tests for runas-command.
//!
//! These tests verify the public API works correctly.

use runas_command::{build_command, build_shell_command, Elevation, ExecutionRequest, Operation};

mod elevation_integration_tests {
    use super::*;

    #[test]
    fn test_plain_command_passes_through() {
        assert_eq!(build_command("ls -la /tmp", Elevation::None), "ls -la /tmp");
    }

    #[test]
    fn test_elevated_command_runs_through_sudo_shell() {
        assert_eq!(
            build_command("ls -la", Elevation::Sudo),
            "sudo -n /bin/sh -c 'ls -la'"
        );
    }

    #[test]
    fn test_shell_command_wrapping() {
        assert_eq!(
            build_shell_command("echo $HOME", Elevation::None),
            "/bin/sh -c 'echo $HOME'"
        );
        assert_eq!(
            build_shell_command("echo $HOME", Elevation::Sudo),
            "sudo -n /bin/sh -c '/bin/sh -c '\\''echo $HOME'\\'''"
        );
    }

    #[test]
    fn test_elevated_command_survives_single_quotes() {
        let line = build_command("echo 'a b'", Elevation::Sudo);
        let argv = shlex::split(&line).unwrap();
        assert_eq!(argv, vec!["sudo", "-n", "/bin/sh", "-c", "echo 'a b'"]);
    }

    #[test]
    fn test_elevation_tokens() {
        assert_eq!(Elevation::from_token(None).unwrap(), Elevation::None);
        assert_eq!(Elevation::from_token(Some("")).unwrap(), Elevation::None);
        assert_eq!(Elevation::from_token(Some("SUDO")).unwrap(), Elevation::Sudo);
        assert!(Elevation::from_token(Some("su")).is_err());
    }
}

mod version_tests {
    #[test]
    fn test_cargo_version_format() {
        let version = env!("CARGO_PKG_VERSION");
        assert!(!version.is_empty());
        assert!(
            version.starts_with("0."),
            "Version should follow semver format: {}",
            version
        );
    }

    #[test]
    fn test_package_name() {
        let name = env!("CARGO_PKG_NAME");
        assert_eq!(name, "runas-command");
    }

    #[test]
    fn test_package_has_description() {
        let description = env!("CARGO_PKG_DESCRIPTION");
        assert!(!description.is_empty());
    }
}

/// Tests for public exports of the runas_command library
mod public_exports_tests {
    use super::*;
    use runas_command::{
        limit_output, ExecutionPolicy, ExecutionResult, RunAsError, DEFAULT_CONFIG_PATH,
        DEFAULT_TMP_DIR, FAILURE_EXIT_CODE, OUTPUT_BUDGET,
    };

    #[test]
    fn test_default_policy() {
        let policy = ExecutionPolicy::default();
        assert!(policy.allow_root);
        assert!(policy.cwd.is_none());
        assert!(policy.chroot_path.is_none());
        assert_eq!(policy.tmp_dir, std::path::PathBuf::from(DEFAULT_TMP_DIR));
        assert!(DEFAULT_CONFIG_PATH.ends_with("runas.conf"));
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Command.as_str(), "ExecuteCommand");
        assert_eq!(Operation::ShellCommand.as_str(), "ExecuteShellCommand");
        assert_eq!(Operation::Script.as_str(), "ExecuteScript");
    }

    #[test]
    fn test_request_round_trips_as_json() {
        let request = ExecutionRequest::new("ls", 5)
            .with_arguments("-l")
            .with_elevation("sudo");
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"timeoutSeconds\":5"));
        let back: ExecutionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_failure_result() {
        let result = ExecutionResult::failure(String::new(), "boom".into());
        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert!(!result.succeeded);
    }

    #[test]
    fn test_limit_output_export() {
        let mut stdout = "x".repeat(OUTPUT_BUDGET + 10);
        let mut stderr = String::new();
        assert!(limit_output(&mut stdout, &mut stderr));
        assert!(stdout.len() < OUTPUT_BUDGET);
    }

    #[test]
    fn test_error_display() {
        let err = RunAsError::UnsupportedElevation("doas".into());
        assert!(err.to_string().contains("doas"));
    }
}
