//! runas CLI
//!
//! Executes one command, shell command or script under the configured
//! execution policy and prints the result as JSON:
//! - `command`: run the command line directly
//! - `shell`: run the command through /bin/sh
//! - `script`: write the script to a temp file and run it with arguments

use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use runas_command::{
    policy::DEFAULT_CONFIG_PATH, ExecutionPolicy, ExecutionRequest, Operation, RunAsProvider,
};
use tracing_subscriber::EnvFilter;

/// Configuration from environment variables
struct Config {
    /// Path of the policy file
    config_path: PathBuf,
    /// Log filter directives
    log_filter: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            config_path: env::var("RUNAS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_filter: env::var("RUNAS_LOG").unwrap_or_else(|_| "warn".to_string()),
        }
    }
}

/// Parsed command line
#[derive(Debug, PartialEq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    operation: Operation,
    request: ExecutionRequest,
    /// Read the request as JSON from stdin instead of the arguments
    request_from_stdin: bool,
}

fn main() {
    let config = Config::from_env();
    init_logging(&config.log_filter);

    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        print_usage();
        process::exit(0);
    }
    if args[0] == "--version" || args[0] == "-v" {
        println!("runas version: {}", env!("CARGO_PKG_VERSION"));
        process::exit(0);
    }

    let mut parsed = match parse_args(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            process::exit(2);
        }
    };

    if parsed.request_from_stdin {
        parsed.request = match read_request(io::stdin()) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(2);
            }
        };
    }

    let config_path = parsed.config_path.unwrap_or(config.config_path);
    let policy = match ExecutionPolicy::load(&config_path) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    let provider = RunAsProvider::new(policy);
    match provider.execute(parsed.operation, &parsed.request) {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error: could not serialize result: {}", e);
                    process::exit(2);
                }
            }
            process::exit(if result.succeeded { 0 } else { 1 });
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    }
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_usage() {
    println!("Usage: runas [options] <command|shell|script> <body> [-- <script arguments...>]");
    println!();
    println!("Options:");
    println!("  --config <path>        Policy file (default: {})", DEFAULT_CONFIG_PATH);
    println!("  --timeout <seconds>    Timeout in seconds, 0 for none (required)");
    println!("  --elevation <type>     Elevation type: \"\" or sudo");
    println!("  --base64               Body is base64 encoded (shell and script only)");
    println!("  --stdin                Read the request as JSON from stdin");
    println!("  --version, -v          Show version");
    println!();
    println!("Environment:");
    println!("  RUNAS_CONFIG           Policy file path");
    println!("  RUNAS_LOG              Log filter (default: warn)");
    println!("  RUNAS_ALLOW_ROOT, RUNAS_CWD, RUNAS_CHROOT, RUNAS_TMPDIR override the policy");
}

fn parse_operation(name: &str) -> Result<Operation, String> {
    match name {
        "command" => Ok(Operation::Command),
        "shell" => Ok(Operation::ShellCommand),
        "script" => Ok(Operation::Script),
        other => Err(format!(
            "Unknown operation: {} (expected command, shell or script)",
            other
        )),
    }
}

/// Parse command line arguments into an operation and request
fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut config_path = None;
    let mut request = ExecutionRequest::default();
    let mut request_from_stdin = false;
    let mut operation = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--config" | "--timeout" | "--elevation" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| format!("Option {} requires a value", arg))?;
                match arg {
                    "--config" => config_path = Some(PathBuf::from(value)),
                    "--timeout" => {
                        let secs = value
                            .parse::<u32>()
                            .map_err(|_| format!("Invalid timeout: {}", value))?;
                        request.timeout_seconds = Some(secs);
                    }
                    _ => request.elevation = Some(value.clone()),
                }
                i += 2;
            }
            "--base64" => {
                request.is_base64_encoded = Some(true);
                i += 1;
            }
            "--stdin" => {
                request_from_stdin = true;
                i += 1;
            }
            _ if arg.starts_with("--") => return Err(format!("Unknown option: {}", arg)),
            _ => {
                operation = Some(parse_operation(arg)?);
                i += 1;
                break;
            }
        }
    }

    let operation = operation.ok_or_else(|| "No operation provided".to_string())?;
    let rest = &args[i..];

    if !request_from_stdin {
        let (body, script_args) = match rest.iter().position(|a| a == "--") {
            Some(sep) => (&rest[..sep], Some(&rest[sep + 1..])),
            None => (rest, None),
        };
        if !body.is_empty() {
            request.body = Some(body.join(" "));
        }
        if let Some(script_args) = script_args {
            request.arguments = Some(script_args.join(" "));
        }
    }

    Ok(CliArgs {
        config_path,
        operation,
        request,
        request_from_stdin,
    })
}

fn read_request<R: Read>(mut input: R) -> Result<ExecutionRequest, String> {
    let mut content = String::new();
    input
        .read_to_string(&mut content)
        .map_err(|e| format!("Could not read request: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid request JSON: {}", e))
}
