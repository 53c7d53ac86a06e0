//! kfix command-line entry point.
//!
//! ## CLI Subcommands
//!
//! - `kfix-cli run <module>...` - Load test modules into the executor and run them
//! - `kfix-cli demo` - Run the built-in sample on the loopback executor
//! - `kfix-cli config show|defaults|validate` - Inspect configuration

use std::path::PathBuf;
use std::process::ExitCode;

use kfix::cli::{config_cmd, demo_cmd, run_cmd, CommonArgs, EXIT_CONFIG_ERROR, EXIT_SUCCESS};
use kfix::telemetry::{init_logging, LogError};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let rest = args.get(2..).unwrap_or(&[]);

    let code = match command {
        "run" | "demo" => run_tests(command, rest),
        "config" => run_config(rest),
        "help" | "--help" | "-h" => {
            match rest.first() {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            EXIT_SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("kfix {}", env!("CARGO_PKG_VERSION"));
            EXIT_SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            EXIT_CONFIG_ERROR
        }
    };
    ExitCode::from(code as u8)
}

fn run_tests(command: &str, rest: &[String]) -> i32 {
    let parsed = match CommonArgs::parse(rest) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e);
            print_command_help(command);
            return EXIT_CONFIG_ERROR;
        }
    };
    let cfg = match parsed.load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };
    match init_logging(&cfg.logging) {
        Ok(()) | Err(LogError::AlreadyInitialized) => {}
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    }

    if command == "demo" {
        demo_cmd::run_demo(&parsed, &cfg)
    } else {
        run_cmd::run_modules(&parsed, &cfg)
    }
}

fn run_config(rest: &[String]) -> i32 {
    let subcommand = rest.first().map(|s| s.as_str()).unwrap_or("show");
    let file = match rest.get(1..).unwrap_or(&[]) {
        [] => None,
        [flag, path] if flag == "--file" || flag == "--config" => Some(PathBuf::from(path)),
        _ => {
            print_command_help("config");
            return EXIT_CONFIG_ERROR;
        }
    };

    match subcommand {
        "show" => config_cmd::run_show(file.as_deref()),
        "defaults" => {
            config_cmd::run_defaults();
            EXIT_SUCCESS
        }
        "validate" => config_cmd::run_validate(file.as_deref()),
        _ => {
            eprintln!("Unknown config subcommand: {}", subcommand);
            print_command_help("config");
            EXIT_CONFIG_ERROR
        }
    }
}

fn print_usage() {
    eprintln!(
        "kfix - kernel-mode unit test runner v{}

USAGE:
    kfix-cli <COMMAND> [OPTIONS]

COMMANDS:
    run          Load test modules into the kernel executor and run them
    demo         Run the built-in sample module on the loopback executor
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    --json           Print the run summary as JSON
    --config FILE    Overlay a TOML configuration file
    --log-file FILE  Write logs to FILE instead of stderr

ENVIRONMENT:
    KFIX_*           See `kfix-cli config defaults`

EXIT CODES:
    0  All tests passed
    1  Test failures, incomplete fixtures or an aborted run
    2  Usage or configuration error
    3  Executor or connection error
",
        env!("CARGO_PKG_VERSION")
    );
}

fn print_command_help(command: &str) {
    match command {
        "run" => eprintln!(
            "kfix-cli run - Run test modules

USAGE:
    kfix-cli run <MODULE>... [--json] [--config FILE] [--log-file FILE]

DESCRIPTION:
    Installs and starts the executor if needed, loads each module as a
    kernel service, runs every fixture and unloads the module again.
    Requires Windows and administrative rights.
"
        ),
        "demo" => eprintln!(
            "kfix-cli demo - Run the loopback sample

USAGE:
    kfix-cli demo [--json] [--config FILE] [--log-file FILE]

DESCRIPTION:
    Runs a built-in module on an in-process executor speaking the same
    protocol as the kernel executor. Some of its tests fail on purpose.
"
        ),
        "config" => eprintln!(
            "kfix-cli config - Inspect configuration

USAGE:
    kfix-cli config <SUBCOMMAND> [--file PATH]

SUBCOMMANDS:
    show           Show the effective configuration
    defaults       Show built-in defaults
    validate       Validate a configuration file or the environment
"
        ),
        _ => eprintln!(
            "No detailed help available for '{}'. Use 'kfix-cli help' for general usage.",
            command
        ),
    }
}
