use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use sonde_utils::{init_logging, CompareSetting, SondeConfig};

mod inspect;
#[cfg(target_os = "linux")]
mod run;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Drive a checked program from decision point to decision point, snapshotting every state.
#[derive(Parser, Debug)]
#[command(name = "sonde")]
#[command(version)]
#[command(about = "Snapshot-driven driver for model checking native programs", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print what the debug-info reader finds in an executable or shared object
    Inspect
    {
        /// Path to the ELF object
        object: PathBuf,
        /// List every symbol
        #[arg(long, default_value_t = false)]
        symbols: bool,
        /// List every named type
        #[arg(long, default_value_t = false)]
        types: bool,
    },
    /// Launch a checked program and run it to completion, one transition at a time
    Run
    {
        /// Path to the checked program
        program: String,
        /// State comparison: fast (fingerprints) or exhaustive (every byte)
        #[arg(long)]
        compare: Option<CompareSetting>,
        /// Stop after this many distinct states
        #[arg(long)]
        max_states: Option<usize>,
        /// Bytes below the stack pointer captured with the stack
        #[arg(long)]
        red_zone: Option<u64>,
        /// Do not capture the stack
        #[arg(long, default_value_t = false)]
        no_stack: bool,
        /// Liveness poll tick in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
        /// Print the ranges that changed between consecutive states
        #[arg(long, default_value_t = false)]
        diff: bool,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main()
{
    // Reads RUST_LOG, SONDE_LOG_FORMAT and SONDE_LOG_FILE
    let logging_guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    let code = match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    // Flush the file log before exiting
    drop(logging_guard);
    process::exit(code);
}

/// Returns the process exit code: 0, or 2 when the checked program crashed.
fn run_command(cli: Cli) -> CliResult<i32>
{
    match cli.command {
        Commands::Inspect { object, symbols, types } => {
            inspect::inspect(&object, symbols, types)?;
            Ok(0)
        }
        Commands::Run {
            program,
            compare,
            max_states,
            red_zone,
            no_stack,
            poll_ms,
            diff,
            args,
        } => {
            let mut config = SondeConfig::from_env()?;
            if let Some(compare) = compare {
                config.compare = compare;
            }
            if max_states.is_some() {
                config.max_states = max_states;
            }
            if let Some(red_zone) = red_zone {
                config.stack_red_zone = red_zone;
            }
            if no_stack {
                config.capture_stack = false;
            }
            if let Some(millis) = poll_ms {
                config.poll_interval = std::time::Duration::from_millis(millis.max(1));
            }
            run_program(&program, &args, &config, diff)
        }
    }
}

#[cfg(target_os = "linux")]
fn run_program(program: &str, args: &[String], config: &SondeConfig, diff: bool) -> CliResult<i32>
{
    let cause = run::run(program, args, config, diff)?;
    Ok(if cause.is_crash() { 2 } else { 0 })
}

#[cfg(not(target_os = "linux"))]
fn run_program(_program: &str, _args: &[String], _config: &SondeConfig, _diff: bool) -> CliResult<i32>
{
    Err("running checked programs requires Linux (ptrace)".into())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_run_arguments_after_program_go_to_the_program()
    {
        let cli = Cli::try_parse_from([
            "sonde",
            "run",
            "--compare",
            "exhaustive",
            "./target",
            "--",
            "--verbose",
            "3",
        ])
        .unwrap();
        let Commands::Run { program, compare, args, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(program, "./target");
        assert_eq!(compare, Some(CompareSetting::Exhaustive));
        assert_eq!(args, vec!["--verbose".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_unknown_compare_mode_is_rejected()
    {
        assert!(Cli::try_parse_from(["sonde", "run", "--compare", "sloppy", "./target"]).is_err());
    }

    #[test]
    fn test_inspect_flags()
    {
        let cli = Cli::try_parse_from(["sonde", "inspect", "--types", "/bin/true"]).unwrap();
        let Commands::Inspect { object, symbols, types } = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(object, PathBuf::from("/bin/true"));
        assert!(types && !symbols);
    }
}
