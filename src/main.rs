use clap::Parser;
use colored::*;
use moveonly_check::checker::{CheckOutcome, MoveOnlyChecker};
use moveonly_check::debug_println;
use moveonly_check::ir::function_file::{load_module_file, IrError};
use serde::Serialize;
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(name = "moveonly-checker")]
#[command(about = "Checks that move-only values in an IR module are consumed exactly once")]
#[command(version)]
#[command(long_about = "Move-only checker - verifies that non-copyable values in a mid-level IR module \
are used with move semantics, and reports every violation it finds.\n\n\
Environment variables:\n  \
MOVEONLY_DEBUG  : Print checker tracing to stderr (debug builds only)")]
struct Args {
    /// JSON module description to check
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,

    /// Treat the module as the whole program: hidden functions cannot be used externally
    #[arg(long)]
    whole_module: bool,

    /// Turn the pass off entirely
    #[arg(long)]
    disable_move_only: bool,

    /// Skip the missed-copy audit
    #[arg(long)]
    no_audit: bool,

    /// Only check the named function
    #[arg(long, value_name = "NAME")]
    function: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    file: String,
    diagnostic_count: usize,
    functions: &'a [CheckOutcome],
}

fn main() {
    let args = Args::parse();

    if args.format != "text" && args.format != "json" {
        eprintln!("{}: unknown output format '{}'", "Error".red().bold(), args.format);
        std::process::exit(1);
    }
    let text = args.format == "text";

    if text {
        println!("{}", "Move-Only Checker".bold().blue());
        println!("Checking: {}", args.input.display());
    }

    match check_file(&args) {
        Ok(outcomes) => {
            let total: usize = outcomes.iter().map(|o| o.diagnostics.len()).sum();
            if text {
                print_text(&args, &outcomes, total);
            } else {
                let report = JsonReport {
                    file: args.input.display().to_string(),
                    diagnostic_count: total,
                    functions: &outcomes,
                };
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("{}: {}", "Error".red().bold(), e);
                        std::process::exit(1);
                    }
                }
            }
            if total > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn check_file(args: &Args) -> Result<Vec<CheckOutcome>, IrError> {
    let loaded = load_module_file(&args.input)?;
    let mut module = loaded.module;

    let mut config = loaded.config.unwrap_or_default();
    if args.whole_module {
        config.whole_module = true;
    }
    if args.disable_move_only {
        config.move_only_enabled = false;
    }
    if args.no_audit {
        config.run_missed_copy_audit = false;
    }
    debug_println!("CHECKER: Running with {:?}", config);

    let checker = MoveOnlyChecker::new(config);
    match &args.function {
        Some(name) => {
            let function = module.function_mut(name).ok_or_else(|| IrError::UnknownFunction(name.clone()))?;
            Ok(vec![checker.check_function(function)])
        }
        None => Ok(checker.check_module(&mut module)),
    }
}

fn print_text(args: &Args, outcomes: &[CheckOutcome], total: usize) {
    if args.verbose > 0 {
        for outcome in outcomes {
            println!(
                "  {} {} ({} diagnostic(s), changed: {}, invalidates: {:?})",
                "checked".dimmed(),
                outcome.function,
                outcome.diagnostics.len(),
                outcome.made_change,
                outcome.invalidation
            );
        }
    }

    if total == 0 {
        println!("{}", "✓ moveonly: no violations found!".green());
        return;
    }

    println!(
        "{}",
        format!("✗ Found {} violation(s) in {}:", total, args.input.display()).red()
    );
    for outcome in outcomes.iter().filter(|o| o.emitted_diagnostic()) {
        for diagnostic in &outcome.diagnostics {
            let error = diagnostic.to_error(&outcome.function);
            println!("  {} [{}]", error, diagnostic.kind.code().yellow());
        }
    }
}
