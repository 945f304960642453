use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::driver::{self, ScriptReport};
use crate::sandbox::Sandbox;

#[derive(Parser)]
#[command(name = "ward")]
#[command(about = "Ward - supervised execution of untrusted Lua scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Guest instructions between budget checks (overrides config)
    #[arg(long, global = true)]
    pub quantum: Option<u32>,

    /// Instruction ceiling per script (overrides config)
    #[arg(long, global = true)]
    pub ceiling: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run scripts until each one completes, errors, or exhausts its budget
    Run {
        /// Lua script files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Delay between runs of a script, in milliseconds
        #[arg(long)]
        stagger_ms: Option<u64>,

        /// Load all scripts first and run them round-robin
        #[arg(long)]
        interleave: bool,
    },

    /// Compile scripts and report syntax errors without running them
    Check {
        /// Lua script files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let stagger_override = match &cli.command {
        Commands::Run { stagger_ms, .. } => *stagger_ms,
        _ => None,
    };

    // Load and validate configuration before touching any script
    let config = Config::builder()
        .config_path(cli.config)
        .quantum(cli.quantum)
        .ceiling(cli.ceiling)
        .stagger_ms(stagger_override)
        .build()?;

    match cli.command {
        Commands::Run {
            files, interleave, ..
        } => {
            let sandbox = Sandbox::from_config(&config.sandbox)?;
            let stagger = config.driver.stagger();

            let mut failures = 0;
            if interleave {
                let mut scripts = Vec::with_capacity(files.len());
                for path in &files {
                    scripts.push(driver::read_script(path)?);
                }
                let reports = driver::run_interleaved(&sandbox, &scripts, stagger).await;
                failures += files.len() - reports.len();
                for report in &reports {
                    print_report(report)?;
                }
            } else {
                for (path, outcome) in driver::run_files(&sandbox, &files, stagger).await {
                    match outcome {
                        Ok(report) => print_report(&report)?,
                        Err(err) => {
                            failures += 1;
                            eprintln!("{}: {:#}", path.display(), err);
                        }
                    }
                }
            }

            if failures > 0 {
                bail!("{} script(s) could not be loaded", failures);
            }
        }

        Commands::Check { files } => {
            let sandbox = Sandbox::from_config(&config.sandbox)?;

            let mut failures = 0;
            for path in &files {
                let (name, code) = driver::read_script(path)?;
                match sandbox.check_code(&code, &name) {
                    Ok(()) => println!("✓ {}", path.display()),
                    Err(err) => {
                        failures += 1;
                        println!("✗ {}: {}", path.display(), err);
                    }
                }
            }

            if failures > 0 {
                bail!("{} script(s) failed to compile", failures);
            }
        }

        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_report(report: &ScriptReport) -> Result<()> {
    println!("Script: {}", report.name);
    println!("State: {}", report.state);
    println!("Runs: {}", report.run_count);
    println!("Instructions: {}", report.instructions);
    match &report.results {
        Some(results) => println!("Results: {}", serde_json::to_string(results)?),
        None => println!("Results: undefined"),
    }
    println!();
    Ok(())
}
