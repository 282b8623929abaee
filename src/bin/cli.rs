use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use alertlint::checks::{catalogue, Severity};
use alertlint::config::Config;
use alertlint::error::LintError;
use alertlint::reporter::{self, OutputFormat};
use alertlint::ScanOptions;

const DEFAULT_CONFIG: &str = ".alertlint.toml";

#[derive(Parser)]
#[command(
    name = "alertlint",
    about = "Linter for Prometheus alerting and recording rules",
    version,
    author
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check rule files and report problems
    Lint {
        /// Rule files, directories or glob patterns
        #[arg(default_value = ".")]
        paths: Vec<String>,

        /// Config file path
        #[arg(long, short = 'c', default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Only run these checks (repeatable)
        #[arg(long)]
        enabled: Vec<String>,

        /// Never run these checks (repeatable)
        #[arg(long)]
        disabled: Vec<String>,

        /// Number of concurrent check workers
        #[arg(long, default_value_t = 10)]
        workers: usize,

        /// Output format (console, json)
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        /// Minimum severity to fail (information, warning, bug, fatal)
        #[arg(long, default_value = "bug")]
        fail_on: String,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Config file path
        #[arg(long, short = 'c', default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// List all available checks
    ListChecks {
        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .alertlint.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = init_logging(&cli.log_level).and_then(|()| match cli.command {
        Commands::Lint {
            paths,
            config,
            enabled,
            disabled,
            workers,
            format,
            fail_on,
            output,
        } => cmd_lint(
            paths,
            config,
            ScanOptions {
                workers,
                enabled,
                disabled,
            },
            format,
            fail_on,
            output,
        ),
        Commands::Config { config } => cmd_config(config),
        Commands::ListChecks { format } => cmd_list_checks(format),
        Commands::Init { force } => cmd_init(force),
    });

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_logging(level: &str) -> Result<(), LintError> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| LintError::Config(format!("invalid log level '{}'", level)))?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|e| LintError::Config(format!("failed to set up logging: {}", e)))
}

fn cmd_lint(
    paths: Vec<String>,
    config_path: PathBuf,
    options: ScanOptions,
    format_str: String,
    fail_on_str: String,
    output_path: Option<PathBuf>,
) -> Result<i32, LintError> {
    let format = OutputFormat::from_str_lenient(&format_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", format_str);
        OutputFormat::Console
    });

    let fail_on = Severity::from_str_lenient(&fail_on_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown severity '{}', using bug", fail_on_str);
        Severity::Bug
    });

    let config = Config::load(&config_path)?;
    let summary = alertlint::lint(&paths, &config, &options)?;
    let verdict = summary.verdict(fail_on);
    let rendered = reporter::render(&summary, &verdict, format)?;

    match output_path {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 0 = pass, 1 = problems at or above threshold
    Ok(if verdict.pass { 0 } else { 1 })
}

fn cmd_config(config_path: PathBuf) -> Result<i32, LintError> {
    let config = Config::load(&config_path)?;
    print!("{}", config.to_toml()?);
    Ok(0)
}

fn cmd_list_checks(format_str: String) -> Result<i32, LintError> {
    let checks = catalogue();

    match format_str.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&checks)?;
            println!("{}", json);
        }
        _ => {
            println!("{:<20} {:<12} {:<8} DESCRIPTION", "ID", "SEVERITY", "ONLINE");
            println!("{}", "-".repeat(80));
            for check in &checks {
                println!(
                    "{:<20} {:<12} {:<8} {}",
                    check.id,
                    check.default_severity.to_string(),
                    if check.online { "yes" } else { "no" },
                    check.description,
                );
            }
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32, LintError> {
    let path = PathBuf::from(DEFAULT_CONFIG);

    if path.exists() && !force {
        eprintln!("{} already exists. Use --force to overwrite.", DEFAULT_CONFIG);
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created {}", DEFAULT_CONFIG);

    Ok(0)
}
