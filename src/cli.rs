//! Command-line interface for hdlcheck.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config};
use crate::daemon::{self, Evaluator};
use crate::facts::{self, Delta, Tables};
use crate::policy::{CheckRegistry, Engine, EvalCache};
use crate::report;
use crate::resolve::{DependentsGraph, Indexer, LibraryMap};
use crate::schema::{self, Side};

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "HDLCHECK_LOG";

const STARTER_CONFIG: &str = include_str!("templates/hdlcheck.yaml");

/// Incremental design model and policy engine for VHDL projects.
///
/// hdlcheck reads per-file facts produced by a VHDL extractor, resolves
/// libraries, symbols and dependencies across the whole project, and checks
/// the resulting design model against a set of policy rules.
#[derive(Parser)]
#[command(name = "hdlcheck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate the policy rules over extracted facts
    #[command(visible_alias = "check")]
    Lint(LintArgs),
    /// Build and print the normalized fact tables
    Tables(TablesArgs),
    /// Print the delta between two table snapshots
    Delta(DeltaArgs),
    /// Serve NDJSON init/delta/snapshot requests on stdin/stdout
    Daemon(DaemonArgs),
    /// List the files affected by a change to one file
    Impact(ImpactArgs),
    /// Write a starter hdlcheck.yaml
    Init(InitArgs),
}

/// Arguments for the lint command.
#[derive(Parser)]
pub struct LintArgs {
    /// Fact files (.json, .ndjson) or directories containing them
    #[arg(required = true)]
    pub facts: Vec<PathBuf>,

    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: pretty, json, or sarif
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Skip the evaluation cache
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments for the tables command.
#[derive(Parser)]
pub struct TablesArgs {
    /// Fact files (.json, .ndjson) or directories containing them
    #[arg(required = true)]
    pub facts: Vec<PathBuf>,

    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the delta command.
#[derive(Parser)]
pub struct DeltaArgs {
    /// Previous tables snapshot
    pub old: PathBuf,
    /// New tables snapshot
    pub new: PathBuf,
}

/// Arguments for the daemon command.
#[derive(Parser)]
pub struct DaemonArgs {
    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Skip the on-disk evaluation cache
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments for the impact command.
#[derive(Parser)]
pub struct ImpactArgs {
    /// Design file whose dependents to list, as named in the facts
    pub file: String,

    /// Fact files (.json, .ndjson) or directories containing them
    #[arg(required = true)]
    pub facts: Vec<PathBuf>,

    /// Path to config YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the levels as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "hdlcheck.yaml")]
    pub output: PathBuf,
}

/// Install the stderr log subscriber. Stdout carries reports and NDJSON.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Load the given config, or discover one in the current directory, or fall
/// back to the defaults.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => Config::discover(Path::new(".")),
    };
    let config = match &path {
        Some(p) => {
            tracing::debug!(path = %p.display(), "loading config");
            Config::parse_file(p)?
        }
        None => Config::default(),
    };
    config::validate(&config).map_err(|e| anyhow::anyhow!("invalid config: {}", e))?;
    Ok(config)
}

/// Load fact documents and build resolved tables. Returns the tables and the
/// number of design files that went into them.
fn build_tables(paths: &[PathBuf], config: &Config) -> anyhow::Result<(Tables, usize)> {
    let files = facts::collect_fact_files(paths)?;
    let mut documents = facts::load_all(&files)?;
    documents.retain(|doc| {
        let excluded = config.is_path_excluded(&doc.path);
        if excluded {
            tracing::debug!(path = %doc.path, "excluded by config");
        }
        !excluded
    });

    let libraries = LibraryMap::from_config(config)?;
    let tables = Indexer::new(libraries).build(&documents);
    Ok((tables, documents.len()))
}

fn build_engine(config: &Config, no_cache: bool) -> anyhow::Result<Engine> {
    let registry = CheckRegistry::resolve(config.check_registry.as_deref())?;
    let engine = Engine::new(registry);
    if config.cache.enabled && !no_cache {
        Ok(engine.with_cache(EvalCache::with_dir(config.cache.dir.clone())))
    } else {
        Ok(engine)
    }
}

fn read_tables(path: &Path) -> anyhow::Result<Tables> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    let mut tables: Tables = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("invalid tables in {}: {}", path.display(), e))?;
    schema::validate_tables(&tables, Side::Tables)?;
    tables.normalize();
    Ok(tables)
}

/// Run the lint command.
pub fn run_lint(args: &LintArgs) -> anyhow::Result<i32> {
    if args.format != "pretty" && args.format != "json" && args.format != "sarif" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty', 'json', or 'sarif'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let config = load_config(args.config.as_deref())?;
    let rule_config = config.rule_config()?;
    let (tables, files_analyzed) = build_tables(&args.facts, &config)?;

    if files_analyzed == 0 {
        eprintln!("Warning: no fact documents to evaluate");
        return Ok(EXIT_SUCCESS);
    }

    let engine = build_engine(&config, args.no_cache)?;
    let result = engine.evaluate(&tables, &rule_config);

    let path_str = args
        .facts
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(", ");
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.format.as_str() {
        "json" => report::write_json(&mut out, &path_str, files_analyzed, &result)?,
        "sarif" => {
            let base = std::env::current_dir().unwrap_or_default();
            report::write_sarif(&mut out, &base, &result)?
        }
        _ => report::write_pretty(&mut out, &path_str, files_analyzed, &result)?,
    }
    out.flush()?;

    if result.has_errors() {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Run the tables command.
pub fn run_tables(args: &TablesArgs) -> anyhow::Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let (tables, _) = build_tables(&args.facts, &config)?;
    schema::validate_tables(&tables, Side::Tables)?;
    schema::validate_references(&tables, Side::Tables)?;

    let json = serde_json::to_string_pretty(&tables)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json + "\n")
                .map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))?;
            eprintln!("Wrote {} rows to {}", tables.row_count(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(EXIT_SUCCESS)
}

/// Run the delta command.
pub fn run_delta(args: &DeltaArgs) -> anyhow::Result<i32> {
    let old = read_tables(&args.old)?;
    let new = read_tables(&args.new)?;
    let delta = Delta::compute(&old, &new);
    tracing::info!(
        added = delta.added.row_count(),
        removed = delta.removed.row_count(),
        "computed delta"
    );
    println!("{}", serde_json::to_string_pretty(&delta)?);
    Ok(EXIT_SUCCESS)
}

/// Run the daemon command until stdin closes.
pub fn run_daemon(args: &DaemonArgs) -> anyhow::Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let rule_config = config.rule_config()?;
    let engine = build_engine(&config, args.no_cache)?;
    let mut evaluator = Evaluator::new(engine, rule_config);

    tracing::info!("daemon ready");
    let stdin = io::stdin();
    let stdout = io::stdout();
    daemon::serve(&mut evaluator, stdin.lock(), BufWriter::new(stdout.lock()))?;
    tracing::info!(
        evaluations = evaluator.engine().evaluation_count(),
        "daemon input closed"
    );
    Ok(EXIT_SUCCESS)
}

/// Run the impact command.
pub fn run_impact(args: &ImpactArgs) -> anyhow::Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let (tables, _) = build_tables(&args.facts, &config)?;

    if !tables.files.iter().any(|f| f.path == args.file) {
        eprintln!("Error: {} is not part of the loaded facts", args.file);
        return Ok(EXIT_ERROR);
    }

    let levels = DependentsGraph::build(&tables).impact(&args.file);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&levels)?);
        return Ok(EXIT_SUCCESS);
    }

    if levels.is_empty() {
        println!("No files depend on {}", args.file);
        return Ok(EXIT_SUCCESS);
    }
    println!("Files affected by {}:", args.file);
    for (depth, files) in levels.iter().enumerate() {
        println!("  {}: {}", depth + 1, files.join(", "));
    }
    Ok(EXIT_SUCCESS)
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.output.exists() {
        eprintln!("Error: file already exists: {}", args.output.display());
        eprintln!("Remove it or use --output to specify a different path");
        return Ok(EXIT_ERROR);
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() && parent != Path::new(".") {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Error: failed to create directory: {}", e);
                return Ok(EXIT_ERROR);
            }
        }
    }

    if let Err(e) = fs::write(&args.output, STARTER_CONFIG) {
        eprintln!("Error: failed to write config: {}", e);
        return Ok(EXIT_ERROR);
    }

    println!("Created {}", args.output.display());
    println!();
    println!("Next steps:");
    println!("  1. Map your design files to libraries in {}", args.output.display());
    println!("  2. Run: hdlcheck lint <facts-dir> --config {}", args.output.display());

    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_config_is_valid() {
        let config: Config = serde_yaml::from_str(STARTER_CONFIG).unwrap();
        assert!(config::validate(&config).is_ok());
        assert_eq!(config.libraries[0].name, "mylib");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["hdlcheck", "lint", "facts/", "--format", "json", "--no-cache"]).unwrap();
        match cli.command {
            Commands::Lint(args) => {
                assert_eq!(args.facts, vec![PathBuf::from("facts/")]);
                assert_eq!(args.format, "json");
                assert!(args.no_cache);
            }
            _ => panic!("expected lint"),
        }

        let cli = Cli::try_parse_from(["hdlcheck", "impact", "rtl/pkg.vhd", "facts/"]).unwrap();
        assert!(matches!(cli.command, Commands::Impact(ref a) if a.file == "rtl/pkg.vhd"));

        assert!(Cli::try_parse_from(["hdlcheck", "lint"]).is_err());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("cfg/hdlcheck.yaml");
        let args = InitArgs {
            output: output.clone(),
        };
        assert_eq!(run_init(&args).unwrap(), EXIT_SUCCESS);
        assert!(output.is_file());
        assert_eq!(run_init(&args).unwrap(), EXIT_ERROR);
    }

    #[test]
    fn test_build_tables_honours_excluded_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("facts.ndjson"),
            concat!(
                r#"{"path": "rtl/cpu.vhd", "entities": [{"name": "cpu", "line": 1}]}"#,
                "\n",
                r#"{"path": "rtl/sim/tb.vhd", "entities": [{"name": "tb", "line": 1}]}"#,
                "\n"
            ),
        )
        .unwrap();
        let config: Config = serde_yaml::from_str("excluded_paths: [\"**/sim/**\"]").unwrap();
        let (tables, count) = build_tables(&[dir.path().to_path_buf()], &config).unwrap();
        assert_eq!(count, 1);
        assert_eq!(tables.entities.len(), 1);
        assert_eq!(tables.entities[0].name, "cpu");
    }
}
