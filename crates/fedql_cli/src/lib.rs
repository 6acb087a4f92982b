//! Command-line interface for fedql.
//!
//! # Usage
//!
//! ```bash
//! # Validate query files
//! fedql validate queries/hero.fedql
//!
//! # Format a query file in place
//! fedql fmt --write queries/hero.fedql
//!
//! # Run a query against a mappings file
//! fedql run queries/hero.fedql --mappings mappings.json --param id=1
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use fedql_core::Value;
use fedql_runtime::{
    project, HttpTransport, Query, QueryContext, QueryError, QueryInput, Runner, TransportConfig,
};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fedql")]
#[command(author, version, about = "Federated query engine", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check query files for syntax and semantic errors
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Format query files
    #[command(alias = "format")]
    Fmt {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Rewrite files instead of printing to stdout
        #[arg(long)]
        write: bool,

        /// Exit non-zero if any file is not already formatted
        #[arg(long)]
        check: bool,
    },

    /// Run a query file against a resource mappings file
    Run {
        /// Query file
        file: PathBuf,

        /// JSON file mapping resource names to URL templates
        #[arg(short, long)]
        mappings: PathBuf,

        /// Input parameter, repeatable: --param id=1 --param id=2
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Tenant name attached to the execution
        #[arg(short, long, default_value = "local")]
        tenant: String,

        /// Query deadline in milliseconds
        #[arg(long, default_value = "30000")]
        timeout: u64,
    },
}

/// Runs the CLI and returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    match cli.command {
        Commands::Validate { files } => validate(&files),
        Commands::Fmt {
            files,
            write,
            check,
        } => fmt(&files, write, check),
        Commands::Run {
            file,
            mappings,
            params,
            tenant,
            timeout,
        } => run_query(&file, &mappings, &params, tenant, timeout).await,
    }
}

fn validate(files: &[PathBuf]) -> i32 {
    let mut failed = false;

    for file in files {
        let source = match std::fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{} {}: {e}", "error".red().bold(), file.display());
                failed = true;
                continue;
            }
        };

        match Query::parse(&source) {
            Ok(_) => println!("{} {}", "ok".green().bold(), file.display()),
            Err(err) => {
                eprintln!("{} {}: {err}", "error".red().bold(), file.display());
                failed = true;
            }
        }
    }

    if failed {
        1
    } else {
        0
    }
}

fn fmt(files: &[PathBuf], write: bool, check: bool) -> i32 {
    let mut dirty = false;

    for file in files {
        let source = match std::fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{} {}: {e}", "error".red().bold(), file.display());
                return 1;
            }
        };

        let document = match fedql_syntax::parse_query(&source) {
            Ok(document) => document,
            Err(err) => {
                eprintln!("{} {}: {err}", "error".red().bold(), file.display());
                return 1;
            }
        };

        let formatted = fedql_syntax::format_document(&document);
        if check {
            if formatted != source {
                println!("{} {}", "needs formatting".yellow(), file.display());
                dirty = true;
            }
        } else if write {
            if let Err(e) = std::fs::write(file, &formatted) {
                eprintln!("{} {}: {e}", "error".red().bold(), file.display());
                return 1;
            }
            println!("{} {}", "formatted".green(), file.display());
        } else {
            print!("{formatted}");
        }
    }

    if dirty {
        1
    } else {
        0
    }
}

async fn run_query(
    file: &Path,
    mappings_file: &Path,
    params: &[String],
    tenant: String,
    timeout: u64,
) -> i32 {
    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{} {}: {e}", "error".red().bold(), file.display());
            return 1;
        }
    };

    let query = match Query::parse(&source) {
        Ok(query) => query,
        Err(err) => {
            eprintln!("{} {err}", "error".red().bold());
            return 1;
        }
    };

    let mappings = match load_mappings(mappings_file) {
        Ok(mappings) => mappings,
        Err(message) => {
            eprintln!("{} {message}", "error".red().bold());
            return 1;
        }
    };

    let input = QueryInput {
        params: parse_params(params),
        headers: IndexMap::new(),
    };
    let ctx = QueryContext {
        input,
        mappings,
        tenant,
    };

    let transport = match HttpTransport::new(&TransportConfig::default()) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            eprintln!("{} {err}", "error".red().bold());
            return 1;
        }
    };
    let runner = Runner::new(transport, Duration::from_millis(timeout));

    match runner.execute_query(query.clone(), ctx).await {
        Ok(results) => {
            let document = project(&query, &results);
            println!("{:#}", document.to_json());
            0
        }
        Err(QueryError::Timeout { partial }) => {
            eprintln!("{}", "query timed out, partial results:".yellow().bold());
            let document = project(&query, &partial);
            println!("{:#}", document.to_json());
            1
        }
        Err(err) => {
            eprintln!("{} {err}", "error".red().bold());
            1
        }
    }
}

/// Parses repeated `key=value` arguments; repeated keys become lists.
fn parse_params(params: &[String]) -> IndexMap<String, Value> {
    let mut out: IndexMap<String, Value> = IndexMap::new();
    for param in params {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let value = Value::String(raw.to_string());
        match out.entry(key.to_string()) {
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(value);
            }
            indexmap::map::Entry::Occupied(mut entry) => match entry.get_mut() {
                Value::List(items) => items.push(value),
                existing => {
                    let first = std::mem::take(existing);
                    *existing = Value::List(vec![first, value]);
                }
            },
        }
    }
    out
}

fn load_mappings(path: &Path) -> Result<IndexMap<String, String>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("{}: {e}", path.display()))
}
