//! Planline - Financial-planning sheets from the command line

mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use planline_core::{Catalog, JsonFileStore, RawValue, Role, SheetName, Workbook};
use planline_engine::builtins::BUILTINS;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "planline", version, about = "Recompute financial-planning sheets")]
struct Cli {
    /// Config file (default: <config dir>/planline/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory. Overrides `data_dir` from the config file.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the sheets and whether they can be served.
    Sheets,
    /// List the built-in functions formulas can call.
    Functions,
    /// Print every cell of a sheet.
    Show {
        #[arg(long)]
        user: String,
        #[arg(long)]
        sheet: SheetName,
    },
    /// Set one cell and print the cells whose value changed.
    Set {
        #[arg(long)]
        user: String,
        #[arg(long)]
        sheet: SheetName,
        #[arg(long)]
        cell: String,
        /// New value. An empty string clears the cell.
        #[arg(long, allow_hyphen_values = true)]
        value: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Apply a JSON object of `cell: value` edits in file order.
    Bulk {
        #[arg(long)]
        user: String,
        #[arg(long)]
        sheet: SheetName,
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value = "user")]
        role: Role,
    },
}

#[derive(Serialize)]
struct SheetStatus {
    sheet: SheetName,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());
    let store = JsonFileStore::open(&data_dir)
        .with_context(|| format!("opening data directory {}", data_dir.display()))?;
    let workbook = Workbook::new(
        Arc::new(Catalog::standard()),
        Arc::new(config.parameters()),
        Arc::new(store),
    )
    .with_max_save_attempts(config.max_save_attempts());
    tracing::debug!(data_dir = %data_dir.display(), "workbook ready");

    match cli.command {
        Command::Sheets => {
            let statuses: Vec<SheetStatus> = SheetName::ALL
                .into_iter()
                .map(|sheet| match workbook.catalog().template(sheet) {
                    Ok(_) => SheetStatus {
                        sheet,
                        available: true,
                        error: None,
                    },
                    Err(err) => SheetStatus {
                        sheet,
                        available: false,
                        error: Some(err.to_string()),
                    },
                })
                .collect();
            print_json(&statuses)
        }
        Command::Functions => print_json(&BUILTINS),
        Command::Show { user, sheet } => print_json(&workbook.snapshot(&user, sheet)?),
        Command::Set {
            user,
            sheet,
            cell,
            value,
            role,
        } => {
            let diff = workbook.apply_edit(&user, sheet, &cell, RawValue::from_input(&value), role)?;
            print_json(&diff)
        }
        Command::Bulk {
            user,
            sheet,
            file,
            role,
        } => {
            let edits = read_edits(&file)?;
            let diff = workbook.apply_bulk(&user, sheet, &edits, role)?;
            print_json(&diff)
        }
    }
}

/// Read `{"cell": value, ...}`. Numbers and strings are values, null clears.
fn read_edits(path: &Path) -> Result<Vec<(String, Option<RawValue>)>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let object: IndexMap<String, serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {} as a JSON object", path.display()))?;

    let mut edits = Vec::with_capacity(object.len());
    for (key, value) in object {
        let raw = match value {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(n) => Some(RawValue::Number(n)),
                None => bail!("{}: number out of range", key),
            },
            serde_json::Value::String(s) => RawValue::from_input(&s),
            other => bail!("{}: unsupported value {}", key, other),
        };
        edits.push((key, raw));
    }
    Ok(edits)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
