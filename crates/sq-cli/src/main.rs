//! # sq — Query Monitoring Records from the Command Line
//!
//! - `sq records <file.json>` — query a JSON array (or keyed object) of records.
//! - `sq statusdat` — query an objects.cache/status.dat snapshot, either
//!   with filter strings (`--filter 'status.current_state>0'`) or with
//!   named monitoring filters (`--named problems=1`).
//!
//! Output is a table followed by `N of TOTAL rows`, or the page as JSON
//! with `--json`.

mod config;

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sq_core::record::render;
use sq_core::{ArrayDatasource, Collation, Column, Datasource, Page, Query, Record, SortDirection};
use sq_statusdat::{MonitoringQuery, Reader};

use crate::config::Config;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Query monitoring records: JSON files or status.dat snapshots.
#[derive(Parser)]
#[command(name = "sq", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true, default_value = "sq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query a JSON file of records.
    Records {
        /// JSON array of objects, or an object of keyed objects.
        file: PathBuf,

        /// Column that receives each record's key (keyed files only).
        #[arg(long)]
        key_column: Option<String>,

        /// Compare text naturally ("2" before "10").
        #[arg(long)]
        natural: bool,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Query an objects.cache/status.dat snapshot.
    Statusdat {
        /// objects.cache path (overrides the config file).
        #[arg(long)]
        objects: Option<PathBuf>,

        /// status.dat path (overrides the config file).
        #[arg(long)]
        status: Option<PathBuf>,

        /// hosts, services, downtimes, groups, hostgroups, servicegroups,
        /// comments, contacts or contactgroups.
        #[arg(long, default_value = "services")]
        target: String,

        /// Named monitoring filter, e.g. `problems=1` or `hostgroups=linux`.
        /// Named queries always compare text naturally.
        #[arg(long = "named", value_name = "KEY=VALUE", conflicts_with = "filter")]
        named: Vec<String>,

        /// Compare text naturally ("2" before "10") in `--filter` queries.
        #[arg(long, conflicts_with = "named")]
        natural: bool,

        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Columns to return, comma separated; `alias=source` renames.
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Filter string, e.g. `state>0&host=web*`.
    #[arg(long)]
    filter: Option<String>,

    /// Sort key, `field` or `field desc`. Repeatable.
    #[arg(long)]
    order: Vec<String>,

    /// Page size (0 for everything). Defaults to `output.default_limit`.
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Print the page as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sq=info,sq_core=info,sq_statusdat=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Records {
            file,
            key_column,
            natural,
            query,
        } => {
            let content = std::fs::read_to_string(&file)
                .map_err(|e| format!("Can't read {}: {}", file.display(), e))?;
            let mut ds = ArrayDatasource::from_json(serde_json::from_str(&content)?);
            if let Some(column) = key_column {
                ds.set_key_column(column);
            }
            debug!(records = ds.len(), file = %file.display(), "loaded records");

            let q = build_query(&ds, &query, None, natural, config.output.default_limit)?;
            emit(&ds.fetch_page(&q)?, query.json)
        }

        Commands::Statusdat {
            objects,
            status,
            target,
            named,
            natural,
            query,
        } => {
            let mut reader_config = config.statusdat.clone();
            if let Some(path) = objects {
                reader_config.objects_file = path;
            }
            if let Some(path) = status {
                reader_config.status_file = path;
            }
            let reader = Reader::open(reader_config)?;

            if named.is_empty() {
                let q = build_query(
                    &reader,
                    &query,
                    Some(&target),
                    natural,
                    config.output.default_limit,
                )?;
                return emit(&reader.fetch_page(&q)?, query.json);
            }

            let mut q = MonitoringQuery::new(&reader, &target)?;
            if !query.columns.is_empty() {
                q.columns(query.columns.iter().map(|c| parse_column(c)))?;
            }
            let filters = named
                .iter()
                .map(|spec| parse_named(spec))
                .collect::<CliResult<Vec<_>>>()?;
            q.apply_filters(filters)?;
            for spec in &query.order {
                let (column, direction) = parse_order(spec);
                q.order(column, direction);
            }
            let limit = query.limit.unwrap_or(config.output.default_limit);
            q.limit(Some(limit), query.offset);

            let rows = q.fetch_all();
            let total = q.count();
            let page = Page {
                has_more: query.offset + rows.len() < total,
                rows,
                total,
            };
            emit(&page, query.json)
        }
    }
}

fn build_query(
    ds: &impl Datasource,
    args: &QueryArgs,
    target: Option<&str>,
    natural: bool,
    default_limit: usize,
) -> CliResult<Query> {
    let mut q = ds.select();
    if let Some(target) = target {
        q.from(target);
    }
    if !args.columns.is_empty() {
        q.columns(args.columns.iter().map(|c| parse_column(c)));
    }
    if let Some(filter) = &args.filter {
        q.add_filter(sq_core::filter::parse(filter)?);
    }
    for spec in &args.order {
        q.order_by(spec);
    }
    if natural {
        q.collation(Collation::Natural);
    }
    q.limit(Some(args.limit.unwrap_or(default_limit)), args.offset);
    debug!(filter = %q.filter(), "built query");
    Ok(q)
}

/// `name` or `alias=source`.
fn parse_column(spec: &str) -> Column {
    match spec.split_once('=') {
        Some((alias, source)) => Column::new(alias.trim(), source.trim()),
        None => Column::from(spec.trim()),
    }
}

/// `field` or `field desc`.
fn parse_order(spec: &str) -> (&str, SortDirection) {
    match spec.trim().split_once(char::is_whitespace) {
        Some((field, dir)) => (field, dir.parse().unwrap_or_default()),
        None => (spec.trim(), SortDirection::Asc),
    }
}

/// `key=value`; the value is read as JSON when it parses, else as text.
fn parse_named(spec: &str) -> CliResult<(String, Value)> {
    let (key, raw) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", spec))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

fn emit(page: &Page, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }
    if !page.rows.is_empty() {
        println!("{}", table(&page.rows));
    }
    println!("{} of {} rows", page.rows.len(), page.total);
    Ok(())
}

fn table(rows: &[Record]) -> String {
    let mut header: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !header.contains(key) {
                header.push(key.clone());
            }
        }
    }

    let mut builder = Builder::default();
    builder.push_record(header.clone());
    for row in rows {
        builder.push_record(
            header
                .iter()
                .map(|h| row.get(h).map(render).unwrap_or_default()),
        );
    }
    let mut table = builder.build();
    table.with(Style::psql());
    table.to_string()
}
